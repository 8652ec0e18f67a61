//! Pasc compiler CLI
//!
//! Compiles Pascal sources to EWVM assembly. Reads from a file or stdin,
//! writes to a file or stdout; diagnostics go to stderr and a non-zero exit
//! status reports failure.

use clap::Parser as ClapParser;
use std::io::Read;
use std::process;

use pasc::{CompilerConfig, Diagnostics, compile_source};

#[derive(ClapParser)]
#[command(name = "pasc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile Pascal for the EWVM", long_about = None)]
struct Cli {
    /// Path to the file to compile ('-' for stdin)
    #[arg(default_value = "-")]
    file: String,

    /// Output assembly file ('-' for stdout)
    #[arg(short, default_value = "-")]
    output: String,

    /// Optimize generated code
    #[arg(short = 'O')]
    optimize: bool,

    /// Add debug symbols
    #[arg(short = 'g')]
    debug_symbols: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (source, display_name) = if cli.file == "-" {
        let mut source = String::new();
        if let Err(error) = std::io::stdin().read_to_string(&mut source) {
            eprintln!("Failed to read standard input: {}", error);
            process::exit(1);
        }
        (source, "<stdin>".to_string())
    } else {
        match std::fs::read_to_string(&cli.file) {
            Ok(source) => (source, cli.file.clone()),
            Err(error) => {
                eprintln!("Failed to open source file: {}", error);
                process::exit(1);
            }
        }
    };

    let mut config = CompilerConfig::new();
    config.optimize = cli.optimize;
    config.debug_symbols = cli.debug_symbols;

    let mut diagnostics = Diagnostics::new();
    let result = compile_source(&source, &config, &mut diagnostics);

    if !diagnostics.is_empty() {
        eprint!("{}", diagnostics.render(&display_name, &source));
    }

    let assembly = match result {
        Ok(assembly) => assembly,
        Err(error) => {
            eprintln!("{}", error);
            process::exit(1);
        }
    };

    if cli.output == "-" {
        println!("{}", assembly);
    } else if let Err(error) = std::fs::write(&cli.output, assembly) {
        eprintln!("Failed to write to output file: {}", error);
        process::exit(1);
    }
}
