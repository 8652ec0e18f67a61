//! Compiler diagnostics
//!
//! Errors and warnings are collected while a phase runs and rendered once,
//! line-anchored with a caret underline. Warnings never fail a phase; a
//! single error makes the owning phase report failure after it finishes its
//! sweep of the input.

const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
        }
    }
}

/// Byte span of the offending source text, with its 1-based line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
    pub line: usize,
}

impl Span {
    pub fn new(offset: usize, length: usize, line: usize) -> Self {
        Span {
            offset,
            length,
            line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
}

/// Accumulator for a whole compilation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    errors: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn error(&mut self, message: impl Into<String>, span: Span) {
        self.errors += 1;
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            span: Some(span),
        });
    }

    pub fn warning(&mut self, message: impl Into<String>, span: Span) {
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            span: Some(span),
        });
    }

    pub fn error_unlocalized(&mut self, message: impl Into<String>) {
        self.errors += 1;
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            span: None,
        });
    }

    pub fn warning_unlocalized(&mut self, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            span: None,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Render every diagnostic against the source it was raised for.
    pub fn render(&self, file_path: &str, source: &str) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            match entry.span {
                Some(span) => render_localized(&mut out, file_path, source, entry, span),
                None => render_unlocalized(&mut out, entry),
            }
        }
        out
    }
}

fn render_localized(
    out: &mut String,
    file_path: &str,
    source: &str,
    entry: &Diagnostic,
    span: Span,
) {
    let offset = span.offset.min(source.len());
    let line_start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[offset..]
        .find('\n')
        .map_or(source.len(), |i| offset + i);

    let column = offset - line_start;
    let length = span.length.min(line_end - offset);
    let color = entry.severity.color();

    out.push_str(&format!(
        "{}:{}:{}: {}{}{}: {}\n",
        file_path,
        span.line,
        column + 1,
        color,
        entry.severity.label(),
        RESET,
        entry.message
    ));
    out.push_str(&format!("{:6} | {}\n", span.line, &source[line_start..line_end]));
    out.push_str(&format!(
        "         {}{}^{}{}\n\n",
        " ".repeat(column),
        color,
        "~".repeat(length.saturating_sub(1)),
        RESET
    ));
}

fn render_unlocalized(out: &mut String, entry: &Diagnostic) {
    out.push_str(&format!(
        "{}{}{}: {}\n",
        entry.severity.color(),
        entry.severity.label(),
        RESET,
        entry.message
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_render_layout() {
        let source = "program Test;\nbegin end.\n";
        let mut diagnostics = Diagnostics::new();
        diagnostics.error("Something is off", Span::new(14, 5, 2));

        let rendered = diagnostics.render("main.pas", source);
        let expected = format!(
            "main.pas:2:1: {RED}error{RESET}: Something is off\n     2 | begin end.\n         {RED}^~~~~{RESET}\n\n"
        );
        assert_eq!(rendered, expected);
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn test_underline_truncated_to_line() {
        let source = "x\ny";
        let mut diagnostics = Diagnostics::new();
        diagnostics.error("Bad", Span::new(0, 10, 1));

        let rendered = diagnostics.render("a.pas", source);
        // span clipped to the single character available on line 1
        assert!(rendered.contains(&format!("         {RED}^{RESET}\n")));
    }

    #[test]
    fn test_warning_is_not_an_error() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.warning("Heads up", Span::new(0, 1, 1));
        assert!(!diagnostics.has_errors());
        assert!(!diagnostics.is_empty());
    }

    #[test]
    fn test_unlocalized_render() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.warning_unlocalized("detached note");
        let rendered = diagnostics.render("a.pas", "");
        assert_eq!(rendered, format!("{YELLOW}warning{RESET}: detached note\n"));
    }
}
