//! EWVM code generation
//!
//! Walks the typed AST and emits assembly items. The global block becomes
//! `START` ... `STOP` with its variables at global offsets `0, 1, ...`;
//! every callable becomes an `FN<name>:` block terminated by `RETURN`, with
//! the return value at offset `-(1 + #params)`, parameters at
//! `-#params .. -1`, and locals from `0` up. System labels are `SYS<k>`
//! (suffixed with the lowercased callable name inside callables) and user
//! labels `USER<n>` likewise.

use std::fmt;

use ewvm::{Instruction, Item, Label, Opcode};

use crate::ast::{
    ArrayType, BinaryOperator, Block, BuiltInType, CallableCall, CallableDefinition, CaseElement,
    ConstantValue, Expression, ExpressionNode, ForDirection, Program, Statement, StatementKind,
    TypeValue, UnaryOperator, VariableUsage,
};
use crate::typechecker;

const BUILTIN_CALLABLES: [&str; 5] = ["write", "writeln", "read", "readln", "length"];

/// A logical error during code generation. These only surface for programs
/// whose earlier phases already failed; a clean parse cannot trigger them.
#[derive(Debug)]
pub struct CodeGenError {
    pub message: String,
}

impl CodeGenError {
    fn new(message: impl Into<String>) -> Self {
        CodeGenError {
            message: message.into(),
        }
    }
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CodeGenError {}

impl From<typechecker::TypeError> for CodeGenError {
    fn from(error: typechecker::TypeError) -> Self {
        CodeGenError::new(error.message)
    }
}

struct LabelAllocator {
    suffix: String,
    count: usize,
}

impl LabelAllocator {
    fn new(suffix: String) -> Self {
        LabelAllocator { suffix, count: 0 }
    }

    fn next(&mut self) -> Label {
        self.count += 1;
        Label::new(format!("SYS{}{}", self.count, self.suffix))
    }
}

pub struct CodeGen {
    items: Vec<Item>,
    labels: LabelAllocator,
    /// Lowercased name of the callable being generated, empty for the
    /// global block. Suffixes user and system labels.
    callable_suffix: String,
}

/// Generate the full assembly listing for a program.
pub fn generate(program: &Program) -> Result<Vec<Item>, CodeGenError> {
    let mut generator = CodeGen {
        items: Vec::new(),
        labels: LabelAllocator::new(String::new()),
        callable_suffix: String::new(),
    };

    generator.emit_block(&program.block, None)?;
    // Callables only occur at the top level.
    for callable in &program.block.callables {
        let callable = callable.borrow();
        generator.emit_block(&callable.body, Some(&*callable))?;
    }

    Ok(generator.items)
}

impl CodeGen {
    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    fn op(&mut self, opcode: Opcode) {
        self.items.push(Item::Instruction(Instruction::new(opcode)));
    }

    fn int(&mut self, opcode: Opcode, value: i64) {
        self.items
            .push(Item::Instruction(Instruction::int(opcode, value)));
    }

    fn real(&mut self, opcode: Opcode, value: f64) {
        self.items
            .push(Item::Instruction(Instruction::real(opcode, value)));
    }

    fn string(&mut self, opcode: Opcode, value: &str) {
        self.items
            .push(Item::Instruction(Instruction::string(opcode, value)));
    }

    fn jump_to(&mut self, opcode: Opcode, target: &Label) {
        self.items
            .push(Item::Instruction(Instruction::label(opcode, target)));
    }

    fn place(&mut self, label: Label) {
        self.items.push(Item::Label(label));
    }

    fn comment(&mut self, text: impl Into<String>) {
        self.items.push(Item::Comment(text.into()));
    }

    fn user_label(&self, number: i64) -> Label {
        Label::new(format!("USER{}{}", number, self.callable_suffix))
    }

    fn callable_label(name: &str) -> Label {
        Label::new(format!("FN{}", name))
    }

    fn ordinal(value: &ConstantValue) -> Result<i64, CodeGenError> {
        Ok(typechecker::ordinal_value(value)?)
    }

    fn array_element_count(array: &ArrayType) -> Result<i64, CodeGenError> {
        let mut count = 1i64;
        for dimension in &array.dimensions {
            let start = Self::ordinal(&dimension.start)?;
            let end = Self::ordinal(&dimension.end)?;
            count *= end - start + 1;
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Constants and variables
    // ------------------------------------------------------------------

    fn emit_constant(&mut self, value: &ConstantValue) {
        match value {
            ConstantValue::Boolean(value) => self.int(Opcode::Pushi, i64::from(*value)),
            ConstantValue::Integer(value) => self.int(Opcode::Pushi, *value),
            ConstantValue::Real(value) => self.real(Opcode::Pushf, *value),
            ConstantValue::Str(text) => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => self.int(Opcode::Pushi, i64::from(u32::from(c))),
                    _ => self.string(Opcode::Pushs, text),
                }
            }
            ConstantValue::Enumerated(constant) => self.int(Opcode::Pushi, constant.ordinal),
        }
    }

    /// Push the initial value for a variable of the given type. Arrays are
    /// allocated on the heap and filled slot by slot; the handle is what
    /// ends up in the variable's stack cell.
    fn emit_variable_creation(
        &mut self,
        variable_type: &TypeValue,
        offset: i64,
    ) -> Result<(), CodeGenError> {
        match variable_type {
            TypeValue::Array(array) => {
                let count = Self::array_element_count(array)?;
                self.int(Opcode::Alloc, count);

                let loop_label = self.labels.next();
                self.int(Opcode::Pushi, 0);
                self.place(loop_label.clone());
                self.int(Opcode::Pushl, offset);
                self.int(Opcode::Pushl, offset + 1);
                self.emit_variable_creation(&array.subtype, offset)?;
                self.op(Opcode::Storen);
                self.int(Opcode::Pushi, 1);
                self.op(Opcode::Add);
                self.int(Opcode::Dup, 1);
                self.int(Opcode::Pushi, count);
                self.op(Opcode::Supeq);
                self.jump_to(Opcode::Jz, &loop_label);
                self.int(Opcode::Pop, 1);
                Ok(())
            }
            TypeValue::BuiltIn(BuiltInType::Boolean | BuiltInType::Integer | BuiltInType::Char) => {
                self.int(Opcode::Pushi, 0);
                Ok(())
            }
            TypeValue::BuiltIn(BuiltInType::Real) => {
                self.real(Opcode::Pushf, 0.0);
                Ok(())
            }
            TypeValue::BuiltIn(BuiltInType::String) => {
                self.string(Opcode::Pushs, "");
                Ok(())
            }
            TypeValue::Enumerated(enumeration) => {
                self.int(Opcode::Pushi, enumeration.first_ordinal());
                Ok(())
            }
            TypeValue::Range(_) => Err(CodeGenError::new(
                "Range types decay before code generation and have no initializer",
            )),
        }
    }

    /// Load or store a variable, applying its indexations. A read pushes
    /// the value; a write pops it. Multi-dimensional offsets are computed
    /// with the row-major stride of the remaining dimensions; a trailing
    /// STRING index becomes a `CHARAT` on a 0-based position.
    fn emit_variable_usage(
        &mut self,
        usage: &VariableUsage,
        write: bool,
    ) -> Result<(), CodeGenError> {
        let local = usage.variable.callable_scope;
        let base = if write && usage.indices.is_empty() {
            if local { Opcode::Storel } else { Opcode::Storeg }
        } else if local {
            Opcode::Pushl
        } else {
            Opcode::Pushg
        };
        self.int(base, usage.variable.scope_offset.get());

        let mut current = usage.variable.variable_type.clone();
        let mut consumed = 0usize;
        let mut trailing_index = None;

        for index in &usage.indices {
            let TypeValue::Array(array) = current.clone() else {
                trailing_index = Some(index);
                break;
            };

            self.emit_expression(index)?;
            self.int(Opcode::Pushi, Self::ordinal(&array.dimensions[0].start)?);
            self.op(Opcode::Sub);

            let mut stride = 1i64;
            for dimension in &array.dimensions[1..] {
                let start = Self::ordinal(&dimension.start)?;
                let end = Self::ordinal(&dimension.end)?;
                stride *= end - start + 1;
            }
            if stride != 1 {
                self.int(Opcode::Pushi, stride);
                self.op(Opcode::Mul);
            }
            self.op(Opcode::Padd);

            current = typechecker::type_after_indexation(&current, &index.ty)?;
            consumed += 1;
        }

        if consumed != 0 {
            if write {
                self.op(Opcode::Swap);
                self.int(Opcode::Store, 0);
            } else {
                self.int(Opcode::Load, 0);
            }
        }

        if current.is(BuiltInType::String) && consumed != usage.indices.len() {
            if let Some(index) = trailing_index {
                self.emit_expression(index)?;
                self.int(Opcode::Pushi, 1);
                self.op(Opcode::Sub);
                self.op(Opcode::Charat);
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn emit_expression(&mut self, expression: &Expression) -> Result<(), CodeGenError> {
        match &expression.node {
            ExpressionNode::Constant(value) => {
                // A single character promoted to STRING must stay a string.
                if let ConstantValue::Str(text) = value {
                    if text.chars().count() == 1 && expression.ty.is(BuiltInType::String) {
                        self.string(Opcode::Pushs, text);
                        return Ok(());
                    }
                }
                self.emit_constant(value);
                Ok(())
            }
            ExpressionNode::Variable(usage) => self.emit_variable_usage(usage, false),
            ExpressionNode::Call(call) => self.emit_call(call),
            ExpressionNode::Unary { operator, operand } => {
                match operator {
                    UnaryOperator::Minus => {
                        if operand.ty.is(BuiltInType::Real) {
                            self.real(Opcode::Pushf, 0.0);
                        } else {
                            self.int(Opcode::Pushi, 0);
                        }
                        self.emit_expression(operand)?;
                        self.op(if operand.ty.is(BuiltInType::Real) {
                            Opcode::Fsub
                        } else {
                            Opcode::Sub
                        });
                    }
                    UnaryOperator::Not => {
                        self.emit_expression(operand)?;
                        self.op(Opcode::Not);
                    }
                    UnaryOperator::Plus => self.emit_expression(operand)?,
                }
                Ok(())
            }
            ExpressionNode::Binary {
                operator,
                left,
                right,
            } => {
                self.emit_expression(left)?;
                self.emit_expression(right)?;

                let any_real =
                    left.ty.is(BuiltInType::Real) || right.ty.is(BuiltInType::Real);
                let result_real = expression.ty.is(BuiltInType::Real);

                let opcode = match operator {
                    BinaryOperator::Add => {
                        if result_real {
                            Opcode::Fadd
                        } else {
                            Opcode::Add
                        }
                    }
                    BinaryOperator::Subtract => {
                        if result_real {
                            Opcode::Fsub
                        } else {
                            Opcode::Sub
                        }
                    }
                    BinaryOperator::Multiply => {
                        if result_real {
                            Opcode::Fmul
                        } else {
                            Opcode::Mul
                        }
                    }
                    BinaryOperator::Divide => Opcode::Fdiv,
                    BinaryOperator::Div => Opcode::Div,
                    BinaryOperator::Mod => Opcode::Mod,
                    BinaryOperator::And => Opcode::And,
                    BinaryOperator::Or => Opcode::Or,
                    BinaryOperator::Equal | BinaryOperator::NotEqual => Opcode::Equal,
                    BinaryOperator::Less => {
                        if any_real {
                            Opcode::Finf
                        } else {
                            Opcode::Inf
                        }
                    }
                    BinaryOperator::Greater => {
                        if any_real {
                            Opcode::Fsup
                        } else {
                            Opcode::Sup
                        }
                    }
                    BinaryOperator::LessEqual => {
                        if any_real {
                            Opcode::Finfeq
                        } else {
                            Opcode::Infeq
                        }
                    }
                    BinaryOperator::GreaterEqual => {
                        if any_real {
                            Opcode::Fsupeq
                        } else {
                            Opcode::Supeq
                        }
                    }
                    BinaryOperator::In => {
                        return Err(CodeGenError::new("'in' expressions cannot be lowered"));
                    }
                };

                self.op(opcode);
                if *operator == BinaryOperator::NotEqual {
                    self.op(Opcode::Not);
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn emit_call(&mut self, call: &CallableCall) -> Result<(), CodeGenError> {
        let name = call.callable.borrow().name.to_lowercase();
        if BUILTIN_CALLABLES.contains(&name.as_str()) {
            return self.emit_builtin_call(&name, call);
        }

        let callable = call.callable.borrow();

        // The return slot is created by the caller, below the arguments.
        if let Some(return_variable) = &callable.return_variable {
            self.emit_variable_creation(&return_variable.variable_type, 0)?;
        }

        for argument in call.arguments.iter().flatten() {
            self.emit_expression(argument)?;
        }

        let target = Self::callable_label(&callable.name);
        self.jump_to(Opcode::Pusha, &target);
        self.op(Opcode::Call);

        // Drop the callee's locals and the arguments; a return value stays.
        let pops = callable.body.variables.len() + call.arguments.len();
        if pops > 0 {
            self.int(Opcode::Pop, pops as i64);
        }
        Ok(())
    }

    fn emit_builtin_call(&mut self, name: &str, call: &CallableCall) -> Result<(), CodeGenError> {
        match name {
            "write" | "writeln" => {
                for argument in call.arguments.iter().flatten() {
                    self.emit_write_argument(argument)?;
                }
                if name == "writeln" {
                    self.op(Opcode::Writeln);
                }
                Ok(())
            }
            "read" | "readln" => {
                for argument in call.arguments.iter().flatten() {
                    self.emit_read_argument(argument)?;
                }
                if name == "readln" {
                    self.op(Opcode::Writeln);
                }
                Ok(())
            }
            "length" => {
                let argument = call
                    .arguments
                    .first()
                    .and_then(Option::as_ref)
                    .ok_or_else(|| CodeGenError::new("length takes one argument"))?;
                self.emit_expression(argument)?;
                self.op(Opcode::Strlen);
                Ok(())
            }
            _ => Err(CodeGenError::new(format!("Unknown builtin '{}'", name))),
        }
    }

    fn emit_write_argument(&mut self, argument: &Expression) -> Result<(), CodeGenError> {
        match &argument.ty {
            TypeValue::BuiltIn(BuiltInType::Boolean) => {
                // Select between the pre-pushed literals by the 0/1 value.
                self.string(Opcode::Pushs, "True");
                self.string(Opcode::Pushs, "False");
                self.op(Opcode::Pushsp);
                self.int(Opcode::Pushi, 0);
                self.emit_expression(argument)?;
                self.op(Opcode::Sub);
                self.op(Opcode::Loadn);
                self.op(Opcode::Writes);
            }
            TypeValue::BuiltIn(BuiltInType::Integer) => {
                self.emit_expression(argument)?;
                self.op(Opcode::Writei);
            }
            TypeValue::BuiltIn(BuiltInType::Real) => {
                self.emit_expression(argument)?;
                self.op(Opcode::Writef);
            }
            TypeValue::BuiltIn(BuiltInType::Char) => {
                self.emit_expression(argument)?;
                self.op(Opcode::Writechr);
            }
            TypeValue::BuiltIn(BuiltInType::String) => {
                self.emit_expression(argument)?;
                self.op(Opcode::Writes);
            }
            TypeValue::Enumerated(enumeration) => {
                // Names pushed in reverse, indexed by the ordinal.
                for constant in enumeration.constants.iter().rev() {
                    self.string(Opcode::Pushs, &constant.name);
                }
                self.op(Opcode::Pushsp);
                self.int(Opcode::Pushi, 0);
                self.emit_expression(argument)?;
                self.op(Opcode::Sub);
                self.op(Opcode::Loadn);
                self.op(Opcode::Writes);
            }
            TypeValue::Array(_) | TypeValue::Range(_) => {
                return Err(CodeGenError::new("Cannot write a structured value"));
            }
        }
        Ok(())
    }

    fn emit_read_argument(&mut self, argument: &Expression) -> Result<(), CodeGenError> {
        self.op(Opcode::Read);

        match &argument.ty {
            TypeValue::BuiltIn(BuiltInType::Integer | BuiltInType::Boolean)
            | TypeValue::Enumerated(_) => self.op(Opcode::Atoi),
            TypeValue::BuiltIn(BuiltInType::Real) => self.op(Opcode::Atof),
            TypeValue::BuiltIn(BuiltInType::Char) => {
                let end = self.labels.next();
                self.int(Opcode::Dup, 2);
                self.op(Opcode::Strlen);
                self.int(Opcode::Pushi, 1);
                self.op(Opcode::Equal);
                self.op(Opcode::Not);
                self.jump_to(Opcode::Jz, &end);
                self.string(Opcode::Err, "More than one character written");
                self.place(end);
                self.int(Opcode::Pushi, 0);
                self.op(Opcode::Charat);
            }
            TypeValue::BuiltIn(BuiltInType::String) => {}
            TypeValue::Array(_) | TypeValue::Range(_) => {
                return Err(CodeGenError::new("Cannot read into a structured value"));
            }
        }

        match &argument.node {
            ExpressionNode::Variable(usage) => self.emit_variable_usage(usage, true),
            _ => Err(CodeGenError::new("read target must be a variable")),
        }
    }

    // ------------------------------------------------------------------
    // Statements and blocks
    // ------------------------------------------------------------------

    fn emit_statement(&mut self, statement: &Statement) -> Result<(), CodeGenError> {
        if let Some(label) = &statement.label {
            let target = self.user_label(label.number);
            self.place(target);
        }

        match &statement.kind {
            StatementKind::Assign { target, value } => {
                let (Some(target), Some(value)) = (target, value) else {
                    return Ok(());
                };
                self.comment(format!("{} := ...", target.variable.name));
                self.emit_expression(value)?;
                self.emit_variable_usage(target, true)
            }

            StatementKind::Goto(label) => {
                self.comment(format!("GOTO {}", label.number));
                let target = self.user_label(label.number);
                self.jump_to(Opcode::Jump, &target);
                Ok(())
            }

            StatementKind::Call(call) => {
                self.comment(format!("{}()", call.callable.borrow().name));
                self.emit_call(call)
            }

            StatementKind::Compound(statements) => {
                for statement in statements {
                    self.emit_statement(statement)?;
                }
                Ok(())
            }

            StatementKind::If {
                condition,
                when_true,
                when_false,
            } => {
                let Some(condition) = condition else {
                    return Ok(());
                };
                let else_label = self.labels.next();
                let end_label = self.labels.next();

                self.comment("IF");
                self.emit_expression(condition)?;
                self.jump_to(Opcode::Jz, &else_label);
                self.emit_statement(when_true)?;
                self.jump_to(Opcode::Jump, &end_label);
                self.place(else_label);
                self.emit_statement(when_false)?;
                self.place(end_label);
                Ok(())
            }

            StatementKind::Repeat { condition, body } => {
                let Some(condition) = condition else {
                    return Ok(());
                };
                let start_label = self.labels.next();

                self.comment("REPEAT");
                self.place(start_label.clone());
                for statement in body {
                    self.emit_statement(statement)?;
                }
                self.emit_expression(condition)?;
                self.jump_to(Opcode::Jz, &start_label);
                Ok(())
            }

            StatementKind::While { condition, body } => {
                let Some(condition) = condition else {
                    return Ok(());
                };
                let start_label = self.labels.next();
                let end_label = self.labels.next();

                self.comment("WHILE");
                self.place(start_label.clone());
                self.emit_expression(condition)?;
                self.jump_to(Opcode::Jz, &end_label);
                self.emit_statement(body)?;
                self.jump_to(Opcode::Jump, &start_label);
                self.place(end_label);
                Ok(())
            }

            StatementKind::For {
                variable,
                initial,
                limit,
                direction,
                body,
            } => {
                let (Some(initial), Some(limit)) = (initial, limit) else {
                    return Ok(());
                };
                let start_label = self.labels.next();
                let end_label = self.labels.next();

                self.comment("FOR");
                // The limit sits beneath the running value for COPY 2.
                self.emit_expression(limit)?;
                self.emit_expression(initial)?;

                self.place(start_label.clone());
                self.int(Opcode::Dup, 1);
                let control = VariableUsage {
                    variable: variable.clone(),
                    ty: variable.variable_type.clone(),
                    indices: Vec::new(),
                };
                self.emit_variable_usage(&control, true)?;

                self.int(Opcode::Copy, 2);
                self.op(match direction {
                    ForDirection::To => Opcode::Supeq,
                    ForDirection::Downto => Opcode::Infeq,
                });
                self.jump_to(Opcode::Jz, &end_label);

                self.emit_statement(body)?;

                self.int(Opcode::Pushi, 1);
                self.op(match direction {
                    ForDirection::To => Opcode::Add,
                    ForDirection::Downto => Opcode::Sub,
                });
                self.jump_to(Opcode::Jump, &start_label);
                self.place(end_label);
                self.int(Opcode::Pop, 2);
                Ok(())
            }

            StatementKind::Case { selector, elements } => {
                let Some(selector) = selector else {
                    return Ok(());
                };
                self.comment("CASE");
                self.emit_expression(selector)?;

                let end_label = self.labels.next();

                for CaseElement { labels, body } in elements {
                    self.int(Opcode::Pushi, 0);
                    let element_end = self.labels.next();

                    for constant in labels {
                        self.op(Opcode::Pushsp);
                        self.int(Opcode::Load, -1);
                        self.emit_constant(constant);
                        self.op(Opcode::Equal);
                        self.op(Opcode::Or);
                    }
                    self.jump_to(Opcode::Jz, &element_end);

                    self.int(Opcode::Pop, 1);
                    self.emit_statement(body)?;
                    self.jump_to(Opcode::Jump, &end_label);
                    self.place(element_end);
                }

                self.int(Opcode::Pop, 1);
                self.string(Opcode::Err, "Case expression did not match");
                self.place(end_label);
                Ok(())
            }
        }
    }

    fn emit_block(
        &mut self,
        block: &Block,
        callable: Option<&CallableDefinition>,
    ) -> Result<(), CodeGenError> {
        let suffix = callable
            .map(|c| c.name.to_lowercase())
            .unwrap_or_default();
        self.labels = LabelAllocator::new(suffix.clone());
        self.callable_suffix = suffix;

        match callable {
            None => self.op(Opcode::Start),
            Some(callable) => {
                let label = Self::callable_label(&callable.name);
                self.place(label);

                // Return value below the parameters, all at negative
                // offsets relative to the frame.
                let parameters = callable.parameters.as_deref().unwrap_or(&[]);
                let frame: Vec<_> = callable
                    .return_variable
                    .iter()
                    .chain(parameters.iter())
                    .collect();
                let size = frame.len() as i64;
                for (index, variable) in frame.iter().enumerate() {
                    variable.scope_offset.set(index as i64 - size);
                }
            }
        }

        for (index, variable) in block.variables.iter().enumerate() {
            variable.scope_offset.set(index as i64);
            self.comment(format!("{} initialization", variable.name));
            self.emit_variable_creation(&variable.variable_type, index as i64)?;
        }

        for statement in &block.body {
            self.emit_statement(statement)?;
        }

        // Heap handles are popped in reverse declaration order. No real
        // free happens; nothing else allocates after initialization.
        for variable in block.variables.iter().rev() {
            if matches!(variable.variable_type, TypeValue::Array(_)) {
                self.comment(format!("{} finalization", variable.name));
                self.op(Opcode::Popst);
            }
        }

        match callable {
            None => self.op(Opcode::Stop),
            Some(_) => self.op(Opcode::Return),
        }
        Ok(())
    }
}
