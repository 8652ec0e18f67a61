//! Recursive-descent parser for the Pascal subset
//!
//! Builds a typed [`Program`] while managing scopes and consulting the type
//! checker at every expression construction. Errors are recorded as located
//! diagnostics and parsing continues wherever a safe default exists
//! (`1..1 : INTEGER` for broken ranges, empty statements at sync points), so
//! one mistake does not hide the rest of the program's problems.
//!
//! Declaration sections may appear in any order and amount, but the
//! canonical order LABEL, CONST, TYPE, VAR, PROCEDURE/FUNCTION is enforced
//! with diagnostics, and each section may appear at most once per block.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{
    ArrayType, BinaryOperator, Block, BuiltInType, CallableCall, CallableDefinition, CallableRef,
    CaseElement, ConstantDefinition, ConstantValue, EnumeratedConstant, EnumeratedType,
    Expression, ExpressionNode, ForDirection, LabelDefinition, LabelRef, Program, RangeType,
    Statement, StatementKind, TypeDefinition, TypeValue, UnaryOperator, VarRef,
    VariableDefinition, VariableUsage,
};
use crate::diagnostics::{Diagnostics, Span};
use crate::lexer::{Token, TokenKind};
use crate::symbols::{AddOutcome, SymbolTable, SymbolValue};
use crate::typechecker;

const SECTION_ORDER_MESSAGE: &str =
    "Blocks in the wrong order. Correct order is LABEL, CONST, TYPE, VAR, PROCEDURE / FUNCTION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Label,
    Const,
    Type,
    Var,
    Call,
}

impl SectionKind {
    fn canonical_index(self) -> usize {
        match self {
            SectionKind::Label => 0,
            SectionKind::Const => 1,
            SectionKind::Type => 2,
            SectionKind::Var => 3,
            SectionKind::Call => 4,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            SectionKind::Label => "LABEL",
            SectionKind::Const => "CONST",
            SectionKind::Type => "TYPE",
            SectionKind::Var => "VAR",
            SectionKind::Call => "CALL",
        }
    }
}

enum SectionData {
    Labels(Vec<LabelRef>),
    Constants(Vec<Rc<ConstantDefinition>>),
    Types(Vec<Rc<TypeDefinition>>),
    Variables(Vec<VarRef>),
    Callables(Vec<CallableRef>),
}

struct Section {
    kind: SectionKind,
    data: SectionData,
    span: Span,
}

/// Call-site suffix of an identifier in expression position.
enum FactorSuffix {
    Bare,
    Indices(Vec<Expression>),
    Arguments(Vec<Option<Expression>>),
}

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    eof_span: Span,
    symbols: SymbolTable,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, diagnostics: &'a mut Diagnostics) -> Self {
        let eof_span = tokens
            .last()
            .map(|t| Span::new(t.offset + t.length, 1, t.line))
            .unwrap_or(Span::new(0, 1, 1));
        Parser {
            tokens,
            pos: 0,
            eof_span,
            symbols: SymbolTable::new(),
            diagnostics,
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn kind(&self) -> Option<TokenKind> {
        self.current().map(|t| t.kind)
    }

    fn peek_kind(&self, ahead: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| t.kind)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.kind() == Some(kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn span_here(&self) -> Span {
        self.current().map(|t| t.span()).unwrap_or(self.eof_span)
    }

    /// Extend `start` to the end of the most recently consumed token.
    fn span_from(&self, start: Span) -> Span {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(previous) if previous.offset + previous.length > start.offset => Span::new(
                start.offset,
                previous.offset + previous.length - start.offset,
                start.line,
            ),
            _ => start,
        }
    }

    fn error_unexpected(&mut self, expecting: &str) {
        match self.current() {
            Some(token) => {
                let message = format!(
                    "Unexpected token: '{}'. Expecting: {}",
                    token.text, expecting
                );
                let span = token.span();
                self.diagnostics.error(message, span);
            }
            None => {
                let message = format!("Unexpected end-of-file. Expecting: {}", expecting);
                self.diagnostics.error(message, self.eof_span);
            }
        }
    }

    fn expect(&mut self, kind: TokenKind, expecting: &str) -> Option<Token> {
        if self.check(kind) {
            self.advance()
        } else {
            self.error_unexpected(expecting);
            None
        }
    }

    /// Skip to the next statement boundary without consuming it.
    fn skip_statement(&mut self) {
        while !matches!(
            self.kind(),
            None | Some(TokenKind::Semicolon | TokenKind::End | TokenKind::Until | TokenKind::Else)
        ) {
            self.pos += 1;
        }
    }

    /// Skip a broken declaration up to and including its semicolon.
    fn recover_declaration(&mut self) {
        while !matches!(
            self.kind(),
            None | Some(
                TokenKind::Semicolon
                    | TokenKind::Begin
                    | TokenKind::End
                    | TokenKind::Label
                    | TokenKind::Const
                    | TokenKind::Type
                    | TokenKind::Var
                    | TokenKind::Procedure
                    | TokenKind::Function
            )
        ) {
            self.pos += 1;
        }
        if self.check(TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn add_symbol(&mut self, value: SymbolValue, span: Span) {
        let name = value.name();
        match self.symbols.add(value) {
            Ok(AddOutcome::Inserted) => {}
            Ok(AddOutcome::Shadowed) => {
                self.diagnostics
                    .warning(format!("Shadowing object with name '{}'", name), span);
            }
            Err(error) => self.diagnostics.error(error.message, span),
        }
    }

    // ------------------------------------------------------------------
    // Program and blocks
    // ------------------------------------------------------------------

    pub fn parse(mut self) -> Option<Program> {
        self.expect(TokenKind::Program, "PROGRAM")?;
        let name = self.expect(TokenKind::Identifier, "ID")?;
        self.parse_program_arguments();

        if self.expect(TokenKind::Semicolon, "';'").is_none() {
            while !matches!(self.kind(), None | Some(TokenKind::Semicolon)) {
                self.pos += 1;
            }
            self.advance()?;
        }

        let block = self.parse_block();
        self.expect(TokenKind::Period, "'.'");
        if self.current().is_some() {
            self.error_unexpected("end of file");
        }

        Some(Program {
            name: name.text,
            block,
        })
    }

    fn parse_program_arguments(&mut self) {
        if !self.check(TokenKind::LeftParen) {
            return;
        }
        let open = self.span_here();
        self.advance();

        if self.check(TokenKind::RightParen) {
            self.advance();
            let span = self.span_from(open);
            self.diagnostics.error(
                "Invalid program arguments: at least one argument required",
                span,
            );
        } else if self.check(TokenKind::Identifier) {
            self.parse_identifier_list();
            self.expect(TokenKind::RightParen, "',', ')'");
            let span = self.span_from(open);
            self.diagnostics
                .warning("Program arguments are not supported. Ignoring them...", span);
        } else {
            self.error_unexpected("ID, ')'");
            while !matches!(
                self.kind(),
                None | Some(TokenKind::RightParen | TokenKind::Semicolon)
            ) {
                self.pos += 1;
            }
            if self.check(TokenKind::RightParen) {
                self.advance();
            }
        }
    }

    /// One or more comma-separated identifiers. The caller guarantees the
    /// first one is present.
    fn parse_identifier_list(&mut self) -> Vec<Token> {
        let mut names = Vec::new();
        if let Some(first) = self.expect(TokenKind::Identifier, "ID") {
            names.push(first);
        }
        while self.check(TokenKind::Comma) {
            self.advance();
            match self.expect(TokenKind::Identifier, "ID") {
                Some(token) => names.push(token),
                None => break,
            }
        }
        names
    }

    fn parse_block(&mut self) -> Block {
        let mut sections = Vec::new();

        loop {
            match self.kind() {
                Some(TokenKind::Label) => sections.push(self.parse_label_section()),
                Some(TokenKind::Const) => sections.push(self.parse_constant_section()),
                Some(TokenKind::Type) => sections.push(self.parse_type_section()),
                Some(TokenKind::Var) => sections.push(self.parse_variable_section()),
                Some(TokenKind::Procedure | TokenKind::Function) => {
                    sections.push(self.parse_callable_section());
                }
                Some(TokenKind::Begin) => break,
                Some(_) => {
                    self.error_unexpected("LABEL, CONST, TYPE, VAR, PROCEDURE, FUNCTION, BEGIN");
                    self.pos += 1;
                }
                None => {
                    self.error_unexpected("BEGIN");
                    break;
                }
            }
        }

        self.check_section_order(&sections);

        let mut block = Block::empty();
        let mut label_section_span = None;
        let mut seen = [false; 5];
        for section in sections {
            let index = section.kind.canonical_index();
            if seen[index] {
                continue;
            }
            seen[index] = true;
            match section.data {
                SectionData::Labels(labels) => {
                    label_section_span = Some(section.span);
                    block.labels = labels;
                }
                SectionData::Constants(constants) => block.constants = constants,
                SectionData::Types(types) => block.types = types,
                SectionData::Variables(variables) => block.variables = variables,
                SectionData::Callables(callables) => block.callables = callables,
            }
        }

        block.body = self.parse_begin_end();

        for label in &block.labels {
            if label.used.get() && !label.placed.get() {
                let span = label_section_span.unwrap_or(self.eof_span);
                self.diagnostics.error(
                    format!(
                        "Label '{}' was used but not assigned to any statement",
                        label.number
                    ),
                    span,
                );
            }
        }

        block
    }

    fn check_section_order(&mut self, sections: &[Section]) {
        // For every section seen, the canonical slots before it close; a
        // later arrival in a closed slot is out of order, a second arrival
        // in an occupied slot is a duplicate.
        const UNSEEN: i8 = 0;
        const CLOSED: i8 = 1;
        const OCCUPIED: i8 = 2;
        let mut slots = [UNSEEN; 5];

        for section in sections {
            let index = section.kind.canonical_index();
            for slot in slots.iter_mut().take(index) {
                if *slot == UNSEEN {
                    *slot = CLOSED;
                }
            }
            match slots[index] {
                UNSEEN => slots[index] = OCCUPIED,
                CLOSED => {
                    slots[index] = OCCUPIED;
                    self.diagnostics.error(SECTION_ORDER_MESSAGE, section.span);
                }
                _ => {
                    self.diagnostics.error(
                        format!("{} block defined twice", section.kind.tag()),
                        section.span,
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Declaration sections
    // ------------------------------------------------------------------

    fn parse_label_section(&mut self) -> Section {
        let keyword = self.advance();
        let span = keyword.map(|t| t.span()).unwrap_or(self.eof_span);
        let mut labels = Vec::new();

        if self.check(TokenKind::Integer) {
            loop {
                match self.expect(TokenKind::Integer, "INTEGER") {
                    Some(token) => {
                        let label = LabelDefinition::new(token.integer_value());
                        self.add_symbol(SymbolValue::Label(label.clone()), token.span());
                        labels.push(label);
                    }
                    None => break,
                }
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::Semicolon, "',', ';'");
        } else {
            if self.check(TokenKind::Semicolon) {
                self.advance();
            }
            self.diagnostics.error(
                "At least one label definition is required in a label block",
                span,
            );
        }

        Section {
            kind: SectionKind::Label,
            data: SectionData::Labels(labels),
            span,
        }
    }

    fn parse_constant_section(&mut self) -> Section {
        let keyword = self.advance();
        let span = keyword.map(|t| t.span()).unwrap_or(self.eof_span);
        let mut constants = Vec::new();

        if self.check(TokenKind::Identifier) {
            while self.check(TokenKind::Identifier) {
                let name = match self.advance() {
                    Some(token) => token,
                    None => break,
                };
                if self.expect(TokenKind::Equal, "'='").is_none() {
                    self.recover_declaration();
                    continue;
                }
                let value = self.parse_constant().unwrap_or(ConstantValue::Integer(0));
                self.expect(TokenKind::Semicolon, "';'");

                let definition = Rc::new(ConstantDefinition {
                    name: name.text.clone(),
                    value,
                });
                self.add_symbol(SymbolValue::Constant(definition.clone()), name.span());
                constants.push(definition);
            }
        } else {
            if self.check(TokenKind::Semicolon) {
                self.advance();
            }
            self.diagnostics.error(
                "At least one constant definition is required in a constant block",
                span,
            );
        }

        Section {
            kind: SectionKind::Const,
            data: SectionData::Constants(constants),
            span,
        }
    }

    fn parse_type_section(&mut self) -> Section {
        let keyword = self.advance();
        let span = keyword.map(|t| t.span()).unwrap_or(self.eof_span);
        let mut types = Vec::new();

        if self.check(TokenKind::Identifier) {
            while self.check(TokenKind::Identifier) {
                let name = match self.advance() {
                    Some(token) => token,
                    None => break,
                };
                if self.expect(TokenKind::Equal, "'='").is_none() {
                    self.recover_declaration();
                    continue;
                }
                let value = self
                    .parse_type()
                    .unwrap_or(TypeValue::BuiltIn(BuiltInType::Integer));
                self.expect(TokenKind::Semicolon, "';'");

                let definition = Rc::new(TypeDefinition {
                    name: name.text.clone(),
                    value,
                });
                self.add_symbol(SymbolValue::Type(definition.clone()), name.span());
                types.push(definition);
            }
        } else {
            if self.check(TokenKind::Semicolon) {
                self.advance();
            }
            self.diagnostics.error(
                "At least one type definition is required in a type block",
                span,
            );
        }

        Section {
            kind: SectionKind::Type,
            data: SectionData::Types(types),
            span,
        }
    }

    fn parse_variable_section(&mut self) -> Section {
        let keyword = self.advance();
        let span = keyword.map(|t| t.span()).unwrap_or(self.eof_span);
        let mut variables = Vec::new();

        if self.check(TokenKind::Identifier) {
            while self.check(TokenKind::Identifier) {
                let names = self.parse_identifier_list();
                if self.expect(TokenKind::Colon, "',', ':'").is_none() {
                    self.recover_declaration();
                    continue;
                }
                let ty = self
                    .parse_type()
                    .unwrap_or(TypeValue::BuiltIn(BuiltInType::Integer));
                self.expect(TokenKind::Semicolon, "';'");

                let callable_scope = self.symbols.depth() == 2;
                for name in names {
                    let variable =
                        VariableDefinition::new(&name.text, ty.clone(), callable_scope);
                    self.add_symbol(SymbolValue::Variable(variable.clone()), name.span());
                    variables.push(variable);
                }
            }
        } else {
            if self.check(TokenKind::Semicolon) {
                self.advance();
            }
            self.diagnostics.error(
                "At least one variable definition is required in a variable block",
                span,
            );
        }

        Section {
            kind: SectionKind::Var,
            data: SectionData::Variables(variables),
            span,
        }
    }

    fn parse_callable_section(&mut self) -> Section {
        let span = self.span_here();
        if self.symbols.depth() > 1 {
            self.diagnostics
                .error("Nested procedures / functions are not supported", span);
        }

        let mut callables = Vec::new();
        while matches!(
            self.kind(),
            Some(TokenKind::Procedure | TokenKind::Function)
        ) {
            if let Some(callable) = self.parse_callable_definition() {
                callables.push(callable);
            }
        }
        self.expect(TokenKind::Semicolon, "';'");

        Section {
            kind: SectionKind::Call,
            data: SectionData::Callables(callables),
            span,
        }
    }

    fn parse_callable_definition(&mut self) -> Option<CallableRef> {
        let keyword = self.advance()?;
        let is_function = keyword.kind == TokenKind::Function;

        let name = match self.expect(TokenKind::Identifier, "ID") {
            Some(token) => token,
            None => {
                self.recover_declaration();
                return None;
            }
        };

        self.symbols.new_scope();
        let parameters = self.parse_parameter_list();

        let return_variable = if is_function {
            if self.expect(TokenKind::Colon, "':'").is_some() {
                let ty = self
                    .parse_type_id()
                    .unwrap_or(TypeValue::BuiltIn(BuiltInType::Integer));
                let variable = VariableDefinition::new(&name.text, ty, true);
                self.add_symbol(SymbolValue::Variable(variable.clone()), name.span());
                Some(variable)
            } else {
                None
            }
        } else {
            None
        };

        self.expect(TokenKind::Semicolon, "';'");
        let body = self.parse_block();
        self.symbols.pop_scope();

        let callable = Rc::new(RefCell::new(CallableDefinition {
            name: name.text.clone(),
            parameters: Some(parameters),
            return_variable,
            body,
        }));
        self.add_symbol(SymbolValue::Callable(callable.clone()), name.span());
        Some(callable)
    }

    fn parse_parameter_list(&mut self) -> Vec<VarRef> {
        if !self.check(TokenKind::LeftParen) {
            return Vec::new();
        }
        self.advance();

        // `()` is not valid: a parenthesized list holds at least one group.
        if self.check(TokenKind::RightParen) {
            self.error_unexpected("ID");
            self.advance();
            return Vec::new();
        }

        let mut parameters = Vec::new();
        loop {
            if !self.check(TokenKind::Identifier) {
                self.error_unexpected("ID");
                break;
            }
            let names = self.parse_identifier_list();
            if self.expect(TokenKind::Colon, "',', ':'").is_none() {
                break;
            }
            let ty = self
                .parse_type_id()
                .unwrap_or(TypeValue::BuiltIn(BuiltInType::Integer));

            for name in names {
                let variable = VariableDefinition::new(&name.text, ty.clone(), true);
                self.add_symbol(SymbolValue::Variable(variable.clone()), name.span());
                parameters.push(variable);
            }

            if self.check(TokenKind::Semicolon) {
                self.advance();
            } else {
                break;
            }
        }

        self.expect(TokenKind::RightParen, "';', ')'");
        parameters
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_type_id(&mut self) -> Option<TypeValue> {
        let name = self.expect(TokenKind::Identifier, "ID")?;
        match self.symbols.query_type(&name.text) {
            Ok((definition, _)) => Some(definition.value.clone()),
            Err(error) => {
                self.diagnostics.error(error.message, name.span());
                None
            }
        }
    }

    fn parse_type(&mut self) -> Option<TypeValue> {
        match self.kind() {
            Some(TokenKind::Identifier) if self.peek_kind(1) == Some(TokenKind::Range) => {
                self.parse_range_as_type()
            }
            Some(TokenKind::Identifier) => self.parse_type_id(),
            Some(TokenKind::Caret) => {
                let caret = self.advance()?;
                self.diagnostics
                    .error("Pointer types are not supported", caret.span());
                let _ = self.parse_type_id();
                None
            }
            Some(TokenKind::LeftParen) => self.parse_enumerated_type(),
            Some(
                TokenKind::Array
                | TokenKind::Record
                | TokenKind::Set
                | TokenKind::File
                | TokenKind::Packed,
            ) => self.parse_structured_type(),
            Some(
                TokenKind::Integer
                | TokenKind::Real
                | TokenKind::StringLiteral
                | TokenKind::Plus
                | TokenKind::Minus,
            ) => self.parse_range_as_type(),
            _ => {
                self.error_unexpected("type");
                None
            }
        }
    }

    /// A range in type position decays to its component type, with a
    /// warning; ranges carry bounds only inside array dimensions.
    fn parse_range_as_type(&mut self) -> Option<TypeValue> {
        let start = self.span_here();
        let range = self.parse_range_type();
        let span = self.span_from(start);
        self.diagnostics.warning(
            "Range type being interpreted as the type of its components",
            span,
        );
        Some(range.subtype)
    }

    /// `constant .. constant`, validated. Any failure substitutes
    /// `1..1 : INTEGER` so parsing can continue.
    fn parse_range_type(&mut self) -> RangeType {
        let fallback = RangeType {
            start: ConstantValue::Integer(1),
            end: ConstantValue::Integer(1),
            subtype: TypeValue::BuiltIn(BuiltInType::Integer),
        };

        let start_span = self.span_here();
        let lower = self.parse_constant();
        if self.expect(TokenKind::Range, "'..'").is_none() {
            return fallback;
        }
        let upper = self.parse_constant();
        let span = self.span_from(start_span);

        let (Some(lower), Some(upper)) = (lower, upper) else {
            return fallback;
        };

        let (Ok(lower_type), Ok(upper_type)) = (
            typechecker::constant_type(&lower),
            typechecker::constant_type(&upper),
        ) else {
            return fallback;
        };

        if lower_type != upper_type {
            self.diagnostics
                .error("Types of elements in range type are different", span);
            return fallback;
        }

        let (Ok(lower_ordinal), Ok(upper_ordinal)) = (
            typechecker::ordinal_value(&lower),
            typechecker::ordinal_value(&upper),
        ) else {
            self.diagnostics
                .error("Type of elements in range type is not ordinal", span);
            return fallback;
        };

        if lower_ordinal > upper_ordinal {
            self.diagnostics
                .error("Range's upper bound is lower than its lower bound", span);
            return fallback;
        }

        RangeType {
            start: lower,
            end: upper,
            subtype: lower_type,
        }
    }

    fn parse_enumerated_type(&mut self) -> Option<TypeValue> {
        self.advance(); // '('
        if !self.check(TokenKind::Identifier) {
            self.error_unexpected("ID");
            while !matches!(
                self.kind(),
                None | Some(TokenKind::RightParen | TokenKind::Semicolon)
            ) {
                self.pos += 1;
            }
            if self.check(TokenKind::RightParen) {
                self.advance();
            }
            return None;
        }

        let names = self.parse_identifier_list();
        self.expect(TokenKind::RightParen, "',', ')'");

        let mut constants = Vec::new();
        let mut definitions = Vec::new();
        for (ordinal, name) in names.iter().enumerate() {
            let constant = EnumeratedConstant::new(&name.text, ordinal as i64);
            definitions.push(Rc::new(ConstantDefinition {
                name: name.text.clone(),
                value: ConstantValue::Enumerated(constant.clone()),
            }));
            constants.push(constant);
        }

        let owner = Rc::new(EnumeratedType {
            constants: definitions.clone(),
        });
        for constant in &constants {
            constant.set_owner(&owner);
        }
        for (definition, name) in definitions.into_iter().zip(&names) {
            self.add_symbol(SymbolValue::Constant(definition), name.span());
        }

        Some(TypeValue::Enumerated(owner))
    }

    fn parse_structured_type(&mut self) -> Option<TypeValue> {
        if self.check(TokenKind::Packed) {
            let packed = self.advance()?;
            self.diagnostics.warning(
                "Packed structured types are not supported. Ignoring this keyword ...",
                packed.span(),
            );
        }

        match self.kind() {
            Some(TokenKind::Array) => self.parse_array_type(),
            Some(TokenKind::Record) => {
                let record = self.advance()?;
                self.diagnostics
                    .error("Record types are not supported", record.span());
                self.skip_record_body();
                None
            }
            Some(TokenKind::Set) => {
                let set = self.advance()?;
                self.diagnostics
                    .error("Set types are not supported", set.span());
                self.expect(TokenKind::Of, "OF");
                let _ = self.parse_type();
                None
            }
            Some(TokenKind::File) => {
                let file = self.advance()?;
                self.diagnostics
                    .error("File types are not supported", file.span());
                self.expect(TokenKind::Of, "OF");
                let _ = self.parse_type();
                None
            }
            _ => {
                self.error_unexpected("ARRAY, RECORD, SET, FILE");
                None
            }
        }
    }

    /// Skip a record body up to its matching END, accounting for nested
    /// BEGIN/END pairs.
    fn skip_record_body(&mut self) {
        let mut depth = 1usize;
        while let Some(token) = self.advance() {
            match token.kind {
                TokenKind::Begin => depth += 1,
                TokenKind::End => {
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    fn parse_array_type(&mut self) -> Option<TypeValue> {
        let array = self.advance()?;

        if self.check(TokenKind::Of) {
            self.diagnostics
                .error("Missing array dimensions", array.span());
            self.advance();
            let _ = self.parse_type();
            return None;
        }

        self.expect(TokenKind::LeftBracket, "'['")?;
        let mut dimensions = vec![self.parse_range_type()];
        while self.check(TokenKind::Comma) {
            self.advance();
            dimensions.push(self.parse_range_type());
        }
        self.expect(TokenKind::RightBracket, "',', ']'");
        self.expect(TokenKind::Of, "OF");

        // Nested arrays coalesce: the leftmost index is outermost.
        match self.parse_type()? {
            TypeValue::Array(inner) => {
                dimensions.extend(inner.dimensions.iter().cloned());
                Some(TypeValue::Array(Rc::new(ArrayType {
                    subtype: inner.subtype.clone(),
                    dimensions,
                })))
            }
            element => Some(TypeValue::Array(Rc::new(ArrayType {
                subtype: element,
                dimensions,
            }))),
        }
    }

    // ------------------------------------------------------------------
    // Constants
    // ------------------------------------------------------------------

    fn at_expression_operator(&self) -> bool {
        matches!(
            self.kind(),
            Some(
                TokenKind::Plus
                    | TokenKind::Minus
                    | TokenKind::Star
                    | TokenKind::Slash
                    | TokenKind::Div
                    | TokenKind::Mod
                    | TokenKind::And
                    | TokenKind::Or
                    | TokenKind::Equal
                    | TokenKind::Different
                    | TokenKind::Less
                    | TokenKind::Greater
                    | TokenKind::LessEqual
                    | TokenKind::GreaterEqual
                    | TokenKind::In
            )
        )
    }

    fn parse_constant(&mut self) -> Option<ConstantValue> {
        let start_span = self.span_here();

        // Shapes that can only open a full expression.
        if matches!(
            self.kind(),
            Some(TokenKind::LeftParen | TokenKind::Not | TokenKind::Nil)
        ) {
            let _ = self.parse_expression();
            let span = self.span_from(start_span);
            self.diagnostics.error(
                "In standard Pascal, full expressions are not allowed in constants",
                span,
            );
            return None;
        }

        let save_pos = self.pos;
        let clean_before = self.diagnostics.entries().len();
        let value = self.parse_signed_constant();

        if value.is_some() && self.at_expression_operator() {
            if self.diagnostics.entries().len() == clean_before {
                // Reparse the whole thing as the expression it really is.
                self.pos = save_pos;
                let _ = self.parse_expression();
            } else {
                while self.at_expression_operator()
                    || matches!(
                        self.kind(),
                        Some(
                            TokenKind::Identifier
                                | TokenKind::Integer
                                | TokenKind::Real
                                | TokenKind::StringLiteral
                        )
                    )
                {
                    self.pos += 1;
                }
            }
            let span = self.span_from(start_span);
            self.diagnostics.error(
                "In standard Pascal, full expressions are not allowed in constants",
                span,
            );
            return None;
        }

        value
    }

    fn parse_signed_constant(&mut self) -> Option<ConstantValue> {
        let operator = match self.kind() {
            Some(TokenKind::Plus) => Some(UnaryOperator::Plus),
            Some(TokenKind::Minus) => Some(UnaryOperator::Minus),
            _ => None,
        };
        let Some(operator) = operator else {
            return self.parse_unsigned_constant();
        };

        let sign = self.advance()?;
        let value = self.parse_unsigned_constant()?;
        let ty = typechecker::constant_type(&value).ok()?;
        if let Err(error) = typechecker::unary_operation_type(operator, &ty) {
            self.diagnostics.error(error.message, sign.span());
            return None;
        }

        Some(match (operator, value) {
            (UnaryOperator::Minus, ConstantValue::Integer(v)) => {
                ConstantValue::Integer(v.wrapping_neg())
            }
            (UnaryOperator::Minus, ConstantValue::Real(v)) => ConstantValue::Real(-v),
            (_, value) => value,
        })
    }

    fn parse_unsigned_constant(&mut self) -> Option<ConstantValue> {
        match self.kind() {
            Some(TokenKind::Integer) => {
                let token = self.advance()?;
                Some(ConstantValue::Integer(token.integer_value()))
            }
            Some(TokenKind::Real) => {
                let token = self.advance()?;
                Some(ConstantValue::Real(token.real_value()))
            }
            Some(TokenKind::StringLiteral) => {
                let token = self.advance()?;
                Some(ConstantValue::Str(token.text))
            }
            Some(TokenKind::Identifier) => {
                let token = self.advance()?;
                match self.symbols.query_constant(&token.text) {
                    Ok((definition, _)) => Some(definition.value.clone()),
                    Err(error) => {
                        self.diagnostics.error(error.message, token.span());
                        None
                    }
                }
            }
            _ => {
                self.error_unexpected("'+', '-', ID, INTEGER, FLOAT, STRING");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_begin_end(&mut self) -> Vec<Statement> {
        let Some(begin) = self.expect(TokenKind::Begin, "BEGIN") else {
            return Vec::new();
        };

        if self.check(TokenKind::End) {
            self.diagnostics.error(
                "Empty compound statements are not allowed in standard Pascal",
                begin.span(),
            );
            self.advance();
            return Vec::new();
        }

        let mut statements = vec![self.parse_statement()];
        while self.check(TokenKind::Semicolon) {
            self.advance();
            statements.push(self.parse_statement());
        }

        if self.expect(TokenKind::End, "';', END").is_none() {
            while !matches!(self.kind(), None | Some(TokenKind::End)) {
                self.pos += 1;
            }
            self.advance();
        }

        statements
    }

    fn parse_statement(&mut self) -> Statement {
        let mut label = None;

        if self.check(TokenKind::Integer) && self.peek_kind(1) == Some(TokenKind::Colon) {
            if let Some(number) = self.advance() {
                self.advance(); // ':'
                match self.symbols.query_label(number.integer_value()) {
                    Ok(definition) => {
                        if definition.placed.get() {
                            self.diagnostics
                                .error("Label already assigned to a statement", number.span());
                        } else {
                            definition.placed.set(true);
                        }
                        label = Some(definition);
                    }
                    Err(error) => self.diagnostics.error(error.message, number.span()),
                }
            }
        }

        let kind = self
            .parse_unlabeled_statement()
            .unwrap_or(StatementKind::Compound(Vec::new()));
        Statement { kind, label }
    }

    fn parse_unlabeled_statement(&mut self) -> Option<StatementKind> {
        match self.kind() {
            // Empty statement at a boundary.
            None
            | Some(
                TokenKind::Semicolon | TokenKind::End | TokenKind::Until | TokenKind::Else,
            ) => None,

            Some(TokenKind::Goto) => {
                self.advance();
                let number = match self.expect(TokenKind::Integer, "INTEGER") {
                    Some(token) => token,
                    None => {
                        self.skip_statement();
                        return None;
                    }
                };
                match self.symbols.query_label(number.integer_value()) {
                    Ok(label) => {
                        label.used.set(true);
                        Some(StatementKind::Goto(label))
                    }
                    Err(error) => {
                        self.diagnostics.error(error.message, number.span());
                        None
                    }
                }
            }

            Some(TokenKind::Begin) => Some(StatementKind::Compound(self.parse_begin_end())),

            Some(TokenKind::If) => {
                let keyword = self.advance()?;
                let condition = self.parse_expression();
                if let Some(condition) = &condition {
                    if !condition.ty.is(BuiltInType::Boolean) {
                        self.diagnostics
                            .error("Expression in if-statement is not boolean", keyword.span());
                    }
                }
                self.expect(TokenKind::Then, "THEN");
                let when_true = self.parse_statement();
                let when_false = if self.check(TokenKind::Else) {
                    self.advance();
                    self.parse_statement()
                } else {
                    Statement::empty()
                };
                Some(StatementKind::If {
                    condition,
                    when_true: Box::new(when_true),
                    when_false: Box::new(when_false),
                })
            }

            Some(TokenKind::While) => {
                let keyword = self.advance()?;
                let condition = self.parse_expression();
                if let Some(condition) = &condition {
                    if !condition.ty.is(BuiltInType::Boolean) {
                        self.diagnostics
                            .error("Expression in while loop is not boolean", keyword.span());
                    }
                }
                self.expect(TokenKind::Do, "DO");
                let body = self.parse_statement();
                Some(StatementKind::While {
                    condition,
                    body: Box::new(body),
                })
            }

            Some(TokenKind::Repeat) => {
                self.advance();
                let mut body = vec![self.parse_statement()];
                while self.check(TokenKind::Semicolon) {
                    self.advance();
                    body.push(self.parse_statement());
                }
                let until = self.expect(TokenKind::Until, "';', UNTIL");
                let condition = self.parse_expression();
                if let (Some(until), Some(condition)) = (&until, &condition) {
                    if !condition.ty.is(BuiltInType::Boolean) {
                        self.diagnostics.error(
                            "Expression in repeat-until loop is not boolean",
                            until.span(),
                        );
                    }
                }
                Some(StatementKind::Repeat { condition, body })
            }

            Some(TokenKind::For) => self.parse_for_statement(),
            Some(TokenKind::Case) => self.parse_case_statement(),

            Some(TokenKind::With) => {
                let keyword = self.advance()?;
                self.diagnostics
                    .error("WITH statements are not supported", keyword.span());
                loop {
                    match self.expect(TokenKind::Identifier, "ID") {
                        Some(name) => {
                            let _ = self.parse_variable_usage(&name);
                        }
                        None => break,
                    }
                    if self.check(TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::Do, "DO");
                let _ = self.parse_statement();
                None
            }

            Some(TokenKind::Identifier) => self.parse_identifier_statement(),

            Some(_) => {
                self.error_unexpected("ID, BEGIN, IF, WHILE, REPEAT, FOR, CASE, GOTO, WITH");
                self.skip_statement();
                None
            }
        }
    }

    fn parse_for_statement(&mut self) -> Option<StatementKind> {
        self.advance(); // FOR
        let name = match self.expect(TokenKind::Identifier, "ID") {
            Some(token) => token,
            None => {
                self.skip_statement();
                return None;
            }
        };
        if self.expect(TokenKind::Assign, "':='").is_none() {
            self.skip_statement();
            return None;
        }

        let initial_start = self.span_here();
        let initial = self.parse_expression();
        let initial_span = self.span_from(initial_start);

        let direction = match self.kind() {
            Some(TokenKind::To) => ForDirection::To,
            Some(TokenKind::Downto) => ForDirection::Downto,
            _ => {
                self.error_unexpected("TO, DOWNTO");
                self.skip_statement();
                return None;
            }
        };
        self.advance();

        let limit_start = self.span_here();
        let limit = self.parse_expression();
        let limit_span = self.span_from(limit_start);

        self.expect(TokenKind::Do, "DO");
        let body = self.parse_statement();

        let (variable, top_scope) = match self.symbols.query_variable(&name.text) {
            Ok(result) => result,
            Err(error) => {
                self.diagnostics.error(error.message, name.span());
                return None;
            }
        };

        if !top_scope {
            self.diagnostics.error(
                "For-loop control variable is not in the top-most scope",
                name.span(),
            );
        }

        let control_type = &variable.variable_type;
        let ordinal = control_type.is(BuiltInType::Boolean)
            || control_type.is(BuiltInType::Integer)
            || control_type.is(BuiltInType::Char)
            || matches!(control_type, TypeValue::Enumerated(_));
        if !ordinal {
            self.diagnostics
                .error("For loop control variable is not ordinal", name.span());
        }

        if let Some(initial) = &initial {
            if !typechecker::can_assign(control_type, &initial.ty) {
                self.diagnostics.error(
                    "Type mismatch between expression and loop control variable",
                    initial_span,
                );
            }
        }
        if let Some(limit) = &limit {
            if !typechecker::can_assign(control_type, &limit.ty) {
                self.diagnostics.error(
                    "Type mismatch between expression and loop control variable",
                    limit_span,
                );
            }
        }

        Some(StatementKind::For {
            variable,
            initial,
            limit,
            direction,
            body: Box::new(body),
        })
    }

    fn parse_case_statement(&mut self) -> Option<StatementKind> {
        self.advance(); // CASE
        let selector = self.parse_expression();
        self.expect(TokenKind::Of, "OF");

        let mut elements = Vec::new();
        loop {
            if matches!(self.kind(), None | Some(TokenKind::End)) {
                break;
            }

            let mut labels = Vec::new();
            if let Some(constant) = self.parse_constant() {
                labels.push(constant);
            }
            while self.check(TokenKind::Comma) {
                self.advance();
                if let Some(constant) = self.parse_constant() {
                    labels.push(constant);
                }
            }

            if self.expect(TokenKind::Colon, "',', ':'").is_none() {
                while !matches!(self.kind(), None | Some(TokenKind::Semicolon | TokenKind::End)) {
                    self.pos += 1;
                }
            } else {
                let body = self.parse_statement();
                elements.push(CaseElement { labels, body });
            }

            if self.check(TokenKind::Semicolon) {
                self.advance();
            } else {
                break;
            }
        }

        self.expect(TokenKind::End, "';', END");
        Some(StatementKind::Case { selector, elements })
    }

    /// A statement opening with an identifier: an assignment when an index
    /// list or `:=` follows, a procedure call otherwise.
    fn parse_identifier_statement(&mut self) -> Option<StatementKind> {
        let name = self.advance()?;

        if matches!(
            self.kind(),
            Some(TokenKind::LeftBracket | TokenKind::Assign | TokenKind::Equal)
        ) {
            let target = self.parse_variable_usage(&name);

            if self.check(TokenKind::Equal) {
                let equal = self.advance()?;
                self.diagnostics
                    .error("Syntax error. Did you mean to use ':='?", equal.span());
                let _ = self.parse_expression();
                return None;
            }

            let assign = self.expect(TokenKind::Assign, "':='")?;
            let mut value = self.parse_expression();

            if let (Some(target), Some(value)) = (&target, &mut value) {
                if target.variable.variable_type.is(BuiltInType::String)
                    && value.ty.is(BuiltInType::Char)
                {
                    value.ty = TypeValue::BuiltIn(BuiltInType::String);
                }
                if !typechecker::can_assign(&target.ty, &value.ty) {
                    self.diagnostics
                        .error("Assignment is impossible due to type mismatch", assign.span());
                }
                if let Err(error) = typechecker::check_string_element_assignment(target) {
                    self.diagnostics.error(error.message, assign.span());
                }
            }

            return Some(StatementKind::Assign { target, value });
        }

        let call = self.parse_callable_call(&name)?;
        if call.callable.borrow().return_variable.is_some() {
            self.diagnostics
                .error("Calling a function, not a procedure", name.span());
            return None;
        }
        Some(StatementKind::Call(call))
    }

    // ------------------------------------------------------------------
    // Variable usages and calls
    // ------------------------------------------------------------------

    /// Zero or more bracketed expression lists, flattened: `a[1,2][3]`
    /// carries the indices `1, 2, 3`.
    fn parse_index_lists(&mut self) -> Vec<Expression> {
        let mut indices = Vec::new();
        while self.check(TokenKind::LeftBracket) {
            self.advance();
            let list = self.parse_expression_list();
            self.expect(TokenKind::RightBracket, "',', ']'");
            indices.extend(list.into_iter().flatten());
        }
        indices
    }

    fn parse_variable_usage(&mut self, name: &Token) -> Option<VariableUsage> {
        let indices = self.parse_index_lists();
        match self.symbols.query_variable(&name.text) {
            Ok((variable, _)) => Some(self.build_variable_usage(name, variable, indices)),
            Err(error) => {
                self.diagnostics.error(error.message, name.span());
                None
            }
        }
    }

    fn build_variable_usage(
        &mut self,
        name: &Token,
        variable: VarRef,
        indices: Vec<Expression>,
    ) -> VariableUsage {
        let mut current = variable.variable_type.clone();
        for index in &indices {
            match typechecker::type_after_indexation(&current, &index.ty) {
                Ok(after) => current = after,
                Err(error) => {
                    self.diagnostics.error(error.message, name.span());
                    break;
                }
            }
        }
        VariableUsage {
            variable,
            ty: current,
            indices,
        }
    }

    /// `( expression-list )` argument suffix, `()` rejected.
    fn parse_call_arguments(&mut self) -> Vec<Option<Expression>> {
        let open = self.span_here();
        self.advance(); // '('

        if self.check(TokenKind::RightParen) {
            self.advance();
            let span = self.span_from(open);
            self.diagnostics
                .error("To pass no arguments, remove the parentheses", span);
            return Vec::new();
        }

        let arguments = self.parse_expression_list();
        self.expect(TokenKind::RightParen, "',', ')'");
        arguments
    }

    fn parse_callable_call(&mut self, name: &Token) -> Option<CallableCall> {
        let arguments = if self.check(TokenKind::LeftParen) {
            self.parse_call_arguments()
        } else {
            Vec::new()
        };

        match self.symbols.query_callable(&name.text) {
            Ok((callable, _)) => Some(self.finish_callable_call(callable, arguments, name)),
            Err(error) => {
                self.diagnostics.error(error.message, name.span());
                None
            }
        }
    }

    fn finish_callable_call(
        &mut self,
        callable: CallableRef,
        mut arguments: Vec<Option<Expression>>,
        name: &Token,
    ) -> CallableCall {
        enum BuiltinChecks {
            None,
            Write,
            Read(String),
        }

        let checks = {
            let borrowed = callable.borrow();
            match &borrowed.parameters {
                Some(parameters) => {
                    if parameters.len() != arguments.len() {
                        self.diagnostics.error(
                            format!(
                                "Wrong number of arguments: expected {}, got {}",
                                parameters.len(),
                                arguments.len()
                            ),
                            name.span(),
                        );
                    }

                    for (index, (parameter, argument)) in
                        parameters.iter().zip(arguments.iter_mut()).enumerate()
                    {
                        let Some(argument) = argument else { continue };
                        if !typechecker::can_assign(&parameter.variable_type, &argument.ty) {
                            self.diagnostics.error(
                                format!(
                                    "Type mismatch in {}{} argument",
                                    index + 1,
                                    ordinal_suffix(index + 1)
                                ),
                                name.span(),
                            );
                        } else if parameter.variable_type.is(BuiltInType::String)
                            && argument.ty.is(BuiltInType::Char)
                        {
                            argument.ty = TypeValue::BuiltIn(BuiltInType::String);
                        }
                    }
                    BuiltinChecks::None
                }
                None => match borrowed.name.as_str() {
                    "write" | "writeln" => BuiltinChecks::Write,
                    "read" | "readln" => BuiltinChecks::Read(borrowed.name.clone()),
                    _ => BuiltinChecks::None,
                },
            }
        };

        match checks {
            BuiltinChecks::None => {}
            BuiltinChecks::Write => {
                for (index, argument) in arguments.iter().enumerate() {
                    if let Some(argument) = argument {
                        if matches!(argument.ty, TypeValue::Array(_)) {
                            self.diagnostics.error(
                                format!(
                                    "Type mismatch in {}{} argument: must be ordinal type",
                                    index + 1,
                                    ordinal_suffix(index + 1)
                                ),
                                name.span(),
                            );
                        }
                    }
                }
            }
            BuiltinChecks::Read(builtin) => {
                for (index, argument) in arguments.iter().enumerate() {
                    if let Some(argument) = argument {
                        let writable_variable =
                            matches!(argument.node, ExpressionNode::Variable(_))
                                && !matches!(argument.ty, TypeValue::Array(_));
                        if !writable_variable {
                            self.diagnostics.error(
                                format!(
                                    "Type mismatch in {}{} argument: must be an ordinal variable",
                                    index + 1,
                                    ordinal_suffix(index + 1)
                                ),
                                name.span(),
                            );
                        }
                    }
                }
                if arguments.len() > 1 {
                    self.diagnostics.warning(
                        format!(
                            "{builtin} with multiple arguments will be split into multiple {builtin} calls"
                        ),
                        name.span(),
                    );
                }
            }
        }

        CallableCall {
            callable,
            arguments,
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression_list(&mut self) -> Vec<Option<Expression>> {
        let mut list = vec![self.parse_expression()];
        while self.check(TokenKind::Comma) {
            self.advance();
            list.push(self.parse_expression());
        }
        list
    }

    fn parse_expression(&mut self) -> Option<Expression> {
        let left = self.parse_simple_expression();

        let operator = match self.kind() {
            Some(TokenKind::Equal) => BinaryOperator::Equal,
            Some(TokenKind::Different) => BinaryOperator::NotEqual,
            Some(TokenKind::Less) => BinaryOperator::Less,
            Some(TokenKind::Greater) => BinaryOperator::Greater,
            Some(TokenKind::LessEqual) => BinaryOperator::LessEqual,
            Some(TokenKind::GreaterEqual) => BinaryOperator::GreaterEqual,
            Some(TokenKind::In) => BinaryOperator::In,
            _ => return left,
        };
        let token = self.advance()?;
        let right = self.parse_simple_expression();
        self.combine_binary(operator, left, right, token.span())
    }

    fn parse_simple_expression(&mut self) -> Option<Expression> {
        let mut left = self.parse_first_term();
        loop {
            let operator = match self.kind() {
                Some(TokenKind::Plus) => BinaryOperator::Add,
                Some(TokenKind::Minus) => BinaryOperator::Subtract,
                Some(TokenKind::Or) => BinaryOperator::Or,
                _ => break,
            };
            let token = self.advance()?;
            let right = self.parse_term();
            left = self.combine_binary(operator, left, right, token.span());
        }
        left
    }

    /// The first term of a simple expression may carry a sign; the sign
    /// binds tighter than multiplication (`-a * b` is `(-a) * b`).
    fn parse_first_term(&mut self) -> Option<Expression> {
        let first = match self.kind() {
            Some(TokenKind::Plus | TokenKind::Minus) => {
                let token = self.advance()?;
                let operator = if token.kind == TokenKind::Plus {
                    UnaryOperator::Plus
                } else {
                    UnaryOperator::Minus
                };
                let operand = self.parse_factor();
                self.combine_unary(operator, operand, token.span())
            }
            _ => self.parse_factor(),
        };
        self.parse_multiplication_chain(first)
    }

    fn parse_term(&mut self) -> Option<Expression> {
        let first = self.parse_factor();
        self.parse_multiplication_chain(first)
    }

    fn parse_multiplication_chain(&mut self, first: Option<Expression>) -> Option<Expression> {
        let mut left = first;
        loop {
            let operator = match self.kind() {
                Some(TokenKind::Star) => BinaryOperator::Multiply,
                Some(TokenKind::Slash) => BinaryOperator::Divide,
                Some(TokenKind::Div) => BinaryOperator::Div,
                Some(TokenKind::Mod) => BinaryOperator::Mod,
                Some(TokenKind::And) => BinaryOperator::And,
                _ => return left,
            };
            let token = self.advance()?;
            let right = self.parse_factor();
            left = self.combine_binary(operator, left, right, token.span());
        }
    }

    fn combine_unary(
        &mut self,
        operator: UnaryOperator,
        operand: Option<Expression>,
        span: Span,
    ) -> Option<Expression> {
        let operand = operand?;
        match typechecker::unary_operation_type(operator, &operand.ty) {
            Ok(ty) => Some(Expression::new(
                ExpressionNode::Unary {
                    operator,
                    operand: Box::new(operand),
                },
                ty,
            )),
            Err(error) => {
                self.diagnostics.error(error.message, span);
                None
            }
        }
    }

    fn combine_binary(
        &mut self,
        operator: BinaryOperator,
        left: Option<Expression>,
        right: Option<Expression>,
        span: Span,
    ) -> Option<Expression> {
        let (left, right) = (left?, right?);
        match typechecker::binary_operation_type(operator, &left.ty, &right.ty) {
            Ok(ty) => Some(Expression::new(
                ExpressionNode::Binary {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                ty,
            )),
            Err(error) => {
                self.diagnostics.error(error.message, span);
                None
            }
        }
    }

    fn parse_factor(&mut self) -> Option<Expression> {
        match self.kind() {
            Some(TokenKind::LeftParen) => {
                self.advance();
                let expression = self.parse_expression();
                self.expect(TokenKind::RightParen, "')'");
                expression
            }
            Some(TokenKind::Nil) => {
                let token = self.advance()?;
                self.diagnostics
                    .error("Pointer types are not supported", token.span());
                None
            }
            Some(TokenKind::Not) => {
                let token = self.advance()?;
                let operand = self.parse_factor();
                self.combine_unary(UnaryOperator::Not, operand, token.span())
            }
            Some(TokenKind::Integer) => {
                let token = self.advance()?;
                Some(Expression::constant(
                    ConstantValue::Integer(token.integer_value()),
                    TypeValue::BuiltIn(BuiltInType::Integer),
                ))
            }
            Some(TokenKind::Real) => {
                let token = self.advance()?;
                Some(Expression::constant(
                    ConstantValue::Real(token.real_value()),
                    TypeValue::BuiltIn(BuiltInType::Real),
                ))
            }
            Some(TokenKind::StringLiteral) => {
                let token = self.advance()?;
                let value = ConstantValue::Str(token.text);
                let ty = typechecker::constant_type(&value).ok()?;
                Some(Expression::constant(value, ty))
            }
            Some(TokenKind::Identifier) => self.parse_factor_identifier(),
            _ => {
                self.error_unexpected("'(', NOT, ID, INTEGER, FLOAT, STRING");
                None
            }
        }
    }

    fn parse_factor_identifier(&mut self) -> Option<Expression> {
        let name = self.advance()?;

        let suffix = match self.kind() {
            Some(TokenKind::LeftBracket) => FactorSuffix::Indices(self.parse_index_lists()),
            Some(TokenKind::LeftParen) => FactorSuffix::Arguments(self.parse_call_arguments()),
            _ => FactorSuffix::Bare,
        };

        let Some((value, _)) = self.symbols.query(&name.text) else {
            self.diagnostics
                .error(format!("Object '{}' not found", name.text), name.span());
            return None;
        };

        match value.clone() {
            SymbolValue::Constant(definition) => match suffix {
                FactorSuffix::Bare => {
                    let ty = match typechecker::constant_type(&definition.value) {
                        Ok(ty) => ty,
                        Err(error) => {
                            self.diagnostics.error(error.message, name.span());
                            return None;
                        }
                    };
                    Some(Expression::constant(definition.value.clone(), ty))
                }
                FactorSuffix::Indices(_) => {
                    self.diagnostics
                        .error("Attempting to index constant", name.span());
                    None
                }
                FactorSuffix::Arguments(_) => {
                    self.diagnostics
                        .error("Attempting to call constant", name.span());
                    None
                }
            },

            SymbolValue::Variable(variable) => match suffix {
                FactorSuffix::Bare => {
                    let usage = self.build_variable_usage(&name, variable, Vec::new());
                    let ty = usage.ty.clone();
                    Some(Expression::new(ExpressionNode::Variable(usage), ty))
                }
                FactorSuffix::Indices(indices) => {
                    let usage = self.build_variable_usage(&name, variable, indices);
                    let ty = usage.ty.clone();
                    Some(Expression::new(ExpressionNode::Variable(usage), ty))
                }
                FactorSuffix::Arguments(_) => {
                    self.diagnostics
                        .error("Attempting to call variable", name.span());
                    None
                }
            },

            SymbolValue::Callable(callable) => {
                let return_type = callable
                    .borrow()
                    .return_variable
                    .as_ref()
                    .map(|v| v.variable_type.clone());
                let Some(return_type) = return_type else {
                    self.diagnostics
                        .error("This is a procedure and not a function", name.span());
                    return None;
                };

                match suffix {
                    FactorSuffix::Indices(_) => {
                        self.diagnostics
                            .error("Attempting to index function", name.span());
                        None
                    }
                    FactorSuffix::Bare => {
                        let call = self.finish_callable_call(callable, Vec::new(), &name);
                        Some(Expression::new(ExpressionNode::Call(call), return_type))
                    }
                    FactorSuffix::Arguments(arguments) => {
                        let call = self.finish_callable_call(callable, arguments, &name);
                        Some(Expression::new(ExpressionNode::Call(call), return_type))
                    }
                }
            }

            SymbolValue::Type(_) => {
                self.diagnostics.error(
                    format!("Object with name '{}' is not a variable", name.text),
                    name.span(),
                );
                None
            }
            SymbolValue::Label(_) => {
                self.diagnostics.error(
                    format!("Object with name '{}' is not a variable", name.text),
                    name.span(),
                );
                None
            }
        }
    }
}

fn ordinal_suffix(position: usize) -> &'static str {
    match position % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}
