//! Scoped symbol table
//!
//! A stack of scopes mapping lowercased names to definitions. Scope 0 holds
//! the required identifiers: the simple types, `true`/`false`/`maxint`, the
//! I/O callables and `length`. Lookups walk the stack top-down; insertion
//! rejects duplicates in the top scope and flags shadowing of outer
//! definitions so the parser can warn.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{
    Block, BuiltInType, CallableDefinition, CallableRef, ConstantDefinition, ConstantValue,
    LabelRef, TypeDefinition, TypeValue, VarRef, VariableDefinition,
};

/// Intentionally `1 << 15`, not `2^15 - 1` (see DESIGN.md, "maxint").
const MAXINT: i64 = 1 << 15;

#[derive(Debug, Clone)]
pub enum SymbolValue {
    Label(LabelRef),
    Constant(Rc<ConstantDefinition>),
    Type(Rc<TypeDefinition>),
    Variable(VarRef),
    Callable(CallableRef),
}

impl SymbolValue {
    pub fn name(&self) -> String {
        match self {
            SymbolValue::Label(label) => label.number.to_string(),
            SymbolValue::Constant(constant) => constant.name.clone(),
            SymbolValue::Type(definition) => definition.name.clone(),
            SymbolValue::Variable(variable) => variable.name.clone(),
            SymbolValue::Callable(callable) => callable.borrow().name.clone(),
        }
    }
}

/// A failed table operation; the caller attaches the source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolError {
    pub message: String,
}

impl SymbolError {
    fn new(message: impl Into<String>) -> Self {
        SymbolError {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// Inserted, but an outer scope already held the name.
    Shadowed,
}

pub struct SymbolTable {
    scopes: Vec<HashMap<String, SymbolValue>>,
}

fn builtin_callable(name: &str) -> SymbolValue {
    SymbolValue::Callable(Rc::new(RefCell::new(CallableDefinition {
        name: name.to_string(),
        parameters: None,
        return_variable: None,
        body: Block::empty(),
    })))
}

fn builtin_type(name: &str, value: BuiltInType) -> SymbolValue {
    SymbolValue::Type(Rc::new(TypeDefinition {
        name: name.to_string(),
        value: TypeValue::BuiltIn(value),
    }))
}

fn builtin_constant(name: &str, value: ConstantValue) -> SymbolValue {
    SymbolValue::Constant(Rc::new(ConstantDefinition {
        name: name.to_string(),
        value,
    }))
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut globals = HashMap::new();

        for symbol in [
            builtin_type("integer", BuiltInType::Integer),
            builtin_type("real", BuiltInType::Real),
            builtin_type("boolean", BuiltInType::Boolean),
            builtin_type("char", BuiltInType::Char),
            builtin_type("string", BuiltInType::String),
            builtin_constant("true", ConstantValue::Boolean(true)),
            builtin_constant("false", ConstantValue::Boolean(false)),
            builtin_constant("maxint", ConstantValue::Integer(MAXINT)),
            builtin_callable("write"),
            builtin_callable("writeln"),
            builtin_callable("read"),
            builtin_callable("readln"),
            SymbolValue::Callable(Rc::new(RefCell::new(CallableDefinition {
                name: "length".to_string(),
                parameters: Some(vec![VariableDefinition::new(
                    "str",
                    TypeValue::BuiltIn(BuiltInType::String),
                    true,
                )]),
                return_variable: Some(VariableDefinition::new(
                    "length",
                    TypeValue::BuiltIn(BuiltInType::Integer),
                    true,
                )),
                body: Block::empty(),
            }))),
        ] {
            globals.insert(symbol.name().to_lowercase(), symbol);
        }

        SymbolTable {
            scopes: vec![globals],
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn new_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Search the scope stack top-down. The flag reports whether the match
    /// came from the top-most scope.
    pub fn query(&self, name: &str) -> Option<(&SymbolValue, bool)> {
        let key = name.to_lowercase();
        for (distance, scope) in self.scopes.iter().rev().enumerate() {
            if let Some(value) = scope.get(&key) {
                return Some((value, distance == 0));
            }
        }
        None
    }

    pub fn query_or_error(
        &self,
        name: &str,
        target_object_name: &str,
    ) -> Result<(&SymbolValue, bool), SymbolError> {
        self.query(name).ok_or_else(|| {
            SymbolError::new(format!("{} '{}' not found", target_object_name, name))
        })
    }

    pub fn query_label(&self, number: i64) -> Result<LabelRef, SymbolError> {
        let name = number.to_string();
        let (value, top_scope) = self.query_or_error(&name, "Label")?;

        match value {
            SymbolValue::Label(label) if top_scope => Ok(label.clone()),
            SymbolValue::Label(_) => Err(SymbolError::new(format!(
                "Label '{}' not in the top-most scope",
                number
            ))),
            _ => Err(SymbolError::new(format!(
                "Object with name '{}' is not a label",
                number
            ))),
        }
    }

    pub fn query_constant(
        &self,
        name: &str,
    ) -> Result<(Rc<ConstantDefinition>, bool), SymbolError> {
        match self.query_or_error(name, "Constant")? {
            (SymbolValue::Constant(constant), top_scope) => Ok((constant.clone(), top_scope)),
            _ => Err(SymbolError::new(format!(
                "Object with name '{}' is not a constant",
                name
            ))),
        }
    }

    pub fn query_type(&self, name: &str) -> Result<(Rc<TypeDefinition>, bool), SymbolError> {
        match self.query_or_error(name, "Type")? {
            (SymbolValue::Type(definition), top_scope) => Ok((definition.clone(), top_scope)),
            _ => Err(SymbolError::new(format!(
                "Object with name '{}' is not a type",
                name
            ))),
        }
    }

    pub fn query_variable(&self, name: &str) -> Result<(VarRef, bool), SymbolError> {
        match self.query_or_error(name, "Variable")? {
            (SymbolValue::Variable(variable), top_scope) => Ok((variable.clone(), top_scope)),
            _ => Err(SymbolError::new(format!(
                "Object with name '{}' is not a variable",
                name
            ))),
        }
    }

    pub fn query_callable(&self, name: &str) -> Result<(CallableRef, bool), SymbolError> {
        match self.query_or_error(name, "Callable")? {
            (SymbolValue::Callable(callable), top_scope) => Ok((callable.clone(), top_scope)),
            _ => Err(SymbolError::new(format!(
                "Object with name '{}' is not a callable",
                name
            ))),
        }
    }

    /// Insert into the top scope. A name already present there is an error
    /// and leaves the table unchanged; a name from an outer scope is
    /// inserted and reported as shadowing.
    pub fn add(&mut self, value: SymbolValue) -> Result<AddOutcome, SymbolError> {
        let name = value.name();
        let outcome = match self.query(&name) {
            Some((_, true)) => {
                return Err(SymbolError::new(format!(
                    "Object with name '{}' already exists in this scope",
                    name
                )));
            }
            Some((_, false)) => AddOutcome::Shadowed,
            None => AddOutcome::Inserted,
        };

        let key = name.to_lowercase();
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(key, value);
        }
        Ok(outcome)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LabelDefinition;

    fn type_symbol(name: &str, value: BuiltInType) -> SymbolValue {
        SymbolValue::Type(Rc::new(TypeDefinition {
            name: name.to_string(),
            value: TypeValue::BuiltIn(value),
        }))
    }

    fn variable_symbol(name: &str, value: BuiltInType) -> SymbolValue {
        SymbolValue::Variable(VariableDefinition::new(
            name,
            TypeValue::BuiltIn(value),
            false,
        ))
    }

    #[test]
    fn test_builtin_symbols_present() {
        let table = SymbolTable::new();

        for name in ["integer", "real", "boolean", "char", "string"] {
            assert!(table.query_type(name).is_ok(), "missing type {name}");
        }
        for name in ["write", "writeln", "read", "readln", "length"] {
            assert!(table.query_callable(name).is_ok(), "missing callable {name}");
        }
        let (maxint, _) = table.query_constant("maxint").unwrap();
        assert_eq!(maxint.value, ConstantValue::Integer(32768));
        let (truth, _) = table.query_constant("true").unwrap();
        assert_eq!(truth.value, ConstantValue::Boolean(true));
    }

    #[test]
    fn test_builtin_io_callables_have_no_parameter_list() {
        let table = SymbolTable::new();
        let (write, _) = table.query_callable("write").unwrap();
        assert!(write.borrow().parameters.is_none());

        let (length, _) = table.query_callable("length").unwrap();
        assert_eq!(length.borrow().parameters.as_ref().map(Vec::len), Some(1));
        assert!(length.borrow().return_variable.is_some());
    }

    #[test]
    fn test_redeclare_same_scope_rejected_and_first_kept() {
        let mut table = SymbolTable::new();
        table
            .add(type_symbol("MyType", BuiltInType::Integer))
            .unwrap();

        let error = table
            .add(type_symbol("MyType", BuiltInType::Real))
            .unwrap_err();
        assert_eq!(
            error.message,
            "Object with name 'MyType' already exists in this scope"
        );

        let (kept, _) = table.query_type("mytype").unwrap();
        assert!(kept.value.is(BuiltInType::Integer));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut table = SymbolTable::new();
        table
            .add(variable_symbol("Counter", BuiltInType::Integer))
            .unwrap();
        assert!(table.query_variable("COUNTER").is_ok());
        assert!(table.query_variable("counter").is_ok());
    }

    #[test]
    fn test_shadowing_reports_and_resolves_to_inner() {
        let mut table = SymbolTable::new();
        table
            .add(variable_symbol("a", BuiltInType::Integer))
            .unwrap();

        table.new_scope();
        let outcome = table.add(variable_symbol("a", BuiltInType::Real)).unwrap();
        assert_eq!(outcome, AddOutcome::Shadowed);

        let (inner, top_scope) = table.query_variable("a").unwrap();
        assert!(inner.variable_type.is(BuiltInType::Real));
        assert!(top_scope);

        table.pop_scope();
        let (outer, _) = table.query_variable("a").unwrap();
        assert!(outer.variable_type.is(BuiltInType::Integer));
    }

    #[test]
    fn test_shadowing_builtin_type() {
        let mut table = SymbolTable::new();
        table.new_scope();
        let outcome = table.add(type_symbol("integer", BuiltInType::Real)).unwrap();
        assert_eq!(outcome, AddOutcome::Shadowed);

        let (shadowed, top_scope) = table.query_type("integer").unwrap();
        assert!(shadowed.value.is(BuiltInType::Real));
        assert!(top_scope);
    }

    #[test]
    fn test_kind_filtered_queries() {
        let mut table = SymbolTable::new();
        table
            .add(variable_symbol("x", BuiltInType::Integer))
            .unwrap();

        assert_eq!(
            table.query_type("x").unwrap_err().message,
            "Object with name 'x' is not a type"
        );
        assert_eq!(
            table.query_variable("nope").unwrap_err().message,
            "Variable 'nope' not found"
        );
    }

    #[test]
    fn test_labels_resolve_only_in_top_scope() {
        let mut table = SymbolTable::new();
        table
            .add(SymbolValue::Label(LabelDefinition::new(7)))
            .unwrap();
        assert!(table.query_label(7).is_ok());

        table.new_scope();
        assert_eq!(
            table.query_label(7).unwrap_err().message,
            "Label '7' not in the top-most scope"
        );

        table.pop_scope();
        assert!(table.query_label(7).is_ok());
    }
}
