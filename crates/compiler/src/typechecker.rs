//! Type checking rules
//!
//! Pure functions over types and constants: operator result types,
//! assignment compatibility, indexation. The parser calls these at every
//! expression construction and turns the errors into located diagnostics.

use std::rc::Rc;

use crate::ast::{
    ArrayType, BinaryOperator, BuiltInType, ConstantValue, RangeType, TypeValue, UnaryOperator,
    VariableUsage,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeError {
    pub message: String,
}

impl TypeError {
    fn new(message: impl Into<String>) -> Self {
        TypeError {
            message: message.into(),
        }
    }
}

/// The type a constant value denotes. A string of length one is a CHAR;
/// any other length is a STRING.
pub fn constant_type(value: &ConstantValue) -> Result<TypeValue, TypeError> {
    match value {
        ConstantValue::Boolean(_) => Ok(TypeValue::BuiltIn(BuiltInType::Boolean)),
        ConstantValue::Integer(_) => Ok(TypeValue::BuiltIn(BuiltInType::Integer)),
        ConstantValue::Real(_) => Ok(TypeValue::BuiltIn(BuiltInType::Real)),
        ConstantValue::Str(text) => {
            if text.chars().count() == 1 {
                Ok(TypeValue::BuiltIn(BuiltInType::Char))
            } else {
                Ok(TypeValue::BuiltIn(BuiltInType::String))
            }
        }
        ConstantValue::Enumerated(constant) => constant
            .owner()
            .map(TypeValue::Enumerated)
            .ok_or_else(|| TypeError::new("Enumerated constant has no type")),
    }
}

/// The integer rank of an ordinal constant: booleans are 0/1, characters
/// their code point, enumerated constants their declaration ordinal.
pub fn ordinal_value(value: &ConstantValue) -> Result<i64, TypeError> {
    match value {
        ConstantValue::Boolean(value) => Ok(i64::from(*value)),
        ConstantValue::Integer(value) => Ok(*value),
        ConstantValue::Str(text) => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(i64::from(u32::from(c))),
                _ => Err(TypeError::new("Value is not ordinal")),
            }
        }
        ConstantValue::Enumerated(constant) => Ok(constant.ordinal),
        ConstantValue::Real(_) => Err(TypeError::new("Value is not ordinal")),
    }
}

fn is_numeric(value: &TypeValue) -> bool {
    value.is(BuiltInType::Integer) || value.is(BuiltInType::Real)
}

pub fn unary_operation_type(
    operator: UnaryOperator,
    operand: &TypeValue,
) -> Result<TypeValue, TypeError> {
    match operator {
        UnaryOperator::Plus | UnaryOperator::Minus if is_numeric(operand) => Ok(operand.clone()),
        UnaryOperator::Not if operand.is(BuiltInType::Boolean) => Ok(operand.clone()),
        _ => Err(TypeError::new(format!(
            "Invalid type for unary operator '{}'",
            operator
        ))),
    }
}

pub fn binary_operation_type(
    operator: BinaryOperator,
    left: &TypeValue,
    right: &TypeValue,
) -> Result<TypeValue, TypeError> {
    let result = match operator {
        BinaryOperator::Add | BinaryOperator::Subtract | BinaryOperator::Multiply
            if is_numeric(left) && is_numeric(right) =>
        {
            if left.is(BuiltInType::Real) || right.is(BuiltInType::Real) {
                TypeValue::BuiltIn(BuiltInType::Real)
            } else {
                TypeValue::BuiltIn(BuiltInType::Integer)
            }
        }

        BinaryOperator::Divide if is_numeric(left) && is_numeric(right) => {
            TypeValue::BuiltIn(BuiltInType::Real)
        }

        BinaryOperator::Div | BinaryOperator::Mod
            if left.is(BuiltInType::Integer) && right.is(BuiltInType::Integer) =>
        {
            TypeValue::BuiltIn(BuiltInType::Integer)
        }

        BinaryOperator::And | BinaryOperator::Or
            if left.is(BuiltInType::Boolean) && right.is(BuiltInType::Boolean) =>
        {
            TypeValue::BuiltIn(BuiltInType::Boolean)
        }

        BinaryOperator::Equal
        | BinaryOperator::NotEqual
        | BinaryOperator::Less
        | BinaryOperator::Greater
        | BinaryOperator::LessEqual
        | BinaryOperator::GreaterEqual
            if matches!(left, TypeValue::BuiltIn(_)) && left == right =>
        {
            TypeValue::BuiltIn(BuiltInType::Boolean)
        }

        // `in` parses as a relational operator but has no typing rule.
        _ => {
            return Err(TypeError::new(format!(
                "Invalid types for binary operator '{}'",
                operator
            )));
        }
    };

    Ok(result)
}

/// Assignment compatibility: identical types, REAL ← INTEGER, or
/// STRING ← CHAR. Everything else is rejected.
pub fn can_assign(left: &TypeValue, right: &TypeValue) -> bool {
    left == right
        || (left.is(BuiltInType::Real) && right.is(BuiltInType::Integer))
        || (left.is(BuiltInType::String) && right.is(BuiltInType::Char))
}

fn string_as_array() -> Rc<ArrayType> {
    Rc::new(ArrayType {
        subtype: TypeValue::BuiltIn(BuiltInType::Char),
        dimensions: vec![RangeType {
            start: ConstantValue::Integer(1),
            end: ConstantValue::Integer(2048),
            subtype: TypeValue::BuiltIn(BuiltInType::Integer),
        }],
    })
}

/// The type of `value[index]`: peel one dimension off an array (a STRING
/// reads as `ARRAY [1..2048] OF CHAR`), checking the index against the
/// dimension's type.
pub fn type_after_indexation(
    array_type: &TypeValue,
    index_type: &TypeValue,
) -> Result<TypeValue, TypeError> {
    let array = if array_type.is(BuiltInType::String) {
        string_as_array()
    } else if let TypeValue::Array(array) = array_type {
        array.clone()
    } else {
        return Err(TypeError::new("Indexing value that's not an array"));
    };

    if !can_assign(&array.dimensions[0].subtype, index_type) {
        return Err(TypeError::new("Invalid index type"));
    }

    if array.dimensions.len() > 1 {
        Ok(TypeValue::Array(Rc::new(ArrayType {
            subtype: array.subtype.clone(),
            dimensions: array.dimensions[1..].to_vec(),
        })))
    } else {
        Ok(array.subtype.clone())
    }
}

/// Individual characters of strings cannot be written: reject a usage whose
/// indexation passes through a STRING at any level.
pub fn check_string_element_assignment(usage: &VariableUsage) -> Result<(), TypeError> {
    let mut current = usage.variable.variable_type.clone();
    for index in &usage.indices {
        if current.is(BuiltInType::String) {
            return Err(TypeError::new("Invalid assignment to string character"));
        }
        current = type_after_indexation(&current, &index.ty)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EnumeratedConstant, EnumeratedType, Expression, ExpressionNode};
    use std::rc::Rc;

    fn built_in(value: BuiltInType) -> TypeValue {
        TypeValue::BuiltIn(value)
    }

    fn enumerated_fixture() -> (TypeValue, ConstantValue) {
        let constant = EnumeratedConstant::new("even", 2);
        let definition = Rc::new(crate::ast::ConstantDefinition {
            name: "even".to_string(),
            value: ConstantValue::Enumerated(constant.clone()),
        });
        let owner = Rc::new(EnumeratedType {
            constants: vec![definition],
        });
        constant.set_owner(&owner);
        (
            TypeValue::Enumerated(owner),
            ConstantValue::Enumerated(constant),
        )
    }

    fn range(start: i64, end: i64) -> RangeType {
        RangeType {
            start: ConstantValue::Integer(start),
            end: ConstantValue::Integer(end),
            subtype: built_in(BuiltInType::Integer),
        }
    }

    #[test]
    fn test_constant_type() {
        let (enum_type, enum_constant) = enumerated_fixture();

        assert_eq!(
            constant_type(&ConstantValue::Boolean(true)).unwrap(),
            built_in(BuiltInType::Boolean)
        );
        assert_eq!(
            constant_type(&ConstantValue::Integer(42)).unwrap(),
            built_in(BuiltInType::Integer)
        );
        assert_eq!(
            constant_type(&ConstantValue::Real(3.14)).unwrap(),
            built_in(BuiltInType::Real)
        );
        assert_eq!(
            constant_type(&ConstantValue::Str("Z".to_string())).unwrap(),
            built_in(BuiltInType::Char)
        );
        assert_eq!(
            constant_type(&ConstantValue::Str("Hi".to_string())).unwrap(),
            built_in(BuiltInType::String)
        );
        assert_eq!(constant_type(&enum_constant).unwrap(), enum_type);
    }

    #[test]
    fn test_constant_ordinal_value() {
        let (_, enum_constant) = enumerated_fixture();

        assert_eq!(ordinal_value(&ConstantValue::Boolean(false)).unwrap(), 0);
        assert_eq!(ordinal_value(&ConstantValue::Boolean(true)).unwrap(), 1);
        assert_eq!(ordinal_value(&ConstantValue::Integer(13)).unwrap(), 13);
        assert_eq!(
            ordinal_value(&ConstantValue::Str("C".to_string())).unwrap(),
            i64::from(u32::from('C'))
        );
        assert_eq!(ordinal_value(&enum_constant).unwrap(), 2);
        assert!(ordinal_value(&ConstantValue::Real(3.14)).is_err());
        assert!(ordinal_value(&ConstantValue::Str("CC".to_string())).is_err());
    }

    #[test]
    fn test_unary_operation_type() {
        let integer = built_in(BuiltInType::Integer);
        let real = built_in(BuiltInType::Real);
        let boolean = built_in(BuiltInType::Boolean);

        assert_eq!(
            unary_operation_type(UnaryOperator::Plus, &integer).unwrap(),
            integer
        );
        assert_eq!(
            unary_operation_type(UnaryOperator::Minus, &real).unwrap(),
            real
        );
        assert_eq!(
            unary_operation_type(UnaryOperator::Not, &boolean).unwrap(),
            boolean
        );
        assert!(unary_operation_type(UnaryOperator::Plus, &boolean).is_err());
        assert!(unary_operation_type(UnaryOperator::Not, &integer).is_err());
    }

    #[test]
    fn test_binary_arithmetic() {
        let integer = built_in(BuiltInType::Integer);
        let real = built_in(BuiltInType::Real);
        let boolean = built_in(BuiltInType::Boolean);

        assert_eq!(
            binary_operation_type(BinaryOperator::Add, &integer, &real).unwrap(),
            real
        );
        assert_eq!(
            binary_operation_type(BinaryOperator::Multiply, &integer, &integer).unwrap(),
            integer
        );
        assert_eq!(
            binary_operation_type(BinaryOperator::Divide, &integer, &integer).unwrap(),
            real
        );
        assert_eq!(
            binary_operation_type(BinaryOperator::Div, &integer, &integer).unwrap(),
            integer
        );
        assert!(binary_operation_type(BinaryOperator::Div, &real, &integer).is_err());
        assert!(binary_operation_type(BinaryOperator::Add, &integer, &boolean).is_err());
    }

    #[test]
    fn test_binary_boolean_and_relational() {
        let integer = built_in(BuiltInType::Integer);
        let boolean = built_in(BuiltInType::Boolean);
        let string = built_in(BuiltInType::String);

        assert_eq!(
            binary_operation_type(BinaryOperator::And, &boolean, &boolean).unwrap(),
            boolean
        );
        assert!(binary_operation_type(BinaryOperator::Or, &integer, &integer).is_err());

        assert_eq!(
            binary_operation_type(BinaryOperator::Equal, &string, &string).unwrap(),
            boolean
        );
        assert_eq!(
            binary_operation_type(BinaryOperator::GreaterEqual, &integer, &integer).unwrap(),
            boolean
        );
        assert!(binary_operation_type(BinaryOperator::Less, &integer, &string).is_err());
        // `in` is grammatically a relational operator but never types
        assert!(binary_operation_type(BinaryOperator::In, &integer, &integer).is_err());
    }

    #[test]
    fn test_can_assign() {
        let integer = built_in(BuiltInType::Integer);
        let real = built_in(BuiltInType::Real);
        let char_type = built_in(BuiltInType::Char);
        let string = built_in(BuiltInType::String);

        assert!(can_assign(&integer, &integer));
        assert!(can_assign(&real, &integer));
        assert!(can_assign(&string, &char_type));
        assert!(!can_assign(&integer, &real));
        assert!(!can_assign(&char_type, &string));
        assert!(!can_assign(&string, &integer));

        let (enum_type, _) = enumerated_fixture();
        let (other_enum, _) = enumerated_fixture();
        assert!(can_assign(&enum_type, &enum_type));
        // structurally identical but distinct enumerations do not mix
        assert!(!can_assign(&enum_type, &other_enum));
    }

    #[test]
    fn test_type_after_indexation_peels_dimensions() {
        let matrix = TypeValue::Array(Rc::new(ArrayType {
            subtype: built_in(BuiltInType::Real),
            dimensions: vec![range(1, 5), range(1, 5)],
        }));

        let peeled = type_after_indexation(&matrix, &built_in(BuiltInType::Integer)).unwrap();
        assert_eq!(
            peeled,
            TypeValue::Array(Rc::new(ArrayType {
                subtype: built_in(BuiltInType::Real),
                dimensions: vec![range(1, 5)],
            }))
        );

        let element = type_after_indexation(&peeled, &built_in(BuiltInType::Integer)).unwrap();
        assert_eq!(element, built_in(BuiltInType::Real));
    }

    #[test]
    fn test_type_after_indexation_string_and_errors() {
        let string = built_in(BuiltInType::String);
        let integer = built_in(BuiltInType::Integer);

        assert_eq!(
            type_after_indexation(&string, &integer).unwrap(),
            built_in(BuiltInType::Char)
        );
        assert!(type_after_indexation(&integer, &integer).is_err());

        let vector = TypeValue::Array(Rc::new(ArrayType {
            subtype: built_in(BuiltInType::Integer),
            dimensions: vec![range(1, 5)],
        }));
        assert!(type_after_indexation(&vector, &built_in(BuiltInType::Real)).is_err());
    }

    #[test]
    fn test_string_element_assignment_rejected() {
        let variable = crate::ast::VariableDefinition::new(
            "s",
            built_in(BuiltInType::String),
            false,
        );
        let usage = VariableUsage {
            variable,
            ty: built_in(BuiltInType::Char),
            indices: vec![Expression::new(
                ExpressionNode::Constant(ConstantValue::Integer(1)),
                built_in(BuiltInType::Integer),
            )],
        };

        let error = check_string_element_assignment(&usage).unwrap_err();
        assert_eq!(error.message, "Invalid assignment to string character");
    }

    #[test]
    fn test_plain_variable_assignment_allowed() {
        let variable = crate::ast::VariableDefinition::new(
            "s",
            built_in(BuiltInType::String),
            false,
        );
        let usage = VariableUsage {
            variable,
            ty: built_in(BuiltInType::String),
            indices: Vec::new(),
        };
        assert!(check_string_element_assignment(&usage).is_ok());
    }
}
