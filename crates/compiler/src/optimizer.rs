//! AST optimizer
//!
//! Constant folding and boolean simplification over every expression
//! position in the program, bottom-up: fold first, then simplify. Folded
//! leaves keep the annotated type of the expression they replace, and the
//! whole pass is idempotent. Folding that cannot be performed soundly
//! (division by zero, integer overflow) leaves the expression alone.
//!
//! Callable bodies are rewritten before the main body; call sites only
//! rewrite their argument expressions, so each shared definition is
//! processed exactly once.

use crate::ast::{
    BinaryOperator, Block, CallableCall, ConstantValue, Expression, ExpressionNode, Program,
    Statement, StatementKind, UnaryOperator,
};

pub fn optimize_program(program: &mut Program) {
    optimize_block(&mut program.block);
}

fn optimize_block(block: &mut Block) {
    for callable in &block.callables {
        optimize_block(&mut callable.borrow_mut().body);
    }
    for statement in &mut block.body {
        rewrite_statement(statement);
    }
}

fn rewrite_statement(statement: &mut Statement) {
    match &mut statement.kind {
        StatementKind::Assign { target, value } => {
            if let Some(target) = target {
                for index in &mut target.indices {
                    rewrite_expression(index);
                }
            }
            if let Some(value) = value {
                rewrite_expression(value);
            }
        }
        StatementKind::Goto(_) => {}
        StatementKind::Call(call) => rewrite_call(call),
        StatementKind::Compound(statements) => {
            for statement in statements {
                rewrite_statement(statement);
            }
        }
        StatementKind::If {
            condition,
            when_true,
            when_false,
        } => {
            if let Some(condition) = condition {
                rewrite_expression(condition);
            }
            rewrite_statement(when_true);
            rewrite_statement(when_false);
        }
        StatementKind::Case { selector, elements } => {
            if let Some(selector) = selector {
                rewrite_expression(selector);
            }
            for element in elements {
                rewrite_statement(&mut element.body);
            }
        }
        StatementKind::Repeat { condition, body } => {
            for statement in body {
                rewrite_statement(statement);
            }
            if let Some(condition) = condition {
                rewrite_expression(condition);
            }
        }
        StatementKind::While { condition, body } => {
            if let Some(condition) = condition {
                rewrite_expression(condition);
            }
            rewrite_statement(body);
        }
        StatementKind::For {
            initial,
            limit,
            body,
            ..
        } => {
            if let Some(initial) = initial {
                rewrite_expression(initial);
            }
            if let Some(limit) = limit {
                rewrite_expression(limit);
            }
            rewrite_statement(body);
        }
    }
}

fn rewrite_call(call: &mut CallableCall) {
    for argument in call.arguments.iter_mut().flatten() {
        rewrite_expression(argument);
    }
}

fn rewrite_expression(expression: &mut Expression) {
    match &mut expression.node {
        ExpressionNode::Unary { .. } | ExpressionNode::Binary { .. } => {
            let owned = std::mem::replace(
                expression,
                Expression::constant(
                    ConstantValue::Integer(0),
                    crate::ast::TypeValue::BuiltIn(crate::ast::BuiltInType::Integer),
                ),
            );
            *expression = simplify(fold(owned));
        }
        ExpressionNode::Variable(usage) => {
            for index in &mut usage.indices {
                rewrite_expression(index);
            }
        }
        ExpressionNode::Call(call) => rewrite_call(call),
        ExpressionNode::Constant(_) => {}
    }
}

// ----------------------------------------------------------------------
// Constant folding
// ----------------------------------------------------------------------

fn fold(expression: Expression) -> Expression {
    let Expression { node, ty } = expression;
    match node {
        ExpressionNode::Unary { operator, operand } => {
            let operand = fold(*operand);
            if let ExpressionNode::Constant(value) = &operand.node {
                if let Some(folded) = fold_unary(operator, value) {
                    return Expression::constant(folded, ty);
                }
            }
            Expression::new(
                ExpressionNode::Unary {
                    operator,
                    operand: Box::new(operand),
                },
                ty,
            )
        }
        ExpressionNode::Binary {
            operator,
            left,
            right,
        } => {
            let left = fold(*left);
            let right = fold(*right);
            if let (ExpressionNode::Constant(a), ExpressionNode::Constant(b)) =
                (&left.node, &right.node)
            {
                if let Some(folded) = fold_binary(operator, a, b) {
                    return Expression::constant(folded, ty);
                }
            }
            Expression::new(
                ExpressionNode::Binary {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                ty,
            )
        }
        node => Expression::new(node, ty),
    }
}

fn fold_unary(operator: UnaryOperator, value: &ConstantValue) -> Option<ConstantValue> {
    match (operator, value) {
        (UnaryOperator::Plus, ConstantValue::Integer(v)) => Some(ConstantValue::Integer(*v)),
        (UnaryOperator::Plus, ConstantValue::Real(v)) => Some(ConstantValue::Real(*v)),
        (UnaryOperator::Minus, ConstantValue::Integer(v)) => {
            v.checked_neg().map(ConstantValue::Integer)
        }
        (UnaryOperator::Minus, ConstantValue::Real(v)) => Some(ConstantValue::Real(-v)),
        (UnaryOperator::Not, ConstantValue::Boolean(v)) => Some(ConstantValue::Boolean(!v)),
        _ => None,
    }
}

enum NumericPair {
    Integers(i64, i64),
    Reals(f64, f64),
}

fn numeric_pair(a: &ConstantValue, b: &ConstantValue) -> Option<NumericPair> {
    match (a, b) {
        (ConstantValue::Integer(a), ConstantValue::Integer(b)) => {
            Some(NumericPair::Integers(*a, *b))
        }
        (ConstantValue::Integer(a), ConstantValue::Real(b)) => {
            Some(NumericPair::Reals(*a as f64, *b))
        }
        (ConstantValue::Real(a), ConstantValue::Integer(b)) => {
            Some(NumericPair::Reals(*a, *b as f64))
        }
        (ConstantValue::Real(a), ConstantValue::Real(b)) => Some(NumericPair::Reals(*a, *b)),
        _ => None,
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 || (a == i64::MIN && b == -1) {
        return None;
    }
    let quotient = a / b;
    let remainder = a % b;
    if remainder != 0 && (remainder < 0) != (b < 0) {
        Some(quotient - 1)
    } else {
        Some(quotient)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    if b == 0 || (a == i64::MIN && b == -1) {
        return None;
    }
    let remainder = a % b;
    if remainder != 0 && (remainder < 0) != (b < 0) {
        Some(remainder + b)
    } else {
        Some(remainder)
    }
}

fn fold_arithmetic(
    operator: BinaryOperator,
    a: &ConstantValue,
    b: &ConstantValue,
) -> Option<ConstantValue> {
    match numeric_pair(a, b)? {
        NumericPair::Integers(a, b) => {
            let result = match operator {
                BinaryOperator::Add => a.checked_add(b)?,
                BinaryOperator::Subtract => a.checked_sub(b)?,
                BinaryOperator::Multiply => a.checked_mul(b)?,
                _ => return None,
            };
            Some(ConstantValue::Integer(result))
        }
        NumericPair::Reals(a, b) => {
            let result = match operator {
                BinaryOperator::Add => a + b,
                BinaryOperator::Subtract => a - b,
                BinaryOperator::Multiply => a * b,
                _ => return None,
            };
            Some(ConstantValue::Real(result))
        }
    }
}

fn fold_comparison(
    operator: BinaryOperator,
    a: &ConstantValue,
    b: &ConstantValue,
) -> Option<ConstantValue> {
    let ordering = match (a, b) {
        (ConstantValue::Boolean(a), ConstantValue::Boolean(b)) => a.cmp(b),
        (ConstantValue::Str(a), ConstantValue::Str(b)) => a.cmp(b),
        _ => match numeric_pair(a, b)? {
            NumericPair::Integers(a, b) => a.cmp(&b),
            NumericPair::Reals(a, b) => a.partial_cmp(&b)?,
        },
    };

    let result = match operator {
        BinaryOperator::Equal => ordering.is_eq(),
        BinaryOperator::NotEqual => ordering.is_ne(),
        BinaryOperator::Less => ordering.is_lt(),
        BinaryOperator::Greater => ordering.is_gt(),
        BinaryOperator::LessEqual => ordering.is_le(),
        BinaryOperator::GreaterEqual => ordering.is_ge(),
        _ => return None,
    };
    Some(ConstantValue::Boolean(result))
}

fn fold_binary(
    operator: BinaryOperator,
    a: &ConstantValue,
    b: &ConstantValue,
) -> Option<ConstantValue> {
    match operator {
        BinaryOperator::Add | BinaryOperator::Subtract | BinaryOperator::Multiply => {
            fold_arithmetic(operator, a, b)
        }
        BinaryOperator::Divide => match numeric_pair(a, b)? {
            NumericPair::Integers(a, b) if b != 0 => Some(ConstantValue::Real(a as f64 / b as f64)),
            NumericPair::Reals(a, b) if b != 0.0 => Some(ConstantValue::Real(a / b)),
            _ => None,
        },
        BinaryOperator::Div => match (a, b) {
            (ConstantValue::Integer(a), ConstantValue::Integer(b)) => {
                floor_div(*a, *b).map(ConstantValue::Integer)
            }
            _ => None,
        },
        BinaryOperator::Mod => match (a, b) {
            (ConstantValue::Integer(a), ConstantValue::Integer(b)) => {
                floor_mod(*a, *b).map(ConstantValue::Integer)
            }
            _ => None,
        },
        // The target machine keeps booleans as 0/1 integers; bitwise
        // combination coincides with the logical one.
        BinaryOperator::And => match (a, b) {
            (ConstantValue::Boolean(a), ConstantValue::Boolean(b)) => {
                Some(ConstantValue::Boolean(a & b))
            }
            _ => None,
        },
        BinaryOperator::Or => match (a, b) {
            (ConstantValue::Boolean(a), ConstantValue::Boolean(b)) => {
                Some(ConstantValue::Boolean(a | b))
            }
            _ => None,
        },
        BinaryOperator::Equal
        | BinaryOperator::NotEqual
        | BinaryOperator::Less
        | BinaryOperator::Greater
        | BinaryOperator::LessEqual
        | BinaryOperator::GreaterEqual => fold_comparison(operator, a, b),
        BinaryOperator::In => None,
    }
}

// ----------------------------------------------------------------------
// Boolean simplification
// ----------------------------------------------------------------------

fn negate_relational(operator: BinaryOperator) -> Option<BinaryOperator> {
    match operator {
        BinaryOperator::Equal => Some(BinaryOperator::NotEqual),
        BinaryOperator::NotEqual => Some(BinaryOperator::Equal),
        BinaryOperator::Less => Some(BinaryOperator::GreaterEqual),
        BinaryOperator::Greater => Some(BinaryOperator::LessEqual),
        BinaryOperator::LessEqual => Some(BinaryOperator::Greater),
        BinaryOperator::GreaterEqual => Some(BinaryOperator::Less),
        _ => None,
    }
}

fn simplify(expression: Expression) -> Expression {
    let Expression { node, ty } = expression;
    match node {
        ExpressionNode::Unary {
            operator: UnaryOperator::Not,
            operand,
        } => {
            let operand = simplify(*operand);
            let Expression {
                node: operand_node,
                ty: operand_ty,
            } = operand;

            match operand_node {
                // not not x  =>  x
                ExpressionNode::Unary {
                    operator: UnaryOperator::Not,
                    operand: inner,
                } => *inner,

                // not (x R y)  =>  x R' y
                ExpressionNode::Binary {
                    operator,
                    left,
                    right,
                } => match negate_relational(operator) {
                    Some(negated) => Expression::new(
                        ExpressionNode::Binary {
                            operator: negated,
                            left,
                            right,
                        },
                        ty,
                    ),
                    None => Expression::new(
                        ExpressionNode::Unary {
                            operator: UnaryOperator::Not,
                            operand: Box::new(Expression::new(
                                ExpressionNode::Binary {
                                    operator,
                                    left,
                                    right,
                                },
                                operand_ty,
                            )),
                        },
                        ty,
                    ),
                },

                other => Expression::new(
                    ExpressionNode::Unary {
                        operator: UnaryOperator::Not,
                        operand: Box::new(Expression::new(other, operand_ty)),
                    },
                    ty,
                ),
            }
        }

        ExpressionNode::Binary {
            operator,
            left,
            right,
        } if matches!(operator, BinaryOperator::And | BinaryOperator::Or) => {
            let left = simplify(*left);
            let right = simplify(*right);
            let Expression {
                node: left_node,
                ty: left_ty,
            } = left;
            let Expression {
                node: right_node,
                ty: right_ty,
            } = right;

            match (left_node, right_node) {
                // (not a) and (not b)  =>  not (a or b), and dually
                (
                    ExpressionNode::Unary {
                        operator: UnaryOperator::Not,
                        operand: left_inner,
                    },
                    ExpressionNode::Unary {
                        operator: UnaryOperator::Not,
                        operand: right_inner,
                    },
                ) => {
                    let dual = if operator == BinaryOperator::And {
                        BinaryOperator::Or
                    } else {
                        BinaryOperator::And
                    };
                    Expression::new(
                        ExpressionNode::Unary {
                            operator: UnaryOperator::Not,
                            operand: Box::new(Expression::new(
                                ExpressionNode::Binary {
                                    operator: dual,
                                    left: left_inner,
                                    right: right_inner,
                                },
                                ty.clone(),
                            )),
                        },
                        ty,
                    )
                }
                (left_node, right_node) => Expression::new(
                    ExpressionNode::Binary {
                        operator,
                        left: Box::new(Expression::new(left_node, left_ty)),
                        right: Box::new(Expression::new(right_node, right_ty)),
                    },
                    ty,
                ),
            }
        }

        node => Expression::new(node, ty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BuiltInType;
    use crate::diagnostics::Diagnostics;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn optimized(source: &str) -> Program {
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize(source, &mut diagnostics);
        let mut program = Parser::new(tokens, &mut diagnostics)
            .parse()
            .expect("program should parse");
        assert!(
            !diagnostics.has_errors(),
            "unexpected errors: {:?}",
            diagnostics.entries()
        );
        optimize_program(&mut program);
        program
    }

    fn first_assigned_value(program: &Program) -> &Expression {
        match &program.block.body[0].kind {
            StatementKind::Assign { value, .. } => value.as_ref().expect("assignment value"),
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_integer_folding_keeps_type() {
        let program = optimized("program T;\nvar x: integer;\nbegin\n  x := 1 + 2 * 3\nend.");
        let value = first_assigned_value(&program);
        assert_eq!(
            value.node,
            ExpressionNode::Constant(ConstantValue::Integer(7))
        );
        assert!(value.ty.is(BuiltInType::Integer));
    }

    #[test]
    fn test_mixed_arithmetic_folds_to_real() {
        let program = optimized("program T;\nvar r: real;\nbegin\n  r := 1 + 2.5\nend.");
        let value = first_assigned_value(&program);
        assert_eq!(value.node, ExpressionNode::Constant(ConstantValue::Real(3.5)));
        assert!(value.ty.is(BuiltInType::Real));
    }

    #[test]
    fn test_division_always_real() {
        let program = optimized("program T;\nvar r: real;\nbegin\n  r := 1 / 2\nend.");
        assert_eq!(
            first_assigned_value(&program).node,
            ExpressionNode::Constant(ConstantValue::Real(0.5))
        );
    }

    #[test]
    fn test_div_and_mod_floor_semantics() {
        let program = optimized("program T;\nvar x: integer;\nbegin\n  x := -7 div 2\nend.");
        assert_eq!(
            first_assigned_value(&program).node,
            ExpressionNode::Constant(ConstantValue::Integer(-4))
        );

        let program = optimized("program T;\nvar x: integer;\nbegin\n  x := -7 mod 2\nend.");
        assert_eq!(
            first_assigned_value(&program).node,
            ExpressionNode::Constant(ConstantValue::Integer(1))
        );
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let program = optimized("program T;\nvar x: integer;\nbegin\n  x := 1 div 0\nend.");
        assert!(matches!(
            first_assigned_value(&program).node,
            ExpressionNode::Binary { .. }
        ));
    }

    #[test]
    fn test_unary_minus_folds_through() {
        let program = optimized("program T;\nvar x: integer;\nbegin\n  x := -(2 + 3)\nend.");
        assert_eq!(
            first_assigned_value(&program).node,
            ExpressionNode::Constant(ConstantValue::Integer(-5))
        );
    }

    #[test]
    fn test_boolean_folding() {
        let program = optimized("program T;\nvar b: boolean;\nbegin\n  b := true and false\nend.");
        assert_eq!(
            first_assigned_value(&program).node,
            ExpressionNode::Constant(ConstantValue::Boolean(false))
        );

        let program = optimized("program T;\nvar b: boolean;\nbegin\n  b := not true\nend.");
        assert_eq!(
            first_assigned_value(&program).node,
            ExpressionNode::Constant(ConstantValue::Boolean(false))
        );
    }

    #[test]
    fn test_relational_folding() {
        let program = optimized("program T;\nvar b: boolean;\nbegin\n  b := 2 >= 1\nend.");
        let value = first_assigned_value(&program);
        assert_eq!(
            value.node,
            ExpressionNode::Constant(ConstantValue::Boolean(true))
        );
        assert!(value.ty.is(BuiltInType::Boolean));
    }

    #[test]
    fn test_not_equality_becomes_not_equal() {
        let program = optimized(
            "program T;\nvar b: boolean; x, y: integer;\nbegin\n  b := not (x = y)\nend.",
        );
        match &first_assigned_value(&program).node {
            ExpressionNode::Binary { operator, .. } => {
                assert_eq!(*operator, BinaryOperator::NotEqual)
            }
            other => panic!("expected rewritten comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_not_less_becomes_greater_equal() {
        let program = optimized(
            "program T;\nvar b: boolean; x, y: integer;\nbegin\n  b := not (x < y)\nend.",
        );
        match &first_assigned_value(&program).node {
            ExpressionNode::Binary { operator, .. } => {
                assert_eq!(*operator, BinaryOperator::GreaterEqual)
            }
            other => panic!("expected rewritten comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_double_negation_removed() {
        let program =
            optimized("program T;\nvar a, b: boolean;\nbegin\n  a := not (not b)\nend.");
        assert!(matches!(
            first_assigned_value(&program).node,
            ExpressionNode::Variable(_)
        ));
    }

    #[test]
    fn test_de_morgan_and_of_nots() {
        let program = optimized(
            "program T;\nvar r, a, b: boolean;\nbegin\n  r := (not a) and (not b)\nend.",
        );
        match &first_assigned_value(&program).node {
            ExpressionNode::Unary { operator, operand } => {
                assert_eq!(*operator, UnaryOperator::Not);
                match &operand.node {
                    ExpressionNode::Binary { operator, .. } => {
                        assert_eq!(*operator, BinaryOperator::Or)
                    }
                    other => panic!("expected or under not, got {:?}", other),
                }
            }
            other => panic!("expected De Morgan rewrite, got {:?}", other),
        }
    }

    #[test]
    fn test_indices_and_arguments_are_rewritten() {
        let program = optimized(
            "program T;\nvar a: array [1..10] of integer;\nbegin\n  a[2 + 3] := 0;\n  writeln(1 + 1)\nend.",
        );
        match &program.block.body[0].kind {
            StatementKind::Assign { target, .. } => {
                let target = target.as_ref().unwrap();
                assert_eq!(
                    target.indices[0].node,
                    ExpressionNode::Constant(ConstantValue::Integer(5))
                );
            }
            other => panic!("expected assignment, got {:?}", other),
        }
        match &program.block.body[1].kind {
            StatementKind::Call(call) => {
                assert_eq!(
                    call.arguments[0].as_ref().unwrap().node,
                    ExpressionNode::Constant(ConstantValue::Integer(2))
                );
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_callable_bodies_are_optimized() {
        let source = "program T;\nvar r: integer;\n\
                      function F: integer;\nbegin\n  f := 2 * 3\nend;\n\
                      begin\n  r := f\nend.";
        let program = optimized(source);
        let callable = program.block.callables[0].borrow();
        match &callable.body.body[0].kind {
            StatementKind::Assign { value, .. } => {
                assert_eq!(
                    value.as_ref().unwrap().node,
                    ExpressionNode::Constant(ConstantValue::Integer(6))
                );
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_optimizer_is_idempotent() {
        let source = "program T;\nvar b, p, q: boolean; x: integer;\nbegin\n  \
                      b := not (not p and not q);\n  x := 1 + 2 * 3 - 4\nend.";

        let build = |passes: usize| {
            let mut diagnostics = Diagnostics::new();
            let tokens = tokenize(source, &mut diagnostics);
            let mut program = Parser::new(tokens, &mut diagnostics).parse().unwrap();
            for _ in 0..passes {
                optimize_program(&mut program);
            }
            program
        };

        assert_eq!(build(1), build(2));
    }
}
