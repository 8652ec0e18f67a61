//! Peephole optimizer
//!
//! Local rewrites over short instruction windows, iterated until a full pass
//! leaves the listing unchanged. Patterns never reach across labels or
//! comments, so control-flow targets stay intact.
//!
//! Rewrites:
//! - runs of `PUSHI 0` / `PUSHF 0.0` (any mix) of length N ≥ 2 collapse to
//!   `PUSHN N`; a run of length 1 re-emits `PUSHI 0`
//! - `STOREL k; PUSHL k` becomes `DUP 1; STOREL k` (same for `STOREG`)
//! - a push of 2 followed by `MUL` becomes `DUP 1; ADD` (`FMUL` / `FADD`
//!   likewise)

use crate::{Arg, Instruction, Item, Opcode};

fn is_zero_push(instruction: &Instruction) -> bool {
    match instruction.opcode {
        Opcode::Pushi => instruction.args == [Arg::Int(0)],
        Opcode::Pushf => instruction.args == [Arg::Real(0.0)],
        _ => false,
    }
}

fn is_two_push(instruction: &Instruction) -> bool {
    match instruction.opcode {
        Opcode::Pushi => instruction.args == [Arg::Int(2)],
        Opcode::Pushf => instruction.args == [Arg::Real(2.0)],
        _ => false,
    }
}

fn as_instruction(item: Option<&Item>) -> Option<&Instruction> {
    match item {
        Some(Item::Instruction(instruction)) => Some(instruction),
        _ => None,
    }
}

fn optimization_pass(items: &[Item]) -> Vec<Item> {
    let mut out = Vec::with_capacity(items.len());
    let mut i = 0;

    while i < items.len() {
        if let (Some(current), Some(next)) =
            (as_instruction(items.get(i)), as_instruction(items.get(i + 1)))
        {
            if is_zero_push(current) {
                let mut count = 0;
                while as_instruction(items.get(i + count)).is_some_and(is_zero_push) {
                    count += 1;
                }

                if count == 1 {
                    out.push(Item::Instruction(Instruction::int(Opcode::Pushi, 0)));
                } else {
                    out.push(Item::Instruction(Instruction::int(
                        Opcode::Pushn,
                        count as i64,
                    )));
                }
                i += count;
                continue;
            }

            if matches!(current.opcode, Opcode::Storel | Opcode::Storeg) {
                let push_back = if current.opcode == Opcode::Storel {
                    Opcode::Pushl
                } else {
                    Opcode::Pushg
                };

                if next.opcode == push_back && next.args == current.args {
                    out.push(Item::Instruction(Instruction::int(Opcode::Dup, 1)));
                    out.push(Item::Instruction(current.clone()));
                    i += 2;
                    continue;
                }
            } else if is_two_push(current)
                && matches!(next.opcode, Opcode::Mul | Opcode::Fmul)
                && next.args.is_empty()
            {
                out.push(Item::Instruction(Instruction::int(Opcode::Dup, 1)));
                let add = if next.opcode == Opcode::Mul {
                    Opcode::Add
                } else {
                    Opcode::Fadd
                };
                out.push(Item::Instruction(Instruction::new(add)));
                i += 2;
                continue;
            }
        }

        out.push(items[i].clone());
        i += 1;
    }

    out
}

/// Run the peephole rewrites to a fixed point.
pub fn optimize(items: Vec<Item>) -> Vec<Item> {
    let mut current = items;
    loop {
        let next = optimization_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(opcode: Opcode) -> Item {
        Item::Instruction(Instruction::new(opcode))
    }

    fn ins_int(opcode: Opcode, value: i64) -> Item {
        Item::Instruction(Instruction::int(opcode, value))
    }

    fn ins_real(opcode: Opcode, value: f64) -> Item {
        Item::Instruction(Instruction::real(opcode, value))
    }

    #[test]
    fn test_multiple_push_single_integer() {
        let before = vec![ins_int(Opcode::Pushi, 0)];
        assert_eq!(optimize(before.clone()), before);
    }

    #[test]
    fn test_multiple_push_single_float() {
        let before = vec![ins_real(Opcode::Pushf, 0.0)];
        assert_eq!(optimize(before.clone()), before);
    }

    #[test]
    fn test_multiple_push_multiple_integers_no_end() {
        let before = vec![
            ins_int(Opcode::Pushi, 0),
            ins_int(Opcode::Pushi, 0),
            ins_int(Opcode::Pushi, 0),
        ];
        assert_eq!(optimize(before), vec![ins_int(Opcode::Pushn, 3)]);
    }

    #[test]
    fn test_multiple_push_multiple_integers_end() {
        let before = vec![
            ins_int(Opcode::Pushi, 0),
            ins_int(Opcode::Pushi, 0),
            ins_int(Opcode::Pushi, 0),
            ins(Opcode::Add),
        ];
        assert_eq!(
            optimize(before),
            vec![ins_int(Opcode::Pushn, 3), ins(Opcode::Add)]
        );
    }

    #[test]
    fn test_multiple_push_multiple_floats_no_end() {
        let before = vec![
            ins_real(Opcode::Pushf, 0.0),
            ins_real(Opcode::Pushf, 0.0),
            ins_real(Opcode::Pushf, 0.0),
        ];
        assert_eq!(optimize(before), vec![ins_int(Opcode::Pushn, 3)]);
    }

    #[test]
    fn test_multiple_push_multiple_floats_end() {
        let before = vec![
            ins_real(Opcode::Pushf, 0.0),
            ins_real(Opcode::Pushf, 0.0),
            ins_real(Opcode::Pushf, 0.0),
            ins(Opcode::Add),
        ];
        assert_eq!(
            optimize(before),
            vec![ins_int(Opcode::Pushn, 3), ins(Opcode::Add)]
        );
    }

    #[test]
    fn test_multiple_push_multiple_mixed_1() {
        let before = vec![
            ins_int(Opcode::Pushi, 0),
            ins_real(Opcode::Pushf, 0.0),
            ins_int(Opcode::Pushi, 0),
            ins(Opcode::Add),
        ];
        assert_eq!(
            optimize(before),
            vec![ins_int(Opcode::Pushn, 3), ins(Opcode::Add)]
        );
    }

    #[test]
    fn test_multiple_push_multiple_mixed_2() {
        let before = vec![
            ins_real(Opcode::Pushf, 0.0),
            ins_int(Opcode::Pushi, 0),
            ins_real(Opcode::Pushf, 0.0),
            ins(Opcode::Add),
        ];
        assert_eq!(
            optimize(before),
            vec![ins_int(Opcode::Pushn, 3), ins(Opcode::Add)]
        );
    }

    #[test]
    fn test_store_push_1() {
        let before = vec![ins_int(Opcode::Storel, 100), ins_int(Opcode::Pushl, 100)];
        assert_eq!(
            optimize(before),
            vec![ins_int(Opcode::Dup, 1), ins_int(Opcode::Storel, 100)]
        );
    }

    #[test]
    fn test_store_push_2() {
        let before = vec![ins_int(Opcode::Storel, 100), ins_int(Opcode::Pushl, 101)];
        assert_eq!(optimize(before.clone()), before);
    }

    #[test]
    fn test_store_push_3() {
        let before = vec![ins_int(Opcode::Storel, 100), ins_int(Opcode::Pushg, 100)];
        assert_eq!(optimize(before.clone()), before);
    }

    #[test]
    fn test_store_push_4() {
        let before = vec![ins_int(Opcode::Storeg, 100), ins_int(Opcode::Pushg, 100)];
        assert_eq!(
            optimize(before),
            vec![ins_int(Opcode::Dup, 1), ins_int(Opcode::Storeg, 100)]
        );
    }

    #[test]
    fn test_multiplication_integer_1() {
        let before = vec![
            ins_int(Opcode::Pushi, 2),
            ins_int(Opcode::Pushi, 3),
            ins(Opcode::Mul),
        ];
        assert_eq!(optimize(before.clone()), before);
    }

    #[test]
    fn test_multiplication_integer_2() {
        let before = vec![
            ins_int(Opcode::Pushi, 3),
            ins_int(Opcode::Pushi, 2),
            ins(Opcode::Mul),
        ];
        assert_eq!(
            optimize(before),
            vec![
                ins_int(Opcode::Pushi, 3),
                ins_int(Opcode::Dup, 1),
                ins(Opcode::Add),
            ]
        );
    }

    #[test]
    fn test_multiplication_float_1() {
        let before = vec![
            ins_int(Opcode::Pushi, 3),
            ins_int(Opcode::Pushi, 2),
            ins(Opcode::Fmul),
        ];
        assert_eq!(
            optimize(before),
            vec![
                ins_int(Opcode::Pushi, 3),
                ins_int(Opcode::Dup, 1),
                ins(Opcode::Fadd),
            ]
        );
    }

    #[test]
    fn test_multiplication_float_2() {
        let before = vec![
            ins_int(Opcode::Pushi, 3),
            ins_real(Opcode::Pushf, 2.0),
            ins(Opcode::Mul),
        ];
        assert_eq!(
            optimize(before),
            vec![
                ins_int(Opcode::Pushi, 3),
                ins_int(Opcode::Dup, 1),
                ins(Opcode::Add),
            ]
        );
    }

    #[test]
    fn test_patterns_do_not_cross_labels() {
        let before = vec![
            ins_int(Opcode::Pushi, 0),
            Item::Label(crate::Label::new("SYS1")),
            ins_int(Opcode::Pushi, 0),
        ];
        assert_eq!(optimize(before.clone()), before);
    }

    #[test]
    fn test_second_run_is_identity() {
        let before = vec![
            ins_int(Opcode::Pushi, 0),
            ins_int(Opcode::Pushi, 0),
            ins_int(Opcode::Storel, 4),
            ins_int(Opcode::Pushl, 4),
            ins_int(Opcode::Pushi, 2),
            ins(Opcode::Mul),
        ];

        let once = optimize(before);
        let twice = optimize(once.clone());
        assert_eq!(once, twice);
    }
}
