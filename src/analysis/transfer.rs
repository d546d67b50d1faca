// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! Abstract interpretation of single instructions.

[`apply`] threads a [`RangeMap`] through one non terminator instruction.
[`outgoing`] evaluates a terminator and produces the states of the
feasible outgoing edges; for a two way branch it pairs the branch with the
comparison that feeds it and refines the compared stack slots on each
edge.

Instructions outside the interpreted subset leave their result untracked.
That is sound because an untracked value is simply never consulted; uses
of it fall back to the full interval.
*/

use bitflags::bitflags;

use super::interval::{refine, CmpOp, Interval};
use super::ranges::RangeMap;
use crate::ir::{BinOp, BlockId, Function, Instruction, Operand, ValueId};
use crate::AnalyzerError;

bitflags! {
    /// Which successors of a two way branch remain possible once the
    /// branch condition is refined. Bit 0 is the then successor, bit 1
    /// the else successor.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
    pub struct BranchFeasibility: u8 {
        const THEN = 1u8;
        const ELSE = 2u8;
        const BOTH = BranchFeasibility::THEN.bits() | BranchFeasibility::ELSE.bits();
    }
}

/// The interval of an operand under the current state. Integer literals
/// become singletons; untracked values are unconstrained.
#[must_use]
pub fn operand_interval(operand: Operand, ranges: &RangeMap) -> Interval {
    match operand {
        Operand::Const(k) => Interval::singleton(k),
        Operand::Value(v) => ranges.get(v).unwrap_or(Interval::TOP),
    }
}

/// Interpret one non terminator instruction, updating `ranges` in place.
///
/// # Errors
/// Fails on a store through an untracked pointer and on signed division
/// by an interval that is exactly zero.
pub fn apply(
    func: &Function,
    inst_id: ValueId,
    ranges: &mut RangeMap,
) -> Result<(), AnalyzerError> {
    match *func.inst(inst_id) {
        Instruction::Alloca { ty } => {
            // Scalar slots start unconstrained. Array allocas are not
            // scalars; their element counts live in the array size table.
            if ty.is_scalar_int() {
                ranges.insert(inst_id, Interval::TOP);
            }
        }
        Instruction::Load { ptr } => {
            let interval = ranges.get(ptr).unwrap_or(Interval::TOP);
            ranges.insert(inst_id, interval);
        }
        Instruction::Store { value, ptr } => {
            if !ranges.contains(ptr) {
                return Err(AnalyzerError::UntrackedStore(ptr));
            }
            let interval = operand_interval(value, ranges);
            ranges.insert(ptr, interval);
        }
        Instruction::BinaryOp { op, lhs, rhs } => {
            let lhs = operand_interval(lhs, ranges);
            let rhs = operand_interval(rhs, ranges);
            let result = match op {
                BinOp::Add => lhs.add(rhs),
                BinOp::Sub => lhs.sub(rhs),
                BinOp::Mul => lhs.mul(rhs),
                BinOp::SDiv => lhs.div(rhs)?,
                // Not interpreted; the result stays untracked.
                _ => return Ok(()),
            };
            ranges.insert(inst_id, result);
        }
        Instruction::GetElementPtr { .. } => {
            // The result is a pointer, not a scalar. It still gets an
            // unconstrained entry so that stores through it are legal.
            ranges.insert(inst_id, Interval::TOP);
        }
        Instruction::Call { .. } => {
            // No interprocedural reasoning.
            ranges.insert(inst_id, Interval::TOP);
        }
        Instruction::Cast { value, .. } => {
            let interval = operand_interval(value, ranges);
            ranges.insert(inst_id, interval);
        }
        // A comparison stores no scalar interval; it is paired with the
        // conditional branch that consumes it.
        Instruction::ICmp { .. } => {}
        // Terminators are handled by `outgoing`.
        Instruction::Br { .. } | Instruction::CondBr { .. } | Instruction::Ret { .. } => {}
    }
    Ok(())
}

/// Evaluate a block terminator under `ranges` and return the feasible
/// outgoing edges with the state each one carries. Infeasible edges are
/// omitted entirely.
///
/// # Errors
/// Fails when the paired comparison uses an unsigned predicate.
pub fn outgoing(
    func: &Function,
    term_id: ValueId,
    ranges: &RangeMap,
) -> Result<Vec<(BlockId, RangeMap)>, AnalyzerError> {
    match *func.inst(term_id) {
        Instruction::Br { dest } => Ok(vec![(dest, ranges.clone())]),
        Instruction::CondBr {
            cond,
            then_dest,
            else_dest,
        } => {
            let (then_ranges, else_ranges, feasibility) = branch_states(func, cond, ranges)?;
            let mut edges = Vec::with_capacity(2);
            if feasibility.contains(BranchFeasibility::THEN) {
                edges.push((then_dest, then_ranges));
            }
            if feasibility.contains(BranchFeasibility::ELSE) {
                edges.push((else_dest, else_ranges));
            }
            Ok(edges)
        }
        Instruction::Ret { .. } => Ok(Vec::new()),
        _ => Ok(Vec::new()),
    }
}

/// Split the current state into the two branch successor states.
///
/// When the condition is the result of a comparison, each side is refined
/// under the predicate (then edge) and its negation (else edge), and the
/// refined interval is written back to the stack slot behind each operand
/// that is a direct load of one. Comparisons of derived expressions do
/// not refine.
fn branch_states(
    func: &Function,
    cond: Operand,
    ranges: &RangeMap,
) -> Result<(RangeMap, RangeMap, BranchFeasibility), AnalyzerError> {
    let cmp = cond.as_value().map(|v| func.inst(v));
    let Some(Instruction::ICmp { pred, lhs, rhs }) = cmp else {
        // Branch on a literal takes exactly one edge. Branch on anything
        // else that is not a comparison keeps both edges unrefined.
        let feasibility = match cond.as_const() {
            Some(0) => BranchFeasibility::ELSE,
            Some(_) => BranchFeasibility::THEN,
            None => BranchFeasibility::BOTH,
        };
        return Ok((ranges.clone(), ranges.clone(), feasibility));
    };

    let op = CmpOp::from_predicate(*pred).ok_or(AnalyzerError::UnsupportedPredicate(*pred))?;
    let lhs_interval = operand_interval(*lhs, ranges);
    let rhs_interval = operand_interval(*rhs, ranges);

    let taken = refine(op, lhs_interval, rhs_interval);
    let skipped = refine(op.negation(), lhs_interval, rhs_interval);

    let mut then_ranges = ranges.clone();
    let mut else_ranges = ranges.clone();
    let mut feasibility = BranchFeasibility::empty();
    if taken.feasible {
        feasibility |= BranchFeasibility::THEN;
        refine_slot(func, &mut then_ranges, *lhs, taken.lhs);
        refine_slot(func, &mut then_ranges, *rhs, taken.rhs);
    }
    if skipped.feasible {
        feasibility |= BranchFeasibility::ELSE;
        refine_slot(func, &mut else_ranges, *lhs, skipped.lhs);
        refine_slot(func, &mut else_ranges, *rhs, skipped.rhs);
    }
    Ok((then_ranges, else_ranges, feasibility))
}

/// Write a refined interval back to the stack slot a comparison operand
/// was loaded from. Only operands that are direct loads of a tracked
/// alloca qualify; constants contribute no update.
fn refine_slot(func: &Function, ranges: &mut RangeMap, operand: Operand, refined: Interval) {
    let Some(loaded) = operand.as_value() else {
        return;
    };
    let Instruction::Load { ptr } = *func.inst(loaded) else {
        return;
    };
    if matches!(func.inst(ptr), Instruction::Alloca { .. }) && ranges.contains(ptr) {
        ranges.insert(ptr, refined);
    }
}
