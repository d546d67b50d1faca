// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! The bounds check run after the analysis converged.

Every array index instruction is compared against the element count of
the array it addresses. An access is reported unless its index interval
lies entirely inside `[0, len)`; since the intervals over-approximate the
runtime values, a report means the access *may* be out of bounds, and a
silent access is proven in bounds.

The walk is a pure read of the converged state, so running it twice
yields identical diagnostics.
*/

use super::engine::AnalysisContext;
use super::interval::Interval;
use super::ranges::RangeMap;
use crate::diagnostics::Diagnostic;
use crate::ir::{BlockId, Function, Instruction, Operand};

/// Collect a diagnostic for every array access the converged state
/// cannot prove in bounds, in program order.
#[must_use]
pub fn check(func: &Function, ctx: &AnalysisContext) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for block in func.block_ids() {
        let insts = func.block(block).insts();
        for (position, &inst_id) in insts.iter().enumerate() {
            let Instruction::GetElementPtr { base, index } = *func.inst(inst_id) else {
                continue;
            };
            // No snapshot means the block never became reachable.
            if ctx.inst_ranges(inst_id).is_none() {
                continue;
            }
            // Accesses into anything without a static element count are
            // outside the analyzed subset.
            let Some(len) = ctx.array_size(base) else {
                continue;
            };
            let idx = match index {
                Operand::Const(k) => Interval::singleton(k),
                Operand::Value(v) => pre_ranges(func, ctx, block, position)
                    .and_then(|ranges| ranges.get(v))
                    .unwrap_or(Interval::TOP),
            };
            if idx.is_bottom() {
                continue;
            }
            let in_bounds = idx.lo() >= 0 && i64::from(idx.hi()) < i64::from(len);
            if !in_bounds {
                diagnostics.push(Diagnostic {
                    loc: func.loc(inst_id).cloned(),
                    instr: func.display_inst(inst_id),
                });
            }
        }
    }
    diagnostics
}

/// The ranges in force just before the instruction at `position`
/// executes: the block entry state for the first instruction, otherwise
/// the previous instruction's snapshot.
fn pre_ranges<'a>(
    func: &Function,
    ctx: &'a AnalysisContext,
    block: BlockId,
    position: usize,
) -> Option<&'a RangeMap> {
    if position == 0 {
        ctx.entry_ranges(block)
    } else {
        ctx.inst_ranges(func.block(block).insts()[position - 1])
    }
}
