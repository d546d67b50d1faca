// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! The fixed point iteration driving the analysis.

Every pass walks the CFG breadth first from the entry block, recomputes
each block's entry state as the join over its reachable incoming edges,
threads the state through the block's instructions, and lets the
terminator write the outgoing edge states. Passes repeat until nothing
(entry state, per instruction snapshot, or edge state) changes.

All state lives in an [`AnalysisContext`] value created per function and
dropped after the bounds check, so nothing leaks between functions.
*/

use std::collections::VecDeque;

use log::debug as log_debug;

use super::ranges::{Edge, EdgeState, RangeMap};
use super::transfer;
use crate::ir::{BlockId, Function, ValueId};
use crate::{AnalyzerError, FastHashMap, FastHashSet};

/// The converged state of one function analysis.
#[derive(Debug, Default)]
pub struct AnalysisContext {
    entry_ranges: FastHashMap<BlockId, RangeMap>,
    inst_ranges: FastHashMap<ValueId, RangeMap>,
    edge_states: FastHashMap<Edge, EdgeState>,
    array_sizes: FastHashMap<ValueId, u32>,
    successors: Vec<Vec<BlockId>>,
    predecessors: Vec<Vec<BlockId>>,
}

impl AnalysisContext {
    /// Set up the per function tables: CFG successor and predecessor
    /// lists, and the element count of every statically sized array.
    fn new(func: &Function) -> Self {
        let mut successors = Vec::with_capacity(func.num_blocks());
        let mut predecessors = vec![Vec::new(); func.num_blocks()];
        for block in func.block_ids() {
            let succs = func.successors(block);
            for &succ in &succs {
                predecessors[succ.index()].push(block);
            }
            successors.push(succs);
        }

        let mut array_sizes = FastHashMap::default();
        for block in func.block_ids() {
            for &inst in func.block(block).insts() {
                if let Some(len) = func.array_len(inst) {
                    array_sizes.insert(inst, len);
                }
            }
        }

        AnalysisContext {
            entry_ranges: FastHashMap::default(),
            inst_ranges: FastHashMap::default(),
            edge_states: FastHashMap::default(),
            array_sizes,
            successors,
            predecessors,
        }
    }

    /// The element count of a statically allocated array, keyed by its
    /// defining alloca.
    #[must_use]
    pub fn array_size(&self, alloca: ValueId) -> Option<u32> {
        self.array_sizes.get(&alloca).copied()
    }

    /// The ranges that hold immediately after `inst` executed, as of the
    /// last visit. `None` means the instruction was never reached.
    #[must_use]
    pub fn inst_ranges(&self, inst: ValueId) -> Option<&RangeMap> {
        self.inst_ranges.get(&inst)
    }

    /// The ranges at a block's entry, joined over its reachable incoming
    /// edges. `None` means the block was never reached.
    #[must_use]
    pub fn entry_ranges(&self, block: BlockId) -> Option<&RangeMap> {
        self.entry_ranges.get(&block)
    }

    /// The state recorded on a CFG edge. Absent edges were never found
    /// feasible.
    #[must_use]
    pub fn edge_state(&self, pred: BlockId, succ: BlockId) -> Option<&EdgeState> {
        self.edge_states.get(&(pred, succ))
    }

    /// The entry state of a block: the join over all reachable incoming
    /// edges, or `None` while every incoming edge is unreachable.
    fn incoming(&self, block: BlockId) -> Option<RangeMap> {
        let mut acc: Option<RangeMap> = None;
        for &pred in &self.predecessors[block.index()] {
            let Some(state) = self.edge_states.get(&(pred, block)) else {
                continue;
            };
            if !state.reachable {
                continue;
            }
            acc = Some(match acc {
                None => state.ranges.clone(),
                Some(current) => current.join(&state.ranges),
            });
        }
        acc
    }
}

/// Run the analysis of one function to its fixed point.
///
/// # Errors
/// Propagates the abort conditions of the transfer functions; see
/// [`AnalyzerError`].
pub fn analyze(func: &Function) -> Result<AnalysisContext, AnalyzerError> {
    let mut ctx = AnalysisContext::new(func);
    let mut passes = 0u32;
    loop {
        passes += 1;
        if !run_pass(func, &mut ctx)? {
            break;
        }
    }
    log_debug!("`{}` converged after {passes} passes", func.name());
    Ok(ctx)
}

/// One breadth first sweep over the CFG. Returns whether anything
/// changed.
fn run_pass(func: &Function, ctx: &mut AnalysisContext) -> Result<bool, AnalyzerError> {
    let mut changed = false;
    let entry = func.entry();
    let mut queue = VecDeque::from([entry]);
    let mut visited = FastHashSet::default();
    visited.insert(entry);

    while let Some(block) = queue.pop_front() {
        let ranges_in = if block == entry {
            // Only the entry block legally has no predecessors.
            RangeMap::new()
        } else {
            match ctx.incoming(block) {
                Some(ranges) => ranges,
                // Currently unreachable; do not walk through it.
                None => continue,
            }
        };

        if ctx.entry_ranges.get(&block) != Some(&ranges_in) {
            ctx.entry_ranges.insert(block, ranges_in.clone());
            changed = true;
        }

        let mut ranges = ranges_in;
        for &inst_id in func.block(block).insts() {
            if func.inst(inst_id).is_terminator() {
                for (dest, edge_ranges) in transfer::outgoing(func, inst_id, &ranges)? {
                    let state = EdgeState {
                        reachable: true,
                        ranges: edge_ranges,
                    };
                    let edge = (block, dest);
                    if ctx.edge_states.get(&edge) != Some(&state) {
                        ctx.edge_states.insert(edge, state);
                        changed = true;
                    }
                }
            } else {
                transfer::apply(func, inst_id, &mut ranges)?;
            }

            // Install the post instruction snapshot, widening against the
            // previous visit so growing intervals jump to their bound.
            // The widened map is also what keeps flowing downstream.
            let stale = ctx.inst_ranges.get(&inst_id) != Some(&ranges);
            if stale {
                if let Some(old) = ctx.inst_ranges.get(&inst_id).cloned() {
                    ranges.widen_from(&old);
                }
                ctx.inst_ranges.insert(inst_id, ranges.clone());
                changed = true;
            }
        }

        for &succ in &ctx.successors[block.index()] {
            if visited.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::interval::Interval;
    use crate::ir::{BinOp, FunctionBuilder, Predicate, Ty};
    use rstest::rstest;

    #[rstest]
    fn test_constant_store_propagates_to_load() {
        let mut b = FunctionBuilder::new("f");
        b.new_block();
        let slot = b.new_alloca(Ty::I32).unwrap();
        b.new_store(5, slot).unwrap();
        let val = b.new_load(slot).unwrap();
        b.new_ret(None).unwrap();
        let func = b.finish().unwrap();

        let ctx = analyze(&func).unwrap();
        let after_load = ctx.inst_ranges(val).unwrap();
        assert_eq!(after_load.get(val), Some(Interval::singleton(5)));
    }

    #[rstest]
    fn test_infeasible_branch_leaves_block_unreached() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.new_block();
        let dead = b.new_block();
        let exit = b.new_block();
        b.select_block(entry);
        let slot = b.new_alloca(Ty::I32).unwrap();
        b.new_store(5, slot).unwrap();
        let val = b.new_load(slot).unwrap();
        let cmp = b.new_comparison(Predicate::Sgt, val, 10).unwrap();
        b.new_cond_br(cmp, dead, exit).unwrap();
        b.select_block(dead);
        let in_dead = b.new_load(slot).unwrap();
        b.new_br(exit).unwrap();
        b.select_block(exit);
        b.new_ret(None).unwrap();
        let func = b.finish().unwrap();

        let ctx = analyze(&func).unwrap();
        assert!(ctx.edge_state(entry, dead).is_none());
        assert!(ctx.entry_ranges(dead).is_none());
        assert!(ctx.inst_ranges(in_dead).is_none());
        assert!(ctx.edge_state(entry, exit).is_some());
    }

    #[rstest]
    fn test_merge_joins_both_paths() {
        // One path stores 1, the other stores 10; after the merge the
        // slot spans the hull of both.
        let mut b = FunctionBuilder::new("f");
        let entry = b.new_block();
        let lo_path = b.new_block();
        let hi_path = b.new_block();
        let merge = b.new_block();
        b.select_block(entry);
        let slot = b.new_alloca(Ty::I32).unwrap();
        let opaque = b.new_call("rand", Vec::new()).unwrap();
        b.new_store(opaque, slot).unwrap();
        let val = b.new_load(slot).unwrap();
        let cmp = b.new_comparison(Predicate::Slt, val, 0).unwrap();
        b.new_cond_br(cmp, lo_path, hi_path).unwrap();
        b.select_block(lo_path);
        b.new_store(1, slot).unwrap();
        b.new_br(merge).unwrap();
        b.select_block(hi_path);
        b.new_store(10, slot).unwrap();
        b.new_br(merge).unwrap();
        b.select_block(merge);
        let merged = b.new_load(slot).unwrap();
        b.new_ret(None).unwrap();
        let func = b.finish().unwrap();

        let ctx = analyze(&func).unwrap();
        let at_merge = ctx.entry_ranges(merge).unwrap();
        assert_eq!(at_merge.get(slot), Some(Interval::of(1, 10)));
        let after_load = ctx.inst_ranges(merged).unwrap();
        assert_eq!(after_load.get(merged), Some(Interval::of(1, 10)));
    }

    #[rstest]
    fn test_counting_loop_with_opaque_bound_converges() {
        // for (i = 0; i < n; ++i) with unknown n. Widening must push the
        // counter to the i32 maximum instead of iterating forever.
        let mut b = FunctionBuilder::new("f");
        let entry = b.new_block();
        let cond = b.new_block();
        let body = b.new_block();
        let exit = b.new_block();
        b.select_block(entry);
        let slot = b.new_alloca(Ty::I32).unwrap();
        let bound = b.new_call("opaque", Vec::new()).unwrap();
        b.new_store(0, slot).unwrap();
        b.new_br(cond).unwrap();
        b.select_block(cond);
        let val = b.new_load(slot).unwrap();
        let cmp = b.new_comparison(Predicate::Slt, val, bound).unwrap();
        b.new_cond_br(cmp, body, exit).unwrap();
        b.select_block(body);
        let cur = b.new_load(slot).unwrap();
        let inc = b.new_binary_op(BinOp::Add, cur, 1).unwrap();
        b.new_store(inc, slot).unwrap();
        b.new_br(cond).unwrap();
        b.select_block(exit);
        b.new_ret(None).unwrap();
        let func = b.finish().unwrap();

        let ctx = analyze(&func).unwrap();
        let at_cond = ctx.entry_ranges(cond).unwrap();
        let counter = at_cond.get(slot).unwrap();
        assert_eq!(counter.lo(), 0);
        assert_eq!(counter.hi(), i32::MAX);
    }

    #[rstest]
    fn test_counting_loop_with_literal_bound_stays_tight() {
        // for (i = 0; i < 30; ++i): at the body entry the counter must
        // settle back to [0, 29] once the iteration stabilizes.
        let mut b = FunctionBuilder::new("f");
        let entry = b.new_block();
        let cond = b.new_block();
        let body = b.new_block();
        let exit = b.new_block();
        b.select_block(entry);
        let slot = b.new_alloca(Ty::I32).unwrap();
        b.new_store(0, slot).unwrap();
        b.new_br(cond).unwrap();
        b.select_block(cond);
        let val = b.new_load(slot).unwrap();
        let cmp = b.new_comparison(Predicate::Slt, val, 30).unwrap();
        b.new_cond_br(cmp, body, exit).unwrap();
        b.select_block(body);
        let cur = b.new_load(slot).unwrap();
        let inc = b.new_binary_op(BinOp::Add, cur, 1).unwrap();
        b.new_store(inc, slot).unwrap();
        b.new_br(cond).unwrap();
        b.select_block(exit);
        b.new_ret(None).unwrap();
        let func = b.finish().unwrap();

        let ctx = analyze(&func).unwrap();
        let after_body_load = ctx.inst_ranges(cur).unwrap();
        assert_eq!(after_body_load.get(cur), Some(Interval::of(0, 29)));
        // Past the loop the counter is exactly the bound.
        let at_exit = ctx.entry_ranges(exit).unwrap();
        assert_eq!(at_exit.get(slot), Some(Interval::of(30, 30)));
    }

    #[rstest]
    fn test_runs_are_deterministic() {
        let build = || {
            let mut b = FunctionBuilder::new("f");
            let entry = b.new_block();
            let then_dest = b.new_block();
            let exit = b.new_block();
            b.select_block(entry);
            let slot = b.new_alloca(Ty::I32).unwrap();
            let opaque = b.new_call("rand", Vec::new()).unwrap();
            b.new_store(opaque, slot).unwrap();
            let val = b.new_load(slot).unwrap();
            let cmp = b.new_comparison(Predicate::Sge, val, 0).unwrap();
            b.new_cond_br(cmp, then_dest, exit).unwrap();
            b.select_block(then_dest);
            b.new_br(exit).unwrap();
            b.select_block(exit);
            b.new_ret(None).unwrap();
            (b.finish().unwrap(), val)
        };
        let (func_a, val_a) = build();
        let (func_b, val_b) = build();
        let ctx_a = analyze(&func_a).unwrap();
        let ctx_b = analyze(&func_b).unwrap();
        assert_eq!(ctx_a.inst_ranges(val_a), ctx_b.inst_ranges(val_b));
    }
}
