// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! Array Bounds Checker

The crate implements an interval-based value range analysis over a small
typed, single-assignment IR, together with a checker that reports array
accesses whose index interval is not provably inside the array.

The central structure is an [`AnalysisContext`], which holds the converged
state of one function analysis.

The analysis pipeline is:
- The [`FunctionBuilder`] (or a host front end) produces a [`Function`].
- The fixed point engine interprets every instruction abstractly,
  propagating a [`RangeMap`] of [`Interval`]s along CFG edges. Conditional
  branches refine the intervals of compared stack slots per edge, and
  widening forces termination on loops.
- After convergence, the bounds checker inspects every array index
  instruction and emits a [`Diagnostic`] for each index interval that may
  fall outside the array.

The whole pipeline is packaged as the "BoundsCheck" function pass, which
never mutates the IR.

## Reachability

Edges whose branch condition is infeasible are never written, so blocks
with no reachable incoming edge are skipped entirely. Accesses inside such
blocks produce no diagnostics.

## Loops

Whenever an instruction's recorded range map is replaced with a different
one, any bound that grew since the previous visit jumps straight to the
corresponding `i32` extreme. Each tracked interval can therefore change
only a bounded number of times, which bounds the number of passes.

[`AnalysisContext`]: crate::analysis::engine::AnalysisContext
[`Interval`]: crate::analysis::interval::Interval
[`RangeMap`]: crate::analysis::ranges::RangeMap
[`Function`]: crate::ir::Function
[`FunctionBuilder`]: crate::ir::FunctionBuilder
[`Diagnostic`]: crate::diagnostics::Diagnostic
*/

type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;
type FastHashSet<K> = rustc_hash::FxHashSet<K>;

pub mod analysis;
pub mod diagnostics;
pub mod ir;
pub mod pass;

pub use analysis::engine::AnalysisContext;
pub use analysis::interval::{CmpOp, Interval};
pub use analysis::ranges::{EdgeState, RangeMap};
pub use diagnostics::{Diagnostic, SourceLoc};
pub use ir::{
    BinOp, Block, BlockId, CastKind, Function, FunctionBuilder, Instruction, IrError, Module,
    Operand, Predicate, Ty, ValueId,
};
pub use pass::{BoundsCheckPass, FunctionPass, Preservation};

/// A condition under which the analysis of a function cannot continue.
///
/// Unlike out of bounds warnings, which accumulate and never stop the
/// analysis, these are surfaced immediately and yield no partial results
/// for the offending function.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AnalyzerError {
    /// The divisor interval of a signed division is exactly `{0}`.
    /// The analyzed program is presumed malformed.
    #[error("division by an interval that is exactly zero")]
    DivisionByZero,

    /// A store through a pointer the analysis has no entry for. The IR
    /// invariants guarantee every store target is an alloca or an array
    /// index result, both of which are tracked, so this indicates a
    /// malformed input.
    #[error("store through untracked pointer {0}")]
    UntrackedStore(ir::ValueId),

    /// A comparison predicate outside the signed subset the analysis
    /// understands.
    #[error("unsupported comparison predicate `{0}`")]
    UnsupportedPredicate(ir::Predicate),
}
