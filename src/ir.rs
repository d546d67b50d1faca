// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! A small typed, single-assignment IR.

This is the read-only view the analysis consumes: functions made of basic
blocks, blocks made of instructions, and instructions referring to their
operands by [`ValueId`]. Every instruction that produces a result is
identified by its position in the function's instruction arena, so value
identity is an index, never a pointer.

[`FunctionBuilder`] is the only construction surface. Hosts (and the test
suite) append instructions block by block; [`FunctionBuilder::finish`]
checks the structural invariants once, after which the function is
immutable.
*/

use crate::diagnostics::SourceLoc;

/// Stable identity of an IR value: an index into the owning function's
/// instruction arena. Cheap to copy, hash and compare.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Identity of a basic block within one function.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// The types the IR subset distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ty {
    /// A one bit integer, produced by comparisons.
    I1,
    /// A signed 32 bit integer.
    I32,
    /// A stack array of `len` 32 bit integers.
    Array { len: u32 },
    /// An opaque pointer, e.g. the result of an array index operation.
    Ptr,
}

impl Ty {
    /// Whether values of this type are tracked as scalar intervals.
    #[inline]
    #[must_use]
    pub const fn is_scalar_int(&self) -> bool {
        matches!(self, Ty::I1 | Ty::I32)
    }
}

impl std::fmt::Display for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Ty::I1 => write!(f, "i1"),
            Ty::I32 => write!(f, "i32"),
            Ty::Array { len } => write!(f, "[{len} x i32]"),
            Ty::Ptr => write!(f, "ptr"),
        }
    }
}

/// An instruction operand. Integer literals carry signed 32 bit semantics
/// and appear inline instead of occupying an arena slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Const(i32),
    Value(ValueId),
}

impl Operand {
    /// If the operand is an integer literal, return it.
    #[inline]
    #[must_use]
    pub const fn as_const(&self) -> Option<i32> {
        match *self {
            Operand::Const(k) => Some(k),
            Operand::Value(_) => None,
        }
    }

    /// If the operand is an IR value, return its identity.
    #[inline]
    #[must_use]
    pub const fn as_value(&self) -> Option<ValueId> {
        match *self {
            Operand::Value(v) => Some(v),
            Operand::Const(_) => None,
        }
    }
}

impl From<i32> for Operand {
    fn from(k: i32) -> Self {
        Operand::Const(k)
    }
}

impl From<ValueId> for Operand {
    fn from(v: ValueId) -> Self {
        Operand::Value(v)
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Operand::Const(k) => write!(f, "{k}"),
            Operand::Value(v) => write!(f, "{v}"),
        }
    }
}

/// Binary integer operations.
#[derive(strum_macros::Display, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    #[strum(to_string = "add")]
    Add,
    #[strum(to_string = "sub")]
    Sub,
    #[strum(to_string = "mul")]
    Mul,
    #[strum(to_string = "sdiv")]
    SDiv,

    // The following are carried through the IR but not interpreted by the
    // range analysis. Their results stay untracked.
    #[strum(to_string = "srem")]
    SRem,
    #[strum(to_string = "shl")]
    Shl,
    #[strum(to_string = "ashr")]
    AShr,
    #[strum(to_string = "and")]
    And,
    #[strum(to_string = "or")]
    Or,
    #[strum(to_string = "xor")]
    Xor,
}

/// Comparison predicates of the `icmp` instruction.
///
/// The analysis interprets the signed subset; unsigned predicates abort
/// the analysis of the function.
#[derive(strum_macros::Display, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Predicate {
    #[strum(to_string = "eq")]
    Eq,
    #[strum(to_string = "ne")]
    Ne,
    #[strum(to_string = "slt")]
    Slt,
    #[strum(to_string = "sle")]
    Sle,
    #[strum(to_string = "sgt")]
    Sgt,
    #[strum(to_string = "sge")]
    Sge,
    #[strum(to_string = "ult")]
    Ult,
    #[strum(to_string = "ule")]
    Ule,
    #[strum(to_string = "ugt")]
    Ugt,
    #[strum(to_string = "uge")]
    Uge,
}

/// The cast family. All of these copy the source interval unchanged
/// through the analysis.
#[derive(strum_macros::Display, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CastKind {
    #[strum(to_string = "trunc")]
    Trunc,
    #[strum(to_string = "zext")]
    ZExt,
    #[strum(to_string = "sext")]
    SExt,
    #[strum(to_string = "bitcast")]
    Bitcast,
    #[strum(to_string = "inttoptr")]
    IntToPtr,
    #[strum(to_string = "ptrtoint")]
    PtrToInt,
}

/// One IR instruction. The instruction's own [`ValueId`] names its result
/// where it produces one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Reserve a stack slot of the given type.
    Alloca { ty: Ty },
    /// Read the value a pointer refers to.
    Load { ptr: ValueId },
    /// Write `value` through `ptr`. Produces no result.
    Store { value: Operand, ptr: ValueId },
    /// Integer arithmetic on two operands.
    BinaryOp {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// Form a pointer to element `index` of the array behind `base`.
    GetElementPtr { base: ValueId, index: Operand },
    /// Compare two operands, producing a one bit value.
    ICmp {
        pred: Predicate,
        lhs: Operand,
        rhs: Operand,
    },
    /// Call an opaque function.
    Call { callee: String, args: Vec<Operand> },
    /// Convert a value between representations.
    Cast { kind: CastKind, value: Operand },
    /// Unconditional branch.
    Br { dest: BlockId },
    /// Two way branch on `cond`. The successors are named fields rather
    /// than positional operands, so there is no ordering convention to
    /// get wrong.
    CondBr {
        cond: Operand,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    /// Return from the function.
    Ret { value: Option<Operand> },
}

impl Instruction {
    /// Whether the instruction ends a basic block.
    #[inline]
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Br { .. } | Instruction::CondBr { .. } | Instruction::Ret { .. }
        )
    }
}

/// A maximal straight line sequence of instructions ending in a
/// terminator.
#[derive(Clone, Debug, Default)]
pub struct Block {
    insts: Vec<ValueId>,
}

impl Block {
    /// The block's instructions in program order, terminator last.
    #[inline]
    #[must_use]
    pub fn insts(&self) -> &[ValueId] {
        &self.insts
    }
}

#[derive(Clone, Debug)]
struct InstData {
    inst: Instruction,
    loc: Option<SourceLoc>,
}

/// Structural problems detected while building a function.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    #[error("no insertion block selected")]
    NoInsertBlock,
    #[error("instruction appended after the terminator of {0}")]
    TrailingInstruction(BlockId),
    #[error("{0} has no terminator")]
    MissingTerminator(BlockId),
    #[error("function has no blocks")]
    EmptyFunction,
    #[error("branch to unknown block {0}")]
    UnknownBlock(BlockId),
}

/// An immutable function over the IR. The first created block is the
/// entry block.
#[derive(Clone, Debug)]
pub struct Function {
    name: String,
    insts: Vec<InstData>,
    blocks: Vec<Block>,
}

impl Function {
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        BlockId(0)
    }

    #[inline]
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Iterate over all block ids in creation order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    #[must_use]
    pub fn block(&self, b: BlockId) -> &Block {
        &self.blocks[b.index()]
    }

    #[must_use]
    pub fn inst(&self, v: ValueId) -> &Instruction {
        &self.insts[v.index()].inst
    }

    /// The source location attached to an instruction, if any.
    #[must_use]
    pub fn loc(&self, v: ValueId) -> Option<&SourceLoc> {
        self.insts[v.index()].loc.as_ref()
    }

    /// The successor blocks established by the block's terminator.
    ///
    /// For a two way branch the then successor comes first.
    #[must_use]
    pub fn successors(&self, b: BlockId) -> Vec<BlockId> {
        let Some(&term) = self.block(b).insts().last() else {
            return Vec::new();
        };
        match *self.inst(term) {
            Instruction::Br { dest } => vec![dest],
            Instruction::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![then_dest, else_dest],
            _ => Vec::new(),
        }
    }

    /// For an alloca of array type, the element count from the type
    /// information. `None` for everything else.
    #[must_use]
    pub fn array_len(&self, v: ValueId) -> Option<u32> {
        match *self.inst(v) {
            Instruction::Alloca {
                ty: Ty::Array { len },
            } => Some(len),
            _ => None,
        }
    }

    /// Render one instruction the way it would appear in a textual IR
    /// dump, e.g. `%4 = getelementptr %0, %3`.
    #[must_use]
    pub fn display_inst(&self, v: ValueId) -> String {
        match *self.inst(v) {
            Instruction::Alloca { ty } => format!("{v} = alloca {ty}"),
            Instruction::Load { ptr } => format!("{v} = load {ptr}"),
            Instruction::Store { value, ptr } => format!("store {value}, {ptr}"),
            Instruction::BinaryOp { op, lhs, rhs } => format!("{v} = {op} {lhs}, {rhs}"),
            Instruction::GetElementPtr { base, index } => {
                format!("{v} = getelementptr {base}, {index}")
            }
            Instruction::ICmp { pred, lhs, rhs } => format!("{v} = icmp {pred} {lhs}, {rhs}"),
            Instruction::Call {
                ref callee,
                ref args,
            } => {
                let args = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{v} = call {callee}({args})")
            }
            Instruction::Cast { kind, value } => format!("{v} = {kind} {value}"),
            Instruction::Br { dest } => format!("br {dest}"),
            Instruction::CondBr {
                cond,
                then_dest,
                else_dest,
            } => format!("br {cond}, {then_dest}, {else_dest}"),
            Instruction::Ret { value: Some(value) } => format!("ret {value}"),
            Instruction::Ret { value: None } => "ret".to_string(),
        }
    }
}

/// Append-only builder for [`Function`].
///
/// Instructions go into the currently selected block; the block created
/// first becomes the entry block. An optional current source location is
/// stamped onto every appended instruction until it is changed.
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    name: String,
    insts: Vec<InstData>,
    blocks: Vec<Block>,
    cursor: Option<BlockId>,
    loc: Option<SourceLoc>,
}

impl FunctionBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        FunctionBuilder {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Create a new empty block and select it for insertion.
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        self.cursor = Some(id);
        id
    }

    /// Move the insertion point to an existing block.
    pub fn select_block(&mut self, b: BlockId) {
        debug_assert!(b.index() < self.blocks.len());
        self.cursor = Some(b);
    }

    /// Set the source location stamped onto subsequent instructions.
    pub fn set_loc(&mut self, loc: Option<SourceLoc>) {
        self.loc = loc;
    }

    fn append(&mut self, inst: Instruction) -> Result<ValueId, IrError> {
        let Some(cursor) = self.cursor else {
            return Err(IrError::NoInsertBlock);
        };
        let block = &mut self.blocks[cursor.index()];
        if let Some(&last) = block.insts.last() {
            if self.insts[last.index()].inst.is_terminator() {
                return Err(IrError::TrailingInstruction(cursor));
            }
        }
        let id = ValueId(self.insts.len() as u32);
        self.insts.push(InstData {
            inst,
            loc: self.loc.clone(),
        });
        block.insts.push(id);
        Ok(id)
    }

    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_alloca(&mut self, ty: Ty) -> Result<ValueId, IrError> {
        self.append(Instruction::Alloca { ty })
    }

    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_load(&mut self, ptr: ValueId) -> Result<ValueId, IrError> {
        self.append(Instruction::Load { ptr })
    }

    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_store<V>(&mut self, value: V, ptr: ValueId) -> Result<ValueId, IrError>
    where
        V: Into<Operand>,
    {
        self.append(Instruction::Store {
            value: value.into(),
            ptr,
        })
    }

    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_binary_op<L, R>(&mut self, op: BinOp, lhs: L, rhs: R) -> Result<ValueId, IrError>
    where
        L: Into<Operand>,
        R: Into<Operand>,
    {
        self.append(Instruction::BinaryOp {
            op,
            lhs: lhs.into(),
            rhs: rhs.into(),
        })
    }

    /// Append an array index operation.
    ///
    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_index_access<I>(&mut self, base: ValueId, index: I) -> Result<ValueId, IrError>
    where
        I: Into<Operand>,
    {
        self.append(Instruction::GetElementPtr {
            base,
            index: index.into(),
        })
    }

    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_comparison<L, R>(
        &mut self,
        pred: Predicate,
        lhs: L,
        rhs: R,
    ) -> Result<ValueId, IrError>
    where
        L: Into<Operand>,
        R: Into<Operand>,
    {
        self.append(Instruction::ICmp {
            pred,
            lhs: lhs.into(),
            rhs: rhs.into(),
        })
    }

    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_call(&mut self, callee: &str, args: Vec<Operand>) -> Result<ValueId, IrError> {
        self.append(Instruction::Call {
            callee: callee.to_string(),
            args,
        })
    }

    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_cast<V>(&mut self, kind: CastKind, value: V) -> Result<ValueId, IrError>
    where
        V: Into<Operand>,
    {
        self.append(Instruction::Cast {
            kind,
            value: value.into(),
        })
    }

    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_br(&mut self, dest: BlockId) -> Result<ValueId, IrError> {
        self.append(Instruction::Br { dest })
    }

    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_cond_br<C>(
        &mut self,
        cond: C,
        then_dest: BlockId,
        else_dest: BlockId,
    ) -> Result<ValueId, IrError>
    where
        C: Into<Operand>,
    {
        self.append(Instruction::CondBr {
            cond: cond.into(),
            then_dest,
            else_dest,
        })
    }

    /// # Errors
    /// Fails when no block is selected or the block is already terminated.
    pub fn new_ret(&mut self, value: Option<Operand>) -> Result<ValueId, IrError> {
        self.append(Instruction::Ret { value })
    }

    /// Seal the function.
    ///
    /// # Errors
    /// Fails when the function has no blocks, a block lacks a terminator,
    /// or a branch targets a block that was never created.
    pub fn finish(self) -> Result<Function, IrError> {
        if self.blocks.is_empty() {
            return Err(IrError::EmptyFunction);
        }
        let num_blocks = self.blocks.len();
        for (i, block) in self.blocks.iter().enumerate() {
            let id = BlockId(i as u32);
            let Some(&last) = block.insts.last() else {
                return Err(IrError::MissingTerminator(id));
            };
            let term = &self.insts[last.index()].inst;
            if !term.is_terminator() {
                return Err(IrError::MissingTerminator(id));
            }
            let targets = match *term {
                Instruction::Br { dest } => vec![dest],
                Instruction::CondBr {
                    then_dest,
                    else_dest,
                    ..
                } => vec![then_dest, else_dest],
                _ => Vec::new(),
            };
            for target in targets {
                if target.index() >= num_blocks {
                    return Err(IrError::UnknownBlock(target));
                }
            }
        }
        Ok(Function {
            name: self.name,
            insts: self.insts,
            blocks: self.blocks,
        })
    }
}

/// A collection of functions analyzed one after another.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
}

impl Module {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            functions: Vec::new(),
        }
    }
}
