//! The SSA intermediate representation.
//!
//! A [`Module`] owns an ordered list of top-level user values: functions,
//! global variables and external declarations. Each [`Func`] owns its basic
//! blocks and an arena of instructions; instructions within a block form a
//! doubly linked list threaded through the arena, so ordered insertion and
//! erasure are O(1). A [`Value`] is a small copyable handle; a [`Use`] is an
//! `(instruction, operand slot)` pair. Use-list consistency is the central
//! invariant of this module: at every observable point, `uses(v)` equals the
//! multiset of operand slots that reference `v`.

use std::collections::HashMap;
use smallvec::SmallVec;
use crate::{Symbol, Idx};
use crate::logger::Logger;
use super::{IdxVec, IntTy, Size};
use super::ty::{Ty, TyExt, TyKind, make_int};

mk_id! {
  /// An interned constant in a module.
  ConstId(Debug("c")),
  /// A global variable in a module.
  GlobalId(Debug("g")),
  /// A function in a module.
  FuncId(Debug("f")),
  /// A basic block in a function.
  BlockId(Debug("bb")),
  /// An instruction in a function's arena.
  InstId(Debug("%")),
}

/// The external visibility class of a top-level value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Linkage {
  /// Visible to other translation units.
  External,
  /// Local to this translation unit; eliminable when unused.
  Internal,
  /// Local, and a candidate for inlining; eliminable when unused.
  Inline,
  /// Runs before `main` via the platform's init mechanism.
  GlobalCtor,
}

impl Linkage {
  /// Internal and inline values may be removed when nothing uses them.
  #[must_use] pub fn is_internal(self) -> bool {
    matches!(self, Linkage::Internal | Linkage::Inline)
  }
}

/// A handle to an SSA value. Cheap to copy; resolved against the module (for
/// constants, globals and functions) or the enclosing function (for arguments
/// and instructions).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
  /// An interned constant.
  Const(ConstId),
  /// A global variable (the value is its address).
  Global(GlobalId),
  /// A function (the value is its address).
  Func(FuncId),
  /// The n-th argument of the enclosing function.
  Arg(u32),
  /// The result of an instruction.
  Inst(InstId),
}

/// A use edge: operand slot `index` of instruction `user` references a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Use {
  /// The instruction holding the reference.
  pub user: InstId,
  /// The operand slot within `user`.
  pub index: u32,
}

/// Integer binary operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinOp {
  Add, Sub, Mul, UDiv, SDiv, URem, SRem,
  And, Or, Xor, Shl, LShr, AShr,
  Eq, Ne, ULt, SLt, ULe, SLe, UGt, SGt, UGe, SGe,
}

impl BinOp {
  /// Is this operator a division or remainder? These are the operations that
  /// trap at runtime and are therefore not folded on a zero divisor.
  #[must_use] pub fn is_div_rem(self) -> bool {
    matches!(self, BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem)
  }

  /// Is this operator a comparison (producing 0 or 1)?
  #[must_use] pub fn is_cmp(self) -> bool {
    matches!(self, BinOp::Eq | BinOp::Ne | BinOp::ULt | BinOp::SLt |
      BinOp::ULe | BinOp::SLe | BinOp::UGt | BinOp::SGt | BinOp::UGe | BinOp::SGe)
  }

  /// Apply the operator to two constants. All integer values are carried as
  /// `u32` in two's complement; arithmetic wraps. Returns `None` for division
  /// or remainder by zero, which must not be folded.
  #[must_use] pub fn apply(self, lhs: u32, rhs: u32) -> Option<u32> {
    let (sl, sr) = (lhs as i32, rhs as i32);
    Some(match self {
      BinOp::Add => lhs.wrapping_add(rhs),
      BinOp::Sub => lhs.wrapping_sub(rhs),
      BinOp::Mul => lhs.wrapping_mul(rhs),
      BinOp::UDiv => lhs.checked_div(rhs)?,
      BinOp::SDiv => sl.checked_div(sr)? as u32,
      BinOp::URem => lhs.checked_rem(rhs)?,
      BinOp::SRem => sl.checked_rem(sr)? as u32,
      BinOp::And => lhs & rhs,
      BinOp::Or => lhs | rhs,
      BinOp::Xor => lhs ^ rhs,
      BinOp::Shl => lhs.wrapping_shl(rhs),
      BinOp::LShr => lhs.wrapping_shr(rhs),
      BinOp::AShr => sl.wrapping_shr(rhs) as u32,
      BinOp::Eq => u32::from(lhs == rhs),
      BinOp::Ne => u32::from(lhs != rhs),
      BinOp::ULt => u32::from(lhs < rhs),
      BinOp::SLt => u32::from(sl < sr),
      BinOp::ULe => u32::from(lhs <= rhs),
      BinOp::SLe => u32::from(sl <= sr),
      BinOp::UGt => u32::from(lhs > rhs),
      BinOp::SGt => u32::from(sl > sr),
      BinOp::UGe => u32::from(lhs >= rhs),
      BinOp::SGe => u32::from(sl >= sr),
    })
  }

  /// A string representation used in the textual dump.
  #[must_use] pub fn to_str(self) -> &'static str {
    match self {
      BinOp::Add => "add", BinOp::Sub => "sub", BinOp::Mul => "mul",
      BinOp::UDiv => "udiv", BinOp::SDiv => "sdiv",
      BinOp::URem => "urem", BinOp::SRem => "srem",
      BinOp::And => "and", BinOp::Or => "or", BinOp::Xor => "xor",
      BinOp::Shl => "shl", BinOp::LShr => "lshr", BinOp::AShr => "ashr",
      BinOp::Eq => "eq", BinOp::Ne => "ne",
      BinOp::ULt => "ult", BinOp::SLt => "slt",
      BinOp::ULe => "ule", BinOp::SLe => "sle",
      BinOp::UGt => "ugt", BinOp::SGt => "sgt",
      BinOp::UGe => "uge", BinOp::SGe => "sge",
    }
  }
}

/// Integer unary operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
  /// Two's complement negation.
  Neg,
  /// Logical NOT: `x == 0`.
  LogicNot,
  /// Bitwise NOT.
  Not,
}

impl UnOp {
  /// Apply the operator to a constant, with wrapping semantics.
  #[must_use] pub fn apply(self, arg: u32) -> u32 {
    match self {
      UnOp::Neg => arg.wrapping_neg(),
      UnOp::LogicNot => u32::from(arg == 0),
      UnOp::Not => !arg,
    }
  }

  /// A string representation used in the textual dump.
  #[must_use] pub fn to_str(self) -> &'static str {
    match self {
      UnOp::Neg => "neg",
      UnOp::LogicNot => "lnot",
      UnOp::Not => "not",
    }
  }
}

/// How an `Access` instruction steps from its base pointer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
  /// Pointer arithmetic: step `index` elements of the pointee type.
  Ptr,
  /// Step into an aggregate: array element or struct field `index`.
  Elem,
}

/// The kinds of SSA instructions. Operand slots are ordered per variant; see
/// [`InstKind::operands`] for the slot numbering.
#[derive(Clone, Debug)]
pub enum InstKind {
  /// A stack slot of the instruction type's pointee.
  Alloca,
  /// An integer binary operation.
  Binary {
    /// The operator.
    op: BinOp,
    /// Left operand (slot 0).
    lhs: Value,
    /// Right operand (slot 1).
    rhs: Value,
  },
  /// An integer unary operation.
  Unary {
    /// The operator.
    op: UnOp,
    /// Operand (slot 0).
    arg: Value,
  },
  /// A value-preserving conversion to the instruction's type.
  Cast {
    /// Operand (slot 0).
    arg: Value,
  },
  /// A load through a pointer.
  Load {
    /// Address operand (slot 0).
    addr: Value,
  },
  /// A store through a pointer. Produces no value.
  Store {
    /// The stored value (slot 0).
    val: Value,
    /// Address operand (slot 1).
    addr: Value,
  },
  /// An element-pointer computation from a base pointer.
  Access {
    /// Pointer arithmetic or aggregate step.
    kind: AccessKind,
    /// Base pointer (slot 0).
    base: Value,
    /// Index (slot 1).
    index: Value,
  },
  /// A function call. The callee is slot 0, arguments follow.
  Call {
    /// The called value.
    callee: Value,
    /// Argument values.
    args: Vec<Value>,
  },
  /// A phi node merging one value per predecessor edge. The i-th incoming
  /// value occupies slot i; incoming blocks are not operands.
  Phi {
    /// `(incoming_block, value)` pairs.
    incoming: Vec<(BlockId, Value)>,
  },
  /// Unconditional branch. Terminator; has no operand slots.
  Jump {
    /// The branch target.
    target: BlockId,
  },
  /// Conditional branch on a boolean-valued operand (slot 0). Terminator.
  Branch {
    /// The condition.
    cond: Value,
    /// Target when the condition is nonzero.
    then_bb: BlockId,
    /// Target when the condition is zero.
    else_bb: BlockId,
  },
  /// Function return; the optional result is slot 0. Terminator.
  Ret {
    /// The returned value, absent for `void` functions.
    val: Option<Value>,
  },
}

impl InstKind {
  /// Is this instruction a control transfer? Exactly one terminator ends
  /// every block, and terminators appear nowhere else.
  #[must_use] pub fn is_terminator(&self) -> bool {
    matches!(self, InstKind::Jump { .. } | InstKind::Branch { .. } | InstKind::Ret { .. })
  }

  /// Does this instruction have an observable side effect? Side-effecting
  /// instructions are never removed by dead code elimination even when their
  /// results are unused.
  #[must_use] pub fn has_side_effect(&self) -> bool {
    matches!(self, InstKind::Store { .. } | InstKind::Call { .. }) || self.is_terminator()
  }

  /// The ordered operand list of this instruction.
  #[must_use] pub fn operands(&self) -> SmallVec<[Value; 2]> {
    match self {
      InstKind::Alloca | InstKind::Jump { .. } => SmallVec::new(),
      InstKind::Unary { arg, .. } | InstKind::Cast { arg } => smallvec::smallvec![*arg],
      InstKind::Binary { lhs, rhs, .. } => smallvec::smallvec![*lhs, *rhs],
      InstKind::Load { addr } => smallvec::smallvec![*addr],
      InstKind::Store { val, addr } => smallvec::smallvec![*val, *addr],
      InstKind::Access { base, index, .. } => smallvec::smallvec![*base, *index],
      InstKind::Call { callee, args } => {
        let mut v = SmallVec::with_capacity(1 + args.len());
        v.push(*callee);
        v.extend(args.iter().copied());
        v
      }
      InstKind::Phi { incoming } => incoming.iter().map(|&(_, v)| v).collect(),
      InstKind::Branch { cond, .. } => smallvec::smallvec![*cond],
      InstKind::Ret { val } => val.iter().copied().collect(),
    }
  }

  /// Mutable access to the operand at `index`. Panics on a bad slot.
  fn operand_mut(&mut self, index: u32) -> &mut Value {
    let i = index as usize;
    match self {
      InstKind::Unary { arg, .. } | InstKind::Cast { arg } if i == 0 => arg,
      InstKind::Binary { lhs, .. } if i == 0 => lhs,
      InstKind::Binary { rhs, .. } if i == 1 => rhs,
      InstKind::Load { addr } if i == 0 => addr,
      InstKind::Store { val, .. } if i == 0 => val,
      InstKind::Store { addr, .. } if i == 1 => addr,
      InstKind::Access { base, .. } if i == 0 => base,
      InstKind::Access { index, .. } if i == 1 => index,
      InstKind::Call { callee, .. } if i == 0 => callee,
      InstKind::Call { args, .. } => &mut args[i - 1],
      InstKind::Phi { incoming } => &mut incoming[i].1,
      InstKind::Branch { cond, .. } if i == 0 => cond,
      InstKind::Ret { val: Some(val) } if i == 0 => val,
      _ => panic!("operand slot {index} out of range"),
    }
  }

  /// The successor blocks of this instruction, if it is a terminator.
  #[must_use] pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
    match *self {
      InstKind::Jump { target } => smallvec::smallvec![target],
      InstKind::Branch { then_bb, else_bb, .. } => smallvec::smallvec![then_bb, else_bb],
      _ => SmallVec::new(),
    }
  }
}

/// An instruction in a function's arena, threaded into its block's list.
#[derive(Clone, Debug)]
pub struct Inst {
  /// The operation and its operands.
  pub kind: InstKind,
  /// The type of the instruction's result. `void` for stores and terminators.
  pub ty: Ty,
  /// The source position this instruction was lowered from.
  pub logger: Logger,
  /// The block this instruction currently belongs to.
  pub block: BlockId,
  prev: Option<InstId>,
  next: Option<InstId>,
  dead: bool,
}

/// A basic block: an ordered instruction list ended by one terminator.
#[derive(Clone, Debug, Default)]
pub struct Block {
  first: Option<InstId>,
  last: Option<InstId>,
  dead: bool,
}

/// A function, with or without a body. A function without blocks is a
/// declaration.
#[derive(Debug)]
pub struct Func {
  /// The function's symbol name.
  pub name: Symbol,
  /// The function type (params and return).
  pub ty: Ty,
  /// The visibility class.
  pub linkage: Linkage,
  /// The source position of the definition.
  pub logger: Logger,
  /// The basic blocks; the entry block is `bb0`. Erased blocks are
  /// tombstoned and skipped by [`Func::blocks`].
  blocks: IdxVec<BlockId, Block>,
  insts: IdxVec<InstId, Inst>,
  use_lists: HashMap<Value, Vec<Use>>,
  dom: Option<DomTree>,
  dead: bool,
}

/// An interned constant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstKind {
  /// An integer constant of the given integral type.
  Int(u32, IntTy),
  /// A string literal (NUL-terminated in the data section).
  Str(Symbol),
  /// An aggregate of element constants.
  Array(Vec<ConstId>),
  /// A zero initializer for the given number of bytes.
  Zero(u32),
}

/// A global variable definition or declaration.
#[derive(Debug)]
pub struct Global {
  /// The variable's symbol name.
  pub name: Symbol,
  /// The type of the variable (not of its address).
  pub ty: Ty,
  /// The visibility class.
  pub linkage: Linkage,
  /// The initializer, absent for external declarations.
  pub init: Option<ConstId>,
  /// The source position of the definition.
  pub logger: Logger,
  dead: bool,
}

impl Global {
  /// Create a global variable definition or (when `init` is `None`)
  /// declaration.
  #[must_use] pub fn new(
    name: Symbol, ty: Ty, linkage: Linkage, init: Option<ConstId>, logger: Logger,
  ) -> Self {
    Global { name, ty, linkage, init, logger, dead: false }
  }
}

/// A module: the compilation unit owning all globals, functions and interned
/// constants.
#[derive(Debug, Default)]
pub struct Module {
  /// The source file name this module was produced from.
  pub name: Symbol,
  consts: IdxVec<ConstId, (ConstKind, Ty)>,
  const_dedup: HashMap<ConstKind, ConstId>,
  globals: IdxVec<GlobalId, Global>,
  funcs: IdxVec<FuncId, Func>,
}

impl Module {
  /// Create an empty module for the given source file.
  #[must_use] pub fn new(name: Symbol) -> Self {
    Module { name, ..Default::default() }
  }

  /// Intern an integer constant, deduplicated per module.
  pub fn make_int(&mut self, val: u32, ity: IntTy) -> Value {
    let kind = ConstKind::Int(ity.truncate(val), ity);
    Value::Const(self.intern_const(kind, make_int(ity)))
  }

  /// Intern an `i32` constant.
  pub fn make_i32(&mut self, val: u32) -> Value {
    self.make_int(val, IntTy::Int(Size::S32))
  }

  /// Intern a string constant.
  pub fn make_str(&mut self, s: Symbol) -> Value {
    let ty = std::rc::Rc::new(TyKind::Ptr(make_int(IntTy::Int(Size::S8))));
    Value::Const(self.intern_const(ConstKind::Str(s), ty))
  }

  /// Intern an aggregate constant with the given element constants.
  pub fn make_array(&mut self, elems: Vec<ConstId>, ty: Ty) -> Value {
    Value::Const(self.intern_const(ConstKind::Array(elems), ty))
  }

  /// Intern a zero initializer for `ty`.
  pub fn make_zero(&mut self, ty: Ty) -> Value {
    Value::Const(self.intern_const(ConstKind::Zero(ty.size()), ty))
  }

  fn intern_const(&mut self, kind: ConstKind, ty: Ty) -> ConstId {
    if let Some(&id) = self.const_dedup.get(&kind) { return id }
    let id = self.consts.push((kind.clone(), ty));
    self.const_dedup.insert(kind, id);
    id
  }

  /// The kind and type of an interned constant.
  #[must_use] pub fn const_data(&self, id: ConstId) -> &(ConstKind, Ty) { &self.consts[id] }

  /// If `v` is an integer constant, return its raw value.
  #[must_use] pub fn const_int_value(&self, v: Value) -> Option<u32> {
    if let Value::Const(id) = v {
      if let (ConstKind::Int(n, _), _) = self.consts[id] { return Some(n) }
    }
    None
  }

  /// Append a global variable to the module's top-level value list.
  pub fn add_global(&mut self, g: Global) -> GlobalId { self.globals.push(g) }

  /// Append a function to the module's top-level value list.
  pub fn add_func(&mut self, f: Func) -> FuncId { self.funcs.push(f) }

  /// The global with the given id. Panics if it was erased.
  #[must_use] pub fn global(&self, id: GlobalId) -> &Global {
    let g = &self.globals[id];
    assert!(!g.dead, "use of erased global");
    g
  }

  /// The function with the given id. Panics if it was erased.
  #[must_use] pub fn func(&self, id: FuncId) -> &Func {
    let f = &self.funcs[id];
    assert!(!f.dead, "use of erased function");
    f
  }

  /// Mutable access to the function with the given id.
  pub fn func_mut(&mut self, id: FuncId) -> &mut Func {
    let f = &mut self.funcs[id];
    assert!(!f.dead, "use of erased function");
    f
  }

  /// Iterator over the live globals, in insertion order.
  pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
    self.globals.enum_iter().filter(|(_, g)| !g.dead)
  }

  /// Iterator over the live functions, in insertion order.
  pub fn funcs(&self) -> impl Iterator<Item = (FuncId, &Func)> {
    self.funcs.enum_iter().filter(|(_, f)| !f.dead)
  }

  /// The ids of all live functions, for traversals that mutate the module.
  #[must_use] pub fn func_ids(&self) -> Vec<FuncId> {
    self.funcs().map(|(id, _)| id).collect()
  }

  /// Erase a global from the module. The global must have no uses.
  pub fn erase_global(&mut self, id: GlobalId) {
    debug_assert!(!self.value_used(Value::Global(id)), "erasing a used global");
    self.globals[id].dead = true;
  }

  /// Erase a function from the module. The function must have no uses; its
  /// body (and every use its instructions held) is dropped with it.
  pub fn erase_func(&mut self, id: FuncId) {
    debug_assert!(!self.value_used(Value::Func(id)), "erasing a used function");
    let f = &mut self.funcs[id];
    f.dead = true;
    f.blocks = IdxVec::new();
    f.insts = IdxVec::new();
    f.use_lists = HashMap::new();
  }

  /// Is `v` referenced by any operand slot of any live function? Module-level
  /// values (globals, functions, constants) may be used from any function;
  /// this sums the per-function use lists.
  #[must_use] pub fn value_used(&self, v: Value) -> bool {
    self.funcs().any(|(_, f)| !f.uses(v).is_empty())
  }

  /// The type of a module-level value. Arguments and instructions are
  /// resolved by [`Func::value_ty`] instead.
  #[must_use] pub fn value_ty(&self, f: &Func, v: Value) -> Ty {
    match v {
      Value::Const(id) => self.consts[id].1.clone(),
      // the value of a global is its address
      Value::Global(id) => std::rc::Rc::new(TyKind::Ptr(self.globals[id].ty.clone())),
      Value::Func(id) => self.funcs[id].ty.clone(),
      Value::Arg(_) | Value::Inst(_) => f.value_ty(self, v),
    }
  }
}

impl Func {
  /// Create a function with no body (a declaration).
  #[must_use] pub fn new(name: Symbol, ty: Ty, linkage: Linkage, logger: Logger) -> Self {
    Func {
      name, ty, linkage, logger,
      blocks: IdxVec::new(),
      insts: IdxVec::new(),
      use_lists: HashMap::new(),
      dom: None,
      dead: false,
    }
  }

  /// Does this function have a body?
  #[must_use] pub fn is_defined(&self) -> bool { !self.blocks.is_empty() }

  /// The number of live blocks.
  #[must_use] pub fn num_blocks(&self) -> usize {
    self.blocks.0.iter().filter(|b| !b.dead).count()
  }

  /// The number of parameters, from the function type.
  #[must_use] pub fn num_params(&self) -> usize {
    self.ty.func_sig().expect("function type").0.len()
  }

  /// The type of an argument or instruction value of this function.
  #[must_use] pub fn value_ty(&self, m: &Module, v: Value) -> Ty {
    match v {
      Value::Arg(n) => self.ty.func_sig().expect("function type").0[n as usize].clone(),
      Value::Inst(id) => self.insts[id].ty.clone(),
      _ => m.value_ty(self, v),
    }
  }

  /// Start a new, empty basic block. The first block created is the entry.
  pub fn new_block(&mut self) -> BlockId {
    self.dom = None;
    self.blocks.push(Block::default())
  }

  /// Iterator over the live blocks, in creation order (entry first).
  pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
    self.blocks.enum_iter().filter(|(_, b)| !b.dead).map(|(id, _)| id)
  }

  /// The entry block. Panics on a declaration.
  #[must_use] pub fn entry(&self) -> BlockId {
    assert!(self.is_defined(), "declaration has no entry block");
    BlockId(0)
  }

  /// Has this instruction been erased? Erased arena slots are tombstones;
  /// worklist-style passes use this to skip stale entries.
  #[must_use] pub fn is_erased(&self, id: InstId) -> bool { self.insts[id].dead }

  /// The instruction with the given id. Panics if it was erased.
  #[must_use] pub fn inst(&self, id: InstId) -> &Inst {
    let i = &self.insts[id];
    assert!(!i.dead, "use of erased instruction");
    i
  }

  /// The ordered instructions of a block.
  pub fn block_insts(&self, b: BlockId) -> InstIter<'_> {
    InstIter { func: self, next: self.blocks[b].first }
  }

  /// The terminator of a block, which is always its last instruction.
  #[must_use] pub fn terminator(&self, b: BlockId) -> Option<InstId> {
    let last = self.blocks[b].last?;
    if self.insts[last].kind.is_terminator() { Some(last) } else { None }
  }

  /// The successor blocks of `b`, from its terminator.
  #[must_use] pub fn successors(&self, b: BlockId) -> SmallVec<[BlockId; 2]> {
    match self.terminator(b) {
      Some(t) => self.insts[t].kind.successors(),
      None => SmallVec::new(),
    }
  }

  /// The predecessors of every block, computed from terminators. Edge order
  /// follows block creation order, so the result is deterministic.
  #[must_use] pub fn predecessors(&self) -> IdxVec<BlockId, SmallVec<[BlockId; 4]>> {
    let mut preds: IdxVec<BlockId, SmallVec<[BlockId; 4]>> = IdxVec::from_default(self.blocks.len());
    for b in self.blocks() {
      for succ in self.successors(b) { preds[succ].push(b) }
    }
    preds
  }

  /// The use list of `v`: every operand slot within this function that
  /// references it, in the order the references were installed.
  #[must_use] pub fn uses(&self, v: Value) -> &[Use] {
    self.use_lists.get(&v).map_or(&[], Vec::as_slice)
  }

  fn add_use(&mut self, v: Value, u: Use) {
    self.use_lists.entry(v).or_default().push(u);
  }

  fn remove_use(&mut self, v: Value, u: Use) {
    let list = self.use_lists.get_mut(&v).expect("use list out of sync");
    let pos = list.iter().position(|x| *x == u).expect("use list out of sync");
    list.remove(pos);
  }

  /// Append a new instruction to the end of block `b`. If the block already
  /// has a terminator the caller is violating the single-terminator
  /// invariant, which is checked here.
  pub fn push_inst(&mut self, b: BlockId, kind: InstKind, ty: Ty, logger: Logger) -> InstId {
    assert!(self.terminator(b).is_none(), "block already terminated");
    if kind.is_terminator() { self.dom = None }
    let id = self.insts.push(Inst {
      kind, ty, logger, block: b,
      prev: self.blocks[b].last, next: None, dead: false,
    });
    match self.blocks[b].last {
      Some(last) => self.insts[last].next = Some(id),
      None => self.blocks[b].first = Some(id),
    }
    self.blocks[b].last = Some(id);
    self.install_uses(id);
    id
  }

  /// Insert a new instruction before `at`, in the same block.
  pub fn insert_before(&mut self, at: InstId, kind: InstKind, ty: Ty, logger: Logger) -> InstId {
    assert!(!kind.is_terminator(), "terminators only end blocks");
    let b = self.insts[at].block;
    let prev = self.insts[at].prev;
    let id = self.insts.push(Inst { kind, ty, logger, block: b, prev, next: Some(at), dead: false });
    self.insts[at].prev = Some(id);
    match prev {
      Some(p) => self.insts[p].next = Some(id),
      None => self.blocks[b].first = Some(id),
    }
    self.install_uses(id);
    id
  }

  /// Insert a new instruction after `at`, in the same block. `at` must not
  /// be the block's terminator.
  pub fn insert_after(&mut self, at: InstId, kind: InstKind, ty: Ty, logger: Logger) -> InstId {
    assert!(!self.insts[at].kind.is_terminator(), "cannot insert after a terminator");
    let b = self.insts[at].block;
    let next = self.insts[at].next;
    let id = self.insts.push(Inst { kind, ty, logger, block: b, prev: Some(at), next, dead: false });
    self.insts[at].next = Some(id);
    match next {
      Some(n) => self.insts[n].prev = Some(id),
      None => self.blocks[b].last = Some(id),
    }
    self.install_uses(id);
    id
  }

  fn install_uses(&mut self, id: InstId) {
    for (i, v) in self.insts[id].kind.operands().into_iter().enumerate() {
      self.add_use(v, Use { user: id, index: i as u32 });
    }
  }

  /// Erase an instruction: detach its operand uses, unlink it from its block
  /// and tombstone the arena slot. The instruction's own value must be
  /// unused.
  pub fn erase(&mut self, id: InstId) {
    assert!(self.uses(Value::Inst(id)).is_empty(), "erasing a used instruction");
    for (i, v) in self.insts[id].kind.operands().into_iter().enumerate() {
      self.remove_use(v, Use { user: id, index: i as u32 });
    }
    let Inst { prev, next, block, ref kind, .. } = self.insts[id];
    if kind.is_terminator() { self.dom = None }
    match prev {
      Some(p) => self.insts[p].next = next,
      None => self.blocks[block].first = next,
    }
    match next {
      Some(n) => self.insts[n].prev = prev,
      None => self.blocks[block].last = prev,
    }
    self.insts[id].dead = true;
  }

  /// Replace the operand at slot `index` of `user`: the old use edge is
  /// removed and the new one installed atomically.
  pub fn set_operand(&mut self, user: InstId, index: u32, v: Value) {
    let old = *self.insts[user].kind.operand_mut(index);
    if old == v { return }
    self.remove_use(old, Use { user, index });
    *self.insts[user].kind.operand_mut(index) = v;
    self.add_use(v, Use { user, index });
  }

  /// Rewrite every use of `old` to reference `new`. After this call
  /// `uses(old)` is empty and `old` is safely removable.
  pub fn replace_all_uses_with(&mut self, old: Value, new: Value) {
    assert_ne!(old, new, "self-replacement would drop uses");
    let uses = self.use_lists.remove(&old).unwrap_or_default();
    for u in &uses {
      *self.insts[u.user].kind.operand_mut(u.index) = new;
    }
    self.use_lists.entry(new).or_default().extend(uses);
  }

  /// Replace the terminator of `b` with a new one, preserving the
  /// exactly-one-terminator invariant at every observable point.
  pub fn set_terminator(&mut self, b: BlockId, kind: InstKind, logger: Logger) -> InstId {
    assert!(kind.is_terminator(), "not a terminator");
    if let Some(t) = self.terminator(b) { self.erase(t) }
    self.push_inst(b, kind, super::ty::make_void(), logger)
  }

  /// Remove the incoming phi entries for edge `pred -> b`, as part of
  /// deleting that CFG edge.
  pub fn remove_phi_incoming(&mut self, b: BlockId, pred: BlockId) {
    let phis: Vec<InstId> = self.block_insts(b)
      .filter(|&i| matches!(self.insts[i].kind, InstKind::Phi { .. }))
      .collect();
    for id in phis {
      // detach all operand uses, filter the entries, reinstall
      for (i, v) in self.insts[id].kind.operands().into_iter().enumerate() {
        self.remove_use(v, Use { user: id, index: i as u32 });
      }
      if let InstKind::Phi { incoming } = &mut self.insts[id].kind {
        incoming.retain(|&(bb, _)| bb != pred);
      }
      self.install_uses(id);
    }
  }

  /// Split block `b` after instruction `at`: everything following `at`
  /// moves, in order, into a fresh block, and phi entries in the moved
  /// terminator's successors are retargeted from `b` to the new block.
  /// `b` is left without a terminator; the caller must supply one before the
  /// next observable point. Use lists are unaffected (operand slots do not
  /// move).
  pub fn split_block(&mut self, b: BlockId, at: InstId) -> BlockId {
    assert_eq!(self.insts[at].block, b, "split point not in block");
    let new_bb = self.new_block();
    let mut cur = self.insts[at].next;
    self.insts[at].next = None;
    let old_last = std::mem::replace(&mut self.blocks[b].last, Some(at));
    self.blocks[new_bb].first = cur;
    self.blocks[new_bb].last = if cur.is_some() { old_last } else { None };
    if let Some(first) = cur { self.insts[first].prev = None }
    while let Some(i) = cur {
      self.insts[i].block = new_bb;
      cur = self.insts[i].next;
    }
    for succ in self.successors(new_bb) {
      self.retarget_phi_incoming(succ, b, new_bb);
    }
    self.dom = None;
    new_bb
  }

  /// Rewrite phi entries in `b` whose incoming block is `from` to come from
  /// `to` instead. Incoming values (and hence use lists) are unchanged.
  pub fn retarget_phi_incoming(&mut self, b: BlockId, from: BlockId, to: BlockId) {
    let phis: Vec<InstId> = self.block_insts(b)
      .filter(|&i| matches!(self.insts[i].kind, InstKind::Phi { .. }))
      .collect();
    for id in phis {
      if let InstKind::Phi { incoming } = &mut self.insts[id].kind {
        for (bb, _) in incoming {
          if *bb == from { *bb = to }
        }
      }
    }
  }

  /// Erase a block and every instruction in it. The block must be
  /// unreachable: no live terminator may target it.
  pub fn erase_block(&mut self, b: BlockId) {
    let insts: Vec<InstId> = self.block_insts(b).collect();
    // drop uses of the block's instructions by the block's own instructions
    // in reverse order; anything still used outside the block is a caller bug
    for &id in insts.iter().rev() {
      let users: Vec<Use> = self.uses(Value::Inst(id)).to_vec();
      for u in users {
        assert!(insts.contains(&u.user), "erasing a block whose values are used elsewhere");
      }
    }
    for &id in insts.iter().rev() {
      self.use_lists.remove(&Value::Inst(id));
      self.erase(id);
    }
    self.blocks[b].dead = true;
    self.dom = None;
  }

  /// Does value `a` dominate instruction `b`? Constants, globals, functions
  /// and arguments dominate everything; an instruction dominates `b` if its
  /// block strictly dominates `b`'s block, or both share a block and `a`
  /// precedes `b` in the instruction list.
  pub fn dominates(&mut self, a: Value, b: InstId) -> bool {
    let Value::Inst(a) = a else { return true };
    let (ba, bb) = (self.insts[a].block, self.insts[b].block);
    if ba == bb {
      // walk forward from `a`; instruction lists are short enough
      let mut cur = self.insts[a].next;
      while let Some(i) = cur {
        if i == b { return true }
        cur = self.insts[i].next;
      }
      return false
    }
    self.dom_tree().dominates(ba, bb)
  }

  /// The dominator tree, built lazily and invalidated by any CFG edit.
  pub fn dom_tree(&mut self) -> &DomTree {
    if self.dom.is_none() {
      self.dom = Some(DomTree::build(self));
    }
    self.dom.as_ref().expect("just built")
  }

  /// Check the structural invariants of this function: exact use lists and
  /// exactly one terminator per block, appearing last. Panics on violation;
  /// used by tests and debug assertions at pass boundaries.
  pub fn verify(&self) {
    let mut expected: HashMap<Value, Vec<Use>> = HashMap::new();
    for b in self.blocks() {
      let insts: Vec<InstId> = self.block_insts(b).collect();
      for (n, &id) in insts.iter().enumerate() {
        let inst = &self.insts[id];
        assert_eq!(inst.block, b, "instruction block link out of sync");
        assert_eq!(inst.kind.is_terminator(), n + 1 == insts.len(),
          "@{}: terminator must be exactly the last instruction", self.name);
        for (i, v) in inst.kind.operands().into_iter().enumerate() {
          expected.entry(v).or_default().push(Use { user: id, index: i as u32 });
        }
      }
    }
    for (v, uses) in &expected {
      let mut actual = self.uses(*v).to_vec();
      let mut want = uses.clone();
      let key = |u: &Use| (u.user, u.index);
      actual.sort_by_key(key);
      want.sort_by_key(key);
      assert_eq!(actual, want, "use list of {v:?} out of sync");
    }
    for (v, uses) in &self.use_lists {
      if !uses.is_empty() {
        assert!(expected.contains_key(v), "stale use list for {v:?}");
      }
    }
  }
}

/// Iterator over the live instructions of one block, in list order.
#[derive(Clone, Debug)]
pub struct InstIter<'a> {
  func: &'a Func,
  next: Option<InstId>,
}

impl Iterator for InstIter<'_> {
  type Item = InstId;
  fn next(&mut self) -> Option<InstId> {
    let id = self.next?;
    self.next = self.func.insts[id].next;
    Some(id)
  }
}

/// A dominator tree over a function's CFG, built by iterative data-flow on
/// reverse post-order (Cooper-Harvey-Kennedy).
#[derive(Clone, Debug)]
pub struct DomTree {
  /// Immediate dominator of each block; the entry is its own idom. `None`
  /// for unreachable or erased blocks.
  idom: IdxVec<BlockId, Option<BlockId>>,
  /// Position of each block in reverse post-order.
  rpo_index: IdxVec<BlockId, u32>,
}

impl DomTree {
  fn build(f: &Func) -> DomTree {
    let n = f.blocks.len();
    // post-order traversal from the entry
    let mut post: Vec<BlockId> = Vec::with_capacity(n);
    let mut visited = vec![false; n];
    let mut stack: Vec<(BlockId, SmallVec<[BlockId; 2]>)> = Vec::new();
    if f.is_defined() {
      let entry = f.entry();
      visited[entry.into_usize()] = true;
      stack.push((entry, f.successors(entry)));
      loop {
        let next = match stack.last_mut() {
          Some((_, succs)) => succs.pop(),
          None => break,
        };
        match next {
          Some(s) => {
            if !std::mem::replace(&mut visited[s.into_usize()], true) {
              let succs = f.successors(s);
              stack.push((s, succs));
            }
          }
          None => {
            let (b, _) = stack.pop().expect("non-empty");
            post.push(b);
          }
        }
      }
    }
    let mut rpo_index = IdxVec::from(vec![u32::MAX; n]);
    for (i, &b) in post.iter().rev().enumerate() {
      rpo_index[b] = i as u32;
    }
    let preds = f.predecessors();
    let mut idom: IdxVec<BlockId, Option<BlockId>> = IdxVec::from(vec![None; n]);
    if let Some(&entry) = post.last() {
      idom[entry] = Some(entry);
      let mut changed = true;
      while changed {
        changed = false;
        for &b in post.iter().rev().skip(1) {
          let mut new_idom: Option<BlockId> = None;
          for &p in &preds[b] {
            if idom[p].is_none() { continue }
            new_idom = Some(match new_idom {
              None => p,
              Some(cur) => Self::intersect(&idom, &rpo_index, cur, p),
            });
          }
          if new_idom.is_some() && idom[b] != new_idom {
            idom[b] = new_idom;
            changed = true;
          }
        }
      }
    }
    DomTree { idom, rpo_index }
  }

  fn intersect(
    idom: &IdxVec<BlockId, Option<BlockId>>,
    rpo: &IdxVec<BlockId, u32>,
    mut a: BlockId, mut b: BlockId,
  ) -> BlockId {
    while a != b {
      while rpo[a] > rpo[b] { a = idom[a].expect("processed") }
      while rpo[b] > rpo[a] { b = idom[b].expect("processed") }
    }
    a
  }

  /// Does block `a` dominate block `b`? Reflexive.
  #[must_use] pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
    let mut cur = b;
    loop {
      if cur == a { return true }
      match self.idom[cur] {
        Some(up) if up != cur => cur = up,
        _ => return false,
      }
    }
  }

  /// The immediate dominator of `b`, or `None` for the entry and
  /// unreachable blocks.
  #[must_use] pub fn idom(&self, b: BlockId) -> Option<BlockId> {
    match self.idom[b] {
      Some(up) if up != b => Some(up),
      _ => None,
    }
  }
}

// ---------------------------------------------------------------------------
// textual dump

impl Module {
  /// Write the stable textual form of this module, as produced by
  /// `mmcc --emit-ir`.
  pub fn dump(&self, w: &mut impl std::fmt::Write) -> std::fmt::Result {
    for (_, g) in self.globals() {
      write!(w, "global @{} : {} [{}]", g.name, g.ty, linkage_str(g.linkage))?;
      match g.init {
        Some(init) => writeln!(w, " = {}", self.dump_const(init))?,
        None => writeln!(w)?,
      }
    }
    for (_, f) in self.funcs() {
      self.dump_func(f, w)?;
    }
    Ok(())
  }

  fn dump_const(&self, id: ConstId) -> String {
    match &self.consts[id].0 {
      ConstKind::Int(n, ity) =>
        if ity.signed() { format!("{}", *n as i32) } else { format!("{n}") },
      ConstKind::Str(s) => format!("{:?}", s.as_str()),
      ConstKind::Array(elems) => {
        let mut out = String::from("{");
        for (i, &e) in elems.iter().enumerate() {
          if i != 0 { out.push_str(", ") }
          out.push_str(&self.dump_const(e));
        }
        out.push('}');
        out
      }
      ConstKind::Zero(_) => "zeroinit".into(),
    }
  }

  fn dump_value(&self, names: &HashMap<InstId, u32>, v: Value) -> String {
    match v {
      Value::Const(id) => self.dump_const(id),
      Value::Global(id) => format!("@{}", self.globals[id].name),
      Value::Func(id) => format!("@{}", self.funcs[id].name),
      Value::Arg(n) => format!("${n}"),
      Value::Inst(id) => format!("%{}", names[&id]),
    }
  }

  fn dump_func(&self, f: &Func, w: &mut impl std::fmt::Write) -> std::fmt::Result {
    let (params, ret) = f.ty.func_sig().expect("function type");
    write!(w, "fn @{}(", f.name)?;
    for (i, p) in params.iter().enumerate() {
      if i != 0 { write!(w, ", ")? }
      write!(w, "${i} : {p}")?;
    }
    write!(w, ") : {ret} [{}]", linkage_str(f.linkage))?;
    if !f.is_defined() { return writeln!(w) }
    writeln!(w, " {{")?;
    // number the instructions that produce values, in block order
    let mut names = HashMap::new();
    let mut next = 0;
    for b in f.blocks() {
      for i in f.block_insts(b) {
        if !f.inst(i).ty.is_void() {
          names.insert(i, next);
          next += 1;
        }
      }
    }
    for b in f.blocks() {
      writeln!(w, "bb{}:", b.0)?;
      for i in f.block_insts(b) {
        let inst = f.inst(i);
        write!(w, "  ")?;
        if let Some(n) = names.get(&i) {
          write!(w, "%{n} = ")?;
        }
        self.dump_inst(&names, inst, w)?;
        writeln!(w)?;
      }
    }
    writeln!(w, "}}")
  }

  fn dump_inst(
    &self, names: &HashMap<InstId, u32>, inst: &Inst,
    w: &mut impl std::fmt::Write,
  ) -> std::fmt::Result {
    let v = |v| self.dump_value(names, v);
    match &inst.kind {
      InstKind::Alloca => write!(w, "alloca {}", inst.ty),
      InstKind::Binary { op, lhs, rhs } =>
        write!(w, "{} {}, {}", op.to_str(), v(*lhs), v(*rhs)),
      InstKind::Unary { op, arg } => write!(w, "{} {}", op.to_str(), v(*arg)),
      InstKind::Cast { arg } => write!(w, "cast {} to {}", v(*arg), inst.ty),
      InstKind::Load { addr } => write!(w, "load {}", v(*addr)),
      InstKind::Store { val, addr } => write!(w, "store {}, {}", v(*val), v(*addr)),
      InstKind::Access { kind, base, index } => {
        let k = match kind { AccessKind::Ptr => "ptr", AccessKind::Elem => "elem" };
        write!(w, "access {} {}, {}", k, v(*base), v(*index))
      }
      InstKind::Call { callee, args } => {
        write!(w, "call {}(", v(*callee))?;
        for (i, a) in args.iter().enumerate() {
          if i != 0 { write!(w, ", ")? }
          write!(w, "{}", v(*a))?;
        }
        write!(w, ")")
      }
      InstKind::Phi { incoming } => {
        write!(w, "phi ")?;
        for (i, (b, val)) in incoming.iter().enumerate() {
          if i != 0 { write!(w, ", ")? }
          write!(w, "[bb{}: {}]", b.0, v(*val))?;
        }
        Ok(())
      }
      InstKind::Jump { target } => write!(w, "jump bb{}", target.0),
      InstKind::Branch { cond, then_bb, else_bb } =>
        write!(w, "branch {}, bb{}, bb{}", v(*cond), then_bb.0, else_bb.0),
      InstKind::Ret { val } => match val {
        Some(x) => write!(w, "ret {}", v(*x)),
        None => write!(w, "ret"),
      },
    }
  }
}

fn linkage_str(l: Linkage) -> &'static str {
  match l {
    Linkage::External => "external",
    Linkage::Internal => "internal",
    Linkage::Inline => "inline",
    Linkage::GlobalCtor => "ctor",
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::intern;
  use crate::types::ty::{make_i32, make_void};
  use std::rc::Rc;

  fn test_func(m: &mut Module) -> FuncId {
    let log = Logger::none(intern("test"));
    let fty: Ty = Rc::new(TyKind::Func(vec![make_i32()], make_i32()));
    m.add_func(Func::new(intern("f"), fty, Linkage::External, log))
  }

  #[test]
  fn use_lists_track_edits() {
    let mut m = Module::new(intern("test"));
    let log = Logger::none(intern("test"));
    let f = test_func(&mut m);
    let one = m.make_i32(1);
    let func = m.func_mut(f);
    let bb = func.new_block();
    let a = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Add, lhs: Value::Arg(0), rhs: one }, make_i32(), log);
    let b = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Mul, lhs: Value::Inst(a), rhs: Value::Inst(a) },
      make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(b)) }, log);
    assert_eq!(func.uses(Value::Inst(a)).len(), 2);
    assert_eq!(func.uses(Value::Arg(0)).len(), 1);
    func.verify();

    // set_operand atomically moves the use edge
    func.set_operand(b, 1, one);
    assert_eq!(func.uses(Value::Inst(a)).len(), 1);
    assert_eq!(func.uses(one).len(), 2);
    func.verify();

    // replace_all_uses_with empties the old list
    func.replace_all_uses_with(Value::Inst(a), Value::Arg(0));
    assert!(func.uses(Value::Inst(a)).is_empty());
    assert_eq!(func.uses(Value::Arg(0)).len(), 2);
    func.verify();

    // a is now unused; erase detaches its operand uses
    func.erase(a);
    assert_eq!(func.uses(Value::Arg(0)).len(), 1);
    func.verify();
  }

  #[test]
  #[should_panic(expected = "block already terminated")]
  fn one_terminator_per_block() {
    let mut m = Module::new(intern("test"));
    let log = Logger::none(intern("test"));
    let f = test_func(&mut m);
    let func = m.func_mut(f);
    let bb = func.new_block();
    func.push_inst(bb, InstKind::Ret { val: None }, make_void(), log);
    func.push_inst(bb, InstKind::Ret { val: None }, make_void(), log);
  }

  #[test]
  fn dominators_on_diamond() {
    let mut m = Module::new(intern("test"));
    let log = Logger::none(intern("test"));
    let f = test_func(&mut m);
    let func = m.func_mut(f);
    let entry = func.new_block();
    let then_bb = func.new_block();
    let else_bb = func.new_block();
    let join = func.new_block();
    func.set_terminator(entry,
      InstKind::Branch { cond: Value::Arg(0), then_bb, else_bb }, log);
    func.set_terminator(then_bb, InstKind::Jump { target: join }, log);
    func.set_terminator(else_bb, InstKind::Jump { target: join }, log);
    func.set_terminator(join, InstKind::Ret { val: None }, log);
    let dom = func.dom_tree();
    assert!(dom.dominates(entry, join));
    assert!(!dom.dominates(then_bb, join));
    assert_eq!(dom.idom(join), Some(entry));
  }

  #[test]
  fn constants_are_deduplicated() {
    let mut m = Module::new(intern("test"));
    assert_eq!(m.make_i32(42), m.make_i32(42));
    assert_ne!(m.make_i32(42), m.make_i32(43));
    // same bits, different type: distinct constants
    assert_ne!(m.make_i32(1), m.make_int(1, IntTy::UInt(Size::S32)));
  }

  #[test]
  fn phi_incoming_removal() {
    let mut m = Module::new(intern("test"));
    let log = Logger::none(intern("test"));
    let f = test_func(&mut m);
    let zero = m.make_i32(0);
    let one = m.make_i32(1);
    let func = m.func_mut(f);
    let entry = func.new_block();
    let a = func.new_block();
    let b = func.new_block();
    let join = func.new_block();
    func.set_terminator(entry, InstKind::Branch { cond: Value::Arg(0), then_bb: a, else_bb: b }, log);
    func.set_terminator(a, InstKind::Jump { target: join }, log);
    func.set_terminator(b, InstKind::Jump { target: join }, log);
    let phi = func.push_inst(join,
      InstKind::Phi { incoming: vec![(a, zero), (b, one)] }, make_i32(), log);
    func.set_terminator(join, InstKind::Ret { val: Some(Value::Inst(phi)) }, log);
    func.verify();
    func.remove_phi_incoming(join, b);
    assert_eq!(func.uses(one).len(), 0);
    assert_eq!(func.uses(zero).len(), 1);
    func.verify();
  }
}
