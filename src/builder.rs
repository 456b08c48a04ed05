//! The IR builder.
//!
//! A thin facade used by AST lowering to construct SSA. It maintains an
//! insertion point (current function and block, appending at the end) and
//! offers typed constructors that perform the source language's implicit
//! numeric promotions. The builder is the only component that mints new SSA
//! values during lowering.

use crate::logger::Logger;
use crate::types::{IntTy, Size};
use crate::types::ty::{Ty, TyExt, TyKind, make_int, make_void, make_ptr};
use crate::types::ir::{
  AccessKind, BinOp, BlockId, FuncId, InstId, InstKind, Module, UnOp, Value,
};

/// SSA construction state for AST lowering.
#[derive(Debug)]
pub struct Builder {
  /// The module under construction.
  pub module: Module,
  cur_func: Option<FuncId>,
  cur_block: Option<BlockId>,
  logger: Logger,
}

impl Builder {
  /// Create a builder for a fresh module named after the source file.
  #[must_use] pub fn new(file: crate::Symbol) -> Self {
    Builder {
      module: Module::new(file),
      cur_func: None,
      cur_block: None,
      logger: Logger::none(file),
    }
  }

  /// Finish construction, yielding the module.
  #[must_use] pub fn finish(self) -> Module { self.module }

  /// Set the source position attached to subsequently created instructions.
  pub fn set_logger(&mut self, logger: Logger) { self.logger = logger }

  /// The logger for the current source position.
  #[must_use] pub fn logger(&self) -> Logger { self.logger }

  /// Point subsequent instruction creation at the end of `block`.
  pub fn set_insert_point(&mut self, func: FuncId, block: BlockId) {
    self.cur_func = Some(func);
    self.cur_block = Some(block);
  }

  /// The current function. Panics outside function lowering.
  #[must_use] pub fn cur_func(&self) -> FuncId { self.cur_func.expect("no insertion point") }

  /// The current block. Panics outside function lowering.
  #[must_use] pub fn cur_block(&self) -> BlockId { self.cur_block.expect("no insertion point") }

  /// Create a new block in the current function (without moving the
  /// insertion point).
  pub fn new_block(&mut self) -> BlockId {
    let f = self.cur_func();
    self.module.func_mut(f).new_block()
  }

  /// Is the current block missing a terminator? Lowering uses this to decide
  /// whether a fallthrough jump is needed.
  #[must_use] pub fn block_open(&self) -> bool {
    self.module.func(self.cur_func()).terminator(self.cur_block()).is_none()
  }

  fn push(&mut self, kind: InstKind, ty: Ty) -> Value {
    let (f, b) = (self.cur_func(), self.cur_block());
    let logger = self.logger;
    Value::Inst(self.module.func_mut(f).push_inst(b, kind, ty, logger))
  }

  /// The type of `v` in the current function.
  #[must_use] pub fn value_ty(&self, v: Value) -> Ty {
    self.module.value_ty(self.module.func(self.cur_func()), v)
  }

  /// Cast `v` to the integral type `ity`, unless it already has it.
  pub fn promote(&mut self, v: Value, ity: IntTy) -> Value {
    if self.value_ty(v).int_ty() == Some(ity) { return v }
    self.push(InstKind::Cast { arg: v }, make_int(ity))
  }

  /// Create a binary operation, applying the usual arithmetic conversions:
  /// both integral operands are brought to their common type (32 bits,
  /// unsignedness wins) before the operation. Comparisons yield `i32`.
  /// Pointer operands pass through untouched (pointer arithmetic is handled
  /// by `create_access`).
  pub fn create_binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Value {
    let (lt, rt) = (self.value_ty(lhs), self.value_ty(rhs));
    if let Some(common) = lt.common_int_ty(&rt) {
      let lhs = self.promote(lhs, common);
      let rhs = self.promote(rhs, common);
      let ty = if op.is_cmp() { make_int(IntTy::Int(Size::S32)) } else { make_int(common) };
      return self.push(InstKind::Binary { op, lhs, rhs }, ty)
    }
    let ty = if op.is_cmp() { make_int(IntTy::Int(Size::S32)) } else { lt };
    self.push(InstKind::Binary { op, lhs, rhs }, ty)
  }

  /// Create a unary operation. The operand keeps its type; `LogicNot`
  /// yields `i32`.
  pub fn create_unary(&mut self, op: UnOp, arg: Value) -> Value {
    let ty = match op {
      UnOp::LogicNot => make_int(IntTy::Int(Size::S32)),
      UnOp::Neg | UnOp::Not => self.value_ty(arg),
    };
    self.push(InstKind::Unary { op, arg }, ty)
  }

  /// Create an explicit cast of `arg` to `ty`.
  pub fn create_cast(&mut self, arg: Value, ty: Ty) -> Value {
    self.push(InstKind::Cast { arg }, ty)
  }

  /// Create a stack slot holding a `ty`, yielding its address.
  pub fn create_alloca(&mut self, ty: Ty) -> Value {
    self.push(InstKind::Alloca, make_ptr(ty))
  }

  /// Load through a pointer value.
  pub fn create_load(&mut self, addr: Value) -> Value {
    let ty = self.value_ty(addr).deref_ty().expect("load from non-pointer");
    self.push(InstKind::Load { addr }, ty)
  }

  /// Store `val` through the pointer `addr`.
  pub fn create_store(&mut self, val: Value, addr: Value) -> Value {
    self.push(InstKind::Store { val, addr }, make_void())
  }

  /// Compute an element pointer from `base`.
  pub fn create_access(&mut self, kind: AccessKind, base: Value, index: Value) -> Value {
    let base_ty = self.value_ty(base);
    let ty = match kind {
      AccessKind::Ptr => base_ty.unqual().clone(),
      AccessKind::Elem => {
        let pointee = base_ty.deref_ty().expect("access through non-pointer");
        if let Some(elem) = pointee.deref_ty() {
          make_ptr(elem)
        } else if let TyKind::Struct(_, fields) = &**pointee.unqual() {
          let idx = self.module.const_int_value(index).expect("struct field index");
          make_ptr(fields[idx as usize].1.clone())
        } else {
          panic!("element access into non-aggregate")
        }
      }
    };
    self.push(InstKind::Access { kind, base, index }, ty)
  }

  /// Call `callee` with `args`, yielding the callee's return type.
  pub fn create_call(&mut self, callee: Value, args: Vec<Value>) -> Value {
    let ret = self.value_ty(callee).func_sig().expect("call of non-function").1.clone();
    self.push(InstKind::Call { callee, args }, ret)
  }

  /// Create a phi node of type `ty` with the given incoming entries.
  pub fn create_phi(&mut self, incoming: Vec<(BlockId, Value)>, ty: Ty) -> Value {
    let (f, b) = (self.cur_func(), self.cur_block());
    let logger = self.logger;
    let func = self.module.func_mut(f);
    // phis go at the head of the block
    let first = func.block_insts(b).next();
    match first {
      Some(first) => Value::Inst(func.insert_before(first, InstKind::Phi { incoming }, ty, logger)),
      None => Value::Inst(func.push_inst(b, InstKind::Phi { incoming }, ty, logger)),
    }
  }

  /// Terminate the current block with an unconditional branch.
  pub fn create_jump(&mut self, target: BlockId) {
    self.push(InstKind::Jump { target }, make_void());
  }

  /// Terminate the current block with a conditional branch.
  pub fn create_branch(&mut self, cond: Value, then_bb: BlockId, else_bb: BlockId) {
    self.push(InstKind::Branch { cond, then_bb, else_bb }, make_void());
  }

  /// Terminate the current block with a return.
  pub fn create_ret(&mut self, val: Option<Value>) {
    self.push(InstKind::Ret { val }, make_void());
  }

  /// The id of the last created instruction in the current block.
  #[must_use] pub fn last_inst(&self) -> Option<InstId> {
    let f = self.module.func(self.cur_func());
    f.block_insts(self.cur_block()).last()
  }
}
