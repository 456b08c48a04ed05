//! AST to SSA lowering.
//!
//! Walks the analyzed AST and constructs the SSA module through the
//! [`Builder`]. Named variables live in stack or global storage and are
//! accessed through loads and stores; short-circuit operators lower to
//! control flow around a result slot. Globals with non-constant
//! initializers are zero-initialized and filled in by a synthesized
//! constructor function with `GlobalCtor` linkage.

use std::collections::HashMap;
use crate::{intern, Symbol};
use crate::builder::Builder;
use crate::logger::Logger;
use crate::front::analyzer::ScopeStack;
use crate::types::{IntTy, Size, Span};
use crate::types::ty::{make_int, make_void, Ty, TyExt, TyKind};
use crate::types::ast::{
  BinaryOp, Expr, ExprKind, FuncDef, Init, Item, ItemKind, Stmt, StmtKind, UnaryOp, VarDecl,
};
use crate::types::ir::{
  AccessKind, BinOp, BlockId, ConstId, Func, FuncId, Global, Linkage, Module, UnOp, Value,
};
use std::rc::Rc;

/// Lower an analyzed translation unit to an SSA module.
#[must_use] pub fn build_module(file: Symbol, items: &[Item]) -> Module {
  let mut gen = IrGen {
    b: Builder::new(file),
    file,
    vars: ScopeStack::new(),
    funcs: HashMap::new(),
    loops: Vec::new(),
    ctor: None,
  };
  for item in items {
    gen.lower_item(item);
  }
  gen.finish_ctor();
  gen.b.finish()
}

struct IrGen {
  b: Builder,
  file: Symbol,
  /// Variable name to the address value holding its storage.
  vars: ScopeStack<Value>,
  funcs: HashMap<Symbol, FuncId>,
  /// `(continue target, break target)` per enclosing loop.
  loops: Vec<(BlockId, BlockId)>,
  ctor: Option<(FuncId, BlockId)>,
}

impl IrGen {
  fn log(&self, span: Span) -> Logger { Logger::new(self.file, span) }

  fn lower_item(&mut self, item: &Item) {
    match &item.k {
      ItemKind::VarDecl(decl) => self.lower_global_decl(decl),
      ItemKind::Func(f) => self.lower_func(item.span, f),
      ItemKind::StructDef { .. } | ItemKind::EnumDef { .. } | ItemKind::TypeAlias { .. } => {}
    }
  }

  // ----------------------------------------------------------------
  // globals

  fn lower_global_decl(&mut self, decl: &VarDecl) {
    let linkage = if decl.is_static { Linkage::Internal } else { Linkage::External };
    for def in &decl.defs {
      let Some(ty) = def.k.ty.clone() else { continue };
      let log = self.log(def.span);
      let const_init = match &def.k.init {
        None => Some(self.zero_const(&ty)),
        Some(init) => self.try_const_init(init, &ty),
      };
      let cid = match const_init {
        Some(c) => c,
        None => self.zero_const(&ty),
      };
      let gid = self.b.module.add_global(Global::new(
        def.k.name, ty.clone(), linkage, Some(cid), log,
      ));
      self.vars.define(def.k.name, Value::Global(gid));
      if const_init.is_none() {
        // runtime initializer: store from the module constructor
        let init = def.k.init.as_ref().expect("non-constant init");
        self.enter_ctor();
        self.lower_store_init(Value::Global(gid), &ty, init);
        // the constructor may have grown control flow; keep appending where
        // it left off
        let f = self.b.cur_func();
        self.ctor = Some((f, self.b.cur_block()));
      }
    }
  }

  fn zero_const(&mut self, ty: &Ty) -> ConstId {
    match self.b.module.make_zero(ty.unqual().clone()) {
      Value::Const(c) => c,
      _ => unreachable!(),
    }
  }

  /// The interned constant for an initializer whose leaves all folded, or
  /// `None` when it must run at program start.
  fn try_const_init(&mut self, init: &Init, ty: &Ty) -> Option<ConstId> {
    match init {
      Init::Expr(e) => {
        let n = e.val?;
        let ity = ty.int_ty()?;
        match self.b.module.make_int(n, ity) {
          Value::Const(c) => Some(c),
          _ => unreachable!(),
        }
      }
      Init::List(elems) => {
        let elem_ty = ty.deref_ty()?;
        let len = ty.array_len()? as usize;
        let mut out = Vec::with_capacity(len);
        for e in elems {
          out.push(self.try_const_init(e, &elem_ty)?);
        }
        while out.len() < len {
          let z = self.zero_const(&elem_ty);
          out.push(z);
        }
        match self.b.module.make_array(out, ty.unqual().clone()) {
          Value::Const(c) => Some(c),
          _ => unreachable!(),
        }
      }
    }
  }

  /// Direct the builder at the module constructor, creating it on first use.
  fn enter_ctor(&mut self) {
    if let Some((f, bb)) = self.ctor {
      self.b.set_insert_point(f, bb);
      return
    }
    let log = Logger::none(self.file);
    let fty: Ty = Rc::new(TyKind::Func(vec![], make_void()));
    let f = self.b.module.add_func(Func::new(
      intern("__global_ctor"), fty, Linkage::GlobalCtor, log));
    let bb = self.b.module.func_mut(f).new_block();
    self.ctor = Some((f, bb));
    self.b.set_insert_point(f, bb);
  }

  fn finish_ctor(&mut self) {
    if let Some((f, bb)) = self.ctor {
      self.b.set_insert_point(f, bb);
      if self.b.block_open() {
        self.b.create_ret(None);
      }
    }
  }

  // ----------------------------------------------------------------
  // functions

  fn lower_func(&mut self, span: Span, f: &FuncDef) {
    let Some(fty) = f.ty.clone() else { return };
    let log = self.log(span);
    let linkage = if f.is_inline {
      Linkage::Inline
    } else if f.is_static {
      Linkage::Internal
    } else {
      Linkage::External
    };
    let fid = match self.funcs.get(&f.name) {
      Some(&fid) => fid,
      None => {
        let fid = self.b.module.add_func(Func::new(f.name, fty.clone(), linkage, log));
        self.funcs.insert(f.name, fid);
        fid
      }
    };
    let Some(body) = &f.body else { return };
    let entry = self.b.module.func_mut(fid).new_block();
    self.b.set_insert_point(fid, entry);
    self.b.set_logger(log);
    self.vars.enter();
    // parameters get stack homes so they are assignable like any variable
    let params = fty.func_sig().expect("function type").0.clone();
    for (i, ((_, name, _), ty)) in f.params.iter().zip(&params).enumerate() {
      let slot = self.b.create_alloca(ty.clone());
      self.b.create_store(Value::Arg(i as u32), slot);
      self.vars.define(*name, slot);
    }
    for s in body {
      self.lower_stmt(s);
    }
    if self.b.block_open() {
      let ret = fty.func_sig().expect("function type").1.clone();
      if ret.is_void() {
        self.b.create_ret(None);
      } else {
        // control fell off the end of a non-void function
        let ity = ret.int_ty().unwrap_or(IntTy::Int(Size::S32));
        let zero = self.b.module.make_int(0, ity);
        self.b.create_ret(Some(zero));
      }
    }
    self.vars.exit();
  }

  // ----------------------------------------------------------------
  // statements

  fn lower_stmt(&mut self, stmt: &Stmt) {
    self.b.set_logger(self.log(stmt.span));
    match &stmt.k {
      StmtKind::Decl(decl) => self.lower_local_decl(decl),
      StmtKind::Expr(e) => { self.lower_rvalue(e); }
      StmtKind::Block(stmts) => {
        self.vars.enter();
        for s in stmts { self.lower_stmt(s) }
        self.vars.exit();
      }
      StmtKind::If { cond, then, els } => {
        let cv = self.lower_rvalue(cond);
        let then_bb = self.b.new_block();
        let else_bb = self.b.new_block();
        let end_bb = if els.is_some() { self.b.new_block() } else { else_bb };
        self.b.create_branch(cv, then_bb, else_bb);
        let f = self.b.cur_func();
        self.b.set_insert_point(f, then_bb);
        self.lower_stmt(then);
        if self.b.block_open() { self.b.create_jump(end_bb) }
        if let Some(els) = els {
          self.b.set_insert_point(f, else_bb);
          self.lower_stmt(els);
          if self.b.block_open() { self.b.create_jump(end_bb) }
        }
        self.b.set_insert_point(f, end_bb);
      }
      StmtKind::While { cond, body } => {
        let f = self.b.cur_func();
        let header = self.b.new_block();
        let body_bb = self.b.new_block();
        let end_bb = self.b.new_block();
        self.b.create_jump(header);
        self.b.set_insert_point(f, header);
        let cv = self.lower_rvalue(cond);
        self.b.create_branch(cv, body_bb, end_bb);
        self.b.set_insert_point(f, body_bb);
        self.loops.push((header, end_bb));
        self.lower_stmt(body);
        self.loops.pop();
        if self.b.block_open() { self.b.create_jump(header) }
        self.b.set_insert_point(f, end_bb);
      }
      StmtKind::Break | StmtKind::Continue => {
        let &(header, end_bb) = self.loops.last().expect("checked by the analyzer");
        let target = if matches!(stmt.k, StmtKind::Break) { end_bb } else { header };
        self.b.create_jump(target);
        // anything after the jump is unreachable but must still lower
        let f = self.b.cur_func();
        let dead = self.b.new_block();
        self.b.set_insert_point(f, dead);
      }
      StmtKind::Return(val) => {
        let rv = val.as_ref().map(|e| self.lower_rvalue(e));
        self.b.create_ret(rv);
        let f = self.b.cur_func();
        let dead = self.b.new_block();
        self.b.set_insert_point(f, dead);
      }
      StmtKind::Empty => {}
    }
  }

  fn lower_local_decl(&mut self, decl: &VarDecl) {
    for def in &decl.defs {
      let Some(ty) = def.k.ty.clone() else { continue };
      let slot = self.b.create_alloca(ty.unqual().clone());
      self.vars.define(def.k.name, slot);
      if let Some(init) = &def.k.init {
        self.lower_store_init(slot, &ty, init);
      }
    }
  }

  /// Store an initializer into the storage at `addr`, elementwise for lists.
  fn lower_store_init(&mut self, addr: Value, ty: &Ty, init: &Init) {
    match init {
      Init::Expr(e) => {
        let rv = self.lower_rvalue(e);
        self.store_converted(rv, addr, ty);
      }
      Init::List(elems) => {
        let elem_ty = ty.deref_ty().expect("checked by the analyzer");
        let len = ty.array_len().unwrap_or(elems.len() as u32);
        for i in 0..len {
          let idx = self.b.module.make_i32(i);
          let slot = self.b.create_access(AccessKind::Elem, addr, idx);
          match elems.get(i as usize) {
            Some(init) => self.lower_store_init(slot, &elem_ty, init),
            None => {
              let ity = elem_ty.int_ty().unwrap_or(IntTy::Int(Size::S32));
              let zero = self.b.module.make_int(0, ity);
              self.b.create_store(zero, slot);
            }
          }
        }
      }
    }
  }

  /// Store `val` at `addr`, inserting an integral conversion when the
  /// widths differ.
  fn store_converted(&mut self, val: Value, addr: Value, ty: &Ty) {
    let val = match (self.b.value_ty(val).int_ty(), ty.int_ty()) {
      (Some(from), Some(to)) if from != to => self.b.promote(val, to),
      _ => val,
    };
    self.b.create_store(val, addr);
  }

  // ----------------------------------------------------------------
  // expressions

  /// The interned constant for an already-folded expression, if any.
  fn const_of(&mut self, e: &Expr) -> Option<Value> {
    let n = e.val?;
    let ity = e.ty.as_ref()?.int_ty()?;
    Some(self.b.module.make_int(n, ity))
  }

  /// Lower an expression to its value. Array-typed expressions decay to
  /// their address.
  fn lower_rvalue(&mut self, e: &Expr) -> Value {
    if let Some(v) = self.const_of(e) { return v }
    match &e.kind {
      ExprKind::Int(n) => self.b.module.make_i32(*n),
      ExprKind::Str(s) => self.b.module.make_str(*s),
      ExprKind::Id(_) | ExprKind::Index { .. } | ExprKind::Member { .. } => {
        let addr = self.lower_addr(e);
        if e.ty().is_array() {
          addr
        } else {
          self.b.create_load(addr)
        }
      }
      ExprKind::Binary { op, lhs, rhs } => self.lower_binary(e, *op, lhs, rhs),
      ExprKind::Unary { op, arg } => match op {
        UnaryOp::Neg => {
          let a = self.lower_rvalue(arg);
          self.b.create_unary(UnOp::Neg, a)
        }
        UnaryOp::Not => {
          let a = self.lower_rvalue(arg);
          self.b.create_unary(UnOp::Not, a)
        }
        UnaryOp::LNot => {
          let a = self.lower_rvalue(arg);
          self.b.create_unary(UnOp::LogicNot, a)
        }
        UnaryOp::Deref => {
          let p = self.lower_rvalue(arg);
          if e.ty().is_array() { p } else { self.b.create_load(p) }
        }
        UnaryOp::Addr => self.lower_addr(arg),
      },
      ExprKind::Cast { arg, .. } => {
        let a = self.lower_rvalue(arg);
        let target = e.ty().unqual().clone();
        self.b.create_cast(a, target)
      }
      ExprKind::Call { callee, args } => {
        let fid = *self.funcs.get(callee).expect("checked by the analyzer");
        let argv: Vec<Value> = args.iter().map(|a| self.lower_rvalue(a)).collect();
        self.b.create_call(Value::Func(fid), argv)
      }
    }
  }

  /// Lower an lvalue expression to the address of its storage.
  fn lower_addr(&mut self, e: &Expr) -> Value {
    match &e.kind {
      ExprKind::Id(name) => *self.vars.get(*name).expect("checked by the analyzer"),
      ExprKind::Unary { op: UnaryOp::Deref, arg } => self.lower_rvalue(arg),
      ExprKind::Index { base, index } => {
        let idx = self.lower_rvalue(index);
        if base.ty().is_array() {
          let baddr = self.lower_addr(base);
          self.b.create_access(AccessKind::Elem, baddr, idx)
        } else {
          let p = self.lower_rvalue(base);
          self.b.create_access(AccessKind::Ptr, p, idx)
        }
      }
      ExprKind::Member { base, field, arrow } => {
        let (saddr, sty) = if *arrow {
          let p = self.lower_rvalue(base);
          (p, base.ty().deref_ty().expect("checked by the analyzer"))
        } else {
          (self.lower_addr(base), base.ty().clone())
        };
        let (idx, _) = sty.field(*field).expect("checked by the analyzer");
        let fidx = self.b.module.make_i32(idx as u32);
        self.b.create_access(AccessKind::Elem, saddr, fidx)
      }
      _ => panic!("lvalue expected; rejected by the analyzer"),
    }
  }

  fn lower_binary(&mut self, e: &Expr, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Value {
    match op {
      BinaryOp::Assign => {
        let rv = self.lower_rvalue(rhs);
        let addr = self.lower_addr(lhs);
        let target = lhs.ty().unqual().clone();
        self.store_converted(rv, addr, &target);
        rv
      }
      BinaryOp::LAnd | BinaryOp::LOr => self.lower_short_circuit(op, lhs, rhs),
      BinaryOp::Add | BinaryOp::Sub if e.ty().is_pointer() => {
        // pointer arithmetic: step by elements through an access
        let (pe, ie) = if lhs.ty().is_pointer() { (lhs, rhs) } else { (rhs, lhs) };
        let p = self.lower_rvalue(pe);
        let mut i = self.lower_rvalue(ie);
        if op == BinaryOp::Sub {
          i = self.b.create_unary(UnOp::Neg, i);
        }
        self.b.create_access(AccessKind::Ptr, p, i)
      }
      _ => {
        let l = self.lower_rvalue(lhs);
        let r = self.lower_rvalue(rhs);
        let unsigned = lhs.ty().is_unsigned() || rhs.ty().is_unsigned();
        self.b.create_binary(ir_binop(op, unsigned), l, r)
      }
    }
  }

  fn lower_short_circuit(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Value {
    let int = make_int(IntTy::Int(Size::S32));
    let res = self.b.create_alloca(int.clone());
    let zero = self.b.module.make_i32(0);
    let lv = self.lower_rvalue(lhs);
    let lb = self.b.create_binary(BinOp::Ne, lv, zero);
    self.b.create_store(lb, res);
    let f = self.b.cur_func();
    let rhs_bb = self.b.new_block();
    let end_bb = self.b.new_block();
    match op {
      BinaryOp::LAnd => self.b.create_branch(lb, rhs_bb, end_bb),
      BinaryOp::LOr => self.b.create_branch(lb, end_bb, rhs_bb),
      _ => unreachable!(),
    }
    self.b.set_insert_point(f, rhs_bb);
    let rv = self.lower_rvalue(rhs);
    let rb = self.b.create_binary(BinOp::Ne, rv, zero);
    self.b.create_store(rb, res);
    self.b.create_jump(end_bb);
    self.b.set_insert_point(f, end_bb);
    self.b.create_load(res)
  }
}

fn ir_binop(op: BinaryOp, unsigned: bool) -> BinOp {
  match (op, unsigned) {
    (BinaryOp::Add, _) => BinOp::Add,
    (BinaryOp::Sub, _) => BinOp::Sub,
    (BinaryOp::Mul, _) => BinOp::Mul,
    (BinaryOp::Div, false) => BinOp::SDiv,
    (BinaryOp::Div, true) => BinOp::UDiv,
    (BinaryOp::Mod, false) => BinOp::SRem,
    (BinaryOp::Mod, true) => BinOp::URem,
    (BinaryOp::BitAnd, _) => BinOp::And,
    (BinaryOp::BitOr, _) => BinOp::Or,
    (BinaryOp::BitXor, _) => BinOp::Xor,
    (BinaryOp::Shl, _) => BinOp::Shl,
    (BinaryOp::Shr, false) => BinOp::AShr,
    (BinaryOp::Shr, true) => BinOp::LShr,
    (BinaryOp::Eq, _) => BinOp::Eq,
    (BinaryOp::Ne, _) => BinOp::Ne,
    (BinaryOp::Lt, false) => BinOp::SLt,
    (BinaryOp::Lt, true) => BinOp::ULt,
    (BinaryOp::Le, false) => BinOp::SLe,
    (BinaryOp::Le, true) => BinOp::ULe,
    (BinaryOp::Gt, false) => BinOp::SGt,
    (BinaryOp::Gt, true) => BinOp::UGt,
    (BinaryOp::Ge, false) => BinOp::SGe,
    (BinaryOp::Ge, true) => BinOp::UGe,
    (BinaryOp::Assign | BinaryOp::LAnd | BinaryOp::LOr, _) =>
      unreachable!("lowered through control flow"),
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::front::{analyzer::Analyzer, eval::Evaluator, parser::Parser};
  use crate::logger;

  fn lower(src: &str) -> Module {
    let _guard = logger::lock_for_tests();
    logger::reset();
    let file = intern("t.c");
    let mut items = Parser::new(file, src).parse_program();
    Evaluator::new().eval_program(&mut items);
    Analyzer::new(file).analyze_program(&mut items);
    assert_eq!(logger::error_num(), 0, "source must be well-formed");
    build_module(file, &items)
  }

  #[test]
  fn lowers_a_loop_into_four_blocks() {
    let m = lower("int f(int n) { int s = 0; while (n) { s = s + n; n = n - 1; } return s; }");
    let (_, f) = m.funcs().next().unwrap();
    // entry, header, body, exit (plus the dead block after return)
    assert!(f.num_blocks() >= 4);
    f.verify();
  }

  #[test]
  fn static_global_without_uses_is_internal() {
    let m = lower("static int unused_tbl[4] = {1, 2, 3, 4}; int main() { return 0; }");
    let (_, g) = m.globals().next().unwrap();
    assert_eq!(g.linkage, Linkage::Internal);
    assert!(g.init.is_some());
  }

  #[test]
  fn runtime_global_init_goes_through_a_ctor() {
    let m = lower("int g(); int x = g(); int main() { return x; }");
    let ctor = m.funcs().find(|(_, f)| f.linkage == Linkage::GlobalCtor);
    assert!(ctor.is_some(), "non-constant global init requires a ctor");
  }

  #[test]
  fn short_circuit_produces_control_flow() {
    let m = lower("int f(int a, int b) { return a && b; }");
    let (_, f) = m.funcs().next().unwrap();
    assert!(f.num_blocks() >= 3);
    f.verify();
  }
}
