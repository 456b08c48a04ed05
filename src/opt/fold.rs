//! Constant folding.
//!
//! Binary, unary and cast instructions whose operands are all integer
//! constants are replaced by the folded constant. Integer semantics are
//! two's-complement wrap at the operation width. Division or remainder by a
//! constant zero is *not* folded: the instruction stays so the runtime trap
//! behaves as written, and a warning is emitted.

use crate::pass::BlockPass;
use crate::types::ty::TyExt;
use crate::types::{IntTy, Size};
use crate::types::ir::{BlockId, FuncId, InstId, InstKind, Module, Value};

/// The `const_fold` pass.
#[derive(Default, Debug, Clone, Copy)]
pub struct ConstFold;

impl BlockPass for ConstFold {
  fn run_on_block(&mut self, m: &mut Module, f: FuncId, b: BlockId) -> bool {
    let mut changed = false;
    let insts: Vec<InstId> = m.func(f).block_insts(b).collect();
    for id in insts {
      if let Some(folded) = fold_inst(m, f, id) {
        let func = m.func_mut(f);
        func.replace_all_uses_with(Value::Inst(id), folded);
        func.erase(id);
        changed = true;
      }
    }
    changed
  }
}

/// The folded value of `id`, or `None` if it does not fold.
fn fold_inst(m: &mut Module, f: FuncId, id: InstId) -> Option<Value> {
  let inst = m.func(f).inst(id);
  let (kind, logger) = (inst.kind.clone(), inst.logger);
  let target = inst.ty.int_ty();
  let ity = target.unwrap_or(IntTy::Int(Size::S32));
  match kind {
    InstKind::Binary { op, lhs, rhs } => {
      let (l, r) = (m.const_int_value(lhs)?, m.const_int_value(rhs)?);
      match op.apply(l, r) {
        Some(n) => Some(m.make_int(ity.truncate(n), ity)),
        None => {
          // division or modulo by zero: leave the instruction in place
          logger.warning("integer division or modulo by zero");
          None
        }
      }
    }
    InstKind::Unary { op, arg } => {
      let n = m.const_int_value(arg)?;
      Some(m.make_int(ity.truncate(op.apply(n)), ity))
    }
    InstKind::Cast { arg } => {
      let n = m.const_int_value(arg)?;
      let target = target?;
      Some(m.make_int(target.truncate(n), target))
    }
    _ => None,
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::logger::Logger;
  use crate::types::ir::{BinOp, Func, Linkage};
  use crate::types::ty::{make_i32, make_int, TyKind};
  use crate::intern;
  use std::rc::Rc;

  fn one_block_func(m: &mut Module) -> (FuncId, BlockId) {
    let log = Logger::none(intern("t"));
    let fty = Rc::new(TyKind::Func(vec![], make_i32()));
    let f = m.add_func(Func::new(intern("f"), fty, Linkage::External, log));
    let bb = m.func_mut(f).new_block();
    (f, bb)
  }

  #[test]
  fn folds_with_wrap_semantics() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let (f, bb) = one_block_func(&mut m);
    let big = m.make_i32(i32::MAX as u32);
    let one = m.make_i32(1);
    let func = m.func_mut(f);
    let add = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Add, lhs: big, rhs: one }, make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(add)) }, log);

    assert!(ConstFold.run_on_block(&mut m, f, bb));
    let func = m.func(f);
    let ret = func.block_insts(bb).last().unwrap();
    let InstKind::Ret { val: Some(v) } = func.inst(ret).kind else { panic!() };
    // signed overflow wraps to INT_MIN
    assert_eq!(m.const_int_value(v), Some(i32::MIN as u32));
    func.verify();
  }

  #[test]
  fn truncating_cast_folds() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let (f, bb) = one_block_func(&mut m);
    let n = m.make_i32(0x1ff);
    let u8ty = make_int(IntTy::UInt(Size::S8));
    let func = m.func_mut(f);
    let cast = func.push_inst(bb, InstKind::Cast { arg: n }, u8ty, log);
    let back = func.push_inst(bb, InstKind::Cast { arg: Value::Inst(cast) }, make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(back)) }, log);

    assert!(ConstFold.run_on_block(&mut m, f, bb));
    assert!(ConstFold.run_on_block(&mut m, f, bb));
    let func = m.func(f);
    let ret = func.block_insts(bb).last().unwrap();
    let InstKind::Ret { val: Some(v) } = func.inst(ret).kind else { panic!() };
    assert_eq!(m.const_int_value(v), Some(0xff));
  }

  #[test]
  fn div_by_zero_is_left_in_place() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let (f, bb) = one_block_func(&mut m);
    let seven = m.make_i32(7);
    let zero = m.make_i32(0);
    let func = m.func_mut(f);
    let div = func.push_inst(bb,
      InstKind::Binary { op: BinOp::SDiv, lhs: seven, rhs: zero }, make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(div)) }, log);

    assert!(!ConstFold.run_on_block(&mut m, f, bb));
    let func = m.func(f);
    assert!(matches!(func.inst(div).kind, InstKind::Binary { op: BinOp::SDiv, .. }));
    func.verify();
  }
}
