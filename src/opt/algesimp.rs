//! Algebraic simplification.
//!
//! Pattern-rewrites integer identities over binary instructions and installs
//! the replacement through `replace_all_uses_with`. After any rewrite the
//! block scan restarts, so each block reaches a local fixpoint within one
//! pass invocation. Division by a constant zero is never rewritten: the
//! instruction stays and a warning is emitted.

use crate::pass::BlockPass;
use crate::types::ty::TyExt;
use crate::types::ir::{BinOp, BlockId, FuncId, InstId, InstKind, Module, Value};

/// The `algebraic_simp` pass.
#[derive(Default, Debug, Clone, Copy)]
pub struct AlgebraicSimp;

impl BlockPass for AlgebraicSimp {
  fn run_on_block(&mut self, m: &mut Module, f: FuncId, b: BlockId) -> bool {
    let mut changed = false;
    'restart: loop {
      let insts: Vec<InstId> = m.func(f).block_insts(b).collect();
      for id in insts {
        match simplify(m, f, id) {
          Rewrite::None => {}
          Rewrite::Value(v) => {
            let func = m.func_mut(f);
            func.replace_all_uses_with(Value::Inst(id), v);
            func.erase(id);
            changed = true;
            continue 'restart
          }
          Rewrite::Shift { arg, amount } => {
            // x / 2^k  =>  x >>a k
            let sh = m.make_i32(amount);
            let func = m.func_mut(f);
            let (ty, logger) = {
              let inst = func.inst(id);
              (inst.ty.clone(), inst.logger)
            };
            let shr = func.insert_before(id,
              InstKind::Binary { op: BinOp::AShr, lhs: arg, rhs: sh }, ty, logger);
            func.replace_all_uses_with(Value::Inst(id), Value::Inst(shr));
            func.erase(id);
            changed = true;
            continue 'restart
          }
        }
      }
      return changed
    }
  }
}

enum Rewrite {
  None,
  Value(Value),
  Shift { arg: Value, amount: u32 },
}

fn simplify(m: &mut Module, f: FuncId, id: InstId) -> Rewrite {
  let inst = m.func(f).inst(id);
  let InstKind::Binary { op, lhs, rhs } = inst.kind else { return Rewrite::None };
  let ity = match inst.ty.int_ty() {
    Some(ity) => ity,
    None => return Rewrite::None,
  };
  let logger = inst.logger;
  let (lc, rc) = (m.const_int_value(lhs), m.const_int_value(rhs));

  if let Some(l) = lc {
    match (op, l) {
      // 0 + x => x, 1 * x => x
      (BinOp::Add, 0) | (BinOp::Mul, 1) => return Rewrite::Value(rhs),
      // 0 * x => 0
      (BinOp::Mul, 0) => return Rewrite::Value(m.make_int(0, ity)),
      _ => {}
    }
  }
  if let Some(r) = rc {
    match (op, r) {
      // x + 0, x - 0, x << 0, x >> 0 => x
      (BinOp::Add | BinOp::Sub | BinOp::Shl | BinOp::LShr | BinOp::AShr, 0) =>
        return Rewrite::Value(lhs),
      // x * 1, x / 1 => x
      (BinOp::Mul | BinOp::SDiv | BinOp::UDiv, 1) => return Rewrite::Value(lhs),
      // x * 0 => 0
      (BinOp::Mul, 0) => return Rewrite::Value(m.make_int(0, ity)),
      // x / 0, x % 0: leave the instruction so the runtime trap survives
      (BinOp::SDiv | BinOp::UDiv | BinOp::SRem | BinOp::URem, 0) => {
        logger.warning("integer division or modulo by zero");
        return Rewrite::None
      }
      // x / 2^k (signed, k > 0) => x >>a k
      (BinOp::SDiv, r) => {
        if_chain! {
          if r & (r - 1) == 0;
          if (r as i32) > 1;
          then { return Rewrite::Shift { arg: lhs, amount: r.trailing_zeros() } }
        }
      }
      _ => {}
    }
  }
  if lhs == rhs {
    match op {
      // x - x => 0, x ^ x => 0
      BinOp::Sub | BinOp::Xor => return Rewrite::Value(m.make_int(0, ity)),
      // x & x, x | x => x
      BinOp::And | BinOp::Or => return Rewrite::Value(lhs),
      // x / x => 1 for x a non-zero constant
      BinOp::SDiv | BinOp::UDiv => if matches!(lc, Some(n) if n != 0) {
        return Rewrite::Value(m.make_int(1, ity))
      },
      _ => {}
    }
  }
  Rewrite::None
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::logger::Logger;
  use crate::types::ir::{Func, Linkage};
  use crate::types::ty::{make_i32, TyKind};
  use crate::intern;
  use std::rc::Rc;

  fn func_of_one_arg(m: &mut Module) -> (FuncId, BlockId) {
    let log = Logger::none(intern("t"));
    let fty = Rc::new(TyKind::Func(vec![make_i32()], make_i32()));
    let f = m.add_func(Func::new(intern("f"), fty, Linkage::External, log));
    let bb = m.func_mut(f).new_block();
    (f, bb)
  }

  fn ret_operand(m: &Module, f: FuncId, bb: BlockId) -> Value {
    let func = m.func(f);
    let ret = func.block_insts(bb).last().unwrap();
    let InstKind::Ret { val: Some(v) } = func.inst(ret).kind else { panic!("no ret operand") };
    v
  }

  #[test]
  fn identity_chain_collapses_to_the_argument() {
    // x * 1 + 0 => x, in a single pass invocation
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let (f, bb) = func_of_one_arg(&mut m);
    let one = m.make_i32(1);
    let zero = m.make_i32(0);
    let func = m.func_mut(f);
    let mul = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Mul, lhs: Value::Arg(0), rhs: one }, make_i32(), log);
    let add = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Add, lhs: Value::Inst(mul), rhs: zero }, make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(add)) }, log);

    assert!(AlgebraicSimp.run_on_block(&mut m, f, bb));
    assert_eq!(ret_operand(&m, f, bb), Value::Arg(0));
    let func = m.func(f);
    assert_eq!(func.block_insts(bb).count(), 1, "only the return remains");
    func.verify();
    assert!(!AlgebraicSimp.run_on_block(&mut m, f, bb), "second run is a fixpoint");
  }

  #[test]
  fn mul_by_zero_is_zero() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let (f, bb) = func_of_one_arg(&mut m);
    let zero = m.make_i32(0);
    let func = m.func_mut(f);
    let mul = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Mul, lhs: Value::Arg(0), rhs: zero }, make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(mul)) }, log);

    assert!(AlgebraicSimp.run_on_block(&mut m, f, bb));
    assert_eq!(m.const_int_value(ret_operand(&m, f, bb)), Some(0));
  }

  #[test]
  fn signed_division_by_power_of_two_becomes_a_shift() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let (f, bb) = func_of_one_arg(&mut m);
    let eight = m.make_i32(8);
    let func = m.func_mut(f);
    let div = func.push_inst(bb,
      InstKind::Binary { op: BinOp::SDiv, lhs: Value::Arg(0), rhs: eight }, make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(div)) }, log);

    assert!(AlgebraicSimp.run_on_block(&mut m, f, bb));
    let v = ret_operand(&m, f, bb);
    let Value::Inst(shr) = v else { panic!("expected an instruction") };
    let func = m.func(f);
    let InstKind::Binary { op: BinOp::AShr, lhs, rhs } = func.inst(shr).kind else {
      panic!("expected an arithmetic shift")
    };
    assert_eq!(lhs, Value::Arg(0));
    assert_eq!(m.const_int_value(rhs), Some(3));
    func.verify();
  }

  #[test]
  fn division_by_zero_is_preserved() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let (f, bb) = func_of_one_arg(&mut m);
    let zero = m.make_i32(0);
    let func = m.func_mut(f);
    let div = func.push_inst(bb,
      InstKind::Binary { op: BinOp::SDiv, lhs: Value::Arg(0), rhs: zero }, make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(div)) }, log);

    assert!(!AlgebraicSimp.run_on_block(&mut m, f, bb));
    assert!(matches!(m.func(f).inst(div).kind,
      InstKind::Binary { op: BinOp::SDiv, .. }));
  }

  #[test]
  fn same_operand_identities() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let (f, bb) = func_of_one_arg(&mut m);
    let func = m.func_mut(f);
    let sub = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Sub, lhs: Value::Arg(0), rhs: Value::Arg(0) },
      make_i32(), log);
    let or = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Or, lhs: Value::Inst(sub), rhs: Value::Inst(sub) },
      make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(or)) }, log);

    assert!(AlgebraicSimp.run_on_block(&mut m, f, bb));
    assert_eq!(m.const_int_value(ret_operand(&m, f, bb)), Some(0));
    m.func(f).verify();
  }
}
