//! Dead code elimination.
//!
//! An instruction is dead iff it has no observable side effect (no store, no
//! call, not a terminator) and its value has no uses. Erasing an instruction
//! can make its operands dead in turn, so a worklist runs to fixpoint within
//! each function.

use crate::pass::FunctionPass;
use crate::types::ir::{FuncId, InstId, Module, Value};

/// The `dead_code_elim` pass.
#[derive(Default, Debug, Clone, Copy)]
pub struct DeadCodeElim;

impl FunctionPass for DeadCodeElim {
  fn run_on_func(&mut self, m: &mut Module, f: FuncId) -> bool {
    let func = m.func_mut(f);
    let mut worklist: Vec<InstId> = func.blocks()
      .flat_map(|b| func.block_insts(b))
      .collect();
    let mut changed = false;
    while let Some(id) = worklist.pop() {
      if func.is_erased(id) { continue }
      let inst = func.inst(id);
      if inst.kind.has_side_effect() || !func.uses(Value::Inst(id)).is_empty() {
        continue
      }
      // operands may become dead once this instruction goes
      for v in inst.kind.operands() {
        if let Value::Inst(op) = v { worklist.push(op) }
      }
      func.erase(id);
      changed = true;
    }
    changed
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::logger::Logger;
  use crate::types::ir::{BinOp, Func, InstKind, Linkage};
  use crate::types::ty::{make_i32, make_void, TyKind};
  use crate::intern;
  use std::rc::Rc;

  #[test]
  fn removes_chains_but_keeps_side_effects() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let gty = Rc::new(TyKind::Func(vec![], make_i32()));
    let g = m.add_func(Func::new(intern("g"), gty, Linkage::External, log));
    let fty = Rc::new(TyKind::Func(vec![], make_i32()));
    let f = m.add_func(Func::new(intern("f"), fty, Linkage::External, log));
    let zero = m.make_i32(0);
    let one = m.make_i32(1);
    let func = m.func_mut(f);
    let bb = func.new_block();
    // a = call g()  -- unused result, call kept
    let a = func.push_inst(bb,
      InstKind::Call { callee: Value::Func(g), args: vec![] }, make_i32(), log);
    // b = a + 1; c = b * b  -- both dead
    let b = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Add, lhs: Value::Inst(a), rhs: one }, make_i32(), log);
    let _c = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Mul, lhs: Value::Inst(b), rhs: Value::Inst(b) },
      make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(zero) }, log);
    let _ = make_void();

    assert!(DeadCodeElim.run_on_func(&mut m, f));
    let func = m.func(f);
    let kinds: Vec<_> = func.block_insts(bb).map(|i| &func.inst(i).kind).collect();
    assert_eq!(kinds.len(), 2, "only the call and the return survive");
    assert!(matches!(kinds[0], InstKind::Call { .. }));
    assert!(matches!(kinds[1], InstKind::Ret { .. }));
    func.verify();
    // fixpoint: a second run is a no-op
    assert!(!DeadCodeElim.run_on_func(&mut m, f));
  }
}
