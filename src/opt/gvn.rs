//! Block-local value numbering.
//!
//! Within a block, pure instructions with equal opcode and operand
//! identities produce the same value; later instances are replaced by the
//! first. Cross-block numbering is out of scope.

use std::collections::HashMap;
use crate::pass::BlockPass;
use crate::types::ty::Ty;
use crate::types::ir::{
  AccessKind, BinOp, BlockId, FuncId, InstId, InstKind, Module, UnOp, Value,
};

/// The `gvn` pass.
#[derive(Default, Debug, Clone)]
pub struct LocalValueNumbering;

/// The identity of a pure computation: opcode plus operand values. Casts
/// include the result type, since the same operand cast to different widths
/// yields different values.
#[derive(Clone, PartialEq, Eq, Hash)]
enum Number {
  Bin(BinOp, Value, Value),
  Un(UnOp, Value),
  Cast(Ty, Value),
  Access(AccessKind, Value, Value),
}

fn number_of(m: &Module, f: FuncId, id: InstId) -> Option<Number> {
  let inst = m.func(f).inst(id);
  match inst.kind {
    InstKind::Binary { op, lhs, rhs } => Some(Number::Bin(op, lhs, rhs)),
    InstKind::Unary { op, arg } => Some(Number::Un(op, arg)),
    InstKind::Cast { arg } => Some(Number::Cast(inst.ty.clone(), arg)),
    InstKind::Access { kind, base, index } => Some(Number::Access(kind, base, index)),
    _ => None,
  }
}

impl BlockPass for LocalValueNumbering {
  fn run_on_block(&mut self, m: &mut Module, f: FuncId, b: BlockId) -> bool {
    let mut table: HashMap<Number, InstId> = HashMap::new();
    let mut changed = false;
    let insts: Vec<InstId> = m.func(f).block_insts(b).collect();
    for id in insts {
      let Some(num) = number_of(m, f, id) else { continue };
      match table.get(&num) {
        // replacing the duplicate rewrites downstream operands, so later
        // instructions renumber onto the surviving instance automatically
        Some(&first) => {
          let func = m.func_mut(f);
          func.replace_all_uses_with(Value::Inst(id), Value::Inst(first));
          func.erase(id);
          changed = true;
        }
        None => { table.insert(num, id); }
      }
    }
    changed
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::logger::Logger;
  use crate::types::ir::{Func, Linkage};
  use crate::types::ty::{make_i32, TyKind};
  use crate::intern;
  use std::rc::Rc;

  #[test]
  fn duplicate_computations_merge() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let fty = Rc::new(TyKind::Func(vec![make_i32(), make_i32()], make_i32()));
    let f = m.add_func(Func::new(intern("f"), fty, Linkage::External, log));
    let func = m.func_mut(f);
    let bb = func.new_block();
    // a = x + y; b = x + y; c = a * b
    let a = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Add, lhs: Value::Arg(0), rhs: Value::Arg(1) },
      make_i32(), log);
    let b = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Add, lhs: Value::Arg(0), rhs: Value::Arg(1) },
      make_i32(), log);
    let c = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Mul, lhs: Value::Inst(a), rhs: Value::Inst(b) },
      make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(c)) }, log);

    assert!(LocalValueNumbering.run_on_block(&mut m, f, bb));
    let func = m.func(f);
    assert_eq!(func.block_insts(bb).count(), 3);
    let InstKind::Binary { lhs, rhs, .. } = func.inst(c).kind else { panic!() };
    assert_eq!(lhs, Value::Inst(a));
    assert_eq!(rhs, Value::Inst(a));
    func.verify();
    assert!(!LocalValueNumbering.run_on_block(&mut m, f, bb));
  }

  #[test]
  fn calls_are_not_numbered() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let gty = Rc::new(TyKind::Func(vec![], make_i32()));
    let g = m.add_func(Func::new(intern("g"), gty, Linkage::External, log));
    let fty = Rc::new(TyKind::Func(vec![], make_i32()));
    let f = m.add_func(Func::new(intern("f"), fty, Linkage::External, log));
    let func = m.func_mut(f);
    let bb = func.new_block();
    let a = func.push_inst(bb,
      InstKind::Call { callee: Value::Func(g), args: vec![] }, make_i32(), log);
    let b = func.push_inst(bb,
      InstKind::Call { callee: Value::Func(g), args: vec![] }, make_i32(), log);
    let c = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Add, lhs: Value::Inst(a), rhs: Value::Inst(b) },
      make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(c)) }, log);

    assert!(!LocalValueNumbering.run_on_block(&mut m, f, bb));
    assert_eq!(m.func(f).block_insts(bb).count(), 4);
  }
}
