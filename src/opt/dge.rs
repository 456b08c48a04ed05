//! Dead global value elimination.
//!
//! Removes unused function declarations, and unused internal/inline
//! functions and global variables. Removal of a *defined* internal value is
//! reported as a warning, since it usually indicates dead source code.

use crate::pass::ModulePass;
use crate::types::ir::{Module, Value};

/// The `dead_glob_elim` pass.
#[derive(Default, Debug, Clone, Copy)]
pub struct DeadGlobalElim;

impl ModulePass for DeadGlobalElim {
  fn run_on_module(&mut self, m: &mut Module) -> bool {
    let mut changed = false;
    let globals: Vec<_> = m.globals().map(|(id, _)| id).collect();
    for id in globals {
      let g = m.global(id);
      if g.linkage.is_internal() && !m.value_used(Value::Global(id)) {
        m.global(id).logger.warning("unused internal global variable");
        m.erase_global(id);
        changed = true;
      }
    }
    for id in m.func_ids() {
      let f = m.func(id);
      if m.value_used(Value::Func(id)) { continue }
      let is_internal = f.linkage.is_internal();
      if is_internal && f.is_defined() {
        f.logger.warning("unused internal function definition");
      }
      if !f.is_defined() || is_internal {
        m.erase_func(id);
        changed = true;
      }
    }
    changed
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::pass::ModulePass;
  use crate::logger::Logger;
  use crate::types::ir::{Func, Global, Linkage};
  use crate::types::ty::{make_i32, TyKind};
  use crate::intern;
  use std::rc::Rc;

  #[test]
  fn removes_unused_internal_values() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let init = match m.make_i32(0) {
      Value::Const(c) => c,
      _ => unreachable!(),
    };
    m.add_global(Global::new(intern("unused_tbl"), make_i32(), Linkage::Internal,
      Some(init), log));
    let fty = Rc::new(TyKind::Func(vec![], make_i32()));
    // an unused declaration goes regardless of linkage
    m.add_func(Func::new(intern("undeclared"), fty.clone(), Linkage::External, log));
    // an external definition stays
    let ext = m.add_func(Func::new(intern("main"), fty, Linkage::External, log));
    {
      let f = m.func_mut(ext);
      let bb = f.new_block();
      f.set_terminator(bb, crate::types::ir::InstKind::Ret { val: None }, log);
    }
    assert!(DeadGlobalElim.run_on_module(&mut m));
    assert_eq!(m.globals().count(), 0);
    let names: Vec<_> = m.funcs().map(|(_, f)| f.name).collect();
    assert_eq!(names, [intern("main")]);
    // idempotent: the second run changes nothing
    assert!(!DeadGlobalElim.run_on_module(&mut m));
  }
}
