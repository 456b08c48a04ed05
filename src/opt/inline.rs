//! Function inlining.
//!
//! Calls to functions with `inline` linkage are replaced by a copy of the
//! callee body when the body is small enough and the callee is not part of a
//! recursion cycle in the static call graph. The call block is split at the
//! call site; callee returns become jumps to the continuation block, and a
//! phi merges the returned values when there is more than one return.

use std::collections::{HashMap, HashSet};
use crate::pass::ModulePass;
use crate::types::ty::TyExt;
use crate::types::ir::{BlockId, FuncId, InstId, InstKind, Linkage, Module, Value};

/// Bodies above this many instructions are never inlined.
const MAX_INLINE_INSTS: usize = 48;

/// The `inline` pass.
#[derive(Default, Debug, Clone, Copy)]
pub struct Inliner;

impl ModulePass for Inliner {
  fn run_on_module(&mut self, m: &mut Module) -> bool {
    let candidates = inline_candidates(m);
    if candidates.is_empty() { return false }
    let mut changed = false;
    for caller in m.func_ids() {
      if !m.func(caller).is_defined() { continue }
      for (site, callee) in call_sites(m, caller, &candidates) {
        inline_site(m, caller, site, callee);
        changed = true;
      }
    }
    changed
  }
}

/// Defined `inline` functions under the size threshold and outside every
/// recursion cycle.
fn inline_candidates(m: &Module) -> HashSet<FuncId> {
  let mut edges: HashMap<FuncId, Vec<FuncId>> = HashMap::new();
  for (id, f) in m.funcs() {
    let mut callees = Vec::new();
    for b in f.blocks() {
      for i in f.block_insts(b) {
        if let InstKind::Call { callee: Value::Func(g), .. } = f.inst(i).kind {
          callees.push(g)
        }
      }
    }
    edges.insert(id, callees);
  }
  m.funcs()
    .filter(|&(id, f)| {
      f.linkage == Linkage::Inline && f.is_defined()
        && body_size(m, id) <= MAX_INLINE_INSTS
        && has_return(f)
        && !on_cycle(&edges, id)
    })
    .map(|(id, _)| id)
    .collect()
}

/// Does any block end in a return? A body that never returns cannot supply
/// the call's result value, so it is not inlined.
fn has_return(f: &crate::types::ir::Func) -> bool {
  f.blocks().any(|b| {
    f.terminator(b).is_some_and(|t| matches!(f.inst(t).kind, InstKind::Ret { .. }))
  })
}

fn body_size(m: &Module, f: FuncId) -> usize {
  let f = m.func(f);
  f.blocks().map(|b| f.block_insts(b).count()).sum()
}

/// Can `start` reach itself through the call graph?
fn on_cycle(edges: &HashMap<FuncId, Vec<FuncId>>, start: FuncId) -> bool {
  let mut visited = HashSet::new();
  let mut stack: Vec<FuncId> = edges.get(&start).into_iter().flatten().copied().collect();
  while let Some(f) = stack.pop() {
    if f == start { return true }
    if visited.insert(f) {
      stack.extend(edges.get(&f).into_iter().flatten().copied());
    }
  }
  false
}

/// The call sites in `caller` whose callee is an inline candidate. Collected
/// up front; inlining one site does not invalidate the ids of the others.
fn call_sites(m: &Module, caller: FuncId, candidates: &HashSet<FuncId>) -> Vec<(InstId, FuncId)> {
  let f = m.func(caller);
  let mut sites = Vec::new();
  for b in f.blocks() {
    for i in f.block_insts(b) {
      if let InstKind::Call { callee: Value::Func(g), .. } = f.inst(i).kind {
        if candidates.contains(&g) && g != caller {
          sites.push((i, g))
        }
      }
    }
  }
  sites
}

/// Splice a copy of `callee` into `caller` at call instruction `site`.
fn inline_site(m: &mut Module, caller: FuncId, site: InstId, callee: FuncId) {
  let call_block = m.func(caller).inst(site).block;
  let call_args = match &m.func(caller).inst(site).kind {
    InstKind::Call { args, .. } => args.clone(),
    _ => unreachable!("call site is not a call"),
  };

  // snapshot the callee body
  struct CopyInst {
    block: BlockId,
    kind: InstKind,
    ty: crate::types::ty::Ty,
    logger: crate::logger::Logger,
    id: InstId,
  }
  let (callee_blocks, snapshot) = {
    let g = m.func(callee);
    let blocks: Vec<BlockId> = g.blocks().collect();
    let mut insts = Vec::new();
    for &b in &blocks {
      for i in g.block_insts(b) {
        let inst = g.inst(i);
        insts.push(CopyInst {
          block: b, kind: inst.kind.clone(), ty: inst.ty.clone(),
          logger: inst.logger, id: i,
        });
      }
    }
    (blocks, insts)
  };

  let placeholder = m.make_i32(0);
  let cont = m.func_mut(caller).split_block(call_block, site);

  // fresh blocks for the copy
  let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
  for &b in &callee_blocks {
    let nb = m.func_mut(caller).new_block();
    block_map.insert(b, nb);
  }

  // first pass: create every instruction with placeholder operands, so phis
  // may reference copies that do not exist yet
  let mut inst_map: HashMap<InstId, InstId> = HashMap::new();
  let mut ret_edges: Vec<(BlockId, Option<Value>)> = Vec::new();
  for ci in &snapshot {
    let nb = block_map[&ci.block];
    let kind = match &ci.kind {
      InstKind::Ret { val } => {
        ret_edges.push((nb, *val));
        InstKind::Jump { target: cont }
      }
      InstKind::Jump { target } => InstKind::Jump { target: block_map[target] },
      InstKind::Branch { then_bb, else_bb, .. } => InstKind::Branch {
        cond: placeholder,
        then_bb: block_map[then_bb],
        else_bb: block_map[else_bb],
      },
      InstKind::Phi { incoming } => InstKind::Phi {
        incoming: incoming.iter().map(|(b, _)| (block_map[b], placeholder)).collect(),
      },
      other => {
        let mut kind = other.clone();
        for slot in 0..kind.operands().len() {
          kind = replace_slot(kind, slot, placeholder);
        }
        kind
      }
    };
    let new_id = m.func_mut(caller).push_inst(nb, kind, ci.ty.clone(), ci.logger);
    inst_map.insert(ci.id, new_id);
  }

  // second pass: patch every operand slot to the remapped value
  let remap = |v: Value| match v {
    Value::Arg(n) => call_args[n as usize],
    Value::Inst(i) => Value::Inst(inst_map[&i]),
    other => other,
  };
  for ci in &snapshot {
    let new_id = inst_map[&ci.id];
    for (slot, v) in ci.kind.operands().into_iter().enumerate() {
      // returns were rewritten into operand-less jumps
      if matches!(ci.kind, InstKind::Ret { .. }) { break }
      m.func_mut(caller).set_operand(new_id, slot as u32, remap(v));
    }
  }

  // merge the returned values in the continuation block
  let ret_ty = m.func(caller).inst(site).ty.clone();
  if !ret_ty.is_void() && !m.func(caller).uses(Value::Inst(site)).is_empty() {
    let result = match &ret_edges[..] {
      [] => unreachable!("callee body never returns"),
      [(_, v)] => remap(v.expect("non-void return")),
      edges => {
        let incoming = edges.iter()
          .map(|&(b, v)| (b, remap(v.expect("non-void return"))))
          .collect();
        let func = m.func_mut(caller);
        let first = func.block_insts(cont).next().expect("continuation has a terminator");
        let logger = func.inst(first).logger;
        Value::Inst(func.insert_before(first, InstKind::Phi { incoming }, ret_ty, logger))
      }
    };
    m.func_mut(caller).replace_all_uses_with(Value::Inst(site), result);
  }

  // retire the call and jump into the copied entry
  let logger = m.func(caller).inst(site).logger;
  let entry_copy = block_map[&callee_blocks[0]];
  let func = m.func_mut(caller);
  func.erase(site);
  func.push_inst(call_block, InstKind::Jump { target: entry_copy },
    crate::types::ty::make_void(), logger);
}

/// Rebuild `kind` with operand `slot` replaced by `v`. Only used during the
/// placeholder pass, where the shape of the instruction is preserved.
fn replace_slot(mut kind: InstKind, slot: usize, v: Value) -> InstKind {
  match &mut kind {
    InstKind::Binary { lhs, rhs, .. } =>
      *(if slot == 0 { lhs } else { rhs }) = v,
    InstKind::Unary { arg, .. } | InstKind::Cast { arg } => *arg = v,
    InstKind::Load { addr } => *addr = v,
    InstKind::Store { val, addr } =>
      *(if slot == 0 { val } else { addr }) = v,
    InstKind::Access { base, index, .. } =>
      *(if slot == 0 { base } else { index }) = v,
    InstKind::Call { callee, args } =>
      *(if slot == 0 { callee } else { &mut args[slot - 1] }) = v,
    InstKind::Ret { val: Some(val) } => *val = v,
    _ => {}
  }
  kind
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::logger::Logger;
  use crate::types::ir::{BinOp, Func, Linkage};
  use crate::types::ty::{make_i32, TyKind};
  use crate::intern;
  use std::rc::Rc;

  /// inline int twice(int x) { return x + x; }
  fn make_twice(m: &mut Module) -> FuncId {
    let log = Logger::none(intern("t"));
    let gty = Rc::new(TyKind::Func(vec![make_i32()], make_i32()));
    let g = m.add_func(Func::new(intern("twice"), gty, Linkage::Inline, log));
    let func = m.func_mut(g);
    let bb = func.new_block();
    let add = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Add, lhs: Value::Arg(0), rhs: Value::Arg(0) },
      make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(add)) }, log);
    g
  }

  #[test]
  fn straight_line_callee_is_spliced_in() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let g = make_twice(&mut m);
    let fty = Rc::new(TyKind::Func(vec![make_i32()], make_i32()));
    let f = m.add_func(Func::new(intern("f"), fty, Linkage::External, log));
    let func = m.func_mut(f);
    let bb = func.new_block();
    let call = func.push_inst(bb,
      InstKind::Call { callee: Value::Func(g), args: vec![Value::Arg(0)] },
      make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(call)) }, log);

    assert!(Inliner.run_on_module(&mut m));
    let func = m.func(f);
    func.verify();
    // no calls remain in f
    for b in func.blocks() {
      for i in func.block_insts(b) {
        assert!(!matches!(func.inst(i).kind, InstKind::Call { .. }));
      }
    }
    // and g is now unused, eligible for dge
    assert!(!m.value_used(Value::Func(g)));
  }

  #[test]
  fn recursive_inline_functions_are_skipped() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let gty = Rc::new(TyKind::Func(vec![make_i32()], make_i32()));
    let g = m.add_func(Func::new(intern("rec"), gty, Linkage::Inline, log));
    let func = m.func_mut(g);
    let bb = func.new_block();
    let call = func.push_inst(bb,
      InstKind::Call { callee: Value::Func(g), args: vec![Value::Arg(0)] },
      make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(call)) }, log);

    assert!(!Inliner.run_on_module(&mut m));
  }
}
