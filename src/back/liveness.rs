//! Liveness analysis on the machine IR.
//!
//! Rebuilds the control-flow graph of a function from its linear instruction
//! list (blocks begin at `LABEL` pseudo-instructions, with fall-through edges
//! unless the previous instruction leaves the block unconditionally), then
//! computes per-block `var_kill` / `ue_var` / `live_out` sets by iterating
//!
//! ```text
//! live_out(B) = U_{S in succ(B)} (ue_var(S) U (live_out(S) \ var_kill(S)))
//! ```
//!
//! to a fixpoint over a reverse post-order of the reverse CFG, and finally
//! produces one conservative live interval per virtual register at block
//! granularity: the interval covers every position where the register is
//! defined, upward-exposed or live-out.

use std::collections::{BTreeMap, HashMap};
use bit_set::BitSet;
use crate::Idx;
use crate::types::mir::{LabelId, MFunc, Opcode};
use crate::types::mir::VRegId;

/// A live interval in linear block positions; `start <= end`, and the
/// interval covers every real use of the register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LiveInterval {
  /// First position the register is live at.
  pub start: usize,
  /// Last position the register is live at.
  pub end: usize,
}

impl LiveInterval {
  /// Do two intervals share any position?
  #[must_use] pub fn overlaps(&self, other: &LiveInterval) -> bool {
    self.start <= other.end && other.start <= self.end
  }
}

/// The result of liveness analysis for one function.
#[derive(Debug, Default)]
pub struct FuncLiveness {
  /// Live interval per virtual register, keyed in register order.
  pub intervals: BTreeMap<VRegId, LiveInterval>,
  /// Positions of blocks containing a call; an interval overlapping one of
  /// these cannot stay in a caller-saved register across it.
  pub call_positions: Vec<usize>,
  /// One past the largest position.
  pub num_positions: usize,
}

#[derive(Default)]
struct BasicBlock {
  insts: Vec<usize>,
  preds: Vec<usize>,
  succs: Vec<usize>,
  var_kill: BitSet,
  ue_var: BitSet,
  live_out: BitSet,
  has_call: bool,
}

/// CFG reconstruction and data-flow state.
struct Analysis<'a> {
  mf: &'a MFunc,
  labels: HashMap<LabelId, usize>,
  blocks: Vec<BasicBlock>,
  order: Vec<usize>,
}

/// Run liveness analysis on one machine function.
#[must_use] pub fn analyze(mf: &MFunc) -> FuncLiveness {
  let mut a = Analysis { mf, labels: HashMap::new(), blocks: vec![], order: vec![] };
  a.build_cfg();
  a.init_def_use();
  a.run_dataflow();
  a.intervals()
}

impl Analysis<'_> {
  fn new_block(&mut self) -> usize {
    self.blocks.push(BasicBlock::default());
    self.blocks.len() - 1
  }

  fn block_for_label(&mut self, l: LabelId) -> usize {
    if let Some(&b) = self.labels.get(&l) { return b }
    let b = self.new_block();
    self.labels.insert(l, b);
    b
  }

  fn add_edge(&mut self, from: usize, to: usize) {
    self.blocks[from].succs.push(to);
    self.blocks[to].preds.push(from);
  }

  fn build_cfg(&mut self) {
    let mut cur = self.new_block();
    self.order.push(cur);
    let insts = &self.mf.insts;
    for (idx, inst) in insts.iter().enumerate() {
      match inst.opcode {
        Opcode::Label => {
          let l = inst.label_opr().expect("label without operand");
          let next = self.block_for_label(l);
          // fall through from the previous block unless it cannot reach here
          let leaves = idx.checked_sub(1).map_or(false, |p| {
            let pi = &insts[p];
            pi.opcode == Opcode::B || pi.opcode == Opcode::Bx || pi.is_func_exit()
          });
          if idx == 0 || !leaves {
            self.add_edge(cur, next);
          }
          cur = next;
          self.order.push(cur);
        }
        op if op.is_cond_branch() => {
          self.blocks[cur].insts.push(idx);
          let target = inst.label_opr().expect("branch without label");
          let t = self.block_for_label(target);
          self.add_edge(cur, t);
          // the not-taken path continues in an anonymous block unless the
          // next instruction starts one anyway
          let next_starts_block = insts.get(idx + 1).map_or(true, |n| {
            n.opcode == Opcode::B || n.opcode == Opcode::Label
          });
          if !next_starts_block {
            let nb = self.new_block();
            self.add_edge(cur, nb);
            cur = nb;
            self.order.push(cur);
          }
        }
        Opcode::B => {
          self.blocks[cur].insts.push(idx);
          let target = inst.label_opr().expect("branch without label");
          let t = self.block_for_label(target);
          self.add_edge(cur, t);
        }
        _ => {
          if inst.opcode == Opcode::Bl || inst.opcode == Opcode::Blx {
            self.blocks[cur].has_call = true;
          }
          self.blocks[cur].insts.push(idx);
        }
      }
    }
  }

  fn init_def_use(&mut self) {
    for b in &mut self.blocks {
      for &idx in &b.insts {
        let inst = &self.mf.insts[idx];
        for v in inst.virt_uses() {
          if !b.var_kill.contains(v.into_usize()) {
            b.ue_var.insert(v.into_usize());
          }
        }
        if let Some(d) = inst.virt_def() {
          b.var_kill.insert(d.into_usize());
        }
      }
    }
  }

  /// Reverse post-order of the reverse CFG, rooted at the exit blocks.
  /// Blocks unreachable from any exit (infinite loops) are appended in
  /// linear order so the fixpoint still covers them.
  fn reverse_rpo(&self) -> Vec<usize> {
    let mut rpo = Vec::with_capacity(self.blocks.len());
    let mut visited = BitSet::with_capacity(self.blocks.len());
    let exits: Vec<usize> = self.order.iter().copied()
      .filter(|&b| self.blocks[b].succs.is_empty())
      .collect();
    for exit in exits {
      self.visit_preds(exit, &mut rpo, &mut visited);
    }
    rpo.reverse();
    for &b in &self.order {
      if !visited.contains(b) { rpo.push(b) }
    }
    rpo
  }

  fn visit_preds(&self, cur: usize, po: &mut Vec<usize>, visited: &mut BitSet) {
    if !visited.insert(cur) { return }
    for &p in &self.blocks[cur].preds {
      self.visit_preds(p, po, visited);
    }
    // post-order on the reverse graph; reversed afterwards into RPO
    po.push(cur);
  }

  fn run_dataflow(&mut self) {
    let rpo = self.reverse_rpo();
    let mut changed = true;
    while changed {
      changed = false;
      for &bid in &rpo {
        let mut out = std::mem::take(&mut self.blocks[bid].live_out);
        let before = out.len();
        for i in 0..self.blocks[bid].succs.len() {
          let s = self.blocks[bid].succs[i];
          let succ = &self.blocks[s];
          out.union_with(&succ.ue_var);
          for v in succ.live_out.iter() {
            if !succ.var_kill.contains(v) { out.insert(v); }
          }
        }
        if out.len() != before { changed = true }
        self.blocks[bid].live_out = out;
      }
    }
  }

  fn intervals(&self) -> FuncLiveness {
    let mut res = FuncLiveness { num_positions: self.order.len(), ..Default::default() };
    for (pos, &bid) in self.order.iter().enumerate() {
      let b = &self.blocks[bid];
      if b.has_call { res.call_positions.push(pos) }
      for set in [&b.var_kill, &b.ue_var, &b.live_out] {
        for v in set.iter() {
          let v = VRegId::from_usize(v);
          res.intervals.entry(v)
            .and_modify(|iv| iv.end = pos)
            .or_insert(LiveInterval { start: pos, end: pos });
        }
      }
    }
    res
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::intern;
  use crate::types::ir::Linkage;
  use crate::types::mir::{MInst, Operand, PReg};

  /// A hand-built `while (n) { n = n - 1; }` loop:
  ///
  /// ```text
  /// .L0:              @ entry
  ///     mov  vr0, r0
  ///     b    .L1
  /// .L1:              @ header
  ///     cmp  vr0, #0
  ///     beq  .L3
  ///     b    .L2
  /// .L2:              @ body
  ///     sub  vr0, vr0, #1
  ///     b    .L1
  /// .L3:              @ exit
  /// ```
  fn loop_func() -> MFunc {
    let mut mf = MFunc::new(intern("f"), Linkage::External, 0);
    let l = [mf.fresh_label(), mf.fresh_label(), mf.fresh_label(), mf.fresh_label()];
    let n = mf.fresh_vreg();
    mf.push(MInst::new(Opcode::Label, [Operand::Label(l[0])]));
    mf.push(MInst::with_dest(Opcode::Mov, Operand::virt(n), [Operand::phys(PReg::R0)]));
    mf.push(MInst::new(Opcode::B, [Operand::Label(l[1])]));
    mf.push(MInst::new(Opcode::Label, [Operand::Label(l[1])]));
    mf.push(MInst::new(Opcode::Cmp, [Operand::virt(n), Operand::Imm(0)]));
    mf.push(MInst::new(Opcode::Beq, [Operand::Label(l[3])]));
    mf.push(MInst::new(Opcode::B, [Operand::Label(l[2])]));
    mf.push(MInst::new(Opcode::Label, [Operand::Label(l[2])]));
    mf.push(MInst::with_dest(Opcode::Sub, Operand::virt(n),
      [Operand::virt(n), Operand::Imm(1)]));
    mf.push(MInst::new(Opcode::B, [Operand::Label(l[1])]));
    mf.push(MInst::new(Opcode::Label, [Operand::Label(l[3])]));
    mf
  }

  #[test]
  fn loop_interval_spans_the_back_edge() {
    let mf = loop_func();
    let lv = analyze(&mf);
    let iv = lv.intervals[&VRegId(0)];
    // vr0 is defined in the entry block (position 1, after the synthetic
    // pre-entry block) and live through the body block feeding the back edge
    assert_eq!(iv.start, 1);
    assert!(iv.end >= 3, "interval must cover the loop body, got {iv:?}");
  }

  #[test]
  fn straight_line_blocks_chain() {
    let mut mf = MFunc::new(intern("f"), Linkage::External, 0);
    let l0 = mf.fresh_label();
    let l1 = mf.fresh_label();
    let v = mf.fresh_vreg();
    mf.push(MInst::new(Opcode::Label, [Operand::Label(l0)]));
    mf.push(MInst::with_dest(Opcode::Mov, Operand::virt(v), [Operand::Imm(1)]));
    mf.push(MInst::new(Opcode::Label, [Operand::Label(l1)]));
    mf.push(MInst::with_dest(Opcode::Add, Operand::virt(v),
      [Operand::virt(v), Operand::Imm(1)]));
    let lv = analyze(&mf);
    // v is upward-exposed in the second block, so it must be live across the
    // fall-through edge
    let iv = lv.intervals[&VRegId(0)];
    assert!(iv.start < iv.end);
  }

  #[test]
  fn call_positions_are_recorded() {
    let mut mf = MFunc::new(intern("f"), Linkage::External, 0);
    let l0 = mf.fresh_label();
    mf.push(MInst::new(Opcode::Label, [Operand::Label(l0)]));
    mf.push(MInst::new(Opcode::Bl, [Operand::Sym(intern("g"))]));
    let lv = analyze(&mf);
    assert!(!lv.call_positions.is_empty());
  }
}
