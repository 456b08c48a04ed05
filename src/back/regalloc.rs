//! Linear-scan register allocation.
//!
//! Live intervals are scanned in ascending start order while an active list
//! is kept sorted by ascending end. At each interval: expired actives free
//! their registers; a free register is taken when available (honoring the
//! ABI hint when possible); otherwise the active interval with the largest
//! end is spilled to a stack slot if it ends later than the new interval,
//! which steals its register, or the new interval is spilled itself.
//!
//! Intervals overlapping a call position only receive callee-saved
//! registers; the caller-saved half of the pool does not survive a `bl`.
//! Callee-saved registers actually used are reported so the prologue and
//! epilogue can preserve them.

use std::collections::BTreeMap;
use std::fmt;
use crate::types::mir::{MFunc, PReg, VRegId};
use super::liveness::{FuncLiveness, LiveInterval};

/// Where a virtual register ended up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Assignment {
  /// A physical register.
  Reg(PReg),
  /// A numbered 4-byte spill slot in the frame.
  Slot(u32),
}

/// The allocator's output for one function.
#[derive(Debug, Default)]
pub struct AllocResult {
  /// Assignment per virtual register.
  pub map: BTreeMap<VRegId, Assignment>,
  /// Callee-saved registers handed out, in register order.
  pub used_callee_saved: Vec<PReg>,
  /// The number of spill slots allocated.
  pub num_slots: u32,
}

/// Allocation failure; compilation cannot continue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocError {
  /// The register that could not be assigned.
  pub vreg: VRegId,
}

impl fmt::Display for AllocError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "register allocation ran out of registers for vr{}", self.vreg.0)
  }
}

impl std::error::Error for AllocError {}

struct Active {
  vreg: VRegId,
  interval: LiveInterval,
  reg: PReg,
}

/// Run linear scan over the intervals of `mf`.
pub fn allocate(mf: &MFunc, lv: &FuncLiveness) -> Result<AllocResult, AllocError> {
  // sorted by ascending start; ties resolved by register number so the scan
  // order is deterministic
  let mut intervals: Vec<(VRegId, LiveInterval)> =
    lv.intervals.iter().map(|(&v, &iv)| (v, iv)).collect();
  intervals.sort_by_key(|&(v, iv)| (iv.start, v));

  let crosses_call = |iv: &LiveInterval| {
    lv.call_positions.iter().any(|&p| iv.start <= p && p <= iv.end)
  };

  let mut res = AllocResult::default();
  let mut free: Vec<PReg> = PReg::ALLOCATABLE.to_vec();
  let mut active: Vec<Active> = Vec::new();

  for &(vreg, interval) in &intervals {
    // 1. expire old intervals
    let mut i = 0;
    while i < active.len() {
      if active[i].interval.end < interval.start {
        let a = active.remove(i);
        free.push(a.reg);
      } else {
        i += 1;
      }
    }
    free.sort();

    let callee_only = crosses_call(&interval);
    let allowed = |r: PReg| !callee_only || r.is_callee_saved();

    // 2. take a free register if one is allowed
    let hint = mf.vregs[vreg].hint.filter(|&h| allowed(h));
    let pick = hint.and_then(|h| free.iter().position(|&r| r == h))
      .or_else(|| free.iter().position(|&r| allowed(r)));
    if let Some(pos) = pick {
      let reg = free.remove(pos);
      assign(&mut res, vreg, reg);
      insert_active(&mut active, Active { vreg, interval, reg });
      continue
    }

    // 3. no free register: spill the furthest-ending allowed active, or the
    // new interval itself
    let victim = active.iter().enumerate().rev()
      .find(|(_, a)| allowed(a.reg))
      .map(|(i, _)| i);
    match victim {
      Some(vi) if active[vi].interval.end > interval.end => {
        let spilled = active.remove(vi);
        let slot = fresh_slot(&mut res);
        res.map.insert(spilled.vreg, Assignment::Slot(slot));
        assign(&mut res, vreg, spilled.reg);
        insert_active(&mut active, Active { vreg, interval, reg: spilled.reg });
      }
      Some(_) => {
        let slot = fresh_slot(&mut res);
        res.map.insert(vreg, Assignment::Slot(slot));
      }
      // every compatible register is reserved: cannot spill our way out
      None if callee_only => return Err(AllocError { vreg }),
      None => {
        let slot = fresh_slot(&mut res);
        res.map.insert(vreg, Assignment::Slot(slot));
      }
    }
  }
  res.used_callee_saved.sort();
  res.used_callee_saved.dedup();
  Ok(res)
}

fn fresh_slot(res: &mut AllocResult) -> u32 {
  let s = res.num_slots;
  res.num_slots += 1;
  s
}

fn assign(res: &mut AllocResult, vreg: VRegId, reg: PReg) {
  if reg.is_callee_saved() {
    res.used_callee_saved.push(reg);
  }
  res.map.insert(vreg, Assignment::Reg(reg));
}

/// Keep the active list sorted by ascending interval end.
fn insert_active(active: &mut Vec<Active>, a: Active) {
  let pos = active.iter().position(|x| x.interval.end > a.interval.end)
    .unwrap_or(active.len());
  active.insert(pos, a);
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::intern;
  use crate::types::ir::Linkage;
  use std::collections::BTreeMap;

  fn fake_liveness(ivs: &[(u32, usize, usize)]) -> FuncLiveness {
    let mut intervals = BTreeMap::new();
    for &(v, s, e) in ivs {
      intervals.insert(VRegId(v), LiveInterval { start: s, end: e });
    }
    FuncLiveness { intervals, call_positions: vec![], num_positions: 0 }
  }

  fn func_with_vregs(n: u32) -> MFunc {
    let mut mf = MFunc::new(intern("f"), Linkage::External, 0);
    for _ in 0..n { mf.fresh_vreg(); }
    mf
  }

  #[test]
  fn non_overlapping_intervals_share_a_register() {
    let mf = func_with_vregs(2);
    let lv = fake_liveness(&[(0, 0, 1), (1, 2, 3)]);
    let res = allocate(&mf, &lv).unwrap();
    assert_eq!(res.map[&VRegId(0)], res.map[&VRegId(1)]);
    assert_eq!(res.num_slots, 0);
  }

  #[test]
  fn overlapping_assignments_never_collide() {
    // 32 simultaneously-live registers: more than the pool, so some spill,
    // and no two register-assigned intervals may overlap on the same preg
    let mf = func_with_vregs(32);
    let ivs: Vec<(u32, usize, usize)> = (0..32).map(|v| (v, 0, 40)).collect();
    let lv = fake_liveness(&ivs);
    let res = allocate(&mf, &lv).unwrap();
    assert!(res.num_slots > 0, "32 live values cannot all fit in registers");
    let regs: Vec<PReg> = res.map.values()
      .filter_map(|a| if let Assignment::Reg(r) = a { Some(*r) } else { None })
      .collect();
    let mut dedup = regs.clone();
    dedup.sort();
    dedup.dedup();
    assert_eq!(regs.len(), dedup.len(), "one register assigned to two live intervals");
  }

  #[test]
  fn spill_prefers_the_furthest_end() {
    let mf = func_with_vregs(12);
    // vr0..vr10 fill the pool; vr0 lives longest. vr11 then arrives while
    // everything is live, so vr0 is evicted and vr11 takes its register.
    let mut ivs: Vec<(u32, usize, usize)> = (1..11).map(|v| (v, 0, 20)).collect();
    ivs.push((0, 0, 100));
    ivs.push((11, 5, 30));
    let lv = fake_liveness(&ivs);
    let res = allocate(&mf, &lv).unwrap();
    assert!(matches!(res.map[&VRegId(0)], Assignment::Slot(_)));
    assert!(matches!(res.map[&VRegId(11)], Assignment::Reg(_)));
  }

  #[test]
  fn call_crossing_intervals_get_callee_saved_registers() {
    let mf = func_with_vregs(2);
    let mut lv = fake_liveness(&[(0, 0, 4), (1, 3, 4)]);
    lv.call_positions.push(2);
    let res = allocate(&mf, &lv).unwrap();
    let Assignment::Reg(r0) = res.map[&VRegId(0)] else { panic!("vr0 spilled") };
    assert!(r0.is_callee_saved(), "vr0 lives across the call");
    let Assignment::Reg(r1) = res.map[&VRegId(1)] else { panic!("vr1 spilled") };
    assert!(!r1.is_callee_saved(), "vr1 does not cross the call");
    assert_eq!(res.used_callee_saved, [r0]);
  }

  #[test]
  fn hints_are_honored_when_free() {
    let mut mf = MFunc::new(intern("f"), Linkage::External, 0);
    mf.fresh_vreg_hinted(PReg::R1);
    let lv = fake_liveness(&[(0, 0, 1)]);
    let res = allocate(&mf, &lv).unwrap();
    assert_eq!(res.map[&VRegId(0)], Assignment::Reg(PReg::R1));
  }
}
