//! Final backend cleanups and assembly emission.
//!
//! For each function: run liveness and linear scan, substitute physical
//! registers and frame slots for virtual registers (spilled values are
//! staged through the reserved scratch registers `r12` and `lr`), lay out
//! the frame, synthesize the prologue and epilogue with the final frame
//! size, run a trivial peephole (self-moves, branches to the next label),
//! and print the module as assembly text.
//!
//! Frame layout, from `sp` upward after the prologue:
//!
//! ```text
//! [sp + 0            ..  outgoing)   outgoing call arguments
//! [outgoing          ..  alloca_size) alloca slots
//! [alloca_size       ..  + 4*slots)  spill slots
//! ```
//!
//! `r11` is set up as a frame pointer holding the caller's `sp`, so incoming
//! stack arguments sit at `[r11, #0]` upward regardless of frame size.

use std::fmt::Write;
use crate::types::ir::Linkage;
use crate::types::mir::{MFunc, MInst, MModule, Opcode, Operand, PReg, Reg};
use super::liveness;
use super::regalloc::{self, AllocError, Assignment};

/// Emit a whole module as assembly text.
pub fn emit_module(mm: &mut MModule, w: &mut String) -> Result<(), AllocError> {
  writeln!(w, "\t.text").expect("string write");
  let mut ctors = Vec::new();
  for mf in &mut mm.funcs {
    finish_func(mf)?;
    if mf.linkage == Linkage::GlobalCtor { ctors.push(mf.name) }
    write_func(mf, w);
  }
  if !mm.data.is_empty() {
    writeln!(w, "\t.data").expect("string write");
    for (name, linkage, directives) in &mm.data {
      if !linkage.is_internal() {
        writeln!(w, "\t.global\t{name}").expect("string write");
      }
      writeln!(w, "\t.align\t2").expect("string write");
      writeln!(w, "{name}:").expect("string write");
      for d in directives {
        writeln!(w, "{d}").expect("string write");
      }
    }
  }
  if !mm.rodata.is_empty() {
    writeln!(w, "\t.section\t.rodata").expect("string write");
    for (label, bytes) in &mm.rodata {
      writeln!(w, "{label}:").expect("string write");
      for b in bytes {
        writeln!(w, "\t.byte\t{b}").expect("string write");
      }
    }
  }
  if !ctors.is_empty() {
    writeln!(w, "\t.section\t.init_array,\"aw\"").expect("string write");
    writeln!(w, "\t.align\t2").expect("string write");
    for name in ctors {
      writeln!(w, "\t.word\t{name}").expect("string write");
    }
  }
  Ok(())
}

fn write_func(mf: &MFunc, w: &mut String) {
  if !mf.linkage.is_internal() {
    writeln!(w, "\t.global\t{}", mf.name).expect("string write");
  }
  writeln!(w, "{}:", mf.name).expect("string write");
  for inst in &mf.insts {
    writeln!(w, "{inst}").expect("string write");
  }
}

/// Allocate, substitute, frame and peephole one function in place.
pub fn finish_func(mf: &mut MFunc) -> Result<(), AllocError> {
  let lv = liveness::analyze(mf);
  let alloc = regalloc::allocate(mf, &lv)?;
  log::debug!("{}: {} vregs, {} spilled", mf.name, mf.vregs.len(), alloc.num_slots);
  substitute(mf, &alloc);
  add_frame(mf, &alloc);
  peephole(mf);
  Ok(())
}

/// The first and second scratch register for spill traffic. `r12` is never
/// allocated; `lr` is saved by every prologue, and a reload into it is
/// always immediately before the instruction that reads it.
const SCRATCH: [PReg; 2] = [PReg::R12, PReg::LR];

fn substitute(mf: &mut MFunc, alloc: &regalloc::AllocResult) {
  let spill_base = mf.alloca_size;
  let slot_mem = |slot: u32| Operand::Mem {
    base: Reg::Phys(PReg::SP),
    off: (spill_base + 4 * slot) as i32,
  };
  let mut out: Vec<MInst> = Vec::with_capacity(mf.insts.len());
  for mut inst in std::mem::take(&mut mf.insts) {
    let mut scratch = SCRATCH.iter().copied();
    // operand reads: spilled registers are reloaded just before the
    // instruction
    for o in &mut inst.oprs {
      let (reg, is_mem) = match o {
        Operand::Reg(Reg::Virt(v)) => (*v, false),
        Operand::Mem { base: Reg::Virt(v), .. } => (*v, true),
        _ => continue,
      };
      match alloc.map[&reg] {
        Assignment::Reg(p) => replace_reg(o, p, is_mem),
        Assignment::Slot(s) => {
          let sc = scratch.next().expect("more spilled operands than scratch registers");
          out.push(MInst::with_dest(Opcode::Ldr, Operand::phys(sc), [slot_mem(s)]));
          replace_reg(o, sc, is_mem);
        }
      }
    }
    // a spilled destination computes into the first scratch and stores after
    let mut store_after = None;
    if let Some(Operand::Reg(Reg::Virt(v))) = inst.dest {
      match alloc.map[&v] {
        Assignment::Reg(p) => inst.dest = Some(Operand::phys(p)),
        Assignment::Slot(s) => {
          inst.dest = Some(Operand::phys(SCRATCH[0]));
          store_after = Some(MInst::new(Opcode::Str,
            [Operand::phys(SCRATCH[0]), slot_mem(s)]));
        }
      }
    }
    out.push(inst);
    out.extend(store_after);
  }
  mf.insts = out;
}

fn replace_reg(o: &mut Operand, p: PReg, is_mem: bool) {
  if is_mem {
    if let Operand::Mem { base, .. } = o { *base = Reg::Phys(p) }
  } else {
    *o = Operand::phys(p);
  }
}

/// Insert the prologue and epilogue now that the frame size and the set of
/// callee-saved registers are known.
fn add_frame(mf: &mut MFunc, alloc: &regalloc::AllocResult) {
  let frame = (mf.alloca_size + 4 * alloc.num_slots + 7) / 8 * 8;
  // a leaf function with no frame and no saved registers returns directly
  if !mf.has_calls && frame == 0 && alloc.used_callee_saved.is_empty()
    && !reads_frame_pointer(mf)
  {
    mf.push(MInst::new(Opcode::Bx, [Operand::phys(PReg::LR)]));
    return
  }
  let mut saved: Vec<Operand> = alloc.used_callee_saved.iter()
    .map(|&r| Operand::phys(r))
    .collect();
  saved.push(Operand::phys(PReg(11)));
  let pushed = (saved.len() + 1) as i32 * 4;

  let mut prologue = Vec::new();
  prologue.push(MInst::new(Opcode::Push,
    saved.iter().cloned().chain([Operand::phys(PReg::LR)])));
  prologue.push(MInst::with_dest(Opcode::Add, Operand::phys(PReg(11)),
    [Operand::phys(PReg::SP), Operand::Imm(pushed)]));
  adjust_sp(&mut prologue, Opcode::Sub, frame);

  let mut epilogue = Vec::new();
  adjust_sp(&mut epilogue, Opcode::Add, frame);
  epilogue.push(MInst::new(Opcode::Pop,
    saved.iter().cloned().chain([Operand::phys(PReg::PC)])));

  let mut insts = std::mem::take(&mut mf.insts);
  insts.splice(0..0, prologue);
  insts.extend(epilogue);
  mf.insts = insts;
}

/// Does any instruction read through `r11`? Functions taking stack
/// arguments do, and then need the full prologue that establishes it.
fn reads_frame_pointer(mf: &MFunc) -> bool {
  mf.insts.iter().any(|i| i.oprs.iter().any(|o| {
    matches!(o, Operand::Mem { base: Reg::Phys(p), .. } if p.0 == 11)
  }))
}

/// `sub sp, sp, #n` / `add sp, sp, #n`, staging `n` through the scratch
/// register when it does not encode as a flexible operand.
fn adjust_sp(out: &mut Vec<MInst>, op: Opcode, n: u32) {
  if n == 0 { return }
  if super::isel::is_op2_imm(n) {
    out.push(MInst::with_dest(op, Operand::phys(PReg::SP),
      [Operand::phys(PReg::SP), Operand::Imm(n as i32)]));
  } else {
    out.push(MInst::with_dest(Opcode::Ldr, Operand::phys(PReg::R12),
      [Operand::Imm(n as i32)]));
    out.push(MInst::with_dest(op, Operand::phys(PReg::SP),
      [Operand::phys(PReg::SP), Operand::phys(PReg::R12)]));
  }
}

/// Trivial cleanups: self-moves and branches to the label that immediately
/// follows.
fn peephole(mf: &mut MFunc) {
  let insts = std::mem::take(&mut mf.insts);
  let mut out: Vec<MInst> = Vec::with_capacity(insts.len());
  for (idx, inst) in insts.iter().enumerate() {
    // mov rX, rX
    if inst.opcode == Opcode::Mov && inst.cond.is_none() {
      if let (Some(d), Some(s)) = (&inst.dest, inst.oprs.first()) {
        if d == s { continue }
      }
    }
    // b .L directly before .L:
    if inst.opcode == Opcode::B {
      if let Some(next) = insts.get(idx + 1) {
        if next.opcode == Opcode::Label && next.label_opr() == inst.label_opr() {
          continue
        }
      }
    }
    out.push(inst.clone());
  }
  mf.insts = out;
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::intern;

  #[test]
  fn peephole_drops_self_moves_and_adjacent_branches() {
    let mut mf = MFunc::new(intern("f"), Linkage::External, 0);
    let l = mf.fresh_label();
    mf.push(MInst::with_dest(Opcode::Mov,
      Operand::phys(PReg::R0), [Operand::phys(PReg::R0)]));
    mf.push(MInst::new(Opcode::B, [Operand::Label(l)]));
    mf.push(MInst::new(Opcode::Label, [Operand::Label(l)]));
    mf.push(MInst::new(Opcode::Bx, [Operand::phys(PReg::LR)]));
    peephole(&mut mf);
    assert_eq!(mf.insts.len(), 2);
    assert_eq!(mf.insts[0].opcode, Opcode::Label);
  }

  #[test]
  fn peephole_keeps_distant_branches() {
    let mut mf = MFunc::new(intern("f"), Linkage::External, 0);
    let l0 = mf.fresh_label();
    let l1 = mf.fresh_label();
    mf.push(MInst::new(Opcode::B, [Operand::Label(l1)]));
    mf.push(MInst::new(Opcode::Label, [Operand::Label(l0)]));
    mf.push(MInst::new(Opcode::Label, [Operand::Label(l1)]));
    peephole(&mut mf);
    assert_eq!(mf.insts.len(), 3);
  }

  #[test]
  fn frame_is_eight_byte_aligned() {
    let mut mf = MFunc::new(intern("f"), Linkage::External, 0);
    mf.alloca_size = 4;
    let alloc = regalloc::AllocResult::default();
    add_frame(&mut mf, &alloc);
    // push; add r11; sub sp, sp, #8
    assert!(mf.insts.iter().any(|i| i.opcode == Opcode::Sub
      && i.oprs.last() == Some(&Operand::Imm(8))));
  }

  #[test]
  fn spilled_values_round_trip_through_scratch() {
    let mut mf = MFunc::new(intern("f"), Linkage::External, 0);
    let v = mf.fresh_vreg();
    mf.alloca_size = 0;
    mf.push(MInst::with_dest(Opcode::Mov, Operand::virt(v), [Operand::Imm(7)]));
    mf.push(MInst::with_dest(Opcode::Add,
      Operand::phys(PReg::R0), [Operand::virt(v), Operand::Imm(1)]));
    let mut alloc = regalloc::AllocResult::default();
    alloc.map.insert(v, Assignment::Slot(0));
    alloc.num_slots = 1;
    substitute(&mut mf, &alloc);
    // def: mov r12, #7; str r12, [sp]; use: ldr r12, [sp]; add r0, r12, #1
    let ops: Vec<Opcode> = mf.insts.iter().map(|i| i.opcode).collect();
    assert_eq!(ops, [Opcode::Mov, Opcode::Str, Opcode::Ldr, Opcode::Add]);
    assert_eq!(mf.insts[1].oprs[1],
      Operand::Mem { base: Reg::Phys(PReg::SP), off: 0 });
  }
}
