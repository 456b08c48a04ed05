//! The machine-level IR for the 32-bit ARM target.
//!
//! A machine function is a linear list of [`MInst`]s interleaved with
//! `LABEL` pseudo-instructions that mark basic-block boundaries. Instructions
//! carry an opcode from a closed target-specific enum, an ordered operand
//! list, at most one destination, and an optional condition code. Operand
//! kinds are small value objects with equality and hashing, since they double
//! as keys in liveness sets.

use smallvec::SmallVec;
use crate::{Symbol, Idx};
use super::IdxVec;
use super::ir::Linkage;

mk_id! {
  /// A virtual register, replaced by a physical register or a stack slot
  /// during allocation.
  VRegId(Debug("vr")),
  /// A local label within one function.
  LabelId(Debug("L")),
}

/// A physical ARM register, `r0`..`r15`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PReg(pub u8);

impl PReg {
  /// First argument / return value register.
  pub const R0: PReg = PReg(0);
  /// Second argument register.
  pub const R1: PReg = PReg(1);
  /// Third argument register.
  pub const R2: PReg = PReg(2);
  /// Fourth argument register.
  pub const R3: PReg = PReg(3);
  /// Intra-procedure scratch register, reserved for spill reloads.
  pub const R12: PReg = PReg(12);
  /// The stack pointer.
  pub const SP: PReg = PReg(13);
  /// The link register.
  pub const LR: PReg = PReg(14);
  /// The program counter.
  pub const PC: PReg = PReg(15);

  /// The general-purpose allocation pool, in allocation order: caller-saved
  /// argument registers first, then the callee-saved ones.
  pub const ALLOCATABLE: [PReg; 11] = [
    PReg(0), PReg(1), PReg(2), PReg(3),
    PReg(4), PReg(5), PReg(6), PReg(7), PReg(8), PReg(9), PReg(10),
  ];

  /// Registers the callee must preserve.
  #[must_use] pub fn is_callee_saved(self) -> bool { (4..=10).contains(&self.0) }
}

impl std::fmt::Display for PReg {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.0 {
      13 => write!(f, "sp"),
      14 => write!(f, "lr"),
      15 => write!(f, "pc"),
      n => write!(f, "r{n}"),
    }
  }
}

impl std::fmt::Debug for PReg {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{self}")
  }
}

/// A register operand, virtual before allocation and physical after.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Reg {
  /// A virtual register.
  Virt(VRegId),
  /// A physical register.
  Phys(PReg),
}

impl Reg {
  /// The virtual register id, if this is one.
  #[must_use] pub fn as_virt(self) -> Option<VRegId> {
    if let Reg::Virt(v) = self { Some(v) } else { None }
  }
}

impl std::fmt::Display for Reg {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Reg::Virt(v) => write!(f, "vr{}", v.0),
      Reg::Phys(p) => write!(f, "{p}"),
    }
  }
}

/// An ARM condition code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CondCode {
  Eq, Ne, Lt, Le, Gt, Ge, Lo, Ls, Hi, Hs,
}

impl CondCode {
  /// The code that is true exactly when `self` is false.
  #[must_use] pub fn invert(self) -> CondCode {
    match self {
      CondCode::Eq => CondCode::Ne,
      CondCode::Ne => CondCode::Eq,
      CondCode::Lt => CondCode::Ge,
      CondCode::Le => CondCode::Gt,
      CondCode::Gt => CondCode::Le,
      CondCode::Ge => CondCode::Lt,
      CondCode::Lo => CondCode::Hs,
      CondCode::Ls => CondCode::Hi,
      CondCode::Hi => CondCode::Ls,
      CondCode::Hs => CondCode::Lo,
    }
  }

  /// The assembly suffix, e.g. `eq` in `beq`/`moveq`.
  #[must_use] pub fn to_str(self) -> &'static str {
    match self {
      CondCode::Eq => "eq", CondCode::Ne => "ne",
      CondCode::Lt => "lt", CondCode::Le => "le",
      CondCode::Gt => "gt", CondCode::Ge => "ge",
      CondCode::Lo => "lo", CondCode::Ls => "ls",
      CondCode::Hi => "hi", CondCode::Hs => "hs",
    }
  }
}

/// A machine operand.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
  /// A register.
  Reg(Reg),
  /// An immediate.
  Imm(i32),
  /// A base-plus-offset memory reference.
  Mem {
    /// The base register.
    base: Reg,
    /// The byte offset.
    off: i32,
  },
  /// A local label.
  Label(LabelId),
  /// An external or global symbol.
  Sym(Symbol),
  /// A condition code operand (used by compare-and-set sequences).
  Cond(CondCode),
}

impl Operand {
  /// Shorthand for a virtual register operand.
  #[must_use] pub fn virt(v: VRegId) -> Operand { Operand::Reg(Reg::Virt(v)) }

  /// Shorthand for a physical register operand.
  #[must_use] pub fn phys(p: PReg) -> Operand { Operand::Reg(Reg::Phys(p)) }

  /// The virtual registers this operand reads. A memory operand reads its
  /// base register.
  #[must_use] pub fn virt_regs(&self) -> SmallVec<[VRegId; 1]> {
    match *self {
      Operand::Reg(Reg::Virt(v)) | Operand::Mem { base: Reg::Virt(v), .. } =>
        smallvec::smallvec![v],
      _ => SmallVec::new(),
    }
  }
}

impl std::fmt::Display for Operand {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Operand::Reg(r) => write!(f, "{r}"),
      Operand::Imm(n) => write!(f, "#{n}"),
      Operand::Mem { base, off: 0 } => write!(f, "[{base}]"),
      Operand::Mem { base, off } => write!(f, "[{base}, #{off}]"),
      Operand::Label(l) => write!(f, ".L{}", l.0),
      Operand::Sym(s) => write!(f, "{s}"),
      Operand::Cond(c) => write!(f, "{}", c.to_str()),
    }
  }
}

/// The closed opcode set of the target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Opcode {
  Mov, Mvn,
  Add, Sub, Rsb, Mul,
  And, Orr, Eor,
  Lsl, Lsr, Asr,
  Cmp,
  Ldr, LdrB, Str, StrB,
  B, Beq, Bne, Blt, Ble, Bgt, Bge, Blo, Bls, Bhi, Bhs,
  Bl, Blx, Bx,
  Push, Pop,
  /// Block-boundary pseudo-instruction; operand 0 is the label.
  Label,
  /// `.word` data directive.
  Word,
  /// `.byte` data directive.
  Byte,
  /// `.space` data directive (zero fill).
  Space,
  /// `@`-style assembly comment.
  Comment,
}

impl Opcode {
  /// The conditional branch for a condition code.
  #[must_use] pub fn branch_on(cc: CondCode) -> Opcode {
    match cc {
      CondCode::Eq => Opcode::Beq,
      CondCode::Ne => Opcode::Bne,
      CondCode::Lt => Opcode::Blt,
      CondCode::Le => Opcode::Ble,
      CondCode::Gt => Opcode::Bgt,
      CondCode::Ge => Opcode::Bge,
      CondCode::Lo => Opcode::Blo,
      CondCode::Ls => Opcode::Bls,
      CondCode::Hi => Opcode::Bhi,
      CondCode::Hs => Opcode::Bhs,
    }
  }

  /// Is this a conditional branch?
  #[must_use] pub fn is_cond_branch(self) -> bool {
    matches!(self, Opcode::Beq | Opcode::Bne | Opcode::Blt | Opcode::Ble |
      Opcode::Bgt | Opcode::Bge | Opcode::Blo | Opcode::Bls | Opcode::Bhi | Opcode::Bhs)
  }

  /// Is this any branch (excluding calls, which return)?
  #[must_use] pub fn is_branch(self) -> bool {
    self == Opcode::B || self.is_cond_branch()
  }

  /// The lower-case mnemonic.
  #[must_use] pub fn mnemonic(self) -> &'static str {
    match self {
      Opcode::Mov => "mov", Opcode::Mvn => "mvn",
      Opcode::Add => "add", Opcode::Sub => "sub", Opcode::Rsb => "rsb",
      Opcode::Mul => "mul",
      Opcode::And => "and", Opcode::Orr => "orr", Opcode::Eor => "eor",
      Opcode::Lsl => "lsl", Opcode::Lsr => "lsr", Opcode::Asr => "asr",
      Opcode::Cmp => "cmp",
      Opcode::Ldr => "ldr", Opcode::LdrB => "ldrb",
      Opcode::Str => "str", Opcode::StrB => "strb",
      Opcode::B => "b",
      Opcode::Beq => "beq", Opcode::Bne => "bne",
      Opcode::Blt => "blt", Opcode::Ble => "ble",
      Opcode::Bgt => "bgt", Opcode::Bge => "bge",
      Opcode::Blo => "blo", Opcode::Bls => "bls",
      Opcode::Bhi => "bhi", Opcode::Bhs => "bhs",
      Opcode::Bl => "bl", Opcode::Blx => "blx", Opcode::Bx => "bx",
      Opcode::Push => "push", Opcode::Pop => "pop",
      Opcode::Label | Opcode::Word | Opcode::Byte | Opcode::Space | Opcode::Comment => "",
    }
  }
}

/// One machine instruction (or pseudo-instruction).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MInst {
  /// The opcode.
  pub opcode: Opcode,
  /// The ordered operand list.
  pub oprs: SmallVec<[Operand; 3]>,
  /// The destination, absent for stores, compares, branches and pseudos.
  pub dest: Option<Operand>,
  /// A condition guarding execution, e.g. the `lt` in `movlt`.
  pub cond: Option<CondCode>,
}

impl MInst {
  /// An instruction with no destination.
  #[must_use] pub fn new(opcode: Opcode, oprs: impl IntoIterator<Item = Operand>) -> Self {
    MInst { opcode, oprs: oprs.into_iter().collect(), dest: None, cond: None }
  }

  /// An instruction writing `dest`.
  #[must_use] pub fn with_dest(
    opcode: Opcode, dest: Operand, oprs: impl IntoIterator<Item = Operand>,
  ) -> Self {
    MInst { opcode, oprs: oprs.into_iter().collect(), dest: Some(dest), cond: None }
  }

  /// Attach a condition code to this instruction.
  #[must_use] pub fn when(mut self, cc: CondCode) -> Self {
    self.cond = Some(cc);
    self
  }

  /// The label marked by this instruction, if it is a `LABEL` pseudo or a
  /// branch to a local label.
  #[must_use] pub fn label_opr(&self) -> Option<LabelId> {
    match self.oprs.first() {
      Some(&Operand::Label(l)) => Some(l),
      _ => None,
    }
  }

  /// Does control fall out of the function here? Returns are `bx lr` or a
  /// `pop` that includes `pc`.
  #[must_use] pub fn is_func_exit(&self) -> bool {
    match self.opcode {
      Opcode::Bx => true,
      Opcode::Pop => self.oprs.iter().any(|o| *o == Operand::phys(PReg::PC)),
      _ => false,
    }
  }

  /// The virtual registers this instruction reads: every operand. Stores
  /// carry both the stored register and the memory operand in `oprs`, so a
  /// memory base is always picked up here.
  #[must_use] pub fn virt_uses(&self) -> SmallVec<[VRegId; 3]> {
    let mut out = SmallVec::new();
    for o in &self.oprs { out.extend(o.virt_regs()) }
    out
  }

  /// The virtual register this instruction defines, if its destination is a
  /// register. A memory destination is a use of the base, not a definition.
  #[must_use] pub fn virt_def(&self) -> Option<VRegId> {
    match self.dest {
      Some(Operand::Reg(Reg::Virt(v))) => Some(v),
      _ => None,
    }
  }
}

impl std::fmt::Display for MInst {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.opcode {
      Opcode::Label => return write!(f, "{}:", self.oprs[0]),
      Opcode::Word => return write!(f, "\t.word\t{}", DirectiveArg(&self.oprs[0])),
      Opcode::Byte => return write!(f, "\t.byte\t{}", DirectiveArg(&self.oprs[0])),
      Opcode::Space => return write!(f, "\t.space\t{}", DirectiveArg(&self.oprs[0])),
      Opcode::Comment => return write!(f, "\t@ {}", self.oprs[0]),
      _ => {}
    }
    // the literal-pool pseudo `ldr rd, =expr`
    if matches!(self.opcode, Opcode::Ldr) {
      if let [ref op @ (Operand::Imm(_) | Operand::Sym(_))] = self.oprs[..] {
        let dest = self.dest.as_ref().expect("ldr pseudo without destination");
        return write!(f, "\tldr\t{dest}, ={}", DirectiveArg(op))
      }
    }
    write!(f, "\t{}", self.opcode.mnemonic())?;
    if let Some(cc) = self.cond { write!(f, "{}", cc.to_str())? }
    let mut sep = "\t";
    if matches!(self.opcode, Opcode::Push | Opcode::Pop) {
      write!(f, "\t{{")?;
      for (i, o) in self.oprs.iter().enumerate() {
        if i != 0 { write!(f, ", ")? }
        write!(f, "{o}")?;
      }
      return write!(f, "}}")
    }
    if let Some(d) = &self.dest {
      write!(f, "{sep}{d}")?;
      sep = ", ";
    }
    for o in &self.oprs {
      write!(f, "{sep}{o}")?;
      sep = ", ";
    }
    Ok(())
  }
}

/// Prints an operand in directive-argument position, where immediates have
/// no `#` prefix.
struct DirectiveArg<'a>(&'a Operand);

impl std::fmt::Display for DirectiveArg<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.0 {
      Operand::Imm(n) => write!(f, "{n}"),
      other => write!(f, "{other}"),
    }
  }
}

/// Information tracked per virtual register.
#[derive(Copy, Clone, Debug, Default)]
pub struct VRegInfo {
  /// A preferred physical register, set when the value enters or leaves in a
  /// fixed ABI register.
  pub hint: Option<PReg>,
}

/// A function lowered to the machine IR.
#[derive(Debug)]
pub struct MFunc {
  /// The function's symbol name.
  pub name: Symbol,
  /// Visibility, carried through from the SSA function.
  pub linkage: Linkage,
  /// The linear instruction list, including `LABEL` pseudo-instructions.
  pub insts: Vec<MInst>,
  /// Virtual register metadata.
  pub vregs: IdxVec<VRegId, VRegInfo>,
  /// The next label id to mint. Labels are numbered from a module-wide
  /// counter so that `.L<n>` names stay unique within one assembly file.
  pub next_label: u32,
  /// Bytes of stack reserved for `alloca` slots, before spill slots.
  pub alloca_size: u32,
  /// Whether the function makes any calls (and so must save `lr`).
  pub has_calls: bool,
}

impl MFunc {
  /// A fresh, empty machine function. `label_base` is the module-wide label
  /// counter at the point this function starts.
  #[must_use] pub fn new(name: Symbol, linkage: Linkage, label_base: u32) -> Self {
    MFunc {
      name, linkage,
      insts: Vec::new(),
      vregs: IdxVec::new(),
      next_label: label_base,
      alloca_size: 0,
      has_calls: false,
    }
  }

  /// Mint a fresh virtual register.
  pub fn fresh_vreg(&mut self) -> VRegId { self.vregs.push(VRegInfo::default()) }

  /// Mint a fresh virtual register with an ABI hint.
  pub fn fresh_vreg_hinted(&mut self, hint: PReg) -> VRegId {
    self.vregs.push(VRegInfo { hint: Some(hint) })
  }

  /// Mint a fresh local label.
  pub fn fresh_label(&mut self) -> LabelId {
    let l = LabelId(self.next_label);
    self.next_label += 1;
    l
  }

  /// Append an instruction.
  pub fn push(&mut self, inst: MInst) { self.insts.push(inst) }
}

/// A whole program in machine IR: functions plus global data.
#[derive(Debug, Default)]
pub struct MModule {
  /// The functions, in module order.
  pub funcs: Vec<MFunc>,
  /// Global variable definitions, as `(name, linkage, data directives)`.
  pub data: Vec<(Symbol, Linkage, Vec<MInst>)>,
  /// Read-only string constants, as `(label symbol, bytes)`.
  pub rodata: Vec<(Symbol, Vec<u8>)>,
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn operands_are_value_objects() {
    use std::collections::HashSet;
    let mut set = HashSet::new();
    set.insert(Operand::virt(VRegId(3)));
    set.insert(Operand::Mem { base: Reg::Virt(VRegId(3)), off: 4 });
    assert!(set.contains(&Operand::virt(VRegId(3))));
    assert!(!set.contains(&Operand::virt(VRegId(4))));
    assert!(!set.contains(&Operand::Mem { base: Reg::Virt(VRegId(3)), off: 8 }));
  }

  #[test]
  fn display_matches_arm_syntax() {
    let add = MInst::with_dest(Opcode::Add,
      Operand::phys(PReg::R0), [Operand::phys(PReg::R1), Operand::Imm(2)]);
    assert_eq!(add.to_string(), "\tadd\tr0, r1, #2");
    let ldr = MInst::with_dest(Opcode::Ldr,
      Operand::phys(PReg::R0), [Operand::Mem { base: Reg::Phys(PReg::SP), off: 8 }]);
    assert_eq!(ldr.to_string(), "\tldr\tr0, [sp, #8]");
    let push = MInst::new(Opcode::Push,
      [Operand::phys(PReg(4)), Operand::phys(PReg::LR)]);
    assert_eq!(push.to_string(), "\tpush\t{r4, lr}");
    let movlt = MInst::with_dest(Opcode::Mov,
      Operand::phys(PReg::R0), [Operand::Imm(1)]).when(CondCode::Lt);
    assert_eq!(movlt.to_string(), "\tmovlt\tr0, #1");
  }

  #[test]
  fn def_use_extraction() {
    let v0 = VRegId(0);
    let v1 = VRegId(1);
    let st = MInst::new(Opcode::Str,
      [Operand::virt(v0), Operand::Mem { base: Reg::Virt(v1), off: 0 }]);
    // a store defines nothing; it uses the stored reg and the address base
    assert_eq!(st.virt_def(), None);
    let uses = st.virt_uses();
    assert!(uses.contains(&v0) && uses.contains(&v1));
  }
}
