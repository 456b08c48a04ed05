//! SSA to machine IR instruction selection.
//!
//! Walks each SSA function, assigning every value a virtual register (or a
//! frame slot for `alloca`), and emits per-opcode instruction patterns.
//! Immediates are used in flexible-operand position when they fit ARM's
//! 8-bit-rotated encoding, and materialized through a literal-pool `ldr`
//! otherwise. Phi nodes are resolved by copy insertion on the incoming
//! edges, splitting the edge when its source ends in a conditional branch.
//! Calls follow the AAPCS argument convention: `r0`-`r3`, overflow on the
//! stack. Division has no machine instruction on this target and becomes a
//! runtime call.

use std::collections::HashMap;
use crate::{intern, Symbol};
use crate::types::{IntTy, Size};
use crate::types::ty::{TyExt, TyKind};
use crate::types::ir::{
  AccessKind, BinOp, BlockId, ConstKind, Func, InstId, InstKind, Module, UnOp, Value,
};
use crate::types::mir::{
  CondCode, LabelId, MFunc, MInst, MModule, Opcode, Operand, PReg, Reg, VRegId,
};

/// Does `n` fit ARM's flexible second operand (an 8-bit value rotated right
/// by an even amount)?
#[must_use] pub fn is_op2_imm(n: u32) -> bool {
  (0..16).any(|r| n.rotate_left(r * 2) <= 0xff)
}

/// Lower every defined function and every global to machine IR.
#[must_use] pub fn lower_module(m: &Module) -> MModule {
  let mut out = MModule::default();
  let mut next_label = 0;
  let mut strings: HashMap<Symbol, Symbol> = HashMap::new();
  for (_, f) in m.funcs() {
    if !f.is_defined() { continue }
    let mut sel = FuncSel::new(m, f, next_label, &mut strings, &mut out.rodata);
    sel.run();
    next_label = sel.mf.next_label;
    out.funcs.push(sel.mf);
  }
  for (_, g) in m.globals() {
    let Some(init) = g.init else { continue };
    let mut data = Vec::new();
    lower_const(m, init, &mut data);
    out.data.push((g.name, g.linkage, data));
  }
  out
}

/// Flatten an initializer constant into data directives.
fn lower_const(m: &Module, id: crate::types::ir::ConstId, out: &mut Vec<MInst>) {
  let (kind, ty) = m.const_data(id);
  match kind {
    ConstKind::Int(n, ity) => {
      let op = if ity.size() == Size::S8 { Opcode::Byte } else { Opcode::Word };
      out.push(MInst::new(op, [Operand::Imm(*n as i32)]));
    }
    ConstKind::Str(s) => {
      for b in s.as_str().bytes() {
        out.push(MInst::new(Opcode::Byte, [Operand::Imm(i32::from(b))]));
      }
      out.push(MInst::new(Opcode::Byte, [Operand::Imm(0)]));
    }
    ConstKind::Array(elems) => for &e in elems { lower_const(m, e, out) },
    ConstKind::Zero(_) => {
      out.push(MInst::new(Opcode::Space, [Operand::Imm(ty.size() as i32)]));
    }
  }
}

struct FuncSel<'a> {
  m: &'a Module,
  f: &'a Func,
  mf: MFunc,
  vmap: HashMap<Value, VRegId>,
  alloca_off: HashMap<InstId, u32>,
  block_labels: HashMap<BlockId, LabelId>,
  exit_label: LabelId,
  outgoing: u32,
  strings: &'a mut HashMap<Symbol, Symbol>,
  rodata: &'a mut Vec<(Symbol, Vec<u8>)>,
}

impl<'a> FuncSel<'a> {
  fn new(
    m: &'a Module, f: &'a Func, label_base: u32,
    strings: &'a mut HashMap<Symbol, Symbol>,
    rodata: &'a mut Vec<(Symbol, Vec<u8>)>,
  ) -> Self {
    let mut mf = MFunc::new(f.name, f.linkage, label_base);
    let exit_label = mf.fresh_label();
    FuncSel {
      m, f, mf,
      vmap: HashMap::new(),
      alloca_off: HashMap::new(),
      block_labels: HashMap::new(),
      exit_label,
      outgoing: 0,
      strings, rodata,
    }
  }

  fn run(&mut self) {
    // the outgoing-argument area sits at the bottom of the frame, so its
    // size must be known before alloca offsets are handed out
    for b in self.f.blocks() {
      for i in self.f.block_insts(b) {
        if let InstKind::Call { args, .. } = &self.f.inst(i).kind {
          let stack_args = args.len().saturating_sub(4) as u32;
          self.outgoing = self.outgoing.max(stack_args * 4);
        }
      }
    }
    self.mf.alloca_size = self.outgoing;

    for b in self.f.blocks() {
      let l = self.mf.fresh_label();
      self.block_labels.insert(b, l);
    }
    self.lower_params();
    for b in self.f.blocks() {
      let l = self.block_labels[&b];
      self.emit(MInst::new(Opcode::Label, [Operand::Label(l)]));
      for i in self.f.block_insts(b) {
        self.lower_inst(i);
      }
    }
    self.emit(MInst::new(Opcode::Label, [Operand::Label(self.exit_label)]));
  }

  fn emit(&mut self, inst: MInst) { self.mf.push(inst) }

  /// Copy the ABI argument registers into fresh virtual registers, and load
  /// stack-passed arguments relative to the frame pointer.
  fn lower_params(&mut self) {
    for n in 0..self.f.num_params() {
      if n < 4 {
        let preg = PReg(n as u8);
        let vr = self.mf.fresh_vreg_hinted(preg);
        self.vmap.insert(Value::Arg(n as u32), vr);
        self.emit(MInst::with_dest(Opcode::Mov, Operand::virt(vr), [Operand::phys(preg)]));
      } else {
        let vr = self.mf.fresh_vreg();
        self.vmap.insert(Value::Arg(n as u32), vr);
        let off = ((n - 4) * 4) as i32;
        self.emit(MInst::with_dest(Opcode::Ldr, Operand::virt(vr),
          [Operand::Mem { base: Reg::Phys(PReg(11)), off }]));
      }
    }
  }

  /// The virtual register that holds `v`, materializing constants and
  /// addresses on demand.
  fn reg_of(&mut self, v: Value) -> VRegId {
    if let Some(&vr) = self.vmap.get(&v) { return vr }
    let vr = self.mf.fresh_vreg();
    match v {
      Value::Const(c) => {
        let (kind, _) = self.m.const_data(c);
        match kind.clone() {
          ConstKind::Int(n, _) => self.load_imm(vr, n as i32),
          ConstKind::Str(s) => {
            let label = self.string_label(s);
            self.emit(MInst::with_dest(Opcode::Ldr, Operand::virt(vr), [Operand::Sym(label)]));
          }
          ConstKind::Array(_) | ConstKind::Zero(_) =>
            panic!("aggregate constant in register position"),
        }
      }
      Value::Global(g) => {
        let name = self.m.global(g).name;
        self.emit(MInst::with_dest(Opcode::Ldr, Operand::virt(vr), [Operand::Sym(name)]));
      }
      Value::Func(f) => {
        let name = self.m.func(f).name;
        self.emit(MInst::with_dest(Opcode::Ldr, Operand::virt(vr), [Operand::Sym(name)]));
      }
      Value::Inst(i) if self.alloca_off.contains_key(&i) => {
        let off = self.alloca_off[&i] as i32;
        if is_op2_imm(off as u32) {
          self.emit(MInst::with_dest(Opcode::Add, Operand::virt(vr),
            [Operand::phys(PReg::SP), Operand::Imm(off)]));
        } else {
          let tmp = self.mf.fresh_vreg();
          self.load_imm(tmp, off);
          self.emit(MInst::with_dest(Opcode::Add, Operand::virt(vr),
            [Operand::phys(PReg::SP), Operand::virt(tmp)]));
        }
      }
      Value::Arg(_) | Value::Inst(_) => panic!("value used before definition"),
    }
    // constants and addresses are rematerialized per use rather than cached,
    // keeping their live ranges short
    vr
  }

  /// `mov vr, #imm`, through the literal pool when out of encoding range.
  fn load_imm(&mut self, vr: VRegId, n: i32) {
    if is_op2_imm(n as u32) {
      self.emit(MInst::with_dest(Opcode::Mov, Operand::virt(vr), [Operand::Imm(n)]));
    } else if is_op2_imm(!(n as u32)) {
      self.emit(MInst::with_dest(Opcode::Mvn, Operand::virt(vr), [Operand::Imm(!n)]));
    } else {
      // assembler pseudo `ldr vr, =imm`
      self.emit(MInst::with_dest(Opcode::Ldr, Operand::virt(vr), [Operand::Imm(n)]));
    }
  }

  /// A flexible second operand for `v`: an immediate when it fits, a
  /// register otherwise.
  fn op2_of(&mut self, v: Value) -> Operand {
    if let Some(n) = self.m.const_int_value(v) {
      if is_op2_imm(n) { return Operand::Imm(n as i32) }
    }
    Operand::virt(self.reg_of(v))
  }

  /// The rodata label for a string constant, deduplicated module-wide.
  fn string_label(&mut self, s: Symbol) -> Symbol {
    if let Some(&l) = self.strings.get(&s) { return l }
    let label = intern(&format!(".LC{}", self.rodata.len()));
    let mut bytes = s.as_str().as_bytes().to_vec();
    bytes.push(0);
    self.rodata.push((label, bytes));
    self.strings.insert(s, label);
    label
  }

  fn lower_inst(&mut self, id: InstId) {
    let inst = self.f.inst(id);
    let kind = inst.kind.clone();
    let ty = inst.ty.clone();
    match kind {
      InstKind::Alloca => {
        let pointee = ty.deref_ty().expect("alloca type");
        let size = (pointee.size() + 3) / 4 * 4;
        let off = self.mf.alloca_size;
        self.mf.alloca_size += size;
        self.alloca_off.insert(id, off);
        // the address is materialized lazily at each use
      }
      InstKind::Binary { op, lhs, rhs } => self.lower_binary(id, op, lhs, rhs),
      InstKind::Unary { op, arg } => {
        let dst = self.def_vreg(id);
        match op {
          UnOp::Neg => {
            let rn = self.reg_of(arg);
            self.emit(MInst::with_dest(Opcode::Rsb, Operand::virt(dst),
              [Operand::virt(rn), Operand::Imm(0)]));
          }
          UnOp::Not => {
            let o = self.op2_of(arg);
            self.emit(MInst::with_dest(Opcode::Mvn, Operand::virt(dst), [o]));
          }
          UnOp::LogicNot => {
            let rn = self.reg_of(arg);
            self.emit(MInst::new(Opcode::Cmp, [Operand::virt(rn), Operand::Imm(0)]));
            self.emit(MInst::with_dest(Opcode::Mov, Operand::virt(dst), [Operand::Imm(0)]));
            self.emit(MInst::with_dest(Opcode::Mov, Operand::virt(dst), [Operand::Imm(1)])
              .when(CondCode::Eq));
          }
        }
      }
      InstKind::Cast { arg } => {
        let dst = self.def_vreg(id);
        let src_ty = self.f.value_ty(self.m, arg);
        let rn = self.reg_of(arg);
        match (src_ty.int_ty(), ty.int_ty()) {
          // narrowing or widening through 8 bits needs an explicit extend
          (_, Some(t)) if t.size() == Size::S8 && !t.signed() => {
            self.emit(MInst::with_dest(Opcode::And, Operand::virt(dst),
              [Operand::virt(rn), Operand::Imm(0xff)]));
          }
          (_, Some(t)) if t.size() == Size::S8 && t.signed() => {
            let tmp = self.mf.fresh_vreg();
            self.emit(MInst::with_dest(Opcode::Lsl, Operand::virt(tmp),
              [Operand::virt(rn), Operand::Imm(24)]));
            self.emit(MInst::with_dest(Opcode::Asr, Operand::virt(dst),
              [Operand::virt(tmp), Operand::Imm(24)]));
          }
          _ => {
            self.emit(MInst::with_dest(Opcode::Mov, Operand::virt(dst), [Operand::virt(rn)]));
          }
        }
      }
      InstKind::Load { addr } => {
        let dst = self.def_vreg(id);
        let mem = self.addr_of(addr);
        let op = if ty.size() == 1 { Opcode::LdrB } else { Opcode::Ldr };
        self.emit(MInst::with_dest(op, Operand::virt(dst), [mem]));
        if ty.int_ty() == Some(IntTy::Int(Size::S8)) {
          // ldrb zero-extends; sign-extend the byte in place
          let tmp = self.mf.fresh_vreg();
          self.emit(MInst::with_dest(Opcode::Lsl, Operand::virt(tmp),
            [Operand::virt(dst), Operand::Imm(24)]));
          self.emit(MInst::with_dest(Opcode::Asr, Operand::virt(dst),
            [Operand::virt(tmp), Operand::Imm(24)]));
        }
      }
      InstKind::Store { val, addr } => {
        let rv = self.reg_of(val);
        let mem = self.addr_of(addr);
        let val_ty = self.f.value_ty(self.m, val);
        let op = if val_ty.size() == 1 { Opcode::StrB } else { Opcode::Str };
        self.emit(MInst::new(op, [Operand::virt(rv), mem]));
      }
      InstKind::Access { kind, base, index } => self.lower_access(id, kind, base, index),
      InstKind::Call { callee, args } => self.lower_call(id, callee, &args),
      InstKind::Phi { .. } => {
        // phis define a register; the copies are inserted on incoming edges
        // by the terminator lowering of each predecessor, which may already
        // have minted the register
        if !self.vmap.contains_key(&Value::Inst(id)) {
          self.def_vreg(id);
        }
      }
      InstKind::Jump { target } => {
        self.phi_copies(self.f.inst(id).block, target);
        let l = self.block_labels[&target];
        self.emit(MInst::new(Opcode::B, [Operand::Label(l)]));
      }
      InstKind::Branch { cond, then_bb, else_bb } => {
        let here = self.f.inst(id).block;
        let rc = self.reg_of(cond);
        self.emit(MInst::new(Opcode::Cmp, [Operand::virt(rc), Operand::Imm(0)]));
        // conditional edges carrying phi copies are split with a trampoline
        let then_l = self.edge_label(here, then_bb);
        self.emit(MInst::new(Opcode::Bne, [Operand::Label(then_l.0)]));
        let else_l = self.edge_label(here, else_bb);
        self.emit(MInst::new(Opcode::B, [Operand::Label(else_l.0)]));
        for ((label, split), succ) in [then_l, else_l].into_iter().zip([then_bb, else_bb]) {
          if !split { continue }
          self.emit(MInst::new(Opcode::Label, [Operand::Label(label)]));
          self.phi_copies(here, succ);
          let l = self.block_labels[&succ];
          self.emit(MInst::new(Opcode::B, [Operand::Label(l)]));
        }
      }
      InstKind::Ret { val } => {
        if let Some(v) = val {
          let rv = self.op2_of(v);
          self.emit(MInst::with_dest(Opcode::Mov, Operand::phys(PReg::R0), [rv]));
        }
        self.emit(MInst::new(Opcode::B, [Operand::Label(self.exit_label)]));
      }
    }
  }

  /// The destination vreg of instruction `id`.
  fn def_vreg(&mut self, id: InstId) -> VRegId {
    let vr = self.mf.fresh_vreg();
    self.vmap.insert(Value::Inst(id), vr);
    vr
  }

  /// A memory operand addressing `addr`. Direct `alloca` and small-offset
  /// bases fold into the addressing mode.
  fn addr_of(&mut self, addr: Value) -> Operand {
    if let Value::Inst(i) = addr {
      if let Some(&off) = self.alloca_off.get(&i) {
        if off < 4096 {
          return Operand::Mem { base: Reg::Phys(PReg::SP), off: off as i32 }
        }
      }
    }
    let base = self.reg_of(addr);
    Operand::Mem { base: Reg::Virt(base), off: 0 }
  }

  fn lower_binary(&mut self, id: InstId, op: BinOp, lhs: Value, rhs: Value) {
    use BinOp::*;
    if let Some(cc) = cond_code(op) {
      let rn = self.reg_of(lhs);
      let o2 = self.op2_of(rhs);
      let dst = self.def_vreg(id);
      self.emit(MInst::new(Opcode::Cmp, [Operand::virt(rn), o2]));
      self.emit(MInst::with_dest(Opcode::Mov, Operand::virt(dst), [Operand::Imm(0)]));
      self.emit(MInst::with_dest(Opcode::Mov, Operand::virt(dst), [Operand::Imm(1)]).when(cc));
      return
    }
    if op.is_div_rem() {
      self.lower_div_rem(id, op, lhs, rhs);
      return
    }
    let mcode = match op {
      Add => Opcode::Add, Sub => Opcode::Sub, Mul => Opcode::Mul,
      And => Opcode::And, Or => Opcode::Orr, Xor => Opcode::Eor,
      Shl => Opcode::Lsl, LShr => Opcode::Lsr, AShr => Opcode::Asr,
      _ => unreachable!("handled above"),
    };
    let rn = self.reg_of(lhs);
    // multiplication takes no immediate operand
    let o2 = if op == Mul {
      Operand::virt(self.reg_of(rhs))
    } else {
      self.op2_of(rhs)
    };
    let dst = self.def_vreg(id);
    self.emit(MInst::with_dest(mcode, Operand::virt(dst), [Operand::virt(rn), o2]));
  }

  /// Division and remainder become EABI runtime calls.
  fn lower_div_rem(&mut self, id: InstId, op: BinOp, lhs: Value, rhs: Value) {
    let (sym, ret_reg) = match op {
      BinOp::SDiv => ("__aeabi_idiv", PReg::R0),
      BinOp::UDiv => ("__aeabi_uidiv", PReg::R0),
      BinOp::SRem => ("__aeabi_idivmod", PReg::R1),
      BinOp::URem => ("__aeabi_uidivmod", PReg::R1),
      _ => unreachable!(),
    };
    let rl = self.reg_of(lhs);
    let rr = self.reg_of(rhs);
    self.emit(MInst::with_dest(Opcode::Mov, Operand::phys(PReg::R0), [Operand::virt(rl)]));
    self.emit(MInst::with_dest(Opcode::Mov, Operand::phys(PReg::R1), [Operand::virt(rr)]));
    self.emit(MInst::new(Opcode::Bl, [Operand::Sym(intern(sym))]));
    self.mf.has_calls = true;
    let dst = self.def_vreg(id);
    self.emit(MInst::with_dest(Opcode::Mov, Operand::virt(dst), [Operand::phys(ret_reg)]));
  }

  fn lower_access(&mut self, id: InstId, kind: AccessKind, base: Value, index: Value) {
    let base_ty = self.f.value_ty(self.m, base);
    let pointee = base_ty.deref_ty().expect("access through non-pointer");
    // struct element access: constant field offset
    if kind == AccessKind::Elem {
      if let TyKind::Struct(..) = **pointee.unqual() {
        let field = self.m.const_int_value(index).expect("struct field index");
        let off = pointee.field_offset(field as usize).expect("struct field offset");
        let rb = self.reg_of(base);
        let dst = self.def_vreg(id);
        self.emit(MInst::with_dest(Opcode::Add, Operand::virt(dst),
          [Operand::virt(rb), Operand::Imm(off as i32)]));
        return
      }
    }
    let elem_size = match kind {
      AccessKind::Ptr => pointee.size(),
      AccessKind::Elem => pointee.deref_ty().expect("element of non-array").size(),
    };
    let rb = self.reg_of(base);
    if let Some(n) = self.m.const_int_value(index) {
      let byte_off = n.wrapping_mul(elem_size) as i32;
      let dst = self.def_vreg(id);
      if is_op2_imm(byte_off as u32) {
        self.emit(MInst::with_dest(Opcode::Add, Operand::virt(dst),
          [Operand::virt(rb), Operand::Imm(byte_off)]));
      } else {
        let tmp = self.mf.fresh_vreg();
        self.load_imm(tmp, byte_off);
        self.emit(MInst::with_dest(Opcode::Add, Operand::virt(dst),
          [Operand::virt(rb), Operand::virt(tmp)]));
      }
      return
    }
    let ri = self.reg_of(index);
    let scaled = if elem_size == 1 {
      ri
    } else if elem_size.is_power_of_two() {
      let tmp = self.mf.fresh_vreg();
      self.emit(MInst::with_dest(Opcode::Lsl, Operand::virt(tmp),
        [Operand::virt(ri), Operand::Imm(elem_size.trailing_zeros() as i32)]));
      tmp
    } else {
      let size_reg = self.mf.fresh_vreg();
      self.load_imm(size_reg, elem_size as i32);
      let tmp = self.mf.fresh_vreg();
      self.emit(MInst::with_dest(Opcode::Mul, Operand::virt(tmp),
        [Operand::virt(ri), Operand::virt(size_reg)]));
      tmp
    };
    let dst = self.def_vreg(id);
    self.emit(MInst::with_dest(Opcode::Add, Operand::virt(dst),
      [Operand::virt(rb), Operand::virt(scaled)]));
  }

  fn lower_call(&mut self, id: InstId, callee: Value, args: &[Value]) {
    // evaluate arguments into registers before clobbering r0-r3
    let arg_regs: Vec<VRegId> = args.iter().map(|&a| self.reg_of(a)).collect();
    for (n, &vr) in arg_regs.iter().enumerate() {
      if n < 4 {
        self.emit(MInst::with_dest(Opcode::Mov,
          Operand::phys(PReg(n as u8)), [Operand::virt(vr)]));
      } else {
        let off = ((n - 4) * 4) as i32;
        self.emit(MInst::new(Opcode::Str,
          [Operand::virt(vr), Operand::Mem { base: Reg::Phys(PReg::SP), off }]));
      }
    }
    match callee {
      Value::Func(f) => {
        let name = self.m.func(f).name;
        self.emit(MInst::new(Opcode::Bl, [Operand::Sym(name)]));
      }
      _ => {
        let rc = self.reg_of(callee);
        self.emit(MInst::new(Opcode::Blx, [Operand::virt(rc)]));
      }
    }
    self.mf.has_calls = true;
    let ret_ty = &self.f.inst(id).ty;
    if !ret_ty.is_void() {
      let dst = self.def_vreg(id);
      self.emit(MInst::with_dest(Opcode::Mov, Operand::virt(dst), [Operand::phys(PReg::R0)]));
    }
  }

  /// Emit the phi copies for CFG edge `pred -> succ`.
  fn phi_copies(&mut self, pred: BlockId, succ: BlockId) {
    let mut copies = Vec::new();
    for i in self.f.block_insts(succ) {
      if let InstKind::Phi { incoming } = &self.f.inst(i).kind {
        for &(b, v) in incoming {
          if b == pred { copies.push((i, v)) }
        }
      } else {
        break
      }
    }
    for (phi, v) in copies {
      let dst = self.vmap.get(&Value::Inst(phi)).copied()
        .unwrap_or_else(|| self.def_vreg(phi));
      let src = self.op2_of(v);
      self.emit(MInst::with_dest(Opcode::Mov, Operand::virt(dst), [src]));
    }
  }

  /// The label to branch to for edge `pred -> succ`: the successor's own
  /// label when the edge carries no phi copies, or a fresh trampoline label
  /// otherwise. Returns `(label, needs_trampoline)`.
  fn edge_label(&mut self, pred: BlockId, succ: BlockId) -> (LabelId, bool) {
    let has_phis = self.f.block_insts(succ)
      .next()
      .is_some_and(|i| {
        if let InstKind::Phi { incoming } = &self.f.inst(i).kind {
          incoming.iter().any(|&(b, _)| b == pred)
        } else { false }
      });
    if has_phis {
      (self.mf.fresh_label(), true)
    } else {
      (self.block_labels[&succ], false)
    }
  }
}

fn cond_code(op: BinOp) -> Option<CondCode> {
  Some(match op {
    BinOp::Eq => CondCode::Eq,
    BinOp::Ne => CondCode::Ne,
    BinOp::SLt => CondCode::Lt,
    BinOp::SLe => CondCode::Le,
    BinOp::SGt => CondCode::Gt,
    BinOp::SGe => CondCode::Ge,
    BinOp::ULt => CondCode::Lo,
    BinOp::ULe => CondCode::Ls,
    BinOp::UGt => CondCode::Hi,
    BinOp::UGe => CondCode::Hs,
    _ => return None,
  })
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::logger::Logger;
  use crate::types::ir::{Func as IrFunc, Linkage};
  use crate::types::ty::make_i32;
  use std::rc::Rc;

  #[test]
  fn operand2_encoding() {
    assert!(is_op2_imm(0));
    assert!(is_op2_imm(255));
    assert!(is_op2_imm(0xff00));
    assert!(is_op2_imm(0xc000_0034));
    assert!(!is_op2_imm(0x101));
    assert!(!is_op2_imm(0x1_0234));
  }

  #[test]
  fn simple_function_selects() {
    // int f(int x) { return x + 2; }
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let fty = Rc::new(TyKind::Func(vec![make_i32()], make_i32()));
    let f = m.add_func(IrFunc::new(intern("f"), fty, Linkage::External, log));
    let two = m.make_i32(2);
    let func = m.func_mut(f);
    let bb = func.new_block();
    let add = func.push_inst(bb,
      InstKind::Binary { op: BinOp::Add, lhs: Value::Arg(0), rhs: two }, make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(add)) }, log);

    let mm = lower_module(&m);
    assert_eq!(mm.funcs.len(), 1);
    let mf = &mm.funcs[0];
    // `add vrN, vrM, #2` somewhere in the body
    assert!(mf.insts.iter().any(|i| i.opcode == Opcode::Add
      && i.oprs.last() == Some(&Operand::Imm(2))));
    // argument copied out of r0
    assert!(mf.insts.iter().any(|i| i.opcode == Opcode::Mov
      && i.oprs.first() == Some(&Operand::phys(PReg::R0))));
  }

  #[test]
  fn division_becomes_a_runtime_call() {
    let mut m = Module::new(intern("t"));
    let log = Logger::none(intern("t"));
    let fty = Rc::new(TyKind::Func(vec![make_i32(), make_i32()], make_i32()));
    let f = m.add_func(IrFunc::new(intern("f"), fty, Linkage::External, log));
    let func = m.func_mut(f);
    let bb = func.new_block();
    let div = func.push_inst(bb,
      InstKind::Binary { op: BinOp::SDiv, lhs: Value::Arg(0), rhs: Value::Arg(1) },
      make_i32(), log);
    func.set_terminator(bb, InstKind::Ret { val: Some(Value::Inst(div)) }, log);

    let mm = lower_module(&m);
    let mf = &mm.funcs[0];
    assert!(mf.insts.iter().any(|i| i.opcode == Opcode::Bl
      && i.oprs.first() == Some(&Operand::Sym(intern("__aeabi_idiv")))));
    assert!(mf.has_calls);
  }
}
