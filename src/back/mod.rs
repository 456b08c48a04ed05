//! The machine backend: instruction selection, liveness analysis, register
//! allocation and assembly emission.

pub mod isel;
pub mod liveness;
pub mod regalloc;
pub mod emit;

use crate::types::ir::Module;

/// Lower an optimized SSA module all the way to assembly text.
pub fn compile(m: &Module) -> Result<String, regalloc::AllocError> {
  let mut mm = isel::lower_module(m);
  let mut out = String::new();
  emit::emit_module(&mut mm, &mut out)?;
  Ok(out)
}
