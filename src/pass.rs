//! Pass kinds, descriptors and the pass registry.
//!
//! A pass is described by a [`PassInfo`] record: its name, the stages it may
//! run in, the minimum `-O` level at which it runs, the names of passes that
//! must run before it, and a constructor. Passes come in three granularities:
//! module, function and block. The registry is populated explicitly by
//! [`crate::opt::register_default_passes`], called from the driver; there is
//! no life-before-main registration.

use std::collections::HashMap;
use crate::types::ir::{BlockId, FuncId, Module};

bitflags! {
  /// The pipeline stages a pass may be scheduled in.
  #[derive(Copy, Clone, Debug, PartialEq, Eq)]
  pub struct PassStage: u8 {
    /// Cheap cleanups before the main optimization loop.
    const PRE_OPT = 1 << 0;
    /// The main optimization loop.
    const OPT = 1 << 1;
    /// Cleanups after the main loop.
    const POST_OPT = 1 << 2;
    /// Last chance before lowering to machine IR.
    const PRE_EMIT = 1 << 3;
  }
}

impl PassStage {
  /// A short name for a single stage, for `--dump-passes` output.
  #[must_use] pub fn stage_name(self) -> &'static str {
    if self == PassStage::PRE_OPT { "PreOpt" }
    else if self == PassStage::OPT { "Opt" }
    else if self == PassStage::POST_OPT { "PostOpt" }
    else if self == PassStage::PRE_EMIT { "PreEmit" }
    else { "?" }
  }
}

/// A pass that sees the module's top-level value list. Module passes may
/// erase entries; the traversal in the pass manager tolerates erasure at the
/// cursor (erased entries are tombstoned, not shifted).
pub trait ModulePass {
  /// Run on the module; return whether anything changed.
  fn run_on_module(&mut self, m: &mut Module) -> bool;
}

/// A pass that sees each function body in turn.
pub trait FunctionPass {
  /// Run on one function; return whether anything changed.
  fn run_on_func(&mut self, m: &mut Module, f: FuncId) -> bool;
}

/// A pass that sees each basic block in turn.
pub trait BlockPass {
  /// Run on one block; return whether anything changed.
  fn run_on_block(&mut self, m: &mut Module, f: FuncId, b: BlockId) -> bool;
}

/// A constructed pass of any granularity.
#[allow(missing_debug_implementations)]
pub enum Pass {
  /// Visits the module once.
  Module(Box<dyn ModulePass>),
  /// Visits every defined function.
  Function(Box<dyn FunctionPass>),
  /// Visits every block of every defined function.
  Block(Box<dyn BlockPass>),
}

impl Pass {
  /// Run this pass over the whole module, whatever its granularity.
  /// Traversal is in insertion order throughout, so results are
  /// deterministic.
  pub fn run(&mut self, m: &mut Module) -> bool {
    match self {
      Pass::Module(p) => p.run_on_module(m),
      Pass::Function(p) => {
        let mut changed = false;
        for f in m.func_ids() {
          if m.func(f).is_defined() { changed |= p.run_on_func(m, f) }
        }
        changed
      }
      Pass::Block(p) => {
        let mut changed = false;
        for f in m.func_ids() {
          if !m.func(f).is_defined() { continue }
          let blocks: Vec<BlockId> = m.func(f).blocks().collect();
          for b in blocks { changed |= p.run_on_block(m, f, b) }
        }
        changed
      }
    }
  }
}

/// The registration record for one pass.
#[allow(missing_debug_implementations)]
pub struct PassInfo {
  /// The pass name, as used in dependency lists and diagnostics.
  pub name: &'static str,
  /// The stages this pass participates in.
  pub stages: PassStage,
  /// The minimum `-O` level at which this pass runs.
  pub min_opt_level: u8,
  /// Names of passes that must be scheduled before this one.
  pub deps: &'static [&'static str],
  /// Constructor for a fresh pass instance.
  pub ctor: fn() -> Pass,
}

/// The set of registered passes, in registration order.
#[derive(Default)]
#[allow(missing_debug_implementations)]
pub struct Registry {
  passes: Vec<PassInfo>,
  by_name: HashMap<&'static str, usize>,
}

impl Registry {
  /// An empty registry.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Register a pass. Re-registering a name is a programming error.
  pub fn register(&mut self, info: PassInfo) {
    assert!(
      self.by_name.insert(info.name, self.passes.len()).is_none(),
      "pass {} registered twice", info.name,
    );
    self.passes.push(info);
  }

  /// The registered passes, in registration order.
  #[must_use] pub fn passes(&self) -> &[PassInfo] { &self.passes }

  /// Look up a pass by name.
  #[must_use] pub fn get(&self, name: &str) -> Option<&PassInfo> {
    self.by_name.get(name).map(|&i| &self.passes[i])
  }
}
