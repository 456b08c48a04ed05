//! The pass manager.
//!
//! Given a target stage and an `-O` level, the manager filters the registry,
//! orders the selected passes so that every declared dependency precedes its
//! dependent, and runs the sequence to a fixpoint bounded by a per-stage
//! iteration cap. Cyclic or unknown dependencies are configuration errors
//! reported before any compilation work.

use std::fmt;
use crate::logger;
use crate::pass::{PassInfo, PassStage, Registry};
use crate::types::ir::Module;

/// Iteration cap per stage: if a sequence still reports changes after this
/// many rounds, the remaining iteration is logged and skipped.
const MAX_ITERATIONS: usize = 32;

/// A configuration error detected while scheduling passes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Misconfiguration {
  /// A pass names a dependency that is not registered.
  UnknownPass(String),
  /// The dependency graph of the selected passes has a cycle.
  CyclicDeps(String),
  /// The `-O` level is outside 0..=3.
  BadOptLevel(u8),
}

impl fmt::Display for Misconfiguration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Misconfiguration::UnknownPass(name) => write!(f, "unknown pass '{name}'"),
      Misconfiguration::CyclicDeps(name) =>
        write!(f, "cyclic pass dependency involving '{name}'"),
      Misconfiguration::BadOptLevel(n) => write!(f, "invalid optimization level {n}"),
    }
  }
}

impl std::error::Error for Misconfiguration {}

/// Schedules and runs registered passes over a module.
#[allow(missing_debug_implementations)]
pub struct PassManager {
  registry: Registry,
  opt_level: u8,
}

impl PassManager {
  /// Create a pass manager. Validates the `-O` level and every dependency
  /// edge in the registry up front, so misconfiguration fails before any
  /// compilation work.
  pub fn new(registry: Registry, opt_level: u8) -> Result<Self, Misconfiguration> {
    if opt_level > 3 { return Err(Misconfiguration::BadOptLevel(opt_level)) }
    for info in registry.passes() {
      for &dep in info.deps {
        if registry.get(dep).is_none() {
          return Err(Misconfiguration::UnknownPass(dep.to_owned()))
        }
      }
    }
    let pm = PassManager { registry, opt_level };
    // surface dependency cycles immediately, independent of stage
    for stage in [PassStage::PRE_OPT, PassStage::OPT, PassStage::POST_OPT, PassStage::PRE_EMIT] {
      pm.schedule(stage)?;
    }
    Ok(pm)
  }

  /// The configured optimization level.
  #[must_use] pub fn opt_level(&self) -> u8 { self.opt_level }

  /// The passes selected for `stage` at the configured level, in an order
  /// where every dependency precedes its dependents. Selection and
  /// tie-breaking follow registration order, so scheduling is deterministic.
  fn schedule(&self, stage: PassStage) -> Result<Vec<&PassInfo>, Misconfiguration> {
    let selected: Vec<&PassInfo> = self.registry.passes().iter()
      .filter(|p| p.stages.contains(stage) && p.min_opt_level <= self.opt_level)
      .collect();
    let index_of = |name: &str| selected.iter().position(|p| p.name == name);
    // Kahn's algorithm; dependencies filtered out of this stage do not
    // constrain the order
    let mut in_deg = vec![0usize; selected.len()];
    let mut dependents = vec![Vec::new(); selected.len()];
    for (i, p) in selected.iter().enumerate() {
      for &dep in p.deps {
        if let Some(j) = index_of(dep) {
          in_deg[i] += 1;
          dependents[j].push(i);
        }
      }
    }
    let mut order = Vec::with_capacity(selected.len());
    let mut ready: Vec<usize> = (0..selected.len()).filter(|&i| in_deg[i] == 0).collect();
    while let Some(i) = ready.first().copied() {
      ready.remove(0);
      order.push(selected[i]);
      for &d in &dependents[i] {
        in_deg[d] -= 1;
        if in_deg[d] == 0 { ready.push(d) }
      }
      ready.sort_unstable();
    }
    if order.len() != selected.len() {
      let stuck = selected.iter().enumerate()
        .find(|&(i, _)| in_deg[i] != 0)
        .map(|(_, p)| p.name)
        .expect("cycle with no member");
      return Err(Misconfiguration::CyclicDeps(stuck.to_owned()))
    }
    Ok(order)
  }

  /// Run one stage over the module: the scheduled sequence is repeated while
  /// any pass reports a change, up to the iteration cap. A fatal diagnostic
  /// stops the stage at the next pass boundary.
  pub fn run_stage(&self, m: &mut Module, stage: PassStage) {
    let seq = self.schedule(stage).expect("validated in PassManager::new");
    if seq.is_empty() { return }
    log::debug!("stage {}: {} passes", stage.stage_name(), seq.len());
    for round in 0..MAX_ITERATIONS {
      let mut changed = false;
      for info in &seq {
        let errors_before = logger::error_num();
        let mut pass = (info.ctor)();
        let c = pass.run(m);
        log::trace!("{}: {} (round {round})", info.name, if c { "changed" } else { "no change" });
        changed |= c;
        if logger::error_num() > errors_before {
          log::debug!("stage {} stopped by errors in {}", stage.stage_name(), info.name);
          return
        }
      }
      if !changed { return }
    }
    log::warn!(
      "stage {} did not reach a fixpoint after {MAX_ITERATIONS} iterations; skipping the rest",
      stage.stage_name(),
    );
  }

  /// Run every stage in pipeline order.
  pub fn run_all(&self, m: &mut Module) {
    for stage in [PassStage::PRE_OPT, PassStage::OPT, PassStage::POST_OPT, PassStage::PRE_EMIT] {
      self.run_stage(m, stage);
      if logger::error_num() != 0 { return }
    }
  }

  /// Enumerate the registered passes with stage/level/deps, for
  /// `--dump-passes`.
  pub fn show_info(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
    writeln!(w, "registered passes:")?;
    for info in self.registry.passes() {
      let stages: Vec<&str> = [PassStage::PRE_OPT, PassStage::OPT, PassStage::POST_OPT, PassStage::PRE_EMIT]
        .iter().filter(|&&s| info.stages.contains(s)).map(|s| s.stage_name()).collect();
      write!(w, "  {:<12} -O{}+  stages: {}", info.name, info.min_opt_level, stages.join("|"))?;
      if info.deps.is_empty() {
        writeln!(w)?;
      } else {
        writeln!(w, "  deps: {}", info.deps.join(", "))?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::pass::{ModulePass, Pass, PassInfo};

  struct Nop;
  impl ModulePass for Nop {
    fn run_on_module(&mut self, _: &mut Module) -> bool { false }
  }
  fn nop() -> Pass { Pass::Module(Box::new(Nop)) }

  fn info(name: &'static str, deps: &'static [&'static str]) -> PassInfo {
    PassInfo { name, stages: PassStage::OPT, min_opt_level: 0, deps, ctor: nop }
  }

  #[test]
  fn dependencies_order_the_schedule() {
    let mut reg = Registry::new();
    reg.register(info("b", &["a"]));
    reg.register(info("a", &[]));
    reg.register(info("c", &["b"]));
    let pm = PassManager::new(reg, 1).unwrap();
    let names: Vec<&str> = pm.schedule(PassStage::OPT).unwrap()
      .iter().map(|p| p.name).collect();
    assert_eq!(names, ["a", "b", "c"]);
  }

  #[test]
  fn cyclic_deps_are_fatal() {
    let mut reg = Registry::new();
    reg.register(info("a", &["b"]));
    reg.register(info("b", &["a"]));
    assert!(matches!(
      PassManager::new(reg, 1),
      Err(Misconfiguration::CyclicDeps(_))
    ));
  }

  #[test]
  fn unknown_dep_is_fatal() {
    let mut reg = Registry::new();
    reg.register(info("a", &["nonexistent"]));
    assert!(matches!(
      PassManager::new(reg, 0),
      Err(Misconfiguration::UnknownPass(_))
    ));
  }

  #[test]
  fn bad_opt_level_is_fatal() {
    assert!(matches!(
      PassManager::new(Registry::new(), 4),
      Err(Misconfiguration::BadOptLevel(4))
    ));
  }

  #[test]
  fn level_filter_prunes_passes() {
    let mut reg = Registry::new();
    reg.register(PassInfo {
      name: "expensive", stages: PassStage::OPT, min_opt_level: 2, deps: &[], ctor: nop,
    });
    reg.register(info("cheap", &[]));
    let pm = PassManager::new(reg, 1).unwrap();
    let names: Vec<&str> = pm.schedule(PassStage::OPT).unwrap()
      .iter().map(|p| p.name).collect();
    assert_eq!(names, ["cheap"]);
  }
}
