//! Mid-level optimization passes over the SSA IR.

mod dge;
mod dce;
mod fold;
mod algesimp;
mod gvn;
mod inline;

pub use dge::DeadGlobalElim;
pub use dce::DeadCodeElim;
pub use fold::ConstFold;
pub use algesimp::AlgebraicSimp;
pub use gvn::LocalValueNumbering;
pub use inline::Inliner;

use crate::pass::{Pass, PassInfo, PassStage, Registry};

/// Register the default pass pipeline. Called explicitly from the driver;
/// pass discovery does not rely on global constructor ordering.
pub fn register_default_passes(reg: &mut Registry) {
  reg.register(PassInfo {
    name: "dead_glob_elim",
    stages: PassStage::PRE_OPT.union(PassStage::OPT),
    min_opt_level: 0,
    deps: &[],
    ctor: || Pass::Module(Box::new(DeadGlobalElim::default())),
  });
  reg.register(PassInfo {
    name: "const_fold",
    stages: PassStage::OPT,
    min_opt_level: 1,
    deps: &[],
    ctor: || Pass::Block(Box::new(ConstFold::default())),
  });
  reg.register(PassInfo {
    name: "algebraic_simp",
    stages: PassStage::OPT,
    min_opt_level: 1,
    deps: &["const_fold"],
    ctor: || Pass::Block(Box::new(AlgebraicSimp::default())),
  });
  reg.register(PassInfo {
    name: "dead_code_elim",
    stages: PassStage::OPT.union(PassStage::POST_OPT),
    min_opt_level: 1,
    deps: &["algebraic_simp"],
    ctor: || Pass::Function(Box::new(DeadCodeElim::default())),
  });
  reg.register(PassInfo {
    name: "inline",
    stages: PassStage::OPT,
    min_opt_level: 2,
    deps: &["dead_glob_elim"],
    ctor: || Pass::Module(Box::new(Inliner::default())),
  });
  reg.register(PassInfo {
    name: "gvn",
    stages: PassStage::OPT,
    min_opt_level: 2,
    deps: &["const_fold", "algebraic_simp"],
    ctor: || Pass::Block(Box::new(LocalValueNumbering::default())),
  });
}
