//! The compiler driver.
//!
//! Strings the phases together: parse, constant-evaluate, analyze, lower to
//! SSA, run the pass pipeline, lower to machine IR and emit assembly.
//! Source errors are accumulated in the diagnostics counters and checked at
//! each phase boundary; the first phase with errors aborts compilation.

use std::fmt;
use crate::{intern, logger, Symbol};
use crate::back;
use crate::back::regalloc::AllocError;
use crate::build_ir;
use crate::front::{analyzer::Analyzer, eval::Evaluator, parser::Parser};
use crate::opt;
use crate::pass::Registry;
use crate::passman::{Misconfiguration, PassManager};
use crate::types::ir::Module;

/// What the driver should produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Emit {
  /// Assembly text (`-S`).
  Asm,
  /// The textual SSA dump (`--emit-ir`).
  Ir,
}

/// Driver options, straight from the command line.
#[derive(Clone, Debug)]
pub struct Options {
  /// The `-O` level, 0..=3.
  pub opt_level: u8,
  /// The kind of output to produce.
  pub emit: Emit,
  /// Print the parsed AST to stderr.
  pub dump_ast: bool,
  /// Print the registered passes to stderr.
  pub dump_passes: bool,
}

impl Default for Options {
  fn default() -> Self {
    Options { opt_level: 1, emit: Emit::Asm, dump_ast: false, dump_passes: false }
  }
}

/// Why a compilation did not produce output.
#[derive(Debug)]
pub enum CompileError {
  /// Bad configuration, detected before compilation started.
  Misconfiguration(Misconfiguration),
  /// One or more source errors; diagnostics were already printed.
  Source(usize),
  /// Register allocation could not complete.
  Alloc(AllocError),
}

impl fmt::Display for CompileError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CompileError::Misconfiguration(m) => write!(f, "{m}"),
      CompileError::Source(n) => write!(f, "{n} error(s) generated"),
      CompileError::Alloc(e) => write!(f, "internal error: {e}"),
    }
  }
}

impl std::error::Error for CompileError {}

impl From<Misconfiguration> for CompileError {
  fn from(m: Misconfiguration) -> Self { CompileError::Misconfiguration(m) }
}

impl From<AllocError> for CompileError {
  fn from(e: AllocError) -> Self { CompileError::Alloc(e) }
}

/// The compiler: a configured pass pipeline that can process translation
/// units.
#[allow(missing_debug_implementations)]
pub struct Compiler {
  passman: PassManager,
  opts: Options,
}

impl Compiler {
  /// Configure a compiler. Misconfiguration (bad `-O` level, broken pass
  /// dependencies) fails here, before any input is read.
  pub fn new(opts: Options) -> Result<Self, Misconfiguration> {
    let mut registry = Registry::new();
    opt::register_default_passes(&mut registry);
    let passman = PassManager::new(registry, opts.opt_level)?;
    Ok(Compiler { passman, opts })
  }

  /// Print the registered passes, for `--dump-passes`.
  pub fn show_passes(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
    self.passman.show_info(w)
  }

  /// Compile one source file to the configured output text.
  pub fn compile(&self, file_name: &str, src: &str) -> Result<String, CompileError> {
    logger::reset();
    let file = intern(file_name);
    let module = self.compile_to_ir(file, src)?;
    match self.opts.emit {
      Emit::Ir => {
        let mut out = String::new();
        module.dump(&mut out).expect("string write");
        Ok(out)
      }
      Emit::Asm => {
        let out = back::compile(&module)?;
        self.check_errors()?;
        Ok(out)
      }
    }
  }

  /// Run the frontend and the mid-level pass pipeline, producing the
  /// optimized SSA module.
  pub fn compile_to_ir(&self, file: Symbol, src: &str) -> Result<Module, CompileError> {
    let mut items = Parser::new(file, src).parse_program();
    self.check_errors()?;
    Evaluator::new().eval_program(&mut items);
    self.check_errors()?;
    Analyzer::new(file).analyze_program(&mut items);
    self.check_errors()?;
    if self.opts.dump_ast {
      eprintln!("{items:#?}");
    }
    let mut module = build_ir::build_module(file, &items);
    self.check_errors()?;
    self.passman.run_all(&mut module);
    self.check_errors()?;
    Ok(module)
  }

  fn check_errors(&self) -> Result<(), CompileError> {
    match logger::error_num() {
      0 => Ok(()),
      n => Err(CompileError::Source(n)),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn compiler(opt_level: u8, emit: Emit) -> Compiler {
    Compiler::new(Options { opt_level, emit, ..Default::default() }).unwrap()
  }

  #[test]
  fn compiles_to_assembly() {
    let _guard = crate::logger::lock_for_tests();
    let c = compiler(1, Emit::Asm);
    let asm = c.compile("t.c", "int main() { return 0; }").unwrap();
    assert!(asm.contains("\t.global\tmain"));
    assert!(asm.contains("main:"));
  }

  #[test]
  fn emits_ir_text() {
    let _guard = crate::logger::lock_for_tests();
    let c = compiler(0, Emit::Ir);
    let ir = c.compile("t.c", "int f(int x) { return x; }").unwrap();
    assert!(ir.contains("fn @f($0 : i32) : i32"));
    assert!(ir.contains("ret"));
  }

  #[test]
  fn source_errors_abort_with_a_count() {
    let _guard = crate::logger::lock_for_tests();
    let c = compiler(1, Emit::Asm);
    match c.compile("t.c", "int f() { return nope; }") {
      Err(CompileError::Source(n)) => assert!(n > 0),
      other => panic!("expected source errors, got {other:?}"),
    }
  }

  #[test]
  fn output_is_deterministic() {
    let src = "
      int add(int a, int b) { return a + b; }
      int main() { return add(40, 2); }
    ";
    let _guard = crate::logger::lock_for_tests();
    let a = compiler(2, Emit::Asm).compile("t.c", src).unwrap();
    let b = compiler(2, Emit::Asm).compile("t.c", src).unwrap();
    assert_eq!(a, b);
  }
}
