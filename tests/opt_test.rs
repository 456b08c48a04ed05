//! End-to-end tests for the mid-level optimization pipeline, observed
//! through the textual IR dump.

use mimic::compiler::{Compiler, Emit, Options};
use mimic::logger;

/// Compile to the textual IR, returning the dump and the number of warnings
/// the compilation emitted. Holds the diagnostics lock for the duration:
/// the warning counters are process-wide and the test harness is threaded.
fn emit_ir(opt_level: u8, src: &str) -> (String, usize) {
  let _guard = logger::lock_for_tests();
  let c = Compiler::new(Options {
    opt_level,
    emit: Emit::Ir,
    ..Default::default()
  }).expect("default pipeline configures");
  let out = c.compile("test.c", src).expect("source compiles");
  (out, logger::warning_num())
}

#[test]
fn algebraic_identities_collapse() {
  // x * 1 + 0 reduces to x itself: no multiply, no add in the body
  let (ir, _) = emit_ir(1, "int f(int x) { return x * 1 + 0; }");
  assert!(!ir.contains("mul"), "multiply must be rewritten away:\n{ir}");
  assert!(!ir.contains("add"), "addition must be rewritten away:\n{ir}");
  assert!(ir.contains("ret"));
}

#[test]
fn power_of_two_division_becomes_a_shift() {
  let (ir, _) = emit_ir(1, "int f(int x) { return x / 8; }");
  assert!(ir.contains("ashr"), "sdiv by 8 must become an arithmetic shift:\n{ir}");
  assert!(!ir.contains("sdiv"), "the division must be gone:\n{ir}");
  assert!(ir.contains(", 3"), "the shift amount is log2(8):\n{ir}");
}

#[test]
fn dead_internal_global_is_removed_with_a_warning() {
  let (ir, warnings) = emit_ir(1, "
    static int unused_tbl[4] = {1, 2, 3, 4};
    int main() { return 0; }
  ");
  assert!(!ir.contains("unused_tbl"), "the dead global must be eliminated:\n{ir}");
  assert!(warnings > 0, "removal of a defined internal value warns");
}

#[test]
fn dce_preserves_calls_with_unused_results() {
  let (ir, _) = emit_ir(1, "
    int g();
    int f() { int a = g(); return 0; }
  ");
  assert!(ir.contains("call @g"), "the external call has side effects:\n{ir}");
  assert!(ir.contains("ret 0"));
}

#[test]
fn division_by_zero_survives_with_a_warning() {
  let (ir, warnings) = emit_ir(1, "int f(int x) { return x / 0; }");
  assert!(ir.contains("sdiv"), "the trapping division must stay:\n{ir}");
  assert!(warnings > 0);
}

#[test]
fn constant_folding_runs_to_a_fixpoint() {
  let (ir, _) = emit_ir(1, "int f() { return (2 + 3) * (4 - 1); }");
  assert!(ir.contains("ret 15"), "the whole expression folds:\n{ir}");
  assert!(!ir.contains("mul"));
}

#[test]
fn unused_internal_function_is_removed() {
  let (ir, _) = emit_ir(1, "
    static int helper(int x) { return x + 1; }
    int main() { return 0; }
  ");
  assert!(!ir.contains("@helper"), "unused internal function must be eliminated:\n{ir}");
}

#[test]
fn inline_function_disappears_at_o2() {
  let (ir, _) = emit_ir(2, "
    inline int twice(int x) { return x + x; }
    int main(int argc) { return twice(argc); }
  ");
  assert!(!ir.contains("call @twice"), "the call must be inlined:\n{ir}");
  assert!(!ir.contains("fn @twice"), "the inlined body is then dead:\n{ir}");
}

#[test]
fn subscript_out_of_bounds_warns_but_compiles() {
  let (ir, warnings) = emit_ir(1, "
    int f() { int a[4]; a[0] = 1; return a[4]; }
  ");
  assert!(warnings > 0, "constant subscript at len warns");
  assert!(ir.contains("ret"));
}
