//! End-to-end tests for the backend: instruction selection, liveness,
//! linear-scan allocation and assembly emission.

use mimic::compiler::{Compiler, Emit, Options};
use mimic::logger;

fn emit_asm(opt_level: u8, src: &str) -> String {
  let _guard = logger::lock_for_tests();
  let c = Compiler::new(Options {
    opt_level,
    emit: Emit::Asm,
    ..Default::default()
  }).expect("default pipeline configures");
  c.compile("test.c", src).expect("source compiles")
}

#[test]
fn leaf_functions_return_directly() {
  let asm = emit_asm(1, "int main() { return 42; }");
  assert!(asm.contains("\t.text"));
  assert!(asm.contains("\t.global\tmain"));
  assert!(asm.contains("main:"));
  assert!(asm.contains("#42"));
  assert!(asm.contains("\tbx\tlr"), "a frameless leaf returns directly:\n{asm}");
  assert!(!asm.contains("\tpush"), "no frame registers to save:\n{asm}");
}

#[test]
fn calls_get_a_prologue_and_epilogue() {
  let asm = emit_asm(1, "
    int g();
    int main() { return g() + 1; }
  ");
  assert!(asm.contains("\tpush"), "prologue saves the frame registers:\n{asm}");
  assert!(asm.contains("\tpop"), "epilogue restores and returns:\n{asm}");
  assert!(asm.contains("\tbl\tg"));
}

#[test]
fn register_pressure_spills_to_the_stack() {
  // 32 temporaries all live into the final sum: far more than the register
  // pool, so the allocator must spill, staging through the scratch register
  let mut src = String::from("int f(int a, int b) {\n");
  for i in 0..32 {
    src.push_str(&format!("  int t{i} = a * {} + b * {};\n", i + 1, i + 2));
  }
  src.push_str("  return t0");
  for i in 1..32 {
    src.push_str(&format!(" + t{i}"));
  }
  src.push_str(";\n}\n");
  let asm = emit_asm(0, &src);
  assert!(asm.contains("r12"), "spill traffic uses the scratch register:\n{asm}");
  assert!(asm.contains("\tstr\tr12"), "at least one value lives in a stack slot:\n{asm}");
}

#[test]
fn loop_produces_a_back_edge() {
  let asm = emit_asm(1, "
    int f(int n) {
      int s = 0;
      while (n) { s = s + n; n = n - 1; }
      return s;
    }
  ");
  assert!(asm.contains("\tcmp"), "the loop condition compares:\n{asm}");
  assert!(asm.contains("\tbne") || asm.contains("\tbeq"),
    "the condition branches:\n{asm}");
  // some branch targets an earlier label: find a `b .Ln` whose label was
  // already printed
  let mut seen = Vec::new();
  let mut has_back_edge = false;
  for line in asm.lines() {
    if let Some(label) = line.strip_suffix(':') {
      if label.starts_with(".L") { seen.push(label.to_owned()) }
    }
    if let Some(target) = line.trim().strip_prefix("b\t") {
      if seen.iter().any(|l| l == target) { has_back_edge = true }
    }
  }
  assert!(has_back_edge, "the loop must branch backwards:\n{asm}");
}

#[test]
fn six_arguments_use_the_stack() {
  let asm = emit_asm(1, "
    int sum6(int a, int b, int c, int d, int e, int f) {
      return a + b + c + d + e + f;
    }
    int main() { return sum6(1, 2, 3, 4, 5, 6); }
  ");
  // the callee reads overflow arguments relative to the frame pointer
  assert!(asm.contains("[r11"), "stack arguments load via the frame pointer:\n{asm}");
  // the caller stores them into the outgoing area
  assert!(asm.contains("\tstr"), "overflow arguments are stored:\n{asm}");
  assert!(asm.contains("\tbl\tsum6"));
}

#[test]
fn division_calls_the_runtime() {
  let asm = emit_asm(0, "int f(int a, int b) { return a / b + a % b; }");
  assert!(asm.contains("\tbl\t__aeabi_idiv"), "division is a runtime call:\n{asm}");
  assert!(asm.contains("\tbl\t__aeabi_idivmod"), "modulo is a runtime call:\n{asm}");
}

#[test]
fn globals_emit_data_directives() {
  let asm = emit_asm(1, "
    int counter = 7;
    int tbl[3] = {1, 2, 3};
    int main() { return counter + tbl[1]; }
  ");
  assert!(asm.contains("\t.data"));
  assert!(asm.contains("counter:"));
  assert!(asm.contains("\t.word\t7"));
  assert!(asm.contains("tbl:"));
  assert!(asm.contains("\t.word\t2"));
}

#[test]
fn internal_globals_are_local_symbols() {
  let asm = emit_asm(0, "
    static int hidden = 3;
    int main() { return hidden; }
  ");
  assert!(asm.contains("hidden:"));
  assert!(!asm.contains(".global\thidden"), "static data must not be exported:\n{asm}");
}

#[test]
fn string_literals_land_in_rodata() {
  let asm = emit_asm(1, "
    int puts(char *s);
    int main() { return puts(\"hi\"); }
  ");
  assert!(asm.contains("\t.section\t.rodata"));
  assert!(asm.contains(".LC0:"));
  // 'h', 'i', NUL
  assert!(asm.contains("\t.byte\t104"));
  assert!(asm.contains("\t.byte\t0"));
}

#[test]
fn runtime_global_init_registers_a_ctor() {
  let asm = emit_asm(1, "
    int g();
    int x = g();
    int main() { return x; }
  ");
  assert!(asm.contains("__global_ctor:"));
  assert!(asm.contains("\t.section\t.init_array"));
  assert!(asm.contains("\t.word\t__global_ctor"));
}

#[test]
fn branch_to_next_label_is_collapsed() {
  let asm = emit_asm(1, "int f(int x) { if (x) { x = 1; } return x; }");
  let lines: Vec<&str> = asm.lines().map(str::trim).collect();
  for pair in lines.windows(2) {
    if let Some(target) = pair[0].strip_prefix("b\t") {
      assert_ne!(format!("{target}:"), pair[1],
        "peephole must drop branches to the next label:\n{asm}");
    }
  }
}
