//! The `mmcc` command line driver.
//!
//! ```text
//! mmcc [-O<0..3>] [-S | --emit-ir] [--dump-ast] [--dump-passes]
//!      [-o <out>] <input>
//! ```
//!
//! Exit code is 0 on success, otherwise the number of diagnostic errors
//! clamped to 255. Diagnostics go to stderr.

use std::fs;
use std::io::Write;
use std::process::ExitCode;
use clap::{Arg, ArgAction, Command};
use mimic::compiler::{Compiler, CompileError, Emit, Options};

fn cli() -> Command {
  Command::new("mmcc")
    .version("0.1.0")
    .about("MimiC compiler")
    .arg(Arg::new("opt")
      .short('O')
      .value_name("LEVEL")
      .default_value("1")
      .help("Optimization level (0-3)"))
    .arg(Arg::new("asm")
      .short('S')
      .action(ArgAction::SetTrue)
      .help("Emit assembly (the default)"))
    .arg(Arg::new("emit-ir")
      .long("emit-ir")
      .action(ArgAction::SetTrue)
      .conflicts_with("asm")
      .help("Emit the textual SSA IR instead of assembly"))
    .arg(Arg::new("dump-ast")
      .long("dump-ast")
      .action(ArgAction::SetTrue)
      .help("Dump the parsed AST to stderr"))
    .arg(Arg::new("dump-passes")
      .long("dump-passes")
      .action(ArgAction::SetTrue)
      .help("List the registered passes to stderr"))
    .arg(Arg::new("debug")
      .short('d')
      .long("debug")
      .action(ArgAction::SetTrue)
      .help("Enable debug logging"))
    .arg(Arg::new("output")
      .short('o')
      .value_name("FILE")
      .help("Write output to FILE instead of stdout"))
    .arg(Arg::new("input")
      .required(true)
      .value_name("INPUT")
      .help("The source file to compile"))
}

fn main() -> ExitCode {
  let m = cli().get_matches();

  let level = if m.get_flag("debug") {
    simplelog::LevelFilter::Debug
  } else {
    simplelog::LevelFilter::Warn
  };
  let _ = simplelog::TermLogger::init(
    level,
    simplelog::Config::default(),
    simplelog::TerminalMode::Stderr,
    simplelog::ColorChoice::Auto,
  );

  let opt_level = match m.get_one::<String>("opt").expect("has default").parse::<u8>() {
    Ok(n) if n <= 3 => n,
    _ => {
      eprintln!("mmcc: error: invalid optimization level");
      return ExitCode::from(1)
    }
  };
  let opts = Options {
    opt_level,
    emit: if m.get_flag("emit-ir") { Emit::Ir } else { Emit::Asm },
    dump_ast: m.get_flag("dump-ast"),
    dump_passes: m.get_flag("dump-passes"),
  };

  let compiler = match Compiler::new(opts.clone()) {
    Ok(c) => c,
    Err(e) => {
      eprintln!("mmcc: error: {e}");
      return ExitCode::from(1)
    }
  };
  if opts.dump_passes {
    compiler.show_passes(&mut std::io::stderr()).expect("stderr write");
  }

  let input = m.get_one::<String>("input").expect("required");
  let src = match fs::read_to_string(input) {
    Ok(s) => s,
    Err(e) => {
      eprintln!("mmcc: error: cannot read '{input}': {e}");
      return ExitCode::from(1)
    }
  };

  match compiler.compile(input, &src) {
    Ok(text) => {
      let result = match m.get_one::<String>("output") {
        Some(path) => fs::write(path, text).map_err(|e| (path.clone(), e)),
        None => {
          print!("{text}");
          std::io::stdout().flush().map_err(|e| (String::from("<stdout>"), e))
        }
      };
      match result {
        Ok(()) => ExitCode::SUCCESS,
        Err((path, e)) => {
          eprintln!("mmcc: error: cannot write '{path}': {e}");
          ExitCode::from(1)
        }
      }
    }
    Err(CompileError::Source(n)) => ExitCode::from(n.min(255) as u8),
    Err(e) => {
      eprintln!("mmcc: error: {e}");
      ExitCode::from(1)
    }
  }
}
