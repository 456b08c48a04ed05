//! User-facing diagnostics.
//!
//! Every AST, SSA and MIR node carries a [`Logger`], a cheap copyable handle
//! recording the file and source position the node came from. Diagnostics are
//! written to stderr in the format `<file>:<line>:<col>: error|warning:
//! <message>`, and error/warning totals are kept in process-wide counters
//! that the driver interrogates at pass boundaries.

use std::sync::atomic::{AtomicUsize, Ordering};
use crate::Symbol;
use crate::types::Span;

static ERRORS: AtomicUsize = AtomicUsize::new(0);
static WARNINGS: AtomicUsize = AtomicUsize::new(0);

/// A handle tying a compiler object back to the source position it came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Logger {
  /// The (interned) name of the source file.
  pub file: Symbol,
  /// The position within the file.
  pub span: Span,
}

impl Logger {
  /// Create a logger for the given file and position.
  #[must_use] pub fn new(file: Symbol, span: Span) -> Self { Self { file, span } }

  /// A logger for synthesized objects with no source position.
  #[must_use] pub fn none(file: Symbol) -> Self { Self { file, span: Span::NONE } }

  /// Report an error at this position and bump the process-wide error count.
  pub fn error(&self, message: impl std::fmt::Display) {
    ERRORS.fetch_add(1, Ordering::Relaxed);
    eprintln!("{}:{}:{}: error: {}", self.file, self.span.line, self.span.col, message);
  }

  /// Report a warning at this position and bump the process-wide warning count.
  pub fn warning(&self, message: impl std::fmt::Display) {
    WARNINGS.fetch_add(1, Ordering::Relaxed);
    eprintln!("{}:{}:{}: warning: {}", self.file, self.span.line, self.span.col, message);
  }
}

/// The number of errors reported since the last [`reset`].
#[must_use] pub fn error_num() -> usize { ERRORS.load(Ordering::Relaxed) }

/// The number of warnings reported since the last [`reset`].
#[must_use] pub fn warning_num() -> usize { WARNINGS.load(Ordering::Relaxed) }

/// Reset the process-wide error and warning counters.
pub fn reset() {
  ERRORS.store(0, Ordering::Relaxed);
  WARNINGS.store(0, Ordering::Relaxed);
}

/// Serialize access to the process-wide counters from test threads. Any test
/// that calls [`reset`] and then inspects the counters holds this guard for
/// its duration; the counters are shared state, and the test harness runs
/// threads in parallel.
pub fn lock_for_tests() -> std::sync::MutexGuard<'static, ()> {
  static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
  LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
