//! Ahead-of-time compiler for the MimiC language.
//!
//! MimiC is a small C-like imperative language. The compiler lowers source
//! text through a typed AST to an SSA intermediate representation, runs a
//! configurable pipeline of analysis and transformation passes over it,
//! lowers the result to a machine-level IR for a 32-bit ARM target, performs
//! linear-scan register allocation and peephole cleanup, and emits assembly
//! text.

// rust lints we want
#![warn(
  bare_trait_objects,
  elided_lifetimes_in_paths,
  missing_copy_implementations,
  missing_debug_implementations,
  future_incompatible,
  rust_2018_idioms,
  trivial_numeric_casts,
  variant_size_differences,
  unreachable_pub,
  unused,
  missing_docs
)]
// all the clippy
#![warn(clippy::all, clippy::pedantic)]
// clippy lints we don't want
#![allow(
  clippy::cognitive_complexity,
  clippy::default_trait_access,
  clippy::enum_glob_use,
  clippy::match_bool,
  clippy::missing_errors_doc,
  clippy::missing_panics_doc,
  clippy::module_name_repetitions,
  clippy::option_if_let_else,
  clippy::semicolon_if_nothing_returned,
  clippy::too_many_lines,
  clippy::use_self
)]

macro_rules! mk_id {
  (@ImplDebug $id:ident) => {
    impl std::fmt::Debug for $id {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", stringify!($id), self.0)
      }
    }
  };
  (@ImplDebug $id:ident !Debug) => {};
  (@ImplDebug $id:ident Debug($l:expr)) => {
    impl std::fmt::Debug for $id {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", $l, self.0)
      }
    }
  };
  ($($(#[$attr:meta])* $id:ident $(($($lit:tt)*))?),* $(,)?) => {$(
    $(#[$attr])*
    #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct $id(pub u32);
    mk_id!(@ImplDebug $id $($($lit)*)?);
    impl From<$id> for usize {
      fn from(id: $id) -> usize { id.0 as usize }
    }
    impl crate::types::Idx for $id {
      fn into_usize(self) -> usize { self.into() }
      fn from_usize(n: usize) -> Self { $id(std::convert::TryFrom::try_from(n).expect("overflow")) }
      fn fresh(&mut self) -> Self {
        let n = *self;
        self.0 += 1;
        n
      }
    }
  )*}
}

#[macro_use] extern crate bitflags;
#[macro_use] extern crate if_chain;

pub mod types;
pub mod symbol;
pub mod logger;
pub mod front;
pub mod builder;
pub mod build_ir;
pub mod pass;
pub mod passman;
pub mod opt;
pub mod back;
pub mod compiler;

pub use symbol::{Symbol, Interner, intern};
pub use types::Idx;
pub use compiler::{Compiler, CompileError};
