//! Diagnostics: the three error tiers from the spec's error-handling design
//! (§7): user errors, compiler-internal errors, and runtime compose errors.
//!
//! User errors are collected non-fatally on a [`Diagnostics`] sink owned by
//! the module builder; compiler-internal errors abort immediately via
//! `panic!`, matching the way `mmcc`'s own lowering code treats invariant
//! violations (`build_mir.rs`: `TyKind::Error => panic!(...)`) rather than
//! threading a `Result` through every visitor method. Runtime compose
//! errors (§7 tier 3) are not represented here at all: they are emitted as
//! IL instructions (`il::Instr::Throw`), i.e. they are *data* the composer
//! produces, not something the Rust call stack unwinds through.

use std::fmt;

use crate::ids::Location;

/// One user-facing diagnostic: a message anchored to a source location.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{location}: {message}")]
pub struct Diagnostic {
  pub message: String,
  pub location: Location,
}

/// Accumulates user errors raised while building a module.
///
/// Mirrors the role of `hilti::builder::ModuleBuilder`'s embedded error
/// reporter (§4.2 Finalization): non-fatal errors pile up here, and
/// `finalize()` on the owning builder returns `None` if any were recorded.
#[derive(Debug, Default)]
pub struct Diagnostics {
  errors: Vec<Diagnostic>,
}

impl Diagnostics {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a user error (tier 1, §7). Does not abort compilation.
  pub fn error(&mut self, message: impl Into<String>, location: Location) {
    let diag = Diagnostic { message: message.into(), location };
    tracing::debug!(target: "binpac_il::diag", "{diag}");
    self.errors.push(diag);
  }

  #[must_use]
  pub fn has_errors(&self) -> bool {
    !self.errors.is_empty()
  }

  #[must_use]
  pub fn errors(&self) -> &[Diagnostic] {
    &self.errors
  }
}

impl fmt::Display for Diagnostics {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for e in &self.errors {
      writeln!(f, "{e}")?;
    }
    Ok(())
  }
}

/// Raise a compiler-internal error (tier 2, §7): a gap in the implementation
/// or an invariant violation. This is always a bug in the compiler itself,
/// never a consequence of bad user input, so it aborts immediately rather
/// than returning a `Result` callers would have to thread through every
/// visitor — the same shape as `mmcc`'s `panic!`-on-invariant-violation
/// style in `build_mir.rs`.
#[track_caller]
pub fn internal_error(message: impl fmt::Display) -> ! {
  panic!("internal compiler error: {message}")
}

/// Raise a fatal error: same termination behavior as [`internal_error`], but
/// used for conditions that are violations of the module builder's own
/// contracts (e.g. `CHECK_UNIQUE` redeclaration, §4.2) rather than missing
/// feature coverage.
#[track_caller]
pub fn fatal_error(message: impl fmt::Display) -> ! {
  panic!("fatal error: {message}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accumulates_without_aborting() {
    let mut diags = Diagnostics::new();
    diags.error("bad thing", Location::default());
    diags.error("another bad thing", Location::default());
    assert!(diags.has_errors());
    assert_eq!(diags.errors().len(), 2);
  }

  #[test]
  #[should_panic(expected = "internal compiler error")]
  fn internal_error_aborts() {
    internal_error("unsupported production");
  }
}
