//! Compiler options (§4.5): an enumerated configuration record passed by
//! shared reference into every component. The CLI tool that surfaces these
//! to users is out of scope (§6.4); this is purely the in-process record.

use hashbrown::HashSet;
use std::path::PathBuf;

/// Debug verbosity, threaded through the composer to decide whether to
/// emit `addDebugMsg`-style IL instructions (§4.3.7, §4.3.9) and trace
/// comments (SPEC_FULL §C.4).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
  #[default]
  Off,
  On,
  Verbose,
}

impl DebugLevel {
  #[must_use]
  pub fn is_enabled(self) -> bool {
    self != DebugLevel::Off
  }

  #[must_use]
  pub fn is_verbose(self) -> bool {
    self == DebugLevel::Verbose
  }
}

impl From<u8> for DebugLevel {
  fn from(level: u8) -> Self {
    match level {
      0 => DebugLevel::Off,
      1 => DebugLevel::On,
      _ => DebugLevel::Verbose,
    }
  }
}

#[derive(Clone, Debug, Default)]
pub struct CompilerOptions {
  pub debug: DebugLevel,
  pub optimize: bool,
  pub profile: bool,
  /// Named code-generation debug streams to enable (e.g. `"compose"`,
  /// `"rtti"`), matching `BinPAC::Options::cg_debug`.
  pub cg_debug: HashSet<String>,
  pub jit: bool,
  pub library_dirs: Vec<PathBuf>,
}

impl CompilerOptions {
  #[must_use]
  pub fn cg_debug_enabled(&self, stream: &str) -> bool {
    self.cg_debug.contains(stream)
  }
}
