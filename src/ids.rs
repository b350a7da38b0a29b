//! Scoped identifiers (`foo::bar::baz`) used throughout the grammar and IL.

use std::fmt;

/// A source location attached to an [`Id`] or other AST node.
///
/// The surface-syntax parser (out of scope for this crate) is the only
/// producer of real spans; the core treats them as opaque and never
/// inspects their contents beyond rendering for diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Location {
  pub file: Option<String>,
  pub line: u32,
  pub column: u32,
}

impl Location {
  pub const NONE: Location = Location { file: None, line: 0, column: 0 };

  #[must_use]
  pub fn is_none(&self) -> bool {
    self.file.is_none() && self.line == 0 && self.column == 0
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.file {
      Some(file) => write!(f, "{file}:{}:{}", self.line, self.column),
      None => write!(f, "<no location>"),
    }
  }
}

/// A scoped identifier with `::`-separated path segments.
///
/// Equality and hashing are defined purely over the path segments: two IDs
/// at different source locations but the same path are equal (invariant
/// `Type::Parameterized::equal` in §3.2 relies on the same property for
/// type-level IDs). Module-root qualification only affects how the path
/// renders, not equality.
#[derive(Clone, Debug)]
pub struct Id {
  segments: Vec<String>,
  location: Location,
}

impl Id {
  #[must_use]
  pub fn new(path: &str) -> Self {
    Self { segments: path.split("::").map(str::to_owned).collect(), location: Location::default() }
  }

  #[must_use]
  pub fn with_location(path: &str, location: Location) -> Self {
    Self { segments: path.split("::").map(str::to_owned).collect(), location }
  }

  #[must_use]
  pub fn from_segments(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
    Self { segments: segments.into_iter().map(Into::into).collect(), location: Location::default() }
  }

  #[must_use]
  pub fn location(&self) -> &Location {
    &self.location
  }

  /// The final path segment, e.g. `"baz"` for `foo::bar::baz`.
  #[must_use]
  pub fn local(&self) -> &str {
    self.segments.last().map_or("", String::as_str)
  }

  #[must_use]
  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  #[must_use]
  pub fn is_scoped(&self) -> bool {
    self.segments.len() > 1
  }

  /// Render the full path, qualified against `module_root` when the id's
  /// first segment matches it (so a reference to `Foo::bar` from inside
  /// module `Foo` renders as `bar`).
  #[must_use]
  pub fn path_as_string(&self, module_root: Option<&str>) -> String {
    match module_root {
      Some(root) if self.segments.len() > 1 && self.segments[0].eq_ignore_ascii_case(root) => {
        self.segments[1..].join("::")
      }
      _ => self.segments.join("::"),
    }
  }
}

impl fmt::Display for Id {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.segments.join("::"))
  }
}

impl PartialEq for Id {
  fn eq(&self, other: &Self) -> bool {
    self.segments == other.segments
  }
}
impl Eq for Id {}

impl std::hash::Hash for Id {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    self.segments.hash(state);
  }
}

impl From<&str> for Id {
  fn from(s: &str) -> Self {
    Id::new(s)
  }
}

impl From<String> for Id {
  fn from(s: String) -> Self {
    Id::new(&s)
  }
}
