//! Field/unit attributes: a string-keyed map from attribute name to an
//! optional expression (§4.5).

use hashbrown::HashMap;

/// A placeholder for the out-of-scope expression AST. The surface parser
/// (not part of this crate) produces real expressions; the core only ever
/// needs to know whether an attribute carries a value and, when it does,
/// to hold onto it opaquely.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
  /// An integer literal, common enough for attributes like `&count=3` that
  /// the composer needs to inspect directly without round-tripping
  /// through the full (out-of-scope) expression evaluator.
  Int(i64),
  /// A string literal, e.g. an enum label name used in `&byteorder=Big`.
  Ident(String),
  /// Any other expression, opaque to this crate.
  Opaque(String),
}

/// An attribute set attached to a field, unit, or type.
#[derive(Clone, Debug, Default)]
pub struct Attributes {
  map: HashMap<String, Option<Expr>>,
}

impl Attributes {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&mut self, name: impl Into<String>, value: Option<Expr>) {
    self.map.insert(name.into(), value);
  }

  #[must_use]
  pub fn has(&self, name: &str) -> bool {
    self.map.contains_key(name)
  }

  #[must_use]
  pub fn lookup(&self, name: &str) -> Option<&Expr> {
    self.map.get(name).and_then(Option::as_ref)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.map.keys().map(String::as_str)
  }
}

/// Resolves an inherited attribute by walking up a chain of attribute sets,
/// innermost first (a field's own attributes, then its containing unit's,
/// and so on). Mirrors `binpac::type::unit::item::Field::inheritedProperty`
/// as used for `&byteorder` in `composer.cc`.
#[must_use]
pub fn lookup_inherited<'a>(chain: impl IntoIterator<Item = &'a Attributes>, name: &str) -> Option<&'a Expr> {
  for attrs in chain {
    if let Some(expr) = attrs.lookup(name) {
      return Some(expr);
    }
  }
  None
}
