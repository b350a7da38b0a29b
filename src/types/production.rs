//! Grammar productions (§3.3): the nodes of a unit's grammar.

use std::rc::Rc;

use crate::support::attrs::Expr;
use crate::types::ty::Ty;
use crate::types::unit::FieldId;

pub type Prod = Rc<Production>;

/// A literal value matched or emitted by a `Literal` production.
#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValue {
  Bytes(Vec<u8>),
  Int(i64),
  Regex(String),
}

/// One switch arm: a set of matching constant expressions and the
/// production to run when one of them matches.
#[derive(Clone, Debug)]
pub struct SwitchCase {
  pub values: Vec<Expr>,
  pub body: Prod,
}

/// Per-production metadata threaded alongside the grammar shape itself
/// (§3.3): the unit field it anchors (if any), a symbolic name unique
/// within its unit (used to name generated IL functions, §4.3.3 step 5),
/// and whether it is atomic (can be inlined without a dedicated wrapper
/// function).
#[derive(Clone, Debug)]
pub struct PgMeta {
  /// The anchor field, identified by index into the owning unit's field
  /// list rather than by pointer — grammar nodes never own a reference
  /// back to their unit (Design Notes §9: "references between nodes are
  /// handles, not ownership").
  pub field: Option<FieldId>,
  pub symbol: String,
  pub atomic: bool,
}

impl PgMeta {
  #[must_use]
  pub fn new(symbol: impl Into<String>, atomic: bool) -> Self {
    Self { field: None, symbol: symbol.into(), atomic }
  }

  #[must_use]
  pub fn with_field(mut self, field: FieldId) -> Self {
    self.field = Some(field);
    self
  }
}

/// The grammar node tagged variant (§3.3).
#[derive(Clone, Debug)]
pub enum ProductionKind {
  Literal(LiteralValue),
  Variable(Ty),
  Epsilon,
  Sequence(Vec<Prod>),
  LookAhead(Vec<Prod>),
  Switch { expr: Expr, cases: Vec<SwitchCase>, default: Option<Prod> },
  Counter { count: Expr, body: Prod },
  ByteBlock,
  Boolean { cond: Expr, true_branch: Prod, false_branch: Prod },
  Loop { body: Prod, until: Option<Expr> },
  /// Composes/parses a nested unit. `unit` names the child unit by id so
  /// that mutually recursive unit definitions don't require a cyclic
  /// `Rc` graph — the composer resolves it through the module's unit
  /// registry at lowering time.
  ChildGrammar(crate::ids::Id),
  Enclosure(Prod),
}

#[derive(Clone, Debug)]
pub struct Production {
  pub kind: ProductionKind,
  pub meta: PgMeta,
}

impl Production {
  #[must_use]
  pub fn new(kind: ProductionKind, meta: PgMeta) -> Prod {
    Rc::new(Self { kind, meta })
  }

  #[must_use]
  pub fn symbol(&self) -> &str {
    &self.meta.symbol
  }

  #[must_use]
  pub fn atomic(&self) -> bool {
    self.meta.atomic
  }

  #[must_use]
  pub fn field(&self) -> Option<FieldId> {
    self.meta.field
  }
}
