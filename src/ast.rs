//! Visitor infrastructure (§4.4): a polymorphic dispatch shared by every
//! pass that walks productions/types rather than re-deriving its own
//! traversal. Parameterized over a result type `R` and a first-argument
//! type `A`, the way `binpac::ast_info`'s `Visitor<Result, Arg1>` template
//! pair is parameterized in the original — the composer (§4.3) is the
//! `Visitor<(), Option<&Field>>` instance.

use crate::types::production::Prod;
use crate::types::ty::Ty;
use crate::types::unit::Unit;

/// Implemented by a pass that visits productions and types, producing an
/// `R` from an `A` argument threaded alongside the node (the composer's
/// argument is the anchor field, if any; a hypothetical pretty-printer's
/// might be `()`).
pub trait Visitor<R, A> {
  fn visit_production(&mut self, prod: &Prod, arg: A) -> R;
  fn visit_type(&mut self, ty: &Ty, arg: A) -> R;
}

/// Walks every production reachable from `unit`'s grammar in preorder,
/// calling `f` on each. Shared by passes that need a flat traversal rather
/// than the composer's own recursive-descent dispatch — e.g. collecting
/// every anchor field a grammar references, or checking that no production
/// symbol repeats within a unit (§8.1 "name uniqueness").
pub fn walk_productions(root: &Prod, f: &mut impl FnMut(&Prod)) {
  f(root);
  use crate::types::production::ProductionKind as K;
  match &root.kind {
    K::Sequence(parts) | K::LookAhead(parts) => {
      for p in parts {
        walk_productions(p, f);
      }
    }
    K::Switch { cases, default, .. } => {
      for case in cases {
        walk_productions(&case.body, f);
      }
      if let Some(d) = default {
        walk_productions(d, f);
      }
    }
    K::Counter { body, .. } | K::Loop { body, .. } => walk_productions(body, f),
    K::Enclosure(inner) => walk_productions(inner, f),
    K::Boolean { true_branch, false_branch, .. } => {
      walk_productions(true_branch, f);
      walk_productions(false_branch, f);
    }
    K::Literal(_) | K::Variable(_) | K::Epsilon | K::ByteBlock | K::ChildGrammar(_) => {}
  }
}

/// Collects every production symbol under `unit`'s grammar, in traversal
/// order. A duplicate indicates a violation of §8.1's "production symbols
/// are unique within their unit" invariant.
#[must_use]
pub fn collect_symbols(unit: &Unit) -> Vec<String> {
  let mut symbols = Vec::new();
  walk_productions(&unit.grammar, &mut |p| symbols.push(p.symbol().to_string()));
  symbols
}
