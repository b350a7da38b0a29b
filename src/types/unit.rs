//! Units (§3.4): named aggregates of fields, the top-level grammar objects
//! the composer (§4.3) walks.

use crate::ids::Id;
use crate::support::attrs::{Attributes, Expr};
use crate::types::production::Prod;
use crate::types::ty::{StructField, Ty, Type};

/// Index of a [`Field`] within its owning [`Unit::fields`]. Grammar
/// productions reference their anchor field by this handle rather than by
/// pointer (Design Notes §9).
pub type FieldId = usize;

/// One field of a unit: a production anchor plus the attributes and
/// condition that govern how it is composed/parsed.
#[derive(Clone, Debug)]
pub struct Field {
  /// `None` for an anonymous field (§3.4) — its value is never delivered
  /// with a non-null `obj` (§4.3.7).
  pub name: Option<String>,
  pub ty: Ty,
  pub production: Prod,
  pub attributes: Attributes,
  pub condition: Option<Expr>,
  /// The `forComposing` bit (§3.4): `false` means this field is parse-only
  /// and the composer skips it entirely (§4.3.3 step 1).
  pub for_composing: bool,
}

impl Field {
  #[must_use]
  pub fn anonymous(&self) -> bool {
    self.name.is_none()
  }

  #[must_use]
  pub fn is_container(&self) -> bool {
    self.ty.is_container()
  }

  /// Resolve `name`, walking up through `chain` (innermost first) when
  /// this field doesn't set it directly — e.g. `&byteorder` (§4.3.6).
  #[must_use]
  pub fn inherited_attr<'a>(&'a self, name: &str, chain: impl IntoIterator<Item = &'a Attributes>) -> Option<&'a Expr> {
    crate::support::attrs::lookup_inherited(std::iter::once(&self.attributes).chain(chain), name)
  }
}

/// The event a [`UnitHook`] fires on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookEvent {
  /// `%init`: fires once before any field is composed (§4.3.9).
  Init,
  /// `%done`: fires once after all fields are composed (§4.3.9).
  Done,
  Field(FieldId),
}

/// Scheduling metadata shared by ordinary functions and hooks (§3.5): hooks
/// carry `priority` (higher runs first among hooks for the same event) and
/// an optional `group` used to order independently-contributed hook sets.
#[derive(Clone, Debug, Default)]
pub struct HookMeta {
  pub priority: i64,
  pub group: Option<Id>,
}

#[derive(Clone, Debug)]
pub struct UnitHook {
  pub event: HookEvent,
  pub meta: HookMeta,
}

/// A named aggregate (§3.4): the compilation unit of grammar composition.
#[derive(Clone, Debug)]
pub struct Unit {
  pub id: Id,
  pub fields: Vec<Field>,
  pub condition: Option<Expr>,
  pub for_composing: bool,
  pub hooks: Vec<UnitHook>,
  /// The root production of this unit's grammar — typically a `Sequence`
  /// over `self.fields`, but kept distinct since lookahead/switch
  /// wrapping can reshape it.
  pub grammar: Prod,
}

impl Unit {
  #[must_use]
  pub fn field(&self, id: FieldId) -> &Field {
    &self.fields[id]
  }

  /// The unit's own value type: a `Struct` of its named fields, in
  /// declaration order (invariant (f) of §3.2 — unique field names —
  /// holds because two unit fields may not share a name).
  #[must_use]
  pub fn value_type(&self) -> Ty {
    let fields = self
      .fields
      .iter()
      .filter_map(|f| f.name.as_ref().map(|name| StructField { name: name.clone(), ty: f.ty.clone() }))
      .collect();
    Type::struct_(fields)
  }

  #[must_use]
  pub fn hooks_for(&self, event: HookEvent) -> impl Iterator<Item = &UnitHook> {
    self.hooks.iter().filter(move |h| h.event == event)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::production::{PgMeta, Production, ProductionKind};
  use std::rc::Rc;

  fn make_field(name: &str, ty: Ty) -> Field {
    Field {
      name: Some(name.into()),
      ty,
      production: Production::new(ProductionKind::Epsilon, PgMeta::new(name, true)),
      attributes: Attributes::new(),
      condition: None,
      for_composing: true,
    }
  }

  #[test]
  fn value_type_collects_named_fields_in_order() {
    let fields = vec![make_field("x", Rc::new(Type::Bool)), make_field("y", Rc::new(Type::Integer { width: 8, signed: false }))];
    let unit = Unit {
      id: Id::new("U"),
      fields,
      condition: None,
      for_composing: true,
      hooks: vec![],
      grammar: Production::new(ProductionKind::Epsilon, PgMeta::new("root", true)),
    };
    let ty = unit.value_type();
    match &*ty {
      Type::Struct(fs) => {
        assert_eq!(fs.len(), 2);
        assert_eq!(fs[0].name, "x");
        assert_eq!(fs[1].name, "y");
      }
      _ => panic!("expected Struct"),
    }
  }

  #[test]
  fn hooks_for_filters_by_event() {
    let unit = Unit {
      id: Id::new("U"),
      fields: vec![],
      condition: None,
      for_composing: true,
      hooks: vec![
        UnitHook { event: HookEvent::Init, meta: HookMeta::default() },
        UnitHook { event: HookEvent::Done, meta: HookMeta::default() },
      ],
      grammar: Production::new(ProductionKind::Epsilon, PgMeta::new("root", true)),
    };
    assert_eq!(unit.hooks_for(HookEvent::Init).count(), 1);
    assert_eq!(unit.hooks_for(HookEvent::Done).count(), 1);
    assert_eq!(unit.hooks_for(HookEvent::Field(0)).count(), 0);
  }
}
