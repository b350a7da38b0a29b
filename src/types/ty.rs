//! The IL type system (§3.2): a tagged, closed set of type variants, each
//! classified by a combination of orthogonal capability traits.

use std::rc::Rc;

use bitflags::bitflags;

use crate::ids::Id;
use crate::support::diag::internal_error;

bitflags! {
  /// Orthogonal capability tags attached to each [`Type`] variant. Named
  /// directly after §3.2's trait list.
  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
  pub struct TypeTraits: u16 {
    /// Passed by copy; must define a default "init value".
    const VALUE_TYPE       = 1 << 0;
    /// Passed by reference; GC-managed; must define a destructor.
    const HEAP_TYPE        = 1 << 1;
    /// Carries structural parameters that participate in equality.
    const PARAMETERIZED    = 1 << 2;
    /// Composite with ordered element types.
    const TYPE_LIST        = 1 << 3;
    /// Exposes an iterator type and an element type.
    const ITERABLE         = 1 << 4;
    /// Subset of ITERABLE: maps/sets/lists/vectors.
    const CONTAINER        = 1 << 5;
    const HASHABLE         = 1 << 6;
    const ATOMIC           = 1 << 7;
    const UNPACKABLE       = 1 << 8;
    const CLASSIFIABLE     = 1 << 9;
    const BLOCKABLE        = 1 << 10;
    const GARBAGE_COLLECTED = 1 << 11;
  }
}

/// A type reference. Types are immutably shared (`Rc`) rather than owned
/// trees, the way `mmcc` shares `Ty`/`Expr` nodes (`build_mir.rs`'s
/// `Translator` interns translated types behind `Rc`) — cheap to clone when
/// threading a field's type through the composer and the module builder.
pub type Ty = Rc<Type>;

/// A named element of a `Struct`, `Union`, or `Overlay` type. Distinct from
/// the grammar-level `Field` in [`crate::types::unit`], which additionally
/// carries attributes, conditions, and pg-meta.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructField {
  pub name: String,
  pub ty: Ty,
}

/// The signature of a `HiltiFunction` or `Hook` type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionSig {
  pub params: Vec<Ty>,
  pub result: Ty,
}

/// The tagged, closed set of IL type variants (§3.2). Derives `Eq`/`Hash`
/// (ignoring nothing — unlike [`crate::ids::Id`], a type has no location to
/// ignore) so the RTTI builder can memoize descriptors in a structural-key
/// map (§4.1, §8.1).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
  Void,
  Any,
  /// An as-yet-unresolved named type; resolved against a module's scope
  /// by the RTTI builder (§4.1).
  Unknown(Id),
  Label,
  Block,
  Module,
  Unset,
  String,
  Bool,
  Integer { width: u32, signed: bool },
  Double,
  Address,
  Network,
  Port,
  Interval,
  Time,
  CAddr,
  /// An ordered `(value, label)` table, shared by `Bitset` and `Enum`.
  Bitset(Vec<(i64, String)>),
  Enum(Vec<(i64, String)>),
  Bytes,
  RegExp,
  File,
  Channel(Ty),
  /// An I/O source, parameterized by a source-kind tag (e.g. `"file"`,
  /// `"socket"`) the out-of-scope host glue interprets.
  IOSource(String),
  Callable,
  Timer,
  TimerMgr,
  Exception { base: Option<Ty>, arg: Option<Ty> },
  Reference(Ty),
  Iterator(Ty),
  Tuple { names: Option<Vec<String>>, types: Vec<Ty> },
  Map(Ty, Ty),
  Set(Ty),
  List(Ty),
  Vector(Ty),
  Struct(Vec<StructField>),
  Union { fields: Vec<StructField>, anonymous: bool },
  Context,
  Overlay(Vec<StructField>),
  Classifier { rules: Ty, value: Ty },
  MatchTokenState,
  HiltiFunction(FunctionSig),
  Hook(FunctionSig),
  TypeType(Ty),
}

impl Type {
  #[must_use]
  pub fn traits(&self) -> TypeTraits {
    use TypeTraits as T;
    match self {
      Type::Void | Type::Unset | Type::Label | Type::Block | Type::Module => T::empty(),
      Type::Any | Type::Unknown(_) => T::empty(),
      Type::String => T::VALUE_TYPE | T::HASHABLE | T::ITERABLE | T::UNPACKABLE,
      Type::Bool => T::VALUE_TYPE | T::HASHABLE | T::ATOMIC,
      Type::Integer { .. } => T::VALUE_TYPE | T::HASHABLE | T::ATOMIC | T::UNPACKABLE,
      Type::Double => T::VALUE_TYPE | T::HASHABLE | T::ATOMIC,
      Type::Address => T::VALUE_TYPE | T::HASHABLE | T::ATOMIC | T::UNPACKABLE,
      Type::Network => T::VALUE_TYPE | T::HASHABLE | T::ATOMIC,
      Type::Port => T::VALUE_TYPE | T::HASHABLE | T::ATOMIC | T::UNPACKABLE,
      Type::Interval | Type::Time => T::VALUE_TYPE | T::HASHABLE | T::ATOMIC,
      Type::CAddr => T::VALUE_TYPE | T::ATOMIC,
      Type::Bitset(_) => T::VALUE_TYPE | T::PARAMETERIZED | T::HASHABLE | T::ATOMIC,
      Type::Enum(_) => T::VALUE_TYPE | T::PARAMETERIZED | T::HASHABLE | T::ATOMIC,
      Type::Bytes => T::HEAP_TYPE | T::GARBAGE_COLLECTED | T::HASHABLE | T::ITERABLE | T::UNPACKABLE,
      Type::RegExp => T::HEAP_TYPE | T::GARBAGE_COLLECTED,
      Type::File => T::HEAP_TYPE | T::GARBAGE_COLLECTED | T::BLOCKABLE,
      Type::Channel(_) => T::HEAP_TYPE | T::GARBAGE_COLLECTED | T::PARAMETERIZED | T::BLOCKABLE,
      Type::IOSource(_) => T::HEAP_TYPE | T::GARBAGE_COLLECTED | T::PARAMETERIZED | T::BLOCKABLE,
      Type::Callable => T::HEAP_TYPE | T::GARBAGE_COLLECTED,
      Type::Timer | Type::TimerMgr => T::HEAP_TYPE | T::GARBAGE_COLLECTED,
      Type::Exception { .. } => T::HEAP_TYPE | T::GARBAGE_COLLECTED | T::PARAMETERIZED,
      Type::Reference(_) => T::VALUE_TYPE | T::PARAMETERIZED,
      Type::Iterator(_) => T::VALUE_TYPE | T::PARAMETERIZED,
      Type::Tuple { .. } => T::VALUE_TYPE | T::PARAMETERIZED | T::TYPE_LIST | T::HASHABLE,
      Type::Map(_, _) => {
        T::HEAP_TYPE | T::GARBAGE_COLLECTED | T::PARAMETERIZED | T::TYPE_LIST | T::ITERABLE | T::CONTAINER
      }
      Type::Set(_) => {
        T::HEAP_TYPE | T::GARBAGE_COLLECTED | T::PARAMETERIZED | T::TYPE_LIST | T::ITERABLE | T::CONTAINER
      }
      Type::List(_) => {
        T::HEAP_TYPE | T::GARBAGE_COLLECTED | T::PARAMETERIZED | T::TYPE_LIST | T::ITERABLE | T::CONTAINER
      }
      Type::Vector(_) => {
        T::HEAP_TYPE | T::GARBAGE_COLLECTED | T::PARAMETERIZED | T::TYPE_LIST | T::ITERABLE | T::CONTAINER
      }
      Type::Struct(_) => T::VALUE_TYPE | T::PARAMETERIZED | T::TYPE_LIST,
      Type::Union { .. } => T::VALUE_TYPE | T::PARAMETERIZED | T::TYPE_LIST,
      Type::Context => T::HEAP_TYPE | T::GARBAGE_COLLECTED,
      Type::Overlay(_) => T::VALUE_TYPE | T::PARAMETERIZED | T::TYPE_LIST,
      Type::Classifier { .. } => T::HEAP_TYPE | T::GARBAGE_COLLECTED | T::PARAMETERIZED | T::CLASSIFIABLE,
      Type::MatchTokenState => T::HEAP_TYPE | T::GARBAGE_COLLECTED,
      Type::HiltiFunction(_) => T::VALUE_TYPE | T::PARAMETERIZED,
      Type::Hook(_) => T::VALUE_TYPE | T::PARAMETERIZED,
      Type::TypeType(_) => T::PARAMETERIZED,
    }
  }

  #[must_use]
  pub fn is_value_type(&self) -> bool {
    self.traits().contains(TypeTraits::VALUE_TYPE)
  }

  #[must_use]
  pub fn is_heap_type(&self) -> bool {
    self.traits().contains(TypeTraits::HEAP_TYPE)
  }

  #[must_use]
  pub fn is_garbage_collected(&self) -> bool {
    self.traits().contains(TypeTraits::GARBAGE_COLLECTED)
  }

  #[must_use]
  pub fn is_iterable(&self) -> bool {
    self.traits().contains(TypeTraits::ITERABLE)
  }

  #[must_use]
  pub fn is_container(&self) -> bool {
    self.traits().contains(TypeTraits::CONTAINER)
  }

  /// The element type and iterator type for an `Iterable` type (§3.2).
  /// Internal error if called on a non-iterable type (invariant (e)
  /// callers must check `is_iterable()` first, or go through
  /// [`Type::iterator`] which performs the check).
  #[must_use]
  pub fn iterable_parts(&self) -> Option<(Ty, Ty)> {
    match self {
      Type::String => Some((Rc::new(Type::Integer { width: 8, signed: false }), Rc::new(Type::Unset))),
      Type::Bytes => Some((Rc::new(Type::Integer { width: 8, signed: false }), Rc::new(Type::Unset))),
      Type::List(t) | Type::Vector(t) | Type::Set(t) => Some((t.clone(), Rc::new(Type::Unset))),
      Type::Map(k, v) => {
        let elem = Rc::new(Type::Tuple { names: None, types: vec![k.clone(), v.clone()] });
        Some((elem, Rc::new(Type::Unset)))
      }
      _ => None,
    }
  }

  /// Ordered element types for a `TypeList` type (used by the pointer-map
  /// computation, §4.1, and by tuple/struct destructor synthesis).
  #[must_use]
  pub fn type_list(&self) -> Option<Vec<Ty>> {
    match self {
      Type::Tuple { types, .. } => Some(types.clone()),
      Type::Struct(fields) | Type::Overlay(fields) => Some(fields.iter().map(|f| f.ty.clone()).collect()),
      Type::Union { fields, .. } => Some(fields.iter().map(|f| f.ty.clone()).collect()),
      Type::List(t) | Type::Vector(t) | Type::Set(t) => Some(vec![t.clone()]),
      Type::Map(k, v) => Some(vec![k.clone(), v.clone()]),
      _ => None,
    }
  }

  /// Construct `Reference<T>`, enforcing invariant (d): `T` must be a
  /// `HeapType`.
  #[must_use]
  pub fn reference(inner: Ty) -> Ty {
    if !inner.is_heap_type() {
      internal_error(format!("Reference<T> requires a HeapType, got {inner:?}"));
    }
    Rc::new(Type::Reference(inner))
  }

  /// Construct `Iterator<T>`, enforcing invariant (e): `T` must be
  /// `Iterable`.
  #[must_use]
  pub fn iterator(inner: Ty) -> Ty {
    if !inner.is_iterable() {
      internal_error(format!("Iterator<T> requires an Iterable type, got {inner:?}"));
    }
    Rc::new(Type::Iterator(inner))
  }

  /// Construct a `Struct`, enforcing invariant (f): field names unique.
  #[must_use]
  pub fn struct_(fields: Vec<StructField>) -> Ty {
    assert_unique_field_names(&fields);
    Rc::new(Type::Struct(fields))
  }

  /// Construct a `Union`, enforcing invariant (f): field names unique.
  #[must_use]
  pub fn union_(fields: Vec<StructField>, anonymous: bool) -> Ty {
    assert_unique_field_names(&fields);
    Rc::new(Type::Union { fields, anonymous })
  }
}

fn assert_unique_field_names(fields: &[StructField]) {
  let mut seen = hashbrown::HashSet::new();
  for f in fields {
    if !seen.insert(f.name.as_str()) {
      internal_error(format!("duplicate field name '{}' in composite type", f.name));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn value_type_implies_no_heap_type() {
    let t = Type::Integer { width: 32, signed: true };
    assert!(t.is_value_type());
    assert!(!t.is_heap_type());
  }

  #[test]
  fn heap_type_implies_garbage_collected() {
    let t = Type::Bytes;
    assert!(t.is_heap_type());
    assert!(t.is_garbage_collected());
  }

  #[test]
  fn reference_requires_heap_type() {
    let bytes = Rc::new(Type::Bytes);
    let _ = Type::reference(bytes);
  }

  #[test]
  #[should_panic(expected = "Reference<T> requires a HeapType")]
  fn reference_rejects_value_type() {
    let int = Rc::new(Type::Integer { width: 32, signed: true });
    let _ = Type::reference(int);
  }

  #[test]
  fn iterator_requires_iterable() {
    let list = Rc::new(Type::List(Rc::new(Type::Bool)));
    let _ = Type::iterator(list);
  }

  #[test]
  #[should_panic(expected = "Iterator<T> requires an Iterable type")]
  fn iterator_rejects_non_iterable() {
    let _ = Type::iterator(Rc::new(Type::Bool));
  }

  #[test]
  fn struct_rejects_duplicate_field_names() {
    let fields = vec![
      StructField { name: "x".into(), ty: Rc::new(Type::Bool) },
      StructField { name: "x".into(), ty: Rc::new(Type::Bool) },
    ];
    let result = std::panic::catch_unwind(|| Type::struct_(fields));
    assert!(result.is_err());
  }

  #[test]
  fn parameterized_equality_ignores_location() {
    use crate::ids::Location;
    let a = Type::Unknown(Id::with_location("Foo", Location { file: Some("a".into()), line: 1, column: 2 }));
    let b = Type::Unknown(Id::new("Foo"));
    assert_eq!(a, b);
  }

  #[test]
  fn type_list_order_for_struct() {
    let fields = vec![
      StructField { name: "a".into(), ty: Rc::new(Type::Bool) },
      StructField { name: "b".into(), ty: Rc::new(Type::Integer { width: 8, signed: false }) },
    ];
    let s = Type::struct_(fields);
    let list = s.type_list().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(*list[0], Type::Bool);
  }
}
