//! Type system & RTTI builder (§4.1, §3.6, §6.3): lowers an IL [`Type`] to
//! a cached runtime-type-information descriptor and to an IL-level storage
//! representation.

use std::rc::Rc;

use hashbrown::HashMap;

use crate::ids::Id;
use crate::support::diag::internal_error;
use crate::types::ty::{Ty, Type};

/// Sentinel terminating a materialized pointer map (§6.3): "typically -1
/// as u16".
pub const PTR_MAP_END: u16 = 0xFFFF;

/// Size, in bytes, of the pointer used for heap-type handles and for the
/// hidden GC header prefixed to a garbage-collected composite's storage.
const PTR_SIZE: u16 = 8;
const GC_HEADER_SIZE: u16 = 8;

/// The IL-level representation of a type's storage (§4.1 `storage_type`).
#[derive(Clone, Debug, PartialEq)]
pub enum StorageType {
  Void,
  /// A scalar of the given bit width (primitives: bool, integers,
  /// doubles, enums/bitsets backed by an integer).
  Scalar { width: u32 },
  /// `{gchdr, bitmask, fields...}` — the representation for a `Struct`.
  NamedRecord { name: String, fields: Vec<(String, StorageType)> },
  /// The representation for a `Tuple`.
  TupleRecord(Vec<StorageType>),
  /// `Reference<U>`: a pointer to `storage_type(U)`.
  Pointer(Box<StorageType>),
  /// Generic `Reference<*>`: an opaque pointer.
  OpaquePointer,
}

/// Auxiliary per-type data referenced from a descriptor (§6.3 `aux`).
#[derive(Clone, Debug, PartialEq)]
pub enum Aux {
  None,
  /// `(field-name, byte-offset)` pairs in declaration order, for
  /// `Struct`.
  Fields(Vec<(String, u16)>),
  /// `(value, label)` pairs, for `Enum`/`Bitset`.
  Labels(Vec<(i64, String)>),
}

/// One entry of an RTTI descriptor's trailing parameter list (§6.3: "then
/// `num_params` of: `rtti* | i64 | i64 | const char*`").
#[derive(Clone, Debug, PartialEq)]
pub enum RttiParam {
  Type(Rc<Descriptor>),
  Int(i64),
  Enum(i64),
  Attribute(String),
}

/// A runtime-type-information descriptor (§3.6, §6.3). Field order matches
/// the binary layout exactly (bit-exact per §6.3); `hilti::codegen::type
/// -builder.cc::llvmRtti` is the grounding for both the field order and
/// the "name falls back to `type.render()`" behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
  pub type_id: u16,
  pub size: u16,
  pub name: String,
  pub num_params: u16,
  pub gc_flag: u16,
  pub aux: Aux,
  /// GC-managed sub-field byte offsets, *without* the terminator —
  /// [`Descriptor::materialized_ptr_map`] appends [`PTR_MAP_END`].
  pub ptr_map: Option<Vec<u16>>,
  pub to_string: Option<String>,
  pub to_int: Option<String>,
  pub to_double: Option<String>,
  pub hash: Option<String>,
  pub equal: Option<String>,
  pub blockable: Option<String>,
  pub dtor: Option<String>,
  pub obj_dtor: Option<String>,
  pub cctor: Option<String>,
  pub params: Vec<RttiParam>,
}

impl Descriptor {
  #[must_use]
  pub fn materialized_ptr_map(&self) -> Vec<u16> {
    let mut v = self.ptr_map.clone().unwrap_or_default();
    v.push(PTR_MAP_END);
    v
  }
}

/// Resolves `Unknown(id)` type references against an enclosing module's
/// declared types (§4.1: "memoized by type identity *after* resolving
/// `Unknown(id)`").
pub trait TypeScope {
  fn resolve_type(&self, id: &Id) -> Option<Ty>;
}

/// Stateless scope for tests and standalone use: resolves nothing.
pub struct EmptyScope;
impl TypeScope for EmptyScope {
  fn resolve_type(&self, _id: &Id) -> Option<Ty> {
    None
  }
}

/// Maps a type AST to a runtime descriptor and an IL storage type,
/// memoizing both by structural type identity (§4.1, §8.1 "RTTI
/// caching").
#[derive(Default)]
pub struct RttiBuilder {
  cache: HashMap<Ty, Rc<Descriptor>>,
  next_type_id: u16,
}

impl RttiBuilder {
  #[must_use]
  pub fn new() -> Self {
    Self { cache: HashMap::new(), next_type_id: 1 }
  }

  fn resolve(&self, ty: &Ty, scope: &dyn TypeScope) -> Ty {
    let mut current = ty.clone();
    loop {
      match &*current {
        Type::Unknown(id) => match scope.resolve_type(id) {
          Some(resolved) => current = resolved,
          None => internal_error(format!("unknown type id '{id}'")),
        },
        _ => return current,
      }
    }
  }

  /// `rtti(T) -> Descriptor` (§4.1). Returns the *same* `Rc` for
  /// structurally-equal types, so pointer identity of the returned
  /// descriptor is observable (§8.1).
  pub fn rtti(&mut self, ty: &Ty, scope: &dyn TypeScope) -> Rc<Descriptor> {
    let resolved = self.resolve(ty, scope);
    if let Some(d) = self.cache.get(&resolved) {
      return d.clone();
    }
    let size = self.size_of_uncached(&resolved, scope);
    let descriptor = self.build_descriptor(&resolved, size, scope);
    if descriptor.size == 0 && resolved.is_value_type() {
      internal_error(format!("missing init value for value type '{}'", descriptor.name));
    }
    let descriptor = Rc::new(descriptor);
    self.cache.insert(resolved, descriptor.clone());
    descriptor
  }

  /// `storage_type(T) -> StorageType` (§4.1).
  #[must_use]
  pub fn storage_type(&mut self, ty: &Ty, scope: &dyn TypeScope) -> StorageType {
    let resolved = self.resolve(ty, scope);
    match &*resolved {
      Type::Void | Type::Unset => StorageType::Void,
      Type::Bool => StorageType::Scalar { width: 1 },
      Type::Integer { width, .. } => StorageType::Scalar { width: *width },
      Type::Double | Type::Time | Type::Interval => StorageType::Scalar { width: 64 },
      Type::Enum(_) | Type::Bitset(_) => StorageType::Scalar { width: 64 },
      Type::Reference(inner) => StorageType::Pointer(Box::new(self.storage_type(inner, scope))),
      Type::Struct(fields) => StorageType::NamedRecord {
        name: "struct".into(),
        fields: {
          let mut out = vec![("__gchdr".to_string(), StorageType::Scalar { width: 0 }), ("__bitmask".to_string(), StorageType::Scalar { width: 64 })];
          out.extend(fields.iter().map(|f| (f.name.clone(), self.storage_type(&f.ty, scope))));
          out
        },
      },
      Type::Tuple { types, .. } => StorageType::TupleRecord(types.iter().map(|t| self.storage_type(t, scope)).collect()),
      _ if resolved.is_heap_type() => StorageType::OpaquePointer,
      _ => StorageType::OpaquePointer,
    }
  }

  /// `pointer_map(T) -> const Table` (§4.1, SPEC_FULL §C.7): offsets of
  /// GC-managed sub-values within a composite value type, computed by
  /// walking the type's ordered `TypeList` elements and accumulating
  /// sizes the way a null-based record projection (`offsetof`) would.
  fn pointer_map(&mut self, ty: &Ty, scope: &dyn TypeScope) -> Vec<u16> {
    let elems = ty.type_list().unwrap_or_else(|| internal_error("pointer_map requires a TypeList type"));
    let mut offsets = Vec::new();
    let mut offset: u16 = if ty.is_garbage_collected() { GC_HEADER_SIZE } else { 0 };
    for elem in elems {
      if elem.is_garbage_collected() {
        offsets.push(offset);
      }
      offset += self.size_of_uncached(&elem, scope);
    }
    offsets
  }

  fn size_of_uncached(&mut self, ty: &Ty, scope: &dyn TypeScope) -> u16 {
    match &**ty {
      Type::Void | Type::Unset | Type::Label | Type::Block | Type::Module | Type::Any | Type::Unknown(_) => 0,
      Type::Bool => 1,
      Type::Integer { width, .. } => u16::try_from(width.div_ceil(8)).unwrap_or(u16::MAX),
      Type::Double | Type::Time | Type::Interval => 8,
      Type::Address => 16,
      Type::Network => 17,
      Type::Port => 4,
      Type::CAddr => PTR_SIZE,
      Type::Bitset(_) | Type::Enum(_) => 8,
      Type::Tuple { types, .. } => types.iter().map(|t| self.size_of_uncached(t, scope)).sum(),
      Type::Struct(fields) | Type::Overlay(fields) => fields.iter().map(|f| self.size_of_uncached(&f.ty, scope)).sum(),
      Type::Union { fields, .. } => fields.iter().map(|f| self.size_of_uncached(&f.ty, scope)).max().unwrap_or(0),
      Type::Reference(_) | Type::Iterator(_) => PTR_SIZE,
      Type::TypeType(_) => PTR_SIZE,
      Type::String | Type::HiltiFunction(_) | Type::Hook(_) => PTR_SIZE,
      _ if ty.is_heap_type() => PTR_SIZE,
      _ => 0,
    }
  }

  fn next_id(&mut self) -> u16 {
    let id = self.next_type_id;
    self.next_type_id += 1;
    id
  }

  fn build_descriptor(&mut self, ty: &Ty, size: u16, scope: &dyn TypeScope) -> Descriptor {
    let gc_flag = u16::from(ty.is_garbage_collected());
    let type_id = self.next_id();
    let name = render_type_name(ty);

    let (aux, ptr_map, params) = match &**ty {
      Type::Struct(fields) | Type::Overlay(fields) => {
        let mut offset = 0u16;
        let mut aux_fields = Vec::with_capacity(fields.len());
        for f in fields {
          aux_fields.push((f.name.clone(), offset));
          offset += self.size_of_uncached(&f.ty, scope);
        }
        let ptr_map = self.pointer_map(ty, scope);
        (Aux::Fields(aux_fields), Some(ptr_map), vec![])
      }
      Type::Enum(labels) | Type::Bitset(labels) => (Aux::Labels(labels.clone()), None, vec![]),
      Type::Tuple { types, .. } => {
        let ptr_map = self.pointer_map(ty, scope);
        let params = types.iter().map(|t| RttiParam::Type(self.rtti(t, scope))).collect();
        (Aux::None, Some(ptr_map), params)
      }
      Type::Reference(inner) | Type::Iterator(inner) | Type::Channel(inner) | Type::Set(inner) | Type::List(inner) | Type::Vector(inner) => {
        (Aux::None, None, vec![RttiParam::Type(self.rtti(inner, scope))])
      }
      Type::Map(k, v) => (Aux::None, None, vec![RttiParam::Type(self.rtti(k, scope)), RttiParam::Type(self.rtti(v, scope))]),
      _ => (Aux::None, None, vec![]),
    };

    let (dtor, cctor, obj_dtor) = if ty.is_garbage_collected() {
      (Some("__hlt_object_unref".to_string()), Some("__hlt_object_ref".to_string()), Some("__hlt_object_dtor".to_string()))
    } else if let Type::Tuple { .. } = &**ty {
      // Per-type helper synthesis (§4.1): tuple dtor/cctor invoke
      // element-wise helpers for non-atomic elements, falling back to
      // the generic wildcard helper.
      (Some(format!("__tuple_dtor_{type_id}")), Some(format!("__tuple_cctor_{type_id}")), None)
    } else {
      (None, None, None)
    };

    let num_params = u16::try_from(params.len()).unwrap_or(u16::MAX);

    Descriptor {
      type_id,
      size,
      name,
      num_params,
      gc_flag,
      aux,
      ptr_map,
      to_string: Some("__hlt_to_string".into()),
      to_int: (ty.traits().contains(crate::types::ty::TypeTraits::ATOMIC)).then(|| "__hlt_to_int64".to_string()),
      to_double: None,
      hash: (ty.traits().contains(crate::types::ty::TypeTraits::HASHABLE)).then(|| "__hlt_hash".to_string()),
      equal: Some("__hlt_equal".into()),
      blockable: (ty.traits().contains(crate::types::ty::TypeTraits::BLOCKABLE)).then(|| "__hlt_blockable".to_string()),
      dtor,
      obj_dtor,
      cctor,
      params,
    }
  }
}

fn render_type_name(ty: &Ty) -> String {
  match &**ty {
    Type::Void => "void".into(),
    Type::Bool => "bool".into(),
    Type::Integer { width, signed } => format!("{}{width}", if *signed { "int" } else { "uint" }),
    Type::Bytes => "bytes".into(),
    Type::String => "string".into(),
    Type::Struct(_) => "struct".into(),
    Type::Tuple { .. } => "tuple".into(),
    Type::List(_) => "list".into(),
    Type::Vector(_) => "vector".into(),
    Type::Set(_) => "set".into(),
    Type::Map(_, _) => "map".into(),
    Type::Reference(_) => "ref".into(),
    _ => format!("{ty:?}"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty::StructField;

  #[test]
  fn rtti_caching_returns_same_pointer() {
    let mut b = RttiBuilder::new();
    let t1: Ty = Rc::new(Type::Integer { width: 32, signed: true });
    let t2: Ty = Rc::new(Type::Integer { width: 32, signed: true });
    let d1 = b.rtti(&t1, &EmptyScope);
    let d2 = b.rtti(&t2, &EmptyScope);
    assert!(Rc::ptr_eq(&d1, &d2));
  }

  #[test]
  fn distinct_types_get_distinct_descriptors() {
    let mut b = RttiBuilder::new();
    let t1: Ty = Rc::new(Type::Integer { width: 32, signed: true });
    let t2: Ty = Rc::new(Type::Integer { width: 16, signed: true });
    let d1 = b.rtti(&t1, &EmptyScope);
    let d2 = b.rtti(&t2, &EmptyScope);
    assert_ne!(d1.type_id, d2.type_id);
    assert_ne!(d1.size, d2.size);
  }

  #[test]
  fn pointer_map_well_formed_for_mixed_tuple() {
    let mut b = RttiBuilder::new();
    let ty: Ty = Rc::new(Type::Tuple {
      names: None,
      types: vec![Rc::new(Type::Bytes), Rc::new(Type::Bool), Rc::new(Type::List(Rc::new(Type::Bool)))],
    });
    let d = b.rtti(&ty, &EmptyScope);
    let map = d.materialized_ptr_map();
    // 2 GC-managed elements (Bytes, List<Bool>) + terminator.
    assert_eq!(map.len(), 3);
    assert_eq!(*map.last().unwrap(), PTR_MAP_END);
    for &off in &map[..map.len() - 1] {
      assert!(u32::from(off) < u32::from(d.size));
    }
  }

  #[test]
  fn struct_aux_has_field_offsets_in_order() {
    let mut b = RttiBuilder::new();
    let ty = Type::struct_(vec![
      StructField { name: "a".into(), ty: Rc::new(Type::Bool) },
      StructField { name: "b".into(), ty: Rc::new(Type::Integer { width: 32, signed: false }) },
    ]);
    let d = b.rtti(&ty, &EmptyScope);
    match &d.aux {
      Aux::Fields(fields) => {
        assert_eq!(fields[0], ("a".to_string(), 0));
        assert_eq!(fields[1], ("b".to_string(), 1));
      }
      _ => panic!("expected Aux::Fields"),
    }
  }

  #[test]
  #[should_panic(expected = "unknown type id")]
  fn unresolved_unknown_type_errors() {
    let mut b = RttiBuilder::new();
    let ty: Ty = Rc::new(Type::Unknown(Id::new("Foo")));
    b.rtti(&ty, &EmptyScope);
  }

  #[test]
  fn unknown_resolves_through_scope() {
    struct Scope;
    impl TypeScope for Scope {
      fn resolve_type(&self, id: &Id) -> Option<Ty> {
        (id.local() == "Foo").then(|| Rc::new(Type::Bool))
      }
    }
    let mut b = RttiBuilder::new();
    let ty: Ty = Rc::new(Type::Unknown(Id::new("Foo")));
    let d = b.rtti(&ty, &Scope);
    assert_eq!(d.name, "bool");
  }
}
