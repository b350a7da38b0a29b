//! The data model (§3): types, productions, and units.

pub mod production;
pub mod ty;
pub mod unit;

pub use production::{LiteralValue, PgMeta, Prod, Production, ProductionKind, SwitchCase};
pub use ty::{FunctionSig, StructField, Ty, Type, TypeTraits};
pub use unit::{Field, FieldId, HookEvent, HookMeta, Unit, UnitHook};
