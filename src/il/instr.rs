//! IL instructions and operands (§3.5). This is a deliberately small subset
//! of what a full HILTI-like IL would carry — just enough to express what
//! the composer (§4.3) and module builder (§4.2) need to emit.

use crate::ids::Id;

/// A value an instruction reads or writes: either a declared name or an
/// inline constant. Constants are folded in by the composer for literal
/// productions (§4.3.4 `Literal`).
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
  Id(Id),
  IntConst(i64),
  BoolConst(bool),
  BytesConst(Vec<u8>),
  StringConst(String),
  /// The receiver object passed into a host/internal compose function
  /// (§4.3.2's `self`).
  Self_,
  None,
}

impl Operand {
  #[must_use]
  pub fn id(name: &str) -> Self {
    Operand::Id(Id::new(name))
  }
}

/// Binary pack/unpack formats (§6.2), mirroring `Hilti::Packed::Int*`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackFormat {
  Int8,
  Int16Big,
  Int16Little,
  Int32Big,
  Int32Little,
  Int64Big,
  Int64Little,
  UInt8,
  UInt16Big,
  UInt16Little,
  UInt32Big,
  UInt32Little,
  UInt64Big,
  UInt64Little,
  Double,
  /// A fixed-length byte run, used for `Bytes` fields with a static
  /// `&length` attribute.
  BytesFixed(u64),
  /// A length-prefixed or delimiter-terminated byte run is out of scope
  /// here (host-side I/O concern); this crate only ever composes
  /// already-materialized byte values (§6.1 boundary).
}

impl PackFormat {
  /// The integer pack format selected by width/signedness/byteorder
  /// (§4.3.6's 3-way table).
  #[must_use]
  pub fn for_integer(width: u32, signed: bool, big_endian: bool) -> Self {
    use PackFormat::{Int8, Int16Big, Int16Little, Int32Big, Int32Little, Int64Big, Int64Little, UInt8, UInt16Big, UInt16Little, UInt32Big, UInt32Little, UInt64Big, UInt64Little};
    match (width, signed, big_endian) {
      (8, true, _) => Int8,
      (8, false, _) => UInt8,
      (16, true, true) => Int16Big,
      (16, true, false) => Int16Little,
      (16, false, true) => UInt16Big,
      (16, false, false) => UInt16Little,
      (32, true, true) => Int32Big,
      (32, true, false) => Int32Little,
      (32, false, true) => UInt32Big,
      (32, false, false) => UInt32Little,
      (_, true, true) => Int64Big,
      (_, true, false) => Int64Little,
      (_, false, true) => UInt64Big,
      (_, false, false) => UInt64Little,
    }
  }
}

/// One IL instruction. Variant coverage follows what `composer.cc` actually
/// emits: comments/debug messages, control flow, calls, the container
/// iteration protocol (`Begin`/`End`/`Incr`/`Deref`/`Equal`), pack/unpack,
/// and the small set of value operations (tuple index, struct field
/// access, bitfield `Or`) the per-type compose table needs.
#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
  /// A trace comment naming the production being composed (SPEC_FULL
  /// §C.4), gated behind `CompilerOptions.debug > 0`.
  Comment(String),
  DebugMsg { stream: String, message: String, args: Vec<Operand> },
  DebugPushIndent,
  DebugPopIndent,
  Jump(Id),
  IfElse { cond: Operand, then_block: Id, else_block: Id },
  Switch { expr: Operand, cases: Vec<(Operand, Id)>, default: Id },
  CallVoid { callee: Id, args: Vec<Operand> },
  Call { dst: Operand, callee: Id, args: Vec<Operand> },
  /// A runtime compose error (§7 tier 3): data the generated code throws,
  /// not a Rust-level error.
  Throw(Operand),
  Return(Option<Operand>),
  Pack { dst: Operand, value: Operand, format: PackFormat },
  TupleIndex { dst: Operand, tuple: Operand, index: u32 },
  StructGet { dst: Operand, obj: Operand, field: String },
  StructSet { obj: Operand, field: String, value: Operand },
  Equal { dst: Operand, lhs: Operand, rhs: Operand },
  /// `i = i + 1` over an iterator or counter (§4.3.5's loop protocol).
  Incr { dst: Operand, value: Operand },
  Deref { dst: Operand, value: Operand },
  Begin { dst: Operand, container: Operand },
  End { dst: Operand, container: Operand },
  /// Bitwise-or of a shifted field value into a packed bitfield byte
  /// buffer (§4.3.6 `Bitfield`).
  Or { dst: Operand, lhs: Operand, rhs: Operand },
  Assign { dst: Operand, value: Operand },
}
