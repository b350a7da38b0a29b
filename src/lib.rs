//! `binpac_il`: the grammar-to-IL compiler core of a binary protocol
//! parser generator.
//!
//! A [`Program`] collects the units and named types a grammar declares;
//! [`Driver::compile`] wires the pipeline together the way §2 describes
//! it: register every unit's value type with the RTTI builder, then emit
//! one composing host function per unit into a single IL module.

pub mod ast;
pub mod builder;
pub mod compose;
pub mod ids;
pub mod il;
pub mod rtti;
pub mod support;
pub mod types;

use hashbrown::HashMap;

use crate::builder::ModuleBuilder;
use crate::compose::{Composer, UnitScope};
use crate::ids::Id;
use crate::il::Module;
use crate::rtti::{RttiBuilder, TypeScope};
use crate::support::options::CompilerOptions;
use crate::types::ty::Ty;
use crate::types::unit::Unit;

/// The set of units and named types compiled together. Units resolve
/// `ChildGrammar` references and named types resolve `Unknown` references
/// against this shared scope rather than against each other directly
/// (Design Notes §9).
#[derive(Default)]
pub struct Program {
  units: HashMap<Id, Unit>,
  named_types: HashMap<Id, Ty>,
}

impl Program {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_unit(&mut self, unit: Unit) {
    self.units.insert(unit.id.clone(), unit);
  }

  pub fn add_named_type(&mut self, id: Id, ty: Ty) {
    self.named_types.insert(id, ty);
  }

  #[must_use]
  pub fn units(&self) -> impl Iterator<Item = &Unit> {
    self.units.values()
  }
}

impl UnitScope for Program {
  fn unit(&self, id: &Id) -> Option<&Unit> {
    self.units.get(id)
  }
}

impl TypeScope for Program {
  fn resolve_type(&self, id: &Id) -> Option<Ty> {
    self.named_types.get(id).cloned()
  }
}

/// Drives the pipeline end to end (§2).
pub struct Driver {
  options: CompilerOptions,
  rtti: RttiBuilder,
}

impl Driver {
  #[must_use]
  pub fn new(options: CompilerOptions) -> Self {
    Self { options, rtti: RttiBuilder::new() }
  }

  #[must_use]
  pub fn options(&self) -> &CompilerOptions {
    &self.options
  }

  /// Compiles every unit in `program` into one IL [`Module`] named
  /// `module_id`. Returns `None` if the module builder's diagnostics
  /// accumulated any user errors (§4.2 Finalization).
  pub fn compile(&mut self, module_id: Id, program: &Program) -> Option<Module> {
    let mut builder = ModuleBuilder::new(module_id);
    builder.import_module(Id::new("binpac-rt"));

    for unit in program.units() {
      tracing::debug!(target: "binpac_il::driver", unit = %unit.id, "registering RTTI");
      self.rtti.rtti(&unit.value_type(), program);
    }

    let mut composer = Composer::new(program, program, &self.options);
    for unit in program.units() {
      let fn_id = composer.create_host_function(&mut builder, unit);
      builder.export_id(fn_id);
    }

    builder.finalize()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::rc::Rc;

  use crate::support::attrs::Attributes;
  use crate::types::production::{PgMeta, Production, ProductionKind};
  use crate::types::ty::Type;
  use crate::types::unit::Field;

  #[test]
  fn compiles_a_single_unit_program() {
    let ty = Rc::new(Type::Integer { width: 16, signed: false });
    let production = Production::new(ProductionKind::Variable(ty.clone()), PgMeta::new("port", true).with_field(0));
    let field = Field { name: Some("port".into()), ty, production, attributes: Attributes::new(), condition: None, for_composing: true };
    let grammar = Production::new(ProductionKind::Variable(Rc::new(Type::Integer { width: 16, signed: false })), PgMeta::new("port", true).with_field(0));
    let unit = Unit { id: Id::new("Header"), fields: vec![field], condition: None, for_composing: true, hooks: vec![], grammar };

    let mut program = Program::new();
    program.add_unit(unit);

    let mut driver = Driver::new(CompilerOptions::default());
    let module = driver.compile(Id::new("test_mod"), &program).expect("compiles without diagnostics");
    assert!(module.function(&Id::new("compose_Header")).is_some());
    assert_eq!(module.exported_ids.len(), 1);
  }
}
