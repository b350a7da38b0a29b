//! The composer (§4.3): walks a unit's grammar and emits IL that serializes
//! a live unit instance back out to bytes.
//!
//! Grounded directly on `binpac/codegen/composer.cc`: a small piece of
//! state (`ComposerState` — which unit, which `self`, which output
//! function, which cookie) threaded through a recursive descent over
//! productions, with nested units handled by cloning that state rather
//! than rebuilding it (SPEC_FULL §C.1).

use std::collections::HashSet;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::builder::ModuleBuilder;
use crate::ids::Id;
use crate::il::{Declaration, FunctionKind, Instr, Operand, PackFormat};
use crate::rtti::TypeScope;
use crate::support::attrs::Expr;
use crate::support::diag::internal_error;
use crate::support::options::CompilerOptions;
use crate::types::production::{LiteralValue, Prod, ProductionKind};
use crate::types::ty::{Ty, Type};
use crate::types::unit::{Field, HookEvent, Unit};

/// The composer's threaded state (§4.3.1). Pushing a state for a nested
/// unit clones the current one and only overwrites `unit`/`self_expr`
/// (SPEC_FULL §C.1) — `output_fn`/`cookie` are inherited unchanged so a
/// deeply nested child unit still delivers bytes to the same original
/// sink.
#[derive(Clone, Debug)]
pub struct ComposerState {
  pub unit: Id,
  pub self_expr: Operand,
  pub output_fn: Operand,
  pub cookie: Operand,
}

impl ComposerState {
  #[must_use]
  pub fn clone_with(&self, unit: Id, self_expr: Operand) -> Self {
    Self { unit, self_expr, output_fn: self.output_fn.clone(), cookie: self.cookie.clone() }
  }
}

/// A registry composer uses to resolve `ChildGrammar(id)` references and
/// field types without requiring `Rc<Unit>` cycles (Design Notes §9).
pub trait UnitScope {
  fn unit(&self, id: &Id) -> Option<&Unit>;
}

impl UnitScope for HashMap<Id, Unit> {
  fn unit(&self, id: &Id) -> Option<&Unit> {
    self.get(id)
  }
}

/// Walks grammars and emits composing IL (§4.3).
pub struct Composer<'a> {
  units: &'a dyn UnitScope,
  type_scope: &'a dyn TypeScope,
  options: &'a CompilerOptions,
  state_stack: Vec<ComposerState>,
  /// Production symbols already wrapped in a memoized `__compose_<unit>_
  /// <symbol>` function, so at most one such function is emitted per
  /// production (§8.1 "memoization").
  memoized: HashSet<(String, String)>,
}

impl<'a> Composer<'a> {
  #[must_use]
  pub fn new(units: &'a dyn UnitScope, type_scope: &'a dyn TypeScope, options: &'a CompilerOptions) -> Self {
    Self { units, type_scope, options, state_stack: Vec::new(), memoized: HashSet::new() }
  }

  fn state(&self) -> &ComposerState {
    self.state_stack.last().unwrap_or_else(|| internal_error("composer: no state pushed"))
  }

  fn push_state(&mut self, state: ComposerState) {
    self.state_stack.push(state);
  }

  fn pop_state(&mut self) -> ComposerState {
    self.state_stack.pop().unwrap_or_else(|| internal_error("composer: unbalanced state stack"))
  }

  /// `create_host_function` (§4.3.2): the externally-callable entry point
  /// for composing one unit — `compose(obj, out, cookie)`.
  pub fn create_host_function(&mut self, builder: &mut ModuleBuilder, unit: &Unit) -> Id {
    let obj_ty = Type::reference(Rc::new(Type::Context));
    let out_ty: Ty = Rc::new(Type::Callable);
    let cookie_ty: Ty = Rc::new(Type::CAddr);

    let fn_id = Id::new(&format!("compose_{}", unit.id.local()));
    builder.push_function(
      fn_id.clone(),
      vec![
        Declaration { id: Id::new("obj"), ty: obj_ty, is_const: false },
        Declaration { id: Id::new("out"), ty: out_ty, is_const: false },
        Declaration { id: Id::new("cookie"), ty: cookie_ty, is_const: false },
      ],
      Rc::new(Type::Void),
      FunctionKind::Function,
      false,
    );

    self.push_state(ComposerState {
      unit: unit.id.clone(),
      self_expr: Operand::id("obj"),
      output_fn: Operand::id("out"),
      cookie: Operand::id("cookie"),
    });

    self.run_hooks(builder, unit, HookEvent::Init);
    self.compose_production(builder, unit, &unit.grammar);
    self.run_hooks(builder, unit, HookEvent::Done);

    self.pop_state();
    builder.emit(Instr::Return(None));
    builder.pop_function();
    fn_id
  }

  /// `create_internal_function` (§4.3.3 step 5): the memoized
  /// `__compose_<unit>_<symbol>` wrapper a non-atomic production is
  /// lowered into, reusing the enclosing function's `ComposerState`.
  fn create_internal_function(&mut self, builder: &mut ModuleBuilder, unit: &Unit, prod: &Prod) -> Id {
    let key = (unit.id.to_string(), prod.symbol().to_string());
    let fn_id = Id::new(&format!("__compose_{}_{}", unit.id.local(), prod.symbol()));
    if self.memoized.contains(&key) {
      return fn_id;
    }
    self.memoized.insert(key);

    // Every memoized wrapper shares the host function's 3-parameter
    // shape, rebinding the composer state to its own parameters rather
    // than inheriting the caller's operand names — the caller instead
    // forwards its current `self`/`out`/`cookie` as call arguments
    // (see `compose_production_body`).
    let obj_ty = Type::reference(Rc::new(Type::Context));
    builder.push_function(
      fn_id.clone(),
      vec![
        Declaration { id: Id::new("self"), ty: obj_ty, is_const: false },
        Declaration { id: Id::new("out"), ty: Rc::new(Type::Callable), is_const: false },
        Declaration { id: Id::new("cookie"), ty: Rc::new(Type::CAddr), is_const: false },
      ],
      Rc::new(Type::Void),
      FunctionKind::Function,
      false,
    );
    self.push_state(ComposerState { unit: unit.id.clone(), self_expr: Operand::id("self"), output_fn: Operand::id("out"), cookie: Operand::id("cookie") });
    self.dispatch(builder, unit, prod);
    self.pop_state();
    builder.emit(Instr::Return(None));
    builder.pop_function();
    fn_id
  }

  /// The per-production entry point (§4.3.3): skip-if-not-for-composing,
  /// condition wrapping, field hooks, dispatch, and memoized-wrapper
  /// promotion for non-atomic productions.
  fn compose_production(&mut self, builder: &mut ModuleBuilder, unit: &Unit, prod: &Prod) {
    let field = prod.field().map(|id| unit.field(id));
    if let Some(f) = field {
      if !f.for_composing {
        return;
      }
    }

    if let Some(f) = field {
      if let Some(cond) = &f.condition {
        self.emit_conditional(builder, cond, |composer, builder| composer.compose_production_body(builder, unit, prod, field));
        return;
      }
    }
    self.compose_production_body(builder, unit, prod, field);
  }

  fn compose_production_body(&mut self, builder: &mut ModuleBuilder, unit: &Unit, prod: &Prod, field: Option<&Field>) {
    if let Some(f) = field {
      self.run_field_hooks(builder, unit, f);
    }

    if self.options.debug.is_enabled() {
      builder.emit(Instr::Comment(format!("composing {}", prod.symbol())));
    }

    if prod.atomic() {
      self.dispatch(builder, unit, prod);
    } else {
      let wrapper = self.create_internal_function(builder, unit, prod);
      let state = self.state().clone();
      builder.emit(Instr::CallVoid { callee: wrapper, args: vec![state.self_expr, state.output_fn, state.cookie] });
    }
  }

  fn emit_conditional(&mut self, builder: &mut ModuleBuilder, cond: &Expr, body: impl FnOnce(&mut Self, &mut ModuleBuilder)) {
    let cond_operand = expr_operand(cond);
    let done_label = builder.new_builder(None);
    let then_label = builder.push_builder(None);
    body(self, builder);
    builder.emit(Instr::Jump(done_label.clone()));
    builder.pop_builder(&then_label);

    builder.emit(Instr::IfElse { cond: cond_operand, then_block: then_label, else_block: done_label.clone() });
    builder.push_builder(Some(&done_label.to_string()));
  }

  /// The per-production-kind lowering table (§4.3.4).
  fn dispatch(&mut self, builder: &mut ModuleBuilder, unit: &Unit, prod: &Prod) {
    match &prod.kind {
      ProductionKind::Epsilon => {}
      ProductionKind::Literal(value) => self.compose_literal(builder, unit, prod, value),
      ProductionKind::Variable(ty) => self.compose_variable(builder, unit, prod, ty),
      ProductionKind::Sequence(parts) => {
        for part in parts {
          self.compose_production(builder, unit, part);
        }
      }
      ProductionKind::Switch { expr, cases, default } => self.compose_switch(builder, unit, expr, cases, default.as_ref()),
      ProductionKind::Counter { count, body } => self.compose_counter(builder, unit, prod, count, body),
      ProductionKind::ChildGrammar(child_id) => self.compose_child_grammar(builder, unit, prod, child_id),
      ProductionKind::Enclosure(inner) => self.compose_production(builder, unit, inner),
      ProductionKind::Loop { body, until: _ } => self.compose_loop(builder, unit, prod, body),
      ProductionKind::Boolean { .. } | ProductionKind::LookAhead(_) | ProductionKind::ByteBlock => {
        internal_error(format!("compose for production kind of '{}' is not implemented", prod.symbol()))
      }
    }
  }

  fn compose_literal(&mut self, builder: &mut ModuleBuilder, unit: &Unit, prod: &Prod, value: &LiteralValue) {
    let field = prod.field().map(|id| unit.field(id));
    let operand = match value {
      LiteralValue::Bytes(b) => Operand::BytesConst(b.clone()),
      LiteralValue::Int(i) => Operand::IntConst(*i),
      LiteralValue::Regex(_) => internal_error("compose for a RegExp literal is not implemented"),
    };
    self.deliver(builder, field, operand);
  }

  fn compose_variable(&mut self, builder: &mut ModuleBuilder, unit: &Unit, prod: &Prod, ty: &Ty) {
    let Some(field_id) = prod.field() else {
      internal_error(format!("Variable production '{}' has no anchor field", prod.symbol()));
    };
    let field = unit.field(field_id);
    let value_tmp = builder.add_tmp(prod.symbol(), ty.clone());
    builder.emit(Instr::StructGet { dst: Operand::Id(value_tmp.clone()), obj: self.state().self_expr.clone(), field: field.name.clone().unwrap_or_default() });
    self.compose_value(builder, field, ty, Operand::Id(value_tmp));
  }

  /// Resolves `Unknown(id)` references against the composer's type scope
  /// before dispatching on shape — a field or tuple element may still be
  /// an as-yet-unresolved named type when its unit was declared (§4.1).
  fn resolve_ty(&self, ty: &Ty) -> Ty {
    let mut current = ty.clone();
    while let Type::Unknown(id) = &*current {
      current = self.type_scope.resolve_type(id).unwrap_or_else(|| internal_error(format!("unknown type id '{id}'")));
    }
    current
  }

  /// Per-type compose semantics (§4.3.6). Scalars are packed through
  /// `&byteorder` (falling back to the unit's own, then big-endian);
  /// `Bytes`/`String` are delivered as-is; composites recurse over their
  /// `TypeList` elements.
  fn compose_value(&mut self, builder: &mut ModuleBuilder, field: &Field, ty: &Ty, value: Operand) {
    let ty = &self.resolve_ty(ty);
    match &**ty {
      Type::Bool | Type::Integer { .. } | Type::Port | Type::Time | Type::Interval => {
        let format = self.pack_format_for(field, ty);
        let packed = builder.add_tmp(&format!("{}_packed", field.name.clone().unwrap_or_default()), Rc::new(Type::Bytes));
        builder.emit(Instr::Pack { dst: Operand::Id(packed.clone()), value, format });
        self.deliver(builder, Some(field), Operand::Id(packed));
      }
      Type::Bytes | Type::String => self.deliver(builder, Some(field), value),
      Type::Bitset(_) | Type::Enum(_) => {
        let packed = builder.add_tmp(&format!("{}_packed", field.name.clone().unwrap_or_default()), Rc::new(Type::Bytes));
        builder.emit(Instr::Pack { dst: Operand::Id(packed.clone()), value, format: PackFormat::UInt64Big });
        self.deliver(builder, Some(field), Operand::Id(packed));
      }
      Type::Tuple { types, .. } => {
        for (i, elem_ty) in types.iter().enumerate() {
          let elem_tmp = builder.add_tmp(&format!("{}_{i}", field.name.clone().unwrap_or_default()), elem_ty.clone());
          builder.emit(Instr::TupleIndex { dst: Operand::Id(elem_tmp.clone()), tuple: value.clone(), index: u32::try_from(i).unwrap_or(u32::MAX) });
          self.compose_value(builder, field, elem_ty, Operand::Id(elem_tmp));
        }
      }
      Type::Struct(fields) | Type::Overlay(fields) => {
        for f in fields {
          let sub = builder.add_tmp(&f.name, f.ty.clone());
          builder.emit(Instr::StructGet { dst: Operand::Id(sub.clone()), obj: value.clone(), field: f.name.clone() });
          self.compose_value(builder, field, &f.ty, Operand::Id(sub));
        }
      }
      _ => internal_error(format!("compose for type '{ty:?}' is not implemented")),
    }
  }

  fn pack_format_for(&self, field: &Field, ty: &Ty) -> PackFormat {
    let big_endian = match field.inherited_attr("byteorder", std::iter::empty()) {
      Some(Expr::Ident(name)) => !name.eq_ignore_ascii_case("little"),
      _ => true,
    };
    match &**ty {
      Type::Bool => PackFormat::UInt8,
      Type::Integer { width, signed } => PackFormat::for_integer(*width, *signed, big_endian),
      Type::Port => PackFormat::UInt16Big,
      Type::Time | Type::Interval => PackFormat::Double,
      _ => PackFormat::UInt64Big,
    }
  }

  fn compose_switch(&mut self, builder: &mut ModuleBuilder, unit: &Unit, expr: &Expr, cases: &[crate::types::production::SwitchCase], default: Option<&Prod>) {
    let expr_tmp = builder.add_tmp("switch_expr", Rc::new(Type::Integer { width: 64, signed: true }));
    builder.emit(Instr::Assign { dst: Operand::Id(expr_tmp.clone()), value: expr_operand(expr) });

    let done_label = builder.new_builder(None);
    let mut arms = Vec::new();
    for case in cases {
      let case_label = builder.push_builder(None);
      self.compose_production(builder, unit, &case.body);
      builder.emit(Instr::Jump(done_label.clone()));
      builder.pop_builder(&case_label);
      for value in &case.values {
        arms.push((expr_operand(value), case_label.clone()));
      }
    }
    let default_label = if let Some(default_prod) = default {
      let label = builder.push_builder(None);
      self.compose_production(builder, unit, default_prod);
      builder.emit(Instr::Jump(done_label.clone()));
      builder.pop_builder(&label);
      label
    } else {
      // No `default` arm: a value that matches none of `cases` is a
      // compose-time failure, not a silent no-op (§8.3 S4).
      let label = builder.push_builder(None);
      self.compose_error(builder, "no matching switch case");
      builder.pop_builder(&label);
      label
    };

    builder.emit(Instr::Switch { expr: Operand::Id(expr_tmp), cases: arms, default: default_label });
    builder.push_builder(Some(&done_label.to_string()));
  }

  /// Resolves the anchor field of a `Loop`/`Counter` production and its
  /// container/element types together, since both productions share the
  /// same container-iteration setup (§4.3.4, §4.3.5).
  fn container_field<'u>(&self, unit: &'u Unit, prod: &Prod) -> (&'u Field, Ty, Ty) {
    let Some(field_id) = prod.field() else {
      internal_error(format!("'{}' has no anchor field", prod.symbol()));
    };
    let field = unit.field(field_id);
    let (elem_ty, iter_ty) = field.ty.iterable_parts().unwrap_or_else(|| internal_error(format!("field '{}' is not iterable", field.name.clone().unwrap_or_default())));
    (field, elem_ty, iter_ty)
  }

  /// Composes one container element: recurses through `body`'s own
  /// production shape with `value` bound as the element being composed,
  /// rather than reinterpreting the container's static element type
  /// directly (§4.3.5 step 2, "recursively compose elem against the
  /// container element's production body").
  fn compose_container_element(&mut self, builder: &mut ModuleBuilder, field: &Field, body: &Prod, value: Operand) {
    match &body.kind {
      ProductionKind::Variable(ty) => self.compose_value(builder, field, ty, value),
      ProductionKind::ChildGrammar(child_id) => {
        let child = self.units.unit(child_id).unwrap_or_else(|| internal_error(format!("unknown child unit '{child_id}'")));
        if self.options.debug.is_enabled() {
          builder.emit(Instr::DebugPushIndent);
        }
        let child_state = self.state().clone_with(child.id.clone(), value);
        self.push_state(child_state);
        self.run_hooks(builder, child, HookEvent::Init);
        self.compose_production(builder, child, &child.grammar);
        self.run_hooks(builder, child, HookEvent::Done);
        self.pop_state();
        if self.options.debug.is_enabled() {
          builder.emit(Instr::DebugPopIndent);
        }
      }
      _ => internal_error(format!("composing a container element of production kind '{}' is not implemented", body.symbol())),
    }
  }

  /// `Counter` (§3.3, §4.3.4): iterates the anchor field's container
  /// value the same way `Loop` does (§4.3.5), bounded by the fixed
  /// `count` expression rather than `begin == end`.
  fn compose_counter(&mut self, builder: &mut ModuleBuilder, unit: &Unit, prod: &Prod, count: &Expr, body: &Prod) {
    let (field, elem_ty, _iter_ty) = self.container_field(unit, prod);
    let field_name = field.name.clone().unwrap_or_default();

    let container = builder.add_tmp(&format!("{field_name}_container"), field.ty.clone());
    builder.emit(Instr::StructGet { dst: Operand::Id(container.clone()), obj: self.state().self_expr.clone(), field: field_name.clone() });
    let iter = builder.add_tmp("iter", Type::iterator(field.ty.clone()));
    builder.emit(Instr::Begin { dst: Operand::Id(iter.clone()), container: Operand::Id(container) });

    let counter = builder.add_tmp("counter", Rc::new(Type::Integer { width: 64, signed: false }));
    builder.emit(Instr::Assign { dst: Operand::Id(counter.clone()), value: Operand::IntConst(0) });
    let limit = builder.add_tmp("counter_limit", Rc::new(Type::Integer { width: 64, signed: false }));
    builder.emit(Instr::Assign { dst: Operand::Id(limit.clone()), value: expr_operand(count) });

    let loop_label = builder.new_builder(Some(&format!("{field_name}_counter_loop")));
    builder.emit(Instr::Jump(loop_label.clone()));
    builder.push_builder(Some(&loop_label.to_string()));
    let cmp = builder.add_tmp("counter_done", Rc::new(Type::Bool));
    builder.emit(Instr::Equal { dst: Operand::Id(cmp.clone()), lhs: Operand::Id(counter.clone()), rhs: Operand::Id(limit) });
    let done_label = builder.new_builder(None);
    let body_label = builder.new_builder(None);
    builder.emit(Instr::IfElse { cond: Operand::Id(cmp), then_block: done_label.clone(), else_block: body_label.clone() });
    builder.pop_builder(&loop_label);

    builder.push_builder(Some(&body_label.to_string()));
    let elem = builder.add_tmp("elem", elem_ty.clone());
    builder.emit(Instr::Deref { dst: Operand::Id(elem.clone()), value: Operand::Id(iter.clone()) });
    self.compose_container_element(builder, field, body, Operand::Id(elem));
    builder.emit(Instr::Incr { dst: Operand::Id(iter.clone()), value: Operand::Id(iter) });
    builder.emit(Instr::Incr { dst: Operand::Id(counter.clone()), value: Operand::Id(counter) });
    builder.emit(Instr::Jump(loop_label));
    builder.pop_builder(&body_label);

    builder.push_builder(Some(&done_label.to_string()));
  }

  /// Container iteration (§4.3.5): `begin`/`end`/`deref`/`incr` over a
  /// field's container value, recursing through `body` per element.
  fn compose_loop(&mut self, builder: &mut ModuleBuilder, unit: &Unit, prod: &Prod, body: &Prod) {
    let (field, elem_ty, _iter_ty) = self.container_field(unit, prod);
    let field_name = field.name.clone().unwrap_or_default();

    let container = builder.add_tmp(&format!("{field_name}_container"), field.ty.clone());
    builder.emit(Instr::StructGet { dst: Operand::Id(container.clone()), obj: self.state().self_expr.clone(), field: field_name.clone() });

    let iter = builder.add_tmp("iter", Type::iterator(field.ty.clone()));
    builder.emit(Instr::Begin { dst: Operand::Id(iter.clone()), container: Operand::Id(container.clone()) });
    let end = builder.add_tmp("iter_end", Type::iterator(field.ty.clone()));
    builder.emit(Instr::End { dst: Operand::Id(end.clone()), container: Operand::Id(container) });

    let loop_label = builder.new_builder(Some(&format!("{field_name}_loop")));
    builder.emit(Instr::Jump(loop_label.clone()));
    builder.push_builder(Some(&loop_label.to_string()));
    let cmp = builder.add_tmp("iter_done", Rc::new(Type::Bool));
    builder.emit(Instr::Equal { dst: Operand::Id(cmp.clone()), lhs: Operand::Id(iter.clone()), rhs: Operand::Id(end) });
    let done_label = builder.new_builder(None);
    let body_label = builder.new_builder(None);
    builder.emit(Instr::IfElse { cond: Operand::Id(cmp), then_block: done_label.clone(), else_block: body_label.clone() });
    builder.pop_builder(&loop_label);

    builder.push_builder(Some(&body_label.to_string()));
    let elem = builder.add_tmp("elem", elem_ty.clone());
    builder.emit(Instr::Deref { dst: Operand::Id(elem.clone()), value: Operand::Id(iter.clone()) });
    self.compose_container_element(builder, field, body, Operand::Id(elem));
    builder.emit(Instr::Incr { dst: Operand::Id(iter.clone()), value: Operand::Id(iter) });
    builder.emit(Instr::Jump(loop_label));
    builder.pop_builder(&body_label);

    builder.push_builder(Some(&done_label.to_string()));
  }

  /// `ChildGrammar(id)` (§4.3.4, SPEC_FULL §C.1): resolve the referenced
  /// unit and recurse with a cloned state whose `unit`/`self` point at
  /// the child.
  fn compose_child_grammar(&mut self, builder: &mut ModuleBuilder, unit: &Unit, prod: &Prod, child_id: &Id) {
    let child = self.units.unit(child_id).unwrap_or_else(|| internal_error(format!("unknown child unit '{child_id}'")));
    let Some(field_id) = prod.field() else {
      internal_error(format!("ChildGrammar production '{}' has no anchor field", prod.symbol()));
    };
    let field = unit.field(field_id);
    let child_self = builder.add_tmp(&format!("{}_child", field.name.clone().unwrap_or_default()), field.ty.clone());
    builder.emit(Instr::StructGet { dst: Operand::Id(child_self.clone()), obj: self.state().self_expr.clone(), field: field.name.clone().unwrap_or_default() });

    if self.options.debug.is_enabled() {
      builder.emit(Instr::DebugPushIndent);
    }
    let child_state = self.state().clone_with(child.id.clone(), Operand::Id(child_self));
    self.push_state(child_state);
    self.run_hooks(builder, child, HookEvent::Init);
    self.compose_production(builder, child, &child.grammar);
    self.run_hooks(builder, child, HookEvent::Done);
    self.pop_state();
    if self.options.debug.is_enabled() {
      builder.emit(Instr::DebugPopIndent);
    }
  }

  /// Delivery to the output function (§4.3.7): every composed value,
  /// atomic or not, ultimately reaches here as a `CallVoid` to the
  /// current state's `output_fn`. `_hiltiFilterOutput` (SPEC_FULL §C.5,
  /// §E) is not implemented — bytes are always delivered raw.
  fn deliver(&mut self, builder: &mut ModuleBuilder, field: Option<&Field>, value: Operand) {
    let obj = match field {
      Some(f) if !f.anonymous() => {
        let name = f.name.clone().unwrap_or_default();
        let tmp = builder.add_tmp(&format!("{name}_obj"), f.ty.clone());
        builder.emit(Instr::StructGet { dst: Operand::Id(tmp.clone()), obj: self.state().self_expr.clone(), field: name });
        Operand::Id(tmp)
      }
      _ => Operand::None,
    };
    let state = self.state().clone();
    let Operand::Id(callee) = state.output_fn.clone() else {
      internal_error("output_fn must be a named function/hook");
    };
    builder.emit(Instr::CallVoid { callee, args: vec![value, obj, state.cookie] });
  }

  /// `ComposeError(msg)` (§4.3.8, §8.3 S4): emitted as an IL exception
  /// throw — the generated runtime raises a `BinPACHilti::ComposeError`
  /// carrying `msg`, not a Rust-level error.
  fn compose_error(&mut self, builder: &mut ModuleBuilder, msg: &str) {
    let exc = builder.add_tmp("compose_error", Rc::new(Type::String));
    builder.emit(Instr::Assign { dst: Operand::Id(exc.clone()), value: Operand::StringConst(msg.to_string()) });
    builder.emit(Instr::Throw(Operand::Id(exc)));
  }

  /// Hook dispatch (§6.2): the compiler never synthesizes per-hook
  /// functions. Scheduling (priority/group ordering across every hook
  /// registered for `event`) is delegated whole to the single runtime
  /// entry point `run_field_hooks`, called here with `is_compose = true`.
  fn run_hooks(&mut self, builder: &mut ModuleBuilder, unit: &Unit, event: HookEvent) {
    if unit.hooks_for(event).next().is_none() {
      return;
    }
    let field_arg = match event {
      HookEvent::Field(id) => Operand::IntConst(i64::try_from(id).unwrap_or(i64::MAX)),
      HookEvent::Init | HookEvent::Done => Operand::None,
    };
    let state = self.state().clone();
    builder.emit(Instr::CallVoid {
      callee: Id::new("run_field_hooks"),
      args: vec![Operand::id(&unit.id.to_string()), field_arg, state.self_expr, Operand::BoolConst(true), state.cookie],
    });
  }

  fn run_field_hooks(&mut self, builder: &mut ModuleBuilder, unit: &Unit, field: &Field) {
    let Some(field_id) = unit.fields.iter().position(|f| std::ptr::eq(f, field)) else { return };
    self.run_hooks(builder, unit, HookEvent::Field(field_id));
  }
}

fn expr_operand(expr: &Expr) -> Operand {
  match expr {
    Expr::Int(i) => Operand::IntConst(*i),
    Expr::Ident(name) => Operand::id(name),
    Expr::Opaque(_) => internal_error("cannot lower an opaque expression to an operand"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::support::attrs::Attributes;
  use crate::types::production::{PgMeta, Production};

  fn opts() -> CompilerOptions {
    CompilerOptions::default()
  }

  fn simple_unit() -> Unit {
    let ty = Rc::new(Type::Integer { width: 32, signed: false });
    let production = Production::new(ProductionKind::Variable(ty.clone()), PgMeta::new("x", true).with_field(0));
    let field = Field { name: Some("x".into()), ty, production: production.clone(), attributes: Attributes::new(), condition: None, for_composing: true };
    let grammar = Production::new(ProductionKind::Sequence(vec![production]), PgMeta::new("root", true));
    Unit { id: Id::new("Simple"), fields: vec![field], condition: None, for_composing: true, hooks: vec![], grammar }
  }

  #[test]
  fn composes_single_integer_field() {
    let units: HashMap<Id, Unit> = HashMap::new();
    struct NoScope;
    impl TypeScope for NoScope {
      fn resolve_type(&self, _id: &Id) -> Option<Ty> {
        None
      }
    }
    let options = opts();
    let unit = simple_unit();
    let mut composer = Composer::new(&units, &NoScope, &options);
    let mut builder = ModuleBuilder::new(Id::new("TestMod"));
    let fn_id = composer.create_host_function(&mut builder, &unit);
    assert_eq!(fn_id.local(), "compose_Simple");
    let module = builder.finalize().expect("no diagnostics recorded");
    let f = module.function(&fn_id).expect("host function present");
    let has_pack = f.blocks.iter().any(|b| b.instrs.iter().any(|i| matches!(i, Instr::Pack { .. })));
    let has_call = f.blocks.iter().any(|b| b.instrs.iter().any(|i| matches!(i, Instr::CallVoid { callee, .. } if callee.local() == "out")));
    assert!(has_pack, "expected a Pack instruction for the integer field");
    assert!(has_call, "expected delivery to the output function");
  }

  #[test]
  fn non_atomic_production_is_memoized_once() {
    let units: HashMap<Id, Unit> = HashMap::new();
    struct NoScope;
    impl TypeScope for NoScope {
      fn resolve_type(&self, _id: &Id) -> Option<Ty> {
        None
      }
    }
    let options = opts();
    let ty = Rc::new(Type::Integer { width: 8, signed: false });
    let leaf = Production::new(ProductionKind::Variable(ty.clone()), PgMeta::new("x", true).with_field(0));
    let seq = Production::new(ProductionKind::Sequence(vec![leaf.clone(), leaf.clone()]), PgMeta::new("seq", false));
    let field = Field { name: Some("x".into()), ty, production: leaf, attributes: Attributes::new(), condition: None, for_composing: true };
    let unit = Unit { id: Id::new("U"), fields: vec![field], condition: None, for_composing: true, hooks: vec![], grammar: seq.clone() };

    let mut composer = Composer::new(&units, &NoScope, &options);
    let mut builder = ModuleBuilder::new(Id::new("M"));
    composer.create_host_function(&mut builder, &unit);
    let module = builder.finalize().unwrap();
    let wrapper_count = module.functions.iter().filter(|f| f.id.local() == "__compose_U_seq").count();
    assert_eq!(wrapper_count, 1);
  }

  fn delivery_args(module: &crate::il::Module, fn_id: &Id) -> Vec<Operand> {
    let f = module.function(fn_id).expect("host function present");
    f.blocks
      .iter()
      .flat_map(|b| b.instrs.iter())
      .find_map(|i| match i {
        Instr::CallVoid { callee, args } if callee.local() == "out" => Some(args.clone()),
        _ => None,
      })
      .expect("a delivery call to the output function")
  }

  #[test]
  fn named_field_delivers_a_freshly_fetched_obj() {
    let units: HashMap<Id, Unit> = HashMap::new();
    struct NoScope;
    impl TypeScope for NoScope {
      fn resolve_type(&self, _id: &Id) -> Option<Ty> {
        None
      }
    }
    let options = opts();
    let unit = simple_unit();
    let mut composer = Composer::new(&units, &NoScope, &options);
    let mut builder = ModuleBuilder::new(Id::new("TestMod"));
    let fn_id = composer.create_host_function(&mut builder, &unit);
    let module = builder.finalize().expect("no diagnostics recorded");

    let args = delivery_args(&module, &fn_id);
    assert_eq!(args.len(), 3, "output_fn(data, obj, cookie)");
    assert_ne!(args[1], Operand::None, "a named field's obj is a fresh re-fetch, not null");

    let f = module.function(&fn_id).expect("host function present");
    let struct_gets: Vec<_> = f
      .blocks
      .iter()
      .flat_map(|b| b.instrs.iter())
      .filter(|i| matches!(i, Instr::StructGet { field, .. } if field == "x"))
      .collect();
    assert_eq!(struct_gets.len(), 2, "one StructGet to read the value, one more to fetch obj");
  }

  #[test]
  fn anonymous_field_delivers_a_null_obj() {
    let units: HashMap<Id, Unit> = HashMap::new();
    struct NoScope;
    impl TypeScope for NoScope {
      fn resolve_type(&self, _id: &Id) -> Option<Ty> {
        None
      }
    }
    let options = opts();
    let ty = Rc::new(Type::Bytes);
    let production = Production::new(ProductionKind::Literal(LiteralValue::Bytes(vec![0x41, 0x42])), PgMeta::new("lit", true).with_field(0));
    let field = Field { name: None, ty, production: production.clone(), attributes: Attributes::new(), condition: None, for_composing: true };
    let grammar = Production::new(ProductionKind::Sequence(vec![production]), PgMeta::new("root", true));
    let unit = Unit { id: Id::new("Anon"), fields: vec![field], condition: None, for_composing: true, hooks: vec![], grammar };

    let mut composer = Composer::new(&units, &NoScope, &options);
    let mut builder = ModuleBuilder::new(Id::new("M"));
    let fn_id = composer.create_host_function(&mut builder, &unit);
    let module = builder.finalize().expect("no diagnostics recorded");

    let args = delivery_args(&module, &fn_id);
    assert_eq!(args.len(), 3);
    assert_eq!(args[1], Operand::None, "an anonymous field delivers a null obj");
  }

  #[test]
  fn switch_without_default_throws_a_compose_error() {
    let units: HashMap<Id, Unit> = HashMap::new();
    struct NoScope;
    impl TypeScope for NoScope {
      fn resolve_type(&self, _id: &Id) -> Option<Ty> {
        None
      }
    }
    let options = opts();
    let ty = Rc::new(Type::Integer { width: 8, signed: false });
    let arm = Production::new(ProductionKind::Variable(ty), PgMeta::new("x", true).with_field(0));
    let switch = Production::new(
      ProductionKind::Switch {
        expr: Expr::Ident("tag".into()),
        cases: vec![crate::types::production::SwitchCase { values: vec![Expr::Int(1)], body: arm.clone() }],
        default: None,
      },
      PgMeta::new("sw", false),
    );
    let field = Field { name: Some("x".into()), ty: Rc::new(Type::Integer { width: 8, signed: false }), production: arm, attributes: Attributes::new(), condition: None, for_composing: true };
    let unit = Unit { id: Id::new("Sw"), fields: vec![field], condition: None, for_composing: true, hooks: vec![], grammar: switch };

    let mut composer = Composer::new(&units, &NoScope, &options);
    let mut builder = ModuleBuilder::new(Id::new("M"));
    composer.create_host_function(&mut builder, &unit);
    let module = builder.finalize().expect("no diagnostics recorded");

    let has_throw = module.functions.iter().any(|f| f.blocks.iter().any(|b| b.instrs.iter().any(|i| matches!(i, Instr::Throw(_)))));
    assert!(has_throw, "a switch with no default must throw a compose error for an unmatched value");
  }

  #[test]
  fn field_hook_dispatches_through_run_field_hooks() {
    let units: HashMap<Id, Unit> = HashMap::new();
    struct NoScope;
    impl TypeScope for NoScope {
      fn resolve_type(&self, _id: &Id) -> Option<Ty> {
        None
      }
    }
    let options = opts();
    let mut unit = simple_unit();
    unit.hooks.push(crate::types::unit::UnitHook { event: HookEvent::Field(0), meta: crate::types::unit::HookMeta::default() });

    let mut composer = Composer::new(&units, &NoScope, &options);
    let mut builder = ModuleBuilder::new(Id::new("M"));
    let fn_id = composer.create_host_function(&mut builder, &unit);
    let module = builder.finalize().expect("no diagnostics recorded");
    let f = module.function(&fn_id).expect("host function present");

    let hook_calls: Vec<_> = f
      .blocks
      .iter()
      .flat_map(|b| b.instrs.iter())
      .filter(|i| matches!(i, Instr::CallVoid { callee, .. } if callee.local() == "run_field_hooks"))
      .collect();
    assert_eq!(hook_calls.len(), 1, "the compiler never synthesizes per-hook callees, it dispatches once through run_field_hooks");
    match hook_calls[0] {
      Instr::CallVoid { args, .. } => {
        assert_eq!(args.len(), 5, "run_field_hooks(unit, field, self, is_compose, cookie)");
        assert_eq!(args[3], Operand::BoolConst(true), "is_compose is true during composition");
      }
      _ => unreachable!(),
    }
  }

  #[test]
  fn loop_recurses_through_the_body_production_per_element() {
    let units: HashMap<Id, Unit> = HashMap::new();
    struct NoScope;
    impl TypeScope for NoScope {
      fn resolve_type(&self, _id: &Id) -> Option<Ty> {
        None
      }
    }
    let options = opts();
    let elem_ty = Rc::new(Type::Integer { width: 16, signed: false });
    let container_ty: Ty = Rc::new(Type::Vector(elem_ty.clone()));
    let body = Production::new(ProductionKind::Variable(elem_ty), PgMeta::new("elem", true));
    let loop_prod = Production::new(ProductionKind::Loop { body: body.clone(), until: None }, PgMeta::new("xs_loop", false).with_field(0));
    let field = Field { name: Some("xs".into()), ty: container_ty, production: loop_prod.clone(), attributes: Attributes::new(), condition: None, for_composing: true };
    let grammar = Production::new(ProductionKind::Sequence(vec![loop_prod]), PgMeta::new("root", true));
    let unit = Unit { id: Id::new("Container"), fields: vec![field], condition: None, for_composing: true, hooks: vec![], grammar };

    let mut composer = Composer::new(&units, &NoScope, &options);
    let mut builder = ModuleBuilder::new(Id::new("M"));
    composer.create_host_function(&mut builder, &unit);
    let module = builder.finalize().expect("no diagnostics recorded");

    let all_instrs: Vec<&Instr> = module.functions.iter().flat_map(|f| f.blocks.iter()).flat_map(|b| b.instrs.iter()).collect();
    assert!(all_instrs.iter().any(|i| matches!(i, Instr::Begin { .. })));
    assert!(all_instrs.iter().any(|i| matches!(i, Instr::Deref { .. })));
    assert!(all_instrs.iter().any(|i| matches!(i, Instr::Incr { .. })));
    assert!(all_instrs.iter().any(|i| matches!(i, Instr::Pack { .. })), "each element is still composed through its own body production, not skipped");
  }

  #[test]
  fn counter_bounds_iteration_by_the_count_expression_not_end() {
    let units: HashMap<Id, Unit> = HashMap::new();
    struct NoScope;
    impl TypeScope for NoScope {
      fn resolve_type(&self, _id: &Id) -> Option<Ty> {
        None
      }
    }
    let options = opts();
    let elem_ty = Rc::new(Type::Integer { width: 16, signed: false });
    let container_ty: Ty = Rc::new(Type::Vector(elem_ty.clone()));
    let body = Production::new(ProductionKind::Variable(elem_ty), PgMeta::new("elem", true));
    let counter_prod =
      Production::new(ProductionKind::Counter { count: Expr::Ident("n".into()), body: body.clone() }, PgMeta::new("xs_counter", false).with_field(0));
    let field = Field { name: Some("xs".into()), ty: container_ty, production: counter_prod.clone(), attributes: Attributes::new(), condition: None, for_composing: true };
    let grammar = Production::new(ProductionKind::Sequence(vec![counter_prod]), PgMeta::new("root", true));
    let unit = Unit { id: Id::new("Counted"), fields: vec![field], condition: None, for_composing: true, hooks: vec![], grammar };

    let mut composer = Composer::new(&units, &NoScope, &options);
    let mut builder = ModuleBuilder::new(Id::new("M"));
    composer.create_host_function(&mut builder, &unit);
    let module = builder.finalize().expect("no diagnostics recorded");

    let all_instrs: Vec<&Instr> = module.functions.iter().flat_map(|f| f.blocks.iter()).flat_map(|b| b.instrs.iter()).collect();
    assert!(all_instrs.iter().any(|i| matches!(i, Instr::Begin { .. })), "a Counter still reads the container via Begin");
    assert!(!all_instrs.iter().any(|i| matches!(i, Instr::End { .. })), "a Counter is bounded by its count expression, not by container end");
    assert!(all_instrs.iter().any(|i| matches!(i, Instr::Deref { .. })));
  }
}
