//! The module builder facade (§4.2): the imperative API the composer
//! drives to assemble an [`il::Module`] — function/body/block-builder
//! stacks, declaration management, node caching, and finalization.
//!
//! Grounded on `hilti/builder/module.h`'s `ModuleBuilder`: a stateful
//! object wrapping the module under construction with a small set of
//! stacks (the function currently being declared, the body currently being
//! filled in, the block currently receiving instructions) so that callers
//! never have to thread indices through themselves.

use std::any::Any;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::ids::Id;
use crate::il::{Block, Declaration, Function, FunctionKind, Instr, Module};
use crate::support::diag::{fatal_error, Diagnostics};
use crate::types::ty::Ty;

/// How [`ModuleBuilder::declare`] should treat a name that's already
/// declared in the current scope (§4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclStyle {
  /// Return the existing declaration if one exists with this name.
  Reuse,
  /// Fatal error if a declaration with this name already exists.
  CheckUnique,
  /// Always mint a fresh, disambiguated name.
  MakeUnique,
}

fn join_key(parts: &[&str]) -> String {
  parts.join("\n")
}

/// Bookkeeping for one open [`push_function`](ModuleBuilder::push_function)
/// frame: which declarations belong to it and how deep the builder stack
/// was when it was entered, so [`pop_function`](ModuleBuilder::pop_function)
/// can unwind cleanly even if the caller left builders open. `index` is
/// `None` for the synthetic outermost frame representing module-level code
/// (§4.2) — the function stack is never truly empty.
struct FunctionFrame {
  index: Option<usize>,
  builder_stack_base: usize,
  /// Block labels already minted within this frame, so explicit labels
  /// passed to `new_builder` can be disambiguated the way `mint_unique`
  /// disambiguates declaration names (§4.2, §8.1).
  used_labels: hashbrown::HashSet<String>,
}

/// Assembles one [`Module`] (§4.2).
pub struct ModuleBuilder {
  module: Module,
  function_stack: Vec<FunctionFrame>,
  /// Block labels in scope, current builder = last. A function's own
  /// entry block is always pushed by `push_function`.
  builder_stack: Vec<Id>,
  node_cache: HashMap<String, Rc<dyn Any>>,
  block_builder_cache: HashMap<String, Id>,
  unique_seq: HashMap<String, u64>,
  diagnostics: Diagnostics,
  next_label: u64,
  module_init_saved: Vec<Vec<FunctionFrame>>,
}

impl ModuleBuilder {
  #[must_use]
  pub fn new(id: Id) -> Self {
    Self {
      module: Module::new(id),
      function_stack: vec![FunctionFrame { index: None, builder_stack_base: 0, used_labels: hashbrown::HashSet::new() }],
      builder_stack: Vec::new(),
      node_cache: HashMap::new(),
      block_builder_cache: HashMap::new(),
      unique_seq: HashMap::new(),
      diagnostics: Diagnostics::new(),
      next_label: 0,
      module_init_saved: Vec::new(),
    }
  }

  #[must_use]
  pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
    &mut self.diagnostics
  }

  // -- imports / exports ------------------------------------------------

  /// Import another module's namespace. Idempotent and case-insensitive,
  /// matching `binpac::Module::import` as used for implicit `binpac`/
  /// `binpac-rt` imports.
  pub fn import_module(&mut self, id: Id) {
    let already = self.module.imported_modules.iter().any(|m| m.local().eq_ignore_ascii_case(id.local()));
    if !already {
      self.module.imported_modules.push(id);
    }
  }

  pub fn export_id(&mut self, id: Id) {
    self.module.exported_ids.push(id);
  }

  // -- labels -------------------------------------------------------------

  /// Mint a unique block label. Without an explicit `id`, generates
  /// `@b<N>`; an explicit id has any `-` replaced with `_` (HILTI label
  /// syntax doesn't allow `-`) and is prefixed with `@` if not already.
  /// Either way, the label is disambiguated against the current
  /// function's own labels with a numeric suffix on collision — the same
  /// treatment `mint_unique` gives declaration names (§4.2, §8.1).
  #[must_use]
  pub fn new_builder(&mut self, id: Option<&str>) -> Id {
    let base = match id {
      Some(name) => {
        let sanitized = name.replace('-', "_");
        if sanitized.starts_with('@') { sanitized } else { format!("@{sanitized}") }
      }
      None => {
        let n = self.next_label;
        self.next_label += 1;
        format!("@b{n}")
      }
    };

    let frame = self.function_stack.last_mut().expect("function stack is never empty");
    let mut candidate = base.clone();
    let mut suffix = 1u64;
    while !frame.used_labels.insert(candidate.clone()) {
      suffix += 1;
      candidate = format!("{base}_{suffix}");
    }
    Id::new(&candidate)
  }

  /// Memoizes a block builder by `tag`: on first call, runs `build` to
  /// construct it and records the resulting label; later calls with the
  /// same tag return that label without invoking `build` again. Backs
  /// the composer's per-production function memoization (§4.3.3 step 5).
  pub fn cache_block_builder(&mut self, tag: &str, build: impl FnOnce(&mut Self) -> Id) -> Id {
    if let Some(id) = self.block_builder_cache.get(tag) {
      return id.clone();
    }
    let id = build(self);
    self.block_builder_cache.insert(tag.to_string(), id.clone());
    id
  }

  // -- node cache -----------------------------------------------------

  /// Cache an arbitrary built node (e.g. a synthesized function `Id`, a
  /// precomputed RTTI descriptor reference) under a composite key, the
  /// way the original keys its per-unit/per-production node cache by
  /// `(component, index)`.
  pub fn cache_node<T: 'static>(&mut self, key_parts: &[&str], value: Rc<T>) {
    self.node_cache.insert(join_key(key_parts), value);
  }

  #[must_use]
  pub fn lookup_node<T: 'static>(&self, key_parts: &[&str]) -> Option<Rc<T>> {
    self.node_cache.get(&join_key(key_parts)).and_then(|v| v.clone().downcast::<T>().ok())
  }

  // -- declarations -----------------------------------------------------

  fn mint_unique(&mut self, base: &str) -> String {
    let seq = self.unique_seq.entry(base.to_string()).or_insert(0);
    *seq += 1;
    format!("{base}_{seq}")
  }

  pub fn add_global(&mut self, id: Id, ty: Ty, style: DeclStyle) -> Id {
    let existing = self.module.globals.iter().any(|d| d.id == id);
    let id = self.resolve_decl_name(id, existing, style);
    self.module.globals.push(Declaration { id: id.clone(), ty, is_const: false });
    id
  }

  pub fn add_local(&mut self, id: Id, ty: Ty, style: DeclStyle) -> Id {
    let frame = self.function_stack.last().expect("function stack is never empty");
    let index = frame.index.unwrap_or_else(|| fatal_error("add_local with no function open"));
    let func = &mut self.module.functions[index];
    let existing = func.locals.iter().any(|d| d.id == id);
    let resolved = if existing && style == DeclStyle::Reuse {
      id
    } else if existing && style == DeclStyle::CheckUnique {
      fatal_error(format!("redeclaration of local '{id}'"))
    } else if style == DeclStyle::MakeUnique || existing {
      Id::new(&self.mint_unique(id.local()))
    } else {
      id
    };
    func.locals.push(Declaration { id: resolved.clone(), ty, is_const: false });
    resolved
  }

  /// A compiler-synthesized temporary, prefixed `__tmp_`. Defaults to
  /// `Reuse` — repeated calls with the same base name inside one function
  /// return the same temporary, the way the composer reuses a single
  /// `__tmp_len` across sibling productions instead of minting a fresh
  /// one each time.
  pub fn add_tmp(&mut self, base: &str, ty: Ty) -> Id {
    let name = format!("__tmp_{base}");
    self.add_local(Id::new(&name), ty, DeclStyle::Reuse)
  }

  fn resolve_decl_name(&mut self, id: Id, existing: bool, style: DeclStyle) -> Id {
    match style {
      DeclStyle::Reuse => id,
      DeclStyle::CheckUnique if existing => fatal_error(format!("redeclaration of '{id}'")),
      DeclStyle::CheckUnique => id,
      DeclStyle::MakeUnique => Id::new(&self.mint_unique(id.local())),
    }
  }

  // -- functions --------------------------------------------------------

  /// Declares a new function and opens it for emission. `no_body`
  /// suppresses the automatic entry block (§4.2) — a caller that wants to
  /// decide its own entry label, or that won't emit a body at all, passes
  /// `true` and calls `push_builder` itself.
  pub fn push_function(&mut self, id: Id, params: Vec<Declaration>, result: Ty, kind: FunctionKind, no_body: bool) -> Id {
    let func = Function { id: id.clone(), params, result, kind, locals: Vec::new(), blocks: Vec::new() };
    self.module.functions.push(func);
    let index = self.module.functions.len() - 1;
    self.function_stack.push(FunctionFrame { index: Some(index), builder_stack_base: self.builder_stack.len(), used_labels: hashbrown::HashSet::new() });
    if !no_body {
      let entry = self.new_builder(Some(&format!("{}_entry", id.local())));
      self.module.functions[index].blocks.push(Block::new(Some(entry.clone())));
      self.builder_stack.push(entry);
    }
    id
  }

  /// Pops the current function, discarding any builders left open above
  /// its entry — a caller that forgot to balance `push_builder` with
  /// `pop_builder` doesn't corrupt the enclosing function's state.
  pub fn pop_function(&mut self) -> Id {
    if self.function_stack.len() <= 1 {
      fatal_error("pop_function with no function open");
    }
    let frame = self.function_stack.pop().expect("checked len above");
    self.builder_stack.truncate(frame.builder_stack_base);
    let index = frame.index.expect("non-sentinel frame always has an index");
    self.module.functions[index].id.clone()
  }

  pub fn current_function(&self) -> &Function {
    let frame = self.function_stack.last().expect("function stack is never empty");
    let index = frame.index.unwrap_or_else(|| fatal_error("no function open"));
    &self.module.functions[index]
  }

  // -- block builders -----------------------------------------------------

  /// Opens a new block labeled `id` (or a fresh label if `None`) and
  /// pushes it as the current builder.
  pub fn push_builder(&mut self, id: Option<&str>) -> Id {
    let label = self.new_builder(id);
    let frame = self.function_stack.last().expect("function stack is never empty");
    let index = frame.index.unwrap_or_else(|| fatal_error("push_builder with no function open"));
    self.module.functions[index].blocks.push(Block::new(Some(label.clone())));
    self.builder_stack.push(label.clone());
    label
  }

  /// Pops builders down to and including `label`. If `label` isn't the
  /// top of the stack, every builder above it is discarded too (LIFO-drop
  /// recovery) rather than treated as an error — a nested production
  /// that bails out early shouldn't force every caller up the chain to
  /// explicitly unwind.
  pub fn pop_builder(&mut self, label: &Id) {
    let Some(pos) = self.builder_stack.iter().rposition(|l| l == label) else {
      fatal_error(format!("pop_builder: no open builder named '{label}'"));
    };
    self.builder_stack.truncate(pos);
  }

  /// Appends an instruction to the current builder's block.
  pub fn emit(&mut self, instr: Instr) {
    let label = self.builder_stack.last().unwrap_or_else(|| fatal_error("emit with no builder open")).clone();
    let frame = self.function_stack.last().expect("function stack is never empty");
    let index = frame.index.unwrap_or_else(|| fatal_error("emit with no function open"));
    let block = self.module.functions[index].blocks.iter_mut().find(|b| b.label.as_ref() == Some(&label)).unwrap_or_else(|| fatal_error("current builder's block vanished"));
    block.push(instr);
  }

  pub fn current_builder(&self) -> &Id {
    self.builder_stack.last().unwrap_or_else(|| fatal_error("no builder open"))
  }

  // -- module init --------------------------------------------------------

  /// Opens (or reopens) the module's hidden `%init` entry function, a
  /// singleton the way `ModuleBuilder::pushModuleInit` guarantees: the
  /// second call resumes the same function rather than declaring another
  /// one.
  pub fn push_module_init(&mut self) {
    let id = Id::new("__module_init");
    if self.module.function(&id).is_none() {
      self.push_function(id, Vec::new(), Rc::new(crate::types::ty::Type::Void), FunctionKind::Function, false);
    } else {
      let index = self.module.functions.iter().position(|f| f.id == id).expect("checked above");
      let entry = self.module.functions[index].blocks[0].label.clone().expect("entry block always labeled");
      let used_labels = self.module.functions[index].blocks.iter().filter_map(|b| b.label.as_ref().map(ToString::to_string)).collect();
      self.function_stack.push(FunctionFrame { index: Some(index), builder_stack_base: self.builder_stack.len(), used_labels });
      self.builder_stack.push(entry);
    }
    self.module_init_saved.push(Vec::new());
  }

  pub fn pop_module_init(&mut self) {
    self.module_init_saved.pop();
    self.pop_function();
  }

  // -- finalize -----------------------------------------------------------

  /// Finalizes the module, returning `None` if any user errors were
  /// recorded (§4.2 Finalization; §7 tier 1).
  #[must_use]
  pub fn finalize(self) -> Option<Module> {
    if self.diagnostics.has_errors() {
      tracing::debug!(target: "binpac_il::builder", errors = self.diagnostics.errors().len(), "finalize: module has errors");
      return None;
    }
    Some(self.module)
  }
}
