//! The IL module/function/block model (§3.5): what the module builder
//! (§4.2) assembles and the composer (§4.3) emits into.

pub mod instr;

pub use instr::{Instr, Operand, PackFormat};

use crate::ids::Id;
use crate::types::ty::Ty;
use crate::types::unit::HookMeta;

/// A global, local, parameter, or temporary declaration (§4.2's
/// `add_global`/`add_local`/`add_tmp`).
#[derive(Clone, Debug)]
pub struct Declaration {
  pub id: Id,
  pub ty: Ty,
  pub is_const: bool,
}

/// An ordered sequence of instructions within one lexical scope (§3.5). A
/// function's body is a list of blocks linked by `Jump`/`IfElse`/`Switch`
/// rather than a single flat list, matching the module builder's
/// block-builder stack (§4.2).
#[derive(Clone, Debug, Default)]
pub struct Block {
  pub label: Option<Id>,
  pub instrs: Vec<Instr>,
}

impl Block {
  #[must_use]
  pub fn new(label: Option<Id>) -> Self {
    Self { label, instrs: Vec::new() }
  }

  pub fn push(&mut self, instr: Instr) {
    self.instrs.push(instr);
  }
}

/// Distinguishes a hook (scheduled alongside others for the same event, and
/// carrying priority/group metadata, §3.5) from an ordinary function.
#[derive(Clone, Debug)]
pub enum FunctionKind {
  Function,
  Hook(HookMeta),
}

/// A function or hook declaration plus its body (§3.5).
#[derive(Clone, Debug)]
pub struct Function {
  pub id: Id,
  pub params: Vec<Declaration>,
  pub result: Ty,
  pub kind: FunctionKind,
  pub locals: Vec<Declaration>,
  pub blocks: Vec<Block>,
}

impl Function {
  #[must_use]
  pub fn is_hook(&self) -> bool {
    matches!(self.kind, FunctionKind::Hook(_))
  }
}

/// A compilation unit at the IL level (§3.5): a set of functions/hooks, the
/// globals they share, and the other modules it imports from.
#[derive(Clone, Debug, Default)]
pub struct Module {
  pub id: Option<Id>,
  pub globals: Vec<Declaration>,
  pub functions: Vec<Function>,
  pub imported_modules: Vec<Id>,
  pub exported_ids: Vec<Id>,
}

impl Module {
  #[must_use]
  pub fn new(id: Id) -> Self {
    Self { id: Some(id), ..Self::default() }
  }

  #[must_use]
  pub fn function(&self, id: &Id) -> Option<&Function> {
    self.functions.iter().find(|f| &f.id == id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::rc::Rc;

  use crate::types::ty::Type;

  #[test]
  fn module_looks_up_function_by_id() {
    let mut module = Module::new(Id::new("Test"));
    module.functions.push(Function {
      id: Id::new("f"),
      params: vec![],
      result: Rc::new(Type::Void),
      kind: FunctionKind::Function,
      locals: vec![],
      blocks: vec![],
    });
    assert!(module.function(&Id::new("f")).is_some());
    assert!(module.function(&Id::new("g")).is_none());
  }
}
