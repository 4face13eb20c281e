// ABOUTME: Callable cells: builtin, method, and syntax bindings

use crate::cell::Cell;
use crate::error::ShellResult;
use crate::registers::Registers;
use crate::task::Task;
use std::sync::Arc;

/// How argv reaches the applier
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BindingKind {
    /// argv is evaluated, then tilde- and glob-expanded
    Builtin,
    /// argv is evaluated as-is
    Method,
    /// the applier sees the raw code, unevaluated
    Syntax,
}

/// The native half of every callable. Appliers for in-language closures are
/// the generic block-setup functions in the evaluator; native primitives
/// supply their own. Returning `true` asks the evaluator to keep running
/// the states the applier installed; `false` means the operation finished.
pub type Applier = fn(&Arc<Task>, &mut Registers, Cell) -> ShellResult<bool>;

/// Shared body of a callable: what to run and where it was made
pub struct Ref {
    pub kind: BindingKind,
    pub applier: Applier,
    pub body: Cell,
    pub params: Cell,
    pub label: Cell,
    /// Captured lexical context
    pub scope: Cell,
}

impl Ref {
    pub fn native(kind: BindingKind, applier: Applier) -> Arc<Ref> {
        Arc::new(Ref {
            kind,
            applier,
            body: Cell::Null,
            params: Cell::Null,
            label: Cell::Null,
            scope: Cell::Null,
        })
    }

    pub fn closure(
        kind: BindingKind,
        applier: Applier,
        body: Cell,
        params: Cell,
        label: Cell,
        scope: Cell,
    ) -> Arc<Ref> {
        Arc::new(Ref {
            kind,
            applier,
            body,
            params,
            label,
            scope,
        })
    }
}

/// A Ref paired with its receiver. Unbound bindings never gain a self;
/// bound ones are re-fixed to each dispatch context.
pub struct Binding {
    pub r: Arc<Ref>,
    pub receiver: Option<Cell>,
}

impl Binding {
    pub fn unbound(r: Arc<Ref>) -> Arc<Binding> {
        Arc::new(Binding { r, receiver: None })
    }

    pub fn bound(r: Arc<Ref>, receiver: Cell) -> Arc<Binding> {
        Arc::new(Binding {
            r,
            receiver: Some(receiver),
        })
    }

    /// Fix a self for this dispatch
    pub fn bind(self: &Arc<Self>, ctx: Cell) -> Arc<Binding> {
        match &self.receiver {
            None => self.clone(),
            Some(cur) if cur.same(&ctx) => self.clone(),
            Some(_) => Binding::bound(self.r.clone(), ctx),
        }
    }

    pub fn receiver_or_null(&self) -> Cell {
        self.receiver.clone().unwrap_or(Cell::Null)
    }
}
