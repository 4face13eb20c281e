//! # Binding tables
//!
//! Registration of the root-scope bindings, one module per category:
//!
//! - **[syntax]** - control and definition forms: `block`, `if`, `while`,
//!   `set`, `define`, `public`, `dynamic`, `setenv`, `spawn`, `splice`,
//!   `quote`, `make-env`, `make-scope`, and the closure builders
//!   `method`, `syntax`, `builtin`
//! - **[number]** - conversions, arithmetic, and relations over the
//!   Integer/Rational/Float tower
//! - **[list]** - pair and list surgery
//! - **[types]** - type predicates
//! - **[object]** - context introspection: `eval`, `interpolate`,
//!   `get-slot`, `set-slot`, `has`, `unset`, `child`, `clone`, `context`
//! - **[shell]** - the shell-facing commands: `cd`, `exists`, `run`,
//!   `wait`, `exit`, `fg`, `jobs`, `module`, `source`, conduit
//!   constructors, and stdio access
//! - **[strings]** - the string context's method table
//!
//! Pure functions are registered unbound; context methods are bound to the
//! root scope so each dispatch re-fixes the receiver.

use crate::binding::{Applier, Binding, BindingKind, Ref};
use crate::cell::{sym, Cell};
use crate::error::{ShellError, ShellResult};
use crate::registers::Registers;
use crate::scope::Scope;
use std::sync::Arc;

pub mod list;
pub mod number;
pub mod object;
pub mod shell;
pub mod strings;
pub mod syntax;
pub mod types;

/// Register every binding table in the root scope
pub fn register(scope: &Arc<Scope>) {
    scope.public(sym("true"), Cell::Bool(true));
    scope.public(sym("false"), Cell::Bool(false));

    syntax::register(scope);
    number::register(scope);
    list::register(scope);
    types::register(scope);
    object::register(scope);
    shell::register(scope);
}

// ============================================================================
// Registration helpers
// ============================================================================

pub(crate) fn method(scope: &Arc<Scope>, name: &str, applier: Applier) {
    scope.public(
        sym(name),
        Cell::Binding(Binding::unbound(Ref::native(BindingKind::Method, applier))),
    );
}

pub(crate) fn builtin(scope: &Arc<Scope>, name: &str, applier: Applier) {
    scope.public(
        sym(name),
        Cell::Binding(Binding::unbound(Ref::native(BindingKind::Builtin, applier))),
    );
}

pub(crate) fn syntax_form(scope: &Arc<Scope>, name: &str, applier: Applier) {
    scope.public(
        sym(name),
        Cell::Binding(Binding::unbound(Ref::native(BindingKind::Syntax, applier))),
    );
}

/// A method whose receiver matters: bound, so `bind` re-fixes the self at
/// each dispatch
pub(crate) fn context_method(scope: &Arc<Scope>, name: &str, applier: Applier) {
    scope.public(
        sym(name),
        Cell::Binding(Binding::bound(
            Ref::native(BindingKind::Method, applier),
            Cell::Scope(scope.clone()),
        )),
    );
}

// ============================================================================
// Applier helpers
// ============================================================================

/// Finish a native: replace the binding on the scratch with the result
pub(crate) fn ret(r: &mut Registers, v: Cell) -> ShellResult<bool> {
    r.scratch_replace(v);
    Ok(false)
}

pub(crate) fn args_vec(args: &Cell) -> Vec<Cell> {
    let mut out = Vec::new();
    let mut rest = args.clone();
    loop {
        let p = match rest {
            Cell::Pair(p) => p,
            _ => break,
        };
        out.push(p.car());
        rest = p.cdr();
    }
    out
}

/// The binding currently being applied
pub(crate) fn current_binding(r: &Registers) -> ShellResult<Arc<Binding>> {
    match r.scratch.car() {
        Cell::Binding(b) => Ok(b),
        other => Err(ShellError::type_error(format!(
            "can't evaluate: {}",
            other
        ))),
    }
}

/// Context methods accept their target either as the receiver or as a
/// leading argument
pub(crate) fn target_and_args(r: &Registers, args: &Cell) -> ShellResult<(Cell, Cell)> {
    if args.car().is_context() {
        return Ok((args.car(), args.cdr()));
    }
    let binding = current_binding(r)?;
    Ok((binding.receiver_or_null(), args.clone()))
}
