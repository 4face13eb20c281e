// ABOUTME: Syntax forms: control flow, definition, closures, and spawn

use super::{ret, syntax_form};
use crate::binding::{Binding, BindingKind, Ref};
use crate::cell::Cell;
use crate::error::{ShellError, ShellResult};
use crate::eval;
use crate::registers::*;
use crate::scope::{expose, Env, Scope};
use crate::task::Task;
use std::sync::Arc;

pub fn register(scope: &Arc<Scope>) {
    syntax_form(scope, "block", s_block);
    syntax_form(scope, "if", s_if);
    syntax_form(scope, "while", s_while);
    syntax_form(scope, "set", s_set);
    syntax_form(scope, "define", s_define);
    syntax_form(scope, "public", s_public);
    syntax_form(scope, "dynamic", s_dynamic);
    syntax_form(scope, "setenv", s_setenv);
    syntax_form(scope, "spawn", s_spawn);
    syntax_form(scope, "splice", s_splice);
    syntax_form(scope, "quote", s_quote);
    syntax_form(scope, "make-env", s_make_env);
    syntax_form(scope, "make-scope", s_make_scope);
    syntax_form(scope, "method", s_method);
    syntax_form(scope, "syntax", s_syntax);
    syntax_form(scope, "builtin", s_builtin);
}

// ============================================================================
// Blocks and control flow
// ============================================================================

/// `block { ... }` — a fresh (dynamic, lexical) pair for the body
fn s_block(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    r.replace_states(&[SAVE_DYNAMIC | SAVE_LEXICAL, PS_EVAL_BLOCK]);
    let caller_env = r
        .dynamic
        .clone()
        .ok_or_else(|| ShellError::type_error("no dynamic context"))?;
    r.dynamic = Some(Env::child(&caller_env));
    let scope = expose(&r.lexical)?;
    r.lexical = Cell::Scope(Scope::child(&scope));
    r.code = args;
    Ok(true)
}

/// `if test { ... } [else ...]`
fn s_if(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    r.scratch_drop();
    r.replace_states(&[PS_EXEC_IF, SAVE_CDR_CODE, PS_EVAL_ELEMENT]);
    r.code = args.car();
    Ok(true)
}

/// `while test { ... }` — the test re-evaluates before every iteration
fn s_while(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    r.replace_states(&[PS_EXEC_WHILE_TEST]);
    Ok(true)
}

// ============================================================================
// Definition forms
// ============================================================================

/// Evaluate the value expression, then run `exec` with the name in the
/// code register
fn assign_form(r: &mut Registers, args: Cell, exec: i64, value_expr: Cell) -> ShellResult<bool> {
    r.scratch_drop();
    r.code = args;
    r.replace_states(&[exec, SAVE_CAR_CODE, PS_EVAL_ELEMENT]);
    r.code = value_expr;
    Ok(true)
}

/// The value expression of `name = v` or `name v`
fn value_expr(args: &Cell) -> Cell {
    let second = args.cadr();
    if second.raw() == "=" && second.as_symbol().is_some() {
        args.cdr().cadr()
    } else {
        second
    }
}

fn s_define(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let value = value_expr(&args);
    assign_form(r, args, PS_EXEC_DEFINE, value)
}

fn s_public(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let value = value_expr(&args);
    assign_form(r, args, PS_EXEC_PUBLIC, value)
}

fn s_dynamic(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let value = value_expr(&args);
    assign_form(r, args, PS_EXEC_DYNAMIC, value)
}

fn s_setenv(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let value = value_expr(&args);
    assign_form(r, args, PS_EXEC_SETENV, value)
}

/// `set name = v` — assignment to an existing binding only
fn s_set(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let value = value_expr(&args);
    assign_form(r, args, PS_EXEC_SET, value)
}

// ============================================================================
// Tasks and splicing
// ============================================================================

/// `spawn { ... }` — run the block as a concurrent child task
fn s_spawn(t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let dynamic = r
        .dynamic
        .clone()
        .ok_or_else(|| ShellError::type_error("no dynamic context"))?;
    let child = t.spawn_child(&dynamic, &r.lexical, args)?;
    ret(r, Cell::Task(child))
}

/// `splice l` — the elements of l become separate arguments
fn s_splice(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    r.scratch_drop();
    r.replace_states(&[PS_EXEC_SPLICE, PS_EVAL_ELEMENT]);
    r.code = args.car();
    Ok(true)
}

fn s_quote(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, args.car())
}

fn s_make_env(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let caller_env = r
        .dynamic
        .clone()
        .ok_or_else(|| ShellError::type_error("no dynamic context"))?;
    let env = Env::child(&caller_env);
    ret(r, Cell::Env(env))
}

fn s_make_scope(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let scope = Scope::child(&expose(&r.lexical)?);
    ret(r, Cell::Scope(scope))
}

// ============================================================================
// Closure builders
// ============================================================================

/// `method [label] (params) as body...` and friends
fn closure(r: &mut Registers, args: Cell, kind: BindingKind) -> ShellResult<bool> {
    let mut label = Cell::Null;
    let mut params = args.car();
    let mut code = args;
    while code.is_pair() && code.cadr().raw() != "as" {
        label = params;
        params = code.cadr();
        code = code.cdr();
    }
    if code.cdr().is_null() {
        return Err(ShellError::resolution("expected 'as'"));
    }
    let body = code.cdr().cdr();

    let reference = Ref::closure(
        kind,
        eval::apply,
        body,
        params,
        label.clone(),
        r.lexical.clone(),
    );
    let binding = if label.is_null() {
        Binding::unbound(reference)
    } else {
        Binding::bound(reference, r.lexical.clone())
    };
    ret(r, Cell::Binding(binding))
}

fn s_method(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    closure(r, args, BindingKind::Method)
}

fn s_syntax(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    closure(r, args, BindingKind::Syntax)
}

fn s_builtin(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    closure(r, args, BindingKind::Builtin)
}
