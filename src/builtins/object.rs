// ABOUTME: Context introspection: eval, interpolate, slots, child, clone

use super::{context_method, current_binding, ret, target_and_args};
use crate::cell::{sym, Cell};
use crate::error::{ShellError, ShellResult};
use crate::registers::*;
use crate::scope::{expose, resolve, Scope};
use crate::task::Task;
use std::sync::Arc;

pub fn register(scope: &Arc<Scope>) {
    context_method(scope, "eval", m_eval);
    context_method(scope, "interpolate", m_interpolate);
    context_method(scope, "get-slot", m_get_slot);
    context_method(scope, "set-slot", m_set_slot);
    context_method(scope, "has", m_has);
    context_method(scope, "unset", m_unset);
    context_method(scope, "child", m_child);
    context_method(scope, "clone", m_clone);
    context_method(scope, "context", m_context);
}

/// Evaluate a value as code, in the receiver's context
fn m_eval(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let binding = current_binding(r)?;
    let target = binding.receiver_or_null();
    let code = args.car();
    r.scratch_drop();
    let next = if code.is_pair() || code.is_null() {
        PS_EVAL_COMMAND
    } else {
        PS_EVAL_ELEMENT
    };
    r.replace_states(&[SAVE_DYNAMIC | SAVE_LEXICAL, next]);
    if target.is_context() {
        r.lexical = target;
    }
    r.code = code;
    Ok(true)
}

/// Expand `${name}` via lexical+dynamic resolution; `$$` is a literal `$`
fn m_interpolate(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let text = match args.car() {
        Cell::Str(s) => s.to_string(),
        Cell::Symbol(s) => s.text().to_string(),
        other => {
            return Err(ShellError::type_error(format!("not a string: {}", other)));
        }
    };
    let expanded = interpolate_text(r, &text)?;
    ret(r, Cell::str(&expanded))
}

fn interpolate_text(r: &Registers, text: &str) -> ShellResult<String> {
    let mut out = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(ShellError::parse("unterminated '${' in string"));
                        }
                    }
                }
                match lookup_either(r, &name)? {
                    Some(value) => out.push_str(&value.raw()),
                    None => {
                        out.push_str("${");
                        out.push_str(&name);
                        out.push('}');
                    }
                }
            }
            _ => out.push('$'),
        }
    }
    Ok(out)
}

/// `${cwd}` finds `$cwd` as well as a plain `cwd` binding
fn lookup_either(r: &Registers, name: &str) -> ShellResult<Option<Cell>> {
    if let Some(reference) = resolve(
        &r.lexical,
        r.dynamic.as_ref(),
        &sym(&format!("${}", name)),
    )? {
        return Ok(Some(reference.get()));
    }
    Ok(resolve(&r.lexical, r.dynamic.as_ref(), &sym(name))?.map(|reference| reference.get()))
}

// ============================================================================
// Slots
// ============================================================================

fn slot_name(args: &Cell) -> ShellResult<crate::cell::Sym> {
    match args.car() {
        Cell::Symbol(s) => Ok(s),
        Cell::Str(s) => Ok(sym(&s)),
        other => Err(ShellError::type_error(format!(
            "not a slot name: {}",
            other
        ))),
    }
}

fn m_get_slot(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let (target, rest) = target_and_args(r, &args)?;
    let name = slot_name(&rest)?;
    match resolve(&target, None, &name)? {
        Some(reference) => {
            let v = reference.get();
            ret(r, v)
        }
        None => Err(ShellError::resolution(format!(
            "'{}' undefined",
            name.text()
        ))),
    }
}

fn m_set_slot(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let (target, rest) = target_and_args(r, &args)?;
    let name = slot_name(&rest)?;
    let value = rest.cadr();
    match resolve(&target, None, &name)? {
        Some(reference) => reference.set(value.clone()),
        None => expose(&target)?.public(name, value.clone()),
    }
    ret(r, value)
}

fn m_has(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let (target, rest) = target_and_args(r, &args)?;
    let name = slot_name(&rest)?;
    let found = resolve(&target, None, &name)?.is_some();
    ret(r, Cell::Bool(found))
}

fn m_unset(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let (target, rest) = target_and_args(r, &args)?;
    let name = slot_name(&rest)?;
    let removed = expose(&target)?.remove(&name);
    ret(r, Cell::Bool(removed))
}

// ============================================================================
// Derivation
// ============================================================================

fn m_child(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let (target, _) = target_and_args(r, &args)?;
    let scope = Scope::child(&expose(&target)?);
    ret(r, Cell::Object(scope))
}

fn m_clone(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let (target, _) = target_and_args(r, &args)?;
    let scope = expose(&target)?.duplicate();
    ret(r, Cell::Object(scope))
}

fn m_context(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let v = r.lexical.clone();
    ret(r, v)
}
