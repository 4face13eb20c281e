// ABOUTME: The string context's method table

use super::args_vec;
use crate::binding::{Binding, BindingKind, Ref};
use crate::cell::{list_of, Cell};
use crate::error::{ShellError, ShellResult};
use crate::registers::Registers;
use crate::task::Task;
use num_traits::ToPrimitive;
use std::sync::Arc;

/// Member lookup for string cells: `"a,b"::split ","` and friends
pub fn member(name: &str, receiver: &Cell) -> Option<Cell> {
    let applier = match name {
        "join" => s_join,
        "split" => s_split,
        "sprintf" => s_sprintf,
        "substring" => s_substring,
        "to-list" => s_to_list,
        "length" => s_length,
        "match" => s_match,
        _ => return None,
    };
    Some(Cell::Binding(Binding::bound(
        Ref::native(BindingKind::Method, applier),
        receiver.clone(),
    )))
}

fn receiver_text(r: &Registers) -> ShellResult<String> {
    match r.scratch.car() {
        Cell::Binding(b) => match b.receiver_or_null() {
            Cell::Str(s) => Ok(s.to_string()),
            other => Err(ShellError::type_error(format!("not a string: {}", other))),
        },
        other => Err(ShellError::type_error(format!("not a string: {}", other))),
    }
}

fn finish(r: &mut Registers, v: Cell) -> ShellResult<bool> {
    r.scratch_replace(v);
    Ok(false)
}

/// The receiver is the separator; arguments (or one list argument) are
/// joined by their raw text
fn s_join(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let separator = receiver_text(r)?;
    let items = if args.cdr().is_null() && args.car().is_pair() {
        args_vec(&args.car())
    } else {
        args_vec(&args)
    };
    let joined: Vec<String> = items.iter().map(|c| c.raw()).collect();
    finish(r, Cell::str(&joined.join(&separator)))
}

fn s_split(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let text = receiver_text(r)?;
    let separator = args.car().raw();
    let parts: Vec<Cell> = if separator.is_empty() {
        text.chars().map(|c| Cell::str(&c.to_string())).collect()
    } else {
        text.split(&separator).map(Cell::str).collect()
    };
    finish(r, list_of(&parts))
}

/// A small formatter: `%s` raw text, `%d` integer, `%f` float, `%%`
fn s_sprintf(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let format = receiver_text(r)?;
    let mut values = args_vec(&args).into_iter();
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => {
                let v = values
                    .next()
                    .ok_or_else(|| ShellError::type_error("sprintf: not enough arguments"))?;
                out.push_str(&v.raw());
            }
            Some('d') => {
                let v = values
                    .next()
                    .ok_or_else(|| ShellError::type_error("sprintf: not enough arguments"))?;
                match v.to_number()? {
                    crate::cell::Number::Int(i) => out.push_str(&i.to_string()),
                    other => out.push_str(&format!("{}", other.to_cell())),
                }
            }
            Some('f') => {
                let v = values
                    .next()
                    .ok_or_else(|| ShellError::type_error("sprintf: not enough arguments"))?;
                let n = v.to_number()?;
                let f = match n {
                    crate::cell::Number::Float(f) => f,
                    crate::cell::Number::Int(i) => i.to_f64().unwrap_or(f64::NAN),
                    crate::cell::Number::Rational(q) => q.to_f64().unwrap_or(f64::NAN),
                };
                out.push_str(&format!("{}", f));
            }
            Some(other) => {
                return Err(ShellError::type_error(format!(
                    "sprintf: unknown verb '%{}'",
                    other
                )));
            }
            None => {
                return Err(ShellError::type_error("sprintf: trailing '%'"));
            }
        }
    }
    finish(r, Cell::str(&out))
}

/// Character-indexed substring: start, optional end
fn s_substring(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let text = receiver_text(r)?;
    let chars: Vec<char> = text.chars().collect();
    let start = index_arg(&args.car(), 0)?;
    let end = if args.cdr().is_null() {
        chars.len()
    } else {
        index_arg(&args.cadr(), chars.len())?
    };
    let start = start.min(chars.len());
    let end = end.clamp(start, chars.len());
    let slice: String = chars[start..end].iter().collect();
    finish(r, Cell::str(&slice))
}

fn index_arg(v: &Cell, default: usize) -> ShellResult<usize> {
    if v.is_null() {
        return Ok(default);
    }
    match v.to_number()? {
        crate::cell::Number::Int(i) => Ok(i.to_usize().unwrap_or(default)),
        _ => Err(ShellError::type_error("substring: integer index required")),
    }
}

fn s_to_list(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let text = receiver_text(r)?;
    let items: Vec<Cell> = text.chars().map(|c| Cell::str(&c.to_string())).collect();
    finish(r, list_of(&items))
}

fn s_length(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let text = receiver_text(r)?;
    finish(r, Cell::int(text.chars().count() as i64))
}

/// Glob-style pattern match against the receiver
fn s_match(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let text = receiver_text(r)?;
    let pattern = args.car().raw();
    let matched = glob::Pattern::new(&pattern)
        .map_err(|e| ShellError::os(format!("bad pattern: {}", e)))?
        .matches(&text);
    finish(r, Cell::Bool(matched))
}
