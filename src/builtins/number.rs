// ABOUTME: Conversions, arithmetic, and relations over the numeric tower

use super::{args_vec, method, ret};
use crate::cell::{Cell, Number};
use crate::error::{ShellError, ShellResult};
use crate::registers::Registers;
use crate::scope::Scope;
use crate::task::Task;
use num_traits::ToPrimitive;
use std::cmp::Ordering;
use std::sync::Arc;

pub fn register(scope: &Arc<Scope>) {
    method(scope, "integer", c_integer);
    method(scope, "float", c_float);
    method(scope, "rational", c_rational);
    method(scope, "string", c_string);
    method(scope, "symbol", c_symbol);
    method(scope, "status", c_status);
    method(scope, "boolean", c_boolean);

    method(scope, "add", a_add);
    method(scope, "sub", a_sub);
    method(scope, "mul", a_mul);
    method(scope, "div", a_div);
    method(scope, "mod", a_mod);

    method(scope, "eq", r_eq);
    method(scope, "ne", r_ne);
    method(scope, "lt", r_lt);
    method(scope, "gt", r_gt);
    method(scope, "le", r_le);
    method(scope, "ge", r_ge);
}

// ============================================================================
// Conversions
// ============================================================================

fn c_integer(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let n = args.car().to_number()?;
    let v = match n {
        Number::Int(_) => n.to_cell(),
        Number::Rational(q) => Number::Int(q.to_integer()).to_cell(),
        Number::Float(f) => Cell::int(f as i64),
    };
    ret(r, v)
}

fn c_float(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let f = match args.car().to_number()? {
        Number::Float(f) => f,
        Number::Int(v) => v.to_f64().unwrap_or(f64::NAN),
        Number::Rational(v) => v.to_f64().unwrap_or(f64::NAN),
    };
    ret(r, Cell::Float(f))
}

fn c_rational(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let n = args.car().to_number()?;
    let v = match n {
        Number::Int(i) => Cell::Rational(Arc::new(num_rational::BigRational::from_integer(i))),
        Number::Rational(q) => Cell::Rational(Arc::new(q)),
        Number::Float(_) => {
            return Err(ShellError::type_error("rational: float operand"));
        }
    };
    ret(r, v)
}

fn c_string(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = Cell::str(&args.car().raw());
    ret(r, v)
}

fn c_symbol(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = Cell::sym(&args.car().raw());
    ret(r, v)
}

fn c_status(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let n = args.car().to_number()?;
    let v = match n {
        Number::Int(i) => Cell::status(i.to_i64().unwrap_or(1)),
        _ => return Err(ShellError::type_error("status: integer required")),
    };
    ret(r, v)
}

fn c_boolean(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = Cell::Bool(args.car().is_true());
    ret(r, v)
}

// ============================================================================
// Arithmetic
// ============================================================================

fn fold(
    args: Cell,
    op: fn(Number, Number) -> ShellResult<Number>,
) -> ShellResult<Cell> {
    let items = args_vec(&args);
    let mut iter = items.iter();
    let first = iter
        .next()
        .ok_or_else(|| ShellError::type_error("expected at least 1 argument"))?;
    let mut acc = first.to_number()?;
    for item in iter {
        acc = op(acc, item.to_number()?)?;
    }
    Ok(acc.to_cell())
}

fn a_add(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = fold(args, |a, b| Ok(a.add(b)))?;
    ret(r, v)
}

fn a_sub(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = fold(args, |a, b| Ok(a.sub(b)))?;
    ret(r, v)
}

fn a_mul(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = fold(args, |a, b| Ok(a.mul(b)))?;
    ret(r, v)
}

fn a_div(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = fold(args, |a, b| a.div(b))?;
    ret(r, v)
}

fn a_mod(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = fold(args, |a, b| a.rem(b))?;
    ret(r, v)
}

// ============================================================================
// Relations
// ============================================================================

/// Equality: numeric when both sides coerce, textual for atoms, identity
/// for everything else
pub fn cells_equal(a: &Cell, b: &Cell) -> bool {
    if let (Ok(x), Ok(y)) = (a.to_number(), b.to_number()) {
        return x.compare(&y) == Ordering::Equal;
    }
    if a.is_atom() && b.is_atom() {
        return a.raw() == b.raw();
    }
    a.same(b)
}

fn chain(args: Cell, keep: fn(Ordering) -> bool) -> ShellResult<Cell> {
    let items = args_vec(&args);
    if items.len() < 2 {
        return Err(ShellError::type_error("expected at least 2 arguments"));
    }
    for pair in items.windows(2) {
        let a = pair[0].to_number()?;
        let b = pair[1].to_number()?;
        if !keep(a.compare(&b)) {
            return Ok(Cell::Bool(false));
        }
    }
    Ok(Cell::Bool(true))
}

fn r_eq(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let items = args_vec(&args);
    if items.len() < 2 {
        return Err(ShellError::type_error("expected at least 2 arguments"));
    }
    let equal = items.windows(2).all(|w| cells_equal(&w[0], &w[1]));
    ret(r, Cell::Bool(equal))
}

fn r_ne(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let items = args_vec(&args);
    if items.len() < 2 {
        return Err(ShellError::type_error("expected at least 2 arguments"));
    }
    let equal = items.windows(2).all(|w| cells_equal(&w[0], &w[1]));
    ret(r, Cell::Bool(!equal))
}

fn r_lt(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = chain(args, |o| o == Ordering::Less)?;
    ret(r, v)
}

fn r_gt(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = chain(args, |o| o == Ordering::Greater)?;
    ret(r, v)
}

fn r_le(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = chain(args, |o| o != Ordering::Greater)?;
    ret(r, v)
}

fn r_ge(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = chain(args, |o| o != Ordering::Less)?;
    ret(r, v)
}
