// ABOUTME: Type predicates

use super::{method, ret};
use crate::cell::Cell;
use crate::error::ShellResult;
use crate::registers::Registers;
use crate::scope::Scope;
use crate::task::Task;
use std::sync::Arc;

pub fn register(scope: &Arc<Scope>) {
    method(scope, "is-null", p_null);
    method(scope, "is-pair", p_pair);
    method(scope, "is-atom", p_atom);
    method(scope, "is-symbol", p_symbol);
    method(scope, "is-string", p_string);
    method(scope, "is-number", p_number);
    method(scope, "is-boolean", p_boolean);
    method(scope, "is-status", p_status);
    method(scope, "is-object", p_object);
    method(scope, "is-conduit", p_conduit);
    method(scope, "is-task", p_task);
}

fn p_null(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, Cell::Bool(args.car().is_null()))
}

fn p_pair(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, Cell::Bool(args.car().is_pair()))
}

fn p_atom(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, Cell::Bool(args.car().is_atom()))
}

fn p_symbol(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, Cell::Bool(matches!(args.car(), Cell::Symbol(_))))
}

fn p_string(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, Cell::Bool(matches!(args.car(), Cell::Str(_))))
}

fn p_number(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let numeric = matches!(
        args.car(),
        Cell::Int(_) | Cell::Rational(_) | Cell::Float(_)
    );
    ret(r, Cell::Bool(numeric))
}

fn p_boolean(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, Cell::Bool(matches!(args.car(), Cell::Bool(_))))
}

fn p_status(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, Cell::Bool(matches!(args.car(), Cell::Status(_))))
}

fn p_object(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let object = matches!(args.car(), Cell::Scope(_) | Cell::Object(_));
    ret(r, Cell::Bool(object))
}

fn p_conduit(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, Cell::Bool(matches!(args.car(), Cell::Conduit(_))))
}

fn p_task(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, Cell::Bool(matches!(args.car(), Cell::Task(_))))
}
