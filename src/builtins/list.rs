// ABOUTME: Pair and list surgery

use super::{args_vec, method, ret};
use crate::cell::{cons, list_of, Cell};
use crate::error::ShellResult;
use crate::registers::Registers;
use crate::scope::Scope;
use crate::task::Task;
use std::sync::Arc;

pub fn register(scope: &Arc<Scope>) {
    method(scope, "cons", l_cons);
    method(scope, "car", l_car);
    method(scope, "cdr", l_cdr);
    method(scope, "set-car", l_set_car);
    method(scope, "set-cdr", l_set_cdr);
    method(scope, "list", l_list);
    method(scope, "length", l_length);
    method(scope, "append", l_append);
    method(scope, "reverse", l_reverse);
}

fn l_cons(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, cons(args.car(), args.cadr()))
}

fn l_car(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = args.car().as_pair()?.car();
    ret(r, v)
}

fn l_cdr(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let v = args.car().as_pair()?.cdr();
    ret(r, v)
}

/// Mutates the pair in place; yields the pair's cdr
fn l_set_car(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let target = args.car();
    let pair = target.as_pair()?;
    pair.set_car(args.cadr());
    let v = pair.cdr();
    ret(r, v)
}

/// Mutates the pair in place; yields the pair's car
fn l_set_cdr(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let target = args.car();
    let pair = target.as_pair()?;
    pair.set_cdr(args.cadr());
    let v = pair.car();
    ret(r, v)
}

fn l_list(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    ret(r, args)
}

fn l_length(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let mut n: i64 = 0;
    let mut rest = args.car();
    loop {
        let p = match rest {
            Cell::Pair(p) => p,
            _ => break,
        };
        n += 1;
        rest = p.cdr();
    }
    ret(r, Cell::int(n))
}

fn l_append(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let mut items = Vec::new();
    for list in args_vec(&args) {
        items.extend(args_vec(&list));
    }
    ret(r, list_of(&items))
}

fn l_reverse(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let mut items = args_vec(&args.car());
    items.reverse();
    ret(r, list_of(&items))
}
