// ABOUTME: The evaluator: a state-tag dispatcher over the task's stack

use crate::binding::BindingKind;
use crate::cell::{cons, sym, Cell, Continuation};
use crate::error::{ShellError, ShellResult};
use crate::expand;
use crate::registers::*;
use crate::scope::{expose, resolve, Env, Scope};
use crate::task::Task;
use lazy_static::lazy_static;
use std::sync::Arc;

lazy_static! {
    // Identity-compared sentinel separating argv from the command cell on
    // the scratch
    static ref ARGV_MARKER: Cell = cons(Cell::Null, Cell::Null);
}

fn is_marker(c: &Cell) -> bool {
    c.same(&ARGV_MARKER)
}

/// Collect evaluated arguments down to the marker, restoring their order
fn pop_argv(r: &mut Registers) -> Cell {
    let mut argv = Cell::Null;
    loop {
        let top = r.scratch.car();
        if is_marker(&top) {
            r.scratch = r.scratch.cdr();
            break;
        }
        if r.scratch.is_null() {
            break;
        }
        argv = cons(top, argv);
        r.scratch = r.scratch.cdr();
    }
    argv
}

// ============================================================================
// The loop
// ============================================================================

/// Drive the machine until the task stops or the stack drains. Save frames
/// restore on sight; operation tags dispatch through `step`, which may
/// traverse several states before yielding.
pub fn run(t: &Arc<Task>, r: &mut Registers) -> ShellResult<()> {
    while t.runnable() && !r.stack.is_null() {
        let tag = match r.state() {
            Some(tag) => tag,
            None => {
                return Err(ShellError::type_error(format!(
                    "broken stack: {}",
                    r.stack
                )))
            }
        };
        if tag < SAVE_MAX {
            r.remove_state(true);
            continue;
        }
        if step(t, r, tag)? {
            continue;
        }
        r.remove_state(false);
    }
    Ok(())
}

/// Evaluate one command against the current registers, resetting the
/// scratch and stack first. This is the unit the top level deals in.
pub fn eval_command(t: &Arc<Task>, r: &mut Registers, command: Cell) -> ShellResult<Cell> {
    r.code = command;
    r.scratch = cons(Cell::Null, Cell::Null);
    r.stack = Cell::Null;
    r.new_states(&[PS_EVAL_COMMAND]);
    run(t, r)?;
    Ok(r.scratch.car())
}

/// The recover barrier: a failure becomes an `oh:` line and an
/// unsuccessful status instead of ending the session
pub fn eval_command_recover(t: &Arc<Task>, r: &mut Registers, command: Cell) -> (Cell, bool) {
    match eval_command(t, r, command) {
        Ok(v) => (v, true),
        Err(e) => {
            println!("oh: {}", e);
            (Cell::status(1), false)
        }
    }
}

// ============================================================================
// State dispatch
// ============================================================================

/// Execute one operation tag; `Ok(true)` means the states on the stack
/// were rearranged and the top must not be popped
fn step(t: &Arc<Task>, r: &mut Registers, entry: i64) -> ShellResult<bool> {
    let mut state = entry;
    loop {
        match state {
            PS_CHANGE_CONTEXT => {
                r.dynamic = None;
                r.lexical = r.scratch.car();
                r.scratch_drop();
                return Ok(false);
            }

            PS_EVAL_BLOCK => {
                if r.code.is_null() {
                    r.scratch_drop();
                    return Ok(false);
                }
                if !r.code.is_pair() {
                    return Err(ShellError::type_error(format!(
                        "can't evaluate: {}",
                        r.code
                    )));
                }
                if r.code.cdr().is_pair() {
                    r.new_states(&[SAVE_CDR_CODE, PS_EVAL_COMMAND]);
                } else {
                    r.replace_states(&[PS_EVAL_COMMAND]);
                }
                r.code = r.code.car();
                r.scratch_drop();
                state = PS_EVAL_COMMAND;
            }

            PS_EVAL_COMMAND => {
                if r.code.is_null() {
                    r.scratch_push(Cell::Null);
                    return Ok(false);
                }
                if !r.code.is_pair() {
                    return Err(ShellError::type_error(format!(
                        "can't evaluate: {}",
                        r.code
                    )));
                }
                r.replace_states(&[PS_EXEC_COMMAND, SAVE_CDR_CODE, PS_EVAL_ELEMENT]);
                r.code = r.code.car();
                state = PS_EVAL_ELEMENT;
            }

            PS_EXEC_COMMAND => {
                match r.scratch.car() {
                    Cell::Symbol(_) | Cell::Str(_) => {
                        // Not a binding: hand the whole command to the
                        // external-command thunk
                        r.scratch_push(t.runtime().external_binding());
                        r.replace_states(&[PS_EXEC_BUILTIN, PS_EVAL_ARGUMENTS_BUILTIN]);
                        r.scratch_push(ARGV_MARKER.clone());
                        state = PS_EVAL_ARGUMENTS_BUILTIN;
                    }
                    Cell::Binding(b) => match b.r.kind {
                        BindingKind::Builtin => {
                            r.replace_states(&[PS_EXEC_BUILTIN, PS_EVAL_ARGUMENTS_BUILTIN]);
                            r.scratch_push(ARGV_MARKER.clone());
                            state = PS_EVAL_ARGUMENTS_BUILTIN;
                        }
                        BindingKind::Method => {
                            r.replace_states(&[PS_EXEC_METHOD, PS_EVAL_ARGUMENTS]);
                            r.scratch_push(ARGV_MARKER.clone());
                            state = PS_EVAL_ARGUMENTS;
                        }
                        BindingKind::Syntax => {
                            r.replace_states(&[PS_EXEC_SYNTAX]);
                            state = PS_EXEC_SYNTAX;
                        }
                    },
                    Cell::Continuation(_) => {
                        r.replace_states(&[PS_RETURN, PS_EVAL_ARGUMENTS]);
                        r.scratch_push(ARGV_MARKER.clone());
                        state = PS_EVAL_ARGUMENTS;
                    }
                    other => {
                        return Err(ShellError::type_error(format!(
                            "can't evaluate: {}",
                            other
                        )));
                    }
                }
            }

            PS_EVAL_ARGUMENTS | PS_EVAL_ARGUMENTS_BUILTIN => {
                if r.code.is_null() {
                    return Ok(false);
                }
                let element = if state == PS_EVAL_ARGUMENTS {
                    PS_EVAL_ELEMENT
                } else {
                    PS_EVAL_ELEMENT_BUILTIN
                };
                r.new_states(&[SAVE_CDR_CODE, element]);
                r.code = r.code.car();
                state = element;
            }

            PS_EVAL_ELEMENT | PS_EVAL_ELEMENT_BUILTIN | PS_EVAL_MEMBER => {
                match r.code.clone() {
                    Cell::Null => {
                        r.scratch_push(Cell::Null);
                        return Ok(false);
                    }
                    Cell::Pair(p) => {
                        if p.cdr().is_atom() {
                            // Member access: evaluate the receiver, switch
                            // context, resolve the member, then restore
                            r.replace_states(&[
                                SAVE_DYNAMIC | SAVE_LEXICAL,
                                PS_EVAL_MEMBER,
                                PS_CHANGE_CONTEXT,
                                SAVE_CDR_CODE,
                                PS_EVAL_ELEMENT,
                            ]);
                            r.code = p.car();
                            state = PS_EVAL_ELEMENT;
                        } else {
                            r.replace_states(&[PS_EVAL_COMMAND]);
                            state = PS_EVAL_COMMAND;
                        }
                    }
                    Cell::Symbol(name) => {
                        lookup(t, r, name, state)?;
                        return Ok(false);
                    }
                    literal => {
                        r.scratch_push(literal);
                        return Ok(false);
                    }
                }
            }

            PS_EXEC_BUILTIN | PS_EXEC_METHOD => {
                let mut argv = pop_argv(r);
                if state == PS_EXEC_BUILTIN {
                    argv = expand::expand_argv(argv)?;
                }
                r.code = argv;
                state = PS_EXEC_SYNTAX;
            }

            PS_EXEC_SYNTAX => {
                let binding = match r.scratch.car() {
                    Cell::Binding(b) => b,
                    other => {
                        return Err(ShellError::type_error(format!(
                            "can't evaluate: {}",
                            other
                        )));
                    }
                };
                let applier = binding.r.applier;
                return applier(t, r, r.code.clone());
            }

            PS_EXEC_IF => {
                let truthy = r.scratch.car().is_true();
                r.code = if truthy {
                    non_atom_prefix(&r.code)
                } else {
                    else_branch(&r.code)?
                };
                r.replace_states(&[PS_EVAL_BLOCK]);
                state = PS_EVAL_BLOCK;
            }

            PS_EXEC_WHILE_TEST => {
                // Drop the previous iteration's result (or the binding on
                // first entry) so the loop does not grow the scratch
                r.scratch_drop();
                r.replace_states(&[PS_EXEC_WHILE_BODY, SAVE_CODE, PS_EVAL_ELEMENT]);
                r.code = r.code.car();
                state = PS_EVAL_ELEMENT;
            }

            PS_EXEC_WHILE_BODY => {
                if r.scratch.car().is_true() {
                    r.replace_states(&[PS_EXEC_WHILE_TEST, SAVE_CODE, PS_EVAL_BLOCK]);
                    r.code = non_atom_prefix(&r.code.cdr());
                    state = PS_EVAL_BLOCK;
                } else {
                    // Same false-path rule as `if`: skip the body and
                    // demand `else` or end. Running off the end finishes
                    // the loop; an else branch runs and the test is asked
                    // again afterward.
                    let branch = else_branch(&r.code.cdr())?;
                    if branch.is_null() {
                        return Ok(false);
                    }
                    r.replace_states(&[PS_EXEC_WHILE_TEST, SAVE_CODE, PS_EVAL_BLOCK]);
                    r.code = branch;
                    state = PS_EVAL_BLOCK;
                }
            }

            PS_EXEC_DEFINE | PS_EXEC_PUBLIC => {
                let name = name_symbol(t, r, &r.code.clone())?;
                let value = r.scratch.car();
                let scope = scope_of(&r.lexical)?;
                if state == PS_EXEC_DEFINE {
                    scope.define(name, value);
                } else {
                    scope.public(name, value);
                }
                return Ok(false);
            }

            PS_EXEC_DYNAMIC | PS_EXEC_SETENV => {
                let name = name_symbol(t, r, &r.code.clone())?;
                let value = r.scratch.car();
                let env = r
                    .dynamic
                    .clone()
                    .ok_or_else(|| ShellError::type_error("no dynamic context"))?;
                if state == PS_EXEC_SETENV {
                    let key = name.text().trim_start_matches('$').to_string();
                    std::env::set_var(key, value.raw());
                }
                env.add(name, value);
                return Ok(false);
            }

            PS_EXEC_SET => {
                let name = match r.code.as_symbol() {
                    Some(s) => s.clone(),
                    None => {
                        return Err(ShellError::resolution(format!(
                            "cannot assign to: {}",
                            r.code
                        )));
                    }
                };
                let value = r.scratch.car();
                match resolve(&r.lexical, r.dynamic.as_ref(), &name)? {
                    Some(reference) => reference.set(value),
                    None => {
                        return Err(ShellError::resolution(format!(
                            "'{}' undefined",
                            name.text()
                        )));
                    }
                }
                return Ok(false);
            }

            PS_EXEC_SPLICE => {
                let head = r.scratch.car();
                if head.is_pair() {
                    r.scratch_drop();
                    let mut rest = head;
                    loop {
                        let p = match rest {
                            Cell::Pair(p) => p,
                            _ => break,
                        };
                        r.scratch_push(p.car());
                        rest = p.cdr();
                    }
                }
                return Ok(false);
            }

            PS_RETURN => {
                let argv = pop_argv(r);
                let continuation = match r.scratch.car() {
                    Cell::Continuation(k) => k,
                    other => {
                        return Err(ShellError::type_error(format!(
                            "can't evaluate: {}",
                            other
                        )));
                    }
                };
                // The captured scratch still carries the captor's binding
                // at its head; the result takes that slot
                r.scratch = cons(argv.car(), continuation.scratch.cdr());
                r.stack = continuation.stack.clone();
                return Ok(true);
            }

            other => {
                return Err(ShellError::type_error(format!(
                    "unknown machine state: {}",
                    other
                )));
            }
        }
    }
}

// ============================================================================
// Symbol lookup
// ============================================================================

/// Resolve a symbol per the evaluation mode. Unresolved symbols evaluate
/// to themselves unless strict mode objects; in builtin mode only simple
/// values survive as themselves (expansion needs the symbol otherwise).
fn lookup(t: &Arc<Task>, r: &mut Registers, name: crate::cell::Sym, mode: i64) -> ShellResult<()> {
    match resolve(&r.lexical, r.dynamic.as_ref(), &name)? {
        None => {
            if strict(t, r) && crate::cell::parse_number(name.text()).is_none() {
                return Err(ShellError::resolution(format!(
                    "'{}' undefined",
                    name.text()
                )));
            }
            r.scratch_push(Cell::Symbol(name));
        }
        Some(reference) => {
            let value = reference.get();
            if mode == PS_EVAL_ELEMENT_BUILTIN && !value.is_simple() {
                r.scratch_push(Cell::Symbol(name));
            } else if let Cell::Binding(b) = &value {
                r.scratch_push(Cell::Binding(b.bind(r.lexical.clone())));
            } else {
                r.scratch_push(value);
            }
        }
    }
    Ok(())
}

/// The strict-mode probe: resolving `strict` may itself fail, in which
/// case the answer is simply "no"
pub fn strict(_t: &Arc<Task>, r: &Registers) -> bool {
    match resolve(&r.lexical, r.dynamic.as_ref(), &sym("strict")) {
        Ok(Some(reference)) => reference.get().is_true(),
        _ => false,
    }
}

// ============================================================================
// Helpers shared with the syntax appliers
// ============================================================================

fn name_symbol(t: &Arc<Task>, r: &Registers, code: &Cell) -> ShellResult<crate::cell::Sym> {
    let name = match code.as_symbol() {
        Some(s) => s.clone(),
        None => {
            return Err(ShellError::resolution(format!(
                "illegal variable name: {}",
                code
            )));
        }
    };
    if strict(t, r) && crate::cell::parse_number(name.text()).is_some() {
        return Err(ShellError::resolution(format!(
            "illegal variable name: {}",
            name.text()
        )));
    }
    Ok(name)
}

/// The underlying scope of the current lexical context
pub fn scope_of(lexical: &Cell) -> ShellResult<Arc<Scope>> {
    expose(lexical)
}

/// Elements up to the first atom: the body of an `if` or `while`
fn non_atom_prefix(code: &Cell) -> Cell {
    let mut items = Vec::new();
    let mut rest = code.clone();
    loop {
        let p = match rest {
            Cell::Pair(p) => p,
            _ => break,
        };
        let head = p.car();
        if head.is_atom() {
            break;
        }
        items.push(head);
        rest = p.cdr();
    }
    crate::cell::list_of(&items)
}

/// Skip the body; expect `else` (or nothing) and return the else branch
fn else_branch(code: &Cell) -> ShellResult<Cell> {
    let mut rest = code.clone();
    while rest.is_pair() && !rest.car().is_atom() {
        rest = rest.cdr();
    }
    if rest.is_null() {
        return Ok(Cell::Null);
    }
    if rest.car().raw() != "else" {
        return Err(ShellError::resolution(format!(
            "expected 'else', found: {}",
            rest.car()
        )));
    }
    let branch = rest.cdr();
    // An `else if ...` chain arrives as a bare command; rewrap it
    if branch.car().is_atom() && !branch.is_null() {
        Ok(cons(branch, Cell::Null))
    } else {
        Ok(branch)
    }
}

// ============================================================================
// Closure application
// ============================================================================

/// The applier for in-language closures. Installs a fresh block, binds
/// params (a list-shaped param takes the rest), the label, and `return`,
/// then hands the body to the block evaluator.
pub fn apply(t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let binding = match r.scratch.car() {
        Cell::Binding(b) => b,
        other => {
            return Err(ShellError::type_error(format!(
                "can't evaluate: {}",
                other
            )));
        }
    };

    let caller_lexical = r.lexical.clone();

    r.replace_states(&[SAVE_DYNAMIC | SAVE_LEXICAL, PS_EVAL_BLOCK]);

    // Where `return` lands: beneath the block tag sits the save frame
    // that reinstates the caller's dynamic and lexical registers, so a
    // continuation jump restores them exactly like a normal completion
    let continuation = Cell::Continuation(Arc::new(Continuation {
        scratch: r.scratch.clone(),
        stack: r.stack.cdr(),
    }));

    let capture = expose(&binding.r.scope)?;
    let block_scope = Scope::child(&capture);

    if binding.r.kind == BindingKind::Syntax {
        // Syntax keeps the caller's dynamics and can reach the caller's
        // context to evaluate the raw code it was handed
        block_scope.public(sym("caller"), caller_lexical);
    } else {
        let caller_env = r
            .dynamic
            .clone()
            .ok_or_else(|| ShellError::type_error("no dynamic context"))?;
        r.dynamic = Some(Env::child(&caller_env));
    }
    r.lexical = Cell::Scope(block_scope.clone());

    // Positional parameters; a list-shaped name takes the remaining argv
    let mut params = binding.r.params.clone();
    let mut argv = args;
    loop {
        let p = match params {
            Cell::Pair(p) => p,
            _ => break,
        };
        match p.car() {
            Cell::Pair(rest_name) => {
                if let Some(name) = rest_name.car().as_symbol() {
                    block_scope.public(name.clone(), argv.clone());
                }
                argv = Cell::Null;
            }
            Cell::Symbol(name) => {
                block_scope.public(name, argv.car());
                argv = argv.cdr();
            }
            _ => {}
        }
        params = p.cdr();
    }

    if let Some(label) = binding.r.label.as_symbol() {
        block_scope.public(label.clone(), binding.receiver_or_null());
    }
    block_scope.public(sym("return"), continuation);

    r.code = binding.r.body.clone();
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_atom_prefix_stops_at_else() {
        let body = cons(Cell::sym("x"), Cell::Null);
        let code = crate::cell::list_of(&[
            body.clone(),
            Cell::sym("else"),
            cons(Cell::sym("y"), Cell::Null),
        ]);
        assert_eq!(format!("{}", non_atom_prefix(&code)), "((x))");
    }

    #[test]
    fn test_else_branch_requires_keyword() {
        let code = crate::cell::list_of(&[
            cons(Cell::sym("x"), Cell::Null),
            Cell::sym("otherwise"),
            cons(Cell::sym("y"), Cell::Null),
        ]);
        assert!(else_branch(&code).is_err());

        let code = crate::cell::list_of(&[cons(Cell::sym("x"), Cell::Null)]);
        assert!(else_branch(&code).expect("empty else is fine").is_null());
    }
}
