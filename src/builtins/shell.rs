// ABOUTME: Shell-facing commands: processes, jobs, conduits, stdio, files

use super::{builtin, method, ret};
use crate::cell::{sym, Cell};
use crate::conduit::{Channel, Conduit, Pipe};
use crate::error::{ShellError, ShellResult};
use crate::monitor;
use crate::parser;
use crate::registers::{Registers, PS_EVAL_BLOCK};
use crate::scope::{resolve, Scope};
use crate::task::Task;
use num_traits::ToPrimitive;
use std::sync::Arc;

pub fn register(scope: &Arc<Scope>) {
    builtin(scope, "cd", b_cd);
    builtin(scope, "exists", b_exists);
    builtin(scope, "run", b_run);

    method(scope, "wait", m_wait);
    method(scope, "exit", m_exit);
    method(scope, "fg", m_fg);
    method(scope, "jobs", m_jobs);
    method(scope, "module", m_module);
    method(scope, "source", m_source);

    method(scope, "pipe", m_pipe);
    method(scope, "channel", m_channel);
    method(scope, "write", m_write);
    method(scope, "read", m_read);
    method(scope, "read-line", m_read_line);
}

fn resolve_conduit(r: &Registers, name: &str) -> ShellResult<Arc<dyn Conduit>> {
    let value = match resolve(&r.lexical, r.dynamic.as_ref(), &sym(name))? {
        Some(reference) => reference.get(),
        None => {
            return Err(ShellError::resolution(format!("'{}' undefined", name)));
        }
    };
    Ok(value.as_conduit()?.clone())
}

// ============================================================================
// Processes and directories
// ============================================================================

/// Change directory and track it in `$cwd`; Status 0/1, never a failure
fn b_cd(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let target = if args.is_null() {
        std::env::var("HOME").unwrap_or_else(|_| "/".to_string())
    } else {
        args.car().raw()
    };
    if std::env::set_current_dir(&target).is_err() {
        return ret(r, Cell::status(1));
    }
    if let Ok(dir) = std::env::current_dir() {
        let dir = Cell::sym(&dir.to_string_lossy());
        match resolve(&r.lexical, r.dynamic.as_ref(), &sym("$cwd"))? {
            Some(reference) => reference.set(dir),
            None => {
                if let Some(env) = &r.dynamic {
                    env.add(sym("$cwd"), dir);
                }
            }
        }
    }
    ret(r, Cell::status(0))
}

/// True iff every path stats; an empty argv is false
fn b_exists(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    if args.is_null() {
        return ret(r, Cell::Bool(false));
    }
    let mut rest = args;
    loop {
        let p = match rest {
            Cell::Pair(p) => p,
            _ => break,
        };
        if std::fs::metadata(p.car().raw()).is_err() {
            return ret(r, Cell::Bool(false));
        }
        rest = p.cdr();
    }
    ret(r, Cell::Bool(true))
}

/// Force a command through the external path
fn b_run(t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    if args.is_null() {
        return Err(ShellError::type_error("run: expected a command"));
    }
    let status = t.external(r, args.car(), args.cdr())?;
    ret(r, status)
}

// ============================================================================
// Tasks and jobs
// ============================================================================

/// With no arguments, wait for every child. With task arguments, await
/// each and replace its argv slot with the task's result.
fn m_wait(t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    if args.is_null() {
        for child in t.children_snapshot() {
            child.join();
        }
        return ret(r, Cell::status(0));
    }
    let mut rest = args.clone();
    loop {
        let p = match rest {
            Cell::Pair(p) => p,
            _ => break,
        };
        let slot = p.car();
        let task = slot.as_task()?.clone();
        let result = task.join();
        p.set_car(result);
        rest = p.cdr();
    }
    ret(r, args)
}

/// Record the result and stop the task
fn m_exit(t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let value = args.car();
    t.stop();
    ret(r, value)
}

/// Move a suspended job to the foreground; a bad job number is a silent
/// no-op
fn m_fg(t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let runtime = t.runtime().clone();
    if !runtime.job_control() {
        return ret(r, Cell::Bool(false));
    }
    let number = if args.is_null() {
        None
    } else {
        match args.car().to_number()?.to_cell() {
            Cell::Int(n) => n.to_usize(),
            _ => None,
        }
    };
    let (_, job) = match runtime.take_job(number) {
        Some(found) => found,
        None => return ret(r, Cell::Bool(false)),
    };

    let (pgid, mode, command) = {
        let state = job.lock();
        (state.pgid, state.mode, state.command.clone())
    };
    println!("{}", command);

    runtime.set_foreground_job(job.clone());
    if let Some(mode) = &mode {
        runtime.restore_terminal_mode(mode);
    }
    runtime.give_terminal(pgid);
    // SAFETY: resuming a process group this shell created
    unsafe {
        libc::killpg(pgid, libc::SIGCONT);
    }

    let event = runtime.registrar().wait_for(pgid);
    runtime.take_terminal();
    runtime.reset_foreground_job();
    if monitor::stopped(event.status) {
        job.lock().mode = runtime.terminal_mode();
        runtime.add_stopped_job(&job);
    }
    ret(r, Cell::status(monitor::exit_code(event.status)))
}

fn m_jobs(t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let runtime = t.runtime();
    if !runtime.job_control() {
        return ret(r, Cell::Bool(false));
    }
    for (number, command) in runtime.job_listing() {
        println!("[{}] Stopped  {}", number, command);
    }
    ret(r, Cell::status(0))
}

// ============================================================================
// Modules and sourcing
// ============================================================================

/// Stat-derived module key: `$name-size-sec.nsec`. Resolves to the loaded
/// module when one is already bound under that key.
fn m_module(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    use std::os::unix::fs::MetadataExt;
    let path = args.car().raw();
    let meta = std::fs::metadata(&path).map_err(|e| ShellError::io(&path, e))?;
    let key = format!(
        "${}-{}-{}.{}",
        path,
        meta.len(),
        meta.mtime(),
        meta.mtime_nsec()
    );
    let key = sym(&key);
    match resolve(&r.lexical, r.dynamic.as_ref(), &key)? {
        Some(reference) => {
            let v = reference.get();
            ret(r, v)
        }
        None => ret(r, Cell::Symbol(key)),
    }
}

/// Evaluate a file's commands in the current context
fn m_source(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let path = args.car().raw();
    let text = std::fs::read_to_string(&path).map_err(|e| ShellError::io(&path, e))?;
    let commands = parser::parse_program(&text).map_err(ShellError::from)?;
    r.replace_states(&[PS_EVAL_BLOCK]);
    r.code = crate::cell::list_of(&commands);
    Ok(true)
}

// ============================================================================
// Conduits and stdio
// ============================================================================

fn m_pipe(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let pipe = Pipe::new()?;
    ret(r, Cell::Conduit(pipe))
}

fn m_channel(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let capacity = if args.is_null() {
        0
    } else {
        match args.car().to_number()?.to_cell() {
            Cell::Int(n) => n.to_usize().unwrap_or(0),
            _ => 0,
        }
    };
    ret(r, Cell::Conduit(Channel::new(capacity)))
}

/// Print each value on `$stdout`, one external representation per line
fn m_write(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let out = resolve_conduit(r, "$stdout")?;
    let mut rest = args;
    let mut last = Cell::Bool(true);
    loop {
        let p = match rest {
            Cell::Pair(p) => p,
            _ => break,
        };
        last = p.car();
        out.write(last.clone())?;
        rest = p.cdr();
    }
    ret(r, last)
}

fn m_read(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let input = resolve_conduit(r, "$stdin")?;
    let v = input.read()?;
    ret(r, v)
}

fn m_read_line(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let input = resolve_conduit(r, "$stdin")?;
    let v = input.read_line()?;
    ret(r, v)
}
