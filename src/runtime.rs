// ABOUTME: Process-wide state, bootstrap, and the top-level entry points

use crate::binding::{Binding, BindingKind, Ref};
use crate::cell::{mutex_lock, sym, Cell};
use crate::conduit::Pipe;
use crate::error::{ShellError, ShellResult};
use crate::eval;
use crate::monitor::Registrar;
use crate::parser;
use crate::registers::Registers;
use crate::scope::{Env, Scope};
use crate::task::{Job, Task};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Source evaluated against the root scope before any user input
const BOOT: &str = include_str!("boot.cn");

/// Everything process-wide, threaded through tasks instead of living in
/// globals: the root scope and env, the job table, the foreground job,
/// and the registrar channels.
pub struct Runtime {
    root_scope: Arc<Scope>,
    root_env: Arc<Env>,
    root_job: Arc<Job>,
    registrar: Registrar,
    external: Cell,
    interactive: bool,
    tty: Option<i32>,
    shell_pgid: i32,
    foreground: Mutex<Arc<Job>>,
    jobs: Mutex<BTreeMap<usize, Arc<Job>>>,
}

impl Runtime {
    pub fn new(interactive: bool) -> ShellResult<Arc<Runtime>> {
        // SAFETY: isatty and getpgrp have no preconditions
        let tty = if unsafe { libc::isatty(0) } == 1 {
            Some(0)
        } else {
            None
        };
        let shell_pgid = unsafe { libc::getpgrp() };

        let root_job = Job::new();
        let runtime = Arc::new(Runtime {
            root_scope: Scope::root(),
            root_env: Env::root(),
            root_job: root_job.clone(),
            registrar: Registrar::start(),
            external: Cell::Binding(Binding::unbound(Ref::native(
                BindingKind::Builtin,
                crate::task::external_applier,
            ))),
            interactive,
            tty,
            shell_pgid,
            foreground: Mutex::new(root_job),
            jobs: Mutex::new(BTreeMap::new()),
        });

        crate::builtins::register(&runtime.root_scope);
        runtime.import_environment()?;
        Ok(runtime)
    }

    pub fn scope(&self) -> Arc<Scope> {
        self.root_scope.clone()
    }

    pub fn env(&self) -> Arc<Env> {
        self.root_env.clone()
    }

    pub fn root_job(&self) -> Arc<Job> {
        self.root_job.clone()
    }

    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    pub fn external_binding(&self) -> Cell {
        self.external.clone()
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    /// Job control needs an interactive session on a real terminal
    pub fn job_control(&self) -> bool {
        self.interactive && self.tty.is_some()
    }

    // ------------------------------------------------------------------
    // Bootstrap
    // ------------------------------------------------------------------

    /// Mirror the OS environment and install the predefined dynamics
    fn import_environment(&self) -> ShellResult<()> {
        for (key, value) in std::env::vars() {
            self.root_env
                .add(sym(&format!("${}", key)), Cell::sym(&value));
        }

        let env = &self.root_env;
        env.add(sym("$$"), Cell::int(std::process::id() as i64));
        env.add(sym("$platform"), Cell::sym(std::env::consts::OS));

        // The session's ends of the standard descriptors; dup'd so the
        // conduits own what they close
        // SAFETY: descriptors 0, 1, 2 are open at process start
        let stdin = unsafe { libc::dup(0) };
        let stdout = unsafe { libc::dup(1) };
        let stderr = unsafe { libc::dup(2) };
        env.add(
            sym("$stdin"),
            Cell::Conduit(Pipe::from_fds(Some(stdin), None)?),
        );
        env.add(
            sym("$stdout"),
            Cell::Conduit(Pipe::from_fds(None, Some(stdout))?),
        );
        env.add(
            sym("$stderr"),
            Cell::Conduit(Pipe::from_fds(None, Some(stderr))?),
        );

        // $origin stays unset when the working directory is unavailable
        if let Ok(dir) = std::env::current_dir() {
            let dir = dir.to_string_lossy().into_owned();
            env.add(sym("$cwd"), Cell::sym(&dir));
            env.add(sym("$origin"), Cell::sym(&dir));
        }
        Ok(())
    }

    /// Interactive initialization: own process group, terminal control,
    /// and the dispositions a job-control shell ignores
    pub fn init_interactive(&self) {
        if !self.job_control() {
            return;
        }
        // SAFETY: standard job-control setup against our own process
        unsafe {
            for signal in [
                libc::SIGINT,
                libc::SIGQUIT,
                libc::SIGTSTP,
                libc::SIGTTIN,
                libc::SIGTTOU,
            ] {
                libc::signal(signal, libc::SIG_IGN);
            }
            libc::setpgid(0, 0);
        }
        self.take_terminal();
    }

    // ------------------------------------------------------------------
    // Terminal and jobs
    // ------------------------------------------------------------------

    pub fn is_foreground_job(&self, job: &Arc<Job>) -> bool {
        Arc::ptr_eq(&*mutex_lock(&self.foreground), job)
    }

    pub fn set_foreground_job(&self, job: Arc<Job>) {
        *mutex_lock(&self.foreground) = job;
    }

    pub fn reset_foreground_job(&self) {
        *mutex_lock(&self.foreground) = self.root_job.clone();
    }

    pub fn give_terminal(&self, pgid: i32) {
        if let Some(tty) = self.tty {
            // SAFETY: handing the terminal to a group we created
            unsafe {
                libc::tcsetpgrp(tty, pgid);
            }
        }
    }

    pub fn take_terminal(&self) {
        if let Some(tty) = self.tty {
            // SAFETY: reclaiming the terminal for the shell's own group
            unsafe {
                libc::tcsetpgrp(tty, self.shell_pgid);
            }
        }
    }

    pub fn terminal_mode(&self) -> Option<libc::termios> {
        let tty = self.tty?;
        // SAFETY: zeroed termios is a valid out-parameter for tcgetattr
        unsafe {
            let mut mode: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(tty, &mut mode) == 0 {
                Some(mode)
            } else {
                None
            }
        }
    }

    pub fn restore_terminal_mode(&self, mode: &libc::termios) {
        if let Some(tty) = self.tty {
            // SAFETY: mode came from tcgetattr on the same terminal
            unsafe {
                libc::tcsetattr(tty, libc::TCSADRAIN, mode);
            }
        }
    }

    /// File a stopped job under the next free number
    pub fn add_stopped_job(&self, job: &Arc<Job>) {
        let mut jobs = mutex_lock(&self.jobs);
        let number = jobs.keys().next_back().map(|n| n + 1).unwrap_or(1);
        jobs.insert(number, job.clone());
        let state = job.lock();
        println!("[{}] Stopped  {}", number, state.command);
    }

    /// Remove and return a stopped job; the highest-numbered when no
    /// number is given
    pub fn take_job(&self, number: Option<usize>) -> Option<(usize, Arc<Job>)> {
        let mut jobs = mutex_lock(&self.jobs);
        let number = match number {
            Some(n) => n,
            None => *jobs.keys().next_back()?,
        };
        jobs.remove(&number).map(|job| (number, job))
    }

    pub fn job_listing(&self) -> Vec<(usize, String)> {
        mutex_lock(&self.jobs)
            .iter()
            .map(|(n, job)| (*n, job.lock().command.clone()))
            .collect()
    }
}

// ============================================================================
// The shell front door
// ============================================================================

/// A runtime plus its top-level task and registers: what scripts, tests,
/// and the interactive session drive
pub struct Shell {
    pub runtime: Arc<Runtime>,
    pub task: Arc<Task>,
    pub regs: Registers,
}

impl Shell {
    pub fn new(interactive: bool) -> ShellResult<Shell> {
        let runtime = Runtime::new(interactive)?;
        let task = Task::new(runtime.clone(), runtime.root_job(), None);
        let regs = Registers::new(runtime.env(), Cell::Scope(runtime.scope()));
        let mut shell = Shell {
            runtime,
            task,
            regs,
        };
        shell
            .eval_source(BOOT)
            .map_err(|e| ShellError::parse(format!("boot: {}", e)))?;
        Ok(shell)
    }

    /// Parse and evaluate a program, stopping at the first failure
    pub fn eval_source(&mut self, source: &str) -> ShellResult<Cell> {
        let commands = parser::parse_program(source).map_err(ShellError::from)?;
        let mut last = Cell::status(0);
        for command in commands {
            last = eval::eval_command(&self.task, &mut self.regs, command)?;
        }
        Ok(last)
    }

    /// Script entry: failures print the `oh:` line and end the script
    pub fn run_script_text(&mut self, source: &str) -> Cell {
        match self.eval_source(source) {
            Ok(v) => v,
            Err(e) => {
                println!("oh: {}", e);
                Cell::status(1)
            }
        }
    }

    /// Bind `$0`, positional `$1..`, and `$args` for a sourced script
    pub fn bind_script_arguments(&self, script: &str, args: &[String]) {
        let env = self.runtime.env();
        env.add(sym("$0"), Cell::sym(script));
        for (i, arg) in args.iter().enumerate() {
            env.add(sym(&format!("${}", i + 1)), Cell::sym(arg));
        }
        let list: Vec<Cell> = args.iter().map(|a| Cell::sym(a)).collect();
        env.add(sym("$args"), crate::cell::list_of(&list));
    }

    /// Hand the registers to a listener thread for the eval rendezvous;
    /// returns the channels the interactive loop drives
    pub fn into_listener(self) -> (Arc<Task>, Sender<Cell>, Receiver<Cell>) {
        let (command_tx, command_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();
        let task = self.task.clone();
        let regs = self.regs;
        let listener = task.clone();
        std::thread::Builder::new()
            .name("listen".into())
            .spawn(move || listener.listen(regs, command_rx, result_tx))
            .ok();
        (task, command_tx, result_rx)
    }
}
