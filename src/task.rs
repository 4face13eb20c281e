// ABOUTME: Tasks: concurrent evaluator threads, jobs, and external processes

use crate::cell::{cons, mutex_lock, Cell};
use crate::conduit::Conduit;
use crate::error::{ShellError, ShellResult};
use crate::eval;
use crate::expand;
use crate::monitor;
use crate::registers::{Registers, PS_EVAL_BLOCK};
use crate::runtime::Runtime;
use crate::scope::{resolve, Env, Scope};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

// ============================================================================
// Jobs
// ============================================================================

/// Process-group bookkeeping shared by a task tree. The mutex serializes
/// group creation so every stage of a pipeline lands in one group.
pub struct Job {
    inner: Mutex<JobState>,
}

pub struct JobState {
    pub pgid: i32,
    pub command: String,
    /// Terminal mode captured when the job stopped
    pub mode: Option<libc::termios>,
}

impl Job {
    pub fn new() -> Arc<Job> {
        Arc::new(Job {
            inner: Mutex::new(JobState {
                pgid: 0,
                command: String::new(),
                mode: None,
            }),
        })
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, JobState> {
        mutex_lock(&self.inner)
    }
}

// ============================================================================
// The suspension gate
// ============================================================================

// A closed gate (sender dropped) means runnable: readers fall straight
// through. Suspending installs a fresh open gate that blocks readers until
// the sender is dropped again.

struct Gate {
    rx: Receiver<()>,
    tx: Option<Sender<()>>,
}

impl Gate {
    fn open_passage() -> Gate {
        let (tx, rx) = unbounded();
        drop(tx);
        Gate { rx, tx: None }
    }

    fn blocked() -> Gate {
        let (tx, rx) = unbounded();
        Gate { rx, tx: Some(tx) }
    }
}

// ============================================================================
// Task
// ============================================================================

/// One evaluator thread and its control surface
pub struct Task {
    runtime: Arc<Runtime>,
    pub job: Arc<Job>,
    parent: Weak<Task>,
    children: Mutex<Vec<Arc<Task>>>,
    done_rx: Receiver<()>,
    done_tx: Mutex<Option<Sender<()>>>,
    result: Mutex<Option<Cell>>,
    gate: Mutex<Gate>,
    stopped: AtomicBool,
    child_pid: Mutex<Option<i32>>,
}

impl Task {
    pub fn new(runtime: Arc<Runtime>, job: Arc<Job>, parent: Option<&Arc<Task>>) -> Arc<Task> {
        let (done_tx, done_rx) = unbounded();
        let task = Arc::new(Task {
            runtime,
            job,
            parent: parent.map(Arc::downgrade).unwrap_or_default(),
            children: Mutex::new(Vec::new()),
            done_rx,
            done_tx: Mutex::new(Some(done_tx)),
            result: Mutex::new(None),
            gate: Mutex::new(Gate::open_passage()),
            stopped: AtomicBool::new(false),
            child_pid: Mutex::new(None),
        });
        if let Some(p) = parent {
            mutex_lock(&p.children).push(task.clone());
        }
        task
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Blocks while the task is suspended; false once it has been stopped
    pub fn runnable(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let rx = mutex_lock(&self.gate).rx.clone();
        let _ = rx.recv();
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Park the task at its next step and SIGSTOP any running child group
    pub fn suspend(&self) {
        {
            let mut gate = mutex_lock(&self.gate);
            if gate.tx.is_none() {
                *gate = Gate::blocked();
            }
        }
        self.signal_child(libc::SIGSTOP);
        for child in mutex_lock(&self.children).iter() {
            child.suspend();
        }
    }

    /// Wake the task and everything under it
    pub fn resume(&self) {
        {
            let mut gate = mutex_lock(&self.gate);
            gate.tx = None;
        }
        self.signal_child(libc::SIGCONT);
        for child in mutex_lock(&self.children).iter() {
            child.resume();
        }
    }

    /// Cooperative termination: the run loop exits at its next iteration,
    /// the bound child process is killed, children stop recursively
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        {
            let mut gate = mutex_lock(&self.gate);
            gate.tx = None;
        }
        self.signal_child(libc::SIGKILL);
        for child in mutex_lock(&self.children).iter() {
            child.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn signal_child(&self, signal: i32) {
        if let Some(pid) = *mutex_lock(&self.child_pid) {
            let pgid = self.job.lock().pgid;
            // SAFETY: sending a signal to a pid we started
            unsafe {
                if pgid > 0 {
                    libc::killpg(pgid, signal);
                } else {
                    libc::kill(pid, signal);
                }
            }
        }
    }

    /// Run the loop on its own thread; the done channel closes on exit
    pub fn launch(self: &Arc<Self>, mut regs: Registers) {
        let task = self.clone();
        std::thread::Builder::new()
            .name("task".into())
            .spawn(move || {
                let result = match eval::run(&task, &mut regs) {
                    Ok(()) => regs.scratch.car(),
                    Err(e) => {
                        println!("oh: {}", e);
                        Cell::status(1)
                    }
                };
                task.complete(result);
            })
            .ok();
    }

    fn complete(self: &Arc<Self>, result: Cell) {
        *mutex_lock(&self.result) = Some(result);
        *mutex_lock(&self.done_tx) = None;
        if let Some(parent) = self.parent.upgrade() {
            mutex_lock(&parent.children).retain(|c| !Arc::ptr_eq(c, self));
        }
    }

    /// Block until the done signal fires, then hand back the result
    pub fn join(&self) -> Cell {
        let _ = self.done_rx.recv();
        self.finished_result().unwrap_or(Cell::Null)
    }

    pub fn finished_result(&self) -> Option<Cell> {
        mutex_lock(&self.result).clone()
    }

    pub fn children_snapshot(&self) -> Vec<Arc<Task>> {
        mutex_lock(&self.children).clone()
    }

    /// Spawn a child task over the given block of commands. The child gets
    /// a fresh dynamic env and lexical scope chained from the caller's and
    /// shares the caller's job.
    pub fn spawn_child(
        self: &Arc<Self>,
        dynamic: &Arc<Env>,
        lexical: &Cell,
        code: Cell,
    ) -> ShellResult<Arc<Task>> {
        let scope = crate::scope::expose(lexical)?;
        let child = Task::new(self.runtime.clone(), self.job.clone(), Some(self));
        let mut regs = Registers::new(Env::child(dynamic), Cell::Scope(Scope::child(&scope)));
        regs.code = code;
        regs.new_states(&[PS_EVAL_BLOCK]);
        child.launch(regs);
        Ok(child)
    }

    /// Top-level driver: evaluate each command received on the eval
    /// channel, restoring the register snapshot when one fails, and
    /// signal each result back
    pub fn listen(self: &Arc<Self>, mut regs: Registers, commands: Receiver<Cell>, results: Sender<Cell>) {
        while let Ok(command) = commands.recv() {
            let snapshot = snapshot_registers(&regs);
            let (result, ok) = eval::eval_command_recover(self, &mut regs, command);
            if !ok {
                restore_registers(&mut regs, snapshot);
            }
            if results.send(result).is_err() {
                break;
            }
        }
        let result = regs.scratch.car();
        self.complete(result);
    }

    // ------------------------------------------------------------------
    // External processes
    // ------------------------------------------------------------------

    /// Start an external process and join it through the registrar. Under
    /// job control the child lands in the job's process group (becoming
    /// its leader if the group does not exist yet) and a foreground job
    /// holds the terminal until it exits or stops.
    pub fn execute(
        self: &Arc<Self>,
        program: PathBuf,
        argv: &[String],
        cwd: Option<String>,
        fds: [i32; 3],
    ) -> ShellResult<Cell> {
        use std::os::unix::io::FromRawFd;
        use std::os::unix::process::CommandExt;
        use std::process::{Command, Stdio};

        let job_control = self.runtime.job_control();
        let pid;
        {
            let mut job = self.job.lock();
            let mut command = Command::new(&program);
            command.args(&argv[1..]);
            if let Some(dir) = cwd {
                command.current_dir(dir);
            }
            for (slot, fd) in fds.iter().enumerate() {
                // SAFETY: dup gives the child its own descriptor; Stdio
                // takes ownership of the duplicate only
                let dup = unsafe { libc::dup(*fd) };
                if dup < 0 {
                    return Err(ShellError::io("dup", std::io::Error::last_os_error()));
                }
                let stdio = unsafe { Stdio::from_raw_fd(dup) };
                match slot {
                    0 => command.stdin(stdio),
                    1 => command.stdout(stdio),
                    _ => command.stderr(stdio),
                };
            }
            if job_control {
                command.process_group(job.pgid);
            }
            let child = command
                .spawn()
                .map_err(|e| ShellError::io(&argv[0], e))?;
            pid = child.id() as i32;
            if job.command.is_empty() {
                job.command = argv.join(" ");
            }
            if job_control {
                if job.pgid == 0 {
                    job.pgid = pid;
                }
                if self.runtime.is_foreground_job(&self.job) {
                    self.runtime.give_terminal(job.pgid);
                }
            }
        }

        *mutex_lock(&self.child_pid) = Some(pid);
        let event = self.runtime.registrar().wait_for(pid);
        *mutex_lock(&self.child_pid) = None;

        if job_control && self.runtime.is_foreground_job(&self.job) {
            self.runtime.take_terminal();
        }
        if monitor::stopped(event.status) && job_control {
            self.job.lock().mode = self.runtime.terminal_mode();
            self.runtime.add_stopped_job(&self.job);
        }
        Ok(Cell::status(monitor::exit_code(event.status)))
    }

    /// The external-command thunk: resolve argv0 on PATH, the working
    /// directory and stdio conduits from the current context, and run
    pub fn external(self: &Arc<Self>, r: &mut Registers, name: Cell, args: Cell) -> ShellResult<Cell> {
        let program = expand::look_path(&name.raw())?;

        let mut argv = vec![name.raw()];
        argv.extend(expand::argv_strings(&args));

        let cwd = match resolve(&r.lexical, r.dynamic.as_ref(), &crate::cell::sym("$cwd"))? {
            Some(reference) => Some(reference.get().raw()),
            None => None,
        };
        let stdin = conduit_fd(r, "$stdin", false)?;
        let stdout = conduit_fd(r, "$stdout", true)?;
        let stderr = conduit_fd(r, "$stderr", true)?;

        self.execute(program, &argv, cwd, [stdin, stdout, stderr])
    }
}

fn conduit_fd(r: &Registers, name: &str, write: bool) -> ShellResult<i32> {
    let value = match resolve(&r.lexical, r.dynamic.as_ref(), &crate::cell::sym(name))? {
        Some(reference) => reference.get(),
        None => return Err(ShellError::resolution(format!("'{}' undefined", name))),
    };
    let conduit = value.as_conduit()?;
    let fd = if write {
        conduit.write_fd()
    } else {
        conduit.read_fd()
    };
    fd.ok_or_else(|| {
        ShellError::type_error(format!("{} cannot carry process I/O", name))
    })
}

type RegisterSnapshot = (Cell, Option<Arc<Env>>, Cell, Cell, Cell);

fn snapshot_registers(r: &Registers) -> RegisterSnapshot {
    (
        r.code.clone(),
        r.dynamic.clone(),
        r.lexical.clone(),
        r.scratch.clone(),
        r.stack.clone(),
    )
}

fn restore_registers(r: &mut Registers, s: RegisterSnapshot) {
    r.code = s.0;
    r.dynamic = s.1;
    r.lexical = s.2;
    r.scratch = s.3;
    r.stack = s.4;
}

/// The applier behind every external command: argv has been expanded, the
/// original command head sits beneath the thunk on the scratch
pub fn external_applier(t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let name = r.scratch.cdr().car();
    let status = t.external(r, name, args)?;
    // Replace both the thunk and the command head with the status
    r.scratch = cons(status, r.scratch.cdr().cdr());
    Ok(false)
}
