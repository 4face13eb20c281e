// ABOUTME: Child-process reaping: a waitpid monitor and a pid multiplexer

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::collections::HashMap;

/// A raw wait(2) status for one child
#[derive(Clone, Copy, Debug)]
pub struct WaitEvent {
    pub pid: i32,
    pub status: i32,
}

/// Decoded exit status: the value a Status cell carries
pub fn exit_code(status: i32) -> i64 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status) as i64
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status) as i64
    } else if libc::WIFSTOPPED(status) {
        128 + libc::WSTOPSIG(status) as i64
    } else {
        1
    }
}

pub fn stopped(status: i32) -> bool {
    libc::WIFSTOPPED(status)
}

/// The registrar: tasks register a pid and receive its wait status when
/// the monitor reports it. Decouples the single OS wait loop from the
/// many tasks awaiting different children.
pub struct Registrar {
    register_tx: Sender<(i32, Sender<WaitEvent>)>,
    wake_tx: Sender<()>,
}

impl Registrar {
    /// Start the monitor and registrar threads
    pub fn start() -> Registrar {
        let (notify_tx, notify_rx) = unbounded::<WaitEvent>();
        let (register_tx, register_rx) = unbounded::<(i32, Sender<WaitEvent>)>();
        let (wake_tx, wake_rx) = unbounded::<()>();

        std::thread::Builder::new()
            .name("monitor".into())
            .spawn(move || monitor_loop(notify_tx, wake_rx))
            .ok();

        std::thread::Builder::new()
            .name("registrar".into())
            .spawn(move || registrar_loop(register_rx, notify_rx))
            .ok();

        Registrar {
            register_tx,
            wake_tx,
        }
    }

    /// Register interest in a pid and return the channel its status will
    /// arrive on
    pub fn register(&self, pid: i32) -> Receiver<WaitEvent> {
        let (tx, rx) = unbounded();
        let _ = self.register_tx.send((pid, tx));
        let _ = self.wake_tx.send(());
        rx
    }

    /// Block until the pid stops or exits
    pub fn wait_for(&self, pid: i32) -> WaitEvent {
        match self.register(pid).recv() {
            Ok(event) => event,
            Err(_) => WaitEvent { pid, status: 0 },
        }
    }
}

/// Blocking wait loop. Parks on the wake channel while there are no
/// children, then reaps until the kernel reports none remain. WUNTRACED
/// surfaces job-control stops as events too.
fn monitor_loop(notify: Sender<WaitEvent>, wake: Receiver<()>) {
    loop {
        if wake.recv().is_err() {
            return;
        }
        // Drain extra wake tokens accumulated while reaping
        while wake.try_recv().is_ok() {}
        loop {
            let mut status: i32 = 0;
            // SAFETY: status is a valid out-pointer for waitpid(2)
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WUNTRACED) };
            if pid <= 0 {
                break;
            }
            if notify.send(WaitEvent { pid, status }).is_err() {
                return;
            }
        }
    }
}

/// Multiplex wait events to registered waiters. A status can land before
/// its waiter registers; park it until the registration arrives.
fn registrar_loop(
    register: Receiver<(i32, Sender<WaitEvent>)>,
    notify: Receiver<WaitEvent>,
) {
    let mut waiters: HashMap<i32, Vec<Sender<WaitEvent>>> = HashMap::new();
    let mut pending: HashMap<i32, WaitEvent> = HashMap::new();
    loop {
        select! {
            recv(register) -> msg => {
                let (pid, reply) = match msg {
                    Ok(m) => m,
                    Err(_) => return,
                };
                if let Some(event) = pending.remove(&pid) {
                    let _ = reply.send(event);
                } else {
                    waiters.entry(pid).or_default().push(reply);
                }
            }
            recv(notify) -> msg => {
                let event = match msg {
                    Ok(e) => e,
                    Err(_) => return,
                };
                match waiters.remove(&event.pid) {
                    Some(list) => {
                        for reply in list {
                            let _ = reply.send(event);
                        }
                    }
                    None => {
                        pending.insert(event.pid, event);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_registrar_reports_exit_status() {
        let registrar = Registrar::start();
        let child = std::process::Command::new("sh")
            .arg("-c")
            .arg("exit 7")
            .spawn()
            .expect("spawn");
        let event = registrar.wait_for(child.id() as i32);
        assert_eq!(event.pid, child.id() as i32);
        assert_eq!(exit_code(event.status), 7);
    }

    #[test]
    #[serial]
    fn test_registrar_multiplexes_two_children() {
        let registrar = Registrar::start();
        let a = std::process::Command::new("true").spawn().expect("spawn");
        let b = std::process::Command::new("false").spawn().expect("spawn");
        let rx_a = registrar.register(a.id() as i32);
        let rx_b = registrar.register(b.id() as i32);
        let ea = rx_a.recv().expect("a");
        let eb = rx_b.recv().expect("b");
        assert_eq!(exit_code(ea.status), 0);
        assert_eq!(exit_code(eb.status), 1);
    }
}
