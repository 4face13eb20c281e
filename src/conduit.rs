// ABOUTME: Conduits: OS pipes carrying parsed cells and in-process channels

use crate::binding::{Binding, BindingKind, Ref};
use crate::cell::{mutex_lock, Cell};
use crate::error::{ShellError, ShellResult};
use crate::registers::Registers;
use crate::task::Task;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::unix::io::FromRawFd;
use std::sync::{Arc, Mutex};

/// Polymorphic read/write endpoint. Pipes and channels share the member
/// table; only pipes expose file descriptors to external processes.
pub trait Conduit: Send + Sync {
    fn kind_name(&self) -> &'static str;

    /// Close both directions
    fn close(&self);
    fn reader_close(&self);
    fn writer_close(&self);

    /// One value per call; Null once the stream is exhausted
    fn read(&self) -> ShellResult<Cell>;

    /// One line of text; Null (pipe) or False (channel) at end
    fn read_line(&self) -> ShellResult<Cell>;

    fn write(&self, v: Cell) -> ShellResult<()>;

    fn read_fd(&self) -> Option<i32> {
        None
    }

    fn write_fd(&self) -> Option<i32> {
        None
    }

    /// Method-table lookup for member dispatch, bound to the receiving cell
    fn member(&self, name: &str, receiver: &Cell) -> Option<Cell> {
        let applier = match name {
            "read" => m_read,
            "read-line" => m_read_line,
            "write" => m_write,
            "close" => m_close,
            "reader-close" => m_reader_close,
            "writer-close" => m_writer_close,
            _ => return None,
        };
        Some(Cell::Binding(Binding::bound(
            Ref::native(BindingKind::Method, applier),
            receiver.clone(),
        )))
    }
}

// ============================================================================
// Member appliers
// ============================================================================

fn receiver_conduit(r: &Registers) -> ShellResult<Arc<dyn Conduit>> {
    match r.scratch.car() {
        Cell::Binding(b) => Ok(b.receiver_or_null().as_conduit()?.clone()),
        other => Err(ShellError::type_error(format!("not a conduit: {}", other))),
    }
}

fn m_read(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let c = receiver_conduit(r)?;
    let v = c.read()?;
    r.scratch_replace(v);
    Ok(false)
}

fn m_read_line(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    let c = receiver_conduit(r)?;
    let v = c.read_line()?;
    r.scratch_replace(v);
    Ok(false)
}

fn m_write(_t: &Arc<Task>, r: &mut Registers, args: Cell) -> ShellResult<bool> {
    let c = receiver_conduit(r)?;
    let mut rest = args;
    let mut last = Cell::Null;
    loop {
        let p = match rest {
            Cell::Pair(p) => p,
            _ => break,
        };
        last = p.car();
        c.write(last.clone())?;
        rest = p.cdr();
    }
    r.scratch_replace(last);
    Ok(false)
}

fn m_close(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    receiver_conduit(r)?.close();
    r.scratch_replace(Cell::Bool(true));
    Ok(false)
}

fn m_reader_close(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    receiver_conduit(r)?.reader_close();
    r.scratch_replace(Cell::Bool(true));
    Ok(false)
}

fn m_writer_close(_t: &Arc<Task>, r: &mut Registers, _args: Cell) -> ShellResult<bool> {
    receiver_conduit(r)?.writer_close();
    r.scratch_replace(Cell::Bool(true));
    Ok(false)
}

// ============================================================================
// Pipe
// ============================================================================

// The read side is either untouched (line reads go straight to the fd) or
// handed to a reader thread that parses one value at a time. The thread
// sends each parsed cell and then waits for an acknowledgement, so it
// never runs ahead of the consumer.

enum ReadEnd {
    Closed,
    Fresh(BufReader<File>),
    Parsing {
        cells: Receiver<Cell>,
        ack: Sender<()>,
    },
}

pub struct Pipe {
    read: Mutex<ReadEnd>,
    write: Mutex<Option<File>>,
}

impl Pipe {
    /// Wrap existing descriptors, or create a fresh OS pipe when neither
    /// endpoint is supplied. Takes ownership of the fds it is given.
    pub fn from_fds(read_fd: Option<i32>, write_fd: Option<i32>) -> ShellResult<Arc<Pipe>> {
        let (read_fd, write_fd) = match (read_fd, write_fd) {
            (None, None) => {
                let mut fds = [0i32; 2];
                // SAFETY: fds is a valid two-element buffer for pipe(2)
                if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
                    return Err(ShellError::io(
                        "pipe",
                        std::io::Error::last_os_error(),
                    ));
                }
                (Some(fds[0]), Some(fds[1]))
            }
            other => other,
        };
        // SAFETY: each fd is owned by exactly this pipe from here on
        let read = match read_fd {
            Some(fd) => ReadEnd::Fresh(BufReader::new(unsafe { File::from_raw_fd(fd) })),
            None => ReadEnd::Closed,
        };
        let write = write_fd.map(|fd| unsafe { File::from_raw_fd(fd) });
        Ok(Arc::new(Pipe {
            read: Mutex::new(read),
            write: Mutex::new(write),
        }))
    }

    pub fn new() -> ShellResult<Arc<Pipe>> {
        Pipe::from_fds(None, None)
    }
}

impl Conduit for Pipe {
    fn kind_name(&self) -> &'static str {
        "pipe"
    }

    fn close(&self) {
        self.reader_close();
        self.writer_close();
    }

    fn reader_close(&self) {
        *mutex_lock(&self.read) = ReadEnd::Closed;
    }

    fn writer_close(&self) {
        *mutex_lock(&self.write) = None;
    }

    fn read(&self) -> ShellResult<Cell> {
        let mut end = mutex_lock(&self.read);
        if let ReadEnd::Fresh(_) = &*end {
            let reader = match std::mem::replace(&mut *end, ReadEnd::Closed) {
                ReadEnd::Fresh(reader) => reader,
                _ => unreachable!(),
            };
            let (cell_tx, cell_rx) = bounded::<Cell>(0);
            let (ack_tx, ack_rx) = bounded::<()>(0);
            std::thread::Builder::new()
                .name("pipe-reader".into())
                .spawn(move || parse_loop(reader, cell_tx, ack_rx))
                .map_err(|e| ShellError::io("spawn pipe reader", e))?;
            *end = ReadEnd::Parsing {
                cells: cell_rx,
                ack: ack_tx,
            };
        }
        let (cells, ack) = match &*end {
            ReadEnd::Parsing { cells, ack } => (cells.clone(), ack.clone()),
            ReadEnd::Closed => return Ok(Cell::Null),
            ReadEnd::Fresh(_) => unreachable!(),
        };
        drop(end);
        match cells.recv() {
            Ok(v) => {
                let _ = ack.send(());
                Ok(v)
            }
            Err(_) => Ok(Cell::Null),
        }
    }

    fn read_line(&self) -> ShellResult<Cell> {
        let mut end = mutex_lock(&self.read);
        match &mut *end {
            ReadEnd::Fresh(reader) => {
                let mut line = String::new();
                let n = reader
                    .read_line(&mut line)
                    .map_err(|e| ShellError::io("read", e))?;
                if n == 0 {
                    return Ok(Cell::Null);
                }
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Ok(Cell::str(&line))
            }
            ReadEnd::Closed => Ok(Cell::Null),
            ReadEnd::Parsing { .. } => Err(ShellError::type_error(
                "pipe is already being read as cells",
            )),
        }
    }

    fn write(&self, v: Cell) -> ShellResult<()> {
        use std::io::Write as _;
        let mut end = mutex_lock(&self.write);
        match &mut *end {
            Some(file) => writeln!(file, "{}", v).map_err(|e| ShellError::io("write", e)),
            None => Err(ShellError::type_error("write side of pipe is closed")),
        }
    }

    fn read_fd(&self) -> Option<i32> {
        use std::os::unix::io::AsRawFd;
        match &*mutex_lock(&self.read) {
            ReadEnd::Fresh(reader) => Some(reader.get_ref().as_raw_fd()),
            _ => None,
        }
    }

    fn write_fd(&self) -> Option<i32> {
        use std::os::unix::io::AsRawFd;
        mutex_lock(&self.write).as_ref().map(|f| f.as_raw_fd())
    }
}

/// Parse one value per line from the read side, handing each cell over and
/// waiting for the consumer's acknowledgement before parsing the next
fn parse_loop(mut reader: BufReader<File>, cells: Sender<Cell>, ack: Receiver<()>) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = match crate::parser::parse_wire(trimmed) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if cells.send(value).is_err() {
            return;
        }
        if ack.recv().is_err() {
            return;
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

/// A bounded cell queue. Capacity zero rendezvouses sender and receiver.
pub struct Channel {
    tx: Mutex<Option<Sender<Cell>>>,
    rx: Receiver<Cell>,
}

impl Channel {
    pub fn new(capacity: usize) -> Arc<Channel> {
        let (tx, rx) = bounded(capacity);
        Arc::new(Channel {
            tx: Mutex::new(Some(tx)),
            rx,
        })
    }
}

impl Conduit for Channel {
    fn kind_name(&self) -> &'static str {
        "channel"
    }

    fn close(&self) {
        self.writer_close();
    }

    /// Reader close is a no-op for channels
    fn reader_close(&self) {}

    fn writer_close(&self) {
        *mutex_lock(&self.tx) = None;
    }

    fn read(&self) -> ShellResult<Cell> {
        match self.rx.recv() {
            Ok(v) => Ok(v),
            Err(_) => Ok(Cell::Null),
        }
    }

    fn read_line(&self) -> ShellResult<Cell> {
        match self.rx.recv() {
            Ok(v) => Ok(v),
            Err(_) => Ok(Cell::Bool(false)),
        }
    }

    fn write(&self, v: Cell) -> ShellResult<()> {
        let tx = mutex_lock(&self.tx).clone();
        match tx {
            Some(tx) => tx
                .send(v)
                .map_err(|_| ShellError::type_error("channel is closed")),
            None => Err(ShellError::type_error("channel is closed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_read_after_writer_close() {
        let ch = Channel::new(2);
        ch.write(Cell::sym("one")).expect("write");
        ch.write(Cell::sym("two")).expect("write");
        ch.writer_close();

        assert_eq!(ch.read().expect("read").raw(), "one");
        assert_eq!(ch.read().expect("read").raw(), "two");
        // Closed and drained: Null from read, False from read-line
        assert!(ch.read().expect("read").is_null());
        assert!(matches!(ch.read_line().expect("read"), Cell::Bool(false)));
        // And writes now fail
        assert!(ch.write(Cell::Null).is_err());
    }

    #[test]
    fn test_channel_rendezvous_with_thread() {
        let ch = Channel::new(0);
        let other = ch.clone();
        let handle = std::thread::spawn(move || {
            other.write(Cell::int(42)).expect("write");
        });
        assert_eq!(format!("{}", ch.read().expect("read")), "42");
        handle.join().expect("join");
    }

    #[test]
    fn test_pipe_write_then_read_values() {
        let p = Pipe::new().expect("pipe");
        p.write(Cell::sym("hello")).expect("write");
        p.write(crate::cell::list_of(&[Cell::int(1), Cell::int(2)]))
            .expect("write");
        p.writer_close();

        assert_eq!(p.read().expect("read").raw(), "hello");
        assert_eq!(format!("{}", p.read().expect("read")), "(1 2)");
        assert!(p.read().expect("read").is_null());
    }

    #[test]
    fn test_pipe_read_line() {
        let p = Pipe::new().expect("pipe");
        p.write(Cell::sym("first")).expect("write");
        p.writer_close();

        let line = p.read_line().expect("read-line");
        assert_eq!(line.raw(), "first");
        assert!(p.read_line().expect("read-line").is_null());
    }
}
