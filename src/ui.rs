// ABOUTME: The interactive session: line editing and the eval rendezvous

use crate::cell::Cell;
use crate::error::{ShellError, ShellResult};
use crate::parser;
use crate::runtime::Shell;
use crate::task::Task;
use crossbeam_channel::{Receiver, Sender};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;

const HISTORY_FILE: &str = ".conch_history";

/// Drive the line editor until EOF or `exit`. Commands go to the listener
/// task one at a time; each waits for its done signal before the next
/// prompt. Output happens through the conduits, so results are not echoed.
pub fn interactive(shell: Shell) -> ShellResult<()> {
    shell.runtime.init_interactive();
    let (task, commands, results) = shell.into_listener();

    let mut editor =
        DefaultEditor::new().map_err(|e| ShellError::os(format!("line editor: {}", e)))?;
    let _ = editor.load_history(HISTORY_FILE);

    let mut buffer = String::new();
    loop {
        if task.is_stopped() {
            break;
        }
        let prompt = if buffer.is_empty() { "$ " } else { "> " };
        match editor.readline(prompt) {
            Ok(line) => {
                buffer.push_str(&line);
                buffer.push('\n');
                if parser::needs_more(&buffer) {
                    continue;
                }
                let source = std::mem::take(&mut buffer);
                if source.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(source.trim());
                if !submit(&source, &task, &commands, &results) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("oh: {}", e);
                break;
            }
        }
    }

    let _ = editor.save_history(HISTORY_FILE);
    println!();
    Ok(())
}

/// Send each parsed command and rendezvous on its completion; false when
/// the listener is gone
fn submit(
    source: &str,
    task: &Arc<Task>,
    commands: &Sender<Cell>,
    results: &Receiver<Cell>,
) -> bool {
    let parsed = match parser::parse_program(source) {
        Ok(parsed) => parsed,
        Err(e) => {
            println!("oh: {}", ShellError::from(e));
            return true;
        }
    };
    for command in parsed {
        if commands.send(command).is_err() {
            return false;
        }
        if results.recv().is_err() {
            return false;
        }
        if task.is_stopped() {
            return false;
        }
    }
    true
}
