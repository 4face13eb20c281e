use clap::Parser;
use conch::cell::{sym, Cell};
use conch::error::ShellError;
use conch::runtime::Shell;
use conch::ui;
use std::path::PathBuf;

/// A Unix shell with a Lisp-flavored command language
#[derive(Parser, Debug)]
#[command(name = "conch")]
#[command(version)]
#[command(about = "A Unix shell with a Lisp-flavored command language")]
struct CliArgs {
    /// Script file to source (reads standard input when omitted)
    #[arg(value_name = "SCRIPT")]
    script: Option<PathBuf>,

    /// Arguments handed to the script as $1.. and $args
    #[arg(value_name = "ARGS", trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() {
    let args = CliArgs::parse();

    let result = match &args.script {
        Some(script) => run_script(script, &args.args),
        // SAFETY: asking whether fd 0 is a terminal has no preconditions
        None if unsafe { libc::isatty(0) } == 1 => run_interactive(),
        None => run_stdin(),
    };

    if let Err(e) = result {
        println!("oh: {}", e);
    }
    // Normal termination always exits 0; external failures surface only
    // through the statuses scripts observe
}

fn run_interactive() -> Result<(), ShellError> {
    let shell = Shell::new(true)?;
    ui::interactive(shell)
}

fn run_script(script: &PathBuf, args: &[String]) -> Result<(), ShellError> {
    let text = std::fs::read_to_string(script)
        .map_err(|e| ShellError::io(&script.to_string_lossy(), e))?;
    let mut shell = Shell::new(false)?;
    shell.bind_script_arguments(&script.to_string_lossy(), args);
    if let Some(dir) = script.parent() {
        if !dir.as_os_str().is_empty() {
            shell
                .runtime
                .env()
                .add(sym("$origin"), Cell::sym(&dir.to_string_lossy()));
        }
    }
    shell.run_script_text(&text);
    Ok(())
}

fn run_stdin() -> Result<(), ShellError> {
    use std::io::Read;
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .map_err(|e| ShellError::io("stdin", e))?;
    let mut shell = Shell::new(false)?;
    shell.run_script_text(&text);
    Ok(())
}
