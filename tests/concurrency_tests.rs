// ABOUTME: Tests for tasks, channels, and spawn/wait semantics

use conch::runtime::Shell;

fn setup() -> Shell {
    Shell::new(false).expect("shell boots")
}

fn eval(shell: &mut Shell, src: &str) -> String {
    format!("{}", shell.eval_source(src).expect("evaluates"))
}

#[test]
fn test_channel_rendezvous_between_tasks() {
    let mut shell = setup();
    eval(&mut shell, "define c: channel 1");
    eval(&mut shell, "spawn {c::write hello}");
    assert_eq!(eval(&mut shell, "c::read"), "hello");
}

#[test]
fn test_channel_eof_after_writer_close() {
    let mut shell = setup();
    eval(&mut shell, "define c: channel 2");
    eval(&mut shell, "c::write one");
    eval(&mut shell, "c::write two");
    eval(&mut shell, "c::writer-close");
    assert_eq!(eval(&mut shell, "c::read"), "one");
    assert_eq!(eval(&mut shell, "c::read"), "two");
    // Closed and drained: Null from read, False from read-line, at most
    // one EOF however many times we ask
    assert_eq!(eval(&mut shell, "c::read"), "()");
    assert_eq!(eval(&mut shell, "c::read"), "()");
    assert_eq!(eval(&mut shell, "c::read-line"), "false");
    assert!(shell.eval_source("c::write three").is_err());
}

#[test]
fn test_spawn_runs_concurrently() {
    let mut shell = setup();
    eval(&mut shell, "define c: channel 0");
    // Rendezvous on an unbuffered channel proves both sides are live
    eval(&mut shell, "spawn {c::write ping}");
    assert_eq!(eval(&mut shell, "c::read"), "ping");
}

#[test]
fn test_wait_replaces_argument_with_result() {
    let mut shell = setup();
    eval(&mut shell, "define t: spawn {exit 42}");
    assert_eq!(eval(&mut shell, "wait t"), "(42)");
    // The finished task stands for its result
    assert_eq!(eval(&mut shell, "car (list t)"), "42");
}

#[test]
fn test_wait_without_arguments_waits_for_all_children() {
    let mut shell = setup();
    eval(&mut shell, "define c: channel 3");
    eval(&mut shell, "spawn {c::write a}");
    eval(&mut shell, "spawn {c::write b}");
    assert_eq!(eval(&mut shell, "wait"), "0");
    eval(&mut shell, "c::writer-close");
    // Both children ran to completion before wait returned
    assert_ne!(eval(&mut shell, "c::read"), "()");
    assert_ne!(eval(&mut shell, "c::read"), "()");
    assert_eq!(eval(&mut shell, "c::read"), "()");
}

#[test]
fn test_spawn_scope_isolation() {
    let mut shell = setup();
    eval(&mut shell, "define x: integer 1");
    eval(&mut shell, "define t: spawn {define x: integer 99; add x 0}");
    assert_eq!(eval(&mut shell, "wait t"), "(99)");
    // The child's define landed in its own scope
    assert_eq!(eval(&mut shell, "add x 0"), "1");
}

#[test]
fn test_spawn_sees_parent_bindings() {
    let mut shell = setup();
    eval(&mut shell, "define base: integer 40");
    eval(&mut shell, "define t: spawn {exit: add base 2}");
    assert_eq!(eval(&mut shell, "wait t"), "(42)");
}

#[test]
fn test_spawn_dynamic_isolation() {
    let mut shell = setup();
    eval(&mut shell, "define c: channel 1");
    eval(&mut shell, "dynamic d = parent-value");
    // The child's `dynamic` shadows in its own env
    eval(&mut shell, "define t: spawn {dynamic d = child-value; c::write d}");
    assert_eq!(eval(&mut shell, "c::read"), "child-value");
    eval(&mut shell, "wait t");
    assert_eq!(eval(&mut shell, "car (list d)"), "parent-value");
}

#[test]
fn test_pipe_carries_cells_between_tasks() {
    let mut shell = setup();
    eval(&mut shell, "define p: pipe");
    eval(&mut shell, "spawn {p::write (list 1 2); p::writer-close}");
    assert_eq!(eval(&mut shell, "p::read"), "(1 2)");
    assert_eq!(eval(&mut shell, "p::read"), "()");
}
