// ABOUTME: Tests for resolution policy, strict mode, and continuations

use conch::runtime::Shell;

fn setup() -> Shell {
    Shell::new(false).expect("shell boots")
}

fn eval(shell: &mut Shell, src: &str) -> String {
    format!("{}", shell.eval_source(src).expect("evaluates"))
}

#[test]
fn test_dynamic_resolution_wins_over_lexical() {
    let mut shell = setup();
    eval(&mut shell, "define y: integer 2");
    eval(&mut shell, "dynamic y = (integer 1)");
    assert_eq!(eval(&mut shell, "add y 0"), "1");
}

#[test]
fn test_lexical_shadowing_in_blocks() {
    let mut shell = setup();
    eval(&mut shell, "define x: integer 1");
    // The block's define lands in a child scope
    assert_eq!(eval(&mut shell, "block {define x: integer 9; add x 0}"), "9");
    assert_eq!(eval(&mut shell, "add x 0"), "1");
}

#[test]
fn test_set_reaches_through_block_scopes() {
    let mut shell = setup();
    eval(&mut shell, "define x: integer 1");
    eval(&mut shell, "block {set x = (integer 5)}");
    assert_eq!(eval(&mut shell, "add x 0"), "5");
}

#[test]
fn test_set_of_undefined_symbol_fails() {
    let mut shell = setup();
    assert!(shell.eval_source("set nope = 1").is_err());
}

#[test]
fn test_undefined_symbols_evaluate_to_themselves() {
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "quote walrus"), "walrus");
    // An unresolved element is just the symbol
    assert_eq!(eval(&mut shell, "car (list frond)"), "frond");
}

#[test]
fn test_strict_mode_rejects_undefined_non_numeric_symbols() {
    let mut shell = setup();
    eval(&mut shell, "define strict true");
    assert!(shell.eval_source("car (list frond)").is_err());
    // Numeric symbols are literals, strict or not
    assert_eq!(eval(&mut shell, "car (list 42)"), "42");
}

#[test]
fn test_strict_probe_failure_defaults_to_lenient() {
    let mut shell = setup();
    // No strict binding anywhere: the probe recovers and answers no
    assert_eq!(eval(&mut shell, "car (list frond)"), "frond");
}

#[test]
fn test_return_exits_early() {
    let mut shell = setup();
    eval(
        &mut shell,
        "define f: method (n) as { if (lt n 0) {return negative} ; quote finished }",
    );
    assert_eq!(eval(&mut shell, "f (sub 0 5)"), "negative");
    assert_eq!(eval(&mut shell, "f 5"), "finished");
}

#[test]
fn test_continuation_restores_captor_exactly() {
    let mut shell = setup();
    eval(&mut shell, "define k ()");
    eval(&mut shell, "define f: method (n) as { set k = return; n }");
    assert_eq!(eval(&mut shell, "f 5"), "5");
    // Re-entering the captured continuation finishes f's call again,
    // with the new value in the result position
    assert_eq!(eval(&mut shell, "k 9"), "9");
    assert_eq!(eval(&mut shell, "k 11"), "11");
}

#[test]
fn test_rest_parameter_collects_remaining_argv() {
    let mut shell = setup();
    eval(&mut shell, "define f: method (a (rest)) as: cons a rest");
    assert_eq!(eval(&mut shell, "f 1 2 3"), "(1 2 3)");
    assert_eq!(eval(&mut shell, "f 1"), "(1)");
}

#[test]
fn test_recursion_through_the_defining_scope() {
    let mut shell = setup();
    eval(
        &mut shell,
        "define count: method (n) as { if (eq n 0) {quote done} else {count: sub n 1} }",
    );
    assert_eq!(eval(&mut shell, "count 3"), "done");
}

#[test]
fn test_labeled_method_binds_its_receiver() {
    let mut shell = setup();
    eval(&mut shell, "define s: make-scope");
    eval(&mut shell, "set-slot s v 42");
    eval(
        &mut shell,
        "set-slot s get: method self () as: get-slot self 'v",
    );
    assert_eq!(eval(&mut shell, "s::get"), "42");
}

#[test]
fn test_splice_spreads_list_elements_into_argv() {
    let mut shell = setup();
    assert_eq!(
        eval(&mut shell, "list 1 (splice: list 2 3) 4"),
        "(1 2 3 4)"
    );
    // A non-list value splices as itself
    assert_eq!(eval(&mut shell, "list 1 (splice 2) 3"), "(1 2 3)");
}
