// ABOUTME: Tests for the surface language: numbers, lists, control, objects

use conch::runtime::Shell;

fn setup() -> Shell {
    Shell::new(false).expect("shell boots")
}

fn eval(shell: &mut Shell, src: &str) -> String {
    format!("{}", shell.eval_source(src).expect("evaluates"))
}

#[test]
fn test_define_then_add() {
    let mut shell = setup();
    eval(&mut shell, "define x: integer 3");
    assert_eq!(eval(&mut shell, "add x 4"), "7");
}

#[test]
fn test_factorial_with_early_return() {
    let mut shell = setup();
    eval(
        &mut shell,
        "define f: method (n) as: if (eq n 0) {return 1} else {mul n: f (sub n 1)}",
    );
    assert_eq!(eval(&mut shell, "f 5"), "120");
    assert_eq!(eval(&mut shell, "f 0"), "1");
}

#[test]
fn test_numeric_tower() {
    let mut shell = setup();
    // Integers stay exact
    assert_eq!(
        eval(&mut shell, "mul 1000000000000 1000000000000"),
        "1000000000000000000000000"
    );
    // Non-divisible integers yield rationals
    assert_eq!(eval(&mut shell, "div 1 3"), "1/3");
    assert_eq!(eval(&mut shell, "add (div 1 3) (div 2 3)"), "1");
    // Floats infect
    assert_eq!(eval(&mut shell, "add 1 0.5"), "1.5");
    assert_eq!(eval(&mut shell, "mod 7 3"), "1");
}

#[test]
fn test_relations_and_logic() {
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "lt 1 2 3"), "true");
    assert_eq!(eval(&mut shell, "lt 1 3 2"), "false");
    assert_eq!(eval(&mut shell, "ge 3 3"), "true");
    assert_eq!(eval(&mut shell, "eq 5 5"), "true");
    assert_eq!(eval(&mut shell, "ne 5 6"), "true");
    assert_eq!(eval(&mut shell, "eq hello hello"), "true");
    // Short-circuit: the second or-arm never runs
    assert_eq!(eval(&mut shell, "or true (undefined-command 1)"), "true");
    assert_eq!(eval(&mut shell, "and true false"), "false");
    assert_eq!(eval(&mut shell, "not false"), "true");
}

#[test]
fn test_set_car_returns_cdr_and_mutates() {
    let mut shell = setup();
    eval(&mut shell, "define p: cons 1 2");
    assert_eq!(eval(&mut shell, "set-car p 9"), "2");
    assert_eq!(eval(&mut shell, "car p"), "9");
    assert_eq!(eval(&mut shell, "set-cdr p 8"), "9");
    assert_eq!(eval(&mut shell, "car (list p)"), "(9 . 8)");
}

#[test]
fn test_list_surgery() {
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "length (list a b c)"), "3");
    assert_eq!(eval(&mut shell, "reverse (list 1 2 3)"), "(3 2 1)");
    assert_eq!(eval(&mut shell, "append (list 1 2) (list 3)"), "(1 2 3)");
    assert_eq!(eval(&mut shell, "map (method (x) as: mul x x) (list 1 2 3)"), "(1 4 9)");
}

#[test]
fn test_if_else_chains() {
    let mut shell = setup();
    eval(
        &mut shell,
        "define grade: method (n) as: if (ge n 90) {quote a} else if (ge n 80) {quote b} else {quote c}",
    );
    assert_eq!(eval(&mut shell, "grade 95"), "a");
    assert_eq!(eval(&mut shell, "grade 85"), "b");
    assert_eq!(eval(&mut shell, "grade 50"), "c");
}

#[test]
fn test_if_requires_else_keyword() {
    let mut shell = setup();
    // A false test with trailing non-else code is an error
    assert!(shell
        .eval_source("if (eq 1 2) {write bad} otherwise {write worse}")
        .is_err());
}

#[test]
fn test_while_reevaluates_its_test() {
    let mut shell = setup();
    eval(&mut shell, "define i: integer 0");
    eval(&mut shell, "define sum: integer 0");
    eval(
        &mut shell,
        "while (lt i 4) { set sum = (add sum i); set i = (add i 1) }",
    );
    assert_eq!(eval(&mut shell, "add sum 0"), "6");
    assert_eq!(eval(&mut shell, "add i 0"), "4");
}

#[test]
fn test_while_requires_else_keyword() {
    let mut shell = setup();
    // A false test with trailing non-else code is an error, as for `if`
    assert!(shell
        .eval_source("while (eq 1 2) {write bad} otherwise {write worse}")
        .is_err());
}

#[test]
fn test_while_else_branch_runs_on_a_false_test() {
    let mut shell = setup();
    eval(
        &mut shell,
        "define probe: method () as { while (eq 1 2) {quote never} else {return from-else} }",
    );
    assert_eq!(eval(&mut shell, "probe"), "from-else");
}

#[test]
fn test_conversions() {
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "integer 3.9"), "3");
    assert_eq!(eval(&mut shell, "float 2"), "2.0");
    assert_eq!(eval(&mut shell, "rational 2"), "2/1");
    assert_eq!(eval(&mut shell, "string 42"), "\"42\"");
    assert_eq!(eval(&mut shell, "symbol \"abc\""), "abc");
    assert_eq!(eval(&mut shell, "boolean ()"), "false");
    // Status truthiness: zero is success
    assert_eq!(eval(&mut shell, "boolean (status 0)"), "true");
    assert_eq!(eval(&mut shell, "boolean (status 1)"), "false");
}

#[test]
fn test_objects_slots_and_visibility() {
    let mut shell = setup();
    eval(&mut shell, "define s: make-scope");
    eval(&mut shell, "s::eval '(define hidden 1)");
    eval(&mut shell, "s::eval '(public shown 2)");

    // Full view sees both; the object face sees public only
    assert_eq!(eval(&mut shell, "get-slot s 'hidden"), "1");
    eval(&mut shell, "define o: child s");
    assert_eq!(eval(&mut shell, "has o 'shown"), "true");
    assert_eq!(eval(&mut shell, "has o 'hidden"), "false");

    // Slot writes through the object face
    eval(&mut shell, "set-slot o name walrus");
    assert_eq!(eval(&mut shell, "get-slot o 'name"), "walrus");
    assert_eq!(eval(&mut shell, "unset o 'name"), "true");
    assert_eq!(eval(&mut shell, "has o 'name"), "false");
}

#[test]
fn test_clone_copies_members() {
    let mut shell = setup();
    eval(&mut shell, "define s: make-scope");
    eval(&mut shell, "set-slot s v 1");
    eval(&mut shell, "define c: clone s");
    eval(&mut shell, "set-slot c v 2");
    assert_eq!(eval(&mut shell, "get-slot s 'v"), "1");
    assert_eq!(eval(&mut shell, "get-slot c 'v"), "2");
}

#[test]
fn test_interpolate() {
    let mut shell = setup();
    eval(&mut shell, "define name: string \"world\"");
    assert_eq!(
        eval(&mut shell, "interpolate \"hello ${name}\""),
        "\"hello world\""
    );
    assert_eq!(eval(&mut shell, "interpolate \"cost $$5\""), "\"cost $5\"");
    // Unknown names stay as written
    assert_eq!(
        eval(&mut shell, "interpolate \"${missing-name}\""),
        "\"${missing-name}\""
    );
}

#[test]
fn test_string_methods() {
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "\"a,b,c\"::split \",\""), "(\"a\" \"b\" \"c\")");
    assert_eq!(eval(&mut shell, "\", \"::join (list 1 2 3)"), "\"1, 2, 3\"");
    assert_eq!(eval(&mut shell, "\"walrus\"::substring 2 4"), "\"lr\"");
    assert_eq!(eval(&mut shell, "\"walrus\"::length"), "6");
    assert_eq!(eval(&mut shell, "\"ab\"::to-list"), "(\"a\" \"b\")");
    assert_eq!(
        eval(&mut shell, "\"%s is %d\"::sprintf cost 5"),
        "\"cost is 5\""
    );
    assert_eq!(eval(&mut shell, "\"walrus.txt\"::match \"*.txt\""), "true");
    assert_eq!(eval(&mut shell, "\"walrus.txt\"::match \"*.rs\""), "false");
}

#[test]
fn test_conduits_refuse_scope_members() {
    let mut shell = setup();
    eval(&mut shell, "define c: channel 1");
    assert!(shell.eval_source("c::define x 1").is_err());
    assert!(shell.eval_source("c::clone").is_err());
}

#[test]
fn test_make_env_and_make_scope() {
    let mut shell = setup();
    eval(&mut shell, "define e: make-env");
    eval(&mut shell, "define s: make-scope");
    assert_eq!(eval(&mut shell, "is-object s"), "true");
    assert_eq!(eval(&mut shell, "is-object e"), "false");
}

#[test]
fn test_quote_and_eval() {
    let mut shell = setup();
    eval(&mut shell, "define code: quote (add 1 2)");
    assert_eq!(eval(&mut shell, "eval code"), "3");
    assert_eq!(eval(&mut shell, "eval 'walrus"), "walrus");
}
