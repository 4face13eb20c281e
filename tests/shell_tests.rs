// ABOUTME: Tests for external commands, pipelines, and shell builtins

use conch::runtime::Shell;
use serial_test::serial;

fn setup() -> Shell {
    Shell::new(false).expect("shell boots")
}

fn eval(shell: &mut Shell, src: &str) -> String {
    format!("{}", shell.eval_source(src).expect("evaluates"))
}

#[test]
#[serial]
fn test_external_command_status() {
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "sh -c \"exit 0\""), "0");
    assert_eq!(eval(&mut shell, "sh -c \"exit 3\""), "3");
    // Status truthiness: zero is success
    assert_eq!(eval(&mut shell, "boolean (sh -c \"exit 0\")"), "true");
    assert_eq!(eval(&mut shell, "boolean (sh -c \"exit 3\")"), "false");
}

#[test]
#[serial]
fn test_run_forces_the_external_path() {
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "run true"), "0");
    assert_eq!(eval(&mut shell, "run false"), "1");
}

#[test]
#[serial]
fn test_missing_command_is_an_error() {
    let mut shell = setup();
    assert!(shell.eval_source("no-such-command-zzz").is_err());
}

#[test]
#[serial]
fn test_external_output_through_a_pipe() {
    let mut shell = setup();
    eval(&mut shell, "define p: pipe");
    eval(&mut shell, "block { dynamic $stdout = p; echo hello world }");
    eval(&mut shell, "p::writer-close");
    assert_eq!(eval(&mut shell, "p::read-line"), "\"hello world\"");
    assert_eq!(eval(&mut shell, "p::read-line"), "()");
}

#[test]
#[serial]
fn test_pipeline_connects_stages() {
    let mut shell = setup();
    eval(&mut shell, "define p: pipe");
    eval(&mut shell, "block { dynamic $stdout = p; echo walrus | cat }");
    eval(&mut shell, "p::writer-close");
    assert_eq!(eval(&mut shell, "p::read-line"), "\"walrus\"");
}

#[test]
#[serial]
fn test_pipeline_status_is_the_last_stage() {
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "sh -c \"exit 3\" | sh -c \"exit 5\""), "5");
    assert_eq!(eval(&mut shell, "sh -c \"exit 3\" | sh -c \"exit 0\""), "0");
}

#[test]
#[serial]
fn test_string_arguments_stay_literal() {
    let mut shell = setup();
    eval(&mut shell, "define p: pipe");
    eval(&mut shell, "block { dynamic $stdout = p; echo \"*\" }");
    eval(&mut shell, "p::writer-close");
    // An unexpanded glob character went through argv
    assert_eq!(eval(&mut shell, "p::read-line"), "\"*\"");
}

#[test]
#[serial]
fn test_glob_expansion_of_symbol_arguments() {
    let original = std::env::current_dir().expect("cwd");
    let dir = std::env::temp_dir().join("conch-glob-test");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join("one.txt"), "").expect("touch");
    std::fs::write(dir.join("two.txt"), "").expect("touch");

    let mut shell = setup();
    eval(&mut shell, &format!("cd {}", dir.display()));
    eval(&mut shell, "define p: pipe");
    eval(&mut shell, "block { dynamic $stdout = p; echo *.txt }");
    eval(&mut shell, "p::writer-close");
    assert_eq!(eval(&mut shell, "p::read-line"), "\"one.txt two.txt\"");

    std::env::set_current_dir(original).expect("restore cwd");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
#[serial]
fn test_cd_updates_cwd_binding() {
    let original = std::env::current_dir().expect("cwd");
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "cd /"), "0");
    assert_eq!(eval(&mut shell, "car (list $cwd)"), "/");
    assert_eq!(eval(&mut shell, "cd /no-such-directory-zzz"), "1");
    assert_eq!(eval(&mut shell, "car (list $cwd)"), "/");
    std::env::set_current_dir(original).expect("restore cwd");
}

#[test]
#[serial]
fn test_exists() {
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "exists"), "false");
    assert_eq!(eval(&mut shell, "exists /"), "true");
    assert_eq!(eval(&mut shell, "exists / /no-such-path-zzz"), "false");
}

#[test]
#[serial]
fn test_setenv_reaches_the_os_environment() {
    let mut shell = setup();
    eval(&mut shell, "setenv $CONCH_TEST_VAR = walrus");
    assert_eq!(std::env::var("CONCH_TEST_VAR").as_deref(), Ok("walrus"));
    // And the dynamic binding resolves too
    assert_eq!(eval(&mut shell, "car (list $CONCH_TEST_VAR)"), "walrus");
    std::env::remove_var("CONCH_TEST_VAR");
}

#[test]
#[serial]
fn test_environment_import() {
    std::env::set_var("CONCH_IMPORTED", "seen");
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "car (list $CONCH_IMPORTED)"), "seen");
    std::env::remove_var("CONCH_IMPORTED");
}

#[test]
#[serial]
fn test_module_key_is_stable_per_stat() {
    let path = std::env::temp_dir().join("conch-module-test.cn");
    std::fs::write(&path, "define module-x: integer 5\n").expect("write");

    let mut shell = setup();
    let source = format!("module {}", path.display());
    let first = eval(&mut shell, &source);
    assert!(first.starts_with(&format!("${}", path.display())));
    // Unchanged file, same key
    assert_eq!(eval(&mut shell, &source), first);
    // Once bound, the key resolves to the loaded value
    eval(&mut shell, &format!("define {} loaded-module", first));
    assert_eq!(eval(&mut shell, &source), "loaded-module");

    let _ = std::fs::remove_file(&path);
}

#[test]
#[serial]
fn test_source_evaluates_in_the_current_scope() {
    let path = std::env::temp_dir().join("conch-source-test.cn");
    std::fs::write(&path, "define sourced-x: integer 7\n").expect("write");

    let mut shell = setup();
    eval(&mut shell, &format!("source {}", path.display()));
    assert_eq!(eval(&mut shell, "add sourced-x 0"), "7");

    let _ = std::fs::remove_file(&path);
}

#[test]
#[serial]
fn test_predefined_dynamics() {
    let mut shell = setup();
    assert_eq!(
        eval(&mut shell, "car (list $$)"),
        format!("{}", std::process::id())
    );
    assert_eq!(eval(&mut shell, "car (list $platform)"), std::env::consts::OS);
    assert_eq!(eval(&mut shell, "is-conduit $stdout"), "true");
}

#[test]
#[serial]
fn test_fg_and_jobs_without_job_control_are_silent_noops() {
    let mut shell = setup();
    assert_eq!(eval(&mut shell, "fg"), "false");
    assert_eq!(eval(&mut shell, "fg 3"), "false");
    assert_eq!(eval(&mut shell, "jobs"), "false");
}
