use std::io::Write;
use std::process::{Command, Output, Stdio};

const SUSH: &str = env!("CARGO_BIN_EXE_sush");
const MYTAG: &str = env!("CARGO_BIN_EXE_mytag");
const MYSPIN: &str = env!("CARGO_BIN_EXE_myspin");

/// Feeds `script` to a prompt-less shell and collects what it printed.
fn run_script(script: &str) -> Output {
    let mut child = Command::new(SUSH)
        .arg("-p")
        .env_remove("SUSHHOME")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start sush");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(script.as_bytes())
        .unwrap();
    child.wait_with_output().expect("sush did not finish")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn pipeline_delivers_every_stage_in_order() {
    let output = run_script(&format!("echo hello | {MYTAG} p2 | {MYTAG} p3\nexit\n"));
    assert_eq!(stdout(&output), "hello p2 p3\np2 p3\np3\n");
    assert!(output.status.success());
}

#[test]
fn redirections_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("data.txt");
    let file = file.display();
    let output = run_script(&format!(
        "echo one>{file}\necho two >> {file}\n{MYTAG} end < {file}\n"
    ));
    assert_eq!(stdout(&output), "one end\ntwo end\nend\n");
}

#[test]
fn malformed_line_is_reported_and_skipped() {
    let output = run_script("echo >\necho a > x > y\necho ok\n");
    assert_eq!(stdout(&output), "ok\n");
    assert_eq!(stderr(&output).matches("Error - malformed command line.").count(), 2);
}

#[test]
fn missing_program_does_not_stop_the_shell() {
    let output = run_script("no-such-program-for-sush\necho still here\n");
    assert_eq!(stdout(&output), "still here\n");
    assert!(stderr(&output).contains("Error - could not execute"));
}

#[test]
fn closed_pipe_ends_the_writer_quietly() {
    let output = run_script("yes | head -n 1\nseq 1 2000000 | head -n 1\n");
    assert_eq!(stdout(&output), "y\n1\n");
    assert_eq!(stderr(&output), "");
}

#[test]
fn failed_output_open_mid_pipeline_logs_plain_text() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("missing/out.txt");
    let output = run_script(&format!("true | cat > {}\necho after\n", target.display()));
    assert_eq!(stdout(&output), "after\n");
    let err = stderr(&output);
    assert!(err.contains("Error - could not open output file"));
    assert!(err.contains("reaped in the background"));
    assert!(!err.contains('\x1b'));
}

#[test]
fn exit_status_is_the_last_command_status() {
    assert_eq!(run_script("false\n").status.code(), Some(1));
    assert_eq!(run_script("false\ntrue\n").status.code(), Some(0));
}

#[test]
fn builtins_share_the_shell_environment() {
    let output = run_script("setenv GREETING \"hi there\"\ngetenv GREETING\ngetenv GREETING | cat\n");
    assert_eq!(stdout(&output), "hi there\nhi there\n");
}

#[test]
fn queued_jobs_run_in_order_and_show_output_once() {
    let output = run_script(&format!(
        "queue {MYSPIN} 0 first\nqueue echo second\nsleep 1\noutput 1\noutput 2\noutput 1\nexit\n"
    ));
    assert_eq!(stdout(&output), "first\nsecond\n");
    assert!(stderr(&output).contains("Error - no task 1"));
}

#[test]
fn queue_rejects_redirection_and_pipes() {
    let output = run_script("queue echo hi > /dev/null\nqueue echo hi | cat\nstatus\n");
    assert_eq!(stdout(&output), "");
    assert_eq!(
        stderr(&output)
            .matches("Error - background commands cannot use pipes or redirection.")
            .count(),
        2
    );
}

#[test]
fn cancel_running_job() {
    let output = run_script(&format!(
        "queue {MYSPIN} 30\ncancel 1\nsleep 1\nstatus\nexit\n"
    ));
    let out = stdout(&output);
    assert!(out.contains("1 sending kill signal to pid"), "{}", out);
    assert!(out.contains("1 is canceled"), "{}", out);
    assert!(!out.contains("is running"), "{}", out);
}

#[test]
fn output_of_running_job_is_refused() {
    let output = run_script(&format!("queue {MYSPIN} 2\nstatus\noutput 1\nexit\n"));
    assert!(stdout(&output).starts_with("1 is running as pid "));
    assert!(stderr(&output).contains("Error - task 1 is still running"));
}
