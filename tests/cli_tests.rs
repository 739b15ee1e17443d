#![cfg(feature = "cli_api")]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("cli").unwrap();
    cmd.env_remove("TASK_ENGINE_LOG");
    cmd
}

#[test]
fn builds_a_chain_and_reports_the_critical_path() {
    cli()
        .write_stdin(
            "start 2024-01-01 09:00\n\
             add 0 Survey 8\n\
             add 0 Dig 8\n\
             add 0 Paint 2\n\
             link 1 2\n\
             critical\n\
             show\n\
             quit\n",
        )
        .assert()
        .success()
        .stdout(predicate::str::contains("Task Engine (CLI)"))
        .stdout(predicate::str::contains("Project start set to 2024-01-01 09:00."))
        .stdout(predicate::str::contains("Added task 3."))
        .stdout(predicate::str::contains("Linked 1 -> 2 (fs)."))
        .stdout(predicate::str::contains("Critical path: 1 -> 2"))
        .stdout(predicate::str::contains("| Survey"));
}

#[test]
fn invalid_edits_print_errors_and_keep_going() {
    cli()
        .write_stdin(
            "add 0 a 1\n\
             add 0 b 1\n\
             link 1 2\n\
             link 2 1\n\
             remove 9\n\
             frobnicate\n\
             add 1 child 1\n",
        )
        .assert()
        .success()
        .stdout(predicate::str::contains("would close a cycle"))
        .stdout(predicate::str::contains("Error: task 9 does not exist"))
        .stdout(predicate::str::contains("Unknown command 'frobnicate'"))
        .stdout(predicate::str::contains("Added task 3."));
}

#[test]
fn blocked_edits_are_reported_on_release() {
    cli()
        .write_stdin("block on\nadd 0 a 8\nadd 0 b 8\nblock off\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Scheduling blocked."))
        .stdout(predicate::str::contains("Scheduling resumed: 2 task(s) changed (tasks=2"));
}

#[test]
fn saves_loads_and_exports() {
    let dir = tempdir().unwrap();
    let json = dir.path().join("project.json");
    let csv = dir.path().join("tasks.csv");

    cli()
        .write_stdin(format!(
            "add 0 Frame 16\nholiday 2025-01-02\nsave json {}\nexport csv {}\n",
            json.display(),
            csv.display()
        ))
        .assert()
        .success()
        .stdout(predicate::str::contains("Holiday 2025-01-02 added."))
        .stdout(predicate::str::contains("Project saved."))
        .stdout(predicate::str::contains("Task list exported to"));
    assert!(csv.exists());

    cli()
        .write_stdin(format!("load json {}\ntree\n", json.display()))
        .assert()
        .success()
        .stdout(predicate::str::contains("Project loaded (tasks=1"))
        .stdout(predicate::str::contains("Frame"));

    cli()
        .write_stdin(format!("load json {}\n", dir.path().join("nope.json").display()))
        .assert()
        .success()
        .stdout(predicate::str::contains("Error loading project: no project stored"));
}
