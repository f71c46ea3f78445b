use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn kvctl(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kvctl").unwrap();
    cmd.arg("--data").arg(dir.path()).arg("--block-ms").arg("10");
    cmd
}

#[test]
fn test_ping() {
    let dir = TempDir::new().unwrap();

    kvctl(&dir)
        .arg("ping")
        .assert()
        .success()
        .stdout(predicate::str::contains("PONG"));
}

#[test]
fn test_set_then_get_across_processes() {
    let dir = TempDir::new().unwrap();

    kvctl(&dir)
        .args(["set-key", "foo", "bar"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Key 'foo' set successfully and recorded invalidation (trimmed to 1000).",
        ));

    kvctl(&dir)
        .args(["get-key", "foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("foo = bar"));
}

#[test]
fn test_get_key_not_found() {
    let dir = TempDir::new().unwrap();

    kvctl(&dir)
        .args(["get-key", "nonexistent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Key 'nonexistent' not found."));
}

#[test]
fn test_read_stream_resumes_from_checkpoint() {
    let dir = TempDir::new().unwrap();

    kvctl(&dir).args(["set-key", "a", "1"]).assert().success();
    kvctl(&dir).args(["set-key", "b", "2"]).assert().success();

    kvctl(&dir)
        .arg("read-stream")
        .assert()
        .success()
        .stdout(predicate::str::contains("invalidate a").and(predicate::str::contains("invalidate b")));

    // A new process continues after the persisted cursor
    kvctl(&dir)
        .arg("read-stream")
        .assert()
        .success()
        .stdout(predicate::str::contains("No new events."));

    kvctl(&dir).args(["set-key", "c", "3"]).assert().success();

    kvctl(&dir)
        .arg("read-stream")
        .assert()
        .success()
        .stdout(predicate::str::contains("invalidate c").and(predicate::str::contains("invalidate a").not()));
}

#[test]
fn test_range_respects_max_len() {
    let dir = TempDir::new().unwrap();

    for i in 0..5 {
        kvctl(&dir)
            .args(["--max-len", "3", "set-key", &format!("k{i}"), "v"])
            .assert()
            .success();
    }

    kvctl(&dir)
        .args(["range", "--count", "10"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("key=k2")
                .and(predicate::str::contains("key=k4"))
                .and(predicate::str::contains("key=k1").not())
                .and(predicate::str::contains("(3 of 3 entries")),
        );
}

#[test]
fn test_bad_cursor_fails() {
    let dir = TempDir::new().unwrap();

    kvctl(&dir)
        .args(["read-stream", "--from", "not-an-id"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Error:"));
}

#[test]
fn test_demo() {
    let dir = TempDir::new().unwrap();

    kvctl(&dir)
        .args(["demo", "--callers", "5", "--delay-ms", "20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loader calls: 1"));
}
