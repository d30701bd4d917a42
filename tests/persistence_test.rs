#![cfg(feature = "storage-rocksdb")]

use assert_cmd::Command;
use assert_cmd::cargo_bin;
use tempfile::tempdir;

fn chat(db_path: &std::path::Path, script: &str) -> String {
    let output = Command::new(cargo_bin!("qaintake"))
        .env_clear()
        .env("BOT_DEFAULT_LANG", "en")
        .arg("chat")
        .arg("--user-id")
        .arg("5")
        .arg("--db-path")
        .arg(db_path)
        .write_stdin(script)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: answer two questions and quit
    let first = chat(&db_path, "/start\nIN\nUPI\n");
    assert!(first.contains("How many test runs"));

    // 2. Second run: the draft survives and any message resumes it
    let second = chat(&db_path, "hello\n3\nwithdraw\nskip\nskip\nconfirm\n");
    assert!(second.contains("Continuing order #1."));
    assert!(second.contains("✅ Order #1 created."));

    // 3. Export sees the submitted order
    let output = Command::new(cargo_bin!("qaintake"))
        .env_clear()
        .arg("export")
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    let csv = String::from_utf8_lossy(&output.stdout);
    assert!(csv.contains("1,awaiting_payment,chat,5,"));
}
