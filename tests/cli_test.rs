use assert_cmd::Command;
use assert_cmd::cargo_bin;
use predicates::prelude::*;

fn qaintake() -> Command {
    let mut cmd = Command::new(cargo_bin!("qaintake"));
    cmd.env_clear().env("BOT_DEFAULT_LANG", "en");
    cmd
}

#[test]
fn test_encode_signs_and_decode_verifies() -> Result<(), Box<dyn std::error::Error>> {
    let output = qaintake()
        .args(["encode", "--geo", "in", "--tests", "3", "--payout", "withdraw"])
        .args(["--method", "UPI", "--secret", "s3cret"])
        .output()?;
    assert!(output.status.success());
    let payload = String::from_utf8(output.stdout)?.trim().to_string();
    assert!(payload.starts_with("calc_v1_geoIN_tests3_payoutW_method<"));
    assert!(payload.contains("_sign<"));

    qaintake()
        .args(["decode", payload.as_str(), "--secret", "s3cret"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"grammar\": \"compact-v1\""))
        .stdout(predicate::str::contains("\"geo\": \"IN\""))
        .stdout(predicate::str::contains("\"testCount\": 3"))
        .stdout(predicate::str::contains("\"paymentMethod\": \"UPI\""));

    qaintake()
        .args(["decode", payload.as_str(), "--secret", "other"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("signature could not be verified"));

    Ok(())
}

#[test]
fn test_decode_reads_secret_from_environment() -> Result<(), Box<dyn std::error::Error>> {
    let output = qaintake()
        .env("PAYLOAD_HMAC_SECRET", "from-env")
        .args(["encode", "--geo", "BD", "--tests", "1"])
        .output()?;
    assert!(output.status.success());
    let payload = String::from_utf8(output.stdout)?.trim().to_string();

    qaintake()
        .env("PAYLOAD_HMAC_SECRET", "from-env")
        .args(["decode", payload.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"payout\": \"none\""));

    Ok(())
}

#[test]
fn test_encode_rejects_bad_input() {
    qaintake()
        .args(["encode", "--geo", "IN", "--tests", "40"])
        .assert()
        .failure();

    qaintake()
        .args(["encode", "--geo", "IN", "--tests", "2", "--payout", "maybe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown payout option"));
}

#[test]
fn test_chat_places_an_order() {
    qaintake()
        .env("ADMIN_IDS", "9")
        .args(["chat", "--user-id", "5", "--username", "alice", "--operator-echo"])
        .write_stdin("/start\nIN\nUPI\n3\nwithdraw\nskip\nskip\nconfirm\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: €265"))
        .stdout(predicate::str::contains("✅ Order #1 created."))
        .stdout(predicate::str::contains("[operator 9]"));
}

#[test]
fn test_chat_without_session_asks_to_start() {
    qaintake()
        .arg("chat")
        .write_stdin("hello\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Send /start to create an order."));
}

#[test]
fn test_export_writes_header_for_empty_store() {
    qaintake()
        .arg("export")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("id,status,origin"));
}

#[test]
fn test_export_rejects_unknown_status() {
    qaintake()
        .args(["export", "--status", "shipped"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown status"));
}
