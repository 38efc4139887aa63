//! CLI integration tests

use ledger_test_helpers::prelude::*;
use predicates::prelude::*;
use serde_json::json;

const SETTINGS: &str = r#"{"currency":"EUR","mileageRateCents":67}"#;

#[test]
fn test_ledger_help() {
    ledger_command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("DriverLedger"));
}

#[test]
fn test_ledger_version() {
    ledger_command()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_init_writes_config_once() {
    let dirs = LedgerDirs::new();

    ledger_in(&dirs)
        .arg("init")
        .assert()
        .success()
        .stderr(predicate::str::contains("Data directory initialized"));
    assert!(dirs.data_dir().join("config.toml").is_file());

    ledger_in(&dirs)
        .arg("init")
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_invalid_config_exits_with_config_error() {
    let dirs = LedgerDirs::new();
    std::fs::write(dirs.data_dir().join("config.toml"), "[sync]\nmax_retries = 0\n").unwrap();

    ledger_in(&dirs).arg("pending").assert().code(101);
}

#[test]
fn test_missing_user_is_usage_error() {
    let dirs = LedgerDirs::new();
    ledger_command()
        .arg("--data-dir")
        .arg(dirs.data_dir())
        .arg("pending")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_put_rejects_malformed_typed_payload() {
    let dirs = LedgerDirs::new();
    ledger_in(&dirs)
        .args(["put", "deliveryLogs", r#"{"not": "a list"}"#])
        .assert()
        .code(2);

    ledger_in(&dirs)
        .args(["put", "settings", "{broken"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid JSON"));
}

#[test]
fn test_offline_put_is_queued_and_cached() {
    let dirs = LedgerDirs::new();

    ledger_in(&dirs)
        .args(["--offline", "put", "settings", SETTINGS])
        .assert()
        .success()
        .stderr(predicate::str::contains("offline, queued"));

    assert!(dirs.remote_document(TEST_USER, "settings").is_none());
    // Offline never touches the remote directory
    assert!(!dirs.remote_dir().join("users").exists());

    ledger_in(&dirs)
        .args(["pending", "--json"])
        .assert()
        .success()
        .stdout(json_pointer_eq("/0/collection", json!("settings")))
        .stdout(json_pointer_eq("/0/operation", json!("create")))
        .stdout(json_pointer_eq("/0/retryCount", json!(0)));

    ledger_in(&dirs)
        .args(["show", "settings", "--json"])
        .assert()
        .success()
        .stdout(json_pointer_eq("/data/currency", json!("EUR")))
        .stdout(json_pointer_eq("/pending", json!(1)));
}

#[test]
fn test_online_put_reaches_remote() {
    let dirs = LedgerDirs::new();

    ledger_in(&dirs)
        .args(["put", "settings", SETTINGS])
        .assert()
        .success()
        .stderr(predicate::str::contains("Saved and synced settings"));

    assert_eq!(
        dirs.remote_document(TEST_USER, "settings"),
        Some(json!({"currency": "EUR", "mileageRateCents": 67}))
    );
    ledger_in(&dirs)
        .args(["pending", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn test_sync_pushes_queued_entries_in_order() {
    let dirs = LedgerDirs::new();

    ledger_in(&dirs)
        .args(["--offline", "put", "expenses", "[]"])
        .assert()
        .success();
    ledger_in(&dirs)
        .args([
            "--offline",
            "put",
            "expenses",
            r#"[{"id":"e1","date":"2024-03-01","category":"fuel","amountCents":4200}]"#,
        ])
        .assert()
        .success();

    ledger_in(&dirs).arg("sync").assert().success().stderr(predicate::str::contains("Pushed 2"));

    let remote = dirs.remote_document(TEST_USER, "expenses").unwrap();
    assert_eq!(remote[0]["id"], "e1");
}

#[test]
fn test_sync_with_unreachable_remote_keeps_queue() {
    let dirs = LedgerDirs::new();
    ledger_in(&dirs)
        .args(["--offline", "put", "settings", SETTINGS])
        .assert()
        .success();

    dirs.take_remote_offline();
    ledger_in(&dirs)
        .arg("sync")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("stay queued"));

    ledger_in(&dirs)
        .args(["pending", "--json"])
        .assert()
        .success()
        .stdout(json_pointer_eq("/0/collection", json!("settings")));
}

#[test]
fn test_refresh_reads_remote_value() {
    let dirs = LedgerDirs::new();
    dirs.write_remote_document(TEST_USER, "settings", &json!({"currency": "JPY"}));

    ledger_in(&dirs)
        .args(["refresh", "settings"])
        .assert()
        .success()
        .stdout(predicate::str::contains("JPY"));

    ledger_in(&dirs)
        .args(["show", "settings", "--json"])
        .assert()
        .success()
        .stdout(json_pointer_eq("/data/currency", json!("JPY")));
}

#[test]
fn test_refresh_offline_fails() {
    let dirs = LedgerDirs::new();
    ledger_in(&dirs)
        .args(["--offline", "refresh", "settings"])
        .assert()
        .code(3);
}

#[test]
fn test_status_reports_pending_and_offline() {
    let dirs = LedgerDirs::new();
    ledger_in(&dirs)
        .args(["--offline", "put", "settings", SETTINGS])
        .assert()
        .success();

    ledger_in(&dirs)
        .args(["--offline", "status", "--json"])
        .assert()
        .success()
        .stdout(json_pointer_eq("/user", json!(TEST_USER)))
        .stdout(json_pointer_eq("/online", json!(false)))
        .stdout(json_pointer_eq("/collections/1/collection", json!("settings")))
        .stdout(json_pointer_eq("/collections/1/pending", json!(1)))
        .stdout(json_pointer_eq("/collections/1/status/state", json!("offline")));
}

#[test]
fn test_logout_clears_local_state() {
    let dirs = LedgerDirs::new();
    ledger_in(&dirs)
        .args(["--offline", "put", "settings", SETTINGS])
        .assert()
        .success();

    ledger_in(&dirs)
        .args(["--offline", "logout"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Logged out"));

    ledger_in(&dirs)
        .args(["pending", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
    ledger_in(&dirs)
        .args(["show", "settings", "--json"])
        .assert()
        .success()
        .stdout(json_pointer_eq("/data", json!(null)));
}

#[test]
fn test_exhausted_sync_fails_without_leaking_user_paths() {
    let dirs = LedgerDirs::new();
    ledger_in(&dirs)
        .args(["--offline", "put", "settings", SETTINGS])
        .assert()
        .success();

    // Remote root is reachable but every write under users/ fails
    std::fs::write(dirs.remote_dir().join("users"), "not a directory").unwrap();

    ledger_in(&dirs)
        .env("RUST_LOG", "warn")
        .arg("sync")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Dropped 1"))
        .stderr(no_user_identifiers(TEST_USER));

    ledger_in(&dirs)
        .args(["pending", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}
