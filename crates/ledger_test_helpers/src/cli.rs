//! CLI command builders for tests
//!
//! Commands come with a clean environment so a developer's own
//! `LEDGER_*` variables never leak into test runs.

use crate::workspace::{LedgerDirs, TEST_USER};
use assert_cmd::Command;

const LEDGER_ENV: [&str; 3] = ["LEDGER_DATA_DIR", "LEDGER_USER", "LEDGER_REMOTE_DIR"];

/// Get a Command for the `ledger` binary with clean environment
///
/// This command is pre-configured with:
/// - `RUST_LOG=error` to suppress INFO/DEBUG logs in tests
/// - No `LEDGER_*` variables from the calling environment
#[allow(deprecated)]
pub fn ledger_command() -> Command {
    command_for("ledger")
}

/// Get a Command for a specific binary with clean environment
#[allow(deprecated)]
pub fn command_for(bin_name: &str) -> Command {
    let mut cmd = Command::cargo_bin(bin_name)
        .unwrap_or_else(|_| panic!("Failed to find {} binary", bin_name));
    cmd.env("RUST_LOG", "error");
    for var in LEDGER_ENV {
        cmd.env_remove(var);
    }
    cmd
}

/// `ledger` command bound to the temp directories of `dirs` as [`TEST_USER`]
///
/// # Example
///
/// ```rust,no_run
/// use ledger_test_helpers::prelude::*;
///
/// let dirs = LedgerDirs::new();
/// ledger_in(&dirs).args(["pending"]).assert().success();
/// ```
pub fn ledger_in(dirs: &LedgerDirs) -> Command {
    let mut cmd = ledger_command();
    cmd.env("LEDGER_DATA_DIR", dirs.data_dir())
        .env("LEDGER_REMOTE_DIR", dirs.remote_dir())
        .env("LEDGER_USER", TEST_USER);
    cmd
}
