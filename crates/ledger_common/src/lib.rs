//! Common types and errors for DriverLedger
//!
//! This crate provides the typed collection records and the logging setup
//! shared by every DriverLedger component.

pub mod records;
pub mod sanitizer;
pub mod telemetry;

use thiserror::Error;

pub use records::{Collection, DeliveryLog, DeliveryLogs, DriverSettings, Expense, Expenses, Settings};

/// Errors raised outside the sync core (configuration, IO, input validation)
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Process exit codes used by the `ledger` binary
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_SYNC_FAILED: i32 = 3;
pub const EXIT_CONFIG_ERROR: i32 = 101;
