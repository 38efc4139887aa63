//! Shared test utilities for DriverLedger test suites
//!
//! # Modules
//!
//! - [`workspace`]: Temporary data and remote directories
//! - [`cli`]: Command builders with pre-configured environments
//! - [`logging`]: Test logging configuration
//! - [`assertions`]: Domain-specific assertion helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use ledger_test_helpers::prelude::*;
//!
//! fn my_test() {
//!     let dirs = LedgerDirs::new();
//!
//!     // RUST_LOG=error, data and remote dirs pointed at the temp tree
//!     ledger_in(&dirs)
//!         .args(["status"])
//!         .assert()
//!         .success();
//! }
//! ```

pub mod assertions;
pub mod cli;
pub mod logging;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::cli::{command_for, ledger_command, ledger_in};
    pub use crate::logging::{init_test_logging, suppress_logs};
    pub use crate::workspace::{temp_dir, LedgerDirs, TEST_USER};
}
