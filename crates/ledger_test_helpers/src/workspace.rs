//! Temporary directories for integration tests
//!
//! A [`LedgerDirs`] holds a device data directory and a directory acting as
//! the remote document store, laid out the way the `ledger` binary expects.

use assert_fs::TempDir;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// User id the CLI helpers sign in as
pub const TEST_USER: &str = "test-driver";

/// Create a temporary directory for testing
///
/// The directory will be automatically cleaned up when the `TempDir` is dropped.
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Device data dir plus file-backed remote, both under one temp dir
pub struct LedgerDirs {
    root: TempDir,
}

impl LedgerDirs {
    pub fn new() -> Self {
        let root = temp_dir();
        fs::create_dir_all(root.path().join("data")).expect("Failed to create data directory");
        fs::create_dir_all(root.path().join("remote")).expect("Failed to create remote directory");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    pub fn remote_dir(&self) -> PathBuf {
        self.root.path().join("remote")
    }

    /// File holding `collection` for `user` on the remote side
    pub fn remote_document_path(&self, user: &str, collection: &str) -> PathBuf {
        self.remote_dir()
            .join("users")
            .join(user)
            .join("data")
            .join(format!("{}.json", collection))
    }

    /// Current remote value, `None` when the document does not exist
    pub fn remote_document(&self, user: &str, collection: &str) -> Option<Value> {
        let path = self.remote_document_path(user, collection);
        let content = fs::read_to_string(path).ok()?;
        Some(serde_json::from_str(&content).expect("Remote document is not valid JSON"))
    }

    /// Write a document as if another device had saved it
    pub fn write_remote_document(&self, user: &str, collection: &str, value: &Value) {
        let path = self.remote_document_path(user, collection);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create remote parent directory");
        }
        fs::write(&path, serde_json::to_vec_pretty(value).expect("Failed to encode document"))
            .expect("Failed to write remote document");
    }

    /// Make the remote unreachable by removing its directory
    pub fn take_remote_offline(&self) {
        fs::remove_dir_all(self.remote_dir()).expect("Failed to remove remote directory");
    }
}

impl Default for LedgerDirs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dirs_are_created() {
        let dirs = LedgerDirs::new();
        assert!(dirs.data_dir().is_dir());
        assert!(dirs.remote_dir().is_dir());
    }

    #[test]
    fn test_remote_document_roundtrip() {
        let dirs = LedgerDirs::new();
        assert!(dirs.remote_document(TEST_USER, "settings").is_none());

        dirs.write_remote_document(TEST_USER, "settings", &json!({"currency": "EUR"}));
        assert_eq!(
            dirs.remote_document(TEST_USER, "settings"),
            Some(json!({"currency": "EUR"}))
        );
        assert!(dirs
            .remote_document_path(TEST_USER, "settings")
            .ends_with("users/test-driver/data/settings.json"));
    }
}
