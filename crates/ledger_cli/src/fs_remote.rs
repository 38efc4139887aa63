//! File-backed remote document store
//!
//! Documents live as JSON files under a root directory, one file per
//! `users/{uid}/data/{collection}` path. A shared directory (network mount,
//! synced folder) stands in for the managed backend. The root directory
//! missing means the remote is unreachable.

use async_trait::async_trait;
use ledger_sync::{DocumentPath, ReachabilityProbe, RemoteError, RemoteStore, Subscription};
use notify::{RecursiveMode, Watcher};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

pub struct FsRemote {
    root: PathBuf,
}

impl FsRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_for(&self, path: &DocumentPath) -> PathBuf {
        self.root.join(format!("{}.json", path.as_str()))
    }

    fn ensure_reachable(&self) -> Result<(), RemoteError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(RemoteError::Unavailable(format!(
                "remote directory {} is unreachable",
                self.root.display()
            )))
        }
    }
}

/// Map a raw file read to a document; a missing file is no document
fn decode_document(read: std::io::Result<Vec<u8>>) -> Result<Option<Value>, RemoteError> {
    match read {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RemoteError::Rejected(format!("malformed document: {}", e))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RemoteError::Unavailable(e.to_string())),
    }
}

fn read_document(file: &Path) -> Result<Option<Value>, RemoteError> {
    decode_document(std::fs::read(file))
}

#[async_trait]
impl RemoteStore for FsRemote {
    async fn get_document(&self, path: &DocumentPath) -> Result<Option<Value>, RemoteError> {
        self.ensure_reachable()?;
        decode_document(tokio::fs::read(self.file_for(path)).await)
    }

    async fn set_document(&self, path: &DocumentPath, value: &Value) -> Result<(), RemoteError> {
        self.ensure_reachable()?;
        let file = self.file_for(path);

        if value.is_null() {
            return match tokio::fs::remove_file(&file).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(RemoteError::Unavailable(e.to_string())),
            };
        }

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        }

        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| RemoteError::Rejected(e.to_string()))?;

        // Readers never observe a half-written document
        let tmp = file.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        tokio::fs::rename(&tmp, &file)
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        tracing::debug!("Wrote remote document {}", path);
        Ok(())
    }

    fn subscribe(&self, path: &DocumentPath) -> Result<Subscription, RemoteError> {
        self.ensure_reachable()?;
        let file = self.file_for(path);
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| RemoteError::Rejected(format!("invalid document path {}", path)))?;
        std::fs::create_dir_all(&dir).map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        let mut last = read_document(&file).unwrap_or(None);
        if let Some(current) = &last {
            let _ = tx.send(current.clone());
        }

        let file_name = file.file_name().map(|name| name.to_os_string());
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            let touches_document = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if !touches_document {
                return;
            }

            // One save fires several events; forward each distinct value once
            let current = match read_document(&file) {
                Ok(current) => current,
                Err(e) => {
                    tracing::debug!("Skipping unreadable remote document: {}", e);
                    return;
                }
            };
            if current != last {
                last = current.clone();
                let _ = tx.send(current.unwrap_or(Value::Null));
            }
        })
        .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        Ok(Subscription::with_guard(rx, watcher))
    }
}

/// Reachability of the remote directory
pub struct RemoteDirProbe {
    root: PathBuf,
}

impl RemoteDirProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ReachabilityProbe for RemoteDirProbe {
    async fn probe(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }
}
