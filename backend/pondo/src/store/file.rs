//! Local JSON file backend.
//!
//! Writes go to a sibling temp file which is then renamed over the target,
//! so a crash mid-write leaves either the old or the new document on disk.
//! Writes inside this process are serialized by a mutex; the version check
//! runs while the mutex is held.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use super::{conflict, FundStore, Version, Versioned};
use crate::errors::{PondoError, Result};
use crate::funds::FundsDocument;

pub struct FileFundStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileFundStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "funds.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn content_version(bytes: &[u8]) -> Version {
    Version(hex::encode(Sha256::digest(bytes)))
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl FundStore for FileFundStore {
    async fn fetch(&self) -> Result<Option<Versioned<FundsDocument>>> {
        let Some(bytes) = self.read_bytes().await? else {
            return Ok(None);
        };
        let value: FundsDocument = serde_json::from_slice(&bytes)
            .map_err(|e| PondoError::CorruptData(format!("{}: {e}", self.path.display())))?;
        Ok(Some(Versioned {
            value,
            version: content_version(&bytes),
        }))
    }

    async fn current_version(&self) -> Result<Option<Version>> {
        Ok(self.read_bytes().await?.map(|bytes| content_version(&bytes)))
    }

    async fn put(&self, document: &FundsDocument, expected: Option<&Version>) -> Result<Version> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| PondoError::CorruptData(e.to_string()))?;

        let _guard = self.write_lock.lock().await;

        let found = self.current_version().await?;
        if found.as_ref() != expected {
            return Err(conflict(expected, found.as_ref()));
        }

        ensure_parent(&self.path).await?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        let version = content_version(&bytes);
        debug!("Wrote {} bytes to {} ({version})", bytes.len(), self.path.display());
        Ok(version)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
