//! Fund Store: persistence of the funds document.
//!
//! ## Versioning
//!
//! Every backend hands out an opaque [`Version`] with each read and accepts an
//! expected version with each write. A write whose expected version no longer
//! matches what is stored fails with [`PondoError::VersionConflict`] and leaves
//! the stored document untouched. There is no locking across processes; the
//! conditional put is the only consistency mechanism.
//!
//! | Backend  | Version marker                      |
//! |----------|-------------------------------------|
//! | `file`   | SHA-256 of the stored bytes         |
//! | `github` | blob `sha` from the contents API    |
//! | `memory` | in-process write counter            |
//!
//! Backends implement the three primitives (`fetch`, `current_version`,
//! `put`). The read-modify-write protocol (`read`, `write`) is shared.

pub mod file;
pub mod github;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::errors::{PondoError, Result};
use crate::funds::FundsDocument;

pub use file::FileFundStore;
pub use github::{GitHubFundStore, GitHubLocation};
pub use memory::MemoryFundStore;

/// Opaque marker for one stored revision of the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(pub String);

impl Version {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value paired with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Version,
}

#[async_trait]
pub trait FundStore: Send + Sync {
    /// The stored document, or `None` if nothing has been written yet.
    async fn fetch(&self) -> Result<Option<Versioned<FundsDocument>>>;

    /// The stored version marker, or `None` if nothing has been written yet.
    async fn current_version(&self) -> Result<Option<Version>>;

    /// Replace the stored document if its version still equals `expected`.
    ///
    /// `expected = None` means the document must not exist yet.
    async fn put(&self, document: &FundsDocument, expected: Option<&Version>) -> Result<Version>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;

    /// Read the current document, seeding the default one on first run.
    async fn read(&self) -> Result<Versioned<FundsDocument>> {
        if let Some(current) = self.fetch().await? {
            return Ok(current);
        }

        let seed = FundsDocument::seed();
        match self.put(&seed, None).await {
            Ok(version) => {
                info!("Seeded default funds document into {}", self.describe());
                Ok(Versioned {
                    value: seed,
                    version,
                })
            }
            // Another writer created the document first; use theirs.
            Err(PondoError::VersionConflict { .. }) => self.fetch().await?.ok_or_else(|| {
                PondoError::StorageUnavailable(
                    "document vanished after a concurrent create".to_string(),
                )
            }),
            Err(e) => Err(e),
        }
    }

    /// Validate and persist `document`.
    ///
    /// With `Some(expected)` the write is conditioned on that version. With
    /// `None` the current version is fetched immediately before the put and
    /// the put is conditioned on it, so a writer that slips in between still
    /// produces a [`PondoError::VersionConflict`].
    async fn write(&self, document: &FundsDocument, expected: Option<&Version>) -> Result<Version> {
        document.validate()?;
        match expected {
            Some(version) => self.put(document, Some(version)).await,
            None => {
                let current = self.current_version().await?;
                self.put(document, current.as_ref()).await
            }
        }
    }
}

/// Write with the unconditional-update policy used by the API: on a version
/// conflict, retry exactly once against a freshly fetched version. A second
/// conflict is returned to the caller.
pub async fn write_with_retry(store: &dyn FundStore, document: &FundsDocument) -> Result<Version> {
    match store.write(document, None).await {
        Err(PondoError::VersionConflict { expected, found }) => {
            warn!(
                "Version conflict writing funds (expected {expected}, found {found}); retrying once"
            );
            store.write(document, None).await
        }
        other => other,
    }
}

/// Build the backend selected in configuration.
pub fn from_config(storage: &StorageConfig, client: Client) -> Arc<dyn FundStore> {
    match storage {
        StorageConfig::File { path } => Arc::new(FileFundStore::new(path.clone())),
        StorageConfig::GitHub {
            api_url,
            token,
            repo,
            branch,
            file_path,
        } => Arc::new(GitHubFundStore::new(
            client,
            GitHubLocation {
                api_url: api_url.clone(),
                repo: repo.clone(),
                branch: branch.clone(),
                path: file_path.clone(),
            },
            token.clone(),
        )),
        StorageConfig::Memory => Arc::new(MemoryFundStore::new()),
    }
}

pub(crate) fn conflict(expected: Option<&Version>, found: Option<&Version>) -> PondoError {
    let show = |v: Option<&Version>| v.map_or_else(|| "<absent>".to_string(), |v| v.0.clone());
    PondoError::VersionConflict {
        expected: show(expected),
        found: show(found),
    }
}
