//! In-process backend. Nothing survives a restart.

#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{conflict, FundStore, Version, Versioned};
use crate::errors::Result;
use crate::funds::FundsDocument;

#[derive(Default)]
pub struct MemoryFundStore {
    slot: RwLock<Option<(FundsDocument, u64)>>,
    /// Concurrent writes to simulate on upcoming puts.
    #[cfg(test)]
    interference: AtomicUsize,
}

impl MemoryFundStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` puts behave as if another writer had bumped the
    /// version just before them.
    #[cfg(test)]
    pub fn inject_conflicts(&self, n: usize) {
        self.interference.store(n, Ordering::SeqCst);
    }
}

fn version_of(counter: u64) -> Version {
    Version(counter.to_string())
}

#[async_trait]
impl FundStore for MemoryFundStore {
    async fn fetch(&self) -> Result<Option<Versioned<FundsDocument>>> {
        Ok(self.slot.read().as_ref().map(|(doc, counter)| Versioned {
            value: doc.clone(),
            version: version_of(*counter),
        }))
    }

    async fn current_version(&self) -> Result<Option<Version>> {
        Ok(self.slot.read().as_ref().map(|(_, counter)| version_of(*counter)))
    }

    async fn put(&self, document: &FundsDocument, expected: Option<&Version>) -> Result<Version> {
        let mut slot = self.slot.write();

        #[cfg(test)]
        if self
            .interference
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            if let Some((_, counter)) = slot.as_mut() {
                *counter += 1;
            }
        }

        let found = slot.as_ref().map(|(_, counter)| version_of(*counter));
        if found.as_ref() != expected {
            return Err(conflict(expected, found.as_ref()));
        }

        let next = slot.as_ref().map_or(1, |(_, counter)| counter + 1);
        *slot = Some((document.clone(), next));
        Ok(version_of(next))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
