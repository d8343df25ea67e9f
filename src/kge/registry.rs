//! Versioned snapshot registry
//!
//! Holds the current snapshot pointer and the retained history. Publishing assigns
//! a strictly increasing version and swaps the pointer atomically; readers holding
//! an older `Arc` keep using it undisturbed.

use crate::kge::snapshot::{EmbeddingSnapshot, SnapshotError, SnapshotResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Snapshots retained for rollback (0 keeps everything). The current snapshot
    /// is never evicted.
    pub max_history: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_history: 8 }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    current: Option<Arc<EmbeddingSnapshot>>,
    history: BTreeMap<u64, Arc<EmbeddingSnapshot>>,
    last_version: u64,
}

/// Snapshot store with atomic publish and rollback
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    config: RegistryConfig,
    state: RwLock<RegistryState>,
}

impl SnapshotRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Assign the next version, make the snapshot current and return it
    pub fn publish(&self, snapshot: EmbeddingSnapshot) -> Arc<EmbeddingSnapshot> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.last_version += 1;
        let version = state.last_version;

        let snapshot = Arc::new(snapshot.with_version(version));
        state.history.insert(version, Arc::clone(&snapshot));
        state.current = Some(Arc::clone(&snapshot));
        self.evict(&mut state);

        info!(
            "Published snapshot v{} ({} entities, {} relations, {:?})",
            version,
            snapshot.entity_count(),
            snapshot.relation_count(),
            snapshot.metadata().kind
        );
        snapshot
    }

    fn evict(&self, state: &mut RegistryState) {
        if self.config.max_history == 0 {
            return;
        }
        let current = state.current.as_ref().map(|s| s.version());
        while state.history.len() > self.config.max_history {
            let Some(oldest) = state.history.keys().copied().find(|&v| Some(v) != current) else {
                break;
            };
            state.history.remove(&oldest);
            debug!("Evicted snapshot v{}", oldest);
        }
    }

    /// Snapshot answering queries right now
    pub fn current(&self) -> Option<Arc<EmbeddingSnapshot>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    pub fn current_version(&self) -> Option<u64> {
        self.current().map(|s| s.version())
    }

    pub fn get(&self, version: u64) -> SnapshotResult<Arc<EmbeddingSnapshot>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .get(&version)
            .cloned()
            .ok_or(SnapshotError::UnknownVersion(version))
    }

    /// Retained versions, ascending
    pub fn versions(&self) -> Vec<u64> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .keys()
            .copied()
            .collect()
    }

    /// Re-point the current snapshot to a retained version. Newer snapshots stay
    /// in the history untouched and the version counter keeps counting.
    pub fn rollback(&self, version: u64) -> SnapshotResult<Arc<EmbeddingSnapshot>> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = state
            .history
            .get(&version)
            .cloned()
            .ok_or(SnapshotError::UnknownVersion(version))?;
        state.current = Some(Arc::clone(&snapshot));
        info!("Rolled back to snapshot v{}", version);
        Ok(snapshot)
    }
}
