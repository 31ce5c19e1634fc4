//! Configuration repository port
//!
//! Read-only source of per-call snapshots. The dashboard/persistence side
//! that writes configurations lives outside this codebase; the orchestrator
//! only ever loads.

use async_trait::async_trait;

use crate::{ConfigError, ConfigSnapshot};

/// Read-only access to per-call configuration.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn load(&self, call_id: &str) -> Result<ConfigSnapshot, ConfigError>;
}

/// Repository that hands every call the same validated snapshot. Used by the
/// server when no external config store is wired, and by tests.
pub struct StaticConfigRepository {
    snapshot: ConfigSnapshot,
}

impl StaticConfigRepository {
    pub fn new(mut snapshot: ConfigSnapshot) -> Result<Self, ConfigError> {
        snapshot.validate()?;
        Ok(Self { snapshot })
    }
}

#[async_trait]
impl ConfigRepository for StaticConfigRepository {
    async fn load(&self, _call_id: &str) -> Result<ConfigSnapshot, ConfigError> {
        Ok(self.snapshot.clone())
    }
}
