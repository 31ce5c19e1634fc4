//! Session management
//!
//! Tracks the orchestrators currently running in this process. A call is
//! registered when its transport connects and removed when its engine loop
//! returns; the manager can fan an emergency stop out to every live call on
//! shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use voice_orchestrator_core::{ControlMessage, TraceId};
use voice_orchestrator_pipeline::ControlChannel;

use crate::ServerError;

/// Handle to one live call.
pub struct CallHandle {
    pub call_id: String,
    pub control: ControlChannel,
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

impl CallHandle {
    /// Ask the call to stop; the orchestrator handles teardown.
    pub fn stop(&self) {
        self.control
            .publish(ControlMessage::emergency_stop(TraceId::session()));
    }
}

/// Live-call registry with a capacity cap.
pub struct SessionManager {
    calls: RwLock<HashMap<String, Arc<CallHandle>>>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Register a new call. Fails when the process is at capacity.
    pub fn register(
        &self,
        call_id: impl Into<String>,
        control: ControlChannel,
        cancel: CancellationToken,
    ) -> Result<Arc<CallHandle>, ServerError> {
        let call_id = call_id.into();
        let mut calls = self.calls.write();
        if calls.len() >= self.max_sessions {
            return Err(ServerError::Session(format!(
                "max sessions reached ({})",
                self.max_sessions
            )));
        }
        let handle = Arc::new(CallHandle {
            call_id: call_id.clone(),
            control,
            cancel,
            started_at: Instant::now(),
        });
        calls.insert(call_id.clone(), handle.clone());
        tracing::info!(%call_id, active = calls.len(), "call registered");
        crate::metrics::record_active_calls(calls.len());
        Ok(handle)
    }

    pub fn remove(&self, call_id: &str) {
        let mut calls = self.calls.write();
        if calls.remove(call_id).is_some() {
            tracing::info!(%call_id, active = calls.len(), "call removed");
            crate::metrics::record_active_calls(calls.len());
        }
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<CallHandle>> {
        self.calls.read().get(call_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.calls.read().len()
    }

    /// Emergency-stop every live call (process shutdown).
    pub fn shutdown_all(&self) {
        let calls = self.calls.read();
        for handle in calls.values() {
            handle.stop();
        }
        tracing::info!(count = calls.len(), "shutdown signalled to all calls");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(manager: &SessionManager, id: &str) -> Result<Arc<CallHandle>, ServerError> {
        manager.register(id, ControlChannel::new(), CancellationToken::new())
    }

    #[test]
    fn test_register_and_remove() {
        let manager = SessionManager::new(4);
        let handle = register(&manager, "call-1").unwrap();
        assert_eq!(manager.count(), 1);
        assert_eq!(handle.call_id, "call-1");
        assert!(manager.get("call-1").is_some());

        manager.remove("call-1");
        assert_eq!(manager.count(), 0);
        assert!(manager.get("call-1").is_none());
    }

    #[test]
    fn test_capacity_cap() {
        let manager = SessionManager::new(1);
        register(&manager, "call-1").unwrap();
        assert!(register(&manager, "call-2").is_err());
        manager.remove("call-1");
        assert!(register(&manager, "call-2").is_ok());
    }

    #[test]
    fn test_shutdown_all_publishes_stop() {
        let manager = SessionManager::new(4);
        let handle = register(&manager, "call-1").unwrap();
        manager.shutdown_all();
        assert!(handle.control.has_pending());
    }
}
