//! Control channel
//!
//! Dedicated signalling path that bypasses the data queues, so an interrupt
//! is observed even when every audio queue is full. One slot per signal
//! kind: publishing replaces an unread signal of the same kind, which makes
//! a double-interrupt naturally idempotent. The consumer drains in priority
//! order (emergency stop first).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use voice_orchestrator_core::{ControlKind, ControlMessage};

#[derive(Default)]
struct Shared {
    /// Indexed by `ControlKind` discriminant, lowest priority first
    slots: Mutex<[Option<ControlMessage>; 3]>,
    notify: Notify,
    published: AtomicU64,
    consumed: AtomicU64,
}

/// Cloneable handle to the per-call control channel.
#[derive(Clone, Default)]
pub struct ControlChannel {
    shared: Arc<Shared>,
}

impl ControlChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_index(kind: ControlKind) -> usize {
        match kind {
            ControlKind::Interrupt => 0,
            ControlKind::CancelTurn => 1,
            ControlKind::EmergencyStop => 2,
        }
    }

    /// Publish a signal. Never blocks; an unread signal of the same kind is
    /// replaced.
    pub fn publish(&self, message: ControlMessage) {
        {
            let mut slots = self.shared.slots.lock();
            slots[Self::slot_index(message.kind)] = Some(message);
        }
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        self.shared.notify.notify_one();
        tracing::trace!(kind = message.kind.as_str(), trace = %message.trace_id, "control signal published");
    }

    /// Take the highest-priority pending signal without waiting.
    pub fn try_recv(&self) -> Option<ControlMessage> {
        let mut slots = self.shared.slots.lock();
        for idx in (0..slots.len()).rev() {
            if let Some(message) = slots[idx].take() {
                self.shared.consumed.fetch_add(1, Ordering::Relaxed);
                return Some(message);
            }
        }
        None
    }

    /// Wait for the next signal.
    pub async fn recv(&self) -> ControlMessage {
        loop {
            if let Some(message) = self.try_recv() {
                return message;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Discard all pending signals.
    pub fn clear(&self) {
        let mut slots = self.shared.slots.lock();
        for slot in slots.iter_mut() {
            *slot = None;
        }
    }

    pub fn has_pending(&self) -> bool {
        self.shared.slots.lock().iter().any(|s| s.is_some())
    }

    /// (published, consumed) counters
    pub fn stats(&self) -> (u64, u64) {
        (
            self.shared.published.load(Ordering::Relaxed),
            self.shared.consumed.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_orchestrator_core::TraceId;

    #[tokio::test]
    async fn test_publish_recv() {
        let channel = ControlChannel::new();
        let trace = TraceId::new();
        channel.publish(ControlMessage::interrupt(trace));
        let message = channel.recv().await;
        assert_eq!(message.kind, ControlKind::Interrupt);
        assert_eq!(message.trace_id, trace);
        assert!(!channel.has_pending());
    }

    #[tokio::test]
    async fn test_same_kind_coalesces() {
        let channel = ControlChannel::new();
        let first = TraceId::new();
        let second = TraceId::new();
        channel.publish(ControlMessage::interrupt(first));
        channel.publish(ControlMessage::interrupt(second));

        // Newest replaces unread: only the second survives
        assert_eq!(channel.try_recv().unwrap().trace_id, second);
        assert!(channel.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_priority_order() {
        let channel = ControlChannel::new();
        let trace = TraceId::new();
        channel.publish(ControlMessage::interrupt(trace));
        channel.publish(ControlMessage::emergency_stop(trace));
        channel.publish(ControlMessage::cancel_turn(trace));

        assert_eq!(channel.recv().await.kind, ControlKind::EmergencyStop);
        assert_eq!(channel.recv().await.kind, ControlKind::CancelTurn);
        assert_eq!(channel.recv().await.kind, ControlKind::Interrupt);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let channel = ControlChannel::new();
        let trace = TraceId::new();
        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.recv().await })
        };
        tokio::task::yield_now().await;
        channel.publish(ControlMessage::cancel_turn(trace));
        let message = waiter.await.unwrap();
        assert_eq!(message.kind, ControlKind::CancelTurn);
    }

    #[tokio::test]
    async fn test_clear() {
        let channel = ControlChannel::new();
        channel.publish(ControlMessage::interrupt(TraceId::new()));
        channel.clear();
        assert!(!channel.has_pending());
    }
}
