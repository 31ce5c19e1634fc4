//! Control messages
//!
//! Control signals travel on a dedicated channel that bypasses the data
//! queues, so an interrupt is never stuck behind queued audio. Each message
//! targets one turn; consumers drop messages whose trace id no longer
//! matches the current turn.

use serde::{Deserialize, Serialize};

use crate::frame::TraceId;

/// Kinds of control signals, in ascending priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// User barge-in: stop speaking, keep the session alive
    Interrupt,
    /// Abandon the current turn entirely
    CancelTurn,
    /// Terminate the session immediately
    EmergencyStop,
}

impl ControlKind {
    pub const ALL: [ControlKind; 3] = [
        ControlKind::Interrupt,
        ControlKind::CancelTurn,
        ControlKind::EmergencyStop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKind::Interrupt => "interrupt",
            ControlKind::CancelTurn => "cancel_turn",
            ControlKind::EmergencyStop => "emergency_stop",
        }
    }
}

/// A control signal targeting one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub kind: ControlKind,
    pub trace_id: TraceId,
}

impl ControlMessage {
    pub fn interrupt(trace_id: TraceId) -> Self {
        Self {
            kind: ControlKind::Interrupt,
            trace_id,
        }
    }

    pub fn cancel_turn(trace_id: TraceId) -> Self {
        Self {
            kind: ControlKind::CancelTurn,
            trace_id,
        }
    }

    pub fn emergency_stop(trace_id: TraceId) -> Self {
        Self {
            kind: ControlKind::EmergencyStop,
            trace_id,
        }
    }
}
