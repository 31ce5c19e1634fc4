//! Call history persistence
//!
//! The pipeline emits one record per completed turn; everything beyond the
//! append is someone else's database. The sink is append-only by contract:
//! records are never updated or deleted from this side.

mod history;

pub use history::{
    HistorySink, JsonlHistorySink, LatencyBreakdown, MemoryHistorySink, ToolCallRecord, TurnRecord,
};

use thiserror::Error;

/// Persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
