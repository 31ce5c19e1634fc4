//! Turn records and history sinks

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use voice_orchestrator_core::TraceId;

use crate::PersistenceError;

/// A tool invocation made during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: String,
    pub ok: bool,
}

/// Latency measurements for one turn, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    /// Turn end (silence confirmed) to final transcript
    pub stt_final_ms: u64,
    /// LLM request to first chunk
    pub llm_ttfb_ms: u64,
    /// First sentence handed to TTS to first audio frame
    pub tts_ttfb_ms: u64,
    /// Turn end to first outbound audio
    pub total_ms: u64,
}

/// One completed turn, as appended to the history sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub call_id: String,
    pub trace_id: TraceId,
    pub turn: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub user_text: String,
    pub assistant_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    pub latency: LatencyBreakdown,
    pub interrupted: bool,
}

/// Append-only destination for turn records.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append(&self, record: TurnRecord) -> Result<(), PersistenceError>;
}

/// Sink that appends one JSON line per turn to a local file.
pub struct JsonlHistorySink {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlHistorySink {
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
        })
    }
}

#[async_trait]
impl HistorySink for JsonlHistorySink {
    async fn append(&self, record: TurnRecord) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Default)]
pub struct MemoryHistorySink {
    records: Mutex<Vec<TurnRecord>>,
}

impl MemoryHistorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TurnRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl HistorySink for MemoryHistorySink {
    async fn append(&self, record: TurnRecord) -> Result<(), PersistenceError> {
        tracing::debug!(
            call_id = %record.call_id,
            turn = record.turn,
            interrupted = record.interrupted,
            "turn recorded"
        );
        self.records.lock().push(record);
        Ok(())
    }
}
