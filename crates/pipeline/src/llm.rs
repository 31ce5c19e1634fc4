//! LLM processor
//!
//! Pumps a cancellable chunk stream out of the LLM port. Chunks are
//! forwarded as they arrive, unbatched. The pump guarantees exactly one
//! terminal chunk on every path: provider terminal, cancellation
//! (`finish_reason = interrupted`), per-chunk timeout, or a protocol
//! violation (stream ended without a finish reason, logged and treated as
//! end-of-stream).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voice_orchestrator_core::{FinishReason, LlmChunk, LlmPort, LlmRequest, PortError, PortKind};

/// Queue capacity between the pump and the turn engine
const CHUNK_QUEUE: usize = 32;

#[derive(Clone)]
pub struct LlmProcessor {
    port: Arc<dyn LlmPort>,
    chunk_timeout: Duration,
}

impl LlmProcessor {
    pub fn new(port: Arc<dyn LlmPort>, chunk_timeout: Duration) -> Self {
        Self {
            port,
            chunk_timeout,
        }
    }

    /// Open a generation stream and pump it into a bounded queue. The
    /// returned receiver always ends with a terminal chunk; port errors
    /// arrive as `Err` items followed by that terminal chunk.
    pub async fn generate(
        &self,
        request: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<LlmChunk, PortError>>, PortError> {
        let mut stream = self.port.generate_stream(request).await?;
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
        let chunk_timeout = self.chunk_timeout;

        tokio::spawn(async move {
            let mut saw_terminal = false;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!("LLM generation cancelled");
                        let _ = tx
                            .send(Ok(LlmChunk::finish(FinishReason::Interrupted)))
                            .await;
                        return;
                    }
                    next = tokio::time::timeout(chunk_timeout, stream.next()) => next,
                };

                match next {
                    Err(_) => {
                        let err = PortError::timeout(
                            PortKind::Llm,
                            format!("no chunk within {}ms", chunk_timeout.as_millis()),
                        );
                        let _ = tx.send(Err(err)).await;
                        let _ = tx
                            .send(Ok(LlmChunk::finish(FinishReason::Interrupted)))
                            .await;
                        return;
                    }
                    Ok(None) => {
                        if !saw_terminal {
                            tracing::warn!(
                                "LLM stream ended without finish_reason, treating as stop"
                            );
                            let _ = tx.send(Ok(LlmChunk::finish(FinishReason::Stop))).await;
                        }
                        return;
                    }
                    Ok(Some(Ok(chunk))) => {
                        let terminal = chunk.is_terminal();
                        saw_terminal |= terminal;
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }
                    Ok(Some(Err(err))) => {
                        let _ = tx.send(Err(err)).await;
                        let _ = tx.send(Ok(LlmChunk::finish(FinishReason::Error))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use voice_orchestrator_core::LlmChunkStream;

    struct StaticStreamLlm {
        items: Vec<Result<LlmChunk, PortError>>,
    }

    #[async_trait]
    impl LlmPort for StaticStreamLlm {
        async fn generate_stream(&self, _request: LlmRequest) -> Result<LlmChunkStream, PortError> {
            Ok(futures::stream::iter(self.items.clone()).boxed())
        }
    }

    /// Stream that never yields, for timeout/cancel paths.
    struct StalledLlm;

    #[async_trait]
    impl LlmPort for StalledLlm {
        async fn generate_stream(&self, _request: LlmRequest) -> Result<LlmChunkStream, PortError> {
            Ok(futures::stream::pending().boxed())
        }
    }

    async fn drain(
        mut rx: mpsc::Receiver<Result<LlmChunk, PortError>>,
    ) -> (Vec<LlmChunk>, Vec<PortError>) {
        let mut chunks = Vec::new();
        let mut errors = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                Ok(c) => chunks.push(c),
                Err(e) => errors.push(e),
            }
        }
        (chunks, errors)
    }

    #[tokio::test]
    async fn test_forwards_in_order_with_terminal() {
        let llm = LlmProcessor::new(
            Arc::new(StaticStreamLlm {
                items: vec![
                    Ok(LlmChunk::content("Hola ")),
                    Ok(LlmChunk::content("mundo.")),
                    Ok(LlmChunk::finish(FinishReason::Stop)),
                ],
            }),
            Duration::from_secs(10),
        );
        let rx = llm
            .generate(LlmRequest::default(), CancellationToken::new())
            .await
            .unwrap();
        let (chunks, errors) = drain(rx).await;
        assert!(errors.is_empty());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content.as_deref(), Some("Hola "));
        assert_eq!(chunks[2].finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_missing_terminal_synthesized() {
        let llm = LlmProcessor::new(
            Arc::new(StaticStreamLlm {
                items: vec![Ok(LlmChunk::content("truncado"))],
            }),
            Duration::from_secs(10),
        );
        let rx = llm
            .generate(LlmRequest::default(), CancellationToken::new())
            .await
            .unwrap();
        let (chunks, _) = drain(rx).await;
        assert_eq!(chunks.last().unwrap().finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_emits_interrupted() {
        let llm = LlmProcessor::new(Arc::new(StalledLlm), Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let rx = llm
            .generate(LlmRequest::default(), cancel.clone())
            .await
            .unwrap();
        cancel.cancel();
        let (chunks, errors) = drain(rx).await;
        assert!(errors.is_empty());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].finish_reason, Some(FinishReason::Interrupted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_timeout() {
        let llm = LlmProcessor::new(Arc::new(StalledLlm), Duration::from_millis(200));
        let rx = llm
            .generate(LlmRequest::default(), CancellationToken::new())
            .await
            .unwrap();
        let (chunks, errors) = drain(rx).await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].retryable);
        assert_eq!(
            chunks.last().unwrap().finish_reason,
            Some(FinishReason::Interrupted)
        );
    }

    #[tokio::test]
    async fn test_mid_stream_error_surfaces() {
        let llm = LlmProcessor::new(
            Arc::new(StaticStreamLlm {
                items: vec![
                    Ok(LlmChunk::content("par")),
                    Err(PortError::transient(PortKind::Llm, "connection reset")),
                ],
            }),
            Duration::from_secs(10),
        );
        let rx = llm
            .generate(LlmRequest::default(), CancellationToken::new())
            .await
            .unwrap();
        let (chunks, errors) = drain(rx).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(chunks.last().unwrap().finish_reason, Some(FinishReason::Error));
    }
}
