//! Scripted STT provider
//!
//! Consumes the audio stream like a real recognizer and emits pre-scripted
//! utterances: word-by-word partials while audio flows, the full utterance
//! as the final when the audio side closes. One scripted utterance is
//! consumed per session, so consecutive turns produce consecutive entries.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use voice_orchestrator_core::{AudioFrame, PortError, SttPort, TextFrame, TextFrameStream};

/// Milliseconds of consumed audio per emitted partial word.
const MS_PER_WORD: u64 = 250;

pub struct ScriptedStt {
    utterances: Arc<Mutex<VecDeque<String>>>,
}

impl ScriptedStt {
    pub fn new(utterances: Vec<String>) -> Self {
        Self {
            utterances: Arc::new(Mutex::new(utterances.into())),
        }
    }

    /// Recognizer that hears nothing: every session ends with an empty
    /// final. Registered as the `loopback` STT.
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    /// Queue another utterance for a later session.
    pub fn push_utterance(&self, text: impl Into<String>) {
        self.utterances.lock().push_back(text.into());
    }
}

#[async_trait]
impl SttPort for ScriptedStt {
    async fn transcribe_stream(
        &self,
        mut audio: BoxStream<'static, AudioFrame>,
    ) -> Result<TextFrameStream, PortError> {
        let utterance = self.utterances.lock().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel::<Result<TextFrame, PortError>>(16);

        tokio::spawn(async move {
            let words: Vec<&str> = utterance.split_whitespace().collect();
            let mut consumed_ms: u64 = 0;
            let mut emitted_words = 0usize;

            while let Some(frame) = audio.next().await {
                consumed_ms += frame.duration_ms();
                let due = (consumed_ms / MS_PER_WORD) as usize;
                while emitted_words < due && emitted_words < words.len() {
                    emitted_words += 1;
                    let partial = words[..emitted_words].join(" ");
                    if tx.send(Ok(TextFrame::partial(partial))).await.is_err() {
                        return;
                    }
                }
            }

            // Audio side closed: emit the final transcript
            let _ = tx.send(Ok(TextFrame::final_text(utterance))).await;
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
