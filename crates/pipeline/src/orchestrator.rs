//! Per-call orchestrator
//!
//! Owns the whole lifecycle of one call: wires the processors together with
//! bounded queues, runs the state machine, and arbitrates between inbound
//! audio, the control channel, and the turn in flight. Everything spawned
//! here lives under one root cancellation scope; cancelling it tears the
//! session down within the shutdown bound.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voice_orchestrator_config::ConfigSnapshot;
use voice_orchestrator_core::{
    ControlKind, ControlMessage, FinishReason, LlmPort, LlmRequest, PortError, PortKind, SttPort,
    ToolPort, TraceId, TtsEndCause, TtsPort,
};
use voice_orchestrator_persistence::{HistorySink, ToolCallRecord, TurnRecord};
use voice_orchestrator_providers::{FallbackLlm, FallbackStt, FallbackTts, ProviderRegistry};
use voice_orchestrator_transport::{MediaEvent, MediaSink, MediaSource};

use crate::aggregator::ContextAggregator;
use crate::control::ControlChannel;
use crate::llm::LlmProcessor;
use crate::metrics::{record_interrupt_latency, TurnTimers};
use crate::outbound::{OutboundEvent, OutboundItem, OutboundWriter, SpokenTracker};
use crate::state::{ConversationState, StateEvent, StateMachine};
use crate::stt::SttProcessor;
use crate::tts::{SentenceSplitter, SpeakOutcome, TtsProcessor};
use crate::vad::{VadConfig, VadEvent, VadProcessor};
use crate::PipelineError;

/// Queue capacity per hop
const QUEUE_CAPACITY: usize = 32;
/// Shutdown must propagate within this bound
const SHUTDOWN_BOUND: Duration = Duration::from_millis(500);
/// Tool invocations slower than this trigger hold audio
const HOLD_AUDIO_DELAY: Duration = Duration::from_millis(500);
/// Marker the LLM may emit to hang up gracefully
const END_CALL_MARKER: &str = "[END_CALL]";

/// Observability tap. Every subscriber gets a best-effort copy; the tap
/// never applies backpressure to the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StateChanged(ConversationState),
    FinalTranscript {
        trace_id: TraceId,
        text: String,
    },
    AssistantText {
        trace_id: TraceId,
        text: String,
    },
    TtsStart {
        trace_id: TraceId,
    },
    TtsEnd {
        trace_id: TraceId,
        cause: TtsEndCause,
    },
    BargeIn {
        trace_id: TraceId,
        spoken_sentences: usize,
    },
    Error {
        port: PortKind,
        message: String,
        retryable: bool,
    },
    SessionEnded {
        reason: String,
    },
}

/// What a finished turn reports back to the engine.
#[derive(Debug)]
enum TurnOutcome {
    /// Spoke (or at least committed) a reply
    Completed { end_call: bool },
    /// Generation produced nothing speakable
    Silent,
    /// Cancelled by barge-in; spoken prefix already committed
    Interrupted,
    /// Non-retryable provider failure
    Fatal(PortError),
}

enum TurnInput {
    User { request: LlmRequest },
    Canned { text: String },
}

struct TurnHandle {
    trace_id: TraceId,
    cancel: CancellationToken,
    timers: Arc<Mutex<TurnTimers>>,
}

/// The per-call engine.
pub struct Orchestrator {
    call_id: String,
    config: ConfigSnapshot,
    sample_rate: u32,
    stt_port: Arc<dyn SttPort>,
    llm_port: Arc<dyn LlmPort>,
    tts_port: Arc<dyn TtsPort>,
    tools: Arc<dyn ToolPort>,
    history: Arc<dyn HistorySink>,
    control: ControlChannel,
    root: CancellationToken,
    events: broadcast::Sender<PipelineEvent>,
}

impl Orchestrator {
    /// Build with explicit ports (tests, embedding).
    pub fn new(
        call_id: impl Into<String>,
        config: ConfigSnapshot,
        sample_rate: u32,
        stt_port: Arc<dyn SttPort>,
        llm_port: Arc<dyn LlmPort>,
        tts_port: Arc<dyn TtsPort>,
        tools: Arc<dyn ToolPort>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            call_id: call_id.into(),
            config,
            sample_rate,
            stt_port,
            llm_port,
            tts_port,
            tools,
            history,
            control: ControlChannel::new(),
            root: CancellationToken::new(),
            events,
        }
    }

    /// Build from the provider registry: fresh adapters per call, each port
    /// wrapped in its fallback chain.
    pub fn from_registry(
        call_id: impl Into<String>,
        config: ConfigSnapshot,
        sample_rate: u32,
        registry: &ProviderRegistry,
        tools: Arc<dyn ToolPort>,
        history: Arc<dyn HistorySink>,
    ) -> Result<Self, PortError> {
        let stt = Arc::new(FallbackStt::from_registry(registry, &config)?);
        let llm = Arc::new(FallbackLlm::from_registry(registry, &config)?);
        let tts = Arc::new(FallbackTts::from_registry(registry, &config)?);
        Ok(Self::new(
            call_id, config, sample_rate, stt, llm, tts, tools, history,
        ))
    }

    /// Control-channel handle for external producers (transport close,
    /// supervisory hangup).
    pub fn control(&self) -> ControlChannel {
        self.control.clone()
    }

    /// Root cancellation scope of this call.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Subscribe to the observability tap.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Run the call to completion.
    pub async fn run(
        self,
        mut source: Box<dyn MediaSource>,
        sink: Arc<dyn MediaSink>,
    ) -> Result<(), PipelineError> {
        let Orchestrator {
            call_id,
            config,
            sample_rate,
            stt_port,
            llm_port,
            tts_port,
            tools,
            history,
            control,
            root,
            events,
        } = self;

        let (mut state, _state_rx) = StateMachine::new();
        let mut vad = VadProcessor::with_energy_scorer(VadConfig {
            threshold: config.vad.threshold,
            confirmation_window_ms: config.vad.confirmation_window_ms,
            silence_threshold_ms: config.silence_threshold_ms(),
        });
        let mut stt = SttProcessor::with_policy(
            stt_port,
            config.hallucination_blacklist.clone(),
            config.stt.late_final_policy,
        );
        let llm = LlmProcessor::new(
            llm_port,
            Duration::from_millis(config.llm.chunk_timeout_ms),
        );

        let depth = Arc::new(AtomicUsize::new(0));
        let (out_tx, out_rx) = mpsc::channel::<OutboundItem>(QUEUE_CAPACITY);
        let (writer_interrupt_tx, writer_interrupt_rx) = mpsc::channel::<TraceId>(4);
        let (live_trace_tx, live_trace_rx) = watch::channel(TraceId::session());
        let (outbound_events_tx, mut outbound_events) = mpsc::channel::<OutboundEvent>(32);
        let spoken = Arc::new(SpokenTracker::new());

        let tts = TtsProcessor::new(tts_port, &config, sample_rate, out_tx.clone(), depth.clone());

        let writer = OutboundWriter::new(
            out_rx,
            writer_interrupt_rx,
            sink.clone(),
            depth.clone(),
            live_trace_rx,
            outbound_events_tx,
            spoken.clone(),
        );
        let writer_task = tokio::spawn(writer.run());

        // Session hard cap
        {
            let control = control.clone();
            let max_duration = Duration::from_secs(config.session.max_duration_s);
            let guard = root.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = guard.cancelled() => {}
                    _ = tokio::time::sleep(max_duration) => {
                        tracing::warn!("max call duration reached");
                        control.publish(ControlMessage::emergency_stop(TraceId::session()));
                    }
                }
            });
        }

        let aggregator = Arc::new(Mutex::new(ContextAggregator::new(
            &config,
            tools.specs(),
        )));

        let apply_state = |sm: &mut StateMachine, event: StateEvent| {
            if let Some(record) = sm.apply(event) {
                let _ = events.send(PipelineEvent::StateChanged(record.to));
                true
            } else {
                false
            }
        };

        apply_state(&mut state, StateEvent::SessionStart);

        // Engine bookkeeping
        let mut current_turn: Option<TurnHandle> = None;
        let mut turn_join: Option<tokio::task::JoinHandle<TurnOutcome>> = None;
        let mut user_trace: Option<TraceId> = None;
        let mut pending_barge_in: Option<TraceId> = None;
        let mut last_activity = Instant::now();
        let mut idle_retries: u32 = 0;
        let mut end_reason = "transport_closed".to_string();
        let mut idle_tick = tokio::time::interval(Duration::from_millis(250));
        idle_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let spawn_turn = |input: TurnInput,
                          trace_id: TraceId,
                          timers: Arc<Mutex<TurnTimers>>,
                          user_text: String| {
            let runner = TurnRunner {
                call_id: call_id.clone(),
                trace_id,
                input,
                aggregator: aggregator.clone(),
                llm: llm.clone(),
                tts: tts.clone(),
                tools: tools.clone(),
                history: history.clone(),
                spoken: spoken.clone(),
                events: events.clone(),
                cancel: root.child_token(),
                timers: timers.clone(),
                user_text,
                hold_audio: config.background_sound.is_some(),
            };
            let cancel = runner.cancel.clone();
            let join = tokio::spawn(runner.run());
            (
                TurnHandle {
                    trace_id,
                    cancel,
                    timers,
                },
                join,
            )
        };

        // Greeting bootstrap
        if config.llm.first_message_mode == voice_orchestrator_config::FirstMessageMode::SpeakFirst
            && !config.llm.first_message.is_empty()
        {
            let trace = TraceId::new();
            aggregator
                .lock()
                .begin_canned_turn(trace, &config.llm.first_message);
            apply_state(&mut state, StateEvent::CannedUtteranceCommitted);
            spoken.begin(trace);
            let _ = live_trace_tx.send(trace);
            let (handle, join) = spawn_turn(
                TurnInput::Canned {
                    text: config.llm.first_message.clone(),
                },
                trace,
                Arc::new(Mutex::new(TurnTimers::start())),
                String::new(),
            );
            current_turn = Some(handle);
            turn_join = Some(join);
        }

        enum LoopAction {
            Control(ControlMessage),
            Outbound(OutboundEvent),
            TurnDone(TurnOutcome),
            Media(Option<MediaEvent>),
            IdleTick,
        }

        loop {
            let action = tokio::select! {
                biased;
                _ = root.cancelled() => {
                    end_reason = "cancelled".to_string();
                    break;
                }
                message = control.recv() => LoopAction::Control(message),
                Some(event) = outbound_events.recv() => LoopAction::Outbound(event),
                result = async { turn_join.as_mut().expect("guarded").await }, if turn_join.is_some() => {
                    LoopAction::TurnDone(result.unwrap_or(TurnOutcome::Silent))
                }
                media = source.next_event() => LoopAction::Media(media),
                _ = idle_tick.tick() => LoopAction::IdleTick,
            };

            match action {
                LoopAction::Control(message) => match message.kind {
                    ControlKind::EmergencyStop => {
                        apply_state(&mut state, StateEvent::EmergencyStop);
                        end_reason = "emergency_stop".to_string();
                        break;
                    }
                    ControlKind::Interrupt | ControlKind::CancelTurn => {
                        let Some(turn) = &current_turn else {
                            tracing::debug!(kind = message.kind.as_str(), "control with no turn in flight");
                            continue;
                        };
                        if message.trace_id != turn.trace_id {
                            tracing::debug!(stale = %message.trace_id, "stale control message dropped");
                            continue;
                        }
                        if !matches!(
                            state.state(),
                            ConversationState::Speaking | ConversationState::Thinking
                        ) {
                            continue;
                        }

                        let observed = Instant::now();
                        turn.cancel.cancel();
                        let _ = writer_interrupt_tx.send(turn.trace_id).await;
                        // Stale frames of this trace are dropped from here on
                        let _ = live_trace_tx.send(user_trace.unwrap_or(TraceId::session()));

                        if message.kind == ControlKind::CancelTurn {
                            aggregator.lock().discard_partial();
                        }

                        let _ = events.send(PipelineEvent::BargeIn {
                            trace_id: turn.trace_id,
                            spoken_sentences: spoken.spoken(turn.trace_id),
                        });
                        let _ = events.send(PipelineEvent::TtsEnd {
                            trace_id: turn.trace_id,
                            cause: TtsEndCause::Interrupted,
                        });
                        apply_state(&mut state, StateEvent::Interrupted);
                        record_interrupt_latency(observed);
                        pending_barge_in = None;
                        last_activity = Instant::now();
                    }
                },

                LoopAction::Outbound(event) => match event {
                    OutboundEvent::FirstAudio { trace_id } => {
                        if let Some(turn) = &current_turn {
                            if turn.trace_id == trace_id {
                                turn.timers.lock().record_first_audio();
                                apply_state(&mut state, StateEvent::FirstTtsAudio);
                            }
                        }
                    }
                    OutboundEvent::SentenceSpoken { trace_id, index } => {
                        tracing::trace!(%trace_id, sentence = index, "sentence spoken");
                    }
                },

                LoopAction::TurnDone(outcome) => {
                    turn_join = None;
                    current_turn = None;
                    last_activity = Instant::now();
                    match outcome {
                        TurnOutcome::Completed { end_call } => {
                            match state.state() {
                                ConversationState::Speaking => {
                                    apply_state(&mut state, StateEvent::TtsFinishedNatural);
                                }
                                ConversationState::Thinking => {
                                    apply_state(&mut state, StateEvent::LlmFinishedSilent);
                                }
                                _ => {}
                            }
                            if end_call {
                                end_reason = "assistant_hangup".to_string();
                                break;
                            }
                        }
                        TurnOutcome::Silent => {
                            if state.state() == ConversationState::Thinking {
                                apply_state(&mut state, StateEvent::LlmFinishedSilent);
                            }
                        }
                        TurnOutcome::Interrupted => {
                            // State already moved to Listening when the
                            // interrupt was observed
                        }
                        TurnOutcome::Fatal(err) => {
                            let _ = events.send(PipelineEvent::Error {
                                port: err.port,
                                message: err.message.clone(),
                                retryable: err.retryable,
                            });
                            // Last words, best effort, then stop
                            if !config.session.fallback_utterance.is_empty() {
                                let trace = TraceId::new();
                                spoken.begin(trace);
                                let _ = live_trace_tx.send(trace);
                                let _ = tokio::time::timeout(
                                    Duration::from_secs(5),
                                    tts.speak(
                                        trace,
                                        0,
                                        &config.session.fallback_utterance,
                                        &root.child_token(),
                                    ),
                                )
                                .await;
                            }
                            apply_state(&mut state, StateEvent::EmergencyStop);
                            end_reason = "fatal_error".to_string();
                            break;
                        }
                    }
                }

                LoopAction::Media(None) | LoopAction::Media(Some(MediaEvent::Stop)) => {
                    end_reason = "transport_closed".to_string();
                    break;
                }

                LoopAction::Media(Some(MediaEvent::Audio(frame))) => {
                    let vad_event = vad.process(&frame);
                    if let Some(trace) = user_trace {
                        stt.feed(trace, frame);
                    }

                    // Word-count gate for a pending barge-in
                    if let Some(speaking_trace) = pending_barge_in {
                        if stt.partial_word_count() >= config.interruption.min_words {
                            control.publish(ControlMessage::interrupt(speaking_trace));
                            pending_barge_in = None;
                        }
                    }

                    match vad_event {
                        Some(VadEvent::SpeechStarted) => {
                            last_activity = Instant::now();
                            idle_retries = 0;
                            match state.state() {
                                ConversationState::Listening => {
                                    apply_state(&mut state, StateEvent::UserStartedSpeaking);
                                    if user_trace.is_none() {
                                        let trace = TraceId::new();
                                        user_trace = Some(trace);
                                        if let Err(e) = stt.start_session(trace).await {
                                            tracing::warn!(error = %e, "STT session open failed");
                                            user_trace = None;
                                        }
                                    }
                                }
                                ConversationState::Speaking | ConversationState::Thinking
                                    if config.interruption.enabled =>
                                {
                                    // Overlapping speech: open the next turn's
                                    // session eagerly, gate the interrupt on
                                    // recognized words
                                    let trace = TraceId::new();
                                    user_trace = Some(trace);
                                    if let Err(e) = stt.start_session(trace).await {
                                        tracing::warn!(error = %e, "eager STT session failed");
                                    }
                                    let speaking_trace =
                                        current_turn.as_ref().map(|t| t.trace_id);
                                    if let Some(speaking_trace) = speaking_trace {
                                        if config.interruption.min_words == 0 {
                                            control.publish(ControlMessage::interrupt(
                                                speaking_trace,
                                            ));
                                        } else {
                                            pending_barge_in = Some(speaking_trace);
                                        }
                                    }
                                }
                                _ => {}
                            }
                        }
                        Some(VadEvent::SpeechStopped) => {
                            last_activity = Instant::now();
                            if state.state() == ConversationState::Listening
                                && user_trace.is_some()
                            {
                                let trace = user_trace.take().expect("checked");
                                let timers = Arc::new(Mutex::new(TurnTimers::start()));

                                let final_text = tokio::select! {
                                    _ = root.cancelled() => Ok(None),
                                    text = stt.finalize() => text,
                                };
                                let text = match final_text {
                                    Ok(text) => text,
                                    Err(e) => {
                                        tracing::warn!(error = %e, "STT finalize failed");
                                        None
                                    }
                                };
                                timers.lock().record_stt_final();

                                let has_text = text.is_some();
                                apply_state(
                                    &mut state,
                                    StateEvent::UserStoppedSpeaking { has_text },
                                );
                                if let Some(text) = text {
                                    let _ = events.send(PipelineEvent::FinalTranscript {
                                        trace_id: trace,
                                        text: text.clone(),
                                    });
                                    let request =
                                        aggregator.lock().begin_user_turn(trace, &text);
                                    spoken.begin(trace);
                                    let _ = live_trace_tx.send(trace);
                                    let (handle, join) = spawn_turn(
                                        TurnInput::User { request },
                                        trace,
                                        timers,
                                        text,
                                    );
                                    current_turn = Some(handle);
                                    turn_join = Some(join);
                                }
                            }
                        }
                        None => {}
                    }
                }

                LoopAction::IdleTick => {
                    if state.state() == ConversationState::Listening
                        && current_turn.is_none()
                        && !vad.is_speaking()
                        && last_activity.elapsed()
                            >= Duration::from_millis(config.session.idle_timeout_ms)
                    {
                        if idle_retries >= config.session.inactivity_max_retries {
                            end_reason = "idle_timeout".to_string();
                            break;
                        }
                        idle_retries += 1;
                        last_activity = Instant::now();
                        tracing::info!(retry = idle_retries, "idle prompt");

                        let trace = TraceId::new();
                        aggregator
                            .lock()
                            .begin_canned_turn(trace, &config.session.idle_message);
                        apply_state(&mut state, StateEvent::CannedUtteranceCommitted);
                        spoken.begin(trace);
                        let _ = live_trace_tx.send(trace);
                        let (handle, join) = spawn_turn(
                            TurnInput::Canned {
                                text: config.session.idle_message.clone(),
                            },
                            trace,
                            Arc::new(Mutex::new(TurnTimers::start())),
                            String::new(),
                        );
                        current_turn = Some(handle);
                        turn_join = Some(join);
                    }
                }
            }
        }

        // Teardown: cancel the scope, bounded-join the workers, close the
        // transport
        root.cancel();
        stt.abort();
        if let Some(turn) = &current_turn {
            turn.cancel.cancel();
        }
        if let Some(join) = turn_join.take() {
            let _ = tokio::time::timeout(SHUTDOWN_BOUND, join).await;
        }
        // The writer's queue closes only when every sender is gone: the
        // engine's handle and the TTS processor's
        drop(tts);
        drop(out_tx);
        drop(writer_interrupt_tx);
        let _ = tokio::time::timeout(SHUTDOWN_BOUND, writer_task).await;
        let _ = sink.close().await;
        let _ = events.send(PipelineEvent::SessionEnded {
            reason: end_reason.clone(),
        });
        tracing::info!(call_id = %call_id, reason = %end_reason, "session ended");
        Ok(())
    }
}

/// One turn's worth of generation and speech, run as a task under the
/// call's root scope.
struct TurnRunner {
    call_id: String,
    trace_id: TraceId,
    input: TurnInput,
    aggregator: Arc<Mutex<ContextAggregator>>,
    llm: LlmProcessor,
    tts: TtsProcessor,
    tools: Arc<dyn ToolPort>,
    history: Arc<dyn HistorySink>,
    spoken: Arc<SpokenTracker>,
    events: broadcast::Sender<PipelineEvent>,
    cancel: CancellationToken,
    timers: Arc<Mutex<TurnTimers>>,
    user_text: String,
    hold_audio: bool,
}

impl TurnRunner {
    async fn run(self) -> TurnOutcome {
        let started_at = Utc::now();
        let turn = self.aggregator.lock().turn_counter();

        // Speaker: consumes sentences in order, independent of generation
        let (sentence_tx, mut sentence_rx) = mpsc::channel::<(usize, String)>(QUEUE_CAPACITY);
        let speaker = {
            let tts = self.tts.clone();
            let cancel = self.cancel.clone();
            let events = self.events.clone();
            let trace_id = self.trace_id;
            tokio::spawn(async move {
                let mut started = false;
                let mut completed = 0usize;
                while let Some((index, sentence)) = sentence_rx.recv().await {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if !started {
                        started = true;
                        let _ = events.send(PipelineEvent::TtsStart { trace_id });
                    }
                    match tts.speak(trace_id, index, &sentence, &cancel).await {
                        Ok(SpeakOutcome::Completed) => completed += 1,
                        Ok(SpeakOutcome::Cancelled) => break,
                        Err(err) => {
                            let _ = events.send(PipelineEvent::Error {
                                port: err.port,
                                message: err.message.clone(),
                                retryable: err.retryable,
                            });
                            break;
                        }
                    }
                }
                completed
            })
        };

        let mut sentences: Vec<String> = Vec::new();
        let mut splitter = SentenceSplitter::new();
        let mut tool_records: Vec<ToolCallRecord> = Vec::new();
        let mut end_call = false;
        let mut interrupted = false;
        let mut fatal: Option<PortError> = None;

        let queue_sentence = |sentences: &mut Vec<String>, text: String| {
            let index = sentences.len();
            sentences.push(text.clone());
            let tx = sentence_tx.clone();
            async move {
                let _ = tx.send((index, text)).await;
            }
        };

        match self.input {
            TurnInput::Canned { text } => {
                for sentence in splitter.push(&text) {
                    queue_sentence(&mut sentences, sentence).await;
                }
                if let Some(rest) = splitter.flush() {
                    queue_sentence(&mut sentences, rest).await;
                }
            }
            TurnInput::User { request } => {
                let mut request = request;
                let mut depth = 0usize;

                'generation: loop {
                    let mut chunks = match self.llm.generate(request.clone(), self.cancel.clone()).await
                    {
                        Ok(chunks) => chunks,
                        Err(err) => {
                            tracing::warn!(error = %err, "LLM request failed");
                            if !err.retryable {
                                fatal = Some(err);
                            }
                            break 'generation;
                        }
                    };

                    let mut finish: Option<FinishReason> = None;
                    while let Some(item) = chunks.recv().await {
                        match item {
                            Ok(chunk) => {
                                if chunk.content.is_some() || chunk.function_call.is_some() {
                                    self.timers.lock().record_llm_first_chunk();
                                }
                                if let Some(text) = chunk.content {
                                    let text = if text.contains(END_CALL_MARKER) {
                                        end_call = true;
                                        text.replace(END_CALL_MARKER, "")
                                    } else {
                                        text
                                    };
                                    self.aggregator.lock().on_content(&text);
                                    for sentence in splitter.push(&text) {
                                        queue_sentence(&mut sentences, sentence).await;
                                    }
                                }
                                if let Some(delta) = chunk.function_call {
                                    self.aggregator.lock().on_function_delta(&delta);
                                }
                                if let Some(reason) = chunk.finish_reason {
                                    finish = Some(reason);
                                    break;
                                }
                            }
                            Err(err) => {
                                let _ = self.events.send(PipelineEvent::Error {
                                    port: err.port,
                                    message: err.message.clone(),
                                    retryable: err.retryable,
                                });
                                if !err.retryable {
                                    fatal = Some(err);
                                }
                            }
                        }
                    }

                    match finish {
                        Some(FinishReason::ToolCalls) => {
                            let calls = self.aggregator.lock().commit_tool_calls();
                            for call in &calls {
                                let outcome = self.invoke_tool(call).await;
                                tool_records.push(ToolCallRecord {
                                    name: call.name.clone(),
                                    arguments: call.arguments.clone(),
                                    ok: outcome.is_ok(),
                                });
                                self.aggregator.lock().push_tool_outcome(call, &outcome);
                            }
                            depth += 1;
                            request = self.aggregator.lock().continuation_request(depth);
                            continue 'generation;
                        }
                        Some(FinishReason::Interrupted) => {
                            interrupted = true;
                            break 'generation;
                        }
                        _ => break 'generation,
                    }
                }
            }
        }

        if !interrupted && fatal.is_none() {
            if let Some(rest) = splitter.flush() {
                queue_sentence(&mut sentences, rest).await;
            }
        }
        drop(sentence_tx);
        let completed_sentences = speaker.await.unwrap_or(0);
        if self.cancel.is_cancelled() {
            interrupted = true;
        }

        if !interrupted && completed_sentences > 0 {
            // Wait for the writer to push the last queued sentence out
            self.await_playback(sentences.len()).await;
        }

        // Commit and record
        let (assistant_text, outcome) = if interrupted {
            let spoken_count = self.spoken.spoken(self.trace_id).min(sentences.len());
            let spoken_text = sentences[..spoken_count].join(" ");
            let committed = self.aggregator.lock().commit_spoken(&spoken_text);
            (committed, TurnOutcome::Interrupted)
        } else if let Some(err) = fatal {
            self.aggregator.lock().discard_partial();
            (None, TurnOutcome::Fatal(err))
        } else {
            let committed = self.aggregator.lock().commit_assistant();
            if completed_sentences > 0 {
                let _ = self.events.send(PipelineEvent::TtsEnd {
                    trace_id: self.trace_id,
                    cause: TtsEndCause::Natural,
                });
            }
            match &committed {
                Some(_) => (committed, TurnOutcome::Completed { end_call }),
                None if !tool_records.is_empty() => (None, TurnOutcome::Completed { end_call }),
                None => (None, TurnOutcome::Silent),
            }
        };

        if let Some(text) = &assistant_text {
            let _ = self.events.send(PipelineEvent::AssistantText {
                trace_id: self.trace_id,
                text: text.clone(),
            });
        }

        let record = TurnRecord {
            call_id: self.call_id.clone(),
            trace_id: self.trace_id,
            turn,
            started_at,
            completed_at: Utc::now(),
            user_text: self.user_text.clone(),
            assistant_text: assistant_text.unwrap_or_default(),
            tool_calls: tool_records,
            latency: self.timers.lock().breakdown(),
            interrupted: matches!(outcome, TurnOutcome::Interrupted),
        };
        if let Err(e) = self.history.append(record).await {
            tracing::warn!(error = %e, "history append failed");
        }

        outcome
    }

    async fn invoke_tool(
        &self,
        call: &voice_orchestrator_core::ToolCall,
    ) -> voice_orchestrator_core::ToolOutcome {
        use voice_orchestrator_core::ToolOutcome;

        let arguments: serde_json::Value = match serde_json::from_str(&call.arguments) {
            Ok(value) => value,
            Err(e) => {
                return ToolOutcome::failed(format!("malformed arguments: {e}"));
            }
        };

        // Hold audio kicks in when the tool keeps the line silent too long
        let hold_cancel = self.cancel.child_token();
        let hold_task = self.hold_audio.then(|| {
            let tts = self.tts.clone();
            let trace_id = self.trace_id;
            let cancel = hold_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(HOLD_AUDIO_DELAY) => {
                        tts.play_hold_audio(trace_id, &cancel).await;
                    }
                }
            })
        });

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                Ok(ToolOutcome::failed("turn cancelled"))
            }
            result = self.tools.invoke(&call.name, arguments) => result,
        };

        hold_cancel.cancel();
        if let Some(task) = hold_task {
            let _ = task.await;
        }

        match result {
            Ok(outcome) => outcome,
            // The registry already folds failures into data; a port error
            // here is an infrastructure problem, still non-fatal to the call
            Err(err) => ToolOutcome::failed(err.message),
        }
    }

    /// Wait (bounded) until the writer has emitted every queued sentence.
    async fn await_playback(&self, total_sentences: usize) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while self.spoken.spoken(self.trace_id) < total_sentences {
            if self.cancel.is_cancelled() || Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
