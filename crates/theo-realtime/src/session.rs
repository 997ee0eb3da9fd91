// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use theo_config::Config;
use theo_events::{Event, EventBus, Priority};
use theo_research::{has_research_intent, ResearchPacket, ResearchProvider, ResearchRequest};
use theo_tools::{ActionPacket, DecisionStatus, GovernanceLayer, ToolCall, ToolRegistry};

use crate::protocol::{SessionAudio, SessionAudioInput, SessionAudioOutput};
use crate::{
    classify_close_reason, format_event_for_injection, BatteryResponsePolicy, ClientEvent,
    CloseReason, CueDispatcher, CueEvent, InteractionState, InteractionStateManager,
    MicrophoneSource, OrchestrationPhase, OrchestrationState, PlaybackComplete, QueuedResponse,
    ResponseParams, ResponseQueue, ServerEvent, SessionConfig, SpeakerSink, StimuliCoordinator,
    StimulusGate, StimulusSummary, TurnDetection,
};

/// Outgoing frame seam. The production implementation wraps the websocket
/// sink; tests record frames.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, event: &ClientEvent) -> anyhow::Result<()>;
}

struct WireSink {
    sink: futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    log_full: bool,
}

#[async_trait]
impl FrameSink for WireSink {
    async fn send(&mut self, event: &ClientEvent) -> anyhow::Result<()> {
        let text = serde_json::to_string(event)?;
        if self.log_full {
            debug!(direction = "outgoing", frame = %text, "ws event");
        } else {
            debug!(direction = "outgoing", kind = frame_kind(event), "ws event");
        }
        self.sink.send(Message::text(text)).await?;
        Ok(())
    }
}

fn frame_kind(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::SessionUpdate { .. } => "session.update",
        ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
        ClientEvent::InputAudioBufferClear {} => "input_audio_buffer.clear",
        ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
        ClientEvent::ResponseCreate { .. } => "response.create",
    }
}

/// Cross-thread inputs consumed by the session task.
pub struct SessionChannels {
    pub injected_rx: mpsc::Receiver<Event>,
    pub stimuli_rx: mpsc::UnboundedReceiver<StimulusSummary>,
    pub cue_rx: mpsc::UnboundedReceiver<CueEvent>,
    pub playback_rx: mpsc::Receiver<PlaybackComplete>,
    pub shutdown_rx: watch::Receiver<bool>,
}

enum ConnectionOutcome {
    Reconnect(CloseReason),
    Exit,
}

/// The realtime session controller: wire protocol, turn-taking, tool
/// dispatch through governance, gated stimulus injection, and reconnection.
pub struct RealtimeSession {
    config: Arc<Config>,
    instructions: String,
    prompts: Vec<String>,
    tools: Arc<ToolRegistry>,
    governance: Arc<GovernanceLayer>,
    mic: Arc<dyn MicrophoneSource>,
    speaker: Arc<dyn SpeakerSink>,
    bus: Arc<EventBus>,
    stimuli: Arc<StimuliCoordinator>,
    cue_dispatcher: CueDispatcher,
    research: Option<Arc<dyn ResearchProvider>>,
    ready_tx: watch::Sender<bool>,

    state_manager: InteractionStateManager,
    orchestration: OrchestrationState,
    stimulus_gate: StimulusGate,
    response_queue: ResponseQueue,
    battery_policy: BatteryResponsePolicy,

    // Per-response wire state.
    audio_accum: Vec<u8>,
    assistant_reply: String,
    response_in_progress: bool,
    speaking_started: bool,
    receiving: bool,
    mic_suppress_until: Option<Instant>,
    response_start: Option<Instant>,
    pending_call: Option<(String, String)>,
    call_args_buffer: String,
    pending_action: Option<ActionPacket>,
    rate_limits: Vec<crate::RateLimit>,
    log_full: bool,
}

impl RealtimeSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        instructions: String,
        prompts: Vec<String>,
        tools: Arc<ToolRegistry>,
        governance: Arc<GovernanceLayer>,
        mic: Arc<dyn MicrophoneSource>,
        speaker: Arc<dyn SpeakerSink>,
        bus: Arc<EventBus>,
        stimuli: Arc<StimuliCoordinator>,
        cue_dispatcher: CueDispatcher,
        state_manager: InteractionStateManager,
        research: Option<Arc<dyn ResearchProvider>>,
        ready_tx: watch::Sender<bool>,
    ) -> Self {
        let stimulus_gate = StimulusGate::new(&config.realtime.injection);
        let battery_policy = BatteryResponsePolicy::new(config.battery.response.clone());
        let log_full = std::env::var("THEO_LOG_SESSION_FULL").is_ok();
        Self {
            config,
            instructions,
            prompts,
            tools,
            governance,
            mic,
            speaker,
            bus,
            stimuli,
            cue_dispatcher,
            research,
            ready_tx,
            state_manager,
            orchestration: OrchestrationState::new(),
            stimulus_gate,
            response_queue: ResponseQueue::default(),
            battery_policy,
            audio_accum: Vec::new(),
            assistant_reply: String::new(),
            response_in_progress: false,
            speaking_started: false,
            receiving: false,
            mic_suppress_until: None,
            response_start: None,
            pending_call: None,
            call_args_buffer: String::new(),
            pending_action: None,
            rate_limits: Vec::new(),
            log_full,
        }
    }

    pub fn phase(&self) -> OrchestrationPhase {
        self.orchestration.phase()
    }

    /// Most recent `rate_limits.updated` snapshot.
    pub fn rate_limits(&self) -> &[crate::RateLimit] {
        &self.rate_limits
    }

    /// Connect-and-serve loop. Transient closes reconnect after a linear
    /// backoff; terminal closes and shutdown exit.
    pub async fn run(&mut self, channels: &mut SessionChannels) -> anyhow::Result<()> {
        let backoff = Duration::from_secs_f64(self.config.realtime.reconnect_backoff_s.max(0.1));
        loop {
            let stream = match self.connect().await {
                Ok(stream) => stream,
                Err(err) => {
                    let reason = classify_close_reason(&err.to_string());
                    if reason.is_transient() {
                        warn!(%err, "connect failed; retrying");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(err);
                }
            };
            info!("connected to the realtime service");

            match self.run_connection(stream, channels).await {
                Ok(ConnectionOutcome::Reconnect(reason)) => {
                    warn!(reason = ?reason, "connection lost; reconnecting");
                    self.reset_connection_state();
                    tokio::time::sleep(backoff).await;
                }
                Ok(ConnectionOutcome::Exit) => break,
                Err(err) => {
                    error!(%err, "session loop failed");
                    return Err(err);
                }
            }
        }
        self.shutdown_audio();
        Ok(())
    }

    async fn connect(&self) -> anyhow::Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let realtime = &self.config.realtime;
        let api_key = std::env::var(&realtime.api_key_env).map_err(|_| {
            anyhow::anyhow!("authentication: {} is not set", realtime.api_key_env)
        })?;
        let url = format!("{}?model={}", realtime.url, realtime.model);
        let mut request = url.into_client_request()?;
        let auth = format!("Bearer {api_key}")
            .parse()
            .map_err(|_| anyhow::anyhow!("api key is not a valid header value"))?;
        request.headers_mut().insert("Authorization", auth);
        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(stream)
    }

    async fn run_connection(
        &mut self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        channels: &mut SessionChannels,
    ) -> anyhow::Result<ConnectionOutcome> {
        let (ws_sink, mut ws_stream) = stream.split();
        let mut sink = WireSink {
            sink: ws_sink,
            log_full: self.log_full,
        };

        self.initialize_session(&mut sink).await?;
        let _ = self.ready_tx.send(true);

        if self.prompts.is_empty() {
            self.mic.start_recording();
            info!("recording started; listening for speech");
        } else {
            let prompts = std::mem::take(&mut self.prompts);
            self.send_initial_prompts(&prompts, &mut sink).await?;
        }

        let mut audio_tick = tokio::time::interval(Duration::from_millis(
            self.config.audio.send_interval_ms.max(1),
        ));
        let mut ping_tick = tokio::time::interval(Duration::from_secs(30));
        let mut awaiting_pong: Option<Instant> = None;

        loop {
            tokio::select! {
                message = ws_stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let text = text.to_string();
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => {
                                    self.log_incoming(&text);
                                    self.handle_server_event(event, &mut sink).await?;
                                }
                                Err(err) => warn!(%err, "unparseable server frame"),
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            awaiting_pong = None;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let detail = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_default();
                            let reason = classify_close_reason(&detail);
                            if reason.is_transient() {
                                return Ok(ConnectionOutcome::Reconnect(reason));
                            }
                            warn!(reason = ?reason, detail = %detail, "terminal close");
                            return Ok(ConnectionOutcome::Exit);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            let reason = classify_close_reason(&err.to_string());
                            if reason.is_transient() {
                                return Ok(ConnectionOutcome::Reconnect(reason));
                            }
                            return Ok(ConnectionOutcome::Exit);
                        }
                        None => return Ok(ConnectionOutcome::Reconnect(CloseReason::NetworkError)),
                    }
                }
                Some(event) = channels.injected_rx.recv() => {
                    if let Err(err) = self.inject_event(event, &mut sink).await {
                        warn!(%err, "failed to inject event");
                    }
                }
                Some(summary) = channels.stimuli_rx.recv() => {
                    if let Err(err) = self.handle_stimulus_summary(summary, &mut sink).await {
                        warn!(%err, "failed to handle stimulus summary");
                    }
                }
                Some(cue) = channels.cue_rx.recv() => {
                    self.cue_dispatcher.handle(cue);
                }
                Some(PlaybackComplete) = channels.playback_rx.recv() => {
                    self.on_playback_complete(&mut sink).await?;
                }
                _ = audio_tick.tick() => {
                    self.send_audio_frame(&mut sink).await?;
                }
                _ = ping_tick.tick() => {
                    if let Some(since) = awaiting_pong {
                        if since.elapsed() > Duration::from_secs(10) {
                            return Ok(ConnectionOutcome::Reconnect(CloseReason::KeepaliveTimeout));
                        }
                    }
                    // Raw ping frame; the pong arm above clears the deadline.
                    awaiting_pong = Some(Instant::now());
                    // Errors here surface on the next stream read.
                    let _ = sink.sink.send(Message::Ping(Vec::new().into())).await;
                }
                _ = channels.shutdown_rx.changed() => {
                    info!("termination signal received; closing session");
                    let _ = sink.sink.send(Message::Close(None)).await;
                    return Ok(ConnectionOutcome::Exit);
                }
            }
        }
    }

    fn log_incoming(&self, text: &str) {
        if self.log_full {
            debug!(direction = "incoming", frame = %text, "ws event");
        } else if let Ok(value) = serde_json::from_str::<Value>(text) {
            debug!(
                direction = "incoming",
                kind = value.get("type").and_then(serde_json::Value::as_str).unwrap_or("?"),
                "ws event"
            );
        }
    }

    fn reset_connection_state(&mut self) {
        let _ = self.ready_tx.send(false);
        self.audio_accum.clear();
        self.response_in_progress = false;
        self.speaking_started = false;
        self.receiving = false;
        self.pending_call = None;
        self.call_args_buffer.clear();
    }

    fn shutdown_audio(&mut self) {
        self.mic.stop_recording();
        self.mic.close();
        self.speaker.close();
    }

    // ── Session setup ─────────────────────────────────────────────────────────

    async fn initialize_session<S: FrameSink>(&mut self, sink: &mut S) -> anyhow::Result<()> {
        let realtime = &self.config.realtime;
        let session = SessionConfig {
            kind: "realtime".into(),
            model: realtime.model.clone(),
            output_modalities: vec!["audio".into()],
            audio: SessionAudio {
                input: SessionAudioInput {
                    turn_detection: TurnDetection {
                        kind: "server_vad".into(),
                        threshold: realtime.vad.threshold,
                        prefix_padding_ms: realtime.vad.prefix_padding_ms,
                        silence_duration_ms: realtime.vad.silence_duration_ms,
                        create_response: realtime.vad.create_response,
                        interrupt_response: realtime.vad.interrupt_response,
                    },
                },
                output: SessionAudioOutput {
                    voice: realtime.voice.clone(),
                },
            },
            instructions: self.instructions.clone(),
            tools: self.tools.catalog(),
        };
        sink.send(&ClientEvent::SessionUpdate { session }).await
    }

    async fn send_initial_prompts<S: FrameSink>(
        &mut self,
        prompts: &[String],
        sink: &mut S,
    ) -> anyhow::Result<()> {
        info!(count = prompts.len(), "sending initial prompts");
        let mut plain = Vec::new();
        for prompt in prompts {
            self.battery_policy.record_user_input(prompt, Instant::now());
            if self.maybe_process_research_intent(prompt).await {
                continue;
            }
            plain.push(prompt.clone());
        }
        if plain.is_empty() {
            return Ok(());
        }
        for text in &plain {
            sink.send(&ClientEvent::ConversationItemCreate {
                item: crate::ConversationItem::user_text(text),
            })
            .await?;
        }
        self.request_response("text_message", "user_text", false, sink)
            .await
    }

    // ── Incoming event dispatch ───────────────────────────────────────────────

    async fn handle_server_event<S: FrameSink>(
        &mut self,
        event: ServerEvent,
        sink: &mut S,
    ) -> anyhow::Result<()> {
        match event {
            ServerEvent::ResponseCreated {} => {
                self.speaker.start_response();
                self.audio_accum.clear();
                self.receiving = true;
                self.response_in_progress = true;
                self.speaking_started = false;
                self.state_manager
                    .update_state(InteractionState::Thinking, "response created");
            }
            ServerEvent::OutputItemAdded { item } => {
                if item.kind == "function_call" {
                    self.pending_call = Some((
                        item.call_id.unwrap_or_default(),
                        item.name.unwrap_or_default(),
                    ));
                    self.call_args_buffer.clear();
                }
            }
            ServerEvent::FunctionCallArgumentsDelta { delta } => {
                self.call_args_buffer.push_str(&delta);
            }
            ServerEvent::FunctionCallArgumentsDone { arguments } => {
                if !arguments.is_empty() {
                    self.call_args_buffer = arguments;
                }
                self.handle_function_call(sink).await?;
            }
            ServerEvent::TextDelta { delta } => {
                self.assistant_reply.push_str(&delta);
                self.state_manager
                    .update_state(InteractionState::Speaking, "text output");
            }
            ServerEvent::OutputAudioDelta { delta } => {
                match base64::engine::general_purpose::STANDARD.decode(delta.as_bytes()) {
                    Ok(pcm) => {
                        self.audio_accum.extend_from_slice(&pcm);
                        if !self.speaking_started {
                            self.speaking_started = true;
                            self.state_manager
                                .update_state(InteractionState::Speaking, "audio output");
                        }
                        if self.audio_accum.len() >= self.config.audio.flush_target_bytes {
                            self.speaker.play(&self.audio_accum);
                            self.audio_accum.clear();
                        }
                    }
                    Err(err) => warn!(%err, "undecodable audio delta"),
                }
            }
            ServerEvent::OutputAudioDone {} => {
                self.handle_audio_response_done(sink).await?;
            }
            ServerEvent::OutputAudioTranscriptDelta { delta } => {
                self.assistant_reply.push_str(&delta);
            }
            ServerEvent::OutputAudioTranscriptDone {} => {
                if !self.assistant_reply.is_empty() {
                    info!(reply = %self.assistant_reply, "assistant response");
                    self.assistant_reply.clear();
                }
                self.state_manager
                    .update_state(InteractionState::Idle, "audio transcript done");
            }
            ServerEvent::Error { error } => {
                self.handle_api_error(&error.message);
            }
            ServerEvent::SpeechStarted {} => {
                info!("speech detected; listening");
                self.state_manager
                    .update_state(InteractionState::Listening, "speech started");
            }
            ServerEvent::SpeechStopped {} => {
                self.mic.stop_recording();
                self.response_start = Some(Instant::now());
                self.state_manager
                    .update_state(InteractionState::Thinking, "speech stopped");
            }
            ServerEvent::RateLimitsUpdated { rate_limits } => {
                for limit in &rate_limits {
                    info!(
                        name = %limit.name,
                        remaining = limit.remaining,
                        limit = limit.limit,
                        reset_s = limit.reset_seconds,
                        "rate limit update"
                    );
                }
                self.rate_limits = rate_limits;
            }
            ServerEvent::SessionCreated { .. } => {}
            ServerEvent::SessionUpdated { session } => {
                debug!(
                    voice = session.pointer("/audio/output/voice").and_then(serde_json::Value::as_str),
                    "session updated"
                );
            }
            ServerEvent::Unknown => {}
        }
        Ok(())
    }

    async fn handle_audio_response_done<S: FrameSink>(&mut self, sink: &mut S) -> anyhow::Result<()> {
        if let Some(start) = self.response_start.take() {
            info!(duration_s = start.elapsed().as_secs_f64(), "response completed");
        }
        if !self.audio_accum.is_empty() {
            self.speaker.play(&self.audio_accum);
            self.audio_accum.clear();
        }
        self.speaker.close_response();
        self.response_in_progress = false;
        self.state_manager
            .update_state(InteractionState::Idle, "audio output done");
        self.drain_response_queue(sink).await
    }

    /// Protocol errors classified by substring; the session continues.
    fn handle_api_error(&mut self, message: &str) {
        if message.contains("buffer is empty") {
            debug!("'buffer is empty' error; no audio data was sent");
        } else if message.contains("active response") {
            debug!("'active response' error; correcting in-progress flag");
            self.response_in_progress = true;
        } else {
            error!(error = %message, "unhandled api error");
        }
    }

    // ── Tool dispatch ─────────────────────────────────────────────────────────

    async fn handle_function_call<S: FrameSink>(&mut self, sink: &mut S) -> anyhow::Result<()> {
        let Some((call_id, name)) = self.pending_call.take() else {
            return Ok(());
        };
        let args: Value = if self.call_args_buffer.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.call_args_buffer).unwrap_or_else(|_| json!({}))
        };
        self.call_args_buffer.clear();
        info!(tool = %name, args = %args, "function call requested");

        // Unknown tools are a structured error, never a confirmation round
        // trip; governance only reviews calls that could actually run.
        if self.tools.get(&name).is_none() {
            let message = format!("Function '{name}' not found in the tool registry.");
            error!(tool = %name, "function call for unknown tool");
            sink.send(&ClientEvent::ConversationItemCreate {
                item: crate::ConversationItem::assistant_text(&message),
            })
            .await?;
            return self
                .send_function_output(&call_id, json!({ "error": message }), sink)
                .await;
        }

        let packet = self.governance.build_action_packet(&name, &call_id, args.clone());
        let decision = self.governance.review(&packet);
        match decision.status {
            DecisionStatus::Denied => {
                let message = format!("Tool call '{name}' denied: {}", decision.reason);
                warn!(tool = %name, reason = %decision.reason, "governance denied tool call");
                self.send_function_output(&call_id, json!({ "error": message }), sink)
                    .await?;
            }
            DecisionStatus::NeedsConfirmation => {
                info!(summary = %packet.summary(), "tool call parked for confirmation");
                self.pending_action = Some(packet);
                self.orchestration
                    .transition(OrchestrationPhase::AwaitingConfirmation, "tool confirmation");
                let prompt = format!(
                    "I want to run the tool '{name}'. Say yes to approve or no to cancel."
                );
                sink.send(&ClientEvent::ConversationItemCreate {
                    item: crate::ConversationItem::assistant_text(prompt),
                })
                .await?;
                self.request_response("approval_prompt", "assistant_message", true, sink)
                    .await?;
            }
            DecisionStatus::Approved => {
                self.execute_tool(&call_id, &name, args, sink).await?;
            }
        }
        Ok(())
    }

    async fn execute_tool<S: FrameSink>(
        &mut self,
        call_id: &str,
        name: &str,
        args: Value,
        sink: &mut S,
    ) -> anyhow::Result<()> {
        let call = ToolCall {
            id: call_id.to_string(),
            name: name.to_string(),
            args,
        };
        let output = self.tools.execute(&call).await;
        let packet = self
            .governance
            .build_action_packet(name, call_id, call.args.clone());
        self.governance.record_execution(&packet);

        if output.is_error {
            // The user hears the failure too.
            let message = output
                .error_message()
                .unwrap_or("tool execution failed")
                .to_string();
            error!(tool = %name, error = %message, "tool execution failed");
            sink.send(&ClientEvent::ConversationItemCreate {
                item: crate::ConversationItem::assistant_text(&message),
            })
            .await?;
        }
        self.send_function_output(call_id, output.result, sink).await
    }

    async fn send_function_output<S: FrameSink>(
        &mut self,
        call_id: &str,
        result: Value,
        sink: &mut S,
    ) -> anyhow::Result<()> {
        sink.send(&ClientEvent::ConversationItemCreate {
            item: crate::ConversationItem::FunctionCallOutput {
                call_id: call_id.to_string(),
                output: serde_json::to_string(&result)?,
            },
        })
        .await?;
        sink.send(&ClientEvent::ResponseCreate { response: None }).await
    }

    /// Resolve a parked confirmation from user text. Returns true when the
    /// text was consumed by the approval flow.
    pub async fn handle_approval_text<S: FrameSink>(
        &mut self,
        text: &str,
        sink: &mut S,
    ) -> anyhow::Result<bool> {
        if self.pending_action.is_none() {
            return Ok(false);
        }
        let normalized = text.trim().to_lowercase();
        let approved = ["yes", "approve", "go ahead", "do it", "sure"]
            .iter()
            .any(|word| normalized.starts_with(word));
        let denied = ["no", "cancel", "stop", "deny", "don't"]
            .iter()
            .any(|word| normalized.starts_with(word));
        if !approved && !denied {
            return Ok(false);
        }

        let Some(packet) = self.pending_action.take() else {
            return Ok(false);
        };
        self.orchestration
            .transition(OrchestrationPhase::Idle, "confirmation resolved");
        if approved {
            info!(tool = %packet.name, "user approved parked tool call");
            self.execute_tool(&packet.call_id, &packet.name, packet.args, sink)
                .await?;
        } else {
            info!(tool = %packet.name, "user cancelled parked tool call");
            self.send_function_output(
                &packet.call_id,
                json!({ "error": "cancelled by user" }),
                sink,
            )
            .await?;
        }
        self.drain_response_queue(sink).await?;
        Ok(true)
    }

    // ── Stimulus injection ────────────────────────────────────────────────────

    async fn inject_event<S: FrameSink>(&mut self, event: Event, sink: &mut S) -> anyhow::Result<()> {
        let (allowed, reason) = self.stimulus_gate.can_accept(
            &event,
            self.orchestration.phase(),
            self.response_in_progress,
        );
        if !allowed {
            debug!(source = %event.source, reason = %reason, "stimulus rejected");
            return Ok(());
        }
        debug!(source = %event.source, reason = %reason, "stimulus admitted");

        if event.source == "camera" {
            let Some(image_b64) = event.metadata.get("image_b64").and_then(Value::as_str) else {
                return Ok(());
            };
            sink.send(&ClientEvent::ConversationItemCreate {
                item: crate::ConversationItem::user_image(image_b64),
            })
            .await?;
            let mad = event.metadata.get("mad").cloned().unwrap_or(json!(null));
            self.stimuli
                .enqueue("image_message", json!({"source": "camera", "mad": mad}), 0)
                .await;
            return Ok(());
        }

        let (message, default_request) = format_event_for_injection(&event);
        let request_response = if event.source == "battery" {
            self.battery_policy
                .should_request_response(&event.metadata, default_request, Instant::now())
        } else if event.priority == Priority::Critical {
            true
        } else {
            default_request
        };

        let item = if event.source == "research" {
            crate::ConversationItem::assistant_text(&message)
        } else {
            crate::ConversationItem::user_text(&message)
        };
        sink.send(&ClientEvent::ConversationItemCreate { item }).await?;

        if request_response {
            let trigger = format!("{}_message", event.source);
            let priority = if event.priority == Priority::Critical { 3 } else { 0 };
            self.stimuli
                .enqueue(&trigger, json!({"source": event.source, "kind": event.kind}), priority)
                .await;
        }
        Ok(())
    }

    async fn handle_stimulus_summary<S: FrameSink>(
        &mut self,
        summary: StimulusSummary,
        sink: &mut S,
    ) -> anyhow::Result<()> {
        debug!(trigger = %summary.trigger, payload = %summary.payload, "stimulus summary");
        self.request_response(&summary.trigger, "injection", false, sink)
            .await
    }

    /// Send (or queue, or drop) a `response.create` for a trigger.
    pub async fn request_response<S: FrameSink>(
        &mut self,
        trigger: &str,
        origin: &str,
        approval_flow: bool,
        sink: &mut S,
    ) -> anyhow::Result<()> {
        let params = if approval_flow {
            ResponseParams::approval_flow(origin)
        } else {
            ResponseParams::with_trigger(trigger, origin)
        };
        let event = ClientEvent::ResponseCreate {
            response: Some(params),
        };

        if ResponseQueue::should_defer(
            origin,
            approval_flow,
            self.orchestration.phase(),
            self.response_in_progress,
        ) {
            debug!(trigger, origin, "response.create deferred");
            self.response_queue.push(QueuedResponse {
                event,
                origin: origin.to_string(),
            });
            return Ok(());
        }

        if origin == "injection"
            && !self
                .stimulus_gate
                .allow_injection_response(trigger, Instant::now())
        {
            debug!(trigger, "response.create dropped by injection limits");
            return Ok(());
        }
        sink.send(&event).await
    }

    async fn drain_response_queue<S: FrameSink>(&mut self, sink: &mut S) -> anyhow::Result<()> {
        let sendable = self
            .response_queue
            .drain_sendable(self.orchestration.phase(), self.response_in_progress);
        for entry in sendable {
            if entry.origin == "injection" {
                let trigger = match &entry.event {
                    ClientEvent::ResponseCreate { response: Some(params) } => params
                        .metadata
                        .get("trigger")
                        .cloned()
                        .unwrap_or_default(),
                    _ => String::new(),
                };
                if !self
                    .stimulus_gate
                    .allow_injection_response(&trigger, Instant::now())
                {
                    continue;
                }
            }
            sink.send(&entry.event).await?;
        }
        Ok(())
    }

    // ── User text and research ────────────────────────────────────────────────

    /// Route injected user text: approval flow first, then research intent,
    /// then a normal conversation turn.
    pub async fn handle_user_text<S: FrameSink>(
        &mut self,
        text: &str,
        sink: &mut S,
    ) -> anyhow::Result<()> {
        self.battery_policy.record_user_input(text, Instant::now());
        if self.handle_approval_text(text, sink).await? {
            return Ok(());
        }
        if self.maybe_process_research_intent(text).await {
            return Ok(());
        }
        sink.send(&ClientEvent::ConversationItemCreate {
            item: crate::ConversationItem::user_text(text),
        })
        .await?;
        self.request_response("text_message", "user_text", false, sink)
            .await
    }

    /// When research is enabled and the text reads as a lookup request,
    /// dispatch it to the provider off the session task and short-circuit
    /// normal response generation. The bounded result comes back through
    /// the event bus.
    async fn maybe_process_research_intent(&mut self, text: &str) -> bool {
        let Some(provider) = self.research.as_ref() else {
            return false;
        };
        if !self.config.research.enabled || !has_research_intent(text) {
            return false;
        }
        let provider = Arc::clone(provider);
        let bus = Arc::clone(&self.bus);
        let request = ResearchRequest::new(text);
        let timeout = Duration::from_secs_f64(self.config.research.request_timeout_s.max(1.0));
        let max_chars = self.config.research.max_summary_chars;
        info!(prompt = %text, "dispatching research request");
        self.orchestration
            .transition(OrchestrationPhase::Plan, "research dispatch");

        tokio::spawn(async move {
            let packet = match tokio::time::timeout(timeout, provider.request_research(&request))
                .await
            {
                Ok(packet) => packet,
                Err(_) => ResearchPacket::error("timeout"),
            };
            let mut summary = packet.answer_summary.clone();
            if summary.chars().count() > max_chars {
                summary = summary.chars().take(max_chars).collect();
                summary.push('…');
            }
            bus.publish(
                Event::new("research", "result")
                    .with_priority(Priority::Normal)
                    .with_content(summary)
                    .with_metadata_entry("status", json!(packet.status))
                    .with_request_response(true),
                false,
            );
        });
        true
    }

    // ── Audio plumbing ────────────────────────────────────────────────────────

    async fn send_audio_frame<S: FrameSink>(&mut self, sink: &mut S) -> anyhow::Result<()> {
        if self.receiving {
            return Ok(());
        }
        if let Some(until) = self.mic_suppress_until {
            if Instant::now() < until {
                self.mic.discard_pending();
                return Ok(());
            }
            self.mic_suppress_until = None;
        }
        let pcm = self.mic.drain();
        if pcm.is_empty() {
            return Ok(());
        }
        let audio = base64::engine::general_purpose::STANDARD.encode(&pcm);
        sink.send(&ClientEvent::InputAudioBufferAppend { audio }).await
    }

    /// Playback finished on the audio thread: gate the mic briefly, clear
    /// the server's input buffer, resume recording.
    async fn on_playback_complete<S: FrameSink>(&mut self, sink: &mut S) -> anyhow::Result<()> {
        info!("playback complete; restarting mic");
        self.receiving = false;
        self.mic_suppress_until = Some(
            Instant::now() + Duration::from_secs_f64(self.config.audio.mic_suppress_s.max(0.0)),
        );
        sink.send(&ClientEvent::InputAudioBufferClear {}).await?;
        self.mic.start_recording();
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::{ConversationItem, StimuliCoordinator};
    use theo_config::{AutonomyLevel, StimuliConfig};
    use theo_motion::{GestureLibrary, MotionController, ServoBackend};
    use theo_tools::{CostHint, GovernanceLayer, Tool, ToolOutput, ToolSpec};

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<ClientEvent>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send(&mut self, event: &ClientEvent) -> anyhow::Result<()> {
            self.frames.push(event.clone());
            Ok(())
        }
    }

    struct NullMic;
    impl MicrophoneSource for NullMic {
        fn start_recording(&self) {}
        fn stop_recording(&self) {}
        fn drain(&self) -> Vec<u8> {
            Vec::new()
        }
        fn discard_pending(&self) {}
        fn close(&self) {}
    }

    struct NullSpeaker;
    impl SpeakerSink for NullSpeaker {
        fn start_response(&self) {}
        fn play(&self, _pcm: &[u8]) {}
        fn close_response(&self) {}
        fn close(&self) {}
    }

    struct NullServo;
    impl ServoBackend for NullServo {
        fn write_angle(&self, _servo: &str, _degrees: f64) -> anyhow::Result<()> {
            Ok(())
        }
        fn relax(&self, _servo: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FailingTool;
    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken_tool"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn default_spec(&self) -> ToolSpec {
            ToolSpec {
                tier: 0,
                reversible: true,
                cost: CostHint::Cheap,
                safety_tags: vec![],
            }
        }
        async fn execute(&self, call: &theo_tools::ToolCall) -> ToolOutput {
            ToolOutput::err(&call.id, "servo driver exploded")
        }
    }

    struct OkTool;
    #[async_trait]
    impl Tool for OkTool {
        fn name(&self) -> &str {
            "risky_tool"
        }
        fn description(&self) -> &str {
            "side effecting"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, call: &theo_tools::ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, json!({"done": true}))
        }
    }

    fn session(tools: ToolRegistry, autonomy: AutonomyLevel) -> (RealtimeSession, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.governance.autonomy = autonomy;
        let config = Arc::new(config);

        let tools = Arc::new(tools);
        let mut governance_config = config.governance.clone();
        governance_config.autonomy = autonomy;
        let governance = Arc::new(GovernanceLayer::new(
            &governance_config,
            tools.default_specs(),
        ));

        let bus = Arc::new(EventBus::new(16));
        let (stimuli_tx, _stimuli_rx) = mpsc::unbounded_channel();
        let stimuli = Arc::new(StimuliCoordinator::new(
            StimuliConfig {
                debounce_window_s: 0.0,
                cooldown_s: 0.0,
            },
            stimuli_tx,
        ));
        let motion = Arc::new(MotionController::new(
            Arc::new(NullServo),
            config.motion.clone(),
        ));
        let library = Arc::new(GestureLibrary::open(dir.path().join("g.json")));
        let cue_dispatcher =
            CueDispatcher::new(motion, library, config.interaction.clone());
        let state_manager = InteractionStateManager::new(config.interaction.clone());
        let (ready_tx, _ready_rx) = watch::channel(false);

        let session = RealtimeSession::new(
            Arc::clone(&config),
            "instructions".into(),
            Vec::new(),
            tools,
            governance,
            Arc::new(NullMic),
            Arc::new(NullSpeaker),
            bus,
            stimuli,
            cue_dispatcher,
            state_manager,
            None,
            ready_tx,
        );
        (session, dir)
    }

    fn function_outputs(frames: &[ClientEvent]) -> Vec<&str> {
        frames
            .iter()
            .filter_map(|frame| match frame {
                ClientEvent::ConversationItemCreate {
                    item: ConversationItem::FunctionCallOutput { output, .. },
                } => Some(output.as_str()),
                _ => None,
            })
            .collect()
    }

    fn assistant_texts(frames: &[ClientEvent]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|frame| match frame {
                ClientEvent::ConversationItemCreate {
                    item: ConversationItem::Message { role, content },
                } if role == "assistant" => content.iter().find_map(|part| match part {
                    crate::ContentPart::OutputText { text } => Some(text.clone()),
                    _ => None,
                }),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn graceful_tool_failure_sends_output_response_and_message() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool);
        let (mut session, _dir) = session(registry, AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();

        session.pending_call = Some(("call_7".into(), "broken_tool".into()));
        session.call_args_buffer = "{}".into();
        session.handle_function_call(&mut sink).await.unwrap();

        // (a) function_call_output with the error shape
        let outputs = function_outputs(&sink.frames);
        assert_eq!(outputs.len(), 1);
        let parsed: Value = serde_json::from_str(outputs[0]).unwrap();
        assert!(parsed["error"].as_str().unwrap().contains("servo driver exploded"));
        // (b) response.create
        assert!(sink
            .frames
            .iter()
            .any(|f| matches!(f, ClientEvent::ResponseCreate { .. })));
        // (c) assistant message carrying the error text
        let texts = assistant_texts(&sink.frames);
        assert!(texts.iter().any(|t| t.contains("servo driver exploded")));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_immediate_error_without_confirmation() {
        let (mut session, _dir) = session(ToolRegistry::new(), AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();
        session.pending_call = Some(("call_1".into(), "ghost_tool".into()));
        session.call_args_buffer.clear();
        session.handle_function_call(&mut sink).await.unwrap();

        // Never parked, never prompted: the error goes straight out.
        assert!(session.pending_action.is_none());
        assert_eq!(session.phase(), OrchestrationPhase::Idle);
        let outputs = function_outputs(&sink.frames);
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].contains("not found"));
        assert!(sink
            .frames
            .iter()
            .any(|f| matches!(f, ClientEvent::ResponseCreate { response: None })));
        let texts = assistant_texts(&sink.frames);
        assert!(texts.iter().any(|t| t.contains("not found")));
    }

    #[tokio::test]
    async fn tier_two_tool_parks_for_confirmation() {
        let mut registry = ToolRegistry::new();
        registry.register(OkTool);
        let (mut session, _dir) = session(registry, AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();

        session.pending_call = Some(("call_2".into(), "risky_tool".into()));
        session.call_args_buffer = "{}".into();
        session.handle_function_call(&mut sink).await.unwrap();

        assert!(session.pending_action.is_some());
        assert_eq!(session.phase(), OrchestrationPhase::AwaitingConfirmation);
        // No function output yet; an approval prompt and its response.create
        // went out instead.
        assert!(function_outputs(&sink.frames).is_empty());
        let texts = assistant_texts(&sink.frames);
        assert!(texts.iter().any(|t| t.contains("risky_tool")));
        assert!(sink.frames.iter().any(|f| matches!(
            f,
            ClientEvent::ResponseCreate { response: Some(params) }
                if params.metadata.get("approval_flow").map(String::as_str) == Some("true")
        )));
    }

    #[tokio::test]
    async fn approval_executes_the_parked_call() {
        let mut registry = ToolRegistry::new();
        registry.register(OkTool);
        let (mut session, _dir) = session(registry, AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();

        session.pending_call = Some(("call_3".into(), "risky_tool".into()));
        session.call_args_buffer = "{}".into();
        session.handle_function_call(&mut sink).await.unwrap();

        let consumed = session.handle_approval_text("yes please", &mut sink).await.unwrap();
        assert!(consumed);
        assert_eq!(session.phase(), OrchestrationPhase::Idle);
        let outputs = function_outputs(&sink.frames);
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].contains("done"));
    }

    #[tokio::test]
    async fn denial_cancels_the_parked_call() {
        let mut registry = ToolRegistry::new();
        registry.register(OkTool);
        let (mut session, _dir) = session(registry, AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();

        session.pending_call = Some(("call_4".into(), "risky_tool".into()));
        session.call_args_buffer = "{}".into();
        session.handle_function_call(&mut sink).await.unwrap();

        let consumed = session.handle_approval_text("no, cancel that", &mut sink).await.unwrap();
        assert!(consumed);
        let outputs = function_outputs(&sink.frames);
        assert!(outputs[0].contains("cancelled by user"));
    }

    #[tokio::test]
    async fn observe_only_denies_without_parking() {
        let mut registry = ToolRegistry::new();
        registry.register(OkTool);
        let (mut session, _dir) = session(registry, AutonomyLevel::ObserveOnly);
        let mut sink = RecordingSink::default();

        session.pending_call = Some(("call_5".into(), "risky_tool".into()));
        session.call_args_buffer = "{}".into();
        session.handle_function_call(&mut sink).await.unwrap();

        assert!(session.pending_action.is_none());
        let outputs = function_outputs(&sink.frames);
        assert!(outputs[0].contains("denied"));
    }

    #[tokio::test]
    async fn injected_response_queues_during_confirmation_and_drains_after() {
        let (mut session, _dir) = session(ToolRegistry::new(), AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();

        session
            .orchestration
            .transition(OrchestrationPhase::AwaitingConfirmation, "test");
        session
            .request_response("image_message", "injection", false, &mut sink)
            .await
            .unwrap();
        assert!(sink.frames.is_empty());
        assert_eq!(session.response_queue.len(), 1);

        // The approval-flow prompt passes through the same gate.
        session
            .request_response("approval_prompt", "assistant_message", true, &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.frames.len(), 1);

        session.orchestration.transition(OrchestrationPhase::Idle, "resolved");
        session.drain_response_queue(&mut sink).await.unwrap();
        assert_eq!(sink.frames.len(), 2);
    }

    #[tokio::test]
    async fn user_text_passes_during_confirmation() {
        let (mut session, _dir) = session(ToolRegistry::new(), AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();
        session
            .orchestration
            .transition(OrchestrationPhase::AwaitingConfirmation, "test");
        session
            .request_response("text_message", "user_text", false, &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.frames.len(), 1);
    }

    #[tokio::test]
    async fn camera_event_suppressed_during_confirmation() {
        let (mut session, _dir) = session(ToolRegistry::new(), AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();
        session
            .orchestration
            .transition(OrchestrationPhase::AwaitingConfirmation, "test");

        let event = Event::new("camera", "image").with_metadata_entry("image_b64", json!("QUJD"));
        session.inject_event(event, &mut sink).await.unwrap();
        assert!(sink.frames.is_empty());
    }

    #[tokio::test]
    async fn critical_battery_event_injects_during_confirmation() {
        let (mut session, _dir) = session(ToolRegistry::new(), AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();
        session
            .orchestration
            .transition(OrchestrationPhase::AwaitingConfirmation, "test");

        let event = Event::new("battery", "status")
            .with_priority(Priority::Critical)
            .with_metadata_entry("severity", json!("critical"))
            .with_metadata_entry("voltage", json!(7.05))
            .with_metadata_entry("transition", json!("enter_critical"));
        session.inject_event(event, &mut sink).await.unwrap();
        assert_eq!(sink.frames.len(), 1);
        match &sink.frames[0] {
            ClientEvent::ConversationItemCreate {
                item: ConversationItem::Message { role, content },
            } => {
                assert_eq!(role, "user");
                match &content[0] {
                    crate::ContentPart::InputText { text } => {
                        assert!(text.contains("severity=critical"));
                    }
                    other => panic!("unexpected content: {other:?}"),
                }
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn audio_deltas_flush_at_the_accumulation_target() {
        let (mut session, _dir) = session(ToolRegistry::new(), AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();

        session
            .handle_server_event(ServerEvent::ResponseCreated {}, &mut sink)
            .await
            .unwrap();
        assert!(session.response_in_progress);

        // 9600-byte flush target: two 4800-byte chunks flush exactly once.
        let chunk = base64::engine::general_purpose::STANDARD.encode(vec![0u8; 4800]);
        session
            .handle_server_event(ServerEvent::OutputAudioDelta { delta: chunk.clone() }, &mut sink)
            .await
            .unwrap();
        assert_eq!(session.audio_accum.len(), 4800);
        session
            .handle_server_event(ServerEvent::OutputAudioDelta { delta: chunk }, &mut sink)
            .await
            .unwrap();
        assert!(session.audio_accum.is_empty());

        session
            .handle_server_event(ServerEvent::OutputAudioDone {}, &mut sink)
            .await
            .unwrap();
        assert!(!session.response_in_progress);
    }

    #[tokio::test]
    async fn active_response_error_corrects_the_flag() {
        let (mut session, _dir) = session(ToolRegistry::new(), AutonomyLevel::ActWithBounds);
        session.handle_api_error("Conversation already has an active response in progress");
        assert!(session.response_in_progress);
        // Benign buffer error leaves state alone.
        session.response_in_progress = false;
        session.handle_api_error("input_audio_buffer buffer is empty");
        assert!(!session.response_in_progress);
    }

    #[tokio::test]
    async fn function_call_arguments_accumulate_across_deltas() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool);
        let (mut session, _dir) = session(registry, AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();

        session
            .handle_server_event(
                ServerEvent::OutputItemAdded {
                    item: crate::OutputItem {
                        kind: "function_call".into(),
                        name: Some("broken_tool".into()),
                        call_id: Some("call_9".into()),
                    },
                },
                &mut sink,
            )
            .await
            .unwrap();
        session
            .handle_server_event(
                ServerEvent::FunctionCallArgumentsDelta { delta: "{\"x\"".into() },
                &mut sink,
            )
            .await
            .unwrap();
        session
            .handle_server_event(
                ServerEvent::FunctionCallArgumentsDelta { delta: ": 1}".into() },
                &mut sink,
            )
            .await
            .unwrap();
        session
            .handle_server_event(
                ServerEvent::FunctionCallArgumentsDone { arguments: String::new() },
                &mut sink,
            )
            .await
            .unwrap();

        // The call went through dispatch (failing tool → error output).
        assert_eq!(function_outputs(&sink.frames).len(), 1);
    }

    #[tokio::test]
    async fn playback_complete_gates_the_mic_and_clears_the_buffer() {
        let (mut session, _dir) = session(ToolRegistry::new(), AutonomyLevel::ActWithBounds);
        let mut sink = RecordingSink::default();
        session.receiving = true;
        session.on_playback_complete(&mut sink).await.unwrap();
        assert!(!session.receiving);
        assert!(session.mic_suppress_until.is_some());
        assert!(matches!(sink.frames[0], ClientEvent::InputAudioBufferClear {}));

        // While suppressed, audio frames are discarded.
        session.send_audio_frame(&mut sink).await.unwrap();
        assert_eq!(sink.frames.len(), 1);
    }
}
