// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod audio;
mod cues;
mod gating;
mod injector;
mod interaction;
mod protocol;
mod session;
mod stimuli;

pub use audio::{
    MicrophoneSource, PlaybackComplete, SpeakerSink, INPUT_CHUNK_FRAMES, INPUT_SAMPLE_RATE_HZ,
    OUTPUT_CHUNK_BYTES, OUTPUT_SAMPLE_RATE_HZ,
};
pub use cues::CueDispatcher;
pub use gating::{
    format_event_for_injection, BatteryResponsePolicy, QueuedResponse, ResponseQueue, StimulusGate,
};
pub use injector::EventInjector;
pub use interaction::{
    CueEvent, InteractionState, InteractionStateManager, OrchestrationPhase, OrchestrationState,
};
pub use protocol::{
    classify_close_reason, ClientEvent, CloseReason, ContentPart, ConversationItem, OutputItem,
    RateLimit, ResponseParams, ServerEvent, SessionAudio, SessionAudioInput, SessionAudioOutput,
    SessionConfig, TurnDetection,
};
pub use session::{FrameSink, RealtimeSession, SessionChannels};
pub use stimuli::{StimuliCoordinator, StimulusSummary};
