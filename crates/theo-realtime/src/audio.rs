// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Microphone capture format: mono 16-bit PCM.
pub const INPUT_SAMPLE_RATE_HZ: u32 = 24_000;
pub const INPUT_CHUNK_FRAMES: u32 = 2048;

/// Playback format after on-the-fly 24→48 kHz conversion.
pub const OUTPUT_SAMPLE_RATE_HZ: u32 = 48_000;
pub const OUTPUT_CHUNK_BYTES: u32 = 16_384;

/// Microphone capture seam. Device enumeration and sample conversion live
/// in the platform adapter behind this trait; the session only drains
/// already-converted 24 kHz PCM.
pub trait MicrophoneSource: Send + Sync {
    fn start_recording(&self);
    fn stop_recording(&self);
    /// Pending captured PCM bytes; empty when nothing is buffered.
    fn drain(&self) -> Vec<u8>;
    /// Throw away anything buffered (used during the post-playback gate).
    fn discard_pending(&self);
    fn close(&self);
}

/// Playback seam. The adapter owns its own thread and bounded queue; it
/// reports playback completion by sending [`PlaybackComplete`] on the
/// channel handed to it at construction.
pub trait SpeakerSink: Send + Sync {
    /// A model response is starting; open the output stream.
    fn start_response(&self);
    fn play(&self, pcm: &[u8]);
    /// No more audio for the current response.
    fn close_response(&self);
    fn close(&self);
}

/// Cross-thread notice from the playback thread to the session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackComplete;
