// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

//! Loopback implementations of the hardware seams.
//!
//! The real adapters (PCA9685 PWM, ADS1015 ADC, ICM20948 IMU, LPS22HB
//! barometer, camera bring-up, ALSA mixing, audio devices) live outside this
//! repository. These stand-ins let the core run on a development host.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use theo_realtime::{MicrophoneSource, PlaybackComplete, SpeakerSink};
use theo_sensors::{EnvironmentReading, EnvironmentSource, ImuSample, ImuSource, VoltageSource};
use theo_tools::builtin::{VolumeBackend, VolumeStatus};
use theo_vision::FrameSource;

/// Logs servo writes instead of driving PWM.
pub struct LoopbackServoBackend;

impl theo_motion::ServoBackend for LoopbackServoBackend {
    fn write_angle(&self, servo: &str, degrees: f64) -> anyhow::Result<()> {
        debug!(servo, degrees, "servo write");
        Ok(())
    }

    fn relax(&self, servo: &str) -> anyhow::Result<()> {
        debug!(servo, "servo relaxed");
        Ok(())
    }
}

/// Reports a healthy pack with a slow self-discharge.
pub struct LoopbackVoltageSource {
    started: Instant,
}

impl LoopbackVoltageSource {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl VoltageSource for LoopbackVoltageSource {
    fn read_battery_voltage(&self) -> anyhow::Result<f64> {
        // ~0.01 V per minute, floored well above the critical band.
        let sagged = 8.2 - self.started.elapsed().as_secs_f64() / 6000.0;
        Ok(sagged.max(7.6))
    }
}

/// Reports a level, stationary robot.
pub struct LoopbackImuSource;

impl ImuSource for LoopbackImuSource {
    fn read_sample(&self) -> anyhow::Result<ImuSample> {
        Ok(ImuSample {
            at: Instant::now(),
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            accel: [0.0, 0.0, 1.0],
            gyro: [0.0, 0.0, 0.0],
            mag: [0.2, 0.0, 0.4],
        })
    }
}

pub struct LoopbackEnvironmentSource;

impl EnvironmentSource for LoopbackEnvironmentSource {
    fn read(&self) -> anyhow::Result<EnvironmentReading> {
        Ok(EnvironmentReading {
            pressure_hpa: 1013.25,
            temperature_c: 22.0,
        })
    }
}

/// Produces an unchanging test pattern, so the change policy stays boring.
pub struct LoopbackFrameSource;

impl FrameSource for LoopbackFrameSource {
    fn capture_luma(&self) -> anyhow::Result<Vec<u8>> {
        Ok(vec![128u8; 160 * 90])
    }

    fn capture_jpeg(&self) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Captures silence.
pub struct LoopbackMicrophone;

impl MicrophoneSource for LoopbackMicrophone {
    fn start_recording(&self) {
        debug!("microphone recording started");
    }
    fn stop_recording(&self) {
        debug!("microphone recording stopped");
    }
    fn drain(&self) -> Vec<u8> {
        Vec::new()
    }
    fn discard_pending(&self) {}
    fn close(&self) {}
}

/// Discards audio and immediately reports playback completion.
pub struct LoopbackSpeaker {
    playback_tx: mpsc::Sender<PlaybackComplete>,
}

impl LoopbackSpeaker {
    pub fn new(playback_tx: mpsc::Sender<PlaybackComplete>) -> Self {
        Self { playback_tx }
    }
}

impl SpeakerSink for LoopbackSpeaker {
    fn start_response(&self) {}
    fn play(&self, pcm: &[u8]) {
        debug!(bytes = pcm.len(), "playback chunk discarded");
    }
    fn close_response(&self) {
        let _ = self.playback_tx.try_send(PlaybackComplete);
    }
    fn close(&self) {}
}

/// In-memory mixer state.
pub struct LoopbackVolumeBackend {
    percent: Mutex<u32>,
}

impl LoopbackVolumeBackend {
    pub fn new(percent: u32) -> Arc<Self> {
        Arc::new(Self {
            percent: Mutex::new(percent),
        })
    }
}

impl VolumeBackend for LoopbackVolumeBackend {
    fn get(&self) -> anyhow::Result<VolumeStatus> {
        Ok(VolumeStatus {
            percent: *self.percent.lock(),
            muted: false,
        })
    }

    fn set(&self, percent: u32) -> anyhow::Result<()> {
        *self.percent.lock() = percent;
        Ok(())
    }
}
