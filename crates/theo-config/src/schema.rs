// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be on unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub attention: AttentionConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub imu: ImuConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub stimuli: StimuliConfig,
    #[serde(default)]
    pub interaction: InteractionConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

// ── Realtime session ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Model identifier sent in `session.update`
    pub model: String,
    /// Output voice selection
    pub voice: String,
    /// Websocket endpoint; the model is appended as a query parameter
    pub url: String,
    /// Environment variable holding the API key (read at startup)
    pub api_key_env: String,
    /// Path to the SOUL prompt prepended to the session instructions
    pub soul_path: String,
    /// Seconds to wait before reconnecting after a transient close
    pub reconnect_backoff_s: f64,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub injection: InjectionConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            model: "gpt-realtime".into(),
            voice: "ballad".into(),
            url: "wss://api.openai.com/v1/realtime".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            soul_path: "config/SOUL.md".into(),
            reconnect_backoff_s: 1.0,
            vad: VadConfig::default(),
            injection: InjectionConfig::default(),
        }
    }
}

/// Server-side voice-activity-detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub threshold: f64,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    #[serde(default = "default_true")]
    pub create_response: bool,
    #[serde(default = "default_true")]
    pub interrupt_response: bool,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            prefix_padding_ms: 500,
            silence_duration_ms: 900,
            create_response: true,
            interrupt_response: true,
        }
    }
}

/// Limits on model responses triggered by injected stimuli.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Rolling-window cap on stimulus-triggered responses (0 = unlimited)
    pub responses_per_minute: u32,
    /// Default per-trigger cooldown between injection responses
    pub trigger_cooldown_s: f64,
    /// Per-trigger cooldown overrides, keyed by trigger name
    #[serde(default)]
    pub trigger_cooldowns_s: HashMap<String, f64>,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            responses_per_minute: 6,
            trigger_cooldown_s: 10.0,
            trigger_cooldowns_s: HashMap::new(),
        }
    }
}

// ── Audio ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Microphone capture rate (mono 16-bit PCM)
    pub input_rate_hz: u32,
    pub input_chunk_frames: u32,
    /// Playback rate after 24→48 kHz conversion
    pub output_rate_hz: u32,
    pub output_chunk_bytes: u32,
    /// Accumulate this many decoded bytes before flushing to the player
    pub flush_target_bytes: usize,
    /// Interval between outgoing `input_audio_buffer.append` frames
    pub send_interval_ms: u64,
    /// Microphone gate after playback completes
    pub mic_suppress_s: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_rate_hz: 24_000,
            input_chunk_frames: 2048,
            output_rate_hz: 48_000,
            output_chunk_bytes: 16_384,
            flush_target_bytes: 9600,
            send_interval_ms: 30,
            mic_suppress_s: 1.2,
        }
    }
}

// ── Motion ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub tick_period_ms: u64,
    /// Default keyframe duration when a gesture does not specify one
    pub transition_time_ms: u32,
    pub pan: ServoLimitConfig,
    pub tilt: ServoLimitConfig,
    /// Pan step floor/ceiling in degrees per tick, scaled over 90°
    pub pan_step_min: f64,
    pub pan_step_max: f64,
    /// Fixed tilt step ceiling in degrees per tick
    pub tilt_step_max: f64,
    /// Per-axis acceleration caps in °/s²
    pub pan_accel: f64,
    pub tilt_accel: f64,
    /// Follower snap tolerance in degrees
    pub follower_eps: f64,
    /// Frame-completion tolerance in degrees
    pub done_eps: f64,
    /// Advance past a frame that misses its target at the deadline
    #[serde(default)]
    pub fail_open_on_deadline: bool,
    /// Path of the persisted gesture library document
    pub gesture_library_path: String,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 20,
            transition_time_ms: 1500,
            pan: ServoLimitConfig { min_angle: -90.0, max_angle: 90.0 },
            tilt: ServoLimitConfig { min_angle: -45.0, max_angle: 45.0 },
            pan_step_min: 0.2,
            pan_step_max: 1.6,
            tilt_step_max: 1.5,
            pan_accel: 600.0,
            tilt_accel: 400.0,
            follower_eps: 0.05,
            done_eps: 0.5,
            fail_open_on_deadline: false,
            gesture_library_path: "log/gesture_library.json".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServoLimitConfig {
    pub min_angle: f64,
    pub max_angle: f64,
}

// ── Camera / vision ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub trigger_threshold: f64,
    pub clear_threshold: f64,
    pub debounce_frames: u32,
    pub cooldown_seconds: f64,
    pub ema_alpha: f64,
    /// Raw MAD level that counts as "changed" for the attention machine
    pub mad_threshold: f64,
    /// Base capture period outside the engaged state
    pub base_period_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: 25.0,
            clear_threshold: 15.0,
            debounce_frames: 3,
            cooldown_seconds: 10.0,
            ema_alpha: 0.3,
            mad_threshold: 7.0,
            base_period_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Detection labels that count as interesting
    pub interesting_labels: Vec<String>,
    pub min_confidence: f64,
    /// MAD hits within the window needed for idle → curious
    pub mad_repeat_count: u32,
    pub mad_window_ms: u64,
    /// Continuous interesting signal required for curious → engaged
    pub engage_confirm_ms: u64,
    pub curious_timeout_ms: u64,
    pub cooldown_timeout_ms: u64,
    pub cooldown_reengage_window_ms: u64,
    /// Capture period while engaged, replacing the base period
    pub engaged_capture_period_ms: u64,
    pub burst_count: u32,
    pub burst_cooldown_ms: u64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interesting_labels: ["person", "cat", "dog", "cell phone", "cup", "keyboard"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_confidence: 0.4,
            mad_repeat_count: 2,
            mad_window_ms: 1200,
            engage_confirm_ms: 1500,
            curious_timeout_ms: 8000,
            cooldown_timeout_ms: 5000,
            cooldown_reengage_window_ms: 2500,
            engaged_capture_period_ms: 5000,
            burst_count: 2,
            burst_cooldown_ms: 20_000,
        }
    }
}

// ── Sensors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub voltage_min: f64,
    pub voltage_max: f64,
    pub warning_percent: f64,
    pub critical_percent: f64,
    pub hysteresis_percent: f64,
    pub period_s: f64,
    /// Tightened sampling period below the critical threshold
    pub low_battery_period_s: f64,
    #[serde(default)]
    pub response: BatteryResponseConfig,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            voltage_min: 7.0,
            voltage_max: 8.4,
            warning_percent: 50.0,
            critical_percent: 25.0,
            hysteresis_percent: 0.0,
            period_s: 60.0,
            low_battery_period_s: 30.0,
            response: BatteryResponseConfig::default(),
        }
    }
}

/// Policy for when a battery status event may request a model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryResponseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub allow_warning: bool,
    #[serde(default = "default_true")]
    pub allow_critical: bool,
    #[serde(default)]
    pub require_transition: bool,
    pub cooldown_s: f64,
    /// A user battery question keeps responses unlocked for this long
    pub query_context_window_s: f64,
}

impl Default for BatteryResponseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_warning: true,
            allow_critical: true,
            require_transition: false,
            cooldown_s: 60.0,
            query_context_window_s: 45.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    pub tilt_threshold_deg: f64,
    pub gyro_threshold_dps: f64,
    /// Roll/pitch delta per sample that counts as a shake
    pub rate_threshold_deg: f64,
    pub min_event_interval_s: f64,
    pub period_s: f64,
    pub history_len: usize,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            tilt_threshold_deg: 45.0,
            gyro_threshold_dps: 180.0,
            rate_threshold_deg: 30.0,
            min_event_interval_s: 0.5,
            period_s: 0.05,
            history_len: 50,
        }
    }
}

// ── Alerts / stimuli ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub cooldown_s: f64,
    pub ttl_s: f64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { cooldown_s: 60.0, ttl_s: 120.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StimuliConfig {
    pub debounce_window_s: f64,
    /// Low-priority triggers inside this window after an emit are dropped
    pub cooldown_s: f64,
}

impl Default for StimuliConfig {
    fn default() -> Self {
        Self { debounce_window_s: 2.0, cooldown_s: 8.0 }
    }
}

// ── Interaction cues ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    #[serde(default = "default_true")]
    pub cues_enabled: bool,
    #[serde(default = "default_true")]
    pub gesture_enabled: bool,
    #[serde(default)]
    pub earcon_enabled: bool,
    pub min_state_duration_ms: u64,
    /// Per-state cue dispatch delays, keyed by state name
    #[serde(default)]
    pub cue_delays_ms: HashMap<String, u64>,
    pub gesture_global_cooldown_s: f64,
    /// Per-gesture cooldown overrides
    #[serde(default)]
    pub gesture_cooldowns_s: HashMap<String, f64>,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        let cue_delays_ms = [("thinking".to_string(), 150u64)].into_iter().collect();
        let gesture_cooldowns_s = [
            ("gesture_attention_snap".to_string(), 10.0),
            ("gesture_curious_tilt".to_string(), 6.0),
            ("gesture_nod".to_string(), 8.0),
            ("gesture_idle".to_string(), 8.0),
        ]
        .into_iter()
        .collect();
        Self {
            cues_enabled: true,
            gesture_enabled: true,
            earcon_enabled: false,
            min_state_duration_ms: 150,
            cue_delays_ms,
            gesture_global_cooldown_s: 10.0,
            gesture_cooldowns_s,
        }
    }
}

// ── Governance ────────────────────────────────────────────────────────────────

/// Operator-set autonomy dial selecting the default confirmation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutonomyLevel {
    ObserveOnly,
    Assist,
    ActWithConfirm,
    ActWithBounds,
}

impl Default for AutonomyLevel {
    fn default() -> Self {
        AutonomyLevel::ActWithBounds
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub autonomy: AutonomyLevel,
    pub risk_threshold: f64,
    #[serde(default)]
    pub budgets: BudgetConfig,
    /// Per-tool spec overrides; unknown tools fall back to safe defaults
    #[serde(default)]
    pub tools: HashMap<String, ToolSpecConfig>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            autonomy: AutonomyLevel::default(),
            risk_threshold: 0.6,
            budgets: BudgetConfig::default(),
            tools: HashMap::new(),
        }
    }
}

/// Rolling-window budget limits; 0 means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub tool_calls_per_minute: u32,
    pub tool_call_window_s: f64,
    pub expensive_calls_per_day: u32,
    pub expensive_window_s: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            tool_calls_per_minute: 0,
            tool_call_window_s: 60.0,
            expensive_calls_per_day: 0,
            expensive_window_s: 86_400.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSpecConfig {
    pub tier: u8,
    #[serde(default)]
    pub reversible: bool,
    pub cost_hint: String,
    #[serde(default)]
    pub safety_tags: Vec<String>,
}

impl Default for ToolSpecConfig {
    fn default() -> Self {
        Self {
            tier: 2,
            reversible: false,
            cost_hint: "med".into(),
            safety_tags: vec!["unclassified".into()],
        }
    }
}

// ── Research ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    #[serde(default)]
    pub enabled: bool,
    /// When true the model must ask before a research dispatch
    #[serde(default)]
    pub permission_required: bool,
    pub request_timeout_s: f64,
    /// Daily cap on research dispatches (0 = unlimited)
    pub per_day_budget: u32,
    pub max_summary_chars: usize,
    pub firecrawl_url: String,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            permission_required: false,
            request_timeout_s: 30.0,
            per_day_budget: 10,
            max_summary_chars: 1200,
            firecrawl_url: "https://api.firecrawl.dev/v1/scrape".into(),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the SQLite databases and `current_run`
    pub var_dir: String,
    /// Per-run artifact directories live under here
    pub log_dir: String,
    pub active_user_id: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            var_dir: "./var".into(),
            log_dir: "./log".into(),
            active_user_id: "default".into(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
