// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod hal;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use theo_config::Config;
use theo_events::{Alert, AlertPolicy, AlertSeverity, EventBus};
use theo_memory::{
    MemoryManager, MemoryStore, ProfileManager, ReflectionManager, ReflectionStore,
    UserProfileStore,
};
use theo_motion::{GestureLibrary, MotionController};
use theo_realtime::{
    CueDispatcher, EventInjector, InteractionStateManager, RealtimeSession, SessionChannels,
    StimuliCoordinator,
};
use theo_research::{
    allocate_run_id, FirecrawlClient, FirecrawlProvider, NullProvider, ResearchProvider,
    ResearchTranscript,
};
use theo_sensors::{BatteryMonitor, ImuMonitor};
use theo_tools::builtin::{
    ForgetMemoryTool, GestureTool, GetOutputVolumeTool, GetServoPositionTool,
    OutputVolumeController, PerformResearchTool, ReadBatteryVoltageTool, ReadEnvironmentTool,
    ReadImuDataTool, RecallMemoriesTool, RememberMemoryTool, SetOutputVolumeTool, SetPanTool,
    SetTiltTool, UpdateUserProfileTool, GESTURE_TOOL_NAMES,
};
use theo_tools::{GovernanceLayer, ToolRegistry};
use theo_vision::VisionWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Arc::new(theo_config::load(cli.config.as_deref())?);

    // The API key is required at startup, before any hardware comes up.
    let key_env = &config.realtime.api_key_env;
    anyhow::ensure!(
        std::env::var(key_env).map(|v| !v.is_empty()).unwrap_or(false),
        "please set the {key_env} environment variable"
    );

    run(config, cli.prompts).await
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    // Audio-layer chatter is suppressed unless explicitly requested.
    if std::env::var("THEO_AUDIO_DEBUG").is_err() && !verbose {
        if let Ok(directive) = "theo::hal=warn".parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(config: Arc<Config>, prompts: Vec<String>) -> anyhow::Result<()> {
    let bus = Arc::new(EventBus::new(200));

    // ── Motion ────────────────────────────────────────────────────────────────
    let motion = Arc::new(MotionController::new(
        Arc::new(hal::LoopbackServoBackend),
        config.motion.clone(),
    ));
    let gestures = Arc::new(GestureLibrary::open(&config.motion.gesture_library_path));
    motion.start_control_loop();

    // ── Persistence ───────────────────────────────────────────────────────────
    let var_dir = PathBuf::from(&config.storage.var_dir);
    let log_dir = PathBuf::from(&config.storage.log_dir);
    let user_id = config.storage.active_user_id.clone();
    let memory = Arc::new(MemoryManager::new(
        Arc::new(MemoryStore::open(&var_dir.join("memories.db"))?),
        user_id.clone(),
    ));
    let profiles = Arc::new(ProfileManager::new(
        Arc::new(UserProfileStore::open(&var_dir.join("profiles.db"))?),
        user_id.clone(),
    ));
    let reflections = Arc::new(ReflectionManager::new(
        Arc::new(ReflectionStore::open(&var_dir.join("reflections.db"))?),
        user_id,
    ));
    let run_id = allocate_run_id(&var_dir)?;
    info!(run_id, "run started");

    // ── Research ──────────────────────────────────────────────────────────────
    let transcript = Arc::new(ResearchTranscript::new(&log_dir, run_id));
    let research_provider: Arc<dyn ResearchProvider> = {
        let firecrawl = FirecrawlClient::new(
            None,
            config.research.firecrawl_url.clone(),
            config.research.request_timeout_s,
        );
        if firecrawl.enabled() {
            Arc::new(FirecrawlProvider::new(firecrawl, 20_000))
        } else {
            Arc::new(NullProvider)
        }
    };
    let research_budget = Arc::new(theo_events::RollingWindow::new(
        "research_per_day",
        config.research.per_day_budget,
        Duration::from_secs(86_400),
    ));

    // ── Sensors ───────────────────────────────────────────────────────────────
    let voltage: Arc<dyn theo_sensors::VoltageSource> =
        Arc::new(hal::LoopbackVoltageSource::new());
    let mut battery = BatteryMonitor::new(
        Arc::clone(&voltage),
        Arc::clone(&bus),
        config.battery.clone(),
    );
    battery.start();

    let mut imu = ImuMonitor::new(
        Arc::new(hal::LoopbackImuSource),
        Arc::clone(&bus),
        config.imu.clone(),
    );
    let imu_handle = imu.handle();
    imu.start();

    // ── Vision ────────────────────────────────────────────────────────────────
    let motion_gate = {
        let motion = Arc::clone(&motion);
        Arc::new(move || motion.is_moving()) as Arc<dyn Fn() -> bool + Send + Sync>
    };
    let mut vision = VisionWorker::new(
        Arc::new(hal::LoopbackFrameSource),
        None,
        Arc::clone(&bus),
        config.camera.clone(),
        config.attention.clone(),
        motion_gate,
    );
    vision.start();

    // ── Tools + governance ────────────────────────────────────────────────────
    let volume = Arc::new(OutputVolumeController::new(hal::LoopbackVolumeBackend::new(40)));
    let mut registry = ToolRegistry::new();
    registry.register(ReadBatteryVoltageTool::new(voltage, &config.battery));
    registry.register(ReadEnvironmentTool::new(Arc::new(hal::LoopbackEnvironmentSource)));
    registry.register(ReadImuDataTool::new(imu_handle));
    for (gesture, description) in GESTURE_TOOL_NAMES {
        registry.register(GestureTool::new(
            gesture,
            description,
            Arc::clone(&gestures),
            Arc::clone(&motion),
        ));
    }
    registry.register(SetPanTool::new(Arc::clone(&motion)));
    registry.register(SetTiltTool::new(Arc::clone(&motion)));
    registry.register(GetServoPositionTool::new(Arc::clone(&motion)));
    registry.register(UpdateUserProfileTool::new(Arc::clone(&profiles)));
    registry.register(GetOutputVolumeTool::new(Arc::clone(&volume)));
    registry.register(SetOutputVolumeTool::new(Arc::clone(&volume)));
    registry.register(RememberMemoryTool::new(Arc::clone(&memory)));
    registry.register(RecallMemoriesTool::new(Arc::clone(&memory)));
    registry.register(ForgetMemoryTool::new(Arc::clone(&memory)));
    registry.register(PerformResearchTool::new(
        Arc::clone(&research_provider),
        Arc::clone(&research_budget),
        Some(Arc::clone(&transcript)),
    ));
    let registry = Arc::new(registry);
    let governance = Arc::new(GovernanceLayer::new(
        &config.governance,
        registry.default_specs(),
    ));

    // ── Session instructions ──────────────────────────────────────────────────
    let instructions = build_instructions(&config, &profiles, &reflections)?;

    // ── Channels between workers and the session task ─────────────────────────
    let (ready_tx, ready_rx) = watch::channel(false);
    let (injected_tx, injected_rx) = mpsc::channel(32);
    let mut injector = EventInjector::new(Arc::clone(&bus), ready_rx, injected_tx);
    injector.start();

    let (stimuli_tx, stimuli_rx) = mpsc::unbounded_channel();
    let stimuli = Arc::new(StimuliCoordinator::new(config.stimuli.clone(), stimuli_tx));

    let (cue_tx, cue_rx) = mpsc::unbounded_channel();
    let mut state_manager = InteractionStateManager::new(config.interaction.clone());
    state_manager.set_cue_channel(cue_tx);
    let cue_dispatcher = CueDispatcher::new(
        Arc::clone(&motion),
        Arc::clone(&gestures),
        config.interaction.clone(),
    );

    let (playback_tx, playback_rx) = mpsc::channel(4);
    let speaker = Arc::new(hal::LoopbackSpeaker::new(playback_tx));
    let mic = Arc::new(hal::LoopbackMicrophone);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received; shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    // Worker liveness watchdog feeding the alert policy.
    let alert_policy = Arc::new(AlertPolicy::from_config(&config.alerts));
    {
        let bus = Arc::clone(&bus);
        let motion = Arc::clone(&motion);
        let alert_policy = Arc::clone(&alert_policy);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30));
            loop {
                tick.tick().await;
                if !motion.is_control_loop_alive() {
                    alert_policy.emit(
                        &bus,
                        Alert::new(
                            "motion_loop_dead",
                            "The motion control loop has stopped.",
                            AlertSeverity::High,
                        ),
                    );
                }
            }
        });
    }

    let mut channels = SessionChannels {
        injected_rx,
        stimuli_rx,
        cue_rx,
        playback_rx,
        shutdown_rx,
    };
    let mut session = RealtimeSession::new(
        Arc::clone(&config),
        instructions,
        prompts,
        registry,
        governance,
        mic,
        speaker,
        Arc::clone(&bus),
        stimuli,
        cue_dispatcher,
        state_manager,
        config.research.enabled.then_some(research_provider),
        ready_tx,
    );

    let result = session.run(&mut channels).await;

    // Teardown in reverse dependency order.
    injector.stop();
    vision.stop();
    imu.stop();
    battery.stop();
    motion.stop_control_loop();
    if let Err(err) = &result {
        warn!(%err, "session ended with error");
    }
    result
}

fn build_instructions(
    config: &Config,
    profiles: &ProfileManager,
    reflections: &ReflectionManager,
) -> anyhow::Result<String> {
    let soul_path = Path::new(&config.realtime.soul_path);
    let soul = if soul_path.is_file() {
        std::fs::read_to_string(soul_path)
            .with_context(|| format!("reading {}", soul_path.display()))?
            .trim()
            .to_string()
    } else {
        warn!(path = %soul_path.display(), "SOUL prompt missing; using a minimal default");
        "You are Theo, a small companion robot. Be warm, brief, and curious.".to_string()
    };
    let mut blocks = vec![soul];
    blocks.push(profiles.profile_context()?.to_instruction_block());
    blocks.push(reflections.reflection_context(5)?.to_instruction_block());
    Ok(blocks.join("\n"))
}
