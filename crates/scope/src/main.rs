//! MetaDJ Scope - audio-reactive client for the Scope real-time video API
//!
//! Analyzes audio, maps it through a soundscape theme and streams the
//! resulting generation parameters to a Scope server over WebRTC.

mod config;
mod logging_setup;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::ScopeConfig;
use scope_control::{ScopeApi, ScopeClient};
use scope_core::audio::{AnalyzerConfig, AudioAnalyzer, AudioSource, WavFileSource};
use scope_core::mapping::compute_parameters;
use scope_core::parameters::ScopeParameters;
use scope_core::theme::{BeatResponse, ReactivityPreset, Theme, ThemeCatalog};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "metadj-scope", version, about)]
struct Cli {
    /// Config file (default: ~/.metadj-scope/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Theme selection shared by the analysis commands
#[derive(clap::Args, Debug, Clone)]
struct ThemeArgs {
    /// Theme id (default: from config)
    #[arg(long)]
    theme: Option<String>,

    /// Build a custom theme from this prompt instead
    #[arg(long, conflicts_with = "theme")]
    prompt: Option<String>,

    #[arg(long, value_enum, default_value_t = PresetArg::Balanced, requires = "prompt")]
    preset: PresetArg,

    #[arg(long, value_enum, default_value_t = BeatArg::Pulse, requires = "prompt")]
    beat: BeatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum PresetArg {
    Subtle,
    Balanced,
    Energetic,
    Chaotic,
}

impl From<PresetArg> for ReactivityPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Subtle => ReactivityPreset::Subtle,
            PresetArg::Balanced => ReactivityPreset::Balanced,
            PresetArg::Energetic => ReactivityPreset::Energetic,
            PresetArg::Chaotic => ReactivityPreset::Chaotic,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum BeatArg {
    None,
    Pulse,
    CacheReset,
}

impl From<BeatArg> for BeatResponse {
    fn from(arg: BeatArg) -> Self {
        match arg {
            BeatArg::None => BeatResponse::None,
            BeatArg::Pulse => BeatResponse::Pulse,
            BeatArg::CacheReset => BeatResponse::CacheReset,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check server health and pipeline status
    Health,
    /// List available soundscape themes
    Themes,
    /// Analyze a WAV file and print the parameters it would produce
    Analyze {
        file: PathBuf,
        #[command(flatten)]
        theme: ThemeArgs,
        /// Print every tick's parameters as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Connect to the server and stream parameters from live audio
    Run {
        /// Play this WAV file in real time instead of capturing input
        #[arg(long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        theme: ThemeArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => ScopeConfig::default_path().context("Could not determine home directory")?,
    };
    let mut config = ScopeConfig::load_or_create(&config_path)?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    let _log_guard = logging_setup::init(&config.logging)?;
    info!("MetaDJ Scope {} starting", env!("CARGO_PKG_VERSION"));
    info!("Config: {:?}", config_path);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Command::Health => health(&config).await,
            Command::Themes => themes(&config),
            Command::Analyze { file, theme, json } => analyze(&config, &file, &theme, json),
            Command::Run { file, theme } => run(&config, file, &theme).await,
        }
    })
}

fn client(config: &ScopeConfig) -> Result<ScopeClient> {
    ScopeClient::with_timeout(
        &config.server.base_url,
        Duration::from_millis(config.server.request_timeout_ms),
    )
    .context("Invalid server configuration")
}

fn catalog(config: &ScopeConfig) -> Result<ThemeCatalog> {
    let mut catalog = ThemeCatalog::new();
    if let Some(path) = &config.soundscape.themes_file {
        let count = catalog
            .load_file(path)
            .with_context(|| format!("Failed to load themes from {:?}", path))?;
        info!("Loaded {} custom themes from {:?}", count, path);
    }
    Ok(catalog)
}

fn select_theme(config: &ScopeConfig, args: &ThemeArgs) -> Result<Theme> {
    if let Some(prompt) = &args.prompt {
        if prompt.trim().is_empty() {
            bail!("--prompt must not be empty");
        }
        return Ok(Theme::custom(prompt, args.preset.into(), args.beat.into()));
    }
    let id = args.theme.as_deref().unwrap_or(&config.soundscape.theme);
    Ok(catalog(config)?.require(id)?.clone())
}

async fn health(config: &ScopeConfig) -> Result<()> {
    let client = client(config)?;
    let health = client
        .check_health()
        .await
        .with_context(|| format!("Health check against {} failed", client.base_url()))?;

    println!("Server:  {}", client.base_url());
    println!(
        "Status:  {}{}",
        health.status,
        if health.is_healthy() { "" } else { " (unhealthy)" }
    );
    if let Some(version) = &health.version {
        println!("Version: {}", version);
    }
    if let Some(gpu) = &health.gpu {
        println!("GPU:     {}", gpu);
    }
    if let Some(vram) = health.vram {
        println!("VRAM:    {:.1} GB", vram);
    }

    match client.pipeline_status().await {
        Ok(status) => println!(
            "Pipeline: {} {}",
            status.status,
            status.pipeline_id.as_deref().unwrap_or("")
        ),
        Err(e) => warn!("Pipeline status unavailable: {}", e),
    }
    Ok(())
}

fn themes(config: &ScopeConfig) -> Result<()> {
    let catalog = catalog(config)?;
    for theme in catalog.themes() {
        let marker = if theme.id == config.soundscape.theme { "*" } else { " " };
        println!("{} {:<20} {}", marker, theme.id, theme.name);
        println!("    {}", theme.description);
    }
    Ok(())
}

/// Offline dry run: decode, analyze and map without a server
fn analyze(config: &ScopeConfig, file: &Path, args: &ThemeArgs, json: bool) -> Result<()> {
    let theme = select_theme(config, args)?;
    let (samples, sample_rate) = WavFileSource::new(file)
        .decode()
        .with_context(|| format!("Failed to read {:?}", file))?;

    let mut analyzer = AudioAnalyzer::new(AnalyzerConfig {
        sample_rate,
        ..config.audio.to_analyzer_config()
    });

    let mut carried = ScopeParameters::default();
    carried.set_vace(config.soundscape.vace());

    let mut ticks = 0usize;
    let mut beats = 0usize;
    let mut resets = 0usize;
    let mut energy_sum = 0.0f64;
    let mut last = None;

    for chunk in samples.chunks(sample_rate as usize / 10 + 1) {
        for state in analyzer.process_samples(chunk) {
            let params = compute_parameters(&theme, &state, Some(&carried));
            ticks += 1;
            beats += usize::from(state.beat.is_beat);
            resets += usize::from(params.reset_cache());
            energy_sum += f64::from(state.derived.energy);
            if json {
                println!("{}", params.to_json()?);
            }
            last = Some(state);
            carried = params;
        }
    }

    let Some(last) = last else {
        bail!("{:?} is too short to analyze", file);
    };
    eprintln!("Theme:       {} ({})", theme.name, theme.id);
    eprintln!("Duration:    {:.2}s", samples.len() as f64 / sample_rate as f64);
    eprintln!("Ticks:       {}", ticks);
    eprintln!("Beats:       {}", beats);
    eprintln!("Resets:      {}", resets);
    eprintln!("Mean energy: {:.3}", energy_sum / ticks as f64);
    match last.beat.tempo {
        Some(bpm) => eprintln!("Tempo:       {:.1} BPM ({:.0}% confidence)", bpm, last.beat.confidence * 100.0),
        None => eprintln!("Tempo:       -"),
    }
    Ok(())
}

fn audio_source(config: &ScopeConfig, file: Option<PathBuf>) -> Result<Box<dyn AudioSource>> {
    if let Some(path) = file {
        return Ok(Box::new(WavFileSource::new(path).with_realtime(true)));
    }
    #[cfg(feature = "audio")]
    {
        Ok(Box::new(scope_core::audio::CpalInputSource::new(
            config.audio.device.clone(),
        )))
    }
    #[cfg(not(feature = "audio"))]
    {
        let _ = config;
        bail!("Built without the `audio` feature; pass --file to stream a WAV file")
    }
}

#[cfg(feature = "webrtc")]
async fn run(config: &ScopeConfig, file: Option<PathBuf>, args: &ThemeArgs) -> Result<()> {
    use scope_control::webrtc::{ReceiveVideo, SessionNegotiator};
    use scope_control::{
        ConnectionController, ConnectionObserver, ConnectionState, DisconnectReason,
        ParameterSender, RtcPeerFactory, SoundscapeDriver,
    };
    use scope_control::webrtc::{ControlChannel, MediaTrack};
    use scope_core::audio::LiveAnalyzer;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct ConsoleObserver;

    impl ConnectionObserver for ConsoleObserver {
        fn on_state_change(&self, _old: ConnectionState, new: ConnectionState) {
            println!("[{}]", new);
        }

        fn on_stream(&self, tracks: &[Arc<dyn MediaTrack>]) {
            for track in tracks {
                println!("Receiving {:?} stream {}", track.kind(), track.id());
            }
        }

        fn on_data_channel_open(&self, channel: &Arc<dyn ControlChannel>) {
            println!("Control channel '{}' open", channel.label());
        }

        fn on_disconnect(&self, reason: DisconnectReason) {
            println!("Connection lost: {:?}", reason);
        }
    }

    let theme = select_theme(config, args)?;
    let api = Arc::new(client(config)?);
    let health = api
        .check_health()
        .await
        .with_context(|| format!("Scope server at {} is not reachable", api.base_url()))?;
    if !health.is_healthy() {
        warn!("Server reports status '{}'", health.status);
    }

    let negotiator = SessionNegotiator::new(api, Arc::new(RtcPeerFactory), Arc::new(ReceiveVideo));
    let controller = ConnectionController::new(
        Arc::new(negotiator),
        config.connection.to_connection_config(),
    );
    controller.add_observer(Arc::new(ConsoleObserver));

    let sender = ParameterSender::with_min_interval(
        Arc::new(controller.clone()),
        config.soundscape.min_send_interval(),
    );
    let mut driver = SoundscapeDriver::new(theme, sender);
    driver.set_vace(config.soundscape.vace());
    controller.set_initial_parameters(Some(driver.initial_parameters()));

    let (tick_tx, tick_rx) = mpsc::unbounded_channel();
    let mut analyzer = LiveAnalyzer::new(config.audio.to_analyzer_config());
    analyzer.on_tick(move |state| {
        let _ = tick_tx.send(*state);
    });
    analyzer
        .attach(audio_source(config, file)?)
        .context("Failed to start audio input")?;

    controller.connect().await;
    if let Some(e) = controller.error() {
        analyzer.detach();
        bail!("{}", e);
    }

    let states = controller.subscribe();
    let driver_task = tokio::spawn(driver.run(tick_rx, states));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, shutting down");
        }
        _ = wait_for_terminal(controller.subscribe()) => {
            if let Some(e) = controller.error() {
                warn!("Stopping: {}", e);
            }
        }
    }

    // Drops the tick observer too, which ends the driver
    drop(analyzer);
    controller.disconnect().await;
    if let Ok(driver) = driver_task.await {
        info!("Sent {} parameter updates", driver.sender().sent_count());
    }
    Ok(())
}

/// Resolves once the connection settles in `error`
#[cfg(feature = "webrtc")]
async fn wait_for_terminal(mut states: tokio::sync::watch::Receiver<scope_control::ConnectionState>) {
    let _ = states
        .wait_for(|s| *s == scope_control::ConnectionState::Error)
        .await;
}

#[cfg(not(feature = "webrtc"))]
async fn run(config: &ScopeConfig, file: Option<PathBuf>, args: &ThemeArgs) -> Result<()> {
    let _ = (select_theme(config, args)?, audio_source(config, file)?);
    bail!("Built without the `webrtc` feature; rebuild with --features webrtc to connect")
}
