use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use violin_trainer::analysis::AnalysisFrame;
use violin_trainer::audio::{wav, AudioHost, CpalHost, WavFileHost};
use violin_trainer::config::AppConfig;
use violin_trainer::engine::EngineHandle;
use violin_trainer::managers::{DeliveryError, FrameSink};
use violin_trainer::telemetry::TelemetryEventKind;

#[derive(Parser, Debug)]
#[command(
    name = "violin_cli",
    about = "Capture, condition and analyse violin audio"
)]
struct Cli {
    /// Path to a JSON config file (defaults to $VIOLIN_CONFIG or violin_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List audio input devices as JSON
    Devices,
    /// Run the pipeline over a WAV file and print one JSON frame per line
    Analyze(AnalyzeArgs),
    /// Serve the HTTP control surface
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    #[arg(long)]
    wav: PathBuf,
    #[arg(long)]
    block_size: Option<usize>,
    /// Fixed gate threshold in dBFS (disables the adaptive gate)
    #[arg(long, allow_hyphen_values = true)]
    gate_db: Option<f32>,
    #[arg(long)]
    no_highpass: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Bind address (defaults to the configured http.bind_addr)
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("violin_cli error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

impl Cli {
    fn execute(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => AppConfig::load_from_file(path),
            None => AppConfig::load(),
        };
        match self.command {
            Command::Devices => devices_command(),
            Command::Analyze(args) => analyze_command(config, args),
            Command::Serve(args) => serve_command(config, args),
        }
    }
}

fn devices_command() -> Result<()> {
    let devices = CpalHost::new()
        .enumerate()
        .context("enumerating input devices")?;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

/// Writes each frame as a JSON line on stdout
struct StdoutSink {
    written: AtomicU64,
}

impl FrameSink for StdoutSink {
    fn push(&self, frame: &Arc<AnalysisFrame>) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(frame.as_ref()).map_err(|_| DeliveryError::Closed)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").map_err(|_| DeliveryError::Closed)?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn analyze_command(mut config: AppConfig, args: AnalyzeArgs) -> Result<()> {
    let host = WavFileHost::open_file(&args.wav)
        .with_context(|| format!("loading {}", args.wav.display()))?;
    let sample_rate = host.sample_rate();

    if let Some(gate_db) = args.gate_db {
        config.noise.gate_threshold_db = gate_db;
        config.noise.adaptive = false;
    }
    if args.no_highpass {
        config.noise.high_pass_enabled = false;
    }
    config.stream.autostart_on_subscribe = false;

    let engine = EngineHandle::new(Arc::new(host), config);
    let sink = Arc::new(StdoutSink {
        written: AtomicU64::new(0),
    });
    engine.subscribe(sink.clone());
    let mut telemetry = engine.telemetry();

    engine
        .start(Some(0), Some(sample_rate), args.block_size)
        .context("starting WAV session")?;

    loop {
        match telemetry.blocking_recv() {
            Ok(event) => match event.kind {
                TelemetryEventKind::CaptureFailed => {
                    let detail = event.detail.unwrap_or_default();
                    if !detail.contains(wav::END_OF_STREAM) {
                        bail!("capture failed: {detail}");
                    }
                    break;
                }
                TelemetryEventKind::EngineStopped => break,
                _ => {}
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("[violin_cli] Skipped {} telemetry events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }

    tracing::info!(
        "[violin_cli] Analysed {} ({} frames)",
        args.wav.display(),
        sink.written.load(Ordering::Relaxed)
    );
    Ok(())
}

#[cfg(feature = "http")]
fn serve_command(config: AppConfig, args: ServeArgs) -> Result<()> {
    let addr = args.addr.unwrap_or_else(|| config.http.bind_addr.clone());
    let engine = Arc::new(EngineHandle::new(Arc::new(CpalHost::new()), config));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        tokio::select! {
            result = violin_trainer::http::serve(Arc::clone(&engine), &addr) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[violin_cli] Shutting down");
                Ok(())
            }
        }
    })?;

    let engine_for_stop = Arc::clone(&engine);
    runtime
        .block_on(tokio::task::spawn_blocking(move || engine_for_stop.stop()))
        .context("joining engine shutdown")?
        .context("stopping engine")?;
    Ok(())
}

#[cfg(not(feature = "http"))]
fn serve_command(_config: AppConfig, _args: ServeArgs) -> Result<()> {
    bail!("violin_cli was built without the `http` feature")
}
