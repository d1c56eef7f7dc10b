use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;

use camrec::capture::{CaptureDevice, Resolution, SyntheticConfig, SyntheticDevice};
use camrec::summary::AssetReader;
use camrec::{PipelineConfig, PipelineController, PipelineEvent};

/// camrec - capture camera and microphone into a movie file
#[derive(Parser)]
#[command(name = "camrec")]
#[command(version, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where captured buffers come from
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DeviceKind {
    /// Moving test pattern and a sine tone
    Synthetic,
    /// Default camera and microphone (requires the `native` feature)
    Native,
}

#[derive(Subcommand)]
enum Commands {
    /// Record camera and microphone into a movie file
    Record {
        /// Capture device
        #[arg(short, long, value_enum, default_value = "synthetic")]
        device: DeviceKind,

        /// Pipeline config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output file, replaced if it exists
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many seconds (Ctrl-C stops earlier)
        #[arg(short, long, default_value = "5")]
        seconds: f64,
    },

    /// Print frame rate, resolution, bitrate and size of a movie file
    Summarize {
        /// Movie file to read
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    camrec::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            device,
            config,
            output,
            seconds,
        } => record(device, config, output, seconds, cli.json).await,
        Commands::Summarize { path } => summarize(&path, cli.json),
    }
}

fn open_device(kind: DeviceKind) -> Result<Box<dyn CaptureDevice>> {
    match kind {
        DeviceKind::Synthetic => Ok(Box::new(SyntheticDevice::new(SyntheticConfig {
            resolution: Resolution {
                width: 320,
                height: 180,
            },
            ..SyntheticConfig::default()
        }))),
        #[cfg(feature = "native")]
        DeviceKind::Native => Ok(Box::new(camrec::capture::NativeDevice::new(
            camrec::capture::NativeConfig::default(),
        ))),
        #[cfg(not(feature = "native"))]
        DeviceKind::Native => bail!("camrec was built without the `native` feature"),
    }
}

async fn record(
    device: DeviceKind,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    seconds: f64,
    json: bool,
) -> Result<()> {
    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("--seconds must be positive, got {}", seconds);
    }

    let mut config = match config {
        Some(path) => PipelineConfig::from_file(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(output) = output {
        config.output_path = output;
    }
    let output_path = config.output_path.clone();

    let pipeline = PipelineController::new(open_device(device)?, config);
    let mut events = pipeline.subscribe();

    pipeline.start().context("Failed to start recording")?;

    let deadline = tokio::time::sleep(Duration::from_secs_f64(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(PipelineEvent::FrameRate { label, .. }) => tracing::info!("{}", label),
                Ok(PipelineEvent::CaptureEnded) => break,
                Ok(PipelineEvent::Error(message)) => tracing::error!("{}", message),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    pipeline.stop().context("Recording failed")?;

    let summary = loop {
        match events.recv().await {
            Ok(PipelineEvent::Completed(summary)) => break summary,
            Ok(PipelineEvent::Error(message)) => bail!("Recording failed: {}", message),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => bail!("Pipeline closed before finishing"),
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Recorded {} ({} video, {} audio buffers, {} dropped)",
            summary.output_path.display(),
            summary.stats.video_appended,
            summary.stats.audio_appended,
            summary.stats.dropped()
        );
    }
    summarize(&output_path, json)
}

fn summarize(path: &Path, json: bool) -> Result<()> {
    let reader = AssetReader::open(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let summary = reader.summarize()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in summary.display_lines() {
            println!("{}", line);
        }
    }
    Ok(())
}
