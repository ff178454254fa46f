use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use smartguard_capture::FfmpegSource;
use smartguard_network::{HttpUploader, LocalBroker, ReportTransport};
use smartguard_ops::{init_tracing, TelemetryStore};
use smartguard_pipeline::{Pipeline, PipelineRunner};
use smartguard_types::config::{SmartguardConfig, TransportKind};
use smartguard_vision::SeetaFaceDetector;
use tracing::info;

/// Edge surveillance pipeline: watches a camera or video file and reports
/// moments with a moving face.
#[derive(Debug, Parser)]
#[command(name = "smartguard", version)]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "SMARTGUARD_CONFIG", default_value = "configs/dev.toml")]
    config: PathBuf,
    /// Frames per second to process.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    fps: Option<u32>,
    /// Persist annotated debug frames.
    #[arg(long)]
    display: bool,
    /// Video file to read instead of the live camera.
    #[arg(long)]
    input: Option<String>,
    /// Write recorded telemetry events as json lines when capture ends.
    #[arg(long)]
    events_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.ops)?;

    let telemetry = TelemetryStore::new();
    match config.network.transport {
        TransportKind::Local => {
            let broker = Arc::new(LocalBroker::new(config.network.channel_capacity));
            run(&config, broker, telemetry.clone()).await?;
        }
        #[cfg(feature = "mqtt")]
        TransportKind::Mqtt => {
            let transport = Arc::new(smartguard_network::MqttTransport::new(
                &config.device,
                &config.network,
            ));
            run(&config, transport, telemetry.clone()).await?;
        }
        #[cfg(not(feature = "mqtt"))]
        TransportKind::Mqtt => {
            anyhow::bail!("mqtt transport requested but smartguard was built without the `mqtt` feature")
        }
    }

    if let Some(path) = &args.events_out {
        let written = telemetry.export_events(path).await?;
        info!("Wrote {written} telemetry events to {}", path.display());
    }
    Ok(())
}

async fn run<T>(config: &SmartguardConfig, transport: Arc<T>, telemetry: TelemetryStore) -> Result<()>
where
    T: ReportTransport + 'static,
{
    let detector = SeetaFaceDetector::from_config(&config.faces)
        .context("face detector could not be loaded")?;
    let source = FfmpegSource::open(&config.capture)
        .await
        .context("video source could not be opened")?;
    let uploader = Arc::new(HttpUploader::new(Duration::from_secs(
        config.network.upload_timeout_secs,
    ))?);

    let mut pipeline = Pipeline::new(config, source, detector, transport, uploader, telemetry)?;
    pipeline.boot().await?;
    let result = pipeline.run().await;
    pipeline.shutdown();
    result?;
    Ok(())
}

/// Reads the config file, falling back to defaults when it is missing or
/// invalid, then applies the command line. Flags are never discarded: a
/// config that is invalid after applying them is an error.
fn load_config(args: &Args) -> Result<SmartguardConfig> {
    let mut config = match SmartguardConfig::from_file(&args.config) {
        Ok(cfg) => match cfg.validate() {
            Ok(()) => cfg,
            Err(err) => {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    args.config.display()
                );
                SmartguardConfig::default()
            }
        },
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                args.config.display()
            );
            SmartguardConfig::default()
        }
    };

    if let Some(fps) = args.fps {
        config.capture.fps = fps;
    }
    if args.display {
        config.capture.display = true;
    }
    if let Some(input) = &args.input {
        config.capture.input = Some(input.clone());
    }

    if let Err(err) = config.validate() {
        anyhow::bail!("invalid configuration after applying command line flags: {err}");
    }
    Ok(config)
}
