use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facecam_hw::Camera;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod dashboard;
mod engine;
mod state;

use config::Config;
use dashboard::Dashboard;
use state::LiveState;

#[derive(Parser)]
#[command(name = "facecam", about = "Live webcam face recognition")]
struct Cli {
    /// Config file (default: ./facecam.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live dashboard (default)
    Serve(ServeArgs),
    /// Download any missing model artifacts and exit
    Fetch,
    /// Annotate a single image file
    Annotate {
        /// Input image
        input: PathBuf,
        /// Where to write the annotated image
        output: PathBuf,
    },
    /// Build a classifier gallery from DATASET/<label>/<image> files
    BuildGallery {
        dataset: PathBuf,
        /// Output path (default: the configured classifier file)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Softmax temperature for predictions
        #[arg(long)]
        temperature: Option<f32>,
    },
    /// List video capture devices
    Devices,
}

#[derive(Args, Default)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Camera index (/dev/videoN)
    #[arg(long)]
    camera: Option<u32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => serve(config, args),
        Commands::Fetch => {
            let provisioned = commands::provision(&config, &config.artifacts())?;
            for p in &provisioned {
                let how = if p.was_fetched() { "downloaded" } else { "present" };
                println!("{how:>10}  {}", p.path().display());
            }
            Ok(())
        }
        Commands::Annotate { input, output } => {
            commands::annotate_file(&config, &input, &output)?;
            println!("wrote {}", output.display());
            Ok(())
        }
        Commands::BuildGallery {
            dataset,
            output,
            temperature,
        } => {
            let output = output.unwrap_or_else(|| config.recogniser_paths().classifier);
            let report = commands::build_gallery(&config, &dataset, &output, temperature)?;
            println!(
                "wrote {} ({} classes, {} images used, {} skipped)",
                output.display(),
                report.classes,
                report.used,
                report.skipped
            );
            Ok(())
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no video capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
    }
}

fn serve(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(camera) = args.camera {
        config.camera_index = camera;
    }

    tracing::info!("facecam starting");

    // Blocking downloads run before any async runtime exists.
    let provisioned = commands::provision(&config, &config.artifacts())?;
    let annotator = commands::load_annotator(&config)?;

    let state = Arc::new(LiveState::new(commands::provision_banners(&provisioned)));
    let camera_index = config.camera_index;
    let capture = engine::spawn_capture_worker(
        annotator,
        move || Camera::open(camera_index),
        Arc::clone(&state),
        config.jpeg_quality,
    )?;

    let dashboard = Dashboard {
        state: Arc::clone(&state),
        capture,
    };
    actix_web::rt::System::new()
        .block_on(dashboard::serve(&config.bind, config.port, dashboard))
        .context("dashboard server failed")?;

    // Let an active session release the camera.
    state.request_stop();
    tracing::info!("facecam shutting down");
    Ok(())
}
