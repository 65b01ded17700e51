//! tickcap CLI: capture game telemetry and align it to camera recordings.
//!
//! Usage:
//!   tickcap serve [OPTIONS]              Run the capture server
//!   tickcap align [OPTIONS]              Align one episode to a recording
//!   tickcap align-batch <MANIFEST>       Align many episodes concurrently
//!   tickcap compare <LEFT> <RIGHT>       Build a side-by-side comparison video
//!   tickcap info <PATH>                  Summarize an episode or alignment file
//!   tickcap check                        Check for ffmpeg/ffprobe

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use tickcap_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "tickcap",
    about = "Synchronized game-telemetry capture and video alignment",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/tickcap/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture server until Ctrl+C
    Serve {
        /// Bot name used in episode file names
        #[arg(short, long)]
        name: Option<String>,

        /// Instance id used in episode file names
        #[arg(long)]
        instance_id: Option<u32>,

        /// Output directory for episode files
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to listen on
        #[arg(long)]
        host: Option<String>,

        /// Expect position frames only, without image frames
        #[arg(long)]
        no_video: bool,

        /// Per-read socket timeout in seconds (0 disables)
        #[arg(long)]
        read_timeout_secs: Option<f64>,
    },

    /// Align one episode's action trace to a camera recording
    Align {
        /// Action trace JSON
        #[arg(long)]
        actions: PathBuf,

        /// Camera metadata JSON
        #[arg(long)]
        camera_meta: PathBuf,

        /// Aligned output video
        #[arg(long)]
        output_video: PathBuf,

        /// Alignment report path (defaults to <output stem>_meta.json)
        #[arg(long)]
        output_metadata: Option<PathBuf>,

        /// Seconds added to every action time before matching
        #[arg(long)]
        video_delay_secs: Option<f64>,

        /// Boundary grace period for diagnostics, in seconds
        #[arg(long)]
        grace_secs: Option<f64>,

        /// Also write a side-by-side video of the game capture and the aligned output
        #[arg(long, requires = "game_video")]
        comparison_video: Option<PathBuf>,

        /// Game capture video for the comparison
        #[arg(long, requires = "comparison_video")]
        game_video: Option<PathBuf>,
    },

    /// Align every job in a manifest
    AlignBatch {
        /// JSON array of {actions, camera_meta, output_video, output_metadata?}
        manifest: PathBuf,

        /// Maximum concurrent jobs
        #[arg(short, long, default_value = "4")]
        jobs: usize,

        /// Default video delay for entries that do not set one
        #[arg(long)]
        video_delay_secs: Option<f64>,
    },

    /// Build a side-by-side comparison video
    Compare {
        /// Left video
        left: PathBuf,

        /// Right video; both are scaled to its height
        right: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Summarize an episode trace, episode metadata, camera metadata, or alignment report
    Info {
        /// Path to the JSON file
        path: PathBuf,
    },

    /// Check for required external tools
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => AppConfig::load(),
    };

    // Initialize logging
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    tickcap_common::logging::init_logging(&config.logging)?;

    match cli.command {
        Commands::Serve {
            name,
            instance_id,
            output,
            port,
            host,
            no_video,
            read_timeout_secs,
        } => {
            let capture = &mut config.capture;
            if let Some(name) = name {
                capture.bot_name = name;
            }
            if let Some(instance_id) = instance_id {
                capture.instance_id = instance_id;
            }
            if let Some(output) = output {
                capture.output_dir = output;
            }
            if let Some(port) = port {
                capture.port = port;
            }
            if let Some(host) = host {
                capture.host = host;
            }
            if no_video {
                capture.video_capture = false;
            }
            if let Some(secs) = read_timeout_secs {
                capture.read_timeout_secs = Some(secs);
            }
            commands::serve::run(config.capture).await
        }
        Commands::Align {
            actions,
            camera_meta,
            output_video,
            output_metadata,
            video_delay_secs,
            grace_secs,
            comparison_video,
            game_video,
        } => {
            if let Some(grace) = grace_secs {
                config.align.boundary_grace_secs = grace;
            }
            if let Some(delay) = video_delay_secs {
                config.align.video_delay_secs = delay;
            }
            commands::align::run(
                config.align,
                actions,
                camera_meta,
                output_video,
                output_metadata,
                comparison_video.zip(game_video),
            )
            .await
        }
        Commands::AlignBatch {
            manifest,
            jobs,
            video_delay_secs,
        } => {
            if let Some(delay) = video_delay_secs {
                config.align.video_delay_secs = delay;
            }
            commands::align_batch::run(config.align, manifest, jobs).await
        }
        Commands::Compare {
            left,
            right,
            output,
        } => commands::compare::run(config.align, left, right, output).await,
        Commands::Info { path } => commands::info::run(path),
        Commands::Check => commands::check::run(&config),
    }
}
