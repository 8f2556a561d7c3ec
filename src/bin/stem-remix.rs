use std::{
    fs,
    path::{Path, PathBuf},
    process,
};

use anyhow::{anyhow, Context};
use clap::{ArgGroup, Parser, Subcommand};
use stem_remix_core::{
    DemucsSeparator, Direction, FfmpegEncoder, ProgressEvent, RemixConfig, RemixPipeline, Stage,
    Stem,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stem-remix")]
#[command(about = "Boost or reduce one stem of a track", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to $STEM_REMIX_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remix one track
    #[command(group(ArgGroup::new("direction").required(true).args(["boost", "reduce"])))]
    Remix {
        /// Title (optionally `Artist - Title`), file path, or URL
        #[arg(short, long)]
        track: String,

        /// bass, drums, vocals or other
        #[arg(short, long)]
        stem: String,

        #[arg(long)]
        boost: bool,

        #[arg(long)]
        reduce: bool,

        /// Gain in dB (default from config); a negative value inverts the direction
        #[arg(short, long, allow_negative_numbers = true)]
        gain: Option<f32>,

        /// Where to write the result
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Print progress as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Check that demucs and ffmpeg can be launched
    Check,

    /// Print the effective configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Remix {
            track,
            stem,
            boost,
            reduce: _,
            gain,
            out,
            json,
        } => {
            let direction = if boost {
                Direction::Boost
            } else {
                Direction::Reduce
            };
            handle_remix(cli.config.as_deref(), track, stem, direction, gain, out, json)
        }
        Commands::Check => handle_check(cli.config.as_deref()),
        Commands::Config => handle_config(cli.config.as_deref()),
    };

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn handle_remix(
    config: Option<&Path>,
    track: String,
    stem: String,
    direction: Direction,
    gain: Option<f32>,
    out: PathBuf,
    json: bool,
) -> anyhow::Result<()> {
    let config = RemixConfig::load(config)?;
    let stem: Stem = stem.parse()?;

    let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
    runtime.block_on(run_remix(config, track, stem, direction, gain, out, json))
}

async fn run_remix(
    config: RemixConfig,
    track: String,
    stem: Stem,
    direction: Direction,
    gain: Option<f32>,
    out: PathBuf,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = RemixPipeline::from_config(config)?;
    let request = pipeline.request(track, stem, direction, gain)?;
    let handle = pipeline.submit(request);
    info!("Run {} submitted", handle.run_id());

    let outcome = handle.wait(|event| print_progress(&event, json)).await;

    match outcome {
        Ok(artifact) => {
            fs::create_dir_all(&out).with_context(|| format!("creating {}", out.display()))?;
            let dest = out.join(&artifact.filename);
            fs::write(&dest, &artifact.bytes)
                .with_context(|| format!("writing {}", dest.display()))?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "file": dest,
                        "size_bytes": artifact.size_bytes,
                        "bitrate_kbps": artifact.bitrate_kbps,
                    })
                );
            } else {
                eprintln!(
                    "✅ {} ({:.1} MB at {} kbps)",
                    dest.display(),
                    artifact.size_bytes as f64 / 1_000_000.0,
                    artifact.bitrate_kbps
                );
            }
            Ok(())
        }
        Err(failure) => {
            if json {
                println!("{}", serde_json::to_string(&failure)?);
            }
            Err(anyhow!(failure))
        }
    }
}

fn print_progress(event: &ProgressEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    let icon = match event.stage {
        Stage::Queued => "🕒",
        Stage::Downloading => "📥",
        Stage::Separating => "🧠",
        Stage::Mixing => "🎚️",
        Stage::Encoding => "💾",
        Stage::Delivering => "📤",
        Stage::Done => "✅",
        Stage::Failed => "❌",
    };
    eprintln!("{icon} {}", event.message);
}

fn handle_check(config: Option<&Path>) -> anyhow::Result<()> {
    let config = RemixConfig::load(config)?;
    let mut ok = true;

    match DemucsSeparator::from_config(&config).probe() {
        Ok(line) => eprintln!("  • demucs: {line}"),
        Err(e) => {
            ok = false;
            eprintln!("  • demucs: {e}");
        }
    }
    match FfmpegEncoder::from_config(&config).probe() {
        Ok(line) => eprintln!("  • ffmpeg: {line}"),
        Err(e) => {
            ok = false;
            eprintln!("  • ffmpeg: {e}");
        }
    }

    if ok {
        Ok(())
    } else {
        Err(anyhow!("remix engines are not available"))
    }
}

fn handle_config(config: Option<&Path>) -> anyhow::Result<()> {
    let config = RemixConfig::load(config)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
