//! CLI binary for ga-balloons.
//!
//! A thin shim over the library crate: `serve` runs the HTTP API, `process`
//! runs one drawing through the engine in-process and prints the result.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ga_balloons::{
    BalloonEngine, EngineConfig, JobState, JobStatus, SessionId, UploadOutcome,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

static AFTER_HELP: &str = r#"EXAMPLES:
  # Serve the HTTP API on port 8000
  ga-balloons serve --addr 0.0.0.0:8000 --data-dir /var/lib/ga-balloons

  # Detect balloons in one drawing and print the result set
  ga-balloons process drawing.pdf > balloons.json

  # Where does FIND NUMBER 12 appear?
  ga-balloons process drawing.pdf --find 12

  # Ignore cached results and saved progress
  ga-balloons process drawing.pdf --fresh

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (auto-selects provider)
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Provider name (with EDGEQUAKE_MODEL)
  GA_BALLOONS_DATA_DIR    Storage root (cache, checkpoints, uploads, pages)
  RUST_LOG                Log filter, overrides --verbose
"#;

/// Detect balloon callouts on GA drawings with a vision model.
#[derive(Parser, Debug)]
#[command(
    name = "ga-balloons",
    version,
    about = "Resumable balloon detection for GA drawings",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging.
    #[arg(short, long, global = true, env = "GA_BALLOONS_VERBOSE")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        /// Listen address.
        #[arg(long, env = "GA_BALLOONS_ADDR", default_value = "127.0.0.1:8000")]
        addr: SocketAddr,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Process one drawing and print its balloons as JSON.
    Process {
        /// Path to the drawing PDF.
        input: PathBuf,

        /// Discard cached results and saved progress.
        #[arg(long)]
        fresh: bool,

        /// Print only the occurrences of this FIND NUMBER.
        #[arg(long)]
        find: Option<String>,

        /// Disable the progress bar.
        #[arg(long, env = "GA_BALLOONS_NO_PROGRESS")]
        no_progress: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Root directory for cache, checkpoints, uploads and page rasters.
    #[arg(long, env = "GA_BALLOONS_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Vision model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "GA_BALLOONS_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Largest accepted upload, in MiB.
    #[arg(long, env = "GA_BALLOONS_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// Cancel jobs running longer than this many minutes.
    #[arg(long, env = "GA_BALLOONS_MAX_RUN_MINUTES", default_value_t = 120)]
    max_run_minutes: u64,

    /// Keep finished job status for this many minutes.
    #[arg(long, env = "GA_BALLOONS_STATUS_RETENTION_MINUTES", default_value_t = 60)]
    status_retention_minutes: u64,

    /// Max retries per page on provider errors.
    #[arg(long, env = "GA_BALLOONS_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call API timeout in seconds.
    #[arg(long, env = "GA_BALLOONS_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

impl EngineArgs {
    fn to_config(&self) -> Result<EngineConfig> {
        let mut builder = EngineConfig::builder()
            .data_dir(&self.data_dir)
            .dpi(self.dpi)
            .max_upload_bytes(self.max_upload_mb.saturating_mul(1024 * 1024))
            .max_run_duration(Duration::from_secs(self.max_run_minutes * 60))
            .status_retention(Duration::from_secs(self.status_retention_minutes * 60))
            .max_retries(self.max_retries)
            .api_timeout_secs(self.api_timeout);
        if let Some(ref model) = self.model {
            builder = builder.model(model);
        }
        if let Some(ref provider) = self.provider {
            builder = builder.provider_name(provider);
        }
        builder.build().context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let quiet_for_bar = matches!(cli.command, Command::Process { no_progress: false, .. });
    let filter = if cli.verbose {
        "debug"
    } else if quiet_for_bar {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve { addr, engine } => serve(addr, engine).await,
        Command::Process {
            input,
            fresh,
            find,
            no_progress,
            engine,
        } => process(input, fresh, find, !no_progress, engine).await,
    }
}

async fn serve(addr: SocketAddr, args: EngineArgs) -> Result<()> {
    let engine = BalloonEngine::from_config(args.to_config()?)?;
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            signal.cancel();
        }
    });

    ga_balloons::server::serve(engine, addr, shutdown)
        .await
        .context("HTTP server failed")
}

async fn process(
    input: PathBuf,
    fresh: bool,
    find: Option<String>,
    show_progress: bool,
    args: EngineArgs,
) -> Result<()> {
    let bytes = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let engine = BalloonEngine::from_config(args.to_config()?)?;
    let session = SessionId::generate();

    let hash = match engine.upload(&bytes, &session, fresh).await? {
        UploadOutcome::Cached(summary) => {
            eprintln!(
                "{} cached result: {} balloons on {} pages",
                green("✓"),
                summary.detection_count,
                summary.page_count
            );
            summary.hash
        }
        UploadOutcome::Resumable(summary) => {
            eprintln!(
                "{} resuming after page {}/{}",
                cyan("◆"),
                summary.processed_pages,
                summary.total_pages
            );
            let job_id = engine.resume(&bytes, &session).await?;
            wait_for(&engine, job_id, show_progress).await?;
            summary.hash
        }
        UploadOutcome::Started { job_id, hash } => {
            wait_for(&engine, job_id, show_progress).await?;
            hash
        }
    };

    let json = match find {
        Some(number) => serde_json::to_string_pretty(&engine.find(&hash, &number).await?)?,
        None => serde_json::to_string_pretty(&engine.results(&hash).await?)?,
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{json}").context("Failed to write to stdout")?;
    Ok(())
}

/// Poll the job until it is terminal, mirroring progress on a bar.
/// Ctrl-C cancels the job; its checkpoint stays for a later resume.
async fn wait_for(engine: &BalloonEngine, job_id: Uuid, show_progress: bool) -> Result<JobStatus> {
    let bar = if show_progress {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Detecting");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut interrupted = false;
    let status = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                engine.cancel(job_id, None);
                bar.set_message("cancelling…");
            }
            _ = ticker.tick() => {
                let status = engine.status(job_id)?;
                bar.set_length(status.total_pages as u64);
                bar.set_position(status.processed_pages as u64);
                if !interrupted {
                    bar.set_message(status.message.clone());
                }
                if status.state.is_terminal() {
                    break status;
                }
            }
        }
    };

    match status.state {
        JobState::Complete => {
            bar.finish_and_clear();
            eprintln!(
                "{} {} balloons on {} pages {}",
                green("✓"),
                status.detections.unwrap_or(0),
                status.total_pages,
                dim(&format!("(job {job_id})"))
            );
            Ok(status)
        }
        JobState::Cancelled => {
            bar.abandon_with_message("cancelled");
            bail!(
                "{} {}; progress saved, run again to resume",
                red("✗"),
                status.message
            )
        }
        _ => {
            bar.abandon_with_message("failed");
            Err(anyhow!("{} {}", red("✗"), status.message))
        }
    }
}
