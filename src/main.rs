//! Claude Relay - supervised Claude Code runs with coalesced progress relay.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_relay::config::{ConfigLoader, RelayConfig};
use claude_relay::dedupe::IdempotencyCache;
use claude_relay::relay::{
    markdown_to_text, split_message, HttpSink, LogSink, ProgressSink, RenderOptions,
    UpdateCoalescer, MAX_MESSAGE_CHARS,
};
use claude_relay::runner::{ClaudeRunner, RunRequest, RunnerConfig, DEFAULT_CHANNEL_BUFFER};

#[derive(Parser)]
#[command(
    name = "claude-relay",
    about = "Supervised Claude Code runs with coalesced progress relay",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file path (defaults to the standard search paths).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt through Claude Code with progress relay.
    Run {
        /// The prompt to execute.
        prompt: String,
        /// Conversation identity, checked against the allow list and the
        /// project mapping.
        #[arg(long)]
        project: Option<String>,
        /// Working directory (overrides the project mapping).
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Run timeout in seconds (overrides config).
        #[arg(long)]
        timeout: Option<u64>,
        /// Progress endpoint URL (overrides config).
        #[arg(long)]
        endpoint: Option<String>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<RelayConfig, ExitCode> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    loader.load().map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match cli.command {
        Commands::Run {
            prompt,
            project,
            dir,
            timeout,
            endpoint,
        } => run(config, prompt, project, dir, timeout, endpoint).await,
    }
}

#[allow(clippy::too_many_lines)]
async fn run(
    config: RelayConfig,
    prompt: String,
    project: Option<String>,
    dir: Option<PathBuf>,
    timeout: Option<u64>,
    endpoint: Option<String>,
) -> ExitCode {
    // Access gate: identity must be allowed and resolve to a directory.
    let working_dir = if let Some(identity) = &project {
        if !config.access.is_allowed(identity) {
            eprintln!("error: identity '{identity}' is not allowed to trigger runs");
            return ExitCode::FAILURE;
        }
        match dir.or_else(|| config.access.project_dir(identity).cloned()) {
            Some(dir) => dir,
            None => {
                eprintln!("error: no project directory mapped for '{identity}'");
                return ExitCode::FAILURE;
            }
        }
    } else {
        dir.unwrap_or_else(|| PathBuf::from("."))
    };

    let timeout = timeout
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| config.runner.timeout());

    let request = match RunRequest::new(prompt, working_dir, timeout) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Drop duplicate triggers before anything is spawned.
    let dedupe = IdempotencyCache::new(config.dedupe.window(), config.dedupe.ceiling);
    let trigger_key = format!(
        "{}:{}",
        project.as_deref().unwrap_or("cli"),
        request.prompt()
    );
    if !dedupe.admit(&trigger_key) {
        eprintln!("error: duplicate trigger dropped");
        return ExitCode::FAILURE;
    }

    let sink: Arc<dyn ProgressSink> = match endpoint.or_else(|| config.relay.endpoint.clone()) {
        Some(endpoint) => match HttpSink::new(&endpoint) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Arc::new(LogSink),
    };

    let (events_tx, events_rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
    let coalescer = UpdateCoalescer::new(Arc::clone(&sink))
        .with_cadence(config.relay.cadence())
        .with_render_options(RenderOptions {
            preview_chars: config.relay.preview_chars,
            max_body_chars: config.relay.max_body_chars,
        })
        .spawn(events_rx);

    let runner = ClaudeRunner::new(RunnerConfig {
        binary: config.runner.binary.clone(),
        grace: config.runner.grace(),
        heartbeat: config.runner.heartbeat(),
    });

    let result = runner.run(&request, &events_tx).await;
    drop(events_tx);
    if let Err(e) = coalescer.await {
        tracing::warn!(error = %e, "Coalescer task failed");
    }

    // Ship the final output as plain text, split to the channel limit.
    let text = markdown_to_text(&result.output);
    for part in split_message(&text, MAX_MESSAGE_CHARS) {
        if let Err(e) = sink.push(&part).await {
            tracing::warn!(error = %e, "Failed to push final output part");
        }
    }

    println!("{}", result.output);
    if result.success {
        ExitCode::SUCCESS
    } else {
        tracing::warn!(
            timed_out = result.timed_out,
            exit_code = ?result.exit_code,
            "Run did not succeed"
        );
        ExitCode::FAILURE
    }
}
