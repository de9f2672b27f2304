#![forbid(unsafe_code)]

//! `agent-runner`: run a coding-agent worker from the command line.
//!
//! Loads the engine configuration, executes one request, and prints every
//! execution event as a JSON line on stdout. Also exposes the session
//! locator and the transcript decoder for troubleshooting.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_runner::policy::ToolSettings;
use agent_runner::worker::protocol::parse_transcript;
use agent_runner::{AppError, Engine, EngineConfig, ExecutionEvent, ExecutionRequest, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-runner", about = "Isolated coding-agent execution engine", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json). Logs go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute one request and stream its events as NDJSON.
    Run {
        /// Prompt text.
        #[arg(long)]
        prompt: String,
        /// Working directory; must be under an allowed base directory.
        #[arg(long)]
        cwd: PathBuf,
        /// Model identifier passed to the worker.
        #[arg(long)]
        model: String,
        /// Optional system prompt.
        #[arg(long)]
        system_prompt: Option<String>,
        /// Session id to resume.
        #[arg(long)]
        resume: Option<String>,
        /// Tool override; repeat for several tools.
        #[arg(long = "allow-tool")]
        allow_tools: Vec<String>,
    },
    /// Print the working directory a session was created under.
    Locate {
        /// Session id to search for.
        session_id: String,
    },
    /// Decode a captured worker stdout transcript.
    Replay {
        /// Transcript file.
        path: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<ExitCode> {
    match args.command {
        Command::Run {
            prompt,
            cwd,
            model,
            system_prompt,
            resume,
            allow_tools,
        } => {
            let config = load_config(args.config.as_ref())?;
            let settings = ToolSettings::capture(&config.tools);
            let engine = Engine::new(config);

            let ct = CancellationToken::new();
            let signal_ct = ct.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("interrupt received, stopping execution");
                signal_ct.cancel();
            });

            let mut request = ExecutionRequest::new(prompt, cwd, model).with_stop_check(ct);
            if !allow_tools.is_empty() {
                request = request.with_allowed_tools(allow_tools);
            }
            if let Some(system_prompt) = system_prompt {
                request = request.with_system_prompt(system_prompt);
            }
            if let Some(session_id) = resume {
                request = request.resume(session_id);
            }

            let mut events = engine.execute(request, settings);
            let mut success = false;
            while let Some(event) = events.next().await {
                success = matches!(event, ExecutionEvent::Done { .. });
                print_event(&event)?;
            }
            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Locate { session_id } => {
            let config = load_config(args.config.as_ref())?;
            let engine = Engine::new(config);
            match engine.locator().locate(&session_id) {
                Some(record) => {
                    println!("{}", record.working_dir.display());
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    warn!(session_id, "session not found");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Replay { path } => {
            let raw = std::fs::read(&path)
                .map_err(|err| AppError::Io(format!("cannot read {}: {err}", path.display())))?;
            let raw = String::from_utf8_lossy(&raw);
            for event in parse_transcript(&raw, None) {
                print_event(&event)?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let path = path.ok_or_else(|| AppError::Config("--config is required".into()))?;
    let config = EngineConfig::load_from_path(path)?;
    info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn print_event(event: &ExecutionEvent) -> Result<()> {
    let line = serde_json::to_string(event)
        .map_err(|err| AppError::Protocol(format!("cannot serialize event: {err}")))?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
