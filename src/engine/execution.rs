//! One execution's state machine.
//!
//! ```text
//! Created ──launch──▶ Streaming ──EOF/exit──────────▶ Finished (Done | Error)
//!    │                   │ ├─deadline──▶ shutdown ──▶ Finished (Error)
//!    │                   │ └─stop check▶ shutdown ──▶ Finished (Error)
//!    └─setup failure─────┴──────────────────────────▶ Finished (Error)
//! ```
//!
//! Each call to [`Execution::next_event`] drives the loop until exactly one
//! event is available. The worker handle lives inside the `Streaming` phase
//! and is dropped on every path into `Finished`.
//!
//! Records seen before any start marker are held back: if a start marker
//! shows up later they were noise and are discarded, otherwise they are
//! replayed as legacy output once stdout closes.

use std::collections::VecDeque;
use std::process::ExitStatus;
use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn, Span};

use crate::config::EngineConfig;
use crate::engine::deadlines::{Deadlines, Expired};
use crate::models::{ErrorKind, ExecutionEvent, ExecutionRequest};
use crate::policy::{self, ToolSettings};
use crate::worker::framer::{FrameScanner, FrameState, LineClass};
use crate::worker::payload::{self, LaunchInput, Markers};
use crate::worker::process::{spawn_worker, SpawnSpec, WorkerHandle};
use crate::worker::protocol::{parse_line, WorkerRecord};
use crate::worker::sanitize::sanitize;
use crate::workspace::{PathValidator, SessionLocator};

enum Phase {
    Created,
    Streaming(Box<Streaming>),
    Finished,
}

struct Streaming {
    worker: WorkerHandle,
    scanner: FrameScanner,
    deadlines: Deadlines,
    session_id: Option<String>,
    emitted_any: bool,
    done: Option<(Option<String>, Value)>,
    legacy: VecDeque<WorkerRecord>,
    stdout_closed: bool,
}

enum Step {
    Emit(ExecutionEvent),
    Finish(ExecutionEvent),
    Continue,
}

enum Abort {
    Timeout(Expired),
    Stopped,
}

pub(crate) struct Execution {
    id: String,
    span: Span,
    config: Arc<EngineConfig>,
    validator: PathValidator,
    locator: SessionLocator,
    settings: ToolSettings,
    request: ExecutionRequest,
    phase: Phase,
}

impl Execution {
    pub(crate) fn new(
        id: String,
        span: Span,
        config: Arc<EngineConfig>,
        validator: PathValidator,
        locator: SessionLocator,
        settings: ToolSettings,
        request: ExecutionRequest,
    ) -> Self {
        Self {
            id,
            span,
            config,
            validator,
            locator,
            settings,
            request,
            phase: Phase::Created,
        }
    }

    pub(crate) fn span(&self) -> Span {
        self.span.clone()
    }

    /// Produce the next event, or `None` once the terminal event was yielded.
    pub(crate) async fn next_event(&mut self) -> Option<ExecutionEvent> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Created => match self.launch() {
                    Ok(streaming) => self.phase = Phase::Streaming(Box::new(streaming)),
                    Err(event) => {
                        warn!(?event, "execution failed before spawn");
                        return Some(event);
                    }
                },
                Phase::Streaming(mut streaming) => match self.step(&mut streaming).await {
                    Step::Emit(event) => {
                        self.phase = Phase::Streaming(streaming);
                        return Some(event);
                    }
                    Step::Continue => self.phase = Phase::Streaming(streaming),
                    Step::Finish(event) => {
                        info!(
                            elapsed = ?streaming.deadlines.elapsed(Instant::now()),
                            success = matches!(event, ExecutionEvent::Done { .. }),
                            "execution finished"
                        );
                        return Some(event);
                    }
                },
                Phase::Finished => return None,
            }
        }
    }

    /// Prepare the launch parameters and spawn the worker.
    fn launch(&mut self) -> Result<Streaming, ExecutionEvent> {
        let mut working_dir = self.request.working_dir.clone();
        if let Some(session_id) = self.request.session_id.as_deref() {
            match self.locator.locate(session_id) {
                Some(record) if record.working_dir.is_dir() => {
                    info!(
                        session_id,
                        requested = %working_dir.display(),
                        recovered = %record.working_dir.display(),
                        recovery = ?record.recovery,
                        "resuming in recovered working directory"
                    );
                    working_dir = record.working_dir;
                }
                Some(record) => warn!(
                    session_id,
                    recovered = %record.working_dir.display(),
                    "recovered working directory does not exist, keeping requested directory"
                ),
                None => debug!(session_id, "resume target not in session store"),
            }
        }

        let working_dir = self
            .validator
            .validate(&working_dir)
            .map_err(|err| ExecutionEvent::error(ErrorKind::Configuration, err.to_string()))?;

        let tools = policy::resolve(self.request.allowed_tools.as_deref(), &self.settings);
        let prompt = sanitize("prompt", &self.request.prompt);
        let system_prompt = self
            .request
            .system_prompt
            .as_ref()
            .map(|raw| sanitize("system_prompt", raw));

        let input = LaunchInput {
            prompt: &prompt.text,
            system_prompt: system_prompt.as_ref().map(|s| s.text.as_str()),
            model: &self.request.model,
            working_dir: &working_dir,
            tools: &tools,
            resume: self.request.session_id.as_deref(),
        };
        let payload = payload::build(&input, Markers::generate())
            .map_err(|err| ExecutionEvent::error(ErrorKind::Encoding, err.to_string()))?;

        let worker_config = &self.config.worker;
        let spec = SpawnSpec {
            program: &worker_config.program,
            args: &worker_config.args,
            working_dir: &working_dir,
            env_passthrough: &worker_config.env_passthrough,
            max_line_bytes: self.config.limits.max_line_bytes,
            stderr_tail_bytes: self.config.limits.stderr_tail_bytes,
        };
        let worker = spawn_worker(&spec, &payload)
            .map_err(|err| ExecutionEvent::error(ErrorKind::Spawn, err.to_string()))?;

        let timeouts = &self.config.timeouts;
        Ok(Streaming {
            worker,
            scanner: FrameScanner::new(payload.markers),
            deadlines: Deadlines::start(
                Instant::now(),
                timeouts.session_timeout(),
                timeouts.message_timeout(),
            ),
            session_id: None,
            emitted_any: false,
            done: None,
            legacy: VecDeque::new(),
            stdout_closed: false,
        })
    }

    /// One read-loop iteration.
    async fn step(&mut self, s: &mut Streaming) -> Step {
        let now = Instant::now();
        if let Some(expired) = s.deadlines.expired(now) {
            return self.abort(s, Abort::Timeout(expired)).await;
        }
        if self.request.stop_check.should_stop() {
            return self.abort(s, Abort::Stopped).await;
        }

        if s.stdout_closed {
            return match s.legacy.pop_front() {
                Some(record) => self.on_record(s, record).await,
                None => self.finish_at_eof(s).await,
            };
        }

        let wait = s
            .deadlines
            .remaining(now)
            .min(self.config.timeouts.poll_interval());
        let line = match tokio::time::timeout(wait, s.worker.next_line()).await {
            Err(_) => return Step::Continue,
            Ok(None) => {
                s.stdout_closed = true;
                return Step::Continue;
            }
            Ok(Some(Err(err))) => {
                warn!(%err, "worker stdout read failed, treating as end of output");
                s.stdout_closed = true;
                return Step::Continue;
            }
            Ok(Some(Ok(line))) => line,
        };
        s.deadlines.touch(Instant::now());

        let was_unframed = s.scanner.state() == FrameState::Unframed;
        let class = s.scanner.feed(&line);
        if was_unframed && s.scanner.state() != FrameState::Unframed && !s.legacy.is_empty() {
            debug!(
                discarded = s.legacy.len(),
                "start marker seen, dropping earlier unframed records as noise"
            );
            s.legacy.clear();
        }

        let fragment = match class {
            LineClass::Marker => return Step::Continue,
            LineClass::Noise(text) => {
                debug!(line = text, "worker output after protocol region");
                return Step::Continue;
            }
            LineClass::Legacy(text) => {
                if let Some(record) = parse_line(text) {
                    s.legacy.push_back(record);
                }
                return Step::Continue;
            }
            LineClass::Protocol(text) => text,
        };
        match parse_line(fragment) {
            Some(record) => self.on_record(s, record).await,
            None => Step::Continue,
        }
    }

    async fn on_record(&mut self, s: &mut Streaming, record: WorkerRecord) -> Step {
        match record {
            WorkerRecord::Init { session_id } => {
                if s.emitted_any {
                    debug!(session_id, "dropping init record that is not first");
                    s.session_id.get_or_insert(session_id);
                    return Step::Continue;
                }
                s.emitted_any = true;
                s.session_id = Some(session_id.clone());
                Step::Emit(ExecutionEvent::Init { session_id })
            }
            WorkerRecord::Text { content } => {
                s.emitted_any = true;
                Step::Emit(ExecutionEvent::Text { content })
            }
            WorkerRecord::Tool { descriptor } => {
                s.emitted_any = true;
                Step::Emit(ExecutionEvent::ToolUse { descriptor })
            }
            WorkerRecord::Done { session_id, stats } => {
                if s.done.is_none() {
                    s.done = Some((session_id, stats));
                }
                Step::Continue
            }
            WorkerRecord::Error { message } => {
                warn!(%message, "worker reported an error");
                let outcome = s
                    .worker
                    .shutdown(self.config.timeouts.grace_period())
                    .await;
                debug!(?outcome, "worker shut down after error record");
                Step::Finish(ExecutionEvent::error(ErrorKind::WorkerProtocol, message))
            }
        }
    }

    /// Stdout closed and held-back records replayed: collect the exit status
    /// while the clocks and stop check keep running, then pick the terminal
    /// event.
    async fn finish_at_eof(&mut self, s: &mut Streaming) -> Step {
        let status = loop {
            let now = Instant::now();
            if let Some(expired) = s.deadlines.expired(now) {
                return self.abort(s, Abort::Timeout(expired)).await;
            }
            if self.request.stop_check.should_stop() {
                return self.abort(s, Abort::Stopped).await;
            }

            let wait = s
                .deadlines
                .remaining(now)
                .min(self.config.timeouts.poll_interval());
            match tokio::time::timeout(wait, s.worker.wait_exit()).await {
                Err(_) => {}
                Ok(Ok(status)) => break status,
                Ok(Err(err)) => {
                    return Step::Finish(ExecutionEvent::error(
                        ErrorKind::WorkerProtocol,
                        format!("failed to collect worker exit status: {err}"),
                    ));
                }
            }
        };

        let stderr = s.worker.stderr_tail().await;
        if !status.success() {
            let summary = format!("worker {}", describe_exit(status));
            return Step::Finish(ExecutionEvent::error(
                ErrorKind::WorkerProtocol,
                with_stderr(&summary, &stderr),
            ));
        }

        match s.done.take() {
            Some((session_id, stats)) => Step::Finish(ExecutionEvent::Done {
                session_id: session_id.or_else(|| s.session_id.clone()),
                stats,
            }),
            None => Step::Finish(ExecutionEvent::error(
                ErrorKind::WorkerProtocol,
                with_stderr("worker exited without a done record", &stderr),
            )),
        }
    }

    /// Timeout or stop: shut the worker down, run the cleanup hook, and
    /// report why.
    async fn abort(&mut self, s: &mut Streaming, reason: Abort) -> Step {
        let (kind, message) = match reason {
            Abort::Timeout(Expired::Session) => (
                ErrorKind::Timeout,
                format!(
                    "execution exceeded the session timeout of {}s",
                    s.deadlines.session_timeout().as_secs()
                ),
            ),
            Abort::Timeout(Expired::Idle) => (
                ErrorKind::Timeout,
                format!(
                    "worker produced no output for {}s",
                    s.deadlines.message_timeout().as_secs()
                ),
            ),
            Abort::Stopped => (ErrorKind::Cancelled, "execution stopped by caller".to_owned()),
        };
        warn!(?kind, %message, pid = s.worker.pid(), "aborting execution");

        let outcome = s
            .worker
            .shutdown(self.config.timeouts.grace_period())
            .await;
        debug!(?outcome, "worker shut down");

        if let Some(hook) = self.request.cleanup.take() {
            hook.run(&self.id);
        }

        Step::Finish(ExecutionEvent::error(kind, message))
    }
}

fn describe_exit(status: ExitStatus) -> String {
    status.code().map_or_else(
        || "was terminated by a signal".to_owned(),
        |code| format!("exited with code {code}"),
    )
}

fn with_stderr(summary: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        summary.to_owned()
    } else {
        format!("{summary}: {stderr}")
    }
}
