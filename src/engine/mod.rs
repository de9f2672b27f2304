//! Execution engine: one worker process per request, streamed back as
//! [`ExecutionEvent`]s.
//!
//! The engine itself holds only immutable state (configuration, path
//! allow-list, session store layout), so any number of executions can run
//! concurrently from one `Engine`. Everything mutable belongs to the
//! individual execution.

pub mod deadlines;
mod execution;

use std::sync::Arc;

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{ExecutionEvent, ExecutionRequest};
use crate::policy::ToolSettings;
use crate::workspace::{PathValidator, SessionLocator};

use self::execution::Execution;

/// Spawns workers and streams their events.
#[derive(Debug, Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    validator: PathValidator,
    locator: SessionLocator,
}

impl Engine {
    /// Build an engine from validated configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let validator = PathValidator::new(config.allowed_base_dirs.iter().cloned());
        let locator = SessionLocator::new(&config.sessions, validator.bases());
        Self {
            config: Arc::new(config),
            validator,
            locator,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Working-directory allow-list.
    #[must_use]
    pub fn validator(&self) -> &PathValidator {
        &self.validator
    }

    /// Session store scanner.
    #[must_use]
    pub fn locator(&self) -> &SessionLocator {
        &self.locator
    }

    /// Run `request` and stream its events.
    ///
    /// Nothing happens until the stream is first polled. The stream yields at
    /// most one [`ExecutionEvent::Init`] first and always ends with exactly
    /// one [`ExecutionEvent::Done`] or [`ExecutionEvent::Error`]; no failure
    /// escapes as anything other than an `Error` event. Dropping the stream
    /// early kills the worker.
    ///
    /// `settings` is the tool configuration snapshot this execution resolves
    /// its tool policy from.
    pub fn execute(
        &self,
        request: ExecutionRequest,
        settings: ToolSettings,
    ) -> BoxStream<'static, ExecutionEvent> {
        let id = Uuid::new_v4().to_string();
        let span = info_span!(
            "execute",
            execution_id = %id,
            model = %request.model,
            resume = request.session_id.as_deref(),
        );
        let execution = Execution::new(
            id,
            span,
            Arc::clone(&self.config),
            self.validator.clone(),
            self.locator.clone(),
            settings,
            request,
        );

        stream::unfold(execution, |mut execution| async move {
            let span = execution.span();
            let event = execution.next_event().instrument(span).await?;
            Some((event, execution))
        })
        .boxed()
    }
}
