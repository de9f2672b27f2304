#![forbid(unsafe_code)]

//! Isolated agent execution engine.
//!
//! Spawns an external coding-agent worker per request, streams its protocol
//! output back as [`ExecutionEvent`]s, and owns the worker's lifecycle:
//! idle and session timeouts, cooperative cancellation, graceful shutdown,
//! and resumption of sessions recorded in the worker's session store.

pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod policy;
pub mod worker;
pub mod workspace;

pub use config::EngineConfig;
pub use engine::Engine;
pub use errors::{AppError, Result};
pub use models::{ErrorKind, ExecutionEvent, ExecutionRequest, RawText, StopCheck};
pub use policy::ToolSettings;
