//! Domain model module declarations.

pub mod event;
pub mod request;

pub use event::{ErrorKind, ExecutionEvent};
pub use request::{CleanupHook, ExecutionRequest, RawText, StopCheck};
