//! Workspace boundaries: where a worker may run and where a resumed session
//! originally ran.

pub mod path_safety;
pub mod session_locator;

pub use path_safety::PathValidator;
pub use session_locator::{Recovery, SessionLocator, SessionRecord};
