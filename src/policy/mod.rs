//! Tool permission policy.
//!
//! Decides which tools a worker may use for a single execution, from an
//! explicit override, environment settings, the config file, and a built-in
//! default.

pub mod resolver;

pub use resolver::{resolve, ToolPolicy, ToolSettings};
