//! Everything that touches the worker process directly: the launch payload
//! it receives, the process itself, and the decoding of its stdout.

pub mod codec;
pub mod framer;
pub mod payload;
pub mod process;
pub mod protocol;
pub mod sanitize;
