//! **warden-tools** – The execution core of Warden.
//!
//! Everything between a transport and an external binary lives here: the
//! target authorization policy, the argument sanitization gauntlet, the
//! optimizer, the per-tool concurrency gate, bounded subprocess execution
//! with staged termination, output truncation, and the concrete policies
//! for the five wrapped utilities.
//!
//! A tool is a [`ToolSpec`] descriptor plus an [`ExecutableTool`]
//! implementation; the [`ToolExecutor`] drives the shared pipeline and is
//! the only place a subprocess is ever spawned.

pub mod args;
mod base;
pub mod errors;
pub mod exec;
mod spec;
pub mod target;
pub mod tools;

pub use base::{ExecutableTool, ToolExecutor};
pub use errors::ToolError;
pub use spec::{ToolInfo, ToolSpec};
pub use target::ParsedTarget;
