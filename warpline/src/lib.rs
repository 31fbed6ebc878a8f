//! Warpline - streaming agent orchestration.
//!
//! Agents and workflows share one Runnable contract, stream fine-grained
//! events through a single Wire, and persist every conversation turn as a
//! Step with a session-monotonic sequence. This facade re-exports the
//! member crates and ships the top-level streaming entry plus SSE framing.

pub use warpline_core::*;

#[cfg(feature = "llm")]
pub use warpline_llm as llm;

#[cfg(feature = "agent")]
pub use warpline_agent as agent;

#[cfg(feature = "workflow")]
pub use warpline_workflow as workflow;

#[cfg(feature = "session")]
pub use warpline_session as session;

#[cfg(feature = "trace")]
pub use warpline_trace as trace;

pub mod sse;

#[cfg(feature = "agent")]
mod engine;

#[cfg(feature = "agent")]
pub use engine::{run_streaming, StreamingRun};
