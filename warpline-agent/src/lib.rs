//! Agent execution: the LLM ↔ tool loop, batched tool dispatch with
//! caching, the Run lifecycle wrapper, runnable-as-tool nesting, and
//! resume / retry over the Step log.

mod agent;
mod config;
mod executor;
mod resume;
mod runnable_executor;
mod runnable_tool;
mod summarizer;
mod tooling;

pub use agent::{Agent, AgentBuilder, RESUME_KEY};
pub use config::AgentConfig;
pub use executor::{AgentExecutor, LoopOutcome, ToolCallAccumulator};
pub use resume::{analyze_steps, ExecutionState, ResumeExecutor};
pub use runnable_executor::RunnableExecutor;
pub use runnable_tool::{RunnableTool, DEFAULT_MAX_DEPTH};
pub use summarizer::{
    format_termination_reason, Summarizer, TerminationSummary, DEFAULT_TERMINATION_PROMPT,
};
pub use tooling::{parse_arguments, ToolExecutor, ToolResultCache};
