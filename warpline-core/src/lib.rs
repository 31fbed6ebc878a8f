//! Core contracts and data model for the warpline runtime: the Wire event
//! channel, the Step conversation log, execution contexts, the Runnable and
//! Tool traits, and the persistence interface everything else builds on.

mod adapter;
mod context;
mod control;
mod conversation;
mod error;
mod event;
mod event_factory;
mod persistence;
mod registry;
mod runnable;
mod step;
mod tool;
mod wire;

pub use adapter::{ChatMessage, StepAdapter, StepIdentity};
pub use context::{ExecutionContext, NestingType, RUNNABLE_PATH_KEY};
pub use control::{effective_timeout, AbortSignal};
pub use conversation::Conversation;
pub use error::WarplineError;
pub use event::{StepDelta, StepEvent, StepEventType};
pub use event_factory::EventFactory;
pub use persistence::{RunQuery, SessionStore, StepQuery};
pub use registry::RunnableRegistry;
pub use runnable::{Run, RunMetrics, RunOutput, RunStatus, Runnable, TerminationReason};
pub use step::{
    FunctionCall, FunctionFragment, Role, RunnableType, Step, StepMetrics, ToolCallData,
    ToolCallFragment,
};
pub use tool::{Tool, ToolError, ToolResult, ToolSpec};
pub use wire::Wire;

pub type Value = serde_json::Value;
