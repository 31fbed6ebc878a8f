use std::time::Duration;

/// Knobs for one agent's execution loop.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Upper bound on loop iterations (LLM turns plus pending-tool turns).
    pub max_steps: usize,
    /// When the loop ends abnormally, run one tools-disabled summary turn so
    /// the caller gets a usable partial answer.
    pub enable_termination_summary: bool,
    /// Override for the summary request; `{reason}` is substituted.
    pub termination_summary_prompt: Option<String>,
    /// Default per-call tool limit; individual tools may declare their own.
    pub tool_timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            enable_termination_summary: false,
            termination_summary_prompt: None,
            tool_timeout: Some(Duration::from_secs(60)),
        }
    }
}
