//! Termination summary: when a loop ends abnormally (step cap, timeout,
//! abort), one tools-disabled model turn produces a usable partial answer
//! instead of an empty failure.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info};

use warpline_core::{
    Conversation, EventFactory, ExecutionContext, Step, StepMetrics, TerminationReason,
    ToolCallData, WarplineError,
};
use warpline_llm::{ModelClient, TokenUsage};
use warpline_session::{SequenceManager, StepRepository};

use crate::executor::bind_step;

pub const DEFAULT_TERMINATION_PROMPT: &str = "Execution stopped early ({reason}). Summarize what \
was accomplished so far and give the best possible answer to the original request based on the \
work completed.";

pub fn format_termination_reason(reason: TerminationReason) -> &'static str {
    match reason {
        TerminationReason::MaxSteps => "the step limit was reached",
        TerminationReason::Timeout => "the time limit was reached",
        TerminationReason::Cancelled => "the run was cancelled",
        TerminationReason::Error => "an error occurred",
        TerminationReason::Normal => "the run completed",
    }
}

pub struct TerminationSummary {
    pub summary: String,
    pub usage: TokenUsage,
}

pub struct Summarizer<'a> {
    pub model: &'a Arc<dyn ModelClient>,
    pub sequences: &'a SequenceManager,
    pub prompt_template: Option<&'a str>,
}

impl Summarizer<'_> {
    /// Append placeholder results for unexecuted tool calls, a summary
    /// request, and a final tools-disabled assistant turn. Every Step is
    /// committed and emitted like any other.
    pub async fn generate(
        &self,
        conversation: &mut Conversation,
        ctx: &ExecutionContext,
        repo: &mut StepRepository,
        ef: &EventFactory,
        pending_tool_calls: Option<&[ToolCallData]>,
        reason: TerminationReason,
    ) -> Result<TerminationSummary, WarplineError> {
        let reason_text = format_termination_reason(reason);

        // The conversation must stay well-formed: one tool message per
        // outstanding call before any further assistant turn.
        for call in pending_tool_calls.unwrap_or_default() {
            let sequence = self.sequences.allocate(&ctx.session_id, Some(ctx)).await?;
            let mut step = Step::tool_result(
                &ctx.session_id,
                &ctx.run_id,
                sequence,
                &call.id,
                &call.function.name,
                format!("[Execution interrupted: {reason_text}. This tool call was not executed.]"),
            );
            bind_step(&mut step, ctx);
            repo.save(&step).await?;
            conversation.append_tool_result(&step);
            ctx.wire.write(ef.step_completed(step)).await;
        }

        let prompt = self
            .prompt_template
            .unwrap_or(DEFAULT_TERMINATION_PROMPT)
            .replace("{reason}", reason_text);
        let sequence = self.sequences.allocate(&ctx.session_id, Some(ctx)).await?;
        let mut user_step = Step::user(&ctx.session_id, &ctx.run_id, sequence, &prompt);
        bind_step(&mut user_step, ctx);
        repo.save(&user_step).await?;
        conversation.push_user(&prompt);
        ctx.wire.write(ef.step_completed(user_step)).await;

        let (summary, usage) = match self.collect_summary(conversation).await {
            Ok(collected) => collected,
            Err(err) => {
                error!(%err, "termination summary generation failed");
                (
                    format!(
                        "Execution was interrupted because {reason_text}. \
                         A detailed summary could not be generated: {err}"
                    ),
                    TokenUsage::default(),
                )
            }
        };

        let sequence = self.sequences.allocate(&ctx.session_id, Some(ctx)).await?;
        let mut assistant_step = Step::assistant(&ctx.session_id, &ctx.run_id, sequence);
        bind_step(&mut assistant_step, ctx);
        assistant_step.content = Some(summary.clone());
        if usage.total_tokens > 0 {
            assistant_step.metrics = Some(StepMetrics {
                input_tokens: Some(usage.input_tokens),
                output_tokens: Some(usage.output_tokens),
                total_tokens: Some(usage.total_tokens),
                model_name: Some(self.model.model_name().to_string()),
                provider: Some(self.model.provider().to_string()),
                ..StepMetrics::default()
            });
        }
        repo.save(&assistant_step).await?;
        conversation.append_assistant(&assistant_step);
        ctx.wire.write(ef.step_completed(assistant_step)).await;

        info!(reason = %reason, len = summary.len(), "termination summary generated");
        Ok(TerminationSummary { summary, usage })
    }

    async fn collect_summary(
        &self,
        conversation: &Conversation,
    ) -> Result<(String, TokenUsage), WarplineError> {
        let mut summary = String::new();
        let mut usage = TokenUsage::default();
        // Tools stay disabled: this turn must answer, not keep working.
        let mut stream = self.model.stream(conversation.to_messages(), None);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(text) = chunk.content {
                summary.push_str(&text);
            }
            if let Some(chunk_usage) = chunk.usage {
                usage = chunk_usage;
            }
        }
        if summary.is_empty() {
            return Err(WarplineError::provider("summary model returned no content"));
        }
        Ok((summary, usage))
    }
}
