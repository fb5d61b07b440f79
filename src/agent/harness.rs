//! The step loop: a bounded reason/act state machine.
//!
//! One [`StepLoop`] owns one conversation. Each cycle assembles the context
//! under the configured ceilings, invokes the model once (Reason), executes
//! whatever tool calls come back (Act), appends the results, and decrements
//! the step budget. The loop ends in exactly one of three ways:
//!
//! - `Done` — the model filed its report through the final-answer tool,
//!   declined to act (under the default policy), or the conversation outgrew
//!   the context window (`Done` with an error payload — the partial
//!   transcript is still worth returning);
//! - `Exhausted` — the step budget hit zero first;
//! - `Failed` — a non-transient model failure or a protocol violation.
//!
//! Steps are consumed by completed reason/act cycles only. A model call that
//! fails outright consumes nothing; timeouts are retried with backoff before
//! they count as failure.

use crate::agent::config::{LoopConfig, NoActionPolicy};
use crate::agent::dispatch::dispatch_step;
use crate::agent::events::{EventHandler, LoopEvent, NoopHandler};
use crate::agent::state::{ConversationState, InvocationResult, Outcome, UsageMeter};
use crate::api::client::{LlmError, ModelClient};
use crate::api::retry::invoke_with_retry;
use crate::context::assembler::ContextAssembler;
use crate::memory::RecallStore;
use crate::tools::core::{ToolKind, ToolSet};
use crate::{ChatCompletion, ChatRequest, Message, MessageRole, ToolCall};
use std::sync::Arc;
use tracing::{info, warn};

/// Appended to the preamble once the soft deadline is reached.
pub const SOFT_DEADLINE_WARNING: &str = "WARNING: You are not allowed to reason anymore. \
Provide the final report based on the available information.";

static NOOP_HANDLER: NoopHandler = NoopHandler;

/// What the model's response amounts to, decided once per step and routed
/// by a single match.
#[derive(Debug)]
enum ModelAction {
    /// Text (possibly empty) and no tool calls.
    NoAction { text: Option<String> },
    /// Ordinary tool calls.
    ToolCalls(Vec<ToolCall>),
    /// At least one call targets the final-answer tool.
    FinalAnswer(Vec<ToolCall>),
}

fn classify(completion: &ChatCompletion, tools: &ToolSet) -> ModelAction {
    if completion.tool_calls.is_empty() {
        return ModelAction::NoAction {
            text: completion
                .content
                .clone()
                .filter(|t| !t.trim().is_empty()),
        };
    }
    let has_final = completion
        .tool_calls
        .iter()
        .any(|c| tools.kind_of(&c.function.name) == Some(ToolKind::FinalAnswer));
    if has_final {
        ModelAction::FinalAnswer(completion.tool_calls.clone())
    } else {
        ModelAction::ToolCalls(completion.tool_calls.clone())
    }
}

/// The bounded reason/act loop.
pub struct StepLoop<'a> {
    client: &'a dyn ModelClient,
    tools: &'a ToolSet,
    store: &'a dyn RecallStore,
    config: LoopConfig,
    event_handler: &'a dyn EventHandler,
    meter: Arc<UsageMeter>,
}

impl<'a> StepLoop<'a> {
    pub fn new(
        client: &'a dyn ModelClient,
        tools: &'a ToolSet,
        store: &'a dyn RecallStore,
        config: LoopConfig,
    ) -> Self {
        Self {
            client,
            tools,
            store,
            config,
            event_handler: &NOOP_HANDLER,
            meter: Arc::new(UsageMeter::new()),
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Share a usage meter with this loop. A sub-invocation passes the
    /// parent's meter here so child tokens roll up without double counting.
    pub fn with_usage_meter(mut self, meter: Arc<UsageMeter>) -> Self {
        self.meter = meter;
        self
    }

    pub fn usage_meter(&self) -> Arc<UsageMeter> {
        self.meter.clone()
    }

    /// Run the investigation for `task`.
    ///
    /// `pinned_summary` is a short artifact description kept in every call's
    /// preamble, charged against the history ceiling as fixed overhead.
    pub async fn run(&self, task: &str, pinned_summary: Option<&str>) -> InvocationResult {
        let assembler = ContextAssembler::new(
            self.store,
            &self.config.memory_collection,
            self.config.ceilings,
        );
        let mut state = ConversationState::new();
        state.push(Message::user(task));

        let (start_input, start_output) = self.meter.snapshot();
        let mut steps_remaining = self.config.max_steps;
        let mut steps_used: u32 = 0;
        let definitions = self.tools.definitions();

        loop {
            if steps_remaining == 0 {
                info!("Step budget exhausted after {steps_used} step(s)");
                return self.finish(
                    Outcome::Exhausted,
                    None,
                    None,
                    steps_used,
                    state,
                    (start_input, start_output),
                );
            }

            let step = self.config.max_steps - steps_remaining + 1;
            self.event_handler.on_event(&LoopEvent::StepStart {
                step,
                max_steps: self.config.max_steps,
            });

            let mut preamble = self.config.system_prompt.clone();
            if steps_remaining <= self.config.soft_deadline_steps {
                self.event_handler
                    .on_event(&LoopEvent::SoftDeadline { steps_remaining });
                preamble.push_str("\n\n");
                preamble.push_str(SOFT_DEADLINE_WARNING);
            }

            let messages = assembler
                .assemble(&preamble, pinned_summary, state.messages())
                .await;
            let request = ChatRequest {
                model: Some(self.config.model.clone()),
                messages,
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                tools: if definitions.is_empty() {
                    None
                } else {
                    Some(definitions.clone())
                },
                ..Default::default()
            };

            let completion = match invoke_with_retry(self.client, &request, &self.config.retry)
                .await
            {
                Ok(completion) => completion,
                Err(LlmError::ContextLengthExceeded(message)) => {
                    // Retrying cannot shrink the conversation. Finish with
                    // what we have.
                    warn!("Context window exceeded; finishing with partial results");
                    return self.finish(
                        Outcome::Done,
                        None,
                        Some(message),
                        steps_used,
                        state,
                        (start_input, start_output),
                    );
                }
                Err(error) => {
                    return self.finish(
                        Outcome::Failed,
                        None,
                        Some(error.to_string()),
                        steps_used,
                        state,
                        (start_input, start_output),
                    );
                }
            };

            if let Some(usage) = &completion.usage {
                let prompt = usage.prompt_tokens.unwrap_or(0);
                let generated = usage.completion_tokens.unwrap_or(0);
                self.meter.add(prompt as u64, generated as u64);
                self.event_handler.on_event(&LoopEvent::TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: generated,
                });
            }

            let content = completion.content.clone();
            match classify(&completion, self.tools) {
                ModelAction::NoAction { text } => {
                    if let Some(text) = &text {
                        self.event_handler.on_event(&LoopEvent::Text(text));
                        state.push(Message::assistant_text(text.clone()));
                    }
                    match self.config.no_action {
                        NoActionPolicy::Finish => {
                            return self.finish(
                                Outcome::Done,
                                None,
                                None,
                                steps_used,
                                state,
                                (start_input, start_output),
                            );
                        }
                        NoActionPolicy::Continue => {
                            steps_remaining -= 1;
                            steps_used += 1;
                        }
                    }
                }
                ModelAction::ToolCalls(calls) | ModelAction::FinalAnswer(calls) => {
                    self.event_handler.on_event(&LoopEvent::ToolCallsReceived {
                        step,
                        count: calls.len(),
                    });
                    if let Some(text) = content.as_deref().filter(|t| !t.trim().is_empty()) {
                        self.event_handler.on_event(&LoopEvent::Text(text));
                    }
                    state.push(Message {
                        role: MessageRole::Assistant,
                        content,
                        tool_calls: Some(calls.clone()),
                        tool_call_id: None,
                    });

                    let act = dispatch_step(
                        self.tools,
                        &calls,
                        &self.config.exclusions,
                        self.event_handler,
                    )
                    .await;

                    for message in act.results {
                        state.push(message);
                    }

                    if let Some(fatal) = act.fatal {
                        return self.finish(
                            Outcome::Failed,
                            None,
                            Some(fatal),
                            steps_used,
                            state,
                            (start_input, start_output),
                        );
                    }

                    steps_remaining -= 1;
                    steps_used += 1;

                    if let Some(answer) = act.final_answer {
                        return self.finish(
                            Outcome::Done,
                            Some(answer),
                            None,
                            steps_used,
                            state,
                            (start_input, start_output),
                        );
                    }
                }
            }
        }
    }

    fn finish(
        &self,
        outcome: Outcome,
        answer: Option<String>,
        error: Option<String>,
        steps_used: u32,
        state: ConversationState,
        start_usage: (u64, u64),
    ) -> InvocationResult {
        self.event_handler.on_event(&LoopEvent::Finished { outcome });
        let (input_now, output_now) = self.meter.snapshot();
        InvocationResult {
            outcome,
            answer,
            error,
            input_tokens: input_now - start_usage.0,
            output_tokens: output_now - start_usage.1,
            steps_used,
            transcript: state.into_messages(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::ClientFuture;
    use crate::api::retry::RetryConfig;
    use crate::memory::InMemoryRecallStore;
    use crate::tools::core::{Tool, ToolFuture};
    use crate::{ToolDef, UsageInfo};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum ScriptItem {
        Text(&'static str),
        Calls(Vec<ToolCall>),
        Overflow,
        ApiError,
    }

    struct ScriptedClient {
        script: Vec<ScriptItem>,
        cursor: AtomicUsize,
        /// System message of every request received, for assertions.
        system_prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<ScriptItem>) -> Self {
            Self {
                script,
                cursor: AtomicUsize::new(0),
                system_prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl ModelClient for ScriptedClient {
        fn invoke<'a>(&'a self, request: &'a ChatRequest) -> ClientFuture<'a> {
            let system = request
                .messages
                .first()
                .map(|m| m.text().to_string())
                .unwrap_or_default();
            self.system_prompts.lock().unwrap().push(system);

            let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let usage = Some(UsageInfo {
                    prompt_tokens: Some(100),
                    completion_tokens: Some(10),
                    total_tokens: Some(110),
                });
                match self.script.get(idx) {
                    Some(ScriptItem::Text(text)) => Ok(ChatCompletion {
                        content: Some((*text).to_string()),
                        usage,
                        ..Default::default()
                    }),
                    Some(ScriptItem::Calls(calls)) => Ok(ChatCompletion {
                        tool_calls: calls.clone(),
                        usage,
                        ..Default::default()
                    }),
                    Some(ScriptItem::Overflow) => {
                        Err(LlmError::ContextLengthExceeded("prompt too long".into()))
                    }
                    Some(ScriptItem::ApiError) => {
                        Err(LlmError::Api("OpenRouter API HTTP 401: unauthorized".into()))
                    }
                    // Script exhausted: keep requesting the same probe call.
                    None => Ok(ChatCompletion {
                        tool_calls: vec![ToolCall::new(format!("auto-{idx}"), "probe", "{}")],
                        usage,
                        ..Default::default()
                    }),
                }
            })
        }
    }

    struct StubTool {
        name: &'static str,
        kind: ToolKind,
    }

    impl Tool for StubTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new(self.name, "stub", serde_json::json!({"type": "object"}))
        }

        fn execute(&self, arguments: &str) -> ToolFuture<'_> {
            let arguments = arguments.to_string();
            let name = self.name;
            Box::pin(async move { Ok(format!("{name}:{arguments}")) })
        }

        fn kind(&self) -> ToolKind {
            self.kind
        }
    }

    fn toolset() -> ToolSet {
        ToolSet::new()
            .with_arg_validation(false)
            .with(StubTool {
                name: "probe",
                kind: ToolKind::Unlimited,
            })
            .with(StubTool {
                name: "file_report",
                kind: ToolKind::FinalAnswer,
            })
    }

    fn config() -> LoopConfig {
        LoopConfig::new("test-model").with_retry(RetryConfig::with_retries(0))
    }

    #[tokio::test]
    async fn final_report_terminates_done() {
        let client = ScriptedClient::new(vec![
            ScriptItem::Calls(vec![ToolCall::new("c1", "probe", "{}")]),
            ScriptItem::Calls(vec![ToolCall::new("c2", "file_report", r#"{"v":1}"#)]),
        ]);
        let tools = toolset();
        let store = InMemoryRecallStore::new();

        let result = StepLoop::new(&client, &tools, &store, config())
            .run("investigate", None)
            .await;

        assert_eq!(result.outcome, Outcome::Done);
        assert_eq!(result.answer.as_deref(), Some(r#"file_report:{"v":1}"#));
        assert_eq!(result.steps_used, 2);
        assert!(result.error.is_none());
        // user + (assistant + tool result) per step
        assert_eq!(result.transcript.len(), 5);
        assert_eq!(result.input_tokens, 200);
        assert_eq!(result.output_tokens, 20);
    }

    #[tokio::test]
    async fn step_budget_bounds_the_run() {
        // The scripted client asks for tools forever; the loop must stop.
        let client = ScriptedClient::new(vec![]);
        let tools = toolset();
        let store = InMemoryRecallStore::new();

        let result = StepLoop::new(&client, &tools, &store, config().with_max_steps(5))
            .run("investigate", None)
            .await;

        assert_eq!(result.outcome, Outcome::Exhausted);
        assert_eq!(result.steps_used, 5);
        assert!(result.answer.is_none());
        // Partial transcript is still returned.
        assert_eq!(result.transcript.len(), 1 + 5 * 2);
    }

    #[tokio::test]
    async fn single_step_budget_exhausts_after_one_cycle() {
        let client = ScriptedClient::new(vec![ScriptItem::Calls(vec![ToolCall::new(
            "c1", "probe", "{}",
        )])]);
        let tools = toolset();
        let store = InMemoryRecallStore::new();

        let result = StepLoop::new(&client, &tools, &store, config().with_max_steps(1))
            .run("investigate", None)
            .await;

        assert_eq!(result.outcome, Outcome::Exhausted);
        assert_eq!(result.steps_used, 1);
        let last = result.transcript.last().unwrap();
        assert_eq!(last.role, MessageRole::Tool);
    }

    #[tokio::test]
    async fn no_action_finishes_by_default() {
        let client = ScriptedClient::new(vec![ScriptItem::Text("nothing suspicious here")]);
        let tools = toolset();
        let store = InMemoryRecallStore::new();

        let result = StepLoop::new(&client, &tools, &store, config())
            .run("investigate", None)
            .await;

        assert_eq!(result.outcome, Outcome::Done);
        assert!(result.answer.is_none(), "reports only come through the tool");
        assert_eq!(result.steps_used, 0);
        assert_eq!(result.transcript.last().unwrap().text(), "nothing suspicious here");
    }

    #[tokio::test]
    async fn no_action_continue_consumes_steps() {
        let client = ScriptedClient::new(vec![
            ScriptItem::Text("thinking"),
            ScriptItem::Text("still thinking"),
        ]);
        let tools = toolset();
        let store = InMemoryRecallStore::new();

        let result = StepLoop::new(
            &client,
            &tools,
            &store,
            config()
                .with_max_steps(2)
                .with_no_action(NoActionPolicy::Continue),
        )
        .run("investigate", None)
        .await;

        assert_eq!(result.outcome, Outcome::Exhausted);
        assert_eq!(result.steps_used, 2);
    }

    #[tokio::test]
    async fn window_overflow_is_done_with_error_not_retried() {
        let client = ScriptedClient::new(vec![ScriptItem::Overflow]);
        let tools = toolset();
        let store = InMemoryRecallStore::new();

        let result = StepLoop::new(
            &client,
            &tools,
            &store,
            config().with_retry(RetryConfig::with_retries(5)),
        )
        .run("investigate", None)
        .await;

        assert_eq!(result.outcome, Outcome::Done);
        assert!(result.answer.is_none());
        assert!(result.error.as_deref().unwrap().contains("prompt too long"));
        assert_eq!(result.steps_used, 0, "no step is consumed");
        assert_eq!(client.cursor.load(Ordering::SeqCst), 1, "never retried");
    }

    #[tokio::test]
    async fn api_failure_is_failed_without_consuming_a_step() {
        let client = ScriptedClient::new(vec![ScriptItem::ApiError]);
        let tools = toolset();
        let store = InMemoryRecallStore::new();

        let result = StepLoop::new(&client, &tools, &store, config())
            .run("investigate", None)
            .await;

        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.steps_used, 0);
        assert!(result.error.as_deref().unwrap().contains("HTTP 401"));
        assert_eq!(result.transcript.len(), 1, "only the task message");
    }

    #[tokio::test]
    async fn duplicate_final_reports_fail_the_run() {
        let client = ScriptedClient::new(vec![ScriptItem::Calls(vec![
            ToolCall::new("c1", "file_report", "{}"),
            ToolCall::new("c2", "file_report", "{}"),
        ])]);
        let tools = toolset();
        let store = InMemoryRecallStore::new();

        let result = StepLoop::new(&client, &tools, &store, config())
            .run("investigate", None)
            .await;

        assert_eq!(result.outcome, Outcome::Failed);
        assert!(result.error.as_deref().unwrap().contains("final-report"));
    }

    #[tokio::test]
    async fn soft_deadline_warning_appears_near_the_end() {
        let client = ScriptedClient::new(vec![]);
        let tools = toolset();
        let store = InMemoryRecallStore::new();

        StepLoop::new(
            &client,
            &tools,
            &store,
            config().with_max_steps(5).with_soft_deadline_steps(2),
        )
        .run("investigate", None)
        .await;

        let prompts = client.system_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 5);
        // Steps 1-3 (remaining 5, 4, 3) are clean; steps 4-5 (remaining 2, 1)
        // carry the warning.
        for prompt in prompts.iter().take(3) {
            assert!(!prompt.contains(SOFT_DEADLINE_WARNING));
        }
        for prompt in prompts.iter().skip(3) {
            assert!(prompt.contains(SOFT_DEADLINE_WARNING));
        }
    }

    #[tokio::test]
    async fn shared_meter_accumulates_across_runs() {
        let client = ScriptedClient::new(vec![ScriptItem::Text("done")]);
        let tools = toolset();
        let store = InMemoryRecallStore::new();
        let meter = Arc::new(UsageMeter::new());
        meter.add(1000, 100); // pre-existing parent usage

        let result = StepLoop::new(&client, &tools, &store, config())
            .with_usage_meter(meter.clone())
            .run("investigate", None)
            .await;

        // The result reports only this invocation's delta.
        assert_eq!(result.input_tokens, 100);
        assert_eq!(result.output_tokens, 10);
        assert_eq!(meter.snapshot(), (1100, 110));
    }
}
