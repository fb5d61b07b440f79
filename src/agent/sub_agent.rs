//! Delegation to a specialist child loop.
//!
//! [`SubInvocationTool`] wraps a whole fresh [`StepLoop`] behind the [`Tool`]
//! interface: the parent spends one step, the child runs an entire
//! investigation of its own with its own step budget, conversation, and
//! context ceilings. Child token usage rolls up into the parent's meter, and
//! the child's full transcript is written to the audit log keyed by
//! `(artifact id, ordinal)` — whatever the outcome, the work must be
//! inspectable afterwards.
//!
//! The tool is [`ToolKind::RateLimited`]: one delegation per parent step.

use crate::agent::config::LoopConfig;
use crate::agent::harness::StepLoop;
use crate::agent::state::{Outcome, UsageMeter};
use crate::api::client::ModelClient;
use crate::artifact::{ArtifactHandle, ArtifactReader};
use crate::audit::AuditLog;
use crate::context::chunk::truncate_middle;
use crate::json_schema_for;
use crate::memory::RecallStore;
use crate::tools::core::{Tool, ToolError, ToolFuture, ToolKind, ToolSet};
use crate::tools::memory::UpsertMemoryTool;
use crate::tools::report::FileReportTool;
use crate::ToolDef;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

#[derive(Deserialize, JsonSchema)]
struct DelegateArgs {
    /// The narrow question the specialist should answer.
    objective: String,
    /// Flow unit to hand to the specialist, e.g. "flow-3". Omit to delegate
    /// a question about the capture as a whole.
    #[serde(default)]
    unit_id: Option<String>,
}

/// Tool that runs a nested specialist loop over one flow.
pub struct SubInvocationTool {
    client: Arc<dyn ModelClient>,
    store: Arc<dyn RecallStore>,
    reader: Arc<dyn ArtifactReader>,
    artifact: ArtifactHandle,
    audit: Arc<AuditLog>,
    child_config: LoopConfig,
    /// Parent meter; child usage is added here, not double counted.
    meter: Arc<UsageMeter>,
    ordinal: AtomicU32,
}

impl SubInvocationTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ModelClient>,
        store: Arc<dyn RecallStore>,
        reader: Arc<dyn ArtifactReader>,
        artifact: ArtifactHandle,
        audit: Arc<AuditLog>,
        child_config: LoopConfig,
        meter: Arc<UsageMeter>,
    ) -> Self {
        Self {
            client,
            store,
            reader,
            artifact,
            audit,
            child_config,
            meter,
            ordinal: AtomicU32::new(0),
        }
    }

    /// Build the child's task text, inlining the flow under a bounded
    /// allowance so the child starts within its own ceilings.
    async fn child_task(&self, args: &DelegateArgs) -> Result<String, ToolError> {
        let mut task = args.objective.clone();
        if let Some(unit_id) = &args.unit_id {
            let text = self
                .reader
                .unit_text(&self.artifact, unit_id)
                .await
                .map_err(|e| ToolError::Execution(e.to_string()))?;
            let allowance = self.child_config.ceilings.recent_history / 2;
            let bounded =
                truncate_middle(&text, allowance, self.child_config.context_window_tokens);
            task.push_str(&format!("\n\nFlow {unit_id}:\n{bounded}"));
        }
        Ok(task)
    }
}

impl Tool for SubInvocationTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "delegate_flow_analysis",
            "Delegate a narrow extraction or analysis question about one flow to a \
             specialist. Expensive: one delegation per step.",
            json_schema_for::<DelegateArgs>(),
        )
    }

    fn kind(&self) -> ToolKind {
        ToolKind::RateLimited
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: DelegateArgs = serde_json::from_str(&arguments)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

            let ordinal = self.ordinal.fetch_add(1, Ordering::SeqCst);
            let task = self.child_task(&args).await?;

            info!(
                "Sub-invocation {ordinal} on artifact {}: {}",
                self.artifact.id, args.objective
            );

            let child_tools = ToolSet::new()
                .with(UpsertMemoryTool::new(
                    self.store.clone(),
                    self.child_config.memory_collection.clone(),
                ))
                .with(FileReportTool::new());

            let result = StepLoop::new(
                self.client.as_ref(),
                &child_tools,
                self.store.as_ref(),
                self.child_config.clone(),
            )
            .with_usage_meter(self.meter.clone())
            .run(&task, None)
            .await;

            // The transcript is audited on every path, failure included.
            if let Err(e) = self
                .audit
                .record(&self.artifact.id, ordinal, &result.transcript)
            {
                warn!("Failed to audit sub-invocation transcript: {e}");
            }

            let summary = match result.outcome {
                Outcome::Done => match (result.answer, result.error) {
                    (Some(answer), _) => answer,
                    (None, Some(error)) => {
                        format!("Sub-analysis ended early (context window exceeded): {error}")
                    }
                    (None, None) => "Sub-analysis finished without filing a report.".to_string(),
                },
                Outcome::Exhausted => format!(
                    "Sub-analysis exhausted its {} step(s) without filing a report.",
                    self.child_config.max_steps
                ),
                Outcome::Failed => format!(
                    "Sub-analysis failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".into())
                ),
            };

            Ok(format!(
                "{summary}\n\n[sub-invocation {ordinal}: {} step(s), {} prompt / {} completion tokens]",
                result.steps_used, result.input_tokens, result.output_tokens
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::ClientFuture;
    use crate::artifact::TextFileReader;
    use crate::memory::InMemoryRecallStore;
    use crate::{ChatCompletion, ChatRequest, ToolCall, UsageInfo};

    /// Always files a benign report on its first step.
    struct OneShotClient;

    impl ModelClient for OneShotClient {
        fn invoke<'a>(&'a self, _request: &'a ChatRequest) -> ClientFuture<'a> {
            Box::pin(async {
                Ok(ChatCompletion {
                    tool_calls: vec![ToolCall::new(
                        "c1",
                        "file_report",
                        r#"{"classification":"benign","summary":"Plain DNS lookup.","indicators":[]}"#,
                    )],
                    usage: Some(UsageInfo {
                        prompt_tokens: Some(50),
                        completion_tokens: Some(5),
                        total_tokens: Some(55),
                    }),
                    ..Default::default()
                })
            })
        }
    }

    async fn fixture(dir: &tempfile::TempDir) -> SubInvocationTool {
        tokio::fs::write(
            dir.path().join("capture.txt"),
            "flow 0: 10.0.0.1 -> 8.8.8.8 dns query example.com",
        )
        .await
        .unwrap();

        SubInvocationTool::new(
            Arc::new(OneShotClient),
            Arc::new(InMemoryRecallStore::new()),
            Arc::new(TextFileReader::new(dir.path())),
            ArtifactHandle::new("cap-1", "capture.txt"),
            Arc::new(AuditLog::new(dir.path().join("audit"))),
            LoopConfig::new("test-model").with_max_steps(3),
            Arc::new(UsageMeter::new()),
        )
    }

    #[tokio::test]
    async fn runs_child_and_returns_its_report() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fixture(&dir).await;

        let result = tool
            .execute(r#"{"objective":"what domains are queried?","unit_id":"flow-0"}"#)
            .await
            .unwrap();

        assert!(result.contains("Classification: benign"));
        assert!(result.contains("1 step(s)"));
    }

    #[tokio::test]
    async fn audits_transcript_per_ordinal_and_rolls_up_usage() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fixture(&dir).await;
        let meter = tool.meter.clone();

        tool.execute(r#"{"objective":"q1"}"#).await.unwrap();
        tool.execute(r#"{"objective":"q2"}"#).await.unwrap();

        let audit_dir = dir.path().join("audit");
        assert!(audit_dir.join("cap-1-000.jsonl").exists());
        assert!(audit_dir.join("cap-1-001.jsonl").exists());

        // Two child runs, 50/5 tokens each.
        assert_eq!(meter.snapshot(), (100, 10));
    }

    #[tokio::test]
    async fn missing_unit_is_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fixture(&dir).await;

        let err = tool
            .execute(r#"{"objective":"q","unit_id":"flow-7"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("flow-7"));
    }

    #[test]
    fn is_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SubInvocationTool::new(
            Arc::new(OneShotClient),
            Arc::new(InMemoryRecallStore::new()),
            Arc::new(TextFileReader::new(dir.path())),
            ArtifactHandle::new("cap", "missing.txt"),
            Arc::new(AuditLog::new(dir.path())),
            LoopConfig::new("m"),
            Arc::new(UsageMeter::new()),
        );
        assert_eq!(tool.kind(), ToolKind::RateLimited);
    }
}
