//! Budgeted per-flow survey of a whole capture.
//!
//! The survey is the breadth pass that precedes (or replaces) an interactive
//! investigation: every flow in the artifact gets one bounded model call,
//! with the shared token budget divided across flows by the sqrt-weighted
//! allocator and each flow's text truncated to its allocation. Excluded
//! flows (encrypted payloads) take no budget and are listed as skipped.
//! A model failure on one flow degrades to an error line in that flow's
//! slot; it never aborts the rest of the survey.

use crate::api::client::ModelClient;
use crate::api::retry::{RetryConfig, invoke_with_retry};
use crate::artifact::{ArtifactError, ArtifactHandle, ArtifactReader};
use crate::context::budget::allocate;
use crate::context::chunk::truncate_middle;
use crate::{ChatRequest, DEFAULT_MODEL, Message};
use tracing::{info, warn};

const FLOW_SURVEY_PROMPT: &str = "You are surveying one network flow from a capture. \
Describe what the flow shows — endpoints, protocol, notable payload patterns — and flag \
anything suspicious in one short paragraph.";

/// Configuration for one survey pass.
#[derive(Debug, Clone)]
pub struct SurveyConfig {
    pub model: String,
    /// Token budget shared by all flows' text.
    pub total_budget: usize,
    /// Completion cap per flow call.
    pub max_tokens: u32,
    pub temperature: f32,
    pub context_window_tokens: usize,
    pub retry: RetryConfig,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            total_budget: 48_000,
            max_tokens: 512,
            temperature: 0.2,
            context_window_tokens: 128_000,
            retry: RetryConfig::default(),
        }
    }
}

/// One flow's slot in the survey.
#[derive(Debug)]
pub struct FlowReport {
    pub unit_id: String,
    /// Tokens of flow text this slot was allowed.
    pub allocation: usize,
    /// The model's report, or an error line for this flow.
    pub report: String,
}

/// The survey's combined output.
#[derive(Debug)]
pub struct SurveyResult {
    /// Per-flow reports in flow order.
    pub reports: Vec<FlowReport>,
    /// Flow ids that took no part (excluded, or priced out of the budget).
    pub skipped: Vec<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl SurveyResult {
    /// The per-flow reports interleaved into one document.
    pub fn combined(&self) -> String {
        let mut out = String::new();
        for report in &self.reports {
            out.push_str(&format!("## {}\n{}\n\n", report.unit_id, report.report));
        }
        if !self.skipped.is_empty() {
            out.push_str(&format!("Skipped flows: {}\n", self.skipped.join(", ")));
        }
        out
    }
}

/// Runs the breadth pass: allocate, truncate, one model call per flow.
pub struct FlowSurveyor<'a> {
    client: &'a dyn ModelClient,
    reader: &'a dyn ArtifactReader,
    config: SurveyConfig,
}

impl<'a> FlowSurveyor<'a> {
    pub fn new(
        client: &'a dyn ModelClient,
        reader: &'a dyn ArtifactReader,
        config: SurveyConfig,
    ) -> Self {
        Self {
            client,
            reader,
            config,
        }
    }

    pub async fn survey(&self, handle: &ArtifactHandle) -> Result<SurveyResult, ArtifactError> {
        let units = self.reader.units(handle).await?;
        let sizes: Vec<usize> = units
            .iter()
            .map(|u| if u.excluded { 0 } else { u.size })
            .collect();
        let allocations = allocate(&sizes, self.config.total_budget);

        info!(
            "Surveying {}: {} flow(s), budget {} tokens",
            handle.id,
            units.len(),
            self.config.total_budget
        );

        let mut reports = Vec::new();
        let mut skipped = Vec::new();
        let mut input_tokens: u64 = 0;
        let mut output_tokens: u64 = 0;

        for (unit, &allocation) in units.iter().zip(&allocations) {
            if unit.excluded || allocation == 0 {
                skipped.push(unit.id.clone());
                continue;
            }

            let text = self.reader.unit_text(handle, &unit.id).await?;
            let bounded = truncate_middle(&text, allocation, self.config.context_window_tokens);

            let request = ChatRequest {
                model: Some(self.config.model.clone()),
                messages: vec![
                    Message::system(FLOW_SURVEY_PROMPT),
                    Message::user(bounded),
                ],
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                ..Default::default()
            };

            let report = match invoke_with_retry(self.client, &request, &self.config.retry).await
            {
                Ok(completion) => {
                    if let Some(usage) = &completion.usage {
                        input_tokens += usage.prompt_tokens.unwrap_or(0) as u64;
                        output_tokens += usage.completion_tokens.unwrap_or(0) as u64;
                    }
                    completion
                        .content
                        .unwrap_or_else(|| "(empty survey response)".to_string())
                }
                Err(error) => {
                    // One bad flow must not sink the survey.
                    warn!("Survey of {} failed: {error}", unit.id);
                    format!("(survey failed: {error})")
                }
            };

            reports.push(FlowReport {
                unit_id: unit.id.clone(),
                allocation,
                report,
            });
        }

        Ok(SurveyResult {
            reports,
            skipped,
            input_tokens,
            output_tokens,
        })
    }
}
