//! The final-report tool: the model's way of ending the investigation.
//!
//! Registered as [`ToolKind::FinalAnswer`], so the dispatcher short-circuits
//! the loop as soon as the model calls it. Forcing the verdict through a
//! structured schema instead of free text keeps reports machine-checkable.

use crate::json_schema_for;
use crate::tools::core::{Tool, ToolError, ToolFuture, ToolKind};
use crate::ToolDef;
use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Deserialize, JsonSchema)]
struct FileReportArgs {
    /// Overall verdict: benign, suspicious, or malicious.
    classification: String,
    /// Narrative summary of what the traffic shows.
    summary: String,
    /// Concrete indicators supporting the verdict (IPs, domains, patterns).
    indicators: Vec<String>,
    /// Suggested follow-up actions, if any.
    #[serde(default)]
    recommended_actions: Option<Vec<String>>,
}

/// Tool the model calls to file its final investigation report.
pub struct FileReportTool;

impl FileReportTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileReportTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for FileReportTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "file_report",
            "File the final investigation report. Call exactly once, when the analysis \
             is complete. This ends the investigation.",
            json_schema_for::<FileReportArgs>(),
        )
    }

    fn kind(&self) -> ToolKind {
        ToolKind::FinalAnswer
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: FileReportArgs = serde_json::from_str(&arguments)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

            let mut report = format!(
                "Classification: {}\n\n{}\n",
                args.classification.trim(),
                args.summary.trim()
            );
            if !args.indicators.is_empty() {
                report.push_str("\nIndicators:\n");
                for indicator in &args.indicators {
                    report.push_str(&format!("- {indicator}\n"));
                }
            }
            if let Some(actions) = &args.recommended_actions {
                if !actions.is_empty() {
                    report.push_str("\nRecommended actions:\n");
                    for action in actions {
                        report.push_str(&format!("- {action}\n"));
                    }
                }
            }
            Ok(report)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn formats_full_report() {
        let tool = FileReportTool::new();
        let result = tool
            .execute(
                r#"{
                    "classification": "malicious",
                    "summary": "Periodic HTTP beaconing to a low-reputation host.",
                    "indicators": ["10.0.0.5 -> 203.0.113.9 every 60s", "hardcoded user-agent"],
                    "recommended_actions": ["isolate the host"]
                }"#,
            )
            .await
            .unwrap();

        assert!(result.starts_with("Classification: malicious"));
        assert!(result.contains("Periodic HTTP beaconing"));
        assert!(result.contains("- 10.0.0.5 -> 203.0.113.9 every 60s"));
        assert!(result.contains("- isolate the host"));
    }

    #[tokio::test]
    async fn optional_actions_omitted() {
        let tool = FileReportTool::new();
        let result = tool
            .execute(
                r#"{"classification":"benign","summary":"Routine traffic.","indicators":[]}"#,
            )
            .await
            .unwrap();
        assert!(!result.contains("Recommended actions"));
        assert!(!result.contains("Indicators"));
    }

    #[test]
    fn is_the_final_answer_tool() {
        assert_eq!(FileReportTool::new().kind(), ToolKind::FinalAnswer);
    }
}
