//! The Act phase: turning one batch of tool calls into tool results.
//!
//! Every call the model makes gets exactly one tool-result message, executed
//! or not — the chat API requires a result per call id, and the model needs
//! to know what happened to each request. Skips are explicit: a skipped call
//! receives a message naming the rule that skipped it and the arguments that
//! were dropped, so the model can re-issue next step.
//!
//! Ordering rules inside a step:
//! 1. More than one final-report call is a protocol violation (fatal).
//! 2. One final-report call short-circuits everything else.
//! 3. Exclusion rules drop the losing family's calls.
//! 4. Rate-limited tools execute once; extra calls are skipped.
//! 5. Rate-limited winners run sequentially, everything else concurrently.

use crate::agent::config::ExclusionRule;
use crate::agent::events::{EventHandler, LoopEvent};
use crate::tools::core::{ToolKind, ToolSet};
use crate::{Message, ToolCall};
use futures::future::join_all;
use std::collections::HashMap;

/// Argument preview length in skip messages.
const ARGS_PREVIEW_CHARS: usize = 120;

/// The outcome of one Act phase.
pub struct ActOutcome {
    /// One tool-result message per call, in call order.
    pub results: Vec<Message>,
    /// Set when the final-report tool ran this step.
    pub final_answer: Option<String>,
    /// Set on a protocol violation; the loop must terminate `Failed`.
    pub fatal: Option<String>,
}

/// Execute one step's tool calls against the set.
pub async fn dispatch_step(
    tools: &ToolSet,
    calls: &[ToolCall],
    exclusions: &[ExclusionRule],
    handler: &dyn EventHandler,
) -> ActOutcome {
    let final_indices: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| tools.kind_of(&c.function.name) == Some(ToolKind::FinalAnswer))
        .map(|(i, _)| i)
        .collect();

    if final_indices.len() > 1 {
        return ActOutcome {
            results: Vec::new(),
            final_answer: None,
            fatal: Some(format!(
                "{} final-report calls in a single step; exactly one is allowed",
                final_indices.len()
            )),
        };
    }

    if let Some(&final_idx) = final_indices.first() {
        return file_report(tools, calls, final_idx, handler).await;
    }

    // Skip reasons, by call index. `None` means execute.
    let mut skips: Vec<Option<String>> = vec![None; calls.len()];

    for rule in exclusions {
        let has_keeps = calls.iter().any(|c| c.function.name == rule.keeps);
        let has_skips = calls.iter().any(|c| c.function.name == rule.skips);
        if has_keeps && has_skips {
            let reason = format!(
                "You cannot call {} and {} in the same step. The {} call(s) were skipped.",
                rule.skips, rule.keeps, rule.skips
            );
            for (i, call) in calls.iter().enumerate() {
                if call.function.name == rule.skips {
                    skips[i] = Some(reason.clone());
                }
            }
        }
    }

    // One call per step for rate-limited tools; extras are named and skipped.
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut extras: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, call) in calls.iter().enumerate() {
        if skips[i].is_some() {
            continue;
        }
        let name = call.function.name.as_str();
        if tools.kind_of(name) == Some(ToolKind::RateLimited) {
            if first_seen.contains_key(name) {
                extras.entry(name).or_default().push(i);
            } else {
                first_seen.insert(name, i);
            }
        }
    }
    for (name, indices) in &extras {
        let listing: Vec<String> = indices
            .iter()
            .map(|&i| format!("{name}({})", args_preview(&calls[i].function.arguments)))
            .collect();
        let reason = format!(
            "Only one {name} call is allowed per step. {} additional call(s) were skipped.\nSkipped call(s): {}",
            indices.len(),
            listing.join(", ")
        );
        for &i in indices {
            skips[i] = Some(reason.clone());
        }
    }

    let mut outputs: Vec<Option<String>> = vec![None; calls.len()];

    // Rate-limited winners run one at a time.
    for (i, call) in calls.iter().enumerate() {
        if skips[i].is_none() && tools.kind_of(&call.function.name) == Some(ToolKind::RateLimited) {
            handler.on_event(&LoopEvent::ToolExecuting {
                name: &call.function.name,
                arguments: &call.function.arguments,
            });
            let result = tools.execute(&call.function.name, &call.function.arguments).await;
            handler.on_event(&LoopEvent::ToolResult {
                name: &call.function.name,
                call_id: &call.id,
                result: &result,
            });
            outputs[i] = Some(result);
        }
    }

    // Everything else fans out concurrently, re-associated by index.
    let pending: Vec<usize> = (0..calls.len())
        .filter(|&i| skips[i].is_none() && outputs[i].is_none())
        .collect();
    for &i in &pending {
        handler.on_event(&LoopEvent::ToolExecuting {
            name: &calls[i].function.name,
            arguments: &calls[i].function.arguments,
        });
    }
    let futures = pending.iter().map(|&i| {
        let call = &calls[i];
        async move {
            (
                i,
                tools.execute(&call.function.name, &call.function.arguments).await,
            )
        }
    });
    for (i, result) in join_all(futures).await {
        handler.on_event(&LoopEvent::ToolResult {
            name: &calls[i].function.name,
            call_id: &calls[i].id,
            result: &result,
        });
        outputs[i] = Some(result);
    }

    let results = calls
        .iter()
        .enumerate()
        .map(|(i, call)| match (&skips[i], &outputs[i]) {
            (Some(reason), _) => {
                handler.on_event(&LoopEvent::ToolSkipped {
                    name: &call.function.name,
                    reason,
                });
                Message::tool_result(&call.id, reason)
            }
            (None, Some(output)) => Message::tool_result(&call.id, output),
            // Unreachable: every non-skipped call was executed above.
            (None, None) => Message::tool_result(&call.id, "Error: call was not dispatched"),
        })
        .collect();

    ActOutcome {
        results,
        final_answer: None,
        fatal: None,
    }
}

/// Execute the single final-report call and skip everything else.
async fn file_report(
    tools: &ToolSet,
    calls: &[ToolCall],
    final_idx: usize,
    handler: &dyn EventHandler,
) -> ActOutcome {
    let call = &calls[final_idx];
    handler.on_event(&LoopEvent::ToolExecuting {
        name: &call.function.name,
        arguments: &call.function.arguments,
    });
    let report = tools.execute(&call.function.name, &call.function.arguments).await;
    handler.on_event(&LoopEvent::ToolResult {
        name: &call.function.name,
        call_id: &call.id,
        result: &report,
    });

    let results = calls
        .iter()
        .enumerate()
        .map(|(i, other)| {
            if i == final_idx {
                Message::tool_result(&other.id, report.clone())
            } else {
                let reason = "Skipped: the final report was filed in this step.";
                handler.on_event(&LoopEvent::ToolSkipped {
                    name: &other.function.name,
                    reason,
                });
                Message::tool_result(&other.id, reason)
            }
        })
        .collect();

    ActOutcome {
        results,
        final_answer: Some(report),
        fatal: None,
    }
}

fn args_preview(arguments: &str) -> String {
    let mut preview: String = arguments.chars().take(ARGS_PREVIEW_CHARS).collect();
    if arguments.chars().count() > ARGS_PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}
