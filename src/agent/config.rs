//! Configuration for the [`StepLoop`](super::harness::StepLoop).

use crate::api::retry::RetryConfig;
use crate::context::assembler::ContextCeilings;

/// What to do when the model replies with plain text and no tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoActionPolicy {
    /// Treat it as the model being finished: terminate `Done` with no answer
    /// (the report must come through the final-answer tool).
    #[default]
    Finish,
    /// Append the text, consume the step, and ask again.
    Continue,
}

/// Two tool families that must not act in the same step. When calls to both
/// appear, `keeps` executes and every call to `skips` is skipped with an
/// explanatory result.
#[derive(Debug, Clone)]
pub struct ExclusionRule {
    pub keeps: String,
    pub skips: String,
}

impl ExclusionRule {
    pub fn new(keeps: impl Into<String>, skips: impl Into<String>) -> Self {
        Self {
            keeps: keeps.into(),
            skips: skips.into(),
        }
    }
}

/// Number of remaining steps at which the soft-deadline warning is injected.
pub const DEFAULT_SOFT_DEADLINE_STEPS: u32 = 3;

/// Configuration for one loop invocation.
///
/// `LoopConfig::new(model)` gives working defaults; override individual
/// fields with the `with_*` builders or by setting struct fields directly.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Model identifier passed to the client.
    pub model: String,
    /// Instruction preamble for every call.
    pub system_prompt: String,
    /// Step budget: maximum reason/act cycles.
    pub max_steps: u32,
    /// Completion token cap per model call.
    pub max_tokens: u32,
    pub temperature: f32,
    /// Inject the wrap-up warning when this many steps (or fewer) remain.
    pub soft_deadline_steps: u32,
    pub no_action: NoActionPolicy,
    pub retry: RetryConfig,
    pub ceilings: ContextCeilings,
    /// The model's advertised context window, used to clamp flow allocations.
    pub context_window_tokens: usize,
    /// Recall store collection queried and written during this invocation.
    pub memory_collection: String,
    /// Mutually exclusive tool families.
    pub exclusions: Vec<ExclusionRule>,
}

impl LoopConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_steps: 12,
            max_tokens: 4096,
            temperature: 0.2,
            soft_deadline_steps: DEFAULT_SOFT_DEADLINE_STEPS,
            no_action: NoActionPolicy::default(),
            retry: RetryConfig::default(),
            ceilings: ContextCeilings::default(),
            context_window_tokens: 128_000,
            memory_collection: "capture-notes".to_string(),
            exclusions: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_soft_deadline_steps(mut self, steps: u32) -> Self {
        self.soft_deadline_steps = steps;
        self
    }

    pub fn with_no_action(mut self, policy: NoActionPolicy) -> Self {
        self.no_action = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ceilings(mut self, ceilings: ContextCeilings) -> Self {
        self.ceilings = ceilings;
        self
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window_tokens = tokens;
        self
    }

    pub fn with_memory_collection(mut self, collection: impl Into<String>) -> Self {
        self.memory_collection = collection.into();
        self
    }

    pub fn with_exclusion(mut self, rule: ExclusionRule) -> Self {
        self.exclusions.push(rule);
        self
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a network traffic analyst investigating a \
capture for signs of compromise. Work methodically: inspect flows, save important findings \
with upsert_memory, delegate narrow extraction questions when a specialist tool is \
available, and file your conclusion with file_report when the analysis is complete.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = LoopConfig::new("test-model");
        assert_eq!(config.max_steps, 12);
        assert_eq!(config.soft_deadline_steps, DEFAULT_SOFT_DEADLINE_STEPS);
        assert_eq!(config.no_action, NoActionPolicy::Finish);
        assert!(config.exclusions.is_empty());
    }

    #[test]
    fn builders_chain() {
        let config = LoopConfig::new("m")
            .with_max_steps(3)
            .with_soft_deadline_steps(1)
            .with_no_action(NoActionPolicy::Continue)
            .with_exclusion(ExclusionRule::new("deep_dive", "quick_scan"));
        assert_eq!(config.max_steps, 3);
        assert_eq!(config.no_action, NoActionPolicy::Continue);
        assert_eq!(config.exclusions[0].keeps, "deep_dive");
    }
}
