//! CLI driver: investigate a rendered capture file from the command line.

use clap::Parser;
use flowsleuth::DEFAULT_MODEL;
use flowsleuth::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flowsleuth", version, about = "Step- and token-budgeted capture investigation")]
struct Cli {
    /// Path to the rendered capture text (one flow per paragraph).
    #[arg(long)]
    capture: PathBuf,

    /// Investigation task for the agent.
    #[arg(long, default_value = "Investigate this capture for signs of compromise.")]
    task: String,

    /// Model identifier.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Step budget for the investigation loop.
    #[arg(long, default_value_t = 12)]
    steps: u32,

    /// Step budget for delegated sub-analyses.
    #[arg(long, default_value_t = 6)]
    sub_steps: u32,

    /// Directory for sub-invocation audit transcripts.
    #[arg(long, default_value = "audit")]
    audit_dir: PathBuf,

    /// Run the breadth survey (one bounded call per flow) instead of the
    /// interactive loop.
    #[arg(long)]
    survey: bool,

    /// Token budget shared across flows in survey mode.
    #[arg(long, default_value_t = 48_000)]
    survey_budget: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let api_key = match std::env::var("OPENROUTER_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("OPENROUTER_KEY not set");
            return 2;
        }
    };
    let client = match OpenRouterClient::new(api_key) {
        Ok(client) => client,
        Err(error) => {
            eprintln!("{error}");
            return 2;
        }
    };

    let root = cli
        .capture
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let locator = cli
        .capture
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = cli
        .capture
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());

    let reader = TextFileReader::new(root);
    let handle = ArtifactHandle::new(id, locator);

    if cli.survey {
        let config = SurveyConfig {
            model: cli.model,
            total_budget: cli.survey_budget,
            ..SurveyConfig::default()
        };
        let surveyor = FlowSurveyor::new(&client, &reader, config);
        return match surveyor.survey(&handle).await {
            Ok(result) => {
                println!("{}", result.combined());
                println!(
                    "[{} prompt / {} completion tokens]",
                    result.input_tokens, result.output_tokens
                );
                0
            }
            Err(error) => {
                eprintln!("survey failed: {error}");
                1
            }
        };
    }

    let units = match reader.units(&handle).await {
        Ok(units) => units,
        Err(error) => {
            eprintln!("failed to read capture: {error}");
            return 2;
        }
    };
    let excluded = units.iter().filter(|u| u.excluded).count();
    let pinned = format!(
        "Capture {}: {} flow(s), {} encrypted/excluded. Flow ids: flow-0..flow-{}.",
        handle.id,
        units.len(),
        excluded,
        units.len().saturating_sub(1)
    );

    let client = Arc::new(client);
    let store = Arc::new(InMemoryRecallStore::new());
    let reader = Arc::new(reader);
    let audit = Arc::new(AuditLog::new(cli.audit_dir));
    let meter = Arc::new(UsageMeter::new());

    let config = LoopConfig::new(cli.model.clone()).with_max_steps(cli.steps);
    let child_config = LoopConfig::new(cli.model)
        .with_max_steps(cli.sub_steps)
        .with_system_prompt(
            "You are a flow analysis specialist. Answer the delegated question about the \
             given flow precisely, then file your conclusion with file_report.",
        );

    let tools = ToolSet::new()
        .with(UpsertMemoryTool::new(
            store.clone(),
            config.memory_collection.clone(),
        ))
        .with(FileReportTool::new())
        .with(SubInvocationTool::new(
            client.clone(),
            store.clone(),
            reader.clone(),
            handle.clone(),
            audit,
            child_config,
            meter.clone(),
        ));

    let result = StepLoop::new(client.as_ref(), &tools, store.as_ref(), config)
        .with_event_handler(&LoggingHandler)
        .with_usage_meter(meter)
        .run(&cli.task, Some(&pinned))
        .await;

    match &result.answer {
        Some(answer) => println!("{answer}"),
        None => println!("(no report filed — outcome: {})", result.outcome),
    }
    if let Some(error) = &result.error {
        eprintln!("error: {error}");
    }
    println!(
        "[{} step(s), {} prompt / {} completion tokens]",
        result.steps_used, result.input_tokens, result.output_tokens
    );

    match result.outcome {
        Outcome::Done => 0,
        Outcome::Exhausted => 0,
        Outcome::Failed => 1,
    }
}
