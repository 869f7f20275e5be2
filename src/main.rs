use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::WeftConfig;
use weft_core::event::{EventBus, EventPayload};
use weft_core::traits::{EchoPromptDriver, PromptDriver};
use weft_structures::{PromptTask, RunSummary, TaskNode, Workflow};

#[derive(Parser)]
#[command(name = "weft", version, about = "Run task graphs defined in TOML")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow definition
    Run {
        /// Path to the workflow file
        file: PathBuf,
        /// Override structure.max_workers
        #[arg(long)]
        max_workers: Option<usize>,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
        /// Arguments, available to templates as args[0], args[1], ...
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Print the execution order of a workflow definition
    Graph {
        /// Path to the workflow file
        file: PathBuf,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "weft", &mut std::io::stdout());
        }
        Commands::Graph { file } => {
            let config = load_config(&file)?;
            let mut workflow = build_workflow(&config)?;
            workflow.resolve_relationships()?;
            for id in workflow.order_tasks()? {
                let parents: Vec<&str> = workflow
                    .parents(&id)
                    .into_iter()
                    .map(TaskNode::id)
                    .collect();
                if parents.is_empty() {
                    println!("{id}");
                } else {
                    println!("{id} <- {}", parents.join(", "));
                }
            }
        }
        Commands::Run {
            file,
            max_workers,
            json,
            args,
        } => {
            let mut config = load_config(&file)?;
            if max_workers.is_some() {
                config.structure.max_workers = max_workers;
            }
            let summary = run_workflow(&config, args).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else if let Some(output) = &summary.output {
                println!("{output}");
            }

            if summary.is_aborted() {
                anyhow::bail!(
                    "workflow aborted at task {}",
                    summary.failed_task.as_deref().unwrap_or("<unknown>")
                );
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<WeftConfig> {
    let config = WeftConfig::load(path)?;
    if config.tasks.is_empty() {
        warn!(path = %path.display(), "Workflow file declares no tasks");
    }
    Ok(config)
}

/// One prompt task per `[[tasks]]` entry, all sharing the echo driver.
fn build_workflow(config: &WeftConfig) -> anyhow::Result<Workflow> {
    let driver: Arc<dyn PromptDriver> = Arc::new(EchoPromptDriver);
    let mut workflow = Workflow::new().with_config(&config.structure);

    for def in &config.tasks {
        let task = PromptTask::new(def.prompt.clone(), driver.clone());
        let node = TaskNode::new(task)
            .with_id(def.id.clone())
            .with_parent_ids(def.parents.iter().cloned());
        workflow.add_task(node)?;
    }

    Ok(workflow)
}

async fn run_workflow(config: &WeftConfig, args: Vec<String>) -> anyhow::Result<RunSummary> {
    let mut workflow = build_workflow(config)?;

    // Subscribe to events for progress output
    let bus = Arc::new(EventBus::new(config.events.bus_capacity));
    let mut rx = bus.subscribe();
    workflow.add_event_sink(bus.clone());

    let print_handle = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event.payload {
                EventPayload::StartTask { task_id, .. } => {
                    eprintln!("[{task_id}: started]");
                }
                EventPayload::FinishTask {
                    task_id, output, ..
                } => {
                    if output.is_error() {
                        eprintln!("[{task_id}: ERROR] {}", truncate(&output.to_text(), 200));
                    } else {
                        eprintln!("[{task_id}: ok] {}", truncate(&output.to_text(), 200));
                    }
                }
                _ => {}
            }
        }
    });

    let summary = workflow.run(args).await?;
    info!(
        executed = summary.executed.len(),
        elapsed_ms = summary.elapsed_ms,
        state = %summary.state,
        "Run complete"
    );

    // Close the bus so the printer drains and exits
    drop(workflow);
    drop(bus);
    print_handle.await.ok();

    Ok(summary)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}...")
}
