use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use resman::batch::local::SleepHandler;
use resman::batch::LocalBackend;
use resman::config::SchedulerConfig;
use resman::directory::{JsonDirectory, NodeDirectory};
use resman::scheduler::{Job, JobInput, JobStatus};
use resman::shutdown::install_shutdown_handler;
use resman::ResourceManager;

#[derive(Parser, Debug)]
#[command(name = "resman")]
#[command(version)]
#[command(about = "A resource-manager job scheduling and queueing core")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a batch of jobs against a node/queue directory on the local backend
    Run(RunArgs),

    /// Check that directory files parse and cross-reference cleanly
    Validate(DirectoryArgs),
}

#[derive(Parser, Debug)]
struct DirectoryArgs {
    /// JSON file with the node records (id, address, capacity)
    #[arg(long)]
    nodes: PathBuf,

    /// JSON file with node-to-queue assignment records
    #[arg(long)]
    assignments: PathBuf,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    directory: DirectoryArgs,

    /// JSON file with the jobs to submit
    #[arg(long)]
    jobs: PathBuf,

    /// Dispatch retry interval in milliseconds
    #[arg(long, default_value = "500")]
    dispatch_interval_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

/// One entry of the --jobs file.
#[derive(Debug, Deserialize)]
struct JobEntry {
    name: String,
    handler: String,
    queue: String,
    load: u32,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    max_run_secs: Option<u64>,
    #[serde(default)]
    input: JobInput,
}

#[derive(Serialize)]
struct JobReport {
    job_id: String,
    name: String,
    queue: String,
    status: String,
    node: Option<String>,
    error: Option<String>,
}

fn load_jobs(path: &PathBuf) -> Result<Vec<JobEntry>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn run_jobs(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let directory = JsonDirectory::new(&args.directory.nodes, &args.directory.assignments);
    let entries = load_jobs(&args.jobs)?;

    let backend = Arc::new(LocalBackend::with_shell().register("sleep", Arc::new(SleepHandler)));
    let config = SchedulerConfig::default()
        .with_dispatch_interval(Duration::from_millis(args.dispatch_interval_ms));
    let manager = ResourceManager::from_directory(&directory, backend, config)?;

    let cancel = install_shutdown_handler();
    let loop_handle = manager.start(cancel.clone());

    let mut submitted = Vec::new();
    for entry in entries {
        let mut job = Job::new(&entry.name, &entry.handler, &entry.queue, entry.load)
            .with_priority(entry.priority);
        if let Some(secs) = entry.max_run_secs {
            job = job.with_max_run_secs(secs);
        }
        match manager.submit_job(job, entry.input).await {
            Ok(id) => submitted.push(id),
            Err(e) => eprintln!("Rejected {}: {}", entry.name, e),
        }
    }

    // Poll until everything submitted is terminal or shutdown is requested.
    let mut all_done = false;
    while !all_done && !cancel.is_cancelled() {
        tokio::time::sleep(Duration::from_millis(100)).await;
        all_done = true;
        for id in &submitted {
            if !manager.job_status(*id).await?.is_terminal() {
                all_done = false;
                break;
            }
        }
    }

    cancel.cancel();
    loop_handle.await?;

    let mut failed = false;
    let mut reports = Vec::new();
    for id in &submitted {
        let record = manager.job_record(*id).await?;
        failed |= record.status == JobStatus::Failure;
        reports.push(JobReport {
            job_id: record.job.id.to_string(),
            name: record.job.name.clone(),
            queue: record.job.queue_name.clone(),
            status: record.status.to_string(),
            node: record.assigned_node.clone(),
            error: record.error.clone(),
        });
    }

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Table => {
            println!("{:<38} {:<16} {:<10} {:<10} NODE", "JOB ID", "NAME", "QUEUE", "STATUS");
            println!("{}", "-".repeat(90));
            for report in &reports {
                println!(
                    "{:<38} {:<16} {:<10} {:<10} {}",
                    report.job_id,
                    report.name,
                    report.queue,
                    report.status,
                    report.node.as_deref().unwrap_or("-")
                );
                if let Some(error) = &report.error {
                    println!("  error: {}", error);
                }
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn validate(args: DirectoryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let directory = JsonDirectory::new(&args.nodes, &args.assignments);
    let nodes = directory.load_nodes()?;
    let assignments = directory.load_queue_assignments()?;

    println!("{} nodes, {} nodes with queue assignments", nodes.len(), assignments.len());

    let known: std::collections::HashSet<&str> =
        nodes.iter().map(|n| n.node_id.as_str()).collect();
    let mut dangling = 0;
    for node_id in assignments.keys() {
        if !known.contains(node_id.as_str()) {
            eprintln!("warning: assignment references unknown node {}", node_id);
            dangling += 1;
        }
    }
    if dangling > 0 {
        eprintln!("{} dangling node reference(s); they will be skipped at dispatch time", dangling);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Run(run_args) => run_jobs(run_args).await?,
        Commands::Validate(dir_args) => validate(dir_args)?,
    }
    Ok(())
}
