//! flotillad — the Flotilla deployment daemon.
//!
//! Subcommands:
//! - `validate` — load a manifest, resolve waves, print the plan
//! - `deploy` — run a full deployment against the built-in rehearsal
//!   cluster and print the JSON run report
//!
//! Real control-plane backends integrate through the `ControlApi` trait;
//! the rehearsal cluster exercises the same orchestration path end to end.
//!
//! # Usage
//!
//! ```text
//! flotillad validate --file deploy.toml
//! flotillad deploy --file deploy.toml --data-dir /var/lib/flotilla
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;

use flotilla_cluster::SimCluster;
use flotilla_core::{Manifest, RunConfig, parse_duration};
use flotilla_driver::{Driver, RunVerdict};
use flotilla_state::RevisionLog;

#[derive(Parser)]
#[command(name = "flotillad", about = "Wave-ordered deployment orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a manifest and print the resolved wave plan.
    Validate {
        /// Deployment manifest (TOML).
        #[arg(long)]
        file: PathBuf,
    },

    /// Deploy a manifest against the built-in rehearsal cluster.
    Deploy {
        /// Deployment manifest (TOML).
        #[arg(long)]
        file: PathBuf,

        /// Data directory for the revision history.
        #[arg(long, default_value = "/var/lib/flotilla")]
        data_dir: PathBuf,

        /// Cluster target name (one run at a time per target).
        #[arg(long, default_value = "rehearsal")]
        target: String,

        /// Interval between rollout/endpoint polls (e.g. "5s").
        #[arg(long, default_value = "5s")]
        poll_interval: String,

        /// Wall-clock budget for each wave's health gate.
        #[arg(long, default_value = "300s")]
        gate_deadline: String,

        /// Wall-clock budget for resolving external addresses.
        #[arg(long, default_value = "300s")]
        endpoint_budget: String,

        /// Also roll earlier healthy waves back if a later wave fails.
        #[arg(long)]
        cascade_rollback: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flotillad=debug,flotilla=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { file } => validate(&file),
        Command::Deploy {
            file,
            data_dir,
            target,
            poll_interval,
            gate_deadline,
            endpoint_budget,
            cascade_rollback,
        } => {
            let config = RunConfig {
                target,
                poll_interval: duration_flag(&poll_interval, "--poll-interval")?,
                gate_deadline: duration_flag(&gate_deadline, "--gate-deadline")?,
                endpoint_budget: duration_flag(&endpoint_budget, "--endpoint-budget")?,
                cascade_rollback,
                ..RunConfig::default()
            };
            deploy(&file, &data_dir, config).await
        }
    }
}

fn duration_flag(value: &str, flag: &str) -> anyhow::Result<std::time::Duration> {
    parse_duration(value)
        .ok_or_else(|| anyhow::anyhow!("invalid duration for {flag}: {value:?}"))
}

fn validate(file: &Path) -> anyhow::Result<()> {
    let descriptors = Manifest::from_file(file)?.load()?;
    let waves = flotilla_graph::resolve(&descriptors)?;

    println!(
        "{} workloads across {} waves",
        descriptors.len(),
        waves.len()
    );
    for wave in &waves {
        let members: Vec<String> = wave
            .members
            .iter()
            .map(|d| format!("{} (tier {}, {} replicas)", d.name, d.tier, d.replicas))
            .collect();
        println!("wave {}: {}", wave.index, members.join(", "));
    }
    Ok(())
}

async fn deploy(file: &Path, data_dir: &Path, config: RunConfig) -> anyhow::Result<()> {
    let manifest = Manifest::from_file(file)?;

    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("flotilla.redb");
    let history = RevisionLog::open(&db_path, config.history_window)?;
    info!(path = ?db_path, "revision history opened");

    // Rehearsal cluster: every workload converges, and exposed workloads
    // receive a synthetic address shortly after their wave settles.
    let cluster = SimCluster::new();
    for workload in &manifest.workloads {
        if workload.expose {
            if let Some(name) = &workload.name {
                let address = format!("{name}.{}.rehearsal.local", config.target);
                cluster.set_address(name, &address, 2).await;
            }
        }
    }
    info!(cluster = %config.target, "rehearsal cluster ready");

    let driver = Driver::new(config, cluster, history);
    let report = driver.run(manifest.workloads).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.verdict != RunVerdict::Success {
        anyhow::bail!("deployment ended with verdict {:?}", report.verdict);
    }
    Ok(())
}
