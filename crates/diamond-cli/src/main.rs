//! Diamond - EIP-2535 deployment inspector
//!
//! Usage:
//!   diamond plan ProxyDiamond -n sepolia      # Preview cuts from compiled artifacts
//!   diamond status ProxyDiamond -n sepolia    # Deployed facets and run summaries
//!   diamond steps ProxyDiamond -n sepolia --deployment-id <id>
//!   diamond reset ProxyDiamond -n sepolia --deployment-id <id> [--step <name>]
//!
//! Deploying and upgrading need a chain adapter and run through
//! `diamond_core::coordinator::DeploymentCoordinator` in the host tool.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use diamond_core::artifacts::ArtifactSource;
use diamond_core::config::{ConfigResolver, ResolvedDiamond};
use diamond_core::deployment::{DeployedDiamondInfo, DeploymentInfoStore};
use diamond_core::planner::{CutPlan, SelectorPolicy, compute_cuts};
use diamond_core::steps::{DeploymentRegistry, StepRegistry, StepStatus};

#[derive(Parser)]
#[command(name = "diamond")]
#[command(about = "Diamond proxy deployment planner and inspector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Diamond name, as used in diamond.toml and the deployments directory
    diamond: String,

    /// Network name
    #[arg(short, long)]
    network: String,

    /// Project root holding diamond.toml
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// Facet config file, when it is not at the conventional location
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Preview the cuts a deploy or upgrade would submit
    ///
    /// Selectors come from compiled artifacts; nothing is written.
    Plan {
        #[command(flatten)]
        target: Target,

        /// Override the configured selector policy (strict or permissive)
        #[arg(long)]
        policy: Option<SelectorPolicy>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show deployed facets and deployment summaries
    Status {
        #[command(flatten)]
        target: Target,

        /// Only this deployment
        #[arg(long)]
        deployment_id: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// List the steps of one deployment
    Steps {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        deployment_id: String,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Reset a failed step to pending, or clear every failed step
    Reset {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        deployment_id: String,

        /// Failed step to reset; without it all failed steps are cleared
        #[arg(long)]
        step: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
    /// Only show problems (non-zero exit if any)
    Quiet,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "diamond=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Plan {
            target,
            policy,
            format,
        } => run_plan(&target, policy, format),
        Commands::Status {
            target,
            deployment_id,
            format,
        } => run_status(&target, deployment_id.as_deref(), format),
        Commands::Steps {
            target,
            deployment_id,
            format,
        } => run_steps(&target, &deployment_id, format),
        Commands::Reset {
            target,
            deployment_id,
            step,
        } => run_reset(&target, &deployment_id, step.as_deref()),
    }
}

fn resolve(target: &Target) -> Result<ResolvedDiamond> {
    let mut resolver = ConfigResolver::new(&target.project)
        .with_context(|| format!("Failed to load project at {}", target.project.display()))?;
    if let Some(config) = &target.config {
        resolver = resolver.with_explicit_config(config);
    }
    resolver
        .resolve(&target.diamond, &target.network)
        .with_context(|| format!("Failed to resolve diamond '{}'", target.diamond))
}

fn load_info(diamond: &ResolvedDiamond) -> Result<DeployedDiamondInfo> {
    let store = DeploymentInfoStore::new(&diamond.paths.deployed_diamond_data_file_path);
    store
        .load()
        .with_context(|| format!("Failed to read {}", store.path().display()))
}

// =============================================================================
// plan
// =============================================================================

fn run_plan(target: &Target, policy: Option<SelectorPolicy>, format: OutputFormat) -> Result<()> {
    let diamond = resolve(target)?;
    let config = diamond.load_facets()?;
    let info = load_info(&diamond)?;
    let source = ArtifactSource::new(&diamond.paths.artifacts_path);
    let policy = policy.unwrap_or_else(|| diamond.selector_policy());
    tracing::debug!(diamond = %diamond.name, ?policy, "Planning cuts from artifacts");

    let plan = compute_cuts(
        &config,
        &info.deployed_facets,
        &[diamond.cut_facet()],
        policy,
        &source,
    )?;

    match format {
        OutputFormat::Table => print_plan_table(&diamond, &info, &plan),
        OutputFormat::Json => {
            let facets: Vec<_> = plan
                .facets
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "facet": f.facet,
                        "from": f.from,
                        "to": f.to,
                        "selectors": f.selectors,
                    })
                })
                .collect();
            let output = serde_json::json!({
                "diamond": diamond.name,
                "network": diamond.network,
                "policy": policy,
                "cuts": plan.cuts(),
                "facets": facets,
                "current": plan.current,
                "pendingCuts": info.pending_cuts,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Quiet => {
            if info.pending_cuts.is_some() {
                println!("pending cut batch not yet applied");
            }
        }
    }
    Ok(())
}

fn print_plan_table(diamond: &ResolvedDiamond, info: &DeployedDiamondInfo, plan: &CutPlan) {
    println!("Diamond: {} ({})", diamond.name, diamond.network);
    match &info.diamond_address {
        Some(address) => println!("Address: {address}"),
        None => println!("Address: not deployed"),
    }
    println!();

    let cuts = plan.cuts();
    if cuts.is_empty() {
        println!("No cuts needed; every facet is at its target version.");
    } else {
        println!("Cuts ({}):", cuts.len());
        println!(
            "  {:<24} {:<8} {:<10} {:<44} Init",
            "Facet", "Action", "Selectors", "Address"
        );
        println!("  {}", "-".repeat(96));
        for cut in &cuts {
            println!(
                "  {:<24} {:<8} {:<10} {:<44} {}",
                truncate(&cut.name, 24),
                cut.action,
                cut.function_selectors.len(),
                truncate(&cut.facet_address, 44),
                cut.init_func.as_deref().unwrap_or("-")
            );
        }
    }

    if !plan.facets.is_empty() {
        println!();
        println!("Facets to deploy ({}):", plan.facets.len());
        for facet in &plan.facets {
            println!("  {} v{} -> v{}", facet.facet, facet.from, facet.to);
        }
    }
    if !plan.current.is_empty() {
        println!();
        println!("Current ({}):", plan.current.len());
        for (name, version) in &plan.current {
            println!("  {name} v{version}");
        }
    }
    if let Some(pending) = &info.pending_cuts {
        println!();
        println!(
            "⚠ Deployment '{}' left {} cut(s) unapplied; the next run submits them first.",
            pending.deployment_id,
            pending.cuts.len()
        );
    }
}

// =============================================================================
// status
// =============================================================================

fn run_status(target: &Target, deployment_id: Option<&str>, format: OutputFormat) -> Result<()> {
    let diamond = resolve(target)?;
    let info = load_info(&diamond)?;
    let steps_dir = &diamond.paths.steps_dir;

    let registries: Vec<DeploymentRegistry> = match deployment_id {
        Some(id) => vec![
            StepRegistry::open(steps_dir, &diamond.name, id)?
                .registry()
                .clone(),
        ],
        None => StepRegistry::list(steps_dir)?,
    };

    match format {
        OutputFormat::Table => print_status_table(&diamond, &info, &registries),
        OutputFormat::Json => {
            let deployments: Vec<_> = registries
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "deploymentId": r.deployment_id,
                        "network": r.network,
                        "startedAt": r.started_at,
                        "completedAt": r.completed_at,
                        "failedAt": r.failed_at,
                        "lastError": r.last_error,
                        "summary": r.summary(),
                    })
                })
                .collect();
            let output = serde_json::json!({
                "schemaVersion": 1,
                "diamond": diamond.name,
                "network": diamond.network,
                "info": info,
                "deployments": deployments,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Quiet => {
            let failed: usize = registries.iter().map(|r| r.summary().failed).sum();
            if failed > 0 || info.pending_cuts.is_some() {
                println!("{failed} failed step(s)");
                if info.pending_cuts.is_some() {
                    println!("pending cut batch not yet applied");
                }
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn print_status_table(
    diamond: &ResolvedDiamond,
    info: &DeployedDiamondInfo,
    registries: &[DeploymentRegistry],
) {
    println!("Diamond: {} ({})", diamond.name, diamond.network);
    println!("Config: {}", diamond.paths.config_file_path.display());
    match &info.diamond_address {
        Some(address) => println!("Address: {address}"),
        None => println!("Address: not deployed"),
    }
    println!();

    if info.deployed_facets.is_empty() {
        println!("No facets deployed.");
    } else {
        println!("Facets ({}):", info.deployed_facets.len());
        println!("  {:<24} {:<8} {:<10} Address", "Name", "Version", "Selectors");
        println!("  {}", "-".repeat(86));
        for (name, record) in &info.deployed_facets {
            println!(
                "  {:<24} {:<8} {:<10} {}",
                truncate(name, 24),
                record.version,
                record.func_selectors.len(),
                record.address
            );
        }
    }

    if !registries.is_empty() {
        println!();
        println!("Deployments ({}):", registries.len());
        println!(
            "  {:<28} {:<20} {:<6} {:<6} {:<6} State",
            "Id", "Started", "Done", "Failed", "Open"
        );
        println!("  {}", "-".repeat(80));
        for registry in registries {
            let summary = registry.summary();
            let state = if registry.completed_at.is_some() && summary.failed == 0 {
                "Complete"
            } else if summary.has_failed || registry.failed_at.is_some() {
                "Failed"
            } else {
                "In progress"
            };
            println!(
                "  {:<28} {:<20} {:<6} {:<6} {:<6} {}",
                truncate(&registry.deployment_id, 28),
                format_millis(registry.started_at),
                summary.completed,
                summary.failed,
                summary.pending,
                state
            );
        }
    }
}

// =============================================================================
// steps / reset
// =============================================================================

fn run_steps(target: &Target, deployment_id: &str, format: OutputFormat) -> Result<()> {
    let diamond = resolve(target)?;
    let steps = StepRegistry::open(&diamond.paths.steps_dir, &diamond.name, deployment_id)?;
    let registry = steps.registry();

    match format {
        OutputFormat::Table => {
            println!("Deployment: {}", registry.deployment_id);
            if registry.steps.is_empty() {
                println!("No steps recorded.");
                return Ok(());
            }
            println!(
                "  {:<40} {:<12} {:<6} {:<20} Tx",
                "Step", "Status", "Retry", "Updated"
            );
            println!("  {}", "-".repeat(100));
            for step in &registry.steps {
                println!(
                    "  {:<40} {:<12} {:<6} {:<20} {}",
                    truncate(&step.step_name, 40),
                    step.status,
                    step.retry_count,
                    step.timestamp.map(format_millis).unwrap_or_else(|| "-".to_string()),
                    step.tx_hash.as_deref().unwrap_or("-")
                );
                if let Some(error) = &step.error {
                    println!("    ⚠ {error}");
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(registry)?),
        OutputFormat::Quiet => {
            let failed = steps.failed_steps();
            if !failed.is_empty() {
                for step in failed {
                    println!("{} failed", step.step_name);
                }
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn run_reset(target: &Target, deployment_id: &str, step: Option<&str>) -> Result<()> {
    let diamond = resolve(target)?;
    let mut steps = StepRegistry::open(&diamond.paths.steps_dir, &diamond.name, deployment_id)?;

    match step {
        Some(name) => {
            let status = steps.step(name).map(|s| s.status);
            if !steps.reset_step(name)? {
                match status {
                    None => anyhow::bail!("Step '{name}' not found in deployment '{deployment_id}'"),
                    Some(status) => anyhow::bail!(
                        "Step '{name}' is {status}; only {} steps can be reset",
                        StepStatus::Failed
                    ),
                }
            }
            println!("✓ Reset '{name}' to pending");
        }
        None => {
            let removed = steps.clear_failed_steps()?;
            if removed == 0 {
                println!("• No failed steps in '{deployment_id}'");
            } else {
                println!("✓ Cleared {removed} failed step(s) from '{deployment_id}'");
            }
        }
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn format_millis(millis: i64) -> String {
    if millis <= 0 {
        return "-".to_string();
    }
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}
