use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use longops_registry::{
    logging, DefaultPolicy, EventTypes, OperationEvent, OperationFilter, OperationRegistry,
    Principal, RegistryConfig, RegistryError, StateViolation,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "longops-demo",
    about = "Runs simulated batch workers against an operation registry and cancels one"
)]
struct Cli {
    /// Number of concurrent workers
    #[arg(long, env = "LONGOPS_WORKERS", default_value_t = 4)]
    workers: usize,
    /// Units of work per worker
    #[arg(long, default_value_t = 20)]
    units: u64,
    /// Milliseconds spent on each unit
    #[arg(long, default_value_t = 50)]
    unit_ms: u64,
    /// Role allowed to view and cancel everyone's work
    #[arg(long, env = "LONGOPS_ADMIN_ROLE", default_value = "admin")]
    admin_role: String,
    /// Registry configuration as JSON; overrides --admin-role
    #[arg(long, env = "LONGOPS_CONFIG")]
    config: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn load_config(cli: &Cli) -> Result<RegistryConfig> {
    let Some(path) = cli.config.as_ref() else {
        return Ok(RegistryConfig {
            default_policy: DefaultPolicy::OwnerOrRole {
                role: cli.admin_role.clone(),
            },
            ..RegistryConfig::default()
        });
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid registry config {}", path.display()))
}

fn run_worker(registry: &OperationRegistry, index: usize, units: u64, unit: Duration) -> Result<(), RegistryError> {
    let owner = Principal::new(format!("user-{index}"));
    let guard = registry.register_guarded(
        &format!("batch.demo.{index}"),
        &format!("Demo batch #{index}"),
        Some(owner),
        Some(units),
        None,
    )?;

    for done in 1..=units {
        if guard.is_canceled() {
            info!(operation = %guard.identifier(), done = done - 1, "worker stopping after cancel");
            break;
        }
        thread::sleep(unit);
        match guard.report_progress(done, None) {
            Ok(()) => {}
            Err(err) if err.state_violation() == Some(StateViolation::Canceled) => break,
            Err(err) => return Err(err),
        }
    }
    guard.complete()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log, cli.json_logs)?;

    let registry = Arc::new(OperationRegistry::new(load_config(&cli)?));
    registry.add_listener(
        Arc::new(|event: &OperationEvent| -> anyhow::Result<()> {
            info!(
                event = %event.event_type,
                operation = %event.operation.identifier,
                completed = event.operation.completed_units_of_work,
                progress = ?event.operation.progress_ratio(),
                "lifecycle event"
            );
            Ok(())
        }),
        EventTypes::ALL,
        "batch.",
    );

    let unit = Duration::from_millis(cli.unit_ms);
    let handles: Vec<_> = (0..cli.workers)
        .map(|index| {
            let registry = Arc::clone(&registry);
            let units = cli.units;
            thread::spawn(move || run_worker(&registry, index, units, unit))
        })
        .collect();

    thread::sleep(unit * 3);
    let admin = Principal::new("operator").with_role(cli.admin_role.clone());
    let active = registry.sorted_active_operations(&OperationFilter::all(), Some(&admin));
    println!("{}", serde_json::to_string_pretty(&active)?);

    if let Some(first) = active.first() {
        match registry.cancel_by_id(&first.identifier.to_string(), Some(&admin)) {
            Ok(op) => info!(operation = %op.identifier(), code = op.code(), "requested cancel"),
            // The worker may have finished in the meantime.
            Err(err) => warn!(operation = %first.identifier, error = %err, "cancel failed"),
        }
    }

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))??;
    }
    info!(active = registry.active_count(), "all workers finished");
    Ok(())
}
