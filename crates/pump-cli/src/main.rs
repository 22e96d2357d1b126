//! Binary entry point: parses CLI args, wires a seeded demo scenario together, runs a
//! rolling simulation, and prints a summary (and optionally a baseline comparison
//! report) to stdout.

mod cli;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};
use pump_core::config::DriverConfig;
use pump_core::model::{PumpSpec, SystemConstraints};
use pump_driver::{compare, RollingDriver};
use pump_sources::{NullAdvisor, SeededDataSource};

use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Simulate {
            seed,
            steps,
            config,
            compare_baseline,
        } => simulate(seed, steps, config, compare_baseline).await,
    }
}

async fn simulate(
    seed: u64,
    steps: u64,
    config_path: Option<std::path::PathBuf>,
    compare_baseline: bool,
) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            info!(path = %path.display(), "loading driver config from file");
            DriverConfig::from_toml_file(path)?
        }
        None => DriverConfig::default(),
    };

    let pumps = PumpSpec::default_fleet();
    let constraints = SystemConstraints::default();
    let source = Arc::new(SeededDataSource::new(seed, config.time_step_minutes));
    let advisor = Arc::new(NullAdvisor);

    let driver = RollingDriver::new(
        source.clone(),
        source.clone(),
        advisor,
        pumps,
        constraints,
        config,
    );
    let driver = if compare_baseline {
        driver.with_baseline(source.clone())
    } else {
        driver
    };

    let start = Utc::now();
    let cancel = tokio_util::sync::CancellationToken::new();
    let (handle, mut records) = driver.run(start, steps, cancel);

    let mut collected = Vec::with_capacity(steps as usize);
    while let Some(record) = records.recv().await {
        info!(
            step = record.step_index,
            mode = %record.mode,
            risk = ?record.risk_level,
            cost_c = record.total_cost_c,
            violations = record.l1_violations,
            "tick complete"
        );
        collected.push(record);
    }

    match handle.await {
        Ok(Ok(_final_state)) => info!(steps = collected.len(), "simulation finished"),
        Ok(Err(err)) => {
            error!(error = %err, "simulation aborted on an invariant breach");
            return Err(err.into());
        }
        Err(join_err) => {
            error!(error = %join_err, "driver task panicked");
            return Err(join_err.into());
        }
    }

    let total_cost_c: f64 = collected.iter().map(|r| r.total_cost_c).sum();
    let total_energy_kwh: f64 = collected.iter().map(|r| r.total_energy_kwh).sum();
    let total_violations: usize = collected.iter().map(|r| r.l1_violations).sum();
    println!(
        "ran {} steps: total cost {:.2} c, total energy {:.2} kWh, {} L1 violations",
        collected.len(),
        total_cost_c,
        total_energy_kwh,
        total_violations
    );

    if compare_baseline {
        let report = compare(&collected);
        println!(
            "energy: optimized {:.2} kWh vs baseline {:.2} kWh ({:+.1}%)",
            report.total_energy_kwh.optimized, report.total_energy_kwh.baseline, report.total_energy_kwh.delta_pct
        );
        println!(
            "cost: optimized {:.2} c vs baseline {:.2} c ({:+.1}%)",
            report.total_cost_c.optimized, report.total_cost_c.baseline, report.total_cost_c.delta_pct
        );
    }

    Ok(())
}
