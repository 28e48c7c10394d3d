use std::path::PathBuf;
use std::sync::Arc;

use em_core::prelude::*;
use em_engine::{
    MetricsSnapshot,
    SimulationClock,
    TickReport,
};
use tokio::sync::watch;
use tracing::*;

use crate::output::{
    render,
    OutputFormat,
};
use crate::scenario::Scenario;

#[derive(clap::Args)]
pub struct Args {
    #[arg(help = "path to a YAML scenario file")]
    pub scenario: PathBuf,

    #[arg(long, default_value_t = 60, help = "number of ticks to run")]
    pub ticks: u64,

    #[arg(long, help = "simulated milliseconds per tick (overrides the scenario clock)")]
    pub step_ms: Option<i64>,

    #[arg(long, help = "tick in wall-clock time until --ticks have elapsed or ctrl-c")]
    pub realtime: bool,

    #[arg(long, help = "only print snapshots for these node ids")]
    pub node: Vec<String>,

    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,
}

pub async fn cmd(args: &Args) -> EmptyResult {
    let scenario = Scenario::load(&args.scenario)?;
    let registry = Arc::new(scenario.build_registry()?);
    let clock = Arc::new(SimulationClock::new(Arc::clone(&registry), scenario.clock.clone()));
    info!(nodes = registry.len(), ticks = args.ticks, "starting scenario");

    if args.realtime {
        run_realtime(&clock, args.ticks).await?;
    } else {
        let faulted = run_fast(&clock, args.ticks, args.step_ms);
        if faulted > 0 {
            warn!(faulted, "node faults occurred during the run");
        }
    }

    let snapshots: Vec<MetricsSnapshot> = registry
        .active_handles()
        .iter()
        .filter(|h| args.node.is_empty() || args.node.iter().any(|id| id == h.id()))
        .map(|h| h.metrics_snapshot())
        .collect();
    println!("{}", render(&snapshots, args.format)?);
    Ok(())
}

/// Step the clock back to back; returns the number of node faults seen.
fn run_fast(clock: &SimulationClock, ticks: u64, step_ms: Option<i64>) -> usize {
    clock.start();
    let mut faulted = 0;
    for _ in 0..ticks {
        let report: Option<TickReport> = match step_ms {
            Some(step) => clock.advance_by(step),
            None => clock.tick(),
        };
        faulted += report.map_or(0, |r| r.faulted);
    }
    clock.stop();
    faulted
}

async fn run_realtime(clock: &Arc<SimulationClock>, ticks: u64) -> EmptyResult {
    let (tx, rx) = watch::channel(false);
    let runner = {
        let clock = Arc::clone(clock);
        tokio::spawn(async move { clock.run(rx).await })
    };

    let period = clock.config().tick_period();
    let budget = period.saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX));
    tokio::select! {
        () = tokio::time::sleep(budget) => {},
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("interrupted");
        },
    }

    tx.send(true)?;
    runner.await?;
    Ok(())
}
