//! Node-count sweeps.
//!
//! Every point is an independent [`Simulation`](crate::runner::Simulation)
//! built from scratch, so points run in parallel on the rayon pool.

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::report::SimulationReport;
use crate::runner::Simulation;
use crate::theoretical::{saturation_estimate, SaturationEstimate};
use crate::trace::TraceSink;
use rayon::prelude::*;
use serde::Serialize;
use std::ops::RangeInclusive;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SweepPoint {
    pub node_count: usize,
    pub report: SimulationReport,
    /// Saturated-DCF collision probability for the same contender count.
    pub saturation: SaturationEstimate,
}

/// Run `base` once per node count. Results are ordered by node count; the
/// first failing configuration aborts the sweep.
pub fn run_sweep(
    base: &SimulationConfig,
    node_counts: RangeInclusive<usize>,
) -> Result<Vec<SweepPoint>> {
    run_sweep_with(base, node_counts, |_| Ok(None))
}

/// Like [`run_sweep`], with `make_sink` supplying a trace sink per node count.
pub fn run_sweep_with<F>(
    base: &SimulationConfig,
    node_counts: RangeInclusive<usize>,
    make_sink: F,
) -> Result<Vec<SweepPoint>>
where
    F: Fn(usize) -> Result<Option<Box<dyn TraceSink>>> + Sync,
{
    let counts: Vec<usize> = node_counts.collect();
    debug!(points = counts.len(), "Starting sweep");
    counts
        .into_par_iter()
        .map(|node_count| run_point(base, node_count, &make_sink))
        .collect()
}

fn run_point<F>(base: &SimulationConfig, node_count: usize, make_sink: &F) -> Result<SweepPoint>
where
    F: Fn(usize) -> Result<Option<Box<dyn TraceSink>>>,
{
    let config = base.clone().with_node_count(node_count);
    // Every node but the server contends.
    let contenders = node_count.saturating_sub(1).max(1);
    let saturation = saturation_estimate(
        contenders,
        config.mac.cw_min,
        config.mac.max_backoff_stage(),
    )?;
    let mut simulation = Simulation::new(config)?;
    if let Some(sink) = make_sink(node_count)? {
        simulation = simulation.with_trace_sink(sink);
    }
    let report = simulation.run()?;
    Ok(SweepPoint {
        node_count,
        report,
        saturation,
    })
}
