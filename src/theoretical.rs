/*
    Saturation fixed point of the DCF:
    p   = 1 - (1 - tau)^(n - 1)
    tau = 2 / (1 + W + p * W * sum_{i < m} (2p)^i)
 */

use crate::error::{Result, SimError};
use serde::Serialize;

const TOLERANCE: f64 = 0.0001;
const MAX_ITERATIONS: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SaturationEstimate {
    /// Per-slot transmission probability of one node.
    pub tau: f64,
    /// Probability that a transmitted frame collides.
    pub collision_probability: f64,
    pub success_probability: f64,
}

/// Solve the fixed point for `num_nodes` saturated nodes with minimum window
/// `cw_min` and `max_stage` doublings.
pub fn saturation_estimate(
    num_nodes: usize,
    cw_min: u32,
    max_stage: u32,
) -> Result<SaturationEstimate> {
    if num_nodes == 0 {
        return Err(SimError::config("saturation estimate needs at least one node"));
    }
    if cw_min == 0 {
        return Err(SimError::config("saturation estimate needs cw_min > 0"));
    }
    let w = cw_min as f64;
    let m = max_stage as i32;

    let mut p_current: f64 = 0.5;
    let mut tau = 0.0;
    for _ in 0..MAX_ITERATIONS {
        let stage_sum = if (1.0 - 2.0 * p_current).abs() > f64::EPSILON {
            (1.0 - (2.0 * p_current).powi(m)) / (1.0 - 2.0 * p_current)
        } else {
            m as f64
        };
        tau = 2.0 / (1.0 + w + p_current * w * stage_sum);
        let p_next = 1.0 - (1.0 - tau).powf(num_nodes as f64 - 1.0);
        let diff = (p_current - p_next).abs();
        p_current = p_next;
        if diff <= TOLERANCE {
            break;
        }
    }

    Ok(SaturationEstimate {
        tau,
        collision_probability: p_current,
        success_probability: 1.0 - p_current,
    })
}
