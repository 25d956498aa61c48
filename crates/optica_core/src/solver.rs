//! Steady-state diffusion by successive over-relaxation.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{OpticsError, OpticsResult};

/// Settings of the diffusion solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: usize,
    /// Largest change of a sweep at which the solution counts as converged
    pub tolerance: f64,
    /// Over-relaxation factor in `(0, 2)`
    pub omega: f64,
    /// Sweeps between two polls of the cancellation flag
    pub poll_interval: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20_000,
            tolerance: 1e-7,
            omega: 1.8,
            poll_interval: 32,
        }
    }
}

/// Solve Laplace's equation on a `dims` grid in place.
///
/// Voxels flagged in `given` keep their value; the others relax towards the
/// mean of their neighbours. Neighbours outside the grid are left out, which
/// gives zero flux across the border. Returns the number of sweeps.
pub fn solve_diffusion(
    dims: [usize; 3],
    values: &mut [f64],
    given: &[bool],
    config: &SolverConfig,
    cancel: Option<&AtomicBool>,
) -> OpticsResult<usize> {
    let [w, h, d] = dims;
    let len = w * h * d;
    if len == 0 || values.len() < len || given.len() < len {
        return Err(OpticsError::EmptyVolume);
    }
    if given.iter().take(len).all(|&g| g) {
        return Ok(0);
    }

    let strides = [1, w, w * h];
    let poll = config.poll_interval.max(1);
    let mut residual = f64::INFINITY;

    for iteration in 0..config.max_iterations {
        if iteration % poll == 0 && cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(OpticsError::Cancelled);
        }

        residual = 0.0;
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    let i = (z * h + y) * w + x;
                    if given[i] {
                        continue;
                    }
                    let coords = [x, y, z];
                    let mut sum = 0.0;
                    let mut count = 0;
                    for axis in 0..3 {
                        if coords[axis] > 0 {
                            sum += values[i - strides[axis]];
                            count += 1;
                        }
                        if coords[axis] + 1 < dims[axis] {
                            sum += values[i + strides[axis]];
                            count += 1;
                        }
                    }
                    if count == 0 {
                        continue;
                    }
                    let delta = sum / count as f64 - values[i];
                    values[i] += config.omega * delta;
                    residual = residual.max(delta.abs());
                }
            }
        }

        if residual < config.tolerance {
            log::debug!("Diffusion converged after {} sweeps", iteration + 1);
            return Ok(iteration + 1);
        }
    }

    Err(OpticsError::NotConverged {
        iterations: config.max_iterations,
        residual,
    })
}
