//! Focus statistics of a traced batch.

use optica_math::{DMat3, DVec3, Ray};
use optica_tracer::TraceBatch;

/// Determinant below which the rays are treated as parallel.
const MIN_DETERMINANT: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusStats {
    /// Rays used for the estimate
    pub rays: usize,
    /// Point closest to all rays in the least-squares sense
    pub focus: Option<DVec3>,
    /// RMS distance of the rays from `focus`
    pub rms_spread: f64,
    /// Mean intensity left at the end of the traces
    pub mean_intensity: f64,
}

/// Least-squares intersection of the final ray lines.
///
/// Solves `sum(I - d d^T) x = sum((I - d d^T) p)` over unit directions `d`
/// and points `p`. Returns `None` for fewer than two rays or parallel rays.
pub fn nearest_point(lines: &[Ray]) -> Option<DVec3> {
    if lines.len() < 2 {
        return None;
    }
    let mut a = DMat3::ZERO;
    let mut b = DVec3::ZERO;
    for line in lines {
        let d = line.direction.normalize_or_zero();
        let projector = DMat3::IDENTITY - outer(d, d);
        a += projector;
        b += projector * line.origin;
    }
    if a.determinant().abs() < MIN_DETERMINANT {
        return None;
    }
    Some(a.inverse() * b)
}

fn outer(u: DVec3, v: DVec3) -> DMat3 {
    DMat3::from_cols(u * v.x, u * v.y, u * v.z)
}

/// Statistics of the accepted rays that left the scene.
pub fn analyze(batch: &TraceBatch) -> FocusStats {
    let lines: Vec<Ray> = batch
        .accepted()
        .filter(|r| r.outcome.termination == optica_tracer::Termination::Escaped)
        .map(|r| Ray::new(r.end.position, r.end.direction))
        .collect();
    let focus = nearest_point(&lines);
    let rms_spread = match focus {
        Some(point) if !lines.is_empty() => {
            let sum: f64 = lines
                .iter()
                .map(|l| l.line_distance_squared(point))
                .sum();
            (sum / lines.len() as f64).sqrt()
        }
        _ => 0.0,
    };
    let accepted = batch.accepted().count();
    let mean_intensity = if accepted == 0 {
        0.0
    } else {
        batch.accepted().map(|r| r.end.intensity).sum::<f64>() / accepted as f64
    };
    FocusStats {
        rays: lines.len(),
        focus,
        rms_spread,
        mean_intensity,
    }
}
