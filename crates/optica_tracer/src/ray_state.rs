//! Per-ray state carried from generation to termination.

use optica_math::{DVec2, DVec3};

const INV_255: f32 = 1.0 / 255.0;

/// State of one ray.
///
/// The direction is not kept normalized between interactions.
#[derive(Debug, Clone, PartialEq)]
pub struct RayState {
    pub position: DVec3,
    pub direction: DVec3,
    /// Texture coordinate at the emission point
    pub uv: DVec2,
    /// RGBA colour, channels in `[0, 1]`
    pub color: [f32; 4],
    /// Remaining intensity after volume attenuation
    pub intensity: f64,
    /// Interactions so far
    pub bounces: usize,
    /// Interaction points, when recording is enabled
    pub trajectory: Option<Vec<DVec3>>,
}

impl Default for RayState {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            direction: DVec3::ZERO,
            uv: DVec2::ZERO,
            color: [1.0; 4],
            intensity: 1.0,
            bounces: 0,
            trajectory: None,
        }
    }
}

impl RayState {
    pub fn new(position: DVec3, direction: DVec3) -> Self {
        Self {
            position,
            direction,
            ..Default::default()
        }
    }

    /// Replace the colour with an 8 bit RGBA value.
    pub fn set_color(&mut self, rgba: [u8; 4]) {
        self.color = rgba.map(|c| c as f32 * INV_255);
    }

    /// Colour as 8 bit RGBA.
    pub fn color_u8(&self) -> [u8; 4] {
        self.color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
    }

    /// Multiply every channel by a filter colour.
    pub fn multiply_color(&mut self, filter: [u8; 4]) {
        for (c, f) in self.color.iter_mut().zip(filter) {
            *c *= f as f32 * INV_255;
        }
    }

    /// Blend a filter colour behind the current colour, weighted by the
    /// filter alpha and the coverage still left.
    pub fn mix_color(&mut self, filter: [u8; 4]) {
        let weight = (1.0 - self.color[3]).max(0.0) * filter[3] as f32 * INV_255;
        for k in 0..3 {
            self.color[k] += filter[k] as f32 * INV_255 * weight;
        }
        self.color[3] += weight;
    }

    /// Append the current position to the trajectory, if recording.
    pub fn record(&mut self) {
        if let Some(trajectory) = &mut self.trajectory {
            trajectory.push(self.position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_conversion() {
        let mut ray = RayState::default();
        ray.set_color([255, 0, 51, 255]);
        assert_eq!(ray.color_u8(), [255, 0, 51, 255]);
        ray.multiply_color([127, 255, 255, 0]);
        assert!((ray.color[0] - 127.0 / 255.0).abs() < 1e-6);
        assert_eq!(ray.color[3], 0.0);
    }

    #[test]
    fn test_mix_fills_remaining_coverage() {
        let mut ray = RayState::default();
        ray.color = [0.0, 0.0, 0.0, 0.5];
        ray.mix_color([255, 0, 0, 255]);
        assert!((ray.color[0] - 0.5).abs() < 1e-6);
        assert!((ray.color[3] - 1.0).abs() < 1e-6);

        // Fully covered rays are unchanged
        ray.mix_color([0, 255, 0, 255]);
        assert!(ray.color[1].abs() < 1e-6);
    }

    #[test]
    fn test_record_only_when_enabled() {
        let mut ray = RayState::new(DVec3::X, DVec3::Y);
        ray.record();
        assert!(ray.trajectory.is_none());
        ray.trajectory = Some(Vec::new());
        ray.record();
        assert_eq!(ray.trajectory, Some(vec![DVec3::X]));
    }
}
