//! Ray-object intersection seam.

use optica_math::{DVec2, DVec3, Interval, Ray};

/// Record of a ray-object intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Ray parameter of the intersection
    pub t: f64,
    /// Point of intersection
    pub point: DVec3,
    /// Object normal at the intersection, not normalized and not flipped
    /// towards the ray
    pub normal: DVec3,
    /// Texture coordinate, when the object defines one
    pub uv: Option<DVec2>,
}

impl Hit {
    pub fn new(t: f64, point: DVec3, normal: DVec3) -> Self {
        Self {
            t,
            point,
            normal,
            uv: None,
        }
    }

    pub fn with_uv(mut self, uv: DVec2) -> Self {
        self.uv = Some(uv);
        self
    }
}

/// Trait for objects that can be hit by rays.
pub trait Intersect: Send + Sync {
    /// Nearest intersection with parameter inside `ray_t`, if any.
    fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<Hit>;
}
