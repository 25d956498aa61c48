use crate::DVec3;

/// A ray in 3D space with an origin and a direction.
///
/// The direction is not required to be normalized; `at(t)` is linear in `t`
/// either way, and intersection routines document whether they expect unit
/// length.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: DVec3,
    pub direction: DVec3,
}

impl Ray {
    /// Create a new ray.
    pub fn new(origin: DVec3, direction: DVec3) -> Self {
        Self { origin, direction }
    }

    /// Get the point along the ray at parameter t.
    ///
    /// Returns: origin + t * direction
    #[inline]
    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.direction * t
    }

    /// Copy of this ray with a unit-length direction.
    ///
    /// Zero directions stay zero.
    pub fn normalized(&self) -> Self {
        Self::new(self.origin, self.direction.normalize_or_zero())
    }

    /// Squared distance from `point` to the infinite line carrying this ray.
    pub fn line_distance_squared(&self, point: DVec3) -> f64 {
        let dir = self.direction.normalize_or_zero();
        let offset = point - self.origin;
        (offset - dir * offset.dot(dir)).length_squared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_creation() {
        let origin = DVec3::new(1.0, 2.0, 3.0);
        let direction = DVec3::new(0.0, 1.0, 0.0);
        let ray = Ray::new(origin, direction);

        assert_eq!(ray.origin, origin);
        assert_eq!(ray.direction, direction);
    }

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(DVec3::ZERO, DVec3::X);

        assert_eq!(ray.at(0.0), DVec3::ZERO);
        assert_eq!(ray.at(1.0), DVec3::X);
        assert_eq!(ray.at(-1.0), DVec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_ray_normalized() {
        let ray = Ray::new(DVec3::ONE, DVec3::new(0.0, 3.0, 4.0)).normalized();
        assert!((ray.direction.length() - 1.0).abs() < 1e-12);

        let zero = Ray::new(DVec3::ONE, DVec3::ZERO).normalized();
        assert_eq!(zero.direction, DVec3::ZERO);
    }

    #[test]
    fn test_line_distance() {
        let ray = Ray::new(DVec3::new(-10.0, 0.0, 0.0), DVec3::new(2.0, 0.0, 0.0));
        let d = ray.line_distance_squared(DVec3::new(5.0, 3.0, 4.0));
        assert!((d - 25.0).abs() < 1e-9);
    }
}
