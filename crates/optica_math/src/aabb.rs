use crate::{DVec3, Interval, Ray};

/// Axis-aligned bounding box.
///
/// Used for the unit cube of volume objects and for mesh bounds.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub x: Interval,
    pub y: Interval,
    pub z: Interval,
}

impl Aabb {
    /// Create a new AABB from three intervals.
    pub fn new(x: Interval, y: Interval, z: Interval) -> Self {
        Self { x, y, z }
    }

    /// Create an AABB from two corner points.
    pub fn from_points(a: DVec3, b: DVec3) -> Self {
        let lo = a.min(b);
        let hi = a.max(b);
        Self {
            x: Interval::new(lo.x, hi.x),
            y: Interval::new(lo.y, hi.y),
            z: Interval::new(lo.z, hi.z),
        }
    }

    /// Smallest box containing every point. Empty for an empty slice.
    pub fn enclosing(points: &[DVec3]) -> Self {
        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        for p in points {
            min = min.min(*p);
            max = max.max(*p);
        }
        Self {
            x: Interval::new(min.x, max.x),
            y: Interval::new(min.y, max.y),
            z: Interval::new(min.z, max.z),
        }
    }

    /// The cube `[-1, 1]^3`.
    pub const UNIT_CUBE: Aabb = Aabb {
        x: Interval { min: -1.0, max: 1.0 },
        y: Interval { min: -1.0, max: 1.0 },
        z: Interval { min: -1.0, max: 1.0 },
    };

    pub const EMPTY: Aabb = Aabb {
        x: Interval::EMPTY,
        y: Interval::EMPTY,
        z: Interval::EMPTY,
    };

    /// Get the interval for a specific axis (0=X, 1=Y, 2=Z).
    pub fn axis_interval(&self, n: usize) -> Interval {
        match n {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn min_point(&self) -> DVec3 {
        DVec3::new(self.x.min, self.y.min, self.z.min)
    }

    pub fn max_point(&self) -> DVec3 {
        DVec3::new(self.x.max, self.y.max, self.z.max)
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty() || self.y.is_empty() || self.z.is_empty()
    }

    /// Returns the center point of the bounding box.
    pub fn centroid(&self) -> DVec3 {
        (self.min_point() + self.max_point()) * 0.5
    }

    /// Slab test.
    ///
    /// Returns the sub-interval of `ray_t` during which the ray is inside the
    /// box, or `None` if it never is.
    pub fn clip(&self, r: &Ray, mut ray_t: Interval) -> Option<Interval> {
        for axis in 0..3 {
            let slab = self.axis_interval(axis);
            let adinv = 1.0 / r.direction[axis];
            let mut t0 = (slab.min - r.origin[axis]) * adinv;
            let mut t1 = (slab.max - r.origin[axis]) * adinv;
            if adinv < 0.0 {
                std::mem::swap(&mut t0, &mut t1);
            }
            // A zero direction component yields NaN when the origin sits on
            // the slab plane; treat that as inside.
            if !t0.is_nan() {
                ray_t.min = t0.max(ray_t.min);
            }
            if !t1.is_nan() {
                ray_t.max = t1.min(ray_t.max);
            }
            if ray_t.max < ray_t.min {
                return None;
            }
        }
        Some(ray_t)
    }

    /// Test if a ray intersects this AABB within the given interval.
    pub fn hit(&self, r: &Ray, ray_t: Interval) -> bool {
        self.clip(r, ray_t).is_some()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Aabb::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_from_points() {
        let aabb = Aabb::from_points(DVec3::new(10.0, 0.0, 10.0), DVec3::new(0.0, 10.0, 0.0));

        assert_eq!(aabb.x.min, 0.0);
        assert_eq!(aabb.x.max, 10.0);
        assert_eq!(aabb.y.min, 0.0);
        assert_eq!(aabb.z.max, 10.0);
        assert_eq!(aabb.centroid(), DVec3::splat(5.0));
    }

    #[test]
    fn test_aabb_enclosing() {
        let points = [
            DVec3::new(-1.0, -2.0, -3.0),
            DVec3::new(4.0, 5.0, 6.0),
            DVec3::ZERO,
        ];
        let aabb = Aabb::enclosing(&points);
        assert_eq!(aabb.min_point(), DVec3::new(-1.0, -2.0, -3.0));
        assert_eq!(aabb.max_point(), DVec3::new(4.0, 5.0, 6.0));
        assert!(Aabb::enclosing(&[]).is_empty());
    }

    #[test]
    fn test_aabb_hit() {
        let aabb = Aabb::UNIT_CUBE;

        // Ray pointing at center
        let ray = Ray::new(DVec3::new(0.0, 0.0, -5.0), DVec3::new(0.0, 0.0, 1.0));
        assert!(aabb.hit(&ray, Interval::new(0.0, 100.0)));

        // Ray pointing away
        let ray = Ray::new(DVec3::new(0.0, 0.0, -5.0), DVec3::new(0.0, 0.0, -1.0));
        assert!(!aabb.hit(&ray, Interval::new(0.0, 100.0)));

        // Ray missing the box
        let ray = Ray::new(DVec3::new(10.0, 0.0, 0.0), DVec3::new(0.0, 0.0, 1.0));
        assert!(!aabb.hit(&ray, Interval::new(0.0, 100.0)));
    }

    #[test]
    fn test_aabb_clip_interval() {
        let ray = Ray::new(DVec3::new(-3.0, 0.5, 0.0), DVec3::new(2.0, 0.0, 0.0));
        let everything = Interval::new(f64::NEG_INFINITY, f64::INFINITY);
        let t = Aabb::UNIT_CUBE.clip(&ray, everything).unwrap();
        assert!((t.min - 1.0).abs() < 1e-12);
        assert!((t.max - 2.0).abs() < 1e-12);

        // Origin inside the box
        let ray = Ray::new(DVec3::ZERO, DVec3::new(1.0, 1.0, 0.0));
        let t = Aabb::UNIT_CUBE.clip(&ray, Interval::new(0.0, f64::INFINITY)).unwrap();
        assert_eq!(t.min, 0.0);
        assert!((t.max - 1.0).abs() < 1e-12);
    }
}
