/// A closed range of ray parameters or coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    /// Create a new interval given min and max values.
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True if the interval contains no value.
    pub fn is_empty(&self) -> bool {
        !(self.min <= self.max)
    }

    /// Returns true if x is strictly within the interval (min, max) (exclusive).
    pub fn surrounds(&self, x: f64) -> bool {
        self.min < x && x < self.max
    }

    /// Same interval with the upper end lowered to `max` if it is smaller.
    pub fn with_max(&self, max: f64) -> Interval {
        Interval::new(self.min, self.max.min(max))
    }

    /// An empty interval (min > max, contains nothing).
    pub const EMPTY: Interval = Interval {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_surrounds() {
        let interval = Interval::new(0.0, 10.0);

        // Exclusive bounds - endpoints NOT included
        assert!(!interval.surrounds(0.0));
        assert!(!interval.surrounds(10.0));
        assert!(interval.surrounds(0.1));
        assert!(interval.surrounds(9.9));
    }

    #[test]
    fn test_interval_with_max() {
        let a = Interval::new(0.0, 5.0);
        assert_eq!(a.with_max(2.0), Interval::new(0.0, 2.0));
        assert_eq!(a.with_max(8.0), a);
        assert!(a.with_max(-1.0).is_empty());
    }

    #[test]
    fn test_interval_empty() {
        assert!(Interval::EMPTY.is_empty());
        assert!(!Interval::EMPTY.surrounds(0.0));
        assert!(!Interval::new(-1.0, 1.0).is_empty());
        assert!(Interval::new(f64::NAN, 1.0).is_empty());
    }
}
