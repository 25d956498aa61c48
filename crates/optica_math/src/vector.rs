// Small vector helpers shared by surfaces, the generator and the volume march.

use glam::DVec3;

/// Two vectors orthogonal to `dir` and to each other, both with the length of `dir`.
///
/// `v1 = dir x v0 / |dir|`, so `(v0, v1, dir)` is right-handed.
pub fn orthogonal_basis(dir: DVec3) -> (DVec3, DVec3) {
    let len = dir.length();
    if len == 0.0 {
        return (DVec3::ZERO, DVec3::ZERO);
    }
    let v0 = dir.any_orthogonal_vector().normalize() * len;
    let v1 = dir.cross(v0) / len;
    (v0, v1)
}

/// In-plane perpendicular `(y, -x, 0)` used by two-dimensional layouts.
pub fn perpendicular_xy(dir: DVec3) -> DVec3 {
    DVec3::new(dir.y, -dir.x, 0.0)
}

/// `sign(x) * sqrt(|x|)`
pub fn signed_sqrt(x: f64) -> f64 {
    if x < 0.0 {
        -(-x).sqrt()
    } else {
        x.sqrt()
    }
}

/// Real roots of `a t^2 + 2 b t + c = 0` in ascending order.
///
/// Falls back to the linear solution when `a` vanishes. Returns an empty
/// vector when there is no real root.
pub fn solve_quadratic(a: f64, half_b: f64, c: f64) -> Vec<f64> {
    if a.abs() < 1e-12 {
        if half_b == 0.0 {
            return Vec::new();
        }
        return vec![-c / (2.0 * half_b)];
    }
    let disc = half_b * half_b - a * c;
    if disc < 0.0 {
        return Vec::new();
    }
    let sq = disc.sqrt();
    let t0 = (-half_b - sq) / a;
    let t1 = (-half_b + sq) / a;
    if t0 <= t1 {
        vec![t0, t1]
    } else {
        vec![t1, t0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orthogonal_basis() {
        for dir in [
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, -3.0, 0.0),
            DVec3::new(1.0, 2.0, 3.0),
        ] {
            let (v0, v1) = orthogonal_basis(dir);
            assert!(v0.dot(dir).abs() < 1e-12);
            assert!(v1.dot(dir).abs() < 1e-12);
            assert!(v0.dot(v1).abs() < 1e-12);
            assert!((v0.length() - dir.length()).abs() < 1e-12);
            assert!((v1.length() - dir.length()).abs() < 1e-12);
            assert!(v0.cross(v1).dot(dir) > 0.0);
        }
        assert_eq!(orthogonal_basis(DVec3::ZERO), (DVec3::ZERO, DVec3::ZERO));
    }

    #[test]
    fn test_signed_sqrt() {
        assert_eq!(signed_sqrt(4.0), 2.0);
        assert_eq!(signed_sqrt(-9.0), -3.0);
        assert_eq!(perpendicular_xy(DVec3::new(1.0, 2.0, 5.0)), DVec3::new(2.0, -1.0, 0.0));
    }

    #[test]
    fn test_solve_quadratic() {
        // (t - 1)(t - 3) = t^2 - 4t + 3
        let roots = solve_quadratic(1.0, -2.0, 3.0);
        assert_eq!(roots.len(), 2);
        assert!((roots[0] - 1.0).abs() < 1e-12);
        assert!((roots[1] - 3.0).abs() < 1e-12);

        // Negative leading coefficient keeps ascending order
        let roots = solve_quadratic(-1.0, 2.0, -3.0);
        assert!(roots[0] < roots[1]);

        // Linear: 2t - 4 = 0
        let roots = solve_quadratic(0.0, 1.0, -4.0);
        assert_eq!(roots, vec![2.0]);

        assert!(solve_quadratic(1.0, 0.0, 1.0).is_empty());
    }
}
