// Transform utilities for DMat4
//
// glam::DMat4 already provides transform_point3(), transform_vector3() and inverse().

use crate::Aabb;
use glam::{DMat3, DMat4, DVec3, DVec4};

/// Extension trait for DMat4 with the affine helpers optical objects need
pub trait DMat4Ext {
    /// Build an affine matrix whose columns are the three axis vectors and the translation.
    fn from_basis(x_axis: DVec3, y_axis: DVec3, z_axis: DVec3, translation: DVec3) -> DMat4;

    /// Transform a surface normal (inverse transpose of the linear part).
    /// The result is not normalized.
    fn transform_normal3(&self, normal: DVec3) -> DVec3;

    /// The upper-left 3x3 linear part.
    fn linear_part(&self) -> DMat3;

    /// Transform an axis-aligned bounding box.
    /// Computes the bounding box of all 8 transformed corners.
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb;
}

impl DMat4Ext for DMat4 {
    fn from_basis(x_axis: DVec3, y_axis: DVec3, z_axis: DVec3, translation: DVec3) -> DMat4 {
        DMat4::from_cols(
            x_axis.extend(0.0),
            y_axis.extend(0.0),
            z_axis.extend(0.0),
            DVec4::new(translation.x, translation.y, translation.z, 1.0),
        )
    }

    fn transform_normal3(&self, normal: DVec3) -> DVec3 {
        self.linear_part().inverse().transpose() * normal
    }

    fn linear_part(&self) -> DMat3 {
        DMat3::from_mat4(*self)
    }

    fn transform_aabb(&self, aabb: &Aabb) -> Aabb {
        let lo = aabb.min_point();
        let hi = aabb.max_point();

        let corners: Vec<DVec3> = (0..8)
            .map(|i| {
                DVec3::new(
                    if i & 1 == 0 { lo.x } else { hi.x },
                    if i & 2 == 0 { lo.y } else { hi.y },
                    if i & 4 == 0 { lo.z } else { hi.z },
                )
            })
            .map(|corner| self.transform_point3(corner))
            .collect();

        Aabb::enclosing(&corners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_point3_translation() {
        let mat = DMat4::from_translation(DVec3::new(10.0, 20.0, 30.0));
        let point = DVec3::new(1.0, 2.0, 3.0);

        assert_eq!(mat.transform_point3(point), DVec3::new(11.0, 22.0, 33.0));
        // Translation must not affect vectors
        assert_eq!(mat.transform_vector3(point), point);
    }

    #[test]
    fn test_from_basis() {
        let mat = DMat4::from_basis(
            DVec3::new(2.0, 0.0, 0.0),
            DVec3::new(0.0, 3.0, 0.0),
            DVec3::new(0.0, 0.0, 4.0),
            DVec3::new(1.0, 1.0, 1.0),
        );
        let p = mat.transform_point3(DVec3::new(1.0, 1.0, 1.0));
        assert_eq!(p, DVec3::new(3.0, 4.0, 5.0));
    }

    #[test]
    fn test_transform_normal_nonuniform_scale() {
        let mat = DMat4::from_scale(DVec3::new(2.0, 1.0, 1.0));
        // Plane x + y = 0 has normal (1,1,0); after scaling x by 2 the plane
        // becomes x/2 + y = 0 with normal (0.5,1,0).
        let n = mat.transform_normal3(DVec3::new(1.0, 1.0, 0.0));
        assert!((n - DVec3::new(0.5, 1.0, 0.0)).length() < 1e-12);

        let tangent = mat.transform_vector3(DVec3::new(1.0, -1.0, 0.0));
        assert!(n.dot(tangent).abs() < 1e-12);
    }

    #[test]
    fn test_transform_aabb_rotation() {
        let mat = DMat4::from_rotation_z(std::f64::consts::FRAC_PI_4);
        let aabb = mat.transform_aabb(&Aabb::UNIT_CUBE);
        let s = 2.0_f64.sqrt();
        assert!((aabb.x.max - s).abs() < 1e-12);
        assert!((aabb.y.min + s).abs() < 1e-12);
        assert!((aabb.z.max - 1.0).abs() < 1e-12);
    }
}
