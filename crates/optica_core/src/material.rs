//! Interaction attributes shared by surfaces and meshes.

use std::sync::Arc;

use optica_math::DVec3;

use crate::column::{Column, Value};
use crate::error::OpticsResult;
use crate::texture::{Texture, TextureMapping};

named_enum! {
    /// What happens to a ray that hits an object.
    pub enum MaterialType: "material" {
        Refraction => "Refraction",
        Reflection => "Reflection",
        /// Stops the ray, or filters its colour when semi-transparent
        Absorption => "Absorption",
        /// Stops the ray; it is never accepted as an endpoint
        Deletion => "Deletion",
        /// Scatters into a random direction around the normal
        Random => "Random",
    }
}

named_enum! {
    /// How a semi-transparent absorber combines its colour with the ray's.
    pub enum AlphaCalculation: "alpha calculation" {
        Ignore => "Ignore",
        Mult => "Mult",
        Mix => "Mix",
    }
}

named_enum! {
    /// Where a surface's position sits relative to its geometric midpoint.
    pub enum AnchorPoint: "anchor point" {
        /// The midpoint is the position
        NormalIntersection => "Normal Intersection",
        /// The midpoint is `position - direction`
        LensCurve => "Lens Curve",
        /// The midpoint is `position + direction / 2`
        MirrorFocal => "Mirror Focal",
    }
}

impl AnchorPoint {
    pub fn midpoint(self, position: DVec3, direction: DVec3) -> DVec3 {
        match self {
            AnchorPoint::NormalIntersection => position,
            AnchorPoint::LensCurve => position - direction,
            AnchorPoint::MirrorFocal => position + direction * 0.5,
        }
    }
}

/// Refract `direction` at a surface with (unnormalized) normal `normal`.
///
/// The normal points into the medium with `ior0`. `iorq = (ior0/ior1)^2 - 1`
/// applies when the ray travels along the normal, `inv_iorq` for the reverse
/// direction. Total internal reflection falls back to a mirror reflection.
/// The result is not normalized.
pub fn refract(direction: DVec3, normal: DVec3, iorq: f64, inv_iorq: f64) -> DVec3 {
    let c = direction.dot(normal);
    let nn = normal.length_squared();
    if c == 0.0 || nn == 0.0 {
        return direction;
    }
    let tmp = if c > 0.0 { iorq } else { inv_iorq } * nn / (c * c) + 1.0;
    let factor = if tmp > 0.0 { tmp.sqrt() - 1.0 } else { -2.0 };
    direction + normal * (factor * c / nn)
}

/// Mirror `direction` about the plane with (unnormalized) normal `normal`.
pub fn reflect(direction: DVec3, normal: DVec3) -> DVec3 {
    let nn = normal.length_squared();
    if nn == 0.0 {
        return direction;
    }
    direction - normal * (2.0 * direction.dot(normal) / nn)
}

/// Material attributes of a surface or mesh.
#[derive(Debug, Clone)]
pub struct SurfaceMaterial {
    pub material: MaterialType,
    ior0: f64,
    ior1: f64,
    iorq: f64,
    inv_iorq: f64,
    /// Diffuse scattering coefficient in `[0, 1]`
    pub diffuse: f64,
    pub color: [u8; 4],
    pub invert_normal: bool,
    pub alpha_calculation: AlphaCalculation,
    /// Name of the texture to read colours from
    pub texture_name: Option<String>,
    /// Texture resolved from `texture_name` by the scene
    pub texture: Option<Arc<Texture>>,
    pub texture_mapping: TextureMapping,
    /// Texels with zero alpha let rays pass
    pub alpha_as_mask: bool,
    /// Emission radius and spread follow the texture alpha
    pub alpha_as_radius: bool,
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        let mut material = Self {
            material: MaterialType::Refraction,
            ior0: 1.0,
            ior1: 1.0,
            iorq: 0.0,
            inv_iorq: 0.0,
            diffuse: 0.0,
            color: [255, 255, 255, 255],
            invert_normal: false,
            alpha_calculation: AlphaCalculation::Ignore,
            texture_name: None,
            texture: None,
            texture_mapping: TextureMapping::default(),
            alpha_as_mask: false,
            alpha_as_radius: false,
        };
        material.update_ior();
        material
    }
}

impl SurfaceMaterial {
    pub fn with_material(mut self, material: MaterialType) -> Self {
        self.material = material;
        self
    }

    pub fn with_iors(mut self, ior0: f64, ior1: f64) -> Self {
        self.set_iors(ior0, ior1);
        self
    }

    pub fn with_diffuse(mut self, diffuse: f64) -> Self {
        self.diffuse = diffuse;
        self
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn ior0(&self) -> f64 {
        self.ior0
    }

    pub fn ior1(&self) -> f64 {
        self.ior1
    }

    pub fn set_iors(&mut self, ior0: f64, ior1: f64) {
        self.ior0 = ior0;
        self.ior1 = ior1;
        self.update_ior();
    }

    fn update_ior(&mut self) {
        let ratio = self.ior0 / self.ior1;
        self.iorq = ratio * ratio - 1.0;
        self.inv_iorq = 1.0 / (ratio * ratio) - 1.0;
        if !self.iorq.is_finite() || !self.inv_iorq.is_finite() {
            log::debug!(
                "Degenerate refractive indices {} / {}, refraction passes straight through",
                self.ior0,
                self.ior1
            );
            self.iorq = 0.0;
            self.inv_iorq = 0.0;
        }
    }

    /// Refract through this material, see [`refract`].
    pub fn refract(&self, direction: DVec3, normal: DVec3) -> DVec3 {
        refract(direction, normal, self.iorq, self.inv_iorq)
    }

    /// Refractive index on the side a ray arrives from.
    ///
    /// A ray travelling against the normal arrives from the `ior0` side.
    pub fn incoming_ior(&self, direction: DVec3, normal: DVec3) -> f64 {
        if direction.dot(normal) < 0.0 {
            self.ior0
        } else {
            self.ior1
        }
    }

    /// Colour at `local`, a point relative to the object's texture origin.
    pub fn color_at(&self, local: DVec3) -> [u8; 4] {
        match &self.texture {
            Some(texture) => texture.texel(self.texture_mapping.cart_to_tex(local)),
            None => self.color,
        }
    }

    /// Apply a material column. Returns `None` if `column` is not a material column.
    pub fn apply(&mut self, column: Column, value: &Value) -> Option<OpticsResult<()>> {
        let result = match column {
            Column::Material => value
                .as_text(column)
                .and_then(|s| s.parse())
                .map(|m| self.material = m),
            Column::Ior0 => value.as_finite(column).map(|v| self.set_iors(v, self.ior1)),
            Column::Ior1 => value.as_finite(column).map(|v| self.set_iors(self.ior0, v)),
            Column::Diffuse => value.as_finite(column).map(|v| self.diffuse = v),
            Column::Color => value.as_color(column).map(|c| self.color = c),
            Column::InvertNormal => value.as_bool(column).map(|b| self.invert_normal = b),
            Column::AlphaCalculation => value
                .as_text(column)
                .and_then(|s| s.parse())
                .map(|a| self.alpha_calculation = a),
            Column::TextureObject => value.as_text(column).map(|s| {
                self.texture_name = if s.is_empty() { None } else { Some(s.to_string()) };
                self.texture = None;
            }),
            Column::TextureMapping => value
                .as_text(column)
                .and_then(|s| s.parse())
                .map(|m| self.texture_mapping = m),
            Column::AlphaAsMask => value.as_bool(column).map(|b| self.alpha_as_mask = b),
            Column::AlphaToRadius => value.as_bool(column).map(|b| self.alpha_as_radius = b),
            _ => return None,
        };
        Some(result)
    }

    /// Read a material column. Returns `None` if `column` is not a material column.
    pub fn value(&self, column: Column) -> Option<Value> {
        Some(match column {
            Column::Material => Value::Text(self.material.name().to_string()),
            Column::Ior0 => Value::Scalar(self.ior0),
            Column::Ior1 => Value::Scalar(self.ior1),
            Column::Diffuse => Value::Scalar(self.diffuse),
            Column::Color => Value::Color(self.color),
            Column::InvertNormal => Value::Bool(self.invert_normal),
            Column::AlphaCalculation => Value::Text(self.alpha_calculation.name().to_string()),
            Column::TextureObject => Value::Text(self.texture_name.clone().unwrap_or_default()),
            Column::TextureMapping => Value::Text(self.texture_mapping.name().to_string()),
            Column::AlphaAsMask => Value::Bool(self.alpha_as_mask),
            Column::AlphaToRadius => Value::Bool(self.alpha_as_radius),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect() {
        let d = reflect(DVec3::new(1.0, -1.0, 0.0), DVec3::new(0.0, 3.0, 0.0));
        assert!((d - DVec3::new(1.0, 1.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_refract_snell() {
        // Against the normal the ray passes from ior0 (air) into ior1 (glass).
        let material = SurfaceMaterial::default().with_iors(1.0, 1.5);
        let incoming = DVec3::new(1.0, -1.0, 0.0).normalize();
        let normal = DVec3::new(0.0, 2.0, 0.0);
        let out = material.refract(incoming, normal).normalize();

        let sin_in = incoming.x.abs();
        let sin_out = out.x.abs();
        assert!((1.0 * sin_in - 1.5 * sin_out).abs() < 1e-12);
        assert!(out.y < 0.0);
    }

    #[test]
    fn test_total_internal_reflection() {
        // Along the normal the ray leaves glass (ior1) at a grazing angle.
        let material = SurfaceMaterial::default().with_iors(1.0, 1.5);
        let incoming = DVec3::new(0.9, 0.1, 0.0).normalize();
        let out = material.refract(incoming, DVec3::Y);
        assert!((out - DVec3::new(incoming.x, -incoming.y, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_equal_indices_pass_through() {
        let material = SurfaceMaterial::default();
        let incoming = DVec3::new(0.3, -0.7, 0.2);
        assert!((material.refract(incoming, DVec3::Y) - incoming).length() < 1e-12);
    }

    #[test]
    fn test_anchor_points() {
        let p = DVec3::new(1.0, 0.0, 0.0);
        let d = DVec3::new(2.0, 0.0, 0.0);
        assert_eq!(AnchorPoint::NormalIntersection.midpoint(p, d), p);
        assert_eq!(AnchorPoint::LensCurve.midpoint(p, d), DVec3::new(-1.0, 0.0, 0.0));
        assert_eq!(AnchorPoint::MirrorFocal.midpoint(p, d), DVec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_apply_material_columns() {
        let mut material = SurfaceMaterial::default();
        material
            .apply(Column::Material, &Value::Text("reflection".into()))
            .unwrap()
            .unwrap();
        assert_eq!(material.material, MaterialType::Reflection);

        let err = material
            .apply(Column::Material, &Value::Text("Glass".into()))
            .unwrap();
        assert!(err.is_err());
        assert_eq!(material.material, MaterialType::Reflection);

        material.apply(Column::Ior1, &Value::Scalar(1.33)).unwrap().unwrap();
        assert_eq!(material.value(Column::Ior1), Some(Value::Scalar(1.33)));
        assert!(material.apply(Column::MaxSteps, &Value::Int(3)).is_none());
    }
}
