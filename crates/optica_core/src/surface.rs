//! Implicit optical surfaces.
//!
//! A surface is described by a midpoint, a direction whose length is the
//! radius of curvature, and a geometric radius range. Intersection, the
//! implicit inner/outer function, normals and mesh export all share the
//! same per-type bounds derived in [`OpticalSurface::update`].

use std::f64::consts::{PI, TAU};

use optica_math::{orthogonal_basis, signed_sqrt, solve_quadratic, DVec3, Interval, Ray};

use crate::column::{Column, Value};
use crate::error::OpticsResult;
use crate::id::ObjectId;
use crate::intersect::{Hit, Intersect};
use crate::material::{AnchorPoint, SurfaceMaterial};
use crate::mesh::Mesh;
use crate::object::{unsupported, ObjectAttributes, ObjectHeader};

named_enum! {
    /// Geometric type of an optical surface.
    pub enum SurfaceType: "surface type" {
        Flat => "Flat",
        Spherical => "Spherical",
        Hyperbolic => "Hyperbolic",
        Parabolic => "Parabolic",
        Cylinder => "Cylinder",
        Custom => "Custom",
    }
}

/// Per-type geometry derived from the surface attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceShape {
    /// Disk basis, both vectors scaled to the max radius
    Flat { v0: DVec3, v1: DVec3 },
    /// Polar angles of the visible cap, measured from the direction
    Spherical { min_arc: f64, max_arc: f64 },
    Hyperbolic,
    Parabolic,
    Cylinder,
    Custom { conic_constant: f64 },
}

/// Angle from the axis at which a sphere of radius `length` reaches `radius`.
///
/// Radii at or beyond the sphere radius open the cap past the equator.
pub fn arc_open(radius: f64, length: f64) -> f64 {
    if radius < length {
        (radius / length).asin()
    } else {
        PI - (length / radius).asin()
    }
}

/// An implicit optical surface.
#[derive(Debug, Clone)]
pub struct OpticalSurface {
    pub header: ObjectHeader,
    pub material: SurfaceMaterial,
    surface_type: SurfaceType,
    position: DVec3,
    direction: DVec3,
    anchor: AnchorPoint,
    min_radius: f64,
    max_radius: f64,
    conic_constant: f64,
    invert_inside_outside: bool,

    // Derived in update()
    midpoint: DVec3,
    axis: DVec3,
    length: f64,
    lower: f64,
    upper: f64,
    shape: SurfaceShape,
}

impl OpticalSurface {
    pub fn new(id: ObjectId) -> Self {
        let mut surface = Self {
            header: ObjectHeader::new(id),
            material: SurfaceMaterial::default(),
            surface_type: SurfaceType::Flat,
            position: DVec3::ZERO,
            direction: DVec3::X,
            anchor: AnchorPoint::NormalIntersection,
            min_radius: 0.0,
            max_radius: 10.0,
            conic_constant: 1.0,
            invert_inside_outside: false,
            midpoint: DVec3::ZERO,
            axis: DVec3::X,
            length: 1.0,
            lower: 0.0,
            upper: 0.0,
            shape: SurfaceShape::Hyperbolic,
        };
        surface.update();
        surface
    }

    pub fn with_surface_type(mut self, surface_type: SurfaceType) -> Self {
        self.surface_type = surface_type;
        self.update();
        self
    }

    pub fn with_position(mut self, position: DVec3) -> Self {
        self.position = position;
        self.update();
        self
    }

    pub fn with_direction(mut self, direction: DVec3) -> Self {
        self.direction = direction;
        self.update();
        self
    }

    pub fn with_radii(mut self, min_radius: f64, max_radius: f64) -> Self {
        self.min_radius = min_radius;
        self.max_radius = max_radius;
        self.update();
        self
    }

    pub fn with_conic_constant(mut self, conic_constant: f64) -> Self {
        self.conic_constant = conic_constant;
        self.update();
        self
    }

    pub fn with_anchor(mut self, anchor: AnchorPoint) -> Self {
        self.anchor = anchor;
        self.update();
        self
    }

    pub fn with_material(mut self, material: SurfaceMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn with_invert_inside_outside(mut self, invert: bool) -> Self {
        self.invert_inside_outside = invert;
        self
    }

    pub fn surface_type(&self) -> SurfaceType {
        self.surface_type
    }

    pub fn position(&self) -> DVec3 {
        self.position
    }

    pub fn direction(&self) -> DVec3 {
        self.direction
    }

    /// Unit direction.
    pub fn axis(&self) -> DVec3 {
        self.axis
    }

    /// Length of the direction vector, the radius of curvature.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn midpoint(&self) -> DVec3 {
        self.midpoint
    }

    pub fn min_radius(&self) -> f64 {
        self.min_radius
    }

    pub fn max_radius(&self) -> f64 {
        self.max_radius
    }

    pub fn shape(&self) -> SurfaceShape {
        self.shape
    }

    /// Recompute the derived geometry after an attribute change.
    fn update(&mut self) {
        self.midpoint = self.anchor.midpoint(self.position, self.direction);
        let length = self.direction.length();
        self.length = length;
        self.axis = self.direction.normalize_or_zero();
        if length == 0.0 {
            log::debug!("Surface {} has a zero-length direction", self.header.name);
        }

        let min_r = self.min_radius * self.min_radius / (length * length);
        let max_r = self.max_radius * self.max_radius / (length * length);
        let (lower, upper) = match self.surface_type {
            SurfaceType::Flat => (0.0, 0.0),
            SurfaceType::Spherical => (
                arc_open(self.min_radius, length).cos() * length,
                arc_open(self.max_radius, length).cos() * length,
            ),
            SurfaceType::Hyperbolic => (
                ((1.0 + min_r).sqrt() - 1.0) * length,
                ((1.0 + max_r).sqrt() - 1.0) * length,
            ),
            SurfaceType::Parabolic => (0.5 * min_r * length, 0.5 * max_r * length),
            SurfaceType::Cylinder => (-self.min_radius, -self.max_radius),
            SurfaceType::Custom => {
                let k1 = 1.0 + self.conic_constant;
                let root = |t: f64| signed_sqrt(t.max(-1.0));
                let lo = min_r / (1.0 + root(1.0 - k1 * min_r));
                let mut up = max_r / (1.0 + root(1.0 - k1 * max_r));
                // Closed conics end at their far vertex
                if up * k1 > 2.0 {
                    up = 2.0 / k1;
                }
                (lo * length, up * length)
            }
        };
        self.lower = lower;
        self.upper = upper;

        self.shape = match self.surface_type {
            SurfaceType::Flat => {
                let (v0, v1) = orthogonal_basis(self.direction);
                let scale = if length == 0.0 { 0.0 } else { self.max_radius / length };
                SurfaceShape::Flat {
                    v0: v0 * scale,
                    v1: v1 * scale,
                }
            }
            SurfaceType::Spherical => SurfaceShape::Spherical {
                min_arc: arc_open(self.min_radius, length),
                max_arc: arc_open(self.max_radius, length),
            },
            SurfaceType::Hyperbolic => SurfaceShape::Hyperbolic,
            SurfaceType::Parabolic => SurfaceShape::Parabolic,
            SurfaceType::Cylinder => SurfaceShape::Cylinder,
            SurfaceType::Custom => SurfaceShape::Custom {
                conic_constant: self.conic_constant,
            },
        };
    }

    // Distance-like coordinate the radius bounds are expressed in.
    fn axial(&self, local: DVec3) -> f64 {
        let proj = self.axis.dot(local);
        match self.surface_type {
            SurfaceType::Spherical => proj,
            SurfaceType::Cylinder => -proj,
            _ => self.length - proj,
        }
    }

    fn within_bounds(&self, dot: f64) -> bool {
        match self.surface_type {
            SurfaceType::Spherical | SurfaceType::Cylinder => self.upper <= dot && dot <= self.lower,
            _ => self.lower <= dot && dot <= self.upper,
        }
    }

    fn normal_local(&self, local: DVec3, dot: f64) -> DVec3 {
        match self.surface_type {
            SurfaceType::Flat => self.direction,
            SurfaceType::Spherical => local,
            SurfaceType::Hyperbolic => local + self.axis * (2.0 * dot),
            SurfaceType::Parabolic | SurfaceType::Cylinder => local + self.axis * dot,
            SurfaceType::Custom => local - self.axis * (self.conic_constant * dot),
        }
    }

    /// Geometric normal at a point on the surface, not normalized.
    ///
    /// `invert_normal` is not applied.
    pub fn normal_at(&self, point: DVec3) -> DVec3 {
        let local = point - self.midpoint;
        self.normal_local(local, self.axial(local))
    }

    /// Implicit function: zero on the surface, negative inside, positive outside.
    pub fn evaluate_inner_outer(&self, point: DVec3) -> f64 {
        let p = point - self.midpoint;
        let l = self.length;
        let proj = self.axis.dot(p);
        match self.surface_type {
            SurfaceType::Flat => -proj,
            SurfaceType::Spherical => p.length_squared() / (l * l) - 1.0,
            SurfaceType::Hyperbolic => 2.0 * l - proj - (p.length_squared() - proj * proj + l * l).sqrt(),
            SurfaceType::Parabolic => {
                let d = proj - l;
                p.length_squared() - d * d - l * l
            }
            SurfaceType::Cylinder => {
                let radial = p.length_squared() - proj * proj;
                (proj + self.upper)
                    .max(-(self.lower + proj))
                    .max(radial - l * l)
            }
            SurfaceType::Custom => {
                let d = l - proj;
                d * (2.0 * l - d * (1.0 + self.conic_constant)) - p.length_squared() + proj * proj
            }
        }
    }

    /// Colour at a world point, textured relative to the midpoint.
    pub fn color_at(&self, point: DVec3) -> [u8; 4] {
        self.material.color_at(point - self.midpoint)
    }

    fn masked(&self, point: DVec3) -> bool {
        self.material.alpha_as_mask
            && self.material.texture.is_some()
            && self.color_at(point)[3] == 0
    }

    fn intersect_flat(&self, ray: &Ray, ray_t: Interval) -> Option<Hit> {
        let p = ray.origin - self.midpoint;
        let denom = self.direction.dot(ray.direction);
        if denom == 0.0 {
            return None;
        }
        let t = -self.direction.dot(p) / denom;
        if !ray_t.surrounds(t) {
            return None;
        }
        let dq = (p + ray.direction * t).length_squared();
        let inside = self.min_radius * self.min_radius <= dq && dq <= self.max_radius * self.max_radius;
        if inside == self.invert_inside_outside {
            return None;
        }
        let point = ray.at(t);
        if self.masked(point) {
            return None;
        }
        Some(Hit::new(t, point, self.direction))
    }

    fn intersect_curved(&self, ray: &Ray, ray_t: Interval) -> Option<Hit> {
        let p = ray.origin - self.midpoint;
        let d = ray.direction;
        let l = self.length;
        let dd = d.length_squared();
        let pp = p.length_squared();
        let dp = d.dot(p);
        let sc = self.axis.dot(d);
        let k = self.conic_constant;

        // Quadratic a t^2 + 2 b t + c in the ray parameter; `dot` is
        // affine in t with slope `slope`.
        let dot0 = self.axial(p);
        let (a, b, c, slope) = match self.surface_type {
            SurfaceType::Spherical => (dd, dp, pp - l * l, sc),
            SurfaceType::Hyperbolic => (
                dd - 2.0 * sc * sc,
                dp + 2.0 * sc * dot0,
                pp - 2.0 * dot0 * dot0 - l * l,
                -sc,
            ),
            SurfaceType::Parabolic => (dd - sc * sc, dp + sc * dot0, pp - l * l - dot0 * dot0, -sc),
            SurfaceType::Custom => (dd + k * sc * sc, dp - k * sc * dot0, pp + k * dot0 * dot0 - l * l, -sc),
            SurfaceType::Cylinder => (dd - sc * sc, dp + sc * dot0, pp - dot0 * dot0 - l * l, -sc),
            SurfaceType::Flat => return None,
        };

        for t in solve_quadratic(a, b, c) {
            if !ray_t.surrounds(t) {
                continue;
            }
            let dot = dot0 + slope * t;
            if !self.within_bounds(dot) {
                continue;
            }
            let point = ray.at(t);
            if self.masked(point) {
                continue;
            }
            let normal = self.normal_local(p + d * t, dot);
            return Some(Hit::new(t, point, normal));
        }
        None
    }

    /// Triangle mesh of the visible patch.
    ///
    /// `latitudes` vertices around the axis per ring, `longitudes` rings from
    /// the inner to the outer radius. Ring 0 collapses to one vertex when
    /// the patch reaches the axis.
    pub fn to_mesh(&self, latitudes: usize, longitudes: usize) -> Mesh {
        let latitudes = latitudes.max(3);
        let longitudes = longitudes.max(2);
        let l = self.length;
        let (v0, v1) = orthogonal_basis(self.direction);

        let step = 1.0 / (longitudes - 1) as f64;
        let (add, mul) = match self.surface_type {
            SurfaceType::Flat | SurfaceType::Hyperbolic | SurfaceType::Parabolic | SurfaceType::Cylinder => {
                (self.min_radius / l, step * (self.max_radius - self.min_radius) / l)
            }
            SurfaceType::Spherical => {
                let min_arc = arc_open(self.min_radius, l);
                let max_arc = arc_open(self.max_radius, l);
                (min_arc, step * (max_arc - min_arc))
            }
            SurfaceType::Custom => {
                let lo = self.lower / l;
                let up = self.upper / l;
                (lo, step * (up - lo))
            }
        };

        let collapsed = self.surface_type != SurfaceType::Cylinder && add == 0.0;
        let mut positions = Vec::with_capacity(latitudes * longitudes);
        for ring in 0..longitudes {
            let s = ring as f64 * mul + add;
            let (r, z) = match self.surface_type {
                SurfaceType::Flat => (s, 0.0),
                SurfaceType::Spherical => (s.sin(), s.cos()),
                SurfaceType::Hyperbolic => (s, 2.0 - (s * s + 1.0).sqrt()),
                SurfaceType::Parabolic => (s, 1.0 - s * s / 2.0),
                SurfaceType::Custom => ((s * (2.0 - s * (1.0 + self.conic_constant))).max(0.0).sqrt(), 1.0 - s),
                SurfaceType::Cylinder => (1.0, s),
            };
            if ring == 0 && collapsed {
                positions.push(self.midpoint + self.direction * z);
                continue;
            }
            for i in 0..latitudes {
                let rho = i as f64 * TAU / latitudes as f64;
                positions.push(self.midpoint + v0 * (r * rho.sin()) + v1 * (r * rho.cos()) + self.direction * z);
            }
        }

        let lat = latitudes as u32;
        let mut indices = Vec::new();
        let ring_start = |ring: u32| -> u32 {
            if collapsed {
                1 + (ring - 1) * lat
            } else {
                ring * lat
            }
        };
        let first_ring = if collapsed {
            for i in 0..lat {
                let b = ring_start(1);
                indices.extend_from_slice(&[0, b + i, b + (i + 1) % lat]);
            }
            1
        } else {
            0
        };
        for ring in first_ring..(longitudes as u32 - 1) {
            let a = ring_start(ring);
            let b = ring_start(ring + 1);
            for i in 0..lat {
                let j = (i + 1) % lat;
                indices.extend_from_slice(&[a + i, b + i, b + j]);
                indices.extend_from_slice(&[a + i, b + j, a + j]);
            }
        }

        Mesh::new(positions, indices, None)
    }
}

impl Intersect for OpticalSurface {
    fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<Hit> {
        let hit = match self.surface_type {
            SurfaceType::Flat => self.intersect_flat(ray, ray_t),
            _ => self.intersect_curved(ray, ray_t),
        }?;
        if self.material.invert_normal {
            Some(Hit {
                normal: -hit.normal,
                ..hit
            })
        } else {
            Some(hit)
        }
    }
}

impl ObjectAttributes for OpticalSurface {
    fn kind(&self) -> &'static str {
        "surface"
    }

    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ObjectHeader {
        &mut self.header
    }

    fn set_own_value(&mut self, column: Column, value: &Value) -> OpticsResult<()> {
        if let Some(result) = self.material.apply(column, value) {
            return result;
        }
        match column {
            Column::Position => self.position = value.as_vector(column)?,
            Column::Direction => self.direction = value.as_vector(column)?,
            Column::AnchorPoint => self.anchor = value.as_text(column)?.parse()?,
            Column::Surface => self.surface_type = value.as_text(column)?.parse()?,
            Column::MinRadius => self.min_radius = value.as_finite(column)?,
            Column::MaxRadius => self.max_radius = value.as_finite(column)?,
            Column::ConicConstant => self.conic_constant = value.as_finite(column)?,
            Column::InvertInsideOutside => self.invert_inside_outside = value.as_bool(column)?,
            _ => return unsupported(self.kind(), column),
        }
        self.update();
        Ok(())
    }

    fn own_value(&self, column: Column) -> OpticsResult<Value> {
        if let Some(value) = self.material.value(column) {
            return Ok(value);
        }
        Ok(match column {
            Column::Position => Value::Vector(self.position),
            Column::Direction => Value::Vector(self.direction),
            Column::AnchorPoint => Value::Text(self.anchor.name().to_string()),
            Column::Surface => Value::Text(self.surface_type.name().to_string()),
            Column::MinRadius => Value::Scalar(self.min_radius),
            Column::MaxRadius => Value::Scalar(self.max_radius),
            Column::ConicConstant => Value::Scalar(self.conic_constant),
            Column::InvertInsideOutside => Value::Bool(self.invert_inside_outside),
            _ => return unsupported(self.kind(), column),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{reflect, MaterialType};

    fn surface(surface_type: SurfaceType) -> OpticalSurface {
        OpticalSurface::new(ObjectId(1))
            .with_surface_type(surface_type)
            .with_radii(0.0, 100.0)
    }

    // Follows a ray through a single surface the same way the propagator does.
    fn trace(surface: &OpticalSurface, origin: DVec3, direction: DVec3, bounces: usize) -> Ray {
        let mut ray = Ray::new(origin, direction);
        for _ in 0..bounces {
            ray = ray.normalized();
            match surface.intersect(&ray, Interval::new(0.001, f64::INFINITY)) {
                Some(hit) => {
                    let d = match surface.material.material {
                        MaterialType::Reflection => reflect(ray.direction, hit.normal),
                        _ => surface.material.refract(ray.direction, hit.normal),
                    };
                    ray = Ray::new(hit.point, d);
                }
                None => return ray,
            }
        }
        ray
    }

    #[test]
    fn test_hyperbolic_focus() {
        let lens = surface(SurfaceType::Hyperbolic)
            .with_material(SurfaceMaterial::default().with_iors(1.0, 2.0_f64.sqrt()));
        let focus = DVec3::new(2.0 + 2.0_f64.sqrt(), 0.0, 0.0);
        for i in 0..10 {
            let y = i as f64 / 100.0;
            let ray = trace(&lens, DVec3::new(-10.0, y, 0.0), DVec3::X, 10);
            let distance = ray.line_distance_squared(focus).sqrt();
            assert!(distance < 1e-5, "ray {} misses focus by {}", i, distance);
        }
    }

    #[test]
    fn test_spherical_mirror() {
        let mirror = surface(SurfaceType::Spherical)
            .with_material(SurfaceMaterial::default().with_material(MaterialType::Reflection));
        for i in 1..10 {
            let y = i as f64 / 100.0;
            let ray = trace(&mirror, DVec3::new(0.0, y, 0.0), DVec3::X, 1).normalized();
            // Hit on the concave side, reflected ray crosses the axis here
            let expected = 1.0 / (2.0 * (1.0 - y * y).sqrt());
            assert!((ray.origin.x - (1.0 - y * y).sqrt()).abs() < 1e-9);
            let t = -ray.origin.y / ray.direction.y;
            assert!((ray.at(t).x - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_parabolic_mirror_focus() {
        let mirror = surface(SurfaceType::Parabolic)
            .with_material(SurfaceMaterial::default().with_material(MaterialType::Reflection));
        let focus = DVec3::new(0.5, 0.0, 0.0);
        for i in 1..10 {
            let y = i as f64 / 100.0;
            let ray = trace(&mirror, DVec3::new(-1.0, y, 0.0), DVec3::X, 1);
            assert!(ray.line_distance_squared(focus).sqrt() < 1e-9);
        }
    }

    #[test]
    fn test_flat_annulus() {
        let disk = OpticalSurface::new(ObjectId(1)).with_radii(1.0, 2.0);
        let range = Interval::new(0.0, f64::INFINITY);
        let hit = |y: f64, s: &OpticalSurface| {
            s.intersect(&Ray::new(DVec3::new(-1.0, y, 0.0), DVec3::X), range)
        };
        assert!(hit(0.5, &disk).is_none());
        let h = hit(1.5, &disk).unwrap();
        assert!((h.t - 1.0).abs() < 1e-12);
        assert_eq!(h.normal, DVec3::X);
        assert!(hit(2.5, &disk).is_none());

        let inverted = disk.with_invert_inside_outside(true);
        assert!(hit(0.5, &inverted).is_some());
        assert!(hit(1.5, &inverted).is_none());
    }

    #[test]
    fn test_invert_normal_flips_hit_normal() {
        let mut disk = OpticalSurface::new(ObjectId(1));
        disk.set_value(Column::InvertNormal, &Value::Bool(true)).unwrap();
        let hit = disk
            .intersect(&Ray::new(DVec3::new(-1.0, 0.0, 0.0), DVec3::X), Interval::new(0.0, 10.0))
            .unwrap();
        assert_eq!(hit.normal, -DVec3::X);
        assert_eq!(disk.normal_at(hit.point), DVec3::X);
    }

    #[test]
    fn test_hit_points_lie_on_surface() {
        let types = [
            SurfaceType::Spherical,
            SurfaceType::Hyperbolic,
            SurfaceType::Parabolic,
            SurfaceType::Cylinder,
            SurfaceType::Custom,
        ];
        for surface_type in types {
            let s = OpticalSurface::new(ObjectId(1))
                .with_surface_type(surface_type)
                .with_direction(DVec3::new(2.0, 0.0, 0.0))
                .with_radii(0.0, 1.5)
                .with_conic_constant(-0.5);
            for i in 0..8 {
                let origin = DVec3::new(-5.0, 0.1 * i as f64, 0.2);
                let dir = DVec3::new(1.0, 0.05, -0.02).normalize();
                if let Some(hit) = s.intersect(&Ray::new(origin, dir), Interval::new(0.0, 100.0)) {
                    let value = s.evaluate_inner_outer(hit.point);
                    assert!(value.abs() < 1e-6, "{} off surface by {}", surface_type, value);
                }
            }
        }
    }

    #[test]
    fn test_mesh_vertices_lie_on_surface() {
        let types = [
            SurfaceType::Flat,
            SurfaceType::Spherical,
            SurfaceType::Hyperbolic,
            SurfaceType::Parabolic,
            SurfaceType::Cylinder,
            SurfaceType::Custom,
        ];
        let directions = [
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 2.0, 0.0),
            DVec3::new(0.0, 0.0, -3.0),
            DVec3::new(1.0, 1.0, 1.0),
        ];
        for surface_type in types {
            let constants: &[f64] = if surface_type == SurfaceType::Custom {
                &[-1.0, -2.0, -3.0, 0.5]
            } else {
                &[1.0]
            };
            for &direction in &directions {
                for &k in constants {
                    let s = OpticalSurface::new(ObjectId(1))
                        .with_surface_type(surface_type)
                        .with_position(DVec3::new(1.0, -2.0, 0.5))
                        .with_direction(direction)
                        .with_radii(0.5, 1.0)
                        .with_conic_constant(k);
                    let mesh = s.to_mesh(11, 11);
                    assert!(!mesh.indices.is_empty());
                    for &v in &mesh.positions {
                        let e = s.evaluate_inner_outer(v).abs();
                        assert!(e < 0.001, "{} k={} vertex {:?} off by {}", surface_type, k, v, e);
                    }
                }
            }
        }
    }

    #[test]
    fn test_custom_depth_bounds() {
        // k = -1 is the paraboloid
        let custom = surface(SurfaceType::Custom)
            .with_radii(0.5, 1.0)
            .with_conic_constant(-1.0);
        let parabolic = surface(SurfaceType::Parabolic).with_radii(0.5, 1.0);
        assert!((custom.lower - parabolic.lower).abs() < 1e-12);
        assert!((custom.upper - parabolic.upper).abs() < 1e-12);

        // Radii past a closed conic stop at its far vertex
        let ellipsoid = surface(SurfaceType::Custom)
            .with_radii(0.0, 10.0)
            .with_conic_constant(0.5);
        assert_eq!(ellipsoid.lower, 0.0);
        assert!((ellipsoid.upper - ellipsoid.length / 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_mesh_collapses_center_ring() {
        let s = surface(SurfaceType::Parabolic);
        let mesh = s.to_mesh(8, 4);
        assert_eq!(mesh.positions.len(), 1 + 3 * 8);
        assert_eq!(mesh.triangle_count(), 8 + 2 * 2 * 8);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.positions.len()));

        let cylinder = surface(SurfaceType::Cylinder).with_radii(0.0, 1.0);
        let mesh = cylinder.to_mesh(8, 4);
        assert_eq!(mesh.positions.len(), 4 * 8);
    }

    #[test]
    fn test_spherical_aperture_saturates() {
        let s = surface(SurfaceType::Spherical).with_radii(0.0, 2.0);
        match s.shape() {
            SurfaceShape::Spherical { max_arc, .. } => {
                assert!((max_arc - (PI - 0.5_f64.asin())).abs() < 1e-12)
            }
            other => panic!("unexpected shape {:?}", other),
        }
        let s = s.with_radii(0.0, 0.5);
        match s.shape() {
            SurfaceShape::Spherical { max_arc, .. } => assert!((max_arc - 0.5_f64.asin()).abs() < 1e-12),
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_set_value_updates_geometry() {
        let mut s = OpticalSurface::new(ObjectId(3));
        let before = s.header.mod_count();
        s.set_value(Column::Position, &Value::Vector(DVec3::new(1.0, 0.0, 0.0)))
            .unwrap();
        s.set_value(Column::AnchorPoint, &Value::Text("Lens Curve".into()))
            .unwrap();
        assert_eq!(s.midpoint(), DVec3::ZERO);
        assert_eq!(s.header.mod_count(), before + 2);

        let err = s.set_value(Column::Surface, &Value::Text("Toroidal".into()));
        assert!(err.is_err());
        assert_eq!(s.header.mod_count(), before + 2);
        assert!(s.set_value(Column::VolumeScaling, &Value::Scalar(2.0)).is_err());
        assert_eq!(
            s.value(Column::Surface).unwrap(),
            Value::Text("Flat".to_string())
        );
    }
}
