//! Triangle meshes: plain geometry and the optical mesh object.
//!
//! [`Mesh`] is the exchange type produced by surface export and iso-surface
//! extraction and consumed by exporters and renderers. [`MeshObject`] places
//! a mesh in the scene with a transform and material so rays can hit it and
//! generators can emit from it.

use optica_math::{Aabb, DMat4, DMat4Ext, DVec2, DVec3, Interval, Ray};

use crate::column::{Column, Value};
use crate::error::OpticsResult;
use crate::id::ObjectId;
use crate::intersect::{Hit, Intersect};
use crate::material::SurfaceMaterial;
use crate::object::{unsupported, ObjectAttributes, ObjectHeader};

/// Indexed triangle list.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub positions: Vec<DVec3>,

    /// One normal per position. `None` until given or filled by
    /// [`Mesh::compute_normals`].
    pub normals: Option<Vec<DVec3>>,

    /// Texture coordinates, one per position
    pub uvs: Option<Vec<DVec2>>,

    /// Three position indices per triangle
    pub indices: Vec<u32>,

    /// Box around `positions` when the mesh was built
    pub bounds: Aabb,
}

impl Mesh {
    /// Create a new mesh from positions and indices, optionally with normals.
    pub fn new(positions: Vec<DVec3>, indices: Vec<u32>, normals: Option<Vec<DVec3>>) -> Self {
        let bounds = Aabb::enclosing(&positions);
        Self {
            positions,
            normals,
            uvs: None,
            indices,
            bounds,
        }
    }

    /// Create a new mesh with UV coordinates.
    pub fn new_with_uvs(
        positions: Vec<DVec3>,
        indices: Vec<u32>,
        normals: Option<Vec<DVec3>>,
        uvs: Option<Vec<DVec2>>,
    ) -> Self {
        let mut mesh = Self::new(positions, indices, normals);
        mesh.uvs = uvs;
        mesh
    }

    /// Compute smooth vertex normals by averaging face normals.
    ///
    /// Faces are counter-clockwise when seen from the side the normal points to.
    /// Larger faces weigh more.
    pub fn compute_normals(&mut self) {
        let vertex_count = self.positions.len();
        let mut normals = vec![DVec3::ZERO; vertex_count];

        for face in 0..self.triangle_count() {
            let Some([p0, p1, p2]) = self.triangle(face) else {
                continue;
            };
            let face_normal = (p1 - p0).cross(p2 - p0);
            for &i in &self.indices[face * 3..face * 3 + 3] {
                normals[i as usize] += face_normal;
            }
        }

        for normal in &mut normals {
            *normal = normal.normalize_or_zero();
        }

        self.normals = Some(normals);
    }

    /// Ensure the mesh has one normal per vertex, computing them if necessary.
    pub fn ensure_normals(&mut self) {
        let matches = self
            .normals
            .as_ref()
            .is_some_and(|normals| normals.len() == self.positions.len());
        if !matches {
            if self.normals.is_some() {
                log::debug!(
                    "Normals array length doesn't match vertex count ({}), computing smooth normals",
                    self.positions.len()
                );
            }
            self.compute_normals();
        }
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn has_uvs(&self) -> bool {
        self.uvs.is_some()
    }

    /// Get the number of triangles in the mesh.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get the number of vertices in the mesh.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Corner positions of triangle `face`, `None` if an index is out of range.
    pub fn triangle(&self, face: usize) -> Option<[DVec3; 3]> {
        let idx = self.indices.get(face * 3..face * 3 + 3)?;
        Some([
            *self.positions.get(idx[0] as usize)?,
            *self.positions.get(idx[1] as usize)?,
            *self.positions.get(idx[2] as usize)?,
        ])
    }

    /// Copy of this mesh with positions and normals mapped through `matrix`.
    pub fn transformed(&self, matrix: &DMat4) -> Mesh {
        let positions: Vec<DVec3> = self
            .positions
            .iter()
            .map(|&p| matrix.transform_point3(p))
            .collect();
        let normals = self.normals.as_ref().map(|normals| {
            normals
                .iter()
                .map(|&n| matrix.transform_normal3(n).normalize_or_zero())
                .collect()
        });
        Mesh::new_with_uvs(positions, self.indices.clone(), normals, self.uvs.clone())
    }
}

/// A triangle mesh placed in the scene.
#[derive(Debug, Clone)]
pub struct MeshObject {
    pub header: ObjectHeader,
    pub material: SurfaceMaterial,
    /// Interpolate vertex normals instead of using face normals
    pub smooth: bool,
    local: Mesh,
    transformation: DMat4,
    position: DVec3,

    // Derived in update()
    world: Mesh,
    face_normals: Vec<DVec3>,
    cumulative_area: Vec<f64>,
    center: DVec3,
    radius_squared: f64,
}

impl MeshObject {
    pub fn new(id: ObjectId, mesh: Mesh) -> Self {
        let mut object = Self {
            header: ObjectHeader::new(id),
            material: SurfaceMaterial::default(),
            smooth: false,
            local: mesh,
            transformation: DMat4::IDENTITY,
            position: DVec3::ZERO,
            world: Mesh::default(),
            face_normals: Vec::new(),
            cumulative_area: Vec::new(),
            center: DVec3::ZERO,
            radius_squared: 0.0,
        };
        object.update();
        object
    }

    pub fn with_transformation(mut self, transformation: DMat4) -> Self {
        self.transformation = transformation;
        self.update();
        self
    }

    pub fn with_material(mut self, material: SurfaceMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn with_smooth(mut self, smooth: bool) -> Self {
        self.smooth = smooth;
        self
    }

    /// Mesh in world coordinates.
    pub fn world_mesh(&self) -> &Mesh {
        &self.world
    }

    /// Replace the local geometry.
    pub fn set_mesh(&mut self, mesh: Mesh) {
        self.local = mesh;
        self.update();
        self.header.touch();
    }

    fn local_to_world(&self) -> DMat4 {
        DMat4::from_translation(self.position) * self.transformation
    }

    fn update(&mut self) {
        let mut local = self.local.clone();
        local.ensure_normals();
        self.world = local.transformed(&self.local_to_world());

        let faces = self.world.triangle_count();
        self.face_normals = Vec::with_capacity(faces);
        self.cumulative_area = Vec::with_capacity(faces);
        let mut total = 0.0;
        for face in 0..faces {
            let (normal, area) = match self.world.triangle(face) {
                Some([p0, p1, p2]) => {
                    let cross = (p1 - p0).cross(p2 - p0);
                    (cross.normalize_or_zero(), cross.length() * 0.5)
                }
                None => (DVec3::ZERO, 0.0),
            };
            total += area;
            self.face_normals.push(normal);
            self.cumulative_area.push(total);
        }
        if total > 0.0 {
            for a in &mut self.cumulative_area {
                *a /= total;
            }
        } else if faces > 0 {
            log::debug!("Mesh {} has zero area", self.header.name);
        }

        self.center = self.world.bounds.centroid();
        self.radius_squared = self
            .world
            .positions
            .iter()
            .map(|p| p.distance_squared(self.center))
            .fold(0.0, f64::max);
    }

    pub fn face_count(&self) -> usize {
        self.face_normals.len()
    }

    /// Face for a uniform draw `u` in `[0, 1)`, with probability proportional to its area.
    pub fn face_for(&self, u: f64) -> usize {
        let face = self.cumulative_area.partition_point(|&a| a < u);
        face.min(self.face_count().saturating_sub(1))
    }

    fn corner_indices(&self, face: usize) -> [usize; 3] {
        let idx = &self.world.indices[face * 3..face * 3 + 3];
        [idx[0] as usize, idx[1] as usize, idx[2] as usize]
    }

    // Barycentric blend with weights (1 - alpha - beta, alpha, beta).
    fn blend<T>(values: [T; 3], alpha: f64, beta: f64) -> T
    where
        T: std::ops::Mul<f64, Output = T> + std::ops::Add<Output = T>,
    {
        let [v0, v1, v2] = values;
        v0 * (1.0 - alpha - beta) + v1 * alpha + v2 * beta
    }

    /// Point on `face` at barycentric `(alpha, beta)`.
    pub fn point(&self, face: usize, alpha: f64, beta: f64) -> DVec3 {
        match self.world.triangle(face) {
            Some(corners) => Self::blend(corners, alpha, beta),
            None => self.center,
        }
    }

    /// Interpolated vertex normal, normalized.
    pub fn smooth_normal(&self, face: usize, alpha: f64, beta: f64) -> DVec3 {
        let Some(normals) = self.world.normals.as_ref() else {
            return self.face_normal(face);
        };
        let [i0, i1, i2] = self.corner_indices(face);
        Self::blend([normals[i0], normals[i1], normals[i2]], alpha, beta).normalize_or_zero()
    }

    pub fn face_normal(&self, face: usize) -> DVec3 {
        self.face_normals.get(face).copied().unwrap_or(DVec3::ZERO)
    }

    /// Normal at barycentric `(alpha, beta)` following the `smooth` flag.
    pub fn normal(&self, face: usize, alpha: f64, beta: f64) -> DVec3 {
        if self.smooth {
            self.smooth_normal(face, alpha, beta)
        } else {
            self.face_normal(face)
        }
    }

    /// Interpolated texture coordinate, zero for meshes without uvs.
    pub fn texture_coord(&self, face: usize, alpha: f64, beta: f64) -> DVec2 {
        let Some(uvs) = self.world.uvs.as_ref() else {
            return DVec2::ZERO;
        };
        let [i0, i1, i2] = self.corner_indices(face);
        match (uvs.get(i0), uvs.get(i1), uvs.get(i2)) {
            (Some(&a), Some(&b), Some(&c)) => Self::blend([a, b, c], alpha, beta),
            _ => DVec2::ZERO,
        }
    }

    /// Colour at a barycentric point, from the texture if one is resolved.
    pub fn color_at(&self, face: usize, alpha: f64, beta: f64) -> [u8; 4] {
        match &self.material.texture {
            Some(texture) => texture.texel(self.texture_coord(face, alpha, beta)),
            None => self.material.color,
        }
    }
}

impl Intersect for MeshObject {
    /// Bounding-sphere cull, then Möller-Trumbore against every face.
    fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<Hit> {
        if self.face_count() == 0 {
            return None;
        }
        let dd = ray.direction.length_squared();
        let oc = ray.origin - self.center;
        let b = oc.dot(ray.direction);
        let c = oc.length_squared() - self.radius_squared;
        let disc = b * b - dd * c;
        if disc < 0.0 {
            return None;
        }
        let sq = disc.sqrt();
        if (-b + sq) / dd < ray_t.min || (-b - sq) / dd > ray_t.max {
            return None;
        }

        let mut closest = ray_t.max;
        let mut best: Option<(usize, f64, f64, f64)> = None;
        for face in 0..self.face_count() {
            let Some([v0, v1, v2]) = self.world.triangle(face) else {
                continue;
            };
            let edge1 = v1 - v0;
            let edge2 = v2 - v0;
            let h = ray.direction.cross(edge2);
            let a = edge1.dot(h);

            // Ray is parallel to triangle
            if a.abs() < 1e-12 {
                continue;
            }

            let f = 1.0 / a;
            let s = ray.origin - v0;
            let u = f * s.dot(h);
            if !(0.0..=1.0).contains(&u) {
                continue;
            }

            let q = s.cross(edge1);
            let v = f * ray.direction.dot(q);
            if v < 0.0 || u + v > 1.0 {
                continue;
            }

            let t = f * edge2.dot(q);
            if t <= ray_t.min || t >= closest {
                continue;
            }
            if self.material.alpha_as_mask && self.color_at(face, u, v)[3] == 0 {
                continue;
            }
            closest = t;
            best = Some((face, t, u, v));
        }

        let (face, t, u, v) = best?;
        let mut hit = Hit::new(t, ray.at(t), self.normal(face, u, v));
        if self.world.has_uvs() {
            hit = hit.with_uv(self.texture_coord(face, u, v));
        }
        if self.material.invert_normal {
            hit.normal = -hit.normal;
        }
        Some(hit)
    }
}

impl ObjectAttributes for MeshObject {
    fn kind(&self) -> &'static str {
        "mesh"
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
            Column::Transformation => self.transformation = value.as_matrix(column)?,
            Column::Smooth => {
                self.smooth = value.as_bool(column)?;
                return Ok(());
            }
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
            Column::Transformation => Value::Matrix(self.transformation),
            Column::Smooth => Value::Bool(self.smooth),
            _ => return unsupported(self.kind(), column),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Mesh {
        // Unit square in the xy plane split into two triangles, facing +z
        let positions = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(1.0, 1.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        ];
        Mesh::new(positions, vec![0, 1, 2, 0, 2, 3], None)
    }

    #[test]
    fn test_mesh_creation() {
        let mesh = quad();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert!(!mesh.has_normals());
        assert!((mesh.bounds.x.max - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_compute_normals() {
        let mut mesh = quad();
        mesh.compute_normals();
        assert!(mesh.has_normals());
        for normal in mesh.normals.as_ref().unwrap() {
            assert!((normal.z - 1.0).abs() < 0.001);
        }
    }

    #[test]
    fn test_triangle_out_of_range() {
        let mesh = Mesh::new(vec![DVec3::ZERO], vec![0, 1, 2], None);
        assert!(mesh.triangle(0).is_none());
        assert!(mesh.triangle(5).is_none());
    }

    #[test]
    fn test_transformed_mesh() {
        let mut mesh = quad();
        mesh.compute_normals();
        let moved = mesh.transformed(&DMat4::from_rotation_x(std::f64::consts::FRAC_PI_2));
        let n = moved.normals.as_ref().unwrap()[0];
        assert!((n - DVec3::new(0.0, -1.0, 0.0)).length() < 1e-12);
        assert!((moved.positions[2] - DVec3::new(1.0, 0.0, 1.0)).length() < 1e-12);
    }

    #[test]
    fn test_mesh_object_intersection() {
        let object = MeshObject::new(ObjectId(1), quad())
            .with_transformation(DMat4::from_translation(DVec3::new(0.0, 0.0, 2.0)));
        let ray = Ray::new(DVec3::new(0.25, 0.5, 0.0), DVec3::Z);
        let hit = object.intersect(&ray, Interval::new(0.001, 100.0)).unwrap();
        assert!((hit.t - 2.0).abs() < 1e-12);
        assert!((hit.normal - DVec3::Z).length() < 1e-12);

        // Outside the square
        let ray = Ray::new(DVec3::new(1.5, 0.5, 0.0), DVec3::Z);
        assert!(object.intersect(&ray, Interval::new(0.001, 100.0)).is_none());

        // Beyond the allowed range
        let ray = Ray::new(DVec3::new(0.25, 0.5, 0.0), DVec3::Z);
        assert!(object.intersect(&ray, Interval::new(0.001, 1.0)).is_none());
    }

    #[test]
    fn test_face_selection_follows_area() {
        // Second triangle has three times the area of the first
        let positions = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(3.0, 0.0, 1.0),
            DVec3::new(0.0, 1.0, 1.0),
        ];
        let object = MeshObject::new(ObjectId(1), Mesh::new(positions, vec![0, 1, 2, 3, 4, 5], None));
        assert_eq!(object.face_for(0.0), 0);
        assert_eq!(object.face_for(0.2), 0);
        assert_eq!(object.face_for(0.3), 1);
        assert_eq!(object.face_for(0.999), 1);
        assert_eq!(object.face_for(1.0), 1);
    }

    #[test]
    fn test_barycentric_interpolation() {
        let mut mesh = quad();
        mesh.uvs = Some(vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(1.0, 0.0),
            DVec2::new(1.0, 1.0),
            DVec2::new(0.0, 1.0),
        ]);
        let object = MeshObject::new(ObjectId(1), mesh);
        let p = object.point(0, 0.5, 0.25);
        assert!((p - DVec3::new(0.75, 0.25, 0.0)).length() < 1e-12);
        let uv = object.texture_coord(0, 0.5, 0.25);
        assert!((uv - DVec2::new(0.75, 0.25)).length() < 1e-12);
        assert!((object.normal(0, 0.5, 0.25) - DVec3::Z).length() < 1e-12);
    }

    #[test]
    fn test_mesh_columns() {
        let mut object = MeshObject::new(ObjectId(4), quad());
        object.set_value(Column::Smooth, &Value::Bool(true)).unwrap();
        assert!(object.smooth);
        object
            .set_value(Column::Position, &Value::Vector(DVec3::new(0.0, 0.0, 5.0)))
            .unwrap();
        assert!((object.world_mesh().bounds.z.min - 5.0).abs() < 1e-12);
        assert!(object.set_value(Column::Surface, &Value::Text("Flat".into())).is_err());
        assert_eq!(object.header.mod_count(), 2);
    }
}
