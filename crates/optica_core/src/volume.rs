//! Volumetric media: the voxel grid, the volume object and the ray march.
//!
//! A volume maps the unit cube `[-1, 1]^3` to world space with an affine
//! transform. The unit cube is split into `width x height x depth` cells, each
//! holding a refractive index and a translucency. Cells with a non-positive
//! index are mirrors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use optica_math::{Aabb, DMat3, DMat4, DMat4Ext, DVec3, Interval, Ray};

use crate::column::{Column, Value};
use crate::error::{OpticsError, OpticsResult};
use crate::id::ObjectId;
use crate::intersect::{Hit, Intersect};
use crate::isosurface::volume_to_mesh;
use crate::mesh::Mesh;
use crate::object::{unsupported, ObjectAttributes, ObjectHeader};

/// Steps between two polls of the cancellation flag.
const CANCEL_POLL_INTERVAL: usize = 1024;

/// Refractive index and translucency per cell, x fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeGrid {
    width: usize,
    height: usize,
    depth: usize,
    pub ior: Vec<f32>,
    /// In `[0, 1]`, 1 is fully clear
    pub translucency: Vec<f32>,
}

impl VolumeGrid {
    /// Grid of clear cells with index 1.
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        let len = width * height * depth;
        Self {
            width,
            height,
            depth,
            ior: vec![1.0; len],
            translucency: vec![1.0; len],
        }
    }

    /// Fill from a function of the cell coordinates returning `(ior, translucency)`.
    pub fn from_fn(
        width: usize,
        height: usize,
        depth: usize,
        mut f: impl FnMut(usize, usize, usize) -> (f32, f32),
    ) -> Self {
        let mut grid = Self::new(width, height, depth);
        for z in 0..depth {
            for y in 0..height {
                for x in 0..width {
                    let i = grid.index(x, y, z);
                    let (ior, translucency) = f(x, y, z);
                    grid.ior[i] = ior;
                    grid.translucency[i] = translucency;
                }
            }
        }
        grid
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn dimensions(&self) -> [usize; 3] {
        [self.width, self.height, self.depth]
    }

    pub fn len(&self) -> usize {
        self.ior.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ior.is_empty()
    }

    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.height + y) * self.width + x
    }

    /// Cell coordinates of a linear index.
    pub fn coords(&self, index: usize) -> [usize; 3] {
        let x = index % self.width;
        let y = (index / self.width) % self.height;
        let z = index / (self.width * self.height);
        [x, y, z]
    }

    fn checked_index(&self, cell: [i64; 3]) -> Option<usize> {
        let dims = self.dimensions();
        for axis in 0..3 {
            if cell[axis] < 0 || cell[axis] >= dims[axis] as i64 {
                return None;
            }
        }
        Some(self.index(cell[0] as usize, cell[1] as usize, cell[2] as usize))
    }

    pub fn is_reflective(&self, cell: [i64; 3]) -> bool {
        self.checked_index(cell)
            .is_some_and(|i| self.ior[i] <= 0.0)
    }

    fn translucency_at(&self, cell: [i64; 3]) -> f64 {
        self.checked_index(cell)
            .map_or(1.0, |i| self.translucency[i] as f64)
    }

    // Index of a neighbour, clamped to the grid, or `fallback` for mirrors.
    fn ior_or(&self, cell: [i64; 3], fallback: f64) -> f64 {
        let dims = self.dimensions();
        let mut clamped = cell;
        for axis in 0..3 {
            clamped[axis] = cell[axis].clamp(0, dims[axis] as i64 - 1);
        }
        match self.checked_index(clamped) {
            Some(i) if self.ior[i] > 0.0 => self.ior[i] as f64,
            _ => fallback,
        }
    }

    /// Cell containing lattice point `l`, where the grid covers `[0, dims]`.
    pub fn cell_of(&self, l: DVec3) -> [i64; 3] {
        let dims = self.dimensions();
        let mut cell = [0i64; 3];
        for axis in 0..3 {
            cell[axis] = (l[axis].floor() as i64).clamp(0, dims[axis] as i64 - 1);
        }
        cell
    }

    /// Trilinear index and its gradient at lattice point `l`.
    ///
    /// Samples sit at cell centres and the field is extended flat beyond the
    /// outer centres. Mirror neighbours take the index of `cell`.
    pub fn sample(&self, l: DVec3, cell: [i64; 3]) -> (f64, DVec3) {
        let fallback = self.ior_or(cell, 1.0);
        let c = l - DVec3::splat(0.5);
        let base = c.floor();
        let f = c - base;
        let b = [base.x as i64, base.y as i64, base.z as i64];

        let mut n = [[[0.0; 2]; 2]; 2];
        for (dz, plane) in n.iter_mut().enumerate() {
            for (dy, row) in plane.iter_mut().enumerate() {
                for (dx, value) in row.iter_mut().enumerate() {
                    *value = self.ior_or(
                        [b[0] + dx as i64, b[1] + dy as i64, b[2] + dz as i64],
                        fallback,
                    );
                }
            }
        }

        let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
        // Along x first, then y, then z
        let nx = |dy: usize, dz: usize| lerp(n[dz][dy][0], n[dz][dy][1], f.x);
        let dnx = |dy: usize, dz: usize| n[dz][dy][1] - n[dz][dy][0];

        let plane = |dz: usize| lerp(nx(0, dz), nx(1, dz), f.y);
        let value = lerp(plane(0), plane(1), f.z);

        let gx = lerp(
            lerp(dnx(0, 0), dnx(1, 0), f.y),
            lerp(dnx(0, 1), dnx(1, 1), f.y),
            f.z,
        );
        let gy = lerp(nx(1, 0) - nx(0, 0), nx(1, 1) - nx(0, 1), f.z);
        let gz = plane(1) - plane(0);

        (value, DVec3::new(gx, gy, gz))
    }
}

/// How a volume march ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarchOutcome {
    /// Left through the boundary of the unit volume
    Exited,
    /// Hit an opaque cell or dropped below the minimum intensity
    Absorbed,
    /// Ran out of steps
    StepLimit,
    Cancelled,
}

/// Final state of a ray marched through a volume.
#[derive(Debug, Clone, Copy)]
pub struct MarchResult {
    pub outcome: MarchOutcome,
    /// World position, on the boundary when the ray exited
    pub position: DVec3,
    /// Normalized world direction
    pub direction: DVec3,
    pub intensity: f64,
    pub steps: usize,
}

/// Parameters of a single march.
#[derive(Debug, Clone, Copy)]
pub struct MarchParams<'a> {
    /// Intensity carried into the volume
    pub intensity: f64,
    /// Rays below this intensity are absorbed
    pub min_intensity: f64,
    pub cancel: Option<&'a AtomicBool>,
}

impl Default for MarchParams<'_> {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            min_intensity: 0.0,
            cancel: None,
        }
    }
}

/// A gradient-index medium occupying a transformed unit cube.
#[derive(Debug, Clone)]
pub struct OpticalVolume {
    pub header: ObjectHeader,
    /// Unit cube to world
    transformation: DMat4,
    inverse: DMat4,
    /// Unit-space steps per unit length
    volume_scaling: f64,
    max_steps: usize,
    grid: Arc<VolumeGrid>,
}

impl OpticalVolume {
    pub fn new(id: ObjectId, grid: VolumeGrid) -> Self {
        Self {
            header: ObjectHeader::new(id),
            transformation: DMat4::IDENTITY,
            inverse: DMat4::IDENTITY,
            volume_scaling: 1000.0,
            max_steps: 8000,
            grid: Arc::new(grid),
        }
    }

    pub fn with_transformation(mut self, transformation: DMat4) -> Self {
        self.set_transformation(transformation);
        self
    }

    pub fn with_volume_scaling(mut self, volume_scaling: f64) -> Self {
        self.volume_scaling = volume_scaling;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn transformation(&self) -> DMat4 {
        self.transformation
    }

    pub fn volume_scaling(&self) -> f64 {
        self.volume_scaling
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn grid(&self) -> &Arc<VolumeGrid> {
        &self.grid
    }

    fn set_transformation(&mut self, transformation: DMat4) {
        let det = transformation.determinant();
        if det == 0.0 || !det.is_finite() {
            log::warn!(
                "Singular transformation for volume {}, keeping the previous one",
                self.header.name
            );
            return;
        }
        self.transformation = transformation;
        self.inverse = transformation.inverse();
    }

    /// Install a new grid and optionally a new transform.
    ///
    /// Only changes of the grid extents or the transform count as
    /// modifications; field values alone do not.
    pub fn commit_grid(&mut self, grid: Arc<VolumeGrid>, transformation: Option<DMat4>) {
        let mut changed = grid.dimensions() != self.grid.dimensions();
        if let Some(transformation) = transformation {
            if transformation != self.transformation {
                self.set_transformation(transformation);
                changed = true;
            }
        }
        self.grid = grid;
        if changed {
            self.header.touch();
        }
    }

    /// World bounds of the volume.
    pub fn bounds(&self) -> Aabb {
        self.transformation.transform_aabb(&Aabb::UNIT_CUBE)
    }

    /// Unit coordinates of a world point.
    pub fn world_to_unit(&self, point: DVec3) -> DVec3 {
        self.inverse.transform_point3(point)
    }

    pub fn unit_to_world(&self, unit: DVec3) -> DVec3 {
        self.transformation.transform_point3(unit)
    }

    fn unit_to_lattice(&self, unit: DVec3) -> DVec3 {
        let dims = self.dims_f64();
        (unit + DVec3::ONE) * dims * 0.5
    }

    fn dims_f64(&self) -> DVec3 {
        let [w, h, d] = self.grid.dimensions();
        DVec3::new(w as f64, h as f64, d as f64)
    }

    /// World position of cell centre (or grid point) `cell` given in lattice units.
    pub fn lattice_to_world(&self, lattice: DVec3) -> DVec3 {
        let unit = lattice * 2.0 / self.dims_f64() - DVec3::ONE;
        self.unit_to_world(unit)
    }

    // World-space unit normal of the plane u_axis = const.
    fn axis_normal(binv: &DMat3, axis: usize) -> DVec3 {
        binv.row(axis).normalize_or_zero()
    }

    fn reflect(v: DVec3, normal: DVec3) -> DVec3 {
        v - 2.0 * v.dot(normal) * normal
    }

    /// March a ray through the volume starting at world `position`.
    ///
    /// The direction is bent by the index gradient, reflected at mirror cells
    /// and attenuated by the translucency of every cell passed.
    pub fn march(&self, position: DVec3, direction: DVec3, params: MarchParams<'_>) -> MarchResult {
        let grid = &self.grid;
        let mut result = MarchResult {
            outcome: MarchOutcome::Exited,
            position,
            direction: direction.normalize_or_zero(),
            intensity: params.intensity,
            steps: 0,
        };
        if grid.is_empty() || result.direction == DVec3::ZERO {
            return result;
        }

        let binv = self.inverse.linear_part();
        let binv_t = binv.transpose();
        let unit_step = 1.0 / self.volume_scaling;
        let attenuation_exponent = unit_step;

        let mut x = position;
        let mut t = result.direction;
        let mut u = self.world_to_unit(x);
        let mut cell = grid.cell_of(self.unit_to_lattice(u));

        if grid.is_reflective(cell) {
            // Mirror on the entry face
            let axis = (0..3)
                .max_by(|&a, &b| u[a].abs().total_cmp(&u[b].abs()))
                .unwrap_or(0);
            result.direction = Self::reflect(t, Self::axis_normal(&binv, axis));
            return result;
        }

        let (n0, _) = grid.sample(self.unit_to_lattice(u), cell);
        let mut v = t * n0;
        let mut intensity = params.intensity;

        for step in 0..self.max_steps {
            result.steps = step + 1;
            if step % CANCEL_POLL_INTERVAL == 0
                && params.cancel.is_some_and(|c| c.load(Ordering::Relaxed))
            {
                result.outcome = MarchOutcome::Cancelled;
                break;
            }

            let du_dir = binv * t;
            let ds = unit_step / du_dir.length();
            let du = du_dir * ds;
            let u_next = u + du;

            if u_next.abs().max_element() > 1.0 {
                // Clip to the boundary
                let mut s: f64 = 1.0;
                for axis in 0..3 {
                    if u_next[axis].abs() > 1.0 && du[axis] != 0.0 {
                        let plane = u_next[axis].signum();
                        s = s.min((plane - u[axis]) / du[axis]);
                    }
                }
                x = self.unit_to_world(u + du * s.max(0.0));
                result.outcome = MarchOutcome::Exited;
                result.position = x;
                result.direction = t;
                result.intensity = intensity;
                return result;
            }

            let l_next = self.unit_to_lattice(u_next);
            let next = grid.cell_of(l_next);
            if next != cell && grid.is_reflective(next) {
                let changed: Vec<usize> = (0..3).filter(|&a| next[a] != cell[a]).collect();
                let mut mirrors: Vec<usize> = changed
                    .iter()
                    .copied()
                    .filter(|&a| {
                        let mut neighbour = cell;
                        neighbour[a] = next[a];
                        grid.is_reflective(neighbour)
                    })
                    .collect();
                if mirrors.is_empty() {
                    // Only the diagonal cell is a mirror
                    mirrors = changed;
                }
                for axis in mirrors {
                    v = Self::reflect(v, Self::axis_normal(&binv, axis));
                }
                t = v.normalize_or_zero();
                continue;
            }

            u = u_next;
            x = self.unit_to_world(u);
            cell = next;

            let translucency = grid.translucency_at(cell);
            if translucency <= 0.0 {
                intensity = 0.0;
                result.outcome = MarchOutcome::Absorbed;
                break;
            }
            if translucency < 1.0 {
                intensity *= translucency.powf(attenuation_exponent);
                if intensity < params.min_intensity {
                    result.outcome = MarchOutcome::Absorbed;
                    break;
                }
            }

            let (_, gradient_lattice) = grid.sample(l_next, cell);
            let gradient_unit = gradient_lattice * self.dims_f64() * 0.5;
            v += binv_t * gradient_unit * ds;
            t = v.normalize_or_zero();
            if t == DVec3::ZERO {
                log::debug!("Ray stalled in volume {}", self.header.name);
                result.outcome = MarchOutcome::Absorbed;
                break;
            }
        }

        if result.outcome == MarchOutcome::Exited {
            result.outcome = MarchOutcome::StepLimit;
        }
        result.position = x;
        result.direction = t;
        result.intensity = intensity;
        result
    }

    /// Iso-surface of the index field in world coordinates.
    pub fn to_mesh(&self, threshold: f64) -> Mesh {
        let [w, h, d] = self.grid.dimensions();
        let mut mesh = volume_to_mesh(&self.grid.ior, w, h, d, threshold);
        for p in &mut mesh.positions {
            *p = self.lattice_to_world(*p + DVec3::splat(0.5));
        }
        Mesh::new(mesh.positions, mesh.indices, None)
    }
}

impl Intersect for OpticalVolume {
    /// Entry into the unit cube; the normal is the outward normal of the entry face.
    fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<Hit> {
        let local = Ray::new(
            self.inverse.transform_point3(ray.origin),
            self.inverse.transform_vector3(ray.direction),
        );
        let inside = Aabb::UNIT_CUBE.clip(&local, ray_t)?;
        if !ray_t.surrounds(inside.min) {
            return None;
        }
        let t = inside.min;
        let entry = local.at(t);
        let axis = (0..3)
            .max_by(|&a, &b| entry[a].abs().total_cmp(&entry[b].abs()))
            .unwrap_or(0);
        let mut normal = DVec3::ZERO;
        normal[axis] = -local.direction[axis].signum();
        Some(Hit::new(
            t,
            ray.at(t),
            self.transformation.transform_normal3(normal),
        ))
    }
}

impl ObjectAttributes for OpticalVolume {
    fn kind(&self) -> &'static str {
        "volume"
    }

    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ObjectHeader {
        &mut self.header
    }

    fn set_own_value(&mut self, column: Column, value: &Value) -> OpticsResult<()> {
        match column {
            Column::Transformation => {
                let m = value.as_matrix(column)?;
                let det = m.determinant();
                if det == 0.0 || !det.is_finite() {
                    return Err(OpticsError::InvalidValue {
                        column,
                        expected: "an invertible matrix",
                    });
                }
                self.set_transformation(m);
            }
            Column::VolumeScaling => {
                let s = value.as_finite(column)?;
                if s <= 0.0 {
                    return Err(OpticsError::InvalidValue {
                        column,
                        expected: "a positive number",
                    });
                }
                self.volume_scaling = s;
            }
            Column::MaxSteps => self.max_steps = value.as_count(column)?,
            _ => return unsupported(self.kind(), column),
        }
        Ok(())
    }

    fn own_value(&self, column: Column) -> OpticsResult<Value> {
        Ok(match column {
            Column::Transformation => Value::Matrix(self.transformation),
            Column::VolumeScaling => Value::Scalar(self.volume_scaling),
            Column::MaxSteps => Value::Int(self.max_steps as i64),
            _ => return unsupported(self.kind(), column),
        })
    }
}
