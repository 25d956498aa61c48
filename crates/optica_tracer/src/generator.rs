//! Ray generation from surface and mesh sources.
//!
//! A [`RayGenerator`] samples start positions and directions on one source
//! object. The geometry derived from the source (aperture basis and opening
//! angle) is cached and recomputed only when the source's modification
//! counter moves.

use std::f64::consts::TAU;
use std::sync::{Mutex, MutexGuard};

use optica_core::surface::arc_open;
use optica_core::{
    MeshObject, ObjectId, OpticalObject, OpticalSurface, OpticsError, OpticsResult, Scene,
    SurfaceType,
};
use optica_math::{orthogonal_basis, perpendicular_xy, DVec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::random::{FixedSource, PrngSource, RandomSource};
use crate::ray_state::RayState;

/// Draws before disk rejection sampling gives up and uses the centre.
const MAX_REJECTIONS: usize = 64;

/// Sampling options of a [`RayGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Sample the whole aperture instead of a deterministic fan in the xy-plane
    pub three_dimensional: bool,
    /// Replace every random draw by 0.5
    pub ignore_random: bool,
    /// Fixed elevation in radians for spherical sources
    pub elevation: Option<f64>,
    /// Fixed azimuth in radians for spherical sources
    pub azimuth: Option<f64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            three_dimensional: true,
            ignore_random: false,
            elevation: None,
            azimuth: None,
        }
    }
}

/// Geometry derived from the source, valid for one modification count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SourceGeometry {
    id: ObjectId,
    mod_count: u64,
    three_dimensional: bool,
    v0: DVec3,
    v1: DVec3,
    arc_open: f64,
    /// `1 - cos(arc_open)`
    cos_arc_open: f64,
}

impl SourceGeometry {
    fn new(source: &OpticalObject, three_dimensional: bool) -> Self {
        let mut geometry = Self {
            id: source.id(),
            mod_count: source.mod_count(),
            three_dimensional,
            v0: DVec3::ZERO,
            v1: DVec3::ZERO,
            arc_open: 0.0,
            cos_arc_open: 0.0,
        };
        let Some(surface) = source.as_surface() else {
            return geometry;
        };

        let direction = surface.direction();
        let radius = match surface.surface_type() {
            SurfaceType::Flat => surface.max_radius(),
            SurfaceType::Spherical => surface.length(),
            _ => return geometry,
        };
        if three_dimensional {
            let (v0, v1) = orthogonal_basis(direction);
            geometry.v0 = v0.normalize_or_zero() * radius;
            geometry.v1 = v1.normalize_or_zero() * radius;
        } else {
            geometry.v0 = in_plane_normal(direction) * radius;
        }

        if surface.surface_type() == SurfaceType::Spherical {
            let arc = arc_open(surface.max_radius(), surface.length());
            if arc.is_finite() {
                geometry.arc_open = arc;
                geometry.cos_arc_open = 1.0 - arc.cos();
            } else {
                log::debug!("Source {} has no defined aperture, emitting along its axis", surface.header.name);
            }
        }
        geometry
    }

    fn is_valid_for(&self, source: &OpticalObject, three_dimensional: bool) -> bool {
        self.id == source.id()
            && self.mod_count == source.mod_count()
            && self.three_dimensional == three_dimensional
    }
}

// Unit vector perpendicular to `direction` within the xy-plane.
fn in_plane_normal(direction: DVec3) -> DVec3 {
    let perpendicular = perpendicular_xy(direction);
    if perpendicular.length_squared() == 0.0 {
        orthogonal_basis(direction).0.normalize_or_zero()
    } else {
        perpendicular.normalize()
    }
}

// Position of lane `index` in a fan of `total` lanes, spread over [-1, 1].
fn fan(index: usize, total: usize) -> f64 {
    if total <= 1 {
        0.0
    } else {
        (2.0 * index as f64 - total as f64 + 1.0) / (total as f64 - 1.0)
    }
}

// Uniform point in the disk of radius 0.5 by rejection from the square.
fn sample_disk(rng: &mut dyn RandomSource) -> (f64, f64) {
    for _ in 0..MAX_REJECTIONS {
        let alpha = rng.next() - 0.5;
        let beta = rng.next() - 0.5;
        if alpha * alpha + beta * beta <= 0.25 {
            return (alpha, beta);
        }
    }
    (0.0, 0.0)
}

/// Cosine-weighted spread of the unit `direction` within a cone set by `diffuse`.
///
/// A disk sample around +Z is mapped onto `direction` by the Householder
/// reflection that swaps the two.
pub(crate) fn lambertian(direction: DVec3, diffuse: f64, rng: &mut dyn RandomSource) -> DVec3 {
    let w = (rng.next() * diffuse * diffuse).min(1.0);
    let rho = rng.next() * TAU;
    let r = w.sqrt();
    let sample = DVec3::new(r * rho.cos(), r * rho.sin(), (1.0 - w).sqrt());

    let v = direction - DVec3::Z;
    let vv = v.length_squared();
    if vv < 1e-6 {
        sample
    } else {
        sample - v * (2.0 * v.dot(sample) / vv)
    }
}

// Rotation about z by asin(w), the planar counterpart of `lambertian`.
fn planar_spread(direction: DVec3, diffuse: f64, rng: &mut dyn RandomSource) -> DVec3 {
    let w = ((2.0 * rng.next() - 1.0) * diffuse).clamp(-1.0, 1.0);
    let h = (1.0 - w * w).sqrt();
    DVec3::new(
        direction.x * h + direction.y * w,
        direction.y * h - direction.x * w,
        direction.z * h,
    )
}

/// Samples rays on one source object.
#[derive(Debug)]
pub struct RayGenerator {
    source: ObjectId,
    config: GeneratorConfig,
    cache: Mutex<Option<SourceGeometry>>,
}

impl RayGenerator {
    pub fn new(source: ObjectId, config: GeneratorConfig) -> Self {
        Self {
            source,
            config,
            cache: Mutex::new(None),
        }
    }

    pub fn source(&self) -> ObjectId {
        self.source
    }

    pub fn set_source(&mut self, source: ObjectId) {
        self.source = source;
        *self.lock_cache() = None;
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GeneratorConfig) {
        self.config = config;
    }

    /// Look the source up in `scene`.
    pub fn resolve<'s>(&self, scene: &'s Scene) -> OpticsResult<&'s OpticalObject> {
        let source = scene
            .get(self.source)
            .ok_or(OpticsError::UnknownObject(self.source))?;
        match source {
            OpticalObject::Volume(_) => Err(OpticsError::NotASource(self.source)),
            _ => Ok(source),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<SourceGeometry>> {
        // The cached value is plain data; a panic elsewhere cannot leave it half written
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached geometry of `source`, recomputed if the source changed.
    pub(crate) fn prepare(&self, source: &OpticalObject) -> OpticsResult<SourceGeometry> {
        if let OpticalObject::Volume(_) = source {
            return Err(OpticsError::NotASource(source.id()));
        }
        let three_dimensional = self.config.three_dimensional;
        let mut cache = self.lock_cache();
        if let Some(geometry) = *cache {
            if geometry.is_valid_for(source, three_dimensional) {
                return Ok(geometry);
            }
        }
        log::debug!(
            "Initializing ray source {} at modification {}",
            source.name(),
            source.mod_count()
        );
        let geometry = SourceGeometry::new(source, three_dimensional);
        *cache = Some(geometry);
        Ok(geometry)
    }

    /// Generate ray `index` of a batch of `total`.
    pub fn generate(
        &self,
        source: &OpticalObject,
        index: usize,
        total: usize,
        rng: &mut dyn RandomSource,
    ) -> OpticsResult<RayState> {
        let geometry = self.prepare(source)?;
        Ok(self.sample(&geometry, source, index, total, rng))
    }

    /// Generate rays `begin..begin + out.len()` of a batch of `total` into `out`.
    pub fn generate_into(
        &self,
        source: &OpticalObject,
        begin: usize,
        total: usize,
        out: &mut [RayState],
        rng: &mut dyn RandomSource,
    ) -> OpticsResult<()> {
        let geometry = self.prepare(source)?;
        for (offset, ray) in out.iter_mut().enumerate() {
            *ray = self.sample(&geometry, source, begin + offset, total, rng);
        }
        Ok(())
    }

    /// Generate `total` rays in parallel.
    ///
    /// Chunk `k` of `chunk_size` rays draws from its own generator seeded
    /// with `seed + k`, so the result does not depend on the thread count.
    pub fn generate_batch(
        &self,
        source: &OpticalObject,
        total: usize,
        seed: u64,
        chunk_size: usize,
    ) -> OpticsResult<Vec<RayState>> {
        let geometry = self.prepare(source)?;
        let chunk_size = chunk_size.max(1);
        let mut rays = vec![RayState::default(); total];
        rays.par_chunks_mut(chunk_size)
            .enumerate()
            .for_each(|(chunk, out)| {
                let mut rng = PrngSource::seeded(chunk_seed(seed, chunk));
                let begin = chunk * chunk_size;
                for (offset, ray) in out.iter_mut().enumerate() {
                    *ray = self.sample(&geometry, source, begin + offset, total, &mut rng);
                }
            });
        Ok(rays)
    }

    pub(crate) fn sample(
        &self,
        geometry: &SourceGeometry,
        source: &OpticalObject,
        index: usize,
        total: usize,
        rng: &mut dyn RandomSource,
    ) -> RayState {
        if self.config.ignore_random {
            self.sample_with(geometry, source, index, total, &mut FixedSource::default())
        } else {
            self.sample_with(geometry, source, index, total, rng)
        }
    }

    fn sample_with(
        &self,
        geometry: &SourceGeometry,
        source: &OpticalObject,
        index: usize,
        total: usize,
        rng: &mut dyn RandomSource,
    ) -> RayState {
        let mut ray = RayState::default();
        let diffuse = match source {
            OpticalObject::Surface(surface) => {
                self.sample_surface(geometry, surface, index, total, rng, &mut ray)
            }
            OpticalObject::Mesh(mesh) => Self::sample_mesh(mesh, rng, &mut ray),
            OpticalObject::Volume(_) => 0.0,
        };

        if diffuse != 0.0 {
            let direction = ray.direction.normalize_or_zero();
            ray.direction = if self.config.three_dimensional || source.as_mesh().is_some() {
                lambertian(direction, diffuse, rng)
            } else {
                planar_spread(direction, diffuse, rng)
            };
        }
        ray
    }

    // Sets position, direction, colour and uv; returns the diffuse coefficient.
    fn sample_surface(
        &self,
        geometry: &SourceGeometry,
        surface: &OpticalSurface,
        index: usize,
        total: usize,
        rng: &mut dyn RandomSource,
        ray: &mut RayState,
    ) -> f64 {
        let material = &surface.material;
        let midpoint = surface.midpoint();
        let axis = surface.direction();
        let mut diffuse = material.diffuse;

        match surface.surface_type() {
            SurfaceType::Flat => {
                ray.direction = axis;
                ray.position = if self.config.three_dimensional {
                    let (alpha, beta) = sample_disk(rng);
                    midpoint + geometry.v0 * (2.0 * alpha) + geometry.v1 * (2.0 * beta)
                } else {
                    midpoint + geometry.v0 * fan(index, total)
                };
            }
            SurfaceType::Spherical => {
                ray.direction = if self.config.three_dimensional {
                    let elevation = self
                        .config
                        .elevation
                        .unwrap_or_else(|| (1.0 - rng.next() * geometry.cos_arc_open).acos());
                    let azimuth = self.config.azimuth.unwrap_or_else(|| rng.next() * TAU);
                    let sin = elevation.sin();
                    axis * elevation.cos()
                        + geometry.v0 * (sin * azimuth.sin())
                        + geometry.v1 * (sin * azimuth.cos())
                } else {
                    let arc = fan(index, total) * geometry.arc_open;
                    axis * arc.cos() + geometry.v0 * arc.sin()
                };
                ray.position = midpoint + ray.direction;
            }
            _ => {
                // Other shapes emit from the midpoint along the axis
                ray.position = midpoint;
                ray.direction = axis;
            }
        }

        let color = surface.color_at(ray.position);
        ray.set_color(color);
        ray.uv = material.texture_mapping.cart_to_tex(ray.position - midpoint);

        if material.alpha_as_radius && surface.surface_type() == SurfaceType::Spherical {
            let alpha = f64::from(color[3]);
            diffuse *= (255.0 / alpha.max(1.0)).sqrt();
            ray.position = midpoint + ray.direction * (alpha / 255.0);
        }
        if material.invert_normal {
            ray.direction = -ray.direction;
        }
        diffuse
    }

    // Meshes emit against their normal unless the normal is inverted.
    fn sample_mesh(mesh: &MeshObject, rng: &mut dyn RandomSource, ray: &mut RayState) -> f64 {
        if mesh.face_count() == 0 {
            log::debug!("Mesh source {} has no faces", mesh.header.name);
            return 0.0;
        }
        let face = mesh.face_for(rng.next());
        let (mut alpha, mut beta) = (rng.next(), rng.next());
        if alpha + beta > 1.0 {
            alpha = 1.0 - alpha;
            beta = 1.0 - beta;
        }
        ray.position = mesh.point(face, alpha, beta);
        let normal = mesh.normal(face, alpha, beta);
        ray.direction = if mesh.material.invert_normal { normal } else { -normal };
        ray.uv = mesh.texture_coord(face, alpha, beta);
        ray.set_color(mesh.color_at(face, alpha, beta));
        mesh.material.diffuse
    }
}

/// Seed of chunk `chunk` in a batch seeded with `seed`.
pub(crate) fn chunk_seed(seed: u64, chunk: usize) -> u64 {
    seed.wrapping_add(chunk as u64)
}
