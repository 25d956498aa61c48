//! Propagation of rays through a scene.
//!
//! A [`Tracer`] borrows a scene and follows each ray from interaction to
//! interaction: refraction and reflection at surfaces and meshes, colour
//! filters and absorbers, and inline marches through volumes. Batches
//! generate, trace and accept rays in parallel.

use optica_core::{
    reflect, AlphaCalculation, Hit, Intersect, MarchOutcome, MarchParams, MaterialType, ObjectId,
    OpticalObject, OpticsResult, Scene,
};
use optica_math::{DVec3, Interval, Ray};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::generator::{chunk_seed, RayGenerator};
use crate::random::{PrngSource, RandomSource};
use crate::ray_state::RayState;

/// Largest difference at which two refractive indices count as equal.
const IOR_TOLERANCE: f64 = 1e-9;

/// Where an accepted ray has to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ForceEndpoint {
    /// Any end is accepted
    #[default]
    None,
    /// The ray has to leave the scene
    Environment,
    /// The last interaction has to be with this object
    Object(ObjectId),
}

/// What happens to rays that fail their endpoint constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnacceptedBehavior {
    /// Generate and trace again, up to `max_retries` times
    Recalculate,
    /// Keep the ray and mark it as rejected
    #[default]
    Mark,
}

/// Settings of a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Maximum interactions per ray
    pub max_bounces: usize,
    /// Minimum ray parameter of an intersection, avoids re-hitting the last object
    pub epsilon: f64,
    /// Distance escaped rays are moved along their direction
    pub escape_distance: f64,
    /// Also trace backwards from the start point
    pub bidirectional: bool,
    /// Constraint on the end of the backward trace
    pub force_start: ForceEndpoint,
    /// Constraint on the end of the forward trace
    pub force_end: ForceEndpoint,
    pub unaccepted: UnacceptedBehavior,
    /// Regenerations of one ray under [`UnacceptedBehavior::Recalculate`]
    pub max_retries: usize,
    /// Only consider objects whose incoming index matches the current medium
    pub verify_ior: bool,
    /// Start with the source colour instead of white
    pub read_color_generation: bool,
    /// Multiply in the colour of the terminal object or the environment
    pub read_color_end: bool,
    /// Seed of the batch random streams
    pub seed: u64,
    /// Rays per parallel work item
    pub chunk_size: usize,
    /// Record every interaction point
    pub record_trajectory: bool,
    /// Volume marches absorb rays below this intensity
    pub min_intensity: f64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_bounces: 10,
            epsilon: 0.001,
            escape_distance: 10_000.0,
            bidirectional: false,
            force_start: ForceEndpoint::None,
            force_end: ForceEndpoint::None,
            unaccepted: UnacceptedBehavior::Mark,
            max_retries: 16,
            verify_ior: false,
            read_color_generation: true,
            read_color_end: true,
            seed: 0,
            chunk_size: 256,
            record_trajectory: false,
            min_intensity: 0.0,
        }
    }
}

/// Why a trace stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Nothing left to hit
    Escaped,
    /// Stopped by an absorbing object
    Absorbed(ObjectId),
    /// Stopped by a deleting object
    Deleted(ObjectId),
    /// Absorbed inside a volume
    VolumeAbsorbed(ObjectId),
    /// A volume march ran out of steps
    VolumeStalled(ObjectId),
    /// The bounce ceiling was reached
    BounceLimit,
    /// The direction degenerated to zero
    Stalled,
}

/// Result of tracing one ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOutcome {
    pub termination: Termination,
    /// Object of the last interaction, `None` if nothing was hit
    pub last_object: Option<ObjectId>,
}

impl TraceOutcome {
    /// True if the ray satisfies `force`. Deleted rays never do.
    pub fn satisfies(&self, force: ForceEndpoint) -> bool {
        if let Termination::Deleted(_) = self.termination {
            return false;
        }
        match force {
            ForceEndpoint::None => true,
            ForceEndpoint::Environment => self.termination == Termination::Escaped,
            ForceEndpoint::Object(id) => self.last_object == Some(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accepted,
    Rejected,
}

/// One generated ray and its traces.
#[derive(Debug, Clone)]
pub struct RayRecord {
    /// State right after generation
    pub start: RayState,
    /// State at the end of the forward trace
    pub end: RayState,
    pub outcome: TraceOutcome,
    /// End state and outcome of the backward trace
    pub backward: Option<(RayState, TraceOutcome)>,
    pub acceptance: Acceptance,
    /// Generations needed, 1 unless recalculated
    pub attempts: usize,
}

/// Result of [`Tracer::trace_batch`], in generation order.
#[derive(Debug, Clone, Default)]
pub struct TraceBatch {
    pub records: Vec<RayRecord>,
}

impl TraceBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn accepted(&self) -> impl Iterator<Item = &RayRecord> {
        self.records
            .iter()
            .filter(|r| r.acceptance == Acceptance::Accepted)
    }

    pub fn rejected_count(&self) -> usize {
        self.records.len() - self.accepted().count()
    }
}

/// Traces rays through a borrowed scene.
///
/// The active objects are collected once; the scene must not change while
/// the tracer exists.
pub struct Tracer<'a> {
    scene: &'a Scene,
    active: Vec<&'a OpticalObject>,
    config: TraceConfig,
}

impl<'a> Tracer<'a> {
    pub fn new(scene: &'a Scene, config: TraceConfig) -> Self {
        let active = scene.objects().iter().filter(|o| o.is_active()).collect();
        Self {
            scene,
            active,
            config,
        }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    fn nearest(
        &self,
        ray: &Ray,
        ids: Option<&[ObjectId]>,
        medium: Option<f64>,
    ) -> Option<(&'a OpticalObject, Hit)> {
        let mut range = Interval::new(self.config.epsilon, f64::INFINITY);
        let mut nearest = None;
        let allowed = |o: &&OpticalObject| ids.map_or(true, |ids| ids.contains(&o.id()));
        for object in self.active.iter().copied().filter(allowed) {
            let Some(hit) = object.intersect(ray, range) else {
                continue;
            };
            if let (true, Some(medium), Some(material)) =
                (self.config.verify_ior, medium, object.material())
            {
                if (material.incoming_ior(ray.direction, hit.normal) - medium).abs() > IOR_TOLERANCE {
                    continue;
                }
            }
            range = range.with_max(hit.t);
            nearest = Some((object, hit));
        }
        nearest
    }

    fn color_of(&self, object: &OpticalObject, hit: &Hit) -> [u8; 4] {
        match object {
            OpticalObject::Surface(surface) => surface.color_at(hit.point),
            OpticalObject::Mesh(mesh) => match (&mesh.material.texture, hit.uv) {
                (Some(texture), Some(uv)) => texture.texel(uv),
                _ => mesh.material.color,
            },
            OpticalObject::Volume(_) => [255; 4],
        }
    }

    fn environment_color(&self, direction: DVec3) -> [u8; 4] {
        match &self.scene.environment {
            Some(texture) => texture.texel(self.scene.environment_mapping.cart_to_tex(direction)),
            None => [0, 0, 0, 0],
        }
    }

    /// Follow `ray` until it leaves the scene, stops or runs out of bounces.
    ///
    /// `ids` restricts the objects considered for the first interaction;
    /// after that the successor or predecessor lists of the objects hit apply.
    pub fn trace_ray(
        &self,
        ray: &mut RayState,
        ids: Option<&[ObjectId]>,
        rng: &mut dyn RandomSource,
    ) -> TraceOutcome {
        let mut candidates = ids;
        let mut medium: Option<f64> = None;
        let mut last_object = None;
        let mut last_hit: Option<(&'a OpticalObject, Hit)> = None;
        ray.record();

        let termination = loop {
            if ray.bounces >= self.config.max_bounces {
                break Termination::BounceLimit;
            }
            ray.direction = ray.direction.normalize_or_zero();
            if ray.direction == DVec3::ZERO {
                break Termination::Stalled;
            }

            let probe = Ray::new(ray.position, ray.direction);
            let Some((object, hit)) = self.nearest(&probe, candidates, medium) else {
                ray.position += ray.direction * self.config.escape_distance;
                ray.record();
                break Termination::Escaped;
            };
            ray.position = hit.point;
            ray.bounces += 1;
            ray.record();
            last_object = Some(object.id());
            last_hit = Some((object, hit));

            let (material, header) = match object {
                OpticalObject::Surface(surface) => (&surface.material, &surface.header),
                OpticalObject::Mesh(mesh) => (&mesh.material, &mesh.header),
                OpticalObject::Volume(volume) => {
                    let result = volume.march(
                        hit.point,
                        ray.direction,
                        MarchParams {
                            intensity: ray.intensity,
                            min_intensity: self.config.min_intensity,
                            cancel: None,
                        },
                    );
                    ray.position = result.position;
                    ray.direction = result.direction;
                    ray.intensity = result.intensity;
                    ray.record();
                    match result.outcome {
                        MarchOutcome::Exited => {
                            candidates = volume.header.successors.as_deref();
                            medium = None;
                            continue;
                        }
                        MarchOutcome::Absorbed => break Termination::VolumeAbsorbed(object.id()),
                        MarchOutcome::StepLimit | MarchOutcome::Cancelled => {
                            break Termination::VolumeStalled(object.id())
                        }
                    }
                }
            };

            let c = ray.direction.dot(hit.normal);
            let incoming = material.incoming_ior(ray.direction, hit.normal);
            match material.material {
                MaterialType::Absorption => {
                    let filter = material.color[3] != 255
                        && material.alpha_calculation != AlphaCalculation::Ignore;
                    if !filter {
                        break Termination::Absorbed(object.id());
                    }
                    let color = self.color_of(object, &hit);
                    match material.alpha_calculation {
                        AlphaCalculation::Mult => ray.multiply_color(color),
                        AlphaCalculation::Mix => ray.mix_color(color),
                        AlphaCalculation::Ignore => {}
                    }
                }
                MaterialType::Deletion => break Termination::Deleted(object.id()),
                MaterialType::Refraction => {
                    ray.direction = material.refract(ray.direction, hit.normal);
                    // Transmitted rays keep the sign of c; reflected ones flip it
                    medium = Some(if ray.direction.dot(hit.normal) * c > 0.0 {
                        if c < 0.0 {
                            material.ior1()
                        } else {
                            material.ior0()
                        }
                    } else {
                        incoming
                    });
                }
                MaterialType::Reflection => {
                    ray.direction = reflect(ray.direction, hit.normal);
                    medium = Some(incoming);
                }
                MaterialType::Random => {
                    let jitter = DVec3::new(rng.next() - 0.5, rng.next() - 0.5, rng.next() - 0.5);
                    ray.direction = hit.normal + jitter;
                    medium = Some(incoming);
                }
            }

            candidates = if c < 0.0 {
                header.successors.as_deref()
            } else {
                header.predecessors.as_deref()
            };

            if material.diffuse != 0.0 {
                let spread = ray.direction.length() * material.diffuse;
                ray.direction += DVec3::new(rng.next() - 0.5, rng.next() - 0.5, rng.next() - 0.5) * spread;
            }
        };

        if self.config.read_color_end {
            let color = match (termination, last_hit) {
                (Termination::Escaped, _) | (_, None) => self.environment_color(ray.direction),
                (_, Some((object, hit))) => self.color_of(object, &hit),
            };
            ray.multiply_color(color);
        }

        TraceOutcome {
            termination,
            last_object,
        }
    }

    /// Generate and trace ray `index` of `total`, applying the endpoint constraints.
    fn trace_one(
        &self,
        generator: &RayGenerator,
        geometry: &crate::generator::SourceGeometry,
        source: &OpticalObject,
        index: usize,
        total: usize,
        rng: &mut dyn RandomSource,
    ) -> RayRecord {
        let header = source.header();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let start = generator.sample(geometry, source, index, total, rng);

            let mut end = start.clone();
            if !self.config.read_color_generation {
                end.color = [1.0; 4];
            }
            if self.config.record_trajectory {
                end.trajectory = Some(Vec::new());
            }
            let outcome = self.trace_ray(&mut end, header.successors.as_deref(), rng);
            let mut accepted = outcome.satisfies(self.config.force_end);

            let mut backward = None;
            if accepted && self.config.bidirectional {
                let mut back = start.clone();
                back.direction = -start.direction;
                if !self.config.read_color_generation {
                    back.color = [1.0; 4];
                }
                if self.config.record_trajectory {
                    back.trajectory = Some(Vec::new());
                }
                let back_outcome = self.trace_ray(&mut back, header.predecessors.as_deref(), rng);
                accepted = back_outcome.satisfies(self.config.force_start);
                backward = Some((back, back_outcome));
            }

            let give_up = self.config.unaccepted == UnacceptedBehavior::Mark
                || attempts > self.config.max_retries;
            if accepted || give_up {
                return RayRecord {
                    start,
                    end,
                    outcome,
                    backward,
                    acceptance: if accepted {
                        Acceptance::Accepted
                    } else {
                        Acceptance::Rejected
                    },
                    attempts,
                };
            }
        }
    }

    /// Generate and trace `total` rays from the generator's source in parallel.
    ///
    /// Results are in generation order and reproducible for a fixed seed.
    pub fn trace_batch(&self, generator: &RayGenerator, total: usize) -> OpticsResult<TraceBatch> {
        let source = generator.resolve(self.scene)?;
        let geometry = generator.prepare(source)?;
        let chunk_size = self.config.chunk_size.max(1);
        let chunks = total.div_ceil(chunk_size);

        let records: Vec<RayRecord> = (0..chunks)
            .into_par_iter()
            .map(|chunk| {
                let mut rng = PrngSource::seeded(chunk_seed(self.config.seed, chunk));
                let begin = chunk * chunk_size;
                let end = (begin + chunk_size).min(total);
                (begin..end)
                    .map(|index| self.trace_one(generator, &geometry, source, index, total, &mut rng))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();

        let batch = TraceBatch { records };
        log::info!(
            "Traced {} rays from {}: {} rejected",
            batch.len(),
            source.name(),
            batch.rejected_count()
        );
        Ok(batch)
    }
}
