//! Optica Tracer - ray generation and propagation through optical scenes.
//!
//! This crate provides:
//!
//! - **Ray generation**: seed rays from surface and mesh sources, with
//!   Lambertian spread and deterministic preview modes
//! - **Propagation**: refraction, reflection, absorption and volume marches
//!   until a ray leaves the scene or runs out of bounces
//! - **Batches**: rayon-parallel generation and tracing over disjoint slices
//!
//! # Example
//!
//! ```ignore
//! use optica_tracer::{RayGenerator, GeneratorConfig, TraceConfig, Tracer};
//!
//! let generator = RayGenerator::new(source_id, GeneratorConfig::default());
//! let tracer = Tracer::new(&scene, TraceConfig::default());
//! let batch = tracer.trace_batch(&generator, 10_000)?;
//! ```

mod generator;
mod propagator;
mod random;
mod ray_state;

pub use generator::{GeneratorConfig, RayGenerator};
pub use propagator::{
    Acceptance, ForceEndpoint, RayRecord, Termination, TraceBatch, TraceConfig, TraceOutcome,
    Tracer, UnacceptedBehavior,
};
pub use random::{FixedSource, PrngSource, RandomSource};
pub use ray_state::RayState;
