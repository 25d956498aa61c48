//! Optica Core - optical object model, volumes and volume pipelines.
//!
//! This crate provides:
//!
//! - **Optical objects**: `OpticalSurface`, `OpticalVolume`, `MeshObject` behind
//!   the tagged `OpticalObject`, configured through `Column`/`Value` records
//! - **Volumes**: voxel grids of refractive index and translucency, with a
//!   gradient-index ray march and iso-surface extraction
//! - **Volume pipelines**: generation and diffusion-solve steps driven by
//!   externally compiled expressions
//!
//! # Example
//!
//! ```ignore
//! use optica_core::{Scene, SurfaceType};
//!
//! let mut scene = Scene::new("lens");
//! let id = scene.add_surface(|s| s.with_surface_type(SurfaceType::Spherical));
//! let mesh = scene.get(id).and_then(|o| o.as_surface()).map(|s| s.to_mesh(16, 32));
//! ```

#[macro_use]
mod macros;

pub mod column;
pub mod error;
pub mod expression;
pub mod id;
pub mod intersect;
pub mod isosurface;
pub mod material;
pub mod mesh;
pub mod object;
pub mod pipeline;
pub mod scene;
pub mod solver;
pub mod surface;
pub mod texture;
pub mod volume;

// Re-export commonly used types
pub use column::{Column, Value};
pub use error::{ExpressionError, OpticsError, OpticsResult};
pub use expression::{Constant, EvalContext, Expression, FnExpression, VariableRef, Variables};
pub use id::{IdAllocator, ObjectId};
pub use intersect::{Hit, Intersect};
pub use isosurface::volume_to_mesh;
pub use material::{reflect, refract, AlphaCalculation, AnchorPoint, MaterialType, SurfaceMaterial};
pub use mesh::{Mesh, MeshObject};
pub use object::{ObjectAttributes, ObjectHeader, OpticalObject};
pub use pipeline::{
    CalculationStep, GenerationStep, PipelineLimits, PipelineState, RunReport, SolveStep,
    VolumePipeline,
};
pub use scene::Scene;
pub use solver::{solve_diffusion, SolverConfig};
pub use surface::{OpticalSurface, SurfaceShape, SurfaceType};
pub use texture::{Texture, TextureMapping};
pub use volume::{MarchOutcome, MarchParams, MarchResult, OpticalVolume, VolumeGrid};
