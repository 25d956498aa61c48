// Re-export glam for convenience
pub use glam::*;

// Optica math types
mod aabb;
mod interval;
mod ray;
mod transform;
mod vector;

pub use aabb::Aabb;
pub use interval::Interval;
pub use ray::Ray;
pub use transform::DMat4Ext;
pub use vector::{orthogonal_basis, perpendicular_xy, signed_sqrt, solve_quadratic};
