//! Demonstration scene: a collimated emitter, a graded-index volume and a
//! hyperbolic lens.

use std::sync::Arc;

use anyhow::{Context, Result};
use optica_core::{
    Constant, Expression, FnExpression, GenerationStep, MaterialType, ObjectId, Scene, SolveStep,
    SurfaceMaterial, SurfaceType, Value, VolumeGrid, VolumePipeline,
};
use optica_math::DVec3;

/// World box covered by the volume, `[min_x, min_y, min_z, max_x, max_y, max_z]`.
const VOLUME_BOUNDS: [f64; 6] = [-6.0, -2.0, -2.0, -4.0, 2.0, 2.0];

/// Cells closer to the axis than this keep the core index.
const CORE_RADIUS: f64 = 0.3;

pub struct DemoScene {
    pub scene: Scene,
    pub emitter: ObjectId,
    pub lens: ObjectId,
    pub volume: Option<ObjectId>,
}

/// Focus of the lens for a collimated beam along +x.
pub fn design_focus() -> DVec3 {
    DVec3::new(2.0 + 2.0_f64.sqrt(), 0.0, 0.0)
}

/// Build the scene. `resolution` is the volume cell count across y and z,
/// `core_ior` the index on the axis; no volume is added when it is 1.
pub fn build(resolution: usize, core_ior: f64) -> Result<DemoScene> {
    let mut scene = Scene::new("demo");

    let emitter = scene.add_surface(|s| {
        s.with_position(DVec3::new(-10.0, 0.0, 0.0))
            .with_direction(DVec3::X)
            .with_radii(0.0, 1.0)
            .with_material(SurfaceMaterial::default().with_color([255, 230, 200, 255]))
    });
    let lens = scene.add_surface(|s| {
        s.with_surface_type(SurfaceType::Hyperbolic)
            .with_radii(0.0, 2.0)
            .with_material(SurfaceMaterial::default().with_iors(1.0, 2.0_f64.sqrt()))
    });
    // Catches stray light behind the emitter
    scene.add_surface(|s| {
        s.with_position(DVec3::new(-11.0, 0.0, 0.0))
            .with_direction(DVec3::X)
            .with_material(SurfaceMaterial::default().with_material(MaterialType::Absorption))
    });

    let volume = if core_ior != 1.0 {
        Some(add_graded_volume(&mut scene, resolution, core_ior)?)
    } else {
        None
    };

    Ok(DemoScene {
        scene,
        emitter,
        lens,
        volume,
    })
}

// Index diffused between the core and the clear outer faces, computed by a
// volume pipeline at creation.
fn add_graded_volume(scene: &mut Scene, resolution: usize, core_ior: f64) -> Result<ObjectId> {
    let resolution = resolution.max(2);
    scene.variables.set("core_ior", Value::Scalar(core_ior));
    let volume = scene.add_volume(VolumeGrid::new(1, 1, 1), |v| v);

    let n = resolution as f64;
    let size: Arc<dyn Expression> = Arc::new(Constant(Value::List(vec![(n / 2.0).ceil(), n, n])));
    let bounds: Arc<dyn Expression> = Arc::new(Constant(Value::List(VOLUME_BOUNDS.to_vec())));
    let is_given: Arc<dyn Expression> = Arc::new(FnExpression::new(
        "core || outer face",
        move |ctx| {
            let p = ctx.position;
            let core = p.y * p.y + p.z * p.z < CORE_RADIUS * CORE_RADIUS;
            let [_, y, z] = ctx.cell;
            let face = y == 0 || z == 0 || y + 1 == resolution || z + 1 == resolution;
            Ok(Value::Bool(core || face))
        },
    ));
    let given_value: Arc<dyn Expression> = Arc::new(
        FnExpression::new("core ? core_ior : 1", |ctx| {
            let p = ctx.position;
            if p.y * p.y + p.z * p.z < CORE_RADIUS * CORE_RADIUS {
                Ok(ctx.variable("core_ior").cloned().unwrap_or(Value::Scalar(1.0)))
            } else {
                Ok(Value::Scalar(1.0))
            }
        })
        .with_dependencies(["core_ior"]),
    );

    let pipeline = VolumePipeline::new("graded index", volume)
        .with_calculate_at_creation(true)
        .with_auto_update(true)
        .with_step(GenerationStep::new(size).with_bounds(bounds))
        .with_step(SolveStep {
            given_value: Some(given_value),
            is_given: Some(is_given),
            translucency: Some(Arc::new(Constant(Value::Scalar(0.98)))),
            ..SolveStep::default()
        });
    let (_, result) = scene.attach_pipeline(pipeline);
    if let Some(result) = result {
        let report = result.context("Failed to compute the graded-index volume")?;
        log::info!("Volume pipeline ran {} step(s)", report.executed);
    }
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use optica_core::OpticalObject;

    #[test]
    fn test_demo_without_volume() {
        let demo = build(8, 1.0).unwrap();
        assert!(demo.volume.is_none());
        assert_eq!(demo.scene.object_count(), 3);
        assert!(demo.scene.get(demo.lens).and_then(OpticalObject::as_surface).is_some());
    }

    #[test]
    fn test_graded_volume_peaks_on_axis() {
        let demo = build(12, 1.3).unwrap();
        let volume = demo
            .scene
            .get(demo.volume.unwrap())
            .and_then(OpticalObject::as_volume)
            .unwrap();
        let grid = volume.grid();
        assert_eq!(grid.dimensions(), [6, 12, 12]);
        let axis = grid.ior[grid.index(3, 6, 6)];
        let edge = grid.ior[grid.index(3, 0, 6)];
        assert!((axis - 1.3).abs() < 1e-3);
        assert!((edge - 1.0).abs() < 1e-3);
        let between = grid.ior[grid.index(3, 3, 6)];
        assert!(between > 1.0 && between < 1.3);
        let b = volume.bounds();
        assert!((b.x.min + 6.0).abs() < 1e-9 && (b.y.max - 2.0).abs() < 1e-9);
    }
}
