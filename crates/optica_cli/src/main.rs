//! Optica command line: trace a demonstration scene and report where it focuses.
//!
//! Usage: `optica [run_config.json]`. Without a config the defaults are used.

mod demo;
mod focus;
mod wavefront;

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use optica_core::OpticalObject;
use optica_tracer::{GeneratorConfig, RayGenerator, TraceConfig, Tracer};
use serde::Deserialize;

/// Everything a run reads from its JSON config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RunConfig {
    /// Number of rays to trace
    rays: usize,
    trace: TraceConfig,
    generator: GeneratorConfig,
    /// Volume cells across the beam
    volume_resolution: usize,
    /// Index on the volume axis, 1 leaves the volume out
    core_ior: f64,
    /// Export the lens patch as OBJ
    lens_obj: Option<PathBuf>,
    /// Export the volume iso-surface as OBJ
    iso_obj: Option<PathBuf>,
    iso_threshold: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            rays: 10_000,
            trace: TraceConfig::default(),
            generator: GeneratorConfig::default(),
            volume_resolution: 24,
            core_ior: 1.05,
            lens_obj: None,
            iso_obj: None,
            iso_threshold: 1.025,
        }
    }
}

fn load_config() -> Result<RunConfig> {
    let Some(path) = env::args().nth(1) else {
        log::info!("No run config given, using defaults");
        return Ok(RunConfig::default());
    };
    let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path))
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = load_config()?;
    let demo = demo::build(config.volume_resolution, config.core_ior)?;
    log::info!(
        "Scene '{}' with {} objects",
        demo.scene.name,
        demo.scene.object_count()
    );

    let generator = RayGenerator::new(demo.emitter, config.generator);
    let tracer = Tracer::new(&demo.scene, config.trace.clone());
    let start = Instant::now();
    let batch = tracer
        .trace_batch(&generator, config.rays)
        .context("Failed to trace the batch")?;
    let elapsed = start.elapsed();

    let stats = focus::analyze(&batch);
    println!("Traced {} rays in {:.2?}", batch.len(), elapsed);
    println!("Rejected: {}", batch.rejected_count());
    println!("Escaped rays used for the focus: {}", stats.rays);
    match stats.focus {
        Some(point) => {
            println!("Focus: ({:.5}, {:.5}, {:.5})", point.x, point.y, point.z);
            println!("RMS spread: {:.6}", stats.rms_spread);
            println!(
                "Shift from the lens focus: {:.5}",
                (point - demo::design_focus()).length()
            );
        }
        None => println!("Focus: none, rays are parallel"),
    }
    println!("Mean intensity: {:.4}", stats.mean_intensity);

    if let Some(path) = &config.lens_obj {
        let lens = demo
            .scene
            .get(demo.lens)
            .and_then(OpticalObject::as_surface)
            .context("Lens missing from the scene")?;
        wavefront::save_obj(&lens.to_mesh(32, 16), "lens", path)?;
    }
    if let Some(path) = &config.iso_obj {
        match demo
            .volume
            .and_then(|id| demo.scene.get(id))
            .and_then(OpticalObject::as_volume)
        {
            Some(volume) => {
                let mut mesh = volume.to_mesh(config.iso_threshold);
                mesh.compute_normals();
                wavefront::save_obj(&mesh, "iso", path)?;
            }
            None => log::warn!("No volume in the scene, skipping {}", path.display()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_defaults_fill_gaps() {
        let config: RunConfig = serde_json::from_str(
            r#"{ "rays": 64, "trace": { "seed": 3 }, "iso_obj": "iso.obj" }"#,
        )
        .unwrap();
        assert_eq!(config.rays, 64);
        assert_eq!(config.trace.seed, 3);
        assert_eq!(config.trace.max_bounces, 10);
        assert!(config.generator.three_dimensional);
        assert_eq!(config.iso_obj, Some(PathBuf::from("iso.obj")));
        assert!(config.lens_obj.is_none());
    }

    #[test]
    fn test_lens_alone_focuses_at_design_point() {
        let demo = demo::build(8, 1.0).unwrap();
        let generator = RayGenerator::new(demo.emitter, GeneratorConfig::default());
        let tracer = Tracer::new(
            &demo.scene,
            TraceConfig {
                seed: 1,
                ..TraceConfig::default()
            },
        );
        let batch = tracer.trace_batch(&generator, 200).unwrap();
        let stats = focus::analyze(&batch);
        assert_eq!(stats.rays, 200);
        let point = stats.focus.unwrap();
        assert!((point - demo::design_focus()).length() < 1e-3, "focus {:?}", point);
        assert!(stats.rms_spread < 1e-3);
    }
}
