//! The scene: owner of all optical objects, textures, variables and volume
//! pipelines.

use std::collections::HashMap;
use std::sync::Arc;

use crate::column::{Column, Value};
use crate::error::{OpticsError, OpticsResult};
use crate::expression::Variables;
use crate::id::{IdAllocator, ObjectId};
use crate::mesh::{Mesh, MeshObject};
use crate::object::OpticalObject;
use crate::pipeline::{RunReport, VolumePipeline};
use crate::surface::OpticalSurface;
use crate::texture::{Texture, TextureMapping};
use crate::volume::{OpticalVolume, VolumeGrid};

/// A complete optical scene.
#[derive(Debug, Default)]
pub struct Scene {
    /// Scene name
    pub name: String,

    ids: IdAllocator,

    /// Objects in insertion order
    objects: Vec<OpticalObject>,

    textures: HashMap<String, Arc<Texture>>,

    /// Texture read by rays leaving the scene
    pub environment: Option<Arc<Texture>>,

    pub environment_mapping: TextureMapping,

    /// Variables visible to pipeline expressions
    pub variables: Variables,

    pipelines: Vec<VolumePipeline>,
}

impl Scene {
    /// Create an empty scene.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ids: IdAllocator::new(),
            ..Default::default()
        }
    }

    /// Reserve an id for an object built outside the scene.
    pub fn allocate_id(&mut self) -> ObjectId {
        self.ids.allocate()
    }

    /// Add an object whose id came from [`Scene::allocate_id`].
    pub fn insert(&mut self, object: impl Into<OpticalObject>) -> ObjectId {
        let mut object = object.into();
        if let Some(material) = object.material_mut() {
            Self::resolve_texture(&self.textures, material);
        }
        let id = object.id();
        self.objects.push(object);
        id
    }

    /// Add a surface configured by `build` and return its id.
    pub fn add_surface(&mut self, build: impl FnOnce(OpticalSurface) -> OpticalSurface) -> ObjectId {
        let id = self.allocate_id();
        self.insert(build(OpticalSurface::new(id)))
    }

    pub fn add_volume(
        &mut self,
        grid: VolumeGrid,
        build: impl FnOnce(OpticalVolume) -> OpticalVolume,
    ) -> ObjectId {
        let id = self.allocate_id();
        self.insert(build(OpticalVolume::new(id, grid)))
    }

    pub fn add_mesh(&mut self, mesh: Mesh, build: impl FnOnce(MeshObject) -> MeshObject) -> ObjectId {
        let id = self.allocate_id();
        self.insert(build(MeshObject::new(id, mesh)))
    }

    /// Remove an object. Pipelines targeting it fail on their next run.
    pub fn remove(&mut self, id: ObjectId) -> Option<OpticalObject> {
        let index = self.objects.iter().position(|o| o.id() == id)?;
        Some(self.objects.remove(index))
    }

    pub fn get(&self, id: ObjectId) -> Option<&OpticalObject> {
        self.objects.iter().find(|o| o.id() == id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut OpticalObject> {
        self.objects.iter_mut().find(|o| o.id() == id)
    }

    pub fn objects(&self) -> &[OpticalObject] {
        &self.objects
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Look an object up by name.
    pub fn find(&self, name: &str) -> Option<&OpticalObject> {
        self.objects.iter().find(|o| o.name() == name)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &OpticalSurface> {
        self.objects.iter().filter_map(OpticalObject::as_surface)
    }

    /// Set one attribute of an object.
    pub fn set_value(&mut self, id: ObjectId, column: Column, value: &Value) -> OpticsResult<()> {
        let object = self
            .objects
            .iter_mut()
            .find(|o| o.id() == id)
            .ok_or(OpticsError::UnknownObject(id))?;
        object.set_value(column, value)?;
        if column == Column::TextureObject {
            if let Some(material) = object.material_mut() {
                Self::resolve_texture(&self.textures, material);
            }
        }
        Ok(())
    }

    pub fn value(&self, id: ObjectId, column: Column) -> OpticsResult<Value> {
        self.get(id)
            .ok_or(OpticsError::UnknownObject(id))?
            .value(column)
    }

    /// Apply a scene record to an object.
    ///
    /// Attributes that fail are logged and skipped; the object stays usable.
    /// Returns the number of attributes applied.
    pub fn apply_record(&mut self, id: ObjectId, record: &[(Column, Value)]) -> usize {
        let mut applied = 0;
        for (column, value) in record {
            match self.set_value(id, *column, value) {
                Ok(()) => applied += 1,
                Err(err) => log::warn!("Skipping {} of object {}: {}", column, id, err),
            }
        }
        applied
    }

    /// Add or replace a texture and hand it to every material naming it.
    pub fn add_texture(&mut self, texture: Texture) -> Arc<Texture> {
        let texture = Arc::new(texture);
        self.textures
            .insert(texture.name.clone(), Arc::clone(&texture));
        for object in &mut self.objects {
            if let Some(material) = object.material_mut() {
                Self::resolve_texture(&self.textures, material);
            }
        }
        texture
    }

    pub fn texture(&self, name: &str) -> Option<&Arc<Texture>> {
        self.textures.get(name)
    }

    /// Use a registered texture for escaped rays; `None` clears it.
    pub fn set_environment(&mut self, name: Option<&str>) -> OpticsResult<()> {
        self.environment = match name {
            Some(name) => Some(
                self.textures
                    .get(name)
                    .cloned()
                    .ok_or_else(|| OpticsError::UnknownName {
                        category: "texture",
                        name: name.to_string(),
                    })?,
            ),
            None => None,
        };
        Ok(())
    }

    fn resolve_texture(
        textures: &HashMap<String, Arc<Texture>>,
        material: &mut crate::material::SurfaceMaterial,
    ) {
        material.texture = match &material.texture_name {
            Some(name) => {
                let texture = textures.get(name).cloned();
                if texture.is_none() {
                    log::debug!("Texture {} is not loaded yet", name);
                }
                texture
            }
            None => None,
        };
    }

    /// Attach a pipeline and return its index.
    ///
    /// A pipeline with `calculate_at_creation` runs once right away; a failure
    /// of that run is returned, the pipeline stays attached either way.
    pub fn attach_pipeline(&mut self, pipeline: VolumePipeline) -> (usize, Option<OpticsResult<RunReport>>) {
        let run_now = pipeline.calculate_at_creation;
        self.pipelines.push(pipeline);
        let index = self.pipelines.len() - 1;
        let result = run_now.then(|| self.run_pipeline(index));
        (index, result)
    }

    pub fn pipelines(&self) -> &[VolumePipeline] {
        &self.pipelines
    }

    pub fn pipeline_mut(&mut self, index: usize) -> Option<&mut VolumePipeline> {
        self.pipelines.get_mut(index)
    }

    /// Run one pipeline against its target volume.
    pub fn run_pipeline(&mut self, index: usize) -> OpticsResult<RunReport> {
        let surfaces: Vec<OpticalSurface> = self.surfaces().cloned().collect();
        let pipeline = self.pipelines.get(index).ok_or_else(|| OpticsError::UnknownName {
            category: "pipeline",
            name: index.to_string(),
        })?;
        let target = pipeline.target();
        let volume = self
            .objects
            .iter_mut()
            .find(|o| o.id() == target)
            .and_then(OpticalObject::as_volume_mut)
            .ok_or(OpticsError::UnknownObject(target))?;
        pipeline.run(volume, &self.variables, &surfaces)
    }

    /// Run every auto-updating pipeline whose inputs changed.
    ///
    /// Failures are logged; the affected volumes keep their last field.
    /// Returns the number of pipelines that ran successfully.
    pub fn update(&mut self) -> usize {
        let surfaces: Vec<OpticalSurface> = self.surfaces().cloned().collect();
        let mut ran = 0;
        for index in 0..self.pipelines.len() {
            let pipeline = &self.pipelines[index];
            let target = pipeline.target();
            let Some(volume) = self
                .objects
                .iter_mut()
                .find(|o| o.id() == target)
                .and_then(OpticalObject::as_volume_mut)
            else {
                continue;
            };
            if !pipeline.needs_update(volume, &self.variables, &surfaces) {
                continue;
            }
            match pipeline.run(volume, &self.variables, &surfaces) {
                Ok(_) => ran += 1,
                Err(err) => log::warn!("Pipeline {} failed: {}", pipeline.name, err),
            }
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Constant, Expression, VariableRef};
    use crate::pipeline::{GenerationStep, PipelineState, SolveStep};
    use crate::surface::SurfaceType;
    use optica_math::DVec3;

    #[test]
    fn test_scene_creation() {
        let mut scene = Scene::new("test");
        let lens = scene.add_surface(|s| s.with_surface_type(SurfaceType::Spherical));
        let mesh = scene.add_mesh(
            Mesh::new(vec![DVec3::ZERO, DVec3::X, DVec3::Y], vec![0, 1, 2], None),
            |m| m,
        );
        let volume = scene.add_volume(VolumeGrid::new(2, 2, 2), |v| v);

        assert_eq!(lens, ObjectId(1));
        assert_eq!(mesh, ObjectId(2));
        assert_eq!(volume, ObjectId(3));
        assert_eq!(scene.object_count(), 3);
        assert_eq!(scene.surfaces().count(), 1);
        assert_eq!(scene.get(mesh).map(OpticalObject::kind), Some("mesh"));

        assert!(scene.remove(mesh).is_some());
        assert!(scene.get(mesh).is_none());
        // Ids are never reused
        assert_eq!(scene.allocate_id(), ObjectId(4));
    }

    #[test]
    fn test_independent_scenes_allocate_independently() {
        let mut a = Scene::new("a");
        let mut b = Scene::new("b");
        assert_eq!(a.add_surface(|s| s), b.add_surface(|s| s));
    }

    #[test]
    fn test_apply_record_skips_bad_attributes() {
        let mut scene = Scene::new("records");
        let id = scene.add_surface(|s| s);
        let applied = scene.apply_record(
            id,
            &[
                (Column::Surface, Value::Text("Parabolic".into())),
                (Column::Material, Value::Text("Glass".into())),
                (Column::MaxRadius, Value::Scalar(4.0)),
                (Column::VolumeScaling, Value::Scalar(3.0)),
            ],
        );
        assert_eq!(applied, 2);
        let surface = scene.get(id).and_then(OpticalObject::as_surface).unwrap();
        assert_eq!(surface.surface_type(), SurfaceType::Parabolic);
        assert_eq!(surface.max_radius(), 4.0);
        assert_eq!(
            scene.value(ObjectId(99), Column::Active),
            Err(OpticsError::UnknownObject(ObjectId(99)))
        );
    }

    #[test]
    fn test_textures_resolve_in_any_order() {
        let mut scene = Scene::new("textures");
        let id = scene.add_surface(|s| s);
        scene
            .set_value(id, Column::TextureObject, &Value::Text("checker".into()))
            .unwrap();
        assert!(scene.get(id).and_then(OpticalObject::material).unwrap().texture.is_none());

        scene.add_texture(Texture::solid_color("checker", [1, 2, 3, 4]));
        let material = scene.get(id).and_then(OpticalObject::material).unwrap();
        assert_eq!(material.texture.as_ref().map(|t| t.name.as_str()), Some("checker"));

        assert!(scene.set_environment(Some("sky")).is_err());
        scene.set_environment(Some("checker")).unwrap();
        assert!(scene.environment.is_some());
    }

    #[test]
    fn test_pipeline_at_creation_and_update() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut scene = Scene::new("pipelines");
        scene.variables.set("n", Value::Scalar(1.3));
        let volume = scene.add_volume(VolumeGrid::new(1, 1, 1), |v| v);

        let size: Arc<dyn Expression> = Arc::new(Constant(Value::List(vec![2.0, 2.0, 2.0])));
        let pipeline = VolumePipeline::new("index", volume)
            .with_calculate_at_creation(true)
            .with_auto_update(true)
            .with_step(GenerationStep::new(size))
            .with_step(SolveStep {
                ior: Some(Arc::new(VariableRef::new("n"))),
                ..SolveStep::default()
            });
        let (index, result) = scene.attach_pipeline(pipeline);
        assert!(result.is_some_and(|r| r.is_ok()));

        let grid = || {
            scene
                .get(volume)
                .and_then(OpticalObject::as_volume)
                .map(|v| v.grid().ior.clone())
                .unwrap()
        };
        assert_eq!(grid().len(), 8);
        assert!(grid().iter().all(|&v| (v - 1.3).abs() < 1e-6));

        assert_eq!(scene.update(), 0);
        scene.variables.set("n", Value::Scalar(1.6));
        assert_eq!(scene.update(), 1);
        let ior = scene
            .get(volume)
            .and_then(OpticalObject::as_volume)
            .map(|v| v.grid().ior[0])
            .unwrap();
        assert!((ior - 1.6).abs() < 1e-6);
        assert_eq!(scene.pipelines()[index].state(), PipelineState::Idle);
    }

    #[test]
    fn test_pipeline_without_target() {
        let mut scene = Scene::new("orphan");
        let (index, result) = scene.attach_pipeline(VolumePipeline::new("orphan", ObjectId(42)));
        assert!(result.is_none());
        assert_eq!(
            scene.run_pipeline(index),
            Err(OpticsError::UnknownObject(ObjectId(42)))
        );
    }
}
