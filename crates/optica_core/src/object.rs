//! The tagged optical object and the attributes every object shares.

use optica_math::{Interval, Ray};

use crate::column::{Column, Value};
use crate::error::{OpticsError, OpticsResult};
use crate::id::ObjectId;
use crate::intersect::{Hit, Intersect};
use crate::material::SurfaceMaterial;
use crate::mesh::MeshObject;
use crate::surface::OpticalSurface;
use crate::volume::OpticalVolume;

/// Attributes shared by every optical object.
#[derive(Debug, Clone)]
pub struct ObjectHeader {
    pub id: ObjectId,
    pub name: String,
    pub active: bool,
    mod_count: u64,
    /// Objects to consider after a ray leaves against the normal; `None` means all
    pub successors: Option<Vec<ObjectId>>,
    /// Objects to consider after a ray leaves along the normal; `None` means all
    pub predecessors: Option<Vec<ObjectId>>,
}

impl ObjectHeader {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            name: format!("object{}", id.0),
            active: true,
            mod_count: 0,
            successors: None,
            predecessors: None,
        }
    }

    /// Incremented on every value-changing edit.
    pub fn mod_count(&self) -> u64 {
        self.mod_count
    }

    pub fn touch(&mut self) {
        self.mod_count += 1;
    }

    fn apply(&mut self, column: Column, value: &Value) -> Option<OpticsResult<()>> {
        let result = match column {
            Column::Id => value.as_text(column).map(|s| self.name = s.to_string()),
            Column::Active => value.as_bool(column).map(|b| self.active = b),
            Column::FollowingObjects => value.as_objects(column).map(|ids| self.successors = ids),
            Column::PreviousObjects => value.as_objects(column).map(|ids| self.predecessors = ids),
            _ => return None,
        };
        Some(result)
    }

    fn value(&self, column: Column) -> Option<Value> {
        Some(match column {
            Column::Id => Value::Text(self.name.clone()),
            Column::Active => Value::Bool(self.active),
            Column::FollowingObjects => Value::Objects(self.successors.clone()),
            Column::PreviousObjects => Value::Objects(self.predecessors.clone()),
            _ => return None,
        })
    }
}

/// Column access for an optical object kind.
///
/// Kinds implement the `own_*` methods; header columns and the modification
/// counter are handled by the provided methods.
pub trait ObjectAttributes {
    /// Kind name used in messages.
    fn kind(&self) -> &'static str;

    fn header(&self) -> &ObjectHeader;

    fn header_mut(&mut self) -> &mut ObjectHeader;

    fn set_own_value(&mut self, column: Column, value: &Value) -> OpticsResult<()>;

    fn own_value(&self, column: Column) -> OpticsResult<Value>;

    /// Set an attribute and bump the modification counter.
    ///
    /// On error the object is left unchanged.
    fn set_value(&mut self, column: Column, value: &Value) -> OpticsResult<()> {
        match self.header_mut().apply(column, value) {
            Some(result) => result?,
            None => self.set_own_value(column, value)?,
        }
        self.header_mut().touch();
        Ok(())
    }

    fn value(&self, column: Column) -> OpticsResult<Value> {
        match self.header().value(column) {
            Some(value) => Ok(value),
            None => self.own_value(column),
        }
    }
}

/// Error for a column the object kind does not have.
pub fn unsupported<T>(kind: &'static str, column: Column) -> OpticsResult<T> {
    Err(OpticsError::UnsupportedColumn { column, kind })
}

/// An object rays interact with.
#[derive(Debug, Clone)]
pub enum OpticalObject {
    Surface(OpticalSurface),
    Volume(OpticalVolume),
    Mesh(MeshObject),
}

impl OpticalObject {
    fn attributes(&self) -> &dyn ObjectAttributes {
        match self {
            OpticalObject::Surface(s) => s,
            OpticalObject::Volume(v) => v,
            OpticalObject::Mesh(m) => m,
        }
    }

    fn attributes_mut(&mut self) -> &mut dyn ObjectAttributes {
        match self {
            OpticalObject::Surface(s) => s,
            OpticalObject::Volume(v) => v,
            OpticalObject::Mesh(m) => m,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.header().id
    }

    pub fn name(&self) -> &str {
        &self.header().name
    }

    pub fn is_active(&self) -> bool {
        self.header().active
    }

    pub fn mod_count(&self) -> u64 {
        self.header().mod_count()
    }

    pub fn header(&self) -> &ObjectHeader {
        self.attributes().header()
    }

    pub fn kind(&self) -> &'static str {
        self.attributes().kind()
    }

    pub fn set_value(&mut self, column: Column, value: &Value) -> OpticsResult<()> {
        self.attributes_mut().set_value(column, value)
    }

    pub fn value(&self, column: Column) -> OpticsResult<Value> {
        self.attributes().value(column)
    }

    /// Material of surfaces and meshes.
    pub fn material(&self) -> Option<&SurfaceMaterial> {
        match self {
            OpticalObject::Surface(s) => Some(&s.material),
            OpticalObject::Mesh(m) => Some(&m.material),
            OpticalObject::Volume(_) => None,
        }
    }

    pub fn material_mut(&mut self) -> Option<&mut SurfaceMaterial> {
        match self {
            OpticalObject::Surface(s) => Some(&mut s.material),
            OpticalObject::Mesh(m) => Some(&mut m.material),
            OpticalObject::Volume(_) => None,
        }
    }

    pub fn as_surface(&self) -> Option<&OpticalSurface> {
        match self {
            OpticalObject::Surface(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_volume(&self) -> Option<&OpticalVolume> {
        match self {
            OpticalObject::Volume(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_volume_mut(&mut self) -> Option<&mut OpticalVolume> {
        match self {
            OpticalObject::Volume(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_mesh(&self) -> Option<&MeshObject> {
        match self {
            OpticalObject::Mesh(m) => Some(m),
            _ => None,
        }
    }
}

impl Intersect for OpticalObject {
    fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<Hit> {
        match self {
            OpticalObject::Surface(s) => s.intersect(ray, ray_t),
            OpticalObject::Volume(v) => v.intersect(ray, ray_t),
            OpticalObject::Mesh(m) => m.intersect(ray, ray_t),
        }
    }
}

impl From<OpticalSurface> for OpticalObject {
    fn from(surface: OpticalSurface) -> Self {
        OpticalObject::Surface(surface)
    }
}

impl From<OpticalVolume> for OpticalObject {
    fn from(volume: OpticalVolume) -> Self {
        OpticalObject::Volume(volume)
    }
}

impl From<MeshObject> for OpticalObject {
    fn from(mesh: MeshObject) -> Self {
        OpticalObject::Mesh(mesh)
    }
}
