//! Attribute columns and the already-evaluated values they carry.

use std::fmt;
use std::str::FromStr;

use optica_math::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::{OpticsError, OpticsResult};
use crate::id::ObjectId;

/// Attribute keys of scene object records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    Id,
    Active,
    Position,
    Transformation,
    Direction,
    AnchorPoint,
    Material,
    Surface,
    MaxRadius,
    MinRadius,
    Ior0,
    Ior1,
    Diffuse,
    Smooth,
    InvertInsideOutside,
    ConicConstant,
    PreviousObjects,
    FollowingObjects,
    VolumeScaling,
    MaxSteps,
    Color,
    TextureObject,
    TextureMapping,
    InvertNormal,
    AlphaCalculation,
    AlphaToRadius,
    AlphaAsMask,
}

impl Column {
    pub const ALL: [Column; 27] = [
        Column::Id,
        Column::Active,
        Column::Position,
        Column::Transformation,
        Column::Direction,
        Column::AnchorPoint,
        Column::Material,
        Column::Surface,
        Column::MaxRadius,
        Column::MinRadius,
        Column::Ior0,
        Column::Ior1,
        Column::Diffuse,
        Column::Smooth,
        Column::InvertInsideOutside,
        Column::ConicConstant,
        Column::PreviousObjects,
        Column::FollowingObjects,
        Column::VolumeScaling,
        Column::MaxSteps,
        Column::Color,
        Column::TextureObject,
        Column::TextureMapping,
        Column::InvertNormal,
        Column::AlphaCalculation,
        Column::AlphaToRadius,
        Column::AlphaAsMask,
    ];

    /// Display name used by scene records.
    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "Id",
            Column::Active => "Active",
            Column::Position => "Position",
            Column::Transformation => "Transformation",
            Column::Direction => "Direction",
            Column::AnchorPoint => "Anchor Point",
            Column::Material => "Material",
            Column::Surface => "Surface",
            Column::MaxRadius => "Max Radius",
            Column::MinRadius => "Min Radius",
            Column::Ior0 => "Ior0",
            Column::Ior1 => "Ior1",
            Column::Diffuse => "Diffuse",
            Column::Smooth => "Smooth",
            Column::InvertInsideOutside => "Invert Inside Outside",
            Column::ConicConstant => "Conic Constant",
            Column::PreviousObjects => "Previous Objects",
            Column::FollowingObjects => "Following Objects",
            Column::VolumeScaling => "Volume Scaling",
            Column::MaxSteps => "Max Steps",
            Column::Color => "Color",
            Column::TextureObject => "Texture Object",
            Column::TextureMapping => "Texture Mapping",
            Column::InvertNormal => "Invert Normal",
            Column::AlphaCalculation => "Alpha Calculation",
            Column::AlphaToRadius => "Alpha To Radius",
            Column::AlphaAsMask => "Alpha As Mask",
        }
    }

    /// Value a freshly created object reports for this column.
    pub fn default_value(self) -> Value {
        match self {
            Column::Id => Value::Text(String::new()),
            Column::Active => Value::Bool(true),
            Column::Position => Value::Vector(DVec3::ZERO),
            Column::Transformation => Value::Matrix(DMat4::IDENTITY),
            Column::Direction => Value::Vector(DVec3::X),
            Column::AnchorPoint => Value::Text("Normal Intersection".to_string()),
            Column::Material => Value::Text("Refraction".to_string()),
            Column::Surface => Value::Text("Flat".to_string()),
            Column::MaxRadius => Value::Scalar(10.0),
            Column::MinRadius => Value::Scalar(0.0),
            Column::Ior0 | Column::Ior1 => Value::Scalar(1.0),
            Column::Diffuse => Value::Scalar(0.0),
            Column::Smooth => Value::Bool(false),
            Column::InvertInsideOutside => Value::Bool(false),
            Column::ConicConstant => Value::Scalar(1.0),
            Column::PreviousObjects | Column::FollowingObjects => Value::Objects(None),
            Column::VolumeScaling => Value::Scalar(1000.0),
            Column::MaxSteps => Value::Int(8000),
            Column::Color => Value::Color([255, 255, 255, 255]),
            Column::TextureObject => Value::Text(String::new()),
            Column::TextureMapping => Value::Text("Perspective".to_string()),
            Column::InvertNormal => Value::Bool(false),
            Column::AlphaCalculation => Value::Text("Ignore".to_string()),
            Column::AlphaToRadius => Value::Bool(false),
            Column::AlphaAsMask => Value::Bool(false),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = OpticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| OpticsError::UnknownName {
                category: "column",
                name: s.to_string(),
            })
    }
}

/// An attribute value, already evaluated by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Scalar(f64),
    Vector(DVec3),
    Matrix(DMat4),
    /// RGBA, 8 bit per channel
    Color([u8; 4]),
    Text(String),
    List(Vec<f64>),
    /// `None` stands for "every active object"
    Objects(Option<Vec<ObjectId>>),
}

impl Value {
    fn invalid<T>(column: Column, expected: &'static str) -> OpticsResult<T> {
        Err(OpticsError::InvalidValue { column, expected })
    }

    pub fn as_scalar(&self, column: Column) -> OpticsResult<f64> {
        match self {
            Value::Scalar(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            Value::List(v) if v.len() == 1 => Ok(v[0]),
            _ => Self::invalid(column, "a number"),
        }
    }

    /// Finite scalar; NaN and infinities are rejected.
    pub fn as_finite(&self, column: Column) -> OpticsResult<f64> {
        let v = self.as_scalar(column)?;
        if v.is_finite() {
            Ok(v)
        } else {
            Self::invalid(column, "a finite number")
        }
    }

    pub fn as_count(&self, column: Column) -> OpticsResult<usize> {
        match self {
            Value::Int(v) if *v >= 0 => Ok(*v as usize),
            Value::Scalar(v) if *v >= 0.0 && v.fract() == 0.0 => Ok(*v as usize),
            _ => Self::invalid(column, "a non-negative integer"),
        }
    }

    pub fn as_bool(&self, column: Column) -> OpticsResult<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            Value::Scalar(v) => Ok(*v != 0.0),
            Value::Text(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::Text(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Self::invalid(column, "a boolean"),
        }
    }

    pub fn as_vector(&self, column: Column) -> OpticsResult<DVec3> {
        match self {
            Value::Vector(v) if v.is_finite() => Ok(*v),
            Value::List(v) if v.len() == 3 && v.iter().all(|x| x.is_finite()) => {
                Ok(DVec3::new(v[0], v[1], v[2]))
            }
            _ => Self::invalid(column, "a finite 3-vector"),
        }
    }

    pub fn as_matrix(&self, column: Column) -> OpticsResult<DMat4> {
        match self {
            Value::Matrix(m) => Ok(*m),
            Value::List(v) if v.len() == 16 => {
                let mut cols = [0.0; 16];
                cols.copy_from_slice(v);
                Ok(DMat4::from_cols_array(&cols))
            }
            _ => Self::invalid(column, "a 4x4 matrix"),
        }
    }

    pub fn as_color(&self, column: Column) -> OpticsResult<[u8; 4]> {
        match self {
            Value::Color(c) => Ok(*c),
            Value::List(v) if v.len() == 3 || v.len() == 4 => {
                let channel = |x: f64| x.round().clamp(0.0, 255.0) as u8;
                let alpha = v.get(3).copied().unwrap_or(255.0);
                Ok([channel(v[0]), channel(v[1]), channel(v[2]), channel(alpha)])
            }
            _ => Self::invalid(column, "an RGBA colour"),
        }
    }

    pub fn as_text(&self, column: Column) -> OpticsResult<&str> {
        match self {
            Value::Text(s) => Ok(s),
            _ => Self::invalid(column, "text"),
        }
    }

    pub fn as_objects(&self, column: Column) -> OpticsResult<Option<Vec<ObjectId>>> {
        match self {
            Value::Objects(ids) => Ok(ids.clone()),
            _ => Self::invalid(column, "an object list"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_names_round_trip() {
        for column in Column::ALL {
            assert_eq!(column.name().parse::<Column>().unwrap(), column);
        }
        assert!("Nonsense".parse::<Column>().is_err());
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Int(3).as_scalar(Column::Diffuse).unwrap(), 3.0);
        assert_eq!(Value::Scalar(4.0).as_count(Column::MaxSteps).unwrap(), 4);
        assert!(Value::Scalar(-1.0).as_count(Column::MaxSteps).is_err());
        assert!(Value::Scalar(f64::NAN).as_finite(Column::Ior0).is_err());
        assert!(Value::Scalar(1.0).as_bool(Column::Active).unwrap());
        assert!(!Value::Int(0).as_bool(Column::Active).unwrap());
        assert!(Value::Text("TRUE".into()).as_bool(Column::Active).unwrap());
        assert!(Value::Vector(DVec3::ONE).as_bool(Column::Active).is_err());
        assert_eq!(
            Value::List(vec![1.0, 2.0, 3.0]).as_vector(Column::Direction).unwrap(),
            DVec3::new(1.0, 2.0, 3.0)
        );
        assert_eq!(
            Value::List(vec![300.0, 10.0, 0.0]).as_color(Column::Color).unwrap(),
            [255, 10, 0, 255]
        );
    }

    #[test]
    fn test_invalid_value_reports_column() {
        let err = Value::Text("x".into()).as_vector(Column::Position).unwrap_err();
        assert_eq!(
            err,
            OpticsError::InvalidValue {
                column: Column::Position,
                expected: "a finite 3-vector"
            }
        );
    }
}
