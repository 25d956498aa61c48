//! Interface to the external expression evaluator.
//!
//! The volume pipeline only needs values: an [`Expression`] is anything that
//! turns an [`EvalContext`] into a [`Value`] and can name what it depends on.
//! Parsing and compiling user formulas happens outside this crate.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use optica_math::DVec3;

use crate::column::Value;
use crate::error::ExpressionError;
use crate::surface::OpticalSurface;

/// Named scene variables with a version per name.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: HashMap<String, (Value, u64)>,
    clock: u64,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable and advance its version.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.clock += 1;
        self.values.insert(name.into(), (value, self.clock));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).map(|(value, _)| value)
    }

    /// Version of `name`, 0 if it was never set.
    pub fn version(&self, name: &str) -> u64 {
        self.values.get(name).map_or(0, |&(_, version)| version)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything an expression may read while a voxel is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// World position of the voxel centre
    pub position: DVec3,
    /// Voxel coordinates
    pub cell: [usize; 3],
    /// Current refractive index of the voxel
    pub ior: f64,
    /// Current translucency of the voxel
    pub translucency: f64,
    /// Diffusion solution at the voxel, once solved
    pub solution: Option<f64>,
    pub variables: &'a Variables,
    pub surfaces: &'a [OpticalSurface],
}

impl<'a> EvalContext<'a> {
    /// Context at the origin with no voxel data.
    pub fn global(variables: &'a Variables, surfaces: &'a [OpticalSurface]) -> Self {
        Self {
            position: DVec3::ZERO,
            cell: [0; 3],
            ior: 1.0,
            translucency: 1.0,
            solution: None,
            variables,
            surfaces,
        }
    }

    pub fn variable(&self, name: &str) -> Option<&'a Value> {
        self.variables.get(name)
    }

    /// Signed inside/outside value of the named surface at the voxel position.
    pub fn inner_outer(&self, surface: &str) -> Option<f64> {
        self.surfaces
            .iter()
            .find(|s| s.header.name == surface)
            .map(|s| s.evaluate_inner_outer(self.position))
    }
}

/// A compiled expression supplied by the caller.
pub trait Expression: Send + Sync + fmt::Debug {
    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Value, ExpressionError>;

    /// Names of variables and objects the result depends on.
    fn dependencies(&self) -> &[String] {
        &[]
    }

    fn evaluate_scalar(&self, ctx: &EvalContext<'_>) -> Result<f64, ExpressionError> {
        match self.evaluate(ctx)? {
            Value::Scalar(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            _ => Err(ExpressionError::Type { expected: "number" }),
        }
    }

    fn evaluate_bool(&self, ctx: &EvalContext<'_>) -> Result<bool, ExpressionError> {
        match self.evaluate(ctx)? {
            Value::Bool(b) => Ok(b),
            Value::Int(v) => Ok(v != 0),
            Value::Scalar(v) => Ok(v != 0.0),
            _ => Err(ExpressionError::Type { expected: "boolean" }),
        }
    }

    /// Numbers of a list or vector result.
    fn evaluate_list(&self, ctx: &EvalContext<'_>) -> Result<Vec<f64>, ExpressionError> {
        match self.evaluate(ctx)? {
            Value::List(values) => Ok(values),
            Value::Vector(v) => Ok(v.to_array().to_vec()),
            Value::Scalar(v) => Ok(vec![v]),
            Value::Int(v) => Ok(vec![v as f64]),
            _ => Err(ExpressionError::Type { expected: "list" }),
        }
    }
}

/// An expression that always yields the same value.
#[derive(Debug, Clone)]
pub struct Constant(pub Value);

impl Expression for Constant {
    fn evaluate(&self, _ctx: &EvalContext<'_>) -> Result<Value, ExpressionError> {
        Ok(self.0.clone())
    }
}

/// Reads a scene variable.
#[derive(Debug, Clone)]
pub struct VariableRef {
    dependencies: Vec<String>,
}

impl VariableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            dependencies: vec![name.into()],
        }
    }
}

impl Expression for VariableRef {
    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Value, ExpressionError> {
        let name = &self.dependencies[0];
        ctx.variable(name)
            .cloned()
            .ok_or_else(|| ExpressionError::Evaluation(format!("unknown variable {}", name)))
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

type EvalFn = dyn Fn(&EvalContext<'_>) -> Result<Value, ExpressionError> + Send + Sync;

/// An expression backed by a closure, typically produced by a compiler.
#[derive(Clone)]
pub struct FnExpression {
    source: String,
    dependencies: Vec<String>,
    f: Arc<EvalFn>,
}

impl FnExpression {
    pub fn new(
        source: impl Into<String>,
        f: impl Fn(&EvalContext<'_>) -> Result<Value, ExpressionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: source.into(),
            dependencies: Vec::new(),
            f: Arc::new(f),
        }
    }

    /// Scalar-valued closure.
    pub fn scalar(
        source: impl Into<String>,
        f: impl Fn(&EvalContext<'_>) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self::new(source, move |ctx| Ok(Value::Scalar(f(ctx))))
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for FnExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExpression")
            .field("source", &self.source)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl Expression for FnExpression {
    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Value, ExpressionError> {
        (self.f)(ctx)
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ObjectId;
    use crate::surface::SurfaceType;

    #[test]
    fn test_variable_versions() {
        let mut variables = Variables::new();
        assert_eq!(variables.version("a"), 0);
        variables.set("a", Value::Scalar(1.0));
        let v1 = variables.version("a");
        variables.set("b", Value::Scalar(2.0));
        assert_eq!(variables.version("a"), v1);
        variables.set("a", Value::Scalar(3.0));
        assert!(variables.version("a") > v1);
        assert_eq!(variables.get("a"), Some(&Value::Scalar(3.0)));
        assert_eq!(variables.len(), 2);
    }

    #[test]
    fn test_typed_evaluation() {
        let variables = Variables::new();
        let ctx = EvalContext::global(&variables, &[]);
        assert_eq!(Constant(Value::Int(3)).evaluate_scalar(&ctx).unwrap(), 3.0);
        assert!(Constant(Value::Scalar(0.0)).evaluate_bool(&ctx).is_ok_and(|b| !b));
        assert_eq!(
            Constant(Value::Vector(DVec3::new(1.0, 2.0, 3.0)))
                .evaluate_list(&ctx)
                .unwrap(),
            vec![1.0, 2.0, 3.0]
        );
        assert_eq!(
            Constant(Value::Text("x".into())).evaluate_scalar(&ctx),
            Err(ExpressionError::Type { expected: "number" })
        );
    }

    #[test]
    fn test_variable_reference() {
        let mut variables = Variables::new();
        variables.set("radius", Value::Scalar(2.5));
        let ctx = EvalContext::global(&variables, &[]);
        let expr = VariableRef::new("radius");
        assert_eq!(expr.dependencies(), ["radius".to_string()]);
        assert_eq!(expr.evaluate_scalar(&ctx).unwrap(), 2.5);
        assert!(matches!(
            VariableRef::new("missing").evaluate(&ctx),
            Err(ExpressionError::Evaluation(_))
        ));
    }

    #[test]
    fn test_closure_reads_context() {
        let variables = Variables::new();
        let surface = OpticalSurface::new(ObjectId(1))
            .with_surface_type(SurfaceType::Flat)
            .with_direction(DVec3::X);
        let surfaces = [surface];
        let mut ctx = EvalContext::global(&variables, &surfaces);
        ctx.position = DVec3::new(2.0, 0.0, 0.0);

        let expr = FnExpression::scalar("x * 2", |ctx| ctx.position.x * 2.0);
        assert_eq!(expr.evaluate_scalar(&ctx).unwrap(), 4.0);
        assert_eq!(expr.source(), "x * 2");

        let name = surfaces[0].header.name.clone();
        let inside = ctx.inner_outer(&name).unwrap();
        ctx.position = DVec3::new(-2.0, 0.0, 0.0);
        let outside = ctx.inner_outer(&name).unwrap();
        assert!(inside * outside < 0.0);
        assert!(ctx.inner_outer("nothing").is_none());
    }
}
