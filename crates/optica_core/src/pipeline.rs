//! Volume pipelines: ordered calculation steps that rebuild a volume's field.
//!
//! A run works on a copy of the volume's grid and transform. Every step's
//! output is cached together with a fingerprint of its dependency versions,
//! so a re-run resumes at the first step whose inputs changed. The volume is
//! only updated when every step succeeded.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use optica_math::{DMat4, DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::{ExpressionError, OpticsError, OpticsResult};
use crate::expression::{EvalContext, Expression, Variables};
use crate::id::ObjectId;
use crate::solver::{solve_diffusion, SolverConfig};
use crate::surface::OpticalSurface;
use crate::volume::{OpticalVolume, VolumeGrid};

/// Resource bounds of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineLimits {
    /// Largest grid a generation step may create
    pub max_voxels: u64,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_voxels: 64 * 1024 * 1024,
        }
    }
}

/// Where a pipeline is in its run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Generating,
    Solving,
    /// The last run failed; the volume kept its previous field
    Error(String),
}

/// Grid and transform handed from step to step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub grid: Arc<VolumeGrid>,
    pub transformation: DMat4,
}

/// Inputs shared by all steps of a run.
#[derive(Debug, Clone, Copy)]
pub struct StepEnv<'a> {
    pub variables: &'a Variables,
    pub surfaces: &'a [OpticalSurface],
    pub limits: PipelineLimits,
    pub cancel: &'a AtomicBool,
}

impl StepEnv<'_> {
    fn context(&self) -> EvalContext<'_> {
        EvalContext::global(self.variables, self.surfaces)
    }

    fn check_cancel(&self) -> OpticsResult<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(OpticsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Re-creates the grid.
///
/// `size` yields the cell counts `[width, height, depth]`. The optional
/// `bounds` yields `[min_x, min_y, min_z, max_x, max_y, max_z]`; the volume
/// transform is then set so the unit cube covers that world box.
#[derive(Debug, Clone)]
pub struct GenerationStep {
    pub size: Arc<dyn Expression>,
    pub bounds: Option<Arc<dyn Expression>>,
}

impl GenerationStep {
    pub fn new(size: Arc<dyn Expression>) -> Self {
        Self { size, bounds: None }
    }

    pub fn with_bounds(mut self, bounds: Arc<dyn Expression>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    fn run(&self, input: &StepOutput, env: &StepEnv<'_>) -> OpticsResult<StepOutput> {
        let ctx = env.context();
        let size = self.size.evaluate_list(&ctx)?;
        if size.len() != 3 {
            return Err(ExpressionError::Type {
                expected: "list of three sizes",
            }
            .into());
        }
        let mut dims = [0usize; 3];
        for (dim, &value) in dims.iter_mut().zip(&size) {
            if !value.is_finite() || value < 0.0 {
                return Err(ExpressionError::Evaluation(format!("invalid grid size {}", value)).into());
            }
            *dim = value.round() as usize;
        }
        let requested = dims.iter().map(|&d| d as u64).product::<u64>();
        if requested == 0 {
            return Err(OpticsError::EmptyVolume);
        }
        if requested > env.limits.max_voxels {
            return Err(OpticsError::SizeLimit {
                requested,
                limit: env.limits.max_voxels,
            });
        }

        let transformation = match &self.bounds {
            Some(bounds) => {
                let b = bounds.evaluate_list(&ctx)?;
                if b.len() != 6 {
                    return Err(ExpressionError::Type {
                        expected: "list of six bounds",
                    }
                    .into());
                }
                let min = DVec3::new(b[0], b[1], b[2]);
                let max = DVec3::new(b[3], b[4], b[5]);
                let half = (max - min) * 0.5;
                if half.min_element() <= 0.0 || !half.is_finite() {
                    return Err(ExpressionError::Evaluation("empty bounds".to_string()).into());
                }
                DMat4::from_scale_rotation_translation(
                    half,
                    DQuat::IDENTITY,
                    (min + max) * 0.5,
                )
            }
            None => input.transformation,
        };

        log::debug!("Generated {}x{}x{} grid", dims[0], dims[1], dims[2]);
        Ok(StepOutput {
            grid: Arc::new(VolumeGrid::new(dims[0], dims[1], dims[2])),
            transformation,
        })
    }

    fn dependencies(&self) -> impl Iterator<Item = &String> {
        self.size
            .dependencies()
            .iter()
            .chain(self.bounds.iter().flat_map(|b| b.dependencies()))
    }
}

/// Evaluates index and translucency per voxel, optionally after solving a
/// diffusion problem.
///
/// When both `given_value` and `is_given` are set, voxels where `is_given`
/// holds are fixed to `given_value` and the rest is solved for. The solution
/// is visible to the other expressions and becomes the index when no `ior`
/// expression is set.
#[derive(Debug, Clone, Default)]
pub struct SolveStep {
    pub ior: Option<Arc<dyn Expression>>,
    pub translucency: Option<Arc<dyn Expression>>,
    pub given_value: Option<Arc<dyn Expression>>,
    pub is_given: Option<Arc<dyn Expression>>,
    pub solver: SolverConfig,
}

impl SolveStep {
    fn expressions(&self) -> impl Iterator<Item = &Arc<dyn Expression>> {
        [&self.ior, &self.translucency, &self.given_value, &self.is_given]
            .into_iter()
            .flatten()
    }

    fn run(&self, input: &StepOutput, env: &StepEnv<'_>) -> OpticsResult<StepOutput> {
        let mut grid = input.grid.as_ref().clone();
        if grid.is_empty() {
            return Err(OpticsError::EmptyVolume);
        }
        let dims = grid.dimensions();
        let dims_f = DVec3::new(dims[0] as f64, dims[1] as f64, dims[2] as f64);
        let centre = |cell: [usize; 3]| {
            let lattice = DVec3::new(cell[0] as f64, cell[1] as f64, cell[2] as f64) + DVec3::splat(0.5);
            input
                .transformation
                .transform_point3(lattice * 2.0 / dims_f - DVec3::ONE)
        };
        let context = |grid: &VolumeGrid, i: usize, solution: Option<&[f64]>| {
            let cell = grid.coords(i);
            EvalContext {
                position: centre(cell),
                cell,
                ior: grid.ior[i] as f64,
                translucency: grid.translucency[i] as f64,
                solution: solution.map(|s| s[i]),
                variables: env.variables,
                surfaces: env.surfaces,
            }
        };

        let solution = match (&self.given_value, &self.is_given) {
            (Some(given_value), Some(is_given)) => {
                let mut values = vec![0.0; grid.len()];
                let mut given = vec![false; grid.len()];
                for i in 0..grid.len() {
                    let ctx = context(&grid, i, None);
                    if is_given.evaluate_bool(&ctx)? {
                        given[i] = true;
                        values[i] = given_value.evaluate_scalar(&ctx)?;
                    }
                }
                env.check_cancel()?;
                let sweeps =
                    solve_diffusion(dims, &mut values, &given, &self.solver, Some(env.cancel))?;
                log::debug!("Diffusion solved in {} sweeps", sweeps);
                Some(values)
            }
            (None, None) => None,
            _ => {
                log::warn!("Solve step needs both a given value and a given mask, skipping diffusion");
                None
            }
        };

        env.check_cancel()?;
        for i in 0..grid.len() {
            let ctx = context(&grid, i, solution.as_deref());
            let ior = match (&self.ior, &solution) {
                (Some(expr), _) => Some(expr.evaluate_scalar(&ctx)?),
                (None, Some(solution)) => Some(solution[i]),
                (None, None) => None,
            };
            let translucency = match &self.translucency {
                Some(expr) => Some(expr.evaluate_scalar(&ctx)?.clamp(0.0, 1.0)),
                None => None,
            };
            if let Some(ior) = ior {
                grid.ior[i] = ior as f32;
            }
            if let Some(translucency) = translucency {
                grid.translucency[i] = translucency as f32;
            }
        }

        Ok(StepOutput {
            grid: Arc::new(grid),
            transformation: input.transformation,
        })
    }
}

/// One stage of a volume pipeline.
#[derive(Debug, Clone)]
pub enum CalculationStep {
    Generation(GenerationStep),
    Solve(SolveStep),
}

impl CalculationStep {
    pub fn name(&self) -> &'static str {
        match self {
            CalculationStep::Generation(_) => "Generation",
            CalculationStep::Solve(_) => "Solve",
        }
    }

    fn dependencies(&self) -> Vec<&String> {
        match self {
            CalculationStep::Generation(step) => step.dependencies().collect(),
            CalculationStep::Solve(step) => step
                .expressions()
                .flat_map(|e| e.dependencies())
                .collect(),
        }
    }

    fn fingerprint(&self, variables: &Variables, surfaces: &[OpticalSurface]) -> u64 {
        let mut hasher = DefaultHasher::new();
        for name in self.dependencies() {
            name.hash(&mut hasher);
            variables.version(name).hash(&mut hasher);
            for surface in surfaces.iter().filter(|s| &s.header.name == name) {
                surface.header.mod_count().hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    fn run(&self, input: &StepOutput, env: &StepEnv<'_>) -> OpticsResult<StepOutput> {
        match self {
            CalculationStep::Generation(step) => step.run(input, env),
            CalculationStep::Solve(step) => step.run(input, env),
        }
    }
}

impl From<GenerationStep> for CalculationStep {
    fn from(step: GenerationStep) -> Self {
        CalculationStep::Generation(step)
    }
}

impl From<SolveStep> for CalculationStep {
    fn from(step: SolveStep) -> Self {
        CalculationStep::Solve(step)
    }
}

#[derive(Debug, Clone)]
struct CachedStep {
    fingerprint: u64,
    output: StepOutput,
}

#[derive(Debug, Default)]
struct RunCache {
    steps: Vec<CachedStep>,
    // Volume modification count right after the last commit
    volume_mod_count: Option<u64>,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Index of the first step that was recalculated
    pub first_step: usize,
    /// Steps recalculated in this run
    pub executed: usize,
}

// Clears the running flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Ordered calculation steps attached to one volume.
#[derive(Debug)]
pub struct VolumePipeline {
    pub name: String,
    target: ObjectId,
    steps: Vec<CalculationStep>,
    /// Re-run whenever a dependency or the target's geometry changes
    pub auto_update: bool,
    /// Run once when attached to a scene
    pub calculate_at_creation: bool,
    pub limits: PipelineLimits,
    state: Mutex<PipelineState>,
    running: AtomicBool,
    cancel: AtomicBool,
    cache: Mutex<RunCache>,
}

impl VolumePipeline {
    pub fn new(name: impl Into<String>, target: ObjectId) -> Self {
        Self {
            name: name.into(),
            target,
            steps: Vec::new(),
            auto_update: false,
            calculate_at_creation: false,
            limits: PipelineLimits::default(),
            state: Mutex::new(PipelineState::Idle),
            running: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            cache: Mutex::new(RunCache::default()),
        }
    }

    pub fn with_step(mut self, step: impl Into<CalculationStep>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn with_auto_update(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }

    pub fn with_calculate_at_creation(mut self, calculate_at_creation: bool) -> Self {
        self.calculate_at_creation = calculate_at_creation;
        self
    }

    pub fn with_limits(mut self, limits: PipelineLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn target(&self) -> ObjectId {
        self.target
    }

    pub fn steps(&self) -> &[CalculationStep] {
        &self.steps
    }

    /// Replace the steps; cached results are dropped.
    pub fn set_steps(&mut self, steps: Vec<CalculationStep>) {
        self.steps = steps;
        lock(&self.cache).steps.clear();
    }

    pub fn state(&self) -> PipelineState {
        lock(&self.state).clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask a running calculation to stop at its next poll.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    fn set_state(&self, state: PipelineState) {
        *lock(&self.state) = state;
    }

    /// Index of the first step that has to be recalculated, `None` if the
    /// cached results are current.
    pub fn first_dirty_step(
        &self,
        volume: &OpticalVolume,
        variables: &Variables,
        surfaces: &[OpticalSurface],
    ) -> Option<usize> {
        let cache = lock(&self.cache);
        if cache.volume_mod_count != Some(volume.header.mod_count()) {
            return Some(0);
        }
        self.steps.iter().enumerate().find_map(|(i, step)| {
            let current = cache
                .steps
                .get(i)
                .is_some_and(|c| c.fingerprint == step.fingerprint(variables, surfaces));
            (!current).then_some(i)
        })
    }

    /// True when auto update is on and something the result depends on changed.
    pub fn needs_update(
        &self,
        volume: &OpticalVolume,
        variables: &Variables,
        surfaces: &[OpticalSurface],
    ) -> bool {
        self.auto_update && self.first_dirty_step(volume, variables, surfaces).is_some()
    }

    /// Run the pipeline on `volume`.
    ///
    /// Fails with [`OpticsError::Busy`] while another run is in progress. On
    /// failure the pipeline enters [`PipelineState::Error`] and the volume is
    /// left untouched.
    pub fn run(
        &self,
        volume: &mut OpticalVolume,
        variables: &Variables,
        surfaces: &[OpticalSurface],
    ) -> OpticsResult<RunReport> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(OpticsError::Busy);
        }
        let _guard = RunGuard(&self.running);
        self.cancel.store(false, Ordering::Relaxed);

        let first_step = self
            .first_dirty_step(volume, variables, surfaces)
            .unwrap_or(self.steps.len());
        log::info!(
            "Running pipeline {} from step {} of {}",
            self.name,
            first_step,
            self.steps.len()
        );

        let env = StepEnv {
            variables,
            surfaces,
            limits: self.limits,
            cancel: &self.cancel,
        };

        let mut current = {
            let cache = lock(&self.cache);
            match first_step.checked_sub(1).and_then(|i| cache.steps.get(i)) {
                Some(cached) => cached.output.clone(),
                None => StepOutput {
                    grid: Arc::clone(volume.grid()),
                    transformation: volume.transformation(),
                },
            }
        };

        let mut fresh = Vec::with_capacity(self.steps.len() - first_step);
        for step in &self.steps[first_step..] {
            self.set_state(match step {
                CalculationStep::Generation(_) => PipelineState::Generating,
                CalculationStep::Solve(_) => PipelineState::Solving,
            });
            let result = env.check_cancel().and_then(|_| step.run(&current, &env));
            match result {
                Ok(output) => {
                    fresh.push(CachedStep {
                        fingerprint: step.fingerprint(variables, surfaces),
                        output: output.clone(),
                    });
                    current = output;
                }
                Err(err) => {
                    log::warn!("Pipeline {} failed in {} step: {}", self.name, step.name(), err);
                    self.set_state(PipelineState::Error(err.to_string()));
                    return Err(err);
                }
            }
        }

        volume.commit_grid(current.grid, Some(current.transformation));
        {
            let mut cache = lock(&self.cache);
            cache.steps.truncate(first_step);
            cache.steps.extend(fresh);
            cache.volume_mod_count = Some(volume.header.mod_count());
        }
        self.set_state(PipelineState::Idle);

        Ok(RunReport {
            first_step,
            executed: self.steps.len() - first_step,
        })
    }
}

// A poisoned lock only means another run panicked; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
