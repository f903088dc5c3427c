//! Problem configuration.
//!
//! [`ProblemSettings`] is the serializable description of a problem, typically read from JSON.
//! It is validated once into [`SolverSettings`], which is what the solver consumes.
use std::collections::HashSet;
use std::path::Path;

use eyre::{bail, ensure, eyre, WrapErr};
use numeric_literals::replace_float_literals;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::field::{EquationKind, Field, FieldArity};
use crate::solver::{ConvergenceCriterion, DampingPolicy};
use crate::Real;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearToleranceType {
    /// The residual norm of the linear system must drop below the tolerance.
    AbsoluteResidual,
    /// The residual norm must drop below the tolerance times the norm of the right-hand side.
    RelativeResidual,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, bound(serialize = "T: Serialize", deserialize = "T: Real + Deserialize<'de>"))]
pub struct LinearSolverSettings<T> {
    pub tolerance_type: LinearToleranceType,
    pub tolerance: T,
    pub max_iterations: usize,
}

impl<T: Real> Default for LinearSolverSettings<T> {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn default() -> Self {
        Self {
            tolerance_type: LinearToleranceType::AbsoluteResidual,
            tolerance: 1e-10,
            max_iterations: 1000,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonlinearToleranceType {
    AbsoluteSolutionChange,
    /// Not supported, and rejected by validation.
    RelativeSolutionChange,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, bound(serialize = "T: Serialize", deserialize = "T: Real + Deserialize<'de>"))]
pub struct NonlinearSolverSettings<T> {
    pub tolerance_type: NonlinearToleranceType,
    pub tolerance: T,
    pub backtrack_damping: bool,
    pub step_modifier: T,
    pub residual_decrease_coeff: T,
    pub default_damping_coefficient: T,
}

impl<T: Real> Default for NonlinearSolverSettings<T> {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn default() -> Self {
        Self {
            tolerance_type: NonlinearToleranceType::AbsoluteSolutionChange,
            tolerance: 1e-10,
            backtrack_damping: true,
            step_modifier: 0.5,
            residual_decrease_coeff: 1.0,
            default_damping_coefficient: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Real + Deserialize<'de>"))]
pub struct FieldSettings<T> {
    pub name: String,
    pub arity: FieldArity,
    pub kind: EquationKind,
    #[serde(default)]
    pub nonlinear: bool,
    #[serde(default)]
    pub linear_solver: LinearSolverSettings<T>,
    #[serde(default)]
    pub nonlinear_solver: NonlinearSolverSettings<T>,
}

impl<T: Real> FieldSettings<T> {
    pub fn new(name: impl Into<String>, arity: FieldArity, kind: EquationKind) -> Self {
        Self {
            name: name.into(),
            arity,
            kind,
            nonlinear: false,
            linear_solver: Default::default(),
            nonlinear_solver: Default::default(),
        }
    }

    pub fn with_nonlinear(self, nonlinear: bool) -> Self {
        Self { nonlinear, ..self }
    }

    pub fn with_linear_solver(self, linear_solver: LinearSolverSettings<T>) -> Self {
        Self { linear_solver, ..self }
    }

    pub fn with_nonlinear_solver(self, nonlinear_solver: NonlinearSolverSettings<T>) -> Self {
        Self {
            nonlinear_solver,
            ..self
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSettings<T> {
    pub dt: T,
    pub total_increments: usize,
}

fn default_max_nonlinear_iterations() -> usize {
    100
}

fn default_skip_print_steps() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Real + Deserialize<'de>"))]
pub struct ProblemSettings<T> {
    pub fields: Vec<FieldSettings<T>>,
    #[serde(default = "default_max_nonlinear_iterations")]
    pub max_nonlinear_iterations: usize,
    /// Summaries are logged every `skip_print_steps` increments.
    #[serde(default = "default_skip_print_steps")]
    pub skip_print_steps: usize,
    #[serde(default)]
    pub conserved_field: Option<String>,
    #[serde(default)]
    pub time: Option<TimeSettings<T>>,
}

impl<T: Real> ProblemSettings<T> {
    pub fn new(fields: Vec<FieldSettings<T>>) -> Self {
        Self {
            fields,
            max_nonlinear_iterations: default_max_nonlinear_iterations(),
            skip_print_steps: default_skip_print_steps(),
            conserved_field: None,
            time: None,
        }
    }

    pub fn with_max_nonlinear_iterations(self, max_nonlinear_iterations: usize) -> Self {
        Self {
            max_nonlinear_iterations,
            ..self
        }
    }

    pub fn with_skip_print_steps(self, skip_print_steps: usize) -> Self {
        Self {
            skip_print_steps,
            ..self
        }
    }

    pub fn with_conserved_field(self, name: impl Into<String>) -> Self {
        Self {
            conserved_field: Some(name.into()),
            ..self
        }
    }

    pub fn with_time_stepping(self, dt: T, total_increments: usize) -> Self {
        Self {
            time: Some(TimeSettings { dt, total_increments }),
            ..self
        }
    }

    pub fn from_json_str(json: &str) -> eyre::Result<Self>
    where
        T: DeserializeOwned,
    {
        serde_json::from_str(json).wrap_err("failed to parse problem settings")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> eyre::Result<Self>
    where
        T: DeserializeOwned,
    {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read problem settings from {}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// Checks the settings for consistency and converts them into solver settings.
    pub fn validate(&self) -> eyre::Result<SolverSettings<T>> {
        ensure!(!self.fields.is_empty(), "at least one field is required");
        ensure!(self.skip_print_steps >= 1, "skip_print_steps must be at least 1");

        let mut names = HashSet::new();
        for field in &self.fields {
            ensure!(!field.name.is_empty(), "field names must not be empty");
            ensure!(names.insert(field.name.as_str()), "duplicate field name '{}'", field.name);
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        let mut controls = Vec::with_capacity(self.fields.len());
        for (index, settings) in self.fields.iter().enumerate() {
            let control = validate_field_control(settings)
                .wrap_err_with(|| format!("invalid settings for field '{}'", settings.name))?;
            fields.push(Field::new(
                index,
                settings.name.clone(),
                settings.arity,
                settings.kind,
                settings.nonlinear,
            ));
            controls.push(control);
        }

        let conserved_field = match &self.conserved_field {
            None => None,
            Some(name) => {
                let field = fields
                    .iter()
                    .find(|field| field.name() == name)
                    .ok_or_else(|| eyre!("conserved field '{}' does not exist", name))?;
                ensure!(
                    field.arity() == FieldArity::Scalar,
                    "conserved field '{}' must be scalar",
                    name
                );
                ensure!(
                    field.kind() == EquationKind::ExplicitTimeDependent,
                    "conserved field '{}' must be explicit time dependent",
                    name
                );
                Some(field.index())
            }
        };

        let time_dependent = fields.iter().any(|field| field.kind().is_time_dependent());
        if time_dependent {
            let time = self
                .time
                .ok_or_else(|| eyre!("time dependent problems need time stepping settings"))?;
            ensure!(
                time.dt > T::zero() && time.dt.is_finite(),
                "time step must be positive and finite"
            );
        }

        Ok(SolverSettings {
            fields,
            controls,
            max_nonlinear_iterations: self.max_nonlinear_iterations,
            skip_print_steps: self.skip_print_steps,
            conserved_field,
            time: self.time,
        })
    }
}

fn validate_field_control<T: Real>(settings: &FieldSettings<T>) -> eyre::Result<FieldSolverControl<T>> {
    let linear = settings.linear_solver;
    ensure!(linear.tolerance >= T::zero(), "linear solver tolerance must be non-negative");
    ensure!(linear.max_iterations > 0, "linear solver needs at least one iteration");

    let nonlinear = settings.nonlinear_solver;
    if settings.nonlinear {
        ensure!(
            nonlinear.tolerance >= T::zero(),
            "nonlinear solver tolerance must be non-negative"
        );
        if nonlinear.tolerance_type == NonlinearToleranceType::RelativeSolutionChange {
            bail!("the relative_solution_change tolerance type is not supported");
        }
        if nonlinear.backtrack_damping {
            ensure!(
                nonlinear.step_modifier > T::zero() && nonlinear.step_modifier < T::one(),
                "step_modifier must lie in (0, 1)"
            );
            ensure!(
                nonlinear.residual_decrease_coeff > T::zero(),
                "residual_decrease_coeff must be positive"
            );
        } else {
            ensure!(
                nonlinear.default_damping_coefficient > T::zero() && nonlinear.default_damping_coefficient <= T::one(),
                "default_damping_coefficient must lie in (0, 1]"
            );
        }
    }

    let damping = if nonlinear.backtrack_damping {
        DampingPolicy::Backtracking {
            step_modifier: nonlinear.step_modifier,
            residual_decrease_coeff: nonlinear.residual_decrease_coeff,
        }
    } else {
        DampingPolicy::Fixed {
            coefficient: nonlinear.default_damping_coefficient,
        }
    };

    Ok(FieldSolverControl {
        linear_solver: linear,
        criterion: ConvergenceCriterion::AbsoluteSolutionChange {
            tolerance: nonlinear.tolerance,
        },
        damping,
    })
}

/// How a single field is solved.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FieldSolverControl<T> {
    pub linear_solver: LinearSolverSettings<T>,
    pub criterion: ConvergenceCriterion<T>,
    pub damping: DampingPolicy<T>,
}

/// Validated settings consumed by [`IncrementSolver`](crate::solver::IncrementSolver).
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings<T> {
    fields: Vec<Field>,
    controls: Vec<FieldSolverControl<T>>,
    max_nonlinear_iterations: usize,
    skip_print_steps: usize,
    conserved_field: Option<usize>,
    time: Option<TimeSettings<T>>,
}

impl<T: Real> SolverSettings<T> {
    pub fn from_json_str(json: &str) -> eyre::Result<Self>
    where
        T: DeserializeOwned,
    {
        ProblemSettings::from_json_str(json)?.validate()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.name() == name)
    }

    pub fn control(&self, field_index: usize) -> &FieldSolverControl<T> {
        &self.controls[field_index]
    }

    pub fn max_nonlinear_iterations(&self) -> usize {
        self.max_nonlinear_iterations
    }

    pub fn skip_print_steps(&self) -> usize {
        self.skip_print_steps
    }

    pub fn conserved_field(&self) -> Option<usize> {
        self.conserved_field
    }

    pub fn time(&self) -> Option<&TimeSettings<T>> {
        self.time.as_ref()
    }

    /// Whether any field is explicit or implicit time dependent.
    pub fn is_time_dependent(&self) -> bool {
        self.fields
            .iter()
            .any(|field| field.kind().is_time_dependent())
    }
}
