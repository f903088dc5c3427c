//! Poisson problem `-Δu = 1` on the unit square with homogeneous Dirichlet conditions.
//!
//! Solver settings are read from the JSON file given as the first argument, or from a built-in
//! default.
use fieldstep::constraints::ConstraintSet;
use fieldstep::model::{PdeModel, PointVariables};
use fieldstep::settings::ProblemSettings;
use fieldstep::simulation::{NoObserver, Simulation};
use fieldstep::solver::IncrementSolver;
use fieldstep::space::{MatrixFreeSpace, UniformLagrangeGrid};
use log::info;
use nalgebra::U2;

const DEFAULT_SETTINGS: &str = r#"
{
    "fields": [
        {
            "name": "u",
            "arity": "scalar",
            "kind": "time_independent",
            "linear_solver": { "tolerance_type": "relative_residual", "tolerance": 1e-10, "max_iterations": 2000 }
        }
    ]
}
"#;

struct UnitSource;

impl PdeModel<f64, U2> for UnitSource {
    fn nonexplicit_rhs(&self, variables: &mut PointVariables<f64, U2>) {
        let grad_u = -variables.scalar_gradient(0);
        variables.set_scalar_value_term(0, 1.0);
        variables.set_scalar_gradient_term(0, grad_u);
    }

    fn linearized_lhs(&self, variables: &mut PointVariables<f64, U2>) {
        let grad_du = variables.change_scalar_gradient().clone();
        variables.set_change_scalar_gradient_term(grad_du);
    }
}

fn main() -> eyre::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let problem = match std::env::args().nth(1) {
        Some(path) => ProblemSettings::from_json_file(path)?,
        None => ProblemSettings::from_json_str(DEFAULT_SETTINGS)?,
    };
    let settings = problem.validate()?;

    let grid = UniformLagrangeGrid::<f64, U2>::unit_box(32, 2)?;
    let n = grid.num_nodes();
    let mut boundary = ConstraintSet::new();
    boundary.add_dirichlet_nodes(&grid.boundary_nodes(), n, &[0], 0.0);
    let center = grid.nodes_where(|p| (p.x - 0.5).abs() < 1e-12 && (p.y - 0.5).abs() < 1e-12);

    let solver = IncrementSolver::<f64, U2, _, _>::new(grid, UnitSource, settings).with_constraints(0, boundary);
    let mut simulation = Simulation::new(solver);
    simulation.run(&mut NoObserver)?;

    let u = simulation.solver().solution(0).values();
    info!("max u = {:.6} (reference value 0.073671)", u.max());
    if let Some(&node) = center.first() {
        info!("u at center = {:.6}", u[node]);
    }
    Ok(())
}
