//! Mass-conserving Allen-Cahn phase separation on the unit square.
//!
//! Run with `RUST_LOG=info cargo run --release --example allen_cahn`.
use fieldstep::field::{EquationKind, Field, FieldArity, SolutionVector};
use fieldstep::integrate::integrate_scalar_field;
use fieldstep::model::{PdeModel, PointVariables};
use fieldstep::settings::{FieldSettings, ProblemSettings};
use fieldstep::simulation::Simulation;
use fieldstep::solver::{IncrementContext, IncrementSolver};
use fieldstep::space::UniformLagrangeGrid;
use log::info;
use nalgebra::U2;

/// Forward Euler step of `dφ/dt = ε² Δφ - (φ³ - φ)`.
struct AllenCahn {
    dt: f64,
    epsilon: f64,
}

impl PdeModel<f64, U2> for AllenCahn {
    fn explicit_rhs(&self, variables: &mut PointVariables<f64, U2>) {
        let phi = variables.scalar_value(0);
        let grad_phi = variables.scalar_gradient(0) * (-self.dt * self.epsilon * self.epsilon);
        variables.set_scalar_value_term(0, phi - self.dt * (phi.powi(3) - phi));
        variables.set_scalar_gradient_term(0, grad_phi);
    }
}

fn main() -> eyre::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let dt = 2e-4;
    let settings = ProblemSettings::new(vec![FieldSettings::new(
        "phi",
        FieldArity::Scalar,
        EquationKind::ExplicitTimeDependent,
    )])
    .with_time_stepping(dt, 500)
    .with_skip_print_steps(100)
    .with_conserved_field("phi")
    .validate()?;

    let grid = UniformLagrangeGrid::<f64, U2>::unit_box(16, 2)?;
    let mut solver = IncrementSolver::<f64, U2, _, _>::new(grid, AllenCahn { dt, epsilon: 0.02 }, settings);
    solver.interpolate_initial_condition(0, |p, _| {
        0.1 * ((7.0 * p.x).sin() * (5.0 * p.y + 1.0).cos() + (13.0 * p.x * p.y).sin())
    })?;
    let initial_mass = integrate_scalar_field(solver.space(), solver.solution(0).values());

    let mut simulation = Simulation::new(solver);
    let summary = simulation.run(
        &mut |context: &IncrementContext<f64>, _: &[Field], solutions: &[SolutionVector<f64>]| {
            if context.log_this_increment {
                let phi = solutions[0].values();
                info!(
                    "increment {}: min phi {:.4}, max phi {:.4}",
                    context.increment,
                    phi.min(),
                    phi.max()
                );
            }
            Ok::<_, eyre::Report>(())
        },
    )?;

    let final_mass = integrate_scalar_field(simulation.solver().space(), simulation.solver().solution(0).values());
    info!(
        "finished {} increments at t = {}, mass drift {:e}",
        summary.increments,
        summary.final_time,
        final_mass - initial_mass
    );
    Ok(())
}
