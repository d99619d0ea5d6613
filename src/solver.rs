use indicatif::ProgressBar;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{factorization::CscCholesky, CscMatrix, CsrMatrix};
use tracing::{debug, info};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, IterState, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient as ArgminConjugateGradient,
};

use crate::{
    datatypes::{SolverMethod, SolverSettings},
    error::{FeldsparError, Result},
};

/// Outcome of a successful linear solve
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub solution: DVector<f64>,
    pub iterations: u64,
    /// True residual norm |Ax - b|
    pub residual: f64,
}

/// External linear-solver collaborator
///
/// Given `a` and `b`, returns x with `a x = b` over the same index range, or a
/// `Solver` error carrying the failure reason and residual norm.
pub trait LinearSolver {
    fn solve(&self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<SolveReport>;
}

/// Residual norm a solve has to reach
fn convergence_threshold(settings: &SolverSettings, b: &DVector<f64>) -> f64 {
    settings
        .absolute_tolerance
        .max(settings.relative_tolerance * b.norm())
}

fn residual_norm(a: &CsrMatrix<f64>, x: &DVector<f64>, b: &DVector<f64>) -> f64 {
    let ax: DVector<f64> = a * x;
    (ax - b).norm()
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> std::result::Result<Self::Output, Error> {
        let x = DVector::from_column_slice(x);
        let ax: DVector<f64> = self.a * &x;
        Ok(ax.as_slice().to_vec())
    }
}

/// Observer bar for argmin solver
///
/// Progress is the number of decades the residual has dropped out of the
/// decades required.
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    initial_mag: Option<f64>,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    const RESOLUTION: u64 = 1000;

    fn new(target_cost: f64) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(Self::RESOLUTION),
            initial_mag: None,
            final_mag: target_cost.log10(),
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State<Float = f64>,
{
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        let cost_mag = state.get_cost().log10();
        if !cost_mag.is_finite() {
            return Ok(());
        }

        let initial_mag = *self.initial_mag.get_or_insert(cost_mag);
        let span = (initial_mag - self.final_mag).max(f64::EPSILON);
        let fraction = ((initial_mag - cost_mag) / span).clamp(0.0, 1.0);
        self.bar
            .set_position((fraction * Self::RESOLUTION as f64) as u64);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> std::result::Result<(), Error> {
        self.bar.finish_and_clear();
        Ok(())
    }
}

type ConjugateGradientState = IterState<Vec<f64>, (), (), (), Vec<f64>, f64>;

/// Restarts from the true residual allowed after the first CG run
const MAX_RESTARTS: u64 = 8;

/// Iterative solver for symmetric positive definite systems
///
/// argmin stops on its recursively updated residual, which drifts away from
/// |b - Ax| on fine meshes. When the true residual is still above the
/// threshold, CG is restarted on the correction equation `A d = b - Ax`.
/// All runs share the `max_iterations` budget.
#[derive(Debug, Clone)]
pub struct ConjugateGradient {
    settings: SolverSettings,
}

impl ConjugateGradient {
    pub fn new(settings: SolverSettings) -> ConjugateGradient {
        ConjugateGradient { settings }
    }

    /// Runs argmin CG on `a d = r` from a zero guess
    ///
    /// # Returns
    /// The correction `d` and the number of iterations used
    fn run_cycle(
        &self,
        a: &CsrMatrix<f64>,
        r: &DVector<f64>,
        target_cost: f64,
        max_iters: u64,
    ) -> Result<(DVector<f64>, u64)> {
        let solver: ArgminConjugateGradient<Vec<f64>, f64> =
            ArgminConjugateGradient::new(r.as_slice().to_vec());
        let operator = ConjugateGradientOperator { a };
        let observer = ConjugateGradientObserverBar::new(target_cost);

        let res = Executor::<_, _, ConjugateGradientState>::new(operator, solver)
            .configure(|state| {
                state
                    .param(vec![0.0; r.nrows()])
                    .max_iters(max_iters)
                    .target_cost(target_cost)
            })
            .add_observer(observer, ObserverMode::Always)
            .run()
            .map_err(|err| FeldsparError::Solver {
                reason: format!("Conjugate Gradient error: {err}"),
                residual: r.norm(),
            })?;

        let state = res.state();
        debug!(
            "conjugate gradient stopped after {} iterations: {}",
            state.get_iter(),
            state.get_termination_status()
        );

        match &state.param {
            Some(vec) => Ok((DVector::from_vec(vec.clone()), state.get_iter())),
            None => Err(FeldsparError::Solver {
                reason: "Conjugate Gradient could not produce a solution".to_owned(),
                residual: r.norm(),
            }),
        }
    }
}

impl LinearSolver for ConjugateGradient {
    fn solve(&self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<SolveReport> {
        let threshold = convergence_threshold(&self.settings, b);
        // argmin reports the squared residual norm as the cost
        let target_cost = threshold * threshold;

        let mut solution: DVector<f64> = DVector::zeros(b.nrows());
        let mut residual = b.clone();
        let mut iterations: u64 = 0;
        let mut cycles: u64 = 0;

        loop {
            let norm = residual.norm();
            if norm <= threshold {
                return Ok(SolveReport {
                    solution,
                    iterations,
                    residual: norm,
                });
            }

            let budget = self.settings.max_iterations.saturating_sub(iterations);
            if budget == 0 || cycles > MAX_RESTARTS || !norm.is_finite() {
                return Err(FeldsparError::Solver {
                    reason: format!(
                        "true residual {norm:e} above threshold {threshold:e} after \
                         {iterations} iterations and {} restarts",
                        cycles.saturating_sub(1)
                    ),
                    residual: norm,
                });
            }

            if cycles > 0 {
                debug!(
                    "restarting conjugate gradient from true residual {:e}",
                    norm
                );
            }

            let (correction, used) = self.run_cycle(a, &residual, target_cost, budget)?;
            solution += correction;
            iterations += used;
            cycles += 1;

            let ax: DVector<f64> = a * &solution;
            residual = b - ax;
        }
    }
}

/// Sparse direct solver for symmetric positive definite systems
#[derive(Debug, Clone)]
pub struct Cholesky {
    settings: SolverSettings,
}

impl Cholesky {
    pub fn new(settings: SolverSettings) -> Cholesky {
        Cholesky { settings }
    }
}

impl LinearSolver for Cholesky {
    fn solve(&self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<SolveReport> {
        let csc = CscMatrix::from(a);
        let factor = CscCholesky::factor(&csc).map_err(|err| FeldsparError::Solver {
            reason: format!("Cholesky factorization failed: {err}"),
            residual: b.norm(),
        })?;

        let rhs = DMatrix::from_column_slice(b.nrows(), 1, b.as_slice());
        let solution: DVector<f64> = factor.solve(&rhs).column(0).into_owned();

        let threshold = convergence_threshold(&self.settings, b);
        let residual = residual_norm(a, &solution, b);
        if !(residual <= threshold) {
            return Err(FeldsparError::Solver {
                reason: format!("Cholesky solution residual above threshold {threshold:e}"),
                residual,
            });
        }

        Ok(SolveReport {
            solution,
            iterations: 1,
            residual,
        })
    }
}

/// Builds the solver selected in the settings
pub fn build_solver(settings: &SolverSettings) -> Box<dyn LinearSolver> {
    match settings.method {
        SolverMethod::ConjugateGradient => Box::new(ConjugateGradient::new(settings.clone())),
        SolverMethod::Cholesky => Box::new(Cholesky::new(settings.clone())),
    }
}

/// Solves a system of equations, treating an empty system as solved
///
/// # Arguments
/// * `solver` - The solver backend
/// * `a` - A square positive definite matrix
/// * `b` - The right-hand side
///
/// # Returns
/// The solve report; `x` approximates the solution of `Ax=b`
pub fn run(solver: &dyn LinearSolver, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<SolveReport> {
    if b.is_empty() {
        debug!("no unknowns; skipping linear solve");
        return Ok(SolveReport {
            solution: DVector::zeros(0),
            iterations: 0,
            residual: 0.0,
        });
    }

    let report = solver.solve(a, b)?;
    info!("Linear solver iterations: {}", report.iterations);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn laplacian_1d(n: usize) -> CsrMatrix<f64> {
        let mut dense = DMatrix::zeros(n, n);
        for i in 0..n {
            dense[(i, i)] = 2.0;
            if i + 1 < n {
                dense[(i, i + 1)] = -1.0;
                dense[(i + 1, i)] = -1.0;
            }
        }
        CsrMatrix::from(&dense)
    }

    fn settings(method: SolverMethod) -> SolverSettings {
        SolverSettings {
            method,
            relative_tolerance: 1e-12,
            absolute_tolerance: 1e-15,
            max_iterations: 1000,
        }
    }

    #[test]
    fn both_solvers_agree_on_spd_system() {
        let a = laplacian_1d(20);
        let b = DVector::from_fn(20, |i, _| (i as f64 * 0.3).sin());

        let cg = ConjugateGradient::new(settings(SolverMethod::ConjugateGradient))
            .solve(&a, &b)
            .unwrap();
        let chol = Cholesky::new(settings(SolverMethod::Cholesky))
            .solve(&a, &b)
            .unwrap();

        assert!(cg.iterations > 0);
        for (x, y) in cg.solution.iter().zip(chol.solution.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-9, max_relative = 1e-9);
        }
    }

    #[test]
    fn conjugate_gradient_reports_non_convergence() {
        let a = laplacian_1d(50);
        let b = DVector::from_element(50, 1.0);
        let mut s = settings(SolverMethod::ConjugateGradient);
        s.max_iterations = 2;

        let err = ConjugateGradient::new(s).solve(&a, &b).unwrap_err();
        match err {
            FeldsparError::Solver { reason, residual } => {
                assert!(residual > 1e-12);
                assert!(reason.starts_with("true residual"), "{reason}");
                assert!(reason.contains("after 2 iterations"), "{reason}");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    fn hilbert(n: usize) -> CsrMatrix<f64> {
        let dense = DMatrix::from_fn(n, n, |i, j| 1.0 / (i + j + 1) as f64);
        CsrMatrix::from(&dense)
    }

    #[test]
    fn cholesky_uses_configured_tolerance() {
        // x is of order 1e5, so rounding alone leaves a residual far above 1e-16
        let a = hilbert(8);
        let b = DVector::from_element(8, 1.0);

        let mut strict = settings(SolverMethod::Cholesky);
        strict.relative_tolerance = 1e-16;
        strict.absolute_tolerance = 0.0;
        let err = Cholesky::new(strict).solve(&a, &b).unwrap_err();
        assert!(matches!(err, FeldsparError::Solver { .. }));

        let mut loose = settings(SolverMethod::Cholesky);
        loose.relative_tolerance = 1e-6;
        let report = Cholesky::new(loose).solve(&a, &b).unwrap();
        assert!(report.residual <= 1e-6 * b.norm());
    }

    #[test]
    fn cholesky_rejects_indefinite_matrix() {
        let dense = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        let a = CsrMatrix::from(&dense);
        let b = DVector::from_element(2, 1.0);

        let err = Cholesky::new(settings(SolverMethod::Cholesky))
            .solve(&a, &b)
            .unwrap_err();
        assert!(matches!(err, FeldsparError::Solver { .. }));
    }

    #[test]
    fn zero_rhs_returns_zero_solution() {
        let a = laplacian_1d(4);
        let b = DVector::zeros(4);
        let report = ConjugateGradient::new(settings(SolverMethod::ConjugateGradient))
            .solve(&a, &b)
            .unwrap();
        assert_eq!(report.solution, DVector::zeros(4));
    }

    #[test]
    fn empty_system_is_trivially_solved() {
        let a = CsrMatrix::zeros(0, 0);
        let b = DVector::zeros(0);
        let solver = build_solver(&settings(SolverMethod::ConjugateGradient));
        let report = run(solver.as_ref(), &a, &b).unwrap();
        assert!(report.solution.is_empty());
    }
}
