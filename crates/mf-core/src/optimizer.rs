//! Numerical minimization used by joint fits and plugin profile fits.
//!
//! Thin wrappers around argmin: an L-BFGS minimizer with box bounds (via
//! clamping) for the outer joint fit, and a bounded Brent minimizer for
//! one-dimensional nuisance profiling inside plugins.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::brent::BrentOpt;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{Error, Result};

/// Configuration for the L-BFGS minimizer
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance for the gradient norm
    pub tol: f64,
    /// Number of corrections kept for the inverse-Hessian approximation
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Result of a minimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best-fit parameters
    pub parameters: Vec<f64>,
    /// Function value at minimum
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective (cost) evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Convergence status
    pub converged: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Objective function to be minimized
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate the objective at the given parameters
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Compute the gradient at the given parameters (numerical if not overridden)
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        // Central differences with step scaled to the parameter magnitude.
        let n = params.len();
        let mut grad = vec![0.0; n];

        for i in 0..n {
            let eps = 1e-7 * params[i].abs().max(1.0);

            let mut params_plus = params.to_vec();
            params_plus[i] += eps;
            let f_plus = self.eval(&params_plus)?;

            let mut params_minus = params.to_vec();
            params_minus[i] -= eps;
            let f_minus = self.eval(&params_minus)?;

            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }

        Ok(grad)
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

/// Adapter exposing an [`ObjectiveFunction`] to argmin, with bounds via clamping.
struct BoundedProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counts: Arc<FuncCounts>,
}

impl CostFunction for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Projected-gradient heuristic: at an active bound, zero the component that
        // would push further outside. Keeps the line search from stepping into the
        // flat clamped region.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }

        Ok(g)
    }
}

/// L-BFGS minimizer with box constraints
pub struct LbfgsOptimizer {
    config: OptimizerConfig,
}

impl LbfgsOptimizer {
    /// Create a new minimizer with the given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize the objective within the given bounds.
    ///
    /// # Arguments
    /// * `objective` - Objective function to minimize
    /// * `init_params` - Initial parameter values
    /// * `bounds` - Parameter bounds as (lower, upper) per parameter
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "Parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }

        let init_clamped = clamp_params(init_params, bounds);

        let counts = Arc::new(FuncCounts::default());
        let problem = BoundedProblem { objective, bounds, counts: counts.clone() };

        let linesearch = MoreThuenteLineSearch::new();
        // Argmin's default cost tolerance is ~EPS, far too strict for the NLL scales
        // of real joint fits; relax it relative to the gradient tolerance.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| {
                Error::Validation(format!("Invalid optimizer configuration (tol): {e}"))
            })?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| {
                Error::Validation(format!("Invalid optimizer configuration (tol_cost): {e}"))
            })?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("Optimization failed: {e}")))?;

        let state = res.state();
        let best_unclamped = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("No best parameters found".to_string()))?
            .clone();
        let parameters = clamp_params(&best_unclamped, bounds);
        let fval = state.get_best_cost();
        let n_iter = state.get_iter();
        let n_fev = counts.cost.load(Ordering::Relaxed);
        let n_gev = counts.grad.load(Ordering::Relaxed);

        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );
        let message = termination.to_string();

        Ok(OptimizationResult { parameters, fval, n_iter, n_fev, n_gev, converged, message })
    }
}

impl Default for LbfgsOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

struct ScalarProblem<'a, F: Fn(f64) -> Result<f64>> {
    f: &'a F,
}

impl<F: Fn(f64) -> Result<f64>> CostFunction for ScalarProblem<'_, F> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, x: &f64) -> std::result::Result<f64, argmin::core::Error> {
        (self.f)(*x).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

/// Minimize a one-dimensional function on `[lo, hi]` via bounded Brent search.
///
/// Returns `(x_min, f_min)`. Used by plugins to profile a single nuisance
/// parameter without setting up a full L-BFGS run.
pub fn minimize_scalar<F>(f: F, lo: f64, hi: f64, max_iter: u64) -> Result<(f64, f64)>
where
    F: Fn(f64) -> Result<f64> + Send + Sync,
{
    if !(lo.is_finite() && hi.is_finite() && lo < hi) {
        return Err(Error::Validation(format!(
            "minimize_scalar requires finite lo < hi, got ({lo}, {hi})"
        )));
    }

    let problem = ScalarProblem { f: &f };
    let solver = BrentOpt::new(lo, hi);
    let res = Executor::new(problem, solver)
        .configure(|state| state.max_iters(max_iter))
        .run()
        .map_err(|e| Error::Computation(format!("Scalar minimization failed: {e}")))?;

    let state = res.state();
    let x = *state
        .get_best_param()
        .ok_or_else(|| Error::Computation("Scalar minimization found no minimum".to_string()))?;
    Ok((x, state.get_best_cost()))
}
