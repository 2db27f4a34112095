//! Joint likelihood fitting.
//!
//! [`JointLikelihood`] combines a shared [`Model`] with a [`DataList`] of
//! plugins. The outer fit minimizes the joint negative log-likelihood over
//! the model's free parameters; at every objective evaluation each plugin
//! profiles its own nuisance parameters (`inner_fit`), so the outer
//! minimizer never sees them.

use mf_core::{
    Error, FitResult, LbfgsOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig,
    Result,
};
use mf_model::Model;
use mf_plugins::{DataList, RESERVED_NAME};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::Arc;

/// Result of a joint fit: the per-dataset log-likelihood decomposition and
/// the fitted free parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointFitResult {
    /// Per-plugin log-likelihoods at the best fit, in insertion order,
    /// followed by the reserved `"total"` row.
    pub log_likes: Vec<(String, f64)>,
    /// Best-fit free parameters with uncertainties.
    pub fit: FitResult,
}

impl JointFitResult {
    /// Log-likelihood row by plugin name (or `"total"`).
    pub fn log_like(&self, name: &str) -> Option<f64> {
        self.log_likes.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// Objective for the outer minimization: profiled joint NLL plus prior
/// penalties, over the model's free parameters.
struct ProfiledNll<'a> {
    model: &'a Model,
    data: RefCell<&'a mut DataList>,
}

// SAFETY: the L-BFGS executor is single-threaded within one minimize()
// call. The RefCell is never shared across threads.
unsafe impl Send for ProfiledNll<'_> {}
unsafe impl Sync for ProfiledNll<'_> {}

impl ObjectiveFunction for ProfiledNll<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let full = self.model.expand_free(params)?;
        let mut data = self.data.borrow_mut();
        let terms = data.inner_fit_all(&full)?;
        let ll: f64 = terms.iter().map(|(_, v)| v).sum();
        Ok(self.model.prior_nll(&full)? - ll)
    }
}

/// A joint analysis: one shared model, many datasets.
pub struct JointLikelihood {
    model: Model,
    data: DataList,
    config: OptimizerConfig,
}

impl JointLikelihood {
    /// Create a joint likelihood, binding the model to every plugin.
    pub fn new(model: Model, mut data: DataList) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Validation("JointLikelihood requires at least one dataset".into()));
        }
        let shared = Arc::new(model.clone());
        data.set_model(&shared)?;
        Ok(Self { model, data, config: OptimizerConfig::default() })
    }

    /// Use a custom optimizer configuration.
    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    /// The shared model (carries the current parameter values).
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Mutable access to the model (fix/free/set values before fitting).
    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    /// The datasets.
    pub fn data(&self) -> &DataList {
        &self.data
    }

    /// Joint minus log-likelihood (profiled over nuisance parameters) at
    /// the given free-parameter values.
    pub fn minus_log_like(&mut self, free_values: &[f64]) -> Result<f64> {
        let full = self.model.expand_free(free_values)?;
        let terms = self.data.inner_fit_all(&full)?;
        let ll: f64 = terms.iter().map(|(_, v)| v).sum();
        Ok(self.model.prior_nll(&full)? - ll)
    }

    /// Minimize the profiled joint NLL from `init` within `bounds`, both
    /// in free-parameter space.
    pub(crate) fn minimize_from(
        &mut self,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        let objective = ProfiledNll { model: &self.model, data: RefCell::new(&mut self.data) };
        let optimizer = LbfgsOptimizer::new(self.config.clone());
        optimizer.minimize(&objective, init, bounds)
    }

    /// Run the joint fit.
    ///
    /// On success the model carries the best-fit values and every plugin's
    /// nuisance parameters are left at their profiled values.
    pub fn fit(&mut self) -> Result<JointFitResult> {
        let free_names = self.model.free_names();
        if free_names.is_empty() {
            return Err(Error::Validation("no free parameters in the model".into()));
        }
        let init = self.model.free_values();
        let bounds = self.model.free_bounds();

        let result = self.minimize_from(&init, &bounds)?;
        if !result.converged {
            log::warn!("joint fit did not converge: {}", result.message);
        }

        // Uncertainties from the Hessian at the minimum.
        let hessian = self.compute_hessian(&result.parameters, &bounds)?;
        let n = result.parameters.len();
        let diag_uncertainties = diagonal_uncertainties(&hessian, n);

        let fit = match invert_hessian(&hessian, n) {
            Some(covariance) => {
                let mut all_variances_ok = true;
                let mut uncertainties = Vec::with_capacity(n);
                for i in 0..n {
                    let var = covariance[(i, i)];
                    if var.is_finite() && var > 0.0 {
                        uncertainties.push(var.sqrt());
                    } else {
                        all_variances_ok = false;
                        uncertainties.push(diag_uncertainties[i]);
                    }
                }
                if all_variances_ok {
                    let cov_flat: Vec<f64> = covariance.iter().copied().collect();
                    FitResult::with_covariance(
                        free_names.clone(),
                        result.parameters.clone(),
                        uncertainties,
                        cov_flat,
                        result.fval,
                        result.converged,
                        result.n_fev,
                    )
                } else {
                    log::warn!("Invalid covariance diagonal; omitting covariance matrix");
                    FitResult::new(
                        free_names.clone(),
                        result.parameters.clone(),
                        uncertainties,
                        result.fval,
                        result.converged,
                        result.n_fev,
                    )
                }
            }
            None => {
                log::warn!("Hessian inversion failed, using diagonal approximation");
                FitResult::new(
                    free_names.clone(),
                    result.parameters.clone(),
                    diag_uncertainties,
                    result.fval,
                    result.converged,
                    result.n_fev,
                )
            }
        };

        // Write best-fit values back into the model and leave each plugin's
        // nuisance parameters at their profiled values.
        for (name, &v) in free_names.iter().zip(&result.parameters) {
            self.model.set_value(name, v)?;
        }
        let full = self.model.values();
        let mut log_likes = self.data.inner_fit_all(&full)?;
        let total: f64 = log_likes.iter().map(|(_, v)| v).sum();
        log_likes.push((RESERVED_NAME.to_string(), total));

        Ok(JointFitResult { log_likes, fit })
    }

    /// Re-run every plugin's profile fit at the given full parameter
    /// vector, leaving nuisance parameters at the corresponding profiled
    /// values.
    pub(crate) fn data_refresh(&mut self, full: &[f64]) -> Result<()> {
        self.data.inner_fit_all(full)?;
        Ok(())
    }

    /// Hessian of the profiled NLL via forward differences of the
    /// (numerical) gradient, symmetrized.
    fn compute_hessian(
        &mut self,
        best_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<DMatrix<f64>> {
        let n = best_params.len();
        let objective = ProfiledNll { model: &self.model, data: RefCell::new(&mut self.data) };
        let grad_center = objective.gradient(best_params)?;

        let mut hessian = DMatrix::zeros(n, n);
        for j in 0..n {
            let eps = 1e-4 * best_params[j].abs().max(1.0);

            let mut params_plus = best_params.to_vec();
            params_plus[j] += eps;
            // Stay inside the box so the objective remains evaluable.
            params_plus[j] = params_plus[j].min(bounds[j].1);
            let step = params_plus[j] - best_params[j];
            if step == 0.0 {
                params_plus[j] = (best_params[j] - eps).max(bounds[j].0);
            }
            let actual = params_plus[j] - best_params[j];
            if actual == 0.0 {
                return Err(Error::Computation(format!(
                    "cannot take Hessian step for parameter {j}: degenerate bounds"
                )));
            }
            let grad_plus = objective.gradient(&params_plus)?;

            for i in 0..n {
                hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / actual;
            }
        }

        // Symmetrise: H = (H + H^T) / 2
        let ht = hessian.transpose();
        hessian = (&hessian + &ht) * 0.5;

        Ok(hessian)
    }
}

/// Invert the Hessian to get a covariance matrix via damped Cholesky.
///
/// Returns `None` if no acceptable (finite, positive-variance) inverse can
/// be produced.
fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    // Even at a valid minimum the numerically estimated Hessian can be
    // slightly indefinite; prefer a damped Cholesky solve over a raw
    // inverse to avoid negative variances.
    let identity = DMatrix::identity(n, n);

    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    let max_attempts = 10;

    for attempt in 0..max_attempts {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            return Some(chol.solve(&identity));
        }

        if attempt + 1 == max_attempts {
            break;
        }

        let next_damping = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        let add = next_damping - damping;
        for i in 0..n {
            h_damped[(i, i)] += add;
        }
        damping = next_damping;
    }

    let cov = h_damped.lu().try_inverse()?;
    for i in 0..n {
        let v = cov[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
    }
    Some(cov)
}

/// Uncertainties from the Hessian diagonal (fallback).
fn diagonal_uncertainties(hessian: &DMatrix<f64>, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let hess_ii = hessian[(i, i)];
            let denom = hess_ii.abs().max(1e-12);
            1.0 / denom.sqrt()
        })
        .collect()
}
