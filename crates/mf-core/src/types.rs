//! Common result types for MultiFit

use serde::{Deserialize, Serialize};

/// Fit result containing best-fit values and uncertainties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Names of the fitted parameters (stable order)
    pub names: Vec<String>,

    /// Best-fit parameter values
    pub values: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal)
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Negative log-likelihood at minimum
    pub nll: f64,

    /// Convergence status
    pub converged: bool,

    /// Number of objective evaluations
    pub n_evaluations: usize,
}

impl FitResult {
    /// Create a fit result without a covariance matrix
    pub fn new(
        names: Vec<String>,
        values: Vec<f64>,
        uncertainties: Vec<f64>,
        nll: f64,
        converged: bool,
        n_evaluations: usize,
    ) -> Self {
        Self { names, values, uncertainties, covariance: None, nll, converged, n_evaluations }
    }

    /// Create a fit result with covariance matrix
    pub fn with_covariance(
        names: Vec<String>,
        values: Vec<f64>,
        uncertainties: Vec<f64>,
        covariance: Vec<f64>,
        nll: f64,
        converged: bool,
        n_evaluations: usize,
    ) -> Self {
        Self {
            names,
            values,
            uncertainties,
            covariance: Some(covariance),
            nll,
            converged,
            n_evaluations,
        }
    }

    /// Number of fitted parameters.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Get correlation matrix element (i, j). Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.values.len();
        if i >= n || j >= n {
            return None;
        }
        let sigma_i = self.uncertainties[i];
        let sigma_j = self.uncertainties[j];
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_result() {
        let result = FitResult::new(
            vec!["a".into(), "b".into()],
            vec![1.0, 2.0],
            vec![0.1, 0.2],
            123.45,
            true,
            100,
        );
        assert_eq!(result.dim(), 2);
        assert_eq!(result.uncertainties.len(), 2);
        assert!(result.converged);
        assert!(result.correlation(0, 1).is_none());
    }

    #[test]
    fn test_correlation_diagonal_is_one() {
        // cov = [[0.04, 0.006], [0.006, 0.09]] -> sigma = [0.2, 0.3]
        let result = FitResult::with_covariance(
            vec!["a".into(), "b".into()],
            vec![1.0, 2.0],
            vec![0.2, 0.3],
            vec![0.04, 0.006, 0.006, 0.09],
            0.0,
            true,
            10,
        );
        assert!((result.correlation(0, 0).unwrap() - 1.0).abs() < 1e-12);
        assert!((result.correlation(0, 1).unwrap() - 0.1).abs() < 1e-12);
        assert!(result.correlation(2, 0).is_none());
    }
}
