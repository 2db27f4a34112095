//! Fit parameters: free/fixed scalars with bounds, a step size, and an
//! optional Gaussian prior.
//!
//! The same type serves both the shared model's parameters and the
//! nuisance parameters that are private to a single plugin.

use mf_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Check that `s` is a valid instance name: `[A-Za-z_]` followed by
/// `[A-Za-z0-9_]*`.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Gaussian prior attached to a parameter, applied as a penalty term in
/// the joint negative log-likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianPrior {
    /// Prior mean.
    pub mean: f64,
    /// Prior sigma (standard deviation), must be finite and > 0.
    pub sigma: f64,
}

impl GaussianPrior {
    /// Negative log-density at `x` (including the normalization constant).
    pub fn nll(&self, x: f64) -> Result<f64> {
        if !self.sigma.is_finite() || self.sigma <= 0.0 {
            return Err(Error::Validation(format!(
                "Gaussian prior requires sigma > 0, got {}",
                self.sigma
            )));
        }
        let z = (x - self.mean) / self.sigma;
        Ok(0.5 * z * z + self.sigma.ln() + 0.5 * (2.0 * std::f64::consts::PI).ln())
    }
}

/// A model or nuisance parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Stable parameter name (unqualified).
    pub name: String,
    /// Current value.
    pub value: f64,
    /// Bounds `(low, high)`; the minimizer never leaves this box.
    pub bounds: (f64, f64),
    /// Suggested step size for numerical differentiation and line search.
    pub delta: f64,
    /// Whether this parameter floats in the fit.
    pub free: bool,
    /// Optional Gaussian prior (penalty term).
    pub prior: Option<GaussianPrior>,
}

impl Parameter {
    /// Create a free parameter with a default step size.
    pub fn new(name: impl Into<String>, value: f64, bounds: (f64, f64)) -> Self {
        let delta = (0.1 * value.abs()).max(1e-3);
        Self { name: name.into(), value, bounds, delta, free: true, prior: None }
    }

    /// Set the step size.
    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    /// Attach a Gaussian prior.
    pub fn with_prior(mut self, mean: f64, sigma: f64) -> Self {
        self.prior = Some(GaussianPrior { mean, sigma });
        self
    }

    /// Mark the parameter as fixed at its current value.
    pub fn fixed(mut self) -> Self {
        self.free = false;
        self
    }

    /// Validate name, value, bounds, step size, and prior.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_identifier(&self.name) {
            return Err(Error::Validation(format!(
                "parameter name '{}' is not a valid identifier",
                self.name
            )));
        }
        if !self.value.is_finite() {
            return Err(Error::Validation(format!("parameter '{}' value is not finite", self.name)));
        }
        let (lo, hi) = self.bounds;
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(Error::Validation(format!(
                "parameter '{}' has invalid bounds ({lo}, {hi})",
                self.name
            )));
        }
        if self.value < lo || self.value > hi {
            return Err(Error::Validation(format!(
                "parameter '{}' value {} outside bounds ({lo}, {hi})",
                self.name, self.value
            )));
        }
        if !self.delta.is_finite() || self.delta <= 0.0 {
            return Err(Error::Validation(format!(
                "parameter '{}' has invalid step size {}",
                self.name, self.delta
            )));
        }
        if let Some(p) = &self.prior
            && (!p.sigma.is_finite() || p.sigma <= 0.0)
        {
            return Err(Error::Validation(format!(
                "parameter '{}' has invalid prior sigma {}",
                self.name, p.sigma
            )));
        }
        Ok(())
    }

    /// Prior penalty at `x`, or 0 if the parameter carries no prior.
    pub fn prior_nll(&self, x: f64) -> Result<f64> {
        match &self.prior {
            Some(p) => p.nll(x),
            None => Ok(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("nai3"));
        assert!(is_valid_identifier("_bkg"));
        assert!(is_valid_identifier("GRB090510"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("3nai"));
        assert!(!is_valid_identifier("det-0"));
        assert!(!is_valid_identifier("det 0"));
    }

    #[test]
    fn test_parameter_validate() {
        assert!(Parameter::new("k", 1.0, (0.0, 10.0)).validate().is_ok());
        assert!(Parameter::new("bad name", 1.0, (0.0, 10.0)).validate().is_err());
        assert!(Parameter::new("k", 20.0, (0.0, 10.0)).validate().is_err());
        assert!(Parameter::new("k", 1.0, (10.0, 0.0)).validate().is_err());
        assert!(Parameter::new("k", 1.0, (0.0, 10.0)).with_delta(0.0).validate().is_err());
        assert!(Parameter::new("k", 1.0, (0.0, 10.0)).with_prior(1.0, -1.0).validate().is_err());
    }

    #[test]
    fn test_prior_penalty_is_quadratic() {
        let p = Parameter::new("k", 1.0, (0.0, 10.0)).with_prior(1.0, 0.5);
        let at_mean = p.prior_nll(1.0).unwrap();
        let off = p.prior_nll(1.5).unwrap();
        // One sigma away: penalty rises by exactly 1/2.
        assert!((off - at_mean - 0.5).abs() < 1e-12);
        let free = Parameter::new("k", 1.0, (0.0, 10.0));
        assert_eq!(free.prior_nll(7.0).unwrap(), 0.0);
    }
}
