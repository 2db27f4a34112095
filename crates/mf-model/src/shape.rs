//! Parametric spectral shapes.
//!
//! A shape is a deterministic function `f(x; θ)` evaluated in batch over a
//! grid of points. Shapes do not own parameter values; the [`crate::Model`]
//! passes the current slice in at every call.

use crate::parameter::Parameter;
use mf_core::{Error, Result};

/// Trait for parametric shapes used by model sources.
///
/// Implementations must be pure functions of `(x, params)` so the fit can
/// re-evaluate them freely during minimization.
pub trait SpectralShape: Send + Sync {
    /// Number of shape parameters.
    fn n_params(&self) -> usize;

    /// Default parameter block (names, initial values, bounds).
    ///
    /// The returned names are unqualified; the model qualifies them with
    /// the source name.
    fn parameter_defaults(&self) -> Vec<Parameter>;

    /// Evaluate `f(x; params)` for every point.
    ///
    /// `out` must have length `x.len()`.
    fn evaluate_batch(&self, x: &[f64], params: &[f64], out: &mut [f64]) -> Result<()>;
}

fn check_lengths(shape: &str, n_params: usize, params: &[f64], x: &[f64], out: &[f64]) -> Result<()> {
    if params.len() != n_params {
        return Err(Error::Validation(format!(
            "{shape} expects {n_params} params, got {}",
            params.len()
        )));
    }
    if params.iter().any(|p| !p.is_finite()) {
        return Err(Error::Validation(format!("{shape} parameters must be finite")));
    }
    if out.len() != x.len() {
        return Err(Error::Validation(format!(
            "{shape} out length mismatch: expected {}, got {}",
            x.len(),
            out.len()
        )));
    }
    Ok(())
}

/// Power law `A * (x / pivot)^index`.
///
/// The pivot is a fixed property of the shape, not a fit parameter.
#[derive(Debug, Clone)]
pub struct PowerLaw {
    pivot: f64,
}

impl PowerLaw {
    /// Create a power law with the given (positive, finite) pivot.
    pub fn new(pivot: f64) -> Result<Self> {
        if !pivot.is_finite() || pivot <= 0.0 {
            return Err(Error::Validation(format!(
                "PowerLaw pivot must be finite and > 0, got {pivot}"
            )));
        }
        Ok(Self { pivot })
    }

    /// The pivot point.
    pub fn pivot(&self) -> f64 {
        self.pivot
    }
}

impl SpectralShape for PowerLaw {
    fn n_params(&self) -> usize {
        2
    }

    fn parameter_defaults(&self) -> Vec<Parameter> {
        vec![
            Parameter::new("amplitude", 1.0, (0.0, 1e6)),
            Parameter::new("index", -2.0, (-10.0, 10.0)).with_delta(0.05),
        ]
    }

    fn evaluate_batch(&self, x: &[f64], params: &[f64], out: &mut [f64]) -> Result<()> {
        check_lengths("PowerLaw", 2, params, x, out)?;
        let amplitude = params[0];
        let index = params[1];
        if amplitude < 0.0 {
            return Err(Error::Validation(format!(
                "PowerLaw amplitude must be >= 0, got {amplitude}"
            )));
        }
        for (o, &xi) in out.iter_mut().zip(x) {
            if xi <= 0.0 {
                return Err(Error::Validation(format!(
                    "PowerLaw requires x > 0, got {xi}"
                )));
            }
            *o = amplitude * (xi / self.pivot).powf(index);
        }
        Ok(())
    }
}

/// Straight line `intercept + slope * x`.
#[derive(Debug, Clone, Default)]
pub struct Line;

impl SpectralShape for Line {
    fn n_params(&self) -> usize {
        2
    }

    fn parameter_defaults(&self) -> Vec<Parameter> {
        vec![
            Parameter::new("intercept", 0.0, (-1e6, 1e6)).with_delta(0.1),
            Parameter::new("slope", 0.0, (-1e6, 1e6)).with_delta(0.1),
        ]
    }

    fn evaluate_batch(&self, x: &[f64], params: &[f64], out: &mut [f64]) -> Result<()> {
        check_lengths("Line", 2, params, x, out)?;
        let intercept = params[0];
        let slope = params[1];
        for (o, &xi) in out.iter_mut().zip(x) {
            *o = intercept + slope * xi;
        }
        Ok(())
    }
}

/// Gaussian line `area / (width * sqrt(2π)) * exp(-(x - center)^2 / (2 width^2))`.
#[derive(Debug, Clone, Default)]
pub struct GaussianLine;

impl SpectralShape for GaussianLine {
    fn n_params(&self) -> usize {
        3
    }

    fn parameter_defaults(&self) -> Vec<Parameter> {
        vec![
            Parameter::new("area", 1.0, (0.0, 1e6)),
            Parameter::new("center", 0.0, (-1e6, 1e6)).with_delta(0.1),
            Parameter::new("width", 1.0, (1e-12, 1e6)),
        ]
    }

    fn evaluate_batch(&self, x: &[f64], params: &[f64], out: &mut [f64]) -> Result<()> {
        check_lengths("GaussianLine", 3, params, x, out)?;
        let area = params[0];
        let center = params[1];
        let width = params[2];
        if width <= 0.0 {
            return Err(Error::Validation(format!(
                "GaussianLine width must be > 0, got {width}"
            )));
        }
        let norm = area / (width * (2.0 * std::f64::consts::PI).sqrt());
        let inv_w = 1.0 / width;
        for (o, &xi) in out.iter_mut().zip(x) {
            let z = (xi - center) * inv_w;
            *o = norm * (-0.5 * z * z).exp();
        }
        Ok(())
    }
}

/// Constant `k`, independent of `x`.
///
/// Useful both as a flat spectrum and as a trivial temporal profile.
#[derive(Debug, Clone, Default)]
pub struct Constant;

impl SpectralShape for Constant {
    fn n_params(&self) -> usize {
        1
    }

    fn parameter_defaults(&self) -> Vec<Parameter> {
        vec![Parameter::new("k", 1.0, (-1e6, 1e6)).with_delta(0.1)]
    }

    fn evaluate_batch(&self, x: &[f64], params: &[f64], out: &mut [f64]) -> Result<()> {
        check_lengths("Constant", 1, params, x, out)?;
        out.fill(params[0]);
        Ok(())
    }
}
