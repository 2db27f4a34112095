//! Plugin for generic (x, y) datasets.
//!
//! Wraps a set of points with either Gaussian errors or Poisson counts and
//! compares them to the shared model evaluated at the `x` values.

use crate::plugin::{Plugin, Tag, check_tag, evaluate_tagged, validate_plugin_name};
use mf_core::{Error, Result};
use mf_model::{Model, Parameter};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal, Poisson};
use statrs::function::gamma::ln_gamma;
use std::sync::Arc;

/// Floor for Poisson model expectations, keeping the objective finite when
/// the model predicts exactly zero in a populated bin.
const TINY_RATE: f64 = 1e-100;

/// Measurement statistics for an [`XyPlugin`].
#[derive(Debug, Clone)]
pub enum XyStatistic {
    /// Gaussian errors per point.
    Gaussian {
        /// Per-point standard deviations (finite, > 0).
        y_errors: Vec<f64>,
    },
    /// Poisson counts (y are non-negative counts).
    Poisson,
}

/// A dataset of points `(x, y)` fit against the shared model.
pub struct XyPlugin {
    name: String,
    x: Vec<f64>,
    y: Vec<f64>,
    statistic: XyStatistic,
    tag: Option<Tag>,
    model: Option<Arc<Model>>,
    nuisance: Vec<Parameter>,
}

impl XyPlugin {
    /// Create a plugin with Gaussian statistics.
    pub fn gaussian(
        name: impl Into<String>,
        x: Vec<f64>,
        y: Vec<f64>,
        y_errors: Vec<f64>,
    ) -> Result<Self> {
        let name = name.into();
        validate_plugin_name(&name)?;
        Self::check_data(&name, &x, &y)?;
        if y_errors.len() != y.len() {
            return Err(Error::Validation(format!(
                "plugin '{name}': y_errors length {} != y length {}",
                y_errors.len(),
                y.len()
            )));
        }
        if y_errors.iter().any(|e| !e.is_finite() || *e <= 0.0) {
            return Err(Error::Validation(format!(
                "plugin '{name}': y_errors must be finite and > 0"
            )));
        }
        Ok(Self {
            name,
            x,
            y,
            statistic: XyStatistic::Gaussian { y_errors },
            tag: None,
            model: None,
            nuisance: Vec::new(),
        })
    }

    /// Create a plugin with Poisson statistics (y are counts).
    pub fn poisson(name: impl Into<String>, x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        let name = name.into();
        validate_plugin_name(&name)?;
        Self::check_data(&name, &x, &y)?;
        if y.iter().any(|v| *v < 0.0) {
            return Err(Error::Validation(format!(
                "plugin '{name}': Poisson counts must be >= 0"
            )));
        }
        Ok(Self {
            name,
            x,
            y,
            statistic: XyStatistic::Poisson,
            tag: None,
            model: None,
            nuisance: Vec::new(),
        })
    }

    fn check_data(name: &str, x: &[f64], y: &[f64]) -> Result<()> {
        if x.is_empty() {
            return Err(Error::Validation(format!("plugin '{name}': no data points")));
        }
        if x.len() != y.len() {
            return Err(Error::Validation(format!(
                "plugin '{name}': x length {} != y length {}",
                x.len(),
                y.len()
            )));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(Error::Validation(format!(
                "plugin '{name}': data must be finite"
            )));
        }
        Ok(())
    }

    /// Associate the plugin with a window of the independent variable.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// The x values.
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// The observations.
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// The statistics model for this dataset.
    pub fn statistic(&self) -> &XyStatistic {
        &self.statistic
    }

    fn bound_model(&self) -> Result<&Arc<Model>> {
        self.model.as_ref().ok_or_else(|| {
            Error::Validation(format!(
                "plugin '{}' has no model; call set_model first",
                self.name
            ))
        })
    }

    fn expected(&self, values: &[f64]) -> Result<Vec<f64>> {
        let model = self.bound_model()?;
        let mut out = vec![0.0; self.x.len()];
        evaluate_tagged(model, self.tag.as_ref(), &self.x, values, &mut out)?;
        Ok(out)
    }

    /// Generate a pseudo-dataset from the model at its *current* parameter
    /// values, with the same x grid, statistics, and tag.
    ///
    /// The returned plugin is named `"{name}_sim"` and is not yet bound to
    /// a model.
    pub fn simulated(&self, seed: u64) -> Result<XyPlugin> {
        let model = self.bound_model()?;
        let expected = self.expected(&model.values())?;
        let mut rng = StdRng::seed_from_u64(seed);
        let sim_name = format!("{}_sim", self.name);

        match &self.statistic {
            XyStatistic::Gaussian { y_errors } => {
                let mut y = Vec::with_capacity(expected.len());
                for (&m, &s) in expected.iter().zip(y_errors) {
                    let dist = Normal::new(m, s).map_err(|e| {
                        Error::Computation(format!("simulation failed: {e}"))
                    })?;
                    y.push(dist.sample(&mut rng));
                }
                let mut sim = XyPlugin::gaussian(sim_name, self.x.clone(), y, y_errors.clone())?;
                sim.tag = self.tag.clone();
                Ok(sim)
            }
            XyStatistic::Poisson => {
                let mut y = Vec::with_capacity(expected.len());
                for &m in &expected {
                    if !m.is_finite() || m < 0.0 {
                        return Err(Error::Computation(format!(
                            "simulation requires non-negative model rates, got {m}"
                        )));
                    }
                    if m == 0.0 {
                        y.push(0.0);
                        continue;
                    }
                    let dist = Poisson::new(m).map_err(|e| {
                        Error::Computation(format!("simulation failed: {e}"))
                    })?;
                    y.push(dist.sample(&mut rng));
                }
                let mut sim = XyPlugin::poisson(sim_name, self.x.clone(), y)?;
                sim.tag = self.tag.clone();
                Ok(sim)
            }
        }
    }
}

/// Gaussian log-likelihood of observations against expectations.
pub(crate) fn gaussian_log_like(y: &[f64], expected: &[f64], sigma: &[f64]) -> Result<f64> {
    let mut ll = -0.5 * y.len() as f64 * (2.0 * std::f64::consts::PI).ln();
    for ((&obs, &m), &s) in y.iter().zip(expected).zip(sigma) {
        if !m.is_finite() {
            return Err(Error::Computation(format!(
                "model expectation is not finite: {m}"
            )));
        }
        let z = (obs - m) / s;
        ll -= 0.5 * z * z + s.ln();
    }
    Ok(ll)
}

/// Poisson log-likelihood of counts against expectations.
pub(crate) fn poisson_log_like(y: &[f64], expected: &[f64]) -> Result<f64> {
    let mut ll = 0.0;
    for (&obs, &m) in y.iter().zip(expected) {
        if !m.is_finite() || m < 0.0 {
            return Err(Error::Computation(format!(
                "Poisson expectation must be finite and >= 0, got {m}"
            )));
        }
        let m = m.max(TINY_RATE);
        ll += obs * m.ln() - m - ln_gamma(obs + 1.0);
    }
    Ok(ll)
}

impl Plugin for XyPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn nuisance_parameters(&self) -> &[Parameter] {
        &self.nuisance
    }

    fn nuisance_parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.nuisance
    }

    fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    fn set_model(&mut self, model: Arc<Model>) -> Result<()> {
        check_tag(&model, self.tag.as_ref())?;
        self.model = Some(model);
        Ok(())
    }

    fn log_like(&self, values: &[f64]) -> Result<f64> {
        let expected = self.expected(values)?;
        match &self.statistic {
            XyStatistic::Gaussian { y_errors } => gaussian_log_like(&self.y, &expected, y_errors),
            XyStatistic::Poisson => poisson_log_like(&self.y, &expected),
        }
    }

    fn inner_fit(&mut self, values: &[f64]) -> Result<f64> {
        // No nuisance parameters: the profile likelihood is the likelihood.
        self.log_like(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mf_model::{Line, Source};

    fn line_model(intercept: f64, slope: f64) -> Arc<Model> {
        Arc::new(
            Model::new(vec![Source::with_parameters(
                "src",
                Arc::new(Line),
                vec![
                    Parameter::new("intercept", intercept, (-100.0, 100.0)),
                    Parameter::new("slope", slope, (-100.0, 100.0)),
                ],
            )])
            .unwrap(),
        )
    }

    #[test]
    fn test_name_round_trips() {
        let p = XyPlugin::gaussian("det0", vec![1.0], vec![2.0], vec![0.5]).unwrap();
        assert_eq!(p.name(), "det0");
        assert!(p.nuisance_parameters().is_empty());
    }

    #[test]
    fn test_reserved_and_invalid_names_rejected() {
        assert!(XyPlugin::gaussian("total", vec![1.0], vec![2.0], vec![0.5]).is_err());
        assert!(XyPlugin::gaussian("0det", vec![1.0], vec![2.0], vec![0.5]).is_err());
        assert!(XyPlugin::poisson("a b", vec![1.0], vec![2.0]).is_err());
    }

    #[test]
    fn test_data_validation() {
        assert!(XyPlugin::gaussian("d", vec![], vec![], vec![]).is_err());
        assert!(XyPlugin::gaussian("d", vec![1.0], vec![1.0, 2.0], vec![0.5]).is_err());
        assert!(XyPlugin::gaussian("d", vec![1.0], vec![1.0], vec![0.0]).is_err());
        assert!(XyPlugin::poisson("d", vec![1.0], vec![-1.0]).is_err());
        assert!(XyPlugin::poisson("d", vec![f64::NAN], vec![1.0]).is_err());
    }

    #[test]
    fn test_log_like_requires_model() {
        let p = XyPlugin::gaussian("d", vec![1.0], vec![2.0], vec![0.5]).unwrap();
        assert!(p.log_like(&[1.0, 1.0]).is_err());
    }

    #[test]
    fn test_gaussian_log_like_value() {
        // Model = 1 + x; data exactly on the model with sigma = 2.
        let model = line_model(1.0, 1.0);
        let mut p = XyPlugin::gaussian(
            "d",
            vec![0.0, 1.0],
            vec![1.0, 2.0],
            vec![2.0, 2.0],
        )
        .unwrap();
        p.set_model(model.clone()).unwrap();

        let ll = p.log_like(&model.values()).unwrap();
        // Perfect match: ll = -n/2 ln(2 pi) - sum(ln sigma)
        let expect = -1.0 * (2.0 * std::f64::consts::PI).ln() - 2.0 * 2.0f64.ln();
        assert_relative_eq!(ll, expect, epsilon = 1e-12);
    }

    #[test]
    fn test_poisson_log_like_value() {
        // Single point, model expectation 3, observed 2:
        // ll = 2 ln 3 - 3 - ln(2!)
        let model = line_model(3.0, 0.0);
        let mut p = XyPlugin::poisson("d", vec![1.0], vec![2.0]).unwrap();
        p.set_model(model.clone()).unwrap();

        let ll = p.log_like(&model.values()).unwrap();
        let expect = 2.0 * 3.0f64.ln() - 3.0 - 2.0f64.ln();
        assert_relative_eq!(ll, expect, epsilon = 1e-12);
    }

    #[test]
    fn test_poisson_zero_expectation_stays_finite() {
        let model = line_model(0.0, 0.0);
        let mut p = XyPlugin::poisson("d", vec![1.0], vec![1.0]).unwrap();
        p.set_model(model.clone()).unwrap();
        let ll = p.log_like(&model.values()).unwrap();
        assert!(ll.is_finite());
        assert!(ll < -100.0);
    }

    #[test]
    fn test_inner_fit_equals_log_like_without_nuisance() {
        let model = line_model(1.0, 2.0);
        let mut p =
            XyPlugin::gaussian("d", vec![0.0, 1.0], vec![1.5, 2.5], vec![0.3, 0.3]).unwrap();
        p.set_model(model.clone()).unwrap();

        let values = model.values();
        let plain = p.log_like(&values).unwrap();
        let profiled = p.inner_fit(&values).unwrap();
        assert_eq!(plain, profiled);
    }

    #[test]
    fn test_tag_mismatch_rejected_at_set_model() {
        let model = line_model(1.0, 1.0); // no independent variable
        let mut p = XyPlugin::gaussian("d", vec![1.0], vec![2.0], vec![0.5])
            .unwrap()
            .with_tag(Tag::at("time", 0.0).unwrap());
        assert!(p.set_model(model).is_err());
    }

    #[test]
    fn test_simulated_dataset_round_trip() {
        let model = line_model(2.0, 0.0);
        let mut p = XyPlugin::gaussian(
            "d",
            vec![0.0, 1.0, 2.0],
            vec![2.0, 2.0, 2.0],
            vec![0.1, 0.1, 0.1],
        )
        .unwrap();
        p.set_model(model).unwrap();

        let sim = p.simulated(42).unwrap();
        assert_eq!(sim.name(), "d_sim");
        assert_eq!(sim.x(), p.x());
        // Same seed, same data.
        let sim2 = p.simulated(42).unwrap();
        assert_eq!(sim.y(), sim2.y());
        // Simulated points stay near the model for small errors.
        for &v in sim.y() {
            assert!((v - 2.0).abs() < 1.0);
        }
    }
}
