//! The shared likelihood model: named sources, a flat parameter vector,
//! and (optionally) time-dependent evaluation.

use crate::parameter::{Parameter, is_valid_identifier};
use crate::shape::SpectralShape;
use mf_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// One source in the model, as given at construction: a spectral shape
/// plus its parameter block, optionally modulated by a temporal profile.
#[derive(Clone)]
pub struct Source {
    /// Source name (a valid identifier, unique within the model).
    pub name: String,
    /// Spectral shape.
    pub shape: Arc<dyn SpectralShape>,
    /// Spectral parameter block (length `shape.n_params()`).
    pub parameters: Vec<Parameter>,
    /// Optional temporal modulation.
    pub temporal: Option<TemporalProfile>,
}

/// Temporal profile modulating a source's spectral flux.
///
/// The profile is a dimensionless shape evaluated at the model's
/// independent variable (e.g. time); the source flux is multiplied by it.
#[derive(Clone)]
pub struct TemporalProfile {
    /// Profile shape over the independent variable.
    pub shape: Arc<dyn SpectralShape>,
    /// Profile parameter block (length `shape.n_params()`).
    pub parameters: Vec<Parameter>,
}

impl Source {
    /// Create a source with the shape's default parameters.
    pub fn new(name: impl Into<String>, shape: Arc<dyn SpectralShape>) -> Self {
        let parameters = shape.parameter_defaults();
        Self { name: name.into(), shape, parameters, temporal: None }
    }

    /// Create a source with an explicit parameter block.
    pub fn with_parameters(
        name: impl Into<String>,
        shape: Arc<dyn SpectralShape>,
        parameters: Vec<Parameter>,
    ) -> Self {
        Self { name: name.into(), shape, parameters, temporal: None }
    }

    /// Attach a temporal profile with the profile shape's default parameters.
    pub fn with_temporal(mut self, shape: Arc<dyn SpectralShape>) -> Self {
        let parameters = shape.parameter_defaults();
        self.temporal = Some(TemporalProfile { shape, parameters });
        self
    }

    /// Attach a temporal profile with an explicit parameter block.
    pub fn with_temporal_parameters(
        mut self,
        shape: Arc<dyn SpectralShape>,
        parameters: Vec<Parameter>,
    ) -> Self {
        self.temporal = Some(TemporalProfile { shape, parameters });
        self
    }
}

/// Internal source representation: shapes plus indices into the model's
/// flat parameter vector.
#[derive(Clone)]
struct CompiledSource {
    shape: Arc<dyn SpectralShape>,
    shape_indices: Vec<usize>,
    temporal: Option<(Arc<dyn SpectralShape>, Vec<usize>)>,
}

/// The shared likelihood model.
///
/// Every plugin in a joint fit binds to the same `Model`. The model owns
/// the current parameter values, but evaluation always takes an explicit
/// value vector so the minimizer can probe points without mutating shared
/// state.
#[derive(Clone)]
pub struct Model {
    source_names: Vec<String>,
    sources: Vec<CompiledSource>,
    /// Flat parameter vector; names are qualified (`"source.param"`).
    parameters: Vec<Parameter>,
    name_to_index: HashMap<String, usize>,
    independent_variable: Option<String>,
}

impl Model {
    /// Number of grid intervals used for interval-averaged evaluation.
    pub const AVERAGING_GRID: usize = 50;

    /// Create a model from sources, validating names and parameter blocks.
    pub fn new(sources: Vec<Source>) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::Validation("Model requires at least one source".into()));
        }

        let mut source_names = Vec::with_capacity(sources.len());
        let mut compiled = Vec::with_capacity(sources.len());
        let mut parameters = Vec::new();

        for src in sources {
            if !is_valid_identifier(&src.name) {
                return Err(Error::Validation(format!(
                    "source name '{}' is not a valid identifier",
                    src.name
                )));
            }
            if source_names.contains(&src.name) {
                return Err(Error::Validation(format!("duplicate source name '{}'", src.name)));
            }
            if src.parameters.len() != src.shape.n_params() {
                return Err(Error::Validation(format!(
                    "source '{}' has {} parameters but its shape expects {}",
                    src.name,
                    src.parameters.len(),
                    src.shape.n_params()
                )));
            }

            let mut shape_indices = Vec::with_capacity(src.parameters.len());
            for p in src.parameters {
                p.validate()?;
                shape_indices.push(parameters.len());
                let mut q = p;
                q.name = format!("{}.{}", src.name, q.name);
                parameters.push(q);
            }

            let temporal = match src.temporal {
                None => None,
                Some(t) => {
                    if t.parameters.len() != t.shape.n_params() {
                        return Err(Error::Validation(format!(
                            "source '{}' temporal profile has {} parameters but its shape expects {}",
                            src.name,
                            t.parameters.len(),
                            t.shape.n_params()
                        )));
                    }
                    let mut indices = Vec::with_capacity(t.parameters.len());
                    for p in t.parameters {
                        p.validate()?;
                        indices.push(parameters.len());
                        let mut q = p;
                        q.name = format!("{}.temporal.{}", src.name, q.name);
                        parameters.push(q);
                    }
                    Some((t.shape, indices))
                }
            };

            compiled.push(CompiledSource { shape: src.shape, shape_indices, temporal });
            source_names.push(src.name);
        }

        let mut name_to_index = HashMap::with_capacity(parameters.len());
        for (i, p) in parameters.iter().enumerate() {
            if name_to_index.insert(p.name.clone(), i).is_some() {
                return Err(Error::Validation(format!("duplicate parameter name '{}'", p.name)));
            }
        }

        Ok(Self {
            source_names,
            sources: compiled,
            parameters,
            name_to_index,
            independent_variable: None,
        })
    }

    /// Register the independent variable (e.g. `"time"`) that tagged
    /// plugins and temporal profiles refer to.
    pub fn with_independent_variable(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if !is_valid_identifier(&name) {
            return Err(Error::Validation(format!(
                "independent variable name '{name}' is not a valid identifier"
            )));
        }
        self.independent_variable = Some(name);
        Ok(self)
    }

    /// The registered independent variable, if any.
    pub fn independent_variable(&self) -> Option<&str> {
        self.independent_variable.as_deref()
    }

    /// Source names, in insertion order.
    pub fn source_names(&self) -> &[String] {
        &self.source_names
    }

    /// Total number of parameters (spectral + temporal, all sources).
    pub fn n_parameters(&self) -> usize {
        self.parameters.len()
    }

    /// All parameters, in flat order (names are qualified).
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Qualified parameter names, in flat order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Parameter by flat index.
    pub fn parameter(&self, index: usize) -> Result<&Parameter> {
        self.parameters
            .get(index)
            .ok_or_else(|| Error::Validation(format!("parameter index out of range: {index}")))
    }

    /// Parameter by qualified name (`"source.param"`).
    pub fn parameter_by_name(&self, name: &str) -> Result<&Parameter> {
        let i = self.index_of(name)?;
        Ok(&self.parameters[i])
    }

    /// Flat index of a qualified parameter name.
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.name_to_index
            .get(name)
            .copied()
            .ok_or_else(|| Error::Validation(format!("unknown parameter '{name}'")))
    }

    /// Current values of all parameters, in flat order.
    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }

    /// Set the value of a parameter by qualified name, enforcing bounds.
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<()> {
        let i = self.index_of(name)?;
        let p = &mut self.parameters[i];
        let (lo, hi) = p.bounds;
        if !value.is_finite() || value < lo || value > hi {
            return Err(Error::Validation(format!(
                "value {value} for '{name}' outside bounds ({lo}, {hi})"
            )));
        }
        p.value = value;
        Ok(())
    }

    /// Fix a parameter at its current value.
    pub fn fix(&mut self, name: &str) -> Result<()> {
        let i = self.index_of(name)?;
        self.parameters[i].free = false;
        Ok(())
    }

    /// Let a parameter float again.
    pub fn free(&mut self, name: &str) -> Result<()> {
        let i = self.index_of(name)?;
        self.parameters[i].free = true;
        Ok(())
    }

    /// Flat indices of the free parameters.
    pub fn free_indices(&self) -> Vec<usize> {
        self.parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| p.free)
            .map(|(i, _)| i)
            .collect()
    }

    /// Qualified names of the free parameters.
    pub fn free_names(&self) -> Vec<String> {
        self.parameters.iter().filter(|p| p.free).map(|p| p.name.clone()).collect()
    }

    /// Current values of the free parameters.
    pub fn free_values(&self) -> Vec<f64> {
        self.parameters.iter().filter(|p| p.free).map(|p| p.value).collect()
    }

    /// Bounds of the free parameters.
    pub fn free_bounds(&self) -> Vec<(f64, f64)> {
        self.parameters.iter().filter(|p| p.free).map(|p| p.bounds).collect()
    }

    /// Expand a free-parameter vector into a full value vector, with fixed
    /// parameters at their current values.
    pub fn expand_free(&self, free_values: &[f64]) -> Result<Vec<f64>> {
        let free = self.free_indices();
        if free_values.len() != free.len() {
            return Err(Error::Validation(format!(
                "free value length mismatch: expected {}, got {}",
                free.len(),
                free_values.len()
            )));
        }
        let mut values = self.values();
        for (&i, &v) in free.iter().zip(free_values) {
            values[i] = v;
        }
        Ok(values)
    }

    fn check_values_len(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.n_parameters() {
            return Err(Error::Validation(format!(
                "parameter length mismatch: expected {}, got {}",
                self.n_parameters(),
                values.len()
            )));
        }
        Ok(())
    }

    fn gather(values: &[f64], indices: &[usize]) -> Vec<f64> {
        indices.iter().map(|&i| values[i]).collect()
    }

    /// Evaluate the total flux at `x` with the given parameter values.
    ///
    /// When `time` is `Some`, sources with a temporal profile are modulated
    /// by the profile evaluated at that time (requires a registered
    /// independent variable). When `time` is `None` the profiles are
    /// ignored (factor 1), so untagged plugins see the bare spectrum.
    pub fn evaluate(
        &self,
        x: &[f64],
        values: &[f64],
        time: Option<f64>,
        out: &mut [f64],
    ) -> Result<()> {
        self.check_values_len(values)?;
        if out.len() != x.len() {
            return Err(Error::Validation(format!(
                "evaluate out length mismatch: expected {}, got {}",
                x.len(),
                out.len()
            )));
        }
        if time.is_some() && self.independent_variable.is_none() {
            return Err(Error::Validation(
                "time given but the model has no independent variable".into(),
            ));
        }

        out.fill(0.0);
        let mut tmp = vec![0.0f64; x.len()];
        for src in &self.sources {
            let sp = Self::gather(values, &src.shape_indices);
            src.shape.evaluate_batch(x, &sp, &mut tmp)?;

            let mut factor = 1.0;
            if let (Some(t), Some((tshape, tindices))) = (time, &src.temporal) {
                let tp = Self::gather(values, tindices);
                let mut f = [0.0f64];
                tshape.evaluate_batch(&[t], &tp, &mut f)?;
                factor = f[0];
            }

            for (o, &v) in out.iter_mut().zip(&tmp) {
                *o += factor * v;
            }
        }
        Ok(())
    }

    /// Evaluate the flux averaged over an interval of the independent
    /// variable (trapezoidal rule on a uniform grid).
    ///
    /// This is what tagged plugins use to average a time-varying model over
    /// their exposure window.
    pub fn evaluate_averaged(
        &self,
        x: &[f64],
        values: &[f64],
        start: f64,
        stop: f64,
        out: &mut [f64],
    ) -> Result<()> {
        if self.independent_variable.is_none() {
            return Err(Error::Validation(
                "interval averaging requires a registered independent variable".into(),
            ));
        }
        if !(start.is_finite() && stop.is_finite() && start < stop) {
            return Err(Error::Validation(format!(
                "invalid averaging interval ({start}, {stop})"
            )));
        }
        self.check_values_len(values)?;
        if out.len() != x.len() {
            return Err(Error::Validation(format!(
                "evaluate_averaged out length mismatch: expected {}, got {}",
                x.len(),
                out.len()
            )));
        }

        let n = Self::AVERAGING_GRID;
        let dt = (stop - start) / n as f64;
        out.fill(0.0);
        let mut tmp = vec![0.0f64; x.len()];
        for k in 0..=n {
            let t = start + k as f64 * dt;
            self.evaluate(x, values, Some(t), &mut tmp)?;
            // Trapezoid: half weight at the end points.
            let w = if k == 0 || k == n { 0.5 } else { 1.0 };
            for (o, &v) in out.iter_mut().zip(&tmp) {
                *o += w * v;
            }
        }
        for o in out.iter_mut() {
            *o /= n as f64;
        }
        Ok(())
    }

    /// Total prior penalty at the given values (sum over parameters with a
    /// Gaussian prior).
    pub fn prior_nll(&self, values: &[f64]) -> Result<f64> {
        self.check_values_len(values)?;
        let mut nll = 0.0;
        for (p, &v) in self.parameters.iter().zip(values) {
            nll += p.prior_nll(v)?;
        }
        Ok(nll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Constant, Line};
    use approx::assert_relative_eq;

    fn line_model() -> Model {
        Model::new(vec![Source::with_parameters(
            "src",
            Arc::new(Line),
            vec![
                Parameter::new("intercept", 1.0, (-10.0, 10.0)),
                Parameter::new("slope", 2.0, (-10.0, 10.0)),
            ],
        )])
        .unwrap()
    }

    #[test]
    fn test_qualified_names_and_values() {
        let model = line_model();
        assert_eq!(model.parameter_names(), ["src.intercept", "src.slope"]);
        assert_eq!(model.values(), vec![1.0, 2.0]);
        assert_eq!(model.parameter_by_name("src.slope").unwrap().value, 2.0);
        assert!(model.parameter_by_name("src.nope").is_err());
        assert_eq!(model.source_names(), ["src"]);
    }

    #[test]
    fn test_model_rejects_bad_sources() {
        assert!(Model::new(vec![]).is_err());
        assert!(Model::new(vec![Source::new("2bad", Arc::new(Line))]).is_err());
        let dup = vec![Source::new("s", Arc::new(Line)), Source::new("s", Arc::new(Constant))];
        assert!(Model::new(dup).is_err());
        // Parameter block length mismatch.
        let short = Source::with_parameters(
            "s",
            Arc::new(Line),
            vec![Parameter::new("intercept", 0.0, (-1.0, 1.0))],
        );
        assert!(Model::new(vec![short]).is_err());
    }

    #[test]
    fn test_fix_free_and_expand() {
        let mut model = line_model();
        model.fix("src.intercept").unwrap();
        assert_eq!(model.free_indices(), vec![1]);
        assert_eq!(model.free_names(), ["src.slope"]);
        assert_eq!(model.free_values(), vec![2.0]);
        assert_eq!(model.free_bounds(), vec![(-10.0, 10.0)]);

        let full = model.expand_free(&[5.0]).unwrap();
        assert_eq!(full, vec![1.0, 5.0]);
        assert!(model.expand_free(&[1.0, 2.0]).is_err());

        model.free("src.intercept").unwrap();
        assert_eq!(model.free_indices(), vec![0, 1]);
    }

    #[test]
    fn test_set_value_enforces_bounds() {
        let mut model = line_model();
        model.set_value("src.slope", 3.0).unwrap();
        assert_eq!(model.values()[1], 3.0);
        assert!(model.set_value("src.slope", 100.0).is_err());
        assert!(model.set_value("src.slope", f64::NAN).is_err());
    }

    #[test]
    fn test_evaluate_sums_sources() {
        let model = Model::new(vec![
            Source::with_parameters(
                "a",
                Arc::new(Constant),
                vec![Parameter::new("k", 2.0, (-10.0, 10.0))],
            ),
            Source::with_parameters(
                "b",
                Arc::new(Line),
                vec![
                    Parameter::new("intercept", 0.0, (-10.0, 10.0)),
                    Parameter::new("slope", 1.0, (-10.0, 10.0)),
                ],
            ),
        ])
        .unwrap();

        let values = model.values();
        let mut out = [0.0; 2];
        model.evaluate(&[0.0, 3.0], &values, None, &mut out).unwrap();
        assert_relative_eq!(out[0], 2.0);
        assert_relative_eq!(out[1], 5.0);
    }

    #[test]
    fn test_time_requires_independent_variable() {
        let model = line_model();
        let values = model.values();
        let mut out = [0.0; 1];
        assert!(model.evaluate(&[1.0], &values, Some(0.5), &mut out).is_err());
        assert!(model.evaluate_averaged(&[1.0], &values, 0.0, 1.0, &mut out).is_err());
    }

    #[test]
    fn test_temporal_modulation_and_averaging() {
        // Flux = 4 (constant in x), modulated by a linear profile 1 + t.
        let source = Source::with_parameters(
            "s",
            Arc::new(Constant),
            vec![Parameter::new("k", 4.0, (-10.0, 10.0))],
        )
        .with_temporal_parameters(
            Arc::new(Line),
            vec![
                Parameter::new("intercept", 1.0, (-10.0, 10.0)),
                Parameter::new("slope", 1.0, (-10.0, 10.0)),
            ],
        );
        let model = Model::new(vec![source]).unwrap().with_independent_variable("time").unwrap();
        assert_eq!(
            model.parameter_names(),
            ["s.k", "s.temporal.intercept", "s.temporal.slope"]
        );
        let values = model.values();

        let mut out = [0.0; 1];
        // Pointwise at t=2: 4 * (1 + 2) = 12.
        model.evaluate(&[1.0], &values, Some(2.0), &mut out).unwrap();
        assert_relative_eq!(out[0], 12.0, epsilon = 1e-12);

        // Average over [0, 2] of 4*(1+t) = 4*(1 + mean(t)) = 8; the profile
        // is linear so the trapezoid rule is exact.
        model.evaluate_averaged(&[1.0], &values, 0.0, 2.0, &mut out).unwrap();
        assert_relative_eq!(out[0], 8.0, epsilon = 1e-10);

        // Without a time the profile is ignored.
        model.evaluate(&[1.0], &values, None, &mut out).unwrap();
        assert_relative_eq!(out[0], 4.0);
    }

    #[test]
    fn test_prior_nll_counts_only_priored_params() {
        let model = Model::new(vec![Source::with_parameters(
            "s",
            Arc::new(Line),
            vec![
                Parameter::new("intercept", 1.0, (-10.0, 10.0)).with_prior(0.0, 1.0),
                Parameter::new("slope", 2.0, (-10.0, 10.0)),
            ],
        )])
        .unwrap();
        let base = model.prior_nll(&[0.0, 2.0]).unwrap();
        let shifted = model.prior_nll(&[1.0, 2.0]).unwrap();
        assert_relative_eq!(shifted - base, 0.5, epsilon = 1e-12);
    }
}
