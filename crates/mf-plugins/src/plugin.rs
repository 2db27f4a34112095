//! The plugin contract: every dataset adapter in a joint fit implements
//! [`Plugin`].
//!
//! A plugin wraps one dataset and exposes its log-likelihood contribution
//! against the shared [`Model`]. Nuisance parameters are private to the
//! plugin; the shared model never sees them.

use crate::time_interval::TimeInterval;
use mf_core::{Error, Result};
use mf_model::{Model, Parameter, is_valid_identifier};
use std::sync::Arc;

/// Reserved row name for the combined log-likelihood in joint results.
pub const RESERVED_NAME: &str = "total";

/// Validate a plugin instance name: a valid identifier, not the reserved
/// word `"total"`.
pub fn validate_plugin_name(name: &str) -> Result<()> {
    if !is_valid_identifier(name) {
        return Err(Error::Validation(format!(
            "plugin name '{name}' is not a valid identifier"
        )));
    }
    if name == RESERVED_NAME {
        return Err(Error::Validation(format!(
            "plugin name '{RESERVED_NAME}' is reserved for the combined log-likelihood"
        )));
    }
    Ok(())
}

/// Association between a plugin and the model's independent variable.
///
/// A tag either pins the plugin to a single value of the variable
/// (`stop == None`) or to a window over which the time-varying model is
/// averaged.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Name of the independent variable (must match the model's).
    pub variable: String,
    /// Window start, or the single evaluation point.
    pub start: f64,
    /// Window stop; `None` means "evaluate at `start`".
    pub stop: Option<f64>,
}

impl Tag {
    /// Tag a plugin to a single value of the independent variable.
    pub fn at(variable: impl Into<String>, t: f64) -> Result<Self> {
        if !t.is_finite() {
            return Err(Error::Validation(format!("tag value must be finite, got {t}")));
        }
        Ok(Self { variable: variable.into(), start: t, stop: None })
    }

    /// Tag a plugin to an exposure window.
    pub fn over(variable: impl Into<String>, interval: TimeInterval) -> Self {
        Self { variable: variable.into(), start: interval.start(), stop: Some(interval.stop()) }
    }
}

/// Check that a plugin's tag is compatible with the model.
pub fn check_tag(model: &Model, tag: Option<&Tag>) -> Result<()> {
    let Some(tag) = tag else { return Ok(()) };
    match model.independent_variable() {
        Some(v) if v == tag.variable => Ok(()),
        Some(v) => Err(Error::Validation(format!(
            "tag variable '{}' does not match the model's independent variable '{v}'",
            tag.variable
        ))),
        None => Err(Error::Validation(format!(
            "tag variable '{}' given but the model has no independent variable",
            tag.variable
        ))),
    }
}

/// Evaluate the model at `x` according to a plugin's tag: pointwise at the
/// tag value, averaged over the tag window, or untimed when untagged.
pub fn evaluate_tagged(
    model: &Model,
    tag: Option<&Tag>,
    x: &[f64],
    values: &[f64],
    out: &mut [f64],
) -> Result<()> {
    match tag {
        None => model.evaluate(x, values, None, out),
        Some(Tag { start, stop: None, .. }) => model.evaluate(x, values, Some(*start), out),
        Some(Tag { start, stop: Some(stop), .. }) => {
            model.evaluate_averaged(x, values, *start, *stop, out)
        }
    }
}

/// Capability contract for dataset adapters.
///
/// Implementors must provide all of: model binding (`set_model`),
/// log-likelihood evaluation (`log_like`), and nuisance profiling
/// (`inner_fit`). Omitting any of them is a compile error, which is the
/// Rust rendition of the original fatal construction-time check.
pub trait Plugin: Send + Sync {
    /// The instance name given at construction.
    fn name(&self) -> &str;

    /// The plugin's nuisance parameters (possibly empty). These are
    /// private to the plugin and never shared across the joint model.
    fn nuisance_parameters(&self) -> &[Parameter];

    /// Mutable access to the nuisance parameters.
    fn nuisance_parameters_mut(&mut self) -> &mut [Parameter];

    /// The plugin's tag, if any.
    fn tag(&self) -> Option<&Tag> {
        None
    }

    /// Bind the shared model. How the binding is performed is up to the
    /// plugin; implementations typically validate tag compatibility and
    /// store the `Arc`.
    fn set_model(&mut self, model: Arc<Model>) -> Result<()>;

    /// Log-likelihood at the given shared-model parameter values, using
    /// the plugin's current nuisance-parameter values.
    fn log_like(&self, values: &[f64]) -> Result<f64>;

    /// Profile the plugin's own nuisance parameters with the shared model
    /// held fixed, store the profiled values, and return the resulting
    /// log-likelihood.
    ///
    /// With no nuisance parameters this must return exactly
    /// `self.log_like(values)`.
    fn inner_fit(&mut self, values: &[f64]) -> Result<f64>;

    /// Nuisance parameter by name, if present.
    fn nuisance_parameter(&self, name: &str) -> Option<&Parameter> {
        self.nuisance_parameters().iter().find(|p| p.name == name)
    }
}
