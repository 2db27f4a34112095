//! JSON analysis specification: model + datasets in one file.
//!
//! The spec is deliberately close to what an analysis notebook would set
//! up in code: named sources with shape-parameter overrides, and inline
//! datasets with their statistics choice and optional tag.

use anyhow::{Context, Result, bail};
use mf_core::OptimizerConfig;
use mf_inference::JointLikelihood;
use mf_model::{Constant, GaussianLine, Line, Model, Parameter, PowerLaw, Source, SpectralShape};
use mf_plugins::{BinnedSpectrum, DataList, SpectrumPlugin, Tag, XyPlugin};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Top-level analysis specification.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisSpec {
    /// Shared model definition.
    pub model: ModelSpec,
    /// Datasets entering the joint fit.
    pub datasets: Vec<DatasetSpec>,
    /// Optional optimizer overrides.
    #[serde(default)]
    pub optimizer: Option<OptimizerSpec>,
}

/// Shared model definition.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    /// Independent variable name (required for tagged datasets).
    #[serde(default)]
    pub independent_variable: Option<String>,
    /// Model sources.
    pub sources: Vec<SourceSpec>,
}

/// One model source.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    /// Source name.
    pub name: String,
    /// Spectral shape.
    pub shape: ShapeSpec,
    /// Overrides of the shape's default parameters, keyed by the
    /// unqualified parameter name.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    /// Optional temporal profile.
    #[serde(default)]
    pub temporal: Option<TemporalSpec>,
}

/// Temporal profile of a source.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemporalSpec {
    /// Profile shape over the independent variable.
    pub shape: ShapeSpec,
    /// Parameter overrides.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
}

/// Supported shapes.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeSpec {
    /// Power law with a fixed pivot.
    Powerlaw {
        /// Pivot point (default 1).
        #[serde(default = "default_pivot")]
        pivot: f64,
    },
    /// Straight line.
    Line,
    /// Gaussian line.
    GaussianLine,
    /// Constant.
    Constant,
}

fn default_pivot() -> f64 {
    1.0
}

/// Overrides for a single parameter.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterSpec {
    /// Initial value.
    #[serde(default)]
    pub value: Option<f64>,
    /// Lower bound.
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper bound.
    #[serde(default)]
    pub max: Option<f64>,
    /// Step size.
    #[serde(default)]
    pub delta: Option<f64>,
    /// Whether the parameter floats (default true).
    #[serde(default)]
    pub free: Option<bool>,
    /// Gaussian prior mean (requires `prior_sigma`).
    #[serde(default)]
    pub prior_mean: Option<f64>,
    /// Gaussian prior sigma.
    #[serde(default)]
    pub prior_sigma: Option<f64>,
}

/// One dataset.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetSpec {
    /// Generic (x, y) data; Gaussian if `y_errors` is given, Poisson
    /// otherwise.
    Xy {
        /// Plugin name.
        name: String,
        /// x values.
        x: Vec<f64>,
        /// Observations.
        y: Vec<f64>,
        /// Gaussian errors; omit for Poisson counts.
        #[serde(default)]
        y_errors: Option<Vec<f64>>,
        /// Optional tag on the independent variable.
        #[serde(default)]
        tag: Option<TagSpec>,
    },
    /// Binned count spectrum; Gaussian if `count_errors` is given,
    /// Poisson otherwise.
    Spectrum {
        /// Plugin name.
        name: String,
        /// Counts per channel.
        counts: Vec<f64>,
        /// Exposure.
        exposure: f64,
        /// Channel edges (`n_channels + 1` values).
        edges: Vec<f64>,
        /// Gaussian count errors; omit for Poisson statistics.
        #[serde(default)]
        count_errors: Option<Vec<f64>>,
        /// Free the effective-area correction nuisance parameter.
        #[serde(default)]
        effective_area_correction: Option<EffAreaSpec>,
        /// Optional tag on the independent variable.
        #[serde(default)]
        tag: Option<TagSpec>,
    },
}

/// Tag specification.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagSpec {
    /// Independent variable name.
    pub variable: String,
    /// Window start (or single evaluation point).
    pub start: f64,
    /// Window stop; omit to evaluate at `start`.
    #[serde(default)]
    pub stop: Option<f64>,
}

/// Effective-area correction settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EffAreaSpec {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
    /// Optional Gaussian constraint width around 1.
    #[serde(default)]
    pub sigma: Option<f64>,
}

/// Optimizer overrides.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerSpec {
    /// Maximum iterations.
    #[serde(default)]
    pub max_iter: Option<u64>,
    /// Gradient tolerance.
    #[serde(default)]
    pub tol: Option<f64>,
}

fn build_shape(spec: &ShapeSpec) -> Result<Arc<dyn SpectralShape>> {
    Ok(match spec {
        ShapeSpec::Powerlaw { pivot } => Arc::new(PowerLaw::new(*pivot)?),
        ShapeSpec::Line => Arc::new(Line),
        ShapeSpec::GaussianLine => Arc::new(GaussianLine),
        ShapeSpec::Constant => Arc::new(Constant),
    })
}

fn apply_overrides(
    context: &str,
    mut defaults: Vec<Parameter>,
    overrides: &BTreeMap<String, ParameterSpec>,
) -> Result<Vec<Parameter>> {
    for (name, o) in overrides {
        let p = defaults
            .iter_mut()
            .find(|p| &p.name == name)
            .with_context(|| format!("{context}: unknown parameter '{name}'"))?;
        if let Some(v) = o.min {
            p.bounds.0 = v;
        }
        if let Some(v) = o.max {
            p.bounds.1 = v;
        }
        if let Some(v) = o.value {
            p.value = v;
        }
        if let Some(v) = o.delta {
            p.delta = v;
        }
        if let Some(v) = o.free {
            p.free = v;
        }
        match (o.prior_mean, o.prior_sigma) {
            (Some(mean), Some(sigma)) => *p = p.clone().with_prior(mean, sigma),
            (None, Some(sigma)) => *p = p.clone().with_prior(p.value, sigma),
            (Some(_), None) => {
                bail!("{context}: parameter '{name}' has prior_mean without prior_sigma")
            }
            (None, None) => {}
        }
        p.validate()?;
    }
    Ok(defaults)
}

/// Build the shared model from its spec.
pub fn build_model(spec: &ModelSpec) -> Result<Model> {
    let mut sources = Vec::with_capacity(spec.sources.len());
    for s in &spec.sources {
        let shape = build_shape(&s.shape)?;
        let params = apply_overrides(
            &format!("source '{}'", s.name),
            shape.parameter_defaults(),
            &s.parameters,
        )?;
        let mut source = Source::with_parameters(s.name.clone(), shape, params);
        if let Some(t) = &s.temporal {
            let tshape = build_shape(&t.shape)?;
            let tparams = apply_overrides(
                &format!("source '{}' temporal profile", s.name),
                tshape.parameter_defaults(),
                &t.parameters,
            )?;
            source = source.with_temporal_parameters(tshape, tparams);
        }
        sources.push(source);
    }

    let mut model = Model::new(sources)?;
    if let Some(iv) = &spec.independent_variable {
        model = model.with_independent_variable(iv.clone())?;
    }
    Ok(model)
}

fn build_tag(spec: &TagSpec) -> Result<Tag> {
    Ok(match spec.stop {
        None => Tag::at(spec.variable.clone(), spec.start)?,
        Some(stop) => {
            let interval = mf_plugins::TimeInterval::new(spec.start, stop)?;
            Tag::over(spec.variable.clone(), interval)
        }
    })
}

/// Build the dataset list from its specs.
pub fn build_datalist(specs: &[DatasetSpec]) -> Result<DataList> {
    let mut data = DataList::new();
    for spec in specs {
        match spec {
            DatasetSpec::Xy { name, x, y, y_errors, tag } => {
                let mut plugin = match y_errors {
                    Some(errs) => {
                        XyPlugin::gaussian(name.clone(), x.clone(), y.clone(), errs.clone())?
                    }
                    None => XyPlugin::poisson(name.clone(), x.clone(), y.clone())?,
                };
                if let Some(t) = tag {
                    plugin = plugin.with_tag(build_tag(t)?);
                }
                data.insert(Box::new(plugin))?;
            }
            DatasetSpec::Spectrum {
                name,
                counts,
                exposure,
                edges,
                count_errors,
                effective_area_correction,
                tag,
            } => {
                let spectrum = match count_errors {
                    Some(errs) => BinnedSpectrum::gaussian(
                        counts.clone(),
                        errs.clone(),
                        *exposure,
                        edges.clone(),
                    )?,
                    None => BinnedSpectrum::poisson(counts.clone(), *exposure, edges.clone())?,
                };
                let mut plugin = SpectrumPlugin::new(name.clone(), spectrum)?;
                if let Some(eff) = effective_area_correction {
                    plugin.use_effective_area_correction(eff.min, eff.max, eff.sigma)?;
                }
                if let Some(t) = tag {
                    plugin = plugin.with_tag(build_tag(t)?);
                }
                data.insert(Box::new(plugin))?;
            }
        }
    }
    Ok(data)
}

/// Build a ready-to-fit [`JointLikelihood`] from the full spec.
pub fn build_joint(spec: &AnalysisSpec) -> Result<JointLikelihood> {
    let model = build_model(&spec.model)?;
    let data = build_datalist(&spec.datasets)?;

    let mut config = OptimizerConfig::default();
    if let Some(o) = &spec.optimizer {
        if let Some(v) = o.max_iter {
            config.max_iter = v;
        }
        if let Some(v) = o.tol {
            config.tol = v;
        }
    }

    Ok(JointLikelihood::new(model, data)?.with_config(config))
}
