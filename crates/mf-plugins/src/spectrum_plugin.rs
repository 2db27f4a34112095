//! Plugin for binned count spectra.
//!
//! Folds the shared model through the channel grid of a
//! [`BinnedSpectrum`] (midpoint rule per channel) and compares expected to
//! observed counts with Poisson or Gaussian statistics. Carries one
//! optional nuisance parameter: a multiplicative effective-area
//! correction, profiled out in `inner_fit`.

use crate::plugin::{Plugin, Tag, check_tag, evaluate_tagged, validate_plugin_name};
use crate::spectrum::BinnedSpectrum;
use crate::xy::{gaussian_log_like, poisson_log_like};
use mf_core::{Error, Result, minimize_scalar};
use mf_model::{Model, Parameter};
use std::sync::Arc;

const EFF_SCALE: &str = "eff_scale";

/// A binned spectrum dataset in a joint fit.
pub struct SpectrumPlugin {
    name: String,
    spectrum: BinnedSpectrum,
    good: Vec<usize>,
    centers: Vec<f64>,
    widths: Vec<f64>,
    tag: Option<Tag>,
    model: Option<Arc<Model>>,
    nuisance: Vec<Parameter>,
}

impl SpectrumPlugin {
    /// Wrap a spectrum. The effective-area correction starts fixed at 1.
    pub fn new(name: impl Into<String>, spectrum: BinnedSpectrum) -> Result<Self> {
        let name = name.into();
        validate_plugin_name(&name)?;

        let good = spectrum.good_channels();
        if good.is_empty() {
            return Err(Error::Validation(format!(
                "plugin '{name}': no good channels in spectrum"
            )));
        }
        let n_dropped = spectrum.n_channels() - good.len();
        if n_dropped > 0 {
            log::info!("plugin '{name}': excluding {n_dropped} non-good channel(s) from the fit");
        }

        let centers = spectrum.channel_centers();
        let widths = spectrum.channel_widths();
        let eff = Parameter::new(EFF_SCALE, 1.0, (0.5, 1.5)).fixed();

        Ok(Self {
            name,
            spectrum,
            good,
            centers,
            widths,
            tag: None,
            model: None,
            nuisance: vec![eff],
        })
    }

    /// Associate the plugin with a window of the independent variable.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Let the effective-area correction float in `[min, max]`, optionally
    /// with a Gaussian constraint of width `prior_sigma` around 1.
    pub fn use_effective_area_correction(
        &mut self,
        min: f64,
        max: f64,
        prior_sigma: Option<f64>,
    ) -> Result<()> {
        if !(min.is_finite() && max.is_finite() && min < max && min > 0.0) {
            return Err(Error::Validation(format!(
                "effective-area bounds must satisfy 0 < min < max, got ({min}, {max})"
            )));
        }
        let mut p = Parameter::new(EFF_SCALE, 1.0f64.clamp(min, max), (min, max));
        if let Some(sigma) = prior_sigma {
            p = p.with_prior(1.0, sigma);
        }
        p.validate()?;
        self.nuisance[0] = p;
        Ok(())
    }

    /// The wrapped spectrum.
    pub fn spectrum(&self) -> &BinnedSpectrum {
        &self.spectrum
    }

    fn bound_model(&self) -> Result<&Arc<Model>> {
        self.model.as_ref().ok_or_else(|| {
            Error::Validation(format!(
                "plugin '{}' has no model; call set_model first",
                self.name
            ))
        })
    }

    /// Expected counts in the good channels at the given model values and
    /// effective-area scale, including any scaled background contribution.
    fn expected_counts(&self, values: &[f64], scale: f64) -> Result<Vec<f64>> {
        let model = self.bound_model()?;
        let x: Vec<f64> = self.good.iter().map(|&c| self.centers[c]).collect();
        let mut flux = vec![0.0; x.len()];
        evaluate_tagged(model, self.tag.as_ref(), &x, values, &mut flux)?;

        let exposure = self.spectrum.exposure();
        let mut expected = Vec::with_capacity(self.good.len());
        for (k, &c) in self.good.iter().enumerate() {
            let mut m = scale * exposure * flux[k] * self.widths[c];
            if let Some(bkg) = self.spectrum.background() {
                // Background counts rescaled to the source region and exposure.
                m += self.spectrum.scale_factor() * exposure / bkg.exposure() * bkg.counts()[c];
            }
            expected.push(m);
        }
        Ok(expected)
    }

    fn log_like_with_scale(&self, values: &[f64], scale: f64) -> Result<f64> {
        let expected = self.expected_counts(values, scale)?;
        let observed: Vec<f64> = self.good.iter().map(|&c| self.spectrum.counts()[c]).collect();

        let mut ll = match self.spectrum.count_errors() {
            None => poisson_log_like(&observed, &expected)?,
            Some(errs) => {
                let sys = self.spectrum.sys_errors();
                let bkg_errs = self.spectrum.background().and_then(|b| b.count_errors());
                let bkg_factor = self.spectrum.background().map_or(0.0, |b| {
                    self.spectrum.scale_factor() * self.spectrum.exposure() / b.exposure()
                });
                let sigma: Vec<f64> = self
                    .good
                    .iter()
                    .map(|&c| {
                        let mut var = errs[c] * errs[c];
                        let s = sys[c] * self.spectrum.counts()[c];
                        var += s * s;
                        if let Some(be) = bkg_errs {
                            var += (bkg_factor * be[c]).powi(2);
                        }
                        var.sqrt().max(f64::MIN_POSITIVE)
                    })
                    .collect();
                gaussian_log_like(&observed, &expected, &sigma)?
            }
        };

        ll -= self.nuisance[0].prior_nll(scale)?;
        Ok(ll)
    }
}

impl Plugin for SpectrumPlugin {
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
        self.log_like_with_scale(values, self.nuisance[0].value)
    }

    fn inner_fit(&mut self, values: &[f64]) -> Result<f64> {
        let eff = &self.nuisance[0];
        if !eff.free {
            return self.log_like(values);
        }

        let (lo, hi) = eff.bounds;
        let (best, neg_ll) =
            minimize_scalar(|k| Ok(-self.log_like_with_scale(values, k)?), lo, hi, 200)?;
        self.nuisance[0].value = best;
        Ok(-neg_ll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mf_model::{Constant, Source};

    fn flat_model(k: f64) -> Arc<Model> {
        Arc::new(
            Model::new(vec![Source::with_parameters(
                "src",
                Arc::new(Constant),
                vec![Parameter::new("k", k, (0.0, 1e6))],
            )])
            .unwrap(),
        )
    }

    fn unit_edges(n: usize) -> Vec<f64> {
        (0..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_nuisance_round_trip() {
        let spectrum = BinnedSpectrum::poisson(vec![5.0, 6.0], 1.0, unit_edges(2)).unwrap();
        let mut p = SpectrumPlugin::new("pha", spectrum).unwrap();

        assert_eq!(p.name(), "spec");
        assert_eq!(p.nuisance_parameters().len(), 1);
        assert_eq!(p.nuisance_parameter("eff_scale").unwrap().value, 1.0);
        assert!(!p.nuisance_parameters()[0].free);

        p.use_effective_area_correction(0.8, 1.2, Some(0.05)).unwrap();
        let eff = p.nuisance_parameter("eff_scale").unwrap();
        assert!(eff.free);
        assert_eq!(eff.bounds, (0.8, 1.2));
        assert!(eff.prior.is_some());
    }

    #[test]
    fn test_poisson_log_like_flat_model() {
        // Two unit-width channels, exposure 10, flat model k=2:
        // expected = 20 counts per channel.
        let spectrum = BinnedSpectrum::poisson(vec![20.0, 20.0], 10.0, unit_edges(2)).unwrap();
        let mut p = SpectrumPlugin::new("pha", spectrum).unwrap();
        let model = flat_model(2.0);
        p.set_model(model.clone()).unwrap();

        let ll = p.log_like(&model.values()).unwrap();
        let expect: f64 = 2.0
            * (20.0 * 20.0f64.ln() - 20.0 - statrs::function::gamma::ln_gamma(21.0));
        assert_relative_eq!(ll, expect, epsilon = 1e-10);
    }

    #[test]
    fn test_background_raises_expectation() {
        let bkg = BinnedSpectrum::poisson(vec![40.0], 20.0, unit_edges(1)).unwrap();
        let spectrum = BinnedSpectrum::poisson(vec![25.0], 10.0, unit_edges(1))
            .unwrap()
            .with_background(bkg, 1.0)
            .unwrap();
        let mut p = SpectrumPlugin::new("pha", spectrum).unwrap();
        let model = flat_model(0.5);
        p.set_model(model.clone()).unwrap();

        // Source expectation 0.5 * 10 = 5, background 1.0 * 10/20 * 40 = 20,
        // total 25 = observed; this must beat the no-background expectation.
        let expected = p.expected_counts(&model.values(), 1.0).unwrap();
        assert_relative_eq!(expected[0], 25.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inner_fit_profiles_eff_scale() {
        // Observed counts sit 10% above the model prediction; the profiled
        // effective-area correction should land near 1.1.
        let spectrum =
            BinnedSpectrum::poisson(vec![110.0, 110.0, 110.0], 10.0, unit_edges(3)).unwrap();
        let mut p = SpectrumPlugin::new("pha", spectrum).unwrap();
        p.use_effective_area_correction(0.5, 1.5, None).unwrap();
        let model = flat_model(10.0);
        p.set_model(model.clone()).unwrap();

        let values = model.values();
        let plain = p.log_like(&values).unwrap();
        let profiled = p.inner_fit(&values).unwrap();

        assert!(profiled >= plain);
        assert_relative_eq!(p.nuisance_parameter("eff_scale").unwrap().value, 1.1, epsilon = 1e-3);
        // log_like now uses the profiled value.
        assert_relative_eq!(p.log_like(&values).unwrap(), profiled, epsilon = 1e-10);
    }

    #[test]
    fn test_inner_fit_with_fixed_nuisance_matches_log_like() {
        let spectrum = BinnedSpectrum::poisson(vec![8.0, 9.0], 1.0, unit_edges(2)).unwrap();
        let mut p = SpectrumPlugin::new("pha", spectrum).unwrap();
        let model = flat_model(8.5);
        p.set_model(model.clone()).unwrap();

        let values = model.values();
        assert_eq!(p.inner_fit(&values).unwrap(), p.log_like(&values).unwrap());
    }

    #[test]
    fn test_gaussian_statistics_with_sys_errors() {
        let spectrum = BinnedSpectrum::gaussian(
            vec![100.0, 90.0],
            vec![10.0, 9.0],
            10.0,
            unit_edges(2),
        )
        .unwrap()
        .with_sys_errors(vec![0.05, 0.05])
        .unwrap();
        let mut p = SpectrumPlugin::new("pha", spectrum).unwrap();
        let model = flat_model(9.5);
        p.set_model(model.clone()).unwrap();

        let ll = p.log_like(&model.values()).unwrap();
        assert!(ll.is_finite());
    }

    #[test]
    fn test_all_channels_bad_rejected() {
        use crate::spectrum::ChannelQuality;
        let spectrum = BinnedSpectrum::poisson(vec![1.0], 1.0, unit_edges(1))
            .unwrap()
            .with_quality(vec![ChannelQuality::Bad])
            .unwrap();
        assert!(SpectrumPlugin::new("pha", spectrum).is_err());
    }
}
