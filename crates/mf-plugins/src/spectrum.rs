//! Binned count spectra.
//!
//! A [`BinnedSpectrum`] is a per-channel count histogram with an exposure
//! and channel edges. Input is in counts; rates are derived through the
//! exposure. Statistics are either Poisson (no per-channel errors) or
//! Gaussian (explicit count errors).

use mf_core::{Error, Result};

/// Per-channel quality flag. Only `Good` channels enter a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelQuality {
    /// Channel is usable.
    Good,
    /// Channel is suspect; excluded from fits but kept in the data.
    Warn,
    /// Channel is unusable.
    Bad,
}

/// A binned count spectrum.
#[derive(Debug, Clone)]
pub struct BinnedSpectrum {
    counts: Vec<f64>,
    exposure: f64,
    edges: Vec<f64>,
    count_errors: Option<Vec<f64>>,
    sys_errors: Vec<f64>,
    quality: Vec<ChannelQuality>,
    scale_factor: f64,
    background: Option<Box<BinnedSpectrum>>,
}

impl BinnedSpectrum {
    /// Create a Poisson spectrum (no per-channel count errors).
    pub fn poisson(counts: Vec<f64>, exposure: f64, edges: Vec<f64>) -> Result<Self> {
        Self::build(counts, exposure, edges, None)
    }

    /// Create a Gaussian spectrum with explicit per-channel count errors.
    pub fn gaussian(
        counts: Vec<f64>,
        count_errors: Vec<f64>,
        exposure: f64,
        edges: Vec<f64>,
    ) -> Result<Self> {
        Self::build(counts, exposure, edges, Some(count_errors))
    }

    fn build(
        counts: Vec<f64>,
        exposure: f64,
        edges: Vec<f64>,
        count_errors: Option<Vec<f64>>,
    ) -> Result<Self> {
        let n = counts.len();
        if n == 0 {
            return Err(Error::Validation("spectrum requires at least one channel".into()));
        }
        if edges.len() != n + 1 {
            return Err(Error::Validation(format!(
                "read {n} channels but {} energy boundaries; should be n+1",
                edges.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Validation(
                "channel edges must be strictly increasing and finite".into(),
            ));
        }
        if !exposure.is_finite() || exposure <= 0.0 {
            return Err(Error::Validation(format!(
                "exposure must be finite and > 0, got {exposure}"
            )));
        }
        if counts.iter().any(|c| !c.is_finite()) {
            return Err(Error::Validation("counts must be finite".into()));
        }
        if let Some(errs) = &count_errors {
            if errs.len() != n {
                return Err(Error::Validation(format!(
                    "read {n} channels but {} count errors; should be equal",
                    errs.len()
                )));
            }
            if errs.iter().any(|e| !e.is_finite() || *e < 0.0) {
                return Err(Error::Validation("count errors must be finite and >= 0".into()));
            }
        }

        Ok(Self {
            counts,
            exposure,
            edges,
            count_errors,
            sys_errors: vec![0.0; n],
            quality: vec![ChannelQuality::Good; n],
            scale_factor: 1.0,
            background: None,
        })
    }

    /// Attach fractional systematic errors per channel.
    pub fn with_sys_errors(mut self, sys_errors: Vec<f64>) -> Result<Self> {
        if sys_errors.len() != self.n_channels() {
            return Err(Error::Validation(format!(
                "read {} channels but {} sys errors; should be equal",
                self.n_channels(),
                sys_errors.len()
            )));
        }
        if sys_errors.iter().any(|e| !e.is_finite() || *e < 0.0) {
            return Err(Error::Validation("sys errors must be finite and >= 0".into()));
        }
        self.sys_errors = sys_errors;
        Ok(self)
    }

    /// Attach per-channel quality flags.
    pub fn with_quality(mut self, quality: Vec<ChannelQuality>) -> Result<Self> {
        if quality.len() != self.n_channels() {
            return Err(Error::Validation(format!(
                "read {} channels but {} quality flags; should be equal",
                self.n_channels(),
                quality.len()
            )));
        }
        self.quality = quality;
        Ok(self)
    }

    /// Attach an associated background spectrum.
    ///
    /// The background must share the channel grid. `scale_factor` rescales
    /// the background region to the source region.
    pub fn with_background(mut self, background: BinnedSpectrum, scale_factor: f64) -> Result<Self> {
        if background.n_channels() != self.n_channels() {
            return Err(Error::Validation(format!(
                "background has {} channels, observation has {}",
                background.n_channels(),
                self.n_channels()
            )));
        }
        if background.background.is_some() {
            return Err(Error::Validation("background spectra cannot nest".into()));
        }
        if !scale_factor.is_finite() || scale_factor <= 0.0 {
            return Err(Error::Validation(format!(
                "scale factor must be finite and > 0, got {scale_factor}"
            )));
        }
        self.background = Some(Box::new(background));
        self.scale_factor = scale_factor;
        Ok(self)
    }

    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.counts.len()
    }

    /// Counts per channel.
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Exposure in seconds.
    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    /// Channel edges (`n_channels + 1` values).
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Channel centers.
    pub fn channel_centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    /// Channel widths.
    pub fn channel_widths(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Rates per channel (counts / exposure).
    pub fn rates(&self) -> Vec<f64> {
        self.counts.iter().map(|c| c / self.exposure).collect()
    }

    /// Errors on the rates. Fails for a Poisson spectrum.
    pub fn rate_errors(&self) -> Result<Vec<f64>> {
        match &self.count_errors {
            Some(errs) => Ok(errs.iter().map(|e| e / self.exposure).collect()),
            None => Err(Error::Validation(
                "cannot request errors on rates for a Poisson spectrum".into(),
            )),
        }
    }

    /// Whether the spectrum has Poisson statistics.
    pub fn is_poisson(&self) -> bool {
        self.count_errors.is_none()
    }

    /// Per-channel count errors (`None` for Poisson spectra).
    pub fn count_errors(&self) -> Option<&[f64]> {
        self.count_errors.as_deref()
    }

    /// Fractional systematic errors per channel.
    pub fn sys_errors(&self) -> &[f64] {
        &self.sys_errors
    }

    /// Per-channel quality.
    pub fn quality(&self) -> &[ChannelQuality] {
        &self.quality
    }

    /// Indices of the `Good` channels.
    pub fn good_channels(&self) -> Vec<usize> {
        self.quality
            .iter()
            .enumerate()
            .filter(|(_, q)| **q == ChannelQuality::Good)
            .map(|(i, _)| i)
            .collect()
    }

    /// Background scale factor relating background and source regions.
    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Associated background spectrum, if any.
    pub fn background(&self) -> Option<&BinnedSpectrum> {
        self.background.as_deref()
    }
}
