//! # mf-plugins
//!
//! Dataset adapters for MultiFit joint fits.
//!
//! This crate provides:
//! - The [`Plugin`] capability contract: model binding, log-likelihood
//!   evaluation, and nuisance profiling.
//! - [`DataList`]: the ordered set of datasets in an analysis.
//! - Time intervals and binned spectra, plus two concrete plugins:
//!   [`XyPlugin`] for generic point data and [`SpectrumPlugin`] for
//!   binned count spectra.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Ordered plugin collection.
pub mod data_list;
/// The plugin contract, name validation, and tags.
pub mod plugin;
/// Binned count spectra.
pub mod spectrum;
/// Binned-spectrum plugin.
pub mod spectrum_plugin;
/// Time intervals and interval sets.
pub mod time_interval;
/// Generic (x, y) plugin.
pub mod xy;

pub use data_list::DataList;
pub use plugin::{Plugin, RESERVED_NAME, Tag, check_tag, evaluate_tagged, validate_plugin_name};
pub use spectrum::{BinnedSpectrum, ChannelQuality};
pub use spectrum_plugin::SpectrumPlugin;
pub use time_interval::{TimeInterval, TimeIntervalSet};
pub use xy::{XyPlugin, XyStatistic};
