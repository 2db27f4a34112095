//! # mf-inference
//!
//! Joint maximum-likelihood fitting for MultiFit.
//!
//! This crate provides:
//! - [`JointLikelihood`]: the outer fit over the shared model's free
//!   parameters, with per-plugin nuisance profiling at every objective
//!   evaluation.
//! - Profile likelihood scans over single model parameters.
//!
//! ## Architecture
//!
//! This crate depends on the [`mf_plugins::Plugin`] trait, not on any
//! concrete plugin; new dataset types plug into the joint fit without
//! touching this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Joint likelihood construction and fitting.
pub mod joint;
/// Profile likelihood scans.
pub mod scan;

pub use joint::{JointFitResult, JointLikelihood};
pub use scan::{ProfilePoint, ProfileScan, profile_scan};
