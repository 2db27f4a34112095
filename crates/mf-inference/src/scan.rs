//! Profile likelihood scans over one model parameter.

use crate::joint::JointLikelihood;
use mf_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Single point in a profile likelihood scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilePoint {
    /// Tested parameter value.
    pub value: f64,
    /// `NLL(value) - NLL_min` from the conditional refit.
    pub delta_nll: f64,
    /// Conditional fit convergence.
    pub converged: bool,
}

/// Profile likelihood scan result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileScan {
    /// Qualified name of the scanned parameter.
    pub parameter: String,
    /// Unconditional best-fit value.
    pub best_value: f64,
    /// NLL at the global minimum.
    pub nll_min: f64,
    /// Per-point results.
    pub points: Vec<ProfilePoint>,
}

/// Scan the profiled joint NLL over a grid of values of one free model
/// parameter.
///
/// Runs the unconditional fit first, then a conditional refit per grid
/// point with the scanned parameter pinned via bounds clamping and the
/// remaining parameters warm-started from the previous point. The model
/// and plugin nuisance parameters are restored to the global best fit
/// afterwards.
pub fn profile_scan(
    jl: &mut JointLikelihood,
    parameter: &str,
    values: &[f64],
) -> Result<ProfileScan> {
    if values.is_empty() {
        return Err(Error::Validation("profile scan requires at least one value".into()));
    }

    let index = jl.model().index_of(parameter)?;
    let free = jl.model().free_indices();
    let free_pos = free.iter().position(|&i| i == index).ok_or_else(|| {
        Error::Validation(format!("parameter '{parameter}' is not free; cannot scan it"))
    })?;

    // Unconditional fit.
    let best = jl.fit()?;
    let nll_min = best.fit.nll;
    let best_value = best.fit.values[free_pos];
    let base_bounds = jl.model().free_bounds();

    for &v in values {
        let (lo, hi) = base_bounds[free_pos];
        if v < lo || v > hi {
            return Err(Error::Validation(format!(
                "scan value {v} for '{parameter}' outside bounds ({lo}, {hi})"
            )));
        }
    }

    let mut warm = best.fit.values.clone();
    let mut points = Vec::with_capacity(values.len());
    for &v in values {
        // Pin the scanned parameter via bounds clamping; no model clone.
        let mut bounds = base_bounds.clone();
        bounds[free_pos] = (v, v);
        warm[free_pos] = v;

        let fixed = jl.minimize_from(&warm, &bounds)?;
        points.push(ProfilePoint {
            value: v,
            delta_nll: fixed.fval - nll_min,
            converged: fixed.converged,
        });

        // Carry forward for warm start.
        warm = fixed.parameters;
    }

    // Restore the global best fit in the model and the plugins.
    let full = jl.model().values();
    jl.data_refresh(&full)?;

    Ok(ProfileScan { parameter: parameter.to_string(), best_value, nll_min, points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mf_model::{Line, Model, Parameter, Source};
    use mf_plugins::{DataList, XyPlugin};
    use std::sync::Arc;

    fn setup() -> JointLikelihood {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2.0 + 3.0 * xi).collect();
        let e = vec![0.5; x.len()];

        let mut data = DataList::new();
        data.insert(Box::new(XyPlugin::gaussian("d", x, y, e).unwrap())).unwrap();

        let model = Model::new(vec![Source::with_parameters(
            "src",
            Arc::new(Line),
            vec![
                Parameter::new("intercept", 0.0, (-100.0, 100.0)),
                Parameter::new("slope", 0.0, (-100.0, 100.0)),
            ],
        )])
        .unwrap();

        JointLikelihood::new(model, data).unwrap()
    }

    #[test]
    fn test_scan_minimum_at_best_fit() {
        let mut jl = setup();
        let values: Vec<f64> = (0..11).map(|i| 2.0 + i as f64 * 0.2).collect();
        let scan = profile_scan(&mut jl, "src.slope", &values).unwrap();

        assert_relative_eq!(scan.best_value, 3.0, epsilon = 1e-3);
        // Delta NLL is non-negative everywhere and smallest at the grid
        // point closest to the best fit.
        let mut min_dnll = f64::INFINITY;
        let mut min_at = f64::NAN;
        for p in &scan.points {
            assert!(p.delta_nll > -1e-6, "delta_nll must be >= 0, got {}", p.delta_nll);
            if p.delta_nll < min_dnll {
                min_dnll = p.delta_nll;
                min_at = p.value;
            }
        }
        assert_relative_eq!(min_at, 3.0, epsilon = 1e-9);
        assert!(min_dnll < 0.05);
    }

    #[test]
    fn test_scan_curvature_matches_uncertainty() {
        // For a Gaussian likelihood, delta NLL at best +/- 1 sigma is 0.5.
        let mut jl = setup();
        let fit = jl.fit().unwrap();
        let slope = fit.fit.values[1];
        let sigma = fit.fit.uncertainties[1];

        let scan =
            profile_scan(&mut jl, "src.slope", &[slope - sigma, slope, slope + sigma]).unwrap();
        assert_relative_eq!(scan.points[0].delta_nll, 0.5, epsilon = 0.05);
        assert!(scan.points[1].delta_nll.abs() < 1e-6);
        assert_relative_eq!(scan.points[2].delta_nll, 0.5, epsilon = 0.05);
    }

    #[test]
    fn test_scan_rejects_fixed_or_unknown_parameter() {
        let mut jl = setup();
        assert!(profile_scan(&mut jl, "src.nope", &[1.0]).is_err());
        jl.model_mut().fix("src.slope").unwrap();
        assert!(profile_scan(&mut jl, "src.slope", &[1.0]).is_err());
        assert!(profile_scan(&mut jl, "src.intercept", &[]).is_err());
    }

    #[test]
    fn test_scan_restores_best_fit() {
        let mut jl = setup();
        let values = vec![2.5, 3.5];
        let scan = profile_scan(&mut jl, "src.slope", &values).unwrap();
        // The model still carries the unconditional best fit.
        assert_relative_eq!(
            jl.model().parameter_by_name("src.slope").unwrap().value,
            scan.best_value,
            epsilon = 1e-9
        );
    }
}
