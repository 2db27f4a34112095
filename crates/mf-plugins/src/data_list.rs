//! Ordered collection of plugins entering a joint fit.

use crate::plugin::{Plugin, validate_plugin_name};
use mf_core::{Error, Result};
use mf_model::Model;
use rayon::prelude::*;
use std::sync::Arc;

/// The datasets of an analysis, keyed by plugin name.
///
/// Iteration order is insertion order; duplicate names are rejected.
#[derive(Default)]
pub struct DataList {
    plugins: Vec<Box<dyn Plugin>>,
}

impl DataList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin, validating its name and uniqueness.
    pub fn insert(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        validate_plugin_name(plugin.name())?;
        if self.get(plugin.name()).is_some() {
            return Err(Error::Validation(format!(
                "duplicate plugin name '{}'",
                plugin.name()
            )));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// Plugin by name.
    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.plugins.iter().find(|p| p.name() == name).map(|p| p.as_ref())
    }

    /// Number of plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Iterate over the plugins in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Plugin> {
        self.plugins.iter().map(|p| p.as_ref())
    }

    /// Bind the shared model to every plugin.
    pub fn set_model(&mut self, model: &Arc<Model>) -> Result<()> {
        for p in &mut self.plugins {
            p.set_model(Arc::clone(model))?;
        }
        Ok(())
    }

    /// Joint log-likelihood at the given values, using each plugin's
    /// current nuisance-parameter values. Plugins are evaluated in
    /// parallel.
    pub fn log_like(&self, values: &[f64]) -> Result<f64> {
        self.plugins.par_iter().map(|p| p.log_like(values)).sum()
    }

    /// Run every plugin's profile fit and return the per-plugin terms in
    /// insertion order.
    pub fn inner_fit_all(&mut self, values: &[f64]) -> Result<Vec<(String, f64)>> {
        let mut terms = Vec::with_capacity(self.plugins.len());
        for p in &mut self.plugins {
            let ll = p.inner_fit(values)?;
            terms.push((p.name().to_string(), ll));
        }
        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xy::XyPlugin;
    use approx::assert_relative_eq;
    use mf_model::{Line, Parameter, Source};

    fn line_model() -> Arc<Model> {
        Arc::new(
            Model::new(vec![Source::with_parameters(
                "src",
                Arc::new(Line),
                vec![
                    Parameter::new("intercept", 0.0, (-10.0, 10.0)),
                    Parameter::new("slope", 1.0, (-10.0, 10.0)),
                ],
            )])
            .unwrap(),
        )
    }

    fn xy(name: &str) -> Box<dyn Plugin> {
        Box::new(
            XyPlugin::gaussian(name, vec![0.0, 1.0], vec![0.0, 1.0], vec![1.0, 1.0]).unwrap(),
        )
    }

    #[test]
    fn test_insertion_order_and_duplicates() {
        let mut data = DataList::new();
        data.insert(xy("b")).unwrap();
        data.insert(xy("a")).unwrap();
        assert_eq!(data.len(), 2);

        let names: Vec<&str> = data.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["b", "a"]);

        assert!(data.insert(xy("a")).is_err());
        assert!(data.get("a").is_some());
        assert!(data.get("zzz").is_none());
    }

    #[test]
    fn test_joint_log_like_is_sum() {
        let mut data = DataList::new();
        data.insert(xy("one")).unwrap();
        data.insert(xy("two")).unwrap();

        let model = line_model();
        data.set_model(&model).unwrap();

        let values = model.values();
        let total = data.log_like(&values).unwrap();
        let sum: f64 = data.iter().map(|p| p.log_like(&values).unwrap()).sum();
        assert_relative_eq!(total, sum, epsilon = 1e-12);
    }

    #[test]
    fn test_inner_fit_all_reports_per_plugin_terms() {
        let mut data = DataList::new();
        data.insert(xy("one")).unwrap();
        data.insert(xy("two")).unwrap();

        let model = line_model();
        data.set_model(&model).unwrap();

        let values = model.values();
        let terms = data.inner_fit_all(&values).unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].0, "one");
        assert_eq!(terms[1].0, "two");
        // No nuisance parameters anywhere: profile == plain.
        let plain = data.log_like(&values).unwrap();
        let profiled: f64 = terms.iter().map(|(_, ll)| ll).sum();
        assert_relative_eq!(plain, profiled, epsilon = 1e-12);
    }
}
