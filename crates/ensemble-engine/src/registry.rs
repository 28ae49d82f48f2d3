//! Model registry: per-model enable/weight configuration and the
//! normalized ensemble weight map.
//!
//! Explicitly constructed and passed by reference — never a process
//! global — so tests can hold independent registries. Registration is
//! a setup-time operation; the fusion engine only reads during a run.

use crate::config::EnsembleSettings;
use signal_core::ModelConfig;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelConfig>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &EnsembleSettings) -> Self {
        let mut registry = Self::new();
        for config in &settings.models {
            registry.register(config.clone());
        }
        registry
    }

    /// Register a model, replacing any existing config with the same
    /// model_id. Idempotent.
    pub fn register(&mut self, config: ModelConfig) {
        tracing::debug!(
            "registering model {} (weight {}, enabled {})",
            config.model_id,
            config.weight_in_ensemble,
            config.enabled
        );
        self.models.insert(config.model_id.clone(), config);
    }

    /// Remove a model by id; returns whether it was present. Idempotent.
    pub fn unregister(&mut self, model_id: &str) -> bool {
        self.models.remove(model_id).is_some()
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.get(model_id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get_enabled(&self) -> Vec<&ModelConfig> {
        self.models.values().filter(|m| m.enabled).collect()
    }

    /// Ensemble weights normalized to sum to 1 across enabled models.
    /// Empty map when the total enabled weight is 0.
    pub fn get_ensemble_weights(&self) -> HashMap<String, f64> {
        let total: f64 = self.models.values().map(|m| m.effective_weight()).sum();
        if total <= 0.0 {
            return HashMap::new();
        }
        self.models
            .values()
            .filter(|m| m.effective_weight() > 0.0)
            .map(|m| (m.model_id.clone(), m.effective_weight() / total))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str, weight: f64, enabled: bool) -> ModelConfig {
        ModelConfig {
            model_id: id.to_string(),
            display_name: id.to_string(),
            version: "1.0".to_string(),
            weight_in_ensemble: weight,
            enabled,
            requires_features: vec![],
        }
    }

    #[test]
    fn test_weights_normalize_to_one() {
        let mut registry = ModelRegistry::new();
        registry.register(config("a", 0.6, true));
        registry.register(config("b", 0.4, true));
        let weights = registry.get_ensemble_weights();
        let total: f64 = weights.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!((weights["a"] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_unnormalized_inputs_are_rescaled() {
        let mut registry = ModelRegistry::new();
        registry.register(config("a", 3.0, true));
        registry.register(config("b", 1.0, true));
        let weights = registry.get_ensemble_weights();
        assert!((weights["a"] - 0.75).abs() < 1e-9);
        assert!((weights["b"] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_model_excluded_from_weights() {
        let mut registry = ModelRegistry::new();
        registry.register(config("a", 0.6, true));
        registry.register(config("b", 0.4, false));
        let weights = registry.get_ensemble_weights();
        assert_eq!(weights.len(), 1);
        assert!((weights["a"] - 1.0).abs() < 1e-9);
        assert_eq!(registry.get_enabled().len(), 1);
    }

    #[test]
    fn test_zero_total_weight_yields_empty_map() {
        let mut registry = ModelRegistry::new();
        registry.register(config("a", 0.0, true));
        registry.register(config("b", 0.5, false));
        assert!(registry.get_ensemble_weights().is_empty());
    }

    #[test]
    fn test_registration_idempotent_by_id() {
        let mut registry = ModelRegistry::new();
        registry.register(config("a", 0.6, true));
        registry.register(config("a", 0.3, true));
        assert_eq!(registry.len(), 1);
        assert!((registry.get("a").unwrap().weight_in_ensemble - 0.3).abs() < 1e-9);

        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(registry.is_empty());
    }
}
