use serde::{Deserialize, Serialize};
use signal_core::ModelConfig;
use std::path::Path;

/// How the final label is resolved when models disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Weighted label vote; any bull/bear conflict degrades to HOLD
    #[default]
    WeightedMajority,
    /// Same vote, HOLD on conflict (alias kept for configs that name it)
    Conservative,
    /// Threshold the blended confidence directly; conflict does not
    /// force HOLD
    ConfidenceBased,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleSettings {
    pub conflict_strategy: ConflictStrategy,
    /// Drop fused signals with ensemble_score below this (0 = off)
    pub min_confidence: f64,
    /// Drop fused signals whose agreeing-weight fraction is below this
    /// (0 = off)
    pub min_agreement: f64,
    pub models: Vec<ModelConfig>,
}

impl EnsembleSettings {
    /// Load settings from a JSON file, falling back to defaults on any
    /// read or parse failure. A bad config file must never take the
    /// registry down.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(
                        "failed to parse ensemble config {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "failed to read ensemble config {}: {} — using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy_is_weighted_majority() {
        let settings = EnsembleSettings::default();
        assert_eq!(settings.conflict_strategy, ConflictStrategy::WeightedMajority);
        assert_eq!(settings.min_confidence, 0.0);
        assert_eq!(settings.min_agreement, 0.0);
        assert!(settings.models.is_empty());
    }

    #[test]
    fn test_strategy_snake_case_round_trip() {
        let json = "\"confidence_based\"";
        let strategy: ConflictStrategy = serde_json::from_str(json).unwrap();
        assert_eq!(strategy, ConflictStrategy::ConfidenceBased);
        assert_eq!(serde_json::to_string(&strategy).unwrap(), json);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let settings = EnsembleSettings::load_or_default("/nonexistent/ensemble.json");
        assert!(settings.models.is_empty());
        assert_eq!(settings.conflict_strategy, ConflictStrategy::WeightedMajority);
    }

    #[test]
    fn test_load_garbage_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("ensemble-settings-garbage-test.json");
        std::fs::write(&path, "{ not json").unwrap();
        let settings = EnsembleSettings::load_or_default(&path);
        assert!(settings.models.is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_valid_file() {
        let path = std::env::temp_dir().join("ensemble-settings-valid-test.json");
        std::fs::write(
            &path,
            r#"{
                "conflict_strategy": "conservative",
                "min_confidence": 0.3,
                "models": [{
                    "model_id": "momentum_v1",
                    "display_name": "Momentum",
                    "version": "1.0",
                    "weight_in_ensemble": 0.6,
                    "enabled": true,
                    "requires_features": []
                }]
            }"#,
        )
        .unwrap();
        let settings = EnsembleSettings::load_or_default(&path);
        assert_eq!(settings.conflict_strategy, ConflictStrategy::Conservative);
        assert_eq!(settings.models.len(), 1);
        assert!((settings.min_confidence - 0.3).abs() < 1e-9);
        std::fs::remove_file(&path).ok();
    }
}
