//! Ensemble fusion: blends per-model signals into one risk-aware view.
//!
//! Models run sequentially with per-model error isolation — one broken
//! model never takes the run down. Only symbols scored by at least two
//! models are fused; single-model symbols are excluded, not passed
//! through.

pub mod config;
pub mod registry;

pub use config::{ConflictStrategy, EnsembleSettings};
pub use registry::ModelRegistry;

use chrono::Utc;
use signal_core::{EngineError, EnsembleSignal, FeatureSnapshot, ModelOutput, SignalLabel, SignalModel};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Aggregate statistics for one fusion run. Computed with explicit
/// empty-set guards: an empty run reports zeros, it never divides by
/// the signal count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub signal_count: usize,
    pub conflict_count: usize,
    pub conflict_rate: f64,
    pub mean_score: f64,
}

pub struct EnsembleEngine {
    registry: ModelRegistry,
    settings: EnsembleSettings,
}

impl EnsembleEngine {
    pub fn new(registry: ModelRegistry, settings: EnsembleSettings) -> Self {
        Self { registry, settings }
    }

    /// Build the engine and its registry from one settings value.
    pub fn from_settings(settings: EnsembleSettings) -> Self {
        let registry = ModelRegistry::from_settings(&settings);
        Self::new(registry, settings)
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModelRegistry {
        &mut self.registry
    }

    /// Run every supplied model over the snapshot and fuse the results.
    ///
    /// A model that errors contributes an empty result set and the run
    /// continues. If fewer than two models end up contributing to any
    /// symbol, the output is empty.
    pub async fn run(
        &self,
        models: &[Arc<dyn SignalModel>],
        snapshot: &FeatureSnapshot,
    ) -> Result<Vec<EnsembleSignal>, EngineError> {
        let weights = self.registry.get_ensemble_weights();
        if weights.is_empty() {
            return Err(EngineError::NoEnabledModels);
        }

        // Sequential invocation; a slow or failing model is isolated
        let mut by_symbol: BTreeMap<String, Vec<(String, ModelOutput)>> = BTreeMap::new();
        for model in models {
            let model_id = model.config().model_id.clone();
            let Some(&weight) = weights.get(&model_id) else {
                tracing::debug!("skipping model {} (not enabled in registry)", model_id);
                continue;
            };
            match model.generate_signals(snapshot).await {
                Ok(outputs) => {
                    tracing::debug!(
                        "model {} (weight {:.2}) scored {} symbols",
                        model_id,
                        weight,
                        outputs.len()
                    );
                    for output in outputs {
                        by_symbol
                            .entry(output.symbol.clone())
                            .or_default()
                            .push((model_id.clone(), output));
                    }
                }
                Err(e) => {
                    tracing::warn!("model {} failed, excluding from ensemble: {}", model_id, e);
                }
            }
        }

        let generated_at = Utc::now();
        let mut fused: Vec<EnsembleSignal> = by_symbol
            .into_iter()
            .filter(|(_, contribs)| contribs.len() >= 2)
            .map(|(symbol, contribs)| self.fuse_symbol(symbol, &contribs, &weights, generated_at))
            .filter(|signal| {
                signal.ensemble_score >= self.settings.min_confidence
                    && self.agreement_fraction(signal, &weights) >= self.settings.min_agreement
            })
            .collect();

        fused.sort_by(|a, b| {
            b.ensemble_score
                .partial_cmp(&a.ensemble_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (i, signal) in fused.iter_mut().enumerate() {
            signal.rank = i as u32 + 1;
        }

        let summary = Self::summarize(&fused);
        tracing::info!(
            "ensemble run: {} signals, {} conflicts ({:.0}%), mean score {:.2}",
            summary.signal_count,
            summary.conflict_count,
            summary.conflict_rate * 100.0,
            summary.mean_score
        );
        Ok(fused)
    }

    fn fuse_symbol(
        &self,
        symbol: String,
        contribs: &[(String, ModelOutput)],
        weights: &HashMap<String, f64>,
        generated_at: chrono::DateTime<Utc>,
    ) -> EnsembleSignal {
        let mut model_signals = BTreeMap::new();
        let mut model_confidences = BTreeMap::new();
        let mut ensemble_score = 0.0;
        for (model_id, output) in contribs {
            let weight = weights.get(model_id).copied().unwrap_or(0.0);
            ensemble_score += output.confidence * weight;
            model_signals.insert(model_id.clone(), output.signal);
            model_confidences.insert(model_id.clone(), output.confidence);
        }
        let ensemble_score = ensemble_score.clamp(0.0, 1.0);

        // Conflict: simultaneous bullish and bearish votes. HOLD never
        // participates.
        let bulls: Vec<String> = contribs
            .iter()
            .filter(|(_, o)| o.signal.is_bullish())
            .map(|(m, o)| format!("{}={:?}", m, o.signal))
            .collect();
        let bears: Vec<String> = contribs
            .iter()
            .filter(|(_, o)| o.signal.is_bearish())
            .map(|(m, o)| format!("{}={:?}", m, o.signal))
            .collect();
        let conflict = !bulls.is_empty() && !bears.is_empty();
        let conflict_reason = conflict.then(|| {
            format!(
                "bullish [{}] vs bearish [{}]",
                bulls.join(", "),
                bears.join(", ")
            )
        });

        let distinct: std::collections::HashSet<SignalLabel> =
            contribs.iter().map(|(_, o)| o.signal).collect();
        let signals_agree = distinct.len() == 1;

        let signal = self.resolve(contribs, weights, conflict, ensemble_score);

        EnsembleSignal {
            symbol,
            signal,
            ensemble_score,
            model_signals,
            model_confidences,
            conflict,
            conflict_reason,
            signals_agree,
            rank: 0, // assigned after the global sort
            generated_at,
        }
    }

    fn resolve(
        &self,
        contribs: &[(String, ModelOutput)],
        weights: &HashMap<String, f64>,
        conflict: bool,
        ensemble_score: f64,
    ) -> SignalLabel {
        match self.settings.conflict_strategy {
            ConflictStrategy::WeightedMajority | ConflictStrategy::Conservative => {
                // Conflict always degrades to HOLD under these
                // strategies, regardless of the vote winner
                if conflict {
                    return SignalLabel::Hold;
                }
                Self::weighted_vote(contribs, weights)
            }
            ConflictStrategy::ConfidenceBased => {
                if ensemble_score >= 0.7 {
                    SignalLabel::StrongBuy
                } else if ensemble_score >= 0.6 {
                    SignalLabel::Buy
                } else if ensemble_score <= 0.3 {
                    SignalLabel::StrongSell
                } else if ensemble_score <= 0.4 {
                    SignalLabel::Sell
                } else {
                    SignalLabel::Hold
                }
            }
        }
    }

    /// Sum each distinct label's model weights and take the heaviest.
    /// Ties resolve toward the label nearest HOLD, so a split vote
    /// never upgrades.
    fn weighted_vote(
        contribs: &[(String, ModelOutput)],
        weights: &HashMap<String, f64>,
    ) -> SignalLabel {
        let mut votes: HashMap<SignalLabel, f64> = HashMap::new();
        for (model_id, output) in contribs {
            let weight = weights.get(model_id).copied().unwrap_or(0.0);
            *votes.entry(output.signal).or_insert(0.0) += weight;
        }
        votes
            .into_iter()
            .max_by(|(label_a, vote_a), (label_b, vote_b)| {
                vote_a
                    .partial_cmp(vote_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        label_b
                            .to_score()
                            .abs()
                            .cmp(&label_a.to_score().abs())
                            .then_with(|| label_a.to_score().cmp(&label_b.to_score()))
                    })
            })
            .map(|(label, _)| label)
            .unwrap_or(SignalLabel::Hold)
    }

    /// Weight fraction of contributing models that voted for the
    /// resolved label.
    fn agreement_fraction(&self, signal: &EnsembleSignal, weights: &HashMap<String, f64>) -> f64 {
        let total: f64 = signal
            .model_signals
            .keys()
            .map(|m| weights.get(m).copied().unwrap_or(0.0))
            .sum();
        if total <= 0.0 {
            return 0.0;
        }
        let agreeing: f64 = signal
            .model_signals
            .iter()
            .filter(|(_, &label)| label == signal.signal)
            .map(|(m, _)| weights.get(m).copied().unwrap_or(0.0))
            .sum();
        agreeing / total
    }

    /// Division-guarded aggregate statistics over one run's output.
    pub fn summarize(signals: &[EnsembleSignal]) -> RunSummary {
        let signal_count = signals.len();
        if signal_count == 0 {
            return RunSummary::default();
        }
        let conflict_count = signals.iter().filter(|s| s.conflict).count();
        RunSummary {
            signal_count,
            conflict_count,
            conflict_rate: conflict_count as f64 / signal_count as f64,
            mean_score: signals.iter().map(|s| s.ensemble_score).sum::<f64>()
                / signal_count as f64,
        }
    }
}
