//! Model B: fundamentals quality grading.
//!
//! Derives value / financial-health / quality composites from raw
//! ratios, buckets the classifier's quality probability into quintile
//! grades, and classifies signals from grade plus probability.

pub mod derived;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use signal_core::stats::quantile_buckets;
use signal_core::{
    Classifier, EngineError, FeatureRow, FeatureSnapshot, Grade, ModelConfig, ModelMetadata,
    ModelOutput, SignalLabel, SignalModel,
};
use std::sync::Arc;

pub const MODEL_ID: &str = "fundamentals_v1";

/// Slope of the linear expected-return proxy around p = 0.5
const EXPECTED_RETURN_SPAN: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundamentalsConfig {
    /// Minimum fraction of required features a row must have
    pub min_coverage: f64,
}

impl Default for FundamentalsConfig {
    fn default() -> Self {
        Self { min_coverage: 0.8 }
    }
}

/// Quality-grade signal policy
pub fn classify_quality(grade: Grade, probability: f64) -> SignalLabel {
    if grade == Grade::A && probability >= 0.8 {
        SignalLabel::StrongBuy
    } else if matches!(grade, Grade::A | Grade::B) && probability >= 0.6 {
        SignalLabel::Buy
    } else if grade == Grade::F && probability <= 0.3 {
        SignalLabel::StrongSell
    } else if matches!(grade, Grade::D | Grade::F) || probability <= 0.4 {
        SignalLabel::Sell
    } else {
        SignalLabel::Hold
    }
}

/// Bucket quality probabilities into letter grades by rank-based
/// quantile cuts. Quintiles when the distribution supports 5 distinct
/// cuts; otherwise 3 bins (A/C/F); otherwise everything grades C. The
/// degraded modes keep small or duplicate-heavy universes scoreable.
pub fn assign_grades(probabilities: &[f64]) -> Vec<Grade> {
    if let Some(buckets) = quantile_buckets(probabilities, 5) {
        return buckets
            .into_iter()
            .map(|b| match b {
                4 => Grade::A,
                3 => Grade::B,
                2 => Grade::C,
                1 => Grade::D,
                _ => Grade::F,
            })
            .collect();
    }
    if let Some(buckets) = quantile_buckets(probabilities, 3) {
        tracing::debug!("fundamentals: falling back to 3-bin grading");
        return buckets
            .into_iter()
            .map(|b| match b {
                2 => Grade::A,
                1 => Grade::C,
                _ => Grade::F,
            })
            .collect();
    }
    tracing::debug!("fundamentals: degenerate probability distribution, grading all C");
    vec![Grade::C; probabilities.len()]
}

pub struct FundamentalsModel {
    config: ModelConfig,
    params: FundamentalsConfig,
    classifier: Arc<dyn Classifier>,
}

impl FundamentalsModel {
    pub fn new(
        config: ModelConfig,
        params: FundamentalsConfig,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            config,
            params,
            classifier,
        }
    }

    pub fn with_defaults(classifier: Arc<dyn Classifier>) -> Self {
        Self::new(
            Self::default_config(),
            FundamentalsConfig::default(),
            classifier,
        )
    }

    pub fn default_config() -> ModelConfig {
        ModelConfig {
            model_id: MODEL_ID.to_string(),
            display_name: "Fundamentals Quality".to_string(),
            version: "1.0".to_string(),
            weight_in_ensemble: 0.4,
            enabled: true,
            requires_features: vec![
                "pe_ratio".to_string(),
                "pb_ratio".to_string(),
                "roe".to_string(),
                "debt_to_equity".to_string(),
                "current_ratio".to_string(),
                "profit_margin".to_string(),
                "revenue_growth".to_string(),
            ],
        }
    }

    /// Required-feature coverage fraction for one row
    fn coverage(&self, row: &FeatureRow) -> f64 {
        if self.config.requires_features.is_empty() {
            return 1.0;
        }
        let present = self
            .config
            .requires_features
            .iter()
            .filter(|f| row.has_feature(f))
            .count();
        present as f64 / self.config.requires_features.len() as f64
    }
}

#[async_trait]
impl SignalModel for FundamentalsModel {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    async fn generate_signals(
        &self,
        snapshot: &FeatureSnapshot,
    ) -> Result<Vec<ModelOutput>, EngineError> {
        // Coverage filter: symbols with too many missing fundamentals
        // cannot be graded against the cross-section
        let covered: Vec<&FeatureRow> = snapshot
            .rows
            .iter()
            .filter(|r| self.coverage(r) >= self.params.min_coverage)
            .collect();
        let dropped_coverage = snapshot.rows.len() - covered.len();
        if covered.is_empty() {
            tracing::warn!(
                "fundamentals: no symbols meet {:.0}% feature coverage",
                self.params.min_coverage * 100.0
            );
            return Ok(Vec::new());
        }

        let features = derived::derive(&covered);

        // Row-wise drop of any remaining null in the model's input
        // composites; never imputed
        let usable: Vec<usize> = (0..covered.len())
            .filter(|&i| features.value_score[i].is_some() && features.quality_score[i].is_some())
            .collect();
        if usable.is_empty() {
            tracing::warn!("fundamentals: no rows with complete composite scores");
            return Ok(Vec::new());
        }

        // Classifier input is the three derived composites, not the
        // raw columns listed in `requires_features`
        let matrix: Vec<Vec<f64>> = usable
            .iter()
            .map(|&i| {
                vec![
                    features.value_score[i].unwrap_or(0.0),
                    features.financial_health_score[i],
                    features.quality_score[i].unwrap_or(0.0),
                ]
            })
            .collect();
        let probabilities = self.classifier.predict_proba(&matrix)?;
        if probabilities.len() != usable.len() {
            return Err(EngineError::ModelArtifact(format!(
                "classifier returned {} probabilities for {} rows",
                probabilities.len(),
                usable.len()
            )));
        }

        let grades = assign_grades(&probabilities);

        // Rank by probability descending; the sort is stable, so tied
        // probabilities rank in input order and ranks stay unique
        let mut order: Vec<usize> = (0..usable.len()).collect();
        order.sort_by(|&a, &b| {
            probabilities[b]
                .partial_cmp(&probabilities[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let generated_at = Utc::now();
        let outputs: Vec<ModelOutput> = order
            .iter()
            .enumerate()
            .map(|(pos, &k)| {
                let row = covered[usable[k]];
                let p = probabilities[k];
                ModelOutput {
                    symbol: row.symbol.clone(),
                    signal: classify_quality(grades[k], p),
                    confidence: p.clamp(0.0, 1.0),
                    expected_return: Some((p - 0.5) * EXPECTED_RETURN_SPAN),
                    rank: Some(pos as u32 + 1),
                    generated_at,
                    metadata: ModelMetadata::Fundamentals {
                        quality_grade: grades[k],
                        value_score: features.value_score[usable[k]],
                        financial_health_score: Some(features.financial_health_score[usable[k]]),
                        quality_score: features.quality_score[usable[k]],
                    },
                }
            })
            .collect();

        tracing::debug!(
            "fundamentals: scored {} of {} symbols ({} dropped by coverage, {} row-wise)",
            outputs.len(),
            snapshot.rows.len(),
            dropped_coverage,
            covered.len() - usable.len()
        );
        Ok(outputs)
    }

    fn explain(&self, output: &ModelOutput) -> String {
        match &output.metadata {
            ModelMetadata::Fundamentals {
                quality_grade,
                value_score,
                financial_health_score,
                ..
            } => format!(
                "{}: {} (confidence {:.0}%) — quality grade {}, value {:.2}, financial health {:.2}",
                output.symbol,
                output.signal,
                output.confidence * 100.0,
                quality_grade,
                value_score.unwrap_or(0.0),
                financial_health_score.unwrap_or(0.0)
            ),
            _ => format!("{}: {}", output.symbol, output.signal),
        }
    }
}
