//! Model A: cross-sectional momentum.
//!
//! Ranks the eligible universe by a blend of 12-1 and 6-month momentum
//! z-scores, classifies each name from the trained classifier's
//! probability and expected return, and (see [`portfolio`]) builds an
//! inverse-volatility, weight-capped, volatility-targeted portfolio.

pub mod portfolio;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use signal_core::stats::zscores;
use signal_core::{
    Classifier, EngineError, FeatureRow, FeatureSnapshot, FilterAttrition, ModelConfig,
    ModelMetadata, ModelOutput, SignalLabel, SignalModel,
};
use std::sync::Arc;

pub const MODEL_ID: &str = "momentum_v1";

/// Tunable parameters for signal generation and portfolio construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub n_holdings: usize,
    /// Per-name weight cap, enforced by iterative redistribution
    pub max_weight: f64,
    pub target_vol_annual: f64,
    /// Blend weight on the 12-1 momentum z-score
    pub w_12_1: f64,
    /// Blend weight on the 6-month momentum z-score
    pub w_6: f64,
    /// Minimum 20-day average dollar volume
    pub adv_floor: f64,
    pub min_price: f64,
    /// Trading days of return history for the covariance window
    pub vol_lookback: usize,
    /// Minimum fraction of non-null returns over the lookback window
    pub min_return_coverage: f64,
    pub max_cap_passes: usize,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            n_holdings: 15,
            max_weight: 0.10,
            target_vol_annual: 0.15,
            w_12_1: 0.7,
            w_6: 0.3,
            adv_floor: 5_000_000.0,
            min_price: 5.0,
            vol_lookback: 63,
            min_return_coverage: 0.8,
            max_cap_passes: 10,
        }
    }
}

/// Momentum signal policy. Branch order is fixed: STRONG checks run
/// first, so a row satisfying both a STRONG and a weaker condition
/// always takes the STRONG label.
pub fn classify_momentum(probability: f64, expected_return: f64) -> SignalLabel {
    if probability >= 0.65 && expected_return > 0.05 {
        SignalLabel::StrongBuy
    } else if probability >= 0.55 && expected_return > 0.0 {
        SignalLabel::Buy
    } else if probability <= 0.35 || expected_return < -0.05 {
        SignalLabel::StrongSell
    } else if probability <= 0.45 || expected_return < 0.0 {
        SignalLabel::Sell
    } else {
        SignalLabel::Hold
    }
}

pub struct MomentumModel {
    config: ModelConfig,
    params: MomentumConfig,
    classifier: Arc<dyn Classifier>,
}

impl MomentumModel {
    pub fn new(config: ModelConfig, params: MomentumConfig, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            config,
            params,
            classifier,
        }
    }

    pub fn with_defaults(classifier: Arc<dyn Classifier>) -> Self {
        Self::new(Self::default_config(), MomentumConfig::default(), classifier)
    }

    pub fn default_config() -> ModelConfig {
        ModelConfig {
            model_id: MODEL_ID.to_string(),
            display_name: "Cross-Sectional Momentum".to_string(),
            version: "1.0".to_string(),
            weight_in_ensemble: 0.6,
            enabled: true,
            requires_features: vec![
                "mom_12_1".to_string(),
                "mom_6".to_string(),
                "mom_3".to_string(),
                "vol_20".to_string(),
                "adv_20".to_string(),
                "last_price".to_string(),
                "sma_200".to_string(),
                "sma_200_slope".to_string(),
            ],
        }
    }

    pub fn params(&self) -> &MomentumConfig {
        &self.params
    }

    /// Apply the eligibility filters in order, attributing each dropped
    /// symbol to the first filter it fails.
    fn eligible_rows<'a>(&self, rows: &'a [FeatureRow]) -> (Vec<&'a FeatureRow>, FilterAttrition) {
        let mut attrition = FilterAttrition {
            input: rows.len(),
            ..Default::default()
        };
        let mut eligible = Vec::new();

        for row in rows {
            if self
                .config
                .requires_features
                .iter()
                .any(|f| !row.has_feature(f))
            {
                attrition.missing_features += 1;
                continue;
            }
            // Every feature referenced below is non-null past this point
            if row.adv_20.unwrap_or(0.0) < self.params.adv_floor {
                attrition.below_adv_floor += 1;
                continue;
            }
            let price = row.last_price.unwrap_or(0.0);
            if price < self.params.min_price {
                attrition.below_min_price += 1;
                continue;
            }
            // Trend quality: above the 200-day SMA and the SMA rising
            let sma = row.sma_200.unwrap_or(0.0);
            let slope = row.sma_200_slope.unwrap_or(0.0);
            if price <= sma || slope <= 0.0 {
                attrition.failed_trend += 1;
                continue;
            }
            eligible.push(row);
        }

        attrition.eligible = eligible.len();
        (eligible, attrition)
    }

    /// Composite rank score: w_12_1 * z(mom_12_1) + w_6 * z(mom_6),
    /// z-scored cross-sectionally over the eligible set.
    fn composite_scores(&self, rows: &[&FeatureRow]) -> Vec<f64> {
        let m12: Vec<f64> = rows.iter().map(|r| r.mom_12_1.unwrap_or(0.0)).collect();
        let m6: Vec<f64> = rows.iter().map(|r| r.mom_6.unwrap_or(0.0)).collect();
        let z12 = zscores(&m12);
        let z6 = zscores(&m6);
        z12.iter()
            .zip(z6.iter())
            .map(|(a, b)| self.params.w_12_1 * a + self.params.w_6 * b)
            .collect()
    }

    /// Indices of `scores` ordered descending. The sort is stable, so
    /// ties keep input order; rank assignment depends on this.
    fn rank_order(scores: &[f64]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }

    fn feature_matrix(&self, rows: &[&FeatureRow]) -> Vec<Vec<f64>> {
        rows.iter()
            .map(|row| {
                self.config
                    .requires_features
                    .iter()
                    .map(|f| row.feature(f).unwrap_or(0.0))
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl SignalModel for MomentumModel {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    async fn generate_signals(
        &self,
        snapshot: &FeatureSnapshot,
    ) -> Result<Vec<ModelOutput>, EngineError> {
        let (eligible, attrition) = self.eligible_rows(&snapshot.rows);
        if eligible.is_empty() {
            tracing::warn!("momentum: no eligible symbols ({})", attrition);
            return Ok(Vec::new());
        }

        let scores = self.composite_scores(&eligible);
        let matrix = self.feature_matrix(&eligible);
        let probabilities = self.classifier.predict_proba(&matrix)?;
        let expected_returns = self.classifier.predict(&matrix)?;
        if probabilities.len() != eligible.len() || expected_returns.len() != eligible.len() {
            return Err(EngineError::ModelArtifact(format!(
                "classifier returned {} probabilities / {} predictions for {} rows",
                probabilities.len(),
                expected_returns.len(),
                eligible.len()
            )));
        }

        let generated_at = Utc::now();
        let order = Self::rank_order(&scores);
        let outputs = order
            .iter()
            .enumerate()
            .map(|(pos, &i)| {
                let row = eligible[i];
                let p = probabilities[i];
                let r = expected_returns[i];
                ModelOutput {
                    symbol: row.symbol.clone(),
                    signal: classify_momentum(p, r),
                    confidence: p.clamp(0.0, 1.0),
                    expected_return: Some(r),
                    rank: Some(pos as u32 + 1),
                    generated_at,
                    metadata: ModelMetadata::Momentum {
                        score: scores[i],
                        mom_12_1: row.mom_12_1.unwrap_or(0.0),
                        mom_6: row.mom_6.unwrap_or(0.0),
                        volatility: row.vol_20.unwrap_or(0.0),
                    },
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            "momentum: scored {} of {} symbols ({})",
            outputs.len(),
            snapshot.rows.len(),
            attrition
        );
        Ok(outputs)
    }

    fn explain(&self, output: &ModelOutput) -> String {
        match &output.metadata {
            ModelMetadata::Momentum {
                score,
                mom_12_1,
                mom_6,
                ..
            } => format!(
                "{}: {} (confidence {:.0}%) — composite momentum score {:.2}, 12-1 momentum {:.1}%, 6m momentum {:.1}%",
                output.symbol,
                output.signal,
                output.confidence * 100.0,
                score,
                mom_12_1 * 100.0,
                mom_6 * 100.0
            ),
            _ => format!("{}: {}", output.symbol, output.signal),
        }
    }
}
