use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Five-level trading signal label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalLabel {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl SignalLabel {
    /// Convert to numeric score (-2 to 2)
    pub fn to_score(&self) -> i32 {
        match self {
            SignalLabel::StrongBuy => 2,
            SignalLabel::Buy => 1,
            SignalLabel::Hold => 0,
            SignalLabel::Sell => -1,
            SignalLabel::StrongSell => -2,
        }
    }

    pub fn is_bullish(&self) -> bool {
        matches!(self, SignalLabel::StrongBuy | SignalLabel::Buy)
    }

    pub fn is_bearish(&self) -> bool {
        matches!(self, SignalLabel::StrongSell | SignalLabel::Sell)
    }

    /// Human-readable label
    pub fn to_label(&self) -> &'static str {
        match self {
            SignalLabel::StrongBuy => "Strong Buy",
            SignalLabel::Buy => "Buy",
            SignalLabel::Hold => "Hold",
            SignalLabel::Sell => "Sell",
            SignalLabel::StrongSell => "Strong Sell",
        }
    }
}

impl fmt::Display for SignalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_label())
    }
}

/// Quintile quality grade (A = top quintile, F = bottom)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(s)
    }
}

/// One row of the feature snapshot: every precomputed feature for one
/// symbol as of one date. Columns the ingestion layer could not compute
/// are `None` and get handled by eligibility/coverage filters downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureRow {
    pub symbol: String,
    pub date: NaiveDate,
    pub last_price: Option<f64>,
    /// 20-day average dollar volume
    pub adv_20: Option<f64>,
    /// 12-month momentum excluding the most recent month
    pub mom_12_1: Option<f64>,
    pub mom_6: Option<f64>,
    pub mom_3: Option<f64>,
    /// 20-day rolling volatility of daily returns
    pub vol_20: Option<f64>,
    pub sma_200: Option<f64>,
    /// Slope of the 200-day SMA over the ingestion layer's slope-lag window
    pub sma_200_slope: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub roe: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub profit_margin: Option<f64>,
    pub revenue_growth: Option<f64>,
}

impl FeatureRow {
    /// Look up a feature column by name. Model configs carry an ordered
    /// `requires_features` list; this is what turns those names into
    /// classifier input columns.
    pub fn feature(&self, name: &str) -> Option<f64> {
        match name {
            "last_price" => self.last_price,
            "adv_20" => self.adv_20,
            "mom_12_1" => self.mom_12_1,
            "mom_6" => self.mom_6,
            "mom_3" => self.mom_3,
            "vol_20" => self.vol_20,
            "sma_200" => self.sma_200,
            "sma_200_slope" => self.sma_200_slope,
            "pe_ratio" => self.pe_ratio,
            "pb_ratio" => self.pb_ratio,
            "roe" => self.roe,
            "debt_to_equity" => self.debt_to_equity,
            "current_ratio" => self.current_ratio,
            "profit_margin" => self.profit_margin,
            "revenue_growth" => self.revenue_growth,
            _ => None,
        }
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.feature(name).is_some()
    }
}

/// Aligned daily-return history for the snapshot universe. `dates` is
/// ascending; every series has the same length as `dates`, with `None`
/// marking days a symbol has no return (halts, recent listings).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReturnsPanel {
    pub dates: Vec<NaiveDate>,
    pub series: HashMap<String, Vec<Option<f64>>>,
}

impl ReturnsPanel {
    /// Trailing window of at most `lookback` observations for a symbol.
    pub fn window(&self, symbol: &str, lookback: usize) -> Option<&[Option<f64>]> {
        let series = self.series.get(symbol)?;
        let start = series.len().saturating_sub(lookback);
        Some(&series[start..])
    }

    /// Fraction of non-null observations over the trailing `lookback`
    /// window. Counts against the full lookback, so a series shorter
    /// than the window reads as incomplete coverage.
    pub fn coverage(&self, symbol: &str, lookback: usize) -> f64 {
        if lookback == 0 {
            return 0.0;
        }
        match self.window(symbol, lookback) {
            Some(w) => w.iter().filter(|r| r.is_some()).count() as f64 / lookback as f64,
            None => 0.0,
        }
    }
}

/// Immutable engine input: one feature row per tradable symbol plus the
/// return history volatility targeting needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub date: NaiveDate,
    pub rows: Vec<FeatureRow>,
    pub returns: ReturnsPanel,
}

impl FeatureSnapshot {
    pub fn new(date: NaiveDate, rows: Vec<FeatureRow>, returns: ReturnsPanel) -> Self {
        Self { date, rows, returns }
    }
}

/// Static configuration for one registered model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    pub display_name: String,
    pub version: String,
    /// Relative weight in the ensemble (>= 0); normalized across enabled
    /// models by the registry
    pub weight_in_ensemble: f64,
    pub enabled: bool,
    /// Ordered feature columns this model feeds to its classifier
    pub requires_features: Vec<String>,
}

impl ModelConfig {
    /// Weight the ensemble actually uses: disabled models contribute 0.
    pub fn effective_weight(&self) -> f64 {
        if self.enabled {
            self.weight_in_ensemble.max(0.0)
        } else {
            0.0
        }
    }
}

/// Model-specific diagnostic payload attached to each output. A tagged
/// union rather than a free-form map so the per-model fields stay part
/// of the typed serialization contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ModelMetadata {
    Momentum {
        /// Composite rank score (blend of momentum z-scores)
        score: f64,
        mom_12_1: f64,
        mom_6: f64,
        volatility: f64,
    },
    Fundamentals {
        quality_grade: Grade,
        value_score: Option<f64>,
        financial_health_score: Option<f64>,
        quality_score: Option<f64>,
    },
    None,
}

/// One model's signal for one symbol on one date. Created once per run;
/// a new run produces new values, never in-place updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOutput {
    pub symbol: String,
    pub signal: SignalLabel,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub expected_return: Option<f64>,
    /// 1-based, unique within one model's output for one date
    pub rank: Option<u32>,
    pub generated_at: DateTime<Utc>,
    pub metadata: ModelMetadata,
}

/// Per-stage attrition counts from the eligibility filter. Filters run
/// in order; a symbol is counted against the first stage it fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterAttrition {
    pub input: usize,
    pub missing_features: usize,
    pub below_adv_floor: usize,
    pub below_min_price: usize,
    pub failed_trend: usize,
    pub eligible: usize,
}

impl fmt::Display for FilterAttrition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in, {} missing features, {} below ADV floor, {} below price floor, {} failed trend, {} eligible",
            self.input,
            self.missing_features,
            self.below_adv_floor,
            self.below_min_price,
            self.failed_trend,
            self.eligible
        )
    }
}

/// One target holding in a constructed portfolio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioTarget {
    pub symbol: String,
    /// Final weight after cap enforcement and volatility scaling, in [0,1]
    pub target_weight: f64,
    /// Capped inverse-volatility weight before the volatility scale
    pub raw_weight: f64,
    /// Composite rank score that justified selection
    pub score: f64,
    /// 1-based rank by score descending
    pub rank: u32,
    pub volatility: f64,
    pub mom_12_1: f64,
    pub mom_6: f64,
}

/// Constructed portfolio plus the diagnostics that justify it.
/// Invariant: sum of target weights <= 1; the remainder is cash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub date: NaiveDate,
    pub targets: Vec<PortfolioTarget>,
    /// Realized annualized volatility of the capped (pre-scale) weights
    pub realized_vol_annual: f64,
    /// min(1, target_vol / realized_vol)
    pub vol_scale: f64,
    pub cash_weight: f64,
    pub warnings: Vec<String>,
    pub attrition: FilterAttrition,
}

/// Fused multi-model signal for one symbol. Derived entirely from the
/// ModelOutput set for one date; recomputed each run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleSignal {
    pub symbol: String,
    pub signal: SignalLabel,
    /// Weight-blended confidence across contributing models, in [0,1]
    pub ensemble_score: f64,
    pub model_signals: BTreeMap<String, SignalLabel>,
    pub model_confidences: BTreeMap<String, f64>,
    pub conflict: bool,
    pub conflict_reason: Option<String>,
    pub signals_agree: bool,
    /// 1-based, assigned after sorting by ensemble_score descending
    pub rank: u32,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_serialization_is_screaming_snake() {
        let json = serde_json::to_string(&SignalLabel::StrongBuy).unwrap();
        assert_eq!(json, "\"STRONG_BUY\"");
        let back: SignalLabel = serde_json::from_str("\"STRONG_SELL\"").unwrap();
        assert_eq!(back, SignalLabel::StrongSell);
    }

    #[test]
    fn test_label_direction_helpers() {
        assert!(SignalLabel::Buy.is_bullish());
        assert!(SignalLabel::StrongBuy.is_bullish());
        assert!(SignalLabel::Sell.is_bearish());
        assert!(SignalLabel::StrongSell.is_bearish());
        assert!(!SignalLabel::Hold.is_bullish());
        assert!(!SignalLabel::Hold.is_bearish());
    }

    #[test]
    fn test_effective_weight_zero_when_disabled() {
        let mut config = ModelConfig {
            model_id: "m".to_string(),
            display_name: "M".to_string(),
            version: "1".to_string(),
            weight_in_ensemble: 0.6,
            enabled: true,
            requires_features: vec![],
        };
        assert_eq!(config.effective_weight(), 0.6);
        config.enabled = false;
        assert_eq!(config.effective_weight(), 0.0);
    }

    #[test]
    fn test_feature_lookup_by_name() {
        let row = FeatureRow {
            symbol: "AAPL".to_string(),
            mom_12_1: Some(0.25),
            ..Default::default()
        };
        assert_eq!(row.feature("mom_12_1"), Some(0.25));
        assert_eq!(row.feature("pe_ratio"), None);
        assert_eq!(row.feature("not_a_column"), None);
    }

    #[test]
    fn test_returns_coverage_counts_against_full_lookback() {
        let mut panel = ReturnsPanel::default();
        panel.series.insert(
            "AAPL".to_string(),
            vec![Some(0.01), None, Some(0.02), Some(-0.01)],
        );
        // 3 of 4 present over a 4-day window
        assert!((panel.coverage("AAPL", 4) - 0.75).abs() < 1e-12);
        // Series shorter than the window reads as incomplete
        assert!((panel.coverage("AAPL", 8) - 0.375).abs() < 1e-12);
        assert_eq!(panel.coverage("MSFT", 4), 0.0);
    }

    #[test]
    fn test_metadata_tagged_serialization() {
        let meta = ModelMetadata::Fundamentals {
            quality_grade: Grade::A,
            value_score: Some(0.8),
            financial_health_score: Some(0.4),
            quality_score: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["model"], "fundamentals");
        assert_eq!(json["quality_grade"], "A");
    }
}
