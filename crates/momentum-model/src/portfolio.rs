//! Portfolio construction for the momentum model: selection, inverse
//! volatility weighting, weight-cap enforcement, volatility targeting.

use crate::MomentumModel;
use nalgebra::{DMatrix, DVector};
use signal_core::stats::{annualize_vol, portfolio_daily_vol, sample_covariance, EPS};
use signal_core::{EngineError, FeatureRow, FeatureSnapshot, Portfolio, PortfolioTarget};

/// Raw inverse-volatility weights: w_i = (1/vol_i) / sum(1/vol_j),
/// epsilon-guarded against zero volatility.
pub fn inverse_vol_weights(volatilities: &[f64]) -> Vec<f64> {
    let inverses: Vec<f64> = volatilities
        .iter()
        .map(|v| 1.0 / (v.max(0.0) + EPS))
        .collect();
    let total: f64 = inverses.iter().sum();
    if total <= 0.0 {
        return vec![0.0; volatilities.len()];
    }
    inverses.iter().map(|x| x / total).collect()
}

/// Iterative weight-cap enforcement. Each pass clips over-cap weights
/// and redistributes the excess proportionally among the names still
/// under the cap, then the result is renormalized to sum to 1 when the
/// total is positive.
///
/// This is a fixed point, not a single clip-and-renormalize: the naive
/// version can push previously-compliant weights back over the cap.
pub fn enforce_weight_cap(weights: &mut [f64], max_weight: f64, max_passes: usize) {
    for _ in 0..max_passes {
        let excess: f64 = weights
            .iter()
            .filter(|&&w| w > max_weight)
            .map(|w| w - max_weight)
            .sum();
        if excess <= EPS {
            break;
        }
        for w in weights.iter_mut() {
            if *w > max_weight {
                *w = max_weight;
            }
        }
        let under_total: f64 = weights.iter().filter(|&&w| w < max_weight).sum();
        if under_total <= EPS {
            break;
        }
        for w in weights.iter_mut() {
            if *w < max_weight {
                *w += excess * (*w / under_total);
            }
        }
    }

    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in weights.iter_mut() {
            *w /= total;
        }
    }
}

impl MomentumModel {
    /// Build the target portfolio for one snapshot.
    ///
    /// Pipeline: eligibility filter → composite ranking → top-N
    /// selection → inverse-vol weights → cap enforcement → return
    /// coverage gate (weights recomputed on survivors) → volatility
    /// targeting against the sample covariance.
    pub fn build_portfolio(&self, snapshot: &FeatureSnapshot) -> Result<Portfolio, EngineError> {
        let params = self.params();
        let (eligible, attrition) = self.eligible_rows(&snapshot.rows);
        if eligible.is_empty() {
            return Err(EngineError::NoEligibleSymbols(attrition));
        }

        let mut warnings = Vec::new();
        if eligible.len() < params.n_holdings {
            warnings.push(format!(
                "only {} symbols eligible for {} requested holdings",
                eligible.len(),
                params.n_holdings
            ));
        }

        let scores = self.composite_scores(&eligible);
        let order = Self::rank_order(&scores);
        let selected: Vec<usize> = order.into_iter().take(params.n_holdings).collect();

        // Coverage gate: a name without enough return history cannot be
        // risk-modeled, so it leaves the portfolio entirely and the
        // weight vector is rebuilt on the survivors.
        let survivors: Vec<usize> = selected
            .iter()
            .copied()
            .filter(|&i| {
                let coverage = snapshot
                    .returns
                    .coverage(&eligible[i].symbol, params.vol_lookback);
                if coverage < params.min_return_coverage {
                    tracing::debug!(
                        "momentum: dropping {} from portfolio (return coverage {:.0}%)",
                        eligible[i].symbol,
                        coverage * 100.0
                    );
                    false
                } else {
                    true
                }
            })
            .collect();
        if survivors.is_empty() {
            return Err(EngineError::InsufficientData(format!(
                "none of the {} selected symbols has {:.0}% return coverage over {} days",
                selected.len(),
                params.min_return_coverage * 100.0,
                params.vol_lookback
            )));
        }
        if survivors.len() < selected.len() {
            warnings.push(format!(
                "{} of {} selected symbols dropped for thin return history",
                selected.len() - survivors.len(),
                selected.len()
            ));
        }

        let survivor_rows: Vec<&FeatureRow> = survivors.iter().map(|&i| eligible[i]).collect();
        let vols: Vec<f64> = survivor_rows
            .iter()
            .map(|r| r.vol_20.unwrap_or(0.0))
            .collect();
        let mut weights = inverse_vol_weights(&vols);
        enforce_weight_cap(&mut weights, params.max_weight, params.max_cap_passes);

        let (realized_vol_annual, vol_scale) =
            self.volatility_scale(snapshot, &survivor_rows, &weights)?;

        let targets: Vec<PortfolioTarget> = survivors
            .iter()
            .enumerate()
            .map(|(pos, &i)| {
                let row = eligible[i];
                PortfolioTarget {
                    symbol: row.symbol.clone(),
                    target_weight: weights[pos] * vol_scale,
                    raw_weight: weights[pos],
                    score: scores[i],
                    rank: pos as u32 + 1,
                    volatility: row.vol_20.unwrap_or(0.0),
                    mom_12_1: row.mom_12_1.unwrap_or(0.0),
                    mom_6: row.mom_6.unwrap_or(0.0),
                }
            })
            .collect();

        let invested: f64 = targets.iter().map(|t| t.target_weight).sum();
        let cash_weight = (1.0 - invested).max(0.0);
        if cash_weight > 0.5 {
            warnings.push(format!("high cash weight {:.0}%", cash_weight * 100.0));
        }

        tracing::info!(
            "momentum portfolio: {} holdings, realized vol {:.1}%, scale {:.2}, cash {:.0}%",
            targets.len(),
            realized_vol_annual * 100.0,
            vol_scale,
            cash_weight * 100.0
        );

        Ok(Portfolio {
            date: snapshot.date,
            targets,
            realized_vol_annual,
            vol_scale,
            cash_weight,
            warnings,
            attrition,
        })
    }

    /// Realized annualized volatility of the capped weights and the
    /// scale that brings it down to target. Scale never exceeds 1; a
    /// portfolio already below target is left unlevered.
    fn volatility_scale(
        &self,
        snapshot: &FeatureSnapshot,
        rows: &[&FeatureRow],
        weights: &[f64],
    ) -> Result<(f64, f64), EngineError> {
        let params = self.params();
        let windows: Vec<&[Option<f64>]> = rows
            .iter()
            .map(|r| {
                snapshot
                    .returns
                    .window(&r.symbol, params.vol_lookback)
                    .ok_or_else(|| {
                        EngineError::CovarianceUnavailable(format!(
                            "no return series for {}",
                            r.symbol
                        ))
                    })
            })
            .collect::<Result<_, _>>()?;

        // Align on days where every survivor has a return
        let window_len = windows.iter().map(|w| w.len()).min().unwrap_or(0);
        let mut observations: Vec<f64> = Vec::new();
        let mut days = 0;
        for t in 0..window_len {
            let row: Option<Vec<f64>> = windows
                .iter()
                .map(|w| w[w.len() - window_len + t])
                .collect();
            if let Some(row) = row {
                observations.extend_from_slice(&row);
                days += 1;
            }
        }
        if days < 2 {
            return Err(EngineError::CovarianceUnavailable(format!(
                "only {} aligned return observations across {} symbols",
                days,
                rows.len()
            )));
        }

        let matrix = DMatrix::from_row_slice(days, rows.len(), &observations);
        let covariance = sample_covariance(&matrix).ok_or_else(|| {
            EngineError::CovarianceUnavailable("degenerate observation matrix".to_string())
        })?;
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::CovarianceUnavailable(
                "non-finite covariance entries".to_string(),
            ));
        }

        let weight_vec = DVector::from_column_slice(weights);
        let realized = annualize_vol(portfolio_daily_vol(&weight_vec, &covariance));
        if !realized.is_finite() {
            return Err(EngineError::CovarianceUnavailable(
                "non-finite portfolio volatility".to_string(),
            ));
        }

        let scale = if realized > 0.0 {
            (params.target_vol_annual / realized).min(1.0)
        } else {
            1.0
        };
        Ok((realized, scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::{MomentumConfig, MomentumModel};
    use signal_core::ReturnsPanel;
    use std::sync::Arc;

    fn model_with(params: MomentumConfig) -> MomentumModel {
        MomentumModel::new(
            MomentumModel::default_config(),
            params,
            Arc::new(FakeClassifier {
                probabilities: vec![0.6],
                predictions: vec![0.02],
            }),
        )
    }

    /// Full-coverage panel with constant per-symbol daily returns plus a
    /// small alternating wiggle so the covariance is non-degenerate.
    fn full_panel(symbols: &[&str], daily: f64, days: usize) -> ReturnsPanel {
        let mut panel = ReturnsPanel::default();
        for (k, symbol) in symbols.iter().enumerate() {
            let series: Vec<Option<f64>> = (0..days)
                .map(|t| {
                    let wiggle = if (t + k) % 2 == 0 { 1.0 } else { -1.0 };
                    Some(daily * wiggle)
                })
                .collect();
            panel.series.insert(symbol.to_string(), series);
        }
        panel
    }

    #[test]
    fn test_inverse_vol_weights_sum_to_one() {
        let w = inverse_vol_weights(&[0.02, 0.04]);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        // Lower vol gets double the weight
        assert!((w[0] / w[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_inverse_vol_weights_zero_vol_guarded() {
        let w = inverse_vol_weights(&[0.0, 0.02]);
        assert!(w.iter().all(|x| x.is_finite()));
        assert!(w[0] > w[1]);
    }

    #[test]
    fn test_cap_enforcement_respects_cap_and_budget() {
        let mut w = vec![0.55, 0.2, 0.15, 0.1];
        enforce_weight_cap(&mut w, 0.3, 10);
        assert!(w.iter().all(|&x| x <= 0.3 + 1e-9));
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cap_enforcement_is_not_naive_clip_and_renormalize() {
        // Naive clip-then-renormalize on this input yields
        // [0.4, 0.267, 0.2, 0.133] and re-breaches the 0.3 cap.
        let mut w = vec![0.55, 0.2, 0.15, 0.1];
        enforce_weight_cap(&mut w, 0.3, 10);
        assert!(w[0] <= 0.3 + 1e-9);
        assert!(w[1] <= 0.3 + 1e-9);
        // Redistribution is proportional among under-cap names
        assert!(w[1] > w[2] && w[2] > w[3]);
    }

    #[test]
    fn test_cap_enforcement_noop_under_cap() {
        let mut w = vec![0.4, 0.35, 0.25];
        enforce_weight_cap(&mut w, 0.5, 10);
        assert!((w[0] - 0.4).abs() < 1e-9);
        assert!((w[1] - 0.35).abs() < 1e-9);
        assert!((w[2] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_build_portfolio_happy_path() {
        let params = MomentumConfig {
            n_holdings: 3,
            max_weight: 0.5,
            vol_lookback: 20,
            ..Default::default()
        };
        let model = model_with(params);
        let rows = vec![
            eligible_row("A", 0.40, 0.20, 0.02),
            eligible_row("B", 0.20, 0.10, 0.03),
            eligible_row("C", 0.10, 0.05, 0.04),
        ];
        let panel = full_panel(&["A", "B", "C"], 0.01, 20);
        let snap = snapshot(rows, panel);

        let portfolio = model.build_portfolio(&snap).unwrap();
        assert_eq!(portfolio.targets.len(), 3);
        assert_eq!(portfolio.targets[0].symbol, "A");
        assert_eq!(portfolio.targets[0].rank, 1);
        assert!(portfolio.vol_scale > 0.0 && portfolio.vol_scale <= 1.0);
        let invested: f64 = portfolio.targets.iter().map(|t| t.target_weight).sum();
        assert!(invested <= 1.0 + 1e-9);
        assert!((portfolio.cash_weight - (1.0 - invested)).abs() < 1e-9);
        for t in &portfolio.targets {
            assert!(t.target_weight <= 0.5 + 1e-9);
            assert!(t.target_weight <= t.raw_weight + 1e-12);
        }
    }

    #[test]
    fn test_vol_scale_is_one_when_target_above_realized() {
        let params = MomentumConfig {
            n_holdings: 2,
            max_weight: 0.6,
            target_vol_annual: 0.50,
            vol_lookback: 20,
            ..Default::default()
        };
        let model = model_with(params);
        let rows = vec![
            eligible_row("A", 0.40, 0.20, 0.02),
            eligible_row("B", 0.20, 0.10, 0.03),
        ];
        // Tiny daily moves: realized vol well below the 50% target
        let panel = full_panel(&["A", "B"], 0.0001, 20);
        let snap = snapshot(rows, panel);

        let portfolio = model.build_portfolio(&snap).unwrap();
        assert!((portfolio.vol_scale - 1.0).abs() < 1e-9);
        assert!(portfolio.realized_vol_annual < 0.50);
    }

    #[test]
    fn test_thin_history_symbol_dropped_and_weights_recomputed() {
        let params = MomentumConfig {
            n_holdings: 3,
            max_weight: 0.8,
            vol_lookback: 20,
            ..Default::default()
        };
        let model = model_with(params);
        let rows = vec![
            eligible_row("A", 0.40, 0.20, 0.02),
            eligible_row("B", 0.20, 0.10, 0.03),
            eligible_row("SPARSE", 0.30, 0.15, 0.04),
        ];
        let mut panel = full_panel(&["A", "B"], 0.01, 20);
        // Half-null series: 50% coverage, below the 80% gate
        panel.series.insert(
            "SPARSE".to_string(),
            (0..20)
                .map(|t| if t % 2 == 0 { Some(0.01) } else { None })
                .collect(),
        );
        let snap = snapshot(rows, panel);

        let portfolio = model.build_portfolio(&snap).unwrap();
        assert_eq!(portfolio.targets.len(), 2);
        assert!(portfolio.targets.iter().all(|t| t.symbol != "SPARSE"));
        // Raw weights were rebuilt over the two survivors
        let raw: f64 = portfolio.targets.iter().map(|t| t.raw_weight).sum();
        assert!((raw - 1.0).abs() < 1e-9);
        assert!(portfolio
            .warnings
            .iter()
            .any(|w| w.contains("thin return history")));
    }

    #[test]
    fn test_no_eligible_symbols_is_a_typed_error() {
        let model = model_with(MomentumConfig::default());
        let mut row = eligible_row("PENNY", 0.1, 0.05, 0.02);
        row.last_price = Some(1.0);
        let snap = snapshot(vec![row], ReturnsPanel::default());

        match model.build_portfolio(&snap) {
            Err(EngineError::NoEligibleSymbols(attrition)) => {
                assert_eq!(attrition.input, 1);
                assert_eq!(attrition.below_min_price, 1);
                assert_eq!(attrition.eligible, 0);
            }
            other => panic!("expected NoEligibleSymbols, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_return_history_is_insufficient_data() {
        let model = model_with(MomentumConfig {
            n_holdings: 2,
            vol_lookback: 20,
            ..Default::default()
        });
        let rows = vec![eligible_row("A", 0.40, 0.20, 0.02)];
        let snap = snapshot(rows, ReturnsPanel::default());

        match model.build_portfolio(&snap) {
            Err(EngineError::InsufficientData(_)) => {}
            other => panic!("expected InsufficientData, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_too_few_aligned_observations_is_covariance_error() {
        let model = model_with(MomentumConfig {
            n_holdings: 2,
            vol_lookback: 1,
            min_return_coverage: 0.5,
            ..Default::default()
        });
        let rows = vec![eligible_row("A", 0.40, 0.20, 0.02)];
        let mut panel = ReturnsPanel::default();
        panel.series.insert("A".to_string(), vec![Some(0.01)]);
        let snap = snapshot(rows, panel);

        match model.build_portfolio(&snap) {
            Err(EngineError::CovarianceUnavailable(_)) => {}
            other => panic!("expected CovarianceUnavailable, got {:?}", other.map(|_| ())),
        }
    }
}
