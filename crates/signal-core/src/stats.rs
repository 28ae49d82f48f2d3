//! Cross-sectional statistics shared by the model engines.
//!
//! Z-scores and percentile ranks are computed over one snapshot's
//! cross-section, never over time. Missing values are skipped by the
//! `_opt` variants so a sparse column still standardizes over whatever
//! is present.

use nalgebra::{DMatrix, DVector};
use statrs::statistics::Statistics;

/// Guard against division by zero on degenerate cross-sections
pub const EPS: f64 = 1e-12;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    Statistics::mean(data)
}

/// Sample standard deviation (n-1 denominator)
pub fn sample_std(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    Statistics::std_dev(data)
}

/// Population standard deviation (n denominator), the convention the
/// cross-sectional z-scores use
pub fn population_std(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
}

/// Cross-sectional z-scores with an epsilon-guarded denominator: a
/// degenerate (constant or single-row) column standardizes to zeros.
pub fn zscores(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let s = population_std(values);
    values.iter().map(|x| (x - m) / (s + EPS)).collect()
}

/// Z-scores over an optional column. The mean/std come from present
/// values only; missing entries stay missing. A zero-std column maps
/// every present value to 0 rather than blowing up.
pub fn zscores_opt(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        return vec![None; values.len()];
    }
    let m = mean(&present);
    let s = population_std(&present);
    values
        .iter()
        .map(|v| {
            v.map(|x| {
                if s <= EPS {
                    0.0
                } else {
                    (x - m) / s
                }
            })
        })
        .collect()
}

/// Percentile rank of each value within the slice, midpoint convention
/// for ties: (count_below + 0.5 * count_equal) / n, in (0, 1).
pub fn percentile_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    values
        .iter()
        .map(|&v| {
            let below = values.iter().filter(|&&x| x < v).count();
            let equal = values.iter().filter(|&&x| (x - v).abs() < EPS).count();
            (below as f64 + 0.5 * equal as f64) / n as f64
        })
        .collect()
}

/// Percentile ranks over an optional column; ranks are computed among
/// present values only.
pub fn percentile_ranks_opt(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        return vec![None; values.len()];
    }
    let n = present.len() as f64;
    values
        .iter()
        .map(|v| {
            v.map(|x| {
                let below = present.iter().filter(|&&p| p < x).count();
                let equal = present.iter().filter(|&&p| (p - x).abs() < EPS).count();
                (below as f64 + 0.5 * equal as f64) / n
            })
        })
        .collect()
}

/// Rank-based quantile bucketing (0 = bottom bucket). Returns `None`
/// when there are fewer distinct values than buckets, so the caller can
/// fall back to a coarser cut instead of crashing on duplicate-heavy
/// input. Equal values always land in the same bucket.
pub fn quantile_buckets(values: &[f64], bins: usize) -> Option<Vec<usize>> {
    if bins == 0 || values.is_empty() {
        return None;
    }
    let mut distinct: Vec<f64> = values.to_vec();
    distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    distinct.dedup_by(|a, b| (*a - *b).abs() < EPS);
    if distinct.len() < bins {
        return None;
    }
    let ranks = percentile_ranks(values);
    Some(
        ranks
            .iter()
            .map(|&r| ((r * bins as f64) as usize).min(bins - 1))
            .collect(),
    )
}

/// Sample covariance matrix (n-1 denominator) of an observation matrix
/// with one row per day and one column per symbol. Requires >= 2 rows.
pub fn sample_covariance(observations: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let t = observations.nrows();
    if t < 2 {
        return None;
    }
    let n = observations.ncols();
    let mut centered = observations.clone();
    for j in 0..n {
        let col_mean = observations.column(j).iter().sum::<f64>() / t as f64;
        for i in 0..t {
            centered[(i, j)] -= col_mean;
        }
    }
    Some(&centered.transpose() * &centered / (t as f64 - 1.0))
}

/// Daily portfolio standard deviation sqrt(w' Sigma w)
pub fn portfolio_daily_vol(weights: &DVector<f64>, covariance: &DMatrix<f64>) -> f64 {
    let variance = (weights.transpose() * covariance * weights)[(0, 0)];
    variance.max(0.0).sqrt()
}

/// Annualize a daily volatility by sqrt(252)
pub fn annualize_vol(daily_vol: f64) -> f64 {
    daily_vol * TRADING_DAYS_PER_YEAR.sqrt()
}
