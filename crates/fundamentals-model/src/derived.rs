//! Cross-sectional derived features for the fundamentals model.
//!
//! All statistics are computed over one snapshot's covered universe.
//! Missing inputs stay missing through the pipeline except where the
//! composite definition says a term defaults to 0 (financial health).

use signal_core::stats::{percentile_ranks_opt, zscores_opt, EPS};
use signal_core::FeatureRow;

/// Column-oriented derived features, index-aligned with the input rows
#[derive(Debug, Clone)]
pub struct DerivedFeatures {
    /// 1 / P/E, undefined (None) when P/E is 0 or missing
    pub pe_inverse: Vec<Option<f64>>,
    pub pe_z: Vec<Option<f64>>,
    pub pb_z: Vec<Option<f64>>,
    /// Mean of z(ROE), z(current ratio), z(-debt/equity); missing or
    /// zero-variance terms contribute 0
    pub financial_health_score: Vec<f64>,
    /// Mean of pct(pe_inverse), 1 - pct(P/B), pct(ROE); in [0, 1]
    pub value_score: Vec<Option<f64>>,
    /// Mean of pct(ROE), pct(profit margin), pct(revenue growth)
    pub quality_score: Vec<Option<f64>>,
}

fn column(rows: &[&FeatureRow], get: impl Fn(&FeatureRow) -> Option<f64>) -> Vec<Option<f64>> {
    rows.iter().map(|r| get(r)).collect()
}

fn mean_present(terms: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = terms.iter().filter_map(|t| *t).collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

pub fn derive(rows: &[&FeatureRow]) -> DerivedFeatures {
    let n = rows.len();

    let pe = column(rows, |r| r.pe_ratio);
    let pb = column(rows, |r| r.pb_ratio);
    let roe = column(rows, |r| r.roe);
    let d2e = column(rows, |r| r.debt_to_equity);
    let current_ratio = column(rows, |r| r.current_ratio);
    let margin = column(rows, |r| r.profit_margin);
    let growth = column(rows, |r| r.revenue_growth);

    // 1/PE is undefined at PE = 0, not a divide-by-zero
    let pe_inverse: Vec<Option<f64>> = pe
        .iter()
        .map(|v| v.and_then(|p| if p.abs() < EPS { None } else { Some(1.0 / p) }))
        .collect();

    let pe_z = zscores_opt(&pe);
    let pb_z = zscores_opt(&pb);

    let z_roe = zscores_opt(&roe);
    let z_current = zscores_opt(&current_ratio);
    let neg_d2e: Vec<Option<f64>> = d2e.iter().map(|v| v.map(|x| -x)).collect();
    let z_neg_d2e = zscores_opt(&neg_d2e);
    let financial_health_score: Vec<f64> = (0..n)
        .map(|i| {
            let terms = [
                z_roe[i].unwrap_or(0.0),
                z_current[i].unwrap_or(0.0),
                z_neg_d2e[i].unwrap_or(0.0),
            ];
            terms.iter().sum::<f64>() / terms.len() as f64
        })
        .collect();

    let pct_pe_inverse = percentile_ranks_opt(&pe_inverse);
    let pct_pb = percentile_ranks_opt(&pb);
    let pct_roe = percentile_ranks_opt(&roe);
    let value_score: Vec<Option<f64>> = (0..n)
        .map(|i| {
            mean_present(&[
                pct_pe_inverse[i],
                pct_pb[i].map(|p| 1.0 - p),
                pct_roe[i],
            ])
        })
        .collect();

    let pct_margin = percentile_ranks_opt(&margin);
    let pct_growth = percentile_ranks_opt(&growth);
    let quality_score: Vec<Option<f64>> = (0..n)
        .map(|i| mean_present(&[pct_roe[i], pct_margin[i], pct_growth[i]]))
        .collect();

    DerivedFeatures {
        pe_inverse,
        pe_z,
        pb_z,
        financial_health_score,
        value_score,
        quality_score,
    }
}
