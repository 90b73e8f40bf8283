use crate::error::AlertError;
use crate::types::{AlertTier, ProfitAnalysis};

/// Minimum estimated profit for a high-profit alert.
pub const HIGH_PROFIT_THRESHOLD: f64 = 50.0;

/// Minimum estimated profit for a good-deal alert.
pub const GOOD_DEAL_THRESHOLD: f64 = 20.0;

/// Classify an estimate into a tier.
///
/// Thresholds are inclusive at 50 and 20, exclusive at 0. No data always
/// means research is required, whatever the profit figure says.
pub fn classify(sample_count: usize, estimated_profit: f64) -> AlertTier {
    if sample_count == 0 {
        return AlertTier::ResearchRequired;
    }
    if estimated_profit >= HIGH_PROFIT_THRESHOLD {
        AlertTier::HighProfit
    } else if estimated_profit >= GOOD_DEAL_THRESHOLD {
        AlertTier::GoodDeal
    } else if estimated_profit > 0.0 {
        AlertTier::DealDetected
    } else {
        AlertTier::ResearchRequired
    }
}

/// Median of an ascending-sorted, non-empty slice.
///
/// Even lengths take the mean of the two middle elements, computed without
/// overflowing for amounts near `f64::MAX`.
fn median_of_sorted(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        let (lo, hi) = (sorted[mid - 1], sorted[mid]);
        lo + (hi - lo) / 2.0
    } else {
        sorted[mid]
    }
}

/// Compute sold-price statistics and a profit tier for a buy price.
///
/// Non-positive or non-finite samples are ignored. Rejects a negative or
/// non-finite buy price.
pub fn analyze(buy_price: f64, samples: &[f64]) -> Result<ProfitAnalysis, AlertError> {
    if !buy_price.is_finite() || buy_price < 0.0 {
        return Err(AlertError::InputValidation(format!(
            "buy price must be a non-negative amount, got {buy_price}"
        )));
    }

    let mut sorted: Vec<f64> = samples
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();

    if sorted.is_empty() {
        return Ok(ProfitAnalysis {
            median: 0.0,
            mean: 0.0,
            min: 0.0,
            max: 0.0,
            sample_count: 0,
            buy_price,
            estimated_profit: 0.0,
            profit_percent: None,
            tier: AlertTier::ResearchRequired,
        });
    }

    sorted.sort_by(f64::total_cmp);

    let count = sorted.len();
    let median = median_of_sorted(&sorted);
    // Running mean stays within [min, max] where a plain sum could overflow
    let mean = sorted
        .iter()
        .enumerate()
        .fold(0.0, |mean, (i, p)| mean + (p - mean) / (i + 1) as f64);
    let estimated_profit = median - buy_price;
    let profit_percent = if buy_price > 0.0 {
        Some(estimated_profit / buy_price * 100.0)
    } else {
        None
    };

    Ok(ProfitAnalysis {
        median,
        mean,
        min: sorted[0],
        max: sorted[count - 1],
        sample_count: count,
        buy_price,
        estimated_profit,
        profit_percent,
        tier: classify(count, estimated_profit),
    })
}
