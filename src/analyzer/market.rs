use crate::model::NormalizedListing;
use serde::Serialize;

/// Batch-scoped market snapshot. Only listings collected in the same run contribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MarketStats {
    pub median_price_per_area: f64,
    pub sample_size: usize,
}

pub struct MarketAnalyzer;

impl MarketAnalyzer {
    pub fn batch_stats(listings: &[NormalizedListing]) -> MarketStats {
        let values: Vec<f64> = listings.iter().filter_map(|l| l.price_per_area).collect();
        MarketStats {
            median_price_per_area: Self::median(&values).unwrap_or(0.0),
            sample_size: values.len(),
        }
    }

    /// Middle value, or the mean of the two middle values for even counts.
    pub fn median(values: &[f64]) -> Option<f64> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            Some(sorted[mid])
        } else {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        }
    }
}
