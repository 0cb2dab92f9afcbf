// Batch ingestion: validates external payloads and upserts scored listings one by one
use crate::analyzer::scoring::{clamp_score, discount_pct};
use crate::model::{NormalizedListing, ScoreBreakdown, ScoreCard, ScoredListing, StorageError, ValidationError};
use crate::normalizer::price_per_area;
use crate::storage::SqliteStorage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid batch: {0}")]
    Validation(#[from] ValidationError),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Payload accepted from out-of-process crawlers.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestBatch {
    pub source: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default)]
    pub scraped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub market_median: f64,
    pub listings: Vec<IngestListing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestListing {
    #[serde(flatten)]
    pub listing: NormalizedListing,
    pub score: i64,
    #[serde(default)]
    pub score_breakdown: ScoreBreakdown,
    #[serde(default)]
    pub discount_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub received: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

impl IngestBatch {
    pub fn from_json(raw: &str) -> Result<Self, IngestError> {
        let batch: IngestBatch = serde_json::from_str(raw)?;
        batch.validate()?;
        Ok(batch)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source.trim().is_empty() {
            return Err(ValidationError::EmptyField("source"));
        }
        if self.listings.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        Ok(())
    }

    /// Fills batch-level defaults into each listing and builds its score card.
    pub fn into_scored(self) -> Vec<ScoredListing> {
        let IngestBatch {
            source,
            city,
            neighborhood,
            market_median,
            listings,
            ..
        } = self;

        listings
            .into_iter()
            .map(|item| {
                let mut listing = item.listing;
                if listing.source.trim().is_empty() {
                    listing.source = source.clone();
                }
                if listing.city.is_empty() {
                    listing.city = city.clone();
                }
                if listing.neighborhood.is_empty() {
                    listing.neighborhood = neighborhood.clone();
                }
                if listing.price_per_area.is_none() {
                    listing.price_per_area = price_per_area(listing.price, listing.area);
                }
                let card = ScoreCard {
                    score: clamp_score(item.score.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
                    breakdown: item.score_breakdown,
                    price_per_area: listing.price_per_area.unwrap_or(0.0),
                    market_median,
                    discount_pct: item
                        .discount_pct
                        .unwrap_or_else(|| discount_pct(listing.price_per_area, market_median)),
                };
                ScoredListing { listing, card }
            })
            .collect()
    }
}

pub fn ingest_batch(storage: &SqliteStorage, batch: IngestBatch) -> Result<IngestReport, IngestError> {
    batch.validate()?;
    info!(
        "Ingesting {} listings from {} (scraped_at: {:?})",
        batch.listings.len(),
        batch.source,
        batch.scraped_at
    );
    Ok(ingest_scored(storage, &batch.into_scored(), Utc::now()))
}

/// Upserts sequentially. A failing item is logged and counted; the rest still go in.
pub fn ingest_scored(storage: &SqliteStorage, items: &[ScoredListing], now: DateTime<Utc>) -> IngestReport {
    let mut report = IngestReport {
        received: items.len(),
        ..Default::default()
    };

    for item in items {
        let result = check_listing(&item.listing)
            .map_err(StorageError::from)
            .and_then(|_| storage.upsert_listing_at(item, now));
        match result {
            Ok(true) => report.inserted += 1,
            Ok(false) => report.updated += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    source_listing_id = %item.listing.source_listing_id,
                    "Skipping listing: {}",
                    e
                );
            }
        }
    }

    info!(
        "Ingested {}: {} new, {} updated, {} failed",
        report.received, report.inserted, report.updated, report.failed
    );
    report
}

fn check_listing(listing: &NormalizedListing) -> Result<(), ValidationError> {
    if listing.source_listing_id.trim().is_empty() {
        return Err(ValidationError::EmptyField("source_listing_id"));
    }
    if listing.url.trim().is_empty() {
        return Err(ValidationError::EmptyField("url"));
    }
    if !listing.price.is_finite() || listing.price < 0.0 {
        return Err(ValidationError::InvalidValue {
            field: "price",
            value: listing.price.to_string(),
        });
    }
    Ok(())
}
