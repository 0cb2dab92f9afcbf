// Core records: listing summaries/details, canonical listings, score cards, job runs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lightweight record parsed from a search-results page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingSummary {
    pub source_listing_id: String,
    pub url: String,
    pub title: String,
    pub price: f64,
    pub area: f64,
    pub bedrooms: u32,
    pub bathrooms: u32,
    pub parking: u32,
    pub condo_fee: Option<f64>,
    pub property_tax: Option<f64>,
    pub address: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub thumbnail_url: Option<String>,
}

/// Full record for one listing. Built from the detail page, or from the summary alone
/// when the detail fetch failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingDetails {
    pub summary: ListingSummary,
    pub description: String,
    pub images: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub degraded: bool,
}

impl ListingDetails {
    pub fn from_summary(summary: &ListingSummary) -> Self {
        Self {
            summary: summary.clone(),
            description: String::new(),
            images: summary.thumbnail_url.iter().cloned().collect(),
            published_at: None,
            degraded: true,
        }
    }
}

/// Listing in persisted-table shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedListing {
    #[serde(default)]
    pub source: String,
    pub source_listing_id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub area: f64,
    #[serde(default)]
    pub bedrooms: u32,
    #[serde(default)]
    pub bathrooms: u32,
    #[serde(default)]
    pub parking: u32,
    #[serde(default)]
    pub condo_fee: Option<f64>,
    #[serde(default)]
    pub property_tax: Option<f64>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// `None` when area is zero.
    #[serde(default)]
    pub price_per_area: Option<f64>,
}

/// Independent integer contributions; the score is their clamped sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub discount: i32,
    pub area: i32,
    pub bedrooms: i32,
    pub parking: i32,
    pub keywords: i32,
    pub penalties: i32,
    pub time_decay: i32,
}

impl ScoreBreakdown {
    pub fn total(&self) -> i32 {
        self.discount
            + self.area
            + self.bedrooms
            + self.parking
            + self.keywords
            + self.penalties
            + self.time_decay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub score: u8,
    pub breakdown: ScoreBreakdown,
    pub price_per_area: f64,
    pub market_median: f64,
    pub discount_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredListing {
    pub listing: NormalizedListing,
    pub card: ScoreCard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStatus {
    New,
    Viewed,
    Contacted,
    Discarded,
}

impl OpportunityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Viewed => "viewed",
            Self::Contacted => "contacted",
            Self::Discarded => "discarded",
        }
    }

    /// Parses a comma-separated status set, e.g. `"new,viewed"`.
    pub fn parse_set(raw: &str) -> Result<Vec<Self>, ValidationError> {
        let mut out = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let status = part.parse::<Self>()?;
            if !out.contains(&status) {
                out.push(status);
            }
        }
        Ok(out)
    }
}

impl FromStr for OpportunityStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "viewed" => Ok(Self::Viewed),
            "contacted" => Ok(Self::Contacted),
            "discarded" => Ok(Self::Discarded),
            _ => Err(ValidationError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted opportunity joined with its source listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub id: i64,
    pub listing_id: i64,
    pub listing: NormalizedListing,
    pub score: u8,
    pub breakdown: ScoreBreakdown,
    pub price_per_area: f64,
    pub market_median: f64,
    pub discount_pct: f64,
    pub status: OpportunityStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Trigger parameters for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub state: String,
    pub city: String,
    pub neighborhood: String,
    pub max_results: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StorageError::Corrupt(format!("unknown job status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Api,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Api => "api",
        }
    }
}

impl FromStr for TriggerType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            "api" => Ok(Self::Api),
            other => Err(ValidationError::InvalidValue {
                field: "trigger",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRun {
    pub id: i64,
    pub job_name: String,
    pub status: JobStatus,
    pub trigger_type: String,
    pub triggered_by: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub params: serde_json::Value,
    pub stats: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Aggregate counters reported to the caller and stored on the job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub received: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub enrichment_failures: usize,
    /// Candidate URLs that failed before one produced a result.
    #[serde(default)]
    pub candidate_failures: usize,
    pub market_median: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("http error: {0}")]
    HttpError(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[cfg(feature = "browser")]
    #[error("browser error: {0}")]
    Browser(String),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("html parse error: {0}")]
    HtmlParseError(String),
    #[error("missing field: {0}")]
    MissingField(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not found")]
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid status '{0}', expected one of new, viewed, contacted, discarded")]
    InvalidStatus(String),
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),
    #[error("listings must not be empty")]
    EmptyBatch,
    #[error("invalid value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}
