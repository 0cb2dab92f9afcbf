// One crawl run: collect, enrich, normalize, score, ingest, bracketed by a job-run row
use crate::analyzer::{DefaultScoringPolicy, MarketAnalyzer, ScoringContext, ScoringPolicy};
use crate::config::AppConfig;
use crate::ingest::{IngestReport, ingest_scored};
use crate::model::{RunParams, RunStats, ScoredListing, StorageError, TriggerType, ValidationError};
use crate::normalizer::normalize_all;
use crate::parser::ListingParser;
use crate::scraper::{CandidateBuilder, CollectError, DetailEnricher, ListingCollector, PageFetcher};
use crate::storage::SqliteStorage;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const JOB_NAME: &str = "listing_crawl";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("collection failed: {0}")]
    Collect(#[from] CollectError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("run cancelled")]
    Cancelled,
    #[error("run deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job_run_id: Option<i64>,
    pub dry_run: bool,
    pub stats: RunStats,
    /// Highest score first.
    pub opportunities: Vec<ScoredListing>,
}

pub struct Pipeline {
    config: Arc<AppConfig>,
    collector: ListingCollector,
    enricher: DetailEnricher,
    policy: Arc<dyn ScoringPolicy>,
    storage: Arc<Mutex<SqliteStorage>>,
    deadline: Duration,
}

impl Pipeline {
    pub fn new(
        config: Arc<AppConfig>,
        fetcher: Arc<dyn PageFetcher>,
        parser: Arc<dyn ListingParser>,
        storage: Arc<Mutex<SqliteStorage>>,
    ) -> Self {
        let timeout = config.fetch.timeout();
        let collector = ListingCollector::new(
            fetcher.clone(),
            parser.clone(),
            CandidateBuilder::new(&config.fetch.base_url),
            timeout,
        )
        .with_debug_html_dir(config.fetch.debug_html_dir.as_ref().map(PathBuf::from));
        let enricher = DetailEnricher::new(fetcher, parser, config.enrichment.clone(), timeout);

        Self {
            policy: Arc::new(DefaultScoringPolicy::new(config.scoring.clone())),
            deadline: Duration::from_secs(config.limits.run_deadline_seconds),
            config,
            collector,
            enricher,
            storage,
        }
    }

    #[cfg(test)]
    pub fn with_policy(mut self, policy: Arc<dyn ScoringPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Runs the whole pipeline under the deadline. The job row is always finalized.
    pub async fn run(
        &self,
        params: &RunParams,
        trigger: TriggerType,
        triggered_by: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        if params.city.trim().is_empty() {
            return Err(ValidationError::EmptyField("city").into());
        }

        let started_at = Utc::now();
        let job_id = self.start_job(params, trigger, triggered_by, started_at).await;
        info!(
            run_id = ?job_id,
            "Run started: {}/{}/{} (dry_run: {})",
            params.state, params.city, params.neighborhood, params.dry_run
        );

        let run_token = cancel.child_token();
        let outcome = tokio::select! {
            res = self.execute(params, started_at, &run_token) => res,
            _ = tokio::time::sleep(self.deadline) => {
                run_token.cancel();
                Err(PipelineError::DeadlineExceeded(self.deadline))
            }
        };

        match &outcome {
            Ok(summary) => {
                info!(
                    run_id = ?job_id,
                    "Run completed: {} received, {} new, {} updated, median {:.2}",
                    summary.stats.received,
                    summary.stats.inserted,
                    summary.stats.updated,
                    summary.stats.market_median
                );
                self.finish_job(job_id, Ok(&summary.stats)).await;
            }
            Err(e) => {
                error!(run_id = ?job_id, "Run failed: {}", e);
                self.finish_job(job_id, Err(&e.to_string())).await;
            }
        }

        outcome.map(|summary| RunSummary { job_run_id: job_id, ..summary })
    }

    async fn execute(
        &self,
        params: &RunParams,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let max_results = self.config.limits.effective_max(params.max_results);
        let collection = self
            .collector
            .collect(params, max_results, cancel)
            .await
            .map_err(|e| match e {
                CollectError::Cancelled => PipelineError::Cancelled,
                other => other.into(),
            })?;
        let candidate_failures = collection.failures.len();

        if collection.summaries.is_empty() {
            info!("No listings found for this location");
            return Ok(empty_summary(params.dry_run, candidate_failures));
        }

        let enriched = self.enricher.enrich(collection.summaries, cancel).await;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let listings = normalize_all(&enriched.details, &self.config.source);
        let market = MarketAnalyzer::batch_stats(&listings);
        let ctx = ScoringContext {
            median_price_per_area: market.median_price_per_area,
            as_of,
        };
        info!(
            "Market median {:.2}/m² over {} of {} listings",
            market.median_price_per_area,
            market.sample_size,
            listings.len()
        );

        let mut scored: Vec<ScoredListing> = listings
            .into_iter()
            .map(|listing| {
                let card = self.policy.score(&listing, &ctx);
                ScoredListing { listing, card }
            })
            .collect();
        scored.sort_by(|a, b| b.card.score.cmp(&a.card.score));

        let report = if params.dry_run {
            info!("Dry run: skipping ingestion of {} listings", scored.len());
            IngestReport {
                received: scored.len(),
                ..Default::default()
            }
        } else {
            let storage = self.storage.lock().await;
            ingest_scored(&storage, &scored, Utc::now())
        };

        Ok(RunSummary {
            job_run_id: None,
            dry_run: params.dry_run,
            stats: RunStats {
                received: report.received,
                inserted: report.inserted,
                updated: report.updated,
                failed: report.failed,
                enrichment_failures: enriched.failures,
                candidate_failures,
                market_median: market.median_price_per_area,
            },
            opportunities: scored,
        })
    }

    async fn start_job(
        &self,
        params: &RunParams,
        trigger: TriggerType,
        triggered_by: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> Option<i64> {
        let snapshot = serde_json::to_value(params).unwrap_or_default();
        let storage = self.storage.lock().await;
        match storage.create_job_run(JOB_NAME, trigger, triggered_by, &snapshot, started_at) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record job run start: {}", e);
                None
            }
        }
    }

    async fn finish_job(&self, job_id: Option<i64>, result: Result<&RunStats, &str>) {
        let Some(id) = job_id else {
            return;
        };
        let storage = self.storage.lock().await;
        let written = match result {
            Ok(stats) => serde_json::to_value(stats)
                .map_err(StorageError::from)
                .and_then(|stats| storage.complete_job_run(id, &stats, Utc::now())),
            Err(message) => storage.fail_job_run(id, message, None, Utc::now()),
        };
        if let Err(e) = written {
            warn!(run_id = id, "Failed to finalize job run: {}", e);
        }
    }
}

fn empty_summary(dry_run: bool, candidate_failures: usize) -> RunSummary {
    RunSummary {
        job_run_id: None,
        dry_run,
        stats: RunStats {
            candidate_failures,
            ..Default::default()
        },
        opportunities: Vec::new(),
    }
}
