// Concurrent detail-page enrichment with a fixed ceiling on in-flight fetches
use crate::config::EnrichmentConfig;
use crate::model::{ListingDetails, ListingSummary, ScraperError};
use crate::parser::ListingParser;
use crate::scraper::traits::PageFetcher;

use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct EnrichmentOutcome {
    pub details: Vec<ListingDetails>,
    pub failures: usize,
}

pub struct DetailEnricher {
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn ListingParser>,
    config: EnrichmentConfig,
    timeout: Duration,
}

impl DetailEnricher {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        parser: Arc<dyn ListingParser>,
        config: EnrichmentConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            parser,
            config,
            timeout,
        }
    }

    /// One entry per input summary, in input order. Items whose detail page fails fall
    /// back to their summary data and count towards `failures`.
    pub async fn enrich(&self, summaries: Vec<ListingSummary>, cancel: &CancellationToken) -> EnrichmentOutcome {
        if summaries.is_empty() {
            return EnrichmentOutcome::default();
        }

        let total = summaries.len();
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let results: Mutex<Vec<(usize, ListingDetails, bool)>> = Mutex::new(Vec::with_capacity(total));

        info!("Enriching {} listings ({} at a time)", total, self.config.concurrency.max(1));

        let tasks = summaries.into_iter().enumerate().map(|(idx, summary)| {
            let permits = permits.clone();
            let results = &results;
            async move {
                let (details, ok) = match permits.acquire_owned().await {
                    Ok(_permit) => self.enrich_one(&summary, cancel).await,
                    Err(_) => (ListingDetails::from_summary(&summary), false),
                };
                results.lock().await.push((idx, details, ok));
            }
        });
        join_all(tasks).await;

        let mut collected = results.into_inner();
        collected.sort_by_key(|(idx, _, _)| *idx);
        let failures = collected.iter().filter(|(_, _, ok)| !ok).count();
        if failures > 0 {
            warn!("{} of {} detail fetches fell back to summary data", failures, total);
        }

        EnrichmentOutcome {
            details: collected.into_iter().map(|(_, details, _)| details).collect(),
            failures,
        }
    }

    async fn enrich_one(&self, summary: &ListingSummary, cancel: &CancellationToken) -> (ListingDetails, bool) {
        if cancel.is_cancelled() {
            return (ListingDetails::from_summary(summary), false);
        }

        let pause = self.jitter();
        let fetched = tokio::select! {
            res = async {
                tokio::time::sleep(pause).await;
                self.fetcher.fetch(&summary.url, self.timeout).await
            } => res,
            _ = cancel.cancelled() => Err(ScraperError::Cancelled),
        };

        let parsed = fetched
            .map_err(|e| e.to_string())
            .and_then(|html| self.parser.parse_detail(&html, summary).map_err(|e| e.to_string()));

        match parsed {
            Ok(details) => {
                debug!(id = %summary.source_listing_id, "detail enriched");
                (details, true)
            }
            Err(e) => {
                warn!(id = %summary.source_listing_id, url = %summary.url, "detail fetch failed: {}", e);
                (ListingDetails::from_summary(summary), false)
            }
        }
    }

    fn jitter(&self) -> Duration {
        let (min, max) = (self.config.jitter_min_ms, self.config.jitter_max_ms);
        if max == 0 || max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorConfig;
    use crate::parser::HtmlListingParser;
    use crate::scraper::testing::StubFetcher;

    const DETAIL: &str = r#"<html><body><div data-field="description">Reformado</div></body></html>"#;

    fn summary(id: u32) -> ListingSummary {
        ListingSummary {
            source_listing_id: id.to_string(),
            url: format!("https://listings.example.com/imovel/{id}"),
            price: 500_000.0,
            area: 60.0,
            thumbnail_url: Some(format!("https://cdn.example.com/{id}.jpg")),
            ..Default::default()
        }
    }

    fn enricher(fetcher: Arc<StubFetcher>, concurrency: usize) -> DetailEnricher {
        let parser = Arc::new(HtmlListingParser::new(&SelectorConfig::default()).unwrap());
        let config = EnrichmentConfig {
            concurrency,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
        };
        DetailEnricher::new(fetcher, parser, config, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn failures_fall_back_to_summary_data() {
        let fetcher = Arc::new(StubFetcher::new().with_page("https://listings.example.com/imovel/2", DETAIL));
        let outcome = enricher(fetcher, 3)
            .enrich((1..=4).map(summary).collect(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.details.len(), 4);
        assert_eq!(outcome.failures, 3);
        let ids: Vec<_> = outcome.details.iter().map(|d| d.summary.source_listing_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert!(!outcome.details[1].degraded);
        assert_eq!(outcome.details[1].description, "Reformado");
        assert!(outcome.details[0].degraded);
        assert_eq!(outcome.details[0].images, vec!["https://cdn.example.com/1.jpg"]);
    }

    #[tokio::test]
    async fn in_flight_fetches_never_exceed_concurrency() {
        let mut stub = StubFetcher::new().with_delay(Duration::from_millis(20));
        for id in 1..=10 {
            stub = stub.with_page(&format!("https://listings.example.com/imovel/{id}"), DETAIL);
        }
        let fetcher = Arc::new(stub);
        let outcome = enricher(fetcher.clone(), 3)
            .enrich((1..=10).map(summary).collect(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.failures, 0);
        assert_eq!(fetcher.calls().len(), 10);
        assert!(fetcher.peak() <= 3, "peak was {}", fetcher.peak());
        assert!(fetcher.peak() >= 2);
    }

    #[tokio::test]
    async fn cancelled_enrichment_still_returns_every_item() {
        let fetcher = Arc::new(StubFetcher::new());
        let token = CancellationToken::new();
        token.cancel();
        let outcome = enricher(fetcher.clone(), 2)
            .enrich((1..=5).map(summary).collect(), &token)
            .await;

        assert_eq!(outcome.details.len(), 5);
        assert_eq!(outcome.failures, 5);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let fetcher = Arc::new(StubFetcher::new());
        let outcome = enricher(fetcher.clone(), 3).enrich(Vec::new(), &CancellationToken::new()).await;
        assert!(outcome.details.is_empty());
        assert_eq!(outcome.failures, 0);
    }
}
