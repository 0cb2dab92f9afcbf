// Walks candidate URLs in preference order until one yields listings
use crate::model::{ListingSummary, ParserError, RunParams, ScraperError};
use crate::parser::ListingParser;
use crate::scraper::candidates::{CandidateBuilder, Location};
use crate::scraper::traits::PageFetcher;

use std::fmt;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] ScraperError),
    #[error(transparent)]
    Parse(#[from] ParserError),
}

#[derive(Debug)]
pub struct CandidateFailure {
    pub url: String,
    pub error: AttemptError,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.url, self.error)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("all {} candidate URLs failed: {}", .attempts.len(), join_failures(.attempts))]
    AllCandidatesFailed { attempts: Vec<CandidateFailure> },
    #[error("cancelled")]
    Cancelled,
}

fn join_failures(attempts: &[CandidateFailure]) -> String {
    attempts.iter().map(|a| a.to_string()).collect::<Vec<_>>().join("; ")
}

/// Result of a fallback walk that reached at least one input.
#[derive(Debug)]
pub struct Walk<I, T, E> {
    /// Empty when every reachable input produced nothing.
    pub items: Vec<T>,
    /// Inputs that failed before the walk stopped.
    pub failures: Vec<(I, E)>,
}

/// Tries each input in order and stops at the first non-empty result. Failures are
/// kept and the walk continues; an input that succeeds with no items is not a failure.
/// `Err` carries every failure when no input succeeded at all.
pub async fn first_non_empty<I, T, E, F, Fut>(
    inputs: impl IntoIterator<Item = I>,
    mut step: F,
) -> Result<Walk<I, T, E>, Vec<(I, E)>>
where
    I: Clone,
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    let mut failures = Vec::new();
    let mut reached = false;

    for input in inputs {
        match step(input.clone()).await {
            Ok(items) if !items.is_empty() => return Ok(Walk { items, failures }),
            Ok(_) => reached = true,
            Err(e) => failures.push((input, e)),
        }
    }

    if reached || failures.is_empty() {
        Ok(Walk {
            items: Vec::new(),
            failures,
        })
    } else {
        Err(failures)
    }
}

/// Listings from the winning candidate plus the candidates that failed on the way.
#[derive(Debug, Default)]
pub struct Collection {
    pub summaries: Vec<ListingSummary>,
    pub failures: Vec<CandidateFailure>,
}

pub struct ListingCollector {
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn ListingParser>,
    candidates: CandidateBuilder,
    timeout: Duration,
    debug_html_dir: Option<PathBuf>,
}

impl ListingCollector {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        parser: Arc<dyn ListingParser>,
        candidates: CandidateBuilder,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            parser,
            candidates,
            timeout,
            debug_html_dir: None,
        }
    }

    pub fn with_debug_html_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_html_dir = dir;
        self
    }

    /// Summaries from the first candidate URL that has any, truncated to `max_results`.
    pub async fn collect(
        &self,
        params: &RunParams,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<Collection, CollectError> {
        let urls = self.candidates.build(&params.state, &params.city, &params.neighborhood);
        info!("Trying {} candidate URLs", urls.len());

        let outcome = first_non_empty(urls, |url: String| async move {
            let attempt = self.attempt(&url, cancel).await;
            if let Err(e) = &attempt {
                if !cancel.is_cancelled() {
                    warn!(url = %url, "candidate failed: {}", e);
                }
            }
            attempt
        })
        .await;

        if cancel.is_cancelled() {
            return Err(CollectError::Cancelled);
        }

        let into_failures = |failures: Vec<(String, AttemptError)>| -> Vec<CandidateFailure> {
            failures
                .into_iter()
                .map(|(url, error)| CandidateFailure { url, error })
                .collect()
        };

        match outcome {
            Ok(walk) => {
                let mut summaries = walk.items;
                if summaries.is_empty() {
                    info!("All reachable candidates returned zero listings");
                }
                summaries.truncate(max_results);
                let location = Location::normalize(&params.state, &params.city, &params.neighborhood);
                for summary in &mut summaries {
                    fill_location(summary, params, &location);
                }
                Ok(Collection {
                    summaries,
                    failures: into_failures(walk.failures),
                })
            }
            Err(failures) => Err(CollectError::AllCandidatesFailed {
                attempts: into_failures(failures),
            }),
        }
    }

    async fn attempt(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<ListingSummary>, AttemptError> {
        if cancel.is_cancelled() {
            return Err(ScraperError::Cancelled.into());
        }
        let html = tokio::select! {
            res = self.fetcher.fetch(url, self.timeout) => res?,
            _ = cancel.cancelled() => return Err(ScraperError::Cancelled.into()),
        };
        let summaries = self.parser.parse_search(&html, url)?;
        if summaries.is_empty() {
            info!(url = %url, "candidate reachable, no listings");
            self.save_debug_html(url, &html);
        } else {
            info!(url = %url, "candidate yielded {} listings", summaries.len());
        }
        Ok(summaries)
    }

    fn save_debug_html(&self, url: &str, html: &str) {
        let Some(folder) = &self.debug_html_dir else {
            return;
        };
        if let Err(e) = fs::create_dir_all(folder) {
            warn!("Failed to create debug folder: {}", e);
            return;
        }
        let name: String = url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let filename = folder.join(format!("debug-{}.html", name.trim_matches('_')));
        if let Err(e) = fs::write(&filename, html) {
            warn!("Failed to write debug HTML: {}", e);
        } else {
            info!("Saved debug HTML: {}", filename.display());
        }
    }
}

fn fill_location(summary: &mut ListingSummary, params: &RunParams, location: &Location) {
    if summary.state.is_empty() {
        summary.state = location.state.clone();
    }
    if summary.city.is_empty() {
        summary.city = params.city.trim().to_string();
    }
    if summary.neighborhood.is_empty() {
        summary.neighborhood = params.neighborhood.trim().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorConfig;
    use crate::parser::HtmlListingParser;
    use crate::scraper::testing::StubFetcher;

    const BASE: &str = "https://listings.example.com/venda/imoveis";

    fn card(id: u32, price: u32) -> String {
        format!(
            r#"<article data-listing-id="{id}"><a href="/imovel/{id}"></a>
               <p data-field="price">R$ {price}</p><span data-field="area">50 m²</span></article>"#
        )
    }

    fn page(cards: &[String]) -> String {
        format!("<html><body>{}</body></html>", cards.join(""))
    }

    fn params() -> RunParams {
        RunParams {
            state: "mg".into(),
            city: "Belo Horizonte".into(),
            neighborhood: "Savassi".into(),
            max_results: None,
            dry_run: false,
        }
    }

    fn collector(fetcher: StubFetcher) -> (ListingCollector, Arc<StubFetcher>) {
        let fetcher = Arc::new(fetcher);
        let parser = Arc::new(HtmlListingParser::new(&SelectorConfig::default()).unwrap());
        let c = ListingCollector::new(
            fetcher.clone(),
            parser,
            CandidateBuilder::new(BASE),
            Duration::from_secs(5),
        );
        (c, fetcher)
    }

    const FIRST: &str = "https://listings.example.com/venda/imoveis/mg+belo-horizonte+savassi/";
    const SECOND: &str = "https://listings.example.com/venda/imoveis/mg+belo-horizonte++savassi/";

    #[tokio::test]
    async fn failed_candidate_falls_through_to_next() {
        let html = page(&[card(1, 400_000), card(2, 500_000), card(3, 600_000)]);
        let (c, fetcher) = collector(StubFetcher::new().with_timeout(FIRST).with_page(SECOND, &html));
        let collection = c.collect(&params(), 2, &CancellationToken::new()).await.unwrap();
        let summaries = &collection.summaries;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].city, "Belo Horizonte");
        assert_eq!(summaries[0].state, "mg");
        assert_eq!(fetcher.calls(), vec![FIRST.to_string(), SECOND.to_string()]);

        assert_eq!(collection.failures.len(), 1);
        assert_eq!(collection.failures[0].url, FIRST);
        assert!(matches!(
            collection.failures[0].error,
            AttemptError::Fetch(ScraperError::Timeout)
        ));
    }

    #[tokio::test]
    async fn first_non_empty_candidate_short_circuits() {
        let html = page(&[card(1, 400_000)]);
        let (c, fetcher) = collector(StubFetcher::new().with_page(FIRST, &html).with_page(SECOND, &html));
        let collection = c.collect(&params(), 10, &CancellationToken::new()).await.unwrap();
        assert_eq!(collection.summaries.len(), 1);
        assert!(collection.failures.is_empty());
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn reachable_but_empty_is_not_an_error() {
        let empty = page(&[]);
        let (c, _) = collector(StubFetcher::new().with_page(FIRST, &empty).with_failure(SECOND));
        let collection = c.collect(&params(), 10, &CancellationToken::new()).await.unwrap();
        assert!(collection.summaries.is_empty());
        assert_eq!(collection.failures.len(), 1);
        assert_eq!(collection.failures[0].url, SECOND);
    }

    #[tokio::test]
    async fn all_candidates_failing_is_fatal() {
        let (c, _) = collector(StubFetcher::new());
        let err = c.collect(&params(), 10, &CancellationToken::new()).await.unwrap_err();
        match err {
            CollectError::AllCandidatesFailed { attempts } => assert_eq!(attempts.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_collection_stops() {
        let (c, fetcher) = collector(StubFetcher::new());
        let token = CancellationToken::new();
        token.cancel();
        let err = c.collect(&params(), 10, &token).await.unwrap_err();
        assert!(matches!(err, CollectError::Cancelled));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn combinator_distinguishes_empty_from_failed() {
        let empty = first_non_empty(vec![1, 2], |_| async { Ok::<Vec<u32>, &str>(vec![]) })
            .await
            .unwrap();
        assert!(empty.items.is_empty());
        assert!(empty.failures.is_empty());

        let failed = first_non_empty(vec![1, 2], |i| async move { Err::<Vec<u32>, _>(i * 10) }).await;
        assert_eq!(failed.unwrap_err(), vec![(1, 10), (2, 20)]);

        let found = first_non_empty(vec![1, 2, 3], |i| async move {
            match i {
                1 => Err("down"),
                2 => Ok(vec![i]),
                _ => Ok(vec![]),
            }
        })
        .await
        .unwrap();
        assert_eq!(found.items, vec![2]);
        assert_eq!(found.failures, vec![(1, "down")]);
    }
}
