use crate::model::ScraperError;
use crate::scraper::traits::PageFetcher;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone)]
pub enum StubPage {
    Html(String),
    Fail,
    Timeout,
}

/// Canned pages keyed by URL; unknown URLs fail. Tracks calls and peak concurrency.
#[derive(Default)]
pub struct StubFetcher {
    pages: HashMap<String, StubPage>,
    pub delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), StubPage::Html(html.to_string()));
        self
    }

    pub fn with_failure(mut self, url: &str) -> Self {
        self.pages.insert(url.to_string(), StubPage::Fail);
        self
    }

    pub fn with_timeout(mut self, url: &str) -> Self {
        self.pages.insert(url.to_string(), StubPage::Timeout);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, ScraperError> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = match self.pages.get(url) {
            Some(StubPage::Html(html)) => Ok(html.clone()),
            Some(StubPage::Timeout) => Err(ScraperError::Timeout),
            Some(StubPage::Fail) | None => Err(ScraperError::Status(503)),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
