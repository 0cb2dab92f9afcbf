use crate::model::ScraperError;
use std::time::Duration;

/// Turns a URL into rendered HTML. Implementations must not share cookies or navigation
/// state between concurrent calls.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, ScraperError>;
}
