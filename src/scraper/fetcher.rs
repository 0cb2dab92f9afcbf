use crate::config::FetchConfig;
use crate::model::ScraperError;
use crate::scraper::traits::PageFetcher;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

/// Plain HTTP fetcher for sources that render listings server-side.
/// The client keeps no cookie store, so concurrent fetches share no session state.
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, ScraperError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ScraperError::HttpError(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, ScraperError> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(ScraperError::InvalidResponse(format!("content-type {}", content_type)));
        }

        let body = response.text().await.map_err(map_reqwest_error)?;
        if body.trim().is_empty() {
            return Err(ScraperError::InvalidResponse("empty body".to_string()));
        }
        Ok(body)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ScraperError {
    if err.is_timeout() {
        ScraperError::Timeout
    } else {
        ScraperError::HttpError(err.to_string())
    }
}

#[cfg(feature = "browser")]
pub use browser::BrowserPageFetcher;

#[cfg(feature = "browser")]
mod browser {
    use super::*;
    use headless_chrome::{Browser, LaunchOptions};

    /// Headless Chrome fetcher for client-rendered sources. Each fetch runs in its own
    /// incognito context, which is closed when the fetch ends.
    pub struct BrowserPageFetcher {
        browser: Browser,
        settle_delay: Duration,
    }

    impl BrowserPageFetcher {
        pub fn new(config: &FetchConfig) -> Result<Self, ScraperError> {
            let options = LaunchOptions::default_builder()
                .headless(true)
                .build()
                .map_err(err)?;
            let browser = Browser::new(options).map_err(err)?;
            Ok(Self {
                browser,
                settle_delay: config.settle_delay(),
            })
        }

        fn render(browser: &Browser, url: &str, timeout: Duration, settle: Duration) -> Result<String, ScraperError> {
            let context = browser.new_context().map_err(err)?;
            let tab = context.new_tab().map_err(err)?;
            tab.set_default_timeout(timeout);
            tab.navigate_to(url).map_err(err)?;
            tab.wait_until_navigated().map_err(err)?;
            std::thread::sleep(settle);
            let html = tab.get_content().map_err(err)?;
            let _ = tab.close(true);
            Ok(html)
        }
    }

    fn err(e: impl std::fmt::Display) -> ScraperError {
        ScraperError::Browser(e.to_string())
    }

    #[async_trait::async_trait]
    impl PageFetcher for BrowserPageFetcher {
        async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, ScraperError> {
            let browser = self.browser.clone();
            let url = url.to_string();
            let settle = self.settle_delay;
            let job = tokio::task::spawn_blocking(move || Self::render(&browser, &url, timeout, settle));
            match tokio::time::timeout(timeout + settle, job).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(ScraperError::Browser(join_err.to_string())),
                Err(_) => Err(ScraperError::Timeout),
            }
        }
    }
}
