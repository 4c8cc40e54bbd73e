//! Rendered-HTML fetching via the Firecrawl scrape API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev/v1/scrape";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("fetch API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("fetcher returned empty HTML for {url:?}")]
    EmptyBody { url: String },
}

/// Anything that can turn a URL into fully rendered HTML.
#[async_trait]
pub trait HtmlFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError>;
}

/// Firecrawl-backed fetcher.
pub struct FirecrawlClient {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: &'a [&'a str],
}

#[derive(Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    data: ScrapeData,
}

#[derive(Deserialize, Default)]
struct ScrapeData {
    #[serde(default)]
    html: String,
}

impl FirecrawlClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HtmlFetcher for FirecrawlClient {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        info!(%url, "fetching HTML");

        let response = self
            .client
            .post(FIRECRAWL_API_URL)
            .bearer_auth(&self.api_key)
            .json(&ScrapeRequest {
                url,
                formats: &["html"],
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let scraped: ScrapeResponse = response.json().await?;
        if scraped.data.html.is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }

        info!(%url, length = scraped.data.html.len(), "HTML fetched");
        Ok(scraped.data.html)
    }
}
