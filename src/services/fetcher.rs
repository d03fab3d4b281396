// src/services/fetcher.rs

//! Bulletin page fetching.

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{FetchConfig, Region};
use crate::utils::http;

/// Source of raw bulletin pages, one per region.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the raw HTML of a region's bulletin page.
    async fn fetch_page(&self, region: &Region) -> Result<String>;
}

/// Fetches bulletin pages over HTTP.
pub struct HttpPageSource {
    config: FetchConfig,
    client: reqwest::Client,
}

impl HttpPageSource {
    /// Create a fetcher with its own client built from the config.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = http::create_async_client(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, region: &Region) -> Result<String> {
        let url = self.config.page_url(region)?;
        log::debug!("Fetching {} for region {}", url, region);
        http::fetch_text(&self.client, url.as_str())
            .await
            .map_err(|e| AppError::fetch(region.as_str(), e))
    }
}
