pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::error::FetchError;
use crate::models::{Period, Segment};
use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use self::http_client::HttpClient;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable ranking source: raw markup for one (period, segment).
#[async_trait]
pub trait RankingSource: Send + Sync {
    async fn fetch(&self, period: Period, segment: Segment) -> Result<String, FetchError>;

    /// Origin that relative links in the markup resolve against.
    fn base_url(&self) -> &Url;
}

// ── danawa scraper ────────────────────────────────────────────────────────────

pub struct DanawaScraper {
    client: HttpClient,
    base_url: Url,
    ranking_path: String,
}

impl DanawaScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        let client = HttpClient::new(config)?;
        debug!("Ranking client identity: {}", client.user_agent());
        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
            ranking_path: config.ranking_path.clone(),
        })
    }

    /// e.g. 2024-03 / domestic → /auto/?Month=2024-03-00&Nation=domestic&Tab=Model&Work=record
    pub fn ranking_url(&self, period: Period, segment: Segment) -> Result<Url, FetchError> {
        let mut url = self.base_url.join(&self.ranking_path)?;
        url.query_pairs_mut()
            .clear()
            .append_pair("Month", &period.source_token())
            .append_pair("Nation", segment.as_str())
            .append_pair("Tab", "Model")
            .append_pair("Work", "record");
        Ok(url)
    }
}

#[async_trait]
impl RankingSource for DanawaScraper {
    async fn fetch(&self, period: Period, segment: Segment) -> Result<String, FetchError> {
        let url = self.ranking_url(period, segment)?;
        info!("Fetching {} {} ranking ({})", period, segment, url);

        let html = self.client.get_text(url.as_str()).await?;
        debug!("{} {}: {} bytes of markup", period, segment, html.len());
        Ok(html)
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }
}
