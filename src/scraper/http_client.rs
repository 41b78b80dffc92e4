use crate::config::ScraperConfig;
use crate::error::FetchError;
use rand::seq::IndexedRandom;
use std::time::Duration;
use tracing::debug;

/// Desktop browser identities. The ranking site turns away bot-looking clients.
const BROWSER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

pub struct HttpClient {
    inner: reqwest::Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        let user_agent = config
            .user_agent
            .clone()
            .or_else(|| BROWSER_AGENTS.choose(&mut rand::rng()).map(|s| s.to_string()))
            .unwrap_or_default();

        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .gzip(true)
            .cookie_store(true);
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let inner = builder.build().map_err(FetchError::Client)?;

        Ok(Self { inner, user_agent })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Single GET, no retry. Any non-2xx status is an error.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "ko-KR,ko;q=0.9,en;q=0.8")
            .send()
            .await
            .map_err(|source| FetchError::Request { url: url.to_string(), source })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status });
        }

        resp.text()
            .await
            .map_err(|source| FetchError::Request { url: url.to_string(), source })
    }
}
