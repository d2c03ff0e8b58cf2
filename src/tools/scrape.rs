use crate::error::{FetchError, ProviderError};
use crate::models::{BrowserlessContentRequest, FetchStatus, ScrapedContent};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; Agentcy/2.0)";

/// One way of turning a URL into readable text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Ordered fetchers, tried once each until one returns text.
#[derive(Clone)]
pub struct FetchChain {
    fetchers: Vec<Arc<dyn PageFetcher>>,
}

impl FetchChain {
    pub fn new(fetchers: Vec<Arc<dyn PageFetcher>>) -> Self {
        Self { fetchers }
    }

    pub fn names(&self) -> Vec<&str> {
        self.fetchers.iter().map(|f| f.name()).collect()
    }

    pub async fn fetch(&self, url: &str) -> ScrapedContent {
        let mut attempts = Vec::with_capacity(self.fetchers.len());
        for fetcher in &self.fetchers {
            match fetcher.fetch(url).await {
                Ok(text) => {
                    debug!(url, via = fetcher.name(), chars = text.len(), "fetched page");
                    return ScrapedContent {
                        url: url.to_string(),
                        text,
                        status: FetchStatus::Fetched {
                            via: fetcher.name().to_string(),
                        },
                    };
                }
                Err(e) => {
                    warn!(url, via = fetcher.name(), "fetch failed: {}", e);
                    attempts.push(format!("{}: {}", fetcher.name(), e));
                }
            }
        }
        ScrapedContent {
            url: url.to_string(),
            text: String::new(),
            status: FetchStatus::Failed { attempts },
        }
    }
}

/// Headless Chrome rendering through browserless.io.
pub struct BrowserlessFetcher {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl BrowserlessFetcher {
    pub fn new(http: reqwest::Client, api_key: &str, base_url: &str, timeout: Duration) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl PageFetcher for BrowserlessFetcher {
    fn name(&self) -> &str {
        "browserless"
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        check_url(url)?;
        let response = self
            .http
            .post(format!("{}/content", self.base_url))
            .query(&[("token", self.api_key.as_str())])
            .header("Cache-Control", "no-cache")
            .json(&BrowserlessContentRequest {
                url: url.to_string(),
            })
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;
        read_page(response, self.timeout).await
    }
}

/// Plain GET from this process.
pub struct DirectFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl DirectFetcher {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl PageFetcher for DirectFetcher {
    fn name(&self) -> &str {
        "direct"
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        check_url(url)?;
        let response = self
            .http
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;
        read_page(response, self.timeout).await
    }
}

fn check_url(url: &str) -> Result<(), FetchError> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(FetchError::InvalidUrl(url.to_string())),
    }
}

async fn read_page(response: reqwest::Response, timeout: Duration) -> Result<String, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(status, body).into());
    }
    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("html"))
        .unwrap_or(true);
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::from_reqwest(e, timeout))?;

    let text = if is_html { html_to_text(&body) } else { normalize_whitespace(&body) };
    if text.is_empty() {
        return Err(FetchError::NoText);
    }
    Ok(text)
}

/// Markdown rendering of an HTML page with blank-line runs collapsed.
pub fn html_to_text(html: &str) -> String {
    let converted = match htmd::convert(html) {
        Ok(markdown) => markdown,
        Err(e) => {
            debug!("html conversion failed, using raw body: {}", e);
            html.to_string()
        }
    };
    normalize_whitespace(&converted)
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves fixed text per URL; any other URL fails with HTTP 500.
    pub struct StubFetcher {
        pub name: &'static str,
        pub pages: HashMap<String, String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        pub fn new(name: &'static str, pages: &[(&str, &str)]) -> Self {
            Self {
                name,
                pages: pages
                    .iter()
                    .map(|(u, t)| (u.to_string(), t.to_string()))
                    .collect(),
                calls: Mutex::new(vec![]),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.pages.get(url).cloned().ok_or_else(|| {
                FetchError::Provider(ProviderError::Status {
                    status: 500,
                    body: String::new(),
                })
            })
        }
    }
}
