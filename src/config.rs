use crate::error::ConfigurationError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";
pub const BROWSERLESS_BASE: &str = "https://chrome.browserless.io";
pub const REPLICATE_BASE: &str = "https://api.replicate.com";

const REQUIRED_KEYS: [&str; 2] = ["OPENAI_API_KEY", "SERPER_API_KEY"];

/// Provider base URLs. Overridden in tests to point at mock servers.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub serper: String,
    pub browserless: String,
    pub replicate: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            serper: SERPER_ENDPOINT.to_string(),
            browserless: BROWSERLESS_BASE.to_string(),
            replicate: REPLICATE_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub serper_api_key: String,
    pub browserless_api_key: Option<String>,
    pub replicate_api_token: Option<String>,
    pub chat_model: String,
    pub summary_model: String,
    pub output_dir: PathBuf,
    pub max_sources: usize,
    /// Upper bound, in characters, on page text sent to the summarizer.
    pub content_budget: usize,
    pub request_timeout: Duration,
    pub llm_timeout: Duration,
    pub generation_timeout: Duration,
    pub critique_timeout: Duration,
    pub poll_interval: Duration,
    pub endpoints: Endpoints,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<&'static str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| get(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigurationError::MissingKeys(missing));
        }

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY").unwrap_or_default(),
            serper_api_key: get("SERPER_API_KEY").unwrap_or_default(),
            browserless_api_key: get("BROWSERLESS_API_KEY"),
            replicate_api_token: get("REPLICATE_API_TOKEN"),
            chat_model: get("AGENTCY_CHAT_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            summary_model: get("AGENTCY_SUMMARY_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            output_dir: get("AGENTCY_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("output")),
            max_sources: parse_or("AGENTCY_MAX_SOURCES", get("AGENTCY_MAX_SOURCES"), 5)?,
            content_budget: 24_000,
            request_timeout: Duration::from_secs(parse_or(
                "AGENTCY_REQUEST_TIMEOUT_SECS",
                get("AGENTCY_REQUEST_TIMEOUT_SECS"),
                60,
            )?),
            llm_timeout: Duration::from_secs(120),
            generation_timeout: Duration::from_secs(parse_or(
                "AGENTCY_GENERATION_TIMEOUT_SECS",
                get("AGENTCY_GENERATION_TIMEOUT_SECS"),
                300,
            )?),
            critique_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            endpoints: Endpoints::default(),
        })
    }

    pub fn visual_enabled(&self) -> bool {
        self.replicate_api_token.is_some()
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigurationError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigurationError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })?;
    if value <= T::default() {
        return Err(ConfigurationError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
