use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Startup configuration problems. Fatal: the process exits before any agent runs.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing required API keys: {}", .0.join(", "))]
    MissingKeys(Vec<&'static str>),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Failure of a single call to an external provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider refused the request (HTTP {status}), check the API key or quota")]
    Quota { status: u16 },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("failed to parse response: {0}")]
    Decode(String),

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("provider returned no content")]
    Empty,
}

impl ProviderError {
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(timeout)
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }

    /// Maps a non-success status to the matching variant.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            code @ (401 | 402 | 403 | 429) => ProviderError::Quota { status: code },
            code => ProviderError::Status {
                status: code,
                body: truncate_body(body),
            },
        }
    }
}

fn truncate_body(mut body: String) -> String {
    const MAX: usize = 300;
    if body.len() > MAX {
        let mut cut = MAX;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

/// Why one fetcher could not produce text for one URL. Any of these moves
/// the fetch chain on to its next fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("page had no readable text")]
    NoText,
}

#[derive(Debug, Error)]
pub enum ResearchFailure {
    #[error("research query is empty")]
    EmptyQuery,

    #[error("no search results or page content for {query:?}: {reason}")]
    NoContent { query: String, reason: String },

    #[error("failed to write research report: {0}")]
    Persist(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum VisualFailure {
    #[error("creative brief is empty")]
    EmptyBrief,

    #[error("image generation did not finish within {0:?}")]
    Timeout(Duration),

    #[error("image generation failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("failed to save generated image: {0}")]
    Persist(#[source] std::io::Error),

    #[error("cannot read image {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not an image from this session")]
    ForeignImage(PathBuf),
}

/// An agent tool call that never produced an answer.
#[derive(Debug, Error)]
#[error("{tool} call failed: {message}")]
pub struct ToolCallError {
    pub tool: &'static str,
    pub message: String,
}
