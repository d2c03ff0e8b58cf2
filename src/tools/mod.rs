pub mod llm;
pub mod replicate;
pub mod research;
pub mod scrape;
pub mod serper;
pub mod toolbox;
pub mod visual;

use crate::config::Config;
use crate::output::OutputLayout;
use anyhow::{Context, Result};
use llm::{ChatModel, LlmSummarizer, OpenAiChat};
use replicate::{ReplicateClient, ReplicateImageCritic, ReplicateImageGenerator};
use research::{ResearchSettings, ResearchTool};
use scrape::{BrowserlessFetcher, DirectFetcher, PageFetcher};
use serper::SerperSearch;
use std::sync::Arc;
use std::time::Duration;
use visual::{VisualSettings, VisualTool};

pub fn http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("failed to build HTTP client")
}

/// Browserless first when a key is configured, then a direct GET.
pub fn fetch_chain(config: &Config, http: &reqwest::Client) -> Vec<Arc<dyn PageFetcher>> {
    let mut chain: Vec<Arc<dyn PageFetcher>> = Vec::new();
    if let Some(key) = &config.browserless_api_key {
        chain.push(Arc::new(BrowserlessFetcher::new(
            http.clone(),
            key,
            &config.endpoints.browserless,
            config.request_timeout,
        )));
    }
    chain.push(Arc::new(DirectFetcher::new(http.clone(), config.request_timeout)));
    chain
}

pub fn research_tool(
    config: &Config,
    http: &reqwest::Client,
    output: &OutputLayout,
) -> ResearchTool {
    let search = SerperSearch::new(
        http.clone(),
        &config.serper_api_key,
        &config.endpoints.serper,
        config.request_timeout,
    );
    let summary_model: Arc<dyn ChatModel> = Arc::new(OpenAiChat::for_summaries(config));
    ResearchTool::new(
        Arc::new(search),
        fetch_chain(config, http),
        Arc::new(LlmSummarizer::new(summary_model)),
        output.clone(),
        ResearchSettings {
            max_sources: config.max_sources,
            content_budget: config.content_budget,
        },
    )
}

/// `None` when no Replicate token is configured.
pub fn visual_tool(
    config: &Config,
    http: &reqwest::Client,
    output: &OutputLayout,
    session_id: &str,
) -> Option<VisualTool> {
    let token = config.replicate_api_token.as_deref()?;
    let client = ReplicateClient::new(
        http.clone(),
        token,
        &config.endpoints.replicate,
        config.poll_interval,
        config.request_timeout,
    );
    Some(VisualTool::new(
        Arc::new(ReplicateImageGenerator::new(client.clone(), config.generation_timeout)),
        Arc::new(ReplicateImageCritic::new(client, config.critique_timeout)),
        output.clone(),
        session_id,
        VisualSettings {
            generation_timeout: config.generation_timeout,
            critique_timeout: config.critique_timeout,
            cancel_grace: config.request_timeout + Duration::from_secs(1),
            ..VisualSettings::default()
        },
    ))
}
