use crate::config::Config;
use crate::error::ProviderError;
use crate::tools::toolbox::AgentTools;
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::prelude::*;
use rig::providers::openai;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SUMMARY_PREAMBLE: &str = "Summarize the following text for research purposes, maintaining key insights and factual information. Mention the source URLs the facts come from.";
const COMBINE_PREAMBLE: &str =
    "Create a comprehensive summary from these research summaries. Keep the source URLs they cite.";

/// Tool rounds an agent may take before it has to answer.
const MAX_TOOL_TURNS: usize = 4;

/// Chat completion: system preamble plus one user prompt.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, ProviderError>;

    /// Like `complete`, with `tools` offered to the model.
    async fn complete_with_tools(
        &self,
        preamble: &str,
        prompt: &str,
        _tools: &AgentTools,
    ) -> Result<String, ProviderError> {
        self.complete(preamble, prompt).await
    }
}

pub struct OpenAiChat {
    client: openai::Client,
    model: String,
    temperature: f64,
    timeout: Duration,
}

impl OpenAiChat {
    pub fn new(api_key: &str, model: &str, temperature: f64, timeout: Duration) -> Self {
        Self {
            client: openai::Client::new(api_key),
            model: model.to_string(),
            temperature,
            timeout,
        }
    }

    pub fn for_agents(config: &Config) -> Self {
        Self::new(&config.openai_api_key, &config.chat_model, 0.7, config.llm_timeout)
    }

    pub fn for_summaries(config: &Config) -> Self {
        Self::new(&config.openai_api_key, &config.summary_model, 0.1, config.llm_timeout)
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, ProviderError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(preamble)
            .temperature(self.temperature)
            .build();

        debug!(model = %self.model, prompt_chars = prompt.len(), "sending completion");
        let response = tokio::time::timeout(self.timeout, agent.prompt(prompt))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
            .map_err(|e| ProviderError::Rejected(format!("Prompt error: {}", e)))?;

        non_empty(response)
    }

    async fn complete_with_tools(
        &self,
        preamble: &str,
        prompt: &str,
        tools: &AgentTools,
    ) -> Result<String, ProviderError> {
        if tools.is_empty() {
            return self.complete(preamble, prompt).await;
        }
        let mut builder = self
            .client
            .agent(&self.model)
            .preamble(preamble)
            .temperature(self.temperature);
        if let Some(tool) = &tools.research {
            builder = builder.tool(tool.clone());
        }
        if let Some(tool) = &tools.generate_image {
            builder = builder.tool(tool.clone());
        }
        if let Some(tool) = &tools.critique_image {
            builder = builder.tool(tool.clone());
        }
        let agent = builder.build();

        // Each tool round is another model call plus the tool's own work.
        let limit = self.timeout.saturating_mul(MAX_TOOL_TURNS as u32 + 1);
        debug!(model = %self.model, tools = ?tools.names(), "sending completion with tools");
        let response = tokio::time::timeout(limit, agent.prompt(prompt).multi_turn(MAX_TOOL_TURNS))
            .await
            .map_err(|_| ProviderError::Timeout(limit))?
            .map_err(|e| ProviderError::Rejected(format!("Prompt error: {}", e)))?;

        non_empty(response)
    }
}

fn non_empty(response: String) -> Result<String, ProviderError> {
    if response.trim().is_empty() {
        return Err(ProviderError::Empty);
    }
    Ok(response)
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, query: &str, content: &str) -> Result<String, ProviderError>;
}

/// Map-reduce summarizer: long input is summarized chunk by chunk and the
/// partial summaries are combined.
pub struct LlmSummarizer {
    chat: Arc<dyn ChatModel>,
    chunk_chars: usize,
}

impl LlmSummarizer {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            chat,
            chunk_chars: 15_000,
        }
    }

    #[cfg(test)]
    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, query: &str, content: &str) -> Result<String, ProviderError> {
        let chunks = chunk_text(content, self.chunk_chars);
        if chunks.len() <= 1 {
            let prompt = format!("Research topic: {query}\n\n{content}");
            return self.chat.complete(SUMMARY_PREAMBLE, &prompt).await;
        }

        let mut partials = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            debug!(chunk = i + 1, total = chunks.len(), "summarizing chunk");
            let prompt = format!("Research topic: {query}\n\n{chunk}");
            partials.push(self.chat.complete(SUMMARY_PREAMBLE, &prompt).await?);
        }

        let combined = partials.join("\n\n");
        if combined.chars().count() > self.chunk_chars {
            let prompt = format!("Research topic: {query}\n\n{combined}");
            return self.chat.complete(COMBINE_PREAMBLE, &prompt).await;
        }
        Ok(combined)
    }
}

/// Splits on char boundaries into pieces of at most `max_chars` characters.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

/// Cuts `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedChat;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chunking_respects_char_boundaries() {
        assert_eq!(chunk_text("abcdef", 4), vec!["abcd", "ef"]);
        assert_eq!(chunk_text("abcd", 4), vec!["abcd"]);
        assert_eq!(chunk_text("", 4), Vec::<&str>::new());
        assert_eq!(chunk_text("ééé", 2), vec!["éé", "é"]);
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[tokio::test]
    async fn short_content_is_one_call() {
        let chat = Arc::new(ScriptedChat::always("summary"));
        let summarizer = LlmSummarizer::new(chat.clone());
        let out = summarizer.summarize("bikes", "short text").await.unwrap();
        assert_eq!(out, "summary");
        let calls = chat.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.contains("Research topic: bikes"));
    }

    #[tokio::test]
    async fn long_content_is_summarized_per_chunk_then_combined() {
        let chat = Arc::new(ScriptedChat::always("0123456789"));
        let summarizer = LlmSummarizer::new(chat.clone()).with_chunk_chars(15);
        // 3 chunks -> 3 partial summaries of 10 chars -> combined 34 chars > 15
        let out = summarizer
            .summarize("bikes", &"x".repeat(40))
            .await
            .unwrap();
        assert_eq!(out, "0123456789");
        let calls = chat.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3].0, COMBINE_PREAMBLE);
    }

    #[tokio::test]
    async fn chunk_failure_propagates() {
        let summarizer = LlmSummarizer::new(Arc::new(ScriptedChat::failing())).with_chunk_chars(5);
        let err = summarizer.summarize("q", "abcdefghij").await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }
}
