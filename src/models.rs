use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchHits {
    pub results: Vec<SearchResult>,
    pub related_queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchStatus {
    Fetched { via: String },
    Failed { attempts: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub url: String,
    pub text: String,
    pub status: FetchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceOrigin {
    Fetched { via: String },
    Snippet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub origin: SourceOrigin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub query: String,
    pub summary: String,
    pub sources: Vec<Source>,
    pub related_queries: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

impl ResearchReport {
    pub fn to_markdown(&self) -> String {
        render_report(
            &self.query,
            &self.summary,
            &self.sources,
            &self.related_queries,
            self.created_at,
        )
    }
}

fn render_report(
    query: &str,
    summary: &str,
    sources: &[Source],
    related_queries: &[String],
    created_at: DateTime<Utc>,
) -> String {
    let mut out = format!(
        "# Research Report: {}\n\nGenerated on: {}\n\n## Summary\n\n{}\n\n## Sources\n\n",
        query,
        created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.trim()
    );
    for (i, source) in sources.iter().enumerate() {
        let origin = match &source.origin {
            SourceOrigin::Fetched { via } => format!("fetched via {via}"),
            SourceOrigin::Snippet => "search snippet only".to_string(),
        };
        out.push_str(&format!(
            "{}. [{}]({}) ({})\n",
            i + 1,
            source.title,
            source.url,
            origin
        ));
    }
    if !related_queries.is_empty() {
        out.push_str("\n## Related Research Areas\n\n");
        for related in related_queries {
            out.push_str(&format!("- {related}\n"));
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleParams {
    pub style: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl Default for StyleParams {
    fn default() -> Self {
        Self {
            style: Some("professional advertising photography, high detail".to_string()),
            negative_prompt: Some("text, watermark, blurry, distorted".to_string()),
            width: 1024,
            height: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub brief: String,
    pub style: StyleParams,
}

impl ImageRequest {
    pub fn prompt(&self) -> String {
        match &self.style.style {
            Some(style) if !style.trim().is_empty() => {
                format!("{}. Style: {}", self.brief.trim(), style.trim())
            }
            _ => self.brief.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub provider: String,
    pub model: String,
    pub prediction_id: Option<String>,
    pub source_url: Option<String>,
}

/// Image bytes as returned by a generator, before they are saved.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub bytes: Vec<u8>,
    pub extension: String,
    pub metadata: ProviderMetadata,
}

impl ImageArtifact {
    pub fn mime_type(&self) -> &'static str {
        match self.extension.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "webp" => "image/webp",
            _ => "image/png",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub path: PathBuf,
    pub prompt: String,
    pub metadata: ProviderMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CritiqueStatus {
    Complete,
    Degraded { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCritique {
    pub image_path: PathBuf,
    pub text: String,
    pub suggested_revisions: Vec<String>,
    pub rating: Option<u8>,
    pub status: CritiqueStatus,
}

impl ImageCritique {
    pub fn degraded(image_path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            image_path,
            text: String::new(),
            suggested_revisions: Vec::new(),
            rating: None,
            status: CritiqueStatus::Degraded {
                reason: reason.into(),
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.status, CritiqueStatus::Degraded { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualAsset {
    pub image: GeneratedImage,
    pub critique: ImageCritique,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBrief {
    pub session_id: String,
    pub brand: String,
    pub objective: String,
}

impl SessionBrief {
    pub fn project_brief(&self) -> String {
        format!(
            r#"CREATIVE PROJECT BRIEF

Brand: {}
Objective: {}

Project Requirements:
1. Conduct comprehensive research on the market, competitors, and target audience
2. Develop strategic positioning and messaging framework
3. Create compelling copy and content
4. Generate supporting visual concepts and imagery
5. Design comprehensive marketing and media strategy
6. Ensure all deliverables align with creative excellence standards

Expected Deliverables:
- Research report with market insights
- Strategic brief with positioning and messaging
- Creative copy and content recommendations
- Visual concepts and generated imagery
- Marketing campaign strategy
- Media planning and channel recommendations
- Final creative direction and implementation guide"#,
            self.brand, self.objective
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub speaker: String,
    pub title: String,
    pub content: String,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Message,
    ToolCall,
    Failure,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub at: DateTime<Utc>,
    pub speaker: String,
    pub kind: EntryKind,
    pub content: String,
}

/// State carried between agent turns in the graph context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub brief: SessionBrief,
    pub research: Vec<ResearchReport>,
    pub visuals: Vec<VisualAsset>,
    pub deliverables: Vec<Deliverable>,
    pub transcript: Vec<TranscriptEntry>,
}

impl SessionContext {
    pub fn new(brief: SessionBrief) -> Self {
        Self {
            brief,
            research: vec![],
            visuals: vec![],
            deliverables: vec![],
            transcript: vec![],
        }
    }

    pub fn record(&mut self, speaker: &str, kind: EntryKind, content: impl Into<String>) {
        self.transcript.push(TranscriptEntry {
            at: Utc::now(),
            speaker: speaker.to_string(),
            kind,
            content: content.into(),
        });
    }

    #[cfg(test)]
    pub fn deliverable(&self, title: &str) -> Option<&Deliverable> {
        self.deliverables.iter().find(|d| d.title == title)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.transcript
            .iter()
            .filter(|e| matches!(e.kind, EntryKind::Failure | EntryKind::Degraded))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub context: SessionContext,
    pub task_times: HashMap<String, u64>,
    pub total_time_ms: u64,
    pub transcript_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerperSearchRequest {
    pub q: String,
    pub num: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerperSearchResponse {
    #[serde(default)]
    pub organic: Vec<SerperOrganic>,
    #[serde(default)]
    pub related_searches: Vec<SerperRelated>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerperOrganic {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerperRelated {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserlessContentRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub version: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Prediction {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }
}
