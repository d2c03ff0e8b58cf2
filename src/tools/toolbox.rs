use crate::error::ToolCallError;
use crate::models::{ImageCritique, ResearchReport, VisualAsset};
use crate::tools::research::ResearchTool;
use crate::tools::visual::{revision_list, VisualTool};
use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// What an agent's tool calls produced, for the task to fold into the session.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    Research(ResearchReport),
    Image(VisualAsset),
    Critique {
        prompt: String,
        critique: ImageCritique,
    },
    Failed {
        call: String,
        error: String,
    },
}

/// Shared between the tools handed to one agent turn.
#[derive(Debug, Clone, Default)]
pub struct ToolLog {
    events: Arc<Mutex<Vec<ToolEvent>>>,
}

impl ToolLog {
    fn push(&self, event: ToolEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    pub fn drain(&self) -> Vec<ToolEvent> {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *events)
    }
}

/// The tools one agent may call during a turn.
#[derive(Clone, Default)]
pub struct AgentTools {
    pub research: Option<WebResearch>,
    pub generate_image: Option<GenerateImage>,
    pub critique_image: Option<CritiqueImage>,
}

impl AgentTools {
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.research.is_some() {
            names.push(WebResearch::NAME);
        }
        if self.generate_image.is_some() {
            names.push(GenerateImage::NAME);
        }
        if self.critique_image.is_some() {
            names.push(CritiqueImage::NAME);
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

#[derive(Clone)]
pub struct WebResearch {
    tool: Arc<ResearchTool>,
    log: ToolLog,
}

impl WebResearch {
    pub fn new(tool: Arc<ResearchTool>, log: ToolLog) -> Self {
        Self { tool, log }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResearchArgs {
    pub query: String,
}

impl Tool for WebResearch {
    const NAME: &'static str = "research";

    type Error = ToolCallError;
    type Args = ResearchArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Search the web, read the top pages and return a sourced summary. \
                          The report is saved for the team."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The web search query"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let tool = self.tool.clone();
        let query = args.query;
        let call = format!("research(\"{query}\")");
        info!("agent called {}", call);

        let outcome = tokio::spawn(async move { tool.research(&query).await })
            .await
            .map_err(|e| ToolCallError {
                tool: Self::NAME,
                message: e.to_string(),
            })?;
        match outcome {
            Ok(report) => {
                let text = report.to_markdown();
                self.log.push(ToolEvent::Research(report));
                Ok(text)
            }
            Err(e) => {
                warn!("{} failed: {}", call, e);
                let answer = format!("Research failed: {e}");
                self.log.push(ToolEvent::Failed {
                    call,
                    error: e.to_string(),
                });
                Ok(answer)
            }
        }
    }
}

#[derive(Clone)]
pub struct GenerateImage {
    tool: Arc<VisualTool>,
    log: ToolLog,
}

impl GenerateImage {
    pub fn new(tool: Arc<VisualTool>, log: ToolLog) -> Self {
        Self { tool, log }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateImageArgs {
    pub brief: String,
}

impl Tool for GenerateImage {
    const NAME: &'static str = "generate_image";

    type Error = ToolCallError;
    type Args = GenerateImageArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Generate a campaign image from a one-sentence creative brief, save \
                          it and return its path with a critique."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "brief": {
                        "type": "string",
                        "description": "Single-sentence description of the image"
                    }
                },
                "required": ["brief"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let tool = self.tool.clone();
        let brief = args.brief;
        let call = format!("generate_image(\"{brief}\")");
        info!("agent called {}", call);

        let outcome = tokio::spawn(async move { tool.generate_and_critique(&brief).await })
            .await
            .map_err(|e| ToolCallError {
                tool: Self::NAME,
                message: e.to_string(),
            })?;
        match outcome {
            Ok((image, critique)) => {
                let mut text = format!(
                    "Image saved to {}\nPrompt: {}\n",
                    image.path.display(),
                    image.prompt
                );
                text.push_str(&describe_critique(&critique));
                self.log.push(ToolEvent::Image(VisualAsset { image, critique }));
                Ok(text)
            }
            Err(e) => {
                warn!("{} failed: {}", call, e);
                let answer = format!("Image generation failed: {e}");
                self.log.push(ToolEvent::Failed {
                    call,
                    error: e.to_string(),
                });
                Ok(answer)
            }
        }
    }
}

#[derive(Clone)]
pub struct CritiqueImage {
    tool: Arc<VisualTool>,
    log: ToolLog,
}

impl CritiqueImage {
    pub fn new(tool: Arc<VisualTool>, log: ToolLog) -> Self {
        Self { tool, log }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CritiqueImageArgs {
    pub image_path: String,
    pub original_prompt: String,
}

impl Tool for CritiqueImage {
    const NAME: &'static str = "critique_image";

    type Error = ToolCallError;
    type Args = CritiqueImageArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Rate an image generated earlier in this session against the prompt \
                          it was made from, with suggested revisions."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "image_path": {
                        "type": "string",
                        "description": "Path of a saved image, as returned by generate_image"
                    },
                    "original_prompt": {
                        "type": "string",
                        "description": "The prompt the image was generated from"
                    }
                },
                "required": ["image_path", "original_prompt"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let tool = self.tool.clone();
        let CritiqueImageArgs {
            image_path,
            original_prompt,
        } = args;
        let call = format!("critique_image(\"{image_path}\")");
        info!("agent called {}", call);

        let prompt = original_prompt.clone();
        let outcome = tokio::spawn(async move {
            tool.critique_image(&PathBuf::from(image_path), &prompt).await
        })
        .await
        .map_err(|e| ToolCallError {
            tool: Self::NAME,
            message: e.to_string(),
        })?;
        match outcome {
            Ok(critique) => {
                let text = describe_critique(&critique);
                self.log.push(ToolEvent::Critique {
                    prompt: original_prompt,
                    critique,
                });
                Ok(text)
            }
            Err(e) => {
                warn!("{} failed: {}", call, e);
                let answer = format!("Critique failed: {e}");
                self.log.push(ToolEvent::Failed {
                    call,
                    error: e.to_string(),
                });
                Ok(answer)
            }
        }
    }
}

fn describe_critique(critique: &ImageCritique) -> String {
    if critique.is_degraded() {
        return "Critique unavailable.\n".to_string();
    }
    let mut text = match critique.rating {
        Some(rating) => format!("Rating: {rating}/10\n"),
        None => String::new(),
    };
    text.push_str(&format!("Critique: {}\n", critique.text));
    if !critique.suggested_revisions.is_empty() {
        text.push_str("Suggested revisions:\n");
        text.push_str(&revision_list(&critique.suggested_revisions));
    }
    text
}
