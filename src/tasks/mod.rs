mod researcher;
mod role;
mod visual_director;

pub use researcher::ResearcherTask;
pub use role::RoleTask;
pub use visual_director::VisualDirectorTask;

use crate::models::{Deliverable, SessionContext};
use crate::output::{slugify, write_new, OutputLayout};
use crate::roster::{AgentRole, ToolKind};
use crate::tools::llm::{truncate_chars, ChatModel};
use crate::tools::research::ResearchTool;
use crate::tools::toolbox::{AgentTools, CritiqueImage, GenerateImage, ToolLog, WebResearch};
use crate::tools::visual::VisualTool;
use graph_flow::{Context, GraphError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub const SESSION_KEY: &str = "session_context";
pub const TASK_TIMES_KEY: &str = "task_times";

/// Everything the agent tasks call out to.
pub struct AgencyServices {
    pub chat: Arc<dyn ChatModel>,
    pub research: Arc<ResearchTool>,
    pub visual: Option<Arc<VisualTool>>,
    pub output: OutputLayout,
}

/// The tools `role` is allowed to call, all reporting into `log`.
pub(crate) fn agent_tools(services: &AgencyServices, role: AgentRole, log: &ToolLog) -> AgentTools {
    let profile = role.profile();
    let mut tools = AgentTools::default();
    if profile.allows(ToolKind::Research) {
        tools.research = Some(WebResearch::new(services.research.clone(), log.clone()));
    }
    if let Some(visual) = services.visual.as_ref().filter(|_| profile.allows(ToolKind::Visual)) {
        tools.generate_image = Some(GenerateImage::new(visual.clone(), log.clone()));
        tools.critique_image = Some(CritiqueImage::new(visual.clone(), log.clone()));
    }
    tools
}

pub(crate) async fn load_session(context: &Context) -> Result<SessionContext, GraphError> {
    context
        .get(SESSION_KEY)
        .await
        .ok_or_else(|| GraphError::ContextError("Session context not found".to_string()))
}

/// Stores the session state and the elapsed time for `task_id`.
pub(crate) async fn save_session(
    context: &Context,
    task_id: &str,
    started: Instant,
    session: SessionContext,
) {
    context.set(SESSION_KEY, session).await;

    let elapsed = started.elapsed().as_millis() as u64;
    let mut task_times: HashMap<String, u64> =
        context.get(TASK_TIMES_KEY).await.unwrap_or_default();
    task_times.insert(task_id.to_string(), elapsed);
    context.set(TASK_TIMES_KEY, task_times).await;
}

/// Writes a deliverable to `output/content/` and appends it to the session.
/// A write failure is recorded but keeps the text in the session.
pub(crate) async fn publish(
    output: &OutputLayout,
    session: &mut SessionContext,
    role: AgentRole,
    title: &str,
    content: String,
) -> Option<PathBuf> {
    let stem = format!("{}_{}", session.brief.session_id, slugify(title, 40));
    let body = format!("# {}\n\n_{}_\n\n{}\n", title, role, content.trim());
    let path = match write_new(&output.content_dir(), &stem, "md", body.as_bytes()).await {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("failed to save {}: {}", title, e);
            session.record(
                &role.to_string(),
                crate::models::EntryKind::Failure,
                format!("could not save {title}: {e}"),
            );
            None
        }
    };
    session.deliverables.push(Deliverable {
        speaker: role.to_string(),
        title: title.to_string(),
        content,
        path: path.clone(),
    });
    path
}

/// Prior work handed to the next agent: research findings and earlier
/// deliverables, each clipped so the prompt stays bounded.
pub(crate) fn team_notes(session: &SessionContext) -> String {
    let mut notes = String::new();
    if !session.research.is_empty() {
        notes.push_str("Research findings:\n");
        for report in &session.research {
            let sources = report
                .sources
                .iter()
                .map(|s| s.url.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            notes.push_str(&format!(
                "- {}: {} (sources: {})\n",
                report.query,
                truncate_chars(&report.summary, 1_500),
                sources
            ));
        }
        notes.push('\n');
    }
    for deliverable in &session.deliverables {
        notes.push_str(&format!(
            "{} from {}:\n{}\n\n",
            deliverable.title,
            deliverable.speaker,
            truncate_chars(&deliverable.content, 2_000)
        ));
    }
    for asset in &session.visuals {
        notes.push_str(&format!(
            "Generated image {} for prompt \"{}\". Critique: {}\n",
            asset.image.path.display(),
            asset.image.prompt,
            if asset.critique.is_degraded() {
                "unavailable"
            } else {
                asset.critique.text.as_str()
            }
        ));
    }
    if notes.is_empty() {
        notes.push_str("No prior work yet.\n");
    }
    notes
}
