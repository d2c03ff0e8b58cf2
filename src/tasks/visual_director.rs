use super::{
    agent_tools, load_session, publish, save_session, team_notes, AgencyServices, RoleTask,
};
use crate::models::{
    EntryKind, GeneratedImage, ImageCritique, SessionBrief, SessionContext, VisualAsset,
};
use crate::roster::{AgentRole, ToolKind};
use crate::tools::toolbox::{ToolEvent, ToolLog};
use crate::tools::visual::revision_list;
use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Task, TaskResult};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const BRIEF_MARKER: &str = "IMAGE BRIEF:";

pub struct VisualDirectorTask {
    services: Arc<AgencyServices>,
}

impl VisualDirectorTask {
    pub fn new(services: Arc<AgencyServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Task for VisualDirectorTask {
    fn id(&self) -> &str {
        AgentRole::VisualDirector.task_id()
    }

    #[instrument(skip(self, context))]
    async fn run(&self, context: Context) -> Result<TaskResult, GraphError> {
        let start_time = std::time::Instant::now();
        info!("Starting visual direction task");

        let mut session = load_session(&context).await?;
        let role = AgentRole::VisualDirector;
        let speaker = role.to_string();
        let profile = role.profile();
        let title = RoleTask::deliverable_title(role);

        let prompt = format!(
            "{}\n\nWork so far:\n{}\nWrite the visual creative direction for this campaign. \
             End with one line starting with \"{BRIEF_MARKER}\" followed by a single-sentence \
             description of the key visual to generate.",
            session.brief.project_brief(),
            team_notes(&session)
        );

        let (direction, image_brief) =
            match self.services.chat.complete(&profile.system_prompt, &prompt).await {
                Ok(reply) => {
                    session.record(&speaker, EntryKind::Message, reply.clone());
                    let image_brief = extract_image_brief(&reply)
                        .unwrap_or_else(|| fallback_image_brief(&session.brief));
                    (Some(reply), image_brief)
                }
                Err(e) => {
                    error!("visual direction failed: {}", e);
                    session.record(
                        &speaker,
                        EntryKind::Failure,
                        format!("{title} not produced: {e}"),
                    );
                    (None, fallback_image_brief(&session.brief))
                }
            };

        let mut image_note = None;
        match &self.services.visual {
            Some(visual) if profile.allows(ToolKind::Visual) => {
                session.record(
                    &speaker,
                    EntryKind::ToolCall,
                    format!("generate_and_critique(\"{image_brief}\")"),
                );
                match visual.generate_and_critique(&image_brief).await {
                    Ok((image, critique)) => {
                        info!("Image saved to {}", image.path.display());
                        record_critique(&mut session, &image.path, &critique);
                        image_note = Some(key_visual_note(&image, &critique));
                        session.visuals.push(VisualAsset { image, critique });
                    }
                    Err(e) => {
                        error!("image generation failed: {}", e);
                        session.record(
                            &speaker,
                            EntryKind::Failure,
                            format!("image generation failed: {e}"),
                        );
                    }
                }
            }
            _ => {
                warn!("visual generation unavailable, skipping images");
                session.record(
                    &speaker,
                    EntryKind::Degraded,
                    "image generation skipped: REPLICATE_API_TOKEN not configured",
                );
            }
        }

        let status = match direction {
            Some(direction) => {
                let mut content = direction.trim().to_string();
                if let Some(note) = image_note {
                    content.push_str("\n\n");
                    content.push_str(&note);
                    if let Some(review) = self.review(&mut session, &direction, &note).await {
                        content.push_str("\n\n## Review\n\n");
                        content.push_str(review.trim());
                    }
                }
                publish(&self.services.output, &mut session, role, title, content).await;
                format!("{title} delivered")
            }
            None => format!("{title} missing"),
        };

        save_session(&context, role.task_id(), start_time, session).await;

        Ok(TaskResult::new(Some(status), NextAction::ContinueAndExecute))
    }
}

impl VisualDirectorTask {
    /// A second turn over the generated key visual, with the image tools at
    /// hand for a revised image or another critique.
    async fn review(
        &self,
        session: &mut SessionContext,
        direction: &str,
        note: &str,
    ) -> Option<String> {
        let role = AgentRole::VisualDirector;
        let speaker = role.to_string();
        let log = ToolLog::default();
        let tools = agent_tools(&self.services, role, &log);

        let prompt = format!(
            "{}\n\nYour direction:\n{}\n\n{}\n\nReview the key visual against your direction. \
             If it falls short, call generate_image with a revised brief, or critique_image on a \
             saved image. Close with your recommendation for the final visual.",
            session.brief.project_brief(),
            direction.trim(),
            note
        );
        let reply = self
            .services
            .chat
            .complete_with_tools(&role.profile().system_prompt, &prompt, &tools)
            .await;

        for event in log.drain() {
            match event {
                ToolEvent::Image(asset) => {
                    session.record(
                        &speaker,
                        EntryKind::ToolCall,
                        format!("generate_image(\"{}\")", asset.image.prompt),
                    );
                    record_critique(session, &asset.image.path, &asset.critique);
                    session.visuals.push(asset);
                }
                ToolEvent::Critique { prompt, critique } => {
                    session.record(
                        &speaker,
                        EntryKind::ToolCall,
                        format!(
                            "critique_image(\"{}\", \"{}\")",
                            critique.image_path.display(),
                            prompt
                        ),
                    );
                    let path = critique.image_path.clone();
                    record_critique(session, &path, &critique);
                }
                ToolEvent::Failed { call, error } => {
                    session.record(&speaker, EntryKind::ToolCall, call.clone());
                    let note = format!("{call} failed: {error}");
                    session.record(&speaker, EntryKind::Degraded, note);
                }
                other => warn!("ignoring unexpected tool event {:?}", other),
            }
        }

        match reply {
            Ok(review) => {
                session.record(&speaker, EntryKind::Message, review.clone());
                Some(review)
            }
            Err(e) => {
                warn!("visual review failed: {}", e);
                session.record(
                    &speaker,
                    EntryKind::Degraded,
                    format!("review of the key visual failed: {e}"),
                );
                None
            }
        }
    }
}

fn record_critique(session: &mut SessionContext, path: &Path, critique: &ImageCritique) {
    let speaker = AgentRole::VisualDirector.to_string();
    if critique.is_degraded() {
        warn!("critique unavailable for {}", path.display());
        session.record(
            &speaker,
            EntryKind::Degraded,
            format!("image {} saved without critique", path.display()),
        );
    } else {
        session.record(
            &speaker,
            EntryKind::Message,
            format!("Critique of {}:\n{}", path.display(), critique.text),
        );
    }
}

fn key_visual_note(image: &GeneratedImage, critique: &ImageCritique) -> String {
    let rating = critique
        .rating
        .map(|r| format!("{r}/10"))
        .unwrap_or_else(|| "n/a".to_string());
    let mut note = format!(
        "## Key visual\n\nImage: {}\nPrompt: {}\nRating: {}",
        image.path.display(),
        image.prompt,
        rating
    );
    if !critique.suggested_revisions.is_empty() {
        note.push_str("\n\nSuggested revisions:\n");
        note.push_str(revision_list(&critique.suggested_revisions).trim_end());
    }
    note
}

fn extract_image_brief(reply: &str) -> Option<String> {
    reply.lines().find_map(|line| {
        let line = line.trim().trim_start_matches(['*', '#', ' ']);
        let head = line.get(..BRIEF_MARKER.len())?;
        if !head.eq_ignore_ascii_case(BRIEF_MARKER) {
            return None;
        }
        let brief = line[BRIEF_MARKER.len()..].trim().trim_matches('*').trim();
        (!brief.is_empty()).then(|| brief.to_string())
    })
}

fn fallback_image_brief(brief: &SessionBrief) -> String {
    format!("Key campaign visual for {}: {}", brief.brand, brief.objective)
}
