use crate::models::{EntryKind, SessionBrief, SessionContext, SessionOutcome};
use crate::output::write_new;
use crate::roster::AgentRole;
use crate::tasks::{
    AgencyServices, ResearcherTask, RoleTask, VisualDirectorTask, SESSION_KEY, TASK_TIMES_KEY,
};
use anyhow::{anyhow, bail, Context as _, Result};
use graph_flow::{
    ExecutionStatus, FlowRunner, Graph, GraphBuilder, InMemorySessionStorage, Session,
    SessionStorage, Task,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument};

fn build_graph(services: &Arc<AgencyServices>) -> Graph {
    let mut builder = GraphBuilder::new("agency_session");
    for role in AgentRole::ALL {
        let task: Arc<dyn Task> = match role {
            AgentRole::Researcher => Arc::new(ResearcherTask::new(services.clone())),
            AgentRole::VisualDirector => Arc::new(VisualDirectorTask::new(services.clone())),
            other => Arc::new(RoleTask::new(other, services.clone())),
        };
        builder = builder.add_task(task);
    }
    for pair in AgentRole::ALL.windows(2) {
        builder = builder.add_edge(pair[0].task_id(), pair[1].task_id());
    }
    builder.build()
}

#[instrument(skip(services, brief), fields(session_id = %brief.session_id))]
pub async fn run_session(
    services: Arc<AgencyServices>,
    brief: SessionBrief,
) -> Result<SessionOutcome> {
    let start_time = std::time::Instant::now();
    services
        .output
        .ensure()
        .await
        .context("failed to create output directories")?;

    let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
    let runner = FlowRunner::new(Arc::new(build_graph(&services)), storage.clone());

    let session_id = brief.session_id.clone();
    info!("Starting agency session for {}", brief.brand);

    let session = Session::new_from_task(session_id.clone(), AgentRole::Manager.task_id());
    session.context.set(SESSION_KEY, SessionContext::new(brief)).await;
    storage
        .save(session)
        .await
        .map_err(|e| anyhow!("failed to store session: {e}"))?;

    // Each role runs once, so the graph can never need more steps than this.
    let max_steps = AgentRole::ALL.len() * 2;
    let mut steps = 0;
    loop {
        steps += 1;
        if steps > max_steps {
            bail!("session {session_id} did not complete after {max_steps} steps");
        }

        let result = runner
            .run(&session_id)
            .await
            .map_err(|e| anyhow!("session step failed: {e}"))?;

        match &result.status {
            ExecutionStatus::Completed => {
                info!("Session completed in {:?}", start_time.elapsed());
                break;
            }
            ExecutionStatus::Paused { next_task_id, .. } => {
                info!("Next turn: {}", next_task_id);
                continue;
            }
            ExecutionStatus::Error(e) => {
                error!("Session error: {}", e);
                bail!("session {session_id} failed: {e}");
            }
            _ => continue,
        }
    }

    let session = storage
        .get(&session_id)
        .await
        .map_err(|e| anyhow!("failed to load session: {e}"))?
        .ok_or_else(|| anyhow!("session {session_id} disappeared from storage"))?;
    let context: SessionContext = session
        .context
        .get(SESSION_KEY)
        .await
        .ok_or_else(|| anyhow!("session context missing after run"))?;
    let task_times: HashMap<String, u64> = session
        .context
        .get(TASK_TIMES_KEY)
        .await
        .unwrap_or_default();

    let total_time_ms = start_time.elapsed().as_millis() as u64;
    let transcript_path = write_transcript(&services, &context, &task_times, total_time_ms).await?;
    info!("Transcript saved to {}", transcript_path.display());

    Ok(SessionOutcome {
        session_id,
        context,
        task_times,
        total_time_ms,
        transcript_path,
    })
}

/// Writes `{session_id}.md` and `{session_id}.json`; returns the Markdown path.
async fn write_transcript(
    services: &AgencyServices,
    context: &SessionContext,
    task_times: &HashMap<String, u64>,
    total_time_ms: u64,
) -> Result<PathBuf> {
    let dir = services.output.session_logs_dir();
    let stem = &context.brief.session_id;

    let json = serde_json::to_vec_pretty(&serde_json::json!({
        "session": context,
        "task_times": task_times,
        "total_time_ms": total_time_ms,
    }))?;
    write_new(&dir, stem, "json", &json)
        .await
        .context("failed to write JSON transcript")?;

    let markdown = render_transcript(context, task_times, total_time_ms);
    write_new(&dir, stem, "md", markdown.as_bytes())
        .await
        .context("failed to write transcript")
}

fn render_transcript(
    context: &SessionContext,
    task_times: &HashMap<String, u64>,
    total_time_ms: u64,
) -> String {
    let brief = &context.brief;
    let mut out = format!(
        "# Agency Session {}\n\nBrand: {}\nObjective: {}\nTotal time: {} ms\n\n## Turns\n\n",
        brief.session_id, brief.brand, brief.objective, total_time_ms
    );
    for role in AgentRole::ALL {
        let time = task_times
            .get(role.task_id())
            .map(|ms| format!("{ms} ms"))
            .unwrap_or_else(|| "not run".to_string());
        out.push_str(&format!("- {}: {}\n", role, time));
    }

    out.push_str("\n## Deliverables\n\n");
    if context.deliverables.is_empty() {
        out.push_str("None.\n");
    }
    for d in &context.deliverables {
        let location = d
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not saved".to_string());
        out.push_str(&format!("- {} ({}): {}\n", d.title, d.speaker, location));
    }

    let issues: Vec<_> = context.failures().collect();
    if !issues.is_empty() {
        out.push_str("\n## Incomplete\n\n");
        for entry in issues {
            out.push_str(&format!(
                "- {} [{}]: {}\n",
                entry.speaker,
                label(entry.kind),
                entry.content
            ));
        }
    }

    out.push_str("\n## Transcript\n");
    for entry in &context.transcript {
        out.push_str(&format!(
            "\n### {} [{}] {}\n\n{}\n",
            entry.speaker,
            label(entry.kind),
            entry.at.format("%H:%M:%S"),
            entry.content.trim()
        ));
    }
    out
}

fn label(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::Message => "message",
        EntryKind::ToolCall => "tool call",
        EntryKind::Failure => "failure",
        EntryKind::Degraded => "degraded",
    }
}
