use super::{agent_tools, load_session, publish, save_session, AgencyServices, RoleTask};
use crate::models::{EntryKind, ResearchReport, SessionBrief, SessionContext};
use crate::roster::{AgentRole, ToolKind};
use crate::tools::toolbox::{ToolEvent, ToolLog};
use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Task, TaskResult};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const MAX_QUERIES: usize = 3;

/// Plans a few web research queries for the brief, runs them one at a
/// time through the research tool and publishes the combined findings.
pub struct ResearcherTask {
    services: Arc<AgencyServices>,
}

impl ResearcherTask {
    pub fn new(services: Arc<AgencyServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Task for ResearcherTask {
    fn id(&self) -> &str {
        AgentRole::Researcher.task_id()
    }

    #[instrument(skip(self, context))]
    async fn run(&self, context: Context) -> Result<TaskResult, GraphError> {
        let start_time = std::time::Instant::now();
        info!("Starting research task");

        let mut session = load_session(&context).await?;
        let role = AgentRole::Researcher;
        let speaker = role.to_string();
        let profile = role.profile();
        if !profile.allows(ToolKind::Research) {
            return Err(GraphError::TaskExecutionFailed(format!(
                "{speaker} may not use the research tool"
            )));
        }

        let prompt = format!(
            r#"{}

Generate 2-3 specific web search queries that would give the team the market, competitor and audience insight this brief needs.

Requirements:
- Queries should be factual and answerable through web search
- Each query should cover a different aspect
- Format: Return only the queries, one per line, no numbering or bullets"#,
            session.brief.project_brief()
        );

        let planned = self.services.chat.complete(&profile.system_prompt, &prompt).await;
        let queries = match planned {
            Ok(reply) => {
                let queries = parse_queries(&reply);
                if queries.is_empty() {
                    warn!("model proposed no usable queries, using the brief");
                    session.record(
                        &speaker,
                        EntryKind::Degraded,
                        "no usable queries proposed, researched the brief directly",
                    );
                    fallback_queries(&session.brief)
                } else {
                    queries
                }
            }
            Err(e) => {
                warn!("query planning failed: {}", e);
                session.record(
                    &speaker,
                    EntryKind::Degraded,
                    format!("query planning failed ({e}), researched the brief directly"),
                );
                fallback_queries(&session.brief)
            }
        };
        info!("Researching {} queries", queries.len());

        let mut sections = Vec::new();
        for query in &queries {
            session.record(&speaker, EntryKind::ToolCall, format!("research(\"{query}\")"));
            match self.services.research.research(query).await {
                Ok(report) => {
                    info!("Research for '{}' saved to {}", query, report.path.display());
                    session.record(
                        &speaker,
                        EntryKind::Message,
                        format!(
                            "Findings for \"{}\" ({} sources, saved to {}):\n{}",
                            query,
                            report.sources.len(),
                            report.path.display(),
                            report.summary
                        ),
                    );
                    sections.push(report_section(&report));
                    session.research.push(report);
                }
                Err(e) => {
                    error!("Research for '{}' failed: {}", query, e);
                    session.record(
                        &speaker,
                        EntryKind::Failure,
                        format!("research(\"{query}\") failed: {e}"),
                    );
                }
            }
        }

        let title = RoleTask::deliverable_title(role);
        let status = if sections.is_empty() {
            session.record(
                &speaker,
                EntryKind::Failure,
                format!("{title} not produced: every query failed"),
            );
            format!("{title} missing")
        } else {
            let content = self.synthesize(&mut session, sections).await;
            publish(&self.services.output, &mut session, role, title, content).await;
            format!("{title} delivered")
        };

        save_session(&context, role.task_id(), start_time, session).await;

        Ok(TaskResult::new(Some(status), NextAction::ContinueAndExecute))
    }
}

impl ResearcherTask {
    /// Lets the researcher write the summary over the per-query findings,
    /// with the research tool at hand for open questions. Falls back to
    /// the findings alone when the turn fails.
    async fn synthesize(&self, session: &mut SessionContext, mut sections: Vec<String>) -> String {
        let role = AgentRole::Researcher;
        let speaker = role.to_string();
        let log = ToolLog::default();
        let tools = agent_tools(&self.services, role, &log);

        let prompt = format!(
            "{}\n\nFindings so far:\n\n{}\n\nWrite the research summary for the team: key \
             market, competitor and audience insights with the source URLs they rest on. If an \
             important question is still open, call the research tool before answering.",
            session.brief.project_brief(),
            sections.join("\n\n")
        );
        let reply = self
            .services
            .chat
            .complete_with_tools(&role.profile().system_prompt, &prompt, &tools)
            .await;

        for event in log.drain() {
            match event {
                ToolEvent::Research(report) => {
                    session.record(
                        &speaker,
                        EntryKind::ToolCall,
                        format!("research(\"{}\")", report.query),
                    );
                    sections.push(report_section(&report));
                    session.research.push(report);
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
            Ok(summary) => {
                session.record(&speaker, EntryKind::Message, summary.clone());
                format!("{}\n\n{}", summary.trim(), sections.join("\n\n"))
            }
            Err(e) => {
                warn!("research synthesis failed: {}", e);
                session.record(
                    &speaker,
                    EntryKind::Degraded,
                    format!("summary turn failed ({e}), published the per-query findings"),
                );
                sections.join("\n\n")
            }
        }
    }
}

/// One query per non-empty line, stripped of list markers and quotes.
fn parse_queries(reply: &str) -> Vec<String> {
    let mut queries: Vec<String> = Vec::new();
    for line in reply.lines() {
        let line = strip_list_marker(line.trim()).trim_matches('"').trim();
        if line.is_empty() || queries.iter().any(|q| q.eq_ignore_ascii_case(line)) {
            continue;
        }
        queries.push(line.to_string());
        if queries.len() == MAX_QUERIES {
            break;
        }
    }
    queries
}

fn strip_list_marker(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix(['-', '*']) {
        return rest.trim_start();
    }
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(['.', ')']) {
            return rest.trim_start();
        }
    }
    line
}

fn fallback_queries(brief: &SessionBrief) -> Vec<String> {
    vec![
        format!("{} {}", brief.brand, brief.objective),
        format!("{} market trends", brief.objective),
    ]
}

fn report_section(report: &ResearchReport) -> String {
    let sources = report
        .sources
        .iter()
        .map(|s| format!("- [{}]({})", s.title, s.url))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "## {}\n\n{}\n\nSources:\n{}",
        report.query,
        report.summary.trim(),
        sources
    )
}
