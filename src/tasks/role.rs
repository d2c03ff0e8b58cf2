use super::{load_session, publish, save_session, team_notes, AgencyServices};
use crate::models::EntryKind;
use crate::roster::AgentRole;
use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Task, TaskResult};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// A conversational turn for a role without tools: read the brief and
/// the team's prior work, answer, and publish the answer as a deliverable.
pub struct RoleTask {
    role: AgentRole,
    services: Arc<AgencyServices>,
}

impl RoleTask {
    pub fn new(role: AgentRole, services: Arc<AgencyServices>) -> Self {
        Self { role, services }
    }

    pub fn deliverable_title(role: AgentRole) -> &'static str {
        match role {
            AgentRole::Manager => "Project Plan",
            AgentRole::Researcher => "Research Summary",
            AgentRole::Strategist => "Strategy Brief",
            AgentRole::Copywriter => "Campaign Copy",
            AgentRole::VisualDirector => "Visual Direction",
            AgentRole::Marketer => "Marketing Plan",
            AgentRole::MediaPlanner => "Media Plan",
            AgentRole::Director => "Creative Review",
        }
    }

    fn instruction(&self) -> &'static str {
        match self.role {
            AgentRole::Manager => {
                "Create the project plan: workstreams, owners on the team, sequencing and quality bar."
            }
            AgentRole::Strategist => {
                "Write the strategic brief: positioning, audience segments and personas, value proposition, messaging framework and KPIs."
            }
            AgentRole::Copywriter => {
                "Write the campaign copy: headline options, body copy, taglines and calls-to-action for the key channels."
            }
            AgentRole::Marketer => {
                "Write the marketing plan: customer journey, campaign concept, channel mix, conversion tactics and measurement."
            }
            AgentRole::MediaPlanner => {
                "Write the media plan: channel priorities, targeting, budget split, formats, KPIs and test plan."
            }
            AgentRole::Director => {
                "Review all deliverables as Creative Director. Call out gaps, give concrete direction and close with the final implementation guide."
            }
            AgentRole::Researcher | AgentRole::VisualDirector => {
                "Contribute your part of the project."
            }
        }
    }

    fn next_action(&self) -> NextAction {
        if self.role == AgentRole::Director {
            NextAction::End
        } else {
            NextAction::ContinueAndExecute
        }
    }
}

fn team_directory() -> String {
    AgentRole::ALL
        .iter()
        .map(|role| format!("- {}: {}\n", role, role.profile().description))
        .collect()
}

#[async_trait]
impl Task for RoleTask {
    fn id(&self) -> &str {
        self.role.task_id()
    }

    #[instrument(skip(self, context), fields(role = %self.role))]
    async fn run(&self, context: Context) -> Result<TaskResult, GraphError> {
        let start_time = std::time::Instant::now();
        info!("Starting {} turn", self.role);

        let mut session = load_session(&context).await?;
        let speaker = self.role.to_string();
        let title = Self::deliverable_title(self.role);

        let mut prompt = format!(
            "{}\n\nWork so far:\n{}\n{}",
            session.brief.project_brief(),
            team_notes(&session),
            self.instruction()
        );
        if self.role == AgentRole::Manager {
            prompt.push_str("\n\nYour team:\n");
            prompt.push_str(&team_directory());
        }

        let status = match self
            .services
            .chat
            .complete(&self.role.profile().system_prompt, &prompt)
            .await
        {
            Ok(reply) => {
                session.record(&speaker, EntryKind::Message, reply.clone());
                publish(&self.services.output, &mut session, self.role, title, reply).await;
                format!("{title} delivered")
            }
            Err(e) => {
                error!("{} turn failed: {}", self.role, e);
                session.record(
                    &speaker,
                    EntryKind::Failure,
                    format!("{title} not produced: {e}"),
                );
                format!("{title} missing")
            }
        };

        save_session(&context, self.role.task_id(), start_time, session).await;

        Ok(TaskResult::new(Some(status), self.next_action()))
    }
}
