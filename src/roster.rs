use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

pub const COPYWRITING_PRINCIPLES: [&str; 7] = [
    "Reciprocity",
    "Scarcity",
    "Authority",
    "Commitment",
    "Consistency",
    "Consensus/Social Proof",
    "Liking",
];

pub const MARKETING_FRAMEWORKS: [(&str, &str); 5] = [
    ("4Ps", "Product, Price, Place, Promotion"),
    ("STP", "Segmentation, Targeting, Positioning"),
    ("AIDA", "Attention, Interest, Desire, Action"),
    ("Customer Journey", "Awareness, Consideration, Purchase, Retention, Advocacy"),
    (
        "Marketing Funnel",
        "Awareness, Interest, Consideration, Intent, Evaluation, Purchase",
    ),
];

pub const MEDIA_FRAMEWORKS: [(&str, &str); 4] = [
    ("RACE", "Reach, Act, Convert, Engage"),
    ("STDC", "See, Think, Do, Care (Google Framework)"),
    ("POEM", "Paid, Owned, Earned Media"),
    ("OST", "Objectives, Strategy, Tactics"),
];

pub fn copywriting_guidance() -> String {
    format!(
        "Apply these persuasive principles: {}",
        COPYWRITING_PRINCIPLES.join(", ")
    )
}

pub fn marketing_guidance() -> String {
    format!(
        "Use appropriate marketing frameworks: {}",
        join_frameworks(&MARKETING_FRAMEWORKS)
    )
}

pub fn media_guidance() -> String {
    format!(
        "Apply media planning frameworks: {}",
        join_frameworks(&MEDIA_FRAMEWORKS)
    )
}

fn join_frameworks(frameworks: &[(&str, &str)]) -> String {
    frameworks
        .iter()
        .map(|(name, parts)| format!("{name}: {parts}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    Manager,
    Researcher,
    Strategist,
    Copywriter,
    VisualDirector,
    Marketer,
    MediaPlanner,
    Director,
}

impl AgentRole {
    /// Turn order of the session pipeline.
    pub const ALL: [AgentRole; 8] = [
        AgentRole::Manager,
        AgentRole::Researcher,
        AgentRole::Strategist,
        AgentRole::Copywriter,
        AgentRole::VisualDirector,
        AgentRole::Marketer,
        AgentRole::MediaPlanner,
        AgentRole::Director,
    ];

    /// Graph task id.
    pub fn task_id(self) -> &'static str {
        match self {
            AgentRole::Manager => "agency_manager",
            AgentRole::Researcher => "agency_researcher",
            AgentRole::Strategist => "agency_strategist",
            AgentRole::Copywriter => "agency_copywriter",
            AgentRole::VisualDirector => "agency_visual_director",
            AgentRole::Marketer => "agency_marketer",
            AgentRole::MediaPlanner => "agency_media_planner",
            AgentRole::Director => "agency_director",
        }
    }

    pub fn profile(self) -> &'static RoleProfile {
        &roster()[&self]
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.profile().name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolKind {
    Research,
    Visual,
}

#[derive(Debug, Clone)]
pub struct RoleProfile {
    pub role: AgentRole,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub tools: Vec<ToolKind>,
}

impl RoleProfile {
    pub fn allows(&self, tool: ToolKind) -> bool {
        self.tools.contains(&tool)
    }
}

pub fn roster() -> &'static BTreeMap<AgentRole, RoleProfile> {
    static ROSTER: OnceLock<BTreeMap<AgentRole, RoleProfile>> = OnceLock::new();
    ROSTER.get_or_init(build_roster)
}

fn build_roster() -> BTreeMap<AgentRole, RoleProfile> {
    let profiles = [
        profile(
            AgentRole::Manager,
            "Agency_Manager",
            "Coordinates all agency activities and ensures project alignment",
            r#"You are the Agency Manager coordinating a creative project. Your responsibilities:

1. Create and communicate a clear project plan based on the brand and objectives
2. Coordinate between all team members ensuring smooth workflow
3. Monitor progress and provide regular updates
4. Ensure all deliverables meet quality standards
5. Manage timelines and resource allocation

Always maintain a professional tone and focus on actionable outcomes."#
                .to_string(),
            vec![],
        ),
        profile(
            AgentRole::Researcher,
            "Agency_Researcher",
            "Conducts comprehensive market research and competitive analysis",
            r#"You are the Lead Researcher responsible for gathering comprehensive insights.

Investigate:
- Market trends and opportunities
- Competitive landscape analysis
- Target audience insights
- Industry best practices
- Cultural and social context

Provide detailed, data-driven reports with actionable insights.
Always cite sources and include relevant statistics when available."#
                .to_string(),
            vec![ToolKind::Research],
        ),
        profile(
            AgentRole::Strategist,
            "Agency_Strategist",
            "Develops strategic frameworks and positioning strategies",
            format!(
                r#"You are the Lead Strategist creating comprehensive strategic briefs.

{}

Develop strategies covering:
- Brand positioning and differentiation
- Target audience segmentation and personas
- Value proposition development
- Competitive positioning
- Strategic messaging framework
- Key performance indicators

Use research insights to ground your strategy in market reality.
Provide clear, actionable strategic direction."#,
                marketing_guidance()
            ),
            vec![],
        ),
        profile(
            AgentRole::Copywriter,
            "Agency_Copywriter",
            "Creates compelling copy using proven persuasion principles",
            format!(
                r#"You are the Lead Copywriter crafting persuasive content.

{}

Create content that:
- Captures attention and builds interest
- Addresses audience pain points and desires
- Uses storytelling and emotional connections
- Includes clear calls-to-action
- Maintains consistent brand voice
- Applies psychological triggers appropriately

Focus on conversion-oriented copy that drives action."#,
                copywriting_guidance()
            ),
            vec![],
        ),
        profile(
            AgentRole::VisualDirector,
            "Agency_Visual_Director",
            "Develops visual concepts and creates image content",
            r#"You are the Visual Creative Director responsible for all visual content.

Create compelling visual concepts that support the strategy, align with brand
identity and stay consistent across all materials.

Consider:
- Visual hierarchy and composition
- Color psychology and brand colors
- Typography and readability
- Cultural and contextual appropriateness
- Platform-specific requirements

Provide detailed creative direction and rationale for visual choices."#
                .to_string(),
            vec![ToolKind::Visual],
        ),
        profile(
            AgentRole::Marketer,
            "Agency_Marketer",
            "Develops marketing campaigns and customer journey strategies",
            format!(
                r#"You are the Lead Marketer creating comprehensive marketing strategies.

{}

Develop marketing initiatives including:
- Customer journey mapping
- Campaign concepts and themes
- Channel strategy and mix
- Conversion optimization tactics
- Performance measurement framework
- Budget allocation recommendations

Ensure marketing aligns with strategic objectives and brand positioning.
Focus on measurable, results-driven marketing approaches."#,
                marketing_guidance()
            ),
            vec![],
        ),
        profile(
            AgentRole::MediaPlanner,
            "Agency_Media_Planner",
            "Optimizes media mix and channel strategies",
            format!(
                r#"You are the Lead Media Planner optimizing channel strategy.

{}

Create media strategies covering:
- Channel selection and prioritization
- Audience targeting and segmentation
- Budget allocation across channels
- Content format optimization
- Performance measurement and KPIs
- Testing and optimization strategies

Consider both traditional and digital channels.
Provide data-driven recommendations with clear rationale."#,
                media_guidance()
            ),
            vec![],
        ),
        profile(
            AgentRole::Director,
            "Agency_Director",
            "Provides creative leadership and ensures excellence",
            r#"You are the Creative Director setting the overall creative vision.

Your responsibilities:
- Ensure creative excellence across all outputs
- Maintain brand consistency and integrity
- Challenge the team to push creative boundaries
- Provide constructive feedback and direction
- Ensure cultural relevance and appropriateness
- Balance creativity with strategic objectives

Review all creative work and provide expert guidance.
Push for innovative, breakthrough creative solutions."#
                .to_string(),
            vec![],
        ),
    ];

    profiles.into_iter().map(|p| (p.role, p)).collect()
}

fn profile(
    role: AgentRole,
    name: &str,
    description: &str,
    system_prompt: String,
    tools: Vec<ToolKind>,
) -> RoleProfile {
    RoleProfile {
        role,
        name: name.to_string(),
        description: description.to_string(),
        system_prompt,
        tools,
    }
}
