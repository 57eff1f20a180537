//! Task templates handed to the coordinator. Routing is left to the coordinator's own
//! reasoning; these templates only supply the brief, the team, and worked examples.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agents::{build_coordinator, SpecialistRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    Chat,
    Pipeline,
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskMode::Chat => "chat",
            TaskMode::Pipeline => "pipeline",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    description: String,
    expected_output: String,
    agent: String,
    mode: TaskMode,
}

impl TaskSpec {
    fn for_coordinator(
        description: String,
        expected_output: impl Into<String>,
        mode: TaskMode,
    ) -> Self {
        Self {
            description,
            expected_output: expected_output.into(),
            agent: build_coordinator().role().to_string(),
            mode,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn expected_output(&self) -> &str {
        &self.expected_output
    }

    /// Role the task is assigned to; always the coordinator.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn mode(&self) -> TaskMode {
        self.mode
    }
}

const CHAT_EXPECTED_OUTPUT: &str = "A helpful response addressing the user's request, either directly or through coordinated team effort.";

const PIPELINE_EXPECTED_OUTPUT: &str = "A comprehensive data analysis package including:
- Executive Summary: key findings and recommendations for business stakeholders
- Technical Report: detailed methodology, analysis, and statistical findings
- Data Quality Report: documentation of cleaning decisions and data improvements
- Visualizations: charts, graphs, and interactive elements
- Technical Appendix: code, methodology, and detailed statistical results
- Action Items: specific recommendations for next steps";

fn team_listing() -> String {
    SpecialistRole::ALL
        .iter()
        .map(|role| format!("- {}: {}", role.role_name(), role.duty()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_chat_task(user_message: &str) -> TaskSpec {
    let analysis = SpecialistRole::Analysis.role_name();
    let visualization = SpecialistRole::Visualization.role_name();
    let reporting = SpecialistRole::Reporting.role_name();

    let description = format!(
        "User request: {user_message}

Your Role: you are the manager of a team of specialists. Respond to the user's request appropriately.

Available Team Members:
{team}

Instructions:
1. If the user asks general questions about your purpose or capabilities, answer directly
2. If the user provides data (tables, CSV content, etc.), delegate to appropriate specialists
3. If the user asks for analysis, visualization, or reports, coordinate with relevant team members
4. Always provide helpful, informative responses
5. When delegating, ensure the task is completed and results are compiled

Examples:
- \"What is your purpose?\" -> answer directly about your role as a project manager
- \"Analyze this table: [data]\" -> delegate to {analysis}
- \"Create a visualization\" -> delegate to {visualization}
- \"Generate a report\" -> delegate to {reporting}

Respond appropriately to the user's request.",
        team = team_listing(),
    );

    TaskSpec::for_coordinator(description, CHAT_EXPECTED_OUTPUT, TaskMode::Chat)
}

pub fn render_pipeline_task(file_path: &str) -> TaskSpec {
    let description = format!(
        "Conduct a comprehensive data analysis project on {file_path}.

Project Overview:
This is a complex data analysis project requiring coordination across multiple specialists.
Your role is to orchestrate the entire workflow and ensure high-quality deliverables.

Your Responsibilities:
1. Project Planning: break down the analysis into logical phases
2. Task Delegation: assign specific tasks to the most qualified team members
3. Progress Monitoring: track task completion and quality
4. Quality Assurance: review outputs and request improvements if needed
5. Final Integration: compile all findings into a cohesive report

Team Member Expertise:
{team}

Expected Workflow:
1. Start with data ingestion and initial assessment
2. Delegate data cleaning and quality assurance
3. Coordinate statistical analysis and insight generation
4. Oversee visualization creation
5. Manage final report compilation

Quality Standards:
- All data cleaning decisions must be documented
- Statistical findings must include confidence intervals
- Visualizations must be accessible and well-labeled
- Final report must include executive summary and technical details

Coordinate the workflow efficiently and ensure all deliverables meet quality standards.",
        team = team_listing(),
    );

    TaskSpec::for_coordinator(description, PIPELINE_EXPECTED_OUTPUT, TaskMode::Pipeline)
}
