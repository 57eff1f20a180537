use std::fmt;

use crate::tools::{ToolRegistry, DATA_EXPLORATION, EMBEDDED_DB, FILESYSTEM, TABULAR_DATA};

use super::definition::AgentDefinition;

const COORDINATOR_ROLE: &str = "Senior Project Manager & Technical Coordinator";
const COORDINATOR_GOAL: &str =
    "Orchestrate chat-based workflows and delegate tasks to specialists";
const COORDINATOR_PERSONA: &str = "You're a seasoned project manager with deep technical expertise. Your role is to:

1. Chat Coordination: handle user messages and determine appropriate responses
2. Task Delegation: match user requests to the most qualified specialists
3. Quality Assurance: review and validate outputs from team members
4. Communication: ensure clear responses to user queries

You excel at understanding user intent and requirements, coordinating multiple specialists effectively, providing helpful, informative responses, and adapting strategies based on user input.";

/// The five fixed specialist seats, in roster order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialistRole {
    Ingestion,
    Cleaning,
    Analysis,
    Visualization,
    Reporting,
}

impl SpecialistRole {
    pub const ALL: [SpecialistRole; 5] = [
        SpecialistRole::Ingestion,
        SpecialistRole::Cleaning,
        SpecialistRole::Analysis,
        SpecialistRole::Visualization,
        SpecialistRole::Reporting,
    ];

    pub fn role_name(self) -> &'static str {
        match self {
            SpecialistRole::Ingestion => "Data Ingestion Specialist",
            SpecialistRole::Cleaning => "Data Quality Engineer",
            SpecialistRole::Analysis => "Data Analysis Specialist",
            SpecialistRole::Visualization => "Data Visualization Specialist",
            SpecialistRole::Reporting => "Technical Report Writer",
        }
    }

    /// One-line duty used when listing the team inside task prompts.
    pub fn duty(self) -> &'static str {
        match self {
            SpecialistRole::Ingestion => "Handle data loading, validation, and initial exploration",
            SpecialistRole::Cleaning => "Clean data, handle missing values, ensure data quality",
            SpecialistRole::Analysis => "Perform statistical analysis and pattern recognition",
            SpecialistRole::Visualization => {
                "Create charts, graphs, and interactive visualizations"
            }
            SpecialistRole::Reporting => "Compile findings into comprehensive reports",
        }
    }

    fn goal(self) -> &'static str {
        match self {
            SpecialistRole::Ingestion => "Efficiently load, validate, and prepare data for analysis",
            SpecialistRole::Cleaning => {
                "Clean, preprocess, and ensure data quality for downstream analysis"
            }
            SpecialistRole::Analysis => {
                "Perform comprehensive statistical analysis and extract actionable insights"
            }
            SpecialistRole::Visualization => {
                "Create compelling, informative, and accessible data visualizations"
            }
            SpecialistRole::Reporting => {
                "Synthesize findings into comprehensive, actionable reports"
            }
        }
    }

    fn persona(self) -> &'static str {
        match self {
            SpecialistRole::Ingestion => "You're an expert in data ingestion and preprocessing with deep knowledge of:
- Various data formats (CSV, JSON, XML, databases)
- Data validation and quality assessment
- Initial data exploration and profiling
- Handling missing data and outliers
- Data format conversion and standardization

You work closely with the Data Quality Engineer to ensure seamless data flow.",
            SpecialistRole::Cleaning => "You're a specialist in data cleaning and quality assurance with expertise in:
- Missing value imputation strategies
- Outlier detection and treatment
- Data type conversion and validation
- Duplicate detection and removal
- Data standardization and normalization
- Quality metrics and reporting

You provide detailed documentation of all cleaning decisions and their rationale.",
            SpecialistRole::Analysis => "You're a skilled data analyst with expertise in:
- Descriptive and inferential statistics
- Correlation and regression analysis
- Time series analysis and forecasting
- Pattern recognition and trend identification
- Statistical significance testing
- Data-driven hypothesis testing

You excel at translating complex statistical findings into business insights.",
            SpecialistRole::Visualization => "You're an expert in data visualization who understands:
- Chart type selection for different data types
- Color theory and accessibility
- Interactive visualization techniques
- Storytelling through data
- Dashboard design principles
- Export formats for various platforms

You create visualizations that effectively communicate insights to stakeholders.",
            SpecialistRole::Reporting => "You're a technical writer who specializes in:
- Executive summaries for business stakeholders
- Technical documentation for developers
- Methodology and process documentation
- Recommendations and action items
- Risk assessment and mitigation strategies
- Multi-format report generation (PDF, HTML, Markdown)

You excel at making complex technical findings accessible to diverse audiences.",
        }
    }

    /// Adapter names this role may use, when the registry has them.
    pub fn tool_bindings(self) -> &'static [&'static str] {
        match self {
            SpecialistRole::Ingestion => &[FILESYSTEM],
            SpecialistRole::Cleaning | SpecialistRole::Visualization => {
                &[DATA_EXPLORATION, TABULAR_DATA]
            }
            SpecialistRole::Analysis => &[DATA_EXPLORATION, TABULAR_DATA, EMBEDDED_DB],
            SpecialistRole::Reporting => &[],
        }
    }

    pub fn build(self, registry: &ToolRegistry) -> AgentDefinition {
        let tools = self
            .tool_bindings()
            .iter()
            .copied()
            .filter(|name| registry.contains(name));

        AgentDefinition::specialist(self.role_name(), self.goal(), self.persona(), tools)
    }
}

impl fmt::Display for SpecialistRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role_name())
    }
}

pub fn build_coordinator() -> AgentDefinition {
    AgentDefinition::coordinator(COORDINATOR_ROLE, COORDINATOR_GOAL, COORDINATOR_PERSONA)
}

pub fn build_specialists(registry: &ToolRegistry) -> Vec<AgentDefinition> {
    SpecialistRole::ALL
        .iter()
        .map(|role| role.build(registry))
        .collect()
}

/// Coordinator plus specialists for one orchestration session.
#[derive(Debug, Clone)]
pub struct Roster {
    coordinator: AgentDefinition,
    specialists: Vec<AgentDefinition>,
}

impl Roster {
    pub fn build(registry: &ToolRegistry) -> Self {
        Self {
            coordinator: build_coordinator(),
            specialists: build_specialists(registry),
        }
    }

    pub fn coordinator(&self) -> &AgentDefinition {
        &self.coordinator
    }

    pub fn specialists(&self) -> &[AgentDefinition] {
        &self.specialists
    }

    /// Case-insensitive lookup across the whole crew.
    pub fn find(&self, role: &str) -> Option<&AgentDefinition> {
        let wanted = role.trim();
        std::iter::once(&self.coordinator)
            .chain(self.specialists.iter())
            .find(|agent| agent.role().eq_ignore_ascii_case(wanted))
    }
}
