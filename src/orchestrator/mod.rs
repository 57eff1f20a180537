//! Crew composition and execution: the session binds roster, tools, and an engine together.

pub mod engine;
pub mod hierarchical;
pub mod session;

pub use engine::{
    CrewEngine, CrewOutput, CrewSettings, EchoCrewEngine, Process, SharedCrewEngine,
};
pub use hierarchical::HierarchicalLlmEngine;
pub use session::OrchestrationSession;
