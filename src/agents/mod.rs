pub mod definition;
pub mod roster;

pub use definition::AgentDefinition;
pub use roster::{build_coordinator, build_specialists, Roster, SpecialistRole};
