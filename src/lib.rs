pub mod agents;
pub mod config;
pub mod facade;
pub mod frontend;
pub mod llm_client;
pub mod orchestrator;
pub mod status;
pub mod tasks;
pub mod tools;
