pub mod generator;
pub mod handlers;
pub mod orchestrator;
pub mod prompts;
pub mod staleness;
pub mod store;
