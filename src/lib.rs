//! Financial Chat Orchestrator
//!
//! The core of a multilingual financial assistant:
//! - Keeps per-session conversation history and uploaded document refs
//! - Translates between the user's language and the English working language
//! - Routes each message to one of a closed set of analysis tools
//! - Retries the chosen tool once, then falls back down the ranking
//! - Always produces a reply, with `general_query` as the last resort
//!
//! PER-TURN LOOP:
//! TRANSLATE → CLASSIFY → INVOKE → VALIDATE → RETRY? → FALLBACK? → AGGREGATE → REPLY

pub mod agent;
pub mod aggregator;
pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod execution;
pub mod language;
pub mod llm;
pub mod models;
pub mod session;
pub mod tools;
pub mod validation;

#[cfg(test)]
mod testing;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use agent::Orchestrator;
pub use config::OrchestratorConfig;
pub use models::*;
