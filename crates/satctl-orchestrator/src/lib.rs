//! Orchestrator: the hybrid timed+sequential scheduler engine, the
//! `OrchestratorService` gRPC adapter, and the execution history/statistics
//! the engine produces (spec §4.5–§4.7).

pub mod config;
pub mod engine;
pub mod error;
pub mod record;
pub mod service;
mod state;
pub mod summary;

pub use config::{OrchestratorArgs, OrchestratorConfig};
pub use engine::Engine;
pub use error::{OrchestratorError, Result};
pub use record::{ContextSwitchStats, ExecutionRecord};
pub use service::OrchestratorServiceImpl;
pub use summary::render_summary;
