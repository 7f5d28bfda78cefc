//! Task Worker: hosts `TaskService`, runs the user computation on a
//! dedicated execution thread, and notifies the orchestrator on
//! completion (spec §4.4).

pub mod callback;
pub mod config;
pub mod error;
pub mod service;
pub mod worker;

pub use callback::{CallbackOutcome, DemoCallback, TaskCallback};
pub use config::{WorkerArgs, WorkerConfig};
pub use error::{Result, WorkerError};
pub use service::TaskServiceImpl;
pub use worker::Worker;
