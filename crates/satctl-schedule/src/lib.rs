//! Declarative schedule model and YAML loader.
//!
//! A schedule is a flat list of [`model::ScheduledTask`] entries, each
//! either released at an absolute offset (`Timed`) or chained to a
//! predecessor (`Sequential`). Loading never repairs a malformed schedule
//! silently — parse and validation failures are returned to the caller,
//! which decides whether to fall back to [`loader::create_test_schedule`].

mod loader;
mod model;

pub use loader::{create_test_schedule, load_from_path, load_from_str, ScheduleError};
pub use model::{ScheduledTask, TaskMode, TaskSchedule};
