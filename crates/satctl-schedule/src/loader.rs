use std::path::Path;
use std::str::FromStr;

use satctl_rt::RtPolicy;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{ScheduledTask, TaskMode, TaskSchedule};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("could not read schedule file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("schedule parse error at {location}: {message}")]
    Parse { location: String, message: String },
    #[error("invalid schedule: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;

#[derive(Debug, Deserialize)]
struct RawRoot {
    schedule: RawSchedule,
}

#[derive(Debug, Deserialize)]
struct RawSchedule {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    defaults: RawDefaults,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDefaults {
    deadline_us: Option<i64>,
    rt_policy: Option<String>,
    rt_priority: Option<u8>,
    cpu_affinity: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: String,
    address: String,
    mode: String,
    scheduled_time_us: Option<i64>,
    depends_on: Option<String>,
    deadline_us: Option<i64>,
    estimated_duration_us: Option<i64>,
    rt_policy: Option<String>,
    rt_priority: Option<u8>,
    cpu_affinity: Option<i32>,
    max_retries: Option<u32>,
    critical: Option<bool>,
    #[serde(default)]
    parameters: Map<String, Value>,
}

/// Load a schedule from a YAML file on disk.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<TaskSchedule> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ScheduleError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_from_str(&text)
}

/// Load a schedule from an in-memory YAML document.
///
/// Parse failures surface the offending line/column (spec §4.2: "Parse
/// errors must surface with the source location, not silently fall back").
pub fn load_from_str(yaml: &str) -> Result<TaskSchedule> {
    let raw: RawRoot = serde_yaml::from_str(yaml).map_err(|e| {
        let location = e
            .location()
            .map(|l| format!("line {}, column {}", l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        ScheduleError::Parse {
            location,
            message: e.to_string(),
        }
    })?;

    build_schedule(raw.schedule)
}

fn build_schedule(raw: RawSchedule) -> Result<TaskSchedule> {
    let default_deadline_us = raw.defaults.deadline_us.unwrap_or(1_000_000);
    let default_rt_policy = raw
        .defaults
        .rt_policy
        .clone()
        .unwrap_or_else(|| "none".to_string());
    let default_rt_priority = raw.defaults.rt_priority.unwrap_or(50);
    let default_cpu_affinity = raw.defaults.cpu_affinity.unwrap_or(-1);

    let mut tasks = Vec::with_capacity(raw.tasks.len());
    for raw_task in raw.tasks {
        tasks.push(build_task(
            raw_task,
            default_deadline_us,
            &default_rt_policy,
            default_rt_priority,
            default_cpu_affinity,
        )?);
    }

    let schedule = TaskSchedule {
        name: raw.name,
        description: raw.description,
        start_us: 0,
        end_us: 3_600_000_000,
        tick_duration_us: 1_000,
        tasks,
    };

    validate(&schedule)?;
    Ok(schedule)
}

fn build_task(
    raw: RawTask,
    default_deadline_us: i64,
    default_rt_policy: &str,
    default_rt_priority: u8,
    default_cpu_affinity: i32,
) -> Result<ScheduledTask> {
    let mode = match raw.mode.as_str() {
        "sequential" => TaskMode::Sequential,
        "timed" => TaskMode::Timed,
        other => {
            return Err(ScheduleError::Validation(format!(
                "task {}: unknown mode {other:?} (expected \"sequential\" or \"timed\")",
                raw.id
            )))
        }
    };

    let scheduled_time_us = match mode {
        TaskMode::Timed => raw.scheduled_time_us.ok_or_else(|| {
            ScheduleError::Validation(format!(
                "task {}: mode \"timed\" requires scheduled_time_us",
                raw.id
            ))
        })?,
        TaskMode::Sequential => 0,
    };

    let rt_policy_str = raw.rt_policy.as_deref().unwrap_or(default_rt_policy);
    let rt_policy = RtPolicy::from_str(rt_policy_str).map_err(|e| {
        ScheduleError::Validation(format!("task {}: invalid rt_policy: {e}", raw.id))
    })?;

    let mut parameters = raw.parameters;
    parameters.insert(
        "task_id".to_string(),
        Value::String(raw.id.clone()),
    );
    let parameters_json = Value::Object(parameters).to_string();

    Ok(ScheduledTask {
        task_id: raw.id,
        worker_endpoint: raw.address,
        mode,
        scheduled_time_us,
        wait_for_task_id: raw.depends_on.filter(|s| !s.is_empty()),
        deadline_us: raw.deadline_us.unwrap_or(default_deadline_us),
        estimated_duration_us: raw.estimated_duration_us.unwrap_or(1_000_000),
        rt_policy,
        rt_priority: raw.rt_priority.unwrap_or(default_rt_priority),
        cpu_affinity: raw.cpu_affinity.unwrap_or(default_cpu_affinity),
        max_retries: raw.max_retries.unwrap_or(0),
        critical: raw.critical.unwrap_or(false),
        parameters_json,
    })
}

/// Rejects schedule-authoring errors that would otherwise make the engine
/// wait forever or break dependency tracking (spec §4.5/§9 Open Questions).
fn validate(schedule: &TaskSchedule) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for task in &schedule.tasks {
        if !seen.insert(task.task_id.as_str()) {
            return Err(ScheduleError::Validation(format!(
                "duplicate task_id {:?}",
                task.task_id
            )));
        }
    }

    for task in &schedule.tasks {
        if let Some(dep) = &task.wait_for_task_id {
            if schedule.task(dep).is_none() {
                return Err(ScheduleError::Validation(format!(
                    "task {:?} depends on unknown task {:?}",
                    task.task_id, dep
                )));
            }
        }
    }

    Ok(())
}

/// A built-in schedule used when no `--schedule` path is given, or (with
/// `--fallback-to-test-schedule`) when loading fails. Mirrors
/// `ScheduleParser::create_test_schedule` in the original implementation:
/// a sequential task, a timed task at 8s, and a sequential task depending
/// on the first.
pub fn create_test_schedule() -> TaskSchedule {
    let use_docker = std::env::var_os("DOCKER_CONTAINER").is_some();
    let addr = |n: u16| -> String {
        if use_docker {
            format!("task{n}:{}", 50050 + n)
        } else {
            format!("localhost:{}", 50050 + n)
        }
    };

    let params = |extra: &[(&str, Value)], task_id: &str| -> String {
        let mut map = Map::new();
        for (k, v) in extra {
            map.insert((*k).to_string(), v.clone());
        }
        map.insert("task_id".to_string(), Value::String(task_id.to_string()));
        Value::Object(map).to_string()
    };

    let task_1 = ScheduledTask {
        task_id: "task_1".to_string(),
        worker_endpoint: addr(1),
        mode: TaskMode::Sequential,
        scheduled_time_us: 0,
        wait_for_task_id: None,
        deadline_us: 3_000_000,
        estimated_duration_us: 500_000,
        rt_policy: RtPolicy::None,
        rt_priority: 50,
        cpu_affinity: -1,
        max_retries: 0,
        critical: false,
        parameters_json: params(
            &[
                ("mode", Value::String("fast".to_string())),
                ("iterations", Value::Number(100.into())),
            ],
            "task_1",
        ),
    };

    let task_2 = ScheduledTask {
        task_id: "task_2".to_string(),
        worker_endpoint: addr(2),
        mode: TaskMode::Timed,
        scheduled_time_us: 8_000_000,
        wait_for_task_id: None,
        deadline_us: 1_000_000,
        estimated_duration_us: 800_000,
        rt_policy: RtPolicy::None,
        rt_priority: 50,
        cpu_affinity: -1,
        max_retries: 0,
        critical: false,
        parameters_json: params(
            &[
                ("mode", Value::String("normal".to_string())),
                ("data_size", Value::Number(1024.into())),
            ],
            "task_2",
        ),
    };

    let task_3 = ScheduledTask {
        task_id: "task_3".to_string(),
        worker_endpoint: addr(3),
        mode: TaskMode::Sequential,
        scheduled_time_us: 0,
        wait_for_task_id: Some("task_1".to_string()),
        deadline_us: 5_000_000,
        estimated_duration_us: 1_500_000,
        rt_policy: RtPolicy::None,
        rt_priority: 50,
        cpu_affinity: -1,
        max_retries: 0,
        critical: false,
        parameters_json: params(
            &[
                ("mode", Value::String("slow".to_string())),
                ("quality", Value::String("high".to_string())),
            ],
            "task_3",
        ),
    };

    TaskSchedule {
        name: "built-in test schedule".to_string(),
        description: "task_1 (sequential) -> task_3 (sequential, depends on task_1); task_2 (timed @8s)".to_string(),
        start_us: 0,
        end_us: 10_000_000,
        tick_duration_us: 1_000,
        tasks: vec![task_1, task_2, task_3],
    }
}
