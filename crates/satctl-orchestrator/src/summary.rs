use satctl_proto::TaskResult;

use crate::record::{ContextSwitchStats, ExecutionRecord};

/// Render the post-run "Execution Summary" block (spec §4.7 last sentence;
/// grounded in `orchestrator_main.cpp`'s summary loop in
/// `original_source/examples/`, minus the developer-facing
/// sequential-vs-parallel println excluded by spec §9).
pub fn render_summary(history: &[ExecutionRecord]) -> String {
    let mut out = String::from("=== Execution Summary ===\n");
    let mut success = 0usize;
    let mut failed = 0usize;

    for record in history {
        out.push_str(&format!("Task: {}\n", record.task_id));
        out.push_str(&format!("  Scheduled:  {} us\n", record.scheduled_time_us));
        out.push_str(&format!("  Started:    {} us\n", record.actual_start_time_us));
        out.push_str(&format!("  Ended:      {} us\n", record.end_time_us));
        out.push_str(&format!(
            "  Duration:   {} us\n",
            record.end_time_us - record.actual_start_time_us
        ));
        out.push_str(&format!("  Result:     {:?}\n", record.result));
        if record.critical {
            out.push_str("  Critical:   yes\n");
        }
        match record.result {
            TaskResult::Success => success += 1,
            _ => {
                failed += 1;
                if !record.error_message.is_empty() {
                    out.push_str(&format!("  Error:      {}\n", record.error_message));
                }
            }
        }
        out.push('\n');
    }

    out.push_str(&format!("Total tasks: {}\n", history.len()));
    out.push_str(&format!("Successful:  {success}\n"));
    out.push_str(&format!("Failed:      {failed}\n"));

    let stats = ContextSwitchStats::compute(history);
    out.push_str("Context-switch time:\n");
    out.push_str(&format!("  count: {}\n", stats.count));
    out.push_str(&format!("  avg:   {:.1} us\n", stats.avg_us));
    out.push_str(&format!("  min:   {} us\n", stats.min_us));
    out.push_str(&format!("  max:   {} us\n", stats.max_us));
    out.push_str(&format!("  total: {} us\n", stats.total_us));

    out
}
