//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;

use crate::colony::{Colony, ColonyStats};

/// Collect all metrics from the colony and format as Prometheus text.
pub async fn collect_metrics(colony: &Colony) -> String {
    let stats = colony.stats().await;
    let mut output = String::new();

    write_task_metrics(&stats, &mut output);
    write_worker_metrics(&stats, &mut output);
    write_capacity_metrics(&stats, &mut output);

    output
}

fn write_task_metrics(stats: &ColonyStats, output: &mut String) {
    writeln!(output, "# HELP swarmrun_tasks Number of tasks by status").ok();
    writeln!(output, "# TYPE swarmrun_tasks gauge").ok();
    for (status, count) in &stats.tasks {
        writeln!(output, "swarmrun_tasks{{status=\"{status}\"}} {count}").ok();
    }
}

fn write_worker_metrics(stats: &ColonyStats, output: &mut String) {
    writeln!(output).ok();
    writeln!(output, "# HELP swarmrun_workers Number of workers by status").ok();
    writeln!(output, "# TYPE swarmrun_workers gauge").ok();
    for (status, count) in &stats.workers {
        writeln!(output, "swarmrun_workers{{status=\"{status}\"}} {count}").ok();
    }
}

fn write_capacity_metrics(stats: &ColonyStats, output: &mut String) {
    let gauges = [
        (
            "swarmrun_capacity_reserved",
            "Concurrency slots currently reserved",
            "gauge",
            stats.capacity_reserved,
        ),
        (
            "swarmrun_capacity_max_concurrent",
            "Ceiling on simultaneously busy workers",
            "gauge",
            stats.max_concurrent,
        ),
        (
            "swarmrun_admissions_total",
            "Admissions granted by the capacity governor",
            "counter",
            stats.admissions_total,
        ),
        (
            "swarmrun_admissions_rejected_total",
            "Admissions rejected by the capacity governor",
            "counter",
            stats.admissions_rejected_total,
        ),
    ];

    for (name, help, kind, value) in gauges {
        writeln!(output).ok();
        writeln!(output, "# HELP {name} {help}").ok();
        writeln!(output, "# TYPE {name} {kind}").ok();
        writeln!(output, "{name} {value}").ok();
    }
}
