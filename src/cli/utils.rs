//! CLI utility functions
//!
//! Output helpers shared across commands.

use colored::Colorize;
use serde_json::{json, Value};

use crate::core::cache::PreloadReport;
use crate::telemetry::MetricsSnapshot;

/// Preload report as JSON
pub fn report_json(report: &PreloadReport) -> Value {
    let failed: Vec<Value> = report
        .failed
        .iter()
        .map(|f| {
            json!({
                "key": f.key,
                "kind": f.error.kind(),
                "error": f.error.to_string(),
            })
        })
        .collect();

    json!({
        "outcome": report.outcome(),
        "loaded": report.loaded,
        "failed": failed,
        "elapsed_ms": report.elapsed.as_secs_f64() * 1000.0,
    })
}

/// Human-readable preload report
pub fn print_report(report: &PreloadReport) {
    println!(
        "📦 Preload {} in {:.1}ms",
        report.outcome().bold(),
        report.elapsed.as_secs_f64() * 1000.0
    );
    for key in &report.loaded {
        println!("  {} {}", "✓".green(), key);
    }
    for failure in &report.failed {
        println!("  {} {} ({})", "✗".red(), failure.key, failure.error);
    }
}

/// Human-readable metrics snapshot
pub fn print_snapshot(snapshot: &MetricsSnapshot) {
    println!("📊 Metrics (uptime {}ms)\n", snapshot.uptime_ms);

    if !snapshot.counters.is_empty() {
        println!("  {}", "Counters".bold());
        for (name, value) in &snapshot.counters {
            println!("  ├── {:<28} {}", name, value);
        }
    }

    if !snapshot.durations.is_empty() {
        println!("\n  {}", "Durations".bold());
        for (name, stat) in &snapshot.durations {
            println!(
                "  ├── {:<28} n={} avg={:.2}ms max={:.2}ms",
                name, stat.count, stat.avg_ms, stat.max_ms
            );
        }
    }

    println!(
        "\n  Events: {} recorded, {} evicted, {} filtered",
        snapshot.events_recorded, snapshot.events_evicted, snapshot.events_filtered
    );
    for event in &snapshot.recent_events {
        println!(
            "  └── #{} {} {}",
            event.seq,
            event.timestamp.format("%H:%M:%S%.3f"),
            event.name.dimmed()
        );
    }
}

/// Final snapshot on stderr (stdout may carry protocol output)
pub fn eprint_snapshot(snapshot: &MetricsSnapshot) {
    match serde_json::to_string_pretty(snapshot) {
        Ok(json) => eprintln!("{}", json),
        Err(e) => tracing::warn!("failed to serialize metrics snapshot: {}", e),
    }
}
