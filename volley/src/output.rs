use std::time::{Duration, UNIX_EPOCH};

use volley_core::{DistributionReport, Report};

fn format_ts(timestamp_ms: u64) -> String {
    humantime::format_rfc3339_millis(UNIX_EPOCH + Duration::from_millis(timestamp_ms)).to_string()
}

fn fmt_ms(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v:.2}"),
        None => "-".to_string(),
    }
}

/// Intermediate stats block, printed to stderr on every reporting interval.
pub fn print_periodic(report: &Report) {
    eprintln!("Report @ {}", format_ts(report.timestamp_ms));
    eprintln!("  Scenarios launched:  {}", report.scenarios_created);
    eprintln!("  Scenarios completed: {}", report.scenarios_completed);
    eprintln!("  Requests completed:  {}", report.requests_completed);
    eprintln!("  Mean requests/sec:   {:.2}", report.rps.mean);
    eprintln!("  Request latency p95: {} ms", fmt_ms(report.latency.p95));
    eprintln!("  Concurrent users:    {}", report.concurrency);
    if report.pending_requests > 0 {
        eprintln!("  Pending requests:    {}", report.pending_requests);
    }
    for (kind, count) in &report.errors {
        eprintln!("  Errors.{kind}: {count}");
    }
}

fn print_distribution(label: &str, d: &DistributionReport) {
    println!("  {label} (ms):");
    println!("    min: {}", fmt_ms(d.min));
    println!("    max: {}", fmt_ms(d.max));
    println!("    median: {}", fmt_ms(d.median));
    println!("    p95: {}", fmt_ms(d.p95));
    println!("    p99: {}", fmt_ms(d.p99));
}

/// Final cumulative report, printed to stdout.
pub fn print_summary(report: &Report) {
    println!("Complete report @ {}", format_ts(report.timestamp_ms));
    println!("  Scenarios launched:  {}", report.scenarios_created);
    println!("  Scenarios completed: {}", report.scenarios_completed);
    println!("  Requests completed:  {}", report.requests_completed);
    println!(
        "  Requests/sec: {:.2} (count: {})",
        report.rps.mean, report.rps.count
    );

    print_distribution("Request latency", &report.latency);
    print_distribution("Scenario duration", &report.scenario_duration);

    if !report.codes.is_empty() {
        println!("  Codes:");
        for (code, count) in &report.codes {
            println!("    {code}: {count}");
        }
    }
    if !report.errors.is_empty() {
        println!("  Errors:");
        for (kind, count) in &report.errors {
            println!("    {kind}: {count}");
        }
    }
    if report.matches > 0 {
        println!("  Matches: {}", report.matches);
    }
    if !report.custom_stats.is_empty() {
        println!("  Custom stats:");
        for (name, stat) in &report.custom_stats {
            println!(
                "    {name}: count={} mean={:.2} min={:.2} max={:.2}",
                stat.count, stat.mean, stat.min, stat.max
            );
        }
    }
    if report.pending_requests > 0 {
        println!("  Pending requests: {}", report.pending_requests);
    }
}

fn distribution_json(d: &DistributionReport) -> serde_json::Value {
    serde_json::json!({
        "min": d.min,
        "max": d.max,
        "median": d.median,
        "p95": d.p95,
        "p99": d.p99,
    })
}

pub fn report_to_json(report: &Report) -> serde_json::Value {
    let codes: serde_json::Map<String, serde_json::Value> = report
        .codes
        .iter()
        .map(|(code, count)| (code.to_string(), serde_json::json!(count)))
        .collect();

    let errors: serde_json::Map<String, serde_json::Value> = report
        .errors
        .iter()
        .map(|(kind, count)| (kind.clone(), serde_json::json!(count)))
        .collect();

    let custom: serde_json::Map<String, serde_json::Value> = report
        .custom_stats
        .iter()
        .map(|(name, stat)| {
            (
                name.clone(),
                serde_json::json!({
                    "count": stat.count,
                    "mean": stat.mean,
                    "stdev": stat.stdev,
                    "min": stat.min,
                    "max": stat.max,
                }),
            )
        })
        .collect();

    serde_json::json!({
        "timestamp": format_ts(report.timestamp_ms),
        "scenariosCreated": report.scenarios_created,
        "scenariosCompleted": report.scenarios_completed,
        "requestsCompleted": report.requests_completed,
        "rps": { "mean": report.rps.mean, "count": report.rps.count },
        "latency": distribution_json(&report.latency),
        "scenarioDuration": distribution_json(&report.scenario_duration),
        "codes": codes,
        "errors": errors,
        "matches": report.matches,
        "customStats": custom,
        "concurrency": report.concurrency,
        "pendingRequests": report.pending_requests,
    })
}
