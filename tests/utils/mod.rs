// Shared helpers for CLI integration tests

use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;

/// One JSON-lines event record
pub fn event_line(sql: &str, started_at: f64, ended_at: f64) -> String {
    json!({
        "sql": sql,
        "started_at": started_at,
        "ended_at": ended_at,
    })
    .to_string()
}

/// Write `lines` to a temporary `.jsonl` file
pub fn events_file(lines: &[String]) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".jsonl")
        .tempfile()
        .expect("create events file");
    for line in lines {
        writeln!(file, "{}", line).expect("write event line");
    }
    file.flush().expect("flush events file");
    file
}

/// `count` executions of the same statement shape with different literals
pub fn repeated_lookup(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let start = i as f64;
            event_line(
                &format!("SELECT * FROM authors WHERE id = {}", i),
                start,
                start + 0.25,
            )
        })
        .collect()
}
