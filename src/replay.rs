//! Offline replay of recorded query events
//!
//! Events are stored one JSON object per line:
//!
//! ```text
//! {"sql": "SELECT * FROM posts WHERE id = ?", "params": [1], "started_at": 0.10, "ended_at": 0.12}
//! {"sql": "UPDATE posts SET views = views + 1", "started_at": 0.13, "ended_at": 0.20, "failed": true}
//! ```

use crate::event::QueryEvent;
use crate::profiler::Profiler;
use crate::stats::Stats;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// Parse JSON-lines events from `reader`; blank lines are skipped
pub fn parse_events<R: BufRead>(reader: R) -> Result<Vec<QueryEvent>> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("Failed to read line {}", line_no))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: QueryEvent = serde_json::from_str(&line)
            .with_context(|| format!("Invalid query event on line {}", line_no))?;
        events.push(event);
    }
    Ok(events)
}

/// Read a JSON-lines event file
pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<QueryEvent>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open events file: {}", path.display()))?;
    let events = parse_events(BufReader::new(file))
        .with_context(|| format!("Failed to parse events file: {}", path.display()))?;
    debug!(count = events.len(), path = %path.display(), "events loaded");
    Ok(events)
}

/// Feed `events` through one session of `profiler` and return its stats
pub fn replay(
    profiler: &Profiler,
    label: &str,
    save_report: bool,
    events: &[QueryEvent],
) -> Result<Stats> {
    let registry = profiler.registry();
    let (delivered, stats) = profiler.profile(label, save_report, || {
        events
            .iter()
            .try_for_each(|event| registry.deliver(event).map(|_| ()))
    })?;
    delivered.context("Failed to replay query events")?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const EVENTS: &str = r#"
{"sql": "SELECT * FROM posts WHERE id = 1", "params": null, "started_at": 0.0, "ended_at": 0.5}

{"sql": "SELECT * FROM posts WHERE id = 2", "started_at": 1.0, "ended_at": 1.25}
{"sql": "DELETE FROM posts", "started_at": 2.0, "ended_at": 2.5, "failed": true}
"#;

    #[test]
    fn test_parse_skips_blank_lines() {
        let events = parse_events(Cursor::new(EVENTS)).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[1].parameters.is_null());
        assert!(events[2].failed);
    }

    #[test]
    fn test_parse_error_names_line() {
        let input = "{\"sql\": \"SELECT 1\", \"started_at\": 0.0, \"ended_at\": 1.0}\nnot json\n";
        let err = parse_events(Cursor::new(input)).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_replay_groups_events() {
        let events = parse_events(Cursor::new(EVENTS)).unwrap();
        let stats = replay(&Profiler::default(), "replay", false, &events).unwrap();
        assert_eq!(stats.query_count(), 3);
        assert_eq!(stats.unique_queries(), 2);
        assert_eq!(stats.failed_count(), 1);
        assert!((stats.total_time() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_replay_rejects_backwards_event() {
        let events = vec![QueryEvent::new("SELECT 1", serde_json::Value::Null, 2.0, 1.0)];
        let profiler = Profiler::default();
        assert!(replay(&profiler, "bad", false, &events).is_err());
        assert_eq!(profiler.registry().active_count(), 0);
    }
}
