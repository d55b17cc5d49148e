//! Append-only JSONL log of synthesis runs.

use crate::core::types::{SynthEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// ISO 8601 UTC timestamp without a date-time dependency.
pub fn now_iso8601() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_iso8601(secs)
}

/// Format seconds since the Unix epoch as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_iso8601(secs: u64) -> String {
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    let mut y = 1970i64;
    let mut remaining = days as i64;
    loop {
        let year_days = if is_leap(y) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        y += 1;
    }
    let feb = if is_leap(y) { 29 } else { 28 };
    let month_days = [31, feb, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut m = 12;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md {
            m = i + 1;
            break;
        }
        remaining -= md;
    }
    let d = remaining + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y, m, d, hours, minutes, seconds
    )
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("s-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Event log location inside an output directory.
pub fn event_log_path(out_dir: &Path) -> PathBuf {
    out_dir.join("events.jsonl")
}

/// Append an event to the output directory's event log.
pub fn append_event(out_dir: &Path, event: SynthEvent) -> Result<(), String> {
    let path = event_log_path(out_dir);
    std::fs::create_dir_all(out_dir)
        .map_err(|e| format!("cannot create {}: {}", out_dir.display(), e))?;

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Read every event back, oldest first. A missing log is empty.
pub fn read_events(out_dir: &Path) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(out_dir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| format!("{}:{}: invalid event: {}", path.display(), i + 1, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }

    #[test]
    fn test_format_iso8601_known_instants() {
        assert_eq!(format_iso8601(0), "1970-01-01T00:00:00Z");
        // 2000-02-29 12:34:56 UTC
        assert_eq!(format_iso8601(951_827_696), "2000-02-29T12:34:56Z");
        // 2026-12-31 23:59:59 UTC
        assert_eq!(format_iso8601(1_798_761_599), "2026-12-31T23:59:59Z");
    }

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("s-"));
        assert_eq!(id.len(), 14);
    }

    #[test]
    fn test_event_log_path() {
        let p = event_log_path(Path::new("/out"));
        assert_eq!(p, PathBuf::from("/out/events.jsonl"));
    }

    #[test]
    fn test_append_and_read_events() {
        let dir = tempfile::tempdir().unwrap();
        append_event(
            dir.path(),
            SynthEvent::SynthStarted {
                app: "demo".to_string(),
                run_id: "s-abc".to_string(),
                strata_version: "0.3.0".to_string(),
            },
        )
        .unwrap();
        append_event(
            dir.path(),
            SynthEvent::SynthFailed {
                app: "demo".to_string(),
                run_id: "s-abc".to_string(),
                error: "boom".to_string(),
            },
        )
        .unwrap();

        let content = std::fs::read_to_string(event_log_path(dir.path())).unwrap();
        assert!(content.contains("\"event\":\"synth_started\""));
        assert_eq!(content.lines().count(), 2);

        let events = read_events(dir.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].event, SynthEvent::SynthFailed { .. }));
    }

    #[test]
    fn test_read_events_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_events(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_is_leap() {
        assert!(is_leap(2000));
        assert!(!is_leap(1900));
        assert!(!is_leap(2100));
        assert!(is_leap(2024));
        assert!(!is_leap(2026));
    }
}
