//! Pod log batches and watermark filtering

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Substrings that mark a line as platform noise (probes, scrapes)
const NOISE_MARKERS: [&str; 3] = ["node", "metrics", "healthz"];

static LINE_STAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d\S+)").expect("valid regex"));

/// Log lines from one pod plus the newest timestamp seen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    #[serde(rename = "logs")]
    pub lines: Vec<String>,
    #[serde(rename = "logsTimestamp", skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// `sinceTime` to request for a watermark; the API is inclusive, so one
/// second is added to avoid re-delivering the last line
pub fn since_time(watermark: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    watermark.map(|w| w + Duration::seconds(1))
}

/// Leading RFC 3339 timestamp of a line fetched with `timestamps=true`
pub fn line_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let token = LINE_STAMP.captures(line)?.get(1)?.as_str();
    DateTime::parse_from_rfc3339(token)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn is_noise(line: &str) -> bool {
    line.trim().is_empty() || NOISE_MARKERS.iter().any(|m| line.contains(m))
}

/// Turn a raw log response into a batch.
///
/// Lines stamped at or before `watermark` are dropped. Noise lines are
/// dropped unless `show_noise` is set. `last_timestamp` is the newest stamp
/// in the raw response, `None` when it has no stamped lines.
pub fn parse_log_batch(
    raw: &str,
    watermark: Option<DateTime<Utc>>,
    show_noise: bool,
) -> LogBatch {
    let mut lines = Vec::new();
    let mut last_timestamp: Option<DateTime<Utc>> = None;

    for line in raw.lines() {
        let stamp = line_timestamp(line);
        if let Some(t) = stamp {
            last_timestamp = Some(last_timestamp.map_or(t, |prev| prev.max(t)));
        }

        if let (Some(t), Some(w)) = (stamp, watermark) {
            if t <= w {
                continue;
            }
        }
        if !show_noise && is_noise(line) {
            continue;
        }
        lines.push(line.to_string());
    }

    LogBatch {
        lines,
        last_timestamp,
    }
}
