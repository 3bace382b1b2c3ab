use chrono::NaiveDateTime;

use crate::error::PipelineError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parses a `yyyy-MM-ddTHH:mm:ss[.fff]` dump timestamp as UTC epoch milliseconds.
pub fn parse_timestamp_millis(value: &str) -> Result<i64, PipelineError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .map(|t| t.and_utc().timestamp_millis())
        .map_err(|e| PipelineError::InvalidTimestamp { value: value.to_string(), reason: e.to_string() })
}

/// Whole seconds from `question_ms` to `answer_ms`; the millisecond difference is
/// divided by 1000 with truncation toward zero.
pub fn seconds_between(question_ms: i64, answer_ms: i64) -> i64 {
    (answer_ms - question_ms) / 1000
}
