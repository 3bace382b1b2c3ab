//! Flat staging record codec.
//!
//! A record is one line: every field value followed by [`SEP`], in a field order fixed
//! by the caller. A missing field is an empty value. Decoding keeps empty trailing fields.

use std::collections::HashMap;

use memchr::memchr_iter;

use crate::error::PipelineError;

pub const SEP: char = '\x01';

/// Named fields of one post, user or intermediate record.
pub type Row = HashMap<String, String>;

pub const POST_FIELDS: [&str; 22] = [
    "Id",
    "PostTypeId",
    "AcceptedAnswerId",
    "ParentId",
    "CreationDate",
    "DeletionDate",
    "Score",
    "ViewCount",
    "Body",
    "OwnerUserId",
    "OwnerDisplayName",
    "LastEditorUserId",
    "LastEditorDisplayName",
    "LastEditDate",
    "LastActivityDate",
    "Title",
    "Tags",
    "AnswerCount",
    "CommentCount",
    "FavoriteCount",
    "ClosedDate",
    "CommunityOwnedDate",
];

pub const USER_FIELDS: [&str; 1] = ["DisplayName"];

pub const AGGREGATE_FIELDS: [&str; 3] = ["AnswerOwnerUserId", "AverageTimeToAnswerInSeconds", "TotalAnswersCount"];

pub const ENRICHED_FIELDS: [&str; 4] =
    ["AnswerOwnerUserId", "DisplayName", "AverageTimeToAnswerInSeconds", "TotalAnswersCount"];

pub const SECONDS_FIELD: &str = "TimeToAnswerInSeconds";

/// Values never contain the separator or a line break.
fn sanitize(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains(['\n', '\r', SEP]) {
        value.replace(['\n', '\r', SEP], " ").into()
    } else {
        value.into()
    }
}

pub fn push_field(buf: &mut String, value: &str) {
    buf.push_str(&sanitize(value));
    buf.push(SEP);
}

pub fn to_sequence_string<S: AsRef<str>>(row: &Row, fields: &[S]) -> String {
    let mut buf = String::new();
    for f in fields {
        push_field(&mut buf, row.get(f.as_ref()).map(String::as_str).unwrap_or(""));
    }
    buf
}

/// Raw field values of a record line, separator-delimited, trailing empty value included.
pub fn split_fields(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for pos in memchr_iter(SEP as u8, line.as_bytes()) {
        parts.push(&line[start..pos]);
        start = pos + 1;
    }
    parts.push(&line[start..]);
    parts
}

pub fn parse_fields<S: AsRef<str>>(line: &str, fields: &[S]) -> Result<Row, PipelineError> {
    let parts = split_fields(line);
    if parts.len() < fields.len() {
        return Err(PipelineError::MalformedRecord(format!(
            "expected {} fields, found {}",
            fields.len(),
            parts.len()
        )));
    }
    Ok(fields.iter().zip(parts).map(|(f, v)| (f.as_ref().to_string(), v.to_string())).collect())
}

/// Field value, or `MissingField` when the row has no such field.
pub fn field<'r>(row: &'r Row, name: &str) -> Result<&'r str, PipelineError> {
    row.get(name).map(String::as_str).ok_or_else(|| PipelineError::MissingField(name.to_string()))
}

/// Non-blank numeric id, or `None` for a blank or unparseable value.
pub fn parse_id(value: Option<&str>) -> Option<i64> {
    value.map(str::trim).filter(|v| !v.is_empty()).and_then(|v| v.parse().ok())
}

pub fn parse_number<T: std::str::FromStr>(row: &Row, name: &str) -> Result<T, PipelineError> {
    let raw = field(row, name)?;
    raw.trim()
        .parse()
        .map_err(|_| PipelineError::MalformedRecord(format!("{} is not a number: {:?}", name, raw)))
}
