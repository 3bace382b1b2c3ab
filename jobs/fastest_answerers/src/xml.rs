use regex::Regex;

use crate::error::PipelineError;
use crate::record::Row;

const ATTRIBUTE_PATTERN: &str = r#"([A-Za-z_][\w.-]*)="([^"]*)""#;

/// Parser for the one-`<row .../>`-per-line layout of the StackOverflow dumps.
/// Each map task builds its own.
pub struct XmlRowParser {
    attribute: Regex,
}

impl XmlRowParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self { attribute: Regex::new(ATTRIBUTE_PATTERN)? })
    }

    /// Attributes of a `<row>` element. Lines that are not rows (the XML declaration,
    /// the enclosing `<posts>`/`<users>` tags, blank lines) give `None`.
    pub fn parse(&self, line: &str) -> Result<Option<Row>, PipelineError> {
        let trimmed = line.trim();
        if !trimmed.starts_with("<row") {
            return Ok(None);
        }
        if !trimmed.ends_with("/>") {
            return Err(malformed(trimmed, "row element is not self-closing"));
        }
        // attributes must tile the element body, separated by whitespace only
        let body = &trimmed["<row".len()..trimmed.len() - "/>".len()];
        let mut row = Row::new();
        let mut end = 0;
        for cap in self.attribute.captures_iter(body) {
            let whole = cap.get(0).map_or(end..end, |m| m.range());
            let gap = &body[end..whole.start];
            if gap.is_empty() || !gap.chars().all(char::is_whitespace) {
                return Err(malformed(trimmed, &format!("unexpected text {:?} before attribute", gap.trim())));
            }
            let value = decode_entities(&cap[2]).map_err(|reason| malformed(trimmed, &reason))?;
            row.insert(cap[1].to_string(), value);
            end = whole.end;
        }
        let tail = &body[end..];
        if !tail.chars().all(char::is_whitespace) {
            return Err(malformed(trimmed, &format!("unexpected text {:?} in row", tail.trim())));
        }
        Ok(Some(row))
    }
}

fn malformed(line: &str, reason: &str) -> PipelineError {
    PipelineError::MalformedRow { line: line.to_string(), reason: reason.to_string() }
}

fn decode_entities(raw: &str) -> Result<String, String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let end = tail.find(';').ok_or_else(|| format!("unterminated entity in {:?}", raw))?;
        let entity = &tail[1..end];
        let decoded = match entity {
            "quot" => '"',
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "apos" => '\'',
            _ => decode_char_ref(entity).ok_or_else(|| format!("unknown entity &{};", entity))?,
        };
        out.push(decoded);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn decode_char_ref(entity: &str) -> Option<char> {
    let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        entity.strip_prefix('#')?.parse().ok()?
    };
    char::from_u32(code)
}
