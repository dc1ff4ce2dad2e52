// ABOUTME: ASTM E1394 record parser — lifts a CR-terminated record line into a typed field tree
// ABOUTME: Four nesting levels (field/repeat/component/subcomponent) plus on-demand timestamp parsing

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

/// The four delimiters discovered from a session's first `H` record.
///
/// Conventional defaults (`|`, `\`, `^`, `&`) are used when the header
/// can't be read, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub field: u8,
    pub repeat: u8,
    pub component: u8,
    pub escape: u8,
}

impl Default for Delimiters {
    fn default() -> Self {
        Delimiters {
            field: b'|',
            repeat: b'\\',
            component: b'^',
            escape: b'&',
        }
    }
}

impl Delimiters {
    /// Discover the delimiter set from the raw text of a session's first
    /// record, e.g. `H|\^&|||cobas|...`. The field delimiter is the byte
    /// immediately following the leading type code; the repeat, component,
    /// and escape delimiters are the next three bytes of the second field.
    ///
    /// Returns the conventional defaults if `line` doesn't start with `H`
    /// or the second field is too short to carry all three delimiters.
    pub fn discover(line: &str) -> Delimiters {
        let bytes = line.as_bytes();
        if bytes.len() < 6 || bytes[0] != b'H' {
            return Delimiters::default();
        }
        let field = bytes[1];
        if bytes[5] != field {
            // The second field isn't closed where expected: fall back.
            return Delimiters::default();
        }
        Delimiters {
            field,
            repeat: bytes[2],
            component: bytes[3],
            escape: bytes[4],
        }
    }
}

/// A node in the record's field tree.
///
/// The parser exposes structure without enforcing a schema: any record
/// decodes to the same shape, and callers that know a record type's
/// positional layout index into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Leaf(String),
    Repeat(Vec<Field>),
    Components(Vec<Field>),
    Subcomponents(Vec<String>),
}

impl Field {
    /// The plain text of a `Leaf`/`Subcomponents`-of-one field, or `None`
    /// for anything with real repeat/component structure.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Leaf(s) => Some(s),
            Field::Subcomponents(v) if v.len() == 1 => Some(&v[0]),
            _ => None,
        }
    }

    /// Parse this field's text as an ASTM timestamp (`YYYYMMDDhhmmss`, with
    /// optional truncation down to `YYYYMMDD`). Malformed or non-timestamp
    /// text comes back as `Timestamp::Malformed` rather than `None`, since a
    /// field the caller expected to be a date is still worth surfacing (per
    /// spec.md §4.2's "flagged" requirement) instead of silently discarding.
    pub fn as_timestamp(&self) -> Timestamp {
        let raw = match self.as_str() {
            Some(s) => s,
            None => return Timestamp::Malformed(format!("{self:?}")),
        };
        parse_timestamp(raw)
    }
}

/// A normalized ASTM timestamp, or the raw text that didn't match the
/// expected shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timestamp {
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Malformed(String),
}

/// Parse `YYYYMMDD`, `YYYYMMDDhh`, `YYYYMMDDhhmm`, or `YYYYMMDDhhmmss`.
pub fn parse_timestamp(raw: &str) -> Timestamp {
    if raw.is_empty() || raw.len() < 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Timestamp::Malformed(raw.to_string());
    }
    let year: i32 = match raw[0..4].parse() {
        Ok(v) => v,
        Err(_) => return Timestamp::Malformed(raw.to_string()),
    };
    let month: u32 = match raw[4..6].parse() {
        Ok(v) => v,
        Err(_) => return Timestamp::Malformed(raw.to_string()),
    };
    let day: u32 = match raw[6..8].parse() {
        Ok(v) => v,
        Err(_) => return Timestamp::Malformed(raw.to_string()),
    };
    let date = match NaiveDate::from_ymd_opt(year, month, day) {
        Some(d) => d,
        None => return Timestamp::Malformed(raw.to_string()),
    };
    if raw.len() == 8 {
        return Timestamp::Date(date);
    }
    let hour: u32 = match raw.get(8..10).and_then(|s| s.parse().ok()) {
        Some(v) => v,
        None => return Timestamp::Malformed(raw.to_string()),
    };
    let min: u32 = raw.get(10..12).and_then(|s| s.parse().ok()).unwrap_or(0);
    let sec: u32 = raw.get(12..14).and_then(|s| s.parse().ok()).unwrap_or(0);
    let time = match NaiveTime::from_hms_opt(hour, min, sec) {
        Some(t) => t,
        None => return Timestamp::Malformed(raw.to_string()),
    };
    Timestamp::DateTime(NaiveDateTime::new(date, time))
}

/// A parsed record: its type code and its fields, field 0 included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub fields: Vec<Field>,
}

impl Record {
    /// The record's type code — the text of field 0 (`"H"`, `"P"`, `"O"`, ...).
    pub fn record_type(&self) -> Option<&str> {
        self.fields.first().and_then(Field::as_str)
    }

    /// Field by 0-based index, field 0 being the type code.
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("empty record")]
    Empty,
}

/// Parse one CR-stripped record line into a [`Record`] using `delims`.
pub fn parse_record(line: &str, delims: &Delimiters) -> Result<Record, RecordError> {
    if line.is_empty() {
        return Err(RecordError::Empty);
    }
    let fields = split_byte(line, delims.field)
        .map(|field_text| parse_field(field_text, delims))
        .collect();
    Ok(Record { fields })
}

fn parse_field(text: &str, delims: &Delimiters) -> Field {
    let repeats: Vec<Field> = split_byte(text, delims.repeat)
        .map(|r| parse_components(r, delims))
        .collect();
    if repeats.len() == 1 {
        repeats.into_iter().next().unwrap()
    } else {
        Field::Repeat(repeats)
    }
}

fn parse_components(text: &str, delims: &Delimiters) -> Field {
    let components: Vec<Field> = split_byte(text, delims.component)
        .map(|c| parse_subcomponents(c, delims))
        .collect();
    if components.len() == 1 {
        components.into_iter().next().unwrap()
    } else {
        Field::Components(components)
    }
}

fn parse_subcomponents(text: &str, delims: &Delimiters) -> Field {
    let parts = split_subcomponents(text, delims);
    if parts.len() == 1 {
        Field::Leaf(parts.into_iter().next().unwrap())
    } else {
        Field::Subcomponents(parts)
    }
}

/// The escape byte also conventionally separates subcomponents, so a single
/// pass has to tell a genuine delimiter occurrence apart from one forming a
/// recognized `&F&`/`&R&`/`&S&`/`&E&` escape sequence: walk the text byte by
/// byte, resolving recognized sequences into their literal delimiter byte in
/// place, and treating any other standalone escape byte as a subcomponent
/// boundary. Per spec.md §4.2, sequences that don't match one of the four
/// known codes pass through unchanged (including their escape bytes).
fn split_subcomponents(text: &str, delims: &Delimiters) -> Vec<String> {
    let esc = delims.escape;
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == esc {
            let code = bytes.get(i + 1).copied();
            let closing = bytes.get(i + 2).copied();
            if code.is_some() && closing == Some(esc) {
                // A well-formed `&X&` escape sequence: a unit, not a split
                // point, whether or not `X` is one of the four known codes.
                let literal = match code.unwrap() {
                    b'F' => Some(delims.field),
                    b'R' => Some(delims.repeat),
                    b'S' => Some(delims.component),
                    b'E' => Some(delims.escape),
                    _ => None,
                };
                match literal {
                    Some(lit) => current.push(lit as char),
                    None => {
                        current.push(esc as char);
                        current.push(code.unwrap() as char);
                        current.push(esc as char);
                    }
                }
                i += 3;
                continue;
            }
            // A standalone escape byte not forming `&X&`: a subcomponent boundary.
            parts.push(std::mem::take(&mut current));
            i += 1;
            continue;
        }
        current.push(b as char);
        i += 1;
    }
    parts.push(current);
    parts
}

fn split_byte(text: &str, delim: u8) -> impl Iterator<Item = &str> {
    text.split(delim as char)
}
