//! Metadata stream reader
//!
//! Streams are parsed as one JSON object by an ordered chain of attempts:
//! the text as written, then with a closing brace appended (older writers
//! could crash before finalizing), then cut back to the last complete
//! record. The first attempt that yields an object wins.
//!
//! Records are then classified by key. `Coords-*` records come from the
//! current writer; `FrameKey-<time>-<channel>-<z>` records come from 1.x and
//! embed their own copy of the summary metadata.

use serde_json::{Map, Value};
use std::fmt;

/// Prefix of current-format coordinate records
pub const COORDS_PREFIX: &str = "Coords-";
/// Prefix of current-format metadata records
pub const METADATA_PREFIX: &str = "Metadata-";
/// Prefix of 1.x per-image records
pub const FRAME_KEY_PREFIX: &str = "FrameKey-";
/// Key of the summary record
pub const SUMMARY_KEY: &str = "Summary";

/// How a stream had to be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseAttempt {
    /// Well-formed as written
    Strict,
    /// Missing only its closing brace
    ClosingBrace,
    /// Cut back to the last complete record
    LastCompleteRecord,
}

impl ParseAttempt {
    const CHAIN: [ParseAttempt; 3] = [
        ParseAttempt::Strict,
        ParseAttempt::ClosingBrace,
        ParseAttempt::LastCompleteRecord,
    ];

    fn candidate(&self, text: &str) -> Option<String> {
        match self {
            ParseAttempt::Strict => Some(text.to_string()),
            ParseAttempt::ClosingBrace => Some(format!("{}}}", text)),
            ParseAttempt::LastCompleteRecord => {
                let cut = last_top_level_comma(text)?;
                Some(format!("{}\n}}", &text[..cut]))
            }
        }
    }
}

impl fmt::Display for ParseAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseAttempt::Strict => "strict",
            ParseAttempt::ClosingBrace => "closing brace appended",
            ParseAttempt::LastCompleteRecord => "cut to last complete record",
        };
        f.write_str(name)
    }
}

/// Outcome of one attempt in the chain
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    Parsed(Map<String, Value>),
    NotAnObject,
    Syntax(String),
    NotApplicable,
}

/// A successfully parsed stream
#[derive(Debug, Clone)]
pub struct ParsedStream {
    records: Map<String, Value>,
    attempt: ParseAttempt,
}

/// Result of running the whole chain
#[derive(Debug, Clone)]
pub enum StreamParse {
    Parsed(ParsedStream),
    /// Every attempt failed; each entry is the attempt and why it failed
    Unreadable(Vec<(ParseAttempt, AttemptResult)>),
}

/// Run the parse chain over a stream's text
pub fn parse_stream(text: &str) -> StreamParse {
    let mut failures = Vec::new();
    for attempt in ParseAttempt::CHAIN {
        match try_attempt(attempt, text) {
            AttemptResult::Parsed(records) => {
                return StreamParse::Parsed(ParsedStream { records, attempt })
            }
            other => failures.push((attempt, other)),
        }
    }
    StreamParse::Unreadable(failures)
}

fn try_attempt(attempt: ParseAttempt, text: &str) -> AttemptResult {
    let Some(candidate) = attempt.candidate(text) else {
        return AttemptResult::NotApplicable;
    };
    match serde_json::from_str::<Value>(&candidate) {
        Ok(Value::Object(records)) => AttemptResult::Parsed(records),
        Ok(_) => AttemptResult::NotAnObject,
        Err(e) => AttemptResult::Syntax(e.to_string()),
    }
}

/// Byte offset of the last comma separating top-level records
fn last_top_level_comma(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut last = None;
    for (i, b) in text.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            b',' if depth == 1 => last = Some(i),
            _ => {}
        }
    }
    last
}

/// One classified record
#[derive(Debug, Clone, PartialEq)]
pub enum Record<'a> {
    Summary(&'a Value),
    /// Current-format coordinates for the file named after the prefix
    Coords { file: &'a str, value: &'a Value },
    /// Current-format per-image metadata
    Metadata { file: &'a str, value: &'a Value },
    /// 1.x per-image record; `channel` is an index into the channel table
    FrameKey {
        key: &'a str,
        time: usize,
        channel: usize,
        z: usize,
        value: &'a Value,
    },
    /// A `FrameKey-*` record whose key could not be parsed
    MalformedFrameKey(&'a str),
    Other(&'a str),
}

/// Classify a record by its key
pub fn classify<'a>(key: &'a str, value: &'a Value) -> Record<'a> {
    if key == SUMMARY_KEY {
        Record::Summary(value)
    } else if let Some(file) = key.strip_prefix(COORDS_PREFIX) {
        Record::Coords { file, value }
    } else if let Some(file) = key.strip_prefix(METADATA_PREFIX) {
        Record::Metadata { file, value }
    } else if let Some(rest) = key.strip_prefix(FRAME_KEY_PREFIX) {
        match parse_frame_key(rest) {
            Some((time, channel, z)) => Record::FrameKey {
                key,
                time,
                channel,
                z,
                value,
            },
            None => Record::MalformedFrameKey(key),
        }
    } else {
        Record::Other(key)
    }
}

/// Parse `<time>-<channel>-<z>`
fn parse_frame_key(rest: &str) -> Option<(usize, usize, usize)> {
    let mut parts = rest.split('-');
    let time = parts.next()?.parse().ok()?;
    let channel = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    Some((time, channel, z))
}

impl ParsedStream {
    /// Which attempt in the chain succeeded
    pub fn attempt(&self) -> ParseAttempt {
        self.attempt
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in stream order. If a key occurs more than once the last
    /// value is kept, at the position of the first occurrence.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.records.iter().map(|(k, v)| classify(k, v))
    }

    /// The top-level summary record
    pub fn summary(&self) -> Option<&Value> {
        self.records.get(SUMMARY_KEY)
    }

    /// The `Metadata-<file>` record paired with a `Coords-<file>` record
    pub fn metadata_for(&self, file: &str) -> Option<&Value> {
        self.records.get(&format!("{}{}", METADATA_PREFIX, file))
    }
}
