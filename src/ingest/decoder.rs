//! Incremental Record Decoder
//!
//! Turns a byte stream holding one JSON object whose keys are record ids into
//! a lazy, forward-only sequence of [`Record`]s, in key-encounter order.
//!
//! ```text
//! { "AEAJM" : { ...fields... } , "AEAUH" : { ...fields... } }
//!   └─ id ──┘ └──── value ────┘   └─ id ──┘ └──── value ────┘
//!                   │                             │
//!                   ▼                             ▼
//!            Record { id: AEAJM }          Record { id: AEAUH }
//! ```
//!
//! The decoder frames the outer object itself and buffers exactly one
//! top-level value at a time, which is then handed to `serde_json`. Memory use
//! is bounded by [`MAX_RECORD_BYTES`] regardless of document size.
//!
//! The first error ends the sequence: there is no skip-and-continue mode.

use crate::domain::{Record, RecordError, RecordFields};
use memchr::memchr2;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::iter::FusedIterator;
use std::path::Path;

/// Largest single record value the decoder will buffer
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;
/// Largest record id (raw, including escapes)
pub const MAX_KEY_BYTES: usize = 4 * 1024;
/// Deepest object/array nesting accepted inside one record value
pub const MAX_NESTING_DEPTH: usize = 64;

/// Decode failure. Fatal to the whole ingestion.
#[derive(Debug)]
pub enum ParseError {
    /// Malformed framing at a byte offset
    Syntax { offset: u64, message: String },
    /// Input ended inside the document
    UnexpectedEof { offset: u64 },
    /// A top-level key was the empty string
    EmptyId { offset: u64 },
    /// A top-level value was not a JSON object
    NotAnObject { id: String },
    /// Required `name` absent or empty
    MissingName { id: String },
    /// A field had the wrong shape
    InvalidField { id: String, message: String },
    /// A record value exceeded the buffer limit
    RecordTooLarge { id: String, limit: usize },
    /// Underlying reader failed
    Io(io::Error),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Syntax { offset, message } => {
                write!(f, "syntax error at byte {}: {}", offset, message)
            }
            ParseError::UnexpectedEof { offset } => {
                write!(f, "unexpected end of input at byte {}", offset)
            }
            ParseError::EmptyId { offset } => write!(f, "empty record id at byte {}", offset),
            ParseError::NotAnObject { id } => {
                write!(f, "record '{}' is not a JSON object", id)
            }
            ParseError::MissingName { id } => {
                write!(f, "record '{}' is missing the required name", id)
            }
            ParseError::InvalidField { id, message } => {
                write!(f, "record '{}' has an invalid field: {}", id, message)
            }
            ParseError::RecordTooLarge { id, limit } => {
                write!(f, "record '{}' exceeds {} bytes", id, limit)
            }
            ParseError::Io(e) => write!(f, "read error: {}", e),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(e: io::Error) -> Self {
        ParseError::Io(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the opening brace
    Start,
    /// After the opening brace, no entry yet
    FirstEntry,
    /// After at least one entry
    NextEntry,
    /// Closing brace seen, or an error was returned
    Finished,
}

/// What a copied span belongs to, for limit errors
#[derive(Clone, Copy)]
enum Frame<'a> {
    Key,
    Value(&'a str),
}

impl Frame<'_> {
    fn limit(&self) -> usize {
        match self {
            Frame::Key => MAX_KEY_BYTES,
            Frame::Value(_) => MAX_RECORD_BYTES,
        }
    }

    fn overflow(&self, offset: u64) -> ParseError {
        match self {
            Frame::Key => ParseError::Syntax {
                offset,
                message: format!("record id longer than {} bytes", MAX_KEY_BYTES),
            },
            Frame::Value(id) => ParseError::RecordTooLarge {
                id: id.to_string(),
                limit: MAX_RECORD_BYTES,
            },
        }
    }
}

/// Lazy record sequence over a buffered reader
pub struct StreamDecoder<R> {
    reader: R,
    state: State,
    /// Bytes consumed so far
    offset: u64,
    key_buf: Vec<u8>,
    value_buf: Vec<u8>,
    records_decoded: u64,
}

impl<R: Read> StreamDecoder<BufReader<R>> {
    pub fn from_reader(reader: R) -> Self {
        StreamDecoder::new(BufReader::new(reader))
    }
}

impl StreamDecoder<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(StreamDecoder::from_reader(File::open(path)?))
    }
}

impl<R: BufRead> StreamDecoder<R> {
    pub fn new(reader: R) -> Self {
        StreamDecoder {
            reader,
            state: State::Start,
            offset: 0,
            key_buf: Vec::with_capacity(64),
            value_buf: Vec::with_capacity(1024),
            records_decoded: 0,
        }
    }

    pub fn records_decoded(&self) -> u64 {
        self.records_decoded
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn next_record(&mut self) -> Result<Option<Record>, ParseError> {
        match self.state {
            State::Finished => return Ok(None),
            State::Start => {
                self.skip_whitespace()?;
                self.expect(b'{')?;
                self.state = State::FirstEntry;
            }
            State::FirstEntry | State::NextEntry => {}
        }

        self.skip_whitespace()?;
        let next = self.peek_required()?;
        match (self.state, next) {
            (_, b'}') => {
                self.bump();
                self.finish()?;
                return Ok(None);
            }
            (State::NextEntry, b',') => {
                self.bump();
                self.skip_whitespace()?;
            }
            (State::NextEntry, other) => {
                return Err(self.syntax(format!(
                    "expected ',' or '}}' after a record, found '{}'",
                    other as char
                )));
            }
            _ => {}
        }

        let key_offset = self.offset;
        let id = self.read_key()?;
        if id.is_empty() {
            return Err(ParseError::EmptyId { offset: key_offset });
        }
        self.skip_whitespace()?;
        self.expect(b':')?;
        self.skip_whitespace()?;
        self.read_value(&id)?;
        self.state = State::NextEntry;

        let record = self.build_record(id)?;
        self.records_decoded += 1;
        Ok(Some(record))
    }

    fn build_record(&self, id: String) -> Result<Record, ParseError> {
        let fields: RecordFields = match serde_json::from_slice(&self.value_buf) {
            Ok(fields) => fields,
            Err(e) => {
                return Err(ParseError::InvalidField {
                    id,
                    message: e.to_string(),
                })
            }
        };
        let record = Record::new(id, fields);
        match record.validate() {
            Ok(()) => Ok(record),
            Err(RecordError::EmptyName { id }) => Err(ParseError::MissingName { id }),
            Err(RecordError::EmptyId) => Err(ParseError::EmptyId {
                offset: self.offset,
            }),
        }
    }

    /// After the closing brace only whitespace may follow.
    fn finish(&mut self) -> Result<(), ParseError> {
        self.state = State::Finished;
        self.skip_whitespace()?;
        match self.peek()? {
            None => Ok(()),
            Some(b) => Err(self.syntax(format!(
                "trailing data after the document: '{}'",
                b as char
            ))),
        }
    }

    fn read_key(&mut self) -> Result<String, ParseError> {
        self.expect(b'"')?;
        let mut out = std::mem::take(&mut self.key_buf);
        out.clear();
        out.push(b'"');
        let copied = self.copy_string_body(&mut out, Frame::Key);
        let decoded = copied.and_then(|()| {
            serde_json::from_slice::<String>(&out)
                .map_err(|e| self.syntax(format!("invalid record id: {}", e)))
        });
        self.key_buf = out;
        decoded
    }

    fn read_value(&mut self, id: &str) -> Result<(), ParseError> {
        if self.peek_required()? != b'{' {
            return Err(ParseError::NotAnObject { id: id.to_string() });
        }
        let mut out = std::mem::take(&mut self.value_buf);
        out.clear();
        let copied = self.copy_object(&mut out, id);
        self.value_buf = out;
        copied
    }

    /// Copy one balanced object, string-aware, into `out`.
    fn copy_object(&mut self, out: &mut Vec<u8>, id: &str) -> Result<(), ParseError> {
        let frame = Frame::Value(id);
        let mut depth = 0usize;
        loop {
            let (consumed, closed, in_string, too_deep) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Err(ParseError::UnexpectedEof {
                        offset: self.offset,
                    });
                }
                let mut i = 0;
                let mut closed = false;
                let mut in_string = false;
                let mut too_deep = false;
                while i < buf.len() {
                    match buf[i] {
                        b'{' | b'[' => {
                            depth += 1;
                            if depth > MAX_NESTING_DEPTH {
                                too_deep = true;
                                break;
                            }
                        }
                        b'}' | b']' => {
                            depth -= 1;
                            if depth == 0 {
                                i += 1;
                                closed = true;
                                break;
                            }
                        }
                        b'"' => {
                            i += 1;
                            in_string = true;
                            break;
                        }
                        _ => {}
                    }
                    i += 1;
                }
                out.extend_from_slice(&buf[..i]);
                (i, closed, in_string, too_deep)
            };
            self.advance(consumed);

            if too_deep {
                return Err(self.syntax(format!(
                    "record '{}' nests deeper than {} levels",
                    id, MAX_NESTING_DEPTH
                )));
            }
            if out.len() > frame.limit() {
                return Err(frame.overflow(self.offset));
            }
            if closed {
                return Ok(());
            }
            if in_string {
                self.copy_string_body(out, frame)?;
            }
        }
    }

    /// Copy a string body up to and including its closing quote. The opening
    /// quote has already been consumed and written to `out`.
    fn copy_string_body(&mut self, out: &mut Vec<u8>, frame: Frame<'_>) -> Result<(), ParseError> {
        let mut escaped = false;
        loop {
            let (consumed, closed) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Err(ParseError::UnexpectedEof {
                        offset: self.offset,
                    });
                }
                let mut i = 0;
                let mut closed = false;
                if escaped {
                    i = 1;
                    escaped = false;
                }
                while i < buf.len() {
                    match memchr2(b'"', b'\\', &buf[i..]) {
                        None => {
                            i = buf.len();
                        }
                        Some(pos) => {
                            let at = i + pos;
                            if buf[at] == b'"' {
                                i = at + 1;
                                closed = true;
                                break;
                            }
                            if at + 1 < buf.len() {
                                i = at + 2;
                            } else {
                                i = buf.len();
                                escaped = true;
                            }
                        }
                    }
                }
                out.extend_from_slice(&buf[..i]);
                (i, closed)
            };
            self.advance(consumed);

            if out.len() > frame.limit() {
                return Err(frame.overflow(self.offset));
            }
            if closed {
                return Ok(());
            }
        }
    }

    // =========================================================================
    // Byte cursor
    // =========================================================================

    fn peek(&mut self) -> Result<Option<u8>, ParseError> {
        Ok(self.reader.fill_buf()?.first().copied())
    }

    fn peek_required(&mut self) -> Result<u8, ParseError> {
        match self.peek()? {
            Some(b) => Ok(b),
            None => Err(ParseError::UnexpectedEof {
                offset: self.offset,
            }),
        }
    }

    fn bump(&mut self) {
        self.advance(1);
    }

    fn advance(&mut self, n: usize) {
        self.reader.consume(n);
        self.offset += n as u64;
    }

    fn expect(&mut self, wanted: u8) -> Result<(), ParseError> {
        let found = self.peek_required()?;
        if found != wanted {
            return Err(self.syntax(format!(
                "expected '{}', found '{}'",
                wanted as char, found as char
            )));
        }
        self.bump();
        Ok(())
    }

    fn skip_whitespace(&mut self) -> Result<(), ParseError> {
        loop {
            let (skipped, exhausted) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(());
                }
                let skipped = buf
                    .iter()
                    .take_while(|&&b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
                    .count();
                (skipped, skipped == buf.len())
            };
            self.advance(skipped);
            if !exhausted {
                return Ok(());
            }
        }
    }

    fn syntax(&self, message: String) -> ParseError {
        ParseError::Syntax {
            offset: self.offset,
            message,
        }
    }
}

impl<R: BufRead> Iterator for StreamDecoder<R> {
    type Item = Result<Record, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.state = State::Finished;
                Some(Err(e))
            }
        }
    }
}

impl<R: BufRead> FusedIterator for StreamDecoder<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Coordinates;
    use std::io::Cursor;

    const TWO_PORTS: &str = r#"
    {
      "AEAJM": {
        "name": "Ajman",
        "city": "Ajman",
        "country": "United Arab Emirates",
        "alias": [],
        "regions": [],
        "coordinates": [
          55.5136433,
          25.4052165
        ],
        "province": "Ajman",
        "timezone": "Asia/Dubai",
        "unlocs": [
          "AEAJM"
        ],
        "code": "52000"
      },
      "AEAUH": {
        "name": "Abu Dhabi",
        "coordinates": [
          54.37,
          24.47
        ],
        "city": "Abu Dhabi",
        "province": "Abu Z¸aby [Abu Dhabi]",
        "country": "United Arab Emirates",
        "alias": [],
        "regions": [],
        "timezone": "Asia/Dubai",
        "unlocs": [
          "AEAUH"
        ],
        "code": "52001"
      }
    }
    "#;

    fn decode_all(input: &str) -> Vec<Result<Record, ParseError>> {
        StreamDecoder::from_reader(input.as_bytes()).collect()
    }

    /// A tiny read buffer forces every token across buffer boundaries.
    fn decode_with_capacity(input: &str, capacity: usize) -> Vec<Result<Record, ParseError>> {
        StreamDecoder::new(BufReader::with_capacity(capacity, Cursor::new(input.to_string())))
            .collect()
    }

    fn ids(results: &[Result<Record, ParseError>]) -> Vec<String> {
        results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|r| r.id.clone())
            .collect()
    }

    #[test]
    fn test_decodes_records_in_key_order() {
        let results = decode_all(TWO_PORTS);
        assert_eq!(results.len(), 2);
        assert_eq!(ids(&results), vec!["AEAJM", "AEAUH"]);

        let ajman = results[0].as_ref().unwrap();
        assert_eq!(ajman.name(), "Ajman");
        assert_eq!(ajman.fields.timezone.as_deref(), Some("Asia/Dubai"));
        assert_eq!(
            ajman.fields.coordinates,
            Some(Coordinates::new(55.5136433, 25.4052165))
        );

        let abu_dhabi = results[1].as_ref().unwrap();
        assert_eq!(abu_dhabi.fields.province.as_deref(), Some("Abu Z¸aby [Abu Dhabi]"));
    }

    #[test]
    fn test_small_buffer_matches_large_buffer() {
        for capacity in [1, 2, 3, 7, 16] {
            let results = decode_with_capacity(TWO_PORTS, capacity);
            assert_eq!(ids(&results), vec!["AEAJM", "AEAUH"], "capacity {}", capacity);
            assert!(results.iter().all(|r| r.is_ok()));
        }
    }

    #[test]
    fn test_key_overrides_payload_id() {
        let results = decode_all(r#"{"REAL": {"id": "FAKE", "name": "X"}}"#);
        assert_eq!(ids(&results), vec!["REAL"]);
    }

    #[test]
    fn test_n_keys_yield_n_records() {
        let body: Vec<String> = (0..250)
            .map(|i| format!(r#""P{:04}": {{"name": "port {}"}}"#, i, i))
            .collect();
        let doc = format!("{{{}}}", body.join(","));
        let results = decode_all(&doc);
        assert_eq!(results.len(), 250);
        let expected: Vec<String> = (0..250).map(|i| format!("P{:04}", i)).collect();
        assert_eq!(ids(&results), expected);
    }

    #[test]
    fn test_empty_name_halts_decoding() {
        let results = decode_all(
            r#"{"A": {"name": "X"}, "B": {"name": ""}, "C": {"name": "Z"}}"#,
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().id, "A");
        match &results[1] {
            Err(ParseError::MissingName { id }) => assert_eq!(id, "B"),
            other => panic!("expected MissingName, got {:?}", other),
        }
    }

    #[test]
    fn test_absent_name_halts_decoding() {
        let mut decoder =
            StreamDecoder::from_reader(r#"{"A": {"city": "Nowhere"}, "B": {"name": "Y"}}"#.as_bytes());
        assert!(matches!(decoder.next(), Some(Err(ParseError::MissingName { .. }))));
        assert!(decoder.next().is_none());
        assert!(decoder.next().is_none());
        assert_eq!(decoder.records_decoded(), 0);
    }

    #[test]
    fn test_escapes_and_braces_inside_strings() {
        let doc = r#"{"K\"1": {"name": "a } tricky { name", "city": "back\\slash \"q\"", "regions": ["[", "]"]}}"#;
        for capacity in [1, 4, 64] {
            let results = decode_with_capacity(doc, capacity);
            assert_eq!(results.len(), 1);
            let record = results[0].as_ref().unwrap();
            assert_eq!(record.id, "K\"1");
            assert_eq!(record.name(), "a } tricky { name");
            assert_eq!(record.fields.city.as_deref(), Some("back\\slash \"q\""));
            assert_eq!(record.fields.regions, vec!["[", "]"]);
        }
    }

    #[test]
    fn test_empty_object_yields_nothing() {
        assert!(decode_all("  { }  ").is_empty());
        assert!(decode_all("{}").is_empty());
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let results = decode_all("   ");
        assert!(matches!(results[0], Err(ParseError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_truncated_document() {
        let results = decode_all(r#"{"A": {"name": "X"}, "B": {"name": "#);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ParseError::UnexpectedEof { .. })));

        let results = decode_all(r#"{"A": {"name": "X"}"#);
        assert!(matches!(results[1], Err(ParseError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_non_object_value() {
        let results = decode_all(r#"{"A": [1, 2]}"#);
        match &results[0] {
            Err(ParseError::NotAnObject { id }) => assert_eq!(id, "A"),
            other => panic!("expected NotAnObject, got {:?}", other),
        }
    }

    #[test]
    fn test_top_level_must_be_object() {
        let results = decode_all(r#"[{"name": "X"}]"#);
        assert!(matches!(results[0], Err(ParseError::Syntax { offset: 0, .. })));
    }

    #[test]
    fn test_trailing_data_rejected() {
        let results = decode_all(r#"{"A": {"name": "X"}} extra"#);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn test_trailing_comma_rejected() {
        let results = decode_all(r#"{"A": {"name": "X"},}"#);
        assert!(matches!(results[1], Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn test_missing_separator_rejected() {
        let results = decode_all(r#"{"A": {"name": "X"} "B": {"name": "Y"}}"#);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn test_empty_id_rejected() {
        let results = decode_all(r#"{"": {"name": "X"}}"#);
        assert!(matches!(results[0], Err(ParseError::EmptyId { .. })));
    }

    #[test]
    fn test_invalid_field_shape() {
        let results = decode_all(r#"{"A": {"name": "X", "unlocs": "AEAJM"}}"#);
        match &results[0] {
            Err(ParseError::InvalidField { id, .. }) => assert_eq!(id, "A"),
            other => panic!("expected InvalidField, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_record() {
        let big = "x".repeat(MAX_RECORD_BYTES + 10);
        let doc = format!(r#"{{"A": {{"name": "{}"}}}}"#, big);
        let results = decode_all(&doc);
        assert!(matches!(results[0], Err(ParseError::RecordTooLarge { .. })));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!(
            r#"{{"A": {{"name": "X", "extra": {}{}}}}}"#,
            "[".repeat(MAX_NESTING_DEPTH + 1),
            "]".repeat(MAX_NESTING_DEPTH + 1)
        );
        let results = decode_all(&deep);
        assert!(matches!(results[0], Err(ParseError::Syntax { .. })));
    }
}
