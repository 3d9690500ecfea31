//! Parser for REST Client style `.http` mock files.
//!
//! A spec file is a sequence of `###`-delimited records:
//!
//! ```text
//! @host = example.com          <- global variable (before any record)
//! ### optional name            <- record start
//! # @delay = 150ms             <- record-scoped variable
//! GET /users/:id               <- request line
//! Content-Type: application/json
//!
//! {"id": "{{id}}"}             <- body until the next ### or EOF
//! ```
//!
//! Parsing is a five-state line machine (NONE, VARIABLE, REQUEST, HEADER,
//! BODY). Each record becomes a single-response [`Record`]; duplicates by
//! (method, path) are merged into endpoints afterwards.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::{Method, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::endpoint::{merge, Endpoint};

pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

const RECORD_START: &str = "###";

// matches `@name = value` with optional whitespace
static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\s*([a-zA-Z]\w*)\s*=\s*(.+)").expect("variable regex"));

/// Errors raised while parsing a spec. All carry the offending line number;
/// [`endpoints_from_file`] wraps them with the file name.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid duration, line {line}: {text}")]
    InvalidDuration { line: usize, text: String },
    #[error("invalid status, line {line}: {text}")]
    InvalidStatus { line: usize, text: String },
    #[error("unrecognized variable, line {line}: {text}")]
    UnknownVariable { line: usize, text: String },
    #[error("malformed header, line {line}: {text}")]
    MalformedHeader { line: usize, text: String },
    #[error("unrecognized request, line {line}: {text}")]
    MalformedRequest { line: usize, text: String },
    #[error("could not read file, line {line}: {text}")]
    FileRead {
        line: usize,
        text: String,
        #[source]
        source: std::io::Error,
    },
    #[error("file {file:?}: {source}")]
    File {
        file: String,
        #[source]
        source: Box<ParseError>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single `###` block, parsed into one method/path/response tuple.
#[derive(Debug, Clone)]
pub struct Record {
    /// Diagnostic name from the `###` line; a fresh UUID when absent.
    pub name: String,
    pub method: Method,
    /// Normalized path: `:seg` rewritten to `{seg}`, other segments escaped.
    pub path: String,
    pub status: StatusCode,
    pub delay: Duration,
    /// Header names lower-cased.
    pub header: HashMap<String, String>,
    pub body: Vec<u8>,
    /// First query parameter of the request-line URI, if any. Selects this
    /// record's response when a live request carries the same `key=value`.
    pub selector: Option<(String, String)>,
}

impl Record {
    fn new(name: String, default_delay: Duration) -> Self {
        let mut header = HashMap::new();
        header.insert("content-type".to_string(), DEFAULT_CONTENT_TYPE.to_string());
        Self {
            name,
            method: Method::GET,
            path: String::new(),
            status: StatusCode::OK,
            delay: default_delay,
            header,
            body: Vec::new(),
            selector: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    None,
    Variable,
    // VARIABLE hands the request line straight to its handler, so the loop
    // never dwells here; kept so the machine reads like the format docs.
    #[allow(dead_code)]
    Request,
    Header,
    Body,
}

/// Streaming spec parser. Feed it a reader, then take the records and the
/// global variable map.
pub struct Parser {
    base_dir: PathBuf,
    records: Vec<Record>,
    globals: HashMap<String, String>,
    default_delay: Duration,
    current: Option<Record>,
}

impl Parser {
    /// `base_dir` anchors relative `# @file` paths.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            records: Vec::new(),
            globals: HashMap::new(),
            default_delay: Duration::ZERO,
            current: None,
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn globals(&self) -> &HashMap<String, String> {
        &self.globals
    }

    pub fn into_parts(self) -> (Vec<Record>, HashMap<String, String>) {
        (self.records, self.globals)
    }

    /// Run the state machine over every line of `reader`. A partially built
    /// record at EOF is finalized.
    pub fn parse<R: BufRead>(&mut self, reader: R) -> Result<(), ParseError> {
        let mut state = State::None;
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line_num = idx + 1;
            state = match state {
                State::None => self.on_none(&line),
                State::Variable => self.on_variable(&line, line_num)?,
                State::Request => self.on_request(&line, line_num)?,
                State::Header => self.on_header(&line, line_num)?,
                State::Body => self.on_body(&line),
            };
        }

        if let Some(record) = self.current.take() {
            self.push_record(record);
        }
        Ok(())
    }

    // NONE: waiting for a record start; global variables live here.
    fn on_none(&mut self, line: &str) -> State {
        if line.starts_with(RECORD_START) {
            self.current = Some(Record::new(self.record_name(line), self.default_delay));
            return State::Variable;
        }

        if line.starts_with('@') {
            if let Some(caps) = VARIABLE_RE.captures(line) {
                let name = caps[1].to_string();
                let value = caps[2].trim().to_string();
                if name == "delay" {
                    // lenient here; only record-scoped delays are fatal
                    if let Some(delay) = parse_duration(&value) {
                        self.default_delay = delay;
                    }
                }
                self.globals.insert(name, value);
            }
        }

        State::None
    }

    // VARIABLE: `# @name = value` lines between `###` and the request line.
    fn on_variable(&mut self, line: &str, line_num: usize) -> Result<State, ParseError> {
        if line.trim().is_empty() {
            return Ok(State::Variable);
        }

        // record ended before its request line; the new `###` opens the next one
        if line.starts_with(RECORD_START) {
            self.current = None;
            return Ok(self.on_none(line));
        }

        if !line.starts_with('#') {
            return self.on_request(line, line_num);
        }

        if let Some(caps) = VARIABLE_RE.captures(&line[1..]) {
            let name = &caps[1];
            let value = caps[2].trim().trim_matches('"').to_string();
            let Some(record) = self.current.as_mut() else {
                return Ok(State::None);
            };
            match name {
                "delay" => {
                    record.delay = parse_duration(&value).ok_or_else(|| ParseError::InvalidDuration {
                        line: line_num,
                        text: line.to_string(),
                    })?;
                }
                "status" => {
                    record.status = value
                        .parse::<u16>()
                        .ok()
                        .and_then(|code| StatusCode::from_u16(code).ok())
                        .filter(|status| status.canonical_reason().is_some())
                        .ok_or_else(|| ParseError::InvalidStatus {
                            line: line_num,
                            text: line.to_string(),
                        })?;
                }
                "file" => {
                    let path = self.base_dir.join(value.trim_start_matches('/'));
                    record.body = std::fs::read(&path).map_err(|source| ParseError::FileRead {
                        line: line_num,
                        text: line.to_string(),
                        source,
                    })?;
                    let content_type = mime_guess::from_path(&path).first_or_octet_stream();
                    record
                        .header
                        .insert("content-type".to_string(), content_type.to_string());
                }
                _ => {
                    return Err(ParseError::UnknownVariable {
                        line: line_num,
                        text: line.to_string(),
                    });
                }
            }
        }

        Ok(State::Variable)
    }

    // REQUEST: `[METHOD] /path`, a bare path implies GET.
    fn on_request(&mut self, line: &str, line_num: usize) -> Result<State, ParseError> {
        let (method, uri) = request_line(line).ok_or_else(|| ParseError::MalformedRequest {
            line: line_num,
            text: line.to_string(),
        })?;

        let Some(record) = self.current.as_mut() else {
            return Ok(State::None);
        };
        record.method = method;
        record.path = clean_path(uri);
        record.selector = first_query_pair(uri);

        Ok(State::Header)
    }

    // HEADER: `Name: value` until a blank line.
    fn on_header(&mut self, line: &str, line_num: usize) -> Result<State, ParseError> {
        if line.trim().is_empty() {
            return Ok(State::Body);
        }

        let (name, value) = line.split_once(':').ok_or_else(|| ParseError::MalformedHeader {
            line: line_num,
            text: line.to_string(),
        })?;
        if let Some(record) = self.current.as_mut() {
            record
                .header
                .insert(name.to_lowercase(), value.trim().to_string());
        }

        Ok(State::Header)
    }

    // BODY: everything until the next `###` or EOF.
    fn on_body(&mut self, line: &str) -> State {
        if line.starts_with(RECORD_START) {
            if let Some(record) = self.current.take() {
                self.push_record(record);
            }
            return self.on_none(line);
        }

        if let Some(record) = self.current.as_mut() {
            record.body.extend_from_slice(line.as_bytes());
            record.body.extend_from_slice(b"\r\n");
        }
        State::Body
    }

    fn record_name(&self, line: &str) -> String {
        let name = line[RECORD_START.len()..].trim();
        if name.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            name.to_string()
        }
    }

    fn push_record(&mut self, mut record: Record) {
        if record.path.is_empty() {
            return;
        }
        trim_whitespace(&mut record.body);
        self.records.push(record);
    }
}

/// Parse + merge from any reader; `@file` paths resolve against the current
/// working directory.
pub fn endpoints_from_reader<R: BufRead>(reader: R) -> Result<Vec<Endpoint>, ParseError> {
    let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut parser = Parser::new(dir);
    parser.parse(reader)?;
    let (records, globals) = parser.into_parts();
    Ok(merge(records, &globals))
}

/// Parse + merge from a spec file; `@file` paths resolve against the spec
/// file's directory, and errors carry the file name.
pub fn endpoints_from_file(path: &Path) -> Result<Vec<Endpoint>, ParseError> {
    let in_file = |source: ParseError| ParseError::File {
        file: path.display().to_string(),
        source: Box::new(source),
    };

    let file = File::open(path).map_err(|err| in_file(err.into()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut parser = Parser::new(dir);
    parser.parse(BufReader::new(file)).map_err(in_file)?;
    let (records, globals) = parser.into_parts();
    Ok(merge(records, &globals))
}

/// Split a request line into method + URI. One token is a bare path
/// (implicit GET), two are `METHOD /path`.
fn request_line(line: &str) -> Option<(Method, &str)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        [uri] if is_http_path(uri) => Some((Method::GET, uri)),
        [method, uri] if is_http_path(uri) => http_method(method).map(|m| (m, *uri)),
        _ => None,
    }
}

fn http_method(token: &str) -> Option<Method> {
    match token.to_ascii_uppercase().as_str() {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "DELETE" => Some(Method::DELETE),
        "PATCH" => Some(Method::PATCH),
        "HEAD" => Some(Method::HEAD),
        "OPTIONS" => Some(Method::OPTIONS),
        _ => None,
    }
}

fn is_http_path(uri: &str) -> bool {
    path_of(uri).starts_with('/')
}

/// The path portion of a request-line URI, without query or fragment.
fn path_of(uri: &str) -> &str {
    let uri = uri.split_once('#').map_or(uri, |(p, _)| p);
    uri.split_once('?').map_or(uri, |(p, _)| p)
}

/// Rewrite `:seg` segments to `{seg}` (the router's parameter syntax) and
/// percent-escape the rest.
fn clean_path(uri: &str) -> String {
    path_of(uri)
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':').filter(|n| !n.is_empty()) {
                format!("{{{}}}", urlencoding::encode(name))
            } else {
                urlencoding::encode(segment).into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// First `key=value` of the URI's query string, decoded.
fn first_query_pair(uri: &str) -> Option<(String, String)> {
    let uri = uri.split_once('#').map_or(uri, |(p, _)| p);
    let (_, query) = uri.split_once('?')?;
    let pair = query.split('&').find(|p| !p.is_empty())?;
    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
    let key = decode_component(key);
    if key.is_empty() {
        return None;
    }
    Some((key, decode_component(value)))
}

fn decode_component(s: &str) -> String {
    urlencoding::decode(s)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn trim_whitespace(body: &mut Vec<u8>) {
    while body.last().is_some_and(|b| b.is_ascii_whitespace()) {
        body.pop();
    }
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    body.drain(..start);
}

/// Parse a Go-style duration string: decimal values with `ns`, `us`/`µs`,
/// `ms`, `s`, `m` or `h` units, optionally compounded (`1m30s`). A bare `0`
/// is accepted.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s == "0" {
        return Some(Duration::ZERO);
    }
    if s.is_empty() {
        return None;
    }

    let mut total = 0.0_f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if num_end == 0 {
            return None;
        }
        let (number, remainder) = rest.split_at(num_end);
        let value: f64 = number.parse().ok()?;

        let (factor, remainder) = if let Some(r) = remainder.strip_prefix("ns") {
            (1e-9, r)
        } else if let Some(r) = remainder.strip_prefix("us") {
            (1e-6, r)
        } else if let Some(r) = remainder.strip_prefix("µs") {
            (1e-6, r)
        } else if let Some(r) = remainder.strip_prefix("ms") {
            (1e-3, r)
        } else if let Some(r) = remainder.strip_prefix('s') {
            (1.0, r)
        } else if let Some(r) = remainder.strip_prefix('m') {
            (60.0, r)
        } else if let Some(r) = remainder.strip_prefix('h') {
            (3600.0, r)
        } else {
            return None;
        };

        total += value * factor;
        rest = remainder;
    }

    Some(Duration::from_secs_f64(total))
}

/// Format a duration the way Go's `Duration.String()` does for the common
/// cases: `0s`, `150ms`, `1.5s`, `2m30s`, `1h0m30s`.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    let nanos = d.as_nanos();
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return format!("{}µs", trim_decimal(nanos as f64 / 1e3));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", trim_decimal(nanos as f64 / 1e6));
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = d.as_secs_f64() - (hours * 3600 + minutes * 60) as f64;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 || hours > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&format!("{}s", trim_decimal(seconds)));
    out
}

fn trim_decimal(value: f64) -> String {
    let mut s = format!("{value:.6}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}
