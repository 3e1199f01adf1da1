//! Protocol detection over a call's visible bindings
//!
//! Every binding is rendered through its `Debug` impl into a size-capped
//! buffer, then scanned against the pattern tables. The cap is enforced by
//! the writer itself, so huge strings, deep or self-referential structures
//! and endless `Debug` output all stop after `max_value_len` bytes. A
//! panicking `Debug` impl is caught and the binding is skipped.

use crate::patterns::TABLES;
use crate::record::{unix_time, Evidence};
use std::fmt::{self, Write};
use std::panic::{self, AssertUnwindSafe};

/// Default cap on the stringified size of one binding
pub const DEFAULT_MAX_VALUE_LEN: usize = 4096;

/// Maximum length of the snippet stored in evidence
pub const SNIPPET_LEN: usize = 200;

/// A named binding visible at a call site
#[derive(Clone, Copy)]
pub struct Local<'a> {
    pub name: &'a str,
    pub value: &'a dyn fmt::Debug,
}

impl<'a> Local<'a> {
    pub fn new(name: &'a str, value: &'a dyn fmt::Debug) -> Self {
        Self { name, value }
    }
}

impl fmt::Debug for Local<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Local").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Capture in-scope bindings as `&[Local]`
///
/// ```
/// use callmap::locals;
///
/// let query = "SELECT * FROM users";
/// let limit = 10;
/// let bindings = locals![query, limit];
/// assert_eq!(bindings.len(), 2);
/// assert_eq!(bindings[0].name, "query");
/// ```
#[macro_export]
macro_rules! locals {
    ($($name:ident),* $(,)?) => {
        &[$($crate::detector::Local::new(stringify!($name), &$name)),*]
    };
}

/// `fmt::Write` sink that refuses to grow past `limit` bytes
struct BoundedWriter {
    buf: String,
    limit: usize,
    truncated: bool,
}

impl BoundedWriter {
    fn new(limit: usize) -> Self {
        Self {
            buf: String::with_capacity(limit.min(256)),
            limit,
            truncated: false,
        }
    }
}

impl fmt::Write for BoundedWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let remaining = self.limit.saturating_sub(self.buf.len());
        if s.len() <= remaining {
            self.buf.push_str(s);
            return Ok(());
        }
        let cut = floor_char_boundary(s, remaining);
        self.buf.push_str(&s[..cut]);
        self.truncated = true;
        // Aborts the surrounding format! call
        Err(fmt::Error)
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Render `value` with `Debug`, capped at `limit` bytes
///
/// Returns `None` if the `Debug` impl panicked or reported an error of its own.
pub fn stringify_bounded(value: &dyn fmt::Debug, limit: usize) -> Option<String> {
    let mut writer = BoundedWriter::new(limit);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| write!(writer, "{:?}", value)));
    match outcome {
        Err(_) => None,
        Ok(Err(_)) if !writer.truncated => None,
        Ok(_) => Some(writer.buf),
    }
}

/// Strip the quotes `Debug` puts around string values
fn unquote(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn snippet(s: &str) -> String {
    s[..floor_char_boundary(s, SNIPPET_LEN)].to_string()
}

/// Scans visible bindings for protocol evidence
#[derive(Debug, Clone)]
pub struct ProtocolDetector {
    max_value_len: usize,
}

impl Default for ProtocolDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VALUE_LEN)
    }
}

impl ProtocolDetector {
    pub fn new(max_value_len: usize) -> Self {
        Self { max_value_len }
    }

    /// Evidence for every (binding, protocol) pair that matched
    ///
    /// Repeated matches are kept: two SQL strings yield two entries.
    pub fn detect(&self, locals: &[Local<'_>]) -> Vec<Evidence> {
        let mut evidence = Vec::new();
        let timestamp = unix_time();

        for local in locals {
            let Some(rendered) = stringify_bounded(local.value, self.max_value_len) else {
                tracing::debug!("skipping binding {} with failing Debug impl", local.name);
                continue;
            };
            self.scan_text(local.name, unquote(&rendered), timestamp, &mut evidence);
        }

        evidence
    }

    /// Scan an already-rendered value
    pub fn scan_text(&self, variable: &str, text: &str, timestamp: f64, out: &mut Vec<Evidence>) {
        if text.is_empty() {
            return;
        }
        let lower = text.to_lowercase();
        for table in TABLES.iter() {
            if let Some(pattern) = table.first_match(text, &lower) {
                out.push(Evidence {
                    protocol: table.protocol,
                    kind: pattern.kind.to_string(),
                    variable: variable.to_string(),
                    snippet: snippet(text),
                    timestamp,
                });
            }
        }
    }
}
