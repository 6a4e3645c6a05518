//! Ordered attribute lists in the journal's textual token format.
//!
//! An [`Entry`] is one projection of a journaled object at one moment: an
//! ordered sequence of `(name, value)` pairs. Values are stored in their
//! wire form (the exact bytes that appear in a journal line), so printing
//! and re-parsing an entry round-trips byte-exactly. Duplicate names are
//! legal and preserved in producer order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::id::LogId;

/// Escape a string for embedding in a quoted journal token.
///
/// Newline becomes `\n` and the double quote becomes `\"`. These are the
/// only two escapes the format defines; all other bytes pass through.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape`]. A backslash followed by anything other than `n`
/// or `"` is passed through untouched, matching what historical journals
/// contain.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Failure to tokenize a serialized entry.
#[derive(Debug)]
pub enum EntryParseError {
    /// A quoted token ran to end of input without a closing quote.
    UnterminatedString { at: usize },
    /// Tokens could not be paired into `(name, value)` form.
    UnpairedToken { count: usize },
}

impl fmt::Display for EntryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedString { at } => {
                write!(f, "unterminated quoted string starting at byte {}", at)
            }
            Self::UnpairedToken { count } => {
                write!(f, "odd token count {} cannot form name/value pairs", count)
            }
        }
    }
}

impl std::error::Error for EntryParseError {}

/// A single value token, in wire form.
///
/// Accessors interpret the token; `raw` exposes the bytes as printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value<'a>(&'a str);

impl<'a> Value<'a> {
    /// The token exactly as it appears in the journal.
    pub fn raw(&self) -> &'a str {
        self.0
    }

    /// Decode a string token: strips the surrounding quotes and unescapes.
    /// Unquoted tokens are returned verbatim.
    pub fn string(&self) -> String {
        let s = self.0;
        if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
            unescape(&s[1..s.len() - 1])
        } else {
            s.to_string()
        }
    }

    pub fn int(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    pub fn uint(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    pub fn float(&self) -> Option<f32> {
        self.0.parse().ok()
    }

    pub fn double(&self) -> Option<f64> {
        self.0.parse().ok()
    }

    /// Decode an object reference. Returns `Some(LogId::NULL)` for `0x0`.
    pub fn id(&self) -> Option<LogId> {
        LogId::from_str(self.0).ok()
    }
}

/// Ordered `(name, value)` list representing one projection of a journaled
/// object. See the module docs for the storage convention.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pairs: Vec<(String, String)>,
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the serialized form produced by [`Entry::print`].
    ///
    /// Tokens are separated by spaces or tabs; a quoted token survives with
    /// embedded separators. An empty input yields an empty entry.
    pub fn parse(s: &str) -> Result<Self, EntryParseError> {
        let tokens = tokenize(s)?;
        if tokens.len() % 2 != 0 {
            return Err(EntryParseError::UnpairedToken {
                count: tokens.len(),
            });
        }
        let mut pairs = Vec::with_capacity(tokens.len() / 2);
        let mut it = tokens.into_iter();
        while let (Some(name), Some(value)) = (it.next(), it.next()) {
            pairs.push((name, value));
        }
        Ok(Self { pairs })
    }

    pub fn add_int(&mut self, name: &str, v: i64) {
        self.pairs.push((name.to_string(), v.to_string()));
    }

    pub fn add_uint(&mut self, name: &str, v: u64) {
        self.pairs.push((name.to_string(), v.to_string()));
    }

    /// Floats print with six fractional digits, like the journals the
    /// format was defined by.
    pub fn add_float(&mut self, name: &str, v: f32) {
        self.pairs.push((name.to_string(), format!("{:.6}", v)));
    }

    pub fn add_double(&mut self, name: &str, v: f64) {
        self.pairs.push((name.to_string(), format!("{:.6}", v)));
    }

    /// Strings are escaped and wrapped in quotes.
    pub fn add_string(&mut self, name: &str, v: &str) {
        self.pairs
            .push((name.to_string(), format!("\"{}\"", escape(v))));
    }

    /// Object references serialize as the referee's id; pass
    /// [`LogId::NULL`] for "points at nothing".
    pub fn add_id(&mut self, name: &str, v: LogId) {
        self.pairs.push((name.to_string(), v.to_string()));
    }

    /// Add a pre-formatted value token verbatim. The caller is responsible
    /// for quoting and escaping.
    pub fn add_raw(&mut self, name: &str, v: &str) {
        self.pairs.push((name.to_string(), v.to_string()));
    }

    /// Remove every pair with the given name, preserving the order of the
    /// remainder.
    pub fn remove(&mut self, name: &str) {
        self.pairs.retain(|(n, _)| n != name);
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<(&str, Value<'_>)> {
        self.pairs
            .get(i)
            .map(|(n, v)| (n.as_str(), Value(v.as_str())))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Value<'_>)> {
        self.pairs
            .iter()
            .map(|(n, v)| (n.as_str(), Value(v.as_str())))
    }

    /// Serialize: pairs joined with single spaces, values in wire form.
    pub fn print(&self) -> String {
        let mut out = String::new();
        for (i, (n, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(n);
            out.push(' ');
            out.push_str(v);
        }
        out
    }

    /// Structural comparison: true when the two entries differ in length,
    /// order, names, or values.
    pub fn diff(a: &Entry, b: &Entry) -> bool {
        a.pairs != b.pairs
    }
}

fn tokenize(s: &str) -> Result<Vec<String>, EntryParseError> {
    let b = s.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < b.len() {
        while i < b.len() && (b[i] == b' ' || b[i] == b'\t') {
            i += 1;
        }
        if i >= b.len() {
            break;
        }
        let start = i;
        if b[i] == b'"' {
            i += 1;
            loop {
                if i >= b.len() {
                    return Err(EntryParseError::UnterminatedString { at: start });
                }
                match b[i] {
                    b'\\' => i += 2,
                    b'"' => {
                        i += 1;
                        break;
                    }
                    _ => i += 1,
                }
            }
        } else {
            while i < b.len() && b[i] != b' ' && b[i] != b'\t' {
                i += 1;
            }
        }
        let end = i.min(b.len());
        tokens.push(s[start..end].to_string());
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_and_parse_round_trip() {
        let mut e = Entry::new();
        e.add_string("name", "region one");
        e.add_int("offset", -3);
        e.add_uint("length", 44100);
        e.add_float("gain", 0.5);
        e.add_id("source", LogId::new(0x1f));

        let printed = e.print();
        assert_eq!(
            printed,
            "name \"region one\" offset -3 length 44100 gain 0.500000 source 0x1F"
        );
        let back = Entry::parse(&printed).unwrap();
        assert_eq!(back.print(), printed);
        assert!(!Entry::diff(&e, &back));
    }

    #[test]
    fn escaping_survives_newlines_and_quotes() {
        let mut e = Entry::new();
        e.add_string("note", "line1\nline2\"");
        let printed = e.print();
        assert_eq!(printed, "note \"line1\\nline2\\\"\"");
        assert!(!printed.contains('\n'));

        let back = Entry::parse(&printed).unwrap();
        let (name, v) = back.get(0).unwrap();
        assert_eq!(name, "note");
        assert_eq!(v.string(), "line1\nline2\"");
    }

    #[test]
    fn stray_backslashes_pass_through() {
        assert_eq!(escape("a\\b"), "a\\b");
        assert_eq!(unescape("a\\b"), "a\\b");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn duplicate_names_preserved_in_order() {
        let mut e = Entry::new();
        e.add_int("point", 1);
        e.add_int("point", 2);
        e.add_int("point", 3);
        assert_eq!(e.print(), "point 1 point 2 point 3");

        let back = Entry::parse(&e.print()).unwrap();
        let values: Vec<i64> = back.iter().filter_map(|(_, v)| v.int()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn remove_drops_all_pairs_with_the_name() {
        let mut e = Entry::new();
        e.add_int("keep", 1);
        e.add_int("drop", 2);
        e.add_int("drop", 3);
        e.add_int("keep", 4);
        e.remove("drop");
        assert_eq!(e.print(), "keep 1 keep 4");
    }

    #[test]
    fn typed_value_accessors() {
        let e = Entry::parse("i -7 u 9 f 1.250000 r 0x0 s \"x y\"").unwrap();
        let vals: Vec<Value> = e.iter().map(|(_, v)| v).collect();
        assert_eq!(vals[0].int(), Some(-7));
        assert_eq!(vals[1].uint(), Some(9));
        assert_eq!(vals[2].float(), Some(1.25));
        assert_eq!(vals[3].id(), Some(LogId::NULL));
        assert_eq!(vals[4].string(), "x y");
        assert_eq!(vals[4].raw(), "\"x y\"");
    }

    #[test]
    fn empty_input_is_an_empty_entry() {
        let e = Entry::parse("").unwrap();
        assert!(e.is_empty());
        assert_eq!(e.print(), "");
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(matches!(
            Entry::parse("name \"oops"),
            Err(EntryParseError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn rejects_odd_token_count() {
        assert!(matches!(
            Entry::parse("name \"a\" stray"),
            Err(EntryParseError::UnpairedToken { count: 3 })
        ));
    }

    #[test]
    fn diff_detects_value_and_order_changes() {
        let a = Entry::parse("x 1 y 2").unwrap();
        let b = Entry::parse("x 1 y 3").unwrap();
        let c = Entry::parse("y 2 x 1").unwrap();
        assert!(Entry::diff(&a, &b));
        assert!(Entry::diff(&a, &c));
        assert!(!Entry::diff(&a, &a.clone()));
        assert!(!Entry::diff(&Entry::new(), &Entry::new()));
    }
}
