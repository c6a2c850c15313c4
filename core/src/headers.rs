//! Ordered, case-insensitive header table.
//!
//! # Design
//! Entries live in a `Vec` in insertion order. Lookup compares names with
//! `eq_ignore_ascii_case`, which is exact for valid token names since the
//! token grammar is pure ASCII. Each lowercase name owns at most one entry:
//! appending to an existing name joins the values with `", "`, and the entry
//! keeps the spelling of the name that created it.

use tracing::debug;

use crate::error::{FetchError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    value: String,
}

/// An HTTP header multimap with one combined value per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Entry>,
}

impl Headers {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build a table from ordered pairs, appending each in turn.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.append(name.as_ref(), value.as_ref())?;
        }
        Ok(headers)
    }

    /// Parse the raw header block reported by a legacy engine.
    ///
    /// Folded continuation lines (leading space or tab) are joined to the
    /// previous line with a single space before each line is split on its
    /// first colon. Lines with a blank or invalid name are skipped.
    pub fn parse_raw(raw: &str) -> Self {
        let mut lines: Vec<String> = Vec::new();
        for line in raw.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.starts_with([' ', '\t']) {
                if let Some(prev) = lines.last_mut() {
                    prev.push(' ');
                    prev.push_str(line.trim_start_matches([' ', '\t']));
                    continue;
                }
            }
            lines.push(line.to_string());
        }

        let mut headers = Self::new();
        for line in &lines {
            let (key, value) = line.split_once(':').unwrap_or((line.as_str(), ""));
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            if let Err(err) = headers.append(key, value.trim()) {
                debug!(line = %line, error = %err, "skipping malformed header line");
            }
        }
        headers
    }

    pub fn append(&mut self, name: &str, value: &str) -> Result<()> {
        validate_name(name)?;
        validate_value(name, value)?;
        match self.position(name) {
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.value.push_str(", ");
                entry.value.push_str(value);
            }
            None => self.entries.push(Entry {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
        Ok(())
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        validate_name(name)?;
        validate_value(name, value)?;
        match self.position(name) {
            Some(i) => self.entries[i].value = value.to_string(),
            None => self.entries.push(Entry {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.entries.retain(|e| !e.name.eq_ignore_ascii_case(name));
        Ok(())
    }

    /// Combined value for `name`. Invalid names simply have no value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].value.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Visit every entry in insertion order as `(value, name)`.
    pub fn for_each(&self, mut f: impl FnMut(&str, &str)) {
        for e in &self.entries {
            f(&e.value, &e.name);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.value.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.entries())
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+.^_`|~-".contains(c)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(is_token_char) {
        return Err(FetchError::InvalidHeaderName(name.to_string()));
    }
    Ok(())
}

fn validate_value(name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n', '\0']) {
        return Err(FetchError::InvalidHeaderValue(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_joins_values_and_lookup_ignores_case() {
        let mut h = Headers::new();
        h.append("X-A", "1").unwrap();
        h.append("X-A", "2").unwrap();
        assert_eq!(h.get("X-A"), Some("1, 2"));
        assert!(h.has("x-a"));
        h.set("X-A", "3").unwrap();
        assert_eq!(h.get("x-A"), Some("3"));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn keeps_original_case_and_order() {
        let mut h = Headers::new();
        h.append("Content-Type", "text/html").unwrap();
        h.append("X-Trace", "abc").unwrap();
        h.append("content-type", "charset=utf-8").unwrap();
        let entries: Vec<_> = h.entries().collect();
        assert_eq!(
            entries,
            vec![
                ("Content-Type", "text/html, charset=utf-8"),
                ("X-Trace", "abc")
            ]
        );
        assert_eq!(h.keys().collect::<Vec<_>>(), vec!["Content-Type", "X-Trace"]);
        assert_eq!(h.values().count(), 2);
    }

    #[test]
    fn delete_removes_entry() {
        let mut h = Headers::from_pairs([("Accept", "*/*"), ("Host", "x")]).unwrap();
        h.delete("ACCEPT").unwrap();
        assert!(!h.has("accept"));
        assert_eq!(h.get("host"), Some("x"));
    }

    #[test]
    fn rejects_invalid_names() {
        let mut h = Headers::new();
        let err = h.append("Bad Name", "v").unwrap_err();
        assert!(matches!(err, FetchError::InvalidHeaderName(ref n) if n == "Bad Name"));
        assert!(h.set("x(y)", "v").is_err());
        assert!(h.append("", "v").is_err());
        assert!(h.append("X-Ok_~!", "v").is_ok());
    }

    #[test]
    fn rejects_values_with_line_breaks() {
        let mut h = Headers::new();
        assert!(matches!(
            h.append("X-A", "a\r\nInjected: 1"),
            Err(FetchError::InvalidHeaderValue(_))
        ));
    }

    #[test]
    fn for_each_visits_in_order() {
        let h = Headers::from_pairs([("A", "1"), ("B", "2")]).unwrap();
        let mut seen = Vec::new();
        h.for_each(|value, name| seen.push(format!("{name}={value}")));
        assert_eq!(seen, vec!["A=1", "B=2"]);
    }

    #[test]
    fn parse_raw_unfolds_continuation_lines() {
        let raw = "Content-Type: text/plain\r\nX-Long: first\r\n  second\r\n\tthird\r\nDate: Mon, 01 Jan 2024 00:00:00 GMT\r\n";
        let h = Headers::parse_raw(raw);
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("x-long"), Some("first second third"));
        assert_eq!(h.get("date"), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
    }

    #[test]
    fn parse_raw_handles_lf_and_skips_blank_keys() {
        let raw = "A: 1\n: orphan\n\nB:2\nA: 3";
        let h = Headers::parse_raw(raw);
        assert_eq!(h.get("a"), Some("1, 3"));
        assert_eq!(h.get("b"), Some("2"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn clone_is_deep() {
        let mut a = Headers::from_pairs([("X", "1")]).unwrap();
        let b = a.clone();
        a.set("X", "2").unwrap();
        assert_eq!(b.get("x"), Some("1"));
    }
}
