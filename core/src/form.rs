//! Structured key-value forms.
//!
//! `FormData` is a structured body held as-is; `SearchParams` is the query
//! form, which a body stores as its urlencoded text. Both keep entries in
//! insertion order, repeated keys included.

use url::form_urlencoded;

pub const URLENCODED_MEDIA_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Ordered name/value pairs submitted as a structured form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    entries: Vec<(String, String)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|(n, _)| n != name);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode an `application/x-www-form-urlencoded` payload.
    ///
    /// Surrounding whitespace is ignored, empty segments are skipped and `+`
    /// decodes to a space.
    pub fn decode(text: &str) -> Self {
        let entries = form_urlencoded::parse(text.trim().as_bytes())
            .map(|(n, v)| (n.into_owned(), v.into_owned()))
            .collect();
        Self { entries }
    }

    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.entries.iter())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A query form; serialized to urlencoded text when used as a body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams(FormData);

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(query: &str) -> Self {
        Self(FormData::decode(query.strip_prefix('?').unwrap_or(query)))
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.append(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter()
    }
}

impl std::fmt::Display for SearchParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.encode())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SearchParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
