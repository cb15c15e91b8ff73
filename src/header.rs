//! Ordered, case-insensitive header collection.
//!
//! Header names are stored lowercased. Lines keep their original order for
//! iteration and serialization, while lookups go through an index holding
//! the first value seen for each name.

use std::collections::HashMap;

use crate::error::FrameError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    lines: Vec<(String, String)>,
    index: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header line. The name is lowercased; an existing lookup
    /// value for the same name is left untouched.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        let value = value.into();
        if !self.index.contains_key(&name) {
            self.index.insert(name.clone(), value.clone());
        }
        self.lines.push((name, value));
    }

    /// Builder-style `append`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    /// First value recorded for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.index.get(&name.to_lowercase()).map(String::as_str)
    }

    /// True only when `name` is present with a non-empty value.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some_and(|value| !value.is_empty())
    }

    /// Every value recorded for `name`, in line order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let name = name.to_lowercase();
        self.lines
            .iter()
            .filter(|(line_name, _)| *line_name == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Check that every name in `names` is present with a non-empty value.
    ///
    /// Returns the error for the first missing name.
    pub fn required(&self, names: &[&str]) -> Result<(), FrameError> {
        match names.iter().find(|name| !self.has(name)) {
            Some(name) => Err(FrameError::MissingHeader((*name).to_string())),
            None => Ok(()),
        }
    }

    /// New collection holding the lines for which `keep` returns true.
    pub fn filter(&self, mut keep: impl FnMut(&str, &str) -> bool) -> Headers {
        self.iter()
            .filter(|(name, value)| keep(name, value))
            .collect()
    }

    /// Combine collections so that, for each name, the value from the
    /// right-most collection defining it wins. Duplicate lines collapse to a
    /// single line per name, ordered by the name's first appearance.
    pub fn merge(collections: &[&Headers]) -> Headers {
        let mut names: Vec<String> = Vec::new();
        let mut index: HashMap<String, String> = HashMap::new();

        for collection in collections {
            for (name, _) in &collection.lines {
                let Some(value) = collection.index.get(name) else {
                    continue;
                };
                if !index.contains_key(name) {
                    names.push(name.clone());
                }
                index.insert(name.clone(), value.clone());
            }
        }

        let lines = names
            .into_iter()
            .filter_map(|name| index.get(&name).map(|value| (name.clone(), value.clone())))
            .collect();

        Headers { lines, index }
    }

    /// Join the lines of every collection in order. Lookups resolve to the
    /// value of the earliest collection that defines the name.
    pub fn concat(collections: &[&Headers]) -> Headers {
        let mut result = Headers::new();

        for collection in collections {
            result.lines.extend(collection.lines.iter().cloned());
        }

        for collection in collections {
            for (name, value) in &collection.index {
                result
                    .index
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        result
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
