//! Class label tables
//!
//! A label table maps output indices to display names. It is loaded once at
//! startup and shared read-only by every prediction.

use serde::Deserialize;
use snapclass_core::{Error, Result};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

/// Largest class index accepted from an indexed label file
pub const MAX_LABEL_INDEX: usize = 1 << 20;

/// Index → display name mapping for a classifier's outputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

/// Accepted JSON layouts for label files
#[derive(Deserialize)]
#[serde(untagged)]
enum LabelFile {
    List(Vec<String>),
    Indexed(BTreeMap<String, String>),
}

impl LabelTable {
    /// Create a label table from an ordered list
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Empty table; every index falls back to a placeholder
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a label table from a file
    ///
    /// `.json` files may hold either an array of names or an object keyed by
    /// class index (`{"0": "cat", "1": "dog"}`). Anything else is read as
    /// one label per line.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read labels {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json(&contents)
        } else {
            Ok(Self::from_lines(&contents))
        }
    }

    /// Parse a JSON label table
    pub fn from_json(contents: &str) -> Result<Self> {
        match serde_json::from_str::<LabelFile>(contents)? {
            LabelFile::List(labels) => Ok(Self { labels }),
            LabelFile::Indexed(map) => {
                let mut indexed = Vec::with_capacity(map.len());
                for (key, label) in map {
                    let index: usize = key.trim().parse().map_err(|_| {
                        Error::config(format!("Label key '{}' is not a class index", key))
                    })?;
                    if index >= MAX_LABEL_INDEX {
                        return Err(Error::config(format!(
                            "Label index {} exceeds the maximum of {}",
                            index,
                            MAX_LABEL_INDEX - 1
                        )));
                    }
                    indexed.push((index, label));
                }
                indexed.sort_by_key(|(index, _)| *index);

                let len = indexed.last().map(|(index, _)| index + 1).unwrap_or(0);
                let mut labels: Vec<String> = (0..len).map(placeholder).collect();
                for (index, label) in indexed {
                    labels[index] = label;
                }
                Ok(Self { labels })
            }
        }
    }

    /// Parse a newline-separated label list, skipping blank lines
    pub fn from_lines(contents: &str) -> Self {
        Self {
            labels: contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Label for a class index, or `"Class {index}"` when the table is short
    pub fn get(&self, index: usize) -> Cow<'_, str> {
        match self.labels.get(index) {
            Some(label) => Cow::Borrowed(label.as_str()),
            None => Cow::Owned(placeholder(index)),
        }
    }

    /// Number of known labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

fn placeholder(index: usize) -> String {
    format!("Class {}", index)
}
