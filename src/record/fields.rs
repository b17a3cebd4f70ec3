use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::record::classification::ClassificationLevel;

pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single form value. `Empty` is what a cleared field resets to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Text(value) => value.trim().is_empty(),
            FieldValue::List(values) => values.iter().all(|v| v.trim().is_empty()),
            FieldValue::Bool(_) | FieldValue::Number(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value.trim()),
            _ => None,
        }
    }

    /// Numbers typed into text inputs arrive as strings, so both shapes count.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) if value.is_finite() => Some(*value),
            FieldValue::Text(value) => value
                .trim()
                .replace(',', "")
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            FieldValue::Text(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_list(&self) -> Vec<String> {
        match self {
            FieldValue::List(values) => values
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect(),
            FieldValue::Text(value) if !value.trim().is_empty() => {
                vec![value.trim().to_string()]
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(String);

pub const LISTING_TYPE_PATH: &str = "listing_type";
pub const CLASSIFICATIONS_PATH: &str = "classifications";

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn classification(index: usize, level: ClassificationLevel) -> Self {
        Self(format!("{CLASSIFICATIONS_PATH}.{index}.{}", level.as_str()))
    }

    pub fn is_listing_type(&self) -> bool {
        self.0 == LISTING_TYPE_PATH
    }

    pub fn is_classification(&self) -> bool {
        self.0 == CLASSIFICATIONS_PATH || self.0.starts_with("classifications.")
    }

    /// `classifications.1.category` → `(1, Category)`.
    pub fn parse_classification(&self) -> Option<(usize, ClassificationLevel)> {
        let mut parts = self.0.split('.');
        if parts.next()? != CLASSIFICATIONS_PATH {
            return None;
        }
        let index = parts.next()?.parse::<usize>().ok()?;
        let level = ClassificationLevel::from_str(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some((index, level))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FieldPath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
