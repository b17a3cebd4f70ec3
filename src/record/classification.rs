use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::record::fields::FieldValue;

pub const MAX_CLASSIFICATIONS: usize = 3;
pub const MAX_SUBCATEGORIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationLevel {
    Industry,
    Category,
    Subcategories,
}

impl ClassificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationLevel::Industry => "industry",
            ClassificationLevel::Category => "category",
            ClassificationLevel::Subcategories => "subcategories",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim() {
            "industry" => Some(Self::Industry),
            "category" => Some(Self::Category),
            "subcategories" | "subcategory" => Some(Self::Subcategories),
            _ => None,
        }
    }

    pub fn descendants(&self) -> &'static [ClassificationLevel] {
        match self {
            ClassificationLevel::Industry => &[
                ClassificationLevel::Category,
                ClassificationLevel::Subcategories,
            ],
            ClassificationLevel::Category => &[ClassificationLevel::Subcategories],
            ClassificationLevel::Subcategories => &[],
        }
    }
}

/// One industry → category → subcategories selection.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationEntry {
    pub industry: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub subcategories: Vec<String>,
}

impl ClassificationEntry {
    pub fn get(&self, level: ClassificationLevel) -> FieldValue {
        match level {
            ClassificationLevel::Industry => self
                .industry
                .clone()
                .map(FieldValue::Text)
                .unwrap_or_default(),
            ClassificationLevel::Category => self
                .category
                .clone()
                .map(FieldValue::Text)
                .unwrap_or_default(),
            ClassificationLevel::Subcategories if self.subcategories.is_empty() => {
                FieldValue::Empty
            }
            ClassificationLevel::Subcategories => FieldValue::List(self.subcategories.clone()),
        }
    }

    /// Writes one level and returns the descendant levels that were reset.
    /// Re-selecting the current value keeps the descendants.
    pub fn set(&mut self, level: ClassificationLevel, value: &FieldValue) -> Vec<ClassificationLevel> {
        if self.get(level) == normalise(level, value) {
            return Vec::new();
        }
        match level {
            ClassificationLevel::Industry => self.industry = text_of(value),
            ClassificationLevel::Category => self.category = text_of(value),
            ClassificationLevel::Subcategories => {
                let mut picked: Vec<String> = Vec::new();
                for item in value.as_list() {
                    if !picked.contains(&item) {
                        picked.push(item);
                    }
                }
                self.subcategories = picked;
            }
        }

        let mut cleared = Vec::new();
        for descendant in level.descendants() {
            if !self.get(*descendant).is_empty() {
                cleared.push(*descendant);
            }
            self.reset(*descendant);
        }
        cleared
    }

    fn reset(&mut self, level: ClassificationLevel) {
        match level {
            ClassificationLevel::Industry => self.industry = None,
            ClassificationLevel::Category => self.category = None,
            ClassificationLevel::Subcategories => self.subcategories.clear(),
        }
    }
}

fn text_of(value: &FieldValue) -> Option<String> {
    value
        .as_text()
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn normalise(level: ClassificationLevel, value: &FieldValue) -> FieldValue {
    match level {
        ClassificationLevel::Subcategories => {
            let items = value.as_list();
            if items.is_empty() {
                FieldValue::Empty
            } else {
                FieldValue::List(items)
            }
        }
        _ => text_of(value).map(FieldValue::Text).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> ClassificationEntry {
        ClassificationEntry {
            industry: Some("Food & Beverage".into()),
            category: Some("Restaurants".into()),
            subcategories: vec!["Cafe".into(), "Bakery".into()],
        }
    }

    #[test]
    fn new_industry_clears_category_and_subcategories() {
        let mut entry = filled();
        let cleared = entry.set(ClassificationLevel::Industry, &FieldValue::text("Retail"));
        assert_eq!(
            cleared,
            vec![ClassificationLevel::Category, ClassificationLevel::Subcategories]
        );
        assert_eq!(entry.industry.as_deref(), Some("Retail"));
        assert!(entry.category.is_none());
        assert!(entry.subcategories.is_empty());
    }

    #[test]
    fn new_category_clears_only_subcategories() {
        let mut entry = filled();
        let cleared = entry.set(ClassificationLevel::Category, &FieldValue::text("Catering"));
        assert_eq!(cleared, vec![ClassificationLevel::Subcategories]);
        assert_eq!(entry.industry.as_deref(), Some("Food & Beverage"));
    }

    #[test]
    fn reselecting_same_parent_keeps_descendants() {
        let mut entry = filled();
        let cleared = entry.set(
            ClassificationLevel::Industry,
            &FieldValue::text(" Food & Beverage "),
        );
        assert!(cleared.is_empty());
        assert_eq!(entry, filled());
    }

    #[test]
    fn subcategories_are_deduplicated() {
        let mut entry = ClassificationEntry::default();
        entry.set(
            ClassificationLevel::Subcategories,
            &FieldValue::list(["Cafe", "Cafe", " Bakery "]),
        );
        assert_eq!(entry.subcategories, vec!["Cafe".to_string(), "Bakery".to_string()]);
    }
}
