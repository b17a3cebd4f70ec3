use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::record::{FieldPath, FieldValue, ListingRecord};
use crate::schema::{Constraint, FieldRule, FieldScope, Schema, StepId};
use crate::taxonomy::{OptionCache, contains_option};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: FieldPath,
    pub message: String,
}

impl ValidationError {
    fn new(path: &FieldPath, message: impl Into<String>) -> Self {
        Self {
            path: path.clone(),
            message: message.into(),
        }
    }
}

/// Aggregated field errors that blocked a transition. `first_error` is the
/// field to focus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("step `{}` has {} invalid field(s), first: {first_error}", .step.as_str(), .errors.len())]
pub struct StepGateFailure {
    pub step: StepId,
    pub errors: Vec<ValidationError>,
    pub first_error: FieldPath,
}

impl StepGateFailure {
    pub fn from_errors(step: StepId, errors: Vec<ValidationError>) -> Option<Self> {
        let first_error = errors.first()?.path.clone();
        Some(Self {
            step,
            errors,
            first_error,
        })
    }
}

/// Schema-driven checks over one record snapshot. Predicates and option
/// lists are read on every call; nothing is cached between calls.
pub struct Validator<'a> {
    schema: &'a Schema,
    record: &'a ListingRecord,
    options: &'a OptionCache,
}

impl<'a> Validator<'a> {
    pub fn new(schema: &'a Schema, record: &'a ListingRecord, options: &'a OptionCache) -> Self {
        Self {
            schema,
            record,
            options,
        }
    }

    /// Fields the active schema does not know, and conditional fields whose
    /// predicate is off, never produce an error.
    pub fn validate_field(&self, path: &FieldPath) -> Option<ValidationError> {
        let rule = self.schema.rule(path)?;
        if let Some((index, _)) = path.parse_classification()
            && index >= self.record.classifications.len()
        {
            return None;
        }
        if !rule.is_active(self.record) {
            return None;
        }

        let value = self.record.get(path);
        let empty = match rule.scope {
            FieldScope::ClassificationList => self.record.classifications.is_empty(),
            _ => value.is_empty(),
        };
        if empty {
            return rule
                .is_required(self.record)
                .then(|| ValidationError::new(path, required_message(rule)));
        }

        rule.constraints
            .iter()
            .find_map(|constraint| self.check(rule, path, &value, constraint))
            .map(|message| ValidationError::new(path, message))
    }

    pub fn validate_fields(&self, paths: &[FieldPath]) -> Vec<ValidationError> {
        paths
            .iter()
            .filter_map(|path| self.validate_field(path))
            .collect()
    }

    pub fn validate_step(&self, step: StepId) -> Vec<ValidationError> {
        self.validate_fields(&self.schema.step_owned_paths(step, self.record))
    }

    pub fn validate_all(&self) -> Vec<ValidationError> {
        self.validate_fields(&self.schema.all_paths(self.record))
    }

    fn check(
        &self,
        rule: &FieldRule,
        path: &FieldPath,
        value: &FieldValue,
        constraint: &Constraint,
    ) -> Option<String> {
        let label = rule.label;
        match constraint {
            Constraint::Length { min, max } => {
                let Some(text) = value.as_text() else {
                    return Some(format!("{label} must be text"));
                };
                let length = text.chars().count();
                if let Some(min) = min
                    && length < *min
                {
                    return Some(format!("{label} must be at least {min} characters"));
                }
                if let Some(max) = max
                    && length > *max
                {
                    return Some(format!("{label} must be at most {max} characters"));
                }
                None
            }
            Constraint::Range { min, max } => {
                let Some(number) = value.as_number() else {
                    return Some(format!("{label} must be a number"));
                };
                if let Some(min) = min
                    && number < *min
                {
                    return Some(format!("{label} must be at least {}", display_number(*min)));
                }
                if let Some(max) = max
                    && number > *max
                {
                    return Some(format!("{label} must be at most {}", display_number(*max)));
                }
                None
            }
            Constraint::Pattern { regex, hint } => {
                let matches = value.as_text().is_some_and(|text| regex.is_match(text));
                (!matches).then(|| format!("{label} must be {hint}"))
            }
            Constraint::OneOf(options) => {
                let matches = value
                    .as_text()
                    .is_some_and(|text| options.iter().any(|o| o.eq_ignore_ascii_case(text)));
                (!matches).then(|| format!("{label} must be one of: {}", options.join(", ")))
            }
            Constraint::Items { min, max } => {
                let count = match rule.scope {
                    FieldScope::ClassificationList => self.record.classifications.len(),
                    _ => value.as_list().len(),
                };
                if count < *min {
                    return Some(format!("Select at least {min} {}", label.to_lowercase()));
                }
                if count > *max {
                    return Some(format!("Select at most {max} {}", label.to_lowercase()));
                }
                None
            }
            Constraint::AtLeastField(other) => {
                let other_value = self.record.get(&FieldPath::new(*other)).as_number()?;
                let number = value.as_number()?;
                let other_label = self
                    .schema
                    .rule(&FieldPath::new(*other))
                    .map(|r| r.label)
                    .unwrap_or(*other);
                (number < other_value)
                    .then(|| format!("{label} must not be less than {other_label}"))
            }
            Constraint::KnownIndustry => {
                let industry = value.as_text()?;
                let options = self.options.industries()?;
                (!contains_option(options, industry))
                    .then(|| format!("{industry} is not a recognised industry"))
            }
            Constraint::CategoryOption => {
                let (index, _) = path.parse_classification()?;
                let entry = self.record.classifications.get(index)?;
                let industry = entry.industry.as_deref()?;
                let category = value.as_text()?;
                let options = self.options.categories(industry)?;
                (!contains_option(options, category))
                    .then(|| format!("{category} is not a category of {industry}"))
            }
            Constraint::SubcategoryOptions => {
                let (index, _) = path.parse_classification()?;
                let entry = self.record.classifications.get(index)?;
                let industry = entry.industry.as_deref()?;
                let category = entry.category.as_deref()?;
                let options = self.options.subcategories(industry, category)?;
                value
                    .as_list()
                    .into_iter()
                    .find(|item| !contains_option(options, item))
                    .map(|item| format!("{item} is not a subcategory of {category}"))
            }
        }
    }
}

fn required_message(rule: &FieldRule) -> String {
    match rule.scope {
        FieldScope::ClassificationList => "Add at least one classification".to_string(),
        _ => format!("{} is required", rule.label),
    }
}

fn display_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Monotonic per-field input counter. A check started for an older input
/// must not overwrite the result for a newer one.
#[derive(Debug, Default)]
pub struct InputSequencer {
    counter: u64,
    latest: HashMap<FieldPath, u64>,
}

impl InputSequencer {
    pub fn bump(&mut self, path: &FieldPath) -> u64 {
        self.counter += 1;
        self.latest.insert(path.clone(), self.counter);
        self.counter
    }

    pub fn is_current(&self, path: &FieldPath, seq: u64) -> bool {
        self.latest.get(path).copied() == Some(seq)
    }

    pub fn forget_prefix(&mut self, prefix: &str) {
        self.latest.retain(|path, _| !path.as_str().starts_with(prefix));
    }
}
