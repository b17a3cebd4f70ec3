use regex::Regex;

use crate::record::{ClassificationLevel, FieldPath, ListingRecord};
use crate::schema::steps::StepId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    Discriminant,
    Shared,
    Variant,
    ClassificationList,
    Classification(ClassificationLevel),
}

/// Condition over sibling fields, evaluated against the record every time.
#[derive(Debug, Clone)]
pub enum Predicate {
    Equals(&'static str, &'static str),
    AnyOf(&'static str, &'static [&'static str]),
    IsTrue(&'static str),
}

impl Predicate {
    pub fn holds(&self, record: &ListingRecord) -> bool {
        match self {
            Predicate::Equals(path, expected) => record
                .get(&FieldPath::new(*path))
                .as_text()
                .is_some_and(|value| value.eq_ignore_ascii_case(expected)),
            Predicate::AnyOf(path, options) => record
                .get(&FieldPath::new(*path))
                .as_text()
                .is_some_and(|value| options.iter().any(|o| value.eq_ignore_ascii_case(o))),
            Predicate::IsTrue(path) => record.get(&FieldPath::new(*path)).as_bool() == Some(true),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Requirement {
    Always,
    Optional,
    When(Predicate),
}

#[derive(Debug, Clone)]
pub enum Constraint {
    Length { min: Option<usize>, max: Option<usize> },
    Range { min: Option<f64>, max: Option<f64> },
    Pattern { regex: &'static Regex, hint: &'static str },
    OneOf(&'static [&'static str]),
    Items { min: usize, max: usize },
    AtLeastField(&'static str),
    KnownIndustry,
    CategoryOption,
    SubcategoryOptions,
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    /// Classification rules use `classifications.*.<level>` as a template.
    pub path: &'static str,
    pub label: &'static str,
    pub step: StepId,
    pub scope: FieldScope,
    pub requirement: Requirement,
    pub constraints: Vec<Constraint>,
    pub parent: Option<&'static str>,
}

impl FieldRule {
    fn base(path: &'static str, label: &'static str, step: StepId, scope: FieldScope) -> Self {
        Self {
            path,
            label,
            step,
            scope,
            requirement: Requirement::Optional,
            constraints: Vec::new(),
            parent: None,
        }
    }

    pub fn shared(path: &'static str, label: &'static str, step: StepId) -> Self {
        Self::base(path, label, step, FieldScope::Shared)
    }

    pub fn variant(path: &'static str, label: &'static str, step: StepId) -> Self {
        Self::base(path, label, step, FieldScope::Variant)
    }

    pub fn discriminant(path: &'static str, label: &'static str, step: StepId) -> Self {
        Self::base(path, label, step, FieldScope::Discriminant)
    }

    pub fn classification_list(path: &'static str, label: &'static str) -> Self {
        Self::base(path, label, StepId::Classification, FieldScope::ClassificationList)
    }

    pub fn classification(
        path: &'static str,
        label: &'static str,
        level: ClassificationLevel,
    ) -> Self {
        Self::base(
            path,
            label,
            StepId::Classification,
            FieldScope::Classification(level),
        )
    }

    pub fn required(mut self) -> Self {
        self.requirement = Requirement::Always;
        self
    }

    /// Required only while `predicate` holds; the predicate's subject becomes
    /// the parent so changing it resets this field.
    pub fn required_when(mut self, predicate: Predicate) -> Self {
        let subject = match &predicate {
            Predicate::Equals(path, _) | Predicate::AnyOf(path, _) | Predicate::IsTrue(path) => *path,
        };
        self.parent = Some(subject);
        self.requirement = Requirement::When(predicate);
        self
    }

    pub fn length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.constraints.push(Constraint::Length { min, max });
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.constraints.push(Constraint::Range { min, max });
        self
    }

    pub fn pattern(mut self, regex: &'static Regex, hint: &'static str) -> Self {
        self.constraints.push(Constraint::Pattern { regex, hint });
        self
    }

    pub fn one_of(mut self, options: &'static [&'static str]) -> Self {
        self.constraints.push(Constraint::OneOf(options));
        self
    }

    pub fn items(mut self, min: usize, max: usize) -> Self {
        self.constraints.push(Constraint::Items { min, max });
        self
    }

    pub fn at_least(mut self, other: &'static str) -> Self {
        self.constraints.push(Constraint::AtLeastField(other));
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// A rule is active unless its conditional requirement currently fails.
    pub fn is_active(&self, record: &ListingRecord) -> bool {
        match &self.requirement {
            Requirement::When(predicate) => predicate.holds(record),
            Requirement::Always | Requirement::Optional => true,
        }
    }

    pub fn is_required(&self, record: &ListingRecord) -> bool {
        match &self.requirement {
            Requirement::Always => true,
            Requirement::Optional => false,
            Requirement::When(predicate) => predicate.holds(record),
        }
    }

    pub fn needs_options(&self) -> bool {
        self.constraints.iter().any(|c| {
            matches!(
                c,
                Constraint::KnownIndustry | Constraint::CategoryOption | Constraint::SubcategoryOptions
            )
        })
    }
}
