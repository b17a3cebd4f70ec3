use chrono::Utc;
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::collections::{BTreeMap, BTreeSet};

use crate::persistence::{EditingSnapshot, SessionSnapshot};
use crate::record::{FieldPath, ListingRecord};
use crate::schema::{Schema, StepDefinition, resolve_schema};
use crate::uploads::{AssetKind, AssetShelf, AssetState};
use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Submitting,
    Submitted,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Submitting => "submitting",
            SessionStatus::Submitted => "submitted",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Session-level message for the user, separate from field errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// All state of one wizard session in a single value.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct FormSession {
    pub id: String,
    pub record: ListingRecord,
    pub active_step: usize,
    pub visited_steps: BTreeSet<usize>,
    pub assets: AssetShelf,
    pub editing: Option<EditingSnapshot>,
    pub errors: BTreeMap<FieldPath, ValidationError>,
    pub first_error: Option<FieldPath>,
    pub status: SessionStatus,
}

impl FormSession {
    pub fn fresh(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            record: ListingRecord::default(),
            active_step: 0,
            visited_steps: BTreeSet::from([0]),
            assets: AssetShelf::default(),
            editing: None,
            errors: BTreeMap::new(),
            first_error: None,
            status: SessionStatus::Active,
        }
    }

    pub fn from_snapshot(id: impl Into<String>, snapshot: SessionSnapshot) -> Self {
        let mut session = Self {
            id: id.into(),
            record: snapshot.record,
            active_step: snapshot.active_step,
            visited_steps: snapshot.visited_steps,
            assets: AssetShelf::restore(snapshot.media, snapshot.documents, snapshot.featured_media),
            editing: snapshot.editing,
            errors: BTreeMap::new(),
            first_error: None,
            status: SessionStatus::Active,
        };
        let last = session.steps().len() - 1;
        session.active_step = session.active_step.min(last);
        session.visited_steps.retain(|index| *index <= last);
        session.visited_steps.insert(0);
        session.visited_steps.insert(session.active_step);
        session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            record: self.record.clone(),
            active_step: self.active_step,
            visited_steps: self.visited_steps.clone(),
            featured_media: self.assets.featured_media,
            media: self.assets.persisted(AssetKind::Media),
            documents: self.assets.persisted(AssetKind::Document),
            editing: self.editing.clone(),
            saved_at: Some(Utc::now()),
        }
    }

    pub fn schema(&self) -> &'static Schema {
        resolve_schema(self.record.listing_type())
    }

    pub fn steps(&self) -> &'static [StepDefinition] {
        &self.schema().steps
    }

    pub fn is_last_step(&self) -> bool {
        self.active_step + 1 == self.steps().len()
    }

    pub fn orphaned_assets(&self) -> usize {
        self.assets
            .iter()
            .filter(|asset| matches!(asset.state, AssetState::PlaceholderOrphaned { .. }))
            .count()
    }

    /// Replaces the errors owned by `paths` with `found`.
    pub fn replace_errors(&mut self, paths: &[FieldPath], found: &[ValidationError]) {
        for path in paths {
            self.errors.remove(path);
        }
        for error in found {
            self.errors.insert(error.path.clone(), error.clone());
        }
    }

    pub fn set_error(&mut self, path: &FieldPath, error: Option<ValidationError>) {
        match error {
            Some(error) => {
                self.errors.insert(path.clone(), error);
            }
            None => {
                self.errors.remove(path);
                if self.first_error.as_ref() == Some(path) {
                    self.first_error = None;
                }
            }
        }
    }

    pub fn clear_errors_with_prefix(&mut self, prefix: &str) {
        self.errors.retain(|path, _| !path.as_str().starts_with(prefix));
        if self
            .first_error
            .as_ref()
            .is_some_and(|path| path.as_str().starts_with(prefix))
        {
            self.first_error = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ListingDetails, ListingType};

    #[test]
    fn restored_pointers_are_clamped_to_the_step_list() {
        let snapshot = SessionSnapshot {
            record: ListingRecord {
                details: Some(ListingDetails::empty(ListingType::Investor)),
                ..ListingRecord::default()
            },
            active_step: 5,
            visited_steps: BTreeSet::from([0, 1, 2, 5]),
            ..SessionSnapshot::default()
        };
        let session = FormSession::from_snapshot("s", snapshot);
        assert_eq!(session.active_step, 3);
        assert_eq!(session.visited_steps, BTreeSet::from([0, 1, 2, 3]));
        assert!(session.is_last_step());
    }

    #[test]
    fn snapshot_round_trips_pointers() {
        let mut session = FormSession::fresh("s");
        session.active_step = 2;
        session.visited_steps.extend([1, 2]);
        let restored = FormSession::from_snapshot("s", session.snapshot());
        assert_eq!(restored.active_step, 2);
        assert_eq!(restored.visited_steps, BTreeSet::from([0, 1, 2]));
    }
}
