use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::record::{ClassificationLevel, FieldPath, FieldValue, ListingRecord, ListingType};
use crate::schema::{FieldScope, StepGate, StepId};
use crate::session::state::{FormSession, SessionStatus};
use crate::taxonomy::OptionCache;
use crate::uploads::Asset;
use crate::validation::ValidationError;

#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub index: usize,
    pub id: StepId,
    pub title: &'static str,
    pub visited: bool,
    pub active: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct FieldView {
    pub path: FieldPath,
    pub label: &'static str,
    pub required: bool,
    pub value: FieldValue,
    pub error: Option<String>,
    /// Choices for option-backed fields, once loaded.
    pub options: Option<Vec<String>>,
}

/// Read-only projection handed to whatever renders the wizard.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub session_id: String,
    pub status: SessionStatus,
    pub listing_type: Option<ListingType>,
    pub steps: Vec<StepSummary>,
    pub active_step: usize,
    pub active_step_id: StepId,
    pub gate: StepGate,
    pub fields: Vec<FieldView>,
    pub errors: Vec<ValidationError>,
    pub first_error: Option<FieldPath>,
    pub record: ListingRecord,
    pub media: Vec<Asset>,
    pub documents: Vec<Asset>,
    pub featured_media: Option<usize>,
    pub is_uploading: bool,
    pub can_retreat: bool,
    pub is_last_step: bool,
    pub editing_record: Option<String>,
}

impl StepView {
    pub fn build(session: &FormSession, options: &OptionCache, is_uploading: bool) -> Self {
        let schema = session.schema();
        let steps = session.steps();
        let active = &steps[session.active_step.min(steps.len() - 1)];
        let record = &session.record;

        let fields: Vec<FieldView> = schema
            .rules()
            .iter()
            .filter(|rule| rule.step == active.id && rule.is_active(record))
            .flat_map(|rule| {
                schema
                    .concrete_paths(rule, record)
                    .into_iter()
                    .map(move |path| (rule, path))
            })
            .map(|(rule, path)| FieldView {
                error: session.errors.get(&path).map(|e| e.message.clone()),
                options: field_options(rule.scope, &path, record, options),
                value: record.get(&path),
                label: rule.label,
                required: rule.is_required(record),
                path,
            })
            .collect();

        let errors = session
            .errors
            .values()
            .filter(|error| schema.step_of(&error.path) == Some(active.id))
            .cloned()
            .collect();

        Self {
            session_id: session.id.clone(),
            status: session.status,
            listing_type: record.listing_type(),
            steps: steps
                .iter()
                .enumerate()
                .map(|(index, step)| StepSummary {
                    index,
                    id: step.id,
                    title: step.title,
                    visited: session.visited_steps.contains(&index),
                    active: index == session.active_step,
                })
                .collect(),
            active_step: session.active_step,
            active_step_id: active.id,
            gate: active.gate,
            fields,
            errors,
            first_error: session.first_error.clone(),
            record: record.clone(),
            media: session.assets.media.clone(),
            documents: session.assets.documents.clone(),
            featured_media: session.assets.featured_media,
            is_uploading,
            can_retreat: session.active_step > 0,
            is_last_step: session.is_last_step(),
            editing_record: session.editing.as_ref().map(|e| e.record_id.clone()),
        }
    }
}

fn field_options(
    scope: FieldScope,
    path: &FieldPath,
    record: &ListingRecord,
    options: &OptionCache,
) -> Option<Vec<String>> {
    let FieldScope::Classification(level) = scope else {
        return None;
    };
    let (index, _) = path.parse_classification()?;
    let entry = record.classifications.get(index)?;
    let list = match level {
        ClassificationLevel::Industry => options.industries(),
        ClassificationLevel::Category => options.categories(entry.industry.as_deref()?),
        ClassificationLevel::Subcategories => {
            options.subcategories(entry.industry.as_deref()?, entry.category.as_deref()?)
        }
    };
    list.map(<[String]>::to_vec)
}
