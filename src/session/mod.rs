pub mod registry;
pub mod state;
pub mod view;

pub use registry::{SessionRegistry, SharedSession};
pub use state::{FormSession, Notice, NoticeLevel, SessionStatus};
pub use view::{FieldView, StepSummary, StepView};

use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WizardConfig;
use crate::metrics;
use crate::persistence::{EditingSnapshot, PersistenceStore, SnapshotBackend, SnapshotKeys};
use crate::record::{ClassificationLevel, FieldPath, FieldValue, ListingType, RecordError};
use crate::remote::{AssetRef, RecordService, RecordServiceError, RecordSubmission, RecordUpdate};
use crate::schema::{FieldScope, StepId, remap_step_index, resolve_schema};
use crate::taxonomy::{OptionCache, OptionKey, TaxonomyError, TaxonomyProvider};
use crate::uploads::{
    AssetId, AssetKind, AssetShelf, ObjectStorage, UploadBlob, UploadError, UploadOrchestrator,
};
use crate::validation::{InputSequencer, StepGateFailure, ValidationError, Validator};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is {}", .0.as_str())]
    Closed(SessionStatus),
    #[error("unknown field: {0}")]
    UnknownField(FieldPath),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Gate(StepGateFailure),
    #[error("already on the first step")]
    AtFirstStep,
    #[error("already on the last step")]
    AtLastStep,
    #[error("cannot jump from step {from} to step {to}")]
    JumpNotAllowed { from: usize, to: usize },
    #[error("step {0} does not exist")]
    InvalidStep(usize),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Remote(#[from] RecordServiceError),
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Closed(_)
            | SessionError::AtFirstStep
            | SessionError::AtLastStep
            | SessionError::JumpNotAllowed { .. } => "conflict",
            SessionError::UnknownField(_)
            | SessionError::Record(_)
            | SessionError::InvalidStep(_) => "invalid",
            SessionError::Gate(_) => "validation",
            SessionError::Upload(err) => err.kind(),
            SessionError::Remote(err) => err.kind(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("session is {}", .0.as_str())]
    Closed(SessionStatus),
    #[error("submit is only available from the last step")]
    NotOnLastStep,
    #[error("{0} upload(s) still in progress")]
    UploadsInFlight(usize),
    #[error("listing is incomplete, see step {step}")]
    Invalid { step: usize, failure: StepGateFailure },
    #[error(transparent)]
    Remote(#[from] RecordServiceError),
}

impl SubmitError {
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitError::Closed(_) | SubmitError::NotOnLastStep | SubmitError::UploadsInFlight(_) => {
                "conflict"
            }
            SubmitError::Invalid { .. } => "validation",
            SubmitError::Remote(_) => "upstream",
        }
    }
}

/// External services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn SnapshotBackend>,
    pub storage: Arc<dyn ObjectStorage>,
    pub records: Arc<dyn RecordService>,
    pub taxonomy: Arc<dyn TaxonomyProvider>,
}

struct OptionCheck {
    key: OptionKey,
    result: Result<Vec<String>, TaxonomyError>,
    revalidate: Option<(FieldPath, u64)>,
}

/// Step controller for one listing wizard session.
pub struct WizardSession {
    state: FormSession,
    store: PersistenceStore,
    uploads: UploadOrchestrator,
    records: Arc<dyn RecordService>,
    taxonomy: Arc<dyn TaxonomyProvider>,
    options: OptionCache,
    sequencer: InputSequencer,
    checks: JoinSet<OptionCheck>,
    notices: Vec<Notice>,
}

impl WizardSession {
    fn assemble(state: FormSession, deps: &Collaborators, config: &WizardConfig) -> Self {
        let store = PersistenceStore::spawn(
            deps.backend.clone(),
            SnapshotKeys::new(&config.namespace, &state.id),
            config.save_debounce,
        );
        Self {
            state,
            store,
            uploads: UploadOrchestrator::new(
                deps.storage.clone(),
                config.upload_stall_timeout,
                config.upload_idle_debounce,
            ),
            records: deps.records.clone(),
            taxonomy: deps.taxonomy.clone(),
            options: OptionCache::default(),
            sequencer: InputSequencer::default(),
            checks: JoinSet::new(),
            notices: Vec::new(),
        }
    }

    /// Opens `session_id`, restoring its last snapshot when one exists.
    pub async fn start(session_id: &str, deps: &Collaborators, config: &WizardConfig) -> Self {
        let mut session = Self::assemble(FormSession::fresh(session_id), deps, config);
        match session.store.load().await {
            Some(snapshot) => {
                session.state = FormSession::from_snapshot(session_id, snapshot);
                session.announce_restore();
                info!(
                    target = "hermes.wizard",
                    session = session_id,
                    active_step = session.state.active_step,
                    "session restored"
                );
            }
            None => {
                info!(target = "hermes.wizard", session = session_id, "session started");
            }
        }
        session
    }

    /// Opens an edit session for a published record. A local draft for the
    /// same record wins over the remote copy.
    pub async fn edit(
        session_id: &str,
        record_id: &str,
        deps: &Collaborators,
        config: &WizardConfig,
    ) -> Result<Self, SessionError> {
        let mut session = Self::assemble(FormSession::fresh(session_id), deps, config);
        if let Some(snapshot) = session.store.load().await {
            if snapshot
                .editing
                .as_ref()
                .is_some_and(|editing| editing.record_id == record_id)
            {
                session.state = FormSession::from_snapshot(session_id, snapshot);
                session.announce_restore();
                info!(
                    target = "hermes.wizard",
                    session = session_id,
                    record = record_id,
                    "edit draft restored"
                );
                return Ok(session);
            }
            session.store.clear().await;
        }

        let remote = session.records.get_record_by_id(record_id).await?;
        let featured_media = remote
            .featured_media
            .as_ref()
            .and_then(|featured| remote.media.iter().position(|m| &m.durable_ref == featured));
        let mut state = FormSession::fresh(session_id);
        state.record = remote.record;
        state.assets = AssetShelf::restore(
            remote
                .media
                .into_iter()
                .map(|reference| reference.into_persisted(AssetKind::Media))
                .collect(),
            remote
                .documents
                .into_iter()
                .map(|reference| reference.into_persisted(AssetKind::Document))
                .collect(),
            featured_media,
        );
        state.visited_steps = (0..state.steps().len()).collect();
        state.editing = Some(EditingSnapshot {
            record_id: record_id.to_string(),
            ..EditingSnapshot::default()
        });
        session.state = state;
        session.persist();
        session
            .store
            .write_pointer(session.state.active_step, &session.state.visited_steps)
            .await;
        info!(
            target = "hermes.wizard",
            session = session_id,
            record = record_id,
            "edit session hydrated"
        );
        Ok(session)
    }

    fn announce_restore(&mut self) {
        let orphaned = self.state.orphaned_assets();
        if orphaned > 0 {
            warn!(
                target = "hermes.wizard",
                session = %self.state.id,
                orphaned,
                "restored attachments need re-upload"
            );
            self.notices.push(Notice::warning(format!(
                "{orphaned} attachment(s) could not be restored and need to be uploaded again"
            )));
        }
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn state(&self) -> &FormSession {
        &self.state
    }

    pub fn options(&self) -> &OptionCache {
        &self.options
    }

    pub fn is_uploading(&self) -> bool {
        self.uploads.is_uploading(&self.state.assets)
    }

    pub fn view(&self) -> StepView {
        StepView::build(&self.state, &self.options, self.is_uploading())
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.state.status {
            SessionStatus::Active => Ok(()),
            status => Err(SessionError::Closed(status)),
        }
    }

    fn persist(&self) {
        self.store.save(self.state.snapshot());
    }

    fn validator(&self) -> Validator<'_> {
        Validator::new(self.state.schema(), &self.state.record, &self.options)
    }

    /// Writes one field, resets whatever depends on it, and validates it.
    /// Returns the field's current error.
    pub fn set_field(
        &mut self,
        path: impl Into<FieldPath>,
        value: FieldValue,
    ) -> Result<Option<ValidationError>, SessionError> {
        self.ensure_active()?;
        let path = path.into();
        if path.is_listing_type() {
            return Ok(self.set_listing_type(&path, value));
        }

        let schema = self.state.schema();
        let rule = schema
            .rule(&path)
            .ok_or_else(|| SessionError::UnknownField(path.clone()))?;
        let seq = self.sequencer.bump(&path);

        match rule.scope {
            FieldScope::Classification(level) => {
                let (index, _) = path
                    .parse_classification()
                    .ok_or_else(|| SessionError::UnknownField(path.clone()))?;
                let entry = self
                    .state
                    .record
                    .classifications
                    .get_mut(index)
                    .ok_or(RecordError::MissingClassification(index))?;
                let cleared = entry.set(level, &value);
                for below in cleared {
                    let descendant = FieldPath::classification(index, below);
                    self.state.set_error(&descendant, None);
                    self.sequencer.bump(&descendant);
                }
                self.request_options(&path, index, level, seq);
            }
            FieldScope::Shared | FieldScope::Variant => {
                let previous = self.state.record.get(&path);
                if rule.scope == FieldScope::Shared {
                    self.state.record.set_shared(path.as_str(), value.clone());
                } else {
                    self.state.record.set_detail(path.as_str(), value.clone())?;
                }
                if previous != self.state.record.get(&path) {
                    for descendant in schema.descendants(path.as_str()) {
                        self.state.record.clear(descendant);
                        self.state.set_error(&FieldPath::new(descendant), None);
                    }
                }
            }
            FieldScope::Discriminant | FieldScope::ClassificationList => {
                return Err(SessionError::UnknownField(path));
            }
        }

        let error = self.validator().validate_field(&path);
        self.state.set_error(&path, error.clone());
        self.refresh_errors();
        self.persist();
        Ok(error)
    }

    /// Unparseable values become a field error and leave the record as is.
    fn set_listing_type(&mut self, path: &FieldPath, value: FieldValue) -> Option<ValidationError> {
        self.sequencer.bump(path);
        let next = if value.is_empty() {
            None
        } else {
            let Some(kind) = value.as_text().and_then(ListingType::from_str) else {
                let error = ValidationError {
                    path: path.clone(),
                    message: "Choose a supported listing type".to_string(),
                };
                self.state.set_error(path, Some(error.clone()));
                return Some(error);
            };
            Some(kind)
        };

        let mut pointer_moved = false;
        if next != self.state.record.listing_type() {
            let from = self.state.steps();
            let to = resolve_schema(next);
            let dropped = self
                .state
                .record
                .switch_listing_type(next, |key| to.declares_detail(key));
            if to.rule(&FieldPath::new("classifications")).is_none()
                && !self.state.record.classifications.is_empty()
            {
                self.state.record.classifications.clear();
                self.state.clear_errors_with_prefix("classifications");
                self.sequencer.forget_prefix("classifications.");
            }
            for key in &dropped {
                self.state.set_error(&FieldPath::new(key.as_str()), None);
            }
            self.state.errors.retain(|path, _| to.rule(path).is_some());

            let active = remap_step_index(from, &to.steps, self.state.active_step);
            let visited: BTreeSet<usize> = self
                .state
                .visited_steps
                .iter()
                .map(|index| remap_step_index(from, &to.steps, *index))
                .collect();
            info!(
                target = "hermes.wizard",
                session = %self.state.id,
                listing_type = next.map(|k| k.as_str()).unwrap_or("none"),
                dropped = dropped.len(),
                "listing type changed"
            );
            if active != self.state.active_step || visited != self.state.visited_steps {
                self.state.active_step = active;
                self.state.visited_steps = visited;
                self.state.visited_steps.insert(0);
                self.state.visited_steps.insert(active);
                pointer_moved = true;
            }
        }

        let error = self.validator().validate_field(path);
        self.state.set_error(path, error.clone());
        self.refresh_errors();
        self.persist();
        if pointer_moved {
            self.store
                .queue_pointer(self.state.active_step, &self.state.visited_steps);
        }
        error
    }

    /// Re-checks fields that currently show an error so fixes elsewhere (a
    /// cross-field bound, a predicate turning off) clear them.
    fn refresh_errors(&mut self) {
        let paths: Vec<FieldPath> = self.state.errors.keys().cloned().collect();
        for path in paths {
            let error = self.validator().validate_field(&path);
            self.state.set_error(&path, error);
        }
    }

    pub fn add_classification(&mut self) -> Result<usize, SessionError> {
        self.ensure_active()?;
        let index = self.state.record.add_classification()?;
        let list = FieldPath::new("classifications");
        let error = self.validator().validate_field(&list);
        self.state.set_error(&list, error);
        if !self.options.contains(&OptionKey::Industries) {
            self.spawn_check(OptionKey::Industries, None);
        }
        self.persist();
        Ok(index)
    }

    pub fn remove_classification(&mut self, index: usize) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.state.record.remove_classification(index)?;
        self.state.clear_errors_with_prefix("classifications.");
        self.sequencer.forget_prefix("classifications.");
        let list = FieldPath::new("classifications");
        if self.state.errors.contains_key(&list) {
            let error = self.validator().validate_field(&list);
            self.state.set_error(&list, error);
        }
        self.persist();
        Ok(())
    }

    /// Starts the fetches a classification edit needs: the list that
    /// validates `path` and the list for the next level down.
    fn request_options(&mut self, path: &FieldPath, index: usize, level: ClassificationLevel, seq: u64) {
        let Some(entry) = self.state.record.classifications.get(index) else {
            return;
        };
        let industry = entry.industry.clone();
        let category = entry.category.clone();
        let categories = industry.clone().map(|industry| OptionKey::Categories { industry });
        let subcategories = match (industry.clone(), category) {
            (Some(industry), Some(category)) => Some(OptionKey::Subcategories { industry, category }),
            _ => None,
        };
        let (validating, next) = match level {
            ClassificationLevel::Industry => (Some(OptionKey::Industries), categories),
            ClassificationLevel::Category => (categories, subcategories),
            ClassificationLevel::Subcategories => (subcategories, None),
        };
        if let Some(key) = validating
            && !self.options.contains(&key)
        {
            self.spawn_check(key, Some((path.clone(), seq)));
        }
        if let Some(key) = next
            && !self.options.contains(&key)
        {
            self.spawn_check(key, None);
        }
    }

    fn spawn_check(&mut self, key: OptionKey, revalidate: Option<(FieldPath, u64)>) {
        let taxonomy = self.taxonomy.clone();
        self.checks.spawn(async move {
            let result = key.fetch(taxonomy.as_ref()).await;
            OptionCheck {
                key,
                result,
                revalidate,
            }
        });
    }

    fn apply_check(&mut self, check: OptionCheck) {
        match check.result {
            Ok(list) => {
                self.options.insert(check.key, list);
                if let Some((path, seq)) = check.revalidate {
                    if self.sequencer.is_current(&path, seq) {
                        let error = self.validator().validate_field(&path);
                        self.state.set_error(&path, error);
                    } else {
                        debug!(
                            target = "hermes.wizard",
                            path = %path,
                            seq,
                            "stale option check discarded"
                        );
                    }
                }
            }
            Err(err) => {
                warn!(
                    target = "hermes.wizard",
                    key = ?check.key,
                    error = %err,
                    "option list unavailable, membership not enforced"
                );
            }
        }
    }

    /// Loads option lists the current classifications depend on.
    async fn ensure_options(&mut self) {
        let mut wanted = Vec::new();
        if !self.state.record.classifications.is_empty() {
            wanted.push(OptionKey::Industries);
        }
        for entry in &self.state.record.classifications {
            if let Some(industry) = &entry.industry {
                wanted.push(OptionKey::Categories {
                    industry: industry.clone(),
                });
                if let Some(category) = &entry.category {
                    wanted.push(OptionKey::Subcategories {
                        industry: industry.clone(),
                        category: category.clone(),
                    });
                }
            }
        }
        for key in wanted {
            if self.options.contains(&key) {
                continue;
            }
            match key.fetch(self.taxonomy.as_ref()).await {
                Ok(list) => self.options.insert(key, list),
                Err(err) => warn!(
                    target = "hermes.wizard",
                    key = ?key,
                    error = %err,
                    "option list unavailable, membership not enforced"
                ),
            }
        }
    }

    /// Waits for in-flight option checks and fills in any missing lists, so
    /// gate decisions never run against a half-loaded cache.
    pub async fn settle(&mut self) {
        while let Some(joined) = self.checks.join_next().await {
            match joined {
                Ok(check) => self.apply_check(check),
                Err(err) => warn!(target = "hermes.wizard", error = %err, "option check task failed"),
            }
        }
        self.ensure_options().await;
    }

    /// Applies finished background work without waiting. Returns how many
    /// results were folded in.
    pub fn pump(&mut self) -> usize {
        let mut applied = self.uploads.drain(&mut self.state.assets);
        let uploads_changed = applied > 0;
        while let Some(joined) = self.checks.try_join_next() {
            if let Ok(check) = joined {
                self.apply_check(check);
            }
            applied += 1;
        }
        if uploads_changed {
            self.persist();
        }
        applied
    }

    pub async fn wait_for_uploads(&mut self) {
        self.uploads.drain(&mut self.state.assets);
        while self.state.assets.in_flight() > 0 {
            let Some(event) = self.uploads.next_event().await else {
                break;
            };
            self.uploads.apply(&mut self.state.assets, event);
        }
        self.persist();
    }

    pub async fn flush(&self) {
        self.persist();
        self.store.flush().await;
    }

    fn active_step_id(&self) -> StepId {
        let steps = self.state.steps();
        steps[self.state.active_step.min(steps.len() - 1)].id
    }

    /// Gate check for the active step.
    pub async fn can_advance(&mut self) -> Result<(), StepGateFailure> {
        self.settle().await;
        let step = self.active_step_id();
        let errors = self.validator().validate_step(step);
        match StepGateFailure::from_errors(step, errors) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    pub async fn advance(&mut self) -> Result<usize, SessionError> {
        self.ensure_active()?;
        if self.state.is_last_step() {
            return Err(SessionError::AtLastStep);
        }
        let from = self.state.active_step;
        if let Err(failure) = self.can_advance().await {
            let owned = self
                .state
                .schema()
                .step_owned_paths(failure.step, &self.state.record);
            self.state.replace_errors(&owned, &failure.errors);
            self.state.first_error = Some(failure.first_error.clone());
            metrics::step_transition(from, from + 1, false);
            debug!(
                target = "hermes.wizard",
                session = %self.state.id,
                step = failure.step.as_str(),
                errors = failure.errors.len(),
                "advance blocked"
            );
            return Err(SessionError::Gate(failure));
        }

        let next = from + 1;
        self.state.visited_steps.insert(next);
        self.state.first_error = None;
        self.persist();
        self.store.write_pointer(next, &self.state.visited_steps).await;
        self.state.active_step = next;
        metrics::step_transition(from, next, true);
        Ok(next)
    }

    pub async fn retreat(&mut self) -> Result<usize, SessionError> {
        self.ensure_active()?;
        if self.state.active_step == 0 {
            return Err(SessionError::AtFirstStep);
        }
        let from = self.state.active_step;
        self.state.active_step -= 1;
        self.persist();
        self.store
            .write_pointer(self.state.active_step, &self.state.visited_steps)
            .await;
        metrics::step_transition(from, self.state.active_step, true);
        Ok(self.state.active_step)
    }

    /// Back to a visited step, or one step forward through the gate.
    pub async fn jump_to(&mut self, index: usize) -> Result<usize, SessionError> {
        self.ensure_active()?;
        let current = self.state.active_step;
        if index >= self.state.steps().len() {
            return Err(SessionError::InvalidStep(index));
        }
        if index == current {
            return Ok(index);
        }
        if index == current + 1 {
            return self.advance().await;
        }
        if index > current || !self.state.visited_steps.contains(&index) {
            metrics::step_transition(current, index, false);
            return Err(SessionError::JumpNotAllowed {
                from: current,
                to: index,
            });
        }
        self.state.active_step = index;
        self.persist();
        self.store
            .write_pointer(index, &self.state.visited_steps)
            .await;
        metrics::step_transition(current, index, true);
        Ok(index)
    }

    pub async fn set_featured_media(&mut self, index: Option<usize>) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.state
            .assets
            .set_featured(index)
            .map_err(UploadError::from)?;
        self.store.write_featured(index).await;
        self.persist();
        Ok(())
    }

    pub fn enqueue_upload(&mut self, kind: AssetKind, blob: UploadBlob) -> Result<AssetId, SessionError> {
        self.ensure_active()?;
        let id = self.uploads.enqueue(&mut self.state.assets, kind, blob);
        self.persist();
        Ok(id)
    }

    pub fn retry_upload(&mut self, id: AssetId, blob: Option<UploadBlob>) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.uploads.retry(&mut self.state.assets, id, blob)?;
        self.persist();
        Ok(())
    }

    /// Removes an attachment. Pre-existing attachments of an edited record
    /// are queued for deletion with the next update instead.
    pub async fn remove_asset(&mut self, id: AssetId) -> Result<(), SessionError> {
        self.ensure_active()?;
        let featured_before = self.state.assets.featured_media;
        let removed = self.uploads.remove(&mut self.state.assets, id)?;
        if removed.existing
            && let Some(editing) = self.state.editing.as_mut()
            && let Some((durable_ref, _)) = removed.committed()
        {
            let deleted = match removed.kind {
                AssetKind::Media => &mut editing.deleted_media,
                AssetKind::Document => &mut editing.deleted_documents,
            };
            deleted.push(durable_ref.to_string());
        }
        if self.state.assets.featured_media != featured_before {
            self.store.write_featured(self.state.assets.featured_media).await;
        }
        self.persist();
        Ok(())
    }

    /// Final validation and hand-off to the record service. The record stays
    /// untouched on any failure.
    pub async fn submit(&mut self) -> Result<String, SubmitError> {
        if self.state.status != SessionStatus::Active {
            return Err(SubmitError::Closed(self.state.status));
        }
        if !self.state.is_last_step() {
            return Err(SubmitError::NotOnLastStep);
        }
        self.uploads.drain(&mut self.state.assets);
        let in_flight = self.state.assets.in_flight();
        if in_flight > 0 {
            return Err(SubmitError::UploadsInFlight(in_flight));
        }

        self.settle().await;
        let errors = self.validator().validate_all();
        if let Some(failure) = StepGateFailure::from_errors(StepId::Review, errors) {
            let schema = self.state.schema();
            let step_id = schema.step_of(&failure.first_error).unwrap_or(StepId::Basics);
            let step = schema.step_index(step_id).unwrap_or(0);
            let all = schema.all_paths(&self.state.record);
            self.state.replace_errors(&all, &failure.errors);
            self.state.first_error = Some(failure.first_error.clone());
            self.state.active_step = step;
            self.store.write_pointer(step, &self.state.visited_steps).await;
            self.persist();
            warn!(
                target = "hermes.wizard",
                session = %self.state.id,
                step = step_id.as_str(),
                errors = failure.errors.len(),
                "submit blocked by validation"
            );
            return Err(SubmitError::Invalid {
                step,
                failure: StepGateFailure { step: step_id, ..failure },
            });
        }

        let skipped = self.state.assets.needing_attention();
        if skipped > 0 {
            warn!(
                target = "hermes.wizard",
                session = %self.state.id,
                skipped,
                "submitting without attachments that failed or need re-upload"
            );
            self.notices.push(Notice::warning(format!(
                "{skipped} attachment(s) were not included because they are not uploaded"
            )));
        }

        self.state.status = SessionStatus::Submitting;
        let started = Instant::now();
        let result = self.send_record().await;
        match result {
            Ok(id) => {
                self.store.clear().await;
                self.state.status = SessionStatus::Submitted;
                metrics::submit_elapsed("ok", started.elapsed().as_millis());
                info!(
                    target = "hermes.records",
                    session = %self.state.id,
                    record = %id,
                    "listing submitted"
                );
                self.notices.push(Notice::info("Listing published"));
                Ok(id)
            }
            Err(err) => {
                self.state.status = SessionStatus::Active;
                metrics::submit_elapsed("error", started.elapsed().as_millis());
                warn!(
                    target = "hermes.records",
                    session = %self.state.id,
                    error = %err,
                    "listing submission failed"
                );
                self.notices.push(Notice::error(format!(
                    "We could not publish your listing, your answers are saved: {err}"
                )));
                self.flush().await;
                Err(SubmitError::Remote(err))
            }
        }
    }

    fn featured_ref(&self) -> Option<String> {
        let index = self.state.assets.featured_media?;
        let (durable_ref, _) = self.state.assets.media.get(index)?.committed()?;
        Some(durable_ref.to_string())
    }

    async fn send_record(&self) -> Result<String, RecordServiceError> {
        let assets = &self.state.assets;
        let refs = |kind: AssetKind, only_new: bool| -> Vec<AssetRef> {
            assets
                .committed(kind)
                .filter(|asset| !(only_new && asset.existing))
                .filter_map(AssetRef::from_asset)
                .collect()
        };

        match &self.state.editing {
            Some(editing) => {
                let update = RecordUpdate {
                    record: self.state.record.clone(),
                    new_media: refs(AssetKind::Media, true),
                    new_documents: refs(AssetKind::Document, true),
                    deleted_media: editing.deleted_media.clone(),
                    deleted_documents: editing.deleted_documents.clone(),
                    featured_media: self.featured_ref(),
                };
                self.records.update_record(&editing.record_id, &update).await?;
                Ok(editing.record_id.clone())
            }
            None => {
                let submission = RecordSubmission {
                    record: self.state.record.clone(),
                    media: refs(AssetKind::Media, false),
                    documents: refs(AssetKind::Document, false),
                    featured_media: self.featured_ref(),
                };
                self.records.create_record(&submission).await
            }
        }
    }

    /// Drops everything and begins a blank session under the same id.
    pub async fn start_over(&mut self) {
        self.uploads.cancel_all(&self.state.assets);
        self.checks.abort_all();
        self.store.clear().await;
        self.state = FormSession::fresh(self.state.id.clone());
        self.sequencer = InputSequencer::default();
        self.notices.clear();
        info!(target = "hermes.wizard", session = %self.state.id, "session reset");
    }

    /// Cancels transfers and removes the draft without starting again.
    pub async fn abandon(&mut self) {
        self.uploads.cancel_all(&self.state.assets);
        self.checks.abort_all();
        self.store.clear().await;
        self.state.status = SessionStatus::Abandoned;
        info!(target = "hermes.wizard", session = %self.state.id, "session abandoned");
    }
}
