//! Read-side assembly of an application's hiring progress.
//!
//! The view layer is where the virtual "Applied" stage exists: it is
//! prepended for display only and the engine never sees it. Sub-reads are
//! tolerant; a failed side-collection read degrades to an empty field with a
//! logged warning instead of failing the whole view.

use serde::Serialize;
use tracing::warn;

use super::domain::{
    ActivityLogEntry, ApplicationId, ApplicationRecord, CompensationMeeting, CompensationNote,
    CompensationRecord, Interview, OfferDocument, TechnicalTask,
};
use super::engine::PipelineError;
use super::repository::{ActivityCursor, PipelineStore, StoreError};
use super::stage::Stage;

/// Number of activity entries bundled into the progress view.
const PROGRESS_ACTIVITY_PAGE: usize = 20;

/// One stage in the display rail. `stage` is `None` for the virtual Applied
/// entry, which has no pipeline counterpart.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayStage {
    pub key: String,
    pub label: String,
    pub stage: Option<Stage>,
    pub current: bool,
}

/// Negotiation bundle; only assembled while the application sits in the
/// Compensation stage.
#[derive(Debug, Clone, Serialize)]
pub struct CompensationView {
    pub record: Option<CompensationRecord>,
    pub meetings: Vec<CompensationMeeting>,
    pub notes: Vec<CompensationNote>,
}

/// Full hiring-progress view model for one application.
#[derive(Debug, Clone, Serialize)]
pub struct HiringProgressView {
    pub application: ApplicationRecord,
    pub display_stages: Vec<DisplayStage>,
    pub interviews: Vec<Interview>,
    pub technical_tasks: Vec<TechnicalTask>,
    pub offer_documents: Vec<OfferDocument>,
    pub compensation: Option<CompensationView>,
    /// First activity page, oldest first.
    pub activity: Vec<ActivityLogEntry>,
}

/// Cursor-paged activity feed, oldest first within the page.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityPage {
    pub entries: Vec<ActivityLogEntry>,
    pub next_cursor: Option<ActivityCursor>,
    pub has_more: bool,
}

fn degraded<T>(result: Result<Vec<T>, StoreError>, field: &str, id: &ApplicationId) -> Vec<T> {
    match result {
        Ok(values) => values,
        Err(err) => {
            warn!(application_id = %id.0, field, error = %err, "sub-read degraded to empty");
            Vec::new()
        }
    }
}

/// Assemble the progress view. Only the aggregate read is fatal; every
/// side-collection read degrades on failure.
pub fn progress_view<S: PipelineStore>(
    store: &S,
    id: &ApplicationId,
) -> Result<HiringProgressView, PipelineError> {
    let application = store
        .fetch_application(id)?
        .ok_or(PipelineError::ApplicationNotFound)?;

    let interviews = degraded(store.interviews_for(id), "interviews", id);
    let technical_tasks = degraded(store.tasks_for(id), "technical_tasks", id);
    let offer_documents = degraded(store.offers_for(id), "offer_documents", id);

    let compensation = if application.stage == Stage::Compensation {
        let record = match store.fetch_compensation(id) {
            Ok(record) => record,
            Err(err) => {
                warn!(application_id = %id.0, error = %err, "compensation read degraded");
                None
            }
        };
        Some(CompensationView {
            record,
            meetings: degraded(store.meetings_for(id), "meetings", id),
            notes: degraded(store.compensation_notes_for(id), "notes", id),
        })
    } else {
        None
    };

    let mut activity = degraded(
        store.activity_page(id, PROGRESS_ACTIVITY_PAGE, None),
        "activity",
        id,
    );
    // Storage hands back newest-first; the timeline reads oldest-first.
    activity.reverse();

    let display_stages = display_stages(&application);

    Ok(HiringProgressView {
        application,
        display_stages,
        interviews,
        technical_tasks,
        offer_documents,
        compensation,
        activity,
    })
}

/// Display rail: the virtual Applied stage, then the posting's enabled
/// stages in order. Terminal stages appear only once reached.
pub fn display_stages(application: &ApplicationRecord) -> Vec<DisplayStage> {
    let mut stages = vec![DisplayStage {
        key: "applied".to_string(),
        label: "Applied".to_string(),
        stage: None,
        current: false,
    }];

    for stage in &application.job.enabled_stages {
        stages.push(DisplayStage {
            key: stage.label().to_lowercase().replace(' ', "_"),
            label: stage.label().to_string(),
            stage: Some(*stage),
            current: application.stage == *stage,
        });
    }

    if application.stage.is_terminal() {
        stages.push(DisplayStage {
            key: application.stage.label().to_lowercase(),
            label: application.stage.label().to_string(),
            stage: Some(application.stage),
            current: true,
        });
    }

    stages
}

/// Cursor-based activity pagination. The page comes back newest-first from
/// storage and is re-sorted ascending by (created_at, id) so chronological
/// order holds for the caller even under concurrent appends.
pub fn activity_page<S: PipelineStore>(
    store: &S,
    id: &ApplicationId,
    page_size: usize,
    cursor: Option<ActivityCursor>,
) -> Result<ActivityPage, PipelineError> {
    store
        .fetch_application(id)?
        .ok_or(PipelineError::ApplicationNotFound)?;

    let page_size = page_size.max(1);
    let mut newest_first = store.activity_page(id, page_size + 1, cursor.as_ref())?;
    let has_more = newest_first.len() > page_size;
    newest_first.truncate(page_size);

    let next_cursor = newest_first.last().map(ActivityCursor::from_entry);

    let mut entries = newest_first;
    entries.sort_by(|a, b| (a.created_at, a.id.as_str()).cmp(&(b.created_at, b.id.as_str())));

    Ok(ActivityPage {
        entries,
        next_cursor,
        has_more,
    })
}
