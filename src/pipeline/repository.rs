//! Storage and outbound-notification seams for the pipeline engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ActivityLogEntry, ApplicationId, ApplicationRecord, CompensationMeeting, CompensationNote,
    CompensationRecord, Interview, InterviewId, MeetingId, OfferDocument, OfferId, TaskId,
    TechnicalTask,
};

/// Storage abstraction over the aggregate and its side-collections so the
/// engine and views can be exercised against in-memory doubles.
///
/// `update_application` must reject a record whose `version` no longer
/// matches the stored one; that check backs the single-writer discipline.
pub trait PipelineStore: Send + Sync {
    fn insert_application(
        &self,
        record: ApplicationRecord,
    ) -> Result<ApplicationRecord, StoreError>;
    /// Version-checked write; returns the stored record with `version`
    /// bumped and `updated_at` refreshed.
    fn update_application(
        &self,
        record: ApplicationRecord,
    ) -> Result<ApplicationRecord, StoreError>;
    /// Targeted score write-back for the scoring adapter; never a full-record
    /// update, so a late oracle answer cannot clobber concurrent pipeline
    /// writes.
    fn set_score(&self, id: &ApplicationId, score: i16) -> Result<(), StoreError>;
    fn fetch_application(&self, id: &ApplicationId)
        -> Result<Option<ApplicationRecord>, StoreError>;

    fn insert_interview(&self, interview: Interview) -> Result<Interview, StoreError>;
    fn update_interview(&self, interview: Interview) -> Result<Interview, StoreError>;
    fn fetch_interview(&self, id: &InterviewId) -> Result<Option<Interview>, StoreError>;
    fn interviews_for(&self, id: &ApplicationId) -> Result<Vec<Interview>, StoreError>;

    fn insert_task(&self, task: TechnicalTask) -> Result<TechnicalTask, StoreError>;
    fn update_task(&self, task: TechnicalTask) -> Result<TechnicalTask, StoreError>;
    fn fetch_task(&self, id: &TaskId) -> Result<Option<TechnicalTask>, StoreError>;
    fn tasks_for(&self, id: &ApplicationId) -> Result<Vec<TechnicalTask>, StoreError>;

    fn upsert_compensation(
        &self,
        record: CompensationRecord,
    ) -> Result<CompensationRecord, StoreError>;
    fn fetch_compensation(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<CompensationRecord>, StoreError>;

    fn insert_meeting(&self, meeting: CompensationMeeting)
        -> Result<CompensationMeeting, StoreError>;
    fn update_meeting(&self, meeting: CompensationMeeting)
        -> Result<CompensationMeeting, StoreError>;
    fn fetch_meeting(&self, id: &MeetingId) -> Result<Option<CompensationMeeting>, StoreError>;
    fn meetings_for(&self, id: &ApplicationId) -> Result<Vec<CompensationMeeting>, StoreError>;

    fn append_compensation_note(
        &self,
        note: CompensationNote,
    ) -> Result<CompensationNote, StoreError>;
    fn compensation_notes_for(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<CompensationNote>, StoreError>;

    fn insert_offer(&self, offer: OfferDocument) -> Result<OfferDocument, StoreError>;
    fn update_offer(&self, offer: OfferDocument) -> Result<OfferDocument, StoreError>;
    fn fetch_offer(&self, id: &OfferId) -> Result<Option<OfferDocument>, StoreError>;
    fn offers_for(&self, id: &ApplicationId) -> Result<Vec<OfferDocument>, StoreError>;

    fn append_activity(&self, entry: ActivityLogEntry) -> Result<ActivityLogEntry, StoreError>;
    /// Newest-first page of activity entries, starting strictly after the
    /// cursor when one is given.
    fn activity_page(
        &self,
        id: &ApplicationId,
        limit: usize,
        cursor: Option<&ActivityCursor>,
    ) -> Result<Vec<ActivityLogEntry>, StoreError>;
}

/// Pagination cursor for the activity feed: the last-seen entry's timestamp
/// and id, never an offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl ActivityCursor {
    pub fn from_entry(entry: &ActivityLogEntry) -> Self {
        Self {
            created_at: entry.created_at,
            id: entry.id.clone(),
        }
    }
}

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("stale write: stored version {stored}, attempted {attempted}")]
    VersionMismatch { stored: u64, attempted: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification payload. Delivery is fire-and-forget; the engine
/// logs failures and never surfaces them to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub event: String,
    pub payload: BTreeMap<String, String>,
}

/// Trait describing the external notification sink (e-mail, push, etc.).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Notification dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Sink that writes notifications to the log. Stands in for a real e-mail or
/// push transport.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl NotificationSink for LoggingSink {
    fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        tracing::info!(
            user_id = %notification.user_id,
            event = %notification.event,
            "notification dispatched"
        );
        Ok(())
    }
}
