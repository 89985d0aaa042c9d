//! In-memory [`PipelineStore`] used by the service binary, the demo command,
//! and the test suites.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::domain::{
    ActivityLogEntry, ApplicationId, ApplicationRecord, CompensationMeeting, CompensationNote,
    CompensationRecord, Interview, InterviewId, MeetingId, OfferDocument, OfferId, TaskId,
    TechnicalTask,
};
use super::repository::{ActivityCursor, PipelineStore, StoreError};

/// Thread-safe in-memory store. Application updates are version-checked so
/// stale writers lose instead of silently overwriting.
#[derive(Default, Clone)]
pub struct MemoryStore {
    applications: Arc<Mutex<HashMap<ApplicationId, ApplicationRecord>>>,
    interviews: Arc<Mutex<HashMap<InterviewId, Interview>>>,
    tasks: Arc<Mutex<HashMap<TaskId, TechnicalTask>>>,
    compensation: Arc<Mutex<HashMap<ApplicationId, CompensationRecord>>>,
    meetings: Arc<Mutex<HashMap<MeetingId, CompensationMeeting>>>,
    notes: Arc<Mutex<Vec<CompensationNote>>>,
    offers: Arc<Mutex<HashMap<OfferId, OfferDocument>>>,
    activity: Arc<Mutex<Vec<ActivityLogEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total activity entries for an application; test helper for the
    /// append-only property.
    pub fn activity_len(&self, id: &ApplicationId) -> usize {
        self.activity
            .lock()
            .expect("activity mutex poisoned")
            .iter()
            .filter(|entry| &entry.application_id == id)
            .count()
    }
}

impl PipelineStore for MemoryStore {
    fn insert_application(
        &self,
        record: ApplicationRecord,
    ) -> Result<ApplicationRecord, StoreError> {
        let mut guard = self.applications.lock().expect("store mutex poisoned");
        if guard.contains_key(&record.id) {
            return Err(StoreError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update_application(
        &self,
        mut record: ApplicationRecord,
    ) -> Result<ApplicationRecord, StoreError> {
        let mut guard = self.applications.lock().expect("store mutex poisoned");
        let stored = guard.get(&record.id).ok_or(StoreError::NotFound)?;
        if stored.version != record.version {
            return Err(StoreError::VersionMismatch {
                stored: stored.version,
                attempted: record.version,
            });
        }
        record.version += 1;
        record.updated_at = Utc::now();
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn set_score(&self, id: &ApplicationId, score: i16) -> Result<(), StoreError> {
        let mut guard = self.applications.lock().expect("store mutex poisoned");
        let record = guard.get_mut(id).ok_or(StoreError::NotFound)?;
        record.score = score;
        record.updated_at = Utc::now();
        Ok(())
    }

    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        let guard = self.applications.lock().expect("store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn insert_interview(&self, interview: Interview) -> Result<Interview, StoreError> {
        let mut guard = self.interviews.lock().expect("store mutex poisoned");
        if guard.contains_key(&interview.id) {
            return Err(StoreError::Conflict);
        }
        guard.insert(interview.id.clone(), interview.clone());
        Ok(interview)
    }

    fn update_interview(&self, mut interview: Interview) -> Result<Interview, StoreError> {
        let mut guard = self.interviews.lock().expect("store mutex poisoned");
        if !guard.contains_key(&interview.id) {
            return Err(StoreError::NotFound);
        }
        interview.updated_at = Utc::now();
        guard.insert(interview.id.clone(), interview.clone());
        Ok(interview)
    }

    fn fetch_interview(&self, id: &InterviewId) -> Result<Option<Interview>, StoreError> {
        let guard = self.interviews.lock().expect("store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn interviews_for(&self, id: &ApplicationId) -> Result<Vec<Interview>, StoreError> {
        let guard = self.interviews.lock().expect("store mutex poisoned");
        let mut rounds: Vec<Interview> = guard
            .values()
            .filter(|interview| &interview.application_id == id)
            .cloned()
            .collect();
        rounds.sort_by(|a, b| a.scheduled_date.cmp(&b.scheduled_date));
        Ok(rounds)
    }

    fn insert_task(&self, task: TechnicalTask) -> Result<TechnicalTask, StoreError> {
        let mut guard = self.tasks.lock().expect("store mutex poisoned");
        if guard.contains_key(&task.id) {
            return Err(StoreError::Conflict);
        }
        guard.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    fn update_task(&self, mut task: TechnicalTask) -> Result<TechnicalTask, StoreError> {
        let mut guard = self.tasks.lock().expect("store mutex poisoned");
        if !guard.contains_key(&task.id) {
            return Err(StoreError::NotFound);
        }
        task.updated_at = Utc::now();
        guard.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    fn fetch_task(&self, id: &TaskId) -> Result<Option<TechnicalTask>, StoreError> {
        let guard = self.tasks.lock().expect("store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn tasks_for(&self, id: &ApplicationId) -> Result<Vec<TechnicalTask>, StoreError> {
        let guard = self.tasks.lock().expect("store mutex poisoned");
        let mut tasks: Vec<TechnicalTask> = guard
            .values()
            .filter(|task| &task.application_id == id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    fn upsert_compensation(
        &self,
        mut record: CompensationRecord,
    ) -> Result<CompensationRecord, StoreError> {
        let mut guard = self.compensation.lock().expect("store mutex poisoned");
        record.updated_at = Utc::now();
        guard.insert(record.application_id.clone(), record.clone());
        Ok(record)
    }

    fn fetch_compensation(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<CompensationRecord>, StoreError> {
        let guard = self.compensation.lock().expect("store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn insert_meeting(
        &self,
        meeting: CompensationMeeting,
    ) -> Result<CompensationMeeting, StoreError> {
        let mut guard = self.meetings.lock().expect("store mutex poisoned");
        if guard.contains_key(&meeting.id) {
            return Err(StoreError::Conflict);
        }
        guard.insert(meeting.id.clone(), meeting.clone());
        Ok(meeting)
    }

    fn update_meeting(
        &self,
        meeting: CompensationMeeting,
    ) -> Result<CompensationMeeting, StoreError> {
        let mut guard = self.meetings.lock().expect("store mutex poisoned");
        if !guard.contains_key(&meeting.id) {
            return Err(StoreError::NotFound);
        }
        guard.insert(meeting.id.clone(), meeting.clone());
        Ok(meeting)
    }

    fn fetch_meeting(&self, id: &MeetingId) -> Result<Option<CompensationMeeting>, StoreError> {
        let guard = self.meetings.lock().expect("store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn meetings_for(&self, id: &ApplicationId) -> Result<Vec<CompensationMeeting>, StoreError> {
        let guard = self.meetings.lock().expect("store mutex poisoned");
        let mut meetings: Vec<CompensationMeeting> = guard
            .values()
            .filter(|meeting| &meeting.application_id == id)
            .cloned()
            .collect();
        meetings.sort_by(|a, b| a.scheduled_date.cmp(&b.scheduled_date));
        Ok(meetings)
    }

    fn append_compensation_note(
        &self,
        note: CompensationNote,
    ) -> Result<CompensationNote, StoreError> {
        let mut guard = self.notes.lock().expect("store mutex poisoned");
        guard.push(note.clone());
        Ok(note)
    }

    fn compensation_notes_for(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<CompensationNote>, StoreError> {
        let guard = self.notes.lock().expect("store mutex poisoned");
        Ok(guard
            .iter()
            .filter(|note| &note.application_id == id)
            .cloned()
            .collect())
    }

    fn insert_offer(&self, offer: OfferDocument) -> Result<OfferDocument, StoreError> {
        let mut guard = self.offers.lock().expect("store mutex poisoned");
        if guard.contains_key(&offer.id) {
            return Err(StoreError::Conflict);
        }
        guard.insert(offer.id.clone(), offer.clone());
        Ok(offer)
    }

    fn update_offer(&self, mut offer: OfferDocument) -> Result<OfferDocument, StoreError> {
        let mut guard = self.offers.lock().expect("store mutex poisoned");
        if !guard.contains_key(&offer.id) {
            return Err(StoreError::NotFound);
        }
        offer.updated_at = Utc::now();
        guard.insert(offer.id.clone(), offer.clone());
        Ok(offer)
    }

    fn fetch_offer(&self, id: &OfferId) -> Result<Option<OfferDocument>, StoreError> {
        let guard = self.offers.lock().expect("store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn offers_for(&self, id: &ApplicationId) -> Result<Vec<OfferDocument>, StoreError> {
        let guard = self.offers.lock().expect("store mutex poisoned");
        let mut offers: Vec<OfferDocument> = guard
            .values()
            .filter(|offer| &offer.application_id == id)
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(offers)
    }

    fn append_activity(&self, entry: ActivityLogEntry) -> Result<ActivityLogEntry, StoreError> {
        let mut guard = self.activity.lock().expect("activity mutex poisoned");
        guard.push(entry.clone());
        Ok(entry)
    }

    fn activity_page(
        &self,
        id: &ApplicationId,
        limit: usize,
        cursor: Option<&ActivityCursor>,
    ) -> Result<Vec<ActivityLogEntry>, StoreError> {
        let guard = self.activity.lock().expect("activity mutex poisoned");
        let mut entries: Vec<ActivityLogEntry> = guard
            .iter()
            .filter(|entry| &entry.application_id == id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| Reverse((entry.created_at, entry.id.clone())));
        let page = entries
            .into_iter()
            .filter(|entry| match cursor {
                Some(cursor) => {
                    (entry.created_at, entry.id.as_str())
                        < (cursor.created_at, cursor.id.as_str())
                }
                None => true,
            })
            .take(limit)
            .collect();
        Ok(page)
    }
}
