//! The application pipeline engine: validates and executes stage and
//! sub-stage transitions, owns the side-collections, appends one activity
//! entry per mutation, and re-derives sub-stages from domain events.
//!
//! Every write to one application is serialized through a per-application
//! lock; the store's version check is the backstop against lost updates.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::warn;

use super::domain::{
    ActivityKind, ActivityLogEntry, ApplicationId, ApplicationRecord, ApplicationSubmission,
    CompensationMeeting, CompensationNote, CompensationRecord, CompensationUpdate, Interview,
    InterviewId, InterviewKind, InterviewRequest, InterviewStatus, MeetingId, MeetingKind,
    MeetingStatus, OfferDocument, OfferId, OfferRequest, OfferStatus, PipelineEvent, TaskId,
    TaskRequest,
    TaskStatus, TechnicalTask, SCORE_PENDING,
};
use super::repository::{Notification, NotificationSink, PipelineStore, StoreError};
use super::stage::{is_valid_sub_stage, next_stage, Stage, SubStage};

static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static INTERVIEW_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static TASK_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static MEETING_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static OFFER_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static ACTIVITY_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_id(sequence: &AtomicU64, prefix: &str) -> String {
    let id = sequence.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{id:06}")
}

/// Error raised by pipeline mutations. Mutation errors are synchronous and
/// surfaced to the caller; derivation, scoring, and notification failures
/// are logged internally and never propagated.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("application not found")]
    ApplicationNotFound,
    #[error("cannot move to {to} from {from}")]
    InvalidTransition { from: Stage, to: Stage },
    #[error("sub-stage {sub_stage} is not valid for stage {stage}")]
    InvalidSubStage { stage: Stage, sub_stage: SubStage },
    #[error("this application has been closed")]
    TerminalState(Stage),
    #[error("action requires stage {required}, application is in {current}")]
    WrongStage { required: Stage, current: Stage },
    #[error("interview not found")]
    InterviewNotFound,
    #[error("interview is already {0:?}")]
    InterviewClosed(InterviewStatus),
    #[error("interview must be completed before evaluation, currently {0:?}")]
    InterviewNotCompleted(InterviewStatus),
    #[error("task not found")]
    TaskNotFound,
    #[error("task cannot move from {from:?} to {to:?}")]
    TaskStatusNotAllowed { from: TaskStatus, to: TaskStatus },
    #[error("offer not found")]
    OfferNotFound,
    #[error("offer is already {0:?}")]
    OfferStatusNotAllowed(OfferStatus),
    #[error("an offer is already active for this application")]
    OfferAlreadyActive,
    #[error("an accepted offer is required")]
    OfferNotAccepted,
    #[error("cannot reject an application with an accepted offer")]
    OfferAlreadyAccepted,
    #[error("meeting not found")]
    MeetingNotFound,
    #[error("meeting is already {0:?}")]
    MeetingClosed(MeetingStatus),
    #[error("compensation has not been recorded")]
    CompensationNotRecorded,
    #[error("approval requires a proposed or agreed amount")]
    ApprovalRequiresAmount,
    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The pipeline state machine, generic over storage and notification seams.
pub struct PipelineEngine<S, N> {
    store: Arc<S>,
    notifications: Arc<N>,
    locks: Mutex<HashMap<ApplicationId, Arc<Mutex<()>>>>,
}

impl<S, N> PipelineEngine<S, N>
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(store: Arc<S>, notifications: Arc<N>) -> Self {
        Self {
            store,
            notifications,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    /// Per-application lock: all mutations on one aggregate run one at a
    /// time, so derivations never act on a stale sub-collection snapshot.
    fn lock_for(&self, id: &ApplicationId) -> Arc<Mutex<()>> {
        let mut guard = self.locks.lock().expect("lock map mutex poisoned");
        guard
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Evict the lock entry once an application closes; callers still holding
    /// the Arc finish normally, and a later touch re-creates the entry.
    fn release_lock(&self, id: &ApplicationId) {
        let mut guard = self.locks.lock().expect("lock map mutex poisoned");
        guard.remove(id);
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.lock().expect("lock map mutex poisoned").len()
    }

    fn load(&self, id: &ApplicationId) -> Result<ApplicationRecord, PipelineError> {
        self.store
            .fetch_application(id)?
            .ok_or(PipelineError::ApplicationNotFound)
    }

    fn ensure_open(record: &ApplicationRecord) -> Result<(), PipelineError> {
        if record.is_closed() {
            return Err(PipelineError::TerminalState(record.stage));
        }
        Ok(())
    }

    fn log_activity(
        &self,
        record: &ApplicationRecord,
        kind: ActivityKind,
        title: &str,
        description: String,
        performed_by: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<ActivityLogEntry, PipelineError> {
        let entry = ActivityLogEntry {
            id: next_id(&ACTIVITY_SEQUENCE, "act"),
            application_id: record.id.clone(),
            kind,
            title: title.to_string(),
            description,
            performed_by: performed_by.to_string(),
            stage: record.stage,
            sub_stage: record.sub_stage,
            metadata,
            created_at: Utc::now(),
        };
        Ok(self.store.append_activity(entry)?)
    }

    /// Best-effort notification; failures are swallowed and logged.
    fn dispatch(&self, user_id: &str, event: &str, payload: BTreeMap<String, String>) {
        let notification = Notification {
            user_id: user_id.to_string(),
            event: event.to_string(),
            payload,
        };
        if let Err(err) = self.notifications.notify(notification) {
            warn!(event, user_id, error = %err, "notification dispatch failed");
        }
    }

    /// Create the aggregate at the pipeline entry point. The score starts at
    /// the pending sentinel; the scoring adapter fills it in asynchronously.
    pub fn submit(
        &self,
        submission: ApplicationSubmission,
    ) -> Result<ApplicationRecord, PipelineError> {
        let now = Utc::now();
        let record = ApplicationRecord {
            id: ApplicationId(next_id(&APPLICATION_SEQUENCE, "app")),
            seeker_id: submission.seeker_id,
            stage: Stage::InReview,
            sub_stage: Stage::InReview.entry_sub_stage(),
            resume_url: submission.resume_url,
            resume_filename: submission.resume_filename,
            cover_letter: submission.cover_letter,
            score: SCORE_PENDING,
            applied_date: now,
            created_at: now,
            updated_at: now,
            version: 0,
            job: submission.job,
        };

        let stored = self.store.insert_application(record)?;

        self.log_activity(
            &stored,
            ActivityKind::ApplicationSubmitted,
            "Application submitted",
            format!("Applied for {}", stored.job.title),
            &stored.seeker_id,
            BTreeMap::new(),
        )?;
        self.dispatch(
            &stored.job.company_id,
            "application_received",
            BTreeMap::from([("application_id".to_string(), stored.id.0.clone())]),
        );

        Ok(stored)
    }

    /// Move to a later stage. Reachable targets: the immediate next enabled
    /// stage, any enabled stage at a strictly later index (explicit lateral
    /// jump), or Rejected from any non-terminal stage. Backward moves always
    /// fail.
    pub fn move_to_stage(
        &self,
        id: &ApplicationId,
        target: Stage,
        sub_stage: Option<SubStage>,
        comment: Option<String>,
        performed_by: &str,
    ) -> Result<ApplicationRecord, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.load(id)?;
        Self::ensure_open(&record)?;

        if target == Stage::Rejected {
            let accepted = self
                .store
                .offers_for(id)?
                .iter()
                .any(|offer| offer.status == OfferStatus::Accepted);
            if accepted {
                return Err(PipelineError::OfferAlreadyAccepted);
            }
            return self.close(record, Stage::Rejected, comment, performed_by);
        }

        let reachable = target != record.stage
            && !target.is_terminal()
            && record.job.enabled_stages.contains(&target)
            && target.index() > record.stage.index();
        if !reachable {
            return Err(PipelineError::InvalidTransition {
                from: record.stage,
                to: target,
            });
        }

        let sub_stage = sub_stage.unwrap_or_else(|| target.entry_sub_stage());
        if !is_valid_sub_stage(target, sub_stage) {
            return Err(PipelineError::InvalidSubStage {
                stage: target,
                sub_stage,
            });
        }

        self.advance(record, target, sub_stage, comment, performed_by)
    }

    fn advance(
        &self,
        mut record: ApplicationRecord,
        target: Stage,
        sub_stage: SubStage,
        comment: Option<String>,
        performed_by: &str,
    ) -> Result<ApplicationRecord, PipelineError> {
        let from = record.stage;
        record.stage = target;
        record.sub_stage = sub_stage;
        let updated = self.store.update_application(record)?;

        let description =
            comment.unwrap_or_else(|| format!("Moved from {} to {}", from, target));
        self.log_activity(
            &updated,
            ActivityKind::StageChanged,
            "Stage changed",
            description,
            performed_by,
            BTreeMap::from([
                ("from".to_string(), from.label().to_string()),
                ("to".to_string(), target.label().to_string()),
            ]),
        )?;
        self.dispatch(
            &updated.seeker_id,
            "stage_changed",
            BTreeMap::from([
                ("application_id".to_string(), updated.id.0.clone()),
                ("stage".to_string(), target.label().to_string()),
            ]),
        );

        Ok(updated)
    }

    fn close(
        &self,
        record: ApplicationRecord,
        terminal: Stage,
        comment: Option<String>,
        performed_by: &str,
    ) -> Result<ApplicationRecord, PipelineError> {
        debug_assert!(terminal.is_terminal());
        let mut record = record;
        let from = record.stage;
        record.stage = terminal;
        record.sub_stage = terminal.entry_sub_stage();
        let updated = self.store.update_application(record)?;

        let (kind, title, event) = if terminal == Stage::Hired {
            (ActivityKind::ApplicationHired, "Candidate hired", "hired")
        } else {
            (
                ActivityKind::ApplicationRejected,
                "Application rejected",
                "rejected",
            )
        };
        let description = comment.unwrap_or_else(|| format!("Closed from {}", from));
        self.log_activity(
            &updated,
            kind,
            title,
            description,
            performed_by,
            BTreeMap::from([("from".to_string(), from.label().to_string())]),
        )?;
        self.dispatch(
            &updated.seeker_id,
            event,
            BTreeMap::from([("application_id".to_string(), updated.id.0.clone())]),
        );
        self.release_lock(&updated.id);

        Ok(updated)
    }

    /// Intra-stage progress; regressions within the same stage are allowed
    /// (e.g. re-opening negotiation). Writing the current value is a no-op.
    pub fn update_sub_stage(
        &self,
        id: &ApplicationId,
        sub_stage: SubStage,
        comment: Option<String>,
        performed_by: &str,
    ) -> Result<ApplicationRecord, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.load(id)?;
        Self::ensure_open(&record)?;
        if !is_valid_sub_stage(record.stage, sub_stage) {
            return Err(PipelineError::InvalidSubStage {
                stage: record.stage,
                sub_stage,
            });
        }
        if record.sub_stage == sub_stage {
            return Ok(record);
        }

        let previous = record.sub_stage;
        let mut record = record;
        record.sub_stage = sub_stage;
        let updated = self.store.update_application(record)?;

        let description = comment
            .unwrap_or_else(|| format!("Sub-stage moved from {} to {}", previous, sub_stage));
        self.log_activity(
            &updated,
            ActivityKind::SubStageChanged,
            "Sub-stage updated",
            description,
            performed_by,
            BTreeMap::from([
                ("from".to_string(), previous.label().to_string()),
                ("to".to_string(), sub_stage.label().to_string()),
            ]),
        )?;

        Ok(updated)
    }

    /// Pure append: records a human note against the current stage without
    /// touching the state machine. Allowed on closed applications too.
    pub fn add_comment(
        &self,
        id: &ApplicationId,
        comment: String,
        performed_by: &str,
    ) -> Result<ActivityLogEntry, PipelineError> {
        let record = self.load(id)?;
        self.log_activity(
            &record,
            ActivityKind::Comment,
            "Comment",
            comment,
            performed_by,
            BTreeMap::new(),
        )
    }

    /// Shorthand move to Rejected. Refused on terminal stages and once an
    /// offer has been accepted (guards against rejecting a hired candidate).
    pub fn reject_application(
        &self,
        id: &ApplicationId,
        reason: String,
        performed_by: &str,
    ) -> Result<ApplicationRecord, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.load(id)?;
        Self::ensure_open(&record)?;
        let accepted = self
            .store
            .offers_for(id)?
            .iter()
            .any(|offer| offer.status == OfferStatus::Accepted);
        if accepted {
            return Err(PipelineError::OfferAlreadyAccepted);
        }

        self.close(record, Stage::Rejected, Some(reason), performed_by)
    }

    /// Offer stage with an accepted offer → Hired (terminal).
    pub fn mark_hired(
        &self,
        id: &ApplicationId,
        performed_by: &str,
    ) -> Result<ApplicationRecord, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.load(id)?;
        Self::ensure_open(&record)?;
        if record.stage != Stage::Offer {
            return Err(PipelineError::InvalidTransition {
                from: record.stage,
                to: Stage::Hired,
            });
        }
        let accepted = self
            .store
            .offers_for(id)?
            .iter()
            .any(|offer| offer.status == OfferStatus::Accepted);
        if !accepted {
            return Err(PipelineError::OfferNotAccepted);
        }

        self.close(record, Stage::Hired, None, performed_by)
    }

    // ---- interviews -----------------------------------------------------

    /// Schedule an interview round. From Shortlisted the application is
    /// pulled forward into the Interview stage as part of the same mutation
    /// (when the posting enables it).
    pub fn schedule_interview(
        &self,
        id: &ApplicationId,
        request: InterviewRequest,
        performed_by: &str,
    ) -> Result<Interview, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let mut record = self.load(id)?;
        Self::ensure_open(&record)?;
        if record.stage == Stage::Shortlisted
            && next_stage(&record.job.enabled_stages, record.stage) == Some(Stage::Interview)
        {
            record.stage = Stage::Interview;
            record.sub_stage = Stage::Interview.entry_sub_stage();
            record = self.store.update_application(record)?;
        }
        if record.stage != Stage::Interview {
            return Err(PipelineError::WrongStage {
                required: Stage::Interview,
                current: record.stage,
            });
        }

        let now = Utc::now();
        let interview = Interview {
            id: InterviewId(next_id(&INTERVIEW_SEQUENCE, "int")),
            application_id: id.clone(),
            title: request.title,
            kind: request.kind,
            video_kind: match request.kind {
                InterviewKind::Online => request.video_kind,
                InterviewKind::Offline => None,
            },
            scheduled_date: request.scheduled_date,
            location: request.location,
            meeting_link: request.meeting_link,
            status: InterviewStatus::Scheduled,
            rating: None,
            feedback: None,
            created_at: now,
            updated_at: now,
        };
        let stored = self.store.insert_interview(interview)?;

        self.log_activity(
            &record,
            ActivityKind::InterviewScheduled,
            "Interview scheduled",
            format!("{} scheduled", stored.title),
            performed_by,
            BTreeMap::from([("interview_id".to_string(), stored.id.0.clone())]),
        )?;
        self.dispatch(
            &record.seeker_id,
            "interview_scheduled",
            BTreeMap::from([
                ("application_id".to_string(), record.id.0.clone()),
                ("interview_id".to_string(), stored.id.0.clone()),
            ]),
        );
        self.apply_derivation(
            id,
            &PipelineEvent::InterviewScheduled {
                interview_id: stored.id.clone(),
            },
        );

        Ok(stored)
    }

    /// Mark an interview completed together with its evaluation.
    pub fn complete_interview(
        &self,
        id: &ApplicationId,
        interview_id: &InterviewId,
        rating: u8,
        feedback: String,
        performed_by: &str,
    ) -> Result<Interview, PipelineError> {
        if !(1..=5).contains(&rating) {
            return Err(PipelineError::InvalidRating(rating));
        }
        self.finish_interview(id, interview_id, Some((rating, feedback)), performed_by)
    }

    /// Mark an interview completed without an evaluation. The evaluation can
    /// follow through [`Self::record_interview_feedback`]; until every
    /// completed round has one, the derived sub-stage is EvaluationPending.
    pub fn mark_interview_completed(
        &self,
        id: &ApplicationId,
        interview_id: &InterviewId,
        performed_by: &str,
    ) -> Result<Interview, PipelineError> {
        self.finish_interview(id, interview_id, None, performed_by)
    }

    fn finish_interview(
        &self,
        id: &ApplicationId,
        interview_id: &InterviewId,
        evaluation: Option<(u8, String)>,
        performed_by: &str,
    ) -> Result<Interview, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.load(id)?;
        Self::ensure_open(&record)?;
        let mut interview = self.owned_interview(id, interview_id)?;
        if interview.status != InterviewStatus::Scheduled {
            return Err(PipelineError::InterviewClosed(interview.status));
        }
        interview.status = InterviewStatus::Completed;
        let description = match &evaluation {
            Some((rating, _)) => format!("{} completed with rating {}", interview.title, rating),
            None => format!("{} completed, evaluation pending", interview.title),
        };
        if let Some((rating, feedback)) = evaluation {
            interview.rating = Some(rating);
            interview.feedback = Some(feedback);
        }
        let stored = self.store.update_interview(interview)?;

        self.log_activity(
            &record,
            ActivityKind::InterviewCompleted,
            "Interview completed",
            description,
            performed_by,
            BTreeMap::from([("interview_id".to_string(), stored.id.0.clone())]),
        )?;
        self.apply_derivation(
            id,
            &PipelineEvent::InterviewCompleted {
                interview_id: stored.id.clone(),
            },
        );

        Ok(stored)
    }

    /// Attach the evaluation to an already-completed round.
    pub fn record_interview_feedback(
        &self,
        id: &ApplicationId,
        interview_id: &InterviewId,
        rating: u8,
        feedback: String,
        performed_by: &str,
    ) -> Result<Interview, PipelineError> {
        if !(1..=5).contains(&rating) {
            return Err(PipelineError::InvalidRating(rating));
        }

        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.load(id)?;
        Self::ensure_open(&record)?;
        let mut interview = self.owned_interview(id, interview_id)?;
        if interview.status != InterviewStatus::Completed {
            return Err(PipelineError::InterviewNotCompleted(interview.status));
        }
        interview.rating = Some(rating);
        interview.feedback = Some(feedback);
        let stored = self.store.update_interview(interview)?;

        self.log_activity(
            &record,
            ActivityKind::InterviewEvaluated,
            "Interview evaluated",
            format!("{} evaluated with rating {}", stored.title, rating),
            performed_by,
            BTreeMap::from([("interview_id".to_string(), stored.id.0.clone())]),
        )?;
        self.apply_derivation(
            id,
            &PipelineEvent::InterviewEvaluated {
                interview_id: stored.id.clone(),
            },
        );

        Ok(stored)
    }

    /// Cancel a scheduled interview. Terminal status, not a deletion.
    pub fn cancel_interview(
        &self,
        id: &ApplicationId,
        interview_id: &InterviewId,
        performed_by: &str,
    ) -> Result<Interview, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.load(id)?;
        Self::ensure_open(&record)?;
        let mut interview = self.owned_interview(id, interview_id)?;
        if interview.status != InterviewStatus::Scheduled {
            return Err(PipelineError::InterviewClosed(interview.status));
        }
        interview.status = InterviewStatus::Cancelled;
        let stored = self.store.update_interview(interview)?;

        self.log_activity(
            &record,
            ActivityKind::InterviewCancelled,
            "Interview cancelled",
            format!("{} cancelled", stored.title),
            performed_by,
            BTreeMap::from([("interview_id".to_string(), stored.id.0.clone())]),
        )?;
        self.apply_derivation(
            id,
            &PipelineEvent::InterviewCancelled {
                interview_id: stored.id.clone(),
            },
        );

        Ok(stored)
    }

    fn owned_interview(
        &self,
        id: &ApplicationId,
        interview_id: &InterviewId,
    ) -> Result<Interview, PipelineError> {
        let interview = self
            .store
            .fetch_interview(interview_id)?
            .ok_or(PipelineError::InterviewNotFound)?;
        if &interview.application_id != id {
            return Err(PipelineError::InterviewNotFound);
        }
        Ok(interview)
    }

    /// Recompute the Interview sub-stage from the current interview set.
    /// Idempotent: writes nothing when the derived value already matches.
    pub fn derive_interview_sub_stage(
        &self,
        id: &ApplicationId,
    ) -> Result<SubStage, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");
        self.run_interview_derivation(id)
    }

    fn run_interview_derivation(&self, id: &ApplicationId) -> Result<SubStage, PipelineError> {
        let record = self.load(id)?;
        let derived = self.derived_interview_sub_stage(id)?;
        if record.stage == Stage::Interview && record.sub_stage != derived {
            let mut record = record;
            record.sub_stage = derived;
            self.store.update_application(record)?;
        }
        Ok(derived)
    }

    fn derived_interview_sub_stage(&self, id: &ApplicationId) -> Result<SubStage, PipelineError> {
        let interviews = self.store.interviews_for(id)?;
        let active: Vec<&Interview> = interviews
            .iter()
            .filter(|interview| interview.status != InterviewStatus::Cancelled)
            .collect();

        if active.is_empty() {
            return Ok(SubStage::NotScheduled);
        }
        if active
            .iter()
            .any(|interview| interview.status == InterviewStatus::Scheduled)
        {
            return Ok(SubStage::Scheduled);
        }
        // All completed: evaluated once every round has feedback and rating.
        if active.iter().all(|interview| interview.is_evaluated()) {
            Ok(SubStage::Evaluated)
        } else {
            Ok(SubStage::EvaluationPending)
        }
    }

    // ---- technical tasks ------------------------------------------------

    pub fn assign_task(
        &self,
        id: &ApplicationId,
        request: TaskRequest,
        performed_by: &str,
    ) -> Result<TechnicalTask, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.load(id)?;
        Self::ensure_open(&record)?;
        if record.stage != Stage::TechnicalTask {
            return Err(PipelineError::WrongStage {
                required: Stage::TechnicalTask,
                current: record.stage,
            });
        }

        let now = Utc::now();
        let task = TechnicalTask {
            id: TaskId(next_id(&TASK_SEQUENCE, "task")),
            application_id: id.clone(),
            title: request.title,
            description: request.description,
            deadline: request.deadline,
            document_url: request.document_url,
            status: TaskStatus::Assigned,
            submission_url: None,
            rating: None,
            feedback: None,
            created_at: now,
            updated_at: now,
        };
        let stored = self.store.insert_task(task)?;

        self.log_activity(
            &record,
            ActivityKind::TaskAssigned,
            "Task assigned",
            format!("{} assigned", stored.title),
            performed_by,
            BTreeMap::from([("task_id".to_string(), stored.id.0.clone())]),
        )?;
        self.dispatch(
            &record.seeker_id,
            "task_assigned",
            BTreeMap::from([
                ("application_id".to_string(), record.id.0.clone()),
                ("task_id".to_string(), stored.id.0.clone()),
            ]),
        );
        self.apply_derivation(
            id,
            &PipelineEvent::TaskAssigned {
                task_id: stored.id.clone(),
            },
        );

        Ok(stored)
    }

    /// Candidate submission: assigned → submitted.
    pub fn submit_task(
        &self,
        id: &ApplicationId,
        task_id: &TaskId,
        submission_url: String,
        performed_by: &str,
    ) -> Result<TechnicalTask, PipelineError> {
        self.step_task(id, task_id, TaskStatus::Submitted, performed_by, |task| {
            task.submission_url = Some(submission_url);
        })
    }

    /// Reviewer pickup: submitted → under_review.
    pub fn review_task(
        &self,
        id: &ApplicationId,
        task_id: &TaskId,
        performed_by: &str,
    ) -> Result<TechnicalTask, PipelineError> {
        self.step_task(id, task_id, TaskStatus::UnderReview, performed_by, |_| {})
    }

    /// Review verdict: under_review → completed, recording the evaluation.
    pub fn complete_task(
        &self,
        id: &ApplicationId,
        task_id: &TaskId,
        rating: u8,
        feedback: String,
        performed_by: &str,
    ) -> Result<TechnicalTask, PipelineError> {
        if !(1..=5).contains(&rating) {
            return Err(PipelineError::InvalidRating(rating));
        }
        self.step_task(id, task_id, TaskStatus::Completed, performed_by, |task| {
            task.rating = Some(rating);
            task.feedback = Some(feedback);
        })
    }

    fn step_task(
        &self,
        id: &ApplicationId,
        task_id: &TaskId,
        to: TaskStatus,
        performed_by: &str,
        apply: impl FnOnce(&mut TechnicalTask),
    ) -> Result<TechnicalTask, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.load(id)?;
        Self::ensure_open(&record)?;
        let mut task = self.owned_task(id, task_id)?;

        // Strictly forward, one link at a time.
        let allowed = match (task.status.chain_index(), to.chain_index()) {
            (Some(from), Some(next)) => next == from + 1,
            _ => false,
        };
        if !allowed {
            return Err(PipelineError::TaskStatusNotAllowed {
                from: task.status,
                to,
            });
        }
        task.status = to;
        apply(&mut task);
        let stored = self.store.update_task(task)?;

        self.log_activity(
            &record,
            ActivityKind::TaskStatusChanged,
            "Task status changed",
            format!("{} is now {:?}", stored.title, to),
            performed_by,
            BTreeMap::from([("task_id".to_string(), stored.id.0.clone())]),
        )?;
        self.apply_derivation(
            id,
            &PipelineEvent::TaskStatusChanged {
                task_id: stored.id.clone(),
                status: to,
            },
        );

        Ok(stored)
    }

    /// Revoke an assignment. Only reachable from `assigned`; the cancelled
    /// task stays in history but drops out of derivations.
    pub fn revoke_task(
        &self,
        id: &ApplicationId,
        task_id: &TaskId,
        performed_by: &str,
    ) -> Result<TechnicalTask, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.load(id)?;
        Self::ensure_open(&record)?;
        let mut task = self.owned_task(id, task_id)?;
        if task.status != TaskStatus::Assigned {
            return Err(PipelineError::TaskStatusNotAllowed {
                from: task.status,
                to: TaskStatus::Cancelled,
            });
        }
        task.status = TaskStatus::Cancelled;
        let stored = self.store.update_task(task)?;

        self.log_activity(
            &record,
            ActivityKind::TaskRevoked,
            "Task revoked",
            format!("{} revoked", stored.title),
            performed_by,
            BTreeMap::from([("task_id".to_string(), stored.id.0.clone())]),
        )?;
        self.apply_derivation(
            id,
            &PipelineEvent::TaskRevoked {
                task_id: stored.id.clone(),
            },
        );

        Ok(stored)
    }

    fn owned_task(
        &self,
        id: &ApplicationId,
        task_id: &TaskId,
    ) -> Result<TechnicalTask, PipelineError> {
        let task = self
            .store
            .fetch_task(task_id)?
            .ok_or(PipelineError::TaskNotFound)?;
        if &task.application_id != id {
            return Err(PipelineError::TaskNotFound);
        }
        Ok(task)
    }

    /// Recompute the TechnicalTask sub-stage over active (non-cancelled)
    /// tasks. Under-review outranks submitted because it is the most
    /// advanced pending action. Idempotent like the interview derivation.
    pub fn derive_technical_task_sub_stage(
        &self,
        id: &ApplicationId,
    ) -> Result<SubStage, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");
        self.run_task_derivation(id)
    }

    fn run_task_derivation(&self, id: &ApplicationId) -> Result<SubStage, PipelineError> {
        let record = self.load(id)?;
        let derived = self.derived_task_sub_stage(id)?;
        if record.stage == Stage::TechnicalTask && record.sub_stage != derived {
            let mut record = record;
            record.sub_stage = derived;
            self.store.update_application(record)?;
        }
        Ok(derived)
    }

    fn derived_task_sub_stage(&self, id: &ApplicationId) -> Result<SubStage, PipelineError> {
        let tasks = self.store.tasks_for(id)?;
        let active: Vec<&TechnicalTask> =
            tasks.iter().filter(|task| task.status.is_active()).collect();

        if active.is_empty() {
            return Ok(SubStage::NotAssigned);
        }
        if active.iter().any(|task| task.status == TaskStatus::UnderReview) {
            return Ok(SubStage::UnderReview);
        }
        if active.iter().all(|task| task.status == TaskStatus::Completed) {
            return Ok(SubStage::Completed);
        }
        if active.iter().all(|task| task.status == TaskStatus::Submitted) {
            return Ok(SubStage::Submitted);
        }
        Ok(SubStage::Assigned)
    }

    /// Single consumer for sub-collection domain events. Runs under the
    /// caller's per-application lock; failures are logged, never thrown, so
    /// the triggering mutation is never rolled back.
    fn apply_derivation(&self, id: &ApplicationId, event: &PipelineEvent) {
        let result = match event {
            PipelineEvent::InterviewScheduled { .. }
            | PipelineEvent::InterviewCompleted { .. }
            | PipelineEvent::InterviewEvaluated { .. }
            | PipelineEvent::InterviewCancelled { .. } => self.run_interview_derivation(id),
            PipelineEvent::TaskAssigned { .. }
            | PipelineEvent::TaskStatusChanged { .. }
            | PipelineEvent::TaskRevoked { .. } => self.run_task_derivation(id),
        };
        if let Err(err) = result {
            warn!(application_id = %id.0, event = ?event, error = %err, "sub-stage derivation failed");
        }
    }

    // ---- compensation ---------------------------------------------------

    /// Upsert negotiation figures. The first write moves the sub-stage from
    /// NotInitiated to Negotiation as part of the same mutation.
    pub fn record_compensation(
        &self,
        id: &ApplicationId,
        update: CompensationUpdate,
        performed_by: &str,
    ) -> Result<CompensationRecord, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.require_stage(id, Stage::Compensation)?;

        let now = Utc::now();
        let mut compensation =
            self.store
                .fetch_compensation(id)?
                .unwrap_or_else(|| CompensationRecord {
                    application_id: id.clone(),
                    candidate_expected: None,
                    company_proposed: None,
                    final_agreed: None,
                    benefits: Vec::new(),
                    expected_joining: None,
                    approved_at: None,
                    approved_by: None,
                    created_at: now,
                    updated_at: now,
                });
        if let Some(expected) = update.candidate_expected {
            compensation.candidate_expected = Some(expected);
        }
        if let Some(proposed) = update.company_proposed {
            compensation.company_proposed = Some(proposed);
        }
        if let Some(agreed) = update.final_agreed {
            compensation.final_agreed = Some(agreed);
        }
        if let Some(benefits) = update.benefits {
            compensation.benefits = benefits;
        }
        if let Some(joining) = update.expected_joining {
            compensation.expected_joining = Some(joining);
        }
        let stored = self.store.upsert_compensation(compensation)?;

        let record = if record.sub_stage == SubStage::NotInitiated {
            let mut record = record;
            record.sub_stage = SubStage::Negotiation;
            self.store.update_application(record)?
        } else {
            record
        };

        self.log_activity(
            &record,
            ActivityKind::CompensationUpdated,
            "Compensation updated",
            "Negotiation figures updated".to_string(),
            performed_by,
            BTreeMap::new(),
        )?;

        Ok(stored)
    }

    pub fn schedule_compensation_meeting(
        &self,
        id: &ApplicationId,
        kind: MeetingKind,
        scheduled_date: DateTime<Utc>,
        performed_by: &str,
    ) -> Result<CompensationMeeting, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.require_stage(id, Stage::Compensation)?;
        let meeting = CompensationMeeting {
            id: MeetingId(next_id(&MEETING_SEQUENCE, "meet")),
            application_id: id.clone(),
            kind,
            scheduled_date,
            status: MeetingStatus::Scheduled,
            created_at: Utc::now(),
        };
        let stored = self.store.insert_meeting(meeting)?;

        self.log_activity(
            &record,
            ActivityKind::CompensationMeetingScheduled,
            "Compensation meeting scheduled",
            format!("{:?} meeting scheduled", kind),
            performed_by,
            BTreeMap::from([("meeting_id".to_string(), stored.id.0.clone())]),
        )?;

        Ok(stored)
    }

    pub fn update_compensation_meeting(
        &self,
        id: &ApplicationId,
        meeting_id: &MeetingId,
        status: MeetingStatus,
        performed_by: &str,
    ) -> Result<CompensationMeeting, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.require_stage(id, Stage::Compensation)?;
        let mut meeting = self
            .store
            .fetch_meeting(meeting_id)?
            .filter(|meeting| &meeting.application_id == id)
            .ok_or(PipelineError::MeetingNotFound)?;
        if meeting.status != MeetingStatus::Scheduled {
            return Err(PipelineError::MeetingClosed(meeting.status));
        }
        meeting.status = status;
        let stored = self.store.update_meeting(meeting)?;

        self.log_activity(
            &record,
            ActivityKind::CompensationMeetingUpdated,
            "Compensation meeting updated",
            format!("Meeting is now {:?}", status),
            performed_by,
            BTreeMap::from([("meeting_id".to_string(), stored.id.0.clone())]),
        )?;

        Ok(stored)
    }

    pub fn add_compensation_note(
        &self,
        id: &ApplicationId,
        note: String,
        performed_by: &str,
    ) -> Result<CompensationNote, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.require_stage(id, Stage::Compensation)?;
        let stored = self.store.append_compensation_note(CompensationNote {
            application_id: id.clone(),
            author: performed_by.to_string(),
            note,
            created_at: Utc::now(),
        })?;

        self.log_activity(
            &record,
            ActivityKind::CompensationNoteAdded,
            "Compensation note added",
            stored.note.clone(),
            performed_by,
            BTreeMap::new(),
        )?;

        Ok(stored)
    }

    /// Approve the negotiated package. Requires an agreed (or at least
    /// proposed) amount; moves the sub-stage to Approved.
    pub fn approve_compensation(
        &self,
        id: &ApplicationId,
        performed_by: &str,
    ) -> Result<CompensationRecord, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.require_stage(id, Stage::Compensation)?;
        let mut compensation = self
            .store
            .fetch_compensation(id)?
            .ok_or(PipelineError::CompensationNotRecorded)?;
        if !compensation.has_settled_amount() {
            return Err(PipelineError::ApprovalRequiresAmount);
        }
        compensation.approved_at = Some(Utc::now());
        compensation.approved_by = Some(performed_by.to_string());
        let stored = self.store.upsert_compensation(compensation)?;

        let mut updated = record.clone();
        updated.sub_stage = SubStage::Approved;
        let updated = self.store.update_application(updated)?;

        self.log_activity(
            &updated,
            ActivityKind::CompensationApproved,
            "Compensation approved",
            "Negotiated package approved".to_string(),
            performed_by,
            BTreeMap::new(),
        )?;

        Ok(stored)
    }

    // ---- offers -----------------------------------------------------------

    /// Issue an offer letter. Only one offer may be live (sent or accepted)
    /// at a time; a new one can follow a declined offer.
    pub fn send_offer(
        &self,
        id: &ApplicationId,
        request: OfferRequest,
        performed_by: &str,
    ) -> Result<OfferDocument, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.require_stage(id, Stage::Offer)?;
        let live = self
            .store
            .offers_for(id)?
            .iter()
            .any(|offer| offer.status != OfferStatus::Declined);
        if live {
            return Err(PipelineError::OfferAlreadyActive);
        }

        let now = Utc::now();
        let offer = OfferDocument {
            id: OfferId(next_id(&OFFER_SEQUENCE, "offer")),
            application_id: id.clone(),
            offer_amount: request.offer_amount,
            employment_type: request.employment_type,
            document_url: request.document_url,
            status: OfferStatus::Sent,
            withdrawal_reason: None,
            signed_document_url: None,
            created_at: now,
            updated_at: now,
        };
        let stored = self.store.insert_offer(offer)?;

        let mut updated = record.clone();
        updated.sub_stage = SubStage::Sent;
        let updated = self.store.update_application(updated)?;

        self.log_activity(
            &updated,
            ActivityKind::OfferSent,
            "Offer sent",
            format!("Offer of {} sent", stored.offer_amount),
            performed_by,
            BTreeMap::from([("offer_id".to_string(), stored.id.0.clone())]),
        )?;
        self.dispatch(
            &updated.seeker_id,
            "offer_sent",
            BTreeMap::from([
                ("application_id".to_string(), updated.id.0.clone()),
                ("offer_id".to_string(), stored.id.0.clone()),
            ]),
        );

        Ok(stored)
    }

    /// Candidate acceptance: sent → accepted, capturing the signed copy.
    pub fn accept_offer(
        &self,
        id: &ApplicationId,
        offer_id: &OfferId,
        signed_document_url: Option<String>,
        performed_by: &str,
    ) -> Result<OfferDocument, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.require_stage(id, Stage::Offer)?;
        let mut offer = self.owned_offer(id, offer_id)?;
        if offer.status != OfferStatus::Sent {
            return Err(PipelineError::OfferStatusNotAllowed(offer.status));
        }
        offer.status = OfferStatus::Accepted;
        offer.signed_document_url = signed_document_url;
        let stored = self.store.update_offer(offer)?;

        let mut updated = record.clone();
        updated.sub_stage = SubStage::Accepted;
        let updated = self.store.update_application(updated)?;

        self.log_activity(
            &updated,
            ActivityKind::OfferAccepted,
            "Offer accepted",
            "Candidate accepted the offer".to_string(),
            performed_by,
            BTreeMap::from([("offer_id".to_string(), stored.id.0.clone())]),
        )?;
        self.dispatch(
            &updated.job.company_id,
            "offer_accepted",
            BTreeMap::from([("application_id".to_string(), updated.id.0.clone())]),
        );

        Ok(stored)
    }

    /// Candidate decline: sent → declined, no withdrawal reason.
    pub fn decline_offer(
        &self,
        id: &ApplicationId,
        offer_id: &OfferId,
        performed_by: &str,
    ) -> Result<OfferDocument, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.require_stage(id, Stage::Offer)?;
        let mut offer = self.owned_offer(id, offer_id)?;
        if offer.status != OfferStatus::Sent {
            return Err(PipelineError::OfferStatusNotAllowed(offer.status));
        }
        offer.status = OfferStatus::Declined;
        let stored = self.store.update_offer(offer)?;

        let mut updated = record.clone();
        updated.sub_stage = SubStage::Declined;
        let updated = self.store.update_application(updated)?;

        self.log_activity(
            &updated,
            ActivityKind::OfferDeclined,
            "Offer declined",
            "Candidate declined the offer".to_string(),
            performed_by,
            BTreeMap::from([("offer_id".to_string(), stored.id.0.clone())]),
        )?;

        Ok(stored)
    }

    /// Company-side withdrawal: permitted from sent or accepted, recorded as
    /// declined with a withdrawal reason.
    pub fn withdraw_offer(
        &self,
        id: &ApplicationId,
        offer_id: &OfferId,
        reason: String,
        performed_by: &str,
    ) -> Result<OfferDocument, PipelineError> {
        let lock = self.lock_for(id);
        let _serial = lock.lock().expect("application lock poisoned");

        let record = self.require_stage(id, Stage::Offer)?;
        let mut offer = self.owned_offer(id, offer_id)?;
        if offer.status == OfferStatus::Declined {
            return Err(PipelineError::OfferStatusNotAllowed(offer.status));
        }
        offer.status = OfferStatus::Declined;
        offer.withdrawal_reason = Some(reason.clone());
        let stored = self.store.update_offer(offer)?;

        let mut updated = record.clone();
        updated.sub_stage = SubStage::Declined;
        let updated = self.store.update_application(updated)?;

        self.log_activity(
            &updated,
            ActivityKind::OfferWithdrawn,
            "Offer withdrawn",
            reason,
            performed_by,
            BTreeMap::from([("offer_id".to_string(), stored.id.0.clone())]),
        )?;
        self.dispatch(
            &updated.seeker_id,
            "offer_withdrawn",
            BTreeMap::from([("application_id".to_string(), updated.id.0.clone())]),
        );

        Ok(stored)
    }

    fn owned_offer(
        &self,
        id: &ApplicationId,
        offer_id: &OfferId,
    ) -> Result<OfferDocument, PipelineError> {
        let offer = self
            .store
            .fetch_offer(offer_id)?
            .ok_or(PipelineError::OfferNotFound)?;
        if &offer.application_id != id {
            return Err(PipelineError::OfferNotFound);
        }
        Ok(offer)
    }

    fn require_stage(
        &self,
        id: &ApplicationId,
        required: Stage,
    ) -> Result<ApplicationRecord, PipelineError> {
        let record = self.load(id)?;
        Self::ensure_open(&record)?;
        if record.stage != required {
            return Err(PipelineError::WrongStage {
                required,
                current: record.stage,
            });
        }
        Ok(record)
    }
}
