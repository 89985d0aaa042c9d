//! Aggregate and sub-collection types for the hiring pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::stage::{Stage, SubStage};

/// Sentinel score meaning "scoring in progress"; rendered as a loading state.
pub const SCORE_PENDING: i16 = -1;

/// Identifier wrapper for applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

/// Identifier wrapper for interviews.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterviewId(pub String);

/// Identifier wrapper for technical tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

/// Identifier wrapper for offer documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferId(pub String);

/// Identifier wrapper for compensation meetings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeetingId(pub String);

/// Snapshot of the job posting an application targets. `enabled_stages` is
/// the ordered subset of stages the posting's company turned on; it bounds
/// every stage transition for the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPostingSnapshot {
    pub job_id: String,
    pub company_id: String,
    pub title: String,
    pub description: String,
    pub enabled_stages: Vec<Stage>,
}

/// Payload a seeker submits to open an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSubmission {
    pub job: JobPostingSnapshot,
    pub seeker_id: String,
    pub resume_url: String,
    pub resume_filename: String,
    #[serde(default)]
    pub cover_letter: Option<String>,
}

/// The aggregate root. Mutated exclusively through the pipeline engine and
/// never hard-deleted; the lifecycle ends at Hired or Rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub job: JobPostingSnapshot,
    pub seeker_id: String,
    pub stage: Stage,
    pub sub_stage: SubStage,
    pub resume_url: String,
    pub resume_filename: String,
    pub cover_letter: Option<String>,
    /// 0..=100, or [`SCORE_PENDING`] while the oracle has not answered.
    pub score: i16,
    pub applied_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency stamp checked by the store on every update.
    pub version: u64,
}

impl ApplicationRecord {
    pub fn is_closed(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewKind {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoKind {
    InApp,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl InterviewStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// A scheduled interview round. Cancellation is a terminal status, never a
/// deletion, so history stays intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interview {
    pub id: InterviewId,
    pub application_id: ApplicationId,
    pub title: String,
    pub kind: InterviewKind,
    /// Only meaningful for online interviews.
    pub video_kind: Option<VideoKind>,
    pub scheduled_date: DateTime<Utc>,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub status: InterviewStatus,
    /// 1..=5, settable only once the interview completed.
    pub rating: Option<u8>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Interview {
    pub fn is_evaluated(&self) -> bool {
        self.status == InterviewStatus::Completed
            && self.rating.is_some()
            && self.feedback.is_some()
    }
}

/// Fields accepted when scheduling an interview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewRequest {
    pub title: String,
    pub kind: InterviewKind,
    #[serde(default)]
    pub video_kind: Option<VideoKind>,
    pub scheduled_date: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub meeting_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Assigned,
    Submitted,
    UnderReview,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Cancelled tasks drop out of every derivation.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Position in the forward-only status chain; Cancelled sits outside it.
    pub const fn chain_index(self) -> Option<usize> {
        match self {
            Self::Assigned => Some(0),
            Self::Submitted => Some(1),
            Self::UnderReview => Some(2),
            Self::Completed => Some(3),
            Self::Cancelled => None,
        }
    }
}

/// A take-home assignment tied to an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalTask {
    pub id: TaskId,
    pub application_id: ApplicationId,
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub document_url: Option<String>,
    pub status: TaskStatus,
    pub submission_url: Option<String>,
    pub rating: Option<u8>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when assigning a technical task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub document_url: Option<String>,
}

/// Single active negotiation record per application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub application_id: ApplicationId,
    pub candidate_expected: Option<u32>,
    pub company_proposed: Option<u32>,
    pub final_agreed: Option<u32>,
    pub benefits: Vec<String>,
    pub expected_joining: Option<NaiveDate>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompensationRecord {
    /// Approval requires an agreed or at least a proposed figure.
    pub fn has_settled_amount(&self) -> bool {
        self.final_agreed.is_some() || self.company_proposed.is_some()
    }
}

/// Fields accepted when recording negotiation progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationUpdate {
    #[serde(default)]
    pub candidate_expected: Option<u32>,
    #[serde(default)]
    pub company_proposed: Option<u32>,
    #[serde(default)]
    pub final_agreed: Option<u32>,
    #[serde(default)]
    pub benefits: Option<Vec<String>>,
    #[serde(default)]
    pub expected_joining: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingKind {
    Call,
    Online,
    InPerson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Scheduled,
    Completed,
    Cancelled,
}

/// Negotiation meeting attached to the compensation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationMeeting {
    pub id: MeetingId,
    pub application_id: ApplicationId,
    pub kind: MeetingKind,
    pub scheduled_date: DateTime<Utc>,
    pub status: MeetingStatus,
    pub created_at: DateTime<Utc>,
}

/// Append-only free-text note on the negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationNote {
    pub application_id: ApplicationId,
    pub author: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Internship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Sent,
    Accepted,
    Declined,
}

/// Offer letter issued at the Offer stage. A withdrawal is a decline with a
/// `withdrawal_reason`, distinguishing it from a candidate-initiated decline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferDocument {
    pub id: OfferId,
    pub application_id: ApplicationId,
    pub offer_amount: u32,
    pub employment_type: EmploymentType,
    pub document_url: String,
    pub status: OfferStatus,
    pub withdrawal_reason: Option<String>,
    /// Populated only when the offer was accepted.
    pub signed_document_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when sending an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub offer_amount: u32,
    pub employment_type: EmploymentType,
    pub document_url: String,
}

/// Classifier for activity feed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ApplicationSubmitted,
    StageChanged,
    SubStageChanged,
    Comment,
    InterviewScheduled,
    InterviewCompleted,
    InterviewEvaluated,
    InterviewCancelled,
    TaskAssigned,
    TaskStatusChanged,
    TaskRevoked,
    CompensationUpdated,
    CompensationMeetingScheduled,
    CompensationMeetingUpdated,
    CompensationNoteAdded,
    CompensationApproved,
    OfferSent,
    OfferAccepted,
    OfferDeclined,
    OfferWithdrawn,
    ApplicationRejected,
    ApplicationHired,
}

/// Append-only record of one pipeline event. Entries are never mutated or
/// deleted after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: String,
    pub application_id: ApplicationId,
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub performed_by: String,
    pub stage: Stage,
    pub sub_stage: SubStage,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Domain event emitted by every sub-collection mutation. A single handler
/// in the engine consumes these to re-derive the parent sub-stage, so the
/// derivation logic lives in one place and runs exactly once per mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    InterviewScheduled { interview_id: InterviewId },
    InterviewCompleted { interview_id: InterviewId },
    InterviewEvaluated { interview_id: InterviewId },
    InterviewCancelled { interview_id: InterviewId },
    TaskAssigned { task_id: TaskId },
    TaskStatusChanged { task_id: TaskId, status: TaskStatus },
    TaskRevoked { task_id: TaskId },
}
