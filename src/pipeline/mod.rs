//! The hiring pipeline: a staged application state machine with
//! per-posting stage subsets, side-collections for interviews, technical
//! tasks, compensation, and offers, an append-only activity log, and a
//! best-effort resume-scoring adapter.

pub mod domain;
pub mod engine;
pub mod memory;
pub mod repository;
pub mod router;
pub mod scoring;
pub mod stage;
pub mod view;

#[cfg(test)]
mod tests;

pub use domain::{
    ActivityKind, ActivityLogEntry, ApplicationId, ApplicationRecord, ApplicationSubmission,
    CompensationMeeting, CompensationNote, CompensationRecord, CompensationUpdate, EmploymentType,
    Interview, InterviewId, InterviewKind, InterviewRequest, InterviewStatus, JobPostingSnapshot,
    MeetingId,
    MeetingKind, MeetingStatus, OfferDocument, OfferId, OfferRequest, OfferStatus, TaskId,
    TaskRequest, TaskStatus, TechnicalTask, SCORE_PENDING,
};
pub use engine::{PipelineEngine, PipelineError};
pub use memory::MemoryStore;
pub use repository::{
    ActivityCursor, LoggingSink, Notification, NotificationError, NotificationSink, PipelineStore,
    StoreError,
};
pub use router::{error_status, pipeline_router, PipelineContext};
pub use scoring::{KeywordOracle, ScoreAdapter, ScoringError, ScoringOracle};
pub use stage::{is_valid_sub_stage, next_stage, Stage, SubStage};
pub use view::{ActivityPage, DisplayStage, HiringProgressView};
