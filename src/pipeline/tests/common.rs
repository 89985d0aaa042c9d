use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use chrono::{Days, Utc};
use serde_json::Value;

use crate::config::ScoringConfig;
use crate::pipeline::domain::{
    ApplicationId, ApplicationSubmission, EmploymentType, InterviewKind, InterviewRequest,
    JobPostingSnapshot, OfferRequest, TaskRequest, VideoKind,
};
use crate::pipeline::engine::PipelineEngine;
use crate::pipeline::memory::MemoryStore;
use crate::pipeline::repository::{Notification, NotificationError, NotificationSink};
use crate::pipeline::router::{pipeline_router, PipelineContext};
use crate::pipeline::scoring::{ScoreAdapter, ScoringError, ScoringOracle};
use crate::pipeline::stage::Stage;

pub(super) fn posting() -> JobPostingSnapshot {
    posting_with(&[
        Stage::InReview,
        Stage::Shortlisted,
        Stage::Interview,
        Stage::TechnicalTask,
        Stage::Compensation,
        Stage::Offer,
    ])
}

pub(super) fn posting_with(stages: &[Stage]) -> JobPostingSnapshot {
    JobPostingSnapshot {
        job_id: "job-314".to_string(),
        company_id: "co-88".to_string(),
        title: "Senior Backend Engineer".to_string(),
        description: "Own the billing service and its storage layer.".to_string(),
        enabled_stages: stages.to_vec(),
    }
}

pub(super) fn submission() -> ApplicationSubmission {
    ApplicationSubmission {
        job: posting(),
        seeker_id: "seeker-7".to_string(),
        resume_url: "s3://hireflow/resumes/seeker-7.pdf".to_string(),
        resume_filename: "resume.pdf".to_string(),
        cover_letter: Some("I have shipped three billing systems.".to_string()),
    }
}

pub(super) fn submission_for(job: JobPostingSnapshot) -> ApplicationSubmission {
    ApplicationSubmission {
        job,
        ..submission()
    }
}

pub(super) fn interview_request() -> InterviewRequest {
    InterviewRequest {
        title: "System design round".to_string(),
        kind: InterviewKind::Online,
        video_kind: Some(VideoKind::External),
        scheduled_date: Utc::now()
            .checked_add_days(Days::new(3))
            .expect("valid date"),
        location: None,
        meeting_link: Some("https://meet.example.com/abc".to_string()),
    }
}

pub(super) fn task_request() -> TaskRequest {
    TaskRequest {
        title: "Rate limiter kata".to_string(),
        description: "Implement a sliding-window rate limiter.".to_string(),
        deadline: Utc::now()
            .checked_add_days(Days::new(7))
            .expect("valid date"),
        document_url: None,
    }
}

pub(super) fn offer_request() -> OfferRequest {
    OfferRequest {
        offer_amount: 145_000,
        employment_type: EmploymentType::FullTime,
        document_url: "s3://hireflow/offers/seeker-7.pdf".to_string(),
    }
}

#[derive(Default, Clone)]
pub(super) struct MemorySink {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl MemorySink {
    pub(super) fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("sink mutex poisoned").clone()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct FailingSink;

impl NotificationSink for FailingSink {
    fn notify(&self, _notification: Notification) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp offline".to_string()))
    }
}

pub(super) fn build_engine() -> (
    PipelineEngine<MemoryStore, MemorySink>,
    Arc<MemoryStore>,
    Arc<MemorySink>,
) {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::default());
    let engine = PipelineEngine::new(store.clone(), sink.clone());
    (engine, store, sink)
}

/// Submit a fresh application and walk it to `target` with recruiter moves.
pub(super) fn application_in_stage(
    engine: &PipelineEngine<MemoryStore, MemorySink>,
    target: Stage,
) -> ApplicationId {
    let record = engine.submit(submission()).expect("submission succeeds");
    if target != Stage::InReview {
        engine
            .move_to_stage(&record.id, target, None, None, "recruiter-1")
            .expect("stage move succeeds");
    }
    record.id
}

pub(super) struct FixedOracle(pub(super) i16);

impl ScoringOracle for FixedOracle {
    fn score(&self, _resume_url: &str, _job_description: &str) -> Result<i16, ScoringError> {
        Ok(self.0)
    }
}

pub(super) struct DownOracle;

impl ScoringOracle for DownOracle {
    fn score(&self, _resume_url: &str, _job_description: &str) -> Result<i16, ScoringError> {
        Err(ScoringError::Unavailable("model endpoint offline".to_string()))
    }
}

pub(super) fn scoring_config() -> ScoringConfig {
    ScoringConfig {
        timeout: Duration::from_millis(500),
        attempts: 2,
        backoff: Duration::from_millis(5),
    }
}

pub(super) fn router_fixture() -> (axum::Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::default());
    let engine = PipelineEngine::new(store.clone(), sink);
    let scoring = ScoreAdapter::new(store.clone(), Arc::new(FixedOracle(77)), scoring_config());
    let context = Arc::new(PipelineContext {
        engine,
        scoring,
        store: store.clone(),
    });
    (pipeline_router(context), store)
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
