//! Thin HTTP wrappers over the pipeline engine and the read-side views.
//! All pipeline logic lives in [`super::engine`]; handlers only translate
//! payloads and map errors onto status codes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{
    ApplicationId, ApplicationSubmission, CompensationUpdate, InterviewId, InterviewRequest,
    MeetingId, MeetingKind, MeetingStatus, OfferId, OfferRequest, TaskId, TaskRequest,
};
use super::engine::{PipelineEngine, PipelineError};
use super::repository::{ActivityCursor, NotificationSink, PipelineStore, StoreError};
use super::scoring::{ScoreAdapter, ScoringOracle};
use super::stage::{Stage, SubStage};
use super::view;

/// Shared handler state: the engine, the scoring adapter, and the store the
/// views read from.
pub struct PipelineContext<S, N, O> {
    pub engine: PipelineEngine<S, N>,
    pub scoring: ScoreAdapter<S, O>,
    pub store: Arc<S>,
}

/// Status-code mapping for pipeline errors, shared with the binary's
/// top-level error type.
pub fn error_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::ApplicationNotFound
        | PipelineError::InterviewNotFound
        | PipelineError::TaskNotFound
        | PipelineError::OfferNotFound
        | PipelineError::MeetingNotFound
        | PipelineError::CompensationNotRecorded => StatusCode::NOT_FOUND,
        // Closed applications render distinctly from invalid moves.
        PipelineError::TerminalState(_) => StatusCode::CONFLICT,
        PipelineError::Store(StoreError::Conflict)
        | PipelineError::Store(StoreError::VersionMismatch { .. }) => StatusCode::CONFLICT,
        PipelineError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
        PipelineError::Store(StoreError::Unavailable(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn error_response(err: PipelineError) -> Response {
    let payload = json!({ "error": err.to_string() });
    (error_status(&err), Json(payload)).into_response()
}

fn respond<T: Serialize>(result: Result<T, PipelineError>, ok: StatusCode) -> Response {
    match result {
        Ok(value) => (ok, Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

/// Router builder exposing the pipeline over HTTP.
pub fn pipeline_router<S, N, O>(context: Arc<PipelineContext<S, N, O>>) -> Router
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    Router::new()
        .route("/api/v1/applications", post(submit::<S, N, O>))
        .route(
            "/api/v1/applications/:id/progress",
            get(progress::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/activity",
            get(activity::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/stage",
            post(move_stage::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/substage",
            post(update_substage::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/comments",
            post(add_comment::<S, N, O>),
        )
        .route("/api/v1/applications/:id/reject", post(reject::<S, N, O>))
        .route("/api/v1/applications/:id/hire", post(hire::<S, N, O>))
        .route(
            "/api/v1/applications/:id/interviews",
            post(schedule_interview::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/interviews/:interview_id/complete",
            post(complete_interview::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/interviews/:interview_id/feedback",
            post(record_interview_feedback::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/interviews/:interview_id/cancel",
            post(cancel_interview::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/tasks",
            post(assign_task::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/tasks/:task_id/submit",
            post(submit_task::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/tasks/:task_id/review",
            post(review_task::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/tasks/:task_id/complete",
            post(complete_task::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/tasks/:task_id/revoke",
            post(revoke_task::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/compensation",
            put(record_compensation::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/compensation/meetings",
            post(schedule_meeting::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/compensation/meetings/:meeting_id",
            post(update_meeting::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/compensation/notes",
            post(add_note::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/compensation/approve",
            post(approve_compensation::<S, N, O>),
        )
        .route("/api/v1/applications/:id/offers", post(send_offer::<S, N, O>))
        .route(
            "/api/v1/applications/:id/offers/:offer_id/accept",
            post(accept_offer::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/offers/:offer_id/decline",
            post(decline_offer::<S, N, O>),
        )
        .route(
            "/api/v1/applications/:id/offers/:offer_id/withdraw",
            post(withdraw_offer::<S, N, O>),
        )
        .with_state(context)
}

type Ctx<S, N, O> = State<Arc<PipelineContext<S, N, O>>>;

async fn submit<S, N, O>(
    State(context): Ctx<S, N, O>,
    Json(submission): Json<ApplicationSubmission>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    match context.engine.submit(submission) {
        Ok(record) => {
            context.scoring.request_score(record.id.clone());
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn progress<S, N, O>(State(context): Ctx<S, N, O>, Path(id): Path<String>) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        view::progress_view(context.store.as_ref(), &ApplicationId(id)),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    cursor_at: Option<DateTime<Utc>>,
    #[serde(default)]
    cursor_id: Option<String>,
}

async fn activity<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    let cursor = match (query.cursor_at, query.cursor_id) {
        (Some(created_at), Some(id)) => Some(ActivityCursor { created_at, id }),
        _ => None,
    };
    respond(
        view::activity_page(
            context.store.as_ref(),
            &ApplicationId(id),
            query.limit.unwrap_or(20),
            cursor,
        ),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct MoveStageBody {
    target: Stage,
    #[serde(default)]
    sub_stage: Option<SubStage>,
    #[serde(default)]
    comment: Option<String>,
    performed_by: String,
}

async fn move_stage<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<MoveStageBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context.engine.move_to_stage(
            &ApplicationId(id),
            body.target,
            body.sub_stage,
            body.comment,
            &body.performed_by,
        ),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct SubStageBody {
    sub_stage: SubStage,
    #[serde(default)]
    comment: Option<String>,
    performed_by: String,
}

async fn update_substage<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<SubStageBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context.engine.update_sub_stage(
            &ApplicationId(id),
            body.sub_stage,
            body.comment,
            &body.performed_by,
        ),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct CommentBody {
    comment: String,
    performed_by: String,
}

async fn add_comment<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<CommentBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .add_comment(&ApplicationId(id), body.comment, &body.performed_by),
        StatusCode::CREATED,
    )
}

#[derive(Debug, Deserialize)]
struct RejectBody {
    reason: String,
    performed_by: String,
}

async fn reject<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .reject_application(&ApplicationId(id), body.reason, &body.performed_by),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct ActorBody {
    performed_by: String,
}

async fn hire<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .mark_hired(&ApplicationId(id), &body.performed_by),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct ScheduleInterviewBody {
    #[serde(flatten)]
    request: InterviewRequest,
    performed_by: String,
}

async fn schedule_interview<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<ScheduleInterviewBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .schedule_interview(&ApplicationId(id), body.request, &body.performed_by),
        StatusCode::CREATED,
    )
}

#[derive(Debug, Deserialize)]
struct EvaluationBody {
    rating: u8,
    feedback: String,
    performed_by: String,
}

/// Completion accepts an optional evaluation; omitting it leaves the round
/// awaiting feedback.
#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    rating: Option<u8>,
    #[serde(default)]
    feedback: Option<String>,
    performed_by: String,
}

async fn complete_interview<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, interview_id)): Path<(String, String)>,
    Json(body): Json<CompletionBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    let id = ApplicationId(id);
    let interview_id = InterviewId(interview_id);
    let result = match (body.rating, body.feedback) {
        (Some(rating), Some(feedback)) => context.engine.complete_interview(
            &id,
            &interview_id,
            rating,
            feedback,
            &body.performed_by,
        ),
        _ => context
            .engine
            .mark_interview_completed(&id, &interview_id, &body.performed_by),
    };
    respond(result, StatusCode::OK)
}

async fn record_interview_feedback<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, interview_id)): Path<(String, String)>,
    Json(body): Json<EvaluationBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context.engine.record_interview_feedback(
            &ApplicationId(id),
            &InterviewId(interview_id),
            body.rating,
            body.feedback,
            &body.performed_by,
        ),
        StatusCode::OK,
    )
}

async fn cancel_interview<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, interview_id)): Path<(String, String)>,
    Json(body): Json<ActorBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context.engine.cancel_interview(
            &ApplicationId(id),
            &InterviewId(interview_id),
            &body.performed_by,
        ),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct AssignTaskBody {
    #[serde(flatten)]
    request: TaskRequest,
    performed_by: String,
}

async fn assign_task<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<AssignTaskBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .assign_task(&ApplicationId(id), body.request, &body.performed_by),
        StatusCode::CREATED,
    )
}

#[derive(Debug, Deserialize)]
struct SubmitTaskBody {
    submission_url: String,
    performed_by: String,
}

async fn submit_task<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, task_id)): Path<(String, String)>,
    Json(body): Json<SubmitTaskBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context.engine.submit_task(
            &ApplicationId(id),
            &TaskId(task_id),
            body.submission_url,
            &body.performed_by,
        ),
        StatusCode::OK,
    )
}

async fn review_task<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, task_id)): Path<(String, String)>,
    Json(body): Json<ActorBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .review_task(&ApplicationId(id), &TaskId(task_id), &body.performed_by),
        StatusCode::OK,
    )
}

async fn complete_task<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, task_id)): Path<(String, String)>,
    Json(body): Json<EvaluationBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context.engine.complete_task(
            &ApplicationId(id),
            &TaskId(task_id),
            body.rating,
            body.feedback,
            &body.performed_by,
        ),
        StatusCode::OK,
    )
}

async fn revoke_task<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, task_id)): Path<(String, String)>,
    Json(body): Json<ActorBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .revoke_task(&ApplicationId(id), &TaskId(task_id), &body.performed_by),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct CompensationBody {
    #[serde(flatten)]
    update: CompensationUpdate,
    performed_by: String,
}

async fn record_compensation<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<CompensationBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .record_compensation(&ApplicationId(id), body.update, &body.performed_by),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct MeetingBody {
    kind: MeetingKind,
    scheduled_date: DateTime<Utc>,
    performed_by: String,
}

async fn schedule_meeting<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<MeetingBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context.engine.schedule_compensation_meeting(
            &ApplicationId(id),
            body.kind,
            body.scheduled_date,
            &body.performed_by,
        ),
        StatusCode::CREATED,
    )
}

#[derive(Debug, Deserialize)]
struct MeetingStatusBody {
    status: MeetingStatus,
    performed_by: String,
}

async fn update_meeting<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, meeting_id)): Path<(String, String)>,
    Json(body): Json<MeetingStatusBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context.engine.update_compensation_meeting(
            &ApplicationId(id),
            &MeetingId(meeting_id),
            body.status,
            &body.performed_by,
        ),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct NoteBody {
    note: String,
    performed_by: String,
}

async fn add_note<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<NoteBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .add_compensation_note(&ApplicationId(id), body.note, &body.performed_by),
        StatusCode::CREATED,
    )
}

async fn approve_compensation<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .approve_compensation(&ApplicationId(id), &body.performed_by),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct SendOfferBody {
    #[serde(flatten)]
    request: OfferRequest,
    performed_by: String,
}

async fn send_offer<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path(id): Path<String>,
    Json(body): Json<SendOfferBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .send_offer(&ApplicationId(id), body.request, &body.performed_by),
        StatusCode::CREATED,
    )
}

#[derive(Debug, Deserialize)]
struct AcceptOfferBody {
    #[serde(default)]
    signed_document_url: Option<String>,
    performed_by: String,
}

async fn accept_offer<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, offer_id)): Path<(String, String)>,
    Json(body): Json<AcceptOfferBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context.engine.accept_offer(
            &ApplicationId(id),
            &OfferId(offer_id),
            body.signed_document_url,
            &body.performed_by,
        ),
        StatusCode::OK,
    )
}

async fn decline_offer<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, offer_id)): Path<(String, String)>,
    Json(body): Json<ActorBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context
            .engine
            .decline_offer(&ApplicationId(id), &OfferId(offer_id), &body.performed_by),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct WithdrawOfferBody {
    reason: String,
    performed_by: String,
}

async fn withdraw_offer<S, N, O>(
    State(context): Ctx<S, N, O>,
    Path((id, offer_id)): Path<(String, String)>,
    Json(body): Json<WithdrawOfferBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: NotificationSink + 'static,
    O: ScoringOracle + 'static,
{
    respond(
        context.engine.withdraw_offer(
            &ApplicationId(id),
            &OfferId(offer_id),
            body.reason,
            &body.performed_by,
        ),
        StatusCode::OK,
    )
}
