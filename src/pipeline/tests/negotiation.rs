use super::common::*;
use crate::pipeline::domain::{
    ActivityKind, ApplicationId, CompensationUpdate, MeetingKind, MeetingStatus, OfferStatus,
};
use crate::pipeline::engine::{PipelineEngine, PipelineError};
use crate::pipeline::memory::MemoryStore;
use crate::pipeline::repository::PipelineStore;
use crate::pipeline::stage::{Stage, SubStage};
use chrono::{Days, Utc};

fn compensation_fixture() -> (
    PipelineEngine<MemoryStore, MemorySink>,
    std::sync::Arc<MemoryStore>,
    ApplicationId,
) {
    let (engine, store, _) = build_engine();
    let id = application_in_stage(&engine, Stage::Compensation);
    (engine, store, id)
}

fn offer_fixture() -> (
    PipelineEngine<MemoryStore, MemorySink>,
    std::sync::Arc<MemoryStore>,
    ApplicationId,
) {
    let (engine, store, _) = build_engine();
    let id = application_in_stage(&engine, Stage::Offer);
    (engine, store, id)
}

#[test]
fn first_figures_open_the_negotiation() {
    let (engine, store, id) = compensation_fixture();

    let record = engine
        .record_compensation(
            &id,
            CompensationUpdate {
                candidate_expected: Some(150_000),
                ..CompensationUpdate::default()
            },
            "recruiter-1",
        )
        .expect("recording succeeds");

    assert_eq!(record.candidate_expected, Some(150_000));
    let application = store
        .fetch_application(&id)
        .expect("store reachable")
        .expect("application exists");
    assert_eq!(application.sub_stage, SubStage::Negotiation);
}

#[test]
fn first_figures_entry_snapshots_the_negotiation_sub_stage() {
    let (engine, store, id) = compensation_fixture();

    engine
        .record_compensation(
            &id,
            CompensationUpdate {
                candidate_expected: Some(150_000),
                ..CompensationUpdate::default()
            },
            "recruiter-1",
        )
        .expect("recording succeeds");

    let activity = store
        .activity_page(&id, 50, None)
        .expect("activity readable");
    let entry = activity
        .iter()
        .find(|entry| entry.kind == ActivityKind::CompensationUpdated)
        .expect("compensation entry present");
    assert_eq!(entry.sub_stage, SubStage::Negotiation);
}

#[test]
fn later_figures_merge_into_the_record() {
    let (engine, _, id) = compensation_fixture();
    engine
        .record_compensation(
            &id,
            CompensationUpdate {
                candidate_expected: Some(150_000),
                ..CompensationUpdate::default()
            },
            "recruiter-1",
        )
        .expect("first write");

    let merged = engine
        .record_compensation(
            &id,
            CompensationUpdate {
                company_proposed: Some(140_000),
                benefits: Some(vec!["Remote stipend".to_string()]),
                ..CompensationUpdate::default()
            },
            "recruiter-1",
        )
        .expect("second write");

    assert_eq!(merged.candidate_expected, Some(150_000));
    assert_eq!(merged.company_proposed, Some(140_000));
    assert_eq!(merged.benefits, vec!["Remote stipend".to_string()]);
}

#[test]
fn approval_needs_a_settled_amount() {
    let (engine, store, id) = compensation_fixture();
    engine
        .record_compensation(
            &id,
            CompensationUpdate {
                candidate_expected: Some(150_000),
                ..CompensationUpdate::default()
            },
            "recruiter-1",
        )
        .expect("recording succeeds");

    let premature = engine.approve_compensation(&id, "manager-1");
    assert!(matches!(
        premature,
        Err(PipelineError::ApprovalRequiresAmount)
    ));

    engine
        .record_compensation(
            &id,
            CompensationUpdate {
                final_agreed: Some(145_000),
                ..CompensationUpdate::default()
            },
            "recruiter-1",
        )
        .expect("agreement recorded");
    let approved = engine
        .approve_compensation(&id, "manager-1")
        .expect("approval succeeds");

    assert_eq!(approved.approved_by.as_deref(), Some("manager-1"));
    assert!(approved.approved_at.is_some());
    let application = store
        .fetch_application(&id)
        .expect("store reachable")
        .expect("application exists");
    assert_eq!(application.sub_stage, SubStage::Approved);
}

#[test]
fn approval_without_a_record_is_refused() {
    let (engine, _, id) = compensation_fixture();
    let result = engine.approve_compensation(&id, "manager-1");
    assert!(matches!(
        result,
        Err(PipelineError::CompensationNotRecorded)
    ));
}

#[test]
fn meetings_close_exactly_once() {
    let (engine, _, id) = compensation_fixture();
    let meeting = engine
        .schedule_compensation_meeting(
            &id,
            MeetingKind::Call,
            Utc::now().checked_add_days(Days::new(1)).expect("valid"),
            "recruiter-1",
        )
        .expect("scheduling succeeds");

    engine
        .update_compensation_meeting(&id, &meeting.id, MeetingStatus::Completed, "recruiter-1")
        .expect("completion succeeds");

    let again = engine.update_compensation_meeting(
        &id,
        &meeting.id,
        MeetingStatus::Cancelled,
        "recruiter-1",
    );
    assert!(matches!(
        again,
        Err(PipelineError::MeetingClosed(MeetingStatus::Completed))
    ));
}

#[test]
fn notes_require_the_compensation_stage() {
    let (engine, _, _) = build_engine();
    let id = application_in_stage(&engine, Stage::Interview);

    let result = engine.add_compensation_note(&id, "Asked about equity".to_string(), "recruiter-1");

    assert!(matches!(
        result,
        Err(PipelineError::WrongStage {
            required: Stage::Compensation,
            ..
        })
    ));
}

#[test]
fn only_one_offer_may_be_live() {
    let (engine, _, id) = offer_fixture();
    let first = engine
        .send_offer(&id, offer_request(), "recruiter-1")
        .expect("first offer");

    let blocked = engine.send_offer(&id, offer_request(), "recruiter-1");
    assert!(matches!(blocked, Err(PipelineError::OfferAlreadyActive)));

    engine
        .decline_offer(&id, &first.id, "seeker-7")
        .expect("decline succeeds");
    engine
        .send_offer(&id, offer_request(), "recruiter-1")
        .expect("a declined offer frees the slot");
}

#[test]
fn acceptance_captures_the_signed_copy() {
    let (engine, store, id) = offer_fixture();
    let offer = engine
        .send_offer(&id, offer_request(), "recruiter-1")
        .expect("offer sent");

    let accepted = engine
        .accept_offer(
            &id,
            &offer.id,
            Some("s3://hireflow/offers/signed.pdf".to_string()),
            "seeker-7",
        )
        .expect("acceptance succeeds");

    assert_eq!(accepted.status, OfferStatus::Accepted);
    assert_eq!(
        accepted.signed_document_url.as_deref(),
        Some("s3://hireflow/offers/signed.pdf")
    );
    let application = store
        .fetch_application(&id)
        .expect("store reachable")
        .expect("application exists");
    assert_eq!(application.sub_stage, SubStage::Accepted);

    let again = engine.accept_offer(&id, &offer.id, None, "seeker-7");
    assert!(matches!(
        again,
        Err(PipelineError::OfferStatusNotAllowed(OfferStatus::Accepted))
    ));
}

#[test]
fn hiring_requires_an_accepted_offer() {
    let (engine, _, id) = offer_fixture();
    let offer = engine
        .send_offer(&id, offer_request(), "recruiter-1")
        .expect("offer sent");

    let premature = engine.mark_hired(&id, "recruiter-1");
    assert!(matches!(premature, Err(PipelineError::OfferNotAccepted)));

    engine
        .accept_offer(&id, &offer.id, None, "seeker-7")
        .expect("acceptance succeeds");
    let hired = engine
        .mark_hired(&id, "recruiter-1")
        .expect("hire succeeds");

    assert_eq!(hired.stage, Stage::Hired);
    assert_eq!(hired.sub_stage, SubStage::Hired);
}

#[test]
fn hiring_outside_the_offer_stage_is_refused() {
    let (engine, _, _) = build_engine();
    let id = application_in_stage(&engine, Stage::Interview);

    let result = engine.mark_hired(&id, "recruiter-1");

    assert!(matches!(
        result,
        Err(PipelineError::InvalidTransition {
            from: Stage::Interview,
            to: Stage::Hired,
        })
    ));
}

#[test]
fn accepted_offers_block_rejection() {
    let (engine, _, id) = offer_fixture();
    let offer = engine
        .send_offer(&id, offer_request(), "recruiter-1")
        .expect("offer sent");
    engine
        .accept_offer(&id, &offer.id, None, "seeker-7")
        .expect("acceptance succeeds");

    let rejected = engine.reject_application(&id, "changed our mind".to_string(), "recruiter-1");
    assert!(matches!(rejected, Err(PipelineError::OfferAlreadyAccepted)));

    let moved = engine.move_to_stage(&id, Stage::Rejected, None, None, "recruiter-1");
    assert!(matches!(moved, Err(PipelineError::OfferAlreadyAccepted)));
}

#[test]
fn withdrawal_reopens_the_offer_slot() {
    let (engine, store, id) = offer_fixture();
    let offer = engine
        .send_offer(&id, offer_request(), "recruiter-1")
        .expect("offer sent");
    engine
        .accept_offer(&id, &offer.id, None, "seeker-7")
        .expect("acceptance succeeds");

    let withdrawn = engine
        .withdraw_offer(&id, &offer.id, "Budget cut".to_string(), "manager-1")
        .expect("withdrawal from accepted succeeds");

    assert_eq!(withdrawn.status, OfferStatus::Declined);
    assert_eq!(withdrawn.withdrawal_reason.as_deref(), Some("Budget cut"));

    engine
        .send_offer(&id, offer_request(), "recruiter-1")
        .expect("a new offer can follow a withdrawal");

    let activity = store
        .activity_page(&id, 50, None)
        .expect("activity readable");
    assert!(activity
        .iter()
        .any(|entry| entry.kind == ActivityKind::OfferWithdrawn));
}
