use super::common::*;
use crate::pipeline::domain::{ApplicationId, SCORE_PENDING};
use crate::pipeline::memory::MemoryStore;
use crate::pipeline::repository::PipelineStore;
use crate::pipeline::scoring::ScoreAdapter;
use std::sync::Arc;
use std::time::Duration;

fn current_score(store: &MemoryStore, id: &ApplicationId) -> i16 {
    store
        .fetch_application(id)
        .expect("store reachable")
        .expect("application exists")
        .score
}

async fn wait_for_score(store: &MemoryStore, id: &ApplicationId) -> i16 {
    for _ in 0..100 {
        let score = current_score(store, id);
        if score != SCORE_PENDING {
            return score;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    current_score(store, id)
}

#[tokio::test(flavor = "multi_thread")]
async fn oracle_result_is_written_back() {
    let (engine, store, _) = build_engine();
    let record = engine.submit(submission()).expect("submission succeeds");
    let adapter = ScoreAdapter::new(store.clone(), Arc::new(FixedOracle(88)), scoring_config());

    adapter.request_score(record.id.clone());

    assert_eq!(wait_for_score(&store, &record.id).await, 88);
}

#[tokio::test(flavor = "multi_thread")]
async fn oracle_failure_leaves_the_sentinel() {
    let (engine, store, _) = build_engine();
    let record = engine.submit(submission()).expect("submission succeeds");
    let adapter = ScoreAdapter::new(store.clone(), Arc::new(DownOracle), scoring_config());

    adapter.request_score(record.id.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(current_score(&store, &record.id), SCORE_PENDING);
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_range_scores_are_discarded() {
    let (engine, store, _) = build_engine();
    let record = engine.submit(submission()).expect("submission succeeds");
    let adapter = ScoreAdapter::new(store.clone(), Arc::new(FixedOracle(250)), scoring_config());

    adapter.request_score(record.id.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(current_score(&store, &record.id), SCORE_PENDING);
}

#[tokio::test(flavor = "multi_thread")]
async fn late_answers_do_not_clobber_pipeline_writes() {
    let (engine, store, _) = build_engine();
    let record = engine.submit(submission()).expect("submission succeeds");
    let adapter = ScoreAdapter::new(store.clone(), Arc::new(FixedOracle(61)), scoring_config());

    // The pipeline keeps moving while the oracle is in flight.
    adapter.request_score(record.id.clone());
    let moved = engine
        .move_to_stage(
            &record.id,
            crate::pipeline::stage::Stage::Shortlisted,
            None,
            None,
            "recruiter-1",
        )
        .expect("stage move succeeds");

    assert_eq!(wait_for_score(&store, &record.id).await, 61);
    let application = store
        .fetch_application(&record.id)
        .expect("store reachable")
        .expect("application exists");
    assert_eq!(application.stage, moved.stage);
    assert_eq!(application.version, moved.version);
}
