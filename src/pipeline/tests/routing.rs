use super::common::*;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

fn post_json(uri: &str, payload: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&payload).expect("payload")))
        .expect("request")
}

async fn create_application(router: &axum::Router) -> String {
    let response = router
        .clone()
        .oneshot(post_json(
            "/api/v1/applications",
            serde_json::to_value(submission()).expect("payload"),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    payload["id"].as_str().expect("id present").to_string()
}

#[tokio::test]
async fn submit_route_creates_an_application() {
    let (router, _) = router_fixture();

    let response = router
        .oneshot(post_json(
            "/api/v1/applications",
            serde_json::to_value(submission()).expect("payload"),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["stage"], json!("in_review"));
    assert_eq!(payload["sub_stage"], json!("profile_review"));
    assert_eq!(payload["score"], json!(-1));
}

#[tokio::test]
async fn progress_route_returns_the_assembled_view() {
    let (router, _) = router_fixture();
    let id = create_application(&router).await;

    let response = router
        .oneshot(
            Request::get(format!("/api/v1/applications/{id}/progress"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["application"]["id"], json!(id));
    assert_eq!(payload["display_stages"][0]["key"], json!("applied"));
    assert_eq!(
        payload["activity"][0]["kind"],
        json!("application_submitted")
    );
}

#[tokio::test]
async fn missing_applications_map_to_not_found() {
    let (router, _) = router_fixture();

    let response = router
        .oneshot(
            Request::get("/api/v1/applications/app-000000/progress")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_transitions_map_to_unprocessable() {
    let (router, _) = router_fixture();
    let id = create_application(&router).await;

    let response = router
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/stage"),
            json!({ "target": "in_review", "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert!(payload["error"].as_str().expect("message").contains("cannot move"));
}

#[tokio::test]
async fn closed_applications_map_to_conflict() {
    let (router, _) = router_fixture();
    let id = create_application(&router).await;

    let rejected = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/reject"),
            json!({ "reason": "Role closed", "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(rejected.status(), StatusCode::OK);

    let response = router
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/stage"),
            json!({ "target": "shortlisted", "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn stage_route_honors_explicit_sub_stages() {
    let (router, _) = router_fixture();
    let id = create_application(&router).await;

    let response = router
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/stage"),
            json!({
                "target": "shortlisted",
                "sub_stage": "awaiting_response",
                "performed_by": "recruiter-1",
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["stage"], json!("shortlisted"));
    assert_eq!(payload["sub_stage"], json!("awaiting_response"));
}

#[tokio::test]
async fn comment_route_appends_to_the_feed() {
    let (router, _) = router_fixture();
    let id = create_application(&router).await;

    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/comments"),
            json!({ "comment": "Phone screen booked", "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);

    let feed = router
        .oneshot(
            Request::get(format!("/api/v1/applications/{id}/activity?limit=10"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(feed.status(), StatusCode::OK);
    let payload = read_json_body(feed).await;
    let entries = payload["entries"].as_array().expect("entries array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["kind"], json!("comment"));
}

#[tokio::test]
async fn activity_route_pages_with_cursor_parameters() {
    let (router, _) = router_fixture();
    let id = create_application(&router).await;
    for i in 0..3 {
        let response = router
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/applications/{id}/comments"),
                json!({ "comment": format!("note {i}"), "performed_by": "recruiter-1" }),
            ))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let first = router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/applications/{id}/activity?limit=3"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");
    let first = read_json_body(first).await;
    assert_eq!(first["entries"].as_array().expect("array").len(), 3);
    assert_eq!(first["has_more"], json!(true));

    let cursor_at = first["next_cursor"]["created_at"]
        .as_str()
        .expect("cursor timestamp")
        .to_string();
    let cursor_id = first["next_cursor"]["id"].as_str().expect("cursor id");

    let second = router
        .oneshot(
            Request::get(format!(
                "/api/v1/applications/{id}/activity?limit=3&cursor_at={}&cursor_id={cursor_id}",
                urlencode(&cursor_at)
            ))
            .body(Body::empty())
            .expect("request"),
        )
        .await
        .expect("route executes");
    let second = read_json_body(second).await;
    assert_eq!(second["entries"].as_array().expect("array").len(), 1);
    assert_eq!(second["has_more"], json!(false));
}

// Minimal percent-encoding for RFC 3339 timestamps in query strings.
fn urlencode(value: &str) -> String {
    value.replace('+', "%2B").replace(':', "%3A")
}

#[tokio::test]
async fn interview_routes_drive_the_round_lifecycle() {
    let (router, _) = router_fixture();
    let id = create_application(&router).await;

    let moved = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/stage"),
            json!({ "target": "interview", "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(moved.status(), StatusCode::OK);

    let mut request = serde_json::to_value(interview_request()).expect("payload");
    request["performed_by"] = json!("recruiter-1");
    let scheduled = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/interviews"),
            request,
        ))
        .await
        .expect("route executes");
    assert_eq!(scheduled.status(), StatusCode::CREATED);
    let interview = read_json_body(scheduled).await;
    let interview_id = interview["id"].as_str().expect("id present");

    let completed = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/interviews/{interview_id}/complete"),
            json!({ "rating": 5, "feedback": "Hire", "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(completed.status(), StatusCode::OK);
    let payload = read_json_body(completed).await;
    assert_eq!(payload["status"], json!("completed"));
    assert_eq!(payload["rating"], json!(5));

    // A second round can complete without an evaluation; feedback follows.
    let mut request = serde_json::to_value(interview_request()).expect("payload");
    request["performed_by"] = json!("recruiter-1");
    let scheduled = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/interviews"),
            request,
        ))
        .await
        .expect("route executes");
    assert_eq!(scheduled.status(), StatusCode::CREATED);
    let second = read_json_body(scheduled).await;
    let second_id = second["id"].as_str().expect("id present");

    let bare = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/interviews/{second_id}/complete"),
            json!({ "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(bare.status(), StatusCode::OK);
    let payload = read_json_body(bare).await;
    assert_eq!(payload["status"], json!("completed"));
    assert_eq!(payload["rating"], json!(null));

    let evaluated = router
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/interviews/{second_id}/feedback"),
            json!({ "rating": 4, "feedback": "Solid", "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(evaluated.status(), StatusCode::OK);
    let payload = read_json_body(evaluated).await;
    assert_eq!(payload["rating"], json!(4));
    assert_eq!(payload["feedback"], json!("Solid"));
}

#[tokio::test]
async fn offer_routes_enforce_engine_guards() {
    let (router, _) = router_fixture();
    let id = create_application(&router).await;

    let moved = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/stage"),
            json!({ "target": "offer", "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(moved.status(), StatusCode::OK);

    let premature = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/hire"),
            json!({ "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(premature.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let mut request = serde_json::to_value(offer_request()).expect("payload");
    request["performed_by"] = json!("recruiter-1");
    let sent = router
        .clone()
        .oneshot(post_json(&format!("/api/v1/applications/{id}/offers"), request))
        .await
        .expect("route executes");
    assert_eq!(sent.status(), StatusCode::CREATED);
    let offer = read_json_body(sent).await;
    let offer_id = offer["id"].as_str().expect("id present");

    let accepted = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/offers/{offer_id}/accept"),
            json!({ "performed_by": "seeker-7" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(accepted.status(), StatusCode::OK);

    let hired = router
        .oneshot(post_json(
            &format!("/api/v1/applications/{id}/hire"),
            json!({ "performed_by": "recruiter-1" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(hired.status(), StatusCode::OK);
    let payload = read_json_body(hired).await;
    assert_eq!(payload["stage"], json!("hired"));
}
