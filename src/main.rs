use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use chrono::{Days, Utc};
use clap::{Args, Parser, Subcommand};
use hireflow::config::{AppConfig, ScoringConfig};
use hireflow::error::AppError;
use hireflow::pipeline::{
    self, view, ApplicationId, CompensationUpdate, EmploymentType, InterviewKind,
    InterviewRequest, KeywordOracle, LoggingSink, MemoryStore, OfferRequest, PipelineContext,
    PipelineEngine, ScoreAdapter, Stage, TaskRequest, SCORE_PENDING,
};
use hireflow::telemetry;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "hireflow",
    about = "Run the hiring pipeline service or a scripted walk-through",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk a sample application through every pipeline stage and print the
    /// resulting progress view
    Demo,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Demo => run_demo().await,
    }
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let store = Arc::new(MemoryStore::new());
    let engine = PipelineEngine::new(store.clone(), Arc::new(LoggingSink));
    let scoring = ScoreAdapter::new(store.clone(), Arc::new(KeywordOracle), config.scoring.clone());
    let context = Arc::new(PipelineContext {
        engine,
        scoring,
        store,
    });

    let app = Router::new()
        .route("/health/live", get(healthcheck))
        .route("/health/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .merge(pipeline::pipeline_router(context))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "hiring pipeline service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn run_demo() -> Result<(), AppError> {
    let store = Arc::new(MemoryStore::new());
    let engine = PipelineEngine::new(store.clone(), Arc::new(LoggingSink));
    let scoring = ScoreAdapter::new(
        store.clone(),
        Arc::new(KeywordOracle),
        ScoringConfig::default(),
    );

    let id = drive_demo_application(&engine, &scoring, &store).await?;
    let progress = view::progress_view(store.as_ref(), &id)?;
    render_progress(&progress);
    Ok(())
}

/// Scripted happy path: submit, interview, task, negotiation, offer, hire.
async fn drive_demo_application(
    engine: &PipelineEngine<MemoryStore, LoggingSink>,
    scoring: &ScoreAdapter<MemoryStore, KeywordOracle>,
    store: &Arc<MemoryStore>,
) -> Result<ApplicationId, AppError> {
    let record = engine.submit(demo_submission())?;
    let id = record.id.clone();
    scoring.request_score(id.clone());

    engine.move_to_stage(&id, Stage::Shortlisted, None, None, "recruiter-demo")?;
    let interview = engine.schedule_interview(
        &id,
        InterviewRequest {
            title: "System design round".to_string(),
            kind: InterviewKind::Offline,
            video_kind: None,
            scheduled_date: Utc::now().checked_add_days(Days::new(2)).unwrap_or_else(Utc::now),
            location: Some("HQ, floor 3".to_string()),
            meeting_link: None,
        },
        "recruiter-demo",
    )?;
    engine.complete_interview(
        &id,
        &interview.id,
        5,
        "Excellent design instincts".to_string(),
        "recruiter-demo",
    )?;

    engine.move_to_stage(&id, Stage::TechnicalTask, None, None, "recruiter-demo")?;
    let task = engine.assign_task(
        &id,
        TaskRequest {
            title: "Rate limiter kata".to_string(),
            description: "Sliding-window limiter with tests".to_string(),
            deadline: Utc::now().checked_add_days(Days::new(7)).unwrap_or_else(Utc::now),
            document_url: None,
        },
        "recruiter-demo",
    )?;
    engine.submit_task(
        &id,
        &task.id,
        "https://github.com/demo/kata".to_string(),
        "seeker-demo",
    )?;
    engine.review_task(&id, &task.id, "recruiter-demo")?;
    engine.complete_task(&id, &task.id, 4, "Solid solution".to_string(), "recruiter-demo")?;

    engine.move_to_stage(&id, Stage::Compensation, None, None, "recruiter-demo")?;
    engine.record_compensation(
        &id,
        CompensationUpdate {
            candidate_expected: Some(150_000),
            company_proposed: Some(142_000),
            final_agreed: Some(145_000),
            benefits: Some(vec!["Remote stipend".to_string()]),
            expected_joining: None,
        },
        "recruiter-demo",
    )?;
    engine.approve_compensation(&id, "manager-demo")?;

    engine.move_to_stage(&id, Stage::Offer, None, None, "recruiter-demo")?;
    let offer = engine.send_offer(
        &id,
        OfferRequest {
            offer_amount: 145_000,
            employment_type: EmploymentType::FullTime,
            document_url: "s3://hireflow/offers/demo.pdf".to_string(),
        },
        "recruiter-demo",
    )?;
    engine.accept_offer(&id, &offer.id, None, "seeker-demo")?;
    engine.mark_hired(&id, "recruiter-demo")?;

    // Give the detached scoring task a moment to land its write-back.
    for _ in 0..20 {
        use hireflow::pipeline::{PipelineError, PipelineStore};
        let scored = store
            .fetch_application(&id)
            .map_err(PipelineError::from)?
            .map(|record| record.score != SCORE_PENDING)
            .unwrap_or(false);
        if scored {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    Ok(id)
}

fn demo_submission() -> pipeline::ApplicationSubmission {
    pipeline::ApplicationSubmission {
        job: pipeline::JobPostingSnapshot {
            job_id: "job-demo".to_string(),
            company_id: "co-demo".to_string(),
            title: "Senior Backend Engineer".to_string(),
            description: "Design and run distributed billing services in Rust".to_string(),
            enabled_stages: vec![
                Stage::InReview,
                Stage::Shortlisted,
                Stage::Interview,
                Stage::TechnicalTask,
                Stage::Compensation,
                Stage::Offer,
            ],
        },
        seeker_id: "seeker-demo".to_string(),
        resume_url: "s3://hireflow/resumes/distributed-billing-rust-engineer.pdf".to_string(),
        resume_filename: "resume.pdf".to_string(),
        cover_letter: None,
    }
}

fn render_progress(progress: &view::HiringProgressView) {
    println!("Hiring pipeline demo");
    println!(
        "Application {} for {}",
        progress.application.id.0, progress.application.job.title
    );
    if progress.application.score == SCORE_PENDING {
        println!("Match score: calculating");
    } else {
        println!("Match score: {}", progress.application.score);
    }

    println!("\nStage rail");
    for stage in &progress.display_stages {
        let marker = if stage.current { ">" } else { " " };
        println!("{marker} {}", stage.label);
    }

    println!("\nInterviews: {}", progress.interviews.len());
    println!("Technical tasks: {}", progress.technical_tasks.len());
    println!("Offers: {}", progress.offer_documents.len());

    println!("\nActivity");
    for entry in &progress.activity {
        println!(
            "- [{}] {} by {}: {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.title,
            entry.performed_by,
            entry.description
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hireflow::pipeline::{PipelineStore, SubStage};

    #[tokio::test(flavor = "multi_thread")]
    async fn demo_walkthrough_reaches_hired() {
        let store = Arc::new(MemoryStore::new());
        let engine = PipelineEngine::new(store.clone(), Arc::new(LoggingSink));
        let scoring = ScoreAdapter::new(
            store.clone(),
            Arc::new(KeywordOracle),
            ScoringConfig::default(),
        );

        let id = drive_demo_application(&engine, &scoring, &store)
            .await
            .expect("walk-through completes");

        let record = store
            .fetch_application(&id)
            .expect("store reachable")
            .expect("application exists");
        assert_eq!(record.stage, Stage::Hired);
        assert_eq!(record.sub_stage, SubStage::Hired);

        let progress = view::progress_view(store.as_ref(), &id).expect("view assembles");
        assert_eq!(
            progress.display_stages.last().expect("rail not empty").label,
            "Hired"
        );
        assert!(!progress.activity.is_empty());
    }
}
