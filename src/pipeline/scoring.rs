//! Best-effort resume scoring against an external oracle.
//!
//! Application creation commits with the pending sentinel and the oracle call
//! runs on a detached task: it never blocks or fails the caller. A failed or
//! timed-out call leaves the sentinel in place (rendered as an indefinite
//! "calculating" state) after a bounded retry.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ScoringConfig;

use super::domain::ApplicationId;
use super::repository::PipelineStore;

/// External scoring oracle: resume reference + job description in, 0..=100
/// out. Calls may block; the adapter isolates them on a blocking thread.
pub trait ScoringOracle: Send + Sync {
    fn score(&self, resume_url: &str, job_description: &str) -> Result<i16, ScoringError>;
}

/// Oracle call failure; observable only as the score staying at the pending
/// sentinel, never surfaced to the submission caller.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("scoring oracle unavailable: {0}")]
    Unavailable(String),
    #[error("scoring oracle returned {0}, outside 0..=100")]
    OutOfRange(i16),
}

/// Deterministic oracle used when no external scorer is configured: token
/// overlap between the resume reference and the job description.
#[derive(Debug, Default)]
pub struct KeywordOracle;

impl ScoringOracle for KeywordOracle {
    fn score(&self, resume_url: &str, job_description: &str) -> Result<i16, ScoringError> {
        fn tokens(text: &str) -> std::collections::HashSet<String> {
            text.split(|c: char| !c.is_alphanumeric())
                .filter(|token| token.len() > 2)
                .map(str::to_ascii_lowercase)
                .collect()
        }

        let resume = tokens(resume_url);
        let description = tokens(job_description);
        if description.is_empty() {
            return Ok(0);
        }
        let overlap = resume.intersection(&description).count();
        Ok(((overlap * 100 / description.len()).min(100)) as i16)
    }
}

/// Fire-and-forget adapter writing oracle results back through a dedicated
/// score mutation.
pub struct ScoreAdapter<S, O> {
    store: Arc<S>,
    oracle: Arc<O>,
    config: ScoringConfig,
}

impl<S, O> ScoreAdapter<S, O>
where
    S: PipelineStore + 'static,
    O: ScoringOracle + 'static,
{
    pub fn new(store: Arc<S>, oracle: Arc<O>, config: ScoringConfig) -> Self {
        Self {
            store,
            oracle,
            config,
        }
    }

    /// Dispatch a scoring run for the application and return immediately.
    /// Must be called from within a tokio runtime.
    pub fn request_score(&self, id: ApplicationId) {
        let store = self.store.clone();
        let oracle = self.oracle.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            match Self::score_with_retry(&store, &oracle, &config, &id).await {
                Ok(score) => {
                    if let Err(err) = store.set_score(&id, score) {
                        warn!(application_id = %id.0, error = %err, "score write-back failed");
                    } else {
                        info!(application_id = %id.0, score, "match score recorded");
                    }
                }
                Err(err) => {
                    warn!(application_id = %id.0, error = %err, "scoring degraded, score stays pending");
                }
            }
        });
    }

    async fn score_with_retry(
        store: &Arc<S>,
        oracle: &Arc<O>,
        config: &ScoringConfig,
        id: &ApplicationId,
    ) -> Result<i16, ScoringError> {
        let application = store
            .fetch_application(id)
            .map_err(|err| ScoringError::Unavailable(err.to_string()))?
            .ok_or_else(|| ScoringError::Unavailable("application missing".to_string()))?;
        let resume_url = application.resume_url;
        let job_description = application.job.description;

        let mut last_error = ScoringError::Unavailable("no attempts made".to_string());
        for attempt in 1..=config.attempts {
            let oracle = oracle.clone();
            let resume = resume_url.clone();
            let description = job_description.clone();

            let call =
                tokio::task::spawn_blocking(move || oracle.score(&resume, &description));
            let outcome = tokio::time::timeout(config.timeout, call).await;

            match outcome {
                Ok(Ok(Ok(score))) if (0..=100).contains(&score) => return Ok(score),
                Ok(Ok(Ok(score))) => last_error = ScoringError::OutOfRange(score),
                Ok(Ok(Err(err))) => last_error = err,
                Ok(Err(join_err)) => {
                    last_error = ScoringError::Unavailable(join_err.to_string())
                }
                // Timeout is treated identically to failure.
                Err(_) => {
                    last_error =
                        ScoringError::Unavailable(format!("timed out after {:?}", config.timeout))
                }
            }

            if attempt < config.attempts {
                tokio::time::sleep(config.backoff).await;
            }
        }
        Err(last_error)
    }
}
