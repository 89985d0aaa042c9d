//! Applicant tracking pipeline for a job portal: a stage/sub-stage state
//! machine over hiring applications, with side-collections (interviews,
//! technical tasks, compensation, offers), an append-only activity log,
//! a best-effort resume scoring adapter, and a read-side progress view.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod telemetry;
