//! Static stage/sub-stage registry for the hiring pipeline.
//!
//! Pure data and lookups, no state: the engine validates every transition
//! against these tables, and each job posting narrows the traversal to an
//! ordered `enabled` subset of [`Stage::ordered`].

use serde::{Deserialize, Serialize};

/// Persisted pipeline stages, in canonical pipeline order.
///
/// The UI-facing "Applied" pseudo-stage is intentionally absent: the view
/// layer prepends it for display and the engine never sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InReview,
    Shortlisted,
    Interview,
    TechnicalTask,
    Compensation,
    Offer,
    Hired,
    Rejected,
}

impl Stage {
    pub const fn ordered() -> [Self; 8] {
        [
            Self::InReview,
            Self::Shortlisted,
            Self::Interview,
            Self::TechnicalTask,
            Self::Compensation,
            Self::Offer,
            Self::Hired,
            Self::Rejected,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::InReview => "In Review",
            Self::Shortlisted => "Shortlisted",
            Self::Interview => "Interview",
            Self::TechnicalTask => "Technical Task",
            Self::Compensation => "Compensation",
            Self::Offer => "Offer",
            Self::Hired => "Hired",
            Self::Rejected => "Rejected",
        }
    }

    /// Hired and Rejected close the pipeline; nothing mutates past them.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Hired | Self::Rejected)
    }

    /// Position in the canonical order, used for forward-only checks.
    pub fn index(self) -> usize {
        Self::ordered()
            .iter()
            .position(|stage| *stage == self)
            .unwrap_or(usize::MAX)
    }

    /// Ordered sub-stages for this stage; the first entry is the default
    /// assigned when an application enters the stage.
    pub const fn sub_stages(self) -> &'static [SubStage] {
        match self {
            Self::InReview => &[
                SubStage::ProfileReview,
                SubStage::SkillsReview,
                SubStage::PendingDecision,
            ],
            Self::Shortlisted => &[
                SubStage::Contacted,
                SubStage::AwaitingResponse,
                SubStage::Responded,
            ],
            Self::Interview => &[
                SubStage::NotScheduled,
                SubStage::Scheduled,
                SubStage::EvaluationPending,
                SubStage::Evaluated,
            ],
            Self::TechnicalTask => &[
                SubStage::NotAssigned,
                SubStage::Assigned,
                SubStage::Submitted,
                SubStage::UnderReview,
                SubStage::Completed,
            ],
            Self::Compensation => &[
                SubStage::NotInitiated,
                SubStage::Negotiation,
                SubStage::Approved,
            ],
            Self::Offer => &[
                SubStage::NotSent,
                SubStage::Sent,
                SubStage::Accepted,
                SubStage::Declined,
            ],
            Self::Hired => &[SubStage::Hired],
            Self::Rejected => &[SubStage::Rejected],
        }
    }

    /// Default sub-stage on entry to this stage.
    pub const fn entry_sub_stage(self) -> SubStage {
        self.sub_stages()[0]
    }
}

/// Sub-stages across all stages; meaning is scoped to the owning stage and
/// validated via [`is_valid_sub_stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStage {
    // InReview
    ProfileReview,
    SkillsReview,
    PendingDecision,
    // Shortlisted
    Contacted,
    AwaitingResponse,
    Responded,
    // Interview
    NotScheduled,
    Scheduled,
    EvaluationPending,
    Evaluated,
    // TechnicalTask
    NotAssigned,
    Assigned,
    Submitted,
    UnderReview,
    Completed,
    // Compensation
    NotInitiated,
    Negotiation,
    Approved,
    // Offer
    NotSent,
    Sent,
    Accepted,
    Declined,
    // Terminal stages
    Hired,
    Rejected,
}

impl SubStage {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ProfileReview => "Profile Review",
            Self::SkillsReview => "Skills Review",
            Self::PendingDecision => "Pending Decision",
            Self::Contacted => "Contacted",
            Self::AwaitingResponse => "Awaiting Response",
            Self::Responded => "Responded",
            Self::NotScheduled => "Not Scheduled",
            Self::Scheduled => "Scheduled",
            Self::EvaluationPending => "Evaluation Pending",
            Self::Evaluated => "Evaluated",
            Self::NotAssigned => "Not Assigned",
            Self::Assigned => "Assigned",
            Self::Submitted => "Submitted",
            Self::UnderReview => "Under Review",
            Self::Completed => "Completed",
            Self::NotInitiated => "Not Initiated",
            Self::Negotiation => "Negotiation",
            Self::Approved => "Approved",
            Self::NotSent => "Not Sent",
            Self::Sent => "Sent",
            Self::Accepted => "Accepted",
            Self::Declined => "Declined",
            Self::Hired => "Hired",
            Self::Rejected => "Rejected",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::fmt::Display for SubStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Registry containment check backing the `(stage, sub_stage)` invariant.
pub fn is_valid_sub_stage(stage: Stage, sub_stage: SubStage) -> bool {
    stage.sub_stages().contains(&sub_stage)
}

/// The immediate next enabled stage after `current` in the job posting's
/// ordered enabled list. Returns `None` for terminal stages, when `current`
/// is absent from the list, or when the list is empty (an empty list means
/// no advancement is allowed).
pub fn next_stage(enabled: &[Stage], current: Stage) -> Option<Stage> {
    if current.is_terminal() {
        return None;
    }
    let position = enabled.iter().position(|stage| *stage == current)?;
    enabled.get(position + 1).copied()
}
