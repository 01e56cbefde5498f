//! Per-step results of one reconciliation
//!
//! Handlers never let a backend failure escape a step. Each step records what
//! happened, and the aggregate [`EventOutcome`] is what gets logged and
//! emitted by the engine.

use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{info, warn};

use crate::error::Error;

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The backend was mutated
    Applied,
    /// The backend already held the desired state
    Unchanged,
    /// A precondition for the step was missing; nothing was attempted
    Skipped { reason: String },
    /// The backend call failed
    Failed { reason: String },
}

impl StepOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(err: &Error) -> Self {
        StepOutcome::Failed {
            reason: err.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Applied => f.write_str("applied"),
            StepOutcome::Unchanged => f.write_str("unchanged"),
            StepOutcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            StepOutcome::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

/// Step kinds a handler can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    LookupZone,
    ResolveInstance,
    DeriveHostname,
    UpsertForward,
    UpsertReverse,
    DeleteForward,
    DeleteReverse,
    DeleteFloatingRecords,
    PruneStale,
    TagInstance,
    IpamAssign,
    IpamUnassign,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::LookupZone => "lookup-zone",
            Step::ResolveInstance => "resolve-instance",
            Step::DeriveHostname => "derive-hostname",
            Step::UpsertForward => "upsert-forward",
            Step::UpsertReverse => "upsert-reverse",
            Step::DeleteForward => "delete-forward",
            Step::DeleteReverse => "delete-reverse",
            Step::DeleteFloatingRecords => "delete-floating-records",
            Step::PruneStale => "prune-stale",
            Step::TagInstance => "tag-instance",
            Step::IpamAssign => "ipam-assign",
            Step::IpamUnassign => "ipam-unassign",
        }
    }
}

/// Result of one step against one target (address, zone, instance)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: Step,
    pub target: String,
    pub outcome: StepOutcome,
}

/// Aggregated result of one notification for one handler
#[derive(Debug, Clone)]
pub struct EventOutcome {
    pub handler: &'static str,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
}

impl EventOutcome {
    pub fn new(handler: &'static str, event_type: impl Into<String>) -> Self {
        Self {
            handler,
            event_type: event_type.into(),
            processed_at: Utc::now(),
            steps: Vec::new(),
        }
    }

    /// Record a step; failures and skips are logged as they happen
    pub fn record(&mut self, step: Step, target: impl Into<String>, outcome: StepOutcome) {
        let target = target.into();
        match &outcome {
            StepOutcome::Failed { reason } => {
                warn!("[{}] {} {} failed: {}", self.handler, step.as_str(), target, reason)
            }
            StepOutcome::Skipped { reason } => {
                warn!("[{}] {} {} skipped: {}", self.handler, step.as_str(), target, reason)
            }
            StepOutcome::Applied => info!("[{}] {} {} applied", self.handler, step.as_str(), target),
            StepOutcome::Unchanged => {}
        }
        self.steps.push(StepReport {
            step,
            target,
            outcome,
        });
    }

    /// Record a step from a backend result
    pub fn record_result(
        &mut self,
        step: Step,
        target: impl Into<String>,
        result: &Result<StepOutcome, Error>,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome.clone(),
            Err(err) => StepOutcome::failed(err),
        };
        self.record(step, target, outcome);
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Applied))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Unchanged))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(StepOutcome::is_failure)
    }

    /// No step failed
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    /// Outcome of the first report for a step, if any
    pub fn outcome_of(&self, step: Step) -> Option<&StepOutcome> {
        self.steps.iter().find(|r| r.step == step).map(|r| &r.outcome)
    }

    fn count(&self, predicate: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} applied, {} unchanged, {} skipped, {} failed",
            self.handler,
            self.event_type,
            self.applied(),
            self.unchanged(),
            self.skipped(),
            self.failed()
        )
    }
}
