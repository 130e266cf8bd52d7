use std::mem;

use thiserror::Error;
use tracing::debug;

use crate::connection::ConnectionHandle;
use crate::error::{ReadError, SubmissionError, ValidationError};
use crate::models::{Checkpoint, CheckpointDraft, TransactionResult};
use crate::submitter::SubmitOptions;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Review-then-submit lifecycle of one checkpoint.
///
/// ```text
/// Idle --stage--> PendingReview --confirm--> Confirmed --begin_submit--> Submitting --finish--> Done
///  ^                    |                        |                                               |
///  +------cancel--------+---------cancel---------+-------------------reset-----------------------+
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SubmissionFlow {
    #[default]
    Idle,
    PendingReview(CheckpointDraft),
    Confirmed(CheckpointDraft),
    Submitting(CheckpointDraft),
    Done {
        draft: CheckpointDraft,
        result: TransactionResult,
    },
}

impl SubmissionFlow {
    pub fn new() -> Self {
        Self::Idle
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            SubmissionFlow::Idle => "idle",
            SubmissionFlow::PendingReview(_) => "pending review",
            SubmissionFlow::Confirmed(_) => "confirmed",
            SubmissionFlow::Submitting(_) => "submitting",
            SubmissionFlow::Done { .. } => "done",
        }
    }

    pub fn draft(&self) -> Option<&CheckpointDraft> {
        match self {
            SubmissionFlow::Idle => None,
            SubmissionFlow::PendingReview(draft)
            | SubmissionFlow::Confirmed(draft)
            | SubmissionFlow::Submitting(draft)
            | SubmissionFlow::Done { draft, .. } => Some(draft),
        }
    }

    pub fn result(&self) -> Option<&TransactionResult> {
        match self {
            SubmissionFlow::Done { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Validates and holds a draft for review. Only valid from `Idle`.
    pub fn stage(&mut self, draft: CheckpointDraft) -> Result<(), FlowError> {
        if !matches!(self, SubmissionFlow::Idle) {
            return Err(FlowError::InvalidTransition {
                action: "stage",
                state: self.state_name(),
            });
        }
        let draft = draft.normalized()?;
        self.transition(SubmissionFlow::PendingReview(draft));
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), FlowError> {
        match mem::take(self) {
            SubmissionFlow::PendingReview(draft) => {
                self.transition(SubmissionFlow::Confirmed(draft));
                Ok(())
            }
            other => Err(self.reject("confirm", other)),
        }
    }

    pub fn cancel(&mut self) -> Result<(), FlowError> {
        match mem::take(self) {
            SubmissionFlow::PendingReview(_) | SubmissionFlow::Confirmed(_) => {
                self.transition(SubmissionFlow::Idle);
                Ok(())
            }
            other => Err(self.reject("cancel", other)),
        }
    }

    /// Moves to `Submitting` and hands out the draft to send.
    pub fn begin_submit(&mut self) -> Result<CheckpointDraft, FlowError> {
        match mem::take(self) {
            SubmissionFlow::Confirmed(draft) => {
                self.transition(SubmissionFlow::Submitting(draft.clone()));
                Ok(draft)
            }
            other => Err(self.reject("submit", other)),
        }
    }

    pub fn finish(&mut self, result: TransactionResult) -> Result<(), FlowError> {
        match mem::take(self) {
            SubmissionFlow::Submitting(draft) => {
                self.transition(SubmissionFlow::Done { draft, result });
                Ok(())
            }
            other => Err(self.reject("finish", other)),
        }
    }

    pub fn reset(&mut self) -> Result<(), FlowError> {
        match mem::take(self) {
            SubmissionFlow::Done { .. } => {
                self.transition(SubmissionFlow::Idle);
                Ok(())
            }
            other => Err(self.reject("reset", other)),
        }
    }

    /// Submits a confirmed draft and records the outcome, success or not.
    pub async fn run(
        &mut self,
        handle: &ConnectionHandle,
        options: &SubmitOptions,
    ) -> Result<&TransactionResult, FlowError> {
        let draft = self.begin_submit()?;
        let result = match handle.submit(&draft, options).await {
            Ok(result) => result,
            Err(err) => failure_result(&err),
        };
        self.finish(result)?;

        self.result().ok_or(FlowError::InvalidTransition {
            action: "read the result",
            state: "not done",
        })
    }

    fn transition(&mut self, next: SubmissionFlow) {
        debug!(from = self.state_name(), to = next.state_name(), "submission flow");
        *self = next;
    }

    // Restores the state taken out by a rejected transition.
    fn reject(&mut self, action: &'static str, previous: SubmissionFlow) -> FlowError {
        let state = previous.state_name();
        *self = previous;
        FlowError::InvalidTransition { action, state }
    }
}

/// A failed submission as a result value, keeping any transaction hash.
pub fn failure_result(err: &SubmissionError) -> TransactionResult {
    match err.result() {
        Some(result) => result.clone(),
        None => TransactionResult {
            success: false,
            message: format!("Transaction error: {}", err),
            tx_hash: None,
            block_number: None,
            gas_used: None,
            gas_limit: Default::default(),
            gas_price_gwei: String::new(),
            events: Vec::new(),
        },
    }
}

/// Whether `draft` repeats `latest` (same location and status, ignoring case).
pub fn is_duplicate_of(draft: &CheckpointDraft, latest: &Checkpoint) -> bool {
    draft.location.trim().eq_ignore_ascii_case(latest.location.trim())
        && draft.status.trim().eq_ignore_ascii_case(latest.status.trim())
}

impl ConnectionHandle {
    /// The shipment's latest checkpoint when `draft` would repeat it.
    pub async fn find_duplicate(
        &self,
        draft: &CheckpointDraft,
    ) -> Result<Option<Checkpoint>, ReadError> {
        let draft = draft.normalized()?;
        match self.latest_checkpoint(&draft.shipment_id).await {
            Ok(latest) if is_duplicate_of(&draft, &latest) => Ok(Some(latest)),
            Ok(_) | Err(ReadError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
