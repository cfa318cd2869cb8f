//! Life-cycle status shared by Namespace and Function records
//!
//! A status is a `(step, outcome, message)` triple. The string values of
//! [`Step`] and [`Outcome`] are persisted, so renaming a variant breaks
//! already-stored records.

use serde::{Deserialize, Serialize};

/// Life-cycle phase of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Creating,
    Compile,
    Deployed,
    Removing,
    Stop,
}

/// Outcome of the current phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pending,
    Succeeded,
    Failed,
    Stop,
}

/// Status of a Namespace or Function
///
/// `message` is only ever non-empty when `status` is [`Outcome::Failed`].
/// The constructors enforce this, and deserialization drops any message
/// stored alongside a non-failed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredStatus")]
pub struct Status {
    step: Step,
    status: Outcome,
    message: String,
}

#[derive(Deserialize)]
struct StoredStatus {
    step: Step,
    status: Outcome,
    #[serde(default)]
    message: Option<String>,
}

impl From<StoredStatus> for Status {
    fn from(stored: StoredStatus) -> Self {
        match stored.status {
            Outcome::Failed => Status::failed(stored.step, stored.message.unwrap_or_default()),
            outcome => Status::new(stored.step, outcome),
        }
    }
}

impl Status {
    /// Create a non-failed status. Passing [`Outcome::Failed`] yields a
    /// failure with an empty message; use [`Status::failed`] to attach one.
    pub fn new(step: Step, status: Outcome) -> Self {
        Self {
            step,
            status,
            message: String::new(),
        }
    }

    /// Intent status recorded before a pipeline starts
    pub fn pending(step: Step) -> Self {
        Self::new(step, Outcome::Pending)
    }

    pub fn succeeded(step: Step) -> Self {
        Self::new(step, Outcome::Succeeded)
    }

    pub fn failed(step: Step, message: impl Into<String>) -> Self {
        Self {
            step,
            status: Outcome::Failed,
            message: message.into(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn outcome(&self) -> Outcome {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_failed(&self) -> bool {
        self.status == Outcome::Failed
    }

    pub fn is_pending(&self) -> bool {
        self.status == Outcome::Pending
    }
}
