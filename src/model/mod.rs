//! Persisted records and value objects
//!
//! The field names and enum values defined here are the stored contract
//! for Namespace, Function and SourceCode records.

pub mod autoscaler;
pub mod function;
pub mod namespace;
pub mod status;

pub use autoscaler::{Autoscaler, AutoscalerInput, AutoscalingPolicy};
pub use function::{
    function_url, Environment, Function, FunctionDetails, FunctionSpec, SourceCode, Trigger,
};
pub use namespace::{Namespace, NamespaceSpec};
pub use status::{Outcome, Status, Step};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// The caller on whose behalf an operation runs. Resolved upstream;
/// the engine trusts it as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl CallerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }
}
