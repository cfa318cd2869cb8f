//! Engine-level errors and the kinds callers see

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::dispatch::DispatchError;
use crate::metrics::MetricsError;
use crate::model::ValidationError;
use crate::resolver::ResolverError;
use crate::store::StoreError;

/// Error classes reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ClusterUnreachable,
    ClusterTransient,
    Validation,
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code carried in command responses
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::ClusterUnreachable => 503,
            ErrorKind::ClusterTransient => 502,
            ErrorKind::Validation => 400,
            ErrorKind::Internal => 500,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid payload: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Cluster(e) => match e {
                ClusterError::Unreachable(_) => ErrorKind::ClusterUnreachable,
                ClusterError::NotFound(_) => ErrorKind::NotFound,
                ClusterError::AlreadyExists(_) => ErrorKind::Conflict,
                ClusterError::Transient(_) | ClusterError::LoadBalancerUnavailable(_) => {
                    ErrorKind::ClusterTransient
                }
            },
            EngineError::Store(e) => match e {
                StoreError::NotFound(_) => ErrorKind::NotFound,
                // persistence failures surface as conflicts
                StoreError::Conflict(_) | StoreError::Backend(_) => ErrorKind::Conflict,
            },
            EngineError::Resolver(e) => match e {
                ResolverError::UnknownCluster(_) => ErrorKind::NotFound,
                ResolverError::Credentials(_, _) => ErrorKind::ClusterUnreachable,
            },
            EngineError::Dispatch(_) | EngineError::Metrics(_) | EngineError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
