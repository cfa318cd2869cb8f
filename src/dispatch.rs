//! Deploy Dispatcher - hands function builds to the deploy worker
//!
//! The worker builds the image and creates the function's cluster objects
//! on its own schedule. The dispatcher only waits for the worker to accept
//! the request, never for the deployment to finish.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DispatcherConfig;
use crate::model::FunctionSpec;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Failed to contact deploy worker: {0}")]
    Transport(String),

    #[error("Deploy worker returned {0}: {1}")]
    Status(u16, String),

    #[error("Deploy worker rejected request: {0}")]
    Rejected(String),

    #[error("Failed to parse deploy worker response: {0}")]
    Decode(String),
}

/// Deployment request sent to the worker
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    #[serde(flatten)]
    pub function: FunctionSpec,
    /// Cluster namespace (`idNamespace`) to deploy into
    pub namespace: String,
    pub host: String,
    pub api_key: String,
    pub kube_config: String,
}

impl std::fmt::Debug for DeployRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployRequest")
            .field("function", &self.function.name)
            .field("namespace", &self.namespace)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Worker acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait DeployDispatcher: Send + Sync {
    /// Send the request and wait for the worker's acknowledgement
    async fn dispatch(&self, request: DeployRequest) -> Result<(), DispatchError>;
}

/// Dispatcher posting requests to the worker over HTTP
pub struct HttpDeployDispatcher {
    client: Client,
    url: String,
}

impl HttpDeployDispatcher {
    pub fn new(config: &DispatcherConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl DeployDispatcher for HttpDeployDispatcher {
    async fn dispatch(&self, request: DeployRequest) -> Result<(), DispatchError> {
        debug!(
            "Dispatching deploy of {} in {} to {}",
            request.function.name, request.namespace, self.url
        );

        let resp = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Deploy worker returned error {}: {}", status, body);
            return Err(DispatchError::Status(status.as_u16(), body));
        }

        let ack = resp
            .json::<DeployAck>()
            .await
            .map_err(|e| DispatchError::Decode(e.to_string()))?;

        if ack.success {
            Ok(())
        } else {
            Err(DispatchError::Rejected(
                ack.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}
