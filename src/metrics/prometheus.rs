//! HTTP client for the Prometheus range-query API behind a tenant ingress

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::{MetricsBackend, MetricsError, MetricsTarget, TimeWindow};
use crate::config::MetricsConfig;

pub struct PrometheusClient {
    client: Client,
    scheme: String,
    query_path: String,
    api_key_header: String,
}

impl PrometheusClient {
    pub fn new(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MetricsError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            scheme: config.scheme.clone(),
            query_path: config.query_path.clone(),
            api_key_header: config.api_key_header.clone(),
        })
    }

    pub fn query_url(&self, host: &str) -> String {
        format!("{}://{}{}", self.scheme, host, self.query_path)
    }
}

#[async_trait]
impl MetricsBackend for PrometheusClient {
    async fn query_range(
        &self,
        target: &MetricsTarget,
        promql: &str,
        window: &TimeWindow,
    ) -> Result<Value, MetricsError> {
        let url = self.query_url(&target.host);
        let params = [
            ("query", promql.to_string()),
            ("start", window.start.to_string()),
            ("end", window.end.to_string()),
            ("step", window.step.to_string()),
            ("kubernetes_namespace", target.namespace.clone()),
        ];

        let resp = self
            .client
            .get(&url)
            .header(self.api_key_header.as_str(), target.api_key.as_str())
            .query(&params)
            .send()
            .await
            .map_err(|e| MetricsError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(MetricsError::NotFound(url));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MetricsError::Http(status.as_u16(), body));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| MetricsError::Decode(e.to_string()))
    }
}
