//! Namespace record - a tenant's isolated group of functions
//!
//! Each Namespace maps to one Kubernetes namespace named by its `idNamespace`
//! slug, and is reachable on a public host guarded by a generated API key.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{Status, Step};
use super::ValidationError;

/// Characters used for the random slug suffix
const SLUG_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz123456789";

/// Length of the random slug suffix
const SLUG_SUFFIX_LEN: usize = 8;

/// Separator between the lowercased name and the random suffix
const SLUG_SEPARATOR: &str = "00";

/// Kubernetes namespace names are DNS-1123 labels
const MAX_LABEL_LEN: usize = 63;

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

/// Payload for creating a namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSpec {
    pub name: String,
    pub id_cluster: String,
    pub host: String,
}

/// A stored Namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    /// Record id
    pub id: String,

    /// Kubernetes namespace name; globally unique and immutable
    pub id_namespace: String,

    pub name: String,

    /// Owner
    pub id_user: String,

    pub id_cluster: String,

    pub cluster_name: String,

    /// Public hostname functions are served on
    pub host: String,

    /// Secret checked by the ingress on every request
    pub api_key: String,

    pub status: Status,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl NamespaceSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let lowered = self.name.to_lowercase();
        let max_name_len = MAX_LABEL_LEN - SLUG_SEPARATOR.len() - SLUG_SUFFIX_LEN;

        if lowered.is_empty() || lowered.len() > max_name_len {
            return Err(ValidationError(format!(
                "namespace name must be 1-{} characters",
                max_name_len
            )));
        }
        if !is_dns_label(&lowered) {
            return Err(ValidationError(format!(
                "namespace name '{}' must contain only letters, digits and '-'",
                self.name
            )));
        }
        if self.id_cluster.trim().is_empty() {
            return Err(ValidationError("idCluster is required".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(ValidationError("host is required".to_string()));
        }
        Ok(())
    }
}

impl Namespace {
    /// Build a new record in the `CREATING/PENDING` state with a fresh
    /// slug and API key
    pub fn new(
        spec: &NamespaceSpec,
        id_user: impl Into<String>,
        id_cluster: impl Into<String>,
        cluster_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            id_namespace: namespace_slug(&spec.name, &random_suffix()),
            name: spec.name.clone(),
            id_user: id_user.into(),
            id_cluster: id_cluster.into(),
            cluster_name: cluster_name.into(),
            host: spec.host.trim().to_string(),
            api_key: Uuid::new_v4().to_string(),
            status: Status::pending(Step::Creating),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, id_user: &str) -> bool {
        self.id_user == id_user
    }
}

/// Build the cluster namespace name from a display name and a suffix
pub fn namespace_slug(name: &str, suffix: &str) -> String {
    format!("{}{}{}", name.to_lowercase(), SLUG_SEPARATOR, suffix)
}

/// Random lowercase suffix for namespace slugs
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SLUG_SUFFIX_LEN)
        .map(|_| SLUG_CHARSET[rng.gen_range(0..SLUG_CHARSET.len())] as char)
        .collect()
}

/// Check a string is a DNS-1123 label (lowercase alphanumerics and '-',
/// starting and ending with an alphanumeric)
pub fn is_dns_label(value: &str) -> bool {
    value.len() <= MAX_LABEL_LEN && DNS_LABEL.is_match(value)
}
