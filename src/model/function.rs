//! Function record - the deployable unit of user code
//!
//! A Function is stored in two parts: the [`Function`] record itself, read on
//! every status and list query, and its [`SourceCode`], kept separately so
//! large payloads stay out of those reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::autoscaler::{Autoscaler, AutoscalerInput};
use super::namespace::{is_dns_label, Namespace};
use super::status::{Status, Step};
use super::ValidationError;

/// How a function is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Http,
    Cron,
}

/// Environment variable injected into the function container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Payload for creating or updating a function
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    pub name: String,
    pub executed_name: String,
    pub runtime: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub crontab: Option<String>,
    pub memory: String,
    pub cpu: String,
    #[serde(default)]
    pub allocated: bool,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub autoscaler: AutoscalerInput,
    pub source_code: String,
    #[serde(default)]
    pub dependencies: Option<String>,
    #[serde(default)]
    pub environments: Vec<Environment>,
}

fn default_replicas() -> i32 {
    1
}

/// A stored Function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    pub id: String,
    /// Unique within the owning namespace
    pub name: String,
    /// Record id of the owning Namespace
    pub id_namespace: String,
    pub id_user: String,
    /// Entry point invoked by the runtime
    pub executed_name: String,
    pub url: String,
    pub runtime: String,
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crontab: Option<String>,
    pub memory: String,
    pub cpu: String,
    pub allocated: bool,
    /// Desired replicas while running; preserved across stop/start
    pub replicas: i32,
    pub autoscaler: Autoscaler,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Source payload for a function, 1:1 with [`Function`] by `idFunctions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCode {
    pub id: String,
    pub id_functions: String,
    pub source_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<String>,
    #[serde(default)]
    pub environments: Vec<Environment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A function together with its source, as returned by a single read
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDetails {
    #[serde(flatten)]
    pub function: Function,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceCode>,
}

impl FunctionSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_dns_label(&self.name) {
            return Err(ValidationError(format!(
                "function name '{}' must be a lowercase DNS label",
                self.name
            )));
        }
        for (field, value) in [
            ("executedName", &self.executed_name),
            ("runtime", &self.runtime),
            ("memory", &self.memory),
            ("cpu", &self.cpu),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError(format!("{} is required", field)));
            }
        }
        if self.replicas < 0 {
            return Err(ValidationError("replicas must not be negative".to_string()));
        }
        if self.trigger == Trigger::Cron
            && self.crontab.as_deref().map_or(true, |c| c.trim().is_empty())
        {
            return Err(ValidationError(
                "crontab is required for cron-triggered functions".to_string(),
            ));
        }
        Autoscaler::from(self.autoscaler.clone()).validate()
    }

    pub fn source_code(&self, id_functions: &str) -> SourceCode {
        SourceCode::new(
            id_functions,
            self.source_code.clone(),
            self.dependencies.clone(),
            self.environments.clone(),
        )
    }
}

impl Function {
    /// Build a new record in the `CREATING/PENDING` state
    pub fn new(spec: &FunctionSpec, namespace: &Namespace, id_user: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: spec.name.clone(),
            id_namespace: namespace.id.clone(),
            id_user: id_user.into(),
            executed_name: spec.executed_name.clone(),
            url: function_url(&namespace.host, &namespace.id_namespace, &spec.name),
            runtime: spec.runtime.clone(),
            trigger: spec.trigger,
            crontab: spec.crontab.clone(),
            memory: spec.memory.clone(),
            cpu: spec.cpu.clone(),
            allocated: spec.allocated,
            replicas: spec.replicas,
            autoscaler: Autoscaler::from(spec.autoscaler.clone()),
            status: Status::pending(Step::Creating),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update payload. The name and replica count are not
    /// changed here; scaling has its own operation.
    pub fn apply_update(&mut self, spec: &FunctionSpec) {
        self.executed_name = spec.executed_name.clone();
        self.runtime = spec.runtime.clone();
        self.trigger = spec.trigger;
        self.crontab = spec.crontab.clone();
        self.memory = spec.memory.clone();
        self.cpu = spec.cpu.clone();
        self.allocated = spec.allocated;
        self.autoscaler = Autoscaler::from(spec.autoscaler.clone());
        self.status = Status::pending(Step::Compile);
        self.updated_at = Utc::now();
    }
}

impl SourceCode {
    pub fn new(
        id_functions: impl Into<String>,
        source_code: String,
        dependencies: Option<String>,
        environments: Vec<Environment>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            id_functions: id_functions.into(),
            source_code,
            dependencies,
            environments,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Public URL of a function. Must be rebuilt by the caller if the
/// namespace host ever changes.
pub fn function_url(host: &str, id_namespace: &str, name: &str) -> String {
    format!("https://{}/{}/apis/{}", host, id_namespace, name)
}
