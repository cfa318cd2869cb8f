//! Lifecycle Store
//!
//! Durable record of Namespaces, Functions and SourceCode. Every write is a
//! single-record upsert or update; there are no multi-record transactions,
//! and concurrent writes to the same record are last-write-wins.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Function, Namespace, SourceCode, Status};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Persistence seam of the engine. [`MemoryStore`] keeps records only for
/// the life of the process; a real deployment must supply a persistent
/// implementation.
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    // ------------------------------------------------------------------
    // Namespaces
    // ------------------------------------------------------------------

    /// Insert a new namespace; a taken `idNamespace` is a conflict
    async fn insert_namespace(&self, namespace: Namespace) -> Result<(), StoreError>;

    async fn get_namespace(&self, id: &str) -> Result<Namespace, StoreError>;

    /// A user's namespaces, newest first
    async fn list_namespaces(&self, id_user: &str) -> Result<Vec<Namespace>, StoreError>;

    async fn update_namespace_status(&self, id: &str, status: Status) -> Result<(), StoreError>;

    async fn delete_namespace(&self, id: &str) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// Insert a new function; a taken `(name, idNamespace)` is a conflict
    async fn insert_function(&self, function: Function) -> Result<(), StoreError>;

    async fn get_function(&self, id: &str) -> Result<Function, StoreError>;

    /// Replace a stored function wholesale
    async fn update_function(&self, function: Function) -> Result<(), StoreError>;

    async fn update_function_status(&self, id: &str, status: Status) -> Result<(), StoreError>;

    async fn update_function_replicas(&self, id: &str, replicas: i32) -> Result<(), StoreError>;

    /// Functions of a namespace record, newest first
    async fn find_functions_by_namespace(
        &self,
        id_namespace: &str,
    ) -> Result<Vec<Function>, StoreError>;

    /// Set the status of every function in a namespace; returns how many
    async fn set_functions_status_by_namespace(
        &self,
        id_namespace: &str,
        status: Status,
    ) -> Result<usize, StoreError>;

    async fn delete_function(&self, id: &str) -> Result<(), StoreError>;

    /// Delete every function in a namespace; returns how many
    async fn delete_functions_by_namespace(&self, id_namespace: &str)
        -> Result<usize, StoreError>;

    // ------------------------------------------------------------------
    // Source code
    // ------------------------------------------------------------------

    /// Update the record for `source.id_functions` in place, or create it
    async fn upsert_source_code(&self, source: SourceCode) -> Result<SourceCode, StoreError>;

    async fn get_source_code(&self, id_functions: &str) -> Result<Option<SourceCode>, StoreError>;

    /// Remove a function's source; absent is fine
    async fn delete_source_code(&self, id_functions: &str) -> Result<(), StoreError>;
}
