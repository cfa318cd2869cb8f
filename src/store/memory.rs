//! In-process [`LifecycleStore`] backed by concurrent maps

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{LifecycleStore, StoreError};
use crate::model::{Function, Namespace, SourceCode, Status};

#[derive(Clone, Default)]
pub struct MemoryStore {
    /// Namespaces by record id
    namespaces: Arc<DashMap<String, Namespace>>,

    /// Record id by `idNamespace` slug
    namespace_slugs: Arc<DashMap<String, String>>,

    /// Functions by record id
    functions: Arc<DashMap<String, Function>>,

    /// Function id by (namespace record id, function name)
    function_names: Arc<DashMap<(String, String), String>>,

    /// Source code by function id
    sources: Arc<DashMap<String, SourceCode>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first<T, F>(mut items: Vec<T>, created: F) -> Vec<T>
    where
        F: Fn(&T) -> chrono::DateTime<Utc>,
    {
        items.sort_by_key(|item| std::cmp::Reverse(created(item)));
        items
    }

    fn function_ids_in(&self, id_namespace: &str) -> Vec<String> {
        self.functions
            .iter()
            .filter(|f| f.id_namespace == id_namespace)
            .map(|f| f.id.clone())
            .collect()
    }
}

#[async_trait]
impl LifecycleStore for MemoryStore {
    async fn insert_namespace(&self, namespace: Namespace) -> Result<(), StoreError> {
        match self.namespace_slugs.entry(namespace.id_namespace.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "namespace '{}' already exists",
                namespace.id_namespace
            ))),
            Entry::Vacant(slot) => {
                slot.insert(namespace.id.clone());
                self.namespaces.insert(namespace.id.clone(), namespace);
                Ok(())
            }
        }
    }

    async fn get_namespace(&self, id: &str) -> Result<Namespace, StoreError> {
        self.namespaces
            .get(id)
            .map(|ns| ns.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("Namespace '{}'", id)))
    }

    async fn list_namespaces(&self, id_user: &str) -> Result<Vec<Namespace>, StoreError> {
        let owned = self
            .namespaces
            .iter()
            .filter(|ns| ns.id_user == id_user)
            .map(|ns| ns.value().clone())
            .collect();
        Ok(Self::newest_first(owned, |ns: &Namespace| ns.created_at))
    }

    async fn update_namespace_status(&self, id: &str, status: Status) -> Result<(), StoreError> {
        let mut ns = self
            .namespaces
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("Namespace '{}'", id)))?;
        ns.status = status;
        ns.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_namespace(&self, id: &str) -> Result<(), StoreError> {
        let (_, ns) = self
            .namespaces
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(format!("Namespace '{}'", id)))?;
        self.namespace_slugs.remove(&ns.id_namespace);
        Ok(())
    }

    async fn insert_function(&self, function: Function) -> Result<(), StoreError> {
        let key = (function.id_namespace.clone(), function.name.clone());
        match self.function_names.entry(key) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "function '{}' already exists in this namespace",
                function.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(function.id.clone());
                self.functions.insert(function.id.clone(), function);
                Ok(())
            }
        }
    }

    async fn get_function(&self, id: &str) -> Result<Function, StoreError> {
        self.functions
            .get(id)
            .map(|f| f.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("Function '{}'", id)))
    }

    async fn update_function(&self, function: Function) -> Result<(), StoreError> {
        let mut stored = self
            .functions
            .get_mut(&function.id)
            .ok_or_else(|| StoreError::NotFound(format!("Function '{}'", function.id)))?;
        if stored.name != function.name || stored.id_namespace != function.id_namespace {
            return Err(StoreError::Conflict(
                "function name and namespace are immutable".to_string(),
            ));
        }
        *stored = function;
        Ok(())
    }

    async fn update_function_status(&self, id: &str, status: Status) -> Result<(), StoreError> {
        let mut function = self
            .functions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("Function '{}'", id)))?;
        function.status = status;
        function.updated_at = Utc::now();
        Ok(())
    }

    async fn update_function_replicas(&self, id: &str, replicas: i32) -> Result<(), StoreError> {
        let mut function = self
            .functions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("Function '{}'", id)))?;
        function.replicas = replicas;
        function.updated_at = Utc::now();
        Ok(())
    }

    async fn find_functions_by_namespace(
        &self,
        id_namespace: &str,
    ) -> Result<Vec<Function>, StoreError> {
        let found = self
            .functions
            .iter()
            .filter(|f| f.id_namespace == id_namespace)
            .map(|f| f.value().clone())
            .collect();
        Ok(Self::newest_first(found, |f: &Function| f.created_at))
    }

    async fn set_functions_status_by_namespace(
        &self,
        id_namespace: &str,
        status: Status,
    ) -> Result<usize, StoreError> {
        let mut updated = 0;
        for mut function in self.functions.iter_mut() {
            if function.id_namespace == id_namespace {
                function.status = status.clone();
                function.updated_at = Utc::now();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_function(&self, id: &str) -> Result<(), StoreError> {
        let (_, function) = self
            .functions
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(format!("Function '{}'", id)))?;
        self.function_names
            .remove(&(function.id_namespace, function.name));
        Ok(())
    }

    async fn delete_functions_by_namespace(
        &self,
        id_namespace: &str,
    ) -> Result<usize, StoreError> {
        let ids = self.function_ids_in(id_namespace);
        let mut deleted = 0;
        for id in ids {
            if let Some((_, function)) = self.functions.remove(&id) {
                self.function_names
                    .remove(&(function.id_namespace, function.name));
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn upsert_source_code(&self, source: SourceCode) -> Result<SourceCode, StoreError> {
        let stored = match self.sources.entry(source.id_functions.clone()) {
            Entry::Occupied(mut existing) => {
                let record = existing.get_mut();
                record.source_code = source.source_code;
                record.dependencies = source.dependencies;
                record.environments = source.environments;
                record.updated_at = Utc::now();
                record.clone()
            }
            Entry::Vacant(slot) => slot.insert(source).clone(),
        };
        Ok(stored)
    }

    async fn get_source_code(&self, id_functions: &str) -> Result<Option<SourceCode>, StoreError> {
        Ok(self.sources.get(id_functions).map(|s| s.value().clone()))
    }

    async fn delete_source_code(&self, id_functions: &str) -> Result<(), StoreError> {
        self.sources.remove(id_functions);
        Ok(())
    }
}
