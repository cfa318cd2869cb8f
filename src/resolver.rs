//! Cluster Config Resolver
//!
//! Maps a caller and a cluster id to the credentials needed to reach that
//! cluster. Credential storage lives elsewhere; [`StaticClusterResolver`]
//! serves the clusters listed in the configuration file.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::cluster::ClusterCredentials;
use crate::config::ClusterEntry;
use crate::model::CallerIdentity;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Cluster '{0}' not found")]
    UnknownCluster(String),

    #[error("Failed to load credentials for cluster '{0}': {1}")]
    Credentials(String, String),
}

/// Credentials plus identity of a resolved cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCluster {
    pub credentials: ClusterCredentials,
    pub id_cluster: String,
    pub cluster_name: String,
}

#[async_trait]
pub trait ClusterConfigResolver: Send + Sync {
    /// Fails with [`ResolverError::UnknownCluster`] when the cluster does
    /// not exist or is not available to the caller's tenant
    async fn resolve(
        &self,
        caller: &CallerIdentity,
        id_cluster: &str,
    ) -> Result<ResolvedCluster, ResolverError>;
}

/// Resolver over a fixed cluster list
pub struct StaticClusterResolver {
    clusters: HashMap<String, ClusterEntry>,
}

impl StaticClusterResolver {
    pub fn new(entries: Vec<ClusterEntry>) -> Self {
        Self {
            clusters: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    async fn load_kubeconfig(entry: &ClusterEntry) -> Result<String, ResolverError> {
        if let Some(inline) = &entry.kubeconfig {
            return Ok(inline.clone());
        }
        let raw_path = entry.kubeconfig_path.as_deref().ok_or_else(|| {
            ResolverError::Credentials(entry.id.clone(), "no kubeconfig configured".to_string())
        })?;
        let path = shellexpand::full(raw_path)
            .map_err(|e| ResolverError::Credentials(entry.id.clone(), e.to_string()))?;
        tokio::fs::read_to_string(&*path)
            .await
            .map_err(|e| ResolverError::Credentials(entry.id.clone(), format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl ClusterConfigResolver for StaticClusterResolver {
    async fn resolve(
        &self,
        caller: &CallerIdentity,
        id_cluster: &str,
    ) -> Result<ResolvedCluster, ResolverError> {
        let entry = self
            .clusters
            .get(id_cluster)
            .filter(|e| e.allows(&caller.id))
            .ok_or_else(|| ResolverError::UnknownCluster(id_cluster.to_string()))?;

        debug!("Resolved cluster {} for user {}", entry.name, caller.id);

        Ok(ResolvedCluster {
            credentials: ClusterCredentials::new(Self::load_kubeconfig(entry).await?),
            id_cluster: entry.id.clone(),
            cluster_name: entry.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn entry(id: &str, tenants: &[&str]) -> ClusterEntry {
        ClusterEntry {
            id: id.to_string(),
            name: format!("{}-name", id),
            kubeconfig: Some(format!("kubeconfig-for-{}", id)),
            kubeconfig_path: None,
            tenants: tenants.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_resolve_inline() {
        let resolver = StaticClusterResolver::new(vec![entry("c1", &[])]);
        let resolved = resolver
            .resolve(&CallerIdentity::new("anyone"), "c1")
            .await
            .unwrap();
        assert_eq!(resolved.cluster_name, "c1-name");
        assert_eq!(resolved.credentials.kubeconfig, "kubeconfig-for-c1");
    }

    #[tokio::test]
    async fn test_unknown_cluster() {
        let resolver = StaticClusterResolver::new(vec![entry("c1", &[])]);
        let err = resolver
            .resolve(&CallerIdentity::new("u"), "missing")
            .await
            .unwrap_err();
        assert_eq!(err, ResolverError::UnknownCluster("missing".to_string()));
    }

    #[tokio::test]
    async fn test_other_tenant_sees_unknown_cluster() {
        let resolver = StaticClusterResolver::new(vec![entry("c1", &["owner"])]);
        assert!(resolver
            .resolve(&CallerIdentity::new("owner"), "c1")
            .await
            .is_ok());
        assert!(matches!(
            resolver.resolve(&CallerIdentity::new("intruder"), "c1").await,
            Err(ResolverError::UnknownCluster(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"apiVersion: v1\n").unwrap();

        let mut from_file = entry("c2", &[]);
        from_file.kubeconfig = None;
        from_file.kubeconfig_path = Some(file.path().display().to_string());

        let mut broken = entry("c3", &[]);
        broken.kubeconfig = None;
        broken.kubeconfig_path = Some("/nonexistent/kubeconfig".to_string());

        let resolver = StaticClusterResolver::new(vec![from_file, broken]);
        let resolved = resolver
            .resolve(&CallerIdentity::new("u"), "c2")
            .await
            .unwrap();
        assert_eq!(resolved.credentials.kubeconfig, "apiVersion: v1\n");

        assert!(matches!(
            resolver.resolve(&CallerIdentity::new("u"), "c3").await,
            Err(ResolverError::Credentials(_, _))
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_file_reads_do_not_block_other_tasks() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"apiVersion: v1\n").unwrap();

        let mut from_file = entry("c2", &[]);
        from_file.kubeconfig = None;
        from_file.kubeconfig_path = Some(file.path().display().to_string());
        let resolver = StaticClusterResolver::new(vec![from_file]);

        let caller = CallerIdentity::new("u");
        let resolves = (0..8).map(|_| resolver.resolve(&caller, "c2"));
        let results = futures::future::join_all(resolves).await;

        assert_eq!(results.len(), 8);
        for result in results {
            assert_eq!(result.unwrap().credentials.kubeconfig, "apiVersion: v1\n");
        }
    }
}
