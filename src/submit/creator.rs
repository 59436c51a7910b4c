//! Cluster resource creation
//!
//! A two-state protocol: create the driver Pod first, then stamp every
//! supporting resource with a controller owner reference pointing at it and
//! persist them as one batch. If the batch fails for any reason the driver is
//! deleted (best effort) and the original error is re-raised unchanged, so a
//! failed attempt leaves zero resources behind. Nothing is retried here: the
//! caller re-invokes the whole pipeline, which generates a fresh identity.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

use crate::workload::{DriverIdentity, SupportingResource};
use crate::{Error, Result};

/// Capability trait for the cluster API operations the pipeline consumes.
///
/// Each call is synchronous from the pipeline's perspective and individually
/// atomic, but calls are not transactional across each other.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create the driver Pod and return it with its server-assigned identity
    async fn create_driver(&self, pod: Pod) -> Result<Pod>;

    /// Delete the driver Pod by name
    async fn delete_driver(&self, name: &str) -> Result<()>;

    /// Create or replace a batch of supporting resources
    async fn create_or_replace(&self, resources: Vec<SupportingResource>) -> Result<()>;
}

/// Real cluster API backed by a kube client scoped to one namespace
pub struct KubeClusterApi {
    pods: Api<Pod>,
    secrets: Api<Secret>,
    config_maps: Api<ConfigMap>,
}

impl KubeClusterApi {
    /// Create an API handle for the given namespace
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client.clone(), namespace),
            secrets: Api::namespaced(client.clone(), namespace),
            config_maps: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn create_driver(&self, pod: Pod) -> Result<Pod> {
        Ok(self.pods.create(&PostParams::default(), &pod).await?)
    }

    async fn delete_driver(&self, name: &str) -> Result<()> {
        self.pods.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_or_replace(&self, resources: Vec<SupportingResource>) -> Result<()> {
        for resource in resources {
            match resource {
                SupportingResource::Secret(secret) => {
                    create_or_patch(&self.secrets, secret).await?;
                }
                SupportingResource::ConfigMap(config_map) => {
                    create_or_patch(&self.config_maps, config_map).await?;
                }
            }
        }
        Ok(())
    }
}

/// Create the resource, falling back to a merge patch when it already exists
async fn create_or_patch<K>(api: &Api<K>, resource: K) -> Result<()>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::Serialize
        + serde::de::DeserializeOwned,
    K::DynamicType: Default,
{
    let name = resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::invariant("supporting resource has no name"))?;
    match api.create(&PostParams::default(), &resource).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            api.patch(
                &name,
                &PatchParams::apply("slipway"),
                &Patch::Merge(&resource),
            )
            .await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs the create-then-attach protocol for one submission attempt
pub struct DriverResourceCreator<'a, A: ClusterApi + ?Sized> {
    api: &'a A,
}

impl<'a, A: ClusterApi + ?Sized> DriverResourceCreator<'a, A> {
    /// Create a creator bound to a cluster API handle
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Create the driver, then persist its owned supporting resources.
    ///
    /// Ordering is strict: no supporting resource gains an owner reference or
    /// is persisted before the driver exists. On failure after the driver was
    /// created, the driver is deleted and the original error is returned.
    pub async fn create(
        &self,
        pod: Pod,
        attachments: Vec<SupportingResource>,
    ) -> Result<DriverIdentity> {
        let created = self.api.create_driver(pod).await?;
        let identity = DriverIdentity::from_pod(&created)?;
        info!(driver = %identity.name, uid = %identity.uid, "Driver created");

        let owned: Vec<SupportingResource> = attachments
            .into_iter()
            .map(|r| r.with_owner(&identity))
            .collect();
        if let Err(err) = self.api.create_or_replace(owned).await {
            warn!(driver = %identity.name, error = %err, "Attaching supporting resources failed, rolling back driver");
            if let Err(delete_err) = self.api.delete_driver(&identity.name).await {
                warn!(driver = %identity.name, error = %delete_err, "Compensating driver delete failed");
            }
            return Err(err);
        }
        Ok(identity)
    }
}
