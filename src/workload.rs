//! Driver workload snapshots and supporting resources
//!
//! [`DriverSpec`] is the evolving description of the driver Pod. Every
//! pipeline stage layers a new immutable snapshot on top of the previous one
//! through the `with_*` constructors; nothing is mutated in place. The final
//! snapshot is turned into a [`Pod`] by [`DriverSpec::finalize`].

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, Container, EmptyDirVolumeSource, EnvVar, Pod, PodSpec, ResourceRequirements,
    Secret, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::{Error, Result, DOWNLOAD_VOLUME_NAME, DRIVER_CONTAINER_NAME};

/// Immutable snapshot of the driver Pod under assembly
#[derive(Clone, Debug)]
pub struct DriverSpec {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    image: String,
    memory_request_mb: u64,
    memory_limit_mb: u64,
    env: Vec<EnvVar>,
    volumes: Vec<Volume>,
    driver_mounts: Vec<VolumeMount>,
    init_containers: Vec<Container>,
}

impl DriverSpec {
    /// Create the base snapshot: identity, image, and memory sizing
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        image: impl Into<String>,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
        memory_request_mb: u64,
        memory_limit_mb: u64,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels,
            annotations,
            image: image.into(),
            memory_request_mb,
            memory_limit_mb,
            env: Vec::new(),
            volumes: Vec::new(),
            driver_mounts: Vec::new(),
            init_containers: Vec::new(),
        }
    }

    /// Environment variables applied so far
    pub fn env(&self) -> &[EnvVar] {
        &self.env
    }

    /// Add one driver environment variable.
    ///
    /// Each name may be applied exactly once across the whole pipeline;
    /// re-declaring a name is a defect in the calling stage.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        assert!(
            !self.env.iter().any(|e| e.name == name),
            "driver env var '{}' declared twice",
            name
        );
        self.env.push(EnvVar {
            name,
            value: Some(value.into()),
            ..Default::default()
        });
        self
    }

    /// Add a Pod volume
    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Mount a volume on the driver container
    pub fn with_driver_mount(mut self, mount: VolumeMount) -> Self {
        self.driver_mounts.push(mount);
        self
    }

    /// Append an init container; init containers run in insertion order
    pub fn with_init_container(mut self, container: Container) -> Self {
        self.init_containers.push(container);
        self
    }

    /// Ensure the shared dependency download volume exists on the Pod and is
    /// mounted on the driver at the given directory. Both fetch phases call
    /// this; the second call is a no-op.
    pub fn with_download_volume(self, mount_dir: &str) -> Self {
        if self.volumes.iter().any(|v| v.name == DOWNLOAD_VOLUME_NAME) {
            return self;
        }
        self.with_volume(Volume {
            name: DOWNLOAD_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        })
        .with_driver_mount(VolumeMount {
            name: DOWNLOAD_VOLUME_NAME.to_string(),
            mount_path: mount_dir.to_string(),
            ..Default::default()
        })
    }

    /// Produce the Pod submitted to the cluster API
    pub fn finalize(self) -> Pod {
        let quantity = |mb: u64| Quantity(format!("{}Mi", mb));
        let mut requests = BTreeMap::new();
        requests.insert("memory".to_string(), quantity(self.memory_request_mb));
        let mut limits = BTreeMap::new();
        limits.insert("memory".to_string(), quantity(self.memory_limit_mb));

        let driver = Container {
            name: DRIVER_CONTAINER_NAME.to_string(),
            image: Some(self.image),
            env: if self.env.is_empty() {
                None
            } else {
                Some(self.env)
            },
            volume_mounts: if self.driver_mounts.is_empty() {
                None
            } else {
                Some(self.driver_mounts)
            },
            resources: Some(ResourceRequirements {
                requests: Some(requests),
                limits: Some(limits),
                ..Default::default()
            }),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                labels: Some(self.labels),
                annotations: if self.annotations.is_empty() {
                    None
                } else {
                    Some(self.annotations)
                },
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![driver],
                init_containers: if self.init_containers.is_empty() {
                    None
                } else {
                    Some(self.init_containers)
                },
                volumes: if self.volumes.is_empty() {
                    None
                } else {
                    Some(self.volumes)
                },
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

// =============================================================================
// Supporting Resources
// =============================================================================

/// A secondary cluster object carrying data for an init phase or the driver.
///
/// Supporting resources gain a controller owner reference only after the
/// driver Pod exists, so the cluster garbage collector deletes them whenever
/// the driver is deleted.
#[derive(Clone, Debug)]
pub enum SupportingResource {
    /// Secret-typed supporting resource (credentials, staging tickets)
    Secret(Secret),
    /// ConfigMap-typed supporting resource (fetch instructions)
    ConfigMap(ConfigMap),
}

impl SupportingResource {
    /// Resource name
    pub fn name(&self) -> &str {
        let name = match self {
            Self::Secret(s) => s.metadata.name.as_deref(),
            Self::ConfigMap(c) => c.metadata.name.as_deref(),
        };
        name.unwrap_or("")
    }

    /// Return a copy owned by the given driver identity
    pub fn with_owner(self, identity: &DriverIdentity) -> Self {
        let owner = identity.owner_reference();
        match self {
            Self::Secret(mut s) => {
                s.metadata.owner_references = Some(vec![owner]);
                Self::Secret(s)
            }
            Self::ConfigMap(mut c) => {
                c.metadata.owner_references = Some(vec![owner]);
                Self::ConfigMap(c)
            }
        }
    }
}

/// The concrete identity of the created driver Pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverIdentity {
    /// Pod name
    pub name: String,
    /// Server-assigned unique id
    pub uid: String,
    /// API version of the Pod resource
    pub api_version: String,
    /// Kind of the resource
    pub kind: String,
}

impl DriverIdentity {
    /// Extract the identity from a Pod returned by the cluster API
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::invariant("created driver Pod has no name"))?;
        let uid = pod
            .metadata
            .uid
            .clone()
            .ok_or_else(|| Error::invariant("created driver Pod has no uid"))?;
        Ok(Self {
            name,
            uid,
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
        })
    }

    /// Controller owner reference pointing at this driver
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            ..Default::default()
        }
    }
}
