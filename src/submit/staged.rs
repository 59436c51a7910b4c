//! Staged-dependency management
//!
//! Active only when a staging endpoint is configured. Locally-resident
//! dependency bundles are uploaded to the staging endpoint, and a
//! `staged-fetch` init container re-fetches them inside the workload before
//! the driver starts. Uploads are synchronous, never retried, and never
//! deduplicated: every invocation re-uploads and mints fresh tickets.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, Secret, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::info;

use crate::config::{keys, SubmissionConfig};
use crate::locator::{Locator, LocatorKind};
use crate::workload::{DriverSpec, SupportingResource};
use crate::{
    Error, Result, DOWNLOADS_MOUNT_DIR, FETCH_CONFIG_MOUNT_DIR, FILES_DOWNLOAD_DIR,
    JARS_DOWNLOAD_DIR, STAGING_SECRET_MOUNT_DIR,
};

const STAGED_FETCH_CONTAINER_NAME: &str = "staged-fetch";
const STAGED_FETCH_CONFIG_VOLUME: &str = "staged-fetch-config";
const STAGING_SECRET_VOLUME: &str = "staging-secret";
const FETCH_PROPERTIES_FILE: &str = "fetch.properties";

/// Secret key carrying the jars bundle ticket secret
pub const STAGED_JARS_SECRET_KEY: &str = "staged-jars-secret";
/// Secret key carrying the files bundle ticket secret
pub const STAGED_FILES_SECRET_KEY: &str = "staged-files-secret";

/// Which dependency bundle an upload carries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BundleKind {
    /// Jar dependencies
    Jars,
    /// File dependencies
    Files,
}

impl BundleKind {
    /// Wire name of the bundle kind
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jars => "jars",
            Self::Files => "files",
        }
    }
}

/// Identifier and secret minted by the staging endpoint for one uploaded
/// bundle. Short-lived: never reused across submission attempts.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StagingTicket {
    /// Identifier of the uploaded bundle
    pub resource_id: String,
    /// Secret required to fetch the bundle back
    pub resource_secret: String,
}

/// Capability trait for the staging endpoint's upload contract
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StagingClient: Send + Sync {
    /// Upload one bundle and return its ticket.
    ///
    /// One synchronous call per bundle; transport failures surface unchanged
    /// and are never retried here. Not idempotent.
    async fn upload(&self, kind: BundleKind, paths: &[PathBuf]) -> Result<StagingTicket>;
}

/// Staging client speaking the endpoint's HTTP multipart contract
pub struct HttpStagingClient {
    base_uri: String,
    http: reqwest::Client,
}

impl HttpStagingClient {
    /// Create a client for the given staging endpoint URI
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl StagingClient for HttpStagingClient {
    async fn upload(&self, kind: BundleKind, paths: &[PathBuf]) -> Result<StagingTicket> {
        let url = format!(
            "{}/api/v0/resources",
            self.base_uri.trim_end_matches('/')
        );
        let mut form = reqwest::multipart::Form::new().text("kind", kind.as_str());
        for path in paths {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                Error::staging(format!("failed to read '{}': {}", path.display(), e))
            })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "bundle".to_string());
            form = form.part(
                "resource",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        }

        info!(kind = kind.as_str(), files = paths.len(), url = %url, "Uploading bundle to staging endpoint");
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::staging(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::staging(format!(
                "upload rejected: {} - {}",
                status, body
            )));
        }
        response
            .json::<StagingTicket>()
            .await
            .map_err(|e| Error::staging(format!("malformed ticket response: {}", e)))
    }
}

/// Coordinates upload, resolution, and fetch-phase bootstrap for one
/// submission's locally-resident dependencies
pub struct StagedDependencyManager<'a, S: StagingClient + ?Sized> {
    app_id: &'a str,
    namespace: &'a str,
    staging_uri: &'a str,
    init_image: &'a str,
    jars: &'a [Locator],
    files: &'a [Locator],
    client: &'a S,
}

impl<'a, S: StagingClient + ?Sized> StagedDependencyManager<'a, S> {
    /// Create a manager scoped to one submission attempt
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        app_id: &'a str,
        namespace: &'a str,
        staging_uri: &'a str,
        init_image: &'a str,
        jars: &'a [Locator],
        files: &'a [Locator],
        client: &'a S,
    ) -> Self {
        Self {
            app_id,
            namespace,
            staging_uri,
            init_image,
            jars,
            files,
            client,
        }
    }

    fn submitter_paths(locators: &[Locator]) -> Vec<PathBuf> {
        locators
            .iter()
            .filter_map(Locator::submitter_path)
            .collect()
    }

    /// Upload the jar bundle and mint its ticket
    pub async fn upload_jars(&self) -> Result<StagingTicket> {
        self.client
            .upload(BundleKind::Jars, &Self::submitter_paths(self.jars))
            .await
    }

    /// Upload the file bundle and mint its ticket
    pub async fn upload_files(&self) -> Result<StagingTicket> {
        self.client
            .upload(BundleKind::Files, &Self::submitter_paths(self.files))
            .await
    }

    /// Secret the staged-fetch phase reads its ticket secrets from
    pub fn build_fetch_secret(
        &self,
        jars: &StagingTicket,
        files: &StagingTicket,
    ) -> SupportingResource {
        let mut data = BTreeMap::new();
        data.insert(
            STAGED_JARS_SECRET_KEY.to_string(),
            jars.resource_secret.clone(),
        );
        data.insert(
            STAGED_FILES_SECRET_KEY.to_string(),
            files.resource_secret.clone(),
        );
        SupportingResource::Secret(Secret {
            metadata: ObjectMeta {
                name: Some(self.fetch_secret_name()),
                namespace: Some(self.namespace.to_string()),
                ..Default::default()
            },
            string_data: Some(data),
            ..Default::default()
        })
    }

    /// ConfigMap describing what the staged-fetch phase downloads and where
    pub fn build_fetch_instructions(
        &self,
        jars: &StagingTicket,
        files: &StagingTicket,
    ) -> SupportingResource {
        let properties = [
            format!("staging.uri={}", self.staging_uri),
            format!("jars.resourceId={}", jars.resource_id),
            format!("files.resourceId={}", files.resource_id),
            format!("jars.downloadDir={}", JARS_DOWNLOAD_DIR),
            format!("files.downloadDir={}", FILES_DOWNLOAD_DIR),
            format!(
                "jars.secretPath={}/{}",
                STAGING_SECRET_MOUNT_DIR, STAGED_JARS_SECRET_KEY
            ),
            format!(
                "files.secretPath={}/{}",
                STAGING_SECRET_MOUNT_DIR, STAGED_FILES_SECRET_KEY
            ),
        ]
        .join("\n");

        let mut data = BTreeMap::new();
        data.insert(FETCH_PROPERTIES_FILE.to_string(), properties);
        SupportingResource::ConfigMap(ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.fetch_instructions_name()),
                namespace: Some(self.namespace.to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        })
    }

    /// Project jar locators onto the paths they occupy once fetched.
    ///
    /// Pure: performs no fetch. Submitter-resident entries move under the
    /// shared jars download directory; everything else passes through.
    pub fn resolve_jars(&self) -> Vec<Locator> {
        Self::resolve(self.jars, JARS_DOWNLOAD_DIR)
    }

    /// Project file locators onto the paths they occupy once fetched
    pub fn resolve_files(&self) -> Vec<Locator> {
        Self::resolve(self.files, FILES_DOWNLOAD_DIR)
    }

    fn resolve(locators: &[Locator], download_dir: &str) -> Vec<Locator> {
        locators
            .iter()
            .map(|loc| match loc.kind() {
                LocatorKind::Submitter => {
                    Locator::from_resolved_path(format!("{}/{}", download_dir, loc.file_name()))
                }
                _ => loc.clone(),
            })
            .collect()
    }

    /// Add the staged-fetch init container and its volumes to the workload
    pub fn bootstrap_fetch_phase(
        &self,
        spec: DriverSpec,
        fetch_secret: &SupportingResource,
        fetch_instructions: &SupportingResource,
    ) -> DriverSpec {
        let properties_path = format!(
            "{}/staged/{}",
            FETCH_CONFIG_MOUNT_DIR, FETCH_PROPERTIES_FILE
        );
        let init = Container {
            name: STAGED_FETCH_CONTAINER_NAME.to_string(),
            image: Some(self.init_image.to_string()),
            args: Some(vec![
                "staged-fetch".to_string(),
                "--properties-file".to_string(),
                properties_path,
            ]),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: crate::DOWNLOAD_VOLUME_NAME.to_string(),
                    mount_path: DOWNLOADS_MOUNT_DIR.to_string(),
                    ..Default::default()
                },
                VolumeMount {
                    name: STAGED_FETCH_CONFIG_VOLUME.to_string(),
                    mount_path: format!("{}/staged", FETCH_CONFIG_MOUNT_DIR),
                    read_only: Some(true),
                    ..Default::default()
                },
                VolumeMount {
                    name: STAGING_SECRET_VOLUME.to_string(),
                    mount_path: STAGING_SECRET_MOUNT_DIR.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        spec.with_download_volume(DOWNLOADS_MOUNT_DIR)
            .with_volume(Volume {
                name: STAGED_FETCH_CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: fetch_instructions.name().to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .with_volume(Volume {
                name: STAGING_SECRET_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(fetch_secret.name().to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .with_init_container(init)
    }

    /// Inject configuration so every worker process repeats the staged fetch
    /// independently at its own startup
    pub fn propagate_to_workers(
        &self,
        config: &SubmissionConfig,
        jars: &StagingTicket,
        files: &StagingTicket,
    ) -> SubmissionConfig {
        config
            .with_entry(keys::WORKER_STAGED_JARS_RESOURCE_ID, &jars.resource_id)
            .with_entry(keys::WORKER_STAGED_FILES_RESOURCE_ID, &files.resource_id)
            .with_entry(keys::WORKER_STAGED_SECRET_NAME, self.fetch_secret_name())
    }

    fn fetch_secret_name(&self) -> String {
        format!("{}-staging-credentials", self.app_id)
    }

    fn fetch_instructions_name(&self) -> String {
        format!("{}-staging-fetch", self.app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn ticket(id: &str) -> StagingTicket {
        StagingTicket {
            resource_id: id.to_string(),
            resource_secret: format!("{}-secret", id),
        }
    }

    fn locators(raws: &[&str]) -> Vec<Locator> {
        raws.iter().copied().map(Locator::parse).collect()
    }

    fn manager<'a>(
        jars: &'a [Locator],
        files: &'a [Locator],
        client: &'a MockStagingClient,
    ) -> StagedDependencyManager<'a, MockStagingClient> {
        StagedDependencyManager::new(
            "job-1",
            "jobs",
            "http://staging:10000",
            "img-init",
            jars,
            files,
            client,
        )
    }

    fn spec() -> DriverSpec {
        DriverSpec::new("job-1", "jobs", "img", Map::new(), Map::new(), 1024, 1408)
    }

    // ==========================================================================
    // Story: Uploads
    //
    // One upload per bundle kind, local paths only, no retry logic here.
    // ==========================================================================

    #[tokio::test]
    async fn when_jars_are_uploaded_only_submitter_paths_are_sent() {
        let jars = locators(&["/local/a.jar", "http://host/b.jar", "local:/opt/c.jar"]);
        let files = locators(&[]);
        let mut client = MockStagingClient::new();
        client
            .expect_upload()
            .withf(|kind, paths| {
                *kind == BundleKind::Jars
                    && paths.len() == 1
                    && paths[0] == PathBuf::from("/local/a.jar")
            })
            .times(1)
            .returning(|_, _| Ok(ticket("jars-1")));

        let mgr = manager(&jars, &files, &client);
        assert_eq!(mgr.upload_jars().await.unwrap(), ticket("jars-1"));
    }

    #[tokio::test]
    async fn when_the_transport_fails_the_error_surfaces_unchanged() {
        let jars = locators(&["/local/a.jar"]);
        let files = locators(&[]);
        let mut client = MockStagingClient::new();
        client
            .expect_upload()
            .times(1)
            .returning(|_, _| Err(Error::staging("connection reset")));

        let mgr = manager(&jars, &files, &client);
        let err = mgr.upload_jars().await.unwrap_err();
        assert!(matches!(err, Error::Staging(_)));
        assert!(err.to_string().contains("connection reset"));
    }

    // ==========================================================================
    // Story: Path Resolution
    //
    // Resolution is a pure projection: same length, submitter entries moved
    // under the download dir, everything else untouched.
    // ==========================================================================

    #[test]
    fn when_jars_resolve_the_count_is_preserved_and_local_prefixes_vanish() {
        let jars = locators(&["/local/a.jar", "file:///local/b.jar", "http://h/c.jar"]);
        let files = locators(&[]);
        let client = MockStagingClient::new();
        let resolved = manager(&jars, &files, &client).resolve_jars();

        assert_eq!(resolved.len(), jars.len());
        assert_eq!(resolved[0].raw(), format!("{}/a.jar", JARS_DOWNLOAD_DIR));
        assert_eq!(resolved[1].raw(), format!("{}/b.jar", JARS_DOWNLOAD_DIR));
        assert_eq!(resolved[2].raw(), "http://h/c.jar");
        assert!(resolved.iter().all(|l| !l.raw().starts_with("/local")));
    }

    #[test]
    fn when_files_resolve_they_land_in_the_files_download_dir() {
        let jars = locators(&[]);
        let files = locators(&["/data/lookup.csv"]);
        let client = MockStagingClient::new();
        let resolved = manager(&jars, &files, &client).resolve_files();
        assert_eq!(
            resolved[0].raw(),
            format!("{}/lookup.csv", FILES_DOWNLOAD_DIR)
        );
    }

    // ==========================================================================
    // Story: Fetch-Phase Resources
    // ==========================================================================

    #[test]
    fn when_the_fetch_secret_is_built_it_carries_both_ticket_secrets() {
        let jars = locators(&["/local/a.jar"]);
        let files = locators(&[]);
        let client = MockStagingClient::new();
        let mgr = manager(&jars, &files, &client);

        let SupportingResource::Secret(secret) =
            mgr.build_fetch_secret(&ticket("j"), &ticket("f"))
        else {
            panic!("expected a secret");
        };
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("job-1-staging-credentials")
        );
        let data = secret.string_data.unwrap();
        assert_eq!(data[STAGED_JARS_SECRET_KEY], "j-secret");
        assert_eq!(data[STAGED_FILES_SECRET_KEY], "f-secret");
    }

    #[test]
    fn when_instructions_are_built_they_name_both_resource_ids() {
        let jars = locators(&["/local/a.jar"]);
        let files = locators(&[]);
        let client = MockStagingClient::new();
        let mgr = manager(&jars, &files, &client);

        let SupportingResource::ConfigMap(cm) =
            mgr.build_fetch_instructions(&ticket("j"), &ticket("f"))
        else {
            panic!("expected a configmap");
        };
        let properties = &cm.data.unwrap()[FETCH_PROPERTIES_FILE];
        assert!(properties.contains("jars.resourceId=j"));
        assert!(properties.contains("files.resourceId=f"));
        assert!(properties.contains("staging.uri=http://staging:10000"));
    }

    #[test]
    fn when_the_fetch_phase_is_bootstrapped_an_init_container_and_volumes_appear() {
        let jars = locators(&["/local/a.jar"]);
        let files = locators(&[]);
        let client = MockStagingClient::new();
        let mgr = manager(&jars, &files, &client);

        let secret = mgr.build_fetch_secret(&ticket("j"), &ticket("f"));
        let instructions = mgr.build_fetch_instructions(&ticket("j"), &ticket("f"));
        let pod = mgr
            .bootstrap_fetch_phase(spec(), &secret, &instructions)
            .finalize();

        let pod_spec = pod.spec.unwrap();
        let inits = pod_spec.init_containers.unwrap();
        assert_eq!(inits.len(), 1);
        assert_eq!(inits[0].name, STAGED_FETCH_CONTAINER_NAME);
        let volume_names: Vec<_> = pod_spec
            .volumes
            .unwrap()
            .iter()
            .map(|v| v.name.clone())
            .collect();
        assert!(volume_names.contains(&crate::DOWNLOAD_VOLUME_NAME.to_string()));
        assert!(volume_names.contains(&STAGED_FETCH_CONFIG_VOLUME.to_string()));
        assert!(volume_names.contains(&STAGING_SECRET_VOLUME.to_string()));
    }

    #[test]
    fn when_propagated_workers_see_resource_ids_and_the_secret_name() {
        let jars = locators(&["/local/a.jar"]);
        let files = locators(&[]);
        let client = MockStagingClient::new();
        let mgr = manager(&jars, &files, &client);

        let config = mgr.propagate_to_workers(
            &SubmissionConfig::default(),
            &ticket("j"),
            &ticket("f"),
        );
        assert_eq!(config.get(keys::WORKER_STAGED_JARS_RESOURCE_ID), Some("j"));
        assert_eq!(config.get(keys::WORKER_STAGED_FILES_RESOURCE_ID), Some("f"));
        assert_eq!(
            config.get(keys::WORKER_STAGED_SECRET_NAME),
            Some("job-1-staging-credentials")
        );
    }
}
