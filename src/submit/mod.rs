//! The submission pipeline
//!
//! Orchestrates one job submission end to end. Data flows strictly left to
//! right; every stage consumes the previous stage's snapshot and produces a
//! new one:
//!
//! validate metadata → base workload → mount credentials → staged XOR
//! pass-through dependency distribution → remote dependency resolution →
//! environment assembly → create driver → attach supporting resources
//! (rollback on failure).
//!
//! The pipeline holds its capability handles ([`ClusterApi`],
//! [`StagingClient`]) by reference for exactly one invocation; nothing is
//! shared across concurrent submissions.

pub mod assembler;
pub mod credentials;
pub mod creator;
pub mod metadata;
pub mod remote;
pub mod staged;

use chrono::Utc;
use tracing::info;

use crate::config::{keys, SubmissionConfig};
use crate::locator::{Locator, LocatorKind};
use crate::workload::{DriverIdentity, DriverSpec, SupportingResource};
use crate::{Error, Result, APP_ID_LABEL, APP_NAME_LABEL};

use assembler::DriverEntrypoint;
use creator::{ClusterApi, DriverResourceCreator};
use staged::{StagedDependencyManager, StagingClient};

/// Default application name when `slipway.app.name` is unset
pub const DEFAULT_APP_NAME: &str = "slipway";

/// One job submission, immutable once constructed from caller input
#[derive(Clone, Debug)]
pub struct SubmissionRequest {
    /// Job entry class
    pub main_class: String,
    /// Positional arguments passed to the job
    pub args: Vec<String>,
    /// The primary application artifact; treated as the head of the jar list
    pub primary_artifact: Locator,
    /// Flat submission configuration
    pub config: SubmissionConfig,
    /// Jar dependency locators
    pub jars: Vec<Locator>,
    /// File dependency locators
    pub files: Vec<Locator>,
}

/// How dependencies are distributed, decided once at pipeline start
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DependencyPlan {
    /// A staging endpoint is configured; locally-resident bundles are
    /// uploaded and re-fetched by the staged-fetch init phase
    Staged {
        /// The staging endpoint URI
        uri: String,
    },
    /// No staging endpoint; every locator must already be fetchable
    Passthrough,
}

impl DependencyPlan {
    /// Decide the plan and enforce its precondition: without a staging
    /// endpoint, no locator may be resident on the submitter's disk
    pub fn resolve(
        config: &SubmissionConfig,
        jars: &[Locator],
        files: &[Locator],
    ) -> Result<Self> {
        if let Some(uri) = config.staging_uri() {
            return Ok(Self::Staged {
                uri: uri.to_string(),
            });
        }
        for locator in jars.iter().chain(files) {
            if locator.kind() == LocatorKind::Submitter {
                return Err(Error::precondition(format!(
                    "dependency '{}' is on the submitter's disk but no staging endpoint is \
                     configured ({})",
                    locator.raw(),
                    keys::STAGING_URI
                )));
            }
        }
        Ok(Self::Passthrough)
    }
}

/// Orchestrates one submission against injected capability handles
pub struct SubmissionPipeline<'a, A: ClusterApi + ?Sized, S: StagingClient + ?Sized> {
    cluster: &'a A,
    staging: &'a S,
}

impl<'a, A: ClusterApi + ?Sized, S: StagingClient + ?Sized> SubmissionPipeline<'a, A, S> {
    /// Bind the pipeline to its collaborators for one invocation
    pub fn new(cluster: &'a A, staging: &'a S) -> Self {
        Self { cluster, staging }
    }

    /// Run the full pipeline and return the created driver's identity
    pub async fn submit(&self, request: &SubmissionRequest) -> Result<DriverIdentity> {
        let config = &request.config;

        // Pre-flight validation: nothing below may run before these pass.
        let user_labels =
            metadata::parse_key_value_csv(config.get(keys::DRIVER_LABELS), "driver labels")?;
        metadata::reject_reserved_labels(&user_labels)?;
        let annotations = metadata::parse_key_value_csv(
            config.get(keys::DRIVER_ANNOTATIONS),
            "driver annotations",
        )?;

        let jars: Vec<Locator> = std::iter::once(request.primary_artifact.clone())
            .chain(request.jars.iter().cloned())
            .collect();
        let plan = DependencyPlan::resolve(config, &jars, &request.files)?;

        let app_name = config.get(keys::APP_NAME).unwrap_or(DEFAULT_APP_NAME);
        let app_id = format!("{}-{}", app_name, Utc::now().timestamp_millis());
        let namespace = config.namespace();
        let image = config.container_image()?.to_string();
        let init_image = config.init_container_image()?.to_string();
        let memory_mb = config.driver_memory_mb()?;
        let overhead_mb = config.memory_overhead_mb(memory_mb)?;
        info!(app_id = %app_id, namespace = %namespace, plan = ?plan, "Starting submission");

        let mut labels = user_labels;
        labels.insert(APP_ID_LABEL.to_string(), app_id.clone());
        labels.insert(APP_NAME_LABEL.to_string(), app_name.to_string());

        let spec = DriverSpec::new(
            &app_id,
            &namespace,
            &image,
            labels,
            annotations,
            memory_mb,
            memory_mb + overhead_mb,
        );
        let mut attachments: Vec<SupportingResource> = Vec::new();

        // Credentials: secret + mount when material is configured, ambient
        // identity otherwise.
        let bundle = credentials::CredentialBundle::from_config(config)?;
        let credentials_secret = credentials::build_credentials_secret(&app_id, &namespace, &bundle);
        let spec = credentials::mount_credentials(spec, credentials_secret.as_ref());
        let config = credentials::record_credential_locations(config);
        if let Some(secret) = credentials_secret {
            attachments.push(secret);
        }

        // Dependency distribution: staged branch XOR pass-through.
        let (spec, config, resolved_jars, resolved_files) = match &plan {
            DependencyPlan::Staged { uri } => {
                let manager = StagedDependencyManager::new(
                    &app_id,
                    &namespace,
                    uri,
                    &init_image,
                    &jars,
                    &request.files,
                    self.staging,
                );
                let jars_ticket = manager.upload_jars().await?;
                let files_ticket = manager.upload_files().await?;
                info!(
                    jars_resource = %jars_ticket.resource_id,
                    files_resource = %files_ticket.resource_id,
                    "Dependency bundles staged"
                );
                let fetch_secret = manager.build_fetch_secret(&jars_ticket, &files_ticket);
                let fetch_instructions =
                    manager.build_fetch_instructions(&jars_ticket, &files_ticket);
                let spec = manager.bootstrap_fetch_phase(spec, &fetch_secret, &fetch_instructions);
                let config = manager.propagate_to_workers(&config, &jars_ticket, &files_ticket);
                let resolved_jars = manager.resolve_jars();
                let resolved_files = manager.resolve_files();
                attachments.push(fetch_secret);
                attachments.push(fetch_instructions);
                (spec, config, resolved_jars, resolved_files)
            }
            DependencyPlan::Passthrough => (spec, config, jars, request.files.clone()),
        };

        // Remote dependencies: always considered, fetch phase only added when
        // something is actually remote.
        let manager = remote::RemoteDependencyManager::new(
            &app_id,
            &namespace,
            &init_image,
            &resolved_jars,
            &resolved_files,
        );
        let (spec, config) = match manager.build_fetch_instructions() {
            Some(instructions) => {
                let spec = manager.bootstrap_fetch_phase(spec, &instructions);
                let config = manager.propagate_to_workers(&config);
                attachments.push(instructions);
                (spec, config)
            }
            None => (spec, config),
        };
        let classpath =
            manager.resolve_local_classpath(config.get(keys::DRIVER_EXTRA_CLASSPATH))?;

        // Final assembly over the redacted configuration snapshot.
        let config = config.redacted();
        let spec = assembler::assemble_driver_env(
            spec,
            &classpath,
            &config,
            &DriverEntrypoint {
                main_class: &request.main_class,
                args: &request.args,
                memory_mb,
            },
        );

        let creator = DriverResourceCreator::new(self.cluster);
        let identity = creator.create(spec.finalize(), attachments).await?;
        info!(driver = %identity.name, "Submission complete");
        Ok(identity)
    }
}
