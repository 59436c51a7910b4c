//! Slipway - Kubernetes job submission client
//!
//! Slipway submits a distributed-compute job to a Kubernetes cluster by
//! assembling an immutable driver Pod, distributing the job's dependencies,
//! and creating the Pod together with its supporting resources.
//!
//! # Pipeline
//!
//! A submission flows strictly left to right:
//!
//! 1. Validate user labels/annotations against the reserved key set
//! 2. Build the base driver workload (image, memory, identity labels)
//! 3. Mount cluster-auth credentials when configured
//! 4. Distribute dependencies: locally-resident files are uploaded to a
//!    staging endpoint and re-fetched by an init container; already-remote
//!    files are fetched directly by a second init container
//! 5. Fold the resolved classpath and configuration into the driver
//!    environment
//! 6. Create the driver Pod, then attach and persist the supporting
//!    Secrets/ConfigMaps; roll the Pod back if attachment fails
//!
//! # Modules
//!
//! - [`config`] - Flat string-keyed submission configuration
//! - [`locator`] - Dependency reference parsing (scheme, path)
//! - [`workload`] - Immutable driver workload snapshots and supporting resources
//! - [`submit`] - The submission pipeline and its stages
//! - [`error`] - Error types for the pipeline

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod locator;
pub mod submit;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Shared Constants
// =============================================================================
// Mount paths, volume names, and label keys shared between pipeline stages
// and the init-container contract.

/// Label carrying the generated application identity; reserved, users may not set it
pub const APP_ID_LABEL: &str = "slipway-app-id";

/// Label carrying the application name; reserved, users may not set it
pub const APP_NAME_LABEL: &str = "slipway-app-name";

/// Name of the driver container inside the driver Pod
pub const DRIVER_CONTAINER_NAME: &str = "driver";

/// Shared emptyDir volume that init containers populate with fetched dependencies
pub const DOWNLOAD_VOLUME_NAME: &str = "slipway-downloads";

/// Mount point of the shared download volume (parent of the jars/files dirs)
pub const DOWNLOADS_MOUNT_DIR: &str = "/var/slipway/downloads";

/// In-pod directory where jar dependencies land once fetched
pub const JARS_DOWNLOAD_DIR: &str = "/var/slipway/downloads/jars";

/// In-pod directory where file dependencies land once fetched
pub const FILES_DOWNLOAD_DIR: &str = "/var/slipway/downloads/files";

/// In-pod mount point for the driver credentials secret
pub const CREDENTIALS_MOUNT_DIR: &str = "/mnt/secrets/driver-credentials";

/// In-pod mount point for the staging ticket secret read by the staged-fetch phase
pub const STAGING_SECRET_MOUNT_DIR: &str = "/mnt/secrets/staging";

/// In-pod mount point for fetch-instruction ConfigMaps
pub const FETCH_CONFIG_MOUNT_DIR: &str = "/etc/slipway/fetch";

/// Placeholder substituted for the submission oauth token before the
/// configuration is echoed anywhere observable
pub const REDACTED_VALUE: &str = "<present_but_redacted>";

/// Environment variable holding the resolved driver classpath
pub const ENV_CLASSPATH: &str = "SLIPWAY_CLASSPATH";

/// Environment variable holding the composite driver JVM options
pub const ENV_DRIVER_OPTS: &str = "SLIPWAY_DRIVER_OPTS";

/// Environment variable holding the job entry class
pub const ENV_MAIN_CLASS: &str = "SLIPWAY_MAIN_CLASS";

/// Environment variable holding the job's positional arguments
pub const ENV_DRIVER_ARGS: &str = "SLIPWAY_DRIVER_ARGS";

/// Environment variable holding the driver heap size
pub const ENV_DRIVER_MEMORY: &str = "SLIPWAY_DRIVER_MEMORY";
