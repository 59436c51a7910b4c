//! Submission configuration
//!
//! A flat string-keyed map is the boundary with the external configuration
//! system (CLI `--conf` flags, properties files). Inside the pipeline the map
//! is threaded as immutable snapshots: stages add or override entries via
//! [`SubmissionConfig::with_entry`] and never remove a key they did not
//! introduce. Typed accessors live here so stage code never re-parses raw
//! strings.

use std::collections::BTreeMap;

use crate::{Error, Result, REDACTED_VALUE};

/// Well-known configuration keys
pub mod keys {
    /// Kubernetes namespace the driver and its supporting resources live in
    pub const NAMESPACE: &str = "slipway.kubernetes.namespace";
    /// Container image for the driver
    pub const CONTAINER_IMAGE: &str = "slipway.kubernetes.container.image";
    /// Container image for the fetch init containers (defaults to the driver image)
    pub const INIT_CONTAINER_IMAGE: &str = "slipway.kubernetes.initContainer.image";
    /// Staging endpoint URI; when absent, locally-resident dependencies are rejected
    pub const STAGING_URI: &str = "slipway.kubernetes.staging.uri";
    /// Human-readable application name, used in the generated app id
    pub const APP_NAME: &str = "slipway.app.name";
    /// Driver heap size, e.g. "1g" or "512m"
    pub const DRIVER_MEMORY: &str = "slipway.driver.memory";
    /// Override for the non-heap memory overhead in MiB
    pub const DRIVER_MEMORY_OVERHEAD_MB: &str = "slipway.kubernetes.driver.memoryOverheadMb";
    /// Comma-separated `key=value` labels for the driver Pod
    pub const DRIVER_LABELS: &str = "slipway.kubernetes.driver.labels";
    /// Comma-separated `key=value` annotations for the driver Pod
    pub const DRIVER_ANNOTATIONS: &str = "slipway.kubernetes.driver.annotations";
    /// Extra classpath entries appended after resolved dependencies
    pub const DRIVER_EXTRA_CLASSPATH: &str = "slipway.driver.extraClassPath";
    /// Raw JVM options appended last to the composite options string
    pub const DRIVER_EXTRA_JAVA_OPTIONS: &str = "slipway.driver.extraJavaOptions";
    /// OAuth token used by the submission client itself; redacted before echo
    pub const SUBMISSION_OAUTH_TOKEN: &str =
        "slipway.kubernetes.authenticate.submission.oauthToken";
    /// Path to an oauth token file the driver uses against the API server
    pub const DRIVER_OAUTH_TOKEN_FILE: &str =
        "slipway.kubernetes.authenticate.driver.oauthTokenFile";
    /// Path to the CA certificate the driver uses against the API server
    pub const DRIVER_CA_CERT_FILE: &str = "slipway.kubernetes.authenticate.driver.caCertFile";
    /// Path to the client key the driver uses against the API server
    pub const DRIVER_CLIENT_KEY_FILE: &str =
        "slipway.kubernetes.authenticate.driver.clientKeyFile";
    /// Path to the client certificate the driver uses against the API server
    pub const DRIVER_CLIENT_CERT_FILE: &str =
        "slipway.kubernetes.authenticate.driver.clientCertFile";

    // Worker propagation keys: injected by the pipeline so every worker
    // process repeats the fetch at its own startup.

    /// Staged jars bundle resource id, for worker-side fetch
    pub const WORKER_STAGED_JARS_RESOURCE_ID: &str =
        "slipway.kubernetes.worker.staged.jarsResourceId";
    /// Staged files bundle resource id, for worker-side fetch
    pub const WORKER_STAGED_FILES_RESOURCE_ID: &str =
        "slipway.kubernetes.worker.staged.filesResourceId";
    /// Name of the staging ticket secret workers mount
    pub const WORKER_STAGED_SECRET_NAME: &str = "slipway.kubernetes.worker.staged.secretName";
    /// Remote jar locators workers fetch directly
    pub const WORKER_REMOTE_JARS: &str = "slipway.kubernetes.worker.remote.jars";
    /// Remote file locators workers fetch directly
    pub const WORKER_REMOTE_FILES: &str = "slipway.kubernetes.worker.remote.files";
}

/// Default driver heap size in MiB when `slipway.driver.memory` is unset
pub const DEFAULT_DRIVER_MEMORY_MB: u64 = 1024;

/// Floor for the computed memory overhead in MiB
pub const MIN_MEMORY_OVERHEAD_MB: u64 = 384;

/// Immutable snapshot of the flat submission configuration
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubmissionConfig {
    entries: BTreeMap<String, String>,
}

impl SubmissionConfig {
    /// Build a config from key/value pairs
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up a raw entry
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Return a new snapshot with one entry added or overridden
    pub fn with_entry(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(key.into(), value.into());
        Self { entries }
    }

    /// Iterate over all entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Target namespace, defaulting to `default`
    pub fn namespace(&self) -> String {
        self.get(keys::NAMESPACE).unwrap_or("default").to_string()
    }

    /// Driver container image; required
    pub fn container_image(&self) -> Result<&str> {
        self.get(keys::CONTAINER_IMAGE).ok_or_else(|| {
            Error::configuration(format!("{} must be set", keys::CONTAINER_IMAGE))
        })
    }

    /// Init-container image, falling back to the driver image
    pub fn init_container_image(&self) -> Result<&str> {
        match self.get(keys::INIT_CONTAINER_IMAGE) {
            Some(image) => Ok(image),
            None => self.container_image(),
        }
    }

    /// Staging endpoint URI, when one is configured
    pub fn staging_uri(&self) -> Option<&str> {
        self.get(keys::STAGING_URI)
    }

    /// Driver heap size in MiB
    pub fn driver_memory_mb(&self) -> Result<u64> {
        match self.get(keys::DRIVER_MEMORY) {
            Some(raw) => parse_memory_mb(raw),
            None => Ok(DEFAULT_DRIVER_MEMORY_MB),
        }
    }

    /// Non-heap memory overhead in MiB: explicit override, or 10% of the heap
    /// with a floor of [`MIN_MEMORY_OVERHEAD_MB`]
    pub fn memory_overhead_mb(&self, memory_mb: u64) -> Result<u64> {
        match self.get(keys::DRIVER_MEMORY_OVERHEAD_MB) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                Error::configuration(format!(
                    "{} must be a whole number of MiB, got '{}'",
                    keys::DRIVER_MEMORY_OVERHEAD_MB,
                    raw
                ))
            }),
            None => Ok(MIN_MEMORY_OVERHEAD_MB.max(memory_mb / 10)),
        }
    }

    /// Return a snapshot with the submission oauth token replaced by a fixed
    /// placeholder. Entries that already propagated the original value are
    /// left as they are.
    pub fn redacted(&self) -> Self {
        if self.entries.contains_key(keys::SUBMISSION_OAUTH_TOKEN) {
            self.with_entry(keys::SUBMISSION_OAUTH_TOKEN, REDACTED_VALUE)
        } else {
            self.clone()
        }
    }
}

/// Parse a memory size string such as `1g`, `512m`, or a bare MiB count
pub fn parse_memory_mb(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    let err = || {
        Error::configuration(format!(
            "invalid memory size '{}': expected forms like 512m or 2g",
            raw
        ))
    };
    if raw.is_empty() {
        return Err(err());
    }
    let (digits, multiplier) = match raw.chars().last() {
        Some('g') | Some('G') => (&raw[..raw.len() - 1], 1024),
        Some('m') | Some('M') => (&raw[..raw.len() - 1], 1),
        Some(c) if c.is_ascii_digit() => (raw, 1),
        _ => return Err(err()),
    };
    let value: u64 = digits.parse().map_err(|_| err())?;
    Ok(value * multiplier)
}
