//! Cluster-auth credential mounting
//!
//! When the configuration names credential material (an oauth token file,
//! CA/client certificate files), it is packaged into a Secret mounted on the
//! driver container, and the configuration is rewritten so in-pod processes
//! find the files at their mounted locations. When nothing is configured the
//! driver runs under its ambient service-account identity and every function
//! here is the identity.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Secret, SecretVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::{keys, SubmissionConfig};
use crate::workload::{DriverSpec, SupportingResource};
use crate::{Error, Result, CREDENTIALS_MOUNT_DIR};

const CREDENTIALS_VOLUME_NAME: &str = "driver-credentials";

/// Secret key for the driver oauth token
pub const OAUTH_TOKEN_SECRET_KEY: &str = "oauth-token";
/// Secret key for the CA certificate
pub const CA_CERT_SECRET_KEY: &str = "ca.crt";
/// Secret key for the client key
pub const CLIENT_KEY_SECRET_KEY: &str = "client.key";
/// Secret key for the client certificate
pub const CLIENT_CERT_SECRET_KEY: &str = "client.crt";

/// Credential material loaded from the files the configuration points at.
///
/// File contents are read exactly once here; everything downstream is a pure
/// function of this bundle.
#[derive(Clone, Debug, Default)]
pub struct CredentialBundle {
    oauth_token: Option<String>,
    ca_cert: Option<String>,
    client_key: Option<String>,
    client_cert: Option<String>,
}

impl CredentialBundle {
    /// Load the bundle from the file paths named in the configuration
    pub fn from_config(config: &SubmissionConfig) -> Result<Self> {
        let read = |key: &str| -> Result<Option<String>> {
            match config.get(key) {
                Some(path) => std::fs::read_to_string(path).map(Some).map_err(|e| {
                    Error::configuration(format!(
                        "failed to read credential file '{}' ({}): {}",
                        path, key, e
                    ))
                }),
                None => Ok(None),
            }
        };
        Ok(Self {
            oauth_token: read(keys::DRIVER_OAUTH_TOKEN_FILE)?,
            ca_cert: read(keys::DRIVER_CA_CERT_FILE)?,
            client_key: read(keys::DRIVER_CLIENT_KEY_FILE)?,
            client_cert: read(keys::DRIVER_CLIENT_CERT_FILE)?,
        })
    }

    /// True when no credential material is configured at all
    pub fn is_empty(&self) -> bool {
        self.oauth_token.is_none()
            && self.ca_cert.is_none()
            && self.client_key.is_none()
            && self.client_cert.is_none()
    }
}

/// Package the bundle into a Secret, or `None` when the driver should use its
/// ambient service-account identity
pub fn build_credentials_secret(
    app_id: &str,
    namespace: &str,
    bundle: &CredentialBundle,
) -> Option<SupportingResource> {
    if bundle.is_empty() {
        return None;
    }
    let mut data = BTreeMap::new();
    let mut put = |key: &str, value: &Option<String>| {
        if let Some(value) = value {
            data.insert(key.to_string(), value.clone());
        }
    };
    put(OAUTH_TOKEN_SECRET_KEY, &bundle.oauth_token);
    put(CA_CERT_SECRET_KEY, &bundle.ca_cert);
    put(CLIENT_KEY_SECRET_KEY, &bundle.client_key);
    put(CLIENT_CERT_SECRET_KEY, &bundle.client_cert);

    Some(SupportingResource::Secret(Secret {
        metadata: ObjectMeta {
            name: Some(format!("{}-driver-credentials", app_id)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        string_data: Some(data),
        ..Default::default()
    }))
}

/// Attach the credentials secret as a driver volume mount; identity when no
/// secret was produced
pub fn mount_credentials(spec: DriverSpec, secret: Option<&SupportingResource>) -> DriverSpec {
    let Some(secret) = secret else {
        return spec;
    };
    spec.with_volume(Volume {
        name: CREDENTIALS_VOLUME_NAME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.name().to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
    .with_driver_mount(VolumeMount {
        name: CREDENTIALS_VOLUME_NAME.to_string(),
        mount_path: CREDENTIALS_MOUNT_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    })
}

/// Rewrite credential file paths to their in-pod mounted locations, so the
/// driver process resolves them after the secret volume is mounted
pub fn record_credential_locations(config: &SubmissionConfig) -> SubmissionConfig {
    let mounted = |file: &str| format!("{}/{}", CREDENTIALS_MOUNT_DIR, file);
    let rewrites = [
        (keys::DRIVER_OAUTH_TOKEN_FILE, OAUTH_TOKEN_SECRET_KEY),
        (keys::DRIVER_CA_CERT_FILE, CA_CERT_SECRET_KEY),
        (keys::DRIVER_CLIENT_KEY_FILE, CLIENT_KEY_SECRET_KEY),
        (keys::DRIVER_CLIENT_CERT_FILE, CLIENT_CERT_SECRET_KEY),
    ];
    let mut config = config.clone();
    for (key, secret_key) in rewrites {
        if config.get(key).is_some() {
            config = config.with_entry(key, mounted(secret_key));
        }
    }
    config
}
