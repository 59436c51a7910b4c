//! Remote-dependency management
//!
//! Always active. Dependencies that are already at fetchable remote locations
//! (http, hdfs, ...) are downloaded directly by a `remote-fetch` init
//! container, layered after the staged-fetch phase against the same shared
//! volume. This module also computes the definitive driver classpath: every
//! entry must be a scheme-less absolute path by the time it is flattened
//! here, or an upstream stage has a defect.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, ConfigMapVolumeSource, Container, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::{keys, SubmissionConfig};
use crate::locator::{Locator, LocatorKind};
use crate::workload::{DriverSpec, SupportingResource};
use crate::{
    Error, Result, DOWNLOADS_MOUNT_DIR, FETCH_CONFIG_MOUNT_DIR, FILES_DOWNLOAD_DIR,
    JARS_DOWNLOAD_DIR,
};

const REMOTE_FETCH_CONTAINER_NAME: &str = "remote-fetch";
const REMOTE_FETCH_CONFIG_VOLUME: &str = "remote-fetch-config";
const FETCH_PROPERTIES_FILE: &str = "fetch.properties";

/// Coordinates direct fetch of already-remote dependencies and resolves the
/// final driver classpath
pub struct RemoteDependencyManager<'a> {
    app_id: &'a str,
    namespace: &'a str,
    init_image: &'a str,
    jars: &'a [Locator],
    files: &'a [Locator],
}

impl<'a> RemoteDependencyManager<'a> {
    /// Create a manager over the post-staging resolved locators
    pub fn new(
        app_id: &'a str,
        namespace: &'a str,
        init_image: &'a str,
        jars: &'a [Locator],
        files: &'a [Locator],
    ) -> Self {
        Self {
            app_id,
            namespace,
            init_image,
            jars,
            files,
        }
    }

    fn remote(locators: &[Locator]) -> Vec<&Locator> {
        locators
            .iter()
            .filter(|l| l.kind() == LocatorKind::Remote)
            .collect()
    }

    /// ConfigMap describing how the remote-fetch phase retrieves every
    /// still-remote locator, or `None` when nothing remains to fetch
    pub fn build_fetch_instructions(&self) -> Option<SupportingResource> {
        let remote_jars = Self::remote(self.jars);
        let remote_files = Self::remote(self.files);
        if remote_jars.is_empty() && remote_files.is_empty() {
            return None;
        }

        let csv = |locators: &[&Locator]| {
            locators
                .iter()
                .map(|l| l.raw().to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        let properties = [
            format!("remote.jars={}", csv(&remote_jars)),
            format!("remote.files={}", csv(&remote_files)),
            format!("jars.downloadDir={}", JARS_DOWNLOAD_DIR),
            format!("files.downloadDir={}", FILES_DOWNLOAD_DIR),
        ]
        .join("\n");

        let mut data = BTreeMap::new();
        data.insert(FETCH_PROPERTIES_FILE.to_string(), properties);
        Some(SupportingResource::ConfigMap(ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.fetch_instructions_name()),
                namespace: Some(self.namespace.to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }))
    }

    /// Add the remote-fetch init container, layered after any staged-fetch
    /// phase, sharing the same download volume
    pub fn bootstrap_fetch_phase(
        &self,
        spec: DriverSpec,
        fetch_instructions: &SupportingResource,
    ) -> DriverSpec {
        let properties_path = format!(
            "{}/remote/{}",
            FETCH_CONFIG_MOUNT_DIR, FETCH_PROPERTIES_FILE
        );
        let init = Container {
            name: REMOTE_FETCH_CONTAINER_NAME.to_string(),
            image: Some(self.init_image.to_string()),
            args: Some(vec![
                "remote-fetch".to_string(),
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
                    name: REMOTE_FETCH_CONFIG_VOLUME.to_string(),
                    mount_path: format!("{}/remote", FETCH_CONFIG_MOUNT_DIR),
                    read_only: Some(true),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        spec.with_download_volume(DOWNLOADS_MOUNT_DIR)
            .with_volume(Volume {
                name: REMOTE_FETCH_CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: fetch_instructions.name().to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .with_init_container(init)
    }

    /// Flatten all jar locators into the final scheme-less classpath.
    ///
    /// Remote entries map to their download location, on-image and
    /// already-resolved entries to their path. Any entry that still carries a
    /// scheme at that point is an assembly defect upstream, not a user error.
    pub fn resolve_local_classpath(&self, extra_classpath: Option<&str>) -> Result<Vec<String>> {
        let mut entries = Vec::with_capacity(self.jars.len());
        for locator in self.jars {
            let entry = match locator.kind() {
                LocatorKind::Remote => {
                    format!("{}/{}", JARS_DOWNLOAD_DIR, locator.file_name())
                }
                LocatorKind::OnImage => locator.path().to_string(),
                LocatorKind::Submitter => {
                    if let Some(scheme) = locator.scheme() {
                        return Err(Error::invariant(format!(
                            "classpath entry '{}' still carries scheme '{}' after resolution",
                            locator.raw(),
                            scheme
                        )));
                    }
                    locator.path().to_string()
                }
            };
            entries.push(entry);
        }
        if let Some(extra) = extra_classpath {
            entries.extend(
                extra
                    .split(':')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
        for entry in &entries {
            if entry.contains("://") {
                return Err(Error::invariant(format!(
                    "resolved classpath entry '{}' retains a scheme",
                    entry
                )));
            }
        }
        Ok(entries)
    }

    /// Inject remote locators into worker-facing configuration so workers
    /// fetch them at their own startup
    pub fn propagate_to_workers(&self, config: &SubmissionConfig) -> SubmissionConfig {
        let csv = |locators: &[&Locator]| {
            locators
                .iter()
                .map(|l| l.raw().to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        config
            .with_entry(keys::WORKER_REMOTE_JARS, csv(&Self::remote(self.jars)))
            .with_entry(keys::WORKER_REMOTE_FILES, csv(&Self::remote(self.files)))
    }

    fn fetch_instructions_name(&self) -> String {
        format!("{}-remote-fetch", self.app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap as Map;

    fn locators(raws: &[&str]) -> Vec<Locator> {
        raws.iter().copied().map(Locator::parse).collect()
    }

    fn manager<'a>(jars: &'a [Locator], files: &'a [Locator]) -> RemoteDependencyManager<'a> {
        RemoteDependencyManager::new("job-1", "jobs", "img-init", jars, files)
    }

    fn spec() -> DriverSpec {
        DriverSpec::new("job-1", "jobs", "img", Map::new(), Map::new(), 1024, 1408)
    }

    // ==========================================================================
    // Story: Fetch Instructions
    // ==========================================================================

    #[test]
    fn when_nothing_is_remote_no_instructions_are_built() {
        let jars = locators(&["local:/opt/a.jar", "/var/slipway/downloads/jars/b.jar"]);
        let files = locators(&[]);
        assert!(manager(&jars, &files).build_fetch_instructions().is_none());
    }

    #[test]
    fn when_remote_locators_exist_instructions_list_them_verbatim() {
        let jars = locators(&["http://h/a.jar", "local:/opt/b.jar"]);
        let files = locators(&["hdfs://nn/data.csv"]);
        let instructions = manager(&jars, &files).build_fetch_instructions().unwrap();

        let SupportingResource::ConfigMap(cm) = instructions else {
            panic!("expected a configmap");
        };
        assert_eq!(cm.metadata.name.as_deref(), Some("job-1-remote-fetch"));
        let properties = &cm.data.unwrap()[FETCH_PROPERTIES_FILE];
        assert!(properties.contains("remote.jars=http://h/a.jar"));
        assert!(properties.contains("remote.files=hdfs://nn/data.csv"));
    }

    #[test]
    fn when_bootstrapped_the_remote_phase_layers_after_existing_init_containers() {
        let jars = locators(&["http://h/a.jar"]);
        let files = locators(&[]);
        let mgr = manager(&jars, &files);
        let instructions = mgr.build_fetch_instructions().unwrap();

        let staged_first = spec().with_init_container(Container {
            name: "staged-fetch".to_string(),
            ..Default::default()
        });
        let pod = mgr
            .bootstrap_fetch_phase(staged_first, &instructions)
            .finalize();
        let inits = pod.spec.unwrap().init_containers.unwrap();
        assert_eq!(inits.len(), 2);
        assert_eq!(inits[0].name, "staged-fetch");
        assert_eq!(inits[1].name, REMOTE_FETCH_CONTAINER_NAME);
    }

    // ==========================================================================
    // Story: Classpath Resolution
    // ==========================================================================

    #[test]
    fn when_resolved_remote_jars_map_to_the_download_dir() {
        let jars = locators(&["http://h/a.jar", "local:/opt/b.jar", "/resolved/c.jar"]);
        let files = locators(&[]);
        let classpath = manager(&jars, &files).resolve_local_classpath(None).unwrap();
        assert_eq!(
            classpath,
            vec![
                format!("{}/a.jar", JARS_DOWNLOAD_DIR),
                "/opt/b.jar".to_string(),
                "/resolved/c.jar".to_string(),
            ]
        );
    }

    #[test]
    fn when_extra_classpath_is_given_it_is_appended_last() {
        let jars = locators(&["local:/opt/a.jar"]);
        let files = locators(&[]);
        let classpath = manager(&jars, &files)
            .resolve_local_classpath(Some("/opt/extra/*:/opt/more.jar"))
            .unwrap();
        assert_eq!(classpath[1], "/opt/extra/*");
        assert_eq!(classpath[2], "/opt/more.jar");
    }

    #[test]
    fn when_a_file_scheme_survives_to_resolution_it_is_an_invariant_violation() {
        // A file: locator reaching this stage means the staging branch never
        // resolved it; that is a pipeline defect, not a user error.
        let jars = locators(&["file:///local/a.jar"]);
        let files = locators(&[]);
        let err = manager(&jars, &files)
            .resolve_local_classpath(None)
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    proptest! {
        /// No mix of on-image, resolved-local, and remote locators ever
        /// produces a classpath entry that retains a URI scheme.
        #[test]
        fn prop_resolved_classpath_is_always_scheme_less(
            names in proptest::collection::vec("[a-z]{1,8}\\.jar", 0..8),
            picks in proptest::collection::vec(0u8..3, 0..8),
        ) {
            let jars: Vec<Locator> = names
                .iter()
                .zip(picks.iter().chain(std::iter::repeat(&0)))
                .map(|(name, pick)| match pick % 3 {
                    0 => Locator::parse(format!("local:/opt/{}", name)),
                    1 => Locator::parse(format!("/var/slipway/downloads/jars/{}", name)),
                    _ => Locator::parse(format!("https://deps.example.com/{}", name)),
                })
                .collect();
            let files: Vec<Locator> = Vec::new();
            let classpath = manager(&jars, &files).resolve_local_classpath(None).unwrap();
            prop_assert_eq!(classpath.len(), jars.len());
            for entry in classpath {
                prop_assert!(!entry.contains("://"), "entry {} kept a scheme", entry);
                prop_assert!(entry.starts_with('/'), "entry {} is not absolute", entry);
            }
        }
    }

    // ==========================================================================
    // Story: Worker Propagation
    // ==========================================================================

    #[test]
    fn when_propagated_workers_see_the_remote_locator_lists() {
        let jars = locators(&["http://h/a.jar", "local:/opt/b.jar"]);
        let files = locators(&["hdfs://nn/d.csv"]);
        let config = manager(&jars, &files).propagate_to_workers(&SubmissionConfig::default());
        assert_eq!(config.get(keys::WORKER_REMOTE_JARS), Some("http://h/a.jar"));
        assert_eq!(config.get(keys::WORKER_REMOTE_FILES), Some("hdfs://nn/d.csv"));
    }
}
