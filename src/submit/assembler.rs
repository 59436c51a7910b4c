//! Final driver environment assembly
//!
//! Folds the resolved classpath and every accumulated configuration entry
//! into the driver container's environment: one classpath variable joined
//! with `:`, and one composite options string rendering each config entry as
//! a `-D` system property with any user-supplied raw options appended last.
//! Each environment name is applied exactly once across the pipeline.

use crate::config::{keys, SubmissionConfig};
use crate::workload::DriverSpec;
use crate::{
    ENV_CLASSPATH, ENV_DRIVER_ARGS, ENV_DRIVER_MEMORY, ENV_DRIVER_OPTS, ENV_MAIN_CLASS,
};

/// Parameters folded into the driver environment
pub struct DriverEntrypoint<'a> {
    /// Job entry class
    pub main_class: &'a str,
    /// Positional arguments for the job
    pub args: &'a [String],
    /// Driver heap size in MiB
    pub memory_mb: u64,
}

/// Apply the resolved classpath, configuration, and entrypoint to the spec
pub fn assemble_driver_env(
    spec: DriverSpec,
    classpath: &[String],
    config: &SubmissionConfig,
    entrypoint: &DriverEntrypoint<'_>,
) -> DriverSpec {
    let mut opts: Vec<String> = config
        .iter()
        .filter(|(key, _)| *key != keys::DRIVER_EXTRA_JAVA_OPTIONS)
        .map(|(key, value)| format!("-D{}={}", key, value))
        .collect();
    if let Some(extra) = config.get(keys::DRIVER_EXTRA_JAVA_OPTIONS) {
        opts.push(extra.to_string());
    }

    spec.with_env(ENV_CLASSPATH, classpath.join(":"))
        .with_env(ENV_DRIVER_OPTS, opts.join(" "))
        .with_env(ENV_MAIN_CLASS, entrypoint.main_class)
        .with_env(ENV_DRIVER_ARGS, entrypoint.args.join(" "))
        .with_env(ENV_DRIVER_MEMORY, format!("{}m", entrypoint.memory_mb))
}
