//! Dependency locator parsing
//!
//! A locator is a reference to one dependency artifact. Three categories
//! matter to the pipeline:
//!
//! - `local:` scheme: already present on the container image at the given
//!   path; nothing to fetch.
//! - `file:` scheme or no scheme: resident on the submitter's disk; must be
//!   uploaded to a staging endpoint and re-fetched inside the workload.
//! - any other scheme (http, https, hdfs, ...): remote and independently
//!   fetchable; fetched directly by an init container.

use std::path::PathBuf;

/// Where a dependency lives before the pipeline runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocatorKind {
    /// Already baked into the container image
    OnImage,
    /// On the submitter's local disk; requires staging
    Submitter,
    /// At an independently fetchable remote location
    Remote,
}

/// A parsed dependency reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    scheme: Option<String>,
    path: String,
}

impl Locator {
    /// Parse a raw locator string
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match split_scheme(&raw) {
            Some((scheme, rest)) => {
                // file:///x and file:/x both mean the local path /x
                let path = rest.trim_start_matches("//").to_string();
                Self {
                    raw: raw.clone(),
                    scheme: Some(scheme.to_ascii_lowercase()),
                    path,
                }
            }
            None => Self {
                path: raw.clone(),
                raw,
                scheme: None,
            },
        }
    }

    /// Build a locator for a scheme-less in-pod path
    pub fn from_resolved_path(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            raw: path.clone(),
            scheme: None,
            path,
        }
    }

    /// The original string as supplied by the caller
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The scheme, lowercased, if one was present
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// The path component with any scheme and authority prefix stripped
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Which fetch strategy this locator requires
    pub fn kind(&self) -> LocatorKind {
        match self.scheme.as_deref() {
            Some("local") => LocatorKind::OnImage,
            Some("file") | None => LocatorKind::Submitter,
            Some(_) => LocatorKind::Remote,
        }
    }

    /// The submitter-side filesystem path, for locators that have one
    pub fn submitter_path(&self) -> Option<PathBuf> {
        match self.kind() {
            LocatorKind::Submitter => Some(PathBuf::from(&self.path)),
            _ => None,
        }
    }

    /// The final path segment, used as the in-pod file name after a fetch
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split `scheme:rest` when the prefix looks like a URI scheme rather than a
/// path component
fn split_scheme(raw: &str) -> Option<(&str, &str)> {
    let (prefix, rest) = raw.split_once(':')?;
    if prefix.is_empty() || prefix.contains('/') {
        return None;
    }
    if prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        Some((prefix, rest))
    } else {
        None
    }
}
