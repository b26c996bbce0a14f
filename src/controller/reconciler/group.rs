//! # Group Resolution
//!
//! Splits a source `apiVersion` into group and version and checks the group
//! against the configured allow-list of resource family suffixes.

use kube::core::GroupVersionKind;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No `/`, more than one `/`, or an empty version segment
    #[error("malformed apiVersion: apiVersion {0} is invalid, expected <group>/<version>")]
    Malformed(String),
    #[error("apiVersion {0} is invalid: group must not be empty")]
    EmptyGroup(String),
    #[error("unsupported apiVersion: {api_version}, needs to be part of [{}]", .supported.join(" "))]
    Unsupported {
        api_version: String,
        supported: Vec<String>,
    },
}

/// Resolves `apiVersion` strings against an allow-list of group suffixes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupResolver {
    suffixes: Vec<String>,
}

impl GroupResolver {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    /// Returns `(group, version)` for a supported `apiVersion`
    pub fn resolve(&self, api_version: &str) -> Result<(String, String), ResolveError> {
        let (group, version) = api_version
            .rsplit_once('/')
            .ok_or_else(|| ResolveError::Malformed(api_version.to_string()))?;

        if group.contains('/') || version.is_empty() {
            return Err(ResolveError::Malformed(api_version.to_string()));
        }
        if group.is_empty() {
            return Err(ResolveError::EmptyGroup(api_version.to_string()));
        }

        if self.suffixes.iter().any(|suffix| group.ends_with(suffix.as_str())) {
            Ok((group.to_string(), version.to_string()))
        } else {
            Err(ResolveError::Unsupported {
                api_version: api_version.to_string(),
                supported: self.suffixes.clone(),
            })
        }
    }

    /// Resolves `apiVersion` and attaches `kind`
    pub fn resolve_kind(
        &self,
        api_version: &str,
        kind: &str,
    ) -> Result<GroupVersionKind, ResolveError> {
        let (group, version) = self.resolve(api_version)?;
        Ok(GroupVersionKind::gvk(&group, &version, kind))
    }
}

impl Default for GroupResolver {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_SUPPORTED_GROUP_SUFFIXES.iter().copied())
    }
}
