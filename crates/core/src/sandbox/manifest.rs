//! Declared artifact sets a script asks to have materialized in its sandbox.

use serde::{Deserialize, Serialize};

/// One artifact: where to fetch it from and where to put it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Target path, relative to the sandbox root it is destined for.
    pub path: String,
    /// Source location handed to the artifact opener.
    pub location: String,
    /// Re-fetch even when a copy of the same location is already present.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recreate: bool,
}

impl ArtifactSpec {
    pub fn new(path: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            location: location.into(),
            recreate: false,
        }
    }
}

/// The private artifact set of a script.
///
/// `execution` artifacts land under the sandbox's execution root (code the
/// backend may load); `resources` land under the resource root, which is also
/// added as a raw search path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxManifest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execution: Vec<ArtifactSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ArtifactSpec>,
    /// Tagged opener configuration (e.g. `!url {}`); scheme dispatch when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener: Option<serde_yaml::Value>,
}

impl SandboxManifest {
    pub fn is_empty(&self) -> bool {
        self.execution.is_empty() && self.resources.is_empty()
    }
}
