use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Running and pending pods always pin their images, whatever their age.
    pub fn is_active(self) -> bool {
        matches!(self, PodPhase::Pending | PodPhase::Running)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    pub phase: PodPhase,

    /// Container image pull specs from the pod spec.
    #[serde(default)]
    pub containers: Vec<String>,
}

/// A workload that owns a pod template: replication controller, daemon set,
/// deployment, deployment config or replica set. These contribute image
/// references regardless of age.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PodController {
    pub namespace: String,
    pub name: String,

    #[serde(default)]
    pub containers: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildInputKind {
    DockerImage,
    ImageStreamImage,
    ImageStreamTag,
    /// Anything this tool does not understand; skipped without error.
    #[serde(other)]
    Other,
}

/// The image a build strategy starts from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInput {
    pub kind: BuildInputKind,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildConfig {
    pub namespace: String,
    pub name: String,

    #[serde(default)]
    pub input: Option<BuildInput>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Build {
    pub namespace: String,
    pub name: String,

    #[serde(default)]
    pub input: Option<BuildInput>,
}
