use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{Build, BuildConfig, Image, ImageStream, Pod, PodController, SizeLimit};

/// A point-in-time capture of every resource the pruning algorithm consumes.
///
/// The sweep operates on this snapshot alone; resources created or retagged
/// after it was taken are not reconciled into a running sweep.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub images: Vec<Image>,

    #[serde(default)]
    pub streams: Vec<ImageStream>,

    #[serde(default)]
    pub pods: Vec<Pod>,

    #[serde(default)]
    pub replication_controllers: Vec<PodController>,

    #[serde(default)]
    pub daemon_sets: Vec<PodController>,

    #[serde(default)]
    pub deployments: Vec<PodController>,

    #[serde(default)]
    pub deployment_configs: Vec<PodController>,

    #[serde(default)]
    pub replica_sets: Vec<PodController>,

    #[serde(default)]
    pub build_configs: Vec<BuildConfig>,

    #[serde(default)]
    pub builds: Vec<Build>,

    /// Size-limit policies keyed by namespace.
    #[serde(default)]
    pub size_limits: BTreeMap<String, Vec<SizeLimit>>,
}

impl Snapshot {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("read snapshot {}", path.display()))?;
        serde_json::from_slice(&bytes).context("parse snapshot json")
    }
}
