use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Annotation set on images pushed through the integrated registry. Only the
/// exact value `"true"` marks an image as managed.
pub const MANAGED_ANNOTATION: &str = "image.reclaim/managed";

/// A content digest in `algorithm:hex` form, e.g. `sha256:ab12...`.
///
/// Digests identify images as well as their components (layers, configs,
/// manifests). Two images declaring the same layer digest share that layer's
/// bytes in the registry, which is why deletion has to reference-count.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks the `algorithm:hex` shape. Snapshot documents are parsed
    /// leniently; the graph builder calls this and records violations as
    /// construction errors.
    pub fn is_wellformed(&self) -> bool {
        let Some((algorithm, hex)) = self.0.split_once(':') else {
            return false;
        };
        !algorithm.is_empty()
            && algorithm.chars().all(|c| c.is_ascii_alphanumeric())
            && !hex.is_empty()
            && hex.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An image known to the cluster, identified by its manifest digest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Image {
    pub digest: Digest,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(default)]
    pub size_bytes: u64,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Layer digests in manifest order.
    pub layers: Vec<Digest>,

    /// Digest of the content-addressed config blob, when the manifest schema
    /// declares one.
    #[serde(default)]
    pub config: Option<Digest>,
}

impl Image {
    pub fn is_managed(&self) -> bool {
        self.annotations
            .get(MANAGED_ANNOTATION)
            .is_some_and(|v| v == "true")
    }
}
