use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::Digest;

/// A named, namespaced collection of tags, each tag carrying an ordered
/// revision history of the images it has pointed at.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageStream {
    pub namespace: String,
    pub name: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(default)]
    pub tags: Vec<TagHistory>,
}

impl ImageStream {
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Revision history for one tag, newest revision first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagHistory {
    pub tag: String,
    pub revisions: Vec<TagRevision>,
}

/// One historical value of a tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagRevision {
    pub digest: Digest,

    /// When the tag started pointing at this image.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
