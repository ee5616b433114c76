use serde::{Deserialize, Serialize};

/// A per-namespace cap on image size. An image "exceeds limits" when it is
/// larger than any cap declared in its stream's namespace, i.e. the smallest
/// cap wins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SizeLimit {
    pub name: String,
    pub max_image_bytes: u64,
}
