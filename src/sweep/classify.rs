use std::collections::BTreeSet;

use tracing::debug;

use crate::graph::{EdgeKind, NodeKey, ReferenceGraph};
use crate::model::{Digest, Image};
use crate::policy::PrunePolicy;

/// The mark phase: an image is prunable iff it passes the retention policy
/// and no predecessor holds a strong reference to it.
pub(super) fn image_is_prunable(
    graph: &ReferenceGraph,
    image_key: &NodeKey,
    image: &Image,
    policy: &PrunePolicy,
) -> bool {
    if !policy.all_images && !image.is_managed() {
        debug!(image = %image.digest, "not managed by the integrated registry - keeping");
        return false;
    }

    if !policy.prune_over_size_limit && policy.is_young(image.created_at) {
        debug!(image = %image.digest, "younger than the retention threshold - keeping");
        return false;
    }

    for (predecessor, kinds) in graph.predecessors(image_key) {
        if kinds.contains(EdgeKind::StrongImageRef) {
            debug!(image = %image.digest, %predecessor, "strong reference - keeping");
            return false;
        }
    }

    true
}

pub(super) fn candidate_images(graph: &ReferenceGraph, policy: &PrunePolicy) -> BTreeSet<Digest> {
    graph
        .images()
        .filter(|(key, image)| image_is_prunable(graph, key, image, policy))
        .map(|(_, image)| image.digest.clone())
        .collect()
}
