use std::collections::BTreeMap;

use tracing::debug;

use super::GraphBuilder;
use crate::graph::{EdgeKind, Node, NodeKey};
use crate::model::{Image, ImageStream, SizeLimit};

impl GraphBuilder<'_> {
    /// Adds every stream with edges to the images its tag histories
    /// reference.
    ///
    /// Revision edges are weak or strong per the configured policy: in
    /// age/keep-count mode, the newest `keep_tag_revisions` entries are
    /// strong, older ones weak unless the stream itself is still young; in
    /// size-limit mode, an entry is weak exactly when its image exceeds the
    /// namespace limit. Only the newest revision of a tag produces a tag
    /// node edge. The stream node accumulates an edge per referenced image,
    /// and strong wins: once a stream->image edge is strong it is never
    /// downgraded by an older weak revision.
    pub(super) fn add_image_streams(
        &mut self,
        streams: &[ImageStream],
        limits: &BTreeMap<String, Vec<SizeLimit>>,
    ) {
        for stream in streams {
            debug!(stream = %stream.qualified_name(), "adding image stream to graph");

            // Old revisions get weak references by default; a young stream
            // protects all of its history instead.
            let old_revision_kind = if !self.policy.prune_over_size_limit
                && self.policy.is_young(stream.created_at)
            {
                EdgeKind::StrongImageRef
            } else {
                EdgeKind::WeakImageRef
            };

            let stream_key = self.graph.ensure_node(Node::Stream(stream.clone()));

            for history in &stream.tags {
                let tag_key = self.graph.ensure_node(Node::StreamTag {
                    namespace: stream.namespace.clone(),
                    name: stream.name.clone(),
                    tag: history.tag.clone(),
                });

                for (i, revision) in history.revisions.iter().enumerate() {
                    let image_key = NodeKey::Image(revision.digest.clone());
                    let Some(image) = self.graph.image(&revision.digest) else {
                        debug!(
                            tag = %history.tag,
                            revision = i,
                            image = %revision.digest,
                            "image not in snapshot - skipping revision",
                        );
                        continue;
                    };

                    let kind = if self.policy.prune_over_size_limit {
                        if exceeds_limits(&stream.namespace, image, limits) {
                            EdgeKind::WeakImageRef
                        } else {
                            EdgeKind::StrongImageRef
                        }
                    } else if i < self.policy.keep_tag_revisions {
                        EdgeKind::StrongImageRef
                    } else {
                        old_revision_kind
                    };

                    // Tags reference their current value only.
                    if i == 0 {
                        self.graph.add_edge(&tag_key, &image_key, kind);
                    }

                    if self
                        .graph
                        .edge_kinds(&stream_key, &image_key)
                        .is_some_and(|k| k.contains(EdgeKind::StrongImageRef))
                    {
                        continue;
                    }

                    self.graph.add_edge(&stream_key, &image_key, kind);

                    // Copy the image's component edges onto the stream so it
                    // can later be asked which components it still uses.
                    let components: Vec<(NodeKey, EdgeKind)> = self
                        .graph
                        .successors(&image_key)
                        .filter_map(|(key, kinds)| match self.graph.node(key) {
                            Some(Node::Component { kind, .. }) if kinds.has_component_ref() => {
                                Some((key.clone(), EdgeKind::for_component(*kind)))
                            }
                            _ => None,
                        })
                        .collect();
                    for (component_key, component_kind) in components {
                        self.graph
                            .add_edge(&stream_key, &component_key, component_kind);
                    }
                }
            }
        }
    }
}

/// True when the image is larger than any limit declared in the stream's
/// namespace; the smallest limit is the one that bites.
fn exceeds_limits(
    namespace: &str,
    image: &Image,
    limits: &BTreeMap<String, Vec<SizeLimit>>,
) -> bool {
    limits
        .get(namespace)
        .is_some_and(|ranges| ranges.iter().any(|l| image.size_bytes > l.max_image_bytes))
}
