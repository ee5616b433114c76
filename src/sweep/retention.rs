//! Component retention: decides, per component of a candidate image, whether
//! it is globally free, still held by someone, or must wait.
//!
//! The reference counts deliberately subtract images whose deletion is
//! already dispatched but not yet confirmed. When that subtraction would
//! leave a component with a single referrer that is itself in flight, the
//! whole image is blocked rather than risking deletion of a component the
//! running job still needs. Any ambiguity defers; nothing is dropped.

use std::collections::{BTreeMap, BTreeSet};

use crate::graph::{ComponentKind, EdgeKind, Node, NodeKey, ReferenceGraph};
use crate::model::Digest;

/// Where one component may be deleted once its image goes away.
#[derive(Clone, Debug)]
pub struct ComponentRetention {
    pub kind: ComponentKind,
    /// No other surviving image references the component; it may leave the
    /// global blob store.
    pub prunable_globally: bool,
    /// Per-stream link decisions for streams tagging the component.
    pub streams: Vec<StreamRetention>,
}

#[derive(Clone, Debug)]
pub struct StreamRetention {
    pub stream: NodeKey,
    /// Repository name (`namespace/name`) for registry link deletion.
    pub repository: String,
    /// The stream's link to the component may be removed.
    pub prunable: bool,
}

pub type ComponentRetentions = BTreeMap<Digest, ComponentRetention>;

enum LinkDecision {
    Keep,
    Unlink,
    Blocked,
}

/// Resolves every component of `image`. Returns `None` when the image is
/// blocked: deleting it now could race with an in-flight job that shares one
/// of its components.
pub fn resolve_components(
    graph: &ReferenceGraph,
    in_flight: &BTreeSet<Digest>,
    image: &NodeKey,
) -> Option<ComponentRetentions> {
    let mut components = ComponentRetentions::new();

    for (component_key, edge_kinds) in graph.successors(image) {
        if !edge_kinds.has_component_ref() {
            continue;
        }
        let Some(Node::Component { digest, kind }) = graph.node(component_key) else {
            continue;
        };

        let mut image_refs = 0usize;
        let mut in_flight_refs = 0usize;
        let mut referencing_images: Vec<Digest> = Vec::new();
        let mut referencing_streams: Vec<NodeKey> = Vec::new();

        for (predecessor, _) in graph.predecessors(component_key) {
            match predecessor {
                NodeKey::Image(d) => {
                    image_refs += 1;
                    if in_flight.contains(d) {
                        in_flight_refs += 1;
                    }
                    referencing_images.push(d.clone());
                }
                NodeKey::Stream { .. } => referencing_streams.push(predecessor.clone()),
                _ => {}
            }
        }

        let prunable_globally = if image_refs < 2 {
            // only this image references the component
            true
        } else if image_refs - in_flight_refs < 2 {
            // the only other referrer is being deleted right now; wait for it
            return None;
        } else {
            false
        };

        let mut retention = ComponentRetention {
            kind: *kind,
            prunable_globally,
            streams: Vec::new(),
        };

        for stream in &referencing_streams {
            let NodeKey::Stream { namespace, name } = stream else {
                continue;
            };
            let repository = format!("{namespace}/{name}");
            match stream_link_decision(graph, in_flight, stream, &referencing_images) {
                LinkDecision::Keep => retention.streams.push(StreamRetention {
                    stream: stream.clone(),
                    repository,
                    prunable: false,
                }),
                LinkDecision::Unlink => retention.streams.push(StreamRetention {
                    stream: stream.clone(),
                    repository,
                    prunable: true,
                }),
                LinkDecision::Blocked => return None,
            }
        }

        components.insert(digest.clone(), retention);
    }

    Some(components)
}

/// Decides the fate of one stream's link to a component, looking at how the
/// stream references the images using that component.
fn stream_link_decision(
    graph: &ReferenceGraph,
    in_flight: &BTreeSet<Digest>,
    stream: &NodeKey,
    referencing_images: &[Digest],
) -> LinkDecision {
    let mut weak_refs = 0usize;
    let mut weak_in_flight = 0usize;

    for digest in referencing_images {
        let image_key = NodeKey::Image(digest.clone());
        let Some(kinds) = graph.edge_kinds(stream, &image_key) else {
            continue;
        };
        // a strong reference to any image using the component keeps the link
        if kinds.contains(EdgeKind::StrongImageRef) {
            return LinkDecision::Keep;
        }
        if !kinds.contains(EdgeKind::WeakImageRef) {
            continue;
        }

        weak_refs += 1;
        if in_flight.contains(digest) {
            weak_in_flight += 1;
        }
        if weak_refs - weak_in_flight > 1 {
            return LinkDecision::Keep;
        }
    }

    if weak_refs < 2 {
        LinkDecision::Unlink
    } else if weak_refs - weak_in_flight < 2 {
        LinkDecision::Blocked
    } else {
        LinkDecision::Keep
    }
}
