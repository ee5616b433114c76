//! Typed reference graph over cluster and registry objects.
//!
//! Nodes are keyed by their stable identity (kind plus namespace/name or
//! content digest), so insertion is idempotent: ensuring a node that already
//! exists returns the existing one. Edges are directed and carry a *set* of
//! kind labels; inserting an edge between the same two nodes twice unions the
//! labels instead of duplicating the edge.
//!
//! The graph is built once per sweep from a snapshot and mutated by a single
//! owner while jobs complete (edges strengthened, nodes removed). Removing a
//! node detaches its edges; the key itself is a value and may be re-inserted
//! later.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::{Digest, Image, ImageStream};

/// Role a content-addressed component plays for the image that declared it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComponentKind {
    Layer,
    Config,
    Manifest,
}

/// Workload variants that reference images through a pod template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkloadKind {
    Pod,
    ReplicationController,
    DaemonSet,
    Deployment,
    DeploymentConfig,
    ReplicaSet,
}

impl WorkloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Pod => "pod",
            WorkloadKind::ReplicationController => "replicationcontroller",
            WorkloadKind::DaemonSet => "daemonset",
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::DeploymentConfig => "deploymentconfig",
            WorkloadKind::ReplicaSet => "replicaset",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildKind {
    BuildConfig,
    Build,
}

impl BuildKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildKind::BuildConfig => "buildconfig",
            BuildKind::Build => "build",
        }
    }
}

/// Stable identity of a node.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeKey {
    Image(Digest),
    Component(Digest),
    Stream {
        namespace: String,
        name: String,
    },
    StreamTag {
        namespace: String,
        name: String,
        tag: String,
    },
    Workload {
        kind: WorkloadKind,
        namespace: String,
        name: String,
    },
    Build {
        kind: BuildKind,
        namespace: String,
        name: String,
    },
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Image(d) => write!(f, "image {d}"),
            NodeKey::Component(d) => write!(f, "component {d}"),
            NodeKey::Stream { namespace, name } => {
                write!(f, "imagestream {namespace}/{name}")
            }
            NodeKey::StreamTag {
                namespace,
                name,
                tag,
            } => write!(f, "imagestreamtag {namespace}/{name}:{tag}"),
            NodeKey::Workload {
                kind,
                namespace,
                name,
            } => write!(f, "{} {namespace}/{name}", kind.as_str()),
            NodeKey::Build {
                kind,
                namespace,
                name,
            } => write!(f, "{} {namespace}/{name}", kind.as_str()),
        }
    }
}

/// Payload stored at a node.
#[derive(Clone, Debug)]
pub enum Node {
    Image(Image),
    Component { digest: Digest, kind: ComponentKind },
    Stream(ImageStream),
    StreamTag {
        namespace: String,
        name: String,
        tag: String,
    },
    Workload {
        kind: WorkloadKind,
        namespace: String,
        name: String,
    },
    Build {
        kind: BuildKind,
        namespace: String,
        name: String,
    },
}

impl Node {
    pub fn key(&self) -> NodeKey {
        match self {
            Node::Image(image) => NodeKey::Image(image.digest.clone()),
            Node::Component { digest, .. } => NodeKey::Component(digest.clone()),
            Node::Stream(stream) => NodeKey::Stream {
                namespace: stream.namespace.clone(),
                name: stream.name.clone(),
            },
            Node::StreamTag {
                namespace,
                name,
                tag,
            } => NodeKey::StreamTag {
                namespace: namespace.clone(),
                name: name.clone(),
                tag: tag.clone(),
            },
            Node::Workload {
                kind,
                namespace,
                name,
            } => NodeKey::Workload {
                kind: *kind,
                namespace: namespace.clone(),
                name: name.clone(),
            },
            Node::Build {
                kind,
                namespace,
                name,
            } => NodeKey::Build {
                kind: *kind,
                namespace: namespace.clone(),
                name: name.clone(),
            },
        }
    }
}

/// Directed relation labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    /// The referenced image must not be pruned.
    StrongImageRef,
    /// Bookkeeping reference; cleaned up if the image is pruned.
    WeakImageRef,
    LayerRef,
    ConfigRef,
    ManifestRef,
}

impl EdgeKind {
    fn bit(self) -> u8 {
        match self {
            EdgeKind::StrongImageRef => 1 << 0,
            EdgeKind::WeakImageRef => 1 << 1,
            EdgeKind::LayerRef => 1 << 2,
            EdgeKind::ConfigRef => 1 << 3,
            EdgeKind::ManifestRef => 1 << 4,
        }
    }

    pub fn for_component(kind: ComponentKind) -> EdgeKind {
        match kind {
            ComponentKind::Layer => EdgeKind::LayerRef,
            ComponentKind::Config => EdgeKind::ConfigRef,
            ComponentKind::Manifest => EdgeKind::ManifestRef,
        }
    }
}

/// The set of kinds carried by one edge. An edge holding both strong and weak
/// labels behaves as strong.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeKinds(u8);

impl EdgeKinds {
    pub fn insert(&mut self, kind: EdgeKind) {
        self.0 |= kind.bit();
    }

    pub fn contains(self, kind: EdgeKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn has_component_ref(self) -> bool {
        self.contains(EdgeKind::LayerRef)
            || self.contains(EdgeKind::ConfigRef)
            || self.contains(EdgeKind::ManifestRef)
    }
}

impl fmt::Debug for EdgeKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let all = [
            EdgeKind::StrongImageRef,
            EdgeKind::WeakImageRef,
            EdgeKind::LayerRef,
            EdgeKind::ConfigRef,
            EdgeKind::ManifestRef,
        ];
        f.debug_set()
            .entries(all.iter().filter(|k| self.contains(**k)))
            .finish()
    }
}

/// The reference graph. `BTreeMap` adjacency keeps iteration deterministic,
/// which keeps sweeps reproducible from the same snapshot.
#[derive(Default)]
pub struct ReferenceGraph {
    nodes: BTreeMap<NodeKey, Node>,
    outgoing: BTreeMap<NodeKey, BTreeMap<NodeKey, EdgeKinds>>,
    incoming: BTreeMap<NodeKey, BTreeMap<NodeKey, EdgeKinds>>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert: an existing node keeps its payload.
    pub fn ensure_node(&mut self, node: Node) -> NodeKey {
        let key = node.key();
        self.nodes.entry(key.clone()).or_insert(node);
        key
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node(&self, key: &NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: &NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    pub fn image(&self, digest: &Digest) -> Option<&Image> {
        match self.nodes.get(&NodeKey::Image(digest.clone())) {
            Some(Node::Image(image)) => Some(image),
            _ => None,
        }
    }

    /// Unions `kind` into the edge, creating the edge if absent. Both
    /// endpoints must already be in the graph.
    pub fn add_edge(&mut self, from: &NodeKey, to: &NodeKey, kind: EdgeKind) {
        assert!(self.nodes.contains_key(from), "edge from unknown node {from}");
        assert!(self.nodes.contains_key(to), "edge to unknown node {to}");
        self.outgoing
            .entry(from.clone())
            .or_default()
            .entry(to.clone())
            .or_default()
            .insert(kind);
        self.incoming
            .entry(to.clone())
            .or_default()
            .entry(from.clone())
            .or_default()
            .insert(kind);
    }

    pub fn remove_edge(&mut self, from: &NodeKey, to: &NodeKey) {
        if let Some(out) = self.outgoing.get_mut(from) {
            out.remove(to);
        }
        if let Some(inn) = self.incoming.get_mut(to) {
            inn.remove(from);
        }
    }

    /// Detaches every edge and drops the node. The key may be re-inserted.
    pub fn remove_node(&mut self, key: &NodeKey) {
        if let Some(out) = self.outgoing.remove(key) {
            for to in out.keys() {
                if let Some(inn) = self.incoming.get_mut(to) {
                    inn.remove(key);
                }
            }
        }
        if let Some(inn) = self.incoming.remove(key) {
            for from in inn.keys() {
                if let Some(out) = self.outgoing.get_mut(from) {
                    out.remove(key);
                }
            }
        }
        self.nodes.remove(key);
    }

    pub fn edge_kinds(&self, from: &NodeKey, to: &NodeKey) -> Option<EdgeKinds> {
        self.outgoing.get(from)?.get(to).copied()
    }

    pub fn predecessors(&self, key: &NodeKey) -> impl Iterator<Item = (&NodeKey, EdgeKinds)> {
        self.incoming
            .get(key)
            .into_iter()
            .flatten()
            .map(|(k, kinds)| (k, *kinds))
    }

    pub fn successors(&self, key: &NodeKey) -> impl Iterator<Item = (&NodeKey, EdgeKinds)> {
        self.outgoing
            .get(key)
            .into_iter()
            .flatten()
            .map(|(k, kinds)| (k, *kinds))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&NodeKey, &Node)> {
        self.nodes.iter()
    }

    pub fn images(&self) -> impl Iterator<Item = (&NodeKey, &Image)> {
        self.nodes.iter().filter_map(|(key, node)| match node {
            Node::Image(image) => Some((key, image)),
            _ => None,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    fn image(id: &str) -> Node {
        Node::Image(Image {
            digest: Digest(format!("sha256:{id:0>8}")),
            created_at: OffsetDateTime::UNIX_EPOCH,
            size_bytes: 0,
            annotations: Default::default(),
            layers: vec![],
            config: None,
        })
    }

    fn layer(id: &str) -> Node {
        Node::Component {
            digest: Digest(format!("sha256:{id:0>8}")),
            kind: ComponentKind::Layer,
        }
    }

    #[test]
    fn ensure_node_is_idempotent() {
        let mut g = ReferenceGraph::new();
        let a = g.ensure_node(image("aa"));
        let b = g.ensure_node(image("aa"));
        assert_eq!(a, b);
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn repeated_edges_union_their_kinds() {
        let mut g = ReferenceGraph::new();
        let a = g.ensure_node(image("aa"));
        let b = g.ensure_node(image("bb"));
        g.add_edge(&a, &b, EdgeKind::WeakImageRef);
        g.add_edge(&a, &b, EdgeKind::StrongImageRef);

        let kinds = g.edge_kinds(&a, &b).unwrap();
        assert!(kinds.contains(EdgeKind::WeakImageRef));
        assert!(kinds.contains(EdgeKind::StrongImageRef));
        // still a single edge
        assert_eq!(g.successors(&a).count(), 1);
        assert_eq!(g.predecessors(&b).count(), 1);
    }

    #[test]
    fn remove_node_detaches_both_directions() {
        let mut g = ReferenceGraph::new();
        let a = g.ensure_node(image("aa"));
        let b = g.ensure_node(image("bb"));
        let l = g.ensure_node(layer("11"));
        g.add_edge(&a, &l, EdgeKind::LayerRef);
        g.add_edge(&b, &l, EdgeKind::LayerRef);

        g.remove_node(&a);
        assert!(!g.contains(&a));
        assert_eq!(g.predecessors(&l).count(), 1);

        // the identity can come back
        let a2 = g.ensure_node(image("aa"));
        assert_eq!(a2, NodeKey::Image(Digest("sha256:000000aa".into())));
        assert_eq!(g.predecessors(&a2).count(), 0);
    }

    #[test]
    fn remove_edge_leaves_nodes_in_place() {
        let mut g = ReferenceGraph::new();
        let a = g.ensure_node(image("aa"));
        let l = g.ensure_node(layer("11"));
        g.add_edge(&a, &l, EdgeKind::LayerRef);
        g.remove_edge(&a, &l);
        assert!(g.edge_kinds(&a, &l).is_none());
        assert!(g.contains(&a));
        assert!(g.contains(&l));
    }
}
