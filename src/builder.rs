//! Builds the reference graph from a cluster snapshot.
//!
//! Every resource type contributes its own edges: images bring their
//! components, streams bring tag-revision references (strong or weak per the
//! configured policy), workloads and build definitions bring strong
//! references to the images they run or build from.
//!
//! Reference problems found along the way are collected rather than thrown;
//! a non-empty collection aborts the sweep before anything is deleted,
//! unless invalid references were explicitly ignored.

mod builds;
mod images;
mod streams;
mod workloads;

use std::fmt;

use thiserror::Error;

use crate::graph::ReferenceGraph;
use crate::model::{RefParseError, Snapshot};
use crate::policy::PrunePolicy;

/// A malformed or unresolvable reference found during construction.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{referrer}: cannot parse image reference {reference:?}: {source}")]
    BadImageReference {
        referrer: String,
        reference: String,
        source: RefParseError,
    },
    #[error("{referrer}: cannot parse {kind} reference {reference:?}: {source}")]
    BadInputReference {
        kind: &'static str,
        referrer: String,
        reference: String,
        source: RefParseError,
    },
    #[error("image {digest}: malformed component digest {component:?}")]
    MalformedImage { digest: String, component: String },
}

/// Aggregate of every construction error. Callers must not prune when this
/// is returned; partial graphs under-count references.
#[derive(Debug, Default)]
pub struct BuildErrors(pub Vec<BuildError>);

impl fmt::Display for BuildErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} invalid reference(s) in the snapshot:", self.0.len())?;
        for err in &self.0 {
            writeln!(f, "  {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildErrors {}

pub struct GraphBuilder<'a> {
    graph: ReferenceGraph,
    policy: &'a PrunePolicy,
    ignore_invalid_refs: bool,
    errors: Vec<BuildError>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(policy: &'a PrunePolicy, ignore_invalid_refs: bool) -> Self {
        Self {
            graph: ReferenceGraph::new(),
            policy,
            ignore_invalid_refs,
            errors: Vec::new(),
        }
    }

    pub fn build(mut self, snapshot: &Snapshot) -> Result<ReferenceGraph, BuildErrors> {
        use crate::graph::WorkloadKind::*;

        self.add_images(&snapshot.images);
        self.add_image_streams(&snapshot.streams, &snapshot.size_limits);
        self.add_pods(&snapshot.pods);
        self.add_pod_controllers(ReplicationController, &snapshot.replication_controllers);
        self.add_pod_controllers(DaemonSet, &snapshot.daemon_sets);
        self.add_pod_controllers(Deployment, &snapshot.deployments);
        self.add_pod_controllers(DeploymentConfig, &snapshot.deployment_configs);
        self.add_pod_controllers(ReplicaSet, &snapshot.replica_sets);
        self.add_build_configs(&snapshot.build_configs);
        self.add_builds(&snapshot.builds);

        if self.errors.is_empty() {
            Ok(self.graph)
        } else {
            Err(BuildErrors(self.errors))
        }
    }
}
