//! Sweep workers: fixed-size executors that consume jobs, call the deletion
//! collaborators and stream results back to the coordinator. Workers never
//! touch the graph or the queue.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::retention::ComponentRetentions;
use super::{Collaborators, Deletion, Failure};
use crate::cluster::{ClusterError, ImageDeleter};
use crate::graph::{ComponentKind, NodeKey};
use crate::model::Digest;
use crate::policy::PrunePolicy;
use crate::registry::{BlobDeleter, LayerLinkDeleter, ManifestDeleter, RegistrySession};

/// One unit of sweeping: a prunable image plus where each of its components
/// may be deleted.
pub struct Job {
    pub image: Digest,
    pub components: ComponentRetentions,
}

/// Outcome of one job.
pub struct JobResult {
    pub image: Digest,
    pub deletions: Vec<Deletion>,
    pub failures: Vec<Failure>,
}

pub(super) struct Worker {
    prune_registry: bool,
    session: RegistrySession,
    image_deleter: Box<dyn ImageDeleter>,
    blob_deleter: Arc<dyn BlobDeleter>,
    layer_link_deleter: Arc<dyn LayerLinkDeleter>,
    manifest_deleter: Arc<dyn ManifestDeleter>,
}

impl Worker {
    pub(super) fn new(
        policy: &PrunePolicy,
        collaborators: &Collaborators,
    ) -> anyhow::Result<Self> {
        let session = (collaborators.registry_session_factory)()?;
        let image_deleter = (collaborators.image_deleter_factory)()?;
        Ok(Self {
            prune_registry: policy.prune_registry,
            session,
            image_deleter,
            blob_deleter: Arc::clone(&collaborators.blob_deleter),
            layer_link_deleter: Arc::clone(&collaborators.layer_link_deleter),
            manifest_deleter: Arc::clone(&collaborators.manifest_deleter),
        })
    }

    /// Loops on the shared job channel until the coordinator closes it.
    pub(super) fn run(&self, jobs: &Mutex<Receiver<Job>>, results: &Sender<JobResult>) {
        loop {
            let job = {
                let receiver = jobs.lock().unwrap_or_else(PoisonError::into_inner);
                receiver.recv()
            };
            let Ok(job) = job else {
                return;
            };
            let result = self.execute(job);
            if results.send(result).is_err() {
                return;
            }
        }
    }

    /// Deletes one image and whatever parts of it are free to go: first the
    /// stream-scoped layer and config links, then globally unreferenced
    /// blobs, then stream-scoped manifest links. The image object itself is
    /// only deleted when every attempted blob deletion succeeded; otherwise
    /// it stays so its components remain discoverable for a later sweep.
    fn execute(&self, job: Job) -> JobResult {
        debug!(image = %job.image, "sweeping image");

        let mut deletions = Vec::new();
        let mut failures = Vec::new();
        let mut blobs_failed = false;

        if self.prune_registry {
            for (digest, retention) in &job.components {
                if retention.kind == ComponentKind::Manifest {
                    continue;
                }
                for stream in retention.streams.iter().filter(|s| s.prunable) {
                    let outcome = self.layer_link_deleter.delete_layer_link(
                        &self.session,
                        &stream.repository,
                        digest.as_str(),
                    );
                    record(
                        outcome,
                        NodeKey::Component(digest.clone()),
                        Some(stream.stream.clone()),
                        &mut deletions,
                        &mut failures,
                    );
                }
            }

            for (digest, retention) in &job.components {
                if !retention.prunable_globally {
                    continue;
                }
                let outcome = self.blob_deleter.delete_blob(&self.session, digest.as_str());
                if outcome.is_err() {
                    blobs_failed = true;
                }
                record(
                    outcome,
                    NodeKey::Component(digest.clone()),
                    None,
                    &mut deletions,
                    &mut failures,
                );
            }

            for (digest, retention) in &job.components {
                if retention.kind != ComponentKind::Manifest {
                    continue;
                }
                for stream in retention.streams.iter().filter(|s| s.prunable) {
                    let outcome = self.manifest_deleter.delete_manifest(
                        &self.session,
                        &stream.repository,
                        digest.as_str(),
                    );
                    record(
                        outcome,
                        NodeKey::Component(digest.clone()),
                        Some(stream.stream.clone()),
                        &mut deletions,
                        &mut failures,
                    );
                }
            }
        }

        if blobs_failed {
            debug!(
                image = %job.image,
                "keeping image: some of its blobs could not be deleted",
            );
        } else {
            match self.image_deleter.delete_image(&job.image) {
                Ok(()) | Err(ClusterError::NotFound) => deletions.push(Deletion {
                    node: NodeKey::Image(job.image.clone()),
                    parent: None,
                }),
                Err(err) => failures.push(Failure {
                    node: Some(NodeKey::Image(job.image.clone())),
                    parent: None,
                    error: anyhow::Error::from(err).context("delete image object"),
                }),
            }
        }

        JobResult {
            image: job.image,
            deletions,
            failures,
        }
    }
}

fn record(
    outcome: anyhow::Result<()>,
    node: NodeKey,
    parent: Option<NodeKey>,
    deletions: &mut Vec<Deletion>,
    failures: &mut Vec<Failure>,
) {
    match outcome {
        Ok(()) => deletions.push(Deletion { node, parent }),
        Err(error) => failures.push(Failure {
            node: Some(node),
            parent,
            error,
        }),
    }
}
