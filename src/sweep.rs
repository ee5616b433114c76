//! Mark-and-sweep over the reference graph.
//!
//! The mark phase classifies every image with no strong inbound reference
//! (and satisfying the retention policy) as a deletion candidate. Candidate
//! references are first removed from persisted tag histories; streams whose
//! update failed get their outgoing weak edges strengthened so the sweep
//! cannot delete content a failed untag still points at. The surviving
//! candidates are then swept by a fixed pool of workers, heaviest image
//! first, with the coordinator as the sole mutator of the graph and the
//! queue - workers only call deletion collaborators and report back.
//!
//! The sweep is snapshot-only: resources created or retagged after the
//! snapshot was taken are not reconciled into a running sweep.

mod classify;
mod queue;
mod retention;
mod streams;
mod worker;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::anyhow;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub use self::queue::SweepQueue;
pub use self::retention::{
    ComponentRetention, ComponentRetentions, StreamRetention, resolve_components,
};
pub use self::worker::{Job, JobResult};

use self::worker::Worker;
use crate::builder::{BuildErrors, GraphBuilder};
use crate::cluster::{ImageDeleterFactory, StreamUpdater};
use crate::graph::{Node, NodeKey, ReferenceGraph};
use crate::model::{Digest, Snapshot};
use crate::policy::{PruneOptions, PrunePolicy};
use crate::registry::{BlobDeleter, LayerLinkDeleter, ManifestDeleter, RegistrySessionFactory};

/// One successfully deleted object. `parent` is set for stream-scoped link
/// deletions: the stream whose link to the component went away.
#[derive(Clone, Debug)]
pub struct Deletion {
    pub node: NodeKey,
    pub parent: Option<NodeKey>,
}

/// One failed operation, tied to the node it targeted when known.
#[derive(Debug)]
pub struct Failure {
    pub node: Option<NodeKey>,
    pub parent: Option<NodeKey>,
    pub error: anyhow::Error,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.node, &self.parent) {
            (Some(node), Some(parent)) => write!(f, "{node} (in {parent}): {:#}", self.error),
            (Some(node), None) => write!(f, "{node}: {:#}", self.error),
            _ => write!(f, "{:#}", self.error),
        }
    }
}

/// Everything a sweep calls out to. Dry runs inject no-op implementations;
/// the sweep itself is indifferent.
pub struct Collaborators {
    pub image_deleter_factory: ImageDeleterFactory,
    pub stream_updater: Arc<dyn StreamUpdater>,
    pub registry_session_factory: RegistrySessionFactory,
    pub blob_deleter: Arc<dyn BlobDeleter>,
    pub layer_link_deleter: Arc<dyn LayerLinkDeleter>,
    pub manifest_deleter: Arc<dyn ManifestDeleter>,
}

/// Reachability-based image pruner over one snapshot.
pub struct Pruner {
    graph: ReferenceGraph,
    policy: PrunePolicy,
    workers: usize,
    queue: SweepQueue,
    in_flight: BTreeSet<Digest>,
}

enum NextJob {
    Dispatch(Job),
    /// Every remaining queue item is waiting on an in-flight job.
    Blocked,
    Empty,
}

impl Pruner {
    /// Builds the reference graph from the snapshot. Construction errors
    /// abort before any deletion can happen, unless invalid references are
    /// explicitly ignored.
    pub fn new(
        snapshot: &Snapshot,
        options: &PruneOptions,
        now: OffsetDateTime,
    ) -> Result<Self, BuildErrors> {
        let policy = options.policy(now);
        let graph = GraphBuilder::new(&policy, options.ignore_invalid_refs).build(snapshot)?;
        debug!(nodes = graph.node_count(), "built reference graph");
        Ok(Self {
            graph,
            policy,
            workers: options.worker_count(),
            queue: SweepQueue::default(),
            in_flight: BTreeSet::new(),
        })
    }

    /// Runs one full sweep and returns everything deleted and everything
    /// that failed. The sweep always finishes; failures are collected, not
    /// raised.
    pub fn prune(mut self, collaborators: &Collaborators) -> (Vec<Deletion>, Vec<Failure>) {
        let candidates = classify::candidate_images(&self.graph, &self.policy);
        info!(candidates = candidates.len(), "calculated prunable images");

        // Untag everything up front; doing it per image would rewrite each
        // stream once per prunable image it contains.
        let (mut deletions, mut failures) = streams::prune_streams(
            &mut self.graph,
            &candidates,
            collaborators.stream_updater.as_ref(),
            self.policy.keep_younger_than,
        );

        if self.policy.namespace.is_some() || candidates.is_empty() {
            return (deletions, failures);
        }

        streams::strengthen_failed_stream_refs(&mut self.graph, &failures);

        self.queue = SweepQueue::seed(&self.graph, &candidates);

        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = mpsc::channel::<JobResult>();

        let mut handles: Vec<thread::JoinHandle<()>> = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let worker = match Worker::new(&self.policy, collaborators) {
                Ok(worker) => worker,
                Err(err) => {
                    failures.push(Failure {
                        node: None,
                        parent: None,
                        error: err.context("initialize worker"),
                    });
                    drop(job_tx);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return (deletions, failures);
                }
            };
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            handles.push(thread::spawn(move || worker.run(&jobs, &results)));
        }
        drop(result_tx);

        let (swept, sweep_failures) = self.run_loop(job_tx, result_rx);
        deletions.extend(swept);
        failures.extend(sweep_failures);

        for handle in handles {
            let _ = handle.join();
        }

        (deletions, failures)
    }

    /// Keeps the workers busy until the queue drains. The coordinator is the
    /// only thread touching the graph and the queue.
    fn run_loop(
        &mut self,
        job_tx: mpsc::Sender<Job>,
        result_rx: mpsc::Receiver<JobResult>,
    ) -> (Vec<Deletion>, Vec<Failure>) {
        let mut deletions = Vec::new();
        let mut failures = Vec::new();

        loop {
            while self.in_flight.len() < self.workers {
                match self.next_job() {
                    NextJob::Dispatch(job) => {
                        let image = job.image.clone();
                        if job_tx.send(job).is_err() {
                            failures.push(Failure {
                                node: Some(NodeKey::Image(image)),
                                parent: None,
                                error: anyhow!("worker pool shut down unexpectedly"),
                            });
                            return (deletions, failures);
                        }
                        self.in_flight.insert(image);
                    }
                    NextJob::Blocked => {
                        if self.in_flight.is_empty() {
                            warn!(
                                remaining = self.queue.len(),
                                "every queued image is blocked and nothing is in flight; \
                                 nothing further can be done",
                            );
                            return (deletions, failures);
                        }
                        break;
                    }
                    NextJob::Empty => break,
                }
            }

            if self.queue.is_empty() && self.in_flight.is_empty() {
                return (deletions, failures);
            }

            match result_rx.recv() {
                Ok(result) => {
                    self.update_graph_with_result(&result);
                    self.in_flight.remove(&result.image);
                    deletions.extend(result.deletions);
                    failures.extend(result.failures);
                }
                Err(_) => {
                    failures.push(Failure {
                        node: None,
                        parent: None,
                        error: anyhow!("worker pool shut down unexpectedly"),
                    });
                    return (deletions, failures);
                }
            }
        }
    }

    /// Scans the queue from the head. Items that stopped being prunable are
    /// dropped without dispatch; the first unblocked item becomes a job.
    fn next_job(&mut self) -> NextJob {
        let mut cursor = self.queue.head();
        let mut job = None;

        while let Some(slot) = cursor {
            let digest = self.queue.digest(slot).clone();
            let image_key = NodeKey::Image(digest.clone());

            // a new strong reference may have appeared since classification
            let still_prunable = match self.graph.node(&image_key) {
                Some(Node::Image(image)) => {
                    classify::image_is_prunable(&self.graph, &image_key, image, &self.policy)
                }
                _ => false,
            };
            if !still_prunable {
                debug!(image = %digest, "image no longer prunable - dropping from queue");
                cursor = self.queue.remove(slot);
                continue;
            }

            match resolve_components(&self.graph, &self.in_flight, &image_key) {
                Some(components) => {
                    self.queue.remove(slot);
                    job = Some(Job {
                        image: digest,
                        components,
                    });
                    break;
                }
                None => {
                    debug!(image = %digest, "image blocked on an in-flight deletion - deferring");
                    cursor = self.queue.next(slot);
                }
            }
        }

        match job {
            Some(job) => NextJob::Dispatch(job),
            None if self.queue.is_empty() => NextJob::Empty,
            None => NextJob::Blocked,
        }
    }

    /// Applies a finished job to the graph: deleted images and blob-store
    /// components lose their nodes, unlinked stream-scoped components lose
    /// only the stream edge.
    fn update_graph_with_result(&mut self, result: &JobResult) {
        for deletion in &result.deletions {
            match (&deletion.node, &deletion.parent) {
                (NodeKey::Image(_), _) => self.graph.remove_node(&deletion.node),
                (NodeKey::Component(_), None) => self.graph.remove_node(&deletion.node),
                (NodeKey::Component(_), Some(parent)) => {
                    self.graph.remove_edge(parent, &deletion.node);
                }
                _ => {}
            }
        }
    }
}

/// Summarizes deletions per object kind; handy for reporting.
pub fn deletion_counts(deletions: &[Deletion]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for deletion in deletions {
        let kind = match (&deletion.node, &deletion.parent) {
            (NodeKey::Image(_), _) => "images",
            (NodeKey::Component(_), None) => "blobs",
            (NodeKey::Component(_), Some(_)) => "links",
            (NodeKey::Stream { .. }, _) => "streams",
            _ => "other",
        };
        *counts.entry(kind).or_insert(0) += 1;
    }
    counts
}
