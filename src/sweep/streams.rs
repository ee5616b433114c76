//! Tag-history rewriting: removes persisted tag references to candidate and
//! absent-expired images, stream by stream.

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::debug;

use super::{Deletion, Failure};
use crate::cluster::{ClusterError, StreamUpdater};
use crate::graph::{EdgeKind, Node, NodeKey, ReferenceGraph};
use crate::model::{Digest, ImageStream, TagRevision};

const MAX_UPDATE_ATTEMPTS: u32 = 5;
const CONFLICT_BACKOFF: Duration = Duration::from_millis(10);

enum StreamOutcome {
    Unchanged,
    Updated,
}

/// Re-fetches every stream, drops removable tag revisions and persists the
/// result. Conflicts are retried from a fresh read; a stream that vanished
/// mid-sweep is nothing to do, not a failure.
pub(super) fn prune_streams(
    graph: &mut ReferenceGraph,
    candidates: &BTreeSet<Digest>,
    updater: &dyn StreamUpdater,
    keep_younger_than: OffsetDateTime,
) -> (Vec<Deletion>, Vec<Failure>) {
    let mut deletions = Vec::new();
    let mut failures = Vec::new();

    debug!("removing pruned image references from streams");

    let stream_keys: Vec<NodeKey> = graph
        .nodes()
        .filter(|(key, _)| matches!(key, NodeKey::Stream { .. }))
        .map(|(key, _)| key.clone())
        .collect();

    for stream_key in stream_keys {
        match prune_one_stream(graph, &stream_key, candidates, updater, keep_younger_than) {
            Ok(StreamOutcome::Unchanged) => {}
            Ok(StreamOutcome::Updated) => deletions.push(Deletion {
                node: stream_key,
                parent: None,
            }),
            Err(error) => failures.push(Failure {
                node: Some(stream_key),
                parent: None,
                error,
            }),
        }
    }

    (deletions, failures)
}

fn prune_one_stream(
    graph: &mut ReferenceGraph,
    stream_key: &NodeKey,
    candidates: &BTreeSet<Digest>,
    updater: &dyn StreamUpdater,
    keep_younger_than: OffsetDateTime,
) -> anyhow::Result<StreamOutcome> {
    let NodeKey::Stream { namespace, name } = stream_key else {
        return Ok(StreamOutcome::Unchanged);
    };

    let mut attempt = 0;
    loop {
        attempt += 1;

        let mut stream = match updater.get_stream(namespace, name) {
            Ok(stream) => stream,
            Err(ClusterError::NotFound) => {
                debug!(stream = %stream_key, "removed during prune - nothing to do");
                return Ok(StreamOutcome::Unchanged);
            }
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("re-read image stream {namespace}/{name}")));
            }
        };

        let (updated_tags, deleted_tags) =
            rewrite_tag_history(graph, &mut stream, candidates, keep_younger_than);
        if updated_tags.is_empty() && deleted_tags.is_empty() {
            return Ok(StreamOutcome::Unchanged);
        }

        match updater.update_stream(&stream) {
            Ok(persisted) => {
                updater.notify(&stream, &updated_tags, &deleted_tags);
                if let Some(Node::Stream(node)) = graph.node_mut(stream_key) {
                    *node = persisted;
                }
                return Ok(StreamOutcome::Updated);
            }
            Err(ClusterError::NotFound) => {
                debug!(stream = %stream_key, "removed during prune - nothing to do");
                return Ok(StreamOutcome::Unchanged);
            }
            Err(ClusterError::Conflict) if attempt < MAX_UPDATE_ATTEMPTS => {
                debug!(stream = %stream_key, attempt, "conflict on update - retrying");
                thread::sleep(CONFLICT_BACKOFF * attempt);
                continue;
            }
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("update image stream {namespace}/{name}")));
            }
        }
    }
}

/// Drops removable revisions from every tag, preserving the relative order
/// of survivors. A tag whose history empties is deleted from the stream
/// rather than kept as an empty list.
fn rewrite_tag_history(
    graph: &ReferenceGraph,
    stream: &mut ImageStream,
    candidates: &BTreeSet<Digest>,
    keep_younger_than: OffsetDateTime,
) -> (Vec<String>, Vec<String>) {
    let mut updated = Vec::new();
    let mut deleted = Vec::new();

    stream.tags.retain_mut(|history| {
        let before = history.revisions.len();
        history.revisions.retain(|revision| {
            let (prunable, reason) =
                revision_is_prunable(graph, revision, candidates, keep_younger_than);
            if prunable {
                debug!(tag = %history.tag, image = %revision.digest, reason, "dropping revision");
            }
            !prunable
        });

        if history.revisions.is_empty() {
            deleted.push(history.tag.clone());
            false
        } else {
            if history.revisions.len() != before {
                updated.push(history.tag.clone());
            }
            true
        }
    });

    (updated, deleted)
}

/// A revision goes away when its image is being deleted, or when the image
/// is absent from the graph entirely and the entry itself has outlived the
/// retention threshold. Absent but young is kept: the image may have been
/// pushed while this sweep was running.
fn revision_is_prunable(
    graph: &ReferenceGraph,
    revision: &TagRevision,
    candidates: &BTreeSet<Digest>,
    keep_younger_than: OffsetDateTime,
) -> (bool, &'static str) {
    if candidates.contains(&revision.digest) {
        return (true, "image is being deleted");
    }
    if graph.contains(&NodeKey::Image(revision.digest.clone())) {
        return (false, "image is kept");
    }
    if revision.created_at <= keep_younger_than {
        return (true, "image is absent and the entry has expired");
    }
    (false, "image is absent but the entry is still young")
}

/// For every stream whose update failed, upgrades each outgoing weak image
/// edge to strong. A failed untag leaves the stream still referencing the
/// image; deleting the image (or its blobs) anyway would corrupt it.
pub(super) fn strengthen_failed_stream_refs(graph: &mut ReferenceGraph, failures: &[Failure]) {
    for failure in failures {
        let Some(stream_key) = &failure.node else {
            continue;
        };
        if !matches!(stream_key, NodeKey::Stream { .. }) {
            continue;
        }

        let weak_images: Vec<NodeKey> = graph
            .successors(stream_key)
            .filter(|(key, kinds)| {
                matches!(key, NodeKey::Image(_)) && !kinds.contains(EdgeKind::StrongImageRef)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for image_key in weak_images {
            debug!(stream = %stream_key, image = %image_key, "strengthening reference after failed update");
            graph.remove_edge(stream_key, &image_key);
            graph.add_edge(stream_key, &image_key, EdgeKind::StrongImageRef);
        }
    }
}
