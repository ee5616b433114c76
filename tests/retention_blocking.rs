//! Component retention resolution and in-flight blocking.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::*;

use time::Duration;

use reclaim::builder::GraphBuilder;
use reclaim::graph::NodeKey;
use reclaim::model::Snapshot;
use reclaim::policy::PruneOptions;
use reclaim::sweep::{Pruner, resolve_components};

fn age_options() -> PruneOptions {
    PruneOptions {
        keep_younger_than: Some(Duration::hours(1)),
        ..Default::default()
    }
}

fn shared_layer_snapshot() -> Snapshot {
    Snapshot {
        images: vec![
            image("0a", hours_ago(20), &["11", "a1"]),
            image("0b", hours_ago(10), &["11", "b1"]),
        ],
        ..Default::default()
    }
}

#[test]
fn image_is_blocked_while_the_other_referrer_is_in_flight() {
    let snapshot = shared_layer_snapshot();
    let policy = age_options().policy(now());
    let graph = GraphBuilder::new(&policy, false)
        .build(&snapshot)
        .expect("clean snapshot");

    let a = NodeKey::Image(digest("0a"));

    // nothing in flight: the shared layer is retained, not blocking
    let retentions =
        resolve_components(&graph, &BTreeSet::new(), &a).expect("not blocked");
    let shared = retentions.get(&digest("11")).expect("shared layer resolved");
    assert!(!shared.prunable_globally);
    let unique = retentions.get(&digest("a1")).expect("unique layer resolved");
    assert!(unique.prunable_globally);

    // the only other referrer is being deleted right now: defer
    let in_flight: BTreeSet<_> = [digest("0b")].into();
    assert!(resolve_components(&graph, &in_flight, &a).is_none());
}

#[test]
fn shared_layer_is_deleted_exactly_once_across_jobs() {
    // With two workers the heavier image is dispatched first and the second
    // image blocks on the shared layer until the first job completes; the
    // layer must still go away in the end, from exactly one job.
    let snapshot = shared_layer_snapshot();

    let options = PruneOptions {
        keep_younger_than: Some(Duration::hours(1)),
        workers: Some(2),
        ..Default::default()
    };

    let (_, registry, images, collaborators) = collaborators_for(&snapshot);
    let pruner = Pruner::new(&snapshot, &options, now()).expect("clean snapshot");
    let (_, failures) = pruner.prune(&collaborators);
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");

    let mut deleted = images.deleted.lock().unwrap().clone();
    deleted.sort();
    assert_eq!(
        deleted,
        vec![digest("0a").to_string(), digest("0b").to_string()],
    );

    let blobs = registry.deleted_blobs();
    let shared = digest("11").to_string();
    assert_eq!(
        blobs.iter().filter(|b| **b == shared).count(),
        1,
        "shared layer deleted from exactly one job: {blobs:?}",
    );

    let mut blobs = blobs;
    blobs.sort();
    assert_eq!(
        blobs,
        vec![
            digest("0a").to_string(),
            digest("0b").to_string(),
            digest("11").to_string(),
            digest("a1").to_string(),
            digest("b1").to_string(),
        ],
    );
}

#[test]
fn image_is_kept_when_its_blob_deletions_fail() {
    let snapshot = Snapshot {
        images: vec![image("0a", hours_ago(20), &["a1"])],
        ..Default::default()
    };

    let updater = Arc::new(RecordingStreamUpdater::new(vec![]));
    let registry = Arc::new(RecordingRegistryDeleter {
        fail_blobs: true,
        ..Default::default()
    });
    let images = Arc::new(RecordingImageDeleter::default());
    let collaborators = collaborators(updater, registry.clone(), images.clone());

    let pruner = Pruner::new(&snapshot, &age_options(), now()).expect("clean snapshot");
    let (_, failures) = pruner.prune(&collaborators);

    assert!(!failures.is_empty());
    assert!(
        images.deleted.lock().unwrap().is_empty(),
        "an image whose blobs could not be deleted must be kept",
    );
}

#[test]
fn registry_pruning_disabled_still_deletes_image_objects() {
    let snapshot = Snapshot {
        images: vec![image("0a", hours_ago(20), &["a1"])],
        ..Default::default()
    };

    let options = PruneOptions {
        keep_younger_than: Some(Duration::hours(1)),
        prune_registry: Some(false),
        ..Default::default()
    };

    let (_, registry, images, collaborators) = collaborators_for(&snapshot);
    let pruner = Pruner::new(&snapshot, &options, now()).expect("clean snapshot");
    let (_, failures) = pruner.prune(&collaborators);
    assert!(failures.is_empty());

    assert_eq!(
        images.deleted.lock().unwrap().clone(),
        vec![digest("0a").to_string()],
    );
    assert!(registry.deleted_blobs().is_empty());
    assert!(registry.deleted_layer_links().is_empty());
    assert!(registry.deleted_manifests().is_empty());
}
