//! Pruning policy: which images are eligible and how the sweep behaves.

use time::{Duration, OffsetDateTime};

pub const DEFAULT_KEEP_TAG_REVISIONS: usize = 3;
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Caller-facing knobs, before resolution against the current time.
///
/// The age/keep-count settings and `prune_over_size_limit` are mutually
/// exclusive modes; when the size-limit mode is on, ages and revision counts
/// are not consulted.
#[derive(Clone, Debug, Default)]
pub struct PruneOptions {
    /// Minimum age an image must reach before it may be pruned.
    pub keep_younger_than: Option<Duration>,
    /// Newest tag revisions to keep per tag.
    pub keep_tag_revisions: Option<usize>,
    /// Prune images exceeding their namespace size limit instead of by age.
    pub prune_over_size_limit: bool,
    /// Consider every image; when false, only managed images are touched.
    pub all_images: Option<bool>,
    /// Also delete blobs, links and manifests from the registry.
    pub prune_registry: Option<bool>,
    /// When set, only stream untagging happens in this namespace; images and
    /// blobs are left alone.
    pub namespace: Option<String>,
    /// Tolerate unparsable image references instead of aborting the sweep.
    pub ignore_invalid_refs: bool,
    /// Concurrent deletion workers.
    pub workers: Option<usize>,
}

impl PruneOptions {
    /// Resolves the options against `now` into a policy the graph builder and
    /// the sweep share.
    pub fn policy(&self, now: OffsetDateTime) -> PrunePolicy {
        PrunePolicy {
            keep_younger_than: now - self.keep_younger_than.unwrap_or(Duration::ZERO),
            keep_tag_revisions: self
                .keep_tag_revisions
                .unwrap_or(DEFAULT_KEEP_TAG_REVISIONS),
            prune_over_size_limit: self.prune_over_size_limit,
            all_images: self.all_images.unwrap_or(true),
            prune_registry: self.prune_registry.unwrap_or(true),
            namespace: self.namespace.clone(),
        }
    }

    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) if n >= 1 => n,
            _ => DEFAULT_WORKER_COUNT,
        }
    }
}

/// Resolved policy. `keep_younger_than` is the cutoff instant: objects
/// created strictly after it count as young.
#[derive(Clone, Debug)]
pub struct PrunePolicy {
    pub keep_younger_than: OffsetDateTime,
    pub keep_tag_revisions: usize,
    pub prune_over_size_limit: bool,
    pub all_images: bool,
    pub prune_registry: bool,
    pub namespace: Option<String>,
}

impl PrunePolicy {
    pub fn is_young(&self, created_at: OffsetDateTime) -> bool {
        created_at > self.keep_younger_than
    }
}
