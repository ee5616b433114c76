//! Cluster-side collaborators: deleting image objects and rewriting image
//! stream tag histories.
//!
//! Talking to an actual API server lives behind these traits; the sweep only
//! decides what to delete and when. Dry runs are plain no-op
//! implementations.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::info;

use crate::model::{Digest, ImageStream};

#[derive(Debug, Error)]
pub enum ClusterError {
    /// The object no longer exists. Deleters treat this as "already gone".
    #[error("not found")]
    NotFound,
    /// Optimistic-concurrency conflict on update; re-read and retry.
    #[error("conflict")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Removes an image object from the cluster's metadata store.
pub trait ImageDeleter: Send + Sync {
    fn delete_image(&self, digest: &Digest) -> Result<(), ClusterError>;
}

impl<T: ImageDeleter + ?Sized> ImageDeleter for Arc<T> {
    fn delete_image(&self, digest: &Digest) -> Result<(), ClusterError> {
        (**self).delete_image(digest)
    }
}

/// Reads and rewrites persisted image streams with optimistic concurrency.
pub trait StreamUpdater: Send + Sync {
    /// Returns a fresh copy of the stream.
    fn get_stream(&self, namespace: &str, name: &str) -> Result<ImageStream, ClusterError>;

    /// Persists the rewritten stream, returning the server's resulting
    /// object.
    fn update_stream(&self, stream: &ImageStream) -> Result<ImageStream, ClusterError>;

    /// Observability hook, invoked after each successful rewrite.
    fn notify(&self, stream: &ImageStream, updated_tags: &[String], deleted_tags: &[String]);
}

/// Per-worker construction hook, so each worker can hold its own client.
pub type ImageDeleterFactory =
    Box<dyn Fn() -> anyhow::Result<Box<dyn ImageDeleter>> + Send + Sync>;

/// Records the decision without touching anything. Used for dry runs and
/// whenever no cluster API is wired up.
pub struct LoggingImageDeleter;

impl ImageDeleter for LoggingImageDeleter {
    fn delete_image(&self, digest: &Digest) -> Result<(), ClusterError> {
        info!(image = %digest, "deleting image");
        Ok(())
    }
}

/// Stream updater over an in-memory set of streams, seeded from the
/// snapshot. Updates replace the stored object; conflicts cannot happen.
pub struct InMemoryStreamUpdater {
    streams: Mutex<BTreeMap<(String, String), ImageStream>>,
}

impl InMemoryStreamUpdater {
    pub fn new(streams: Vec<ImageStream>) -> Self {
        let streams = streams
            .into_iter()
            .map(|s| ((s.namespace.clone(), s.name.clone()), s))
            .collect();
        Self {
            streams: Mutex::new(streams),
        }
    }
}

impl StreamUpdater for InMemoryStreamUpdater {
    fn get_stream(&self, namespace: &str, name: &str) -> Result<ImageStream, ClusterError> {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or(ClusterError::NotFound)
    }

    fn update_stream(&self, stream: &ImageStream) -> Result<ImageStream, ClusterError> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.insert(
            (stream.namespace.clone(), stream.name.clone()),
            stream.clone(),
        );
        Ok(stream.clone())
    }

    fn notify(&self, stream: &ImageStream, updated_tags: &[String], deleted_tags: &[String]) {
        info!(
            stream = %stream.qualified_name(),
            updated = updated_tags.join(","),
            deleted = deleted_tags.join(","),
            "updated image stream",
        );
    }
}
