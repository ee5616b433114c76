//! Shared snapshot builders and recording fake collaborators.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use time::{Duration, OffsetDateTime};

use reclaim::cluster::{ClusterError, ImageDeleter, StreamUpdater};
use reclaim::model::{
    Digest, Image, ImageStream, MANAGED_ANNOTATION, Pod, PodPhase, SizeLimit, Snapshot,
    TagHistory, TagRevision,
};
use reclaim::registry::{
    BlobDeleter, LayerLinkDeleter, ManifestDeleter, RegistrySession, RegistrySessionFactory,
};
use reclaim::sweep::Collaborators;

/// Fixed "current time" so age arithmetic is deterministic.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid timestamp")
}

pub fn hours_ago(hours: i64) -> OffsetDateTime {
    now() - Duration::hours(hours)
}

/// Makes a well-formed sha256 digest out of a short hex nickname.
pub fn digest(id: &str) -> Digest {
    Digest(format!("sha256:{id:0>64}"))
}

pub fn image(id: &str, created_at: OffsetDateTime, layers: &[&str]) -> Image {
    let mut annotations = BTreeMap::new();
    annotations.insert(MANAGED_ANNOTATION.to_string(), "true".to_string());
    Image {
        digest: digest(id),
        created_at,
        size_bytes: 0,
        annotations,
        layers: layers.iter().map(|l| digest(l)).collect(),
        config: None,
    }
}

pub fn unmanaged(mut image: Image) -> Image {
    image.annotations.remove(MANAGED_ANNOTATION);
    image
}

pub fn with_size(mut image: Image, size_bytes: u64) -> Image {
    image.size_bytes = size_bytes;
    image
}

pub fn with_config(mut image: Image, config_id: &str) -> Image {
    image.config = Some(digest(config_id));
    image
}

/// Tag history from newest to oldest: `(image id, created_at)` pairs.
pub fn tag(name: &str, revisions: &[(&str, OffsetDateTime)]) -> TagHistory {
    TagHistory {
        tag: name.to_string(),
        revisions: revisions
            .iter()
            .map(|(id, created_at)| TagRevision {
                digest: digest(id),
                created_at: *created_at,
            })
            .collect(),
    }
}

pub fn stream(
    namespace: &str,
    name: &str,
    created_at: OffsetDateTime,
    tags: Vec<TagHistory>,
) -> ImageStream {
    ImageStream {
        namespace: namespace.to_string(),
        name: name.to_string(),
        created_at,
        tags,
    }
}

pub fn pod(namespace: &str, name: &str, phase: PodPhase, container: &str) -> Pod {
    Pod {
        namespace: namespace.to_string(),
        name: name.to_string(),
        created_at: hours_ago(48),
        phase,
        containers: vec![container.to_string()],
    }
}

pub fn size_limit(max_image_bytes: u64) -> SizeLimit {
    SizeLimit {
        name: "storage".to_string(),
        max_image_bytes,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Image deleter that records each deletion; can be told to fail.
#[derive(Default)]
pub struct RecordingImageDeleter {
    pub deleted: Mutex<Vec<String>>,
    pub fail: bool,
}

impl ImageDeleter for RecordingImageDeleter {
    fn delete_image(&self, digest: &Digest) -> Result<(), ClusterError> {
        if self.fail {
            return Err(ClusterError::Other(anyhow::anyhow!("image api down")));
        }
        lock(&self.deleted).push(digest.to_string());
        Ok(())
    }
}

/// Stream updater over an in-memory table with conflict and failure
/// injection, recording every successful update and notification.
pub struct RecordingStreamUpdater {
    streams: Mutex<BTreeMap<(String, String), ImageStream>>,
    /// Qualified names whose updates conflict forever.
    pub always_conflict: Mutex<BTreeSet<String>>,
    /// Qualified name -> number of conflicts to serve before succeeding.
    pub conflicts_remaining: Mutex<BTreeMap<String, u32>>,
    /// Qualified names that read as gone.
    pub missing: Mutex<BTreeSet<String>>,
    pub updates: Mutex<Vec<ImageStream>>,
    pub notifications: Mutex<Vec<(String, Vec<String>, Vec<String>)>>,
}

impl RecordingStreamUpdater {
    pub fn new(streams: Vec<ImageStream>) -> Self {
        Self {
            streams: Mutex::new(
                streams
                    .into_iter()
                    .map(|s| ((s.namespace.clone(), s.name.clone()), s))
                    .collect(),
            ),
            always_conflict: Mutex::new(BTreeSet::new()),
            conflicts_remaining: Mutex::new(BTreeMap::new()),
            missing: Mutex::new(BTreeSet::new()),
            updates: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn stored(&self, namespace: &str, name: &str) -> Option<ImageStream> {
        lock(&self.streams)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn update_count(&self) -> usize {
        lock(&self.updates).len()
    }
}

impl StreamUpdater for RecordingStreamUpdater {
    fn get_stream(&self, namespace: &str, name: &str) -> Result<ImageStream, ClusterError> {
        let qualified = format!("{namespace}/{name}");
        if lock(&self.missing).contains(&qualified) {
            return Err(ClusterError::NotFound);
        }
        lock(&self.streams)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or(ClusterError::NotFound)
    }

    fn update_stream(&self, stream: &ImageStream) -> Result<ImageStream, ClusterError> {
        let qualified = stream.qualified_name();
        if lock(&self.always_conflict).contains(&qualified) {
            return Err(ClusterError::Conflict);
        }
        {
            let mut remaining = lock(&self.conflicts_remaining);
            if let Some(left) = remaining.get_mut(&qualified) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ClusterError::Conflict);
                }
            }
        }
        lock(&self.streams).insert(
            (stream.namespace.clone(), stream.name.clone()),
            stream.clone(),
        );
        lock(&self.updates).push(stream.clone());
        Ok(stream.clone())
    }

    fn notify(&self, stream: &ImageStream, updated_tags: &[String], deleted_tags: &[String]) {
        lock(&self.notifications).push((
            stream.qualified_name(),
            updated_tags.to_vec(),
            deleted_tags.to_vec(),
        ));
    }
}

/// One recorder behind all three registry deleters.
#[derive(Default)]
pub struct RecordingRegistryDeleter {
    pub blobs: Mutex<Vec<String>>,
    pub layer_links: Mutex<Vec<(String, String)>>,
    pub manifests: Mutex<Vec<(String, String)>>,
    pub fail_blobs: bool,
}

impl RecordingRegistryDeleter {
    pub fn deleted_blobs(&self) -> Vec<String> {
        lock(&self.blobs).clone()
    }

    pub fn deleted_layer_links(&self) -> Vec<(String, String)> {
        lock(&self.layer_links).clone()
    }

    pub fn deleted_manifests(&self) -> Vec<(String, String)> {
        lock(&self.manifests).clone()
    }
}

impl BlobDeleter for RecordingRegistryDeleter {
    fn delete_blob(&self, _session: &RegistrySession, digest: &str) -> anyhow::Result<()> {
        if self.fail_blobs {
            anyhow::bail!("registry refused to delete blob {digest}");
        }
        lock(&self.blobs).push(digest.to_string());
        Ok(())
    }
}

impl LayerLinkDeleter for RecordingRegistryDeleter {
    fn delete_layer_link(
        &self,
        _session: &RegistrySession,
        repository: &str,
        digest: &str,
    ) -> anyhow::Result<()> {
        lock(&self.layer_links).push((repository.to_string(), digest.to_string()));
        Ok(())
    }
}

impl ManifestDeleter for RecordingRegistryDeleter {
    fn delete_manifest(
        &self,
        _session: &RegistrySession,
        repository: &str,
        digest: &str,
    ) -> anyhow::Result<()> {
        lock(&self.manifests).push((repository.to_string(), digest.to_string()));
        Ok(())
    }
}

pub fn detached_session_factory() -> RegistrySessionFactory {
    Arc::new(|| Ok(RegistrySession::detached("https://registry.test:5000")))
}

/// Wires recording fakes into a full collaborator set.
pub fn collaborators(
    updater: Arc<RecordingStreamUpdater>,
    registry: Arc<RecordingRegistryDeleter>,
    images: Arc<RecordingImageDeleter>,
) -> Collaborators {
    Collaborators {
        image_deleter_factory: Box::new(move || {
            Ok(Box::new(images.clone()) as Box<dyn ImageDeleter>)
        }),
        stream_updater: updater,
        registry_session_factory: detached_session_factory(),
        blob_deleter: registry.clone(),
        layer_link_deleter: registry.clone(),
        manifest_deleter: registry,
    }
}

/// Recording fakes plus a collaborator set wired from them, in one call.
pub fn collaborators_for(
    snapshot: &Snapshot,
) -> (
    Arc<RecordingStreamUpdater>,
    Arc<RecordingRegistryDeleter>,
    Arc<RecordingImageDeleter>,
    Collaborators,
) {
    let updater = Arc::new(RecordingStreamUpdater::new(snapshot.streams.clone()));
    let registry = Arc::new(RecordingRegistryDeleter::default());
    let images = Arc::new(RecordingImageDeleter::default());
    let c = collaborators(updater.clone(), registry.clone(), images.clone());
    (updater, registry, images, c)
}
