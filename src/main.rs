use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use time::{Duration, OffsetDateTime};
use tracing::warn;

use reclaim::cluster::{ImageDeleter, InMemoryStreamUpdater, LoggingImageDeleter};
use reclaim::model::Snapshot;
use reclaim::policy::PruneOptions;
use reclaim::registry::{
    HttpBlobDeleter, HttpLayerLinkDeleter, HttpManifestDeleter, NoopRegistryDeleter,
    RegistrySession,
};
use reclaim::sweep::{Collaborators, Pruner, deletion_counts};

#[derive(Parser)]
#[command(name = "reclaim")]
#[command(about = "Reachability-based image garbage collection", long_about = None)]
struct Cli {
    /// Cluster snapshot to prune (JSON)
    #[arg(long)]
    snapshot: PathBuf,

    /// Registry endpoint, e.g. https://registry.example.com:5000
    #[arg(long)]
    registry_url: String,

    /// Minimum age, in minutes, before an image may be pruned
    #[arg(long, default_value_t = 60)]
    keep_younger_than: u64,

    /// Newest tag revisions to keep per tag
    #[arg(long, default_value_t = 3)]
    keep_tag_revisions: usize,

    /// Prune images exceeding their namespace size limit instead of by age
    #[arg(long, conflicts_with_all = ["keep_younger_than", "keep_tag_revisions"])]
    prune_over_size_limit: bool,

    /// Consider every image, not just managed ones
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    all_images: bool,

    /// Also delete blobs, links and manifests from the registry
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    prune_registry: bool,

    /// Only untag streams in this namespace; skip image and blob deletion
    #[arg(long)]
    namespace: Option<String>,

    /// Tolerate unparsable image references instead of aborting
    #[arg(long)]
    ignore_invalid_refs: bool,

    /// Concurrent deletion workers
    #[arg(long)]
    workers: Option<usize>,

    /// Compute and report deletions without touching anything
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let snapshot = Snapshot::from_file(&cli.snapshot)?;

    let options = PruneOptions {
        keep_younger_than: Some(Duration::minutes(cli.keep_younger_than as i64)),
        keep_tag_revisions: Some(cli.keep_tag_revisions),
        prune_over_size_limit: cli.prune_over_size_limit,
        all_images: Some(cli.all_images),
        prune_registry: Some(cli.prune_registry),
        namespace: cli.namespace.clone(),
        ignore_invalid_refs: cli.ignore_invalid_refs,
        workers: cli.workers,
    };

    let pruner = Pruner::new(&snapshot, &options, OffsetDateTime::now_utc())
        .context("build reference graph")?;

    let collaborators = wire_collaborators(&cli, &snapshot);
    let (deletions, failures) = pruner.prune(&collaborators);

    for (kind, count) in deletion_counts(&deletions) {
        println!("{kind}: {count} deleted");
    }
    if deletions.is_empty() {
        println!("nothing to prune");
    }

    if !failures.is_empty() {
        for failure in &failures {
            warn!("{failure}");
        }
        anyhow::bail!("{} operation(s) failed; rerun to retry", failures.len());
    }

    Ok(())
}

/// Dry runs pair no-op deleters with a detached registry session so no HTTP
/// client is ever built. Cluster metadata writes stay in memory either way;
/// wiring a real API client happens behind the `cluster` traits.
fn wire_collaborators(cli: &Cli, snapshot: &Snapshot) -> Collaborators {
    let stream_updater = Arc::new(InMemoryStreamUpdater::new(snapshot.streams.clone()));

    if cli.dry_run {
        let registry_url = cli.registry_url.clone();
        Collaborators {
            image_deleter_factory: Box::new(|| {
                Ok(Box::new(LoggingImageDeleter) as Box<dyn ImageDeleter>)
            }),
            stream_updater,
            registry_session_factory: Arc::new(move || {
                Ok(RegistrySession::detached(&registry_url))
            }),
            blob_deleter: Arc::new(NoopRegistryDeleter),
            layer_link_deleter: Arc::new(NoopRegistryDeleter),
            manifest_deleter: Arc::new(NoopRegistryDeleter),
        }
    } else {
        let registry_url = cli.registry_url.clone();
        Collaborators {
            image_deleter_factory: Box::new(|| {
                Ok(Box::new(LoggingImageDeleter) as Box<dyn ImageDeleter>)
            }),
            stream_updater,
            registry_session_factory: Arc::new(move || RegistrySession::connect(&registry_url)),
            blob_deleter: Arc::new(HttpBlobDeleter),
            layer_link_deleter: Arc::new(HttpLayerLinkDeleter),
            manifest_deleter: Arc::new(HttpManifestDeleter),
        }
    }
}
