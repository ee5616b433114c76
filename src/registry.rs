//! Registry-side deletion collaborators.
//!
//! Three operations, one per kind of registry object: repository layer/config
//! links, global blobs, and repository manifest links. A `404` from the
//! registry is normalized to success ("already gone"); any other non-2xx/3xx
//! status is a hard failure carrying the registry's structured error payload
//! when one can be decoded.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::{debug, warn};

/// Connection to one registry endpoint. Each worker holds its own session,
/// produced by a [`RegistrySessionFactory`].
pub struct RegistrySession {
    base_url: String,
    client: Option<reqwest::blocking::Client>,
}

impl RegistrySession {
    pub fn connect(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("reclaim")
            .build()
            .context("build registry client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Some(client),
        })
    }

    /// A session that cannot issue requests. Dry runs pair this with no-op
    /// deleters so no client is ever constructed.
    pub fn detached(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn delete(&self, url: &str) -> Result<()> {
        let Some(client) = &self.client else {
            bail!("registry session for {} has no client", self.base_url);
        };

        debug!(%url, "sending DELETE to the registry");
        let response = client
            .delete(url)
            .send()
            .with_context(|| format!("DELETE {url}"))?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            warn!(%url, "object already absent in the registry");
            return Ok(());
        }
        if status.is_success() || status.is_redirection() {
            return Ok(());
        }

        match response.json::<ErrorBody>() {
            Ok(body) if !body.errors.is_empty() => {
                let detail: Vec<String> = body
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .collect();
                Err(anyhow!("DELETE {url}: {status}: {}", detail.join("; ")))
            }
            _ => Err(anyhow!("DELETE {url}: {status}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Deletes a blob from the registry's global blob store.
pub trait BlobDeleter: Send + Sync {
    fn delete_blob(&self, session: &RegistrySession, digest: &str) -> Result<()>;
}

/// Deletes a repository-scoped layer or config link.
pub trait LayerLinkDeleter: Send + Sync {
    fn delete_layer_link(
        &self,
        session: &RegistrySession,
        repository: &str,
        digest: &str,
    ) -> Result<()>;
}

/// Deletes a repository-scoped manifest link.
pub trait ManifestDeleter: Send + Sync {
    fn delete_manifest(
        &self,
        session: &RegistrySession,
        repository: &str,
        digest: &str,
    ) -> Result<()>;
}

/// Per-worker session construction hook.
pub type RegistrySessionFactory = Arc<dyn Fn() -> Result<RegistrySession> + Send + Sync>;

pub struct HttpBlobDeleter;

impl BlobDeleter for HttpBlobDeleter {
    fn delete_blob(&self, session: &RegistrySession, digest: &str) -> Result<()> {
        debug!(%digest, registry = session.base_url(), "deleting blob");
        session.delete(&format!("{}/admin/blobs/{digest}", session.base_url()))
    }
}

pub struct HttpLayerLinkDeleter;

impl LayerLinkDeleter for HttpLayerLinkDeleter {
    fn delete_layer_link(
        &self,
        session: &RegistrySession,
        repository: &str,
        digest: &str,
    ) -> Result<()> {
        debug!(%digest, %repository, "deleting layer link");
        session.delete(&format!(
            "{}/v2/{repository}/blobs/{digest}",
            session.base_url()
        ))
    }
}

pub struct HttpManifestDeleter;

impl ManifestDeleter for HttpManifestDeleter {
    fn delete_manifest(
        &self,
        session: &RegistrySession,
        repository: &str,
        digest: &str,
    ) -> Result<()> {
        debug!(%digest, %repository, "deleting manifest link");
        session.delete(&format!(
            "{}/v2/{repository}/manifests/{digest}",
            session.base_url()
        ))
    }
}

/// Implements all three deleters as no-ops; dry-run wiring.
pub struct NoopRegistryDeleter;

impl BlobDeleter for NoopRegistryDeleter {
    fn delete_blob(&self, _session: &RegistrySession, digest: &str) -> Result<()> {
        debug!(%digest, "dry run: would delete blob");
        Ok(())
    }
}

impl LayerLinkDeleter for NoopRegistryDeleter {
    fn delete_layer_link(
        &self,
        _session: &RegistrySession,
        repository: &str,
        digest: &str,
    ) -> Result<()> {
        debug!(%digest, %repository, "dry run: would delete layer link");
        Ok(())
    }
}

impl ManifestDeleter for NoopRegistryDeleter {
    fn delete_manifest(
        &self,
        _session: &RegistrySession,
        repository: &str,
        digest: &str,
    ) -> Result<()> {
        debug!(%digest, %repository, "dry run: would delete manifest link");
        Ok(())
    }
}
