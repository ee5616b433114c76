use thiserror::Error;

use super::Digest;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RefParseError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid digest {0:?}")]
    InvalidDigest(String),
    #[error("invalid repository path {0:?}")]
    InvalidRepository(String),
    #[error("invalid tag in {0:?}")]
    InvalidTag(String),
    #[error("invalid image stream tag {0:?}")]
    InvalidStreamTag(String),
    #[error("invalid image stream image {0:?}")]
    InvalidStreamImage(String),
}

/// A parsed container pull spec:
/// `[registry[:port]/]namespace/name[:tag][@digest]`.
///
/// The first path component counts as a registry host only when it contains a
/// dot or a port, or equals `localhost` - the same heuristic container
/// runtimes use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl ImageRef {
    pub fn parse(spec: &str) -> Result<Self, RefParseError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(RefParseError::Empty);
        }

        let (rest, digest) = match spec.split_once('@') {
            Some((rest, digest)) => {
                let digest = Digest(digest.to_string());
                if !digest.is_wellformed() {
                    return Err(RefParseError::InvalidDigest(digest.0));
                }
                (rest, Some(digest))
            }
            None => (spec, None),
        };

        let mut segments: Vec<&str> = rest.split('/').collect();
        let registry = if segments.len() > 1 && looks_like_registry(segments[0]) {
            Some(segments.remove(0).to_string())
        } else {
            None
        };

        if segments.iter().any(|s| s.is_empty()) {
            return Err(RefParseError::InvalidRepository(spec.to_string()));
        }

        // The tag can only live in the last path segment.
        let last = segments
            .pop()
            .ok_or_else(|| RefParseError::InvalidRepository(spec.to_string()))?;
        let (last, tag) = match last.rsplit_once(':') {
            Some((name, tag)) => {
                if tag.is_empty() || tag.contains('/') {
                    return Err(RefParseError::InvalidTag(spec.to_string()));
                }
                (name, Some(tag.to_string()))
            }
            None => (last, None),
        };
        if last.is_empty() {
            return Err(RefParseError::InvalidRepository(spec.to_string()));
        }

        let (namespace, name) = match segments.len() {
            0 => (None, last.to_string()),
            _ => {
                let namespace = segments.remove(0).to_string();
                let mut name_parts = segments;
                name_parts.push(last);
                (Some(namespace), name_parts.join("/"))
            }
        };

        Ok(ImageRef {
            registry,
            namespace,
            name,
            tag,
            digest,
        })
    }

    /// Tag to use when dereferencing through an image stream tag; a missing
    /// tag defaults to `latest`, like container clients do.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }
}

fn looks_like_registry(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

/// Parses a `name:tag` image stream tag reference.
pub fn parse_stream_tag_name(value: &str) -> Result<(String, String), RefParseError> {
    match value.split_once(':') {
        Some((name, tag)) if !name.is_empty() && !tag.is_empty() && !tag.contains(':') => {
            Ok((name.to_string(), tag.to_string()))
        }
        _ => Err(RefParseError::InvalidStreamTag(value.to_string())),
    }
}

/// Parses a `name@digest` image stream image reference.
pub fn parse_stream_image_name(value: &str) -> Result<(String, Digest), RefParseError> {
    match value.split_once('@') {
        Some((name, digest)) if !name.is_empty() => {
            let digest = Digest(digest.to_string());
            if !digest.is_wellformed() {
                return Err(RefParseError::InvalidStreamImage(value.to_string()));
            }
            Ok((name.to_string(), digest))
        }
        _ => Err(RefParseError::InvalidStreamImage(value.to_string())),
    }
}
