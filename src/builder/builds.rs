use tracing::{debug, warn};

use super::{BuildError, GraphBuilder};
use crate::graph::{BuildKind, EdgeKind, Node, NodeKey};
use crate::model::{
    Build, BuildConfig, BuildInput, BuildInputKind, Digest, ImageRef, parse_stream_image_name,
    parse_stream_tag_name,
};

impl GraphBuilder<'_> {
    pub(super) fn add_build_configs(&mut self, build_configs: &[BuildConfig]) {
        for bc in build_configs {
            self.add_build_definition(BuildKind::BuildConfig, &bc.namespace, &bc.name, &bc.input);
        }
    }

    pub(super) fn add_builds(&mut self, builds: &[Build]) {
        for build in builds {
            self.add_build_definition(BuildKind::Build, &build.namespace, &build.name, &build.input);
        }
    }

    /// Resolves the strategy's input image and adds a strong edge from the
    /// build definition to it.
    fn add_build_definition(
        &mut self,
        kind: BuildKind,
        namespace: &str,
        name: &str,
        input: &Option<BuildInput>,
    ) {
        let referrer = format!("{} {namespace}/{name}", kind.as_str());

        let Some(input) = input else {
            debug!(%referrer, "no input image reference - skipping");
            return;
        };

        let key = self.graph.ensure_node(Node::Build {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        let Some(digest) = self.resolve_build_input(&referrer, namespace, input) else {
            return;
        };

        let image_key = NodeKey::Image(digest);
        if !self.graph.contains(&image_key) {
            debug!(%referrer, %image_key, "input image not in snapshot - skipping");
            return;
        }
        self.graph
            .add_edge(&key, &image_key, EdgeKind::StrongImageRef);
    }

    fn resolve_build_input(
        &mut self,
        referrer: &str,
        namespace: &str,
        input: &BuildInput,
    ) -> Option<Digest> {
        match input.kind {
            BuildInputKind::DockerImage => {
                if input.name.trim().is_empty() {
                    debug!(%referrer, "empty input image reference - skipping");
                    return None;
                }
                match ImageRef::parse(&input.name) {
                    // only digest references identify an image directly
                    Ok(r) => r.digest,
                    Err(err) => {
                        self.record_bad_input("DockerImage", referrer, &input.name, err);
                        None
                    }
                }
            }
            BuildInputKind::ImageStreamImage => match parse_stream_image_name(&input.name) {
                Ok((_, digest)) => Some(digest),
                Err(err) => {
                    self.record_bad_input("ImageStreamImage", referrer, &input.name, err);
                    None
                }
            },
            BuildInputKind::ImageStreamTag => {
                let (stream_name, tag) = match parse_stream_tag_name(&input.name) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        self.record_bad_input("ImageStreamTag", referrer, &input.name, err);
                        return None;
                    }
                };
                // Tags resolve in the build definition's own namespace.
                let tag_key = NodeKey::StreamTag {
                    namespace: namespace.to_string(),
                    name: stream_name,
                    tag,
                };
                let digest = self.graph.successors(&tag_key).find_map(|(key, _)| {
                    match key {
                        NodeKey::Image(digest) => Some(digest.clone()),
                        _ => None,
                    }
                });
                if digest.is_none() {
                    debug!(%referrer, %tag_key, "tag references no image - skipping");
                }
                digest
            }
            BuildInputKind::Other => None,
        }
    }

    fn record_bad_input(
        &mut self,
        kind: &'static str,
        referrer: &str,
        reference: &str,
        err: crate::model::RefParseError,
    ) {
        warn!(%referrer, %reference, %err, "unparsable {kind} reference - skipping");
        if !self.ignore_invalid_refs {
            self.errors.push(BuildError::BadInputReference {
                kind,
                referrer: referrer.to_string(),
                reference: reference.to_string(),
                source: err,
            });
        }
    }
}
