use tracing::debug;

use super::{BuildError, GraphBuilder};
use crate::graph::{ComponentKind, EdgeKind, Node};
use crate::model::{Digest, Image};

impl GraphBuilder<'_> {
    /// Adds every image with its manifest, optional config and layer
    /// components. An image with a malformed digest anywhere in its metadata
    /// is recorded as an error and skipped whole.
    pub(super) fn add_images(&mut self, images: &[Image]) {
        for image in images {
            if let Some(bad) = malformed_component(image) {
                self.errors.push(BuildError::MalformedImage {
                    digest: image.digest.to_string(),
                    component: bad.to_string(),
                });
                continue;
            }

            debug!(image = %image.digest, "adding image to graph");
            let image_key = self.graph.ensure_node(Node::Image(image.clone()));

            let manifest_key = self.graph.ensure_node(Node::Component {
                digest: image.digest.clone(),
                kind: ComponentKind::Manifest,
            });
            self.graph
                .add_edge(&image_key, &manifest_key, EdgeKind::ManifestRef);

            if let Some(config) = &image.config {
                let config_key = self.graph.ensure_node(Node::Component {
                    digest: config.clone(),
                    kind: ComponentKind::Config,
                });
                self.graph
                    .add_edge(&image_key, &config_key, EdgeKind::ConfigRef);
            }

            for layer in &image.layers {
                let layer_key = self.graph.ensure_node(Node::Component {
                    digest: layer.clone(),
                    kind: ComponentKind::Layer,
                });
                self.graph
                    .add_edge(&image_key, &layer_key, EdgeKind::LayerRef);
            }
        }
    }
}

fn malformed_component(image: &Image) -> Option<&Digest> {
    if !image.digest.is_wellformed() {
        return Some(&image.digest);
    }
    if let Some(config) = &image.config
        && !config.is_wellformed()
    {
        return Some(config);
    }
    image.layers.iter().find(|l| !l.is_wellformed())
}
