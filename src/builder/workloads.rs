use tracing::{debug, warn};

use super::{BuildError, GraphBuilder};
use crate::graph::{EdgeKind, Node, NodeKey, WorkloadKind};
use crate::model::{ImageRef, Pod, PodController};

impl GraphBuilder<'_> {
    /// Adds pods. A pod is excluded only when it is neither running nor
    /// pending *and* is older than the retention threshold; everything else
    /// pins its images.
    pub(super) fn add_pods(&mut self, pods: &[Pod]) {
        for pod in pods {
            let referrer = format!("pod {}/{}", pod.namespace, pod.name);

            if !pod.phase.is_active() && !self.policy.is_young(pod.created_at) {
                debug!(%referrer, "terminal and too old - not counting image references");
                continue;
            }

            let key = self.graph.ensure_node(Node::Workload {
                kind: WorkloadKind::Pod,
                namespace: pod.namespace.clone(),
                name: pod.name.clone(),
            });
            self.add_pod_spec_refs(&key, &referrer, &pod.containers);
        }
    }

    pub(super) fn add_pod_controllers(
        &mut self,
        kind: WorkloadKind,
        controllers: &[PodController],
    ) {
        for controller in controllers {
            let referrer = format!(
                "{} {}/{}",
                kind.as_str(),
                controller.namespace,
                controller.name
            );
            let key = self.graph.ensure_node(Node::Workload {
                kind,
                namespace: controller.namespace.clone(),
                name: controller.name.clone(),
            });
            self.add_pod_spec_refs(&key, &referrer, &controller.containers);
        }
    }

    /// Adds a strong edge from the workload to every image its containers
    /// reference. Digest references resolve directly; tag references resolve
    /// through the image stream tag node, ignoring the registry host since a
    /// pull spec may or may not name the integrated registry.
    pub(super) fn add_pod_spec_refs(
        &mut self,
        predecessor: &NodeKey,
        referrer: &str,
        containers: &[String],
    ) {
        for spec in containers {
            if spec.trim().is_empty() {
                continue;
            }

            let image_ref = match ImageRef::parse(spec) {
                Ok(r) => r,
                Err(err) => {
                    warn!(%referrer, spec = %spec, %err, "unparsable image reference - skipping");
                    if !self.ignore_invalid_refs {
                        self.errors.push(BuildError::BadImageReference {
                            referrer: referrer.to_string(),
                            reference: spec.clone(),
                            source: err,
                        });
                    }
                    continue;
                }
            };

            match image_ref.digest {
                Some(digest) => {
                    let image_key = NodeKey::Image(digest);
                    if !self.graph.contains(&image_key) {
                        debug!(%referrer, %image_key, "image not in snapshot - skipping");
                        continue;
                    }
                    self.graph
                        .add_edge(predecessor, &image_key, EdgeKind::StrongImageRef);
                }
                None => {
                    let Some(namespace) = image_ref.namespace.clone() else {
                        debug!(%referrer, spec = %spec, "reference names no namespace - skipping");
                        continue;
                    };
                    let tag_key = NodeKey::StreamTag {
                        namespace,
                        name: image_ref.name.clone(),
                        tag: image_ref.tag_or_default().to_string(),
                    };
                    if !self.graph.contains(&tag_key) {
                        debug!(%referrer, %tag_key, "no image stream tag found - skipping");
                        continue;
                    }
                    let images: Vec<NodeKey> = self
                        .graph
                        .successors(&tag_key)
                        .filter(|(key, _)| matches!(key, NodeKey::Image(_)))
                        .map(|(key, _)| key.clone())
                        .collect();
                    for image_key in images {
                        self.graph
                            .add_edge(predecessor, &image_key, EdgeKind::StrongImageRef);
                    }
                }
            }
        }
    }
}
