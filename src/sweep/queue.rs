//! Ordered worklist of deletion candidates.
//!
//! An arena of index-linked slots: O(1) removal from the middle, forward
//! rescans from the head. The queue is seeded once per sweep and only ever
//! shrinks.

use std::collections::BTreeSet;

use crate::graph::ReferenceGraph;
use crate::model::{Digest, Image};

#[derive(Default)]
pub struct SweepQueue {
    slots: Vec<Slot>,
    head: Option<usize>,
    len: usize,
}

struct Slot {
    digest: Digest,
    prev: Option<usize>,
    next: Option<usize>,
}

impl SweepQueue {
    /// Seeds the queue from the candidate set, heaviest image first: layer
    /// count descending, then creation time ascending, then digest. Heavy
    /// images are unlikely to share components, so front-loading them
    /// spreads blob deletions across the whole sweep instead of piling them
    /// up at the end.
    pub fn seed(graph: &ReferenceGraph, candidates: &BTreeSet<Digest>) -> Self {
        let mut images: Vec<&Image> = candidates
            .iter()
            .filter_map(|digest| graph.image(digest))
            .collect();
        images.sort_by(|a, b| {
            b.layers
                .len()
                .cmp(&a.layers.len())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.digest.cmp(&b.digest))
        });

        let len = images.len();
        let slots = images
            .iter()
            .enumerate()
            .map(|(i, image)| Slot {
                digest: image.digest.clone(),
                prev: i.checked_sub(1),
                next: if i + 1 < len { Some(i + 1) } else { None },
            })
            .collect();

        Self {
            slots,
            head: if len > 0 { Some(0) } else { None },
            len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn next(&self, slot: usize) -> Option<usize> {
        self.slots[slot].next
    }

    pub fn digest(&self, slot: usize) -> &Digest {
        &self.slots[slot].digest
    }

    /// Unlinks a slot, returning its former successor.
    pub fn remove(&mut self, slot: usize) -> Option<usize> {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        if let Some(next) = next {
            self.slots[next].prev = prev;
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
        self.len -= 1;
        next
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::graph::{Node, ReferenceGraph};
    use crate::model::Image;

    fn image(id: &str, layer_count: usize, created_unix: i64) -> Image {
        Image {
            digest: Digest(format!("sha256:{id:0>8}")),
            created_at: OffsetDateTime::from_unix_timestamp(created_unix)
                .expect("valid timestamp"),
            size_bytes: 0,
            annotations: Default::default(),
            layers: (0..layer_count)
                .map(|i| Digest(format!("sha256:{id:0>4}{i:0>4}")))
                .collect(),
            config: None,
        }
    }

    fn queue_of(images: &[Image]) -> (ReferenceGraph, SweepQueue) {
        let mut graph = ReferenceGraph::new();
        let mut candidates = BTreeSet::new();
        for image in images {
            graph.ensure_node(Node::Image(image.clone()));
            candidates.insert(image.digest.clone());
        }
        let queue = SweepQueue::seed(&graph, &candidates);
        (graph, queue)
    }

    fn drain_order(queue: &SweepQueue) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = queue.head();
        while let Some(slot) = cursor {
            out.push(queue.digest(slot).to_string());
            cursor = queue.next(slot);
        }
        out
    }

    #[test]
    fn orders_by_layer_count_then_age_then_digest() {
        let (_, queue) = queue_of(&[
            image("aa", 1, 100),
            image("bb", 3, 200),
            image("cc", 3, 100),
            image("dd", 2, 100),
        ]);
        assert_eq!(
            drain_order(&queue),
            vec![
                "sha256:000000cc", // 3 layers, older
                "sha256:000000bb", // 3 layers, newer
                "sha256:000000dd", // 2 layers
                "sha256:000000aa", // 1 layer
            ],
        );
    }

    #[test]
    fn removes_from_the_middle_and_head() {
        let (_, mut queue) = queue_of(&[image("aa", 3, 0), image("bb", 2, 0), image("cc", 1, 0)]);
        // order: aa, bb, cc
        let head = queue.head().expect("non-empty");
        let middle = queue.next(head).expect("second item");

        let after = queue.remove(middle);
        assert_eq!(after, queue.next(head));
        assert_eq!(queue.len(), 2);
        assert_eq!(drain_order(&queue), vec!["sha256:000000aa", "sha256:000000cc"]);

        queue.remove(head);
        assert_eq!(drain_order(&queue), vec!["sha256:000000cc"]);

        let last = queue.head().expect("one left");
        assert_eq!(queue.remove(last), None);
        assert!(queue.is_empty());
    }
}
