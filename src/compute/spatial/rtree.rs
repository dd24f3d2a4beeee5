//! Balanced bounding-box tree (R-tree) over feature ids.
//!
//! The index stores only `(FeatureId, BoundingBox)` pairs; geometry and
//! attributes stay in the feature store and are fetched by id after a
//! lookup. Nodes live in an arena and refer to each other by integer
//! handle. Parent links are plain handles too, so there is no shared
//! ownership and no cycle to break.
//!
//! ## Maintenance
//!
//! - **Insert**: descend by least area enlargement (ties: smaller area, then
//!   lowest child position), append to the leaf, split on overflow with the
//!   quadratic heuristic. Splits propagate upward; a root split grows the
//!   tree by one level.
//! - **Delete**: locate the leaf, remove the entry, then condense: any node
//!   left with fewer than `min_entries` is detached and its entries are
//!   re-inserted. A root left with a single child is collapsed.
//! - **Bulk load**: sort-tile-recursive packing, O(n log n).
//!
//! ## Queries
//!
//! - **Bounding box**: depth-first, pruning subtrees whose box misses the
//!   query. Children are visited in stored order, so repeated queries on the
//!   same tree return ids in the same order.
//! - **Nearest**: best-first over a priority queue keyed by each node's
//!   minimum possible distance. Leaf entries enter the queue with their
//!   exact distance, so an entry that reaches the front is final.

use crate::compute::cancel::CancellationToken;
use crate::compute::distance::{DistanceMetric, min_distance_to_bbox};
use crate::config::NodeCapacity;
use crate::error::{GeoQueryError, Result};
use crate::feature::FeatureId;
use geo::Point;
use geoquery_types::BoundingBox;
use serde::Serialize;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

type NodeId = usize;

/// Inline slots per node: default `max_entries` plus the overflow slot.
const INLINE_SLOTS: usize = NodeCapacity::DEFAULT_MAX + 1;

/// A leaf-level index record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub id: FeatureId,
    pub bbox: BoundingBox,
}

impl IndexEntry {
    pub fn new(id: FeatureId, bbox: BoundingBox) -> Self {
        Self { id, bbox }
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf(SmallVec<[IndexEntry; INLINE_SLOTS]>),
    Internal(SmallVec<[NodeId; INLINE_SLOTS]>),
}

#[derive(Debug, Clone)]
struct Node {
    bbox: BoundingBox,
    parent: Option<NodeId>,
    kind: NodeKind,
}

impl Node {
    fn len(&self) -> usize {
        match &self.kind {
            NodeKind::Leaf(entries) => entries.len(),
            NodeKind::Internal(children) => children.len(),
        }
    }
}

/// Shape summary of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexStats {
    pub height: usize,
    pub node_count: usize,
    pub leaf_count: usize,
    pub entry_count: usize,
}

/// Arena-backed R-tree keyed by feature id.
#[derive(Debug, Clone)]
pub struct RTree {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    height: usize,
    len: usize,
    capacity: NodeCapacity,
}

impl Default for RTree {
    fn default() -> Self {
        Self::new(NodeCapacity::default())
    }
}

impl RTree {
    pub fn new(capacity: NodeCapacity) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            height: 0,
            len: 0,
            capacity,
        }
    }

    /// Build a packed tree from `entries` in one pass.
    ///
    /// Entries are tiled into vertical slices by box centre longitude, then
    /// each slice is cut into nodes by centre latitude. Group sizes are
    /// spread evenly, so every non-root node meets the minimum fill.
    pub fn bulk_load(capacity: NodeCapacity, entries: Vec<IndexEntry>) -> Self {
        let mut tree = Self::new(capacity);
        if entries.is_empty() {
            return tree;
        }
        tree.len = entries.len();

        let max = capacity.max_entries;
        let mut level: Vec<NodeId> = str_groups(entries, max, |entry| entry.bbox)
            .into_iter()
            .map(|group| {
                let bbox = union_of(group.iter().map(|entry| entry.bbox));
                tree.alloc(Node {
                    bbox,
                    parent: None,
                    kind: NodeKind::Leaf(SmallVec::from_vec(group)),
                })
            })
            .collect();
        let mut height = 1;

        while level.len() > 1 {
            let groups = str_groups(level, max, |&node| tree.nodes[node].bbox);
            level = groups
                .into_iter()
                .map(|children| {
                    let bbox = union_of(children.iter().map(|&child| tree.nodes[child].bbox));
                    let parent = tree.alloc(Node {
                        bbox,
                        parent: None,
                        kind: NodeKind::Internal(SmallVec::from_slice(&children)),
                    });
                    for &child in &children {
                        tree.nodes[child].parent = Some(parent);
                    }
                    parent
                })
                .collect();
            height += 1;
        }

        tree.root = level.first().copied();
        tree.height = height;
        log::debug!(
            "Bulk-loaded index with {} entries, height {}",
            tree.len,
            tree.height
        );
        tree
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels; 0 for an empty tree, 1 when the root is a leaf.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn capacity(&self) -> NodeCapacity {
        self.capacity
    }

    /// Box covering every entry, `None` when empty.
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.root.map(|root| self.nodes[root].bbox)
    }

    pub fn clear(&mut self) {
        *self = Self::new(self.capacity);
    }

    pub fn insert(&mut self, id: FeatureId, bbox: BoundingBox) {
        self.insert_entry(IndexEntry::new(id, bbox));
        self.len += 1;
    }

    /// Remove the entry for `id`, whose indexed box is `bbox`.
    ///
    /// Returns `false` when no such entry exists.
    pub fn remove(&mut self, id: FeatureId, bbox: &BoundingBox) -> bool {
        let Some(root) = self.root else {
            return false;
        };
        let Some((leaf, position)) = self.find_leaf(root, id, bbox) else {
            return false;
        };
        if let NodeKind::Leaf(entries) = &mut self.nodes[leaf].kind {
            entries.remove(position);
        }
        self.len -= 1;
        self.condense_tree(leaf);
        true
    }

    /// Ids of every entry whose box intersects `query` (boundary-inclusive).
    pub fn query_bbox(&self, query: &BoundingBox) -> Vec<FeatureId> {
        let mut results = Vec::new();
        self.visit_intersecting(query, |entry| results.push(entry.id));
        results
    }

    pub fn count_bbox(&self, query: &BoundingBox) -> usize {
        let mut count = 0;
        self.visit_intersecting(query, |_| count += 1);
        count
    }

    fn visit_intersecting(&self, query: &BoundingBox, mut visit: impl FnMut(&IndexEntry)) {
        let Some(root) = self.root else {
            return;
        };
        if !self.nodes[root].bbox.intersects(query) {
            return;
        }
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            match &self.nodes[node].kind {
                NodeKind::Leaf(entries) => entries
                    .iter()
                    .filter(|entry| entry.bbox.intersects(query))
                    .for_each(&mut visit),
                NodeKind::Internal(children) => stack.extend(
                    children
                        .iter()
                        .rev()
                        .copied()
                        .filter(|&child| self.nodes[child].bbox.intersects(query)),
                ),
            }
        }
    }

    /// The `k` entries nearest to `point`, ascending by distance.
    ///
    /// `exact_distance` measures the real geometry behind an id; it must
    /// never return less than [`min_distance_to_bbox`] for the entry's box
    /// under the same `metric`. Equal distances are ordered by id. Fewer
    /// than `k` results come back only when the tree holds fewer entries.
    pub fn nearest<F>(
        &self,
        point: &Point,
        k: usize,
        metric: DistanceMetric,
        exact_distance: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<(FeatureId, f64)>>
    where
        F: Fn(FeatureId) -> f64,
    {
        let mut results = Vec::with_capacity(k.min(self.len));
        let Some(root) = self.root else {
            return Ok(results);
        };
        if k == 0 {
            return Ok(results);
        }

        let mut queue = BinaryHeap::new();
        queue.push(QueueItem {
            distance: min_distance_to_bbox(point, &self.nodes[root].bbox, metric),
            candidate: Candidate::Node(root),
        });

        while let Some(item) = queue.pop() {
            match item.candidate {
                Candidate::Entry(id) => {
                    results.push((id, item.distance));
                    if results.len() == k {
                        break;
                    }
                }
                Candidate::Node(node) => {
                    if let Some(token) = cancel
                        && token.is_cancelled()
                    {
                        return Err(GeoQueryError::Cancelled);
                    }
                    match &self.nodes[node].kind {
                        NodeKind::Leaf(entries) => {
                            for entry in entries {
                                queue.push(QueueItem {
                                    distance: exact_distance(entry.id),
                                    candidate: Candidate::Entry(entry.id),
                                });
                            }
                        }
                        NodeKind::Internal(children) => {
                            for &child in children {
                                queue.push(QueueItem {
                                    distance: min_distance_to_bbox(
                                        point,
                                        &self.nodes[child].bbox,
                                        metric,
                                    ),
                                    candidate: Candidate::Node(child),
                                });
                            }
                        }
                    }
                }
            }
        }

        // Rounding in the node bounds can let a near-equal pair pop swapped.
        results.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(results)
    }

    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats {
            height: self.height,
            entry_count: self.len,
            ..IndexStats::default()
        };
        let Some(root) = self.root else {
            return stats;
        };
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            stats.node_count += 1;
            match &self.nodes[node].kind {
                NodeKind::Leaf(_) => stats.leaf_count += 1,
                NodeKind::Internal(children) => stack.extend(children.iter().copied()),
            }
        }
        stats
    }

    /// Walk the whole tree and report the first broken structural invariant:
    /// exact node boxes, fan-out bounds, parent links, uniform leaf depth,
    /// and entry count.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let Some(root) = self.root else {
            return if self.len == 0 && self.height == 0 {
                Ok(())
            } else {
                Err(format!(
                    "empty tree reports len {} and height {}",
                    self.len, self.height
                ))
            };
        };
        if self.nodes[root].parent.is_some() {
            return Err("root has a parent".to_string());
        }

        let mut seen = 0usize;
        let mut stack = vec![(root, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            let n = &self.nodes[node];
            let count = n.len();
            if count > self.capacity.max_entries {
                return Err(format!("node {} holds {} > max entries", node, count));
            }
            if node != root && count < self.capacity.min_entries {
                return Err(format!("node {} holds {} < min entries", node, count));
            }
            if count == 0 {
                return Err(format!("node {} is empty", node));
            }
            let expected = match &n.kind {
                NodeKind::Leaf(entries) => {
                    if depth != self.height {
                        return Err(format!(
                            "leaf {} at depth {}, tree height {}",
                            node, depth, self.height
                        ));
                    }
                    seen += entries.len();
                    union_of(entries.iter().map(|entry| entry.bbox))
                }
                NodeKind::Internal(children) => {
                    if node == root && children.len() < 2 {
                        return Err("internal root with a single child".to_string());
                    }
                    for &child in children {
                        if self.nodes[child].parent != Some(node) {
                            return Err(format!("child {} has a stale parent link", child));
                        }
                        stack.push((child, depth + 1));
                    }
                    union_of(children.iter().map(|&child| self.nodes[child].bbox))
                }
            };
            if expected != n.bbox {
                return Err(format!(
                    "node {} box {:?} != union of children {:?}",
                    node, n.bbox, expected
                ));
            }
        }
        if seen != self.len {
            return Err(format!("found {} entries, len says {}", seen, self.len));
        }
        Ok(())
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id] = node;
            id
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id].kind = NodeKind::Leaf(SmallVec::new());
        self.nodes[id].parent = None;
        self.free.push(id);
    }

    /// Insert without touching `len`; shared by insert and re-insertion of
    /// orphans during condense.
    fn insert_entry(&mut self, entry: IndexEntry) {
        let Some(root) = self.root else {
            let root = self.alloc(Node {
                bbox: entry.bbox,
                parent: None,
                kind: NodeKind::Leaf(SmallVec::from_elem(entry, 1)),
            });
            self.root = Some(root);
            self.height = 1;
            return;
        };

        let leaf = self.choose_leaf(root, &entry.bbox);
        if let NodeKind::Leaf(entries) = &mut self.nodes[leaf].kind {
            entries.push(entry);
        }
        self.adjust_tree(leaf);
    }

    fn choose_leaf(&self, root: NodeId, bbox: &BoundingBox) -> NodeId {
        let mut node = root;
        loop {
            match &self.nodes[node].kind {
                NodeKind::Leaf(_) => return node,
                NodeKind::Internal(children) => node = self.choose_subtree(children, bbox),
            }
        }
    }

    /// Least enlargement, then smaller area, then lowest position.
    fn choose_subtree(&self, children: &[NodeId], bbox: &BoundingBox) -> NodeId {
        let mut best = children[0];
        let mut best_enlargement = f64::INFINITY;
        let mut best_area = f64::INFINITY;
        for &child in children {
            let child_bbox = &self.nodes[child].bbox;
            let enlargement = child_bbox.enlargement(bbox);
            let area = child_bbox.area();
            if enlargement < best_enlargement
                || (enlargement == best_enlargement && area < best_area)
            {
                best = child;
                best_enlargement = enlargement;
                best_area = area;
            }
        }
        best
    }

    /// Walk from `start` to the root, splitting overflowing nodes and
    /// refreshing boxes on the way.
    fn adjust_tree(&mut self, start: NodeId) {
        let mut current = start;
        loop {
            let sibling = if self.nodes[current].len() > self.capacity.max_entries {
                Some(self.split(current))
            } else {
                self.refresh_bbox(current);
                None
            };

            match (self.nodes[current].parent, sibling) {
                (Some(parent), Some(sibling)) => {
                    self.attach_after(parent, current, sibling);
                    current = parent;
                }
                (Some(parent), None) => current = parent,
                (None, Some(sibling)) => {
                    self.grow_root(current, sibling);
                    return;
                }
                (None, None) => return,
            }
        }
    }

    /// Quadratic split of an overflowing node. `node` keeps the first group;
    /// the returned sibling holds the second and shares `node`'s parent.
    fn split(&mut self, node: NodeId) -> NodeId {
        let min = self.capacity.min_entries;
        let parent = self.nodes[node].parent;
        let kind = std::mem::replace(&mut self.nodes[node].kind, NodeKind::Leaf(SmallVec::new()));

        let (keep, moved) = match kind {
            NodeKind::Leaf(entries) => {
                let boxes: Vec<BoundingBox> = entries.iter().map(|entry| entry.bbox).collect();
                let (first, second) = quadratic_split(&boxes, min);
                (
                    NodeKind::Leaf(pick(&entries, &first)),
                    NodeKind::Leaf(pick(&entries, &second)),
                )
            }
            NodeKind::Internal(children) => {
                let boxes: Vec<BoundingBox> =
                    children.iter().map(|&child| self.nodes[child].bbox).collect();
                let (first, second) = quadratic_split(&boxes, min);
                (
                    NodeKind::Internal(pick(&children, &first)),
                    NodeKind::Internal(pick(&children, &second)),
                )
            }
        };

        self.nodes[node].kind = keep;
        self.refresh_bbox(node);

        let sibling = self.alloc(Node {
            bbox: self.nodes[node].bbox,
            parent,
            kind: moved,
        });
        if let NodeKind::Internal(children) = &self.nodes[sibling].kind {
            let children = children.clone();
            for child in children {
                self.nodes[child].parent = Some(sibling);
            }
        }
        self.refresh_bbox(sibling);
        log::trace!("Split index node {} -> {}", node, sibling);
        sibling
    }

    fn attach_after(&mut self, parent: NodeId, existing: NodeId, sibling: NodeId) {
        if let NodeKind::Internal(children) = &mut self.nodes[parent].kind {
            let position = children
                .iter()
                .position(|&child| child == existing)
                .map_or(children.len(), |p| p + 1);
            children.insert(position, sibling);
        }
        self.nodes[sibling].parent = Some(parent);
    }

    fn grow_root(&mut self, old_root: NodeId, sibling: NodeId) {
        let bbox = self.nodes[old_root].bbox.union(&self.nodes[sibling].bbox);
        let mut children = SmallVec::new();
        children.push(old_root);
        children.push(sibling);
        let root = self.alloc(Node {
            bbox,
            parent: None,
            kind: NodeKind::Internal(children),
        });
        self.nodes[old_root].parent = Some(root);
        self.nodes[sibling].parent = Some(root);
        self.root = Some(root);
        self.height += 1;
        log::debug!("Index root split, height now {}", self.height);
    }

    fn refresh_bbox(&mut self, node: NodeId) {
        let bbox = match &self.nodes[node].kind {
            NodeKind::Leaf(entries) => BoundingBox::union_all(entries.iter().map(|e| &e.bbox)),
            NodeKind::Internal(children) => {
                BoundingBox::union_all(children.iter().map(|&child| &self.nodes[child].bbox))
            }
        };
        if let Some(bbox) = bbox {
            self.nodes[node].bbox = bbox;
        }
    }

    /// Only descends into nodes whose box covers `bbox`.
    fn find_leaf(&self, root: NodeId, id: FeatureId, bbox: &BoundingBox) -> Option<(NodeId, usize)> {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            match &self.nodes[node].kind {
                NodeKind::Leaf(entries) => {
                    if let Some(position) = entries.iter().position(|entry| entry.id == id) {
                        return Some((node, position));
                    }
                }
                NodeKind::Internal(children) => stack.extend(
                    children
                        .iter()
                        .copied()
                        .filter(|&child| self.nodes[child].bbox.contains_box(bbox)),
                ),
            }
        }
        None
    }

    fn condense_tree(&mut self, leaf: NodeId) {
        let mut orphans = Vec::new();
        let mut current = leaf;
        while let Some(parent) = self.nodes[current].parent {
            if self.nodes[current].len() < self.capacity.min_entries {
                self.detach(parent, current);
                self.drain_subtree(current, &mut orphans);
            } else {
                self.refresh_bbox(current);
            }
            current = parent;
        }
        self.shrink_root();

        if !orphans.is_empty() {
            log::trace!("Re-inserting {} orphaned index entries", orphans.len());
        }
        for entry in orphans {
            self.insert_entry(entry);
        }
    }

    fn detach(&mut self, parent: NodeId, child: NodeId) {
        if let NodeKind::Internal(children) = &mut self.nodes[parent].kind {
            children.retain(|c| *c != child);
        }
    }

    /// Move every leaf entry under `node` into `out` and free the nodes.
    fn drain_subtree(&mut self, node: NodeId, out: &mut Vec<IndexEntry>) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let kind = std::mem::replace(&mut self.nodes[current].kind, NodeKind::Leaf(SmallVec::new()));
            match kind {
                NodeKind::Leaf(entries) => out.extend(entries),
                NodeKind::Internal(children) => stack.extend(children),
            }
            self.release(current);
        }
    }

    /// Drop an empty root and collapse single-child internal roots.
    fn shrink_root(&mut self) {
        while let Some(root) = self.root {
            match &self.nodes[root].kind {
                NodeKind::Leaf(entries) if entries.is_empty() => {
                    self.release(root);
                    self.root = None;
                    self.height = 0;
                }
                NodeKind::Internal(children) if children.is_empty() => {
                    self.release(root);
                    self.root = None;
                    self.height = 0;
                }
                NodeKind::Internal(children) if children.len() == 1 => {
                    let child = children[0];
                    self.release(root);
                    self.nodes[child].parent = None;
                    self.root = Some(child);
                    self.height -= 1;
                    continue;
                }
                _ => self.refresh_bbox(root),
            }
            return;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Candidate {
    Node(NodeId),
    Entry(FeatureId),
}

#[derive(Debug, Clone, Copy)]
struct QueueItem {
    distance: f64,
    candidate: Candidate,
}

impl QueueItem {
    /// Distance first; at equal distance nodes expand before entries are
    /// confirmed, and entries come out by ascending id.
    fn rank(&self) -> (u8, u64) {
        match self.candidate {
            Candidate::Node(node) => (0, node as u64),
            Candidate::Entry(id) => (1, id.get()),
        }
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    // Reversed so the max-heap pops the closest candidate.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.rank().cmp(&self.rank()))
    }
}

fn union_of(boxes: impl IntoIterator<Item = BoundingBox>) -> BoundingBox {
    boxes
        .into_iter()
        .reduce(|acc, bbox| acc.union(&bbox))
        .unwrap_or(BoundingBox::from_point(0.0, 0.0))
}

fn pick<T: Copy>(items: &[T], positions: &[usize]) -> SmallVec<[T; INLINE_SLOTS]> {
    positions.iter().map(|&p| items[p]).collect()
}

/// Classic quadratic split. Returns two position lists, each sorted, each
/// holding at least `min_entries` positions.
fn quadratic_split(boxes: &[BoundingBox], min_entries: usize) -> (Vec<usize>, Vec<usize>) {
    let (seed_a, seed_b) = pick_seeds(boxes);
    let mut group_a = vec![seed_a];
    let mut group_b = vec![seed_b];
    let mut bbox_a = boxes[seed_a];
    let mut bbox_b = boxes[seed_b];
    let mut remaining: Vec<usize> = (0..boxes.len())
        .filter(|&i| i != seed_a && i != seed_b)
        .collect();

    while !remaining.is_empty() {
        if group_a.len() + remaining.len() <= min_entries {
            group_a.append(&mut remaining);
            break;
        }
        if group_b.len() + remaining.len() <= min_entries {
            group_b.append(&mut remaining);
            break;
        }

        let position = pick_next(boxes, &remaining, &bbox_a, &bbox_b);
        let item = remaining.remove(position);
        let candidate = &boxes[item];

        let to_a = bbox_a
            .enlargement(candidate)
            .total_cmp(&bbox_b.enlargement(candidate))
            .then_with(|| {
                let margin_a = bbox_a.union(candidate).margin() - bbox_a.margin();
                let margin_b = bbox_b.union(candidate).margin() - bbox_b.margin();
                margin_a.total_cmp(&margin_b)
            })
            .then_with(|| bbox_a.area().total_cmp(&bbox_b.area()))
            .then_with(|| group_a.len().cmp(&group_b.len()))
            != Ordering::Greater;

        if to_a {
            group_a.push(item);
            bbox_a.expand_to_include(candidate);
        } else {
            group_b.push(item);
            bbox_b.expand_to_include(candidate);
        }
    }

    group_a.sort_unstable();
    group_b.sort_unstable();
    (group_a, group_b)
}

/// The pair wasting the most area when boxed together; ties go to the
/// pair with the larger combined margin, then to the earliest pair.
fn pick_seeds(boxes: &[BoundingBox]) -> (usize, usize) {
    let mut best = (0, 1);
    let mut best_waste = f64::NEG_INFINITY;
    let mut best_margin = f64::NEG_INFINITY;
    for i in 0..boxes.len() {
        for j in (i + 1)..boxes.len() {
            let union = boxes[i].union(&boxes[j]);
            let waste = union.area() - boxes[i].area() - boxes[j].area();
            let margin = union.margin();
            if waste > best_waste || (waste == best_waste && margin > best_margin) {
                best = (i, j);
                best_waste = waste;
                best_margin = margin;
            }
        }
    }
    best
}

/// Position in `remaining` with the strongest preference for one group.
fn pick_next(
    boxes: &[BoundingBox],
    remaining: &[usize],
    bbox_a: &BoundingBox,
    bbox_b: &BoundingBox,
) -> usize {
    let mut best = 0;
    let mut best_difference = f64::NEG_INFINITY;
    for (position, &item) in remaining.iter().enumerate() {
        let difference = (bbox_a.enlargement(&boxes[item]) - bbox_b.enlargement(&boxes[item])).abs();
        if difference > best_difference {
            best = position;
            best_difference = difference;
        }
    }
    best
}

/// Sort-tile-recursive grouping of `items` into runs of at most `max`.
fn str_groups<T>(
    mut items: Vec<T>,
    max: usize,
    bbox_of: impl Fn(&T) -> BoundingBox,
) -> Vec<Vec<T>> {
    let group_count = items.len().div_ceil(max);
    if group_count <= 1 {
        return vec![items];
    }
    let group_sizes = even_sizes(items.len(), group_count);
    let slice_count = (group_count as f64).sqrt().ceil() as usize;
    let groups_per_slice = even_sizes(group_count, slice_count);

    items.sort_by(|a, b| bbox_of(a).center().x().total_cmp(&bbox_of(b).center().x()));

    let mut groups = Vec::with_capacity(group_count);
    let mut sizes = group_sizes.into_iter();
    let mut items = items.into_iter();
    for per_slice in groups_per_slice {
        let slice_sizes: Vec<usize> = sizes.by_ref().take(per_slice).collect();
        let total = slice_sizes.iter().sum();
        let mut slice: Vec<T> = items.by_ref().take(total).collect();
        slice.sort_by(|a, b| bbox_of(a).center().y().total_cmp(&bbox_of(b).center().y()));

        let mut slice = slice.into_iter();
        for size in slice_sizes {
            groups.push(slice.by_ref().take(size).collect());
        }
    }
    groups
}

fn even_sizes(total: usize, parts: usize) -> Vec<usize> {
    let base = total / parts;
    let extra = total % parts;
    (0..parts).map(|i| base + usize::from(i < extra)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Distance, Euclidean};

    fn point_entry(id: u64, lon: f64, lat: f64) -> IndexEntry {
        IndexEntry::new(FeatureId::new(id), BoundingBox::from_point(lon, lat))
    }

    fn grid(n: usize) -> Vec<IndexEntry> {
        (0..n * n)
            .map(|i| point_entry(i as u64 + 1, (i % n) as f64, (i / n) as f64))
            .collect()
    }

    fn brute_force(entries: &[IndexEntry], query: &BoundingBox) -> Vec<FeatureId> {
        let mut ids: Vec<FeatureId> = entries
            .iter()
            .filter(|entry| entry.bbox.intersects(query))
            .map(|entry| entry.id)
            .collect();
        ids.sort();
        ids
    }

    fn sorted(mut ids: Vec<FeatureId>) -> Vec<FeatureId> {
        ids.sort();
        ids
    }

    fn centre_distance(entries: &[IndexEntry], point: Point) -> impl Fn(FeatureId) -> f64 + '_ {
        move |id| {
            let entry = entries.iter().find(|entry| entry.id == id).unwrap();
            Euclidean.distance(point, entry.bbox.center())
        }
    }

    #[test]
    fn test_empty_tree() {
        let tree = RTree::default();
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 0);
        assert!(tree.bounds().is_none());
        assert!(tree.query_bbox(&BoundingBox::new(-1.0, -1.0, 1.0, 1.0)).is_empty());
        let nearest = tree
            .nearest(&Point::new(0.0, 0.0), 3, DistanceMetric::Euclidean, |_| 0.0, None)
            .unwrap();
        assert!(nearest.is_empty());
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_incremental_insert_keeps_invariants() {
        let entries = grid(20);
        let mut tree = RTree::default();
        for entry in &entries {
            tree.insert(entry.id, entry.bbox);
        }
        tree.check_invariants().unwrap();
        assert_eq!(tree.len(), 400);
        assert!(tree.height() >= 3 && tree.height() <= 9, "height {}", tree.height());
        assert_eq!(tree.bounds(), Some(BoundingBox::new(0.0, 0.0, 19.0, 19.0)));

        let query = BoundingBox::new(2.5, 3.0, 7.0, 4.5);
        assert_eq!(sorted(tree.query_bbox(&query)), brute_force(&entries, &query));
        assert_eq!(tree.count_bbox(&query), brute_force(&entries, &query).len());
    }

    #[test]
    fn test_query_order_is_stable() {
        let entries = grid(12);
        let tree = RTree::bulk_load(NodeCapacity::default(), entries);
        let query = BoundingBox::new(1.0, 1.0, 9.0, 9.0);
        let first = tree.query_bbox(&query);
        for _ in 0..5 {
            assert_eq!(tree.query_bbox(&query), first);
        }
    }

    #[test]
    fn test_bulk_load_matches_brute_force() {
        for n in [1, 3, 8, 9, 30] {
            let entries = grid(n);
            let tree = RTree::bulk_load(NodeCapacity::default(), entries.clone());
            tree.check_invariants().unwrap();
            assert_eq!(tree.len(), n * n);

            let query = BoundingBox::new(0.5, 0.5, n as f64 / 2.0, n as f64);
            assert_eq!(sorted(tree.query_bbox(&query)), brute_force(&entries, &query));
        }
    }

    #[test]
    fn test_bulk_load_respects_custom_capacity() {
        let capacity = NodeCapacity::new(3, 6).unwrap();
        for n in [7, 13, 25] {
            let tree = RTree::bulk_load(capacity, grid(n));
            tree.check_invariants().unwrap();
        }
    }

    #[test]
    fn test_remove_everything() {
        let entries = grid(15);
        let mut tree = RTree::default();
        for entry in &entries {
            tree.insert(entry.id, entry.bbox);
        }

        // Remove in a scattered order to exercise condensing across leaves.
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| (i * 37) % entries.len());
        for (removed, &i) in order.iter().enumerate() {
            let entry = entries[i];
            assert!(tree.remove(entry.id, &entry.bbox));
            assert!(!tree.remove(entry.id, &entry.bbox));
            assert_eq!(tree.len(), entries.len() - removed - 1);
            tree.check_invariants().unwrap();
        }
        assert!(tree.is_empty());
        assert!(tree.bounds().is_none());
        assert_eq!(tree.height(), 0);
    }

    #[test]
    fn test_remove_then_query() {
        let entries = grid(10);
        let mut tree = RTree::bulk_load(NodeCapacity::default(), entries.clone());
        let victims: Vec<IndexEntry> = entries.iter().copied().filter(|e| e.id.get() % 3 == 0).collect();
        for victim in &victims {
            assert!(tree.remove(victim.id, &victim.bbox));
        }
        tree.check_invariants().unwrap();

        let survivors: Vec<IndexEntry> = entries.iter().copied().filter(|e| e.id.get() % 3 != 0).collect();
        let query = BoundingBox::new(-1.0, -1.0, 100.0, 100.0);
        assert_eq!(sorted(tree.query_bbox(&query)), brute_force(&survivors, &query));
    }

    #[test]
    fn test_remove_with_wrong_box_fails() {
        let mut tree = RTree::default();
        tree.insert(FeatureId::new(1), BoundingBox::from_point(1.0, 1.0));
        assert!(!tree.remove(FeatureId::new(1), &BoundingBox::from_point(5.0, 5.0)));
        assert!(!tree.remove(FeatureId::new(2), &BoundingBox::from_point(1.0, 1.0)));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        let entries = grid(16);
        let tree = RTree::bulk_load(NodeCapacity::default(), entries.clone());
        let probe = Point::new(7.3, 2.9);

        let found = tree
            .nearest(&probe, 10, DistanceMetric::Euclidean, centre_distance(&entries, probe), None)
            .unwrap();
        let mut expected: Vec<f64> = entries
            .iter()
            .map(|entry| Euclidean.distance(probe, entry.bbox.center()))
            .collect();
        expected.sort_by(f64::total_cmp);

        assert_eq!(found.len(), 10);
        for (i, (_, distance)) in found.iter().enumerate() {
            assert!((distance - expected[i]).abs() < 1e-9);
        }
        assert!(found.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_nearest_ties_by_id() {
        let mut tree = RTree::default();
        for id in [5, 3, 9, 1] {
            tree.insert(FeatureId::new(id), BoundingBox::from_point(2.0, 2.0));
        }
        let found = tree
            .nearest(&Point::new(0.0, 0.0), 3, DistanceMetric::Euclidean, |_| 8f64.sqrt(), None)
            .unwrap();
        let ids: Vec<u64> = found.iter().map(|(id, _)| id.get()).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn test_nearest_k_exceeds_len() {
        let entries = grid(3);
        let tree = RTree::bulk_load(NodeCapacity::default(), entries.clone());
        let probe = Point::new(0.0, 0.0);
        let found = tree
            .nearest(&probe, 50, DistanceMetric::Euclidean, centre_distance(&entries, probe), None)
            .unwrap();
        assert_eq!(found.len(), 9);
        assert_eq!(found[0].0, FeatureId::new(1));
    }

    #[test]
    fn test_nearest_observes_cancellation() {
        let entries = grid(10);
        let tree = RTree::bulk_load(NodeCapacity::default(), entries.clone());
        let token = CancellationToken::new();
        token.cancel();
        let probe = Point::new(1.0, 1.0);
        let result = tree.nearest(
            &probe,
            5,
            DistanceMetric::Euclidean,
            centre_distance(&entries, probe),
            Some(&token),
        );
        assert!(matches!(result, Err(GeoQueryError::Cancelled)));
    }

    #[test]
    fn test_stats() {
        let tree = RTree::bulk_load(NodeCapacity::default(), grid(10));
        let stats = tree.stats();
        assert_eq!(stats.entry_count, 100);
        assert_eq!(stats.height, tree.height());
        assert!(stats.leaf_count >= 100 / 8);
        assert!(stats.node_count > stats.leaf_count);
    }

    #[test]
    fn test_quadratic_split_respects_min_fill() {
        let boxes: Vec<BoundingBox> = (0..9)
            .map(|i| BoundingBox::from_point(if i == 0 { 100.0 } else { i as f64 * 0.01 }, 0.0))
            .collect();
        let (a, b) = quadratic_split(&boxes, 4);
        assert!(a.len() >= 4 && b.len() >= 4, "{:?} / {:?}", a, b);
        assert_eq!(a.len() + b.len(), 9);
    }

    #[test]
    fn test_even_sizes() {
        assert_eq!(even_sizes(10, 3), vec![4, 3, 3]);
        assert_eq!(even_sizes(9, 9), vec![1; 9]);
    }
}
