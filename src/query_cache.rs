//! Fixed-slot, ref-counted cache keyed on a quantized bounding box.
//!
//! Actions that need geometry queries over a window of the loaded data (for
//! example "every node tagged `place=city` within 2km") are expensive enough
//! that repeating one for every rule invocation over the same area is
//! wasteful, but the working set of *distinct* areas in one run is small.
//! `QueryCache` keeps a bounded number of computed results alive, evicting
//! only a slot nobody currently holds a reference to, and blocks (via a
//! [`Condvar`], the way `engine::workers`' pool waits for fini-queue slots)
//! rather than growing unbounded when every slot is in use.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};

use crate::model::{ObjType, OsmObj};
use crate::reverse_index::ReverseIndex;
use crate::trie::BxTrie;

/// A bounding box quantized to a fixed grid so that near-identical queries
/// hit the same cache key (spec §4.7).
pub type Key = (i64, i64, i64, i64);

/// Quantizes `(min_lat, min_lon, max_lat, max_lon)` to `1 / scale`-degree
/// grid cells.
pub fn quantize(bbox: (f64, f64, f64, f64), scale: i64) -> Key {
    let q = |v: f64| (v * scale as f64).round() as i64;
    (q(bbox.0), q(bbox.1), q(bbox.2), q(bbox.3))
}

struct Slot<V> {
    key: Key,
    value: Arc<V>,
    refcount: usize,
}

struct Inner<V> {
    slots: Vec<Slot<V>>,
}

pub struct QueryCache<V> {
    inner: Mutex<Inner<V>>,
    cond: Condvar,
    capacity: usize,
}

impl<V> QueryCache<V> {
    pub fn new(capacity: usize) -> Self {
        QueryCache { inner: Mutex::new(Inner { slots: Vec::with_capacity(capacity) }), cond: Condvar::new(), capacity: capacity.max(1) }
    }

    /// Returns the cached value for `key`, computing it with `compute` on a
    /// miss. The caller holds an implicit reference until it calls
    /// [`QueryCache::release`]; blocks if the cache is full and every slot is
    /// currently held.
    pub fn get_or_compute<F: FnOnce() -> V>(&self, key: Key, compute: F) -> Arc<V> {
        let mut compute = Some(compute);
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(slot) = inner.slots.iter_mut().find(|s| s.key == key) {
                slot.refcount += 1;
                return slot.value.clone();
            }
            if inner.slots.len() < self.capacity {
                let value = Arc::new((compute.take().expect("compute called once"))());
                inner.slots.push(Slot { key, value: value.clone(), refcount: 1 });
                return value;
            }
            if let Some(idx) = inner.slots.iter().position(|s| s.refcount == 0) {
                inner.slots.remove(idx);
                continue;
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Releases the caller's reference to `key`, allowing the slot to be
    /// evicted once nobody else holds it.
    pub fn release(&self, key: Key) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.slots.iter_mut().find(|s| s.key == key) {
            slot.refcount = slot.refcount.saturating_sub(1);
            if slot.refcount == 0 {
                self.cond.notify_all();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the sub-trie for a bounding-box query (spec §4.7 "Extraction"):
/// every node inside `bbox`, the ways that reference any of them (plus the
/// rest of those ways' nodes, to complete geometry), the relations that
/// reference any of those nodes or ways, and — one hop only — the relations
/// that reference *those* relations.
pub fn extract_bbox<'a>(
    trie: &BxTrie<OsmObj<'a>>,
    rev: &ReverseIndex,
    bbox: (f64, f64, f64, f64),
) -> BxTrie<OsmObj<'a>>
where
    OsmObj<'a>: Clone,
{
    let (min_lat, min_lon, max_lat, max_lon) = bbox;
    let mut sub = BxTrie::new();
    let mut node_ids_in_box = Vec::new();

    trie.traverse(|id, otype, obj| {
        if otype != ObjType::Node {
            return;
        }
        if let OsmObj::Node(n) = obj {
            if n.lat >= min_lat && n.lat <= max_lat && n.lon >= min_lon && n.lon <= max_lon {
                node_ids_in_box.push(id);
                sub.insert(id, ObjType::Node, obj.clone());
            }
        }
    });

    let mut way_ids = HashSet::new();
    for &node_id in &node_ids_in_box {
        for &way_id in rev.ways_referencing_node(node_id) {
            way_ids.insert(way_id);
        }
    }
    for &way_id in &way_ids {
        let Some(way_obj) = trie.get(way_id, ObjType::Way) else { continue };
        if let OsmObj::Way(w) = way_obj {
            for &ref_id in &w.refs {
                if !sub.contains(ref_id, ObjType::Node) {
                    if let Some(node_obj) = trie.get(ref_id, ObjType::Node) {
                        sub.insert(ref_id, ObjType::Node, node_obj.clone());
                    }
                }
            }
        }
        sub.insert(way_id, ObjType::Way, way_obj.clone());
    }

    let mut relation_ids = HashSet::new();
    for &node_id in &node_ids_in_box {
        relation_ids.extend(rev.relations_referencing_node(node_id).iter().copied());
    }
    for &way_id in &way_ids {
        relation_ids.extend(rev.relations_referencing_way(way_id).iter().copied());
    }
    let mut second_hop = HashSet::new();
    for &rel_id in &relation_ids {
        second_hop.extend(rev.relations_referencing_relation(rel_id).iter().copied());
    }
    relation_ids.extend(second_hop);

    for rel_id in relation_ids {
        if let Some(rel_obj) = trie.get(rel_id, ObjType::Relation) {
            sub.insert(rel_id, ObjType::Relation, rel_obj.clone());
        }
    }

    sub
}
