//! Reverse indexer: maps a referenced object back to its referrers.
//!
//! Grounded on `trunk/src/smcore.c`'s `rev_index_way_nodes()`,
//! `rev_index_rel_nodes()`, `add_rev_ptr()`, and `get_rev_index()`: a way's
//! node refs and a relation's members are walked once after loading to build
//! node→way, node→relation, way→relation, and relation→relation back-links,
//! deduplicated per target the way `add_rev_ptr` skips an id already present
//! in the referrer list. A relation member that does not resolve in the main
//! trie is logged and skipped, exactly as `rev_index_rel_nodes` logs
//! `"relation %ld incomplete, %d objects missing"` and continues rather than
//! aborting the load.

use std::collections::HashMap;

use tracing::warn;

use crate::model::{ObjType, OsmObj};
use crate::trie::BxTrie;

fn add_dedup(map: &mut HashMap<i64, Vec<i64>>, target: i64, referrer: i64) {
    let list = map.entry(target).or_default();
    if !list.contains(&referrer) {
        list.push(referrer);
    }
}

#[derive(Debug, Default)]
pub struct ReverseIndex {
    node_to_way: HashMap<i64, Vec<i64>>,
    node_to_relation: HashMap<i64, Vec<i64>>,
    way_to_relation: HashMap<i64, Vec<i64>>,
    relation_to_relation: HashMap<i64, Vec<i64>>,
}

impl ReverseIndex {
    pub fn ways_referencing_node(&self, node_id: i64) -> &[i64] {
        self.node_to_way.get(&node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn relations_referencing_node(&self, node_id: i64) -> &[i64] {
        self.node_to_relation.get(&node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn relations_referencing_way(&self, way_id: i64) -> &[i64] {
        self.way_to_relation.get(&way_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn relations_referencing_relation(&self, relation_id: i64) -> &[i64] {
        self.relation_to_relation.get(&relation_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn index_way(&mut self, way_id: i64, refs: &[i64], trie: &BxTrie<OsmObj<'_>>) {
        for &node_id in refs {
            if !trie.contains(node_id, ObjType::Node) {
                warn!(way_id, node_id, "way references node that was not loaded");
                continue;
            }
            add_dedup(&mut self.node_to_way, node_id, way_id);
        }
    }

    fn index_relation(
        &mut self,
        relation_id: i64,
        members: &[crate::model::Member],
        trie: &BxTrie<OsmObj<'_>>,
    ) {
        let mut missing = 0usize;
        for member in members {
            if !trie.contains(member.id, member.mtype) {
                missing += 1;
                continue;
            }
            match member.mtype {
                ObjType::Node => add_dedup(&mut self.node_to_relation, member.id, relation_id),
                ObjType::Way => add_dedup(&mut self.way_to_relation, member.id, relation_id),
                ObjType::Relation => {
                    add_dedup(&mut self.relation_to_relation, member.id, relation_id)
                }
            }
            let _ = member.role;
        }
        if missing > 0 {
            warn!(relation_id, missing, "relation incomplete, member objects missing");
        }
    }

    /// Builds a reverse index over every way and relation currently in
    /// `trie`, logging (but not failing on) dangling member references.
    pub fn build(trie: &BxTrie<OsmObj<'_>>) -> Self {
        let mut index = ReverseIndex::default();
        let mut ways = Vec::new();
        let mut relations = Vec::new();
        trie.traverse(|id, otype, obj| match (otype, obj) {
            (ObjType::Way, OsmObj::Way(w)) => ways.push((id, w.refs.clone())),
            (ObjType::Relation, OsmObj::Relation(r)) => relations.push((id, r.members.clone())),
            _ => {}
        });
        for (id, refs) in &ways {
            index.index_way(*id, refs, trie);
        }
        for (id, members) in &relations {
            index.index_relation(*id, members, trie);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Member, ObjHeader, RelationObj, Role, WayObj};

    fn way(id: i64, refs: Vec<i64>) -> OsmObj<'static> {
        OsmObj::Way(WayObj { header: ObjHeader::new(ObjType::Way, id), tags: vec![], refs })
    }

    fn node(id: i64) -> OsmObj<'static> {
        OsmObj::Node(crate::model::NodeObj {
            header: ObjHeader::new(ObjType::Node, id),
            tags: vec![],
            lat: 0.0,
            lon: 0.0,
        })
    }

    fn relation(id: i64, members: Vec<Member>) -> OsmObj<'static> {
        OsmObj::Relation(RelationObj { header: ObjHeader::new(ObjType::Relation, id), tags: vec![], members })
    }

    #[test]
    fn way_nodes_are_indexed_and_deduplicated() {
        let mut trie = BxTrie::new();
        trie.insert(1, ObjType::Node, node(1));
        trie.insert(2, ObjType::Node, node(2));
        trie.insert(10, ObjType::Way, way(10, vec![1, 2, 1]));

        let index = ReverseIndex::build(&trie);
        assert_eq!(index.ways_referencing_node(1), &[10]);
        assert_eq!(index.ways_referencing_node(2), &[10]);
    }

    #[test]
    fn missing_relation_member_is_skipped_not_fatal() {
        let mut trie = BxTrie::new();
        trie.insert(1, ObjType::Node, node(1));
        trie.insert(100, ObjType::Relation, relation(
            100,
            vec![
                Member { mtype: ObjType::Node, id: 1, role: Role::Empty },
                Member { mtype: ObjType::Node, id: 999, role: Role::Empty },
            ],
        ));

        let index = ReverseIndex::build(&trie);
        assert_eq!(index.relations_referencing_node(1), &[100]);
        assert!(index.relations_referencing_node(999).is_empty());
    }

    #[test]
    fn relation_can_reference_way_and_relation() {
        let mut trie = BxTrie::new();
        trie.insert(10, ObjType::Way, way(10, vec![]));
        trie.insert(20, ObjType::Relation, relation(20, vec![]));
        trie.insert(
            100,
            ObjType::Relation,
            relation(
                100,
                vec![
                    Member { mtype: ObjType::Way, id: 10, role: Role::Outer },
                    Member { mtype: ObjType::Relation, id: 20, role: Role::Empty },
                ],
            ),
        );

        let index = ReverseIndex::build(&trie);
        assert_eq!(index.relations_referencing_way(10), &[100]);
        assert_eq!(index.relations_referencing_relation(20), &[100]);
    }
}
