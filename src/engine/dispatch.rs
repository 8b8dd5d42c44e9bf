//! Per-rule dispatch: the traversal that applies one compiled rule to every
//! matching object, plus the idempotent `fini` invocation (spec §4.6).
//!
//! Grounded on `trunk/src/smcore.c`'s `apply_rule` (guard order: bbox/
//! render-all-nodes, then way_type, then visibility, then the tag matcher,
//! then the action's main) and `call_fini` (checks `act->finished` before
//! calling so a rule whose fini already ran is a no-op on a second call).

use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::action::ActionCtx;
use crate::engine::compiled_rules::CompiledRule;
use crate::engine::gate::{bbox_gate, way_type_gate};
use crate::engine::matcher::object_matches;
use crate::id_alloc::IdAllocator;
use crate::model::OsmObj;
use crate::trie::BxTrie;

const RULE_TAG_KEY: &str = "smrender:rules";

/// Applies `rule` to every object of its variant currently in `store`, in
/// trie (ascending id) order. Returns the number of objects the action was
/// successfully applied to. Checks `interrupted` before every descent step
/// (spec §4.6 "Cancellation"); on a positive check the traversal stops and
/// returns 0 immediately, matching "the current traversal returns zero".
///
/// `ids` is the process-wide synthetic id allocator (spec §3 invariant iii);
/// an action that calls `ActionCtx::create_node` queues its object here and
/// the dispatcher inserts it into `store` once `main` returns, under the
/// same lock the caller already holds for the whole traversal (spec §4.6
/// "actions that mutate the trie ... must do so under an external lock").
pub fn execute_rule(
    rule: &CompiledRule<'_>,
    store: &mut BxTrie<OsmObj<'static>>,
    interrupted: &AtomicBool,
    render_all_nodes: bool,
    bbox: Option<(f64, f64, f64, f64)>,
    id_alloc: &IdAllocator,
) -> i32 {
    if rule.finished.load(Ordering::SeqCst) {
        return 0;
    }
    if interrupted.load(Ordering::SeqCst) {
        return 0;
    }

    if let Some(ini) = rule.action.ini {
        ini(&rule.params);
    }

    let mut match_ids = Vec::new();
    store.traverse(|id, otype, _obj| {
        if otype == rule.otype {
            match_ids.push(id);
        }
    });

    let mut applied = 0;
    for id in match_ids {
        if interrupted.load(Ordering::SeqCst) {
            return 0;
        }

        let Some(obj) = store.get(id, rule.otype) else { continue };
        if !obj.visible() {
            continue;
        }
        if !bbox_gate(render_all_nodes, bbox, obj) {
            continue;
        }
        if !way_type_gate(rule.way_type, obj) {
            continue;
        }
        if !object_matches(&rule.matchers, obj.tags()) {
            continue;
        }

        let ctx = ActionCtx::new(&rule.params, id_alloc);
        let obj_mut = store.get_mut(id, rule.otype).expect("object present under the same lock that just read it");
        let ret = (rule.action.main)(&ctx, obj_mut);
        if ret == 0 {
            obj_mut.set_tag_owned(RULE_TAG_KEY, &rule.source_id.to_string());
            applied += 1;
        } else if ret < 0 {
            break;
        }

        if ctx.delete_was_requested() {
            store.remove(id, rule.otype);
        }
        for created in ctx.take_pending_creates() {
            let created_id = created.id();
            let created_otype = created.otype();
            store.insert(created_id, created_otype, created);
        }
    }

    applied
}

/// Calls `rule`'s `fini` exactly once across however many times this is
/// invoked (spec §4.6 "Single active fini"); a second call is a no-op.
pub fn call_fini(rule: &CompiledRule<'_>) {
    if rule.finished.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Some(fini) = rule.action.fini {
        fini(&rule.params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bstring::BString;
    use crate::engine::compiled_rules::compile_one;
    use crate::model::{NodeObj, ObjHeader, ObjType, Tag};

    fn rule_object(tags: Vec<(&str, &str)>) -> OsmObj<'static> {
        OsmObj::Node(NodeObj {
            header: ObjHeader::new(ObjType::Node, 900),
            tags: tags.into_iter().map(|(k, v)| Tag::new(BString::from(k), BString::from(v))).collect(),
            lat: 0.0,
            lon: 0.0,
        })
    }

    fn node(id: i64, tags: Vec<(&str, &str)>) -> OsmObj<'static> {
        OsmObj::Node(NodeObj {
            header: ObjHeader::new(ObjType::Node, id),
            tags: tags.into_iter().map(|(k, v)| Tag::new(BString::from(k), BString::from(v))).collect(),
            lat: 0.0,
            lon: 0.0,
        })
    }

    #[test]
    fn matching_object_gets_tagged_and_action_applied() {
        let rule_obj = rule_object(vec![("name", "/^Acme/"), ("_action_", "tag?mark=yes")]);
        let rule = compile_one(0, ObjType::Node, &rule_obj).unwrap();

        let mut store = BxTrie::new();
        store.insert(1, ObjType::Node, node(1, vec![("name", "Acme Ltd")]));
        store.insert(2, ObjType::Node, node(2, vec![("name", "Contoso")]));

        let interrupted = AtomicBool::new(false);
        let applied = execute_rule(&rule, &mut store, &interrupted, true, None, &IdAllocator::new());

        assert_eq!(applied, 1);
        let hit = store.get(1, ObjType::Node).unwrap();
        assert_eq!(hit.get_tag("mark").unwrap().as_str().unwrap(), "yes");
        assert!(hit.get_tag(RULE_TAG_KEY).is_some());
        assert!(store.get(2, ObjType::Node).unwrap().get_tag("mark").is_none());
    }

    #[test]
    fn delete_action_removes_the_object_from_the_store() {
        let rule_obj = rule_object(vec![("area", ">100>"), ("_action_", "delete")]);
        let rule = compile_one(0, ObjType::Node, &rule_obj).unwrap();

        let mut store = BxTrie::new();
        store.insert(1, ObjType::Node, node(1, vec![("area", "150")]));
        store.insert(2, ObjType::Node, node(2, vec![("area", "50")]));

        let interrupted = AtomicBool::new(false);
        execute_rule(&rule, &mut store, &interrupted, true, None, &IdAllocator::new());

        assert!(!store.contains(1, ObjType::Node));
        assert!(store.contains(2, ObjType::Node));
    }

    #[test]
    fn interrupted_flag_aborts_traversal_with_zero_applied() {
        let rule_obj = rule_object(vec![("_action_", "tag?mark=yes")]);
        let rule = compile_one(0, ObjType::Node, &rule_obj).unwrap();

        let mut store = BxTrie::new();
        store.insert(1, ObjType::Node, node(1, vec![]));

        let interrupted = AtomicBool::new(true);
        let applied = execute_rule(&rule, &mut store, &interrupted, true, None, &IdAllocator::new());
        assert_eq!(applied, 0);
    }

    #[test]
    fn call_fini_runs_at_most_once() {
        let rule_obj = rule_object(vec![("_action_", "tag")]);
        let rule = compile_one(0, ObjType::Node, &rule_obj).unwrap();
        assert!(!rule.finished.load(Ordering::SeqCst));
        call_fini(&rule);
        assert!(rule.finished.load(Ordering::SeqCst));
        call_fini(&rule);
    }

    #[test]
    fn closed_way_gate_skips_open_ways() {
        use crate::model::WayObj;
        let rule_obj = rule_object(vec![("_action_", "tag?way_type=closed;mark=yes")]);
        let rule = compile_one(0, ObjType::Way, &rule_obj).unwrap();

        let mut store = BxTrie::new();
        store.insert(1, ObjType::Way, OsmObj::Way(WayObj { header: ObjHeader::new(ObjType::Way, 1), tags: vec![], refs: vec![1, 2, 3, 1] }));
        store.insert(2, ObjType::Way, OsmObj::Way(WayObj { header: ObjHeader::new(ObjType::Way, 2), tags: vec![], refs: vec![1, 2, 3] }));

        let interrupted = AtomicBool::new(false);
        execute_rule(&rule, &mut store, &interrupted, true, None, &IdAllocator::new());

        assert!(store.get(1, ObjType::Way).unwrap().get_tag("mark").is_some());
        assert!(store.get(2, ObjType::Way).unwrap().get_tag("mark").is_none());
    }
}
