//! Executor: orchestrates passes across versions and variants, routing each
//! rule to the worker pool or running it synchronously (spec §4.6 "Rule
//! executor", §5).
//!
//! Grounded on `trunk/src/smcore.c`'s `execute_rules` (relation→way→node
//! order, draining the pool between passes) and `apply_smrules` (per-rule
//! threadability check routing to `traverse_queue` vs `traverse`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::engine::compiled_rules::{compile_rules, CompiledRule};
use crate::engine::dispatch;
use crate::engine::metrics::RunMetrics;
use crate::engine::workers::WorkerPool;
use crate::id_alloc::IdAllocator;
use crate::model::{ObjType, OsmObj};
use crate::trie::BxTrie;

/// Runtime knobs the executor needs beyond what a [`CompiledRule`] itself
/// carries (spec §4.6 item 4 "render_all_nodes", §4.7's bbox).
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    pub worker_threads: usize,
    pub render_all_nodes: bool,
    pub bbox: Option<(f64, f64, f64, f64)>,
}

impl RunConfig {
    pub fn from_config(config: &Config, bbox: Option<(f64, f64, f64, f64)>) -> Self {
        RunConfig { worker_threads: config.worker_threads(), render_all_nodes: config.render_all_nodes(), bbox }
    }
}

/// Order rules are visited within one version pass (spec §4.6 "Pass
/// structure": "relation, way, node").
const VARIANT_ORDER: [ObjType; 3] = [ObjType::Relation, ObjType::Way, ObjType::Node];

fn sorted_distinct_versions(rules: &[CompiledRule<'_>]) -> Vec<i32> {
    let mut versions: Vec<i32> = rules.iter().map(|r| r.version).collect();
    versions.sort_unstable();
    versions.dedup();
    versions
}

/// Compiles `rules_trie` and runs every compiled rule over `store` in the
/// pass order spec §4.6 mandates, returning the (possibly mutated) store and
/// a metrics summary. `store` must be `'static` because threadable rules run
/// on real OS threads (see `engine::workers` docs); in practice this holds
/// for anything loaded via [`crate::hpx::HpxParser::open_mmap`] or
/// [`crate::hpx::HpxParser::open_buffered`].
pub fn execute_rules(
    rules_trie: &BxTrie<OsmObj<'static>>,
    store: BxTrie<OsmObj<'static>>,
    config: &RunConfig,
    interrupted: Arc<AtomicBool>,
    ids: Arc<IdAllocator>,
) -> (BxTrie<OsmObj<'static>>, RunMetrics) {
    let (compiled, skipped) = compile_rules(rules_trie);
    let mut metrics = RunMetrics::new();
    metrics.rules_compiled = compiled.len() as u32;
    metrics.rules_skipped = skipped;

    let versions = sorted_distinct_versions(&compiled);
    let rules: Vec<Arc<CompiledRule<'static>>> = compiled.into_iter().map(Arc::new).collect();

    let shared_store = Arc::new(RwLock::new(store));
    let mut pool = WorkerPool::new(config.worker_threads);

    for &version in &versions {
        for &otype in &VARIANT_ORDER {
            let mut rules_run = 0u32;
            let applied = Arc::new(AtomicU64::new(0));
            for rule in rules.iter().filter(|r| r.version == version && r.otype == otype) {
                if interrupted.load(Ordering::SeqCst) {
                    metrics.cancelled = true;
                    continue;
                }
                rules_run += 1;
                if rule.threadable {
                    pool.submit(
                        rule.clone(),
                        shared_store.clone(),
                        interrupted.clone(),
                        config.render_all_nodes,
                        config.bbox,
                        ids.clone(),
                        applied.clone(),
                    );
                } else {
                    // Non-threadable rules run synchronously on the caller,
                    // but only after every in-flight worker has drained its
                    // fini (spec §4.6 "the executor waits for every worker to
                    // idle and drains the fini queue before running the rule
                    // synchronously").
                    pool.drain_all();
                    let mut guard = shared_store.write().expect("store lock poisoned");
                    let ran = dispatch::execute_rule(rule, &mut guard, &interrupted, config.render_all_nodes, config.bbox, &ids);
                    drop(guard);
                    dispatch::call_fini(rule);
                    if ran > 0 {
                        applied.fetch_add(ran as u64, Ordering::SeqCst);
                    }
                }
            }
            // Drain between variants, not just between versions: a way
            // rule's matcher may depend on a node tag a node rule in this
            // same pass just set, and vice versa for relation -> way
            // (spec's design note on `execute_rules`: the pool and fini
            // queue are fully drained between each variant, not only once
            // per version).
            pool.drain_all();
            metrics.record_pass(version, otype, rules_run, applied.load(Ordering::SeqCst));
        }
    }

    drop(pool);
    let store = Arc::try_unwrap(shared_store)
        .unwrap_or_else(|_| panic!("worker pool held a store reference after draining"))
        .into_inner()
        .expect("store lock poisoned");

    (store, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bstring::BString;
    use crate::model::{NodeObj, ObjHeader, Tag};

    fn rule_object(id: i64, version: i32, tags: Vec<(&str, &str)>) -> OsmObj<'static> {
        OsmObj::Node(NodeObj {
            header: ObjHeader { version, ..ObjHeader::new(ObjType::Node, id) },
            tags: tags.into_iter().map(|(k, v)| Tag::new(BString::from(k), BString::from(v))).collect(),
            lat: 0.0,
            lon: 0.0,
        })
    }

    #[test]
    fn rules_apply_in_ascending_version_order() {
        let mut rules_trie = BxTrie::new();
        rules_trie.insert(901, ObjType::Node, rule_object(901, 1, vec![("_action_", "append_tag?key=trace;value=A")]));
        rules_trie.insert(902, ObjType::Node, rule_object(902, 2, vec![("_action_", "append_tag?key=trace;value=B")]));

        let mut store = BxTrie::new();
        store.insert(1, ObjType::Node, OsmObj::Node(NodeObj { header: ObjHeader::new(ObjType::Node, 1), tags: vec![], lat: 0.0, lon: 0.0 }));

        let config = RunConfig { worker_threads: 2, render_all_nodes: true, bbox: None };
        let interrupted = Arc::new(AtomicBool::new(false));
        let (store, metrics) = execute_rules(&rules_trie, store, &config, interrupted, Arc::new(IdAllocator::new()));

        let obj = store.get(1, ObjType::Node).unwrap();
        assert_eq!(obj.get_tag("trace").unwrap().as_str().unwrap(), "AB");
        assert_eq!(metrics.rules_compiled, 2);
    }

    #[test]
    fn relation_way_node_order_is_honoured_within_a_pass() {
        use crate::model::WayObj;

        let mut rules_trie = BxTrie::new();
        rules_trie.insert(
            901,
            ObjType::Way,
            OsmObj::Way(WayObj { header: ObjHeader::new(ObjType::Way, 901), tags: vec![Tag::new(BString::from("_action_"), BString::from("append_tag?key=trace;value=W"))], refs: vec![] }),
        );
        rules_trie.insert(902, ObjType::Node, rule_object(902, 1, vec![("_action_", "append_tag?key=trace;value=N")]));

        let mut store = BxTrie::new();
        store.insert(1, ObjType::Way, OsmObj::Way(WayObj { header: ObjHeader::new(ObjType::Way, 1), tags: vec![], refs: vec![] }));
        store.insert(2, ObjType::Node, OsmObj::Node(NodeObj { header: ObjHeader::new(ObjType::Node, 2), tags: vec![], lat: 0.0, lon: 0.0 }));

        let config = RunConfig { worker_threads: 1, render_all_nodes: true, bbox: None };
        let interrupted = Arc::new(AtomicBool::new(false));
        let (store, _metrics) = execute_rules(&rules_trie, store, &config, interrupted, Arc::new(IdAllocator::new()));

        assert_eq!(store.get(1, ObjType::Way).unwrap().get_tag("trace").unwrap().as_str().unwrap(), "W");
        assert_eq!(store.get(2, ObjType::Node).unwrap().get_tag("trace").unwrap().as_str().unwrap(), "N");
    }
}
