//! Master/worker thread pool for threadable rules (spec §4.6 "Threading
//! model", §5 "Scheduling").
//!
//! Grounded on `branches/smrules/src/smthread.c`'s `struct sm_thread` pool:
//! a fixed number of worker threads, each given one full rule traversal at a
//! time. The master (here, [`WorkerPool::submit`]/[`WorkerPool::drain_all`])
//! blocks on a channel receive rather than `smthread.c`'s per-slot condition
//! variable, but preserves the same invariant set: a worker never starts a
//! second job until its first is done, and `fini` calls drain in the order
//! rules were submitted regardless of which worker finishes first (the
//! "Single active fini" invariant).
//!
//! The shared object store is `Arc<RwLock<BxTrie<OsmObj<'static>>>>`, one
//! write-lock held for a job's entire traversal — spec §5 describes the
//! main trie as "mutation ... serialised by the object-allocation mutex",
//! which a coarse per-job lock satisfies without needing per-object
//! synchronisation that the trie itself does not provide (spec §4.2
//! "Concurrency": "the trie itself is not internally synchronised").

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::engine::compiled_rules::{CompiledRule, RuleId};
use crate::engine::dispatch::{self, execute_rule};
use crate::id_alloc::IdAllocator;
use crate::model::OsmObj;
use crate::trie::BxTrie;

struct Job {
    rule: Arc<CompiledRule<'static>>,
    store: Arc<RwLock<BxTrie<OsmObj<'static>>>>,
    interrupted: Arc<AtomicBool>,
    render_all_nodes: bool,
    bbox: Option<(f64, f64, f64, f64)>,
    ids: Arc<IdAllocator>,
    /// Accumulates the applied-object count across however many rules the
    /// caller submits before the next [`WorkerPool::drain_all`], so the
    /// executor's per-pass metrics (spec §4.6 "Pass structure") cover
    /// threaded rules too, not just the synchronous path.
    applied: Arc<AtomicU64>,
}

fn worker_loop(job_rx: Receiver<Job>, done_tx: Sender<RuleId>) {
    while let Ok(job) = job_rx.recv() {
        let id = job.rule.id;
        {
            let mut guard = job.store.write().expect("store lock poisoned");
            let applied = execute_rule(&job.rule, &mut guard, &job.interrupted, job.render_all_nodes, job.bbox, &job.ids);
            if applied > 0 {
                job.applied.fetch_add(applied as u64, Ordering::SeqCst);
            }
        }
        if done_tx.send(id).is_err() {
            break;
        }
    }
}

/// A fixed-size pool of worker threads plus the fini-ordering bookkeeping
/// the master side needs to satisfy spec §4.6's "Single active fini"
/// invariant.
pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    done_rx: Receiver<RuleId>,
    capacity: usize,
    in_flight: usize,
    submission_order: VecDeque<RuleId>,
    completed: HashSet<RuleId>,
    pending_fini: HashMap<RuleId, Arc<CompiledRule<'static>>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<RuleId>();

        let handles = (0..capacity)
            .map(|_| {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                std::thread::spawn(move || worker_loop(job_rx, done_tx))
            })
            .collect();

        WorkerPool {
            job_tx: Some(job_tx),
            done_rx,
            capacity,
            in_flight: 0,
            submission_order: VecDeque::new(),
            completed: HashSet::new(),
            pending_fini: HashMap::new(),
            handles,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Hands `rule` to an idle worker, blocking first if every worker is
    /// currently busy (spec §5 "the master suspends ... whenever no slot is
    /// idle"). The rule is recorded in submission order so its `fini` drains
    /// at the right moment even if a later-submitted rule finishes first.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &mut self,
        rule: Arc<CompiledRule<'static>>,
        store: Arc<RwLock<BxTrie<OsmObj<'static>>>>,
        interrupted: Arc<AtomicBool>,
        render_all_nodes: bool,
        bbox: Option<(f64, f64, f64, f64)>,
        ids: Arc<IdAllocator>,
        applied: Arc<AtomicU64>,
    ) {
        if self.in_flight >= self.capacity {
            self.wait_for_one();
        }
        self.submission_order.push_back(rule.id);
        self.pending_fini.insert(rule.id, rule.clone());
        self.job_tx
            .as_ref()
            .expect("pool not yet dropped")
            .send(Job { rule, store, interrupted, render_all_nodes, bbox, ids, applied })
            .expect("worker threads outlive the pool");
        self.in_flight += 1;
    }

    fn wait_for_one(&mut self) {
        let done = self.done_rx.recv().expect("a worker is in flight");
        self.in_flight -= 1;
        self.completed.insert(done);
        self.drain_ready_fini();
    }

    /// Calls `fini` for every completed rule at the front of the submission
    /// queue, stopping at the first rule still outstanding — this is what
    /// keeps fini order equal to submission order despite out-of-order
    /// worker completion (spec §4.6, testable property 6).
    fn drain_ready_fini(&mut self) {
        while let Some(&front) = self.submission_order.front() {
            if !self.completed.remove(&front) {
                break;
            }
            self.submission_order.pop_front();
            if let Some(rule) = self.pending_fini.remove(&front) {
                dispatch::call_fini(&rule);
            }
        }
    }

    /// Waits for every in-flight job and drains the fini queue completely
    /// (spec §4.6: before a non-threadable rule starts, and between passes).
    pub fn drain_all(&mut self) {
        while self.in_flight > 0 {
            self.wait_for_one();
        }
        debug_assert!(self.submission_order.is_empty());
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.drain_all();
        // Dropping the master's sender closes the channel once every worker
        // has returned from its current recv (they hold no other clone), so
        // each worker's loop sees `Err` and exits.
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bstring::BString;
    use crate::engine::compiled_rules::compile_one;
    use crate::model::{NodeObj, ObjHeader, ObjType, Tag};

    fn rule(id: RuleId, source_id: i64, tags: Vec<(&str, &str)>) -> Arc<CompiledRule<'static>> {
        let obj = OsmObj::Node(NodeObj {
            header: ObjHeader::new(ObjType::Node, source_id),
            tags: tags.into_iter().map(|(k, v)| Tag::new(BString::from(k), BString::from(v))).collect(),
            lat: 0.0,
            lon: 0.0,
        });
        Arc::new(compile_one(id, ObjType::Node, &obj).unwrap())
    }

    #[test]
    fn submitted_rule_runs_and_its_fini_eventually_drains() {
        let mut pool = WorkerPool::new(2);
        let store = Arc::new(RwLock::new(BxTrie::new()));
        store.write().unwrap().insert(
            1,
            ObjType::Node,
            OsmObj::Node(NodeObj { header: ObjHeader::new(ObjType::Node, 1), tags: vec![], lat: 0.0, lon: 0.0 }),
        );
        let interrupted = Arc::new(AtomicBool::new(false));

        let r = rule(0, 900, vec![("_action_", "tag?mark=yes")]);
        let applied = Arc::new(AtomicU64::new(0));
        pool.submit(r.clone(), store.clone(), interrupted, true, None, Arc::new(IdAllocator::new()), applied.clone());
        pool.drain_all();

        assert!(store.read().unwrap().get(1, ObjType::Node).unwrap().get_tag("mark").is_some());
        assert!(r.finished.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn both_submitted_rules_drain_their_fini_exactly_once() {
        let mut pool = WorkerPool::new(1);
        let store = Arc::new(RwLock::new(BxTrie::new()));
        let interrupted = Arc::new(AtomicBool::new(false));

        let r1 = rule(0, 1, vec![("_action_", "tag")]);
        let r2 = rule(1, 2, vec![("_action_", "tag")]);
        let ids = Arc::new(IdAllocator::new());
        let applied = Arc::new(AtomicU64::new(0));
        pool.submit(r1.clone(), store.clone(), interrupted.clone(), true, None, ids.clone(), applied.clone());
        pool.submit(r2.clone(), store.clone(), interrupted, true, None, ids, applied);
        pool.drain_all();

        assert!(r1.finished.load(std::sync::atomic::Ordering::SeqCst));
        assert!(r2.finished.load(std::sync::atomic::Ordering::SeqCst));
    }
}
