//! smcore: the rule engine at the core of a rule-driven OSM/XML renderer.
//!
//! This crate is deliberately scoped to the in-memory pipeline: a streaming
//! pull parser, a bit-trie object store, a reverse indexer, a rule compiler,
//! and a multi-threaded rule executor. The graphical backend, HTTP
//! front-end, mapcss translation, coastline stitching, and grid generation
//! are external collaborators reached only through the action plug-in
//! contract (`engine::action`); none of that lives here.
//!
//! ## Data flow
//!
//! ```text
//! input.osm ──┐
//!             ├─ hpx::HpxParser ─ loader::load ─► main trie ──┬─ reverse_index::build
//! rules.osm ──┘                                               │
//!                                                              └─► engine::execute_rules
//!                                                                       │
//!                                                                       ▼
//!                                                              serializer::write_osm
//! ```
//!
//! [`run`] wires the above together for the common case: load both
//! documents, index the input, execute the compiled rules over it, and hand
//! back the mutated store plus run statistics. Callers that need finer
//! control (e.g. a custom load filter per file, or running the executor
//! more than once) can call the module functions directly instead.

pub mod bstring;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod hpx;
pub mod id_alloc;
pub mod loader;
pub mod model;
pub mod query_cache;
pub mod reverse_index;
pub mod serializer;
pub mod signals;
pub mod stats;
pub mod trie;

pub use config::Config;
pub use error::{Error, Result};

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::engine::{execute_rules, RunConfig, RunMetrics};
use crate::hpx::HpxParser;
use crate::id_alloc::IdAllocator;
use crate::loader::{load, load_with_progress, LoadFilter};
use crate::model::OsmObj;
use crate::reverse_index::ReverseIndex;
use crate::stats::LoadStats;
use crate::trie::BxTrie;

/// Whether to read input files by mapping them into memory
/// ([`HpxParser::open_mmap`]) or by reading them into an owned buffer
/// ([`HpxParser::open_buffered`]). Mirrors the CLI's `-M`/`-m` flag (spec
/// §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Mmap,
    Buffered,
}

fn open(path: &Path, mode: InputMode) -> Result<HpxParser<'static>> {
    match mode {
        InputMode::Mmap => HpxParser::open_mmap(path),
        InputMode::Buffered => HpxParser::open_buffered(path),
    }
}

/// Everything a single end-to-end run produces: the final object store
/// (after rule execution), statistics from loading the input, the reverse
/// index built over the *loaded* input (frozen before rule execution, per
/// spec §5 "Reverse index: frozen after the indexer runs"), and the
/// executor's run metrics.
pub struct RunOutcome {
    pub store: BxTrie<OsmObj<'static>>,
    pub load_stats: LoadStats,
    pub reverse_index: ReverseIndex,
    pub metrics: RunMetrics,
}

/// Loads `input_path` and `rules_path`, builds the reverse index, compiles
/// and executes the rules over the input, and returns the result.
///
/// `filter` restricts what gets loaded from `input_path` (e.g. a
/// bounding-box load filter from a `-c lat:lon:size` CLI argument via
/// [`crate::geo`]); `interrupted` is consulted by the executor at every
/// trie descent (spec §5 "Cancellation"). `ids` is shared across both loads
/// and the executor so that synthetic ids stay process-wide unique (spec §3
/// invariant iii). `progress`, when given, is the `SIGUSR1` flag
/// ([`crate::signals::SignalFlags::progress_requested`]) the loader polls
/// while reading `input_path`.
pub fn run(
    input_path: &Path,
    rules_path: &Path,
    mode: InputMode,
    config: &Config,
    filter: LoadFilter,
    interrupted: Arc<AtomicBool>,
    ids: Arc<IdAllocator>,
    progress: Option<&AtomicBool>,
) -> Result<RunOutcome> {
    let mut input_parser = open(input_path, mode)?;
    let (store, load_stats) = load_with_progress(&mut input_parser, &filter, &ids, progress)?;

    let mut rules_parser = open(rules_path, mode)?;
    let (rules_trie, _rules_stats) = load(&mut rules_parser, &LoadFilter::unrestricted(), &ids)?;

    let reverse_index = ReverseIndex::build(&store);

    let run_config = RunConfig::from_config(config, filter.bbox);
    let (store, metrics) = execute_rules(&rules_trie, store, &run_config, interrupted, ids);

    Ok(RunOutcome { store, load_stats, reverse_index, metrics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjType;
    use std::io::Write;
    use std::sync::atomic::AtomicBool;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    /// End-to-end S1: a single node with no rules passes straight through.
    #[test]
    fn s1_single_node_passthrough() {
        let input = write_temp(
            r#"<osm><node id="1" lat="45.00" lon="14.00" version="1" timestamp="2020-01-01T00:00:00Z"/></osm>"#,
        );
        let rules = write_temp("<osm></osm>");

        let config = Config::load(Path::new("/nonexistent/does/not/exist.toml")).unwrap();
        let outcome = run(
            input.path(),
            rules.path(),
            InputMode::Buffered,
            &config,
            LoadFilter::unrestricted(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(IdAllocator::new()),
            None,
        )
        .unwrap();

        assert_eq!(outcome.store.len(), 1);
        let node = outcome.store.get(1, ObjType::Node).unwrap();
        assert_eq!(node.header().version, 1);
        assert_eq!(node.as_node().unwrap().lat, 45.0);
        assert_eq!(node.as_node().unwrap().lon, 14.0);
        assert_eq!(outcome.metrics.rules_compiled, 0);
    }

    /// End-to-end S3: a GT numeric matcher deletes the matching ways.
    #[test]
    fn s3_gt_matcher_deletes_large_areas() {
        let input = write_temp(
            r#"<osm>
                <way id="1" version="1"><tag k="area" v="50"/></way>
                <way id="2" version="1"><tag k="area" v="150"/></way>
                <way id="3" version="1"><tag k="area" v="1000"/></way>
            </osm>"#,
        );
        let rules = write_temp(r#"<osm><way id="901" version="1"><tag k="area" v=">100>"/><tag k="_action_" v="delete"/></way></osm>"#);

        let config = Config::load(Path::new("/nonexistent/does/not/exist.toml")).unwrap();
        let outcome = run(
            input.path(),
            rules.path(),
            InputMode::Buffered,
            &config,
            LoadFilter::unrestricted(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(IdAllocator::new()),
            None,
        )
        .unwrap();

        assert!(outcome.store.contains(1, ObjType::Way));
        assert!(!outcome.store.contains(2, ObjType::Way));
        assert!(!outcome.store.contains(3, ObjType::Way));
    }
}
