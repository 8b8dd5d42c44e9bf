//! Rule engine: compiles objects in a rules trie into executable rules and
//! runs them over the main object store (spec §4.5, §4.6).
//!
//! ## How the parts work together
//!
//! ```text
//! rules trie ── compile_rules (compiled_rules.rs) ── Vec<CompiledRule>
//!                  - matcher.rs compiles each tag pair
//!                  - action.rs resolves the _action_ name against REGISTRY
//!                               │
//!                               v
//!                     execute_rules (executor.rs)
//!                       - one pass per distinct rule version, ascending
//!                       - relation → way → node order within a pass
//!                       - threadable rules go to workers.rs's pool
//!                       - non-threadable rules drain the pool, then run
//!                         synchronously via dispatch::execute_rule
//!                               │
//!                               v
//!                     dispatch.rs per object
//!                       - gate.rs: way_type / bbox guards
//!                       - matcher.rs: tag predicate
//!                       - action's main, then smrender:rules tagging
//! ```

pub mod action;
pub mod compiled_rules;
pub mod dispatch;
pub mod executor;
pub mod gate;
pub mod matcher;
pub mod metrics;
pub mod workers;

pub use compiled_rules::{compile_rules, CompiledRule, RuleId};
pub use executor::{execute_rules, RunConfig};
pub use metrics::RunMetrics;
