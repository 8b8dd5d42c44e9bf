//! Run metrics for [`super::executor::execute_rules`] (spec §4.6 "Pass
//! structure"), filled in as each (version, variant) pass completes.
//!
//! Shaped like the teacher crate's `RunMetrics`/`PassMetrics` pair: a plain
//! counter struct filled in by the driver and handed back to the caller
//! once the run is done, rather than computed on demand.

use crate::model::ObjType;

#[derive(Debug, Clone, Copy, Default)]
pub struct PassMetrics {
    pub version: i32,
    pub otype: ObjType,
    pub rules_run: u32,
    pub objects_applied: u64,
}

impl PassMetrics {
    fn new(version: i32, otype: ObjType) -> Self {
        PassMetrics { version, otype, rules_run: 0, objects_applied: 0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub passes: Vec<PassMetrics>,
    pub rules_compiled: u32,
    pub rules_skipped: u32,
    pub cancelled: bool,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_applied(&self) -> u64 {
        self.passes.iter().map(|p| p.objects_applied).sum()
    }

    pub(super) fn record_pass(&mut self, version: i32, otype: ObjType, rules_run: u32, objects_applied: u64) {
        let mut pass = PassMetrics::new(version, otype);
        pass.rules_run = rules_run;
        pass.objects_applied = objects_applied;
        self.passes.push(pass);
    }
}
