//! Load-time statistics (spec §3 "Load Statistics").
//!
//! Shaped like `engine/metrics.rs`'s `RunMetrics`/`PassMetrics` pair in the
//! teacher crate: a plain counter struct filled in by a single call site
//! (there, `Parser::saturate`; here, [`crate::loader::load`]) and read back
//! by the caller once the pass is done, rather than computed on demand.

use crate::model::{ObjType, OsmObj};

/// Tracks up to this many distinct `version` values by exact count; anything
/// beyond that is folded into `other_versions` (spec §3: "capped").
const VERSION_CAP: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct IdRange {
    pub min: i64,
    pub max: i64,
    pub count: u64,
}

impl IdRange {
    fn observe(&mut self, id: i64) {
        if self.count == 0 {
            self.min = id;
            self.max = id;
        } else {
            self.min = self.min.min(id);
            self.max = self.max.max(id);
        }
        self.count += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    pub by_type: [IdRange; ObjType::SLOT_COUNT],
    pub bbox: Option<(f64, f64, f64, f64)>,
    versions: Vec<(i32, u64)>,
    pub other_versions: u64,
    pub skipped_out_of_bbox: u64,
    pub duplicates_overwritten: u64,
    /// Ways/relations discarded because the load filter left them with no
    /// resolvable references (spec §4.3 "Load filter").
    pub skipped_empty_after_filter: u64,
}

impl LoadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> u64 {
        self.by_type[ObjType::Node.slot()].count
    }

    pub fn ways(&self) -> u64 {
        self.by_type[ObjType::Way.slot()].count
    }

    pub fn relations(&self) -> u64 {
        self.by_type[ObjType::Relation.slot()].count
    }

    pub fn id_range(&self, otype: ObjType) -> IdRange {
        self.by_type[otype.slot()]
    }

    /// Top distinct `(version, count)` pairs observed, in first-seen order.
    pub fn versions(&self) -> &[(i32, u64)] {
        &self.versions
    }

    pub fn record(&mut self, obj: &OsmObj<'_>) {
        let header = obj.header();
        self.by_type[header.otype.slot()].observe(header.id);

        if let Some(entry) = self.versions.iter_mut().find(|(v, _)| *v == header.version) {
            entry.1 += 1;
        } else if self.versions.len() < VERSION_CAP {
            self.versions.push((header.version, 1));
        } else {
            self.other_versions += 1;
        }

        if let OsmObj::Node(n) = obj {
            self.bbox = Some(match self.bbox {
                None => (n.lat, n.lon, n.lat, n.lon),
                Some((min_lat, min_lon, max_lat, max_lon)) => (
                    min_lat.min(n.lat),
                    min_lon.min(n.lon),
                    max_lat.max(n.lat),
                    max_lon.max(n.lon),
                ),
            });
        }
    }
}
