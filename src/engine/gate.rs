//! Guard checks applied before an action's `main` runs (spec §4.6 items 1-3),
//! split out of [`super::dispatch`] so each guard can be tested in isolation.
//!
//! Grounded on `trunk/src/smcore.c`'s `apply_rule`, which checks, in order:
//! render_all_nodes/bbox containment, way-type, then tag match, before ever
//! calling the action's main function.

use crate::engine::action::WayType;
use crate::model::OsmObj;

/// Spec §4.6 item 2: a rule declaring `way_type=closed`/`open` only fires on
/// ways whose `is_closed()` matches; nodes and relations always pass since
/// the constraint is meaningless for them (mirrors the original silently
/// ignoring `act->way_type` on non-way objects).
pub fn way_type_gate(way_type: WayType, obj: &OsmObj<'_>) -> bool {
    match (way_type, obj.as_way()) {
        (WayType::Any, _) => true,
        (_, None) => true,
        (WayType::ClosedWay, Some(w)) => w.is_closed(),
        (WayType::OpenWay, Some(w)) => !w.is_closed(),
    }
}

/// Spec §4.6 item 1: when `render_all_nodes` is false and a bbox is active,
/// a bare node is only visited if it falls inside the bbox; ways/relations
/// are always visited since their constituent nodes were already filtered
/// at load time (spec §4.3 item 1).
pub fn bbox_gate(
    render_all_nodes: bool,
    bbox: Option<(f64, f64, f64, f64)>,
    obj: &OsmObj<'_>,
) -> bool {
    if render_all_nodes {
        return true;
    }
    let Some((min_lat, min_lon, max_lat, max_lon)) = bbox else { return true };
    match obj.as_node() {
        Some(n) => n.lat >= min_lat && n.lat <= max_lat && n.lon >= min_lon && n.lon <= max_lon,
        None => true,
    }
}
