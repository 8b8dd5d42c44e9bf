//! Object loader: drives [`HpxParser`] events into [`OsmObj`]s and interns
//! them into a [`BxTrie`].
//!
//! Grounded on `culebron-box_dyn_fn_question`'s `OsmXmlReader::_next()`/
//! `_process_elements()` state machine (track the currently-open element,
//! accumulate its children, finalize on close) generalized from that crate's
//! owned `Tags`/`Attrs` maps to borrowed [`BString`] tag views straight off
//! the parser buffer, and on `trunk/smloadosm.c` for which attributes each
//! element carries and their defaults.

use chrono::DateTime;

use crate::bstring::BString;
use crate::error::{Error, Result};
use crate::hpx::{Attr, ElementKind, HpxParser};
use crate::id_alloc::IdAllocator;
use crate::model::{Member, NodeObj, ObjHeader, ObjType, OsmObj, RelationObj, Role, Tag, WayObj};
use crate::stats::LoadStats;
use crate::trie::BxTrie;

/// Restricts loading to nodes within a bounding box, `(min_lat, min_lon,
/// max_lat, max_lon)`. This is a load-time extract filter, independent of
/// the per-rule bbox gate in [`crate::engine::gate`] which runs later over
/// whatever was actually loaded.
#[derive(Debug, Clone, Copy)]
pub struct LoadFilter {
    pub bbox: Option<(f64, f64, f64, f64)>,
}

impl LoadFilter {
    pub fn unrestricted() -> Self {
        LoadFilter { bbox: None }
    }

    fn node_in_bounds(&self, lat: f64, lon: f64) -> bool {
        match self.bbox {
            None => true,
            Some((min_lat, min_lon, max_lat, max_lon)) => {
                lat >= min_lat && lat <= max_lat && lon >= min_lon && lon <= max_lon
            }
        }
    }

    fn is_active(&self) -> bool {
        self.bbox.is_some()
    }
}

fn find_attr<'a>(attrs: &[Attr<'a>], name: &str) -> Option<BString<'a>> {
    attrs.iter().find(|a| a.name.as_str() == Ok(name)).map(|a| a.value)
}

fn parse_timestamp(attrs: &[Attr<'_>]) -> i64 {
    find_attr(attrs, "timestamp")
        .and_then(|v| v.as_str().ok().map(str::to_owned))
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| chrono::Utc::now().timestamp())
}

fn header_from_attrs(otype: ObjType, attrs: &[Attr<'_>], ids: &IdAllocator) -> Result<ObjHeader> {
    let id = find_attr(attrs, "id")
        .and_then(|v| v.parse_i64())
        .ok_or_else(|| Error::Xml { line: 0, msg: format!("{} missing id attribute", otype.as_str()) })?;
    // id == 0 means "assign one" (spec §4.3): hand out a synthetic id rather
    // than treating it as a real, collidable identifier.
    let id = if id == 0 { ids.alloc(otype) } else { id };
    Ok(ObjHeader {
        otype,
        visible: find_attr(attrs, "visible").and_then(|v| v.parse_bool()).unwrap_or(true),
        id,
        version: find_attr(attrs, "version").and_then(|v| v.parse_u32()).unwrap_or(1) as i32,
        changeset: find_attr(attrs, "changeset").and_then(|v| v.parse_u32()).unwrap_or(0) as i32,
        uid: find_attr(attrs, "uid").and_then(|v| v.parse_u32()).unwrap_or(0) as i32,
        timestamp: parse_timestamp(attrs),
    })
}

enum Building<'a> {
    None,
    Node(ObjHeader, f64, f64, Vec<Tag<'a>>),
    Way(ObjHeader, Vec<i64>, Vec<Tag<'a>>),
    Relation(ObjHeader, Vec<Member>, Vec<Tag<'a>>),
}

/// Parses every element out of `parser`, interning objects into a fresh
/// trie. Duplicate ids for the same `(id, type)` overwrite in place (spec
/// §3); a node outside `filter`'s bbox is skipped and counted, not an error.
///
/// `ids` is borrowed rather than created here so that a caller loading both
/// the main input and the rules file — or an action synthesizing objects
/// later in the run — shares the same counters (spec §3 invariant iii: the
/// allocator is process-wide, not per-load).
pub fn load<'a>(
    parser: &mut HpxParser<'a>,
    filter: &LoadFilter,
    ids: &IdAllocator,
) -> Result<(BxTrie<OsmObj<'a>>, LoadStats)> {
    load_with_progress(parser, filter, ids, None)
}

/// As [`load`], but polls `progress` (set by `SIGUSR1`, spec §6 "Signals")
/// after every element and logs a one-line snapshot of the load so far when
/// it is found set, clearing it again.
pub fn load_with_progress<'a>(
    parser: &mut HpxParser<'a>,
    filter: &LoadFilter,
    ids: &IdAllocator,
    progress: Option<&std::sync::atomic::AtomicBool>,
) -> Result<(BxTrie<OsmObj<'a>>, LoadStats)> {
    let mut trie = BxTrie::new();
    let mut stats = LoadStats::new();
    let mut building = Building::None;

    while let Some(elem) = parser.next_element()? {
        if let Some(flag) = progress {
            if flag.swap(false, std::sync::atomic::Ordering::SeqCst) {
                tracing::info!(
                    nodes = stats.nodes(),
                    ways = stats.ways(),
                    relations = stats.relations(),
                    line = elem.line,
                    "load progress"
                );
            }
        }
        match elem.kind {
            ElementKind::Open { name, attrs } | ElementKind::Single { name, attrs } => {
                let is_self_closing = matches!(elem.kind, ElementKind::Single { .. });
                match name.as_str().unwrap_or("") {
                    "node" => {
                        let header = header_from_attrs(ObjType::Node, &attrs, ids)?;
                        let lat = find_attr(&attrs, "lat").and_then(|v| v.parse_f64()).unwrap_or(0.0);
                        let lon = find_attr(&attrs, "lon").and_then(|v| v.parse_f64()).unwrap_or(0.0);
                        building = Building::Node(header, lat, lon, Vec::new());
                        if is_self_closing {
                            finalize(&mut building, &mut trie, &mut stats, filter);
                        }
                    }
                    "way" => {
                        let header = header_from_attrs(ObjType::Way, &attrs, ids)?;
                        building = Building::Way(header, Vec::new(), Vec::new());
                        if is_self_closing {
                            finalize(&mut building, &mut trie, &mut stats, filter);
                        }
                    }
                    "relation" => {
                        let header = header_from_attrs(ObjType::Relation, &attrs, ids)?;
                        building = Building::Relation(header, Vec::new(), Vec::new());
                        if is_self_closing {
                            finalize(&mut building, &mut trie, &mut stats, filter);
                        }
                    }
                    "tag" => {
                        let k = find_attr(&attrs, "k").unwrap_or(BString::empty());
                        let v = find_attr(&attrs, "v").unwrap_or(BString::empty());
                        tags_of(&mut building).push(Tag::new(k, v));
                    }
                    "nd" => {
                        if let Building::Way(_, refs, _) = &mut building {
                            if let Some(r) = find_attr(&attrs, "ref").and_then(|v| v.parse_i64()) {
                                refs.push(r);
                            }
                        }
                    }
                    "member" => {
                        if let Building::Relation(_, members, _) = &mut building {
                            let mtype = find_attr(&attrs, "type")
                                .and_then(|v| v.as_str().ok().and_then(ObjType::from_str))
                                .unwrap_or(ObjType::Node);
                            let id = find_attr(&attrs, "ref").and_then(|v| v.parse_i64()).unwrap_or(0);
                            let role = find_attr(&attrs, "role")
                                .and_then(|v| v.as_str().ok().map(Role::parse))
                                .unwrap_or(Role::Empty);
                            members.push(Member { mtype, id, role });
                        }
                    }
                    _ => {}
                }
            }
            ElementKind::Close { name } => {
                if matches!(name.as_str().unwrap_or(""), "node" | "way" | "relation") {
                    finalize(&mut building, &mut trie, &mut stats, filter);
                }
            }
            _ => {}
        }
    }

    Ok((trie, stats))
}

fn tags_of<'a, 'b>(building: &'b mut Building<'a>) -> &'b mut Vec<Tag<'a>> {
    match building {
        Building::Node(_, _, _, tags) => tags,
        Building::Way(_, _, tags) => tags,
        Building::Relation(_, _, tags) => tags,
        Building::None => unreachable!("tag element outside any parent"),
    }
}

fn finalize<'a>(
    building: &mut Building<'a>,
    trie: &mut BxTrie<OsmObj<'a>>,
    stats: &mut LoadStats,
    filter: &LoadFilter,
) {
    let built = std::mem::replace(building, Building::None);
    let obj = match built {
        Building::None => return,
        Building::Node(header, lat, lon, tags) => {
            if !filter.node_in_bounds(lat, lon) {
                stats.skipped_out_of_bbox += 1;
                return;
            }
            OsmObj::Node(NodeObj { header, tags, lat, lon })
        }
        Building::Way(header, refs, tags) => {
            let refs = if filter.is_active() {
                let kept: Vec<i64> = refs.into_iter().filter(|&r| trie.contains(r, ObjType::Node)).collect();
                if kept.is_empty() {
                    stats.skipped_empty_after_filter += 1;
                    return;
                }
                kept
            } else {
                refs
            };
            OsmObj::Way(WayObj { header, tags, refs })
        }
        Building::Relation(header, members, tags) => {
            let members = if filter.is_active() {
                let kept: Vec<Member> =
                    members.into_iter().filter(|m| trie.contains(m.id, m.mtype)).collect();
                if kept.is_empty() {
                    stats.skipped_empty_after_filter += 1;
                    return;
                }
                kept
            } else {
                members
            };
            OsmObj::Relation(RelationObj { header, tags, members })
        }
    };

    stats.record(&obj);
    let otype = obj.otype();
    let id = obj.id();
    if trie.insert(id, otype, obj).is_some() {
        stats.duplicates_overwritten += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn progress_flag_is_cleared_once_consumed() {
        let doc = br#"<osm><node id="1" lat="1.0" lon="2.0"/><node id="2" lat="1.1" lon="2.1"/></osm>"#;
        let mut parser = HpxParser::from_slice(doc);
        let progress = AtomicBool::new(true);
        let (_trie, _stats) =
            load_with_progress(&mut parser, &LoadFilter::unrestricted(), &IdAllocator::new(), Some(&progress)).unwrap();
        assert!(!progress.load(Ordering::SeqCst));
    }

    #[test]
    fn loads_node_way_and_relation() {
        let doc = br#"
            <osm>
              <node id="1" lat="1.0" lon="2.0" version="3"><tag k="amenity" v="cafe"/></node>
              <node id="2" lat="1.1" lon="2.1"/>
              <way id="10"><nd ref="1"/><nd ref="2"/><tag k="highway" v="residential"/></way>
              <relation id="100"><member type="way" ref="10" role="outer"/><tag k="type" v="multipolygon"/></relation>
            </osm>
        "#;
        let mut parser = HpxParser::from_slice(doc);
        let (trie, stats) = load(&mut parser, &LoadFilter::unrestricted(), &IdAllocator::new()).unwrap();

        assert_eq!(stats.nodes(), 2);
        assert_eq!(stats.ways(), 1);
        assert_eq!(stats.relations(), 1);

        let node = trie.get(1, ObjType::Node).unwrap();
        assert_eq!(node.get_tag("amenity").unwrap().as_str().unwrap(), "cafe");
        assert_eq!(node.header().version, 3);

        let way = trie.get(10, ObjType::Way).unwrap().as_way().unwrap();
        assert_eq!(way.refs, vec![1, 2]);

        let relation = trie.get(100, ObjType::Relation).unwrap().as_relation().unwrap();
        assert_eq!(relation.members[0].mtype, ObjType::Way);
        assert_eq!(relation.members[0].role, Role::Outer);
    }

    #[test]
    fn nodes_outside_bbox_filter_are_skipped_and_counted() {
        let doc = br#"<osm><node id="1" lat="0.0" lon="0.0"/><node id="2" lat="50.0" lon="50.0"/></osm>"#;
        let mut parser = HpxParser::from_slice(doc);
        let filter = LoadFilter { bbox: Some((-1.0, -1.0, 1.0, 1.0)) };
        let (trie, stats) = load(&mut parser, &filter, &IdAllocator::new()).unwrap();

        assert!(trie.contains(1, ObjType::Node));
        assert!(!trie.contains(2, ObjType::Node));
        assert_eq!(stats.skipped_out_of_bbox, 1);
    }

    #[test]
    fn duplicate_id_overwrites_and_is_counted() {
        let doc = br#"<osm><node id="1" lat="0.0" lon="0.0" version="1"/><node id="1" lat="0.0" lon="0.0" version="2"/></osm>"#;
        let mut parser = HpxParser::from_slice(doc);
        let (trie, stats) = load(&mut parser, &LoadFilter::unrestricted(), &IdAllocator::new()).unwrap();

        assert_eq!(trie.get(1, ObjType::Node).unwrap().header().version, 2);
        assert_eq!(stats.duplicates_overwritten, 1);
    }

    #[test]
    fn missing_id_attribute_is_an_error() {
        let doc = br#"<node lat="0.0" lon="0.0"/>"#;
        let mut parser = HpxParser::from_slice(doc);
        assert!(load(&mut parser, &LoadFilter::unrestricted(), &IdAllocator::new()).is_err());
    }

    #[test]
    fn zero_id_is_replaced_with_a_synthetic_negative_id() {
        let doc = br#"<osm><node id="0" lat="0.0" lon="0.0"/></osm>"#;
        let mut parser = HpxParser::from_slice(doc);
        let (trie, _stats) = load(&mut parser, &LoadFilter::unrestricted(), &IdAllocator::new()).unwrap();
        let mut ids = Vec::new();
        trie.traverse(|id, _, _| ids.push(id));
        assert_eq!(ids.len(), 1);
        assert!(ids[0] < 0);
    }

    #[test]
    fn way_with_all_refs_outside_filter_is_dropped_entirely() {
        let doc = br#"
            <osm>
              <node id="1" lat="0.0" lon="0.0"/>
              <node id="2" lat="50.0" lon="50.0"/>
              <way id="10"><nd ref="2"/></way>
            </osm>
        "#;
        let mut parser = HpxParser::from_slice(doc);
        let filter = LoadFilter { bbox: Some((-1.0, -1.0, 1.0, 1.0)) };
        let (trie, stats) = load(&mut parser, &filter, &IdAllocator::new()).unwrap();
        assert!(!trie.contains(10, ObjType::Way));
        assert_eq!(stats.skipped_empty_after_filter, 1);
    }

    #[test]
    fn way_with_one_dangling_ref_keeps_the_resolvable_one() {
        let doc = br#"
            <osm>
              <node id="1" lat="0.0" lon="0.0"/>
              <node id="2" lat="50.0" lon="50.0"/>
              <way id="10"><nd ref="1"/><nd ref="2"/></way>
            </osm>
        "#;
        let mut parser = HpxParser::from_slice(doc);
        let filter = LoadFilter { bbox: Some((-1.0, -1.0, 1.0, 1.0)) };
        let (trie, _stats) = load(&mut parser, &filter, &IdAllocator::new()).unwrap();
        let way = trie.get(10, ObjType::Way).unwrap().as_way().unwrap();
        assert_eq!(way.refs, vec![1]);
    }
}
