//! Action plug-in ABI (spec §4.5 item 3, §6 "Action plug-in ABI").
//!
//! The original dlopens a shared object and resolves `act_<name>_main` /
//! `_ini` / `_fini` symbols by convention. Design Note §9 resolves this for
//! a systems-language rewrite as "a dispatch table ... populated at compile
//! time from a registry macro", which is what [`REGISTRY`] is: a static
//! table of [`ActionDef`]s the compiler looks up by short name, generalizing
//! the teacher's `Production` (`Box<dyn Fn(...) + Send + Sync>` built once
//! per rule) into named, reusable entries shared across every rule that
//! references them. The `@library` segment of the `_action_` grammar is
//! parsed but otherwise ignored — there is no dynamic loading in this
//! rewrite, only the registry.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::bstring::BString;
use crate::id_alloc::IdAllocator;
use crate::model::{NodeObj, ObjHeader, ObjType, OsmObj, Tag};

/// A rule's declared or deduced way-type constraint (spec §4.5 item 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WayType {
    Any,
    ClosedWay,
    OpenWay,
}

/// Everything an action's `main` needs besides the object itself: its
/// parameter dictionary (spec §4.5 item 4) and a place to request the
/// object's deletion, since `main` only has `&mut OsmObj` and structural
/// trie edits are the dispatcher's job, not the action's (spec §4.2
/// "Concurrency": mutations are serialised by the caller).
pub struct ActionCtx<'p> {
    pub params: &'p HashMap<String, String>,
    ids: &'p IdAllocator,
    delete_requested: Cell<bool>,
    /// Objects a `main` asked the dispatcher to insert once it returns
    /// (spec §4.6 "Interruption semantics": trie mutation happens under the
    /// lock the dispatcher already holds for the whole traversal, not inside
    /// the action itself).
    pending_creates: RefCell<Vec<OsmObj<'static>>>,
}

impl<'p> ActionCtx<'p> {
    pub fn new(params: &'p HashMap<String, String>, ids: &'p IdAllocator) -> Self {
        ActionCtx { params, ids, delete_requested: Cell::new(false), pending_creates: RefCell::new(Vec::new()) }
    }

    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Equivalent of the original's `mark_threaded` helper, generalized to
    /// the one structural request an action can make of the dispatcher.
    pub fn request_delete(&self) {
        self.delete_requested.set(true);
    }

    pub fn delete_was_requested(&self) -> bool {
        self.delete_requested.get()
    }

    /// Synthesizes a new node with a fresh id from the shared allocator
    /// (spec §3 invariant iii, §5 "Id allocator") and queues it for the
    /// dispatcher to insert into the main trie. Tag strings are leaked for
    /// the remainder of the process, matching [`OsmObj::set_tag_owned`]'s
    /// memory discipline for action-authored strings.
    pub fn create_node(&self, lat: f64, lon: f64, tags: &[(&str, &str)]) -> i64 {
        let id = self.ids.alloc(ObjType::Node);
        let owned_tags = tags
            .iter()
            .map(|(k, v)| {
                let k: &'static str = Box::leak((*k).to_owned().into_boxed_str());
                let v: &'static str = Box::leak((*v).to_owned().into_boxed_str());
                Tag::new(BString::from(k), BString::from(v))
            })
            .collect();
        let header = ObjHeader { otype: ObjType::Node, visible: true, id, version: 1, changeset: 0, uid: 0, timestamp: 0 };
        self.pending_creates.borrow_mut().push(OsmObj::Node(NodeObj { header, tags: owned_tags, lat, lon }));
        id
    }

    pub(super) fn take_pending_creates(&self) -> Vec<OsmObj<'static>> {
        self.pending_creates.replace(Vec::new())
    }
}

pub type ActionMain = fn(&ActionCtx<'_>, &mut OsmObj<'_>) -> i32;
pub type ActionIni = fn(&HashMap<String, String>) -> i32;
pub type ActionFini = fn(&HashMap<String, String>) -> i32;

/// One registered action: the `main` dispatch entry plus optional lifecycle
/// hooks (spec §4.5 item 3, §6 "ini/fini signatures").
pub struct ActionDef {
    pub name: &'static str,
    pub ini: Option<ActionIni>,
    pub main: ActionMain,
    pub fini: Option<ActionFini>,
    pub default_way_type: WayType,
    /// Whether this action opted in to threaded dispatch (spec §4.5 item 6,
    /// "actions opt in by calling a helper during their ini"). Baked into
    /// the registry entry rather than set at ini time, since our ini hooks
    /// take no rule handle to call back through.
    pub threadable: bool,
}

fn act_tag_main(ctx: &ActionCtx<'_>, obj: &mut OsmObj<'_>) -> i32 {
    if ctx.params.is_empty() {
        return 1;
    }
    for (k, v) in ctx.params.iter() {
        if k == "way_type" {
            continue;
        }
        obj.set_tag_owned(k, v);
    }
    0
}

fn act_append_tag_main(ctx: &ActionCtx<'_>, obj: &mut OsmObj<'_>) -> i32 {
    let (Some(key), Some(value)) = (ctx.get_param("key"), ctx.get_param("value")) else {
        return 1;
    };
    let existing = obj.get_tag(key).map(|v| v.to_owned_string()).unwrap_or_default();
    let combined = format!("{existing}{value}");
    obj.set_tag_owned(key, &combined);
    0
}

fn act_delete_main(ctx: &ActionCtx<'_>, _obj: &mut OsmObj<'_>) -> i32 {
    ctx.request_delete();
    0
}

/// Synthesizes a node offset from the matched object's own coordinates (or
/// the origin for a way/relation), tagging it from every param except
/// `lat_offset`/`lon_offset`/`way_type`. Exercises the allocator+lock path
/// spec §4.6 calls out for "actions that mutate the trie (creating synthetic
/// nodes/ways)".
fn act_spawn_node_main(ctx: &ActionCtx<'_>, obj: &mut OsmObj<'_>) -> i32 {
    let (base_lat, base_lon) = obj.as_node().map(|n| (n.lat, n.lon)).unwrap_or((0.0, 0.0));
    let lat_offset = ctx.get_param("lat_offset").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
    let lon_offset = ctx.get_param("lon_offset").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
    let tags: Vec<(&str, &str)> = ctx
        .params
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "lat_offset" | "lon_offset" | "way_type"))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    ctx.create_node(base_lat + lat_offset, base_lon + lon_offset, &tags);
    0
}

/// Compile-time action registry (spec §4.5 item 3; Design Note §9).
pub static REGISTRY: &[ActionDef] = &[
    ActionDef {
        name: "tag",
        ini: None,
        main: act_tag_main,
        fini: None,
        default_way_type: WayType::Any,
        threadable: true,
    },
    ActionDef {
        name: "append_tag",
        ini: None,
        main: act_append_tag_main,
        fini: None,
        default_way_type: WayType::Any,
        threadable: true,
    },
    ActionDef {
        name: "delete",
        ini: None,
        main: act_delete_main,
        fini: None,
        default_way_type: WayType::Any,
        // Deletion mutates trie structure; keep it off the thread pool so
        // the dispatcher's single write-lock critical section is the only
        // place that ever removes an entry.
        threadable: false,
    },
    ActionDef {
        name: "spawn_node",
        ini: None,
        main: act_spawn_node_main,
        fini: None,
        default_way_type: WayType::Any,
        // Trie insertion happens post-main under the dispatcher's lock
        // (spec §4.6); kept off the thread pool for the same reason as
        // `delete`.
        threadable: false,
    },
];

/// Looks up an action by its short name (the part before `@`/`?` in the
/// `_action_` grammar).
pub fn lookup(name: &str) -> Option<&'static ActionDef> {
    REGISTRY.iter().find(|a| a.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bstring::BString;
    use crate::model::{NodeObj, ObjHeader, ObjType};

    fn node() -> OsmObj<'static> {
        OsmObj::Node(NodeObj { header: ObjHeader::new(ObjType::Node, 1), tags: vec![], lat: 0.0, lon: 0.0 })
    }

    #[test]
    fn tag_action_sets_every_param_as_a_tag() {
        let mut params = HashMap::new();
        params.insert("mark".to_string(), "yes".to_string());
        let ids = IdAllocator::new();
        let ctx = ActionCtx::new(&params, &ids);
        let mut obj = node();
        let ret = (lookup("tag").unwrap().main)(&ctx, &mut obj);
        assert_eq!(ret, 0);
        assert_eq!(obj.get_tag("mark").unwrap(), BString::from("yes"));
    }

    #[test]
    fn append_tag_concatenates_onto_existing_value() {
        let mut obj = node();
        obj.set_tag_owned("trace", "A");

        let mut params = HashMap::new();
        params.insert("key".to_string(), "trace".to_string());
        params.insert("value".to_string(), "B".to_string());
        let ids = IdAllocator::new();
        let ctx = ActionCtx::new(&params, &ids);
        (lookup("append_tag").unwrap().main)(&ctx, &mut obj);
        assert_eq!(obj.get_tag("trace").unwrap().as_str().unwrap(), "AB");
    }

    #[test]
    fn delete_action_requests_deletion_without_touching_tags() {
        let params = HashMap::new();
        let ids = IdAllocator::new();
        let ctx = ActionCtx::new(&params, &ids);
        let mut obj = node();
        (lookup("delete").unwrap().main)(&ctx, &mut obj);
        assert!(ctx.delete_was_requested());
        assert!(obj.tags().is_empty());
    }

    #[test]
    fn unknown_action_name_is_not_found() {
        assert!(lookup("nonexistent").is_none());
    }

    #[test]
    fn spawn_node_action_queues_a_synthetic_node_with_offset_coordinates() {
        let mut params = HashMap::new();
        params.insert("lat_offset".to_string(), "0.5".to_string());
        params.insert("lon_offset".to_string(), "-0.25".to_string());
        params.insert("amenity".to_string(), "bench".to_string());
        let ids = IdAllocator::new();
        let ctx = ActionCtx::new(&params, &ids);
        let mut obj = OsmObj::Node(NodeObj { header: ObjHeader::new(ObjType::Node, 1), tags: vec![], lat: 10.0, lon: 20.0 });

        let ret = (lookup("spawn_node").unwrap().main)(&ctx, &mut obj);
        assert_eq!(ret, 0);

        let created = ctx.take_pending_creates();
        assert_eq!(created.len(), 1);
        let OsmObj::Node(n) = &created[0] else { panic!("expected a node") };
        assert_eq!(n.lat, 10.5);
        assert_eq!(n.lon, 19.75);
        assert_eq!(n.tags[0].v.as_str().unwrap(), "bench");
        assert!(n.header.id != 1);
    }
}
