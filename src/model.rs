//! OSM object model (spec §3).
//!
//! Generalizes `culebron-box_dyn_fn_question`'s `OsmObj`/`Node`/`Way`/
//! `Relation` enum shape (see its `src/main.rs`) from owned `Arc<str>` tag
//! storage to borrowed [`BString`] views, and adds the exact field set from
//! `branches/oobj/smrender.h`'s `struct onode`/`struct otag`.
//!
//! Tags normally borrow from the [`hpx`](crate::hpx) parser's input buffer.
//! An action that needs to attach a *new* string (for example
//! `engine::action`'s built-in `set_tag`) leaks it with [`Box::leak`] so it
//! lives for the remainder of the process — objects are never freed
//! individually during a run (spec §3 "Lifecycle"), so this matches the
//! run's actual memory discipline without needing a self-referential arena.

use crate::bstring::BString;

/// One of the three OSM object variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ObjType {
    #[default]
    Node,
    Way,
    Relation,
}

impl ObjType {
    /// Slot index into a trie leaf's per-variant payload array
    /// (`IDX_NODE, IDX_WAY, IDX_REL` in the original `smcore.h`).
    pub const fn slot(self) -> usize {
        match self {
            ObjType::Node => 0,
            ObjType::Way => 1,
            ObjType::Relation => 2,
        }
    }

    pub const SLOT_COUNT: usize = 3;

    pub const fn from_str(s: &str) -> Option<Self> {
        match s.as_bytes() {
            b"node" => Some(ObjType::Node),
            b"way" => Some(ObjType::Way),
            b"relation" => Some(ObjType::Relation),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ObjType::Node => "node",
            ObjType::Way => "way",
            ObjType::Relation => "relation",
        }
    }
}

/// Relation member role (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Empty,
    Inner,
    Outer,
    To,
    From,
    Via,
    Link,
    Forward,
    Backward,
    Stop,
    Label,
    AdminCentre,
    Other,
}

impl Role {
    pub fn parse(s: &str) -> Self {
        match s {
            "" => Role::Empty,
            "inner" => Role::Inner,
            "outer" => Role::Outer,
            "to" => Role::To,
            "from" => Role::From,
            "via" => Role::Via,
            "link" => Role::Link,
            "forward" => Role::Forward,
            "backward" => Role::Backward,
            "stop" => Role::Stop,
            "label" => Role::Label,
            "admin_centre" => Role::AdminCentre,
            _ => Role::Other,
        }
    }
}

/// A relation member reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub mtype: ObjType,
    pub id: i64,
    pub role: Role,
}

/// A `{k, v}` tag pair of borrowed byte views.
#[derive(Debug, Clone, Copy)]
pub struct Tag<'a> {
    pub k: BString<'a>,
    pub v: BString<'a>,
}

impl<'a> Tag<'a> {
    pub fn new(k: BString<'a>, v: BString<'a>) -> Self {
        Tag { k, v }
    }
}

/// Fields common to every object variant (spec §3 "common header").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjHeader {
    pub otype: ObjType,
    pub visible: bool,
    pub id: i64,
    pub version: i32,
    pub changeset: i32,
    pub uid: i32,
    pub timestamp: i64,
}

impl ObjHeader {
    pub fn new(otype: ObjType, id: i64) -> Self {
        ObjHeader { otype, visible: true, id, version: 1, changeset: 0, uid: 0, timestamp: 0 }
    }
}

#[derive(Debug, Clone)]
pub struct NodeObj<'a> {
    pub header: ObjHeader,
    pub tags: Vec<Tag<'a>>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone)]
pub struct WayObj<'a> {
    pub header: ObjHeader,
    pub tags: Vec<Tag<'a>>,
    pub refs: Vec<i64>,
}

impl WayObj<'_> {
    /// A way is closed iff its first and last ref are equal and it has at
    /// least two refs (spec §3).
    pub fn is_closed(&self) -> bool {
        self.refs.len() >= 2 && self.refs.first() == self.refs.last()
    }
}

#[derive(Debug, Clone)]
pub struct RelationObj<'a> {
    pub header: ObjHeader,
    pub tags: Vec<Tag<'a>>,
    pub members: Vec<Member>,
}

/// An OSM object: a node, way, or relation.
#[derive(Debug, Clone)]
pub enum OsmObj<'a> {
    Node(NodeObj<'a>),
    Way(WayObj<'a>),
    Relation(RelationObj<'a>),
}

impl<'a> OsmObj<'a> {
    pub fn header(&self) -> &ObjHeader {
        match self {
            OsmObj::Node(n) => &n.header,
            OsmObj::Way(w) => &w.header,
            OsmObj::Relation(r) => &r.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut ObjHeader {
        match self {
            OsmObj::Node(n) => &mut n.header,
            OsmObj::Way(w) => &mut w.header,
            OsmObj::Relation(r) => &mut r.header,
        }
    }

    pub fn id(&self) -> i64 {
        self.header().id
    }

    pub fn otype(&self) -> ObjType {
        self.header().otype
    }

    pub fn visible(&self) -> bool {
        self.header().visible
    }

    pub fn tags(&self) -> &[Tag<'a>] {
        match self {
            OsmObj::Node(n) => &n.tags,
            OsmObj::Way(w) => &w.tags,
            OsmObj::Relation(r) => &r.tags,
        }
    }

    pub fn tags_mut(&mut self) -> &mut Vec<Tag<'a>> {
        match self {
            OsmObj::Node(n) => &mut n.tags,
            OsmObj::Way(w) => &mut w.tags,
            OsmObj::Relation(r) => &mut r.tags,
        }
    }

    /// Returns the value of the first tag whose key matches `key`, if any.
    pub fn get_tag(&self, key: &str) -> Option<BString<'a>> {
        self.tags().iter().find(|t| t.k.as_str() == Ok(key)).map(|t| t.v)
    }

    /// Sets `key` to `value`, overwriting an existing tag with that key if
    /// present, appending otherwise. `value` is leaked for the remainder of
    /// the process (see module docs).
    pub fn set_tag_owned(&mut self, key: &str, value: &str) {
        let k: &'static str = Box::leak(key.to_owned().into_boxed_str());
        let v: &'static str = Box::leak(value.to_owned().into_boxed_str());
        let tags = self.tags_mut();
        if let Some(existing) = tags.iter_mut().find(|t| t.k.as_str() == Ok(key)) {
            existing.v = BString::from(v);
        } else {
            tags.push(Tag::new(BString::from(k), BString::from(v)));
        }
    }

    /// Removes the tag with key `key` by swap-and-pop (spec §4.5 item 2),
    /// returning its value if it existed.
    pub fn remove_tag(&mut self, key: &str) -> Option<BString<'a>> {
        let tags = self.tags_mut();
        let idx = tags.iter().position(|t| t.k.as_str() == Ok(key))?;
        Some(tags.swap_remove(idx).v)
    }

    pub fn as_way(&self) -> Option<&WayObj<'a>> {
        match self {
            OsmObj::Way(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeObj<'a>> {
        match self {
            OsmObj::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationObj<'a>> {
        match self {
            OsmObj::Relation(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64) -> OsmObj<'static> {
        OsmObj::Node(NodeObj { header: ObjHeader::new(ObjType::Node, id), tags: vec![], lat: 0.0, lon: 0.0 })
    }

    #[test]
    fn closed_way_detects_matching_first_and_last_ref() {
        let closed =
            WayObj { header: ObjHeader::new(ObjType::Way, 1), tags: vec![], refs: vec![1, 2, 3, 1] };
        let open = WayObj { header: ObjHeader::new(ObjType::Way, 2), tags: vec![], refs: vec![1, 2, 3] };
        assert!(closed.is_closed());
        assert!(!open.is_closed());
    }

    #[test]
    fn single_ref_way_is_not_closed() {
        let w = WayObj { header: ObjHeader::new(ObjType::Way, 1), tags: vec![], refs: vec![1] };
        assert!(!w.is_closed());
    }

    #[test]
    fn set_tag_owned_overwrites_existing_key() {
        let mut n = node(1);
        n.set_tag_owned("mark", "yes");
        n.set_tag_owned("mark", "no");
        assert_eq!(n.tags().len(), 1);
        assert_eq!(n.get_tag("mark").unwrap().as_str().unwrap(), "no");
    }

    #[test]
    fn remove_tag_swap_removes_matching_key() {
        let mut n = node(1);
        n.set_tag_owned("a", "1");
        n.set_tag_owned("b", "2");
        let removed = n.remove_tag("a").unwrap();
        assert_eq!(removed.as_str().unwrap(), "1");
        assert_eq!(n.tags().len(), 1);
        assert_eq!(n.get_tag("b").unwrap().as_str().unwrap(), "2");
    }
}
