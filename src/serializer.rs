//! OSM/XML output serialization.
//!
//! Uses `quick-xml` for escaping and element framing the way
//! `culebron-box_dyn_fn_question`'s `OsmElementAttrs::push_to` assembles an
//! element's attribute list before writing it, but for the opposite
//! direction (its `OsmXmlReader` only reads; this only writes). Synthetic
//! ids (spec §3, always negative) need no special casing on the way out —
//! OSM XML already uses negative ids for not-yet-assigned objects in
//! changeset uploads, so a synthetic id serializes exactly like any other.

use std::io::{self, Write};

use chrono::{TimeZone, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::model::{Member, ObjHeader, OsmObj, Tag};

/// Formats a Unix timestamp as the `YYYY-MM-DDTHH:MM:SSZ` form OSM/XML
/// expects, the inverse of `loader::parse_timestamp`.
fn format_timestamp(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}

/// Synthetic ids are negative 64-bit counters (`id_alloc::IdAllocator`);
/// rewriting masks their magnitude down to the 40-bit id width OSM's PBF
/// format uses, which is generous enough that a single smrender run never
/// wraps it while keeping the output parseable by tools that choke on
/// negative ids (spec §4.8 "may optionally be rewritten ... by masking
/// against the per-type id bit-width").
const SYNTHETIC_ID_MASK: i64 = 0xFF_FFFF_FFFF;

fn rewrite_synthetic_id(id: i64) -> i64 {
    if id < 0 {
        (-id) & SYNTHETIC_ID_MASK
    } else {
        id
    }
}

/// Knobs for [`write_osm`] beyond the object stream itself (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct SerializeOptions {
    /// Emits a `<bounds>` element right after the root's opening tag.
    pub bounds: Option<(f64, f64, f64, f64)>,
    /// Emits an informational XML comment after `<bounds>` (or after the
    /// root tag if there is none).
    pub comment: Option<String>,
    /// Masks negative (synthetic) ids into a positive range on the way out.
    pub rewrite_synthetic_ids: bool,
}

/// Wraps a `Write` to count bytes passed through, so callers get back the
/// byte count the spec's writer operations report.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn push_header_attrs(elem: &mut BytesStart<'_>, header: &ObjHeader, options: &SerializeOptions) {
    let id = if options.rewrite_synthetic_ids { rewrite_synthetic_id(header.id) } else { header.id };
    elem.push_attribute(("id", id.to_string().as_str()));
    if !header.visible {
        elem.push_attribute(("visible", "false"));
    }
    elem.push_attribute(("version", header.version.to_string().as_str()));
    elem.push_attribute(("changeset", header.changeset.to_string().as_str()));
    elem.push_attribute(("uid", header.uid.to_string().as_str()));
    elem.push_attribute(("timestamp", format_timestamp(header.timestamp).as_str()));
}

fn write_tags<W: Write>(w: &mut Writer<W>, tags: &[Tag<'_>]) -> io::Result<()> {
    for tag in tags {
        let mut elem = BytesStart::new("tag");
        elem.push_attribute(("k", tag.k.to_string_lossy().as_ref()));
        elem.push_attribute(("v", tag.v.to_string_lossy().as_ref()));
        w.write_event(Event::Empty(elem)).map_err(to_io_err)?;
    }
    Ok(())
}

fn to_io_err(e: quick_xml::Error) -> io::Error {
    io::Error::other(e)
}

/// Writes a full OSM/XML document containing `objects` in iteration order
/// and returns the number of bytes written. Equivalent to
/// `write_osm_with_options(sink, objects, &SerializeOptions::default())`.
pub fn write_osm<'a, W: Write, I: IntoIterator<Item = &'a OsmObj<'a>>>(
    sink: W,
    objects: I,
) -> io::Result<u64> {
    write_osm_with_options(sink, objects, &SerializeOptions::default())
}

/// Writes a full OSM/XML document, optionally preceded by a `<bounds>`
/// element and an informational comment, with ids masked per
/// `options.rewrite_synthetic_ids` (spec §4.8).
pub fn write_osm_with_options<'a, W: Write, I: IntoIterator<Item = &'a OsmObj<'a>>>(
    sink: W,
    objects: I,
    options: &SerializeOptions,
) -> io::Result<u64> {
    let counting = CountingWriter { inner: sink, count: 0 };
    let mut w = Writer::new(counting);

    let mut root = BytesStart::new("osm");
    root.push_attribute(("version", "0.6"));
    root.push_attribute(("generator", "smcore"));
    w.write_event(Event::Start(root)).map_err(to_io_err)?;

    if let Some((minlat, minlon, maxlat, maxlon)) = options.bounds {
        let mut bounds = BytesStart::new("bounds");
        bounds.push_attribute(("minlat", minlat.to_string().as_str()));
        bounds.push_attribute(("minlon", minlon.to_string().as_str()));
        bounds.push_attribute(("maxlat", maxlat.to_string().as_str()));
        bounds.push_attribute(("maxlon", maxlon.to_string().as_str()));
        w.write_event(Event::Empty(bounds)).map_err(to_io_err)?;
    }

    if let Some(comment) = &options.comment {
        w.write_event(Event::Comment(BytesText::new(&format!(" {comment} ")))).map_err(to_io_err)?;
    }

    for obj in objects {
        match obj {
            OsmObj::Node(n) => {
                let mut elem = BytesStart::new("node");
                push_header_attrs(&mut elem, &n.header, options);
                elem.push_attribute(("lat", n.lat.to_string().as_str()));
                elem.push_attribute(("lon", n.lon.to_string().as_str()));
                if n.tags.is_empty() {
                    w.write_event(Event::Empty(elem)).map_err(to_io_err)?;
                } else {
                    w.write_event(Event::Start(elem)).map_err(to_io_err)?;
                    write_tags(&mut w, &n.tags)?;
                    w.write_event(Event::End(BytesEnd::new("node"))).map_err(to_io_err)?;
                }
            }
            OsmObj::Way(way) => {
                let mut elem = BytesStart::new("way");
                push_header_attrs(&mut elem, &way.header, options);
                w.write_event(Event::Start(elem)).map_err(to_io_err)?;
                for &nd in &way.refs {
                    let mut nd_elem = BytesStart::new("nd");
                    nd_elem.push_attribute(("ref", nd.to_string().as_str()));
                    w.write_event(Event::Empty(nd_elem)).map_err(to_io_err)?;
                }
                write_tags(&mut w, &way.tags)?;
                w.write_event(Event::End(BytesEnd::new("way"))).map_err(to_io_err)?;
            }
            OsmObj::Relation(rel) => {
                let mut elem = BytesStart::new("relation");
                push_header_attrs(&mut elem, &rel.header, options);
                w.write_event(Event::Start(elem)).map_err(to_io_err)?;
                for member in &rel.members {
                    write_member(&mut w, member)?;
                }
                write_tags(&mut w, &rel.tags)?;
                w.write_event(Event::End(BytesEnd::new("relation"))).map_err(to_io_err)?;
            }
        }
    }

    w.write_event(Event::End(BytesEnd::new("osm"))).map_err(to_io_err)?;
    // A trailing newline matches what most OSM tooling emits; harmless either way.
    w.write_event(Event::Text(BytesText::new("\n"))).map_err(to_io_err)?;

    Ok(w.into_inner().count)
}

fn write_member<W: Write>(w: &mut Writer<W>, member: &Member) -> io::Result<()> {
    let mut elem = BytesStart::new("member");
    elem.push_attribute(("type", member.mtype.as_str()));
    elem.push_attribute(("ref", member.id.to_string().as_str()));
    elem.push_attribute(("role", role_str(member.role)));
    w.write_event(Event::Empty(elem)).map_err(to_io_err)
}

fn role_str(role: crate::model::Role) -> &'static str {
    use crate::model::Role;
    match role {
        Role::Empty => "",
        Role::Inner => "inner",
        Role::Outer => "outer",
        Role::To => "to",
        Role::From => "from",
        Role::Via => "via",
        Role::Link => "link",
        Role::Forward => "forward",
        Role::Backward => "backward",
        Role::Stop => "stop",
        Role::Label => "label",
        Role::AdminCentre => "admin_centre",
        Role::Other => "other",
    }
}
