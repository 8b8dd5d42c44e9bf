//! Rule compiler (spec §4.5).
//!
//! Each object in the rules trie becomes one [`CompiledRule`]: its `_action_`
//! tag is parsed into an action lookup plus a parameter dictionary, and every
//! other tag becomes a [`TagMatcher`]. Grounded on `trunk/smrules.c`'s
//! `compile_rule` (tag-list walk pulling `_action_` out by linear scan, then
//! handing the remainder to `parse_matchtype` per tag) but with the action
//! resolved against [`super::action::REGISTRY`] instead of `dlsym`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use tracing::warn;

use crate::engine::action::{self, ActionDef, WayType};
use crate::engine::matcher::TagMatcher;
use crate::model::{ObjType, OsmObj, Tag};
use crate::trie::BxTrie;

pub type RuleId = usize;

const ACTION_TAG_KEY: &str = "_action_";
const WAY_TYPE_PARAM: &str = "way_type";

/// One compiled rule: a matcher list plus the action it dispatches to, ready
/// for [`super::dispatch::execute_rule`].
pub struct CompiledRule<'a> {
    pub id: RuleId,
    /// Id of the rule-object this was compiled from, kept for diagnostics
    /// and for the `smrender:rules` tag the dispatcher appends on a hit.
    pub source_id: i64,
    pub otype: ObjType,
    pub version: i32,
    pub matchers: Vec<TagMatcher<'a>>,
    pub action: &'static ActionDef,
    pub params: HashMap<String, String>,
    pub way_type: WayType,
    pub threadable: bool,
    /// Slot an action's `ini` may populate and its `fini` may consume
    /// (spec §6 "a user-data pointer the action may set in ini and free in
    /// fini"). `Mutex` rather than `RefCell` since fini is called from
    /// whichever thread drains the fini queue.
    pub user_data: Mutex<Option<Box<dyn Any + Send>>>,
    /// Set once this rule's `fini` has run, so a later pass over the same
    /// rule (it is still present in the rules trie) is skipped (spec §4.6
    /// step 1).
    pub finished: AtomicBool,
}

impl<'a> CompiledRule<'a> {
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Splits an `_action_` tag value into `(name, params)` per the grammar in
/// spec §4.5 item 4 / §6: `name ("@" library ("?" params)?)?`. The library
/// segment is recognized but otherwise discarded (see `engine::action`
/// docs). The canonical param/arg tail separator is `:` (`trunk/smrparse.c`
/// tokenizes the whole value on `:` via `strtok`); `?` is accepted as an
/// equivalent separator since spec §6's grammar and the end-to-end
/// scenarios (S2 `tag:mark=yes`, the library form's `?key=value;...`) both
/// appear in the corpus. Whichever of `@`, `:`, `?` appears first in the
/// raw value ends the name; if it's `@`, the following library token is
/// itself terminated by the first `:` or `?` after it, and anything past
/// that is the param tail.
fn parse_action_value(raw: &str) -> (&str, HashMap<String, String>) {
    let Some(idx) = raw.find(['@', ':', '?']) else {
        return (raw, HashMap::new());
    };
    let name = &raw[..idx];
    let rest = &raw[idx + 1..];
    let params_str = if raw.as_bytes()[idx] == b'@' {
        match rest.find([':', '?']) {
            Some(lib_end) => &rest[lib_end + 1..],
            None => "",
        }
    } else {
        rest
    };
    (name, parse_params(params_str))
}

fn parse_params(params_str: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in params_str.split(';') {
        if pair.is_empty() {
            continue;
        }
        if let Some((k, v)) = pair.split_once('=') {
            params.insert(k.to_string(), v.to_string());
        }
    }
    params
}

fn way_type_for(action: &'static ActionDef, params: &HashMap<String, String>) -> WayType {
    match params.get(WAY_TYPE_PARAM).map(String::as_str) {
        Some("closed") => WayType::ClosedWay,
        Some("open") => WayType::OpenWay,
        Some("any") => WayType::Any,
        _ => action.default_way_type,
    }
}

/// Compiles one rule-object, failing with a human-readable message on an
/// unknown action name or an unparseable matcher (regex compile failure).
pub fn compile_one<'a>(
    id: RuleId,
    otype: ObjType,
    obj: &OsmObj<'a>,
) -> Result<CompiledRule<'a>, String> {
    let action_tag = obj
        .tags()
        .iter()
        .find(|t| t.k.as_str() == Ok(ACTION_TAG_KEY))
        .ok_or_else(|| format!("object {} has no {} tag", obj.id(), ACTION_TAG_KEY))?;
    let action_value = action_tag
        .v
        .as_str()
        .map_err(|e| format!("_action_ value is not utf-8: {e}"))?
        .to_string();
    let (name, params) = parse_action_value(&action_value);
    let action = action::lookup(name).ok_or_else(|| format!("unknown action '{name}'"))?;

    let remaining: Vec<Tag<'a>> =
        obj.tags().iter().filter(|t| t.k.as_str() != Ok(ACTION_TAG_KEY)).copied().collect();
    let mut matchers = Vec::with_capacity(remaining.len());
    for tag in &remaining {
        matchers.push(TagMatcher::parse(tag.k, tag.v)?);
    }

    let way_type = way_type_for(action, &params);

    Ok(CompiledRule {
        id,
        source_id: obj.id(),
        otype,
        version: obj.header().version,
        matchers,
        action,
        params,
        way_type,
        threadable: action.threadable,
        user_data: Mutex::new(None),
        finished: AtomicBool::new(false),
    })
}

/// Compiles every object in `rules` into a [`CompiledRule`], logging and
/// skipping objects that fail to compile rather than aborting the run (spec
/// §4.5 "Unknown action names ... abort rule compilation for that object").
/// Returns the compiled rules alongside a count of objects that failed to
/// compile, for the caller's run metrics.
pub fn compile_rules<'a>(rules: &BxTrie<OsmObj<'a>>) -> (Vec<CompiledRule<'a>>, u32) {
    let mut raw = Vec::new();
    rules.traverse(|_id, otype, obj| raw.push((otype, obj.clone())));

    let mut compiled = Vec::with_capacity(raw.len());
    let mut skipped = 0u32;
    for (otype, obj) in &raw {
        let next_id = compiled.len();
        match compile_one(next_id, *otype, obj) {
            Ok(rule) => compiled.push(rule),
            Err(msg) => {
                warn!(object_id = obj.id(), error = %msg, "rule compilation failed, skipping");
                skipped += 1;
            }
        }
    }
    (compiled, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bstring::BString;
    use crate::model::{NodeObj, ObjHeader};

    fn rule_object(tags: Vec<(&str, &str)>) -> OsmObj<'static> {
        OsmObj::Node(NodeObj {
            header: ObjHeader::new(ObjType::Node, 1),
            tags: tags.into_iter().map(|(k, v)| Tag::new(BString::from(k), BString::from(v))).collect(),
            lat: 0.0,
            lon: 0.0,
        })
    }

    #[test]
    fn compiles_a_simple_tag_action_rule() {
        let obj = rule_object(vec![("amenity", "cafe"), ("_action_", "tag?mark=yes")]);
        let rule = compile_one(0, ObjType::Node, &obj).unwrap();
        assert_eq!(rule.action.name, "tag");
        assert_eq!(rule.get_param("mark"), Some("yes"));
        assert_eq!(rule.matchers.len(), 1);
    }

    #[test]
    fn parses_library_and_params_tail() {
        let (name, params) = parse_action_value("tag@libfoo?key=value;mark=yes");
        assert_eq!(name, "tag");
        assert_eq!(params.get("key").map(String::as_str), Some("value"));
        assert_eq!(params.get("mark").map(String::as_str), Some("yes"));
    }

    #[test]
    fn bare_action_name_has_no_params() {
        let (name, params) = parse_action_value("delete");
        assert_eq!(name, "delete");
        assert!(params.is_empty());
    }

    #[test]
    fn colon_separates_name_from_params_without_a_library() {
        let (name, params) = parse_action_value("tag:mark=yes");
        assert_eq!(name, "tag");
        assert_eq!(params.get("mark").map(String::as_str), Some("yes"));
    }

    #[test]
    fn question_mark_separates_name_from_params_without_a_library() {
        let (name, params) = parse_action_value("append_tag?key=trace;value=A");
        assert_eq!(name, "append_tag");
        assert_eq!(params.get("key").map(String::as_str), Some("trace"));
        assert_eq!(params.get("value").map(String::as_str), Some("A"));
    }

    #[test]
    fn missing_action_tag_is_a_compile_error() {
        let obj = rule_object(vec![("amenity", "cafe")]);
        assert!(compile_one(0, ObjType::Node, &obj).is_err());
    }

    #[test]
    fn unknown_action_name_is_a_compile_error() {
        let obj = rule_object(vec![("_action_", "not_a_real_action")]);
        assert!(compile_one(0, ObjType::Node, &obj).is_err());
    }

    #[test]
    fn invalid_regex_matcher_is_a_compile_error() {
        let obj = rule_object(vec![("name", "/(/"), ("_action_", "tag")]);
        assert!(compile_one(0, ObjType::Node, &obj).is_err());
    }

    #[test]
    fn action_tag_itself_is_excluded_from_matchers() {
        let obj = rule_object(vec![("amenity", "cafe"), ("_action_", "tag")]);
        let rule = compile_one(0, ObjType::Node, &obj).unwrap();
        assert_eq!(rule.matchers.len(), 1);
    }

    #[test]
    fn compile_rules_skips_bad_rules_and_keeps_good_ones() {
        let mut trie = BxTrie::new();
        trie.insert(1, ObjType::Node, rule_object(vec![("_action_", "tag")]));
        trie.insert(2, ObjType::Node, rule_object(vec![("_action_", "nonexistent")]));
        let (rules, skipped) = compile_rules(&trie);
        assert_eq!(rules.len(), 1);
        assert_eq!(skipped, 1);
    }
}
