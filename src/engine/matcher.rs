//! Compiled tag matchers (spec §4.5 item 1, §6 matcher grammar).
//!
//! Grounded on `trunk/smrparse.c`'s `parse_matchtype`: a tag value (and,
//! generalized here, a tag key) is optionally wrapped once in `!…!` (invert)
//! or `~…~` (not), then optionally wrapped again in `/…/` (regex), `>N>`
//! (numeric greater-than) or `<N<` (numeric less-than). Anything left over
//! after stripping those wrappers is compared byte-for-byte (`Direct`).
//!
//! Regex compile failure aborts compilation of the owning rule (propagated
//! as `Err` up through [`super::compiled_rules`]); a malformed GT/LT operand
//! logs a warning and falls back to a `Direct` compare of the literal
//! remainder, exactly as `parse_matchtype` leaves `t->type` without the
//! `SPECIAL_GT`/`SPECIAL_LT` bit set rather than failing the whole rule.

use regex::Regex;
use tracing::warn;

use crate::bstring::BString;

#[derive(Debug)]
pub enum MatchKind<'a> {
    Direct(BString<'a>),
    Regex(Box<Regex>),
    GreaterThan(f64),
    LessThan(f64),
}

/// One compiled half (key or value) of a tag matcher.
#[derive(Debug)]
pub struct SubMatcher<'a> {
    pub kind: MatchKind<'a>,
    pub invert: bool,
    pub not: bool,
}

impl<'a> SubMatcher<'a> {
    /// Parses one tag-side pattern (spec §6 value grammar). Only regex
    /// compile failure is fatal to the caller; everything else degrades to
    /// `Direct`.
    pub fn parse(raw: BString<'a>) -> Result<Self, String> {
        let mut invert = false;
        let mut not = false;
        let mut s = raw;

        if s.len() > 2 {
            if s.first() == Some(b'!') && s.last() == Some(b'!') {
                invert = true;
                s = s.strip_brackets();
            } else if s.first() == Some(b'~') && s.last() == Some(b'~') {
                not = true;
                s = s.strip_brackets();
            }
        }

        let kind = if s.len() > 2 && s.first() == Some(b'/') && s.last() == Some(b'/') {
            let inner = s.strip_brackets();
            let pattern = inner.as_str().map_err(|e| format!("regex pattern is not utf-8: {e}"))?;
            let re = Regex::new(pattern).map_err(|e| format!("failed to compile regex '{pattern}': {e}"))?;
            MatchKind::Regex(Box::new(re))
        } else if s.len() > 2 && s.first() == Some(b'>') && s.last() == Some(b'>') {
            let inner = s.strip_brackets();
            match inner.parse_f64() {
                Some(v) => MatchKind::GreaterThan(v),
                None => {
                    warn!(value = %inner, "failed to convert value of GT rule, treating as direct compare");
                    MatchKind::Direct(inner)
                }
            }
        } else if s.len() > 2 && s.first() == Some(b'<') && s.last() == Some(b'<') {
            let inner = s.strip_brackets();
            match inner.parse_f64() {
                Some(v) => MatchKind::LessThan(v),
                None => {
                    warn!(value = %inner, "failed to convert value of LT rule, treating as direct compare");
                    MatchKind::Direct(inner)
                }
            }
        } else {
            MatchKind::Direct(s)
        };

        Ok(SubMatcher { kind, invert, not })
    }

    /// Tests `value` against this sub-matcher, applying `invert` last
    /// (spec §8.5e).
    pub fn test(&self, value: BString<'_>) -> bool {
        let raw = match &self.kind {
            MatchKind::Direct(s) => *s == value,
            MatchKind::Regex(re) => value.as_str().map(|s| re.is_match(s)).unwrap_or(false),
            MatchKind::GreaterThan(t) => value.parse_f64().is_some_and(|v| v > *t),
            MatchKind::LessThan(t) => value.parse_f64().is_some_and(|v| v < *t),
        };
        if self.invert { !raw } else { raw }
    }
}

/// A compiled `{k_match, v_match}` pair (spec §4.5 item 1).
#[derive(Debug)]
pub struct TagMatcher<'a> {
    pub key: SubMatcher<'a>,
    pub value: SubMatcher<'a>,
}

impl<'a> TagMatcher<'a> {
    pub fn parse(key: BString<'a>, value: BString<'a>) -> Result<Self, String> {
        Ok(TagMatcher { key: SubMatcher::parse(key)?, value: SubMatcher::parse(value)? })
    }

    /// Whether this matcher uses `Not` semantics: the rule fires only if
    /// *no* object tag matches the pair (spec §8.5f).
    pub fn is_not(&self) -> bool {
        self.key.not || self.value.not
    }

    fn pair_matches(&self, k: BString<'_>, v: BString<'_>) -> bool {
        self.key.test(k) && self.value.test(v)
    }
}

/// Spec §4.6 step 3: every rule tag matcher must be satisfied against the
/// object's tag set; `Not` matchers invert that per-matcher requirement to
/// "no object tag may match".
pub fn object_matches(matchers: &[TagMatcher<'_>], tags: &[crate::model::Tag<'_>]) -> bool {
    matchers.iter().all(|m| {
        let any_pair_matches = tags.iter().any(|t| m.pair_matches(t.k, t.v));
        if m.is_not() { !any_pair_matches } else { any_pair_matches }
    })
}
