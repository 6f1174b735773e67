//! # Node Representation
//!
//! The in-memory view of one graph vertex (a "tufo"): identity, property bag
//! and tag set, plus the packed boundary form and the change records
//! (splices) produced by mutations.
//!
//! A `Node` is a snapshot. It is refreshed by the `Snap` operation that
//! mutates it; it never talks to storage itself.

use crate::primitives::MAX_TAG_LENGTH;
use crate::{Buid, StoreError, Valu};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// TAG INTERVAL
// =============================================================================

/// A tag validity interval in epoch milliseconds, `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ival {
    min: i64,
    max: i64,
}

impl Ival {
    /// Build an interval, rejecting `min > max`.
    pub fn new(min: i64, max: i64) -> Result<Self, StoreError> {
        if min > max {
            return Err(StoreError::bad_valu(
                "ival",
                format!("interval minimum {} is after maximum {}", min, max),
            ));
        }
        Ok(Self { min, max })
    }

    /// Lower bound, inclusive.
    #[must_use]
    pub const fn lo(&self) -> i64 {
        self.min
    }

    /// Upper bound, inclusive.
    #[must_use]
    pub const fn hi(&self) -> i64 {
        self.max
    }

    /// The smallest interval covering both.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Merge two optional intervals; presence-only on both sides stays
    /// presence-only.
    #[must_use]
    pub fn merge_opt(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (Some(x), None) | (None, Some(x)) => Some(x),
            (None, None) => None,
        }
    }
}

// =============================================================================
// NODE
// =============================================================================

/// One graph vertex.
///
/// `props` is keyed by the relative property name (`intprop`, `.created`);
/// absent properties are simply not present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    buid: Buid,
    form: String,
    valu: Valu,
    props: BTreeMap<String, Valu>,
    tags: BTreeMap<String, Option<Ival>>,
}

impl Node {
    /// Create a node with an empty property bag and tag set.
    #[must_use]
    pub fn new(buid: Buid, form: impl Into<String>, valu: Valu) -> Self {
        Self {
            buid,
            form: form.into(),
            valu,
            props: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn buid(&self) -> Buid {
        self.buid
    }

    #[must_use]
    pub fn form(&self) -> &str {
        &self.form
    }

    /// The normalized primary value.
    #[must_use]
    pub fn valu(&self) -> &Valu {
        &self.valu
    }

    /// The node identity `(form, valu)`.
    #[must_use]
    pub fn ndef(&self) -> (&str, &Valu) {
        (&self.form, &self.valu)
    }

    /// Get a property value by relative name.
    #[must_use]
    pub fn get(&self, prop: &str) -> Option<&Valu> {
        self.props.get(prop)
    }

    #[must_use]
    pub fn props(&self) -> &BTreeMap<String, Valu> {
        &self.props
    }

    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, Option<Ival>> {
        &self.tags
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// The interval of a tag: `None` if absent, `Some(None)` if the tag is
    /// presence-only.
    #[must_use]
    pub fn tag(&self, tag: &str) -> Option<Option<Ival>> {
        self.tags.get(tag).copied()
    }

    pub(crate) fn set_prop(&mut self, prop: &str, valu: Valu) {
        self.props.insert(prop.to_string(), valu);
    }

    pub(crate) fn remove_prop(&mut self, prop: &str) {
        self.props.remove(prop);
    }

    pub(crate) fn set_tag(&mut self, tag: &str, ival: Option<Ival>) {
        self.tags.insert(tag.to_string(), ival);
    }

    pub(crate) fn remove_tag(&mut self, tag: &str) {
        self.tags.remove(tag);
    }

    /// Serialize to the `(ndef, properties)` boundary form with dotted
    /// `form:prop` names.
    #[must_use]
    pub fn pack(&self) -> PackedNode {
        let props = self
            .props
            .iter()
            .map(|(name, valu)| (full_prop_name(&self.form, name), valu.to_json()))
            .collect();
        let tags = self
            .tags
            .iter()
            .map(|(tag, ival)| (tag.clone(), ival.map(|i| (i.min, i.max))))
            .collect();
        PackedNode {
            ndef: (self.form.clone(), self.valu.to_json()),
            props,
            tags,
        }
    }
}

/// Full property name: `form:prop`, or `form.univ` for universal props.
#[must_use]
pub fn full_prop_name(form: &str, prop: &str) -> String {
    if prop.starts_with('.') {
        format!("{}{}", form, prop)
    } else {
        format!("{}:{}", form, prop)
    }
}

/// The serialized node handed to collaborators (RPC, HTTP, CLI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedNode {
    pub ndef: (String, serde_json::Value),
    pub props: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Option<(i64, i64)>>,
}

// =============================================================================
// TAG NAMES
// =============================================================================

/// Normalize a tag name: trimmed, lower case, without a leading `#`, made
/// of non-empty dot-separated segments.
pub fn norm_tag(raw: &str) -> Result<String, StoreError> {
    let text = raw.trim();
    let tag = text.strip_prefix('#').unwrap_or(text).to_lowercase();
    if tag.is_empty() || tag.len() > MAX_TAG_LENGTH {
        return Err(StoreError::bad_valu(
            "tag",
            format!("tag length must be 1..={}", MAX_TAG_LENGTH),
        ));
    }
    if tag.split('.').any(|seg| seg.is_empty() || seg.contains(char::is_whitespace)) {
        return Err(StoreError::bad_valu("tag", format!("invalid tag {:?}", raw)));
    }
    if tag.contains('\0') {
        return Err(StoreError::bad_valu("tag", "tag contains NUL"));
    }
    Ok(tag)
}

/// A normalized tag and every ancestor, root first: `a`, `a.b`, `a.b.c`.
pub fn tag_lineage(tag: &str) -> Vec<&str> {
    tag.match_indices('.')
        .map(|(i, _)| &tag[..i])
        .chain(std::iter::once(tag))
        .collect()
}

/// Whether `tag` is `root` or one of its descendants.
#[must_use]
pub fn tag_within(tag: &str, root: &str) -> bool {
    tag.strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

// =============================================================================
// SPLICES
// =============================================================================

/// A committed change to the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "splice", rename_all = "snake_case")]
pub enum Splice {
    NodeAdd {
        form: String,
        valu: Valu,
    },
    NodeDel {
        form: String,
        valu: Valu,
    },
    PropSet {
        form: String,
        valu: Valu,
        prop: String,
        new: Valu,
        old: Option<Valu>,
    },
    PropDel {
        form: String,
        valu: Valu,
        prop: String,
        old: Valu,
    },
    TagAdd {
        form: String,
        valu: Valu,
        tag: String,
        ival: Option<Ival>,
    },
    TagDel {
        form: String,
        valu: Valu,
        tag: String,
    },
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ival_rejects_inverted_bounds() {
        assert!(Ival::new(10, 5).is_err());
        assert!(Ival::new(5, 5).is_ok());
    }

    #[test]
    fn ival_merge_widens() {
        let a = Ival::new(10, 20).expect("a");
        let b = Ival::new(5, 15).expect("b");
        let m = a.merge(b);
        assert_eq!((m.lo(), m.hi()), (5, 20));
        assert_eq!(Ival::merge_opt(None, Some(a)), Some(a));
        assert_eq!(Ival::merge_opt(None, None), None);
    }

    #[test]
    fn pack_uses_dotted_names() {
        let buid = Buid::from_parts("widget", b"x");
        let mut node = Node::new(buid, "widget", Valu::from("x"));
        node.set_prop("intprop", Valu::Int(20));
        node.set_prop(".created", Valu::Int(0));
        node.set_tag("test.baz", None);

        let packed = node.pack();
        assert_eq!(packed.ndef.0, "widget");
        assert_eq!(packed.props.get("widget:intprop"), Some(&serde_json::json!(20)));
        assert!(packed.props.contains_key("widget.created"));
        assert_eq!(packed.tags.get("test.baz"), Some(&None));
    }

    #[test]
    fn node_mutators() {
        let buid = Buid::from_parts("widget", b"x");
        let mut node = Node::new(buid, "widget", Valu::from("x"));
        node.set_prop("strprop", Valu::from("asdf"));
        assert_eq!(node.get("strprop"), Some(&Valu::from("asdf")));
        node.remove_prop("strprop");
        assert!(node.get("strprop").is_none());

        node.set_tag("foo", Ival::new(1, 2).ok());
        assert!(node.has_tag("foo"));
        node.remove_tag("foo");
        assert_eq!(node.tag("foo"), None);
    }

    #[test]
    fn tag_names_normalize() {
        assert_eq!(norm_tag("#Test.Baz").expect("tag"), "test.baz");
        assert!(norm_tag("test..baz").is_err());
        assert!(norm_tag(".test").is_err());
        assert!(norm_tag("").is_err());
        assert!(norm_tag("has space").is_err());
    }

    #[test]
    fn lineage_and_descendants() {
        assert_eq!(tag_lineage("a.b.c"), vec!["a", "a.b", "a.b.c"]);
        assert_eq!(tag_lineage("a"), vec!["a"]);
        assert!(tag_within("a.b", "a"));
        assert!(tag_within("a", "a"));
        assert!(!tag_within("ab", "a"));
    }

    #[test]
    fn splice_serializes_with_tag() {
        let splice = Splice::NodeAdd {
            form: "teststr".into(),
            valu: Valu::from("hehe"),
        };
        let json = serde_json::to_value(&splice).expect("json");
        assert_eq!(json["splice"], "node_add");
    }
}
