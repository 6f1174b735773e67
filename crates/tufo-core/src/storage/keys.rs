//! Composite row key construction.
//!
//! All keys start with a row family byte (see `primitives`). Variable-length
//! names are NUL-terminated where anything follows them; buids are always
//! the trailing 32 bytes of index keys.

use crate::Buid;
use crate::primitives::{
    BUID_LEN, KEY_SEP, ROW_NODE, ROW_PROP, ROW_PROP_INDEX, ROW_TAG, ROW_TAG_INDEX,
};

/// `0x01 ‖ buid`
pub fn node_key(buid: &Buid) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + BUID_LEN);
    key.push(ROW_NODE);
    key.extend_from_slice(buid.as_bytes());
    key
}

/// `0x02 ‖ buid` — prefix of every prop row of a node.
pub fn prop_prefix(buid: &Buid) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + BUID_LEN);
    key.push(ROW_PROP);
    key.extend_from_slice(buid.as_bytes());
    key
}

/// `0x02 ‖ buid ‖ prop`
pub fn prop_key(buid: &Buid, prop: &str) -> Vec<u8> {
    let mut key = prop_prefix(buid);
    key.extend_from_slice(prop.as_bytes());
    key
}

/// `0x03 ‖ buid` — prefix of every tag row of a node.
pub fn tag_prefix(buid: &Buid) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + BUID_LEN);
    key.push(ROW_TAG);
    key.extend_from_slice(buid.as_bytes());
    key
}

/// `0x03 ‖ buid ‖ tag`
pub fn tag_key(buid: &Buid, tag: &str) -> Vec<u8> {
    let mut key = tag_prefix(buid);
    key.extend_from_slice(tag.as_bytes());
    key
}

/// The name stored after the `family ‖ buid` head of a prop or tag row.
pub fn row_name(key: &[u8]) -> Option<&str> {
    key.get(1 + BUID_LEN..)
        .and_then(|tail| std::str::from_utf8(tail).ok())
}

/// `0x10 ‖ name ‖ 0x00` — every index row filed under `name`.
pub fn prop_index_prefix(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 2);
    key.push(ROW_PROP_INDEX);
    key.extend_from_slice(name.as_bytes());
    key.push(KEY_SEP);
    key
}

/// `0x10 ‖ name ‖ 0x00 ‖ indx` — index rows for one value (or, for variable
/// width encodings, every value starting with `indx`).
pub fn prop_index_value_prefix(name: &str, indx: &[u8]) -> Vec<u8> {
    let mut key = prop_index_prefix(name);
    key.extend_from_slice(indx);
    key
}

/// `0x10 ‖ name ‖ 0x00 ‖ indx ‖ buid`
pub fn prop_index_key(name: &str, indx: &[u8], buid: &Buid) -> Vec<u8> {
    let mut key = prop_index_value_prefix(name, indx);
    key.extend_from_slice(buid.as_bytes());
    key
}

/// `0x11 ‖ tag ‖ 0x00` or, with a form, `0x11 ‖ tag ‖ 0x00 ‖ form ‖ 0x00`.
pub fn tag_index_prefix(tag: &str, form: Option<&str>) -> Vec<u8> {
    let mut key = Vec::with_capacity(tag.len() + form.map_or(0, str::len) + 3);
    key.push(ROW_TAG_INDEX);
    key.extend_from_slice(tag.as_bytes());
    key.push(KEY_SEP);
    if let Some(form) = form {
        key.extend_from_slice(form.as_bytes());
        key.push(KEY_SEP);
    }
    key
}

/// `0x11 ‖ tag ‖ 0x00 ‖ form ‖ 0x00 ‖ buid`
pub fn tag_index_key(tag: &str, form: &str, buid: &Buid) -> Vec<u8> {
    let mut key = tag_index_prefix(tag, Some(form));
    key.extend_from_slice(buid.as_bytes());
    key
}

/// Smallest key greater than every key starting with `prefix`, or `None`
/// when the prefix is all `0xff` bytes (scan to the end).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last != u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_increments_last_byte() {
        assert_eq!(prefix_end(&[1, 2, 3]), Some(vec![1, 2, 4]));
        assert_eq!(prefix_end(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
    }

    #[test]
    fn index_keys_end_with_buid() {
        let buid = Buid::from_parts("widget", b"x");
        let key = prop_index_key("widget:intprop", &[0, 1], &buid);
        assert_eq!(Buid::from_key_suffix(&key), Some(buid));
        assert!(key.starts_with(&prop_index_prefix("widget:intprop")));

        let tkey = tag_index_key("test.baz", "widget", &buid);
        assert!(tkey.starts_with(&tag_index_prefix("test.baz", None)));
        assert!(tkey.starts_with(&tag_index_prefix("test.baz", Some("widget"))));
        assert_eq!(Buid::from_key_suffix(&tkey), Some(buid));
    }

    #[test]
    fn parent_tag_prefix_does_not_match_child() {
        let buid = Buid::from_parts("widget", b"x");
        let child = tag_index_key("test.baz", "widget", &buid);
        assert!(!child.starts_with(&tag_index_prefix("test", None)));
    }

    #[test]
    fn row_name_reads_tail() {
        let buid = Buid::from_parts("widget", b"x");
        assert_eq!(row_name(&prop_key(&buid, "intprop")), Some("intprop"));
        assert_eq!(row_name(&tag_key(&buid, "test.baz")), Some("test.baz"));
    }
}
