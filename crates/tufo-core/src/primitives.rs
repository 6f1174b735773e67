//! # Storage Primitives
//!
//! Hardcoded constants for the row layout of a tufo layer.
//!
//! Every layer is a single ordered byte-keyed table. The first key byte
//! selects the row family; the remaining bytes are built by `storage::keys`.
//!
//! ## Row families
//!
//! 1. **Node rows**: one per node, keyed by buid.
//! 2. **Prop rows**: one per (node, property).
//! 3. **Tag rows**: one per (node, tag).
//! 4. **Prop index rows**: `full-prop ‖ 0x00 ‖ index bytes ‖ buid`.
//! 5. **Tag index rows**: `tag ‖ 0x00 ‖ form ‖ 0x00 ‖ buid`.

/// Length of a node buid (BLAKE3 digest of the canonical ndef).
pub const BUID_LEN: usize = 32;

/// Node primary rows: `0x01 ‖ buid -> (form, valu)`.
pub const ROW_NODE: u8 = 0x01;

/// Property rows: `0x02 ‖ buid ‖ prop -> valu`.
pub const ROW_PROP: u8 = 0x02;

/// Tag rows: `0x03 ‖ buid ‖ tag -> interval`.
pub const ROW_TAG: u8 = 0x03;

/// Property index rows (primary values are indexed under the form name).
pub const ROW_PROP_INDEX: u8 = 0x10;

/// Tag index rows.
pub const ROW_TAG_INDEX: u8 = 0x11;

/// Separator between variable-length name segments inside a key.
///
/// Form, property and tag names never contain a NUL byte.
pub const KEY_SEP: u8 = 0x00;

/// Cell marker for a live value. The payload follows the marker byte.
pub const CELL_LIVE: u8 = 0x01;

/// Cell marker for a tombstone written by a delete in the write layer.
///
/// A tombstone shadows every lower layer for the same key, so a deleted
/// key never falls through to an overlay.
pub const CELL_TOMBSTONE: u8 = 0x00;

/// Default number of feed items committed per write transaction.
pub const DEFAULT_FEED_BATCH_SIZE: usize = 1000;

/// Name of the universal creation-time property carried by every form.
pub const UNIV_CREATED: &str = ".created";

/// Name given to the write layer when the configuration leaves it unnamed.
pub const DEFAULT_LAYER_NAME: &str = "default";

/// Maximum length for a tag name (all segments and dots included).
pub const MAX_TAG_LENGTH: usize = 256;
