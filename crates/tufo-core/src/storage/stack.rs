//! # LayerStack
//!
//! An ordered overlay of layers. Reads consult the write layer first, then
//! overlays in mount order, and the first cell found for a key wins (a
//! tombstone wins by hiding the key). Writes only ever touch the write
//! layer.
//!
//! Deletes leave a tombstone only while overlays are mounted; a stack
//! without overlays has nothing to hide, so the key is removed outright.
//!
//! Transactions are owned values: a [`StackReader`] holds one read
//! transaction per layer, a [`StackWriter`] holds the write layer's write
//! transaction plus read transactions on the overlays. Both release their
//! transactions when dropped; an uncommitted writer aborts.

use super::layer::{Cell, Layer, ROWS, table_get, table_scan};
use super::keys::prefix_end;
use crate::StoreError;
use redb::{ReadTransaction, TableError, WriteTransaction};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// A merged, shadow-aware view of rows.
pub trait RowSource {
    /// The live payload stored under `key`, or `None` when the key is absent
    /// or tombstoned.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All live rows with keys in `[lo, hi)` (unbounded when `hi` is
    /// `None`), in key order.
    fn scan(&self, lo: &[u8], hi: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// All live rows whose key starts with `prefix`.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let end = prefix_end(prefix);
        self.scan(prefix, end.as_deref())
    }
}

/// A pending change to the write layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowEdit {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

fn bounds<'a>(lo: &'a [u8], hi: Option<&'a [u8]>) -> (Bound<&'a [u8]>, Bound<&'a [u8]>) {
    (
        Bound::Included(lo),
        hi.map_or(Bound::Unbounded, Bound::Excluded),
    )
}

fn live_rows(merged: BTreeMap<Vec<u8>, Cell>) -> Vec<(Vec<u8>, Vec<u8>)> {
    merged
        .into_iter()
        .filter_map(|(key, cell)| cell.into_live().map(|payload| (key, payload)))
        .collect()
}

/// Point lookup in one read transaction; a layer that never had its table
/// created reads as empty.
fn read_get(txn: &ReadTransaction, key: &[u8]) -> Result<Option<Cell>, StoreError> {
    match txn.open_table(ROWS) {
        Ok(table) => table_get(&table, key),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_scan(
    txn: &ReadTransaction,
    lo: &[u8],
    hi: Option<&[u8]>,
    out: &mut BTreeMap<Vec<u8>, Cell>,
) -> Result<(), StoreError> {
    match txn.open_table(ROWS) {
        Ok(table) => {
            let (lo, hi) = bounds(lo, hi);
            table_scan(&table, lo, hi, out)
        }
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// STACK
// =============================================================================

/// One writable layer over zero or more read-only overlays.
#[derive(Debug)]
pub struct LayerStack {
    write: Layer,
    overlays: Vec<Layer>,
}

impl LayerStack {
    /// Build a stack. The write layer must be writable and layer names must
    /// be unique.
    pub fn new(write: Layer, overlays: Vec<Layer>) -> Result<Self, StoreError> {
        if !write.is_writable() {
            return Err(StoreError::NoSuchLayer(format!(
                "{} cannot be the write layer: it is read-only",
                write.name()
            )));
        }
        let mut names = BTreeSet::new();
        names.insert(write.name().to_string());
        for overlay in &overlays {
            if !names.insert(overlay.name().to_string()) {
                return Err(StoreError::NoSuchLayer(format!(
                    "duplicate layer name {}",
                    overlay.name()
                )));
            }
        }
        Ok(Self { write, overlays })
    }

    /// A stack with only a write layer.
    #[must_use]
    pub fn single(write: Layer) -> Self {
        Self {
            write,
            overlays: Vec::new(),
        }
    }

    #[must_use]
    pub fn write_layer(&self) -> &Layer {
        &self.write
    }

    /// Overlays in mount (read priority) order.
    #[must_use]
    pub fn overlays(&self) -> &[Layer] {
        &self.overlays
    }

    /// Release the stack, keeping only the write layer (e.g. to freeze it
    /// into an overlay for another stack).
    #[must_use]
    pub fn into_write_layer(self) -> Layer {
        self.write
    }

    /// Snapshot every layer for reading.
    pub fn begin_read(&self) -> Result<StackReader, StoreError> {
        let mut txns = Vec::with_capacity(self.overlays.len() + 1);
        txns.push(self.write.begin_read()?);
        for overlay in &self.overlays {
            txns.push(overlay.begin_read()?);
        }
        Ok(StackReader { txns })
    }

    /// Open the single write transaction. Blocks while another writer is
    /// open on the write layer.
    pub fn begin_write(&self) -> Result<StackWriter, StoreError> {
        let txn = self.write.begin_write()?;
        let overlays = self
            .overlays
            .iter()
            .map(Layer::begin_read)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StackWriter { txn, overlays })
    }

    /// Merged point lookup in a fresh read snapshot.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.begin_read()?.get(key)
    }

    /// Merged prefix scan in a fresh read snapshot.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.begin_read()?.scan_prefix(prefix)
    }

    /// Write one live row in its own transaction.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut writer = self.begin_write()?;
        writer.put(key, value)?;
        writer.commit()
    }

    /// Delete one key in its own transaction.
    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut writer = self.begin_write()?;
        writer.delete(key)?;
        writer.commit()
    }
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// Read snapshot across the whole stack, write layer first.
pub struct StackReader {
    txns: Vec<ReadTransaction>,
}

impl RowSource for StackReader {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        for txn in &self.txns {
            if let Some(cell) = read_get(txn, key)? {
                return Ok(cell.into_live());
            }
        }
        Ok(None)
    }

    fn scan(&self, lo: &[u8], hi: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged = BTreeMap::new();
        for txn in &self.txns {
            read_scan(txn, lo, hi, &mut merged)?;
        }
        Ok(live_rows(merged))
    }
}

/// The write transaction of a stack. Reads through it see its own
/// uncommitted writes.
pub struct StackWriter {
    txn: WriteTransaction,
    overlays: Vec<ReadTransaction>,
}

impl StackWriter {
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.apply(&[RowEdit::Put(key.to_vec(), value.to_vec())])
    }

    /// Hide a key: tombstoned over overlays, removed otherwise.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.apply(&[RowEdit::Delete(key.to_vec())])
    }

    /// Apply a planned set of edits to the write layer.
    pub fn apply(&mut self, edits: &[RowEdit]) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(ROWS)?;
        let tomb = Cell::encode_tombstone();
        let shadowing = !self.overlays.is_empty();
        for edit in edits {
            match edit {
                RowEdit::Put(key, value) => {
                    let cell = Cell::encode_live(value);
                    table.insert(key.as_slice(), cell.as_slice())?;
                }
                RowEdit::Delete(key) if shadowing => {
                    table.insert(key.as_slice(), tomb.as_slice())?;
                }
                RowEdit::Delete(key) => {
                    table.remove(key.as_slice())?;
                }
            }
        }
        Ok(())
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.txn.commit()?;
        Ok(())
    }

    /// Discard everything written through this writer.
    pub fn abort(self) -> Result<(), StoreError> {
        self.txn.abort()?;
        Ok(())
    }
}

impl RowSource for StackWriter {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        {
            let table = self.txn.open_table(ROWS)?;
            if let Some(cell) = table_get(&table, key)? {
                return Ok(cell.into_live());
            }
        }
        for txn in &self.overlays {
            if let Some(cell) = read_get(txn, key)? {
                return Ok(cell.into_live());
            }
        }
        Ok(None)
    }

    fn scan(&self, lo: &[u8], hi: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged = BTreeMap::new();
        {
            let table = self.txn.open_table(ROWS)?;
            let (lo, hi) = bounds(lo, hi);
            table_scan(&table, lo, hi, &mut merged)?;
        }
        for txn in &self.overlays {
            read_scan(txn, lo, hi, &mut merged)?;
        }
        Ok(live_rows(merged))
    }
}
