//! # redb-backed Layer
//!
//! One storage generation: a single ordered byte-keyed redb table holding
//! node rows, prop rows, tag rows and index rows.
//!
//! redb provides:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Every stored value is a *cell*: a marker byte followed by the payload.
//! `CELL_LIVE` marks a present value, `CELL_TOMBSTONE` marks a key deleted in
//! this layer. Tombstones are what keep a deleted key from falling through
//! to a lower overlay.

use crate::StoreError;
use crate::primitives::{CELL_LIVE, CELL_TOMBSTONE};
use redb::backends::InMemoryBackend;
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, TableError, WriteTransaction,
};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ops::Bound;
use std::path::{Path, PathBuf};

/// Table for all rows: key bytes -> cell bytes.
pub(crate) const ROWS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("rows");

// =============================================================================
// CELLS
// =============================================================================

/// A decoded cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Cell {
    Live(Vec<u8>),
    Tombstone,
}

impl Cell {
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        match bytes.split_first() {
            Some((&CELL_LIVE, payload)) => Ok(Self::Live(payload.to_vec())),
            Some((&CELL_TOMBSTONE, [])) => Ok(Self::Tombstone),
            _ => Err(StoreError::Serialization(format!(
                "bad cell marker in {} byte value",
                bytes.len()
            ))),
        }
    }

    pub(crate) fn encode_live(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 1);
        out.push(CELL_LIVE);
        out.extend_from_slice(payload);
        out
    }

    pub(crate) fn encode_tombstone() -> [u8; 1] {
        [CELL_TOMBSTONE]
    }

    pub(crate) fn into_live(self) -> Option<Vec<u8>> {
        match self {
            Self::Live(payload) => Some(payload),
            Self::Tombstone => None,
        }
    }
}

/// Point lookup of one cell in a table.
pub(crate) fn table_get<T>(table: &T, key: &[u8]) -> Result<Option<Cell>, StoreError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(key)? {
        Some(guard) => Cell::decode(guard.value()).map(Some),
        None => Ok(None),
    }
}

/// Scan a key range of one table into `out`. Keys already in `out` came
/// from a higher-priority layer and are left alone.
pub(crate) fn table_scan<T>(
    table: &T,
    lo: Bound<&[u8]>,
    hi: Bound<&[u8]>,
    out: &mut BTreeMap<Vec<u8>, Cell>,
) -> Result<(), StoreError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    for entry in table.range::<&[u8]>((lo, hi))? {
        let (key, value) = entry?;
        if let Entry::Vacant(slot) = out.entry(key.value().to_vec()) {
            slot.insert(Cell::decode(value.value())?);
        }
    }
    Ok(())
}

// =============================================================================
// LAYER
// =============================================================================

/// One storage partition of a layer stack.
pub struct Layer {
    name: String,
    db: Database,
    path: Option<PathBuf>,
    writable: bool,
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

impl Layer {
    /// Open or create a writable layer at the given path.
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path)?;
        let layer = Self {
            name: name.into(),
            db,
            path: Some(path),
            writable: true,
        };
        layer.init_tables()?;
        tracing::info!("Opened write layer '{}' at {:?}", layer.name, layer.path);
        Ok(layer)
    }

    /// Create a writable, volatile layer.
    pub fn in_memory(name: impl Into<String>) -> Result<Self, StoreError> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        let layer = Self {
            name: name.into(),
            db,
            path: None,
            writable: true,
        };
        layer.init_tables()?;
        Ok(layer)
    }

    /// Open an existing layer file as a read-only overlay.
    ///
    /// Fails with `NoSuchLayer` when the file does not exist.
    pub fn open_overlay(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let name = name.into();
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(StoreError::NoSuchLayer(format!(
                "{} (missing file {})",
                name,
                path.display()
            )));
        }
        let db = Database::open(&path)?;
        tracing::info!("Mounted overlay '{}' from {}", name, path.display());
        Ok(Self {
            name,
            db,
            path: Some(path),
            writable: false,
        })
    }

    /// Freeze this layer so it can be mounted as an overlay.
    #[must_use]
    pub fn into_overlay(mut self) -> Self {
        self.writable = false;
        self
    }

    fn init_tables(&self) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(ROWS)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file, `None` for in-memory layers.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Number of stored cells, tombstones included.
    pub fn row_count(&self) -> Result<u64, StoreError> {
        let read_txn = self.db.begin_read()?;
        match read_txn.open_table(ROWS) {
            Ok(table) => Ok(table.len()?),
            Err(TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Compact the database file (optional optimization).
    pub fn compact(&mut self) -> Result<bool, StoreError> {
        Ok(self.db.compact()?)
    }

    pub(crate) fn begin_read(&self) -> Result<ReadTransaction, StoreError> {
        Ok(self.db.begin_read()?)
    }

    pub(crate) fn begin_write(&self) -> Result<WriteTransaction, StoreError> {
        if !self.writable {
            return Err(StoreError::NoSuchLayer(format!(
                "{} is a read-only overlay",
                self.name
            )));
        }
        Ok(self.db.begin_write()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cell_roundtrip() {
        let live = Cell::encode_live(b"hehe");
        assert_eq!(Cell::decode(&live).expect("live"), Cell::Live(b"hehe".to_vec()));
        let tomb = Cell::encode_tombstone();
        assert_eq!(Cell::decode(&tomb).expect("tomb"), Cell::Tombstone);
        assert!(Cell::decode(&[7, 1]).is_err());
        assert!(Cell::decode(&[]).is_err());
    }

    #[test]
    fn fresh_layer_is_empty() {
        let layer = Layer::in_memory("default").expect("layer");
        assert!(layer.is_writable());
        assert_eq!(layer.row_count().expect("count"), 0);
    }

    #[test]
    fn missing_overlay_is_no_such_layer() {
        let temp = tempdir().expect("temp dir");
        let result = Layer::open_overlay("base", temp.path().join("absent.redb"));
        assert!(matches!(result, Err(StoreError::NoSuchLayer(_))));
    }

    #[test]
    fn overlay_refuses_writes() {
        let layer = Layer::in_memory("base").expect("layer").into_overlay();
        assert!(matches!(
            layer.begin_write(),
            Err(StoreError::NoSuchLayer(_))
        ));
    }

    #[test]
    fn file_layer_reopens() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("layer.redb");
        {
            let layer = Layer::open("default", &path).expect("open");
            let txn = layer.begin_write().expect("write");
            {
                let mut table = txn.open_table(ROWS).expect("table");
                table
                    .insert(b"k".as_slice(), Cell::encode_live(b"v").as_slice())
                    .expect("insert");
            }
            txn.commit().expect("commit");
        }
        let overlay = Layer::open_overlay("default", &path).expect("overlay");
        assert_eq!(overlay.row_count().expect("count"), 1);
        assert_eq!(overlay.path(), Some(path.as_path()));
    }
}
