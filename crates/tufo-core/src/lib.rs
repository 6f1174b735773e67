//! # tufo-core
//!
//! A typed property-graph store. Nodes ("tufos") are strongly typed, their
//! identity is derived from a normalized primary value, and their secondary
//! properties and tags are independently typed and indexed.
//!
//! ## Layout
//!
//! - `typelib`: value types; normalize, index bytes, display form
//! - `model`: node schemas (forms) built once from schema-as-data
//! - `node`: the in-memory node, its packed boundary form and splices
//! - `storage`: redb layers and the shadowing layer stack
//! - `snap`: the transactional session owning index maintenance
//! - `store`: the host object binding config, model, layers, auth and feeds
//!
//! ## Guarantees
//!
//! - Index bytes are deterministic, and order preserving for int and time
//! - Every primary mutation and its index delta commit in one transaction
//! - A delete in the write layer shadows the key in every overlay
//! - No async, no network dependencies

// =============================================================================
// MODULES
// =============================================================================

pub mod auth;
pub mod config;
pub mod model;
pub mod node;
pub mod primitives;
pub mod snap;
pub mod storage;
pub mod store;
pub mod typelib;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Buid, StoreError, Valu};

// =============================================================================
// RE-EXPORTS: Schema and Nodes
// =============================================================================

pub use model::{Form, Model, ModelBuilder, ModelDef, Prop};
pub use node::{Ival, Node, PackedNode, Splice};
pub use typelib::{Norm, Type, TypeLib};

// =============================================================================
// RE-EXPORTS: Storage and Sessions
// =============================================================================

pub use auth::{Actor, AllowAll, Authorizer, Perm};
pub use config::{LayerConfig, StoreConfig};
pub use snap::Snap;
pub use storage::{Layer, LayerStack};
pub use store::{FeedFunc, FeedSummary, Store};
