//! # Storage Module
//!
//! Layered redb storage for node, prop, tag and index rows.
//!
//! - `keys`: composite row key construction
//! - `layer`: one redb database, writable or mounted read-only
//! - `stack`: the shadowing overlay of layers and its transactions

pub mod keys;
mod layer;
mod stack;

pub use layer::Layer;
pub use stack::{LayerStack, RowEdit, RowSource, StackReader, StackWriter};
