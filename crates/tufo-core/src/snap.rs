//! # Snap
//!
//! A transactional session bound to a store's layer stack. Every node
//! creation, mutation and query goes through a `Snap`.
//!
//! Each mutation runs in two phases. First it is *planned* against a
//! merged view of the stack: the model is consulted, every value is
//! normalized and every row edit (primary, prop, tag and index rows) is
//! collected. Nothing is written while planning, so a validation error
//! leaves no trace. Then the edits are applied to the write layer in a
//! single write transaction and committed.
//!
//! ## Batches
//!
//! Feed ingestion opens a batch with [`Snap::begin_batch`]: one write
//! transaction shared by all mutations until [`Snap::commit_batch`]. Reads
//! inside a batch see its uncommitted writes. A storage failure while
//! applying edits poisons the batch; committing a poisoned batch aborts it.
//!
//! Only one write transaction can be open per store. Opening a second snap
//! that writes while a batch is open on the same thread blocks.

use crate::auth::{Actor, Perm};
use crate::model::{Model, Prop};
use crate::node::{Ival, Node, Splice, full_prop_name, norm_tag, tag_lineage, tag_within};
use crate::primitives::{BUID_LEN, UNIV_CREATED};
use crate::storage::{RowEdit, RowSource, StackWriter, keys};
use crate::store::Store;
use crate::typelib::{BaseKind, TypeLib, time};
use crate::{Buid, StoreError, Valu};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// PLAN
// =============================================================================

/// Row edits and change records produced by validating one mutation.
#[derive(Debug, Default)]
struct Plan {
    edits: Vec<RowEdit>,
    splices: Vec<Splice>,
}

impl Plan {
    fn put<T: Serialize + ?Sized>(&mut self, key: Vec<u8>, value: &T) -> Result<(), StoreError> {
        self.edits.push(RowEdit::Put(key, postcard::to_allocvec(value)?));
        Ok(())
    }

    fn put_index(&mut self, key: Vec<u8>) {
        self.edits.push(RowEdit::Put(key, Vec::new()));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.edits.push(RowEdit::Delete(key));
    }

    /// Write a prop row and its index row, dropping the index row of the
    /// value it replaces.
    fn set_prop(
        &mut self,
        types: &TypeLib,
        node: &Node,
        prop: &Prop,
        new: &Valu,
        old: Option<&Valu>,
    ) -> Result<(), StoreError> {
        let buid = node.buid();
        if let Some(old) = old {
            self.delete(keys::prop_index_key(
                prop.full(),
                &prop.ty().indx(types, old)?,
                &buid,
            ));
        }
        self.put(keys::prop_key(&buid, prop.name()), new)?;
        self.put_index(keys::prop_index_key(
            prop.full(),
            &prop.ty().indx(types, new)?,
            &buid,
        ));
        self.splices.push(Splice::PropSet {
            form: node.form().to_string(),
            valu: node.valu().clone(),
            prop: prop.name().to_string(),
            new: new.clone(),
            old: old.cloned(),
        });
        Ok(())
    }

    fn del_tag(&mut self, node: &Node, tag: &str) {
        let buid = node.buid();
        self.delete(keys::tag_key(&buid, tag));
        self.delete(keys::tag_index_key(tag, node.form(), &buid));
        self.splices.push(Splice::TagDel {
            form: node.form().to_string(),
            valu: node.valu().clone(),
            tag: tag.to_string(),
        });
    }
}

fn ndef_name(node: &Node) -> String {
    format!("{}={}", node.form(), node.valu())
}

fn corrupt_key(key: &[u8]) -> StoreError {
    StoreError::Serialization(format!("malformed row key {}", hex::encode(key)))
}

// =============================================================================
// PLANNER
// =============================================================================

/// The model and a merged row view; everything needed to plan a mutation
/// or answer a query.
struct Planner<'p> {
    model: &'p Model,
    rows: &'p dyn RowSource,
}

impl<'p> Planner<'p> {
    fn types(&self) -> &'p TypeLib {
        self.model.types()
    }

    fn load_node(&self, buid: &Buid) -> Result<Option<Node>, StoreError> {
        let Some(row) = self.rows.get(&keys::node_key(buid))? else {
            return Ok(None);
        };
        let (form, valu): (String, Valu) = postcard::from_bytes(&row)?;
        let mut node = Node::new(*buid, form, valu);
        for (key, bytes) in self.rows.scan_prefix(&keys::prop_prefix(buid))? {
            let name = keys::row_name(&key).ok_or_else(|| corrupt_key(&key))?;
            node.set_prop(name, postcard::from_bytes(&bytes)?);
        }
        for (key, bytes) in self.rows.scan_prefix(&keys::tag_prefix(buid))? {
            let name = keys::row_name(&key).ok_or_else(|| corrupt_key(&key))?;
            node.set_tag(name, postcard::from_bytes(&bytes)?);
        }
        Ok(Some(node))
    }

    /// The current stored state of `node`, failing with `NoSuchNode`.
    fn req_node(&self, node: &Node) -> Result<Node, StoreError> {
        self.load_node(&node.buid())?
            .ok_or_else(|| StoreError::NoSuchNode(ndef_name(node)))
    }

    /// Load the nodes named by the trailing buids of index keys, once each,
    /// in key order.
    fn load_indexed<'k>(
        &self,
        index_keys: impl Iterator<Item = &'k Vec<u8>>,
    ) -> Result<Vec<Node>, StoreError> {
        let mut seen = BTreeSet::new();
        let mut nodes = Vec::new();
        for key in index_keys {
            let buid = Buid::from_key_suffix(key).ok_or_else(|| corrupt_key(key))?;
            if seen.insert(buid)
                && let Some(node) = self.load_node(&buid)?
            {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    fn norm_prop(&self, prop: &Prop, raw: &Valu) -> Result<Valu, StoreError> {
        prop.ty()
            .norm(self.types(), raw)
            .map(|norm| norm.valu)
            .map_err(|e| e.within_field(prop.name()))
    }

    /// Returns the node and whether it was created.
    fn add_node(
        &self,
        form: &str,
        raw: &Valu,
        props: &[(&str, Valu)],
    ) -> Result<((Node, bool), Plan), StoreError> {
        let types = self.types();
        let form = self.model.req_form(form)?;
        let norm = form.ty().norm(types, raw)?;
        let indx = form.ty().indx(types, &norm.valu)?;
        let buid = Buid::from_parts(form.name(), &indx);

        let mut supplied: BTreeMap<&str, (&Prop, Valu)> = BTreeMap::new();
        for (name, raw) in props {
            let prop = self.model.resolve_prop(form.name(), name)?;
            if prop.is_univ() {
                return Err(StoreError::ReadOnlyProp(prop.full().to_string()));
            }
            supplied.insert(prop.name(), (prop, self.norm_prop(prop, raw)?));
        }

        let mut plan = Plan::default();

        if let Some(mut node) = self.load_node(&buid)? {
            for (prop, valu) in supplied.into_values() {
                let old = node.get(prop.name()).cloned();
                if old.as_ref() == Some(&valu) {
                    continue;
                }
                if prop.is_ro() {
                    return Err(StoreError::ReadOnlyProp(prop.full().to_string()));
                }
                plan.set_prop(types, &node, prop, &valu, old.as_ref())?;
                node.set_prop(prop.name(), valu);
            }
            return Ok(((node, false), plan));
        }

        let mut node = Node::new(buid, form.name(), norm.valu.clone());
        plan.put(keys::node_key(&buid), &(form.name(), &norm.valu))?;
        plan.put_index(keys::prop_index_key(form.name(), &indx, &buid));
        plan.splices.push(Splice::NodeAdd {
            form: form.name().to_string(),
            valu: norm.valu.clone(),
        });

        let mut values: BTreeMap<&str, (&Prop, Valu)> = BTreeMap::new();
        if let Some(created) = form.prop(UNIV_CREATED) {
            values.insert(created.name(), (created, Valu::Int(time::now())));
        }
        for (sub, raw) in &norm.subs {
            if let Some(prop) = form.prop(sub)
                && !prop.is_univ()
            {
                values.insert(prop.name(), (prop, self.norm_prop(prop, raw)?));
            }
        }
        values.extend(supplied);
        for prop in form.props() {
            if values.contains_key(prop.name()) {
                continue;
            }
            if let Some(defval) = prop.defval() {
                values.insert(prop.name(), (prop, self.norm_prop(prop, defval)?));
            }
        }

        for (prop, valu) in values.into_values() {
            plan.set_prop(types, &node, prop, &valu, None)?;
            node.set_prop(prop.name(), valu);
        }
        Ok(((node, true), plan))
    }

    fn set_prop(
        &self,
        node: &Node,
        name: &str,
        raw: &Valu,
    ) -> Result<((bool, Node), Plan), StoreError> {
        let prop = self.model.resolve_prop(node.form(), name)?;
        let valu = self.norm_prop(prop, raw)?;
        let mut cur = self.req_node(node)?;
        let mut plan = Plan::default();

        let old = cur.get(prop.name()).cloned();
        if old.as_ref() == Some(&valu) {
            return Ok(((false, cur), plan));
        }
        if prop.is_ro() {
            return Err(StoreError::ReadOnlyProp(prop.full().to_string()));
        }
        plan.set_prop(self.types(), &cur, prop, &valu, old.as_ref())?;
        cur.set_prop(prop.name(), valu);
        Ok(((true, cur), plan))
    }

    fn del_prop(&self, node: &Node, name: &str) -> Result<((bool, Node), Plan), StoreError> {
        let prop = self.model.resolve_prop(node.form(), name)?;
        let mut cur = self.req_node(node)?;
        let mut plan = Plan::default();

        let Some(old) = cur.get(prop.name()).cloned() else {
            return Ok(((false, cur), plan));
        };
        if prop.is_ro() {
            return Err(StoreError::ReadOnlyProp(prop.full().to_string()));
        }
        let buid = cur.buid();
        plan.delete(keys::prop_key(&buid, prop.name()));
        plan.delete(keys::prop_index_key(
            prop.full(),
            &prop.ty().indx(self.types(), &old)?,
            &buid,
        ));
        plan.splices.push(Splice::PropDel {
            form: cur.form().to_string(),
            valu: cur.valu().clone(),
            prop: prop.name().to_string(),
            old,
        });
        cur.remove_prop(prop.name());
        Ok(((true, cur), plan))
    }

    /// `tag` must already be normalized. Ancestors are added with the same
    /// interval.
    fn add_tag(
        &self,
        node: &Node,
        tag: &str,
        ival: Option<Ival>,
    ) -> Result<((bool, Node), Plan), StoreError> {
        let mut cur = self.req_node(node)?;
        let mut plan = Plan::default();
        let buid = cur.buid();
        let mut changed = false;

        for name in tag_lineage(tag) {
            let old = cur.tag(name);
            let new = match old {
                Some(prev) => Ival::merge_opt(prev, ival),
                None => ival,
            };
            if old == Some(new) {
                continue;
            }
            plan.put(keys::tag_key(&buid, name), &new)?;
            if old.is_none() {
                plan.put_index(keys::tag_index_key(name, cur.form(), &buid));
            }
            plan.splices.push(Splice::TagAdd {
                form: cur.form().to_string(),
                valu: cur.valu().clone(),
                tag: name.to_string(),
                ival: new,
            });
            cur.set_tag(name, new);
            changed = true;
        }
        Ok(((changed, cur), plan))
    }

    /// Removes `tag` and every descendant.
    fn del_tag(&self, node: &Node, tag: &str) -> Result<((bool, Node), Plan), StoreError> {
        let mut cur = self.req_node(node)?;
        let mut plan = Plan::default();

        let doomed: Vec<String> = cur
            .tags()
            .keys()
            .filter(|name| tag_within(name, tag))
            .cloned()
            .collect();
        for name in &doomed {
            plan.del_tag(&cur, name);
            cur.remove_tag(name);
        }
        Ok(((!doomed.is_empty(), cur), plan))
    }

    fn del_node(&self, node: &Node) -> Result<((), Plan), StoreError> {
        let types = self.types();
        let cur = self.req_node(node)?;
        let form = self.model.req_form(cur.form())?;
        let buid = cur.buid();
        let mut plan = Plan::default();

        for tag in cur.tags().keys() {
            plan.del_tag(&cur, tag);
        }
        for (name, valu) in cur.props() {
            plan.delete(keys::prop_key(&buid, name));
            if let Some(prop) = form.prop(name) {
                plan.delete(keys::prop_index_key(
                    prop.full(),
                    &prop.ty().indx(types, valu)?,
                    &buid,
                ));
            }
            plan.splices.push(Splice::PropDel {
                form: cur.form().to_string(),
                valu: cur.valu().clone(),
                prop: name.clone(),
                old: valu.clone(),
            });
        }
        plan.delete(keys::prop_index_key(
            form.name(),
            &form.ty().indx(types, cur.valu())?,
            &buid,
        ));
        plan.delete(keys::node_key(&buid));
        plan.splices.push(Splice::NodeDel {
            form: cur.form().to_string(),
            valu: cur.valu().clone(),
        });
        Ok(((), plan))
    }
}

// =============================================================================
// SNAP
// =============================================================================

struct Batch {
    writer: StackWriter,
    pending: Vec<Splice>,
    poisoned: bool,
}

/// A transactional session on a [`Store`].
pub struct Snap<'a> {
    store: &'a Store,
    actor: Actor,
    batch: Option<Batch>,
    splices: Vec<Splice>,
}

impl std::fmt::Debug for Snap<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snap")
            .field("actor", &self.actor)
            .field("in_batch", &self.batch.is_some())
            .field("splices", &self.splices.len())
            .finish_non_exhaustive()
    }
}

impl<'a> Snap<'a> {
    pub(crate) fn new(store: &'a Store, actor: Actor) -> Self {
        Self {
            store,
            actor,
            batch: None,
            splices: Vec::new(),
        }
    }

    #[must_use]
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    #[must_use]
    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// Committed change records, in commit order.
    #[must_use]
    pub fn splices(&self) -> &[Splice] {
        &self.splices
    }

    /// Drain the committed change records.
    pub fn take_splices(&mut self) -> Vec<Splice> {
        std::mem::take(&mut self.splices)
    }

    fn check(&self, perm: Perm) -> Result<(), StoreError> {
        self.store.authorizer().check(&self.actor, &perm)
    }

    fn read<R>(&self, f: impl FnOnce(&Planner<'_>) -> Result<R, StoreError>) -> Result<R, StoreError> {
        let model = self.store.model();
        match &self.batch {
            Some(batch) => f(&Planner {
                model,
                rows: &batch.writer,
            }),
            None => {
                let reader = self.store.layers().begin_read()?;
                f(&Planner {
                    model,
                    rows: &reader,
                })
            }
        }
    }

    /// Plan a mutation, then apply it: in the open batch, or in a write
    /// transaction of its own that is committed before returning.
    fn mutate<R>(
        &mut self,
        f: impl FnOnce(&Planner<'_>) -> Result<(R, Plan), StoreError>,
    ) -> Result<R, StoreError> {
        let store = self.store;
        let model = store.model();

        if let Some(batch) = &mut self.batch {
            if batch.poisoned {
                return Err(StoreError::Storage(
                    "batch already failed; abort or commit it".to_string(),
                ));
            }
            let (out, plan) = f(&Planner {
                model,
                rows: &batch.writer,
            })?;
            if let Err(e) = batch.writer.apply(&plan.edits) {
                batch.poisoned = true;
                return Err(e);
            }
            batch.pending.extend(plan.splices);
            return Ok(out);
        }

        let mut writer = store.layers().begin_write()?;
        let (out, plan) = f(&Planner {
            model,
            rows: &writer,
        })?;
        if plan.edits.is_empty() {
            writer.abort()?;
            return Ok(out);
        }
        writer.apply(&plan.edits)?;
        writer.commit()?;
        self.splices.extend(plan.splices);
        Ok(out)
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Add a node, or merge `props` into the existing node with the same
    /// ndef.
    ///
    /// A new node gets `.created`, props populated from composite
    /// sub-values, the supplied props and defaults for every other prop
    /// that declares one.
    pub fn add_node(
        &mut self,
        form: &str,
        valu: impl Into<Valu>,
        props: &[(&str, Valu)],
    ) -> Result<Node, StoreError> {
        self.check(Perm::new(Perm::NODE_ADD, form))?;
        let valu = valu.into();
        let (node, created) = self.mutate(|p| p.add_node(form, &valu, props))?;
        if created {
            tracing::debug!("Created node {} ({})", ndef_name(&node), node.buid());
        }
        Ok(node)
    }

    /// Set a property. Returns whether the stored value changed; `node` is
    /// refreshed either way.
    pub fn set_prop(
        &mut self,
        node: &mut Node,
        prop: &str,
        valu: impl Into<Valu>,
    ) -> Result<bool, StoreError> {
        self.check(Perm::new(Perm::PROP_SET, full_prop_name(node.form(), prop)))?;
        let valu = valu.into();
        let (changed, fresh) = self.mutate(|p| p.set_prop(node, prop, &valu))?;
        *node = fresh;
        Ok(changed)
    }

    /// Remove a property. Returns whether it was present.
    pub fn del_prop(&mut self, node: &mut Node, prop: &str) -> Result<bool, StoreError> {
        self.check(Perm::new(Perm::PROP_DEL, full_prop_name(node.form(), prop)))?;
        let (changed, fresh) = self.mutate(|p| p.del_prop(node, prop))?;
        *node = fresh;
        Ok(changed)
    }

    /// Add a tag and its ancestors. Re-adding widens the stored interval to
    /// cover `ival`. Returns whether anything changed.
    pub fn add_tag(
        &mut self,
        node: &mut Node,
        tag: &str,
        ival: Option<Ival>,
    ) -> Result<bool, StoreError> {
        let tag = norm_tag(tag)?;
        self.check(Perm::new(Perm::TAG_ADD, tag.as_str()))?;
        let (changed, fresh) = self.mutate(|p| p.add_tag(node, &tag, ival))?;
        *node = fresh;
        Ok(changed)
    }

    /// Add a tag valid from `min` to `max`, both normalized as `time`.
    pub fn add_tag_range(
        &mut self,
        node: &mut Node,
        tag: &str,
        min: impl Into<Valu>,
        max: impl Into<Valu>,
    ) -> Result<bool, StoreError> {
        let ival = Ival::new(self.norm_time(min.into())?, self.norm_time(max.into())?)?;
        self.add_tag(node, tag, Some(ival))
    }

    fn norm_time(&self, raw: Valu) -> Result<i64, StoreError> {
        let name = BaseKind::Time.name();
        self.store
            .model()
            .types()
            .norm(name, &raw)?
            .valu
            .as_int()
            .ok_or_else(|| StoreError::bad_valu(name, "time did not normalize to an int"))
    }

    /// Remove a tag and all its descendants. Returns whether any were
    /// present.
    pub fn del_tag(&mut self, node: &mut Node, tag: &str) -> Result<bool, StoreError> {
        let tag = norm_tag(tag)?;
        self.check(Perm::new(Perm::TAG_DEL, tag.as_str()))?;
        let (changed, fresh) = self.mutate(|p| p.del_tag(node, &tag))?;
        *node = fresh;
        Ok(changed)
    }

    /// Remove a node with all its prop, tag and index rows. Nodes pointing
    /// at it are left alone.
    pub fn del_node(&mut self, node: &Node) -> Result<(), StoreError> {
        self.check(Perm::new(Perm::NODE_DEL, node.form()))?;
        self.mutate(|p| p.del_node(node))?;
        tracing::debug!("Deleted node {} ({})", ndef_name(node), node.buid());
        Ok(())
    }

    // =========================================================================
    // BATCHES
    // =========================================================================

    /// Open a batch. Does nothing when one is already open.
    pub fn begin_batch(&mut self) -> Result<(), StoreError> {
        if self.batch.is_none() {
            self.batch = Some(Batch {
                writer: self.store.layers().begin_write()?,
                pending: Vec::new(),
                poisoned: false,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// Commit the open batch. Returns the number of splices it recorded.
    pub fn commit_batch(&mut self) -> Result<usize, StoreError> {
        let Some(batch) = self.batch.take() else {
            return Ok(0);
        };
        if batch.poisoned {
            batch.writer.abort()?;
            return Err(StoreError::Storage(
                "batch aborted after a storage failure".to_string(),
            ));
        }
        batch.writer.commit()?;
        let count = batch.pending.len();
        self.splices.extend(batch.pending);
        tracing::debug!("Committed batch with {} splices", count);
        Ok(count)
    }

    /// Discard the open batch and everything written in it.
    pub fn abort_batch(&mut self) -> Result<(), StoreError> {
        if let Some(batch) = self.batch.take() {
            let lost = batch.pending.len();
            batch.writer.abort()?;
            tracing::debug!("Aborted batch, discarded {} splices", lost);
        }
        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn get_node_by_buid(&self, buid: &Buid) -> Result<Option<Node>, StoreError> {
        self.read(|p| p.load_node(buid))
    }

    /// Look up a node by identity. The value is normalized first, so a
    /// malformed value is an error while an absent node is `None`.
    pub fn get_node_by_ndef(
        &self,
        form: &str,
        valu: impl Into<Valu>,
    ) -> Result<Option<Node>, StoreError> {
        let types = self.store.model().types();
        let form = self.store.model().req_form(form)?;
        let norm = form.ty().norm(types, &valu.into())?;
        let buid = Buid::from_parts(form.name(), &form.ty().indx(types, &norm.valu)?);
        self.get_node_by_buid(&buid)
    }

    /// Nodes whose value for `name` (a form name for primary values, or a
    /// full prop name) equals `valu`.
    pub fn get_nodes_by_prop(
        &self,
        name: &str,
        valu: impl Into<Valu>,
    ) -> Result<Vec<Node>, StoreError> {
        let model = self.store.model();
        let target = model.index_target(name)?;
        let norm = target.ty().norm(model.types(), &valu.into())?;
        let indx = target.ty().indx(model.types(), &norm.valu)?;
        let prefix = keys::prop_index_value_prefix(target.index_name(), &indx);
        let exact_len = prefix.len() + BUID_LEN;

        self.read(|p| {
            let rows = p.rows.scan_prefix(&prefix)?;
            p.load_indexed(
                rows.iter()
                    .map(|(key, _)| key)
                    .filter(|key| key.len() == exact_len),
            )
        })
    }

    /// The first node matching [`Snap::get_nodes_by_prop`].
    pub fn get_node_by_prop(
        &self,
        name: &str,
        valu: impl Into<Valu>,
    ) -> Result<Option<Node>, StoreError> {
        Ok(self.get_nodes_by_prop(name, valu)?.into_iter().next())
    }

    /// Nodes whose value for `name` lies in `[min, max]`. Only for types
    /// with ordered index bytes (int, time, bool).
    pub fn get_nodes_by_range(
        &self,
        name: &str,
        min: impl Into<Valu>,
        max: impl Into<Valu>,
    ) -> Result<Vec<Node>, StoreError> {
        let model = self.store.model();
        let target = model.index_target(name)?;
        let ty = target.ty();
        if !ty.is_ranged() {
            return Err(StoreError::bad_valu(
                ty.name(),
                "type does not support range queries",
            ));
        }
        let lo = ty.indx(model.types(), &ty.norm(model.types(), &min.into())?.valu)?;
        let hi = ty.indx(model.types(), &ty.norm(model.types(), &max.into())?.valu)?;
        let lo = keys::prop_index_value_prefix(target.index_name(), &lo);
        let hi = keys::prefix_end(&keys::prop_index_value_prefix(target.index_name(), &hi));

        self.read(|p| {
            let rows = p.rows.scan(&lo, hi.as_deref())?;
            p.load_indexed(rows.iter().map(|(key, _)| key))
        })
    }

    /// Nodes whose string value for `name` starts with `text`.
    pub fn get_nodes_by_prefix(&self, name: &str, text: &str) -> Result<Vec<Node>, StoreError> {
        let target = self.store.model().index_target(name)?;
        let bytes = target.ty().norm_prefix(text)?;
        let prefix = keys::prop_index_value_prefix(target.index_name(), &bytes);
        self.read(|p| {
            let rows = p.rows.scan_prefix(&prefix)?;
            p.load_indexed(rows.iter().map(|(key, _)| key))
        })
    }

    /// Nodes carrying `tag`, optionally only those of one form.
    pub fn get_nodes_by_tag(&self, tag: &str, form: Option<&str>) -> Result<Vec<Node>, StoreError> {
        let tag = norm_tag(tag)?;
        if let Some(form) = form {
            self.store.model().req_form(form)?;
        }
        let prefix = keys::tag_index_prefix(&tag, form);
        self.read(|p| {
            let rows = p.rows.scan_prefix(&prefix)?;
            p.load_indexed(rows.iter().map(|(key, _)| key))
        })
    }

    /// Every node of a form, in primary index order.
    pub fn get_nodes_by_form(&self, form: &str) -> Result<Vec<Node>, StoreError> {
        let form = self.store.model().req_form(form)?;
        let prefix = keys::prop_index_prefix(form.name());
        self.read(|p| {
            let rows = p.rows.scan_prefix(&prefix)?;
            p.load_indexed(rows.iter().map(|(key, _)| key))
        })
    }

    /// Follow a pivot (or ndef typed) prop to the node it names.
    ///
    /// A prop that cannot reference a node is `NoSuchProp` whether or not
    /// it is set; an unset reference is `Ok(None)`.
    pub fn pivot_out(&self, node: &Node, prop: &str) -> Result<Option<Node>, StoreError> {
        let prop = self.store.model().resolve_prop(node.form(), prop)?;
        let target = prop.pivot_form();
        if target.is_none() && prop.ty().base() != BaseKind::Ndef {
            return Err(StoreError::NoSuchProp(format!(
                "{} does not reference a node",
                prop.full()
            )));
        }
        let Some(valu) = node.get(prop.name()) else {
            return Ok(None);
        };
        if let Some(target) = target {
            return self.get_node_by_ndef(target, valu.clone());
        }
        match valu.as_list() {
            Some([Valu::Str(form), inner]) => self.get_node_by_ndef(form, inner.clone()),
            _ => Err(StoreError::bad_valu(prop.full(), "ndef value is not a (form, valu) pair")),
        }
    }

    /// Every node with a pivot prop pointing at `node`.
    pub fn pivot_in(&self, node: &Node) -> Result<Vec<Node>, StoreError> {
        let mut seen = BTreeSet::new();
        let mut nodes = Vec::new();
        for prop in self.store.model().props_referencing(node.form()) {
            for found in self.get_nodes_by_prop(prop.full(), node.valu().clone())? {
                if seen.insert(found.buid()) {
                    nodes.push(found);
                }
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Model, StoreConfig};

    fn store() -> Store {
        let model = Model::from_json_str(
            "test",
            r#"{"types": [["thing", ["str", {}], {}]], "forms": [["thing", {}, []]]}"#,
        )
        .expect("model");
        Store::open(StoreConfig::in_memory(), model).expect("store")
    }

    /// Mark the open batch as a failed write to the layer would.
    fn fail_batch(snap: &mut Snap<'_>) {
        if let Some(batch) = &mut snap.batch {
            batch.poisoned = true;
        }
    }

    #[test]
    fn failed_batch_commits_nothing() {
        let store = store();
        let mut snap = store.snap("root");

        snap.begin_batch().expect("begin");
        snap.add_node("thing", "a", &[]).expect("add");
        fail_batch(&mut snap);

        assert!(matches!(
            snap.add_node("thing", "b", &[]),
            Err(StoreError::Storage(_))
        ));
        assert!(matches!(snap.commit_batch(), Err(StoreError::Storage(_))));
        assert!(!snap.in_batch());
        assert!(snap.splices().is_empty());
        assert!(snap.get_node_by_ndef("thing", "a").expect("query").is_none());
        assert_eq!(store.layers().write_layer().row_count().expect("count"), 0);
    }

    #[test]
    fn failed_batch_can_be_aborted() {
        let store = store();
        let mut snap = store.snap("root");

        snap.begin_batch().expect("begin");
        snap.add_node("thing", "a", &[]).expect("add");
        fail_batch(&mut snap);
        snap.abort_batch().expect("abort");

        snap.add_node("thing", "b", &[]).expect("after abort");
        assert!(snap.get_node_by_ndef("thing", "a").expect("a").is_none());
        assert!(snap.get_node_by_ndef("thing", "b").expect("b").is_some());
    }
}
