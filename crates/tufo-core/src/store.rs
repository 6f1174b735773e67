//! # Store
//!
//! The host object: configuration, the immutable model, the layer stack,
//! the authorization hook and the feed registry. Hands out [`Snap`]s.

use crate::auth::{Actor, AllowAll, Authorizer, Perm};
use crate::config::StoreConfig;
use crate::model::Model;
use crate::snap::Snap;
use crate::storage::{Layer, LayerStack};
use crate::{StoreError, Valu};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A bulk ingestion function: receives a snap with an open batch and one
/// chunk of items.
pub type FeedFunc = Arc<dyn Fn(&mut Snap<'_>, &[Valu]) -> Result<(), StoreError> + Send + Sync>;

/// Outcome of [`Store::add_feed_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedSummary {
    /// Items handed to the feed function.
    pub items: usize,
    /// Batches committed.
    pub batches: usize,
    /// Splices recorded by the committed batches.
    pub splices: usize,
}

/// A typed property-graph store.
pub struct Store {
    config: StoreConfig,
    model: Arc<Model>,
    layers: LayerStack,
    auth: Arc<dyn Authorizer>,
    feeds: BTreeMap<String, FeedFunc>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.config)
            .field("layers", &self.layers)
            .field("feeds", &self.feeds.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Mount the layers named by `config` and bind them to `model`.
    ///
    /// Fails with `NoSuchLayer` when an overlay file does not exist.
    pub fn open(config: StoreConfig, model: impl Into<Arc<Model>>) -> Result<Self, StoreError> {
        config.validate()?;
        let write = match &config.write_layer.path {
            Some(path) => Layer::open(config.write_layer.name.as_str(), path)?,
            None => Layer::in_memory(config.write_layer.name.as_str())?,
        };
        let mut overlays = Vec::with_capacity(config.overlays.len());
        for overlay in &config.overlays {
            let path = overlay
                .path
                .as_ref()
                .ok_or_else(|| StoreError::NoSuchLayer(overlay.name.clone()))?;
            overlays.push(Layer::open_overlay(overlay.name.as_str(), path)?);
        }
        let layers = LayerStack::new(write, overlays)?;
        Self::with_layers(config, model, layers)
    }

    /// Bind an already mounted layer stack.
    pub fn with_layers(
        config: StoreConfig,
        model: impl Into<Arc<Model>>,
        layers: LayerStack,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let model = model.into();
        tracing::info!(
            "Store ready: {} forms, write layer '{}', {} overlays",
            model.forms().count(),
            layers.write_layer().name(),
            layers.overlays().len()
        );
        Ok(Self {
            config,
            model,
            layers,
            auth: Arc::new(AllowAll),
            feeds: BTreeMap::new(),
        })
    }

    /// Replace the authorization hook.
    #[must_use]
    pub fn with_authorizer(mut self, auth: impl Authorizer + 'static) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    /// A session acting as `actor`.
    pub fn snap(&self, actor: impl Into<Actor>) -> Snap<'_> {
        Snap::new(self, actor.into())
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    #[must_use]
    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    /// Give up the store, keeping its layers.
    #[must_use]
    pub fn into_layers(self) -> LayerStack {
        self.layers
    }

    pub(crate) fn authorizer(&self) -> &dyn Authorizer {
        self.auth.as_ref()
    }

    // =========================================================================
    // FEEDS
    // =========================================================================

    /// Register (or replace) the feed function for a dotted name such as
    /// `com.test.record`.
    pub fn set_feed_func<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&mut Snap<'_>, &[Valu]) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        self.feeds.insert(name.into(), Arc::new(func));
    }

    /// Names of the registered feeds.
    pub fn feed_names(&self) -> impl Iterator<Item = &str> {
        self.feeds.keys().map(String::as_str)
    }

    /// Drive a feed over `items` in batches of `feed_batch_size`, each
    /// committed before the next starts.
    ///
    /// If the feed function fails, its in-flight batch is discarded and the
    /// error returned; earlier batches stay committed.
    pub fn add_feed_data(
        &self,
        actor: impl Into<Actor>,
        name: &str,
        items: &[Valu],
    ) -> Result<FeedSummary, StoreError> {
        let actor = actor.into();
        self.auth.check(&actor, &Perm::new(Perm::FEED_DATA, name))?;
        let func = self
            .feeds
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchFeed(name.to_string()))?;

        let mut summary = FeedSummary::default();
        let mut snap = self.snap(actor);
        for chunk in items.chunks(self.config.feed_batch_size.max(1)) {
            snap.begin_batch()?;
            if let Err(e) = func(&mut snap, chunk) {
                snap.abort_batch()?;
                tracing::warn!(
                    "Feed '{}' aborted batch {} ({} items): {}",
                    name,
                    summary.batches,
                    chunk.len(),
                    e
                );
                return Err(e);
            }
            summary.splices += snap.commit_batch()?;
            summary.items += chunk.len();
            summary.batches += 1;
        }
        tracing::debug!(
            "Feed '{}' ingested {} items in {} batches",
            name,
            summary.items,
            summary.batches
        );
        Ok(summary)
    }
}
