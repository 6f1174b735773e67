//! # Authorization Hook
//!
//! The store does not keep roles or permissions. Before every mutation it
//! asks an injected [`Authorizer`] whether the acting identity holds the
//! permission tuple for the operation, and aborts with `AuthDenied` before
//! any row is written when it does not.

use crate::StoreError;
use std::fmt;

/// The identity a snap acts as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Actor(String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The identity used by hosts that do not authenticate callers.
    #[must_use]
    pub fn root() -> Self {
        Self::new("root")
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Actor {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Actor {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A permission tuple: an action and the form, prop, tag or feed it
/// applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Perm {
    action: &'static str,
    target: String,
}

impl Perm {
    pub const NODE_ADD: &'static str = "node:add";
    pub const NODE_DEL: &'static str = "node:del";
    pub const PROP_SET: &'static str = "prop:set";
    pub const PROP_DEL: &'static str = "prop:del";
    pub const TAG_ADD: &'static str = "tag:add";
    pub const TAG_DEL: &'static str = "tag:del";
    pub const FEED_DATA: &'static str = "feed:data";

    pub fn new(action: &'static str, target: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
        }
    }

    #[must_use]
    pub fn action(&self) -> &'static str {
        self.action
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for Perm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.action, self.target)
    }
}

/// Capability check consulted before every mutation.
pub trait Authorizer: Send + Sync {
    fn allowed(&self, actor: &Actor, perm: &Perm) -> bool;

    /// `Ok(())` when allowed, `AuthDenied` otherwise.
    fn check(&self, actor: &Actor, perm: &Perm) -> Result<(), StoreError> {
        if self.allowed(actor, perm) {
            return Ok(());
        }
        tracing::warn!(
            event = "auth_denied",
            actor = %actor,
            perm = %perm,
            "Authorization denied"
        );
        Err(StoreError::AuthDenied {
            actor: actor.to_string(),
            perm: perm.to_string(),
        })
    }
}

/// Allows everything. The default for stores built without a hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn allowed(&self, _actor: &Actor, _perm: &Perm) -> bool {
        true
    }
}

impl<F> Authorizer for F
where
    F: Fn(&Actor, &Perm) -> bool + Send + Sync,
{
    fn allowed(&self, actor: &Actor, perm: &Perm) -> bool {
        self(actor, perm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_allows() {
        let perm = Perm::new(Perm::NODE_ADD, "widget");
        assert!(AllowAll.check(&Actor::root(), &perm).is_ok());
    }

    #[test]
    fn closure_hook_denies() {
        let hook = |actor: &Actor, perm: &Perm| {
            actor.name() == "root" || perm.action() != Perm::NODE_DEL
        };
        let del = Perm::new(Perm::NODE_DEL, "widget");
        assert!(hook.check(&Actor::root(), &del).is_ok());

        match hook.check(&Actor::from("visi"), &del) {
            Err(StoreError::AuthDenied { actor, perm }) => {
                assert_eq!(actor, "visi");
                assert_eq!(perm, "node:del(widget)");
            }
            other => unreachable!("unexpected result: {other:?}"),
        }
    }
}
