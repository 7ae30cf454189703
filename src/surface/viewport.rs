//! Viewport registry and surface-sharing groups

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use super::error::CacheError;

/// Stable name of one on-screen drawing surface
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewportId(Arc<str>);

impl ViewportId {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ViewportId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ViewportId {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl Borrow<str> for ViewportId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One registered viewport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub id: ViewportId,
    /// Whether background prerendering fills this viewport
    pub enabled: bool,
    /// Viewport this one was registered to share surfaces with
    pub shared_with: Option<ViewportId>,
    /// Storage key: lexicographically-first id of the sharing group
    pub slot: ViewportId,
}

/// How a registry change affects storage slots
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotChange {
    /// A fresh slot keyed by this id
    Created(ViewportId),
    /// Joined an existing slot under its current key
    Joined(ViewportId),
    /// The group's first id changed; storage moves to the new key
    Rekeyed { from: ViewportId, to: ViewportId },
    /// Last member left; storage goes away
    Dropped(ViewportId),
    /// Left a group that keeps its key
    Left(ViewportId),
}

/// Registered viewports and the slot each resolves to
#[derive(Clone, Debug, Default)]
pub struct ViewportTable {
    viewports: BTreeMap<ViewportId, Viewport>,
}

impl ViewportTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new viewport, optionally joining another viewport's sharing group
    pub fn register(
        &mut self,
        id: ViewportId,
        enabled: bool,
        shared_with: Option<ViewportId>,
    ) -> Result<SlotChange, CacheError> {
        let shared_with = shared_with.filter(|target| *target != id);

        let Some(target) = shared_with.clone() else {
            self.viewports.insert(
                id.clone(),
                Viewport {
                    id: id.clone(),
                    enabled,
                    shared_with: None,
                    slot: id.clone(),
                },
            );
            return Ok(SlotChange::Created(id));
        };

        let Some(existing) = self.viewports.get(&target).map(|v| v.slot.clone()) else {
            return Err(CacheError::UnknownShareTarget {
                viewport: id,
                target,
            });
        };

        let slot = if id < existing { id.clone() } else { existing.clone() };
        self.viewports.insert(
            id.clone(),
            Viewport {
                id: id.clone(),
                enabled,
                shared_with,
                slot: slot.clone(),
            },
        );

        if slot == existing {
            return Ok(SlotChange::Joined(slot));
        }

        self.repoint(&existing, &slot);
        Ok(SlotChange::Rekeyed {
            from: existing,
            to: slot,
        })
    }

    /// Remove a viewport, handing its group's storage to the next member if any remain
    pub fn deregister(&mut self, id: &str) -> Option<SlotChange> {
        let removed = self.viewports.remove(id)?;

        if removed.slot != removed.id {
            return Some(SlotChange::Left(removed.slot));
        }

        let next = self
            .viewports
            .values()
            .filter(|v| v.slot == removed.slot)
            .map(|v| v.id.clone())
            .min();

        match next {
            None => Some(SlotChange::Dropped(removed.slot)),
            Some(next) => {
                self.repoint(&removed.slot, &next);
                Some(SlotChange::Rekeyed {
                    from: removed.slot,
                    to: next,
                })
            }
        }
    }

    fn repoint(&mut self, from: &ViewportId, to: &ViewportId) {
        for viewport in self.viewports.values_mut() {
            if viewport.slot == *from {
                viewport.slot = to.clone();
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Viewport> {
        self.viewports.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.viewports.contains_key(id)
    }

    /// Storage slot a viewport reads and writes through
    #[must_use]
    pub fn slot_of(&self, id: &str) -> Option<&ViewportId> {
        self.viewports.get(id).map(|v| &v.slot)
    }

    /// Toggle background prerendering; returns whether the flag changed
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<bool, CacheError> {
        let viewport = self
            .viewports
            .get_mut(id)
            .ok_or_else(|| CacheError::UnknownViewport(ViewportId::new(id)))?;
        let changed = viewport.enabled != enabled;
        viewport.enabled = enabled;
        Ok(changed)
    }

    /// Slots with at least one enabled member, in id order
    #[must_use]
    pub fn prerender_slots(&self) -> Vec<ViewportId> {
        self.viewports
            .values()
            .filter(|v| v.enabled)
            .map(|v| v.slot.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every distinct slot in id order
    #[must_use]
    pub fn slots(&self) -> Vec<ViewportId> {
        self.viewports
            .values()
            .map(|v| v.slot.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Viewport> {
        self.viewports.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.viewports.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.viewports.is_empty()
    }
}
