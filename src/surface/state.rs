//! Viewport configuration state and the commands that change it

use log::debug;

use super::error::CacheError;
use super::request::Stamp;
use super::store::SurfaceStore;
use super::types::{Dimensions, PageVariant};
use super::viewport::{SlotChange, ViewportId, ViewportTable};

/// Configuration owned by one cache instance
#[derive(Clone, Debug, Default)]
pub struct CacheState {
    /// Registered viewports
    pub viewports: ViewportTable,

    /// Current page (0-indexed)
    pub current_page: usize,

    /// Total page count
    pub page_count: usize,
}

impl CacheState {
    #[must_use]
    pub fn new(page_count: usize) -> Self {
        Self {
            viewports: ViewportTable::new(),
            current_page: 0,
            page_count,
        }
    }

    /// Apply a command and return resulting effects.
    ///
    /// Storage changes the command implies (invalidation, slot creation and
    /// removal, which slots take background writes) are made on `store`
    /// before returning.
    pub fn apply(
        &mut self,
        cmd: Command,
        store: &mut SurfaceStore,
    ) -> Result<Vec<Effect>, CacheError> {
        let result = self.execute(cmd, store);
        store.set_prerender_slots(&self.viewports.prerender_slots());
        result
    }

    fn execute(
        &mut self,
        cmd: Command,
        store: &mut SurfaceStore,
    ) -> Result<Vec<Effect>, CacheError> {
        match cmd {
            Command::Configure {
                id,
                variant,
                shared_with,
                enabled,
            } => self.configure(id, variant, shared_with, enabled, store),

            Command::Deregister(id) => {
                let change = self
                    .viewports
                    .deregister(id.as_str())
                    .ok_or(CacheError::UnknownViewport(id))?;
                apply_slot_change(&change, None, store);
                Ok(vec![])
            }

            Command::Resize { id, dims } => {
                let slot = self.slot(&id)?;
                if store.resize(slot.as_str(), dims) {
                    debug!("Viewport {id} resized to {dims}");
                    Ok(vec![Effect::Invalidated(slot), Effect::Prerender])
                } else {
                    Ok(vec![])
                }
            }

            Command::SetVariant { id, variant } => {
                let slot = self.slot(&id)?;
                if store.set_variant(slot.as_str(), variant) {
                    debug!("Viewport {id} now shows {variant}");
                    Ok(vec![Effect::Invalidated(slot), Effect::Prerender])
                } else {
                    Ok(vec![])
                }
            }

            Command::Invalidate(id) => {
                let slot = self.slot(&id)?;
                store.invalidate(slot.as_str());
                Ok(vec![Effect::Invalidated(slot), Effect::Prerender])
            }

            Command::SetEnabled { id, enabled } => {
                // Disabling also re-evaluates, so the slot's queued jobs are dropped
                if self.viewports.set_enabled(id.as_str(), enabled)? {
                    Ok(vec![Effect::Prerender])
                } else {
                    Ok(vec![])
                }
            }

            Command::Navigate(page) => {
                self.current_page = page.min(self.page_count.saturating_sub(1));
                Ok(vec![Effect::Prerender])
            }

            Command::SetPageCount(count) => {
                self.page_count = count;
                self.current_page = self.current_page.min(count.saturating_sub(1));
                Ok(self.invalidate_all(store))
            }

            Command::InvalidateAll => Ok(self.invalidate_all(store)),
        }
    }

    fn configure(
        &mut self,
        id: ViewportId,
        variant: PageVariant,
        shared_with: Option<ViewportId>,
        enabled: bool,
        store: &mut SurfaceStore,
    ) -> Result<Vec<Effect>, CacheError> {
        let shared_with = shared_with.filter(|target| *target != id);
        let mut effects = vec![];

        if let Some(existing) = self.viewports.get(id.as_str()) {
            if existing.shared_with == shared_with {
                let slot = existing.slot.clone();
                if store.set_variant(slot.as_str(), variant) {
                    effects.push(Effect::Invalidated(slot));
                    effects.push(Effect::Prerender);
                }
                if self.viewports.set_enabled(id.as_str(), enabled)? {
                    effects.push(Effect::Prerender);
                }
                effects.dedup();
                return Ok(effects);
            }

            debug!("Viewport {id} changes its sharing, registering it again");
            if let Some(change) = self.viewports.deregister(id.as_str()) {
                apply_slot_change(&change, None, store);
            }
        }

        let change = self.viewports.register(id.clone(), enabled, shared_with)?;
        debug!("Registered viewport {id} ({variant}): {change:?}");
        if let Some(slot) = apply_slot_change(&change, Some(variant), store) {
            effects.push(Effect::Invalidated(slot));
        }
        if enabled {
            effects.push(Effect::Prerender);
        }
        Ok(effects)
    }

    fn invalidate_all(&mut self, store: &mut SurfaceStore) -> Vec<Effect> {
        store.invalidate_all();
        let mut effects: Vec<Effect> = self
            .viewports
            .slots()
            .into_iter()
            .map(Effect::Invalidated)
            .collect();
        effects.push(Effect::Prerender);
        effects
    }

    fn slot(&self, id: &ViewportId) -> Result<ViewportId, CacheError> {
        self.viewports
            .slot_of(id.as_str())
            .cloned()
            .ok_or_else(|| CacheError::UnknownViewport(id.clone()))
    }

    /// Slots background prerendering should fill, with their current stamps.
    ///
    /// Unsized slots are skipped: there is nothing to render into yet.
    #[must_use]
    pub fn prerender_targets(&self, store: &SurfaceStore) -> Vec<(ViewportId, Stamp)> {
        self.viewports
            .prerender_slots()
            .into_iter()
            .filter_map(|slot| {
                let stamp = store.stamp(slot.as_str())?;
                (!stamp.dims.is_empty()).then_some((slot, stamp))
            })
            .collect()
    }
}

/// Mirror a registry change in storage.
///
/// Returns the slot whose entries were invalidated by a variant change, if any.
fn apply_slot_change(
    change: &SlotChange,
    variant: Option<PageVariant>,
    store: &mut SurfaceStore,
) -> Option<ViewportId> {
    let slot = match change {
        SlotChange::Created(slot) => {
            store.create_slot(slot.clone(), variant.unwrap_or_default());
            return None;
        }
        SlotChange::Joined(slot) => slot,
        SlotChange::Rekeyed { from, to } => {
            store.rekey(from.as_str(), to.clone());
            to
        }
        SlotChange::Dropped(slot) => {
            store.remove_slot(slot.as_str());
            return None;
        }
        SlotChange::Left(slot) => slot,
    };

    let variant = variant?;
    store
        .set_variant(slot.as_str(), variant)
        .then(|| slot.clone())
}

/// Commands that modify cache configuration
#[derive(Clone, Debug)]
pub enum Command {
    /// Register a viewport, or update an existing one
    Configure {
        id: ViewportId,
        variant: PageVariant,
        shared_with: Option<ViewportId>,
        enabled: bool,
    },
    /// Remove a viewport
    Deregister(ViewportId),
    /// Set a viewport's pixel size
    Resize { id: ViewportId, dims: Dimensions },
    /// Set which page region a viewport shows
    SetVariant { id: ViewportId, variant: PageVariant },
    /// Drop every stored surface of a viewport
    Invalidate(ViewportId),
    /// Toggle background prerendering for a viewport
    SetEnabled { id: ViewportId, enabled: bool },
    /// Go to a specific page
    Navigate(usize),
    /// A new document was loaded
    SetPageCount(usize),
    /// Drop every stored surface
    InvalidateAll,
}

/// Effects produced by state changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// All entries of a slot were dropped
    Invalidated(ViewportId),
    /// The prerender window should be re-evaluated
    Prerender,
}
