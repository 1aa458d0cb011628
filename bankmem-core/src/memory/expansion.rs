use crate::memory::layout::{self, CoherenceError};
use crate::memory::space::SpaceId;
use crate::memory::store::{ByteStore, StoreId};
use crate::memory::window::{AddressWindow, WindowId, WindowState};
use crate::memory::BankedMemory;
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpansionId(pub u32);

impl std::fmt::Display for ExpansionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "expansion {}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpansionError {
    #[error("{0} is already attached")]
    AlreadyAttached(ExpansionId),
    #[error("{0} is not attached")]
    NotAttached(ExpansionId),
    #[error("{expansion} brings {store} but that id is already in use")]
    StoreIdInUse { expansion: ExpansionId, store: StoreId },
    #[error("{expansion} brings {window} but that id is already in use")]
    WindowIdInUse {
        expansion: ExpansionId,
        window: WindowId,
    },
    #[error("{expansion} would make the memory incoherent: {source}")]
    Incoherent {
        expansion: ExpansionId,
        #[source]
        source: CoherenceError,
    },
    #[error("{expansion} displaces nonexistent {window}")]
    MissingDisplaced {
        expansion: ExpansionId,
        window: WindowId,
    },
    #[error("cannot detach {expansion} while {window} is still referenced by {referrer}")]
    StillReferenced {
        expansion: ExpansionId,
        window: WindowId,
        referrer: String,
    },
    #[error("cannot detach {expansion} while {store} still backs {window}")]
    StoreStillReferenced {
        expansion: ExpansionId,
        store: StoreId,
        window: WindowId,
    },
}

/// A removable unit of hardware, such as a cartridge: its own stores and windows, the spaces its
/// windows join, and the existing windows it switches out while plugged in.
#[derive(Debug)]
pub struct Expansion {
    id: ExpansionId,
    name: String,
    stores: Vec<ByteStore>,
    windows: Vec<AddressWindow>,
    spaces: Vec<SpaceId>,
    displaces: Vec<WindowId>,
}

impl Expansion {
    pub fn new(id: ExpansionId) -> Self {
        Self {
            id,
            name: String::new(),
            stores: Vec::new(),
            windows: Vec::new(),
            spaces: Vec::new(),
            displaces: Vec::new(),
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: ByteStore) -> Self {
        self.stores.push(store);
        self
    }

    /// Windows take priority over every window already in the target spaces, in the order
    /// they are added here.
    #[must_use]
    pub fn with_window(mut self, window: AddressWindow) -> Self {
        self.windows.push(window);
        self
    }

    #[must_use]
    pub fn in_space(mut self, space: SpaceId) -> Self {
        self.spaces.push(space);
        self
    }

    /// Deactivate `window` while attached and restore its flags on detach.
    #[must_use]
    pub fn displacing(mut self, window: WindowId) -> Self {
        self.displaces.push(window);
        self
    }

    pub fn id(&self) -> ExpansionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// What an attached expansion changed, kept so it can be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionRecord {
    pub(crate) name: String,
    pub(crate) stores: Vec<StoreId>,
    pub(crate) windows: Vec<WindowId>,
    pub(crate) spaces: Vec<SpaceId>,
    // Flags each displaced window had just before it was switched out
    pub(crate) displaced: Vec<(WindowId, WindowState)>,
}

impl ExpansionRecord {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stores(&self) -> &[StoreId] {
        &self.stores
    }

    pub fn windows(&self) -> &[WindowId] {
        &self.windows
    }

    pub fn spaces(&self) -> &[SpaceId] {
        &self.spaces
    }

    pub fn displaced(&self) -> &[(WindowId, WindowState)] {
        &self.displaced
    }
}

impl BankedMemory {
    /// Plug in an expansion. Either the whole expansion is attached or, on error, nothing
    /// changes.
    pub fn attach_expansion(&mut self, expansion: Expansion) -> Result<(), ExpansionError> {
        let Expansion {
            id,
            name,
            stores,
            mut windows,
            spaces,
            displaces,
        } = expansion;
        let incoherent = |source: CoherenceError| ExpansionError::Incoherent {
            expansion: id,
            source,
        };

        if self.expansions.contains_key(&id) {
            return Err(ExpansionError::AlreadyAttached(id));
        }

        for store in &stores {
            if self.stores.contains_key(&store.id())
                || stores.iter().filter(|other| other.id() == store.id()).count() > 1
            {
                return Err(ExpansionError::StoreIdInUse {
                    expansion: id,
                    store: store.id(),
                });
            }
        }

        for window in &windows {
            if self.windows.contains_key(&window.id())
                || windows.iter().filter(|other| other.id() == window.id()).count() > 1
            {
                return Err(ExpansionError::WindowIdInUse {
                    expansion: id,
                    window: window.id(),
                });
            }
        }

        if let Some(&space) = spaces.iter().find(|space| !self.spaces.contains_key(*space)) {
            return Err(incoherent(CoherenceError::MissingSpace(space)));
        }

        if let Some(&window) = displaces.iter().find(|window| !self.windows.contains_key(*window)) {
            return Err(ExpansionError::MissingDisplaced {
                expansion: id,
                window,
            });
        }

        for window in &mut windows {
            let store_len = |store: StoreId| {
                stores
                    .iter()
                    .find(|s| s.id() == store)
                    .or_else(|| self.stores.get(&store))
                    .map(ByteStore::len)
            };
            layout::clamp_window(window, store_len).map_err(incoherent)?;
            window.seed_floating(self.config.floating_seed);
        }

        let store_ids: Vec<_> = stores.iter().map(ByteStore::id).collect();
        let window_ids: Vec<_> = windows.iter().map(AddressWindow::id).collect();

        for store in stores {
            self.stores.insert(store.id(), store);
        }
        for window in windows {
            self.windows.insert(window.id(), window);
        }
        for space in &spaces {
            if let Some(space) = self.spaces.get_mut(space) {
                space.insert_front(&window_ids);
            }
        }

        // Mirrors inside the expansion can still point at windows that do not exist
        if let Err(err) = self.verify_coherence() {
            self.remove_content(&store_ids, &window_ids);
            return Err(incoherent(err));
        }

        let mut displaced = Vec::with_capacity(displaces.len());
        for window_id in displaces {
            // A window already switched out by another expansion keeps the flags it had before
            // the first of them was attached
            let earlier = self.displaced_prior(window_id);
            if let Some(window) = self.windows.get_mut(&window_id) {
                displaced.push((window_id, earlier.unwrap_or_else(|| window.state())));
                window.set_state(WindowState::INACTIVE);
            }
        }

        log::debug!(
            "attached {id} ({name}): {} stores, {} windows, displacing {:?}",
            store_ids.len(),
            window_ids.len(),
            displaced.iter().map(|(window, _)| window.0).collect::<Vec<_>>()
        );

        self.expansions.insert(
            id,
            ExpansionRecord {
                name,
                stores: store_ids,
                windows: window_ids,
                spaces,
                displaced,
            },
        );

        Ok(())
    }

    /// Unplug an expansion, restoring the windows it displaced to the flags they had when it
    /// was attached. Returns the expansion's stores so their contents can be saved.
    pub fn detach_expansion(&mut self, id: ExpansionId) -> Result<Vec<ByteStore>, ExpansionError> {
        let Some(record) = self.expansions.get(&id) else {
            return Err(ExpansionError::NotAttached(id));
        };

        for window in &record.windows {
            let still_referenced = |referrer: String| ExpansionError::StillReferenced {
                expansion: id,
                window: *window,
                referrer,
            };

            if let Some(mirror) = self.windows.values().find(|other| {
                other.mirror_source() == Some(*window) && !record.windows.contains(&other.id())
            }) {
                return Err(still_referenced(format!("mirror {}", mirror.id())));
            }

            if self.stack.as_ref().is_some_and(|stack| stack.window() == *window) {
                return Err(still_referenced("the stack".into()));
            }
        }

        if let Some(user) = self.windows.values().find(|other| {
            record.stores.contains(&other.store()) && !record.windows.contains(&other.id())
        }) {
            return Err(ExpansionError::StoreStillReferenced {
                expansion: id,
                store: user.store(),
                window: user.id(),
            });
        }

        let Some(record) = self.expansions.remove(&id) else {
            return Err(ExpansionError::NotAttached(id));
        };

        let stores = self.remove_content(&record.stores, &record.windows);

        for &(window_id, prior) in &record.displaced {
            if self.displaced_prior(window_id).is_some() {
                // Still switched out by another attached expansion
                continue;
            }
            if let Some(window) = self.windows.get_mut(&window_id) {
                window.set_state(prior);
            }
        }

        log::debug!("detached {id} ({})", record.name);

        Ok(stores)
    }

    /// Flags `window` had before any currently attached expansion displaced it.
    fn displaced_prior(&self, window: WindowId) -> Option<WindowState> {
        self.expansions.values().find_map(|record| {
            record
                .displaced
                .iter()
                .find(|(displaced, _)| *displaced == window)
                .map(|&(_, prior)| prior)
        })
    }

    fn remove_content(&mut self, stores: &[StoreId], windows: &[WindowId]) -> Vec<ByteStore> {
        for space in self.spaces.values_mut() {
            space.remove_windows(windows);
        }
        for window in windows {
            self.windows.remove(window);
        }

        stores.iter().filter_map(|store| self.stores.remove(store)).collect()
    }

    pub fn expansion(&self, id: ExpansionId) -> Option<&ExpansionRecord> {
        self.expansions.get(&id)
    }

    pub fn is_attached(&self, id: ExpansionId) -> bool {
        self.expansions.contains_key(&id)
    }
}
