pub mod dump;
pub mod expansion;
pub mod layout;
pub mod space;
pub mod stack;
pub mod store;
pub mod window;


use crate::config::MemoryConfig;
use crate::memory::dump::{MemoryDump, SpaceStructure};
use crate::memory::expansion::{ExpansionId, ExpansionRecord};
use crate::memory::layout::{CoherenceError, MemoryLayout};
use crate::memory::space::{AddressSpace, SpaceId};
use crate::memory::stack::{Stack, StackConfig, StackError};
use crate::memory::store::{ByteStore, StoreError, StoreId};
use crate::memory::window::{AddressWindow, BankSwitch, WindowId, WindowState};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("no active window contains address {0:#06X}")]
    NoWindow(u16),
    #[error("{len} bytes at {address:#06X} run past the end of {window} ({available} bytes left)")]
    DoesNotFit {
        window: WindowId,
        address: u16,
        len: usize,
        available: usize,
    },
    #[error("{0} does not exist")]
    UnknownStore(StoreId),
    #[error("error loading store contents: {source}")]
    Store {
        #[from]
        source: StoreError,
    },
}

/// Owner of every store, window and space of one emulated machine.
///
/// All traffic goes through the active address space. Unmapped reads return
/// [`MemoryConfig::default_value`] and unmapped or rejected writes are dropped, the way an
/// undriven bus behaves; none of the per-access operations can fail.
#[derive(Debug)]
pub struct BankedMemory {
    config: MemoryConfig,
    stores: BTreeMap<StoreId, ByteStore>,
    windows: BTreeMap<WindowId, AddressWindow>,
    spaces: BTreeMap<SpaceId, AddressSpace>,
    primary_space: SpaceId,
    active_space: SpaceId,
    stack: Option<Stack>,
    expansions: BTreeMap<ExpansionId, ExpansionRecord>,
    // Bank switches requested by register handlers, applied when the handler returns
    pending_switches: Vec<BankSwitch>,
}

impl BankedMemory {
    /// Build the engine from a layout. Windows that run past the end of their store are
    /// shrunk to fit; every other inconsistency is an error and no engine is built.
    pub fn new(layout: MemoryLayout, config: MemoryConfig) -> Result<Self, CoherenceError> {
        let MemoryLayout {
            stores,
            mut windows,
            spaces,
            primary_space,
            stack,
        } = layout;

        for window in windows.values_mut() {
            layout::clamp_window(window, |id| stores.get(&id).map(ByteStore::len))?;
            window.seed_floating(config.floating_seed);
        }

        let primary_space = primary_space.ok_or(CoherenceError::Empty("spaces"))?;
        let stack_window = stack.map(|(window, _)| window);
        layout::check_coherence(&stores, &windows, &spaces, primary_space, stack_window)?;

        let stack = stack.and_then(|(window, stack_config)| {
            windows
                .get(&window)
                .map(|w| Stack::new(window, w.size(), stack_config))
        });

        log::debug!(
            "built memory with {} stores, {} windows, {} spaces; primary {primary_space}; {config}",
            stores.len(),
            windows.len(),
            spaces.len()
        );

        Ok(Self {
            config,
            stores,
            windows,
            spaces,
            primary_space,
            active_space: primary_space,
            stack,
            expansions: BTreeMap::new(),
            pending_switches: Vec::new(),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Re-run the construction-time checks against the current content.
    pub fn verify_coherence(&self) -> Result<(), CoherenceError> {
        layout::check_coherence(
            &self.stores,
            &self.windows,
            &self.spaces,
            self.primary_space,
            self.stack.as_ref().map(Stack::window),
        )
    }

    pub fn read(&mut self, address: u16) -> u8 {
        match self.resolve_for_read(address) {
            Some((window, rel)) => self.read_window(window, rel),
            None => self.config.default_value,
        }
    }

    /// Read without side effects, for debuggers and dumps.
    pub fn peek(&self, address: u16) -> u8 {
        match self.resolve_for_read(address) {
            Some((window, rel)) => self.peek_window(window, rel),
            None => self.config.default_value,
        }
    }

    pub fn write(&mut self, address: u16, value: u8) {
        self.write_at(address, value, false);
    }

    /// Write even if the target window is backed by a read-mostly store.
    pub fn write_forced(&mut self, address: u16, value: u8) {
        self.write_at(address, value, true);
    }

    fn write_at(&mut self, address: u16, value: u8, force: bool) {
        let Some((window, rel)) = self.resolve_for_write(address) else {
            return;
        };

        if !self.write_window(window, rel, value, force) {
            log::trace!("write of {value:02X} to {address:04X} dropped by {window}");
        }
    }

    fn active_space(&self) -> Option<&AddressSpace> {
        self.spaces.get(&self.active_space)
    }

    fn resolve_for_read(&self, address: u16) -> Option<(WindowId, usize)> {
        self.active_space()?.resolve_for_read(address, &self.windows)
    }

    fn resolve_for_write(&self, address: u16) -> Option<(WindowId, usize)> {
        self.active_space()?.resolve_for_write(address, &self.windows)
    }

    /// The window in the active space that bulk operations at `address` should target.
    pub fn window_containing(&self, address: u16) -> Option<&AddressWindow> {
        let id = self.active_space()?.window_containing(address, &self.windows)?;
        self.windows.get(&id)
    }

    // Mirrors are resolved here rather than in the window so that the source's device handlers
    // still see the access
    fn mirror_root(&self, window: WindowId) -> WindowId {
        layout::mirror_root(window, &self.windows).unwrap_or(window)
    }

    fn read_window(&mut self, window: WindowId, rel: usize) -> u8 {
        let window = self.mirror_root(window);
        let value = match self.windows.get_mut(&window) {
            Some(window) => match self.stores.get_mut(&window.store()) {
                Some(store) => window.read(rel, store, &mut self.pending_switches),
                None => self.config.default_value,
            },
            None => self.config.default_value,
        };

        self.apply_switches();
        value
    }

    fn peek_window(&self, window: WindowId, rel: usize) -> u8 {
        let window = self.mirror_root(window);
        self.windows
            .get(&window)
            .and_then(|window| {
                let store = self.stores.get(&window.store())?;
                Some(window.peek(rel, store))
            })
            .unwrap_or(self.config.default_value)
    }

    fn write_window(&mut self, window: WindowId, rel: usize, value: u8, force: bool) -> bool {
        let written = match self.windows.get_mut(&window) {
            Some(window) => match self.stores.get_mut(&window.store()) {
                Some(store) => window.write(rel, value, force, store, &mut self.pending_switches),
                None => false,
            },
            None => false,
        };

        self.apply_switches();
        written
    }

    fn apply_switches(&mut self) {
        if self.pending_switches.is_empty() {
            return;
        }

        let mut switches = std::mem::take(&mut self.pending_switches);
        for switch in switches.drain(..) {
            match switch {
                BankSwitch::Window { window, state } => {
                    self.activate_window(window, state.active, state.active_for_reading);
                }
                BankSwitch::Space(space) => {
                    self.set_active_space(space);
                }
            }
        }
        self.pending_switches = switches;
    }

    /// The bank-switch primitive. Returns false if the window does not exist.
    pub fn activate_window(
        &mut self,
        window: WindowId,
        active: bool,
        active_for_reading: bool,
    ) -> bool {
        let Some(w) = self.windows.get_mut(&window) else {
            log::warn!("attempted to switch nonexistent {window}");
            return false;
        };

        w.set_active(active);
        w.set_active_for_reading(active_for_reading);

        log::trace!("{window} ({}) is now {}", w.name(), w.mode());

        true
    }

    /// Switch the perspective used for all subsequent traffic. Returns false, leaving the
    /// current space active, if the space does not exist.
    pub fn set_active_space(&mut self, space: SpaceId) -> bool {
        if !self.spaces.contains_key(&space) {
            log::warn!("attempted to switch to nonexistent {space}");
            return false;
        }

        if space != self.active_space {
            log::trace!("active space changed from {} to {space}", self.active_space);
            self.active_space = space;
        }

        true
    }

    pub fn active_space_id(&self) -> SpaceId {
        self.active_space
    }

    pub fn primary_space_id(&self) -> SpaceId {
        self.primary_space
    }

    pub fn restore_primary_space(&mut self) {
        self.active_space = self.primary_space;
    }

    /// Run `f` with `space` active, then switch back to whichever space was active before, even
    /// if `f` switched spaces itself. Returns `None` without running `f` if the space does not
    /// exist.
    pub fn with_space<T>(&mut self, space: SpaceId, f: impl FnOnce(&mut Self) -> T) -> Option<T> {
        let previous = self.active_space;
        if !self.set_active_space(space) {
            return None;
        }

        let result = f(self);
        self.active_space = previous;
        Some(result)
    }

    /// Designate a window as the call stack. Any previous stack position is discarded.
    pub fn bind_stack(&mut self, window: WindowId, config: StackConfig) -> Result<(), CoherenceError> {
        let Some(w) = self.windows.get(&window) else {
            return Err(CoherenceError::MissingStackWindow(window));
        };

        log::debug!("binding stack to {window} ({}), {config}", w.name());
        self.stack = Some(Stack::new(window, w.size(), config));

        Ok(())
    }

    pub fn stack(&self) -> Option<&Stack> {
        self.stack.as_ref()
    }

    pub fn stack_mut(&mut self) -> Option<&mut Stack> {
        self.stack.as_mut()
    }

    fn stack_window(&self) -> Result<WindowId, StackError> {
        let window = self.stack.as_ref().ok_or(StackError::Unbound)?.window();
        if !self.windows.get(&window).is_some_and(AddressWindow::is_active) {
            return Err(StackError::WindowInactive(window));
        }

        Ok(window)
    }

    pub fn push(&mut self, value: u8) -> Result<(), StackError> {
        let window = self.stack_window()?;
        let slot = self.stack.as_mut().ok_or(StackError::Unbound)?.push_slot()?;
        self.write_window(window, slot, value, false);

        Ok(())
    }

    pub fn pop(&mut self) -> Result<u8, StackError> {
        let window = self.stack_window()?;
        let slot = self.stack.as_mut().ok_or(StackError::Unbound)?.pop_slot()?;

        Ok(self.read_window(window, slot))
    }

    // Length of the run starting at `address` that stays inside one window and does not wrap
    fn run_length(&self, window: WindowId, rel: usize, address: u16, remaining: usize) -> usize {
        let in_window = self.windows.get(&window).map_or(1, |w| w.size() - rel);
        let before_wrap = 0x10000 - usize::from(address);
        remaining.min(in_window).min(before_wrap).max(1)
    }

    /// Read `len` consecutive addresses, wrapping at 0xFFFF. Side effects apply as for `read`.
    pub fn read_range(&mut self, address: u16, len: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(len);
        let mut address = address;
        while bytes.len() < len {
            let remaining = len - bytes.len();
            let run = match self.resolve_for_read(address) {
                Some((window, rel)) => {
                    let run = self.run_length(window, rel, address, remaining);
                    for i in 0..run {
                        let value = self.read_window(window, rel + i);
                        bytes.push(value);
                    }
                    run
                }
                None => {
                    bytes.push(self.config.default_value);
                    1
                }
            };
            address = address.wrapping_add(run as u16);
        }

        bytes
    }

    pub fn peek_range(&self, address: u16, len: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(len);
        let mut address = address;
        while bytes.len() < len {
            let remaining = len - bytes.len();
            let run = match self.resolve_for_read(address) {
                Some((window, rel)) => {
                    let run = self.run_length(window, rel, address, remaining);
                    bytes.extend((0..run).map(|i| self.peek_window(window, rel + i)));
                    run
                }
                None => {
                    bytes.push(self.config.default_value);
                    1
                }
            };
            address = address.wrapping_add(run as u16);
        }

        bytes
    }

    fn write_runs(&mut self, address: u16, len: usize, force: bool, value_at: impl Fn(usize) -> u8) {
        let mut done = 0;
        let mut address = address;
        while done < len {
            let run = match self.resolve_for_write(address) {
                Some((window, rel)) => {
                    let run = self.run_length(window, rel, address, len - done);
                    for i in 0..run {
                        self.write_window(window, rel + i, value_at(done + i), force);
                    }
                    run
                }
                None => 1,
            };
            done += run;
            address = address.wrapping_add(run as u16);
        }
    }

    /// Write consecutive addresses, wrapping at 0xFFFF.
    pub fn write_range(&mut self, address: u16, bytes: &[u8]) {
        self.write_runs(address, bytes.len(), false, |i| bytes[i]);
    }

    pub fn fill(&mut self, address: u16, len: usize, value: u8) {
        self.write_runs(address, len, false, |_| value);
    }

    /// Load an image into the single window containing `address`. Read-mostly stores are
    /// written as well, since this is how ROM images get in.
    pub fn load_image(&mut self, address: u16, bytes: &[u8]) -> Result<(), LoadError> {
        let (window, offset) = self.image_target(address, bytes.len())?;
        let store = window.store();
        self.stores
            .get_mut(&store)
            .ok_or(LoadError::UnknownStore(store))?
            .load(bytes, offset)?;

        log::debug!("loaded {} bytes at {address:04X}", bytes.len());

        Ok(())
    }

    /// Copy `len` bytes out of the single window containing `address`.
    pub fn save_range(&self, address: u16, len: usize) -> Result<Vec<u8>, LoadError> {
        let (window, offset) = self.image_target(address, len)?;
        let store = window.store();
        let bytes = self
            .stores
            .get(&store)
            .and_then(|s| s.bytes(offset, len))
            .ok_or(LoadError::UnknownStore(store))?;

        Ok(bytes.to_vec())
    }

    // Window containing `address` and the store offset of `address`, if `len` bytes fit
    fn image_target(&self, address: u16, len: usize) -> Result<(&AddressWindow, usize), LoadError> {
        let window = self.window_containing(address).ok_or(LoadError::NoWindow(address))?;
        let rel = usize::from(address - window.base());
        let available = window.size() - rel;
        if len > available {
            return Err(LoadError::DoesNotFit {
                window: window.id(),
                address,
                len,
                available,
            });
        }

        Ok((window, window.offset() + rel))
    }

    pub fn load_store(&mut self, store: StoreId, bytes: &[u8], offset: usize) -> Result<(), LoadError> {
        self.stores
            .get_mut(&store)
            .ok_or(LoadError::UnknownStore(store))?
            .load(bytes, offset)?;

        Ok(())
    }

    /// Make every store's current contents the baseline that `reset_all` restores.
    pub fn freeze_defaults(&mut self) {
        for store in self.stores.values_mut() {
            store.freeze_as_default();
        }
    }

    pub fn freeze_store(&mut self, store: StoreId) -> Result<(), LoadError> {
        self.stores
            .get_mut(&store)
            .ok_or(LoadError::UnknownStore(store))?
            .freeze_as_default();

        Ok(())
    }

    /// Power cycle: restore store contents and window flags to their baselines and return to
    /// the primary space. Windows displaced by attached expansions stay displaced.
    pub fn reset_all(&mut self) {
        for store in self.stores.values_mut() {
            store.reset();
        }

        for window in self.windows.values_mut() {
            window.reset();
        }

        // Every window is back at its initial flags, so that is what a detach restores
        for record in self.expansions.values_mut() {
            for (id, prior) in &mut record.displaced {
                if let Some(window) = self.windows.get_mut(&*id) {
                    *prior = window.initial_state();
                    window.set_state(WindowState::INACTIVE);
                }
            }
        }

        if let Some(stack) = &mut self.stack {
            stack.reset();
        }

        self.pending_switches.clear();
        self.active_space = self.primary_space;

        log::debug!("memory reset");
    }

    pub fn window(&self, window: WindowId) -> Option<&AddressWindow> {
        self.windows.get(&window)
    }

    pub fn windows(&self) -> impl Iterator<Item = &AddressWindow> {
        self.windows.values()
    }

    pub fn store(&self, store: StoreId) -> Option<&ByteStore> {
        self.stores.get(&store)
    }

    pub fn stores(&self) -> impl Iterator<Item = &ByteStore> {
        self.stores.values()
    }

    pub fn space(&self, space: SpaceId) -> Option<&AddressSpace> {
        self.spaces.get(&space)
    }

    pub fn spaces(&self) -> impl Iterator<Item = &AddressSpace> {
        self.spaces.values()
    }

    /// Byte dump of `from..=to` in the active space, split by answering window. Uses peek
    /// semantics, so dumping never disturbs device state.
    pub fn dump(&self, from: u16, to: u16) -> MemoryDump {
        self.dump_space(self.active_space, from, to).unwrap_or_else(|| {
            MemoryDump::build(from, to, |_| (None, self.config.default_value))
        })
    }

    /// Byte dump of `from..=to` as seen by `space`, whether or not it is the active one.
    /// `None` if there is no such space.
    pub fn dump_space(&self, space: SpaceId, from: u16, to: u16) -> Option<MemoryDump> {
        let space = self.spaces.get(&space)?;
        Some(MemoryDump::build(from, to, |address| {
            let resolved = space.resolve_for_read(address, &self.windows);
            let value = match resolved {
                Some((window, rel)) => self.peek_window(window, rel),
                None => self.config.default_value,
            };
            (resolved.and_then(|(window, _)| self.windows.get(&window)), value)
        }))
    }

    /// Window listing for the active space.
    pub fn structure(&self, only_active: bool) -> SpaceStructure {
        self.structure_of(self.active_space, only_active).unwrap_or_else(|| {
            SpaceStructure::build(self.active_space, String::new(), std::iter::empty())
        })
    }

    pub fn structure_of(&self, space: SpaceId, only_active: bool) -> Option<SpaceStructure> {
        let listed = self.spaces.get(&space)?;
        let windows = listed
            .windows()
            .iter()
            .filter_map(|window| self.windows.get(window))
            .filter(|window| !only_active || window.is_active());

        Some(SpaceStructure::build(space, listed.name().to_owned(), windows))
    }

    /// Window listings for every space, in id order.
    pub fn structures(&self, only_active: bool) -> Vec<SpaceStructure> {
        self.spaces.keys().filter_map(|&space| self.structure_of(space, only_active)).collect()
    }
}
