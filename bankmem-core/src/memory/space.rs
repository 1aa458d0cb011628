use crate::memory::window::{AddressWindow, WindowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Formatter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(pub u32);

impl std::fmt::Display for SpaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "space {}", self.0)
    }
}

/// One bus master's view of memory: an ordered list of windows, scanned front to back. When
/// several enabled windows claim the same address the first one declared wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    id: SpaceId,
    name: String,
    windows: Vec<WindowId>,
}

impl AddressSpace {
    pub fn new(id: SpaceId, windows: impl IntoIterator<Item = WindowId>) -> Self {
        Self {
            id,
            name: String::new(),
            windows: windows.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn windows(&self) -> &[WindowId] {
        &self.windows
    }

    fn resolve(
        &self,
        address: u16,
        windows: &BTreeMap<WindowId, AddressWindow>,
        enabled: impl Fn(&AddressWindow) -> bool,
    ) -> Option<(WindowId, usize)> {
        self.windows.iter().find_map(|id| {
            let window = windows.get(id)?;
            if !enabled(window) {
                return None;
            }
            window.relative(address).map(|rel| (*id, rel))
        })
    }

    /// The window that answers a read of `address`, with the address relative to its base.
    pub fn resolve_for_read(
        &self,
        address: u16,
        windows: &BTreeMap<WindowId, AddressWindow>,
    ) -> Option<(WindowId, usize)> {
        self.resolve(address, windows, AddressWindow::is_active_for_reading)
    }

    /// The window that receives a write to `address`. Write-only windows qualify.
    pub fn resolve_for_write(
        &self,
        address: u16,
        windows: &BTreeMap<WindowId, AddressWindow>,
    ) -> Option<(WindowId, usize)> {
        self.resolve(address, windows, AddressWindow::is_active)
    }

    /// The single window that bulk loads and saves should target at `address`.
    pub fn window_containing(
        &self,
        address: u16,
        windows: &BTreeMap<WindowId, AddressWindow>,
    ) -> Option<WindowId> {
        self.resolve_for_write(address, windows).map(|(id, _)| id)
    }

    pub(crate) fn insert_front(&mut self, ids: &[WindowId]) {
        self.windows.splice(0..0, ids.iter().copied());
    }

    pub(crate) fn remove_windows(&mut self, ids: &[WindowId]) {
        self.windows.retain(|id| !ids.contains(id));
    }
}
