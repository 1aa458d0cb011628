use crate::config::{ConfigError, LayoutConfig, WindowConfig, WindowKindConfig};
use crate::memory::space::{AddressSpace, SpaceId};
use crate::memory::stack::StackConfig;
use crate::memory::store::{ByteStore, StoreId};
use crate::memory::window::{AddressWindow, WindowId};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoherenceError {
    #[error("memory layout has no {0}")]
    Empty(&'static str),
    #[error("{0} is declared more than once")]
    DuplicateStore(StoreId),
    #[error("{0} is declared more than once")]
    DuplicateWindow(WindowId),
    #[error("{0} is declared more than once")]
    DuplicateSpace(SpaceId),
    #[error("{window} references missing {store}")]
    MissingStore { window: WindowId, store: StoreId },
    #[error("{space} references missing {window}")]
    MissingWindow { space: SpaceId, window: WindowId },
    #[error("mirror {mirror} references missing {mirrored}")]
    MissingMirrorSource { mirror: WindowId, mirrored: WindowId },
    #[error("mirror chain starting at {0} never reaches a real window")]
    MirrorCycle(WindowId),
    #[error("{window} starts at offset {offset:#06X} but {store} is only {len:#06X} bytes")]
    WindowOutsideStore {
        window: WindowId,
        store: StoreId,
        offset: usize,
        len: usize,
    },
    #[error("stack is bound to missing {0}")]
    MissingStackWindow(WindowId),
    #[error("{0} does not exist")]
    MissingSpace(SpaceId),
}

/// The static content of a [`BankedMemory`](crate::memory::BankedMemory), assembled before the
/// engine is built. Nothing is checked beyond duplicate ids until construction.
#[derive(Debug, Default)]
pub struct MemoryLayout {
    pub(crate) stores: BTreeMap<StoreId, ByteStore>,
    pub(crate) windows: BTreeMap<WindowId, AddressWindow>,
    pub(crate) spaces: BTreeMap<SpaceId, AddressSpace>,
    pub(crate) primary_space: Option<SpaceId>,
    pub(crate) stack: Option<(WindowId, StackConfig)>,
}

impl MemoryLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_store(&mut self, store: ByteStore) -> Result<&mut Self, CoherenceError> {
        if self.stores.contains_key(&store.id()) {
            return Err(CoherenceError::DuplicateStore(store.id()));
        }

        self.stores.insert(store.id(), store);
        Ok(self)
    }

    pub fn add_window(&mut self, window: AddressWindow) -> Result<&mut Self, CoherenceError> {
        if self.windows.contains_key(&window.id()) {
            return Err(CoherenceError::DuplicateWindow(window.id()));
        }

        self.windows.insert(window.id(), window);
        Ok(self)
    }

    /// Add a mirror of a window that has already been added.
    pub fn add_mirror(
        &mut self,
        id: WindowId,
        source: WindowId,
        base: u16,
    ) -> Result<&mut Self, CoherenceError> {
        let Some(source_window) = self.windows.get(&source) else {
            return Err(CoherenceError::MissingMirrorSource {
                mirror: id,
                mirrored: source,
            });
        };

        let mirror = AddressWindow::mirror_of(id, source_window, base);
        self.add_window(mirror)
    }

    /// Add a space. The first space added becomes the primary space unless one is set
    /// explicitly.
    pub fn add_space(&mut self, space: AddressSpace) -> Result<&mut Self, CoherenceError> {
        if self.spaces.contains_key(&space.id()) {
            return Err(CoherenceError::DuplicateSpace(space.id()));
        }

        self.primary_space.get_or_insert(space.id());
        self.spaces.insert(space.id(), space);
        Ok(self)
    }

    pub fn set_primary_space(&mut self, space: SpaceId) -> &mut Self {
        self.primary_space = Some(space);
        self
    }

    pub fn bind_stack(&mut self, window: WindowId, config: StackConfig) -> &mut Self {
        self.stack = Some((window, config));
        self
    }

    pub fn from_config(config: &LayoutConfig) -> Result<Self, ConfigError> {
        let mut layout = Self::new();

        for store in &config.stores {
            let fill = store.fill.unwrap_or(config.memory.default_value);
            layout.add_store(
                ByteStore::new(store.id, store.kind, store.size, fill).named(store.name.clone()),
            )?;
        }

        let (mirrors, windows): (Vec<_>, Vec<_>) = config
            .windows
            .iter()
            .partition(|window| window.kind == WindowKindConfig::Mirror);

        for window in windows {
            layout.add_window(window_from_config(window)?)?;
        }

        // Mirrors can mirror mirrors, so keep adding until every source has been seen
        let mut pending = mirrors;
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for window in pending {
                let source = window.source.ok_or(ConfigError::MissingField {
                    window: window.id,
                    kind: window.kind,
                    field: "source",
                })?;
                match layout.windows.get(&source) {
                    Some(source_window) => {
                        let mirror = AddressWindow::mirror_of(window.id, source_window, window.base)
                            .named(window.name.clone())
                            .with_state(window.state());
                        layout.add_window(mirror)?;
                    }
                    None => deferred.push(window),
                }
            }

            if deferred.len() == before {
                let window = deferred[0];
                let mirrored = window.source.unwrap_or(window.id);
                return Err(if deferred.iter().any(|other| other.id == mirrored) {
                    CoherenceError::MirrorCycle(window.id).into()
                } else {
                    CoherenceError::MissingMirrorSource {
                        mirror: window.id,
                        mirrored,
                    }
                    .into()
                });
            }
            pending = deferred;
        }

        for space in &config.spaces {
            layout.add_space(
                AddressSpace::new(space.id, space.windows.iter().copied()).named(space.name.clone()),
            )?;
        }

        if let Some(primary_space) = config.primary_space {
            layout.set_primary_space(primary_space);
        }

        if let Some(stack) = &config.stack {
            layout.bind_stack(stack.window, stack.stack_config());
        }

        Ok(layout)
    }
}

fn window_from_config(config: &WindowConfig) -> Result<AddressWindow, ConfigError> {
    let missing = |field| ConfigError::MissingField {
        window: config.id,
        kind: config.kind,
        field,
    };

    let store = config.store.ok_or_else(|| missing("store"))?;
    let size = config.size.ok_or_else(|| missing("size"))?;
    let (id, offset, base) = (config.id, config.offset, config.base);

    let window = match config.kind {
        WindowKindConfig::Standard => AddressWindow::standard(id, store, offset, base, size),
        WindowKindConfig::Unconnected => {
            let value = config.value.ok_or_else(|| missing("value"))?;
            AddressWindow::unconnected(id, store, offset, base, size, value)
        }
        WindowKindConfig::Floating => AddressWindow::floating(id, store, offset, base, size),
        WindowKindConfig::Mirror => return Err(missing("source")),
    };

    Ok(window.named(config.name.clone()).with_state(config.state()))
}

/// Shrink a window to fit its store. Fails if the store is missing or the window starts past
/// its end.
pub(crate) fn clamp_window(
    window: &mut AddressWindow,
    store_len: impl Fn(StoreId) -> Option<usize>,
) -> Result<(), CoherenceError> {
    let Some(len) = store_len(window.store()) else {
        return Err(CoherenceError::MissingStore {
            window: window.id(),
            store: window.store(),
        });
    };

    if !window.clamp_to_store(len) {
        return Err(CoherenceError::WindowOutsideStore {
            window: window.id(),
            store: window.store(),
            offset: window.offset(),
            len,
        });
    }

    Ok(())
}

/// Check the cross-references between stores, windows and spaces.
pub(crate) fn check_coherence(
    stores: &BTreeMap<StoreId, ByteStore>,
    windows: &BTreeMap<WindowId, AddressWindow>,
    spaces: &BTreeMap<SpaceId, AddressSpace>,
    primary_space: SpaceId,
    stack_window: Option<WindowId>,
) -> Result<(), CoherenceError> {
    if stores.is_empty() {
        return Err(CoherenceError::Empty("stores"));
    }
    if windows.is_empty() {
        return Err(CoherenceError::Empty("windows"));
    }
    if spaces.is_empty() {
        return Err(CoherenceError::Empty("spaces"));
    }

    for window in windows.values() {
        let Some(store) = stores.get(&window.store()) else {
            return Err(CoherenceError::MissingStore {
                window: window.id(),
                store: window.store(),
            });
        };

        if window.offset() >= store.len() {
            return Err(CoherenceError::WindowOutsideStore {
                window: window.id(),
                store: store.id(),
                offset: window.offset(),
                len: store.len(),
            });
        }

        if window.mirror_source().is_some() {
            mirror_root(window.id(), windows)?;
        }
    }

    for space in spaces.values() {
        if let Some(&window) = space.windows().iter().find(|id| !windows.contains_key(*id)) {
            return Err(CoherenceError::MissingWindow {
                space: space.id(),
                window,
            });
        }
    }

    if !spaces.contains_key(&primary_space) {
        return Err(CoherenceError::MissingSpace(primary_space));
    }

    if let Some(window) = stack_window {
        if !windows.contains_key(&window) {
            return Err(CoherenceError::MissingStackWindow(window));
        }
    }

    Ok(())
}

/// Follow a mirror chain to the window that actually holds the bytes.
pub(crate) fn mirror_root(
    id: WindowId,
    windows: &BTreeMap<WindowId, AddressWindow>,
) -> Result<WindowId, CoherenceError> {
    let mut current = id;
    for _ in 0..=windows.len() {
        let Some(window) = windows.get(&current) else {
            return Err(CoherenceError::MissingMirrorSource {
                mirror: id,
                mirrored: current,
            });
        };

        match window.mirror_source() {
            Some(source) => current = source,
            None => return Ok(current),
        }
    }

    Err(CoherenceError::MirrorCycle(id))
}
