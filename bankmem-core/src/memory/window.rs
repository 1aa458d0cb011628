use crate::memory::space::SpaceId;
use crate::memory::store::{ByteStore, StoreId};
use bankmem_proc_macros::{EnumDisplay, EnumFromStr};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;

/// Identifier of an [`AddressWindow`], unique within one
/// [`BankedMemory`](crate::memory::BankedMemory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "window {}", self.0)
    }
}

/// The three states a window moves between as banks are switched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumDisplay, EnumFromStr)]
pub enum WindowMode {
    Readable,
    WriteOnly,
    Inactive,
}

/// The pair of enable flags carried by every window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub active: bool,
    pub active_for_reading: bool,
}

impl WindowState {
    pub const READABLE: Self = Self::new(true, true);
    pub const WRITE_ONLY: Self = Self::new(true, false);
    pub const INACTIVE: Self = Self::new(false, false);

    pub const fn new(active: bool, active_for_reading: bool) -> Self {
        Self {
            active,
            active_for_reading,
        }
    }

    pub fn mode(self) -> WindowMode {
        match (self.active, self.active_for_reading) {
            (true, true) => WindowMode::Readable,
            (true, false) => WindowMode::WriteOnly,
            (false, _) => WindowMode::Inactive,
        }
    }
}

impl Default for WindowState {
    fn default() -> Self {
        Self::READABLE
    }
}

/// A bank switch requested by a device-register handler. Requests are applied in order as soon
/// as the handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankSwitch {
    Window { window: WindowId, state: WindowState },
    Space(SpaceId),
}

/// What a device-register handler gets to work with: the window's slice of its backing store
/// and a queue of bank switches to apply once the handler returns.
pub struct RegisterContext<'a> {
    backing: &'a mut [u8],
    switches: &'a mut Vec<BankSwitch>,
}

impl<'a> RegisterContext<'a> {
    pub(crate) fn new(backing: &'a mut [u8], switches: &'a mut Vec<BankSwitch>) -> Self {
        Self { backing, switches }
    }

    /// The bytes backing this register window, indexed by register position.
    pub fn backing(&self) -> &[u8] {
        self.backing
    }

    pub fn backing_mut(&mut self) -> &mut [u8] {
        self.backing
    }

    /// Request that a window's enable flags change.
    pub fn activate_window(&mut self, window: WindowId, active: bool, active_for_reading: bool) {
        self.switches.push(BankSwitch::Window {
            window,
            state: WindowState::new(active, active_for_reading),
        });
    }

    /// Request that the memory's active address space change.
    pub fn select_space(&mut self, space: SpaceId) {
        self.switches.push(BankSwitch::Space(space));
    }
}

pub type ReadHandler = Box<dyn FnMut(usize, &mut RegisterContext<'_>) -> u8>;
pub type WriteHandler = Box<dyn FnMut(usize, u8, &mut RegisterContext<'_>)>;
pub type PeekHandler = Box<dyn Fn(usize, &[u8]) -> u8>;

/// The three operations a peripheral supplies for its register window. Reads may have side
/// effects (clearing a latched flag, say) and so may writes; peeks must not.
pub struct RegisterHandlers {
    read: ReadHandler,
    write: WriteHandler,
    peek: PeekHandler,
}

impl RegisterHandlers {
    pub fn new<R, W, P>(read: R, write: W, peek: P) -> Self
    where
        R: FnMut(usize, &mut RegisterContext<'_>) -> u8 + 'static,
        W: FnMut(usize, u8, &mut RegisterContext<'_>) + 'static,
        P: Fn(usize, &[u8]) -> u8 + 'static,
    {
        Self {
            read: Box::new(read),
            write: Box::new(write),
            peek: Box::new(peek),
        }
    }

    /// Plain latches: every position reads back the last value written to it.
    pub fn latches() -> Self {
        Self::new(
            |position, context| context.backing()[position],
            |position, value, context| context.backing_mut()[position] = value,
            |position, backing| backing[position],
        )
    }
}

impl std::fmt::Debug for RegisterHandlers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("RegisterHandlers { .. }")
    }
}

/// Generator for an undriven bus: every read sees a fresh pseudo-random byte.
#[derive(Debug, Clone)]
pub struct FloatingBus {
    seed: u64,
    rng: SmallRng,
    last_value: u8,
}

impl FloatingBus {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: SmallRng::seed_from_u64(seed),
            last_value: 0x00,
        }
    }

    fn next(&mut self) -> u8 {
        self.last_value = self.rng.gen();
        self.last_value
    }

    /// The last value handed out, for introspection.
    pub fn last_value(&self) -> u8 {
        self.last_value
    }

    fn reseed(&mut self, seed: u64) {
        *self = Self::new(seed);
    }

    fn restart(&mut self) {
        self.reseed(self.seed);
    }
}

#[derive(Debug)]
pub enum WindowKind {
    /// Direct passthrough to the backing store.
    Standard,
    /// Reads come from another window; writes are ignored.
    Mirror { source: WindowId },
    /// Open bus with a known value. Writes are ignored.
    Unconnected { value: u8 },
    /// Open bus that returns noise. Writes are ignored.
    Floating(FloatingBus),
    /// Peripheral registers; every access is routed to the device's handlers.
    DeviceRegister(RegisterHandlers),
}

impl WindowKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Mirror { .. } => "mirror",
            Self::Unconnected { .. } => "unconnected",
            Self::Floating(..) => "floating",
            Self::DeviceRegister(..) => "register",
        }
    }
}

/// A relocatable view of `size` bytes of one store, starting at `offset` in the store and
/// answering addresses `base..base + size`.
#[derive(Debug)]
pub struct AddressWindow {
    id: WindowId,
    name: String,
    store: StoreId,
    offset: usize,
    base: u16,
    size: usize,
    state: WindowState,
    initial_state: WindowState,
    kind: WindowKind,
}

impl AddressWindow {
    fn new(
        id: WindowId,
        store: StoreId,
        offset: usize,
        base: u16,
        size: usize,
        kind: WindowKind,
    ) -> Self {
        Self {
            id,
            name: String::new(),
            store,
            offset,
            base,
            size,
            state: WindowState::READABLE,
            initial_state: WindowState::READABLE,
            kind,
        }
    }

    pub fn standard(id: WindowId, store: StoreId, offset: usize, base: u16, size: usize) -> Self {
        Self::new(id, store, offset, base, size, WindowKind::Standard)
    }

    pub fn unconnected(
        id: WindowId,
        store: StoreId,
        offset: usize,
        base: u16,
        size: usize,
        value: u8,
    ) -> Self {
        Self::new(id, store, offset, base, size, WindowKind::Unconnected { value })
    }

    /// The generator is reseeded from the memory configuration once the window is owned by a
    /// [`BankedMemory`](crate::memory::BankedMemory).
    pub fn floating(id: WindowId, store: StoreId, offset: usize, base: u16, size: usize) -> Self {
        Self::new(id, store, offset, base, size, WindowKind::Floating(FloatingBus::new(0)))
    }

    pub fn device(
        id: WindowId,
        store: StoreId,
        offset: usize,
        base: u16,
        size: usize,
        handlers: RegisterHandlers,
    ) -> Self {
        Self::new(id, store, offset, base, size, WindowKind::DeviceRegister(handlers))
    }

    /// A window at `base` that shows the same bytes as `source`.
    pub fn mirror_of(id: WindowId, source: &AddressWindow, base: u16) -> Self {
        Self::new(
            id,
            source.store,
            source.offset,
            base,
            source.size,
            WindowKind::Mirror { source: source.id },
        )
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the state the window starts in, which is also the state `reset_all` restores.
    #[must_use]
    pub fn with_state(mut self, state: WindowState) -> Self {
        self.state = state;
        self.initial_state = state;
        self
    }

    #[must_use]
    pub fn inactive(self) -> Self {
        self.with_state(WindowState::INACTIVE)
    }

    #[must_use]
    pub fn write_only(self) -> Self {
        self.with_state(WindowState::WRITE_ONLY)
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> StoreId {
        self.store
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Last address answered by this window, or `None` for an empty window.
    pub fn last_address(&self) -> Option<u32> {
        (self.size > 0).then(|| u32::from(self.base) + self.size as u32 - 1)
    }

    pub fn kind(&self) -> &WindowKind {
        &self.kind
    }

    pub fn mirror_source(&self) -> Option<WindowId> {
        match self.kind {
            WindowKind::Mirror { source } => Some(source),
            _ => None,
        }
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn initial_state(&self) -> WindowState {
        self.initial_state
    }

    pub fn mode(&self) -> WindowMode {
        self.state.mode()
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn is_active_for_reading(&self) -> bool {
        self.state.active && self.state.active_for_reading
    }

    pub fn set_active(&mut self, active: bool) {
        self.state.active = active;
    }

    pub fn set_active_for_reading(&mut self, active_for_reading: bool) {
        self.state.active_for_reading = active_for_reading;
    }

    pub fn set_state(&mut self, state: WindowState) {
        self.state = state;
    }

    /// Offset of `address` relative to the window base, if the window's range contains it.
    /// Enable flags are not considered.
    pub fn relative(&self, address: u16) -> Option<usize> {
        let rel = usize::from(address.checked_sub(self.base)?);
        (rel < self.size).then_some(rel)
    }

    pub fn contains(&self, address: u16) -> bool {
        self.relative(address).is_some()
    }

    /// Shrink the window so it ends at the end of its store. Returns false if the offset is not
    /// inside the store at all.
    pub(crate) fn clamp_to_store(&mut self, store_len: usize) -> bool {
        if self.offset >= store_len {
            return false;
        }

        let remaining = store_len - self.offset;
        if self.size > remaining {
            log::warn!(
                "{} ({}) asks for {:#06X} bytes but {} only has {remaining:#06X} left from offset {:#06X}; clamping",
                self.id,
                self.name,
                self.size,
                self.store,
                self.offset
            );
            self.size = remaining;
        }

        true
    }

    pub(crate) fn seed_floating(&mut self, seed: u64) {
        if let WindowKind::Floating(bus) = &mut self.kind {
            bus.reseed(seed.wrapping_add(u64::from(self.id.0)));
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = self.initial_state;
        if let WindowKind::Floating(bus) = &mut self.kind {
            bus.restart();
        }
    }

    /// Read with side effects. Mirror chains are resolved by the caller; a mirror reaching this
    /// point reads its store directly, which is the same bytes its source shows.
    pub(crate) fn read(
        &mut self,
        rel: usize,
        store: &mut ByteStore,
        switches: &mut Vec<BankSwitch>,
    ) -> u8 {
        match &mut self.kind {
            WindowKind::Standard | WindowKind::Mirror { .. } => store.read(self.offset + rel),
            WindowKind::Unconnected { value } => *value,
            WindowKind::Floating(bus) => bus.next(),
            WindowKind::DeviceRegister(handlers) => {
                let Some(backing) = store.bytes_mut(self.offset, self.size) else {
                    return store.read(self.offset + rel);
                };
                let mut context = RegisterContext::new(backing, switches);
                (handlers.read)(rel, &mut context)
            }
        }
    }

    pub(crate) fn peek(&self, rel: usize, store: &ByteStore) -> u8 {
        match &self.kind {
            WindowKind::Standard | WindowKind::Mirror { .. } => store.read(self.offset + rel),
            WindowKind::Unconnected { value } => *value,
            WindowKind::Floating(bus) => bus.last_value(),
            WindowKind::DeviceRegister(handlers) => {
                let backing = store.bytes(self.offset, self.size).unwrap_or(&[]);
                (handlers.peek)(rel, backing)
            }
        }
    }

    /// Returns whether the write reached the store or a register handler.
    pub(crate) fn write(
        &mut self,
        rel: usize,
        value: u8,
        force: bool,
        store: &mut ByteStore,
        switches: &mut Vec<BankSwitch>,
    ) -> bool {
        match &mut self.kind {
            WindowKind::Standard => store.write(self.offset + rel, value, force),
            WindowKind::Mirror { .. } | WindowKind::Unconnected { .. } | WindowKind::Floating(..) => {
                false
            }
            WindowKind::DeviceRegister(handlers) => {
                if !store.is_writable(force) {
                    return false;
                }
                let Some(backing) = store.bytes_mut(self.offset, self.size) else {
                    return false;
                };
                let mut context = RegisterContext::new(backing, switches);
                (handlers.write)(rel, value, &mut context);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_addresses() {
        let window = AddressWindow::standard(WindowId(1), StoreId(0), 0x100, 0xA000, 0x2000);

        assert_eq!(None, window.relative(0x9FFF));
        assert_eq!(Some(0), window.relative(0xA000));
        assert_eq!(Some(0x1FFF), window.relative(0xBFFF));
        assert_eq!(None, window.relative(0xC000));
        assert_eq!(Some(0xBFFF), window.last_address());
    }

    #[test]
    fn window_at_top_of_address_space() {
        let window = AddressWindow::standard(WindowId(1), StoreId(0), 0, 0xFF00, 0x100);

        assert_eq!(Some(0xFF), window.relative(0xFFFF));
        assert_eq!(Some(0xFFFF), window.last_address());
    }

    #[test]
    fn clamp_to_store() {
        let mut window = AddressWindow::standard(WindowId(1), StoreId(0), 0x1000, 0x0000, 0x4000);
        assert!(window.clamp_to_store(0x2000));
        assert_eq!(0x1000, window.size());

        let mut window = AddressWindow::standard(WindowId(2), StoreId(0), 0x2000, 0x0000, 0x10);
        assert!(!window.clamp_to_store(0x2000));
    }

    #[test]
    fn modes() {
        assert_eq!(WindowMode::Readable, WindowState::READABLE.mode());
        assert_eq!(WindowMode::WriteOnly, WindowState::WRITE_ONLY.mode());
        assert_eq!(WindowMode::Inactive, WindowState::INACTIVE.mode());
        assert_eq!(WindowMode::Inactive, WindowState::new(false, true).mode());
        assert_eq!("write_only", WindowMode::WriteOnly.to_string());
    }

    #[test]
    fn inactive_for_reading_requires_active() {
        let mut window =
            AddressWindow::standard(WindowId(1), StoreId(0), 0, 0, 0x10).with_state(WindowState::new(false, true));
        assert!(!window.is_active_for_reading());

        window.set_active(true);
        assert!(window.is_active_for_reading());
        assert_eq!(WindowState::new(false, true), window.initial_state());
    }

    #[test]
    fn unconnected_ignores_writes() {
        let mut store = ByteStore::mutable(StoreId(0), 0x10, 0x00);
        let mut switches = Vec::new();
        let mut window = AddressWindow::unconnected(WindowId(1), StoreId(0), 0, 0, 0x10, 0xBF);

        assert!(!window.write(3, 0x12, false, &mut store, &mut switches));
        assert_eq!(0x00, store.read(3));
        for _ in 0..4 {
            assert_eq!(0xBF, window.read(3, &mut store, &mut switches));
        }
        assert_eq!(0xBF, window.peek(3, &store));
    }

    #[test]
    fn floating_peek_repeats_last_read() {
        let mut store = ByteStore::mutable(StoreId(0), 0x10, 0x00);
        let mut switches = Vec::new();
        let mut window = AddressWindow::floating(WindowId(1), StoreId(0), 0, 0, 0x10);
        window.seed_floating(7);

        let value = window.read(0, &mut store, &mut switches);
        assert_eq!(value, window.peek(0, &store));
        assert_eq!(value, window.peek(5, &store));

        assert!(!window.write(0, 0x12, true, &mut store, &mut switches));
        assert_eq!(0x00, store.read(0));
    }

    #[test]
    fn floating_restarts_from_seed() {
        let mut store = ByteStore::mutable(StoreId(0), 0x10, 0x00);
        let mut switches = Vec::new();
        let mut window = AddressWindow::floating(WindowId(1), StoreId(0), 0, 0, 0x10);
        window.seed_floating(99);

        let first: Vec<_> = (0..8).map(|_| window.read(0, &mut store, &mut switches)).collect();
        window.reset();
        let second: Vec<_> = (0..8).map(|_| window.read(0, &mut store, &mut switches)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn latch_registers_use_backing_store() {
        let mut store = ByteStore::mutable(StoreId(0), 0x20, 0x00);
        let mut switches = Vec::new();
        let mut window =
            AddressWindow::device(WindowId(1), StoreId(0), 0x10, 0xD000, 0x10, RegisterHandlers::latches());

        assert!(window.write(2, 0x7E, false, &mut store, &mut switches));
        assert_eq!(0x7E, store.read(0x12));
        assert_eq!(0x7E, window.read(2, &mut store, &mut switches));
        assert_eq!(0x7E, window.peek(2, &store));
        assert!(switches.is_empty());
    }

    #[test]
    fn register_writes_need_writable_store() {
        let mut store = ByteStore::read_mostly(StoreId(0), 0x10, 0x00);
        let mut switches = Vec::new();
        let mut window =
            AddressWindow::device(WindowId(1), StoreId(0), 0, 0xD000, 0x10, RegisterHandlers::latches());

        assert!(!window.write(0, 0x01, false, &mut store, &mut switches));
        assert_eq!(0x00, store.read(0));
    }

    #[test]
    fn register_handlers_queue_switches() {
        let mut store = ByteStore::mutable(StoreId(0), 0x10, 0x00);
        let mut switches = Vec::new();
        let handlers = RegisterHandlers::new(
            |_, _| 0x00,
            |_, value, context| {
                context.activate_window(WindowId(7), value & 1 != 0, true);
                context.select_space(SpaceId(2));
            },
            |_, _| 0x00,
        );
        let mut window = AddressWindow::device(WindowId(1), StoreId(0), 0, 0xD000, 0x10, handlers);

        window.write(0, 0x01, false, &mut store, &mut switches);
        assert_eq!(
            vec![
                BankSwitch::Window {
                    window: WindowId(7),
                    state: WindowState::READABLE,
                },
                BankSwitch::Space(SpaceId(2)),
            ],
            switches
        );
    }

    #[test]
    fn mirror_copies_source_geometry() {
        let source = AddressWindow::standard(WindowId(1), StoreId(4), 0x800, 0x0000, 0x800)
            .inactive();
        let mirror = AddressWindow::mirror_of(WindowId(2), &source, 0x0800);

        assert_eq!(StoreId(4), mirror.store());
        assert_eq!(0x800, mirror.offset());
        assert_eq!(0x800, mirror.size());
        assert_eq!(Some(WindowId(1)), mirror.mirror_source());
        assert_eq!(WindowMode::Readable, mirror.mode());
    }
}
