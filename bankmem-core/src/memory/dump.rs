use crate::memory::space::SpaceId;
use crate::memory::store::StoreId;
use crate::memory::window::{AddressWindow, WindowId, WindowMode};
use std::fmt::Formatter;

const BYTES_PER_LINE: usize = 16;

/// Bytes answered by one window, or by no window at all when `window` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpBlock {
    pub window: Option<WindowId>,
    pub name: String,
    pub start: u16,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryDump {
    pub blocks: Vec<DumpBlock>,
}

impl MemoryDump {
    pub(crate) fn build<'a>(
        from: u16,
        to: u16,
        resolve: impl Fn(u16) -> (Option<&'a AddressWindow>, u8),
    ) -> Self {
        let mut blocks: Vec<DumpBlock> = Vec::new();
        if to < from {
            return Self { blocks };
        }

        for address in from..=to {
            let (window, value) = resolve(address);
            let id = window.map(AddressWindow::id);
            match blocks.last_mut() {
                Some(block) if block.window == id => block.bytes.push(value),
                _ => blocks.push(DumpBlock {
                    window: id,
                    name: window.map(|w| w.name().to_owned()).unwrap_or_default(),
                    start: address,
                    bytes: vec![value],
                }),
            }
        }

        Self { blocks }
    }

    /// All dumped bytes in address order.
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.blocks.iter().flat_map(|block| block.bytes.iter().copied())
    }
}

impl std::fmt::Display for DumpBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.window {
            Some(window) => writeln!(f, "; {window} {}", self.name)?,
            None => writeln!(f, "; unmapped")?,
        }

        for (i, line) in self.bytes.chunks(BYTES_PER_LINE).enumerate() {
            let address = self.start.wrapping_add((i * BYTES_PER_LINE) as u16);
            write!(f, "{address:04X}:")?;
            for byte in line {
                write!(f, " {byte:02X}")?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

impl std::fmt::Display for MemoryDump {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for block in &self.blocks {
            write!(f, "{block}")?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSummary {
    pub id: WindowId,
    pub name: String,
    pub kind: &'static str,
    pub base: u16,
    pub size: usize,
    pub store: StoreId,
    pub offset: usize,
    pub mode: WindowMode,
}

impl WindowSummary {
    fn new(window: &AddressWindow) -> Self {
        Self {
            id: window.id(),
            name: window.name().to_owned(),
            kind: window.kind().name(),
            base: window.base(),
            size: window.size(),
            store: window.store(),
            offset: window.offset(),
            mode: window.mode(),
        }
    }
}

impl std::fmt::Display for WindowSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let end = u32::from(self.base) + (self.size as u32).saturating_sub(1);
        write!(
            f,
            "{:<10} {:<16} {:<12} {:04X}-{end:04X} {} @ {:#06X} [{}]",
            self.id.to_string(),
            self.name,
            self.kind,
            self.base,
            self.store,
            self.offset,
            self.mode
        )
    }
}

/// Windows of one space in resolution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceStructure {
    pub space: SpaceId,
    pub name: String,
    pub windows: Vec<WindowSummary>,
}

impl SpaceStructure {
    pub(crate) fn build<'a>(
        space: SpaceId,
        name: String,
        windows: impl Iterator<Item = &'a AddressWindow>,
    ) -> Self {
        Self {
            space,
            name,
            windows: windows.map(WindowSummary::new).collect(),
        }
    }
}

impl std::fmt::Display for SpaceStructure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} {}", self.space, self.name)?;
        for window in &self.windows {
            writeln!(f, "  {window}")?;
        }

        Ok(())
    }
}
