//! Address-space engine for emulated 8-bit machines: byte stores, relocatable windows onto them,
//! per-bus-master address spaces, and the bank switching that ties them together.

pub mod config;
pub mod memory;

pub use config::{ConfigError, LayoutConfig, MemoryConfig};
pub use memory::dump::{MemoryDump, SpaceStructure};
pub use memory::expansion::{Expansion, ExpansionError, ExpansionId};
pub use memory::layout::{CoherenceError, MemoryLayout};
pub use memory::space::{AddressSpace, SpaceId};
pub use memory::stack::{StackConfig, StackError, StackGrowth};
pub use memory::store::{ByteStore, StoreError, StoreId, StoreKind};
pub use memory::window::{
    AddressWindow, RegisterContext, RegisterHandlers, WindowId, WindowKind, WindowMode,
    WindowState,
};
pub use memory::{BankedMemory, LoadError};

/// Build an engine straight from a parsed layout file.
pub fn build_memory(config: &LayoutConfig) -> Result<BankedMemory, ConfigError> {
    let layout = MemoryLayout::from_config(config)?;
    Ok(BankedMemory::new(layout, config.memory)?)
}
