use crate::memory::layout::CoherenceError;
use crate::memory::space::SpaceId;
use crate::memory::stack::{StackConfig, StackGrowth};
use crate::memory::store::{StoreId, StoreKind};
use crate::memory::window::{WindowId, WindowState};
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use thiserror::Error;

/// Engine-wide settings that are not part of any particular machine's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Fill byte for stores before any image is loaded, and the value returned by reads that
    /// no window answers.
    pub default_value: u8,
    /// Seed for floating-bus windows. Each window mixes in its own id.
    pub floating_seed: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_value: 0xFF,
            floating_seed: 0x5EED_CAFE,
        }
    }
}

impl std::fmt::Display for MemoryConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "default_value={:#04X}, floating_seed={:#X}",
            self.default_value, self.floating_seed
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{window} is a {kind} window and needs a `{field}` field")]
    MissingField {
        window: WindowId,
        kind: WindowKindConfig,
        field: &'static str,
    },
    #[error("invalid memory layout: {0}")]
    Incoherent(#[from] CoherenceError),
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub id: StoreId,
    pub kind: StoreKind,
    pub size: usize,
    #[serde(default)]
    pub name: String,
    /// Overrides [`MemoryConfig::default_value`] for this store.
    pub fill: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKindConfig {
    #[default]
    Standard,
    Mirror,
    Unconnected,
    Floating,
}

impl std::fmt::Display for WindowKindConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Standard => "standard",
            Self::Mirror => "mirror",
            Self::Unconnected => "unconnected",
            Self::Floating => "floating",
        };
        f.write_str(s)
    }
}

/// One window of a layout file. Which fields are required depends on `kind`: mirrors need
/// `source`, unconnected windows need `value`, and everything except mirrors needs `store` and
/// `size`. Device-register windows carry code and can only be added programmatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub id: WindowId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: WindowKindConfig,
    pub store: Option<StoreId>,
    #[serde(default)]
    pub offset: usize,
    pub base: u16,
    pub size: Option<usize>,
    pub source: Option<WindowId>,
    pub value: Option<u8>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub active_for_reading: bool,
}

impl WindowConfig {
    pub fn state(&self) -> WindowState {
        WindowState::new(self.active, self.active_for_reading)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceConfig {
    pub id: SpaceId,
    #[serde(default)]
    pub name: String,
    pub windows: Vec<WindowId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackBindingConfig {
    pub window: WindowId,
    #[serde(default)]
    pub growth: StackGrowth,
    #[serde(default = "default_true")]
    pub points_to_empty: bool,
}

impl StackBindingConfig {
    pub fn stack_config(&self) -> StackConfig {
        StackConfig {
            growth: self.growth,
            points_to_empty: self.points_to_empty,
        }
    }
}

/// A machine's memory layout as written in a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
    #[serde(default)]
    pub windows: Vec<WindowConfig>,
    #[serde(default)]
    pub spaces: Vec<SpaceConfig>,
    pub primary_space: Option<SpaceId>,
    pub stack: Option<StackBindingConfig>,
}

impl std::fmt::Display for LayoutConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "memory: {}", self.memory)?;
        writeln!(f, "stores: {}", self.stores.len())?;
        writeln!(f, "windows: {}", self.windows.len())?;
        writeln!(f, "spaces: {}", self.spaces.len())?;
        match self.primary_space {
            Some(space) => writeln!(f, "primary_space: {space}")?,
            None => writeln!(f, "primary_space: <first declared>")?,
        }
        match &self.stack {
            Some(stack) => writeln!(f, "stack: {} ({})", stack.window, stack.stack_config())?,
            None => writeln!(f, "stack: <None>")?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C64_LAYOUT: &str = r#"
        primary_space = 0

        [memory]
        default_value = 0x00

        [[stores]]
        id = 0
        kind = "mutable"
        size = 0x10000
        name = "RAM"

        [[stores]]
        id = 1
        kind = "read_mostly"
        size = 0x2000
        name = "BASIC"

        [[windows]]
        id = 0
        name = "RAM"
        store = 0
        base = 0x0000
        size = 0x10000

        [[windows]]
        id = 1
        name = "BASIC ROM"
        store = 1
        base = 0xA000
        size = 0x2000

        [[windows]]
        id = 2
        kind = "mirror"
        source = 1
        base = 0xE000
        active = false

        [[windows]]
        id = 3
        kind = "unconnected"
        store = 0
        base = 0xDE00
        size = 0x100
        value = 0xBF

        [[spaces]]
        id = 0
        name = "CPU"
        windows = [3, 1, 0]

        [stack]
        window = 0
    "#;

    #[test]
    fn parse_layout() {
        let config: LayoutConfig = toml::from_str(C64_LAYOUT).unwrap();

        assert_eq!(0x00, config.memory.default_value);
        assert_eq!(MemoryConfig::default().floating_seed, config.memory.floating_seed);

        assert_eq!(2, config.stores.len());
        assert_eq!(StoreKind::ReadMostly, config.stores[1].kind);
        assert_eq!(None, config.stores[1].fill);

        assert_eq!(4, config.windows.len());
        assert_eq!(WindowKindConfig::Standard, config.windows[0].kind);
        assert_eq!(WindowState::READABLE, config.windows[0].state());
        assert_eq!(WindowKindConfig::Mirror, config.windows[2].kind);
        assert_eq!(Some(WindowId(1)), config.windows[2].source);
        assert_eq!(WindowState::new(false, true), config.windows[2].state());
        assert_eq!(Some(0xBF), config.windows[3].value);

        assert_eq!(vec![WindowId(3), WindowId(1), WindowId(0)], config.spaces[0].windows);
        assert_eq!(Some(SpaceId(0)), config.primary_space);

        let stack = config.stack.unwrap();
        assert_eq!(WindowId(0), stack.window);
        assert_eq!(StackConfig::default(), stack.stack_config());
    }

    #[test]
    fn stack_growth_from_string() {
        let config: StackBindingConfig =
            toml::from_str("window = 4\ngrowth = \"upward\"\npoints_to_empty = false").unwrap();

        assert_eq!(StackGrowth::Upward, config.growth);
        assert!(!config.points_to_empty);
    }

    #[test]
    fn unknown_store_kind_is_rejected() {
        let result = toml::from_str::<StoreConfig>("id = 0\nkind = \"flash\"\nsize = 16");
        assert!(result.is_err());
    }

    #[test]
    fn empty_layout_uses_defaults() {
        let config: LayoutConfig = toml::from_str("").unwrap();
        assert_eq!(LayoutConfig::default(), config);
    }
}
