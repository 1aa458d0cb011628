use crate::memory::window::WindowId;
use bankmem_proc_macros::{EnumDisplay, EnumFromStr, StrDeserialize, StrSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    EnumDisplay,
    EnumFromStr,
    StrSerialize,
    StrDeserialize,
)]
pub enum StackGrowth {
    /// Pushes move from the top of the window toward its base (6502, Z80).
    #[default]
    Downward,
    Upward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub growth: StackGrowth,
    /// Whether the stack pointer addresses the next free slot (6502) rather than the last
    /// byte pushed (Z80).
    pub points_to_empty: bool,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            growth: StackGrowth::Downward,
            points_to_empty: true,
        }
    }
}

impl std::fmt::Display for StackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "growth={}, points_to_empty={}",
            self.growth, self.points_to_empty
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("no stack window is bound")]
    Unbound,
    #[error("stack in {window} is full ({capacity} bytes)")]
    Overflow { window: WindowId, capacity: usize },
    #[error("stack in {window} is empty")]
    Underflow { window: WindowId },
    #[error("stack {0} has been switched out")]
    WindowInactive(WindowId),
    #[error("stack position {position} is outside {window} ({capacity} bytes)")]
    PositionOutOfRange {
        window: WindowId,
        position: isize,
        capacity: usize,
    },
}

/// A cursor over one window. The stack owns no bytes; pushes and pops go through the bound
/// window like any other access, so the window has to stay switched in while the stack is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    window: WindowId,
    config: StackConfig,
    capacity: usize,
    depth: usize,
}

impl Stack {
    pub fn new(window: WindowId, capacity: usize, config: StackConfig) -> Self {
        Self {
            window,
            config,
            capacity,
            depth: 0,
        }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn config(&self) -> StackConfig {
        self.config
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    pub fn is_full(&self) -> bool {
        self.depth == self.capacity
    }

    // Window-relative offset of the nth byte pushed
    fn slot(&self, index: usize) -> usize {
        match self.config.growth {
            StackGrowth::Downward => self.capacity - 1 - index,
            StackGrowth::Upward => index,
        }
    }

    /// Reserve the next slot for a push and return its offset within the window.
    pub(crate) fn push_slot(&mut self) -> Result<usize, StackError> {
        if self.is_full() {
            return Err(StackError::Overflow {
                window: self.window,
                capacity: self.capacity,
            });
        }

        let slot = self.slot(self.depth);
        self.depth += 1;
        Ok(slot)
    }

    /// Release the top slot and return its offset within the window.
    pub(crate) fn pop_slot(&mut self) -> Result<usize, StackError> {
        if self.is_empty() {
            return Err(StackError::Underflow {
                window: self.window,
            });
        }

        self.depth -= 1;
        Ok(self.slot(self.depth))
    }

    /// The stack pointer as an offset from the window base. Can be -1 or `capacity` at the
    /// extremes, depending on growth direction and whether the pointer addresses the next free
    /// slot.
    pub fn position(&self) -> isize {
        let capacity = self.capacity as isize;
        let depth = self.depth as isize;
        match (self.config.growth, self.config.points_to_empty) {
            (StackGrowth::Downward, true) => capacity - 1 - depth,
            (StackGrowth::Downward, false) => capacity - depth,
            (StackGrowth::Upward, true) => depth,
            (StackGrowth::Upward, false) => depth - 1,
        }
    }

    /// Move the stack pointer, as when a CPU loads its stack pointer register directly.
    pub fn set_position(&mut self, position: isize) -> Result<(), StackError> {
        let capacity = self.capacity as isize;
        let depth = match (self.config.growth, self.config.points_to_empty) {
            (StackGrowth::Downward, true) => capacity - 1 - position,
            (StackGrowth::Downward, false) => capacity - position,
            (StackGrowth::Upward, true) => position,
            (StackGrowth::Upward, false) => position + 1,
        };

        if !(0..=capacity).contains(&depth) {
            return Err(StackError::PositionOutOfRange {
                window: self.window,
                position,
                capacity: self.capacity,
            });
        }

        self.depth = depth as usize;
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.depth = 0;
    }
}
