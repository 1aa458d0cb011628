use bankmem_proc_macros::{EnumDisplay, EnumFromStr, StrDeserialize, StrSerialize};
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use thiserror::Error;

/// Identifier of a [`ByteStore`], unique within one
/// [`BankedMemory`](crate::memory::BankedMemory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub u32);

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "store {}", self.0)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumDisplay,
    EnumFromStr,
    StrSerialize,
    StrDeserialize,
)]
pub enum StoreKind {
    /// RAM-like, writable by ordinary bus traffic.
    Mutable,
    /// ROM-like, only writable with the force flag.
    ReadMostly,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{len} bytes at offset {offset:#06X} do not fit in {store} ({size} bytes)")]
    DoesNotFit {
        store: StoreId,
        offset: usize,
        len: usize,
        size: usize,
    },
}

/// A fixed-length block of bytes owned by the memory engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteStore {
    id: StoreId,
    kind: StoreKind,
    name: String,
    contents: Vec<u8>,
    // Contents restored by reset
    defaults: Vec<u8>,
}

impl ByteStore {
    pub fn new(id: StoreId, kind: StoreKind, size: usize, fill: u8) -> Self {
        Self {
            id,
            kind,
            name: String::new(),
            contents: vec![fill; size],
            defaults: vec![fill; size],
        }
    }

    pub fn mutable(id: StoreId, size: usize, fill: u8) -> Self {
        Self::new(id, StoreKind::Mutable, size, fill)
    }

    pub fn read_mostly(id: StoreId, size: usize, fill: u8) -> Self {
        Self::new(id, StoreKind::ReadMostly, size, fill)
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn is_writable(&self, force: bool) -> bool {
        self.kind == StoreKind::Mutable || force
    }

    /// Read the byte at the given offset. Offsets past the end read as 0xFF, which callers never
    /// see in practice because windows are clamped to their store at construction.
    pub fn read(&self, offset: usize) -> u8 {
        self.contents.get(offset).copied().unwrap_or(0xFF)
    }

    /// Write a byte at the given offset. Returns whether the write landed: writes to a ReadMostly
    /// store are dropped unless `force` is set, and writes past the end are always dropped.
    pub fn write(&mut self, offset: usize, value: u8, force: bool) -> bool {
        if !self.is_writable(force) {
            return false;
        }

        match self.contents.get_mut(offset) {
            Some(byte) => {
                *byte = value;
                true
            }
            None => false,
        }
    }

    /// Copy an external image into the store starting at `offset`. Loading ignores the store
    /// kind since this is how ROM images are seeded.
    pub fn load(&mut self, bytes: &[u8], offset: usize) -> Result<(), StoreError> {
        let end = offset.checked_add(bytes.len()).filter(|&end| end <= self.contents.len());
        let Some(end) = end else {
            return Err(StoreError::DoesNotFit {
                store: self.id,
                offset,
                len: bytes.len(),
                size: self.contents.len(),
            });
        };

        self.contents[offset..end].copy_from_slice(bytes);

        log::debug!("loaded {} bytes into {} at offset {offset:#06X}", bytes.len(), self.id);

        Ok(())
    }

    /// Capture the current contents as the values that future resets restore.
    pub fn freeze_as_default(&mut self) {
        self.defaults.copy_from_slice(&self.contents);
    }

    pub fn reset(&mut self) {
        self.contents.copy_from_slice(&self.defaults);
    }

    /// Borrow a range of the raw contents, or `None` if the range is out of bounds.
    pub fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.contents.get(offset..offset.checked_add(len)?)
    }

    pub(crate) fn bytes_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        self.contents.get_mut(offset..offset.checked_add(len)?)
    }
}
