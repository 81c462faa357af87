use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CellError;

/// Stable arena index of a cell. Allocated monotonically, never handed out twice by one store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub u32);

impl CellId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for CellId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    Ordinary,
    MerkleProof,
}

impl CellKind {
    pub fn to_byte(self) -> u8 {
        match self {
            CellKind::Ordinary => 0,
            CellKind::MerkleProof => 1,
        }
    }

    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(CellKind::Ordinary),
            1 => Some(CellKind::MerkleProof),
            _ => None,
        }
    }
}

/// Whether the payload was last written as code or as data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    #[default]
    Data,
    Code,
}

impl ContentKind {
    pub fn to_byte(self) -> u8 {
        match self {
            ContentKind::Data => 0,
            ContentKind::Code => 1,
        }
    }

    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(ContentKind::Data),
            1 => Some(ContentKind::Code),
            _ => None,
        }
    }
}

/// Byte bounds of a partial view over a cell payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slice {
    pub start: u64,
    pub end: u64,
}

impl Slice {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn check(&self, payload_len: usize) -> Result<(), CellError> {
        if self.start > self.end || self.end > payload_len as u64 {
            return Err(CellError::InvalidSlice {
                start: self.start,
                end: self.end,
                len: payload_len,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    id: CellId,
    kind: CellKind,
    content: ContentKind,
    payload: Vec<u8>,
    libraries: Vec<u8>,
    version: u32,
    references: Vec<CellId>,
    slice: Option<Slice>,
}

impl Cell {
    pub fn new(id: CellId, kind: CellKind, payload: Vec<u8>) -> Self {
        Self {
            id,
            kind,
            content: ContentKind::Data,
            payload,
            libraries: Vec::new(),
            version: 0,
            references: Vec::new(),
            slice: None,
        }
    }

    pub fn with_content(mut self, content: ContentKind) -> Self {
        self.content = content;
        self
    }

    pub fn with_libraries(mut self, libraries: Vec<u8>) -> Self {
        self.libraries = libraries;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_slice(mut self, slice: Option<Slice>) -> Self {
        self.slice = slice;
        self
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn content(&self) -> ContentKind {
        self.content
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn libraries(&self) -> &[u8] {
        &self.libraries
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Outgoing edges, in the order they were added.
    pub fn references(&self) -> &[CellId] {
        &self.references
    }

    pub fn slice(&self) -> Option<Slice> {
        self.slice
    }

    /// The payload bytes visible through the slice, or the whole payload when unsliced.
    pub fn view(&self) -> &[u8] {
        match self.slice {
            Some(slice) if slice.check(self.payload.len()).is_ok() => {
                &self.payload[slice.start as usize..slice.end as usize]
            }
            Some(_) => &[],
            None => &self.payload,
        }
    }

    pub(crate) fn replace_payload(&mut self, payload: Vec<u8>, content: ContentKind) {
        self.payload = payload;
        self.content = content;
        self.slice = None;
    }

    pub(crate) fn set_libraries(&mut self, libraries: Vec<u8>) {
        self.libraries = libraries;
    }

    pub(crate) fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    pub(crate) fn set_slice(&mut self, slice: Option<Slice>) {
        self.slice = slice;
    }

    pub(crate) fn push_reference(&mut self, to: CellId) {
        self.references.push(to);
    }

    pub(crate) fn clear_references(&mut self) {
        self.references.clear();
    }

    /// Drops the most recently added edge to `to`.
    pub(crate) fn pop_reference(&mut self, to: CellId) -> bool {
        match self.references.iter().rposition(|r| *r == to) {
            Some(pos) => {
                self.references.remove(pos);
                true
            }
            None => false,
        }
    }
}
