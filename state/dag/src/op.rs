use serde::{Deserialize, Serialize};

use crate::cell::{CellId, CellKind};
use crate::key::StateKey;

/// The closed vocabulary of store mutations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    Add { kind: CellKind, payload: Vec<u8> },
    Remove { id: CellId },
    /// Bind an external lookup key to a cell.
    Update { key: StateKey, id: CellId },
    SetCode { id: CellId, code: Vec<u8> },
    SetData { id: CellId, data: Vec<u8> },
    SetLibraries { id: CellId, libraries: Vec<u8> },
    SetVersion { id: CellId, version: u32 },
    AddReference { from: CellId, to: CellId },
    RemoveReference { from: CellId, to: CellId },
    SetRoot { id: CellId },
    Custom { tag: u8, payload: Vec<u8> },
}

impl OpCode {
    pub fn add(payload: impl Into<Vec<u8>>) -> Self {
        OpCode::Add {
            kind: CellKind::Ordinary,
            payload: payload.into(),
        }
    }

    #[inline]
    pub fn to_u8(&self) -> u8 {
        match self {
            OpCode::Add { .. } => 0x01,
            OpCode::Remove { .. } => 0x02,
            OpCode::Update { .. } => 0x03,
            OpCode::SetCode { .. } => 0x04,
            OpCode::SetData { .. } => 0x05,
            OpCode::SetLibraries { .. } => 0x06,
            OpCode::SetVersion { .. } => 0x07,
            OpCode::AddReference { .. } => 0x08,
            OpCode::RemoveReference { .. } => 0x09,
            OpCode::SetRoot { .. } => 0x0a,
            OpCode::Custom { .. } => 0xff,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Add { .. } => "add",
            OpCode::Remove { .. } => "remove",
            OpCode::Update { .. } => "update",
            OpCode::SetCode { .. } => "set_code",
            OpCode::SetData { .. } => "set_data",
            OpCode::SetLibraries { .. } => "set_libraries",
            OpCode::SetVersion { .. } => "set_version",
            OpCode::AddReference { .. } => "add_reference",
            OpCode::RemoveReference { .. } => "remove_reference",
            OpCode::SetRoot { .. } => "set_root",
            OpCode::Custom { .. } => "custom",
        }
    }

    /// The existing cell whose own contents or outgoing edges this op rewrites, if any.
    pub fn mutated_cell(&self) -> Option<CellId> {
        match self {
            OpCode::Remove { id }
            | OpCode::SetCode { id, .. }
            | OpCode::SetData { id, .. }
            | OpCode::SetLibraries { id, .. }
            | OpCode::SetVersion { id, .. } => Some(*id),
            OpCode::AddReference { from, .. } | OpCode::RemoveReference { from, .. } => {
                Some(*from)
            }
            OpCode::Add { .. }
            | OpCode::Update { .. }
            | OpCode::SetRoot { .. }
            | OpCode::Custom { .. } => None,
        }
    }
}

/// Identity of whatever an applied op created or touched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpOutcome {
    Added(CellId),
    Removed(CellId),
    Bound { key: StateKey, id: CellId },
    Rewritten(CellId),
    Linked { from: CellId, to: CellId },
    Unlinked { from: CellId, to: CellId },
    Rooted(CellId),
    Custom { tag: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_tags_are_distinct() {
        let ops = vec![
            OpCode::add(vec![1]),
            OpCode::Remove { id: CellId(0) },
            OpCode::Update {
                key: StateKey::from_bytes(b"k"),
                id: CellId(0),
            },
            OpCode::SetCode {
                id: CellId(0),
                code: vec![],
            },
            OpCode::SetData {
                id: CellId(0),
                data: vec![],
            },
            OpCode::SetLibraries {
                id: CellId(0),
                libraries: vec![],
            },
            OpCode::SetVersion {
                id: CellId(0),
                version: 1,
            },
            OpCode::AddReference {
                from: CellId(0),
                to: CellId(1),
            },
            OpCode::RemoveReference {
                from: CellId(0),
                to: CellId(1),
            },
            OpCode::SetRoot { id: CellId(0) },
            OpCode::Custom {
                tag: 1,
                payload: vec![],
            },
        ];
        let mut tags: Vec<u8> = ops.iter().map(OpCode::to_u8).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), ops.len());
    }

    #[test]
    fn mutated_cell_tracks_edge_source() {
        let op = OpCode::AddReference {
            from: CellId(3),
            to: CellId(4),
        };
        assert_eq!(op.mutated_cell(), Some(CellId(3)));
        assert_eq!(OpCode::SetRoot { id: CellId(3) }.mutated_cell(), None);
    }
}
