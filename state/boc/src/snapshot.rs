use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use state_dag::{Cell, CellId, CellKind, CellStore, ContentKind, Slice, StateKey, StoreLimits};

use crate::commitment::compute_hash;
use crate::error::SnapshotError;

pub type StateRoot = [u8; 32];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCell {
    pub id: u32,
    pub kind: CellKind,
    pub content: ContentKind,
    pub version: u32,
    pub payload: Vec<u8>,
    pub libraries: Vec<u8>,
    pub slice: Option<Slice>,
}

impl From<&Cell> for SnapshotCell {
    fn from(cell: &Cell) -> Self {
        Self {
            id: cell.id().index(),
            kind: cell.kind(),
            content: cell.content(),
            version: cell.version(),
            payload: cell.payload().to_vec(),
            libraries: cell.libraries().to_vec(),
            slice: cell.slice(),
        }
    }
}

impl SnapshotCell {
    fn to_cell(&self) -> Cell {
        Cell::new(CellId(self.id), self.kind, self.payload.clone())
            .with_content(self.content)
            .with_libraries(self.libraries.clone())
            .with_version(self.version)
            .with_slice(self.slice)
    }
}

/// Flattened "bag of cells" view of a [`CellStore`].
///
/// Cells appear in id order, references and roots in insertion order, bindings in key order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub cells: Vec<SnapshotCell>,
    pub references: Vec<(u32, u32)>,
    pub roots: Vec<u32>,
    pub bindings: Vec<(StateKey, u32)>,
    pub hash: Option<StateRoot>,
}

impl StateSnapshot {
    pub fn from_store(store: &CellStore) -> Self {
        Self {
            cells: store.cells().map(SnapshotCell::from).collect(),
            references: store
                .edges()
                .iter()
                .map(|(from, to)| (from.index(), to.index()))
                .collect(),
            roots: store.roots().iter().map(|id| id.index()).collect(),
            bindings: store
                .bindings()
                .map(|(key, id)| (key.clone(), id.index()))
                .collect(),
            hash: None,
        }
    }

    pub fn compute_hash(&self) -> StateRoot {
        compute_hash(self)
    }

    /// Same snapshot with `hash` filled in.
    pub fn sealed(mut self) -> Self {
        self.hash = Some(self.compute_hash());
        self
    }

    pub fn verify_hash(&self) -> Result<(), SnapshotError> {
        if let Some(expected) = self.hash {
            let computed = self.compute_hash();
            if computed != expected {
                return Err(SnapshotError::HashMismatch {
                    expected: hex::encode(expected),
                    computed: hex::encode(computed),
                });
            }
        }
        Ok(())
    }

    /// Cheap structural checks that need no store: ascending ids, edges/roots/bindings naming
    /// listed cells, sorted unique keys, in-range slices.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let mut ids = BTreeSet::new();
        let mut last: Option<u32> = None;
        for cell in &self.cells {
            if last.is_some_and(|prev| cell.id <= prev) {
                return Err(SnapshotError::Malformed(format!(
                    "cell id {} is not strictly ascending",
                    cell.id
                )));
            }
            if let Some(slice) = cell.slice {
                slice.check(cell.payload.len())?;
            }
            last = Some(cell.id);
            ids.insert(cell.id);
        }
        let missing = |id: &u32| !ids.contains(id);
        if let Some((from, to)) = self
            .references
            .iter()
            .find(|(from, to)| missing(from) || missing(to))
        {
            return Err(SnapshotError::Malformed(format!(
                "reference {from} -> {to} names a missing cell"
            )));
        }
        if let Some(root) = self.roots.iter().find(|id| missing(*id)) {
            return Err(SnapshotError::Malformed(format!("root {root} names a missing cell")));
        }
        for window in self.bindings.windows(2) {
            if window[0].0 >= window[1].0 {
                return Err(SnapshotError::Malformed("bindings are not sorted by key".into()));
            }
        }
        if let Some((key, id)) = self.bindings.iter().find(|(_, id)| missing(id)) {
            return Err(SnapshotError::Malformed(format!(
                "binding {key} names missing cell {id}"
            )));
        }
        Ok(())
    }

    /// Rebuild a live store. Re-runs cycle and depth checks under `limits`.
    pub fn to_store(&self, limits: StoreLimits) -> Result<CellStore, SnapshotError> {
        self.verify_hash()?;
        self.validate()?;
        let cells = self.cells.iter().map(SnapshotCell::to_cell).collect();
        let edges: Vec<(CellId, CellId)> = self
            .references
            .iter()
            .map(|(from, to)| (CellId(*from), CellId(*to)))
            .collect();
        let roots: Vec<CellId> = self.roots.iter().map(|id| CellId(*id)).collect();
        let bindings: Vec<(StateKey, CellId)> = self
            .bindings
            .iter()
            .map(|(key, id)| (key.clone(), CellId(*id)))
            .collect();
        Ok(CellStore::restore(limits, cells, &edges, &roots, &bindings)?)
    }

    pub fn cell(&self, id: u32) -> Option<&SnapshotCell> {
        self.cells
            .binary_search_by_key(&id, |cell| cell.id)
            .ok()
            .map(|index| &self.cells[index])
    }
}

/// Root of the current contents of `store`.
pub fn state_root(store: &CellStore) -> StateRoot {
    StateSnapshot::from_store(store).compute_hash()
}
