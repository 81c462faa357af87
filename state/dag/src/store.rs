//! Arena of cells with reference edges.
//!
//! Cells are addressed by [`CellId`] only; edges are plain data held both in a global
//! insertion-ordered list and in each cell's `references`. Every mutation validates all of its
//! preconditions before touching the arena, so a failed call leaves the store exactly as it was.
//!
//! Graph walks use explicit stacks, never recursion, so path length is bounded by
//! [`StoreLimits::max_depth`] alone.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cell::{Cell, CellId, CellKind, ContentKind, Slice};
use crate::error::CellError;
use crate::key::StateKey;
use crate::op::{OpCode, OpOutcome};

pub const DEFAULT_MAX_DEPTH: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLimits {
    /// Longest permitted reference path, counted in edges.
    pub max_depth: usize,
    pub max_cells: Option<usize>,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_cells: None,
        }
    }
}

/// Extension point for [`OpCode::Custom`].
pub trait CustomOpHandler {
    fn apply(
        &self,
        tag: u8,
        payload: &[u8],
        store: &mut CellStore,
    ) -> Result<OpOutcome, CellError>;
}

/// Handler used by [`CellStore::apply`]: every custom op is refused.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectCustom;

impl CustomOpHandler for RejectCustom {
    fn apply(&self, _tag: u8, _payload: &[u8], _store: &mut CellStore) -> Result<OpOutcome, CellError> {
        Err(CellError::InvalidOperation("no handler for custom op"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellStore {
    cells: BTreeMap<CellId, Cell>,
    edges: Vec<(CellId, CellId)>,
    roots: Vec<CellId>,
    bindings: BTreeMap<StateKey, CellId>,
    /// Longest path ending at each cell.
    depth_into: BTreeMap<CellId, usize>,
    next_id: u32,
    limits: StoreLimits,
}

impl Default for CellStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

impl CellStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            cells: BTreeMap::new(),
            edges: Vec::new(),
            roots: Vec::new(),
            bindings: BTreeMap::new(),
            depth_into: BTreeMap::new(),
            next_id: 0,
            limits,
        }
    }

    /// Rebuild a store from flattened parts, re-checking every invariant on the way in.
    ///
    /// Cells must be given in ascending id order; any references they carry are ignored in
    /// favour of `edges`. Cycles and depth are checked in one topological pass over the whole
    /// graph rather than edge by edge.
    pub fn restore(
        limits: StoreLimits,
        cells: Vec<Cell>,
        edges: &[(CellId, CellId)],
        roots: &[CellId],
        bindings: &[(StateKey, CellId)],
    ) -> Result<Self, CellError> {
        let mut store = Self::new(limits);
        if let Some(max) = limits.max_cells {
            if cells.len() > max {
                return Err(CellError::InvalidOperation("store is full"));
            }
        }
        for mut cell in cells {
            let id = cell.id();
            if id.0 < store.next_id {
                return Err(CellError::InvalidOperation("cell ids must be strictly ascending"));
            }
            if let Some(slice) = cell.slice() {
                slice.check(cell.payload().len())?;
            }
            cell.clear_references();
            store.cells.insert(id, cell);
            store.depth_into.insert(id, 0);
            store.next_id = id
                .0
                .checked_add(1)
                .ok_or(CellError::InvalidOperation("cell id space exhausted"))?;
        }
        for &(from, to) in edges {
            if !store.contains(from) {
                return Err(CellError::NotFound(from));
            }
            if !store.contains(to) {
                return Err(CellError::NotFound(to));
            }
            store.link(from, to);
        }
        store.depth_into = store.depth_profile()?;
        store.check_depth(store.depth())?;
        for &id in roots {
            store.set_root(id)?;
        }
        for (key, id) in bindings {
            if store.bindings.contains_key(key) {
                return Err(CellError::InvalidOperation("duplicate state key"));
            }
            store.bind(key.clone(), *id)?;
        }
        Ok(store)
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The id the next inserted cell will receive.
    pub fn next_id(&self) -> CellId {
        CellId(self.next_id)
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.cells.contains_key(&id)
    }

    pub fn get(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    /// Cells in insertion (id) order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> &[(CellId, CellId)] {
        &self.edges
    }

    pub fn roots(&self) -> &[CellId] {
        &self.roots
    }

    pub fn is_root(&self, id: CellId) -> bool {
        self.roots.contains(&id)
    }

    pub fn lookup(&self, key: &StateKey) -> Option<CellId> {
        self.bindings.get(key).copied()
    }

    /// Key bindings ordered by key.
    pub fn bindings(&self) -> impl Iterator<Item = (&StateKey, CellId)> {
        self.bindings.iter().map(|(key, id)| (key, *id))
    }

    pub fn apply(&mut self, op: &OpCode) -> Result<OpOutcome, CellError> {
        self.apply_with(op, &RejectCustom)
    }

    pub fn apply_with<H>(&mut self, op: &OpCode, handler: &H) -> Result<OpOutcome, CellError>
    where
        H: CustomOpHandler + ?Sized,
    {
        let result = match op {
            OpCode::Add { kind, payload } => self.add_cell(payload.clone(), *kind).map(OpOutcome::Added),
            OpCode::Remove { id } => self.remove_cell(*id).map(|_| OpOutcome::Removed(*id)),
            OpCode::Update { key, id } => self.bind(key.clone(), *id).map(|_| OpOutcome::Bound {
                key: key.clone(),
                id: *id,
            }),
            OpCode::SetCode { id, code } => self
                .set_code(*id, code.clone())
                .map(|_| OpOutcome::Rewritten(*id)),
            OpCode::SetData { id, data } => self
                .set_data(*id, data.clone())
                .map(|_| OpOutcome::Rewritten(*id)),
            OpCode::SetLibraries { id, libraries } => self
                .set_libraries(*id, libraries.clone())
                .map(|_| OpOutcome::Rewritten(*id)),
            OpCode::SetVersion { id, version } => self
                .set_version(*id, *version)
                .map(|_| OpOutcome::Rewritten(*id)),
            OpCode::AddReference { from, to } => self
                .add_reference(*from, *to)
                .map(|_| OpOutcome::Linked { from: *from, to: *to }),
            OpCode::RemoveReference { from, to } => self
                .remove_reference(*from, *to)
                .map(|_| OpOutcome::Unlinked { from: *from, to: *to }),
            OpCode::SetRoot { id } => self.set_root(*id).map(|_| OpOutcome::Rooted(*id)),
            OpCode::Custom { tag, payload } => {
                let checkpoint = self.clone();
                let outcome = handler.apply(*tag, payload, self);
                if outcome.is_err() {
                    *self = checkpoint;
                }
                outcome
            }
        };
        match &result {
            Ok(outcome) => debug!(op = op.name(), ?outcome, "applied cell op"),
            Err(err) => debug!(op = op.name(), %err, "rejected cell op"),
        }
        result
    }

    /// Apply a batch as one unit: either every op lands or none does.
    pub fn apply_all<H>(&mut self, ops: &[OpCode], handler: &H) -> Result<Vec<OpOutcome>, CellError>
    where
        H: CustomOpHandler + ?Sized,
    {
        let checkpoint = self.clone();
        let mut outcomes = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            match self.apply_with(op, handler) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    debug!(index, %err, "op batch aborted, restoring store");
                    *self = checkpoint;
                    return Err(err);
                }
            }
        }
        Ok(outcomes)
    }

    pub fn add_cell(&mut self, payload: Vec<u8>, kind: CellKind) -> Result<CellId, CellError> {
        if let Some(max) = self.limits.max_cells {
            if self.cells.len() >= max {
                return Err(CellError::InvalidOperation("store is full"));
            }
        }
        let id = CellId(self.next_id);
        let next = self
            .next_id
            .checked_add(1)
            .ok_or(CellError::InvalidOperation("cell id space exhausted"))?;
        self.cells.insert(id, Cell::new(id, kind, payload));
        self.depth_into.insert(id, 0);
        self.next_id = next;
        Ok(id)
    }

    pub fn set_data(&mut self, id: CellId, data: Vec<u8>) -> Result<(), CellError> {
        self.ordinary_mut(id)?.replace_payload(data, ContentKind::Data);
        Ok(())
    }

    pub fn set_code(&mut self, id: CellId, code: Vec<u8>) -> Result<(), CellError> {
        self.ordinary_mut(id)?.replace_payload(code, ContentKind::Code);
        Ok(())
    }

    pub fn set_libraries(&mut self, id: CellId, libraries: Vec<u8>) -> Result<(), CellError> {
        self.ordinary_mut(id)?.set_libraries(libraries);
        Ok(())
    }

    pub fn set_version(&mut self, id: CellId, version: u32) -> Result<(), CellError> {
        self.ordinary_mut(id)?.set_version(version);
        Ok(())
    }

    pub fn set_slice(&mut self, id: CellId, slice: Option<Slice>) -> Result<(), CellError> {
        let cell = self.cells.get_mut(&id).ok_or(CellError::NotFound(id))?;
        if let Some(slice) = slice {
            slice.check(cell.payload().len())?;
        }
        cell.set_slice(slice);
        Ok(())
    }

    pub fn add_reference(&mut self, from: CellId, to: CellId) -> Result<(), CellError> {
        if !self.contains(from) {
            return Err(CellError::NotFound(from));
        }
        if !self.contains(to) {
            return Err(CellError::NotFound(to));
        }
        if from == to || self.reaches(to, from) {
            return Err(CellError::CycleDetected { from, to });
        }
        let depth = self
            .longest_path_into(from)
            .saturating_add(1)
            .saturating_add(self.height(to));
        self.check_depth(depth)?;
        self.link(from, to);

        let mut pending = vec![(to, self.longest_path_into(from) + 1)];
        while let Some((id, depth)) = pending.pop() {
            let slot = self.depth_into.entry(id).or_insert(0);
            if depth <= *slot {
                continue;
            }
            *slot = depth;
            pending.extend(self.children(id).iter().map(|child| (*child, depth + 1)));
        }
        Ok(())
    }

    pub fn remove_reference(&mut self, from: CellId, to: CellId) -> Result<(), CellError> {
        let position = self
            .edges
            .iter()
            .rposition(|edge| *edge == (from, to))
            .ok_or(CellError::ReferenceNotFound { from, to })?;
        self.edges.remove(position);
        if let Some(cell) = self.cells.get_mut(&from) {
            cell.pop_reference(to);
        }
        self.depth_into = self.longest_paths().0;
        Ok(())
    }

    pub fn remove_cell(&mut self, id: CellId) -> Result<Cell, CellError> {
        if !self.contains(id) {
            return Err(CellError::NotFound(id));
        }
        if self.is_root(id) {
            return Err(CellError::InvalidOperation("cell is a root"));
        }
        if self.edges.iter().any(|(_, to)| *to == id) {
            return Err(CellError::InvalidOperation("cell is still referenced"));
        }
        if self.bindings.values().any(|bound| *bound == id) {
            return Err(CellError::InvalidOperation("cell is bound to a state key"));
        }
        self.edges.retain(|(from, _)| *from != id);
        let cell = self.cells.remove(&id).ok_or(CellError::NotFound(id))?;
        self.depth_into = self.longest_paths().0;
        Ok(cell)
    }

    pub fn set_root(&mut self, id: CellId) -> Result<(), CellError> {
        if id.0 >= self.next_id {
            return Err(CellError::IndexOutOfBounds(id));
        }
        if !self.contains(id) {
            return Err(CellError::NotFound(id));
        }
        self.roots.push(id);
        Ok(())
    }

    pub fn bind(&mut self, key: StateKey, id: CellId) -> Result<(), CellError> {
        if !self.contains(id) {
            return Err(CellError::NotFound(id));
        }
        self.bindings.insert(key, id);
        Ok(())
    }

    /// Longest reference path anywhere in the store, counted in edges.
    pub fn depth(&self) -> usize {
        self.depth_into.values().copied().max().unwrap_or(0)
    }

    /// Longest path starting at `id`.
    pub fn height(&self, id: CellId) -> usize {
        let mut heights: HashMap<CellId, usize> = HashMap::new();
        let mut open = HashSet::from([id]);
        let mut stack = vec![(id, 0usize)];
        while let Some(&(current, next)) = stack.last() {
            let children = self.children(current);
            if let Some(child) = children.get(next) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if !heights.contains_key(child) && open.insert(*child) {
                    stack.push((*child, 0));
                }
                continue;
            }
            let height = children
                .iter()
                .filter_map(|child| heights.get(child))
                .map(|height| height + 1)
                .max()
                .unwrap_or(0);
            heights.insert(current, height);
            open.remove(&current);
            stack.pop();
        }
        heights.get(&id).copied().unwrap_or(0)
    }

    /// Longest path ending at `id`.
    pub fn longest_path_into(&self, id: CellId) -> usize {
        self.depth_into.get(&id).copied().unwrap_or(0)
    }

    /// Whether `target` is reachable from `start` by following references.
    pub fn reaches(&self, start: CellId, target: CellId) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(cell) = self.cells.get(&current) {
                stack.extend(cell.references().iter().copied());
            }
        }
        false
    }

    /// Full structural audit: edges and roots name live cells, per-cell references agree with
    /// the edge list, the graph is acyclic, and depth is within limits.
    pub fn check_invariants(&self) -> Result<(), CellError> {
        let mut derived: BTreeMap<CellId, Vec<CellId>> = BTreeMap::new();
        for &(from, to) in &self.edges {
            if !self.contains(from) {
                return Err(CellError::NotFound(from));
            }
            if !self.contains(to) {
                return Err(CellError::NotFound(to));
            }
            derived.entry(from).or_default().push(to);
        }
        for cell in self.cells.values() {
            let expected = derived.get(&cell.id()).map(Vec::as_slice).unwrap_or(&[]);
            if cell.references() != expected {
                return Err(CellError::InvalidOperation("cell references disagree with edge list"));
            }
        }
        for root in &self.roots {
            if !self.contains(*root) {
                return Err(CellError::NotFound(*root));
            }
        }
        for id in self.bindings.values() {
            if !self.contains(*id) {
                return Err(CellError::NotFound(*id));
            }
        }
        let profile = self.depth_profile()?;
        if profile != self.depth_into {
            return Err(CellError::InvalidOperation("cached depths disagree with edge list"));
        }
        self.check_depth(profile.values().copied().max().unwrap_or(0))
    }

    fn ordinary_mut(&mut self, id: CellId) -> Result<&mut Cell, CellError> {
        let cell = self.cells.get_mut(&id).ok_or(CellError::NotFound(id))?;
        if cell.kind() != CellKind::Ordinary {
            return Err(CellError::InvalidOperation("merkle proof cells are immutable"));
        }
        Ok(cell)
    }

    fn children(&self, id: CellId) -> &[CellId] {
        self.cells.get(&id).map(Cell::references).unwrap_or(&[])
    }

    fn link(&mut self, from: CellId, to: CellId) {
        self.edges.push((from, to));
        if let Some(cell) = self.cells.get_mut(&from) {
            cell.push_reference(to);
        }
    }

    fn check_depth(&self, depth: usize) -> Result<(), CellError> {
        if depth > self.limits.max_depth {
            return Err(CellError::MaxDepthExceeded {
                depth,
                max: self.limits.max_depth,
            });
        }
        Ok(())
    }

    /// Longest path ending at every cell, by Kahn's algorithm over the cell references.
    /// Fails with the first edge whose source never became ready, which lies on or below a cycle.
    fn depth_profile(&self) -> Result<BTreeMap<CellId, usize>, CellError> {
        let (profile, blocked) = self.longest_paths();
        if blocked.is_empty() {
            return Ok(profile);
        }
        let (from, to) = self
            .edges
            .iter()
            .copied()
            .find(|(from, _)| blocked.contains(from))
            .ok_or(CellError::InvalidOperation("reference graph is cyclic"))?;
        Err(CellError::CycleDetected { from, to })
    }

    /// Longest paths for every cell Kahn's algorithm reaches, and the cells it never reaches.
    /// On an acyclic store the second set is empty.
    fn longest_paths(&self) -> (BTreeMap<CellId, usize>, BTreeSet<CellId>) {
        let mut indegree: BTreeMap<CellId, usize> = self.cells.keys().map(|id| (*id, 0)).collect();
        for cell in self.cells.values() {
            for child in cell.references() {
                if let Some(count) = indegree.get_mut(child) {
                    *count += 1;
                }
            }
        }
        let mut ready: Vec<CellId> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut profile: BTreeMap<CellId, usize> = self.cells.keys().map(|id| (*id, 0)).collect();
        while let Some(id) = ready.pop() {
            let here = profile.get(&id).copied().unwrap_or(0);
            for child in self.children(id) {
                if let Some(depth) = profile.get_mut(child) {
                    *depth = (*depth).max(here + 1);
                }
                if let Some(count) = indegree.get_mut(child) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.push(*child);
                    }
                }
            }
        }
        let blocked = indegree
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(id, _)| id)
            .collect();
        (profile, blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(store: &mut CellStore, len: usize) -> Vec<CellId> {
        let ids: Vec<CellId> = (0..len)
            .map(|i| store.add_cell(vec![i as u8], CellKind::Ordinary).unwrap())
            .collect();
        for pair in ids.windows(2) {
            store.add_reference(pair[0], pair[1]).unwrap();
        }
        ids
    }

    #[test]
    fn self_reference_is_a_cycle_and_root_is_set() {
        let mut store = CellStore::default();
        let id0 = store.add_cell(b"payload-a".to_vec(), CellKind::Ordinary).unwrap();
        let before = store.clone();
        assert_eq!(
            store.add_reference(id0, id0),
            Err(CellError::CycleDetected { from: id0, to: id0 })
        );
        assert_eq!(store, before);
        store.set_root(id0).unwrap();
        assert_eq!(store.roots(), &[id0]);
    }

    #[test]
    fn back_edge_is_rejected() {
        let mut store = CellStore::default();
        let ids = chain(&mut store, 3);
        let before = store.clone();
        assert!(matches!(
            store.add_reference(ids[2], ids[0]),
            Err(CellError::CycleDetected { .. })
        ));
        assert_eq!(store, before);
        store.check_invariants().unwrap();
    }

    #[test]
    fn depth_limit_counts_both_sides_of_new_edge() {
        let mut store = CellStore::new(StoreLimits {
            max_depth: 3,
            max_cells: None,
        });
        let upper = chain(&mut store, 2);
        let lower = chain(&mut store, 2);
        // upper[1] has one edge above it, lower[0] one edge below: 1 + 1 + 1 = 3.
        store.add_reference(upper[1], lower[0]).unwrap();
        assert_eq!(store.depth(), 3);
        let extra = store.add_cell(vec![], CellKind::Ordinary).unwrap();
        assert_eq!(
            store.add_reference(lower[1], extra),
            Err(CellError::MaxDepthExceeded { depth: 4, max: 3 })
        );
    }

    #[test]
    fn remove_cell_guards() {
        let mut store = CellStore::default();
        let ids = chain(&mut store, 2);
        assert_eq!(
            store.remove_cell(ids[1]),
            Err(CellError::InvalidOperation("cell is still referenced"))
        );
        store.set_root(ids[0]).unwrap();
        assert_eq!(
            store.remove_cell(ids[0]),
            Err(CellError::InvalidOperation("cell is a root"))
        );
        store.remove_reference(ids[0], ids[1]).unwrap();
        store.bind(StateKey::from_bytes(b"k"), ids[1]).unwrap();
        assert_eq!(
            store.remove_cell(ids[1]),
            Err(CellError::InvalidOperation("cell is bound to a state key"))
        );
        assert_eq!(store.remove_cell(CellId(9)), Err(CellError::NotFound(CellId(9))));
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let mut store = CellStore::default();
        let a = store.add_cell(vec![1], CellKind::Ordinary).unwrap();
        store.remove_cell(a).unwrap();
        let b = store.add_cell(vec![2], CellKind::Ordinary).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.set_root(a), Err(CellError::NotFound(a)));
        assert_eq!(store.set_root(CellId(50)), Err(CellError::IndexOutOfBounds(CellId(50))));
    }

    #[test]
    fn remove_reference_requires_edge() {
        let mut store = CellStore::default();
        let ids = chain(&mut store, 2);
        assert_eq!(
            store.remove_reference(ids[1], ids[0]),
            Err(CellError::ReferenceNotFound {
                from: ids[1],
                to: ids[0]
            })
        );
    }

    #[test]
    fn duplicate_edges_pop_most_recent() {
        let mut store = CellStore::default();
        let ids = chain(&mut store, 2);
        let other = store.add_cell(vec![], CellKind::Ordinary).unwrap();
        store.add_reference(ids[0], other).unwrap();
        store.add_reference(ids[0], ids[1]).unwrap();
        assert_eq!(store.get(ids[0]).unwrap().references(), &[ids[1], other, ids[1]]);
        store.remove_reference(ids[0], ids[1]).unwrap();
        assert_eq!(store.get(ids[0]).unwrap().references(), &[ids[1], other]);
        store.check_invariants().unwrap();
    }

    #[test]
    fn merkle_proof_cells_reject_rewrites() {
        let mut store = CellStore::default();
        let proof = store.add_cell(vec![7; 4], CellKind::MerkleProof).unwrap();
        assert_eq!(
            store.set_data(proof, vec![]),
            Err(CellError::InvalidOperation("merkle proof cells are immutable"))
        );
        assert_eq!(store.set_version(CellId(99), 1), Err(CellError::NotFound(CellId(99))));
    }

    #[test]
    fn set_code_marks_content_and_clears_slice() {
        let mut store = CellStore::default();
        let id = store.add_cell(vec![1, 2, 3], CellKind::Ordinary).unwrap();
        store.set_slice(id, Some(Slice::new(0, 2))).unwrap();
        store.set_code(id, vec![9]).unwrap();
        let cell = store.get(id).unwrap();
        assert_eq!(cell.content(), ContentKind::Code);
        assert_eq!(cell.slice(), None);
        assert!(store.set_slice(id, Some(Slice::new(0, 5))).is_err());
    }

    #[test]
    fn max_cells_limit() {
        let mut store = CellStore::new(StoreLimits {
            max_depth: 8,
            max_cells: Some(1),
        });
        store.add_cell(vec![], CellKind::Ordinary).unwrap();
        assert_eq!(
            store.add_cell(vec![], CellKind::Ordinary),
            Err(CellError::InvalidOperation("store is full"))
        );
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let mut store = CellStore::default();
        let before = store.clone();
        let ops = vec![
            OpCode::add(vec![1]),
            OpCode::add(vec![2]),
            OpCode::AddReference {
                from: CellId(0),
                to: CellId(1),
            },
            OpCode::AddReference {
                from: CellId(1),
                to: CellId(0),
            },
        ];
        assert!(matches!(
            store.apply_all(&ops, &RejectCustom),
            Err(CellError::CycleDetected { .. })
        ));
        assert_eq!(store, before);
        let outcomes = store.apply_all(&ops[..3], &RejectCustom).unwrap();
        assert_eq!(outcomes[0], OpOutcome::Added(CellId(0)));
        assert_eq!(store.edges(), &[(CellId(0), CellId(1))]);
    }

    struct AppendTagged;

    impl CustomOpHandler for AppendTagged {
        fn apply(
            &self,
            tag: u8,
            payload: &[u8],
            store: &mut CellStore,
        ) -> Result<OpOutcome, CellError> {
            let mut data = vec![tag];
            data.extend_from_slice(payload);
            let id = store.add_cell(data, CellKind::Ordinary)?;
            if tag == 0 {
                return Err(CellError::Custom {
                    tag,
                    reason: format!("tag zero rejected after adding {id}"),
                });
            }
            Ok(OpOutcome::Custom { tag })
        }
    }

    #[test]
    fn custom_ops_roll_back_on_failure() {
        let mut store = CellStore::default();
        let op = OpCode::Custom {
            tag: 0,
            payload: vec![1],
        };
        assert!(matches!(store.apply_with(&op, &AppendTagged), Err(CellError::Custom { .. })));
        assert!(store.is_empty());
        assert_eq!(
            store.apply(&op),
            Err(CellError::InvalidOperation("no handler for custom op"))
        );
        let ok = OpCode::Custom {
            tag: 5,
            payload: vec![1],
        };
        assert_eq!(store.apply_with(&ok, &AppendTagged).unwrap(), OpOutcome::Custom { tag: 5 });
        assert_eq!(store.get(CellId(0)).unwrap().payload(), &[5, 1]);
    }

    #[test]
    fn restore_replays_structure() {
        let mut store = CellStore::default();
        let ids = chain(&mut store, 3);
        store.set_root(ids[0]).unwrap();
        store.bind(StateKey::from_bytes(b"tip"), ids[2]).unwrap();
        let cells: Vec<Cell> = store.cells().cloned().collect();
        let bindings: Vec<(StateKey, CellId)> =
            store.bindings().map(|(k, id)| (k.clone(), id)).collect();
        let restored = CellStore::restore(
            store.limits(),
            cells,
            store.edges(),
            store.roots(),
            &bindings,
        )
        .unwrap();
        assert_eq!(restored, store);

        let bad = CellStore::restore(
            store.limits(),
            store.cells().cloned().collect(),
            &[(ids[0], ids[1]), (ids[1], ids[0])],
            &[],
            &[],
        );
        assert!(matches!(bad, Err(CellError::CycleDetected { .. })));
    }

    #[test]
    fn deep_chains_stay_off_the_call_stack() {
        const LEN: usize = 25_000;
        let mut store = CellStore::new(StoreLimits {
            max_depth: 1_000_000,
            max_cells: None,
        });
        let ids = chain(&mut store, LEN);
        let last = ids[LEN - 1];
        assert_eq!(store.depth(), LEN - 1);
        assert_eq!(store.height(ids[0]), LEN - 1);
        assert_eq!(store.longest_path_into(last), LEN - 1);
        store.check_invariants().unwrap();

        assert!(matches!(
            store.add_reference(last, ids[0]),
            Err(CellError::CycleDetected { .. })
        ));

        let cells: Vec<Cell> = store.cells().cloned().collect();
        let restored =
            CellStore::restore(store.limits(), cells, store.edges(), store.roots(), &[]).unwrap();
        assert_eq!(restored, store);

        store.remove_reference(ids[LEN / 2], ids[LEN / 2 + 1]).unwrap();
        assert_eq!(store.depth(), LEN / 2);
        assert_eq!(store.longest_path_into(last), LEN - LEN / 2 - 2);
        store.check_invariants().unwrap();
    }

    #[test]
    fn restore_applies_the_depth_limit_to_the_whole_graph() {
        let mut store = CellStore::default();
        let ids = chain(&mut store, 5);
        let limits = StoreLimits {
            max_depth: 3,
            max_cells: None,
        };
        let cells: Vec<Cell> = store.cells().cloned().collect();
        assert_eq!(
            CellStore::restore(limits, cells, store.edges(), &[], &[]),
            Err(CellError::MaxDepthExceeded { depth: 4, max: 3 })
        );
        assert_eq!(store.longest_path_into(ids[4]), 4);
    }
}
