//! Canonical state commitment.
//!
//! The root is SHA-256 over a fixed domain tag followed by four sections: cells, references,
//! roots and bindings. Every section starts with a little-endian `u64` element count, integers
//! are little-endian, and byte strings carry a `u64` length prefix. The layout does not depend
//! on any serializer, so a snapshot decoded from either wire encoding hashes identically.

use sha2::{Digest, Sha256};

use crate::snapshot::{SnapshotCell, StateRoot, StateSnapshot};

pub const DOMAIN_TAG: &[u8] = b"cell-dag/boc/v1";

pub fn compute_hash(snapshot: &StateSnapshot) -> StateRoot {
    let mut hasher = CommitmentHasher::new();

    hasher.count(snapshot.cells.len());
    for cell in &snapshot.cells {
        hasher.cell(cell);
    }

    hasher.count(snapshot.references.len());
    for (from, to) in &snapshot.references {
        hasher.u32(*from);
        hasher.u32(*to);
    }

    hasher.count(snapshot.roots.len());
    for root in &snapshot.roots {
        hasher.u32(*root);
    }

    hasher.count(snapshot.bindings.len());
    for (key, id) in &snapshot.bindings {
        hasher.bytes(&key.to_bytes());
        hasher.u32(*id);
    }

    hasher.finish()
}

struct CommitmentHasher(Sha256);

impl CommitmentHasher {
    fn new() -> Self {
        let mut inner = Sha256::new();
        inner.update(DOMAIN_TAG);
        Self(inner)
    }

    fn count(&mut self, len: usize) {
        self.0.update((len as u64).to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.0.update(value.to_le_bytes());
    }

    fn bytes(&mut self, data: &[u8]) {
        self.count(data.len());
        self.0.update(data);
    }

    fn cell(&mut self, cell: &SnapshotCell) {
        self.u32(cell.id);
        self.0.update([cell.kind.to_byte(), cell.content.to_byte()]);
        self.u32(cell.version);
        self.bytes(&cell.payload);
        self.bytes(&cell.libraries);
        match cell.slice {
            Some(slice) => {
                self.0.update([1u8]);
                self.0.update(slice.start.to_le_bytes());
                self.0.update(slice.end.to_le_bytes());
            }
            None => self.0.update([0u8]),
        }
    }

    fn finish(self) -> StateRoot {
        self.0.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use state_dag::{CellKind, ContentKind, Slice, StateKey};

    fn cell(id: u32, payload: &[u8]) -> SnapshotCell {
        SnapshotCell {
            id,
            kind: CellKind::Ordinary,
            content: ContentKind::Data,
            version: 0,
            payload: payload.to_vec(),
            libraries: Vec::new(),
            slice: None,
        }
    }

    fn sample() -> StateSnapshot {
        StateSnapshot {
            cells: vec![cell(0, b"ledger"), cell(1, b"leaf")],
            references: vec![(0, 1)],
            roots: vec![0],
            bindings: vec![(StateKey::from_bytes(b"leaf"), 1)],
            hash: None,
        }
    }

    #[test]
    fn empty_snapshot_vector() {
        assert_eq!(
            hex::encode(compute_hash(&StateSnapshot::default())),
            "c60f83ace29b68a8a8b41473b649b0f8740cf3568fffdbe6f545d7de5c75e6b4"
        );
    }

    #[test]
    fn sample_snapshot_vector() {
        assert_eq!(
            hex::encode(compute_hash(&sample())),
            "c60b6cc316e2c0f65d14a76638796181aa9bd93f4776d6d03e09ae63cbde2e1f"
        );
    }

    #[test]
    fn stored_hash_is_not_committed() {
        let mut sealed = sample();
        sealed.hash = Some([7u8; 32]);
        assert_eq!(compute_hash(&sealed), compute_hash(&sample()));
    }

    #[test]
    fn every_field_moves_the_root() {
        let base = compute_hash(&sample());
        let mutations: Vec<fn(&mut StateSnapshot)> = vec![
            |s| s.cells[0].version = 1,
            |s| s.cells[0].content = ContentKind::Code,
            |s| s.cells[0].kind = CellKind::MerkleProof,
            |s| s.cells[1].libraries = vec![1],
            |s| s.cells[0].slice = Some(Slice::new(0, 3)),
            |s| s.references.push((0, 1)),
            |s| s.roots.push(1),
            |s| s.bindings.clear(),
        ];
        for mutate in mutations {
            let mut changed = sample();
            mutate(&mut changed);
            assert_ne!(compute_hash(&changed), base);
        }
    }

    #[test]
    fn length_prefixes_separate_payload_boundaries() {
        let mut a = sample();
        a.cells[0].payload = b"ab".to_vec();
        a.cells[0].libraries = b"c".to_vec();
        let mut b = sample();
        b.cells[0].payload = b"a".to_vec();
        b.cells[0].libraries = b"bc".to_vec();
        assert_ne!(compute_hash(&a), compute_hash(&b));
    }
}
