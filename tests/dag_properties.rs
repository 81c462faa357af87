use std::collections::BTreeSet;

use proptest::prelude::*;
use state_dag::{CellId, CellStore, OpCode, StoreLimits};

fn op_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        3 => proptest::collection::vec(any::<u8>(), 0..8).prop_map(OpCode::add),
        4 => (0u32..10, 0u32..10).prop_map(|(from, to)| OpCode::AddReference {
            from: CellId(from),
            to: CellId(to),
        }),
        1 => (0u32..10, 0u32..10).prop_map(|(from, to)| OpCode::RemoveReference {
            from: CellId(from),
            to: CellId(to),
        }),
        1 => (0u32..12).prop_map(|id| OpCode::SetRoot { id: CellId(id) }),
        2 => (0u32..10).prop_map(|id| OpCode::Remove { id: CellId(id) }),
        1 => (0u32..10, proptest::collection::vec(any::<u8>(), 0..8))
            .prop_map(|(id, data)| OpCode::SetData { id: CellId(id), data }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn random_ops_preserve_structure(ops in proptest::collection::vec(op_strategy(), 0..60)) {
        let mut store = CellStore::new(StoreLimits { max_depth: 4, max_cells: Some(8) });
        let mut issued = BTreeSet::new();
        for op in &ops {
            let before = store.clone();
            match store.apply(op) {
                Ok(_) => {
                    for cell in store.cells() {
                        if !before.contains(cell.id()) {
                            // Fresh ids are never ones handed out before.
                            prop_assert!(issued.insert(cell.id()));
                        }
                    }
                }
                Err(_) => prop_assert_eq!(&store, &before),
            }
            prop_assert!(store.check_invariants().is_ok());
            prop_assert!(store.depth() <= 4);
            prop_assert!(store.len() <= 8);
            for (from, to) in store.edges() {
                prop_assert!(store.contains(*from) && store.contains(*to));
                prop_assert!(!store.reaches(*to, *from));
            }
            for root in store.roots() {
                prop_assert!(store.contains(*root));
            }
        }
    }

    #[test]
    fn batches_are_all_or_nothing(ops in proptest::collection::vec(op_strategy(), 1..20)) {
        let mut store = CellStore::default();
        let before = store.clone();
        let mut sequential = store.clone();
        let all_ok = ops.iter().all(|op| sequential.apply(op).is_ok());
        let batch = store.apply_all(&ops, &state_dag::RejectCustom);
        if all_ok {
            prop_assert!(batch.is_ok());
            prop_assert_eq!(&store, &sequential);
        } else {
            prop_assert!(batch.is_err());
            prop_assert_eq!(&store, &before);
        }
    }
}
