use std::collections::BTreeMap;

use bztree_node::epoch;
use bztree_node::{LeafNode, NodeConfig, NodeError, Stack};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<u8>, u64),
    Update(Vec<u8>, u64),
    Upsert(Vec<u8>, u64),
    Delete(Vec<u8>),
    Read(Vec<u8>),
    Consolidate,
}

fn key() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'f', 0..4)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        2 => (key(), any::<u64>()).prop_map(|(k, v)| Op::Update(k, v)),
        2 => (key(), any::<u64>()).prop_map(|(k, v)| Op::Upsert(k, v)),
        2 => key().prop_map(Op::Delete),
        2 => key().prop_map(Op::Read),
        1 => Just(Op::Consolidate),
    ]
}

proptest! {
    #[test]
    fn leaf_behaves_like_a_map(ops in prop::collection::vec(op(), 1..200)) {
        let guard = &epoch::protect();
        let mut leaf = LeafNode::new(8192).unwrap();
        let mut model = BTreeMap::new();

        for op in ops {
            if leaf.free_space(guard) < 64 {
                leaf = leaf.consolidate(guard).unwrap();
            }
            match op {
                Op::Insert(k, v) => {
                    let expected = if model.contains_key(&k) {
                        Err(NodeError::KeyExists)
                    } else {
                        model.insert(k.clone(), v);
                        Ok(())
                    };
                    prop_assert_eq!(leaf.insert(&k, v, guard), expected);
                }
                Op::Update(k, v) => {
                    let expected = match model.get_mut(&k) {
                        Some(old) => {
                            *old = v;
                            Ok(())
                        }
                        None => Err(NodeError::NotFound),
                    };
                    prop_assert_eq!(leaf.update(&k, v, guard), expected);
                }
                Op::Upsert(k, v) => {
                    model.insert(k.clone(), v);
                    prop_assert_eq!(leaf.upsert(&k, v, guard), Ok(()));
                }
                Op::Delete(k) => {
                    let expected = model.remove(&k).map(|_| ()).ok_or(NodeError::NotFound);
                    prop_assert_eq!(leaf.delete(&k, guard), expected);
                }
                Op::Read(k) => {
                    prop_assert_eq!(leaf.read(&k, guard), model.get(&k).copied());
                }
                Op::Consolidate => {
                    leaf = leaf.consolidate(guard).unwrap();
                    prop_assert_eq!(leaf.sorted_count(), model.len());
                }
            }
            prop_assert_eq!(leaf.live_count(guard), model.len());
        }

        let expected: Vec<_> = model.into_iter().collect();
        prop_assert_eq!(leaf.records(guard), expected);
    }

    #[test]
    fn split_partitions_at_the_separator(
        entries in prop::collection::btree_map(prop::collection::vec(any::<u8>(), 0..24), any::<u64>(), 2..60)
    ) {
        let guard = &epoch::protect();
        let leaf = LeafNode::from_records(
            8192,
            entries.iter().map(|(k, v)| (k.as_slice(), *v)),
        )
        .unwrap();

        let package = leaf
            .prepare_split(&Stack::new(), &NodeConfig::new(8192, 4096).unwrap(), guard)
            .unwrap();
        let left = package.left.records(guard);
        let right = package.right.records(guard);

        prop_assert!(!left.is_empty());
        prop_assert!(!right.is_empty());
        prop_assert!(left.iter().all(|(k, _)| *k < package.separator));
        prop_assert!(right.iter().all(|(k, _)| *k >= package.separator));

        let mut union = left;
        union.extend(right);
        let expected: Vec<_> = entries.into_iter().collect();
        prop_assert_eq!(union, expected);
    }
}
