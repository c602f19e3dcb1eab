//! End-to-end coverage of the plain B-tree over a real file: growth
//! through splits, shrinkage through borrows and merges, range scans,
//! duplicates, persistence across reopen, and a randomized workload
//! checked against an in-memory model.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use treefile::BTree;

const SCENARIO_KEYS: [i32; 10] = [1000, 2000, 3000, 200, 400, 1500, 600, 50, 12, 4];

#[test]
fn splits_grow_the_tree_to_three_levels() {
    let dir = TempDir::new().unwrap();
    let mut tree: BTree<i32, i64> = BTree::open(dir.path().join("t.db"), 4).unwrap();

    for (i, key) in SCENARIO_KEYS.iter().enumerate() {
        tree.insert(*key, i64::from(*key)).unwrap();
        let stats = tree.verify().unwrap();
        assert_eq!(stats.entry_count, i as u64 + 1);
    }

    let stats = tree.verify().unwrap();
    assert_eq!(stats.depth, 3);
    assert_eq!(stats.entry_count, 10);

    for key in SCENARIO_KEYS {
        assert_eq!(tree.search(&key).unwrap(), Some(i64::from(key)), "key {key}");
    }
    assert_eq!(tree.search(&999).unwrap(), None);
}

#[test]
fn deleting_everything_in_reverse_empties_the_tree() {
    let dir = TempDir::new().unwrap();
    let mut tree: BTree<i32, i64> = BTree::open(dir.path().join("t.db"), 4).unwrap();

    for key in 1..=10 {
        tree.insert(key, i64::from(key) * 7).unwrap();
    }
    tree.verify().unwrap();

    for key in (1..=10).rev() {
        assert_eq!(tree.delete(&key).unwrap(), Some(i64::from(key) * 7), "key {key}");
        tree.verify().unwrap();
        assert_eq!(tree.search(&key).unwrap(), None);
    }

    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.verify().unwrap().depth, 0);

    // The emptied tree accepts new entries again.
    tree.insert(99, 1).unwrap();
    assert_eq!(tree.search(&99).unwrap(), Some(1));
}

#[test]
fn range_search_is_inclusive_on_both_ends() {
    let dir = TempDir::new().unwrap();
    let mut tree: BTree<i32, i64> = BTree::open(dir.path().join("t.db"), 4).unwrap();

    for key in SCENARIO_KEYS {
        tree.insert(key, i64::from(key)).unwrap();
    }

    let hits: Vec<i32> = tree
        .range_search(&10, &250)
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(hits, vec![12, 50, 200]);

    // Bounds equal to stored keys are included.
    let hits: Vec<i32> = tree
        .range_search(&12, &200)
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(hits, vec![12, 50, 200]);

    assert!(tree.range_search(&250, &10).unwrap().is_empty());
    assert!(tree.range_search(&5000, &6000).unwrap().is_empty());
}

#[test]
fn duplicate_keys_survive_splits_and_deletes() {
    let dir = TempDir::new().unwrap();
    let mut tree: BTree<i32, i64> = BTree::open(dir.path().join("t.db"), 4).unwrap();

    for v in 0..12 {
        tree.insert(5, v).unwrap();
        tree.insert(9, 100 + v).unwrap();
    }
    tree.verify().unwrap();

    let mut fives = tree.search_all(&5).unwrap();
    fives.sort_unstable();
    assert_eq!(fives, (0..12).collect::<Vec<i64>>());

    // Deleting removes exactly one occurrence at a time.
    for remaining in (0..12).rev() {
        assert!(tree.delete(&5).unwrap().is_some());
        tree.verify().unwrap();
        assert_eq!(tree.search_all(&5).unwrap().len(), remaining);
    }
    assert_eq!(tree.delete(&5).unwrap(), None);
    assert_eq!(tree.search_all(&9).unwrap().len(), 12);
}

#[test]
fn contents_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.db");

    {
        let mut tree: BTree<i32, i64> = BTree::open(&path, 4).unwrap();
        for key in SCENARIO_KEYS {
            tree.insert(key, i64::from(key) * 2).unwrap();
        }
        tree.sync().unwrap();
    }

    let mut tree: BTree<i32, i64> = BTree::open(&path, 4).unwrap();
    let stats = tree.verify().unwrap();
    assert_eq!(stats.entry_count, 10);
    for key in SCENARIO_KEYS {
        assert_eq!(tree.search(&key).unwrap(), Some(i64::from(key) * 2), "key {key}");
    }

    // Mutations keep working on the reopened file.
    assert_eq!(tree.delete(&1000).unwrap(), Some(2000));
    tree.verify().unwrap();
}

#[test]
fn string_keys_round_trip_through_the_file() {
    use treefile::BoundedString;

    let dir = TempDir::new().unwrap();
    let mut tree: BTree<BoundedString<16>, u64> =
        BTree::open(dir.path().join("t.db"), 4).unwrap();

    let words = ["delta", "alpha", "echo", "charlie", "bravo", "foxtrot", "golf"];
    for (i, word) in words.iter().enumerate() {
        tree.insert(BoundedString::new(*word).unwrap(), i as u64).unwrap();
    }
    tree.verify().unwrap();

    assert_eq!(
        tree.search(&BoundedString::new("charlie").unwrap()).unwrap(),
        Some(3)
    );
    let scanned: Vec<String> = tree
        .scan_all()
        .unwrap()
        .into_iter()
        .map(|(k, _)| k.as_str().to_owned())
        .collect();
    let mut sorted: Vec<String> = words.iter().map(|w| (*w).to_owned()).collect();
    sorted.sort();
    assert_eq!(scanned, sorted);
}

#[test]
fn randomized_workload_matches_in_memory_model() {
    let dir = TempDir::new().unwrap();
    let mut tree: BTree<i32, i64> = BTree::open(dir.path().join("t.db"), 5).unwrap();
    let mut model: BTreeMap<i32, Vec<i64>> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for step in 0..2000i64 {
        let key = rng.gen_range(0..150);
        if rng.gen_bool(0.6) {
            tree.insert(key, step).unwrap();
            model.entry(key).or_default().push(step);
        } else {
            let deleted = tree.delete(&key).unwrap();
            match deleted {
                Some(value) => {
                    let values = model.get_mut(&key).expect("model missing deleted key");
                    let pos = values
                        .iter()
                        .position(|v| *v == value)
                        .expect("model missing deleted value");
                    values.remove(pos);
                    if values.is_empty() {
                        model.remove(&key);
                    }
                }
                None => assert!(!model.contains_key(&key), "tree lost key {key}"),
            }
        }
        if step % 250 == 0 {
            tree.verify().unwrap();
        }
    }

    let stats = tree.verify().unwrap();
    let expected: u64 = model.values().map(|v| v.len() as u64).sum();
    assert_eq!(stats.entry_count, expected);

    for (key, values) in &model {
        let mut got = tree.search_all(key).unwrap();
        got.sort_unstable();
        let mut want = values.clone();
        want.sort_unstable();
        assert_eq!(got, want, "values under key {key}");
    }

    let scanned = tree.scan_all().unwrap();
    let keys: Vec<i32> = scanned.iter().map(|(k, _)| *k).collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted, "scan must come back in key order");
}
