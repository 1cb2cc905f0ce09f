//! Randomized concurrency tests for the memory store.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_kv::{KvError, KvStore, MemoryStore, Transaction};

const KEYS: usize = 4;

fn key(i: usize) -> Vec<u8> {
    format!("/counter/{}", i).into_bytes()
}

fn read_counter<T: Transaction>(txn: &mut T, k: &[u8]) -> u64 {
    txn.get(k)
        .unwrap()
        .map(|raw| u64::from_be_bytes(raw.try_into().unwrap()))
        .unwrap_or(0)
}

/// Increment a random counter until the commit goes through.
fn increment(store: &MemoryStore, rng: &mut StdRng) -> usize {
    let target = rng.gen_range(0..KEYS);
    let mut conflicts = 0;
    loop {
        let mut txn = store.new_txn(false).unwrap();
        let current = read_counter(&mut txn, &key(target));
        txn.set(&key(target), &(current + 1).to_be_bytes()).unwrap();
        match txn.commit() {
            Ok(()) => return conflicts,
            Err(KvError::Conflict) => conflicts += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
}

#[test]
fn test_no_lost_updates_under_contention() {
    const THREADS: usize = 8;
    const INCREMENTS: usize = 200;

    let store = MemoryStore::new();
    std::thread::scope(|scope| {
        for seed in 0..THREADS {
            let store = &store;
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed as u64);
                for _ in 0..INCREMENTS {
                    increment(store, &mut rng);
                }
            });
        }
    });

    let mut txn = store.new_txn(true).unwrap();
    let total: u64 = (0..KEYS).map(|i| read_counter(&mut txn, &key(i))).sum();
    assert_eq!(total, (THREADS * INCREMENTS) as u64);
}

#[test]
fn test_random_snapshots_are_stable() {
    let store = MemoryStore::new();
    let mut rng = StdRng::seed_from_u64(7);

    let mut snapshot = store.new_txn(true).unwrap();
    let before: Vec<u64> = (0..KEYS).map(|i| read_counter(&mut snapshot, &key(i))).collect();

    for _ in 0..50 {
        increment(&store, &mut rng);
    }

    let after: Vec<u64> = (0..KEYS).map(|i| read_counter(&mut snapshot, &key(i))).collect();
    assert_eq!(before, after);

    let mut fresh = store.new_txn(true).unwrap();
    let total: u64 = (0..KEYS).map(|i| read_counter(&mut fresh, &key(i))).sum();
    assert_eq!(total, 50);
}
