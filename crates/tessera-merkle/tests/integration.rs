//! Integration tests for the Merkle-Clock commit DAG.
//!
//! Tests cover:
//! - Bootstrap an empty replica from a remote head through gap repair
//! - Partition/heal scenario with a multi-root merge
//! - Identical heads and history after repair
//! - Randomized branch shapes always admit ancestors-first

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tessera_core::codec;
use tessera_core::{ContentHash, DeltaBuilder, DeltaTarget, DocumentId};
use tessera_kv::{KvStore, MemoryStore, Transaction};
use tessera_merkle::{BlockStore, DocKey, HeadSet, MerkleClock, Resolver, ResolverConfig, VerifiedBlock};

fn doc_key() -> DocKey {
    let mut seed = BTreeMap::new();
    seed.insert("name".to_string(), tessera_core::FieldValue::from("John"));
    DocKey::new("users", DocumentId::derive("users", &seed).unwrap())
}

/// Append a delta on top of the current heads and return its block.
fn append(store: &MemoryStore, doc: &DocKey, tag: u64) -> VerifiedBlock {
    let target = DeltaTarget::field("age");
    let mut txn = store.new_txn(false).unwrap();
    let (preds, height) = HeadSet::new(doc, &target).next(&mut txn).unwrap();
    let delta = DeltaBuilder::new(doc.doc_id().clone(), target)
        .with_height(height)
        .with_value(tag.to_le_bytes().to_vec())
        .with_predecessors(preds)
        .build();
    let encoded = codec::encode(&delta).unwrap();
    MerkleClock::new(doc)
        .admit(&mut txn, &encoded.hash, &encoded.bytes, &delta)
        .unwrap();
    txn.commit().unwrap();
    VerifiedBlock {
        hash: encoded.hash,
        bytes: encoded.bytes,
        delta,
    }
}

fn heads(store: &MemoryStore, doc: &DocKey) -> Vec<ContentHash> {
    let mut txn = store.new_txn(true).unwrap();
    HeadSet::new(doc, &DeltaTarget::field("age"))
        .list(&mut txn)
        .unwrap()
        .into_iter()
        .map(|h| h.hash)
        .collect()
}

/// Pull everything reachable from `root` that `to` lacks out of `from`.
fn repair(from: &MemoryStore, to: &MemoryStore, doc: &DocKey, root: ContentHash) -> usize {
    let mut resolver = Resolver::new(root, ResolverConfig::default());
    let mut remote = from.new_txn(true).unwrap();
    let mut local = to.new_txn(false).unwrap();

    while let Some((hash, depth)) = resolver.next_wanted() {
        if BlockStore::new(&mut local).contains(&hash).unwrap() {
            continue;
        }
        let bytes = BlockStore::new(&mut remote).get(&hash).unwrap().unwrap();
        let delta = codec::decode_verified(&bytes, &hash, codec::AnySchema).unwrap();
        resolver.insert(depth, VerifiedBlock { hash, bytes, delta }).unwrap();
    }

    let ordered = resolver.into_ordered().unwrap();
    let clock = MerkleClock::new(doc);
    for block in &ordered {
        clock.admit(&mut local, &block.hash, &block.bytes, &block.delta).unwrap();
    }
    local.commit().unwrap();
    ordered.len()
}

/// Test bootstrapping a new replica from a remote head.
#[test]
fn test_bootstrap_from_head() {
    let source = MemoryStore::new();
    let doc = doc_key();
    let mut last = None;
    for i in 1..=5 {
        last = Some(append(&source, &doc, i));
    }
    let head = last.unwrap().hash;

    let replica = MemoryStore::new();
    assert_eq!(repair(&source, &replica, &doc, head), 5);
    assert_eq!(heads(&replica, &doc), heads(&source, &doc));

    let mut txn = replica.new_txn(true).unwrap();
    let history = BlockStore::new(&mut txn).commits_by_height_desc(&doc).unwrap();
    let heights: Vec<_> = history.iter().map(|(h, _)| *h).collect();
    assert_eq!(heights, vec![5, 4, 3, 2, 1]);
}

/// Test partition and heal with concurrent branches.
#[test]
fn test_partition_heal_multi_root() {
    let a = MemoryStore::new();
    let b = MemoryStore::new();
    let doc = doc_key();

    let shared = append(&a, &doc, 0);
    repair(&a, &b, &doc, shared.hash);

    // partition: both sides extend independently
    let a_head = append(&a, &doc, 1);
    let b_head = append(&b, &doc, 2);
    assert_ne!(heads(&a, &doc), heads(&b, &doc));

    // heal
    repair(&a, &b, &doc, a_head.hash);
    repair(&b, &a, &doc, b_head.hash);

    let healed = heads(&a, &doc);
    assert_eq!(healed.len(), 2);
    assert_eq!(healed, heads(&b, &doc));

    // a merge delta on either side collapses the heads again
    let merged = append(&a, &doc, 3);
    assert_eq!(merged.delta.height, 3);
    repair(&a, &b, &doc, merged.hash);
    assert_eq!(heads(&b, &doc), vec![merged.hash]);
}

/// Test random branch-and-sync histories converge on identical heads.
#[test]
fn test_random_histories_converge() {
    let mut rng = StdRng::seed_from_u64(7);
    let doc = doc_key();
    let replicas: Vec<MemoryStore> = (0..3).map(|_| MemoryStore::new()).collect();

    for tag in 0..40u64 {
        let writer = rng.gen_range(0..replicas.len());
        let block = append(&replicas[writer], &doc, tag);

        if rng.gen_bool(0.3) {
            let reader = rng.gen_range(0..replicas.len());
            if reader != writer {
                repair(&replicas[writer], &replicas[reader], &doc, block.hash);
            }
        }
    }

    // full exchange of every head
    for from in 0..replicas.len() {
        for to in 0..replicas.len() {
            if from != to {
                for head in heads(&replicas[from], &doc) {
                    repair(&replicas[from], &replicas[to], &doc, head);
                }
            }
        }
    }

    let reference = heads(&replicas[0], &doc);
    for replica in &replicas[1..] {
        assert_eq!(heads(replica, &doc), reference);
    }
}
