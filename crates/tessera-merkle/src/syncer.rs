//! Gap repair for incoming deltas.
//!
//! When a remote head arrives, its predecessors and linked field deltas may be
//! missing locally. The [`Resolver`] walks backwards from the head, one block
//! at a time, telling the caller which hash to fetch next. Traversal stops at
//! blocks the caller already has, is bounded in depth and size, and guards
//! against revisiting hashes. Once nothing is wanted, the collected blocks
//! come back ancestors-first, ready to be merged in a single transaction.
//!
//! The resolver never touches storage, so abandoning it part way leaves the
//! local DAG exactly as it was.

use crate::error::ResolveError;
use std::collections::{HashMap, HashSet, VecDeque};
use tessera_core::{ContentHash, Delta, DocumentId};

/// Limits for one resolution.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Maximum distance from the root head.
    pub max_depth: usize,

    /// Maximum number of blocks collected.
    pub max_blocks: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            max_depth: 1000,
            max_blocks: 10_000,
        }
    }
}

/// A decoded block together with its verified bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedBlock {
    pub hash: ContentHash,
    pub bytes: Vec<u8>,
    pub delta: Delta,
}

/// Backwards traversal state for one remote head.
pub struct Resolver {
    config: ResolverConfig,
    doc_id: Option<DocumentId>,
    queue: VecDeque<(ContentHash, usize)>,
    visited: HashSet<ContentHash>,
    collected: HashMap<ContentHash, VerifiedBlock>,
}

impl Resolver {
    pub fn new(root: ContentHash, config: ResolverConfig) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back((root, 0));
        Resolver {
            config,
            doc_id: None,
            queue,
            visited: HashSet::new(),
            collected: HashMap::new(),
        }
    }

    /// Next hash to look at and its depth, skipping anything already visited.
    pub fn next_wanted(&mut self) -> Option<(ContentHash, usize)> {
        while let Some((hash, depth)) = self.queue.pop_front() {
            if self.visited.insert(hash) {
                return Some((hash, depth));
            }
        }
        None
    }

    /// Record a fetched block found at `depth` and queue its dependencies.
    pub fn insert(&mut self, depth: usize, block: VerifiedBlock) -> Result<(), ResolveError> {
        if depth > self.config.max_depth {
            return Err(ResolveError::MaxDepthExceeded {
                depth: self.config.max_depth,
            });
        }
        if self.collected.len() >= self.config.max_blocks {
            return Err(ResolveError::TooManyBlocks {
                limit: self.config.max_blocks,
            });
        }
        match &self.doc_id {
            Some(doc) if *doc != block.delta.doc_id => return Err(ResolveError::ForeignBlock(block.hash)),
            Some(_) => {}
            None => self.doc_id = Some(block.delta.doc_id.clone()),
        }

        for dep in block.delta.dependencies() {
            if !self.visited.contains(dep) {
                self.queue.push_back((*dep, depth + 1));
            }
        }
        self.collected.insert(block.hash, block);
        Ok(())
    }

    /// Collected blocks with every block after all of its collected dependencies.
    pub fn into_ordered(self) -> Result<Vec<VerifiedBlock>, ResolveError> {
        // Kahn's algorithm over the collected subgraph
        let mut in_degree: HashMap<ContentHash, usize> = HashMap::new();
        let mut dependents: HashMap<ContentHash, Vec<ContentHash>> = HashMap::new();
        for (hash, block) in &self.collected {
            let local_deps: HashSet<&ContentHash> = block
                .delta
                .dependencies()
                .filter(|d| self.collected.contains_key(d))
                .collect();
            in_degree.insert(*hash, local_deps.len());
            for dep in local_deps {
                dependents.entry(*dep).or_default().push(*hash);
            }
        }

        let mut ready: Vec<ContentHash> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(h, _)| *h)
            .collect();
        ready.sort();
        let mut queue: VecDeque<ContentHash> = ready.into();

        let mut collected = self.collected;
        let mut ordered = Vec::with_capacity(collected.len());
        while let Some(hash) = queue.pop_front() {
            if let Some(children) = dependents.get(&hash) {
                let mut unblocked = Vec::new();
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            unblocked.push(*child);
                        }
                    }
                }
                unblocked.sort();
                queue.extend(unblocked);
            }
            if let Some(block) = collected.remove(&hash) {
                ordered.push(block);
            }
        }

        if !collected.is_empty() {
            return Err(ResolveError::Cycle);
        }
        Ok(ordered)
    }
}
