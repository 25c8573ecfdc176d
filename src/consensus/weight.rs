//! DAG weight: how many distinct stabilizers have built on each unstable pack.
//!
//! The walk starts at a newly admitted pack and descends through unstable
//! ancestors. Each path carries its own copy of the stabilizer set; the first
//! pack on a path authored by a still-unconsumed stabilizer consumes it and
//! raises the running weight by one. A pack reached along several paths keeps
//! the largest weight any of them gives it.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::pack::Pack;
use crate::state::{Ledger, Stabilizer, StateError};
use crate::{Address, Hash};

pub type Weights = HashMap<Hash, usize>;

/// Weight a pack needs before it can be finalized: a strict majority.
pub fn threshold(stabilizers: usize) -> usize {
    stabilizers / 2 + 1
}

/// Unstable packs loaded during one traversal.
pub(crate) struct PackCache<'a> {
    ledger: &'a Ledger,
    packs: HashMap<Hash, Option<Pack>>,
}

impl<'a> PackCache<'a> {
    pub(crate) fn new(ledger: &'a Ledger) -> Self {
        PackCache {
            ledger,
            packs: HashMap::new(),
        }
    }

    /// The pack under `hash` if it is known and still unstable.
    pub(crate) fn unstable(&mut self, hash: &Hash) -> Result<Option<&Pack>, StateError> {
        if !self.packs.contains_key(hash) {
            let pack = self.ledger.pack(hash)?.filter(|p| !p.stable);
            self.packs.insert(*hash, pack);
        }
        Ok(self.packs.get(hash).and_then(Option::as_ref))
    }
}

/// Weights of `start` and every unstable ancestor reachable from it.
pub fn dag_weight(
    ledger: &Ledger,
    start: &Pack,
    stabilizers: &[Stabilizer],
) -> Result<Weights, StateError> {
    let mut cache = PackCache::new(ledger);
    let mut weights = Weights::new();
    let mut seen: HashSet<(Hash, usize, Vec<Address>)> = HashSet::new();

    let remaining: BTreeSet<Address> = stabilizers.iter().map(|s| s.address).collect();
    let mut stack = vec![(start.hash(), start.author, start.parents.clone(), remaining, 0usize)];

    while let Some((hash, author, parents, mut remaining, current)) = stack.pop() {
        let weight = if remaining.remove(&author) {
            current + 1
        } else {
            current
        };
        let best = weights.entry(hash).or_insert(0);
        *best = (*best).max(weight);

        for parent in parents {
            let Some(pack) = cache.unstable(&parent)? else {
                continue;
            };
            let state = (parent, weight, remaining.iter().copied().collect::<Vec<_>>());
            if !seen.insert(state) {
                continue;
            }
            stack.push((
                parent,
                pack.author,
                pack.parents.clone(),
                remaining.clone(),
                weight,
            ));
        }
    }
    Ok(weights)
}
