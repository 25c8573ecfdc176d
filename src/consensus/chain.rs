//! Stabilization chain: the order in which unstable packs are finalized.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use num_bigint::BigUint;

use super::weight::{PackCache, Weights};
use crate::pack::Pack;
use crate::state::{Ledger, Stabilizer, StateError};
use crate::Address;

/// Parent visiting order: heavier first, then stabilizer-authored, then by
/// the author's support, then by ascending hash.
fn visit_order(
    a: &Pack,
    b: &Pack,
    weights: &Weights,
    support: &HashMap<Address, BigUint>,
) -> Ordering {
    let weight = |p: &Pack| weights.get(&p.hash()).copied().unwrap_or(0);
    weight(b)
        .cmp(&weight(a))
        .then_with(|| match (support.get(&a.author), support.get(&b.author)) {
            (Some(x), Some(y)) => y.cmp(x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.hash().cmp(&b.hash()))
}

/// Unstable ancestors of `start` (itself included) in finalization order,
/// parents before children, keeping only packs whose weight reaches `threshold`.
pub fn stabilization_chain(
    ledger: &Ledger,
    start: &Pack,
    stabilizers: &[Stabilizer],
    weights: &Weights,
    threshold: usize,
) -> Result<Vec<Pack>, StateError> {
    let support: HashMap<Address, BigUint> = stabilizers
        .iter()
        .map(|s| (s.address, s.support.clone()))
        .collect();
    let mut cache = PackCache::new(ledger);
    let mut visited = HashSet::new();
    let mut chain = Vec::new();
    let mut stack = vec![(start.clone(), false)];

    while let Some((pack, expanded)) = stack.pop() {
        if expanded {
            if weights.get(&pack.hash()).copied().unwrap_or(0) >= threshold {
                chain.push(pack);
            }
            continue;
        }
        if !visited.insert(pack.hash()) {
            continue;
        }
        let mut parents = Vec::with_capacity(pack.parents.len());
        for parent in &pack.parents {
            if visited.contains(parent) {
                continue;
            }
            if let Some(p) = cache.unstable(parent)? {
                parents.push(p.clone());
            }
        }
        parents.sort_by(|a, b| visit_order(a, b, weights, &support));
        stack.push((pack, true));
        stack.extend(parents.into_iter().rev().map(|p| (p, false)));
    }
    Ok(chain)
}
