//! Sequentiality: an author's packs must form a single causal chain.
//!
//! From any pack, the walk toward genesis stops at the nearest pack by the
//! candidate's author or at the candidate's milestone, whichever comes first
//! on the first parent path that reaches one. That stopping point is the
//! pack's anchor. A candidate is sequential when every current leaf (other
//! than the candidate, its milestone and its parents) has the same anchor as
//! the candidate's own parents.
//!
//! Packs by the author that descend from the candidate are walked through
//! rather than stopped at. The check repeated at stabilization, after the
//! author has built on the candidate, then reaches the verdict admission did.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::pack::Pack;
use crate::state::{Ledger, StateError};
use crate::{short, Address, Hash};

/// Cache key: walk start, author, milestone, candidate.
type AnchorKey = (Hash, Address, Hash, Hash);

/// Memoized anchor walks. Anchors depend only on a pack's ancestry, which
/// never changes once the pack is known.
pub struct Sequencer {
    anchors: LruCache<AnchorKey, Option<Hash>>,
}

struct Walk<'a> {
    candidate: &'a Pack,
    /// Whether the candidate is in the ledger, so packs may descend from it.
    stored: bool,
}

impl Walk<'_> {
    fn key(&self, start: Hash) -> AnchorKey {
        (
            start,
            self.candidate.author,
            self.candidate.milestone,
            self.candidate.hash(),
        )
    }

    /// Anchor found at `pack` itself, if any.
    fn stop_at(&self, ledger: &Ledger, pack: &Pack) -> Result<Option<Hash>, StateError> {
        let milestone = self.candidate.milestone;
        if pack.hash() == self.candidate.hash() && pack.hash() != milestone {
            return Ok(None);
        }
        if pack.author == self.candidate.author && !self.follows_candidate(ledger, pack)? {
            return Ok(Some(pack.hash()));
        }
        if pack.hash() == milestone {
            return Ok(Some(milestone));
        }
        Ok(None)
    }

    /// Whether the candidate is an ancestor of `pack`. Every descendant of an
    /// unfinalized candidate is itself unstable, so stable packs end the search.
    fn follows_candidate(&self, ledger: &Ledger, pack: &Pack) -> Result<bool, StateError> {
        if !self.stored || pack.hash() == self.candidate.hash() {
            return Ok(false);
        }
        let target = self.candidate.hash();
        let mut seen: HashSet<Hash> = HashSet::new();
        let mut queue: VecDeque<Hash> = pack.parents.iter().copied().collect();
        while let Some(hash) = queue.pop_front() {
            if hash == target {
                return Ok(true);
            }
            if !seen.insert(hash) {
                continue;
            }
            if let Some(parent) = ledger.pack(&hash)?.filter(|p| !p.stable) {
                queue.extend(parent.parents.iter().copied());
            }
        }
        Ok(false)
    }
}

impl Sequencer {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Sequencer {
            anchors: LruCache::new(capacity),
        }
    }

    /// Whether `candidate` keeps its author's history linear.
    pub fn is_sequential(&mut self, ledger: &Ledger, candidate: &Pack) -> Result<bool, StateError> {
        let milestone = candidate.milestone;
        let leaves: Vec<Hash> = ledger
            .leaves()?
            .into_iter()
            .filter(|leaf| {
                *leaf != candidate.hash() && *leaf != milestone && !candidate.parents.contains(leaf)
            })
            .collect();
        if leaves.is_empty() {
            return Ok(true);
        }

        let walk = Walk {
            candidate,
            stored: ledger.has_pack(&candidate.hash())?,
        };
        let mut expected = None;
        for parent in &candidate.parents {
            if let Some(anchor) = self.anchor(ledger, &walk, *parent)? {
                expected = Some(anchor);
                break;
            }
        }
        for leaf in leaves {
            let actual = self.anchor(ledger, &walk, leaf)?;
            if actual != expected {
                tracing::debug!(
                    pack = %short(&candidate.hash()),
                    leaf = %short(&leaf),
                    "Leaf anchors elsewhere"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Anchor of the walk starting at `start`. Parents are tried in order and
    /// the first one with an anchor decides.
    fn anchor(&mut self, ledger: &Ledger, walk: &Walk<'_>, start: Hash) -> Result<Option<Hash>, StateError> {
        let mut resolved: HashMap<Hash, Option<Hash>> = HashMap::new();
        let mut stack: Vec<(Hash, Option<Vec<Hash>>)> = vec![(start, None)];

        while let Some((hash, parents)) = stack.pop() {
            if let Some(parents) = parents {
                let anchor = parents
                    .iter()
                    .find_map(|p| resolved.get(p).copied().flatten());
                resolved.insert(hash, anchor);
                self.anchors.put(walk.key(hash), anchor);
                continue;
            }
            if resolved.contains_key(&hash) {
                continue;
            }
            if let Some(anchor) = self.anchors.get(&walk.key(hash)) {
                resolved.insert(hash, *anchor);
                continue;
            }
            let Some(pack) = ledger.pack(&hash)? else {
                resolved.insert(hash, None);
                continue;
            };
            if let Some(anchor) = walk.stop_at(ledger, &pack)? {
                resolved.insert(hash, Some(anchor));
                self.anchors.put(walk.key(hash), Some(anchor));
                continue;
            }
            let pending: Vec<Hash> = pack
                .parents
                .iter()
                .filter(|p| !resolved.contains_key(*p))
                .copied()
                .collect();
            stack.push((hash, Some(pack.parents.clone())));
            stack.extend(pending.into_iter().rev().map(|p| (p, None)));
        }
        Ok(resolved.get(&start).copied().flatten())
    }
}
