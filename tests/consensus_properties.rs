//! Consensus property tests: randomized schedules of stabilizer packs checked
//! against the ledger's stabilization invariants.
//!
//! Properties verified:
//! - **Closure**: a stable pack's parents are stable
//! - **Conservation**: fees and payments move base tokens, never create them
//! - **Liveness**: once every stabilizer has built on a pack, it is stable
//! - **Weight**: bounded by the committee size, never lowered by descendants
//! - **Codec**: decoding arbitrary or tampered bytes never panics or forges a pack

use std::sync::Arc;

use num_bigint::BigUint;
use proptest::prelude::*;

use packdag::config::Config;
use packdag::consensus::weight::{dag_weight, threshold};
use packdag::consensus::Engine;
use packdag::constants::{BASE_TOKEN, COMMUNITY_ADDRESS, GENESIS_HASH};
use packdag::crypto::keys::Keypair;
use packdag::network::NullTransport;
use packdag::pack::Pack;
use packdag::state::{Genesis, Ledger, Stabilizer};
use packdag::storage::SledStorage;
use packdag::Hash;

// ── Helpers ─────────────────────────────────────────────────────────────

const START: u32 = 100_000;

fn committee(n: usize) -> (Vec<Keypair>, Engine) {
    let keys: Vec<Keypair> = (0..n).map(|_| Keypair::generate()).collect();
    let mut ledger = Ledger::new(Arc::new(SledStorage::open_temporary().unwrap()));
    ledger
        .initialize(&Genesis {
            public_key: keys[0].public_key(),
            supply: BigUint::from(START) * n,
            stabilizers: keys
                .iter()
                .map(|k| (k.public_key(), BigUint::from(10u8)))
                .collect(),
            balances: keys
                .iter()
                .map(|k| (k.address(), BigUint::from(START)))
                .collect(),
            accounts: Vec::new(),
        })
        .unwrap();
    (keys, Engine::new(ledger, Config::default(), Arc::new(NullTransport)))
}

fn submit(engine: &mut Engine, author: &Keypair, amount: u32) -> Pack {
    let mut pack = Pack::new();
    pack.pay(BASE_TOKEN, COMMUNITY_ADDRESS, &BigUint::from(amount));
    pack.seal(author, engine.ledger()).unwrap();
    engine.admit(pack.bytes()).unwrap();
    pack
}

fn base_total(engine: &Engine, keys: &[Keypair]) -> BigUint {
    let ledger = engine.ledger();
    keys.iter()
        .map(|k| ledger.balance(&k.address(), &BASE_TOKEN).unwrap())
        .sum::<BigUint>()
        + ledger.balance(&COMMUNITY_ADDRESS, &BASE_TOKEN).unwrap()
}

fn sealed_pack() -> (Keypair, Pack) {
    let (keys, engine) = committee(1);
    let mut pack = Pack::new();
    pack.pay(BASE_TOKEN, COMMUNITY_ADDRESS, &BigUint::from(7u8));
    pack.seal(&keys[0], engine.ledger()).unwrap();
    let key = keys.into_iter().next().unwrap();
    (key, pack)
}

/// Store a DAG directly, without admission or stabilization. Each entry
/// names an author (indices past `n` are outsiders) and parent picks among
/// the packs before it.
fn raw_dag(n: usize, shape: &[(usize, Vec<usize>)]) -> (Ledger, Vec<Stabilizer>, Vec<Pack>) {
    let keys: Vec<Keypair> = (0..n + 2).map(|_| Keypair::generate()).collect();
    let stabilizers = keys[..n]
        .iter()
        .map(|k| Stabilizer {
            address: k.address(),
            support: BigUint::from(10u8),
        })
        .collect();
    let mut ledger = Ledger::new(Arc::new(SledStorage::open_temporary().unwrap()));
    let mut packs: Vec<Pack> = Vec::new();
    for (author, picks) in shape {
        let mut pack = Pack::new();
        if packs.is_empty() {
            pack.parent(GENESIS_HASH);
        }
        for pick in picks {
            if !packs.is_empty() {
                pack.parent(packs[pick % packs.len()].hash());
            }
        }
        if pack.parents.is_empty() {
            pack.parent(packs[packs.len() - 1].hash());
        }
        pack.milestone(GENESIS_HASH);
        pack.pay(BASE_TOKEN, COMMUNITY_ADDRESS, &BigUint::from(1u8));
        pack.seal(&keys[author % keys.len()], &ledger).unwrap();
        ledger.put_temporal(&pack).unwrap();
        packs.push(pack);
    }
    (ledger, stabilizers, packs)
}

// ── Properties ──────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn stability_is_closed_under_parents(
        n in 1usize..=4,
        schedule in proptest::collection::vec(0usize..4, 1..12),
    ) {
        let (keys, mut engine) = committee(n);
        let mut packs = Vec::new();
        for author in schedule {
            packs.push(submit(&mut engine, &keys[author % n], 1));
        }
        for pack in &packs {
            if engine.ledger().is_stable(&pack.hash()).unwrap() {
                for parent in &pack.parents {
                    prop_assert!(engine.ledger().is_stable(parent).unwrap());
                }
            }
        }
    }

    #[test]
    fn base_tokens_are_conserved(
        n in 1usize..=4,
        schedule in proptest::collection::vec((0usize..4, 0u32..500), 1..12),
    ) {
        let (keys, mut engine) = committee(n);
        for (author, amount) in schedule {
            submit(&mut engine, &keys[author % n], amount);
        }
        prop_assert_eq!(base_total(&engine, &keys), BigUint::from(START) * n);
    }

    #[test]
    fn every_pack_stabilizes_after_a_full_round(
        n in 1usize..=4,
        schedule in proptest::collection::vec(0usize..4, 1..10),
    ) {
        let (keys, mut engine) = committee(n);
        let mut packs = Vec::new();
        for author in schedule {
            packs.push(submit(&mut engine, &keys[author % n], 1));
        }
        for key in &keys {
            submit(&mut engine, key, 1);
        }
        for pack in &packs {
            prop_assert!(engine.ledger().is_stable(&pack.hash()).unwrap());
        }
    }

    #[test]
    fn weight_is_bounded_and_grows_with_descendants(
        n in 1usize..=4,
        shape in proptest::collection::vec(
            (0usize..6, proptest::collection::vec(any::<usize>(), 0..3)),
            1..14,
        ),
    ) {
        let (ledger, stabilizers, packs) = raw_dag(n, &shape);
        let views: Vec<_> = packs
            .iter()
            .map(|p| dag_weight(&ledger, p, &stabilizers).unwrap())
            .collect();
        for view in &views {
            prop_assert!(view.values().all(|w| *w <= n));
        }
        for (child, pack) in packs.iter().enumerate() {
            for parent in &pack.parents {
                let Some(at) = packs.iter().position(|p| p.hash() == *parent) else {
                    continue;
                };
                for (hash, weight) in &views[at] {
                    prop_assert!(views[child].get(hash).copied().unwrap_or(0) >= *weight);
                }
            }
        }
    }

    #[test]
    fn decode_rejects_garbage(bytes in proptest::collection::vec(any::<u8>(), 0..400)) {
        if let Ok(pack) = Pack::decode(&bytes) {
            prop_assert_eq!(pack.bytes(), &bytes[..]);
        }
    }

    #[test]
    fn tampering_breaks_the_signature(at in 0usize..200, flip in 1u8..=255) {
        let (key, pack) = sealed_pack();
        let mut bytes = pack.bytes().to_vec();
        let at = at % bytes.len();
        bytes[at] ^= flip;
        if let Ok(tampered) = Pack::decode(&bytes) {
            prop_assert_ne!(tampered.hash(), pack.hash());
            prop_assert!(!tampered.verify_signature(&key.public_key()));
        }
    }

    #[test]
    fn parents_stay_sorted_and_unique(hashes in proptest::collection::vec(any::<[u8; 32]>(), 0..16)) {
        let mut pack = Pack::new();
        for hash in &hashes {
            pack.parent(*hash);
        }
        let mut expected: Vec<Hash> = hashes.clone();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(&pack.parents, &expected);
    }
}

#[test]
fn threshold_is_a_strict_majority() {
    for n in 1..=64 {
        let t = threshold(n);
        assert!(2 * t > n, "threshold {} of {} is not a majority", t, n);
        assert!(t <= n);
    }
}
