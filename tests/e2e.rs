//! End-to-end integration tests for packdag.
//!
//! These tests drive the public API the way a node does: packs are built and
//! sealed against the ledger, admitted through the consensus engine, and the
//! resulting ledger state is inspected.
//!
//! Tests are organized into three groups:
//! - **Group A**: admission and stabilization
//! - **Group B**: transitions applied on stabilization
//! - **Group C**: contracts deployed and called through Execute

use std::sync::Arc;

use num_bigint::{BigInt, BigUint};

use packdag::config::Config;
use packdag::consensus::{AdmissionError, Engine};
use packdag::constants::{BASE_TOKEN, COMMUNITY_ADDRESS, GENESIS_HASH};
use packdag::crypto::keys::Keypair;
use packdag::network::NullTransport;
use packdag::pack::Pack;
use packdag::state::{keys, Genesis, Ledger, Stabilizer};
use packdag::storage::SledStorage;
use packdag::transition::{Milestone, TokenSpec};
use packdag::vm::{asm, Op};

// ── Helpers ─────────────────────────────────────────────────────────────

/// Engine over a fresh ledger. Every stabilizer gets support 100 and every
/// key in `stabilizers` and `users` a base balance of 100 000.
fn engine(stabilizers: &[&Keypair], users: &[&Keypair], config: Config) -> Engine {
    let store = Arc::new(SledStorage::open_temporary().unwrap());
    engine_on(store, stabilizers, users, config)
}

fn engine_on(
    store: Arc<SledStorage>,
    stabilizers: &[&Keypair],
    users: &[&Keypair],
    config: Config,
) -> Engine {
    let mut ledger = Ledger::new(store);
    let everyone: Vec<&Keypair> = stabilizers.iter().chain(users).copied().collect();
    ledger
        .initialize(&Genesis {
            public_key: stabilizers[0].public_key(),
            supply: BigUint::from(100_000u32 * everyone.len() as u32),
            stabilizers: stabilizers
                .iter()
                .map(|k| (k.public_key(), BigUint::from(100u8)))
                .collect(),
            balances: everyone
                .iter()
                .map(|k| (k.address(), BigUint::from(100_000u32)))
                .collect(),
            accounts: users.iter().map(|k| k.public_key()).collect(),
        })
        .unwrap();
    Engine::new(ledger, config, Arc::new(NullTransport))
}

fn seal(engine: &Engine, keypair: &Keypair, mut pack: Pack) -> Pack {
    pack.seal(keypair, engine.ledger()).unwrap();
    pack
}

fn payment(amount: u32) -> Pack {
    let mut pack = Pack::new();
    pack.pay(BASE_TOKEN, COMMUNITY_ADDRESS, &BigUint::from(amount));
    pack
}

fn balance(engine: &Engine, address: &[u8; 32], token: &[u8; 32]) -> BigUint {
    engine.ledger().balance(address, token).unwrap()
}

fn stable(engine: &Engine, pack: &Pack) -> bool {
    engine.ledger().is_stable(&pack.hash()).unwrap()
}

// ── Group A: admission and stabilization ────────────────────────────────

#[test]
fn single_stabilizer_payment_stabilizes_in_one_admission() {
    let genesis = Keypair::generate();
    let mut engine = engine(&[&genesis], &[], Config::default());
    let pack = seal(&engine, &genesis, payment(10));

    let admitted = engine.admit(pack.bytes()).unwrap();
    assert_eq!(admitted.stabilized, vec![pack.hash()]);
    assert!(stable(&engine, &pack));
    assert_eq!(engine.ledger().last_stable().unwrap(), pack.hash());
    assert_eq!(
        balance(&engine, &COMMUNITY_ADDRESS, &BASE_TOKEN),
        BigUint::from(10u8) + pack.len()
    );
}

#[test]
fn two_stabilizers_need_each_other() {
    let a = Keypair::generate();
    let b = Keypair::generate();
    let mut engine = engine(&[&a, &b], &[], Config::default());

    let first = seal(&engine, &a, payment(10));
    let admitted = engine.admit(first.bytes()).unwrap();
    assert!(admitted.stabilized.is_empty());
    assert!(!stable(&engine, &first));

    let second = seal(&engine, &b, payment(20));
    assert_eq!(second.parents, vec![first.hash()]);
    let admitted = engine.admit(second.bytes()).unwrap();
    assert_eq!(admitted.stabilized, vec![first.hash()]);
    assert!(stable(&engine, &first));
    assert!(!stable(&engine, &second));

    // a's commission to b arrives with a's pack.
    assert_eq!(
        balance(&engine, &b.address(), &BASE_TOKEN),
        BigUint::from(100_000u32) + first.len()
    );
}

#[test]
fn restart_between_admission_and_stabilization_keeps_the_balance() {
    let a = Keypair::generate();
    let b = Keypair::generate();
    let store = Arc::new(SledStorage::open_temporary().unwrap());
    let mut engine = engine_on(store.clone(), &[&a, &b], &[], Config::default());

    let p1 = seal(&engine, &a, payment(10));
    engine.admit(p1.bytes()).unwrap();
    let p2 = seal(&engine, &a, payment(20));
    assert_eq!(p2.parents, vec![p1.hash()]);
    engine.admit(p2.bytes()).unwrap();
    drop(engine);

    // A new engine over the same storage starts with nothing cached.
    let mut engine = Engine::new(Ledger::new(store), Config::default(), Arc::new(NullTransport));
    let p3 = seal(&engine, &b, payment(30));
    let admitted = engine.admit(p3.bytes()).unwrap();
    assert_eq!(admitted.stabilized, vec![p1.hash(), p2.hash()]);
    assert_eq!(
        balance(&engine, &a.address(), &BASE_TOKEN),
        BigUint::from(100_000u32 - 30) - BigUint::from(2 * (p1.len() + p2.len()))
    );
}

#[test]
fn divergent_pack_from_same_author_is_rejected() {
    let genesis = Keypair::generate();
    let user = Keypair::generate();
    let mut engine = engine(&[&genesis], &[&user], Config::default());

    let first = seal(&engine, &user, payment(1));
    engine.admit(first.bytes()).unwrap();

    let mut fork = payment(2);
    fork.parent(GENESIS_HASH);
    let fork = seal(&engine, &user, fork);
    assert!(matches!(
        engine.admit(fork.bytes()),
        Err(AdmissionError::NotSequential)
    ));
    assert_eq!(engine.ledger().leaves().unwrap(), vec![first.hash()]);

    let next = seal(&engine, &user, payment(3));
    engine.admit(next.bytes()).unwrap();
}

#[test]
fn milestone_finalizes_every_ancestor() {
    let a = Keypair::generate();
    let b = Keypair::generate();
    let config = Config {
        consensus: packdag::config::ConsensusConfig {
            verify_milestones: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut engine = engine(&[&a, &b], &[], config);

    let first = seal(&engine, &a, payment(10));
    engine.admit(first.bytes()).unwrap();
    assert!(!stable(&engine, &first));

    let state = engine.ledger().state_hash().unwrap();
    let mut bad = Pack::new();
    bad.milestone_transition(Milestone::new(state, vec![b.sign(&state)]));
    let bad = seal(&engine, &b, bad);
    assert!(matches!(
        engine.admit(bad.bytes()),
        Err(AdmissionError::InvalidMilestone)
    ));

    let mut milestone = Pack::new();
    milestone.milestone_transition(Milestone::new(state, vec![a.sign(&state), b.sign(&state)]));
    let milestone = seal(&engine, &b, milestone);
    let admitted = engine.admit(milestone.bytes()).unwrap();
    assert_eq!(admitted.stabilized, vec![first.hash(), milestone.hash()]);
    assert_eq!(engine.ledger().milestone().unwrap(), milestone.hash());
    assert_eq!(engine.ledger().previous_milestone().unwrap(), GENESIS_HASH);

    // New packs adopt the new milestone.
    let after = seal(&engine, &a, payment(1));
    assert_eq!(after.milestone, milestone.hash());
    engine.admit(after.bytes()).unwrap();

    // Referencing the new milestone's descendants under the old one is refused.
    let mut stale = payment(1);
    stale.milestone(GENESIS_HASH);
    let stale = seal(&engine, &b, stale);
    assert!(matches!(
        engine.admit(stale.bytes()),
        Err(AdmissionError::MilestoneMismatch)
    ));
}

#[test]
fn pack_left_behind_by_a_milestone_is_forfeited() {
    let genesis = Keypair::generate();
    let user = Keypair::generate();
    let mut engine = engine(&[&genesis], &[&user], Config::default());

    let lagging = seal(&engine, &user, payment(7));
    engine.admit(lagging.bytes()).unwrap();

    let state = engine.ledger().state_hash().unwrap();
    let mut milestone = Pack::new();
    milestone
        .milestone_transition(Milestone::new(state, vec![genesis.sign(&state)]))
        .parent(GENESIS_HASH);
    let milestone = seal(&engine, &genesis, milestone);
    engine.admit(milestone.bytes()).unwrap();
    assert!(!stable(&engine, &lagging));

    // Builds on both milestones' frontiers: the lagging pack now stabilizes
    // under a milestone it does not reference.
    let closing = seal(&engine, &genesis, payment(1));
    assert_eq!(closing.parents.len(), 2);
    let admitted = engine.admit(closing.bytes()).unwrap();
    assert_eq!(admitted.stabilized, vec![lagging.hash(), closing.hash()]);
    assert_eq!(balance(&engine, &user.address(), &BASE_TOKEN), BigUint::from(0u8));
    assert!(balance(&engine, &COMMUNITY_ADDRESS, &BASE_TOKEN) >= BigUint::from(100_000u32));
}

#[test]
fn rejected_admission_leaves_no_trace() {
    let genesis = Keypair::generate();
    let mut engine = engine(&[&genesis], &[], Config::default());
    let before = engine.ledger().state_hash().unwrap();

    let mut orphan = payment(1);
    orphan.parent([3u8; 32]);
    let orphan = seal(&engine, &genesis, orphan);
    assert!(matches!(
        engine.admit(orphan.bytes()),
        Err(AdmissionError::UnknownParent(_))
    ));
    assert!(!engine.ledger().has_pack(&orphan.hash()).unwrap());
    assert_eq!(engine.ledger().state_hash().unwrap(), before);
    assert!(matches!(engine.admit(&[1, 2, 3]), Err(AdmissionError::Codec(_))));
}

// ── Group B: transitions ────────────────────────────────────────────────

/// Define a token issued by `issuer`, then mint `minted` of it to the issuer.
fn token_with_balance(engine: &mut Engine, issuer: &Keypair, burnable: bool, minted: u32) -> [u8; 32] {
    let mut define = Pack::new();
    let nonce = define
        .token(
            TokenSpec::new(BigUint::from(2000u32), burnable, [issuer.address()]),
            None,
        )
        .unwrap();
    let define = seal(engine, issuer, define);
    engine.admit(define.bytes()).unwrap();
    let token = keys::token_hash(&define.hash(), nonce);

    let mut issue = Pack::new();
    issue.issue(token, issuer.address(), &BigUint::from(minted));
    let issue = seal(engine, issuer, issue);
    engine.admit(issue.bytes()).unwrap();
    token
}

#[test]
fn burn_reduces_balance_and_supply() {
    let genesis = Keypair::generate();
    let mut engine = engine(&[&genesis], &[], Config::default());
    let token = token_with_balance(&mut engine, &genesis, true, 100);
    assert_eq!(balance(&engine, &genesis.address(), &token), BigUint::from(100u8));

    let mut burn = Pack::new();
    burn.burn(token, &BigUint::from(50u8));
    let burn = seal(&engine, &genesis, burn);
    engine.admit(burn.bytes()).unwrap();
    assert_eq!(balance(&engine, &genesis.address(), &token), BigUint::from(50u8));
    assert_eq!(engine.ledger().supply(&token).unwrap(), BigUint::from(50u8));
}

#[test]
fn burning_a_non_burnable_token_does_nothing() {
    let genesis = Keypair::generate();
    let mut engine = engine(&[&genesis], &[], Config::default());
    let token = token_with_balance(&mut engine, &genesis, false, 100);

    let mut burn = Pack::new();
    burn.burn(token, &BigUint::from(50u8));
    let burn = seal(&engine, &genesis, burn);
    engine.admit(burn.bytes()).unwrap();
    assert!(stable(&engine, &burn));
    assert_eq!(balance(&engine, &genesis.address(), &token), BigUint::from(100u8));
    assert_eq!(engine.ledger().supply(&token).unwrap(), BigUint::from(100u8));
}

#[test]
fn issue_above_cap_does_nothing() {
    let genesis = Keypair::generate();
    let mut engine = engine(&[&genesis], &[], Config::default());
    let token = token_with_balance(&mut engine, &genesis, true, 1500);

    let mut issue = Pack::new();
    issue.issue(token, genesis.address(), &BigUint::from(501u32));
    let issue = seal(&engine, &genesis, issue);
    engine.admit(issue.bytes()).unwrap();
    assert_eq!(engine.ledger().supply(&token).unwrap(), BigUint::from(1500u32));
}

#[test]
fn support_replaces_the_weakest_stabilizer() {
    let genesis = Keypair::generate();
    let user = Keypair::generate();
    let mut engine = engine(&[&genesis], &[&user], Config::default());

    let mut stake = Pack::new();
    stake.support(user.address(), &BigInt::from(500));
    let stake = seal(&engine, &user, stake);
    engine.admit(stake.bytes()).unwrap();
    assert!(!stable(&engine, &stake));

    let endorse = seal(&engine, &genesis, payment(1));
    let admitted = engine.admit(endorse.bytes()).unwrap();
    assert_eq!(admitted.stabilized, vec![stake.hash()]);
    assert_eq!(
        engine.ledger().stabilizers().unwrap(),
        vec![Stabilizer {
            address: user.address(),
            support: BigUint::from(500u32),
        }]
    );
    // Weights were recomputed under the new set, where the endorser has no seat.
    assert!(!stable(&engine, &endorse));
    assert_eq!(engine.ledger().staked(&user.address(), &user.address()).unwrap(), BigUint::from(500u32));
}

#[test]
fn channel_and_account_updates_apply() {
    let genesis = Keypair::generate();
    let newcomer = Keypair::generate();
    let mut engine = engine(&[&genesis], &[], Config::default());

    let mut pack = Pack::new();
    pack.channel(b"greeting".to_vec(), b"hello".to_vec())
        .account(newcomer.public_key());
    let pack = seal(&engine, &genesis, pack);
    engine.admit(pack.bytes()).unwrap();
    assert_eq!(
        engine.ledger().channel(&genesis.address(), b"greeting").unwrap(),
        Some(b"hello".to_vec())
    );
    assert_eq!(
        engine.ledger().public_key(&newcomer.address()).unwrap(),
        Some(newcomer.public_key())
    );
}

// ── Group C: contracts ──────────────────────────────────────────────────

#[test]
fn contract_pays_out_from_its_balance() {
    let genesis = Keypair::generate();
    let mut engine = engine(&[&genesis], &[], Config::default());
    let recipient = [0x42u8; 32];

    let mut code = vec![Op::Label.byte()];
    code.extend(asm::pay(&recipient, &BASE_TOKEN, &BigUint::from(5u8)));

    let mut deploy = Pack::new();
    let contract = deploy.dapp(code);
    deploy.pay(BASE_TOKEN, contract, &BigUint::from(100u8));
    let deploy = seal(&engine, &genesis, deploy);
    engine.admit(deploy.bytes()).unwrap();
    assert_eq!(balance(&engine, &contract, &BASE_TOKEN), BigUint::from(100u8));

    let before = balance(&engine, &COMMUNITY_ADDRESS, &BASE_TOKEN);
    let mut call = Pack::new();
    call.execute(contract, 0, Vec::new(), 5000);
    let call = seal(&engine, &genesis, call);
    engine.admit(call.bytes()).unwrap();

    assert_eq!(balance(&engine, &recipient, &BASE_TOKEN), BigUint::from(5u8));
    assert_eq!(balance(&engine, &contract, &BASE_TOKEN), BigUint::from(95u8));
    assert_eq!(
        balance(&engine, &COMMUNITY_ADDRESS, &BASE_TOKEN),
        before + 5000u32 + call.len()
    );
}

#[test]
fn failing_contract_still_charges_gas() {
    let genesis = Keypair::generate();
    let mut engine = engine(&[&genesis], &[], Config::default());
    let recipient = [0x42u8; 32];

    // Pays out of an empty balance: the call fails with nothing emitted.
    let mut code = vec![Op::Label.byte()];
    code.extend(asm::pay(&recipient, &BASE_TOKEN, &BigUint::from(5u8)));
    let mut deploy = Pack::new();
    let contract = deploy.dapp(code);
    let deploy = seal(&engine, &genesis, deploy);
    engine.admit(deploy.bytes()).unwrap();

    let before = balance(&engine, &genesis.address(), &BASE_TOKEN);
    let mut call = Pack::new();
    call.execute(contract, 0, Vec::new(), 3000);
    let call = seal(&engine, &genesis, call);
    engine.admit(call.bytes()).unwrap();

    assert_eq!(balance(&engine, &recipient, &BASE_TOKEN), BigUint::from(0u8));
    assert_eq!(
        balance(&engine, &genesis.address(), &BASE_TOKEN),
        before - 3000u32 - call.len()
    );
}

#[test]
fn execute_on_unknown_contract_is_skipped_without_gas() {
    let genesis = Keypair::generate();
    let mut engine = engine(&[&genesis], &[], Config::default());

    let before = balance(&engine, &genesis.address(), &BASE_TOKEN);
    let mut call = Pack::new();
    call.execute([0x99u8; 32], 0, Vec::new(), 3000);
    let call = seal(&engine, &genesis, call);
    engine.admit(call.bytes()).unwrap();
    assert!(stable(&engine, &call));
    assert_eq!(
        balance(&engine, &genesis.address(), &BASE_TOKEN),
        before - call.len()
    );
}
