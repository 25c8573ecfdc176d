//! # Stabilizer-weighted DAG consensus
//!
//! Packs are admitted one at a time into an unstable frontier. A pack only
//! becomes final (stable) once stabilizers holding a strict majority of seats
//! have built on it, directly or through descendants.
//!
//! ## Admission
//!
//! ```text
//!   bytes ─ decode ─ static checks ─ store temporal ─ update leaves
//!                        │                                  │
//!              unknown parents from a           author is a stabilizer?
//!              stabilizer are fetched                       │
//!              and admitted first               weights ─ chain ─ make_stable
//! ```
//!
//! Everything one admission writes, fetched parents included, lands in a
//! single ledger batch that is committed at the end or discarded on error.
//!
//! ## Stabilization
//!
//! - [`weight`]: how many distinct stabilizers stand on each unstable pack.
//! - [`chain`]: the causal order in which heavy-enough packs are finalized.
//! - [`sequence`]: the no-fork rule for each author.
//! - [`finalize`]: commissions, transition application and forfeiture.
//!
//! A milestone pack already carries every stabilizer's signature, so it
//! finalizes all of its unstable ancestors at once.

pub mod chain;
pub mod finalize;
pub mod sequence;
pub mod weight;

use std::collections::BTreeSet;
use std::sync::Arc;

use num_bigint::BigUint;

use crate::codec::CodecError;
use crate::config::Config;
use crate::constants::BASE_TOKEN;
use crate::network::{query_pack, NetworkError, Transport};
use crate::pack::Pack;
use crate::state::{Ledger, StateError};
use crate::transition::Kind;
use crate::{short, Hash};

use chain::stabilization_chain;
use finalize::{make_stable, Outcome};
use sequence::Sequencer;
use weight::{dag_weight, threshold};

/// Why a pack was refused.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Duplicate pack")]
    Duplicate,
    #[error("Ledger has no genesis")]
    Uninitialized,
    #[error("Unknown pack issuer")]
    UnknownIssuer,
    #[error("Not enough balance to cover the fees")]
    InsufficientBalance,
    #[error("Invalid parent array")]
    InvalidParents,
    #[error("Invalid pack signature")]
    InvalidSignature,
    #[error("Some parents are not known: {0}")]
    UnknownParent(String),
    #[error("Fetched parent {0} does not match its hash")]
    ParentMismatch(String),
    #[error("The pack references parents from more than two different milestones")]
    TooManyMilestones,
    #[error("The pack references parents from two milestones that are not the latest ones")]
    StaleMilestones,
    #[error("The pack references parents from the two latest milestones but its milestone is the oldest one")]
    OldMilestone,
    #[error("The pack references parents from a single milestone but its milestone is not that of the parents")]
    MilestoneMismatch,
    #[error("Milestone is not signed by every stabilizer over the current state")]
    InvalidMilestone,
    #[error("The pack is not sequential")]
    NotSequential,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Summary of one successful admission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Admitted {
    pub hash: Hash,
    /// Packs finalized by this admission, in application order.
    pub stabilized: Vec<Hash>,
    /// Parents fetched from the network and admitted first.
    pub fetched: Vec<Hash>,
}

/// The consensus engine: owns the ledger and admits packs serially.
pub struct Engine {
    ledger: Ledger,
    sequencer: Sequencer,
    config: Config,
    transport: Arc<dyn Transport>,
}

impl Engine {
    pub fn new(ledger: Ledger, config: Config, transport: Arc<dyn Transport>) -> Self {
        Engine {
            ledger,
            sequencer: Sequencer::new(config.consensus.sequence_cache_size),
            config,
            transport,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Validate, store and possibly stabilize an encoded pack. Nothing is
    /// written unless the whole admission succeeds.
    pub fn admit(&mut self, bytes: &[u8]) -> Result<Admitted, AdmissionError> {
        let pack = Pack::decode(bytes)?;
        if self.ledger.has_pack(&pack.hash())? {
            return Err(AdmissionError::Duplicate);
        }
        if !self.ledger.is_initialized()? {
            return Err(AdmissionError::Uninitialized);
        }

        self.ledger.begin_batch()?;
        let mut admitted = Admitted {
            hash: pack.hash(),
            ..Default::default()
        };
        match self.handle(&pack, &mut admitted) {
            Ok(()) => {
                self.ledger.commit()?;
                tracing::info!(
                    pack = %short(&admitted.hash),
                    author = %hex::encode(&pack.author[..8]),
                    stabilized = admitted.stabilized.len(),
                    fetched = admitted.fetched.len(),
                    "Admitted pack"
                );
                Ok(admitted)
            }
            Err(e) => {
                self.ledger.rollback();
                tracing::warn!(pack = %short(&pack.hash()), error = %e, "Rejected pack");
                Err(e)
            }
        }
    }

    /// Admission body, run inside the batch. Recurses for fetched parents.
    fn handle(&mut self, pack: &Pack, admitted: &mut Admitted) -> Result<(), AdmissionError> {
        let hash = pack.hash();
        let public_key = self
            .ledger
            .public_key(&pack.author)?
            .ok_or(AdmissionError::UnknownIssuer)?;
        let balance = self.ledger.balance(&pack.author, &BASE_TOKEN)?;
        if balance < BigUint::from(pack.len()) {
            return Err(AdmissionError::InsufficientBalance);
        }
        if !pack.valid_parents() {
            return Err(AdmissionError::InvalidParents);
        }
        if !pack.verify_signature(&public_key) {
            return Err(AdmissionError::InvalidSignature);
        }

        let is_stabilizer = self.ledger.is_stabilizer(&pack.author)?;
        self.fetch_parents(pack, is_stabilizer, admitted)?;
        self.check_milestones(pack)?;
        if !self.sequencer.is_sequential(&self.ledger, pack)? {
            return Err(AdmissionError::NotSequential);
        }

        self.ledger.put_temporal(pack)?;
        let mut leaves: BTreeSet<Hash> = self
            .ledger
            .leaves()?
            .into_iter()
            .filter(|leaf| !pack.parents.contains(leaf))
            .collect();
        leaves.insert(hash);
        self.ledger.put_leaves(&leaves.into_iter().collect::<Vec<_>>())?;
        tracing::debug!(pack = %short(&hash), "Stored unstable pack");

        if is_stabilizer {
            self.stabilize(pack, admitted)?;
        }
        Ok(())
    }

    fn fetch_parents(
        &mut self,
        pack: &Pack,
        is_stabilizer: bool,
        admitted: &mut Admitted,
    ) -> Result<(), AdmissionError> {
        for parent in &pack.parents {
            if self.ledger.has_pack(parent)? {
                continue;
            }
            if !is_stabilizer {
                return Err(AdmissionError::UnknownParent(short(parent)));
            }
            let bytes = query_pack(
                self.transport.as_ref(),
                parent,
                self.config.network.query_retries,
            )
            .map_err(|_| AdmissionError::UnknownParent(short(parent)))?;
            let fetched = Pack::decode(&bytes)?;
            if fetched.hash() != *parent {
                return Err(AdmissionError::ParentMismatch(short(parent)));
            }
            tracing::debug!(pack = %short(&pack.hash()), parent = %short(parent), "Admitting fetched parent");
            self.handle(&fetched, admitted)?;
            admitted.fetched.push(*parent);
        }
        Ok(())
    }

    fn check_milestones(&self, pack: &Pack) -> Result<(), AdmissionError> {
        let current = self.ledger.milestone()?;
        let previous = self.ledger.previous_milestone()?;
        let mut milestones = BTreeSet::new();
        for parent in &pack.parents {
            let milestone = match self.ledger.pack(parent)? {
                Some(p) => p.milestone_of(),
                None => current,
            };
            milestones.insert(milestone);
        }
        match milestones.len() {
            0 | 1 => {
                if milestones.iter().any(|m| *m != pack.milestone) {
                    return Err(AdmissionError::MilestoneMismatch);
                }
            }
            2 => {
                if !milestones.contains(&current) || !milestones.contains(&previous) {
                    return Err(AdmissionError::StaleMilestones);
                }
                if pack.milestone != current {
                    return Err(AdmissionError::OldMilestone);
                }
            }
            _ => return Err(AdmissionError::TooManyMilestones),
        }

        if self.config.consensus.verify_milestones {
            if let Some(milestone) = &pack.body.milestone {
                let mut keys = Vec::new();
                for stabilizer in self.ledger.stabilizers()? {
                    if let Some(key) = self.ledger.public_key(&stabilizer.address)? {
                        keys.push(key);
                    }
                }
                if !milestone.verify(&keys, &self.ledger.state_hash()?) {
                    return Err(AdmissionError::InvalidMilestone);
                }
            }
        }
        Ok(())
    }

    /// Finalize whatever the new stabilizer pack pushed over the threshold.
    fn stabilize(&mut self, pack: &Pack, admitted: &mut Admitted) -> Result<(), AdmissionError> {
        let mut stabilizers = self.ledger.stabilizers()?;
        let mut weights = dag_weight(&self.ledger, pack, &stabilizers)?;

        if pack.body.has(Kind::Milestone) {
            let chain = stabilization_chain(&self.ledger, pack, &stabilizers, &weights, 0)?;
            for member in &chain {
                self.finalize(member, admitted)?;
            }
            return Ok(());
        }

        let chain = stabilization_chain(
            &self.ledger,
            pack,
            &stabilizers,
            &weights,
            threshold(stabilizers.len()),
        )?;
        for member in &chain {
            if self.ledger.is_stable(&member.hash())? {
                continue;
            }
            let weight = weights.get(&member.hash()).copied().unwrap_or(0);
            if weight < threshold(stabilizers.len()) {
                continue;
            }
            self.finalize(member, admitted)?;
            if member.body.has(Kind::Support) {
                stabilizers = self.ledger.stabilizers()?;
                weights = dag_weight(&self.ledger, pack, &stabilizers)?;
            }
        }
        Ok(())
    }

    fn finalize(&mut self, pack: &Pack, admitted: &mut Admitted) -> Result<(), AdmissionError> {
        let outcome = make_stable(&mut self.ledger, &mut self.sequencer, &self.config.vm, pack)?;
        if outcome != Outcome::Applied {
            tracing::debug!(pack = %short(&pack.hash()), ?outcome, "Stabilized without effect");
        }
        admitted.stabilized.push(pack.hash());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COMMUNITY_ADDRESS, GENESIS_HASH};
    use crate::crypto::keys::Keypair;
    use crate::network::{LoopbackTransport, NullTransport};
    use crate::state::Genesis;
    use crate::storage::SledStorage;

    fn engine_with(stabilizers: &[&Keypair], transport: Arc<dyn Transport>) -> Engine {
        let mut ledger = Ledger::new(Arc::new(SledStorage::open_temporary().unwrap()));
        ledger
            .initialize(&Genesis {
                public_key: stabilizers[0].public_key(),
                supply: BigUint::from(500_000u32),
                stabilizers: stabilizers
                    .iter()
                    .map(|k| (k.public_key(), BigUint::from(100u8)))
                    .collect(),
                balances: stabilizers
                    .iter()
                    .map(|k| (k.address(), BigUint::from(500_000u32 / stabilizers.len() as u32)))
                    .collect(),
                accounts: Vec::new(),
            })
            .unwrap();
        Engine::new(ledger, Config::default(), transport)
    }

    fn payment(engine: &Engine, keypair: &Keypair, amount: u32) -> Pack {
        let mut pack = Pack::new();
        pack.pay(BASE_TOKEN, COMMUNITY_ADDRESS, &BigUint::from(amount));
        pack.seal(keypair, engine.ledger()).unwrap();
        pack
    }

    #[test]
    fn single_stabilizer_stabilizes_immediately() {
        let genesis = Keypair::generate();
        let mut engine = engine_with(&[&genesis], Arc::new(NullTransport));
        let pack = payment(&engine, &genesis, 10);
        let admitted = engine.admit(pack.bytes()).unwrap();
        assert_eq!(admitted.stabilized, vec![pack.hash()]);
        assert!(engine.ledger().is_stable(&pack.hash()).unwrap());
        assert_eq!(engine.ledger().leaves().unwrap(), vec![pack.hash()]);
    }

    #[test]
    fn duplicate_is_rejected() {
        let genesis = Keypair::generate();
        let mut engine = engine_with(&[&genesis], Arc::new(NullTransport));
        let pack = payment(&engine, &genesis, 10);
        engine.admit(pack.bytes()).unwrap();
        assert!(matches!(engine.admit(pack.bytes()), Err(AdmissionError::Duplicate)));
    }

    #[test]
    fn unknown_author_is_rejected_without_writes() {
        let genesis = Keypair::generate();
        let stranger = Keypair::generate();
        let mut engine = engine_with(&[&genesis], Arc::new(NullTransport));
        let pack = payment(&engine, &stranger, 1);
        assert!(matches!(
            engine.admit(pack.bytes()),
            Err(AdmissionError::UnknownIssuer)
        ));
        assert!(!engine.ledger().has_pack(&pack.hash()).unwrap());
        assert_eq!(engine.ledger().leaves().unwrap(), vec![GENESIS_HASH]);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let genesis = Keypair::generate();
        let mut engine = engine_with(&[&genesis], Arc::new(NullTransport));
        let pack = payment(&engine, &genesis, 1);
        let mut bytes = pack.bytes().to_vec();
        bytes[40] ^= 1;
        assert!(matches!(
            engine.admit(&bytes),
            Err(AdmissionError::InvalidSignature)
        ));
    }

    #[test]
    fn unknown_parent_from_non_stabilizer() {
        let genesis = Keypair::generate();
        let user = Keypair::generate();
        let mut engine = engine_with(&[&genesis], Arc::new(NullTransport));
        engine.ledger.put_public_key(&user.public_key()).unwrap();
        engine
            .ledger
            .set_balance(&user.address(), &BASE_TOKEN, &BigUint::from(10_000u32))
            .unwrap();
        let mut pack = Pack::new();
        pack.pay(BASE_TOKEN, COMMUNITY_ADDRESS, &BigUint::from(1u8));
        pack.parent([5u8; 32]);
        pack.seal(&user, engine.ledger()).unwrap();
        assert!(matches!(
            engine.admit(pack.bytes()),
            Err(AdmissionError::UnknownParent(_))
        ));
    }

    #[test]
    fn stabilizer_fetches_missing_parents() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let (transport, _rx) = LoopbackTransport::new();
        let mut engine = engine_with(&[&a, &b], Arc::new(transport.clone()));

        // Build a's pack on a scratch copy of the ledger state.
        let mut first = Pack::new();
        first.pay(BASE_TOKEN, COMMUNITY_ADDRESS, &BigUint::from(3u8));
        first.parent(GENESIS_HASH).milestone(GENESIS_HASH);
        first.seal(&a, engine.ledger()).unwrap();
        transport.offer(first.bytes());

        let mut second = Pack::new();
        second.pay(BASE_TOKEN, COMMUNITY_ADDRESS, &BigUint::from(4u8));
        second.parent(first.hash()).milestone(GENESIS_HASH);
        second.seal(&b, engine.ledger()).unwrap();

        let admitted = engine.admit(second.bytes()).unwrap();
        assert_eq!(admitted.fetched, vec![first.hash()]);
        assert_eq!(admitted.stabilized, vec![first.hash()]);
        assert!(!engine.ledger().is_stable(&second.hash()).unwrap());
    }
}
