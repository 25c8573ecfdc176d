//! Ledger state.
//!
//! [`Ledger`] is a write overlay on top of a [`Storage`] backend. Between
//! [`Ledger::begin_batch`] and [`Ledger::commit`] every write lands in a
//! pending batch that reads see first; [`Ledger::rollback`] discards it.
//! Outside a batch writes go straight to storage.
//!
//! Typed accessors map balances, supplies, tokens, channels, keys, code,
//! stake and the DAG bookkeeping (packs, leaves, milestones, stabilizers)
//! onto storage keys built by [`keys`].

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::constants::{BASE_TOKEN, GENESIS_HASH};
use crate::crypto::keys::address_of;
use crate::pack::Pack;
use crate::storage::{Batch, Storage, StorageError};
use crate::transition::token::TokenSpec;
use crate::{Address, Hash, PublicKeyBytes};

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("corrupt record {0}: {1}")]
    Corrupt(&'static str, String),
    #[error("a batch is already in progress")]
    BatchInProgress,
    #[error("no batch in progress")]
    NoBatch,
    #[error("ledger already initialized")]
    AlreadyInitialized,
}

/// Storage key derivation.
pub mod keys {
    use crate::constants::BASE_TOKEN;
    use crate::{sha256_concat, Address, Hash};

    pub const LEAVES: &[u8] = b"leaves";
    pub const MILESTONE: &[u8] = b"milestone";
    pub const PREVIOUS_MILESTONE: &[u8] = b"previous_milestone";
    pub const STABILIZERS: &[u8] = b"stabilizers";
    pub const LAST_STABLE: &[u8] = b"last_stable";
    pub const GENESIS_AUTHOR: &[u8] = b"genesis_author";

    pub fn balance(address: &Address, token: &Hash) -> Hash {
        sha256_concat(&[b"balance_", address, b"_", token])
    }

    pub fn supply(token: &Hash) -> Hash {
        sha256_concat(&[b"supply_", token])
    }

    /// Token records live under their own hash; the base token, whose hash is
    /// all zeroes, gets a derived key instead.
    pub fn token(token: &Hash) -> Hash {
        if *token == BASE_TOKEN {
            sha256_concat(&[b"token_", token])
        } else {
            *token
        }
    }

    /// Cell id of `key` in `address`'s channel, as contracts name it.
    pub fn channel(address: &Address, key: &[u8]) -> Hash {
        sha256_concat(&[b"channel_", address, key])
    }

    /// Storage key of a channel cell. Hashing the cell id again keeps an
    /// arbitrary 32-byte id from landing on any other record.
    pub fn channel_cell(cell: &Hash) -> Hash {
        sha256_concat(&[b"channel_cell_", cell])
    }

    /// Contract address of deployed code, also its storage key.
    pub fn code(code: &[u8]) -> Address {
        sha256_concat(&[b"sca_", code])
    }

    pub fn staked(supporter: &Address, supportee: &Address) -> Hash {
        sha256_concat(&[b"support_", supporter, b"_", supportee])
    }

    pub fn support(supportee: &Address) -> Hash {
        sha256_concat(&[b"supportee_", supportee])
    }

    pub fn temporal(hash: &Hash) -> Vec<u8> {
        [b"t".as_slice(), hash].concat()
    }

    pub fn permanent(hash: &Hash) -> Vec<u8> {
        [b"p".as_slice(), hash].concat()
    }

    pub fn token_hash(pack: &Hash, nonce: u8) -> Hash {
        sha256_concat(&[b"token_", pack, b"_", &[nonce]])
    }
}

/// A stabilizer and its support weight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stabilizer {
    pub address: Address,
    pub support: BigUint,
}

#[derive(Serialize, Deserialize)]
struct StabilizerRecord {
    address: Hash,
    support: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct TokenRecord {
    cap: Vec<u8>,
    burnable: bool,
    issuers: Vec<Address>,
}

/// Initial ledger contents.
#[derive(Clone, Debug)]
pub struct Genesis {
    pub public_key: PublicKeyBytes,
    pub supply: BigUint,
    /// Stabilizer keys with their initial support.
    pub stabilizers: Vec<(PublicKeyBytes, BigUint)>,
    /// Initial base-token balances. When empty the genesis key holds the whole supply.
    pub balances: Vec<(Address, BigUint)>,
    /// Extra keys registered at genesis.
    pub accounts: Vec<PublicKeyBytes>,
}

/// Order the set ascending by support, weakest first.
pub fn sort_stabilizers(stabilizers: &mut [Stabilizer]) {
    stabilizers.sort_by(|a, b| {
        a.support
            .cmp(&b.support)
            .then_with(|| a.address.cmp(&b.address))
    });
}

/// Batched view over ledger storage.
pub struct Ledger {
    store: Arc<dyn Storage>,
    pending: Option<Batch>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Ledger {
            store,
            pending: None,
        }
    }

    // ── Batching ──

    pub fn begin_batch(&mut self) -> Result<(), StateError> {
        if self.pending.is_some() {
            return Err(StateError::BatchInProgress);
        }
        self.pending = Some(Batch::new());
        Ok(())
    }

    pub fn in_batch(&self) -> bool {
        self.pending.is_some()
    }

    /// Write the pending batch to storage as one atomic unit.
    pub fn commit(&mut self) -> Result<(), StateError> {
        let batch = self.pending.take().ok_or(StateError::NoBatch)?;
        self.store.apply_batch(batch)?;
        Ok(())
    }

    pub fn rollback(&mut self) {
        self.pending = None;
    }

    pub fn flush(&self) -> Result<(), StateError> {
        self.store.flush()?;
        Ok(())
    }

    // ── Raw access ──

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        if let Some(pending) = &self.pending {
            if let Some(value) = pending.get(key) {
                return Ok(value.clone());
            }
        }
        Ok(self.store.get(key)?)
    }

    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StateError> {
        self.write(key, Some(value))
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), StateError> {
        self.write(key, None)
    }

    fn write(&mut self, key: &[u8], value: Option<Vec<u8>>) -> Result<(), StateError> {
        match &mut self.pending {
            Some(pending) => {
                pending.insert(key.to_vec(), value);
            }
            None => {
                let mut batch = Batch::new();
                batch.insert(key.to_vec(), value);
                self.store.apply_batch(batch)?;
            }
        }
        Ok(())
    }

    fn get_hash(&self, key: &[u8], what: &'static str) -> Result<Option<Hash>, StateError> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(
                bytes
                    .try_into()
                    .map_err(|_| StateError::Corrupt(what, "expected 32 bytes".into()))?,
            )),
            None => Ok(None),
        }
    }

    fn get_amount(&self, key: &[u8]) -> Result<BigUint, StateError> {
        Ok(self
            .get(key)?
            .map(|bytes| BigUint::from_bytes_be(&bytes))
            .unwrap_or_default())
    }

    fn put_amount(&mut self, key: &[u8], amount: &BigUint) -> Result<(), StateError> {
        if amount.is_zero() {
            self.delete(key)
        } else {
            self.put(key, amount.to_bytes_be())
        }
    }

    // ── Balances and supply ──

    pub fn balance(&self, address: &Address, token: &Hash) -> Result<BigUint, StateError> {
        self.get_amount(&keys::balance(address, token))
    }

    /// Set a balance; zero removes the record.
    pub fn set_balance(
        &mut self,
        address: &Address,
        token: &Hash,
        amount: &BigUint,
    ) -> Result<(), StateError> {
        self.put_amount(&keys::balance(address, token), amount)
    }

    pub fn credit(
        &mut self,
        address: &Address,
        token: &Hash,
        amount: &BigUint,
    ) -> Result<(), StateError> {
        let balance = self.balance(address, token)? + amount;
        self.set_balance(address, token, &balance)
    }

    pub fn supply(&self, token: &Hash) -> Result<BigUint, StateError> {
        self.get_amount(&keys::supply(token))
    }

    pub fn set_supply(&mut self, token: &Hash, amount: &BigUint) -> Result<(), StateError> {
        self.put_amount(&keys::supply(token), amount)
    }

    // ── Tokens ──

    pub fn token(&self, token: &Hash) -> Result<Option<TokenSpec>, StateError> {
        match self.get(&keys::token(token))? {
            Some(bytes) => {
                let record: TokenRecord = crate::deserialize(&bytes)
                    .map_err(|e| StateError::Corrupt("token", e.to_string()))?;
                Ok(Some(TokenSpec {
                    cap: BigUint::from_bytes_be(&record.cap),
                    burnable: record.burnable,
                    issuers: record.issuers.into_iter().collect(),
                }))
            }
            None => Ok(None),
        }
    }

    pub fn put_token(&mut self, token: &Hash, spec: &TokenSpec) -> Result<(), StateError> {
        let record = TokenRecord {
            cap: spec.cap.to_bytes_be(),
            burnable: spec.burnable,
            issuers: spec.issuers.iter().copied().collect(),
        };
        let bytes =
            crate::serialize(&record).map_err(|e| StateError::Corrupt("token", e.to_string()))?;
        self.put(&keys::token(token), bytes)
    }

    // ── Channels ──

    /// Read a channel cell by its id. Ids outside the channel keyspace read
    /// as empty.
    pub fn channel_cell(&self, cell: &Hash) -> Result<Option<Vec<u8>>, StateError> {
        self.get(&keys::channel_cell(cell))
    }

    pub fn channel(&self, owner: &Address, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.channel_cell(&keys::channel(owner, key))
    }

    pub fn put_channel(
        &mut self,
        owner: &Address,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StateError> {
        self.put(&keys::channel_cell(&keys::channel(owner, key)), value.to_vec())
    }

    // ── Accounts and contracts ──

    pub fn public_key(&self, address: &Address) -> Result<Option<PublicKeyBytes>, StateError> {
        match self.get(address)? {
            Some(bytes) => Ok(Some(bytes.try_into().map_err(|_| {
                StateError::Corrupt("public key", "expected 33 bytes".into())
            })?)),
            None => Ok(None),
        }
    }

    pub fn put_public_key(&mut self, public_key: &PublicKeyBytes) -> Result<Address, StateError> {
        let address = address_of(public_key);
        self.put(&address, public_key.to_vec())?;
        Ok(address)
    }

    pub fn code(&self, contract: &Address) -> Result<Option<Vec<u8>>, StateError> {
        self.get(contract)
    }

    pub fn put_code(&mut self, code: &[u8]) -> Result<Address, StateError> {
        let address = keys::code(code);
        self.put(&address, code.to_vec())?;
        Ok(address)
    }

    // ── Stake ──

    pub fn staked(&self, supporter: &Address, supportee: &Address) -> Result<BigUint, StateError> {
        self.get_amount(&keys::staked(supporter, supportee))
    }

    pub fn set_staked(
        &mut self,
        supporter: &Address,
        supportee: &Address,
        amount: &BigUint,
    ) -> Result<(), StateError> {
        self.put_amount(&keys::staked(supporter, supportee), amount)
    }

    pub fn support(&self, supportee: &Address) -> Result<BigUint, StateError> {
        self.get_amount(&keys::support(supportee))
    }

    pub fn set_support(&mut self, supportee: &Address, amount: &BigUint) -> Result<(), StateError> {
        self.put_amount(&keys::support(supportee), amount)
    }

    /// The stabilizer set, weakest first.
    pub fn stabilizers(&self) -> Result<Vec<Stabilizer>, StateError> {
        match self.get(keys::STABILIZERS)? {
            Some(bytes) => {
                let records: Vec<StabilizerRecord> = crate::deserialize(&bytes)
                    .map_err(|e| StateError::Corrupt("stabilizers", e.to_string()))?;
                Ok(records
                    .into_iter()
                    .map(|r| Stabilizer {
                        address: r.address,
                        support: BigUint::from_bytes_be(&r.support),
                    })
                    .collect())
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn put_stabilizers(&mut self, stabilizers: &[Stabilizer]) -> Result<(), StateError> {
        let mut sorted = stabilizers.to_vec();
        sort_stabilizers(&mut sorted);
        let records: Vec<StabilizerRecord> = sorted
            .into_iter()
            .map(|s| StabilizerRecord {
                address: s.address,
                support: s.support.to_bytes_be(),
            })
            .collect();
        let bytes = crate::serialize(&records)
            .map_err(|e| StateError::Corrupt("stabilizers", e.to_string()))?;
        self.put(keys::STABILIZERS, bytes)
    }

    pub fn is_stabilizer(&self, address: &Address) -> Result<bool, StateError> {
        Ok(self.stabilizers()?.iter().any(|s| s.address == *address))
    }

    // ── DAG bookkeeping ──

    pub fn leaves(&self) -> Result<Vec<Hash>, StateError> {
        match self.get(keys::LEAVES)? {
            Some(bytes) => crate::deserialize(&bytes)
                .map_err(|e| StateError::Corrupt("leaves", e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    pub fn put_leaves(&mut self, leaves: &[Hash]) -> Result<(), StateError> {
        let bytes = crate::serialize(&leaves.to_vec())
            .map_err(|e| StateError::Corrupt("leaves", e.to_string()))?;
        self.put(keys::LEAVES, bytes)
    }

    pub fn milestone(&self) -> Result<Hash, StateError> {
        Ok(self
            .get_hash(keys::MILESTONE, "milestone")?
            .unwrap_or(GENESIS_HASH))
    }

    pub fn set_milestone(&mut self, hash: &Hash) -> Result<(), StateError> {
        self.put(keys::MILESTONE, hash.to_vec())
    }

    pub fn previous_milestone(&self) -> Result<Hash, StateError> {
        Ok(self
            .get_hash(keys::PREVIOUS_MILESTONE, "previous milestone")?
            .unwrap_or(GENESIS_HASH))
    }

    pub fn set_previous_milestone(&mut self, hash: &Hash) -> Result<(), StateError> {
        self.put(keys::PREVIOUS_MILESTONE, hash.to_vec())
    }

    pub fn last_stable(&self) -> Result<Hash, StateError> {
        Ok(self
            .get_hash(keys::LAST_STABLE, "last stable")?
            .unwrap_or(GENESIS_HASH))
    }

    pub fn set_last_stable(&mut self, hash: &Hash) -> Result<(), StateError> {
        self.put(keys::LAST_STABLE, hash.to_vec())
    }

    pub fn genesis_author(&self) -> Result<Address, StateError> {
        Ok(self
            .get_hash(keys::GENESIS_AUTHOR, "genesis author")?
            .unwrap_or(GENESIS_HASH))
    }

    pub fn is_initialized(&self) -> Result<bool, StateError> {
        Ok(self.get(keys::MILESTONE)?.is_some())
    }

    // ── Packs ──

    /// Load a pack, temporal or permanent. The genesis pack is synthesized.
    pub fn pack(&self, hash: &Hash) -> Result<Option<Pack>, StateError> {
        if *hash == GENESIS_HASH {
            return Ok(Some(Pack::genesis(self.genesis_author()?)));
        }
        let (bytes, stable) = match self.get(&keys::temporal(hash))? {
            Some(bytes) => (bytes, false),
            None => match self.get(&keys::permanent(hash))? {
                Some(bytes) => (bytes, true),
                None => return Ok(None),
            },
        };
        let mut pack =
            Pack::decode(&bytes).map_err(|e| StateError::Corrupt("pack", e.to_string()))?;
        pack.stable = stable;
        Ok(Some(pack))
    }

    pub fn has_pack(&self, hash: &Hash) -> Result<bool, StateError> {
        Ok(*hash == GENESIS_HASH
            || self.get(&keys::temporal(hash))?.is_some()
            || self.get(&keys::permanent(hash))?.is_some())
    }

    pub fn is_stable(&self, hash: &Hash) -> Result<bool, StateError> {
        Ok(*hash == GENESIS_HASH || self.get(&keys::permanent(hash))?.is_some())
    }

    /// Store an admitted pack as temporal (unstable).
    pub fn put_temporal(&mut self, pack: &Pack) -> Result<(), StateError> {
        self.put(&keys::temporal(&pack.hash()), pack.bytes().to_vec())
    }

    /// Move a pack from temporal to permanent storage.
    pub fn make_permanent(&mut self, hash: &Hash) -> Result<(), StateError> {
        let key = keys::temporal(hash);
        if let Some(bytes) = self.get(&key)? {
            self.delete(&key)?;
            self.put(&keys::permanent(hash), bytes)?;
        }
        Ok(())
    }

    /// Digest over every committed permanent pack, in key order.
    pub fn state_hash(&self) -> Result<Hash, StateError> {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for (key, value) in self.store.scan_prefix(b"p")? {
            if key.len() != 33 {
                continue;
            }
            hasher.update(&key);
            hasher.update(b"_");
            hasher.update(&value);
            hasher.update(b";");
        }
        Ok(hasher.finalize().into())
    }

    // ── Genesis ──

    /// Write the genesis state. Fails when the ledger already holds one.
    pub fn initialize(&mut self, genesis: &Genesis) -> Result<(), StateError> {
        if self.is_initialized()? {
            return Err(StateError::AlreadyInitialized);
        }
        self.begin_batch()?;
        match self.write_genesis(genesis) {
            Ok(()) => self.commit(),
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    fn write_genesis(&mut self, genesis: &Genesis) -> Result<(), StateError> {
        let author = self.put_public_key(&genesis.public_key)?;
        self.put(keys::GENESIS_AUTHOR, author.to_vec())?;
        for public_key in &genesis.accounts {
            self.put_public_key(public_key)?;
        }

        self.put_token(
            &BASE_TOKEN,
            &TokenSpec {
                cap: genesis.supply.clone(),
                burnable: false,
                issuers: Default::default(),
            },
        )?;
        self.set_supply(&BASE_TOKEN, &genesis.supply)?;
        if genesis.balances.is_empty() {
            self.set_balance(&author, &BASE_TOKEN, &genesis.supply)?;
        }
        for (address, amount) in &genesis.balances {
            self.credit(address, &BASE_TOKEN, amount)?;
        }

        let mut stabilizers = Vec::with_capacity(genesis.stabilizers.len());
        for (public_key, support) in &genesis.stabilizers {
            let address = self.put_public_key(public_key)?;
            self.set_support(&address, support)?;
            stabilizers.push(Stabilizer {
                address,
                support: support.clone(),
            });
        }
        self.put_stabilizers(&stabilizers)?;

        self.put_leaves(&[GENESIS_HASH])?;
        self.set_milestone(&GENESIS_HASH)?;
        self.set_previous_milestone(&GENESIS_HASH)?;
        self.set_last_stable(&GENESIS_HASH)?;
        tracing::info!(
            stabilizers = stabilizers.len(),
            supply = %genesis.supply,
            "Initialized ledger from genesis"
        );
        Ok(())
    }
}
