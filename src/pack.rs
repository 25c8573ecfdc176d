//! Packs: signed, hash-identified units of work in the DAG.
//!
//! Wire layout:
//!
//! ```text
//! author(32) ‖ signature(64) ‖ parents−1 (1) ‖ milestone(32) ‖ parents(32 each) ‖ transitions
//! ```
//!
//! The signature covers the SHA-256 of the same encoding without the signature
//! field. The pack hash is the SHA-256 of the full encoding. A sealed or
//! decoded pack keeps its bytes; [`Pack::bytes`] always returns them rather
//! than re-encoding.

use num_bigint::{BigInt, BigUint};
use serde_json::{json, Value};

use crate::codec::{CodecError, Fault, Reader, Writer};
use crate::constants::{GENESIS_HASH, MIN_PACK_BYTES, SIGNATURE_BYTES};
use crate::crypto::keys::{verify, Keypair};
use crate::state::{Ledger, Stabilizer, StateError};
use crate::transition::{
    Account, Body, Burn, Channel, Dapp, Execute, Issue, Kind, Milestone, Origin, Payment, Support,
    TokenDefine, TokenSpec,
};
use crate::{encode_hash, sha256, Address, Hash, PublicKeyBytes, SignatureBytes};

/// Errors from building or sealing a pack.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("pack already sealed")]
    AlreadySealed,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pack {
    pub author: Address,
    pub signature: SignatureBytes,
    /// Strictly ascending parent hashes.
    pub parents: Vec<Hash>,
    pub milestone: Hash,
    pub body: Body,
    /// Whether the pack was loaded from permanent storage.
    pub stable: bool,
    hash: Hash,
    bytes: Vec<u8>,
    sealed: bool,
    milestone_set: bool,
    output: bool,
}

impl Default for Pack {
    fn default() -> Self {
        Pack {
            author: [0u8; 32],
            signature: [0u8; SIGNATURE_BYTES],
            parents: Vec::new(),
            milestone: GENESIS_HASH,
            body: Body::default(),
            stable: false,
            hash: [0u8; 32],
            bytes: Vec::new(),
            sealed: false,
            milestone_set: false,
            output: false,
        }
    }
}

impl Pack {
    pub fn new() -> Self {
        Self::default()
    }

    /// The synthetic root every DAG starts from.
    pub fn genesis(author: Address) -> Self {
        Pack {
            author,
            stable: true,
            hash: GENESIS_HASH,
            sealed: true,
            milestone_set: true,
            ..Default::default()
        }
    }

    /// Empty output pack for a contract called from `origin`.
    pub fn output(contract: Address, origin: &Origin) -> Self {
        Pack {
            author: contract,
            parents: vec![origin.hash],
            milestone: origin.milestone,
            milestone_set: true,
            output: true,
            ..Default::default()
        }
    }

    /// Freeze an output pack: encode it unsigned and hash the naked encoding.
    pub fn finish_output(&mut self) -> Result<(), CodecError> {
        let naked = self.encode_naked()?;
        self.bytes = self.encode_with(&self.signature)?;
        self.hash = sha256(&naked);
        self.sealed = true;
        Ok(())
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Encoded bytes; empty until sealed.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// True for packs emitted by a contract call.
    pub fn is_output(&self) -> bool {
        self.output
    }

    pub fn origin(&self) -> Origin {
        Origin {
            hash: self.hash,
            author: self.author,
            milestone: self.milestone,
        }
    }

    // ── Builder ──

    pub fn pay(&mut self, token: Hash, to: Address, amount: &BigUint) -> &mut Self {
        self.body
            .payment
            .get_or_insert_with(Payment::default)
            .add(token, to, amount);
        self
    }

    pub fn issue(&mut self, token: Hash, to: Address, amount: &BigUint) -> &mut Self {
        self.body
            .issue
            .get_or_insert_with(Issue::default)
            .add(token, to, amount);
        self
    }

    pub fn burn(&mut self, token: Hash, amount: &BigUint) -> &mut Self {
        self.body
            .burn
            .get_or_insert_with(Burn::default)
            .add(token, amount);
        self
    }

    pub fn support(&mut self, supportee: Address, delta: &BigInt) -> &mut Self {
        self.body
            .support
            .get_or_insert_with(Support::default)
            .add(supportee, delta);
        self
    }

    pub fn channel(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.body
            .channel
            .get_or_insert_with(Channel::default)
            .set(key, value);
        self
    }

    pub fn account(&mut self, public_key: PublicKeyBytes) -> &mut Self {
        self.body
            .account
            .get_or_insert_with(Account::default)
            .add(public_key);
        self
    }

    /// Deploy `code`; returns the contract address it will have.
    pub fn dapp(&mut self, code: Vec<u8>) -> Address {
        self.body.dapp.get_or_insert_with(Dapp::default).deploy(code)
    }

    pub fn execute(&mut self, contract: Address, entry: u32, args: Vec<Vec<u8>>, gas: u32) -> &mut Self {
        self.body
            .execute
            .get_or_insert_with(Execute::default)
            .call(contract, entry, args, gas);
        self
    }

    /// Define a token under `nonce`, or the lowest free one. Returns the nonce
    /// used, or `None` when it is taken or all are.
    pub fn token(&mut self, spec: TokenSpec, nonce: Option<u8>) -> Option<u8> {
        self.body
            .token
            .get_or_insert_with(TokenDefine::default)
            .define(spec, nonce)
    }

    /// Add a parent, keeping the list sorted and unique.
    pub fn parent(&mut self, hash: Hash) -> &mut Self {
        if let Err(at) = self.parents.binary_search(&hash) {
            self.parents.insert(at, hash);
        }
        self
    }

    pub fn milestone(&mut self, hash: Hash) -> &mut Self {
        self.milestone = hash;
        self.milestone_set = true;
        self
    }

    pub fn milestone_transition(&mut self, milestone: Milestone) -> &mut Self {
        self.body.milestone = Some(milestone);
        self
    }

    /// Total paid out of `token` by this pack's Payment.
    pub fn paid(&self, token: &Hash) -> BigUint {
        self.body
            .payment
            .as_ref()
            .map(|p| p.total(token))
            .unwrap_or_default()
    }

    // ── Sealing ──

    /// Fill in parents and milestone from the ledger when unset, sign and hash.
    pub fn seal(&mut self, keypair: &Keypair, ledger: &Ledger) -> Result<(), PackError> {
        if self.sealed {
            return Err(PackError::AlreadySealed);
        }
        if self.parents.is_empty() {
            for leaf in ledger.leaves()? {
                self.parent(leaf);
            }
        }
        if !self.milestone_set {
            self.milestone = ledger.milestone()?;
            self.milestone_set = true;
        }
        self.author = keypair.address();
        if self.signature == [0u8; SIGNATURE_BYTES] {
            let naked = self.encode_naked()?;
            self.signature = keypair.sign(&sha256(&naked));
        }
        self.bytes = self.encode_with(&self.signature)?;
        self.hash = sha256(&self.bytes);
        self.sealed = true;
        tracing::debug!(pack = %crate::short(&self.hash), len = self.bytes.len(), "Sealed pack");
        Ok(())
    }

    fn encode_with(&self, signature: &SignatureBytes) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::new();
        w.bytes(&self.author);
        w.bytes(signature);
        self.encode_tail(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Encoding without the signature: the bytes that get signed.
    pub fn encode_naked(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::new();
        w.bytes(&self.author);
        self.encode_tail(&mut w)?;
        Ok(w.into_bytes())
    }

    fn encode_tail(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.count(self.parents.len())?;
        w.bytes(&self.milestone);
        for parent in &self.parents {
            w.bytes(parent);
        }
        self.body.encode(w)
    }

    /// Signed-over bytes of a sealed pack, cut from its retained encoding.
    fn naked_bytes(&self) -> Result<Vec<u8>, CodecError> {
        if self.bytes.len() >= 32 + SIGNATURE_BYTES {
            let mut naked = self.bytes[..32].to_vec();
            naked.extend_from_slice(&self.bytes[32 + SIGNATURE_BYTES..]);
            Ok(naked)
        } else {
            self.encode_naked()
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Pack, CodecError> {
        if bytes.len() < MIN_PACK_BYTES {
            return Err(Fault::ShortPack.into());
        }
        let mut r = Reader::new(bytes);
        let author = r.hash()?;
        let signature = r.array::<SIGNATURE_BYTES>()?;
        let count = r.count()?;
        let milestone = r.hash()?;
        let mut parents = Vec::with_capacity(count);
        for _ in 0..count {
            parents.push(r.hash()?);
        }
        let body = Body::decode(&mut r)?;
        if !r.is_empty() {
            return Err(Fault::TrailingBytes.into());
        }
        Ok(Pack {
            author,
            signature,
            parents,
            milestone,
            body,
            stable: false,
            hash: sha256(bytes),
            bytes: bytes.to_vec(),
            sealed: true,
            milestone_set: true,
            output: false,
        })
    }

    // ── Validation ──

    pub fn verify_signature(&self, public_key: &PublicKeyBytes) -> bool {
        match self.naked_bytes() {
            Ok(naked) => verify(public_key, &sha256(&naked), &self.signature),
            Err(_) => false,
        }
    }

    /// Non-empty, strictly ascending, and never the pack itself.
    pub fn valid_parents(&self) -> bool {
        !self.parents.is_empty()
            && self.parents.windows(2).all(|w| w[0] < w[1])
            && !self.parents.contains(&self.hash)
    }

    /// Fee due for this pack: its length for each other stabilizer and for the community.
    pub fn commissions(&self, stabilizers: &[Stabilizer]) -> BigUint {
        let n = stabilizers.len();
        let shares = if stabilizers.iter().any(|s| s.address == self.author) {
            n
        } else {
            n + 1
        };
        BigUint::from(self.bytes.len()) * BigUint::from(shares)
    }

    /// The milestone this pack establishes for its descendants.
    pub fn milestone_of(&self) -> Hash {
        if self.body.has(Kind::Milestone) {
            self.hash
        } else {
            self.milestone
        }
    }

    pub fn display(&self) -> Value {
        json!({
            "hash": encode_hash(&self.hash),
            "author": hex::encode(self.author),
            "signature": hex::encode(self.signature),
            "milestone": encode_hash(&self.milestone),
            "parents": self.parents.iter().map(encode_hash).collect::<Vec<_>>(),
            "stable": self.stable,
            "transitions": self.body.display(),
        })
    }
}
