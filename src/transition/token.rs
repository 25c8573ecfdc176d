//! Token definitions.
//!
//! A defined token is identified by `SHA-256("token_" ‖ pack ‖ "_" ‖ nonce)`,
//! so one pack can define up to 256 tokens. A cap of zero means "maximum".

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigUint;
use num_traits::Zero;
use serde_json::{json, Value};

use super::{amount_json, Origin};
use crate::codec::{CodecError, Fault, Reader, Writer};
use crate::constants::max_cap;
use crate::state::{keys, Ledger, StateError};
use crate::{encode_hash, Address, Hash};

/// Supply rules of one token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSpec {
    pub cap: BigUint,
    pub burnable: bool,
    pub issuers: BTreeSet<Address>,
}

impl TokenSpec {
    pub fn new(cap: BigUint, burnable: bool, issuers: impl IntoIterator<Item = Address>) -> Self {
        let cap = if cap.is_zero() { max_cap() } else { cap };
        TokenSpec {
            cap,
            burnable,
            issuers: issuers.into_iter().collect(),
        }
    }

    fn flag(&self) -> u8 {
        let implicit_cap = self.cap.is_zero() || self.cap >= max_cap();
        (if self.burnable { 0 } else { 2 }) + u8::from(implicit_cap)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenDefine {
    pub tokens: BTreeMap<u8, TokenSpec>,
}

impl TokenDefine {
    /// Lowest nonce not yet used in this transition.
    pub fn next_nonce(&self) -> Option<u8> {
        (0..=u8::MAX).find(|n| !self.tokens.contains_key(n))
    }

    /// Add a definition under `nonce`, or the lowest free one. Returns the nonce used.
    pub fn define(&mut self, spec: TokenSpec, nonce: Option<u8>) -> Option<u8> {
        let nonce = match nonce {
            Some(n) if !self.tokens.contains_key(&n) => n,
            Some(_) => return None,
            None => self.next_nonce()?,
        };
        self.tokens.insert(nonce, spec);
        Some(nonce)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Token hashes this transition defines when carried by `pack`.
    pub fn hashes(&self, pack: &Hash) -> Vec<Hash> {
        self.tokens
            .keys()
            .map(|nonce| keys::token_hash(pack, *nonce))
            .collect()
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.count(self.tokens.len())?;
        for (nonce, spec) in &self.tokens {
            let flag = spec.flag();
            w.u8(flag);
            if flag & 1 == 0 {
                w.amount(&spec.cap)?;
            }
            w.count(spec.issuers.len())?;
            for issuer in &spec.issuers {
                w.bytes(issuer);
            }
            w.u8(*nonce);
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let mut tokens = BTreeMap::new();
        for _ in 0..r.count()? {
            let flag = r.u8()?;
            if flag > 3 {
                return Err(Fault::InvalidFlag(flag).into());
            }
            let cap = if flag & 1 == 0 { r.amount()? } else { max_cap() };
            let mut issuers = BTreeSet::new();
            for _ in 0..r.count()? {
                if !issuers.insert(r.hash()?) {
                    return Err(Fault::DuplicateEntry.into());
                }
            }
            let nonce = r.u8()?;
            let spec = TokenSpec {
                cap,
                burnable: flag < 2,
                issuers,
            };
            if tokens.insert(nonce, spec).is_some() {
                return Err(Fault::DuplicateEntry.into());
            }
        }
        Ok(TokenDefine { tokens })
    }

    pub fn display(&self) -> Value {
        Value::Array(
            self.tokens
                .iter()
                .map(|(nonce, spec)| {
                    json!({
                        "nonce": nonce,
                        "cap": amount_json(&spec.cap),
                        "burnable": spec.burnable,
                        "issuers": spec.issuers.iter().map(hex::encode).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        )
    }

    pub fn apply(&self, ledger: &mut Ledger, origin: &Origin) -> Result<(), StateError> {
        for (nonce, spec) in &self.tokens {
            let token = keys::token_hash(&origin.hash, *nonce);
            ledger.put_token(&token, spec)?;
            tracing::debug!(token = %encode_hash(&token), "Token defined");
        }
        Ok(())
    }
}
