//! Token transfers from the pack author.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use num_traits::Zero;
use serde_json::{Map, Value};

use super::{amount_json, Origin};
use crate::codec::{CodecError, Fault, Reader, Writer};
use crate::state::{Ledger, StateError};
use crate::{encode_hash, short, Address, Hash};

/// Amounts per token per recipient.
pub type Outputs = BTreeMap<Hash, BTreeMap<Address, BigUint>>;

pub(crate) fn add_output(outputs: &mut Outputs, token: Hash, to: Address, amount: &BigUint) {
    if amount.is_zero() {
        return;
    }
    *outputs
        .entry(token)
        .or_default()
        .entry(to)
        .or_insert_with(BigUint::zero) += amount;
}

pub(crate) fn encode_outputs(outputs: &Outputs, w: &mut Writer) -> Result<(), CodecError> {
    let tokens: Vec<_> = outputs.iter().filter(|(_, o)| !o.is_empty()).collect();
    w.count(tokens.len())?;
    for (token, recipients) in tokens {
        w.bytes(token);
        w.count(recipients.len())?;
        for (to, amount) in recipients {
            w.bytes(to);
            w.amount(amount)?;
        }
    }
    Ok(())
}

pub(crate) fn decode_outputs(r: &mut Reader<'_>) -> Result<Outputs, CodecError> {
    let mut outputs = Outputs::new();
    for _ in 0..r.count()? {
        let token = r.hash()?;
        let mut recipients = BTreeMap::new();
        for _ in 0..r.count()? {
            let to = r.hash()?;
            let amount = r.amount()?;
            if recipients.insert(to, amount).is_some() {
                return Err(Fault::DuplicateEntry.into());
            }
        }
        if outputs.insert(token, recipients).is_some() {
            return Err(Fault::DuplicateEntry.into());
        }
    }
    Ok(outputs)
}

pub(crate) fn outputs_json(outputs: &Outputs) -> Value {
    let mut out = Map::new();
    for (token, recipients) in outputs {
        let mut per_token = Map::new();
        for (to, amount) in recipients {
            per_token.insert(hex::encode(to), amount_json(amount));
        }
        out.insert(encode_hash(token), Value::Object(per_token));
    }
    Value::Object(out)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payment {
    pub outputs: Outputs,
}

impl Payment {
    /// Add `amount` of `token` for `to`, netting with earlier outputs. Zero is ignored.
    pub fn add(&mut self, token: Hash, to: Address, amount: &BigUint) {
        add_output(&mut self.outputs, token, to, amount);
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.values().all(|o| o.is_empty())
    }

    pub fn clear(&mut self) {
        self.outputs.clear();
    }

    /// Sum of every output of `token`.
    pub fn total(&self, token: &Hash) -> BigUint {
        self.outputs
            .get(token)
            .map(|recipients| recipients.values().sum())
            .unwrap_or_default()
    }

    /// What `to` receives, per token.
    pub fn to_address(&self, to: &Address) -> BTreeMap<Hash, BigUint> {
        self.outputs
            .iter()
            .filter_map(|(token, recipients)| recipients.get(to).map(|a| (*token, a.clone())))
            .collect()
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        encode_outputs(&self.outputs, w)
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Payment {
            outputs: decode_outputs(r)?,
        })
    }

    pub fn display(&self) -> Value {
        outputs_json(&self.outputs)
    }

    /// Move funds from the author. Outputs the author cannot cover are skipped
    /// one by one; payments to oneself are ignored.
    pub fn apply(&self, ledger: &mut Ledger, origin: &Origin) -> Result<(), StateError> {
        for (token, recipients) in &self.outputs {
            for (to, amount) in recipients {
                if *to == origin.author || amount.is_zero() {
                    continue;
                }
                let balance = ledger.balance(&origin.author, token)?;
                if balance < *amount {
                    tracing::debug!(
                        pack = %short(&origin.hash),
                        token = %short(token),
                        "Payment output exceeds author balance, skipped"
                    );
                    continue;
                }
                ledger.set_balance(&origin.author, token, &(balance - amount))?;
                ledger.credit(to, token, amount)?;
            }
        }
        Ok(())
    }
}
