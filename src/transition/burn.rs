//! Destruction of burnable tokens by their issuers.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use num_traits::Zero;
use serde_json::{Map, Value};

use super::{amount_json, Origin};
use crate::codec::{CodecError, Fault, Reader, Writer};
use crate::state::{Ledger, StateError};
use crate::{encode_hash, short, Hash};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Burn {
    pub amounts: BTreeMap<Hash, BigUint>,
}

impl Burn {
    pub fn add(&mut self, token: Hash, amount: &BigUint) {
        if amount.is_zero() {
            return;
        }
        *self.amounts.entry(token).or_insert_with(BigUint::zero) += amount;
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.count(self.amounts.len())?;
        for (token, amount) in &self.amounts {
            w.bytes(token);
            w.amount(amount)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let mut amounts = BTreeMap::new();
        for _ in 0..r.count()? {
            let token = r.hash()?;
            let amount = r.amount()?;
            if amounts.insert(token, amount).is_some() {
                return Err(Fault::DuplicateEntry.into());
            }
        }
        Ok(Burn { amounts })
    }

    pub fn display(&self) -> Value {
        Value::Object(
            self.amounts
                .iter()
                .map(|(token, amount)| (encode_hash(token), amount_json(amount)))
                .collect::<Map<_, _>>(),
        )
    }

    pub fn apply(&self, ledger: &mut Ledger, origin: &Origin) -> Result<(), StateError> {
        let mut updates = Vec::with_capacity(self.amounts.len());
        for (token, amount) in &self.amounts {
            let allowed = match ledger.token(token)? {
                Some(spec) => spec.burnable && spec.issuers.contains(&origin.author),
                None => false,
            };
            let balance = ledger.balance(&origin.author, token)?;
            if !allowed || balance < *amount {
                tracing::debug!(pack = %short(&origin.hash), token = %short(token), "Burn skipped");
                return Ok(());
            }
            let supply = ledger.supply(token)?;
            let burned = amount.min(&supply).clone();
            updates.push((token, balance - amount, supply - burned));
        }
        for (token, balance, supply) in updates {
            ledger.set_balance(&origin.author, token, &balance)?;
            ledger.set_supply(token, &supply)?;
        }
        Ok(())
    }
}
