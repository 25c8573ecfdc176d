//! Staking base tokens behind a supportee.
//!
//! Support decides stabilizer membership: the set keeps its size, but an
//! outsider whose support exceeds the weakest stabilizer takes its seat.

use std::collections::BTreeMap;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Signed, Zero};
use serde_json::{Map, Value};

use super::Origin;
use crate::codec::{CodecError, Fault, Reader, Writer};
use crate::constants::BASE_TOKEN;
use crate::state::{sort_stabilizers, Ledger, Stabilizer, StateError};
use crate::{short, Address};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Support {
    /// Signed stake change per supportee.
    pub deltas: BTreeMap<Address, BigInt>,
}

impl Support {
    /// Add a stake change, netting with earlier ones. A net of zero drops the entry.
    pub fn add(&mut self, supportee: Address, delta: &BigInt) {
        let entry = self.deltas.entry(supportee).or_insert_with(BigInt::zero);
        *entry += delta;
        if entry.is_zero() {
            self.deltas.remove(&supportee);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.count(self.deltas.len())?;
        for (supportee, delta) in &self.deltas {
            w.u8(u8::from(delta.sign() != Sign::Minus));
            w.bytes(supportee);
            w.amount(delta.magnitude())?;
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let mut deltas = BTreeMap::new();
        for _ in 0..r.count()? {
            let sign = match r.u8()? {
                1 => Sign::Plus,
                0 => Sign::Minus,
                flag => return Err(Fault::InvalidFlag(flag).into()),
            };
            let supportee = r.hash()?;
            let magnitude = r.amount()?;
            if deltas
                .insert(supportee, BigInt::from_biguint(sign, magnitude))
                .is_some()
            {
                return Err(Fault::DuplicateEntry.into());
            }
        }
        Ok(Support { deltas })
    }

    pub fn display(&self) -> Value {
        Value::Object(
            self.deltas
                .iter()
                .map(|(supportee, delta)| (hex::encode(supportee), Value::String(format!("{}n", delta))))
                .collect::<Map<_, _>>(),
        )
    }

    pub fn apply(&self, ledger: &mut Ledger, origin: &Origin) -> Result<(), StateError> {
        let total: BigInt = self.deltas.values().sum();
        let available = BigInt::from(ledger.balance(&origin.author, &BASE_TOKEN)?);
        if total > available {
            tracing::debug!(pack = %short(&origin.hash), "Support exceeds author balance, skipped");
            return Ok(());
        }

        let mut stabilizers = ledger.stabilizers()?;
        for (supportee, delta) in &self.deltas {
            let balance = BigInt::from(ledger.balance(&origin.author, &BASE_TOKEN)?);
            if delta.is_positive() && *delta > balance {
                tracing::debug!(pack = %short(&origin.hash), "Support entry exceeds balance, skipped");
                continue;
            }
            let staked = BigInt::from(ledger.staked(&origin.author, supportee)?) + delta;
            let Some(staked) = staked.to_biguint() else {
                tracing::debug!(pack = %short(&origin.hash), "Unstake beyond stake, skipped");
                continue;
            };
            let support = BigInt::from(ledger.support(supportee)?) + delta;
            let support = support.to_biguint().unwrap_or_default();
            let balance = (balance - delta).to_biguint().unwrap_or_default();

            ledger.set_staked(&origin.author, supportee, &staked)?;
            ledger.set_support(supportee, &support)?;
            ledger.set_balance(&origin.author, &BASE_TOKEN, &balance)?;
            reseat(&mut stabilizers, supportee, support);
        }
        ledger.put_stabilizers(&stabilizers)
    }
}

/// Update the set after `supportee`'s support changed. `stabilizers` is kept
/// sorted weakest first.
pub fn reseat(stabilizers: &mut Vec<Stabilizer>, supportee: &Address, support: BigUint) {
    if let Some(member) = stabilizers.iter_mut().find(|s| s.address == *supportee) {
        member.support = support;
    } else if let Some(weakest) = stabilizers.first_mut() {
        if support > weakest.support {
            tracing::info!(
                joined = %hex::encode(supportee),
                left = %hex::encode(weakest.address),
                "Stabilizer replaced"
            );
            *weakest = Stabilizer {
                address: *supportee,
                support,
            };
        }
    }
    sort_stabilizers(stabilizers);
}
