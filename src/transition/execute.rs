//! Contract calls.
//!
//! An Execute transition names a gas limit and, per contract, the call
//! parameters (entry offset first). The gas limit is paid to the community
//! address through the carrying pack's own Payment whether or not the calls
//! succeed. Calls run in contract address order on a shared gas budget; once
//! that budget is overdrawn every output collected so far is dropped.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde_json::{json, Map, Value};

use super::{Origin, Payment};
use crate::codec::{CodecError, Fault, Reader, Writer};
use crate::config::VmConfig;
use crate::constants::{BASE_TOKEN, COMMUNITY_ADDRESS, MAX_ENCODABLE_GAS};
use crate::pack::Pack;
use crate::state::{Ledger, StateError};
use crate::vm::{Vm, VmError};
use crate::{short, Address};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Execute {
    pub gas_limit: u32,
    /// Parameters per contract. The first parameter is the entry offset.
    pub calls: BTreeMap<Address, Vec<Vec<u8>>>,
}

impl Execute {
    /// Add a call to `contract` starting at `entry`, raising the gas limit by `gas`.
    /// A later call to the same contract replaces the earlier one.
    pub fn call(&mut self, contract: Address, entry: u32, args: Vec<Vec<u8>>, gas: u32) {
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(entry.to_be_bytes().to_vec());
        params.extend(args);
        self.calls.insert(contract, params);
        self.gas_limit = self.gas_limit.saturating_add(gas).min(MAX_ENCODABLE_GAS as u32);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.count(self.calls.len())?;
        w.biased(self.gas_limit as usize, 3)?;
        for (contract, params) in &self.calls {
            w.bytes(contract);
            w.count(params.len())?;
            for param in params {
                w.uint(param.len() as u64, 2)?;
                w.bytes(param);
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let count = r.count()?;
        let gas_limit = r.biased(3)? as u32;
        let mut calls = BTreeMap::new();
        for _ in 0..count {
            let contract = r.hash()?;
            let mut params = Vec::new();
            for _ in 0..r.count()? {
                let len = r.u16()? as usize;
                params.push(r.take(len)?.to_vec());
            }
            if calls.insert(contract, params).is_some() {
                return Err(Fault::DuplicateEntry.into());
            }
        }
        Ok(Execute { gas_limit, calls })
    }

    pub fn display(&self) -> Value {
        let calls: Map<_, _> = self
            .calls
            .iter()
            .map(|(contract, params)| {
                (
                    hex::encode(contract),
                    Value::Array(params.iter().map(|p| Value::String(hex::encode(p))).collect()),
                )
            })
            .collect();
        json!({ "gas": self.gas_limit, "calls": calls })
    }

    /// Run every call and return the output packs to apply afterwards.
    ///
    /// The gas fee is added to `payment`, the carrying pack's Payment, which
    /// is applied later in the same finalization.
    pub fn apply(
        &self,
        ledger: &Ledger,
        origin: &Origin,
        payment: &mut Payment,
        config: &VmConfig,
    ) -> Result<Vec<Pack>, StateError> {
        let gas = u64::from(self.gas_limit);
        let balance = ledger.balance(&origin.author, &BASE_TOKEN)?;
        // Gas alone is held against the balance, not gas plus the fees
        // already in `payment`. A shortfall surfaces when that payment applies.
        if balance < BigUint::from(gas) || gas > config.max_gas_per_call {
            tracing::debug!(pack = %short(&origin.hash), gas, "Execute gas not covered, skipped");
            return Ok(Vec::new());
        }
        for contract in self.calls.keys() {
            if ledger.code(contract)?.is_none() {
                tracing::debug!(
                    pack = %short(&origin.hash),
                    contract = %hex::encode(contract),
                    "Execute names unknown contract, skipped"
                );
                return Ok(Vec::new());
            }
        }

        payment.add(BASE_TOKEN, COMMUNITY_ADDRESS, &BigUint::from(gas));

        let mut remaining = gas;
        let mut outputs = Vec::new();
        for (contract, params) in &self.calls {
            let Some(code) = ledger.code(contract)? else {
                continue;
            };
            let mut vm = Vm::new(
                ledger,
                config,
                code,
                origin.author,
                *origin,
                remaining,
                payment.to_address(contract),
            );
            let result = vm.run(params);
            if vm.gas_used() > remaining {
                tracing::debug!(
                    pack = %short(&origin.hash),
                    contract = %hex::encode(contract),
                    "Execute ran out of gas, outputs dropped"
                );
                outputs.clear();
                break;
            }
            remaining -= vm.gas_used();
            match result {
                Ok(_) => match vm.into_outputs() {
                    Ok(packs) => outputs.extend(packs),
                    Err(e) => {
                        tracing::debug!(contract = %hex::encode(contract), error = %e, "Contract output not encodable")
                    }
                },
                Err(VmError::State(e)) => return Err(e),
                Err(VmError::Exception(e)) => {
                    tracing::debug!(
                        pack = %short(&origin.hash),
                        contract = %hex::encode(contract),
                        code = e.code(),
                        exception = %e,
                        "Contract call failed"
                    );
                }
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SledStorage;
    use crate::vm::{asm, Op};
    use std::sync::Arc;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(SledStorage::open_temporary().unwrap()))
    }

    fn origin() -> Origin {
        Origin {
            hash: [9u8; 32],
            author: [1u8; 32],
            milestone: [0u8; 32],
        }
    }

    #[test]
    fn layout_and_decode() {
        let mut exec = Execute::default();
        exec.call([3u8; 32], 0, vec![vec![1, 2]], 500);
        let mut w = Writer::new();
        exec.encode(&mut w).unwrap();
        let bytes = w.into_bytes();
        // count, gas, address, param count, (len, entry), (len, arg)
        assert_eq!(bytes.len(), 1 + 3 + 32 + 1 + (2 + 4) + (2 + 2));
        assert_eq!(&bytes[1..4], &[0, 1, 243]);
        assert_eq!(Execute::decode(&mut Reader::new(&bytes)).unwrap(), exec);
    }

    #[test]
    fn gas_limit_caps_at_encodable() {
        let mut exec = Execute::default();
        exec.call([3u8; 32], 0, vec![], u32::MAX);
        assert_eq!(u64::from(exec.gas_limit), MAX_ENCODABLE_GAS);
    }

    #[test]
    fn unfunded_execute_pays_nothing() {
        let mut ledger = ledger();
        let contract = ledger.put_code(&[Op::Label.byte()]).unwrap();
        let mut exec = Execute::default();
        exec.call(contract, 0, vec![], 100);
        let mut payment = Payment::default();
        let outputs = exec
            .apply(&ledger, &origin(), &mut payment, &VmConfig::default())
            .unwrap();
        assert!(outputs.is_empty());
        assert!(payment.is_empty());
    }

    #[test]
    fn funded_execute_charges_gas_and_collects_output() {
        let mut ledger = ledger();
        let author = origin().author;
        ledger
            .set_balance(&author, &BASE_TOKEN, &BigUint::from(10_000u32))
            .unwrap();

        let mut code = vec![Op::Label.byte()];
        code.extend(asm::pay(&[8u8; 32], &BASE_TOKEN, &BigUint::from(3u8)));
        let contract = ledger.put_code(&code).unwrap();
        ledger
            .set_balance(&contract, &BASE_TOKEN, &BigUint::from(3u8))
            .unwrap();

        let mut exec = Execute::default();
        exec.call(contract, 0, vec![], 5_000);
        let mut payment = Payment::default();
        let outputs = exec
            .apply(&ledger, &origin(), &mut payment, &VmConfig::default())
            .unwrap();
        assert_eq!(payment.total(&BASE_TOKEN), BigUint::from(5_000u32));
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].author, contract);
    }

    #[test]
    fn gas_is_checked_without_pending_fees() {
        let mut ledger = ledger();
        let author = origin().author;
        ledger
            .set_balance(&author, &BASE_TOKEN, &BigUint::from(150u8))
            .unwrap();
        let contract = ledger.put_code(&[Op::Label.byte()]).unwrap();
        let mut exec = Execute::default();
        exec.call(contract, 0, vec![], 100);
        let mut payment = Payment::default();
        payment.add(BASE_TOKEN, COMMUNITY_ADDRESS, &BigUint::from(100u8));
        exec.apply(&ledger, &origin(), &mut payment, &VmConfig::default())
            .unwrap();
        assert_eq!(payment.total(&BASE_TOKEN), BigUint::from(200u8));
    }

    #[test]
    fn overdrawn_gas_drops_outputs() {
        let mut ledger = ledger();
        let author = origin().author;
        ledger
            .set_balance(&author, &BASE_TOKEN, &BigUint::from(10_000u32))
            .unwrap();
        let mut code = vec![Op::Label.byte()];
        code.extend(asm::pay(&[8u8; 32], &BASE_TOKEN, &BigUint::from(3u8)));
        let contract = ledger.put_code(&code).unwrap();
        ledger
            .set_balance(&contract, &BASE_TOKEN, &BigUint::from(3u8))
            .unwrap();

        let mut exec = Execute::default();
        exec.call(contract, 0, vec![], 100);
        let mut payment = Payment::default();
        let outputs = exec
            .apply(&ledger, &origin(), &mut payment, &VmConfig::default())
            .unwrap();
        assert!(outputs.is_empty());
        assert_eq!(payment.total(&BASE_TOKEN), BigUint::from(100u8));
    }
}
