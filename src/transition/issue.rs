//! Minting of issuer-controlled tokens.

use num_bigint::BigUint;
use serde_json::Value;

use super::payment::{add_output, decode_outputs, encode_outputs, outputs_json, Outputs};
use super::Origin;
use crate::codec::{CodecError, Reader, Writer};
use crate::state::{Ledger, StateError};
use crate::{short, Address, Hash};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Issue {
    pub outputs: Outputs,
}

impl Issue {
    pub fn add(&mut self, token: Hash, to: Address, amount: &BigUint) {
        add_output(&mut self.outputs, token, to, amount);
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.values().all(|o| o.is_empty())
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        encode_outputs(&self.outputs, w)
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Issue {
            outputs: decode_outputs(r)?,
        })
    }

    pub fn display(&self) -> Value {
        outputs_json(&self.outputs)
    }

    /// Mint to every recipient. All or nothing: each token must exist, list the
    /// author as issuer and stay within its cap.
    pub fn apply(&self, ledger: &mut Ledger, origin: &Origin) -> Result<(), StateError> {
        let mut supplies = Vec::with_capacity(self.outputs.len());
        for (token, recipients) in &self.outputs {
            let Some(spec) = ledger.token(token)? else {
                tracing::debug!(pack = %short(&origin.hash), token = %short(token), "Issue of unknown token skipped");
                return Ok(());
            };
            if !spec.issuers.contains(&origin.author) {
                tracing::debug!(pack = %short(&origin.hash), token = %short(token), "Issue by non-issuer skipped");
                return Ok(());
            }
            let minted: BigUint = recipients.values().sum();
            let supply = ledger.supply(token)? + minted;
            if supply > spec.cap {
                tracing::debug!(pack = %short(&origin.hash), token = %short(token), "Issue above cap skipped");
                return Ok(());
            }
            supplies.push((token, supply));
        }

        for (token, supply) in supplies {
            ledger.set_supply(token, &supply)?;
        }
        for (token, recipients) in &self.outputs {
            for (to, amount) in recipients {
                ledger.credit(to, token, amount)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SledStorage;
    use crate::transition::TokenSpec;
    use std::sync::Arc;

    fn setup(cap: u32) -> (Ledger, Origin, Hash) {
        let mut ledger = Ledger::new(Arc::new(SledStorage::open_temporary().unwrap()));
        let author = [1u8; 32];
        let token = [7u8; 32];
        ledger
            .put_token(
                &token,
                &TokenSpec {
                    cap: BigUint::from(cap),
                    burnable: true,
                    issuers: [author].into_iter().collect(),
                },
            )
            .unwrap();
        let origin = Origin {
            hash: [9u8; 32],
            author,
            milestone: [0u8; 32],
        };
        (ledger, origin, token)
    }

    #[test]
    fn issue_within_cap() {
        let (mut ledger, origin, token) = setup(100);
        let mut issue = Issue::default();
        issue.add(token, [2u8; 32], &BigUint::from(40u8));
        issue.add(token, [3u8; 32], &BigUint::from(60u8));
        issue.apply(&mut ledger, &origin).unwrap();
        assert_eq!(ledger.supply(&token).unwrap(), BigUint::from(100u8));
        assert_eq!(ledger.balance(&[3u8; 32], &token).unwrap(), BigUint::from(60u8));
    }

    #[test]
    fn issue_above_cap_is_noop() {
        let (mut ledger, origin, token) = setup(100);
        let mut issue = Issue::default();
        issue.add(token, [2u8; 32], &BigUint::from(101u8));
        issue.apply(&mut ledger, &origin).unwrap();
        assert_eq!(ledger.supply(&token).unwrap(), BigUint::from(0u8));
        assert_eq!(ledger.balance(&[2u8; 32], &token).unwrap(), BigUint::from(0u8));
    }

    #[test]
    fn issue_by_stranger_is_noop() {
        let (mut ledger, mut origin, token) = setup(100);
        origin.author = [8u8; 32];
        let mut issue = Issue::default();
        issue.add(token, [2u8; 32], &BigUint::from(1u8));
        issue.apply(&mut ledger, &origin).unwrap();
        assert_eq!(ledger.balance(&[2u8; 32], &token).unwrap(), BigUint::from(0u8));
    }
}
