//! Smart-contract deployment.

use serde_json::{Map, Value};

use super::Origin;
use crate::codec::{CodecError, Reader, Writer};
use crate::state::{keys, Ledger, StateError};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dapp {
    pub codes: Vec<Vec<u8>>,
}

impl Dapp {
    /// Queue `code` for deployment and return its contract address.
    pub fn deploy(&mut self, code: Vec<u8>) -> crate::Address {
        let address = keys::code(&code);
        if !self.codes.contains(&code) {
            self.codes.push(code);
        }
        address
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.count(self.codes.len())?;
        for code in &self.codes {
            w.biased(code.len(), 4)?;
            w.bytes(code);
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let mut codes = Vec::new();
        for _ in 0..r.count()? {
            let len = r.biased(4)?;
            codes.push(r.take(len)?.to_vec());
        }
        Ok(Dapp { codes })
    }

    pub fn display(&self) -> Value {
        Value::Object(
            self.codes
                .iter()
                .map(|code| (hex::encode(keys::code(code)), Value::String(hex::encode(code))))
                .collect::<Map<_, _>>(),
        )
    }

    pub fn apply(&self, ledger: &mut Ledger, _origin: &Origin) -> Result<(), StateError> {
        for code in &self.codes {
            let address = ledger.put_code(code)?;
            tracing::debug!(contract = %hex::encode(address), "Contract deployed");
        }
        Ok(())
    }
}
