//! Public key registration.

use std::collections::BTreeSet;

use serde_json::Value;

use super::Origin;
use crate::codec::{CodecError, Fault, Reader, Writer};
use crate::state::{Ledger, StateError};
use crate::PublicKeyBytes;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub keys: BTreeSet<PublicKeyBytes>,
}

impl Account {
    pub fn add(&mut self, public_key: PublicKeyBytes) {
        self.keys.insert(public_key);
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.count(self.keys.len())?;
        for key in &self.keys {
            w.bytes(key);
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let mut keys = BTreeSet::new();
        for _ in 0..r.count()? {
            if !keys.insert(r.array::<33>()?) {
                return Err(Fault::DuplicateEntry.into());
            }
        }
        Ok(Account { keys })
    }

    pub fn display(&self) -> Value {
        Value::Array(
            self.keys
                .iter()
                .map(|k| Value::String(hex::encode(k)))
                .collect(),
        )
    }

    pub fn apply(&self, ledger: &mut Ledger, _origin: &Origin) -> Result<(), StateError> {
        for key in &self.keys {
            ledger.put_public_key(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_duplicate_key() {
        let mut w = Writer::new();
        w.count(2).unwrap();
        w.bytes(&[2u8; 33]);
        w.bytes(&[2u8; 33]);
        let bytes = w.into_bytes();
        assert_eq!(
            Account::decode(&mut Reader::new(&bytes)),
            Err(CodecError::BadBinaryPayload(Fault::DuplicateEntry))
        );
    }
}
