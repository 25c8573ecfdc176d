//! Per-author key-value channels.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::Origin;
use crate::codec::{CodecError, Fault, Reader, Writer};
use crate::state::{Ledger, StateError};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Channel {
    pub entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Channel {
    /// Set `key` to `value`; a later write to the same key wins.
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.count(self.entries.len())?;
        for (key, value) in &self.entries {
            w.biased(key.len(), 2)?;
            w.bytes(key);
            w.biased(value.len(), 3)?;
            w.bytes(value);
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let mut entries = BTreeMap::new();
        for _ in 0..r.count()? {
            let key_len = r.biased(2)?;
            let key = r.take(key_len)?.to_vec();
            let value_len = r.biased(3)?;
            let value = r.take(value_len)?.to_vec();
            if entries.insert(key, value).is_some() {
                return Err(Fault::DuplicateEntry.into());
            }
        }
        Ok(Channel { entries })
    }

    pub fn display(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(key, value)| (hex::encode(key), Value::String(hex::encode(value))))
                .collect::<Map<_, _>>(),
        )
    }

    pub fn apply(&self, ledger: &mut Ledger, origin: &Origin) -> Result<(), StateError> {
        for (key, value) in &self.entries {
            ledger.put_channel(&origin.author, key, value)?;
        }
        Ok(())
    }
}
