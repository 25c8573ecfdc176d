//! Milestones: checkpoints signed by the stabilizers over the ledger state hash.

use serde_json::{json, Value};

use super::Origin;
use crate::codec::{CodecError, Reader, Writer};
use crate::crypto::keys::verify;
use crate::state::{Ledger, StateError};
use crate::{encode_hash, short, Hash, PublicKeyBytes, SignatureBytes};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Milestone {
    pub signatures: Vec<SignatureBytes>,
    pub state_hash: Hash,
}

impl Milestone {
    pub fn new(state_hash: Hash, signatures: Vec<SignatureBytes>) -> Self {
        Milestone {
            signatures,
            state_hash,
        }
    }

    /// True when the milestone commits to `state_hash` and every key in
    /// `stabilizers` has a signature over it.
    pub fn verify(&self, stabilizers: &[PublicKeyBytes], state_hash: &Hash) -> bool {
        self.state_hash == *state_hash
            && stabilizers.iter().all(|key| {
                self.signatures
                    .iter()
                    .any(|sig| verify(key, state_hash, sig))
            })
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.count(self.signatures.len())?;
        for sig in &self.signatures {
            w.bytes(sig);
        }
        w.bytes(&self.state_hash);
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let count = r.count()?;
        let mut signatures = Vec::with_capacity(count);
        for _ in 0..count {
            signatures.push(r.array::<64>()?);
        }
        Ok(Milestone {
            signatures,
            state_hash: r.hash()?,
        })
    }

    pub fn display(&self) -> Value {
        json!({
            "state_hash": encode_hash(&self.state_hash),
            "signatures": self.signatures.iter().map(hex::encode).collect::<Vec<_>>(),
        })
    }

    /// A stabilizer's milestone becomes current; the old one is kept as previous.
    pub fn apply(&self, ledger: &mut Ledger, origin: &Origin) -> Result<(), StateError> {
        if !ledger.is_stabilizer(&origin.author)? {
            tracing::debug!(pack = %short(&origin.hash), "Milestone from non-stabilizer ignored");
            return Ok(());
        }
        let current = ledger.milestone()?;
        ledger.set_previous_milestone(&current)?;
        ledger.set_milestone(&origin.hash)?;
        tracing::info!(milestone = %encode_hash(&origin.hash), "Milestone advanced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;

    #[test]
    fn verify_requires_every_stabilizer() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let state = crate::sha256(b"state");
        let only_a = Milestone::new(state, vec![a.sign(&state)]);
        assert!(only_a.verify(&[a.public_key()], &state));
        assert!(!only_a.verify(&[a.public_key(), b.public_key()], &state));

        let both = Milestone::new(state, vec![b.sign(&state), a.sign(&state)]);
        assert!(both.verify(&[a.public_key(), b.public_key()], &state));
        assert!(!both.verify(&[a.public_key()], &crate::sha256(b"other")));
    }

    #[test]
    fn layout_is_signatures_then_state_hash() {
        let m = Milestone::new([5u8; 32], vec![[1u8; 64], [2u8; 64]]);
        let mut w = Writer::new();
        m.encode(&mut w).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 1 + 128 + 32);
        assert_eq!(bytes[0], 1);
        assert_eq!(Milestone::decode(&mut Reader::new(&bytes)).unwrap(), m);
    }
}
