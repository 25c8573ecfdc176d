//! secp256k1 key management.
//!
//! Accounts are identified by the SHA-256 of their 33-byte compressed public
//! key. Signatures are 64-byte compact ECDSA over a SHA-256 digest that the
//! caller computes (packs sign the digest of their unsigned encoding).

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::{Address, Hash, PublicKeyBytes, SignatureBytes};

/// Errors from key parsing.
#[derive(Clone, Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid secret key")]
    InvalidSecret,
    #[error("invalid public key")]
    InvalidPublic,
}

/// A secp256k1 signing keypair.
///
/// `SigningKey` zeroizes its scalar on drop.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
    public: PublicKeyBytes,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self::from_signing(SigningKey::random(&mut OsRng))
    }

    /// Restore a keypair from its 32-byte secret scalar.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, KeyError> {
        let signing = SigningKey::from_slice(secret).map_err(|_| KeyError::InvalidSecret)?;
        Ok(Self::from_signing(signing))
    }

    fn from_signing(signing: SigningKey) -> Self {
        let point = signing.verifying_key().to_encoded_point(true);
        let mut public = [0u8; 33];
        public.copy_from_slice(point.as_bytes());
        Keypair { signing, public }
    }

    /// The secret scalar, wiped when the returned buffer drops.
    pub fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing.to_bytes().to_vec())
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        self.public
    }

    pub fn address(&self) -> Address {
        address_of(&self.public)
    }

    /// Sign a 32-byte digest.
    ///
    /// A signing failure is logged and yields an all-zero signature, which
    /// never verifies.
    pub fn sign(&self, digest: &Hash) -> SignatureBytes {
        let signature: Signature = match self.signing.sign_prehash(digest) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!("Keypair::sign failed: {}", e);
                return [0u8; 64];
            }
        };
        let mut out = [0u8; 64];
        out.copy_from_slice(&signature.to_bytes());
        out
    }
}

/// Account address of a public key.
pub fn address_of(public: &PublicKeyBytes) -> Address {
    crate::sha256(public)
}

/// Check that `public` parses as a curve point.
pub fn validate_public_key(public: &PublicKeyBytes) -> Result<(), KeyError> {
    VerifyingKey::from_sec1_bytes(public)
        .map(|_| ())
        .map_err(|_| KeyError::InvalidPublic)
}

/// Verify a compact signature over a 32-byte digest.
pub fn verify(public: &PublicKeyBytes, digest: &Hash, signature: &SignatureBytes) -> bool {
    let key = match VerifyingKey::from_sec1_bytes(public) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let sig = match Signature::from_slice(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    key.verify_prehash(digest, &sig).is_ok()
}
