//! # packdag
//!
//! A single-node DAG ledger:
//! - **Packs**: signed units of work that reference earlier packs as causal parents
//! - **Stabilization**: weighted stabilizers finalize packs once a majority builds on them
//! - **Transitions**: payments, token issuance and burning, stake, channels, accounts and dapps
//! - **Bytecode VM**: gas-metered stack machine whose calls emit further transitions

pub mod codec;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod network;
pub mod node;
pub mod pack;
pub mod state;
pub mod storage;
pub mod transition;
pub mod vm;

/// Protocol constants
pub mod constants {
    use crate::Hash;

    /// Width in bytes of a VM word and of every encoded amount.
    pub const WORD_BYTES: usize = 32;
    /// Length of a compressed secp256k1 public key.
    pub const PUBLIC_KEY_BYTES: usize = 33;
    /// Length of a compact ECDSA signature.
    pub const SIGNATURE_BYTES: usize = 64;
    /// Author, signature and parent count: the shortest prefix a pack can have.
    pub const MIN_PACK_BYTES: usize = 32 + SIGNATURE_BYTES + 1;

    /// Hash of the synthetic genesis pack.
    pub const GENESIS_HASH: Hash = [0u8; 32];
    /// The native token. Fees, stake and gas are paid in it.
    pub const BASE_TOKEN: Hash = [0u8; 32];
    /// Receives forfeited balances, gas and a share of every commission.
    pub const COMMUNITY_ADDRESS: Hash = {
        let mut address = [0u8; 32];
        address[31] = 1;
        address
    };

    /// Maximum issuers a token may list.
    pub const MAX_TOKEN_ISSUER_COUNT: usize = 16;
    /// Maximum stack items W_CHANNEL may join into a channel key.
    pub const MAX_CHANNEL_KEY_ITEMS: usize = 64;
    /// Words of VM scratch memory.
    pub const VM_MEMORY_SLOTS: usize = 1024;
    /// Largest gas limit an Execute transition can encode (u24, biased).
    pub const MAX_ENCODABLE_GAS: u64 = 1 << 24;
    /// Largest framed network message.
    pub const MAX_NETWORK_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

    /// Maximum token cap, one past the largest word value.
    pub fn max_cap() -> num_bigint::BigUint {
        num_bigint::BigUint::from(1u8) << (8 * WORD_BYTES)
    }

    /// Largest value a VM word can hold.
    pub fn max_integer() -> num_bigint::BigUint {
        max_cap() - 1u8
    }
}

/// 32-byte hash used throughout the protocol
pub type Hash = [u8; 32];

/// Account or contract address: SHA-256 of a public key or of contract code.
pub type Address = Hash;

/// Compressed secp256k1 public key.
pub type PublicKeyBytes = [u8; constants::PUBLIC_KEY_BYTES];

/// Compact ECDSA signature (r ‖ s).
pub type SignatureBytes = [u8; constants::SIGNATURE_BYTES];

/// SHA-256 of a byte string.
pub fn sha256(data: &[u8]) -> Hash {
    use sha2::{Digest, Sha256};
    Sha256::digest(data).into()
}

/// SHA-256 of the plain concatenation of `parts`.
///
/// Storage keys and token hashes are built this way, with ASCII separators
/// such as `"balance_"` and `"_"` between the parts.
pub fn sha256_concat(parts: &[&[u8]]) -> Hash {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Base64url (unpadded) rendering of a hash, the form used for pack and token hashes.
pub fn encode_hash(hash: &Hash) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// Parse a base64url hash produced by [`encode_hash`].
pub fn decode_hash(text: &str) -> Option<Hash> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(text)
        .ok()?;
    bytes.try_into().ok()
}

/// Short prefix of a hash for log lines.
pub fn short(hash: &Hash) -> String {
    encode_hash(hash)[..8].to_string()
}

/// Bincode (legacy layout) encoding of ledger records.
pub fn serialize<T: serde::Serialize>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::serde::encode_to_vec(val, bincode::config::legacy())
}

/// Inverse of [`serialize`].
pub fn deserialize<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, bincode::error::DecodeError> {
    let (val, _len) = bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;
    Ok(val)
}
