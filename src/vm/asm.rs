//! Bytecode fragments for building contracts by hand.

use num_bigint::BigUint;

use super::Op;
use crate::codec::{word_bytes, CodecError, Fault};
use crate::state::keys;
use crate::{Address, Hash};

/// `PUSH word`.
pub fn push_word(value: &BigUint) -> Vec<u8> {
    let mut code = vec![Op::Push.byte()];
    code.extend(word_bytes(value));
    code
}

/// `PUSH` of raw 32 bytes, such as an address or token hash.
pub fn push_hash(hash: &Hash) -> Vec<u8> {
    let mut code = vec![Op::Push.byte()];
    code.extend_from_slice(hash);
    code
}

/// `PUSH_B n bytes ‖ JOIN_B × (n − 1)`: leaves `bytes` as one stack item.
pub fn push_bytes(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    if bytes.is_empty() {
        return Err(Fault::OutOfRange.into());
    }
    let count = u16::try_from(bytes.len()).map_err(|_| Fault::OutOfRange)?;
    let mut code = vec![Op::PushB.byte()];
    code.extend(count.to_be_bytes());
    code.extend_from_slice(bytes);
    code.extend(std::iter::repeat(Op::JoinB.byte()).take(bytes.len() - 1));
    Ok(code)
}

/// Pay `amount` of `token` to `to` from the contract's balance.
pub fn pay(to: &Address, token: &Hash, amount: &BigUint) -> Vec<u8> {
    let mut code = push_hash(to);
    code.extend(push_hash(token));
    code.extend(push_word(amount));
    code.push(Op::Pay.byte());
    code
}

/// Push the value of `owner`'s channel cell `key`.
pub fn read_channel(owner: &Address, key: &[u8]) -> Vec<u8> {
    let mut code = push_hash(&keys::channel(owner, key));
    code.push(Op::RChannel.byte());
    code
}

/// `CALL address entry`.
pub fn call(contract: &Address, entry: u32) -> Vec<u8> {
    let mut code = vec![Op::Call.byte()];
    code.extend_from_slice(contract);
    code.extend(entry.to_be_bytes());
    code
}
