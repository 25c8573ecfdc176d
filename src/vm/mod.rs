//! Gas-metered stack machine for deployed contracts.
//!
//! A contract is a byte tape of [`Op`]s with inline operands. Execution
//! starts at a LABEL whose offset is the first call parameter; the remaining
//! parameters form the initial stack. Stack items are byte strings;
//! arithmetic treats them as unsigned big-endian integers modulo
//! `2^(8 · WORD_BYTES)` and pushes results as full words.
//!
//! Every opcode is charged before it runs. A call fails with
//! [`VmException::LimitExceeded`] once consumed gas passes the limit or the
//! op count passes `max_ops_per_call`. The same fault ends a call that
//! would grow an item past [`MAX_ITEM_BYTES`] or the stack past
//! [`MAX_STACK_ITEMS`].
//!
//! Contracts act through an output pack authored by the contract itself:
//! PAY, TOKEN_DEF and W_CHANNEL add transitions to it, and the pack is
//! applied after the calling Execute transition finishes.

pub mod asm;
pub mod ops;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use sha2::Digest;

pub use ops::Op;

use crate::codec::{word_bytes, word_value, CodecError};
use crate::config::VmConfig;
use crate::constants::{
    max_cap, max_integer, MAX_CHANNEL_KEY_ITEMS, MAX_TOKEN_ISSUER_COUNT, VM_MEMORY_SLOTS,
    WORD_BYTES,
};
use crate::pack::Pack;
use crate::state::{keys, Ledger, StateError};
use crate::transition::{Origin, TokenSpec};
use crate::{Address, Hash};

/// Nested CALL frames allowed below the top-level call.
pub const MAX_CALL_DEPTH: usize = 64;

/// Largest single stack item, one full memory image.
pub const MAX_ITEM_BYTES: usize = WORD_BYTES * VM_MEMORY_SLOTS;

/// Deepest the operand stack may grow, shared across nested calls.
pub const MAX_STACK_ITEMS: usize = VM_MEMORY_SLOTS;

/// Conditions that end a call. Every variant except `Return` fails it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VmException {
    #[error("unexecutable opcode")]
    UnexecutableOpcode,
    #[error("aborted")]
    Abort,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("return")]
    Return,
    #[error("bad entry point")]
    BadEntry,
    #[error("illegal memory access")]
    IllegalMemoryAccess,
    #[error("limit exceeded")]
    LimitExceeded,
    #[error("bad sequence")]
    BadSequence,
    #[error("not enough balance")]
    NotEnoughBalance,
    #[error("bad channel hash")]
    BadChannelHash,
    #[error("bad token hash")]
    BadTokenHash,
}

impl VmException {
    /// Stable numeric code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A failed call: either the contract raised an exception or the ledger failed underneath it.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("vm exception: {0}")]
    Exception(#[from] VmException),
    #[error(transparent)]
    State(#[from] StateError),
}

/// Right-aligned 32-byte view of a stack item: the last 32 bytes, left-padded.
fn as_hash(item: &[u8]) -> Hash {
    let mut out = [0u8; 32];
    let tail = &item[item.len().saturating_sub(32)..];
    out[32 - tail.len()..].copy_from_slice(tail);
    out
}

/// Item widened to a full word, right-aligned.
fn as_word(item: &[u8]) -> Vec<u8> {
    word_bytes(&word_value(item))
}

/// One executing contract.
pub struct Vm<'a> {
    ledger: &'a Ledger,
    config: &'a VmConfig,
    code: Vec<u8>,
    address: Address,
    caller: Address,
    origin: Origin,
    pc: usize,
    stack: Vec<Vec<u8>>,
    memory: Vec<Vec<u8>>,
    gas_used: u64,
    gas_limit: u64,
    op_count: u64,
    depth: usize,
    inputs: BTreeMap<Hash, BigUint>,
    output: Pack,
    nested: Vec<Pack>,
}

impl<'a> Vm<'a> {
    /// Prepare `code` to run on behalf of `caller`, who paid `inputs` to it.
    pub fn new(
        ledger: &'a Ledger,
        config: &'a VmConfig,
        code: Vec<u8>,
        caller: Address,
        origin: Origin,
        gas_limit: u64,
        inputs: BTreeMap<Hash, BigUint>,
    ) -> Self {
        let address = keys::code(&code);
        Vm {
            ledger,
            config,
            code,
            address,
            caller,
            origin,
            pc: 0,
            stack: Vec::new(),
            memory: vec![vec![0u8; WORD_BYTES]; VM_MEMORY_SLOTS],
            gas_used: 0,
            gas_limit,
            op_count: 0,
            depth: 0,
            inputs,
            output: Pack::output(address, &origin),
            nested: Vec::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn op_count(&self) -> u64 {
        self.op_count
    }

    pub fn stack(&self) -> &[Vec<u8>] {
        &self.stack
    }

    /// Run with call parameters: the entry offset (at most four bytes,
    /// big-endian) followed by the initial stack, bottom first.
    pub fn run(&mut self, params: &[Vec<u8>]) -> Result<Option<Vec<u8>>, VmError> {
        let (entry, rest) = params.split_first().ok_or(VmException::BadEntry)?;
        if entry.len() > 4 {
            return Err(VmException::BadEntry.into());
        }
        let entry = entry.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        self.stack.clear();
        for item in rest {
            self.push(item.clone())?;
        }
        self.execute(entry)
    }

    /// The output pack (when non-empty) followed by outputs of nested calls.
    pub fn into_outputs(self) -> Result<Vec<Pack>, CodecError> {
        let mut outputs = Vec::with_capacity(1 + self.nested.len());
        if !self.output.body.is_empty() {
            let mut output = self.output;
            output.finish_output()?;
            outputs.push(output);
        }
        outputs.extend(self.nested);
        Ok(outputs)
    }

    fn execute(&mut self, entry: usize) -> Result<Option<Vec<u8>>, VmError> {
        if self.code.get(entry) != Some(&Op::Label.byte()) {
            tracing::debug!(contract = %hex::encode(self.address), entry, "Call does not start at a label");
            return Err(VmException::BadEntry.into());
        }
        self.pc = entry;
        loop {
            match self.pc.cmp(&self.code.len()) {
                Ordering::Equal => return Ok(self.stack.pop()),
                Ordering::Greater => return Err(VmException::IllegalMemoryAccess.into()),
                Ordering::Less => {}
            }
            let op = match Op::from_byte(self.code[self.pc]) {
                Some(op) if !op.is_reserved() => op,
                _ => return Err(VmException::UnexecutableOpcode.into()),
            };
            self.pc += 1;

            self.gas_used += self.cost(op)?;
            self.op_count += 1;
            if self.gas_used > self.gas_limit || self.op_count > self.config.max_ops_per_call {
                tracing::debug!(
                    contract = %hex::encode(self.address),
                    gas = self.gas_used,
                    limit = self.gas_limit,
                    "Call ran out of gas"
                );
                return Err(VmException::LimitExceeded.into());
            }

            tracing::trace!(?op, pc = self.pc - 1, "step");
            match self.step(op) {
                Ok(()) => {}
                Err(VmError::Exception(VmException::Return)) => return Ok(self.stack.pop()),
                Err(e) => return Err(e),
            }
            self.pc += op.width();
        }
    }

    fn cost(&self, op: Op) -> Result<u64, VmException> {
        if let Some(gas) = op.static_gas() {
            return Ok(gas);
        }
        Ok(match op {
            Op::WChannel => self.stack.last().map_or(0, |top| top.len() as u64) + 64,
            Op::PushB => {
                let count = self.inline_uint(0, 2)? as u64;
                count.div_ceil(5 * WORD_BYTES as u64)
            }
            _ => 1,
        })
    }

    // ── Tape and stack access ──

    fn inline(&self, offset: usize, len: usize) -> Result<Vec<u8>, VmException> {
        let start = self.pc + offset;
        self.code
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or(VmException::IllegalMemoryAccess)
    }

    fn inline_uint(&self, offset: usize, len: usize) -> Result<usize, VmException> {
        Ok(self
            .inline(offset, len)?
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize))
    }

    fn push(&mut self, item: Vec<u8>) -> Result<(), VmException> {
        if item.len() > MAX_ITEM_BYTES || self.stack.len() >= MAX_STACK_ITEMS {
            return Err(VmException::LimitExceeded);
        }
        self.stack.push(item);
        Ok(())
    }

    fn push_value(&mut self, value: BigUint) -> Result<(), VmException> {
        self.push(word_bytes(&value))
    }

    fn pop(&mut self) -> Result<Vec<u8>, VmException> {
        self.stack.pop().ok_or(VmException::StackUnderflow)
    }

    fn pop_value(&mut self) -> Result<BigUint, VmException> {
        Ok(word_value(&self.pop()?) % max_cap())
    }

    /// Exchange the top with the item `depth` places below it.
    fn swap(&mut self, depth: usize) -> Result<(), VmException> {
        let len = self.stack.len();
        if len < depth + 1 {
            return Err(VmException::StackUnderflow);
        }
        self.stack.swap(len - 1, len - 1 - depth);
        Ok(())
    }

    fn push_digest(&mut self, digest: &[u8]) -> Result<(), VmException> {
        if digest.len() > WORD_BYTES {
            for chunk in digest.chunks(WORD_BYTES) {
                self.push(as_word(chunk))?;
            }
            Ok(())
        } else {
            self.push(as_word(digest))
        }
    }

    // ── Execution ──

    fn step(&mut self, op: Op) -> Result<(), VmError> {
        match op {
            Op::Label | Op::Nop => {}
            Op::Add => {
                let (a, b) = (self.pop_value()?, self.pop_value()?);
                self.push_value(a + b)?;
            }
            Op::Sub => {
                let (a, b) = (self.pop_value()?, self.pop_value()?);
                self.push_value(a + max_cap() - b)?;
            }
            Op::Mul => {
                let (a, b) = (self.pop_value()?, self.pop_value()?);
                self.push_value(a * b)?;
            }
            Op::Div | Op::Mod => {
                let (a, b) = (self.pop_value()?, self.pop_value()?);
                if b.is_zero() {
                    return Err(VmException::DivisionByZero.into());
                }
                self.push_value(if op == Op::Div { a / b } else { a % b })?;
            }
            Op::Inc => {
                let a = self.pop_value()?;
                self.push_value(a + 1u8)?;
            }
            Op::Dec => {
                let a = self.pop_value()?;
                self.push_value(if a.is_zero() { max_integer() } else { a - 1u8 })?;
            }
            Op::Shiftl | Op::Shiftr | Op::ShiftlI | Op::ShiftrI => {
                let value = self.pop_value()?;
                let amount = match op {
                    Op::ShiftlI | Op::ShiftrI => word_value(&self.inline(0, WORD_BYTES)?),
                    _ => self.pop_value()?,
                };
                let shifted = match amount.to_usize() {
                    Some(n) if n < 8 * WORD_BYTES => {
                        if matches!(op, Op::Shiftl | Op::ShiftlI) {
                            value << n
                        } else {
                            value >> n
                        }
                    }
                    _ => BigUint::zero(),
                };
                self.push_value(shifted)?;
            }
            Op::And | Op::Or | Op::Xor => {
                let a = as_word(&self.pop()?);
                let b = as_word(&self.pop()?);
                let combined = a
                    .iter()
                    .zip(&b)
                    .map(|(x, y)| match op {
                        Op::And => x & y,
                        Op::Or => x | y,
                        _ => x ^ y,
                    })
                    .collect();
                self.push(combined)?;
            }
            Op::Not => {
                let a = as_word(&self.pop()?);
                self.push(a.iter().map(|x| !x).collect())?;
            }
            Op::Dup => {
                let top = self.stack.last().cloned().ok_or(VmException::StackUnderflow)?;
                self.push(top)?;
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::Swap => self.swap(1)?,
            Op::Swap2 => self.swap(2)?,
            Op::Swap3 => self.swap(3)?,
            Op::Swap4 => self.swap(4)?,
            Op::Push | Op::Push2 | Op::Push3 | Op::Push4 | Op::Push5 => {
                let words = op.push_words().unwrap_or(1);
                for i in 0..words {
                    let word = self.inline(i * WORD_BYTES, WORD_BYTES)?;
                    self.push(word)?;
                }
            }
            Op::PushB => {
                let count = self.inline_uint(0, 2)?;
                let bytes = self.inline(2, count)?;
                self.pc += 2 + count;
                for byte in bytes {
                    self.push(vec![byte])?;
                }
            }
            Op::JoinB => {
                let last = self.pop()?;
                let mut first = self.pop()?;
                if first.len() + last.len() > MAX_ITEM_BYTES {
                    return Err(VmException::LimitExceeded.into());
                }
                first.extend_from_slice(&last);
                self.push(first)?;
            }
            Op::Cmp => {
                let top = self.pop()?;
                let next = self.pop()?;
                let mut word = vec![0u8; WORD_BYTES];
                word[WORD_BYTES - 1] = match top.cmp(&next) {
                    Ordering::Less => 0,
                    Ordering::Equal => 1,
                    Ordering::Greater => 2,
                };
                self.push(word)?;
            }
            Op::Goto => {
                let target = self.inline_uint(0, 4)?;
                if target >= self.code.len() {
                    return Err(VmException::IllegalMemoryAccess.into());
                }
                self.pc = target;
            }
            Op::JumpEq | Op::JumpNeq | Op::JumpLt | Op::JumpGt | Op::JumpLte | Op::JumpGte => {
                let top = self.pop()?;
                let next = self.pop()?;
                let ordering = top.cmp(&next);
                let taken = match op {
                    Op::JumpEq => ordering == Ordering::Equal,
                    Op::JumpNeq => ordering != Ordering::Equal,
                    Op::JumpLt => ordering == Ordering::Less,
                    Op::JumpGt => ordering == Ordering::Greater,
                    Op::JumpLte => ordering != Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                let target = self.inline_uint(0, 4)?;
                if !taken {
                    self.pc += 4;
                } else if target > self.code.len() {
                    return Err(VmException::IllegalMemoryAccess.into());
                } else {
                    self.pc = target;
                }
            }
            Op::Abort => return Err(VmException::Abort.into()),
            Op::Return => return Err(VmException::Return.into()),
            Op::Sender => self.push(self.caller.to_vec())?,
            Op::SelfAddress => self.push(self.address.to_vec())?,
            Op::Pay => self.pay()?,
            Op::TokenDef => self.token_def()?,
            Op::RChannel => {
                let cell = self.pop()?;
                let cell: Hash = cell
                    .try_into()
                    .map_err(|_| VmException::BadChannelHash)?;
                match self.ledger.channel_cell(&cell)? {
                    Some(value) if !value.is_empty() => self.push(value)?,
                    _ => return Err(VmException::IllegalMemoryAccess.into()),
                }
            }
            Op::WChannel => {
                let value_items = self.inline_uint(0, 2)?;
                let key_items = self.inline_uint(2, 2)?;
                self.pc += 4;
                if key_items > MAX_CHANNEL_KEY_ITEMS {
                    return Err(VmException::LimitExceeded.into());
                }
                let mut key = Vec::new();
                for _ in 0..key_items {
                    key.extend(self.pop()?);
                }
                let mut value = Vec::new();
                for _ in 0..value_items {
                    value.extend(self.pop()?);
                }
                self.output.channel(key, value);
            }
            Op::Sha256 | Op::Sha512 | Op::Sha3 => {
                let count = self.inline_uint(0, 1)?;
                if count == 0 {
                    return Err(VmException::BadSequence.into());
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.pop()?);
                }
                let digest: Vec<u8> = match op {
                    Op::Sha256 => digest_all::<sha2::Sha256>(&items),
                    Op::Sha512 => digest_all::<sha2::Sha512>(&items),
                    _ => digest_all::<sha3::Sha3_256>(&items),
                };
                self.push_digest(&digest)?;
            }
            Op::Mload => {
                let slot = self.inline_uint(0, 2)?;
                let word = self
                    .memory
                    .get(slot)
                    .cloned()
                    .ok_or(VmException::IllegalMemoryAccess)?;
                self.push(word)?;
            }
            Op::Mstore => {
                let slot = self.inline_uint(0, 2)?;
                if slot >= self.memory.len() {
                    return Err(VmException::IllegalMemoryAccess.into());
                }
                self.memory[slot] = self.pop()?;
            }
            Op::Sqrt => {
                let value = self.pop_value()?;
                self.push_value(value.sqrt())?;
            }
            Op::Nroot => {
                let k = self.pop_value()?;
                let x = self.pop_value()?;
                if k.is_zero() {
                    return Err(VmException::DivisionByZero.into());
                }
                let root = match k.to_u32() {
                    Some(k) => x.nth_root(k),
                    None if x.is_zero() => BigUint::zero(),
                    None => BigUint::from(1u8),
                };
                self.push_value(root)?;
            }
            Op::Log2 | Op::Log10 | Op::Nlog => {
                let radix = match op {
                    Op::Log2 => 2,
                    Op::Log10 => 10,
                    _ => self.inline_uint(0, 1)? as u32,
                };
                if !(2..=36).contains(&radix) {
                    return Err(VmException::BadSequence.into());
                }
                let value = self.pop_value()?;
                if value.is_zero() {
                    return Err(VmException::DivisionByZero.into());
                }
                let digits = value.to_str_radix(radix).len();
                self.push_value(BigUint::from(digits - 1))?;
            }
            Op::Input => {
                let token = self.pop()?;
                let token: Hash = token.try_into().map_err(|_| VmException::BadTokenHash)?;
                let amount = self.inputs.get(&token).cloned().unwrap_or_default();
                self.push_value(amount)?;
            }
            Op::Call => self.call()?,
            Op::Dbg => {
                tracing::debug!(
                    contract = %hex::encode(self.address),
                    stack = ?self.stack.iter().map(hex::encode).collect::<Vec<_>>(),
                    "DBG"
                );
            }
            Op::Param
            | Op::Param1
            | Op::Param2
            | Op::Param3
            | Op::Param4
            | Op::Param5
            | Op::Param6 => return Err(VmException::UnexecutableOpcode.into()),
        }
        Ok(())
    }

    /// Pops amount, token and recipient. The contract must hold every unit of
    /// the token it has paid out during this call.
    fn pay(&mut self) -> Result<(), VmError> {
        let amount = self.pop_value()?;
        let token = as_hash(&self.pop()?);
        let to = as_hash(&self.pop()?);
        self.output.pay(token, to, &amount);
        let paid = self.output.paid(&token);
        if paid > self.ledger.balance(&self.address, &token)? {
            return Err(VmException::NotEnoughBalance.into());
        }
        tracing::debug!(
            contract = %hex::encode(self.address),
            to = %hex::encode(to),
            %amount,
            "Contract payment"
        );
        Ok(())
    }

    /// Pops burnability, cap (zero for unlimited), issuer count and issuers.
    fn token_def(&mut self) -> Result<(), VmError> {
        let burnable = self.pop()?.last() == Some(&1);
        let cap = self.pop_value()?;
        let count = self.pop()?.last().copied().unwrap_or(0) as usize;
        if count > MAX_TOKEN_ISSUER_COUNT {
            return Err(VmException::LimitExceeded.into());
        }
        let mut issuers = BTreeSet::new();
        for _ in 0..count {
            issuers.insert(as_hash(&self.pop()?));
        }
        self.output
            .token(TokenSpec::new(cap, burnable, issuers), None)
            .ok_or(VmException::LimitExceeded)?;
        Ok(())
    }

    /// Run another contract on this call's stack, gas and op budget.
    fn call(&mut self) -> Result<(), VmError> {
        let callee = as_hash(&self.inline(0, WORD_BYTES)?);
        let entry = self.inline_uint(WORD_BYTES, 4)?;
        if callee == self.address || self.depth >= MAX_CALL_DEPTH {
            return Err(VmException::BadSequence.into());
        }
        let code = match self.ledger.code(&callee)? {
            Some(code) if !code.is_empty() => code,
            _ => return Err(VmException::BadSequence.into()),
        };
        let inputs = self
            .output
            .body
            .payment
            .as_ref()
            .map(|p| p.to_address(&callee))
            .unwrap_or_default();

        let mut child = Vm::new(
            self.ledger,
            self.config,
            code,
            self.caller,
            self.origin,
            self.gas_limit,
            inputs,
        );
        child.gas_used = self.gas_used;
        child.op_count = self.op_count;
        child.depth = self.depth + 1;
        child.stack = std::mem::take(&mut self.stack);

        let result = child.execute(entry);
        self.gas_used = child.gas_used;
        self.op_count = child.op_count;
        let returned = result?;
        self.stack = std::mem::take(&mut child.stack);
        if let Some(item) = returned {
            self.push(item)?;
        }
        let outputs = child
            .into_outputs()
            .map_err(|_| VmException::BadSequence)?;
        self.nested.extend(outputs);
        Ok(())
    }
}

fn digest_all<D: Digest>(items: &[Vec<u8>]) -> Vec<u8> {
    let mut hasher = D::new();
    for item in items {
        hasher.update(item);
    }
    hasher.finalize().to_vec()
}
