//! Opcode table: byte values, inline operand widths and static gas prices.

use crate::constants::WORD_BYTES;

/// VM opcodes. The discriminant is the byte value on the tape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    Label = 0,
    Nop,
    Add,
    Sub,
    Dup,
    Div,
    Mul,
    Mod,
    Push,
    Swap,
    Dec,
    Goto,
    Inc,
    And,
    Or,
    Not,
    Xor,
    Shiftr,
    Shiftl,
    ShiftrI,
    ShiftlI,
    Abort,
    Pay,
    TokenDef,
    Sender,
    Cmp,
    JumpEq,
    Push2,
    Push3,
    Push4,
    Return,
    JumpNeq,
    JumpLt,
    JumpGt,
    JumpLte,
    JumpGte,
    RChannel,
    WChannel,
    Push5,
    Sha256,
    Sha512,
    Sha3,
    SelfAddress,
    Mload,
    Mstore,
    Pop,
    Swap2,
    Swap3,
    Swap4,
    Sqrt,
    Nroot,
    Log2,
    Log10,
    Nlog,
    Call,
    PushB,
    Input,
    JoinB,
    Param,
    Param1,
    Param2,
    Param3,
    Param4,
    Param5,
    Param6,
    Dbg,
}

impl Op {
    const ALL: [Op; 66] = [
        Op::Label,
        Op::Nop,
        Op::Add,
        Op::Sub,
        Op::Dup,
        Op::Div,
        Op::Mul,
        Op::Mod,
        Op::Push,
        Op::Swap,
        Op::Dec,
        Op::Goto,
        Op::Inc,
        Op::And,
        Op::Or,
        Op::Not,
        Op::Xor,
        Op::Shiftr,
        Op::Shiftl,
        Op::ShiftrI,
        Op::ShiftlI,
        Op::Abort,
        Op::Pay,
        Op::TokenDef,
        Op::Sender,
        Op::Cmp,
        Op::JumpEq,
        Op::Push2,
        Op::Push3,
        Op::Push4,
        Op::Return,
        Op::JumpNeq,
        Op::JumpLt,
        Op::JumpGt,
        Op::JumpLte,
        Op::JumpGte,
        Op::RChannel,
        Op::WChannel,
        Op::Push5,
        Op::Sha256,
        Op::Sha512,
        Op::Sha3,
        Op::SelfAddress,
        Op::Mload,
        Op::Mstore,
        Op::Pop,
        Op::Swap2,
        Op::Swap3,
        Op::Swap4,
        Op::Sqrt,
        Op::Nroot,
        Op::Log2,
        Op::Log10,
        Op::Nlog,
        Op::Call,
        Op::PushB,
        Op::Input,
        Op::JoinB,
        Op::Param,
        Op::Param1,
        Op::Param2,
        Op::Param3,
        Op::Param4,
        Op::Param5,
        Op::Param6,
        Op::Dbg,
    ];

    pub fn from_byte(byte: u8) -> Option<Op> {
        Self::ALL.get(byte as usize).copied()
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Reserved opcodes decode but cannot run.
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            Op::Param | Op::Param1 | Op::Param2 | Op::Param3 | Op::Param4 | Op::Param5 | Op::Param6
        )
    }

    /// Number of words a PUSH variant carries inline.
    pub fn push_words(self) -> Option<usize> {
        match self {
            Op::Push => Some(1),
            Op::Push2 => Some(2),
            Op::Push3 => Some(3),
            Op::Push4 => Some(4),
            Op::Push5 => Some(5),
            _ => None,
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Op::JumpEq | Op::JumpNeq | Op::JumpLt | Op::JumpGt | Op::JumpLte | Op::JumpGte
        )
    }

    /// Fixed-size inline operand bytes. Jumps, PUSH_B and W_CHANNEL manage
    /// the program counter themselves and report zero.
    pub fn width(self) -> usize {
        match self {
            Op::Push | Op::Push2 | Op::Push3 | Op::Push4 | Op::Push5 => {
                self.push_words().unwrap_or(0) * WORD_BYTES
            }
            Op::ShiftrI | Op::ShiftlI => WORD_BYTES,
            Op::Sha256 | Op::Sha512 | Op::Sha3 | Op::Nlog => 1,
            Op::Mload | Op::Mstore => 2,
            Op::Call => WORD_BYTES + 4,
            _ => 0,
        }
    }

    /// Gas for opcodes with a fixed price. `None` means the price depends on
    /// VM state (W_CHANNEL, PUSH_B).
    pub fn static_gas(self) -> Option<u64> {
        Some(match self {
            Op::Label | Op::Abort | Op::Return => 0,
            Op::Mod | Op::Goto | Op::Mload | Op::Mstore | Op::JoinB => 2,
            op if op.is_jump() => 2,
            Op::Sqrt => 4,
            Op::RChannel | Op::Log2 | Op::Log10 | Op::Nlog => 16,
            Op::Sha256 => 32,
            Op::Nroot => 44,
            Op::Sha512 => 64,
            Op::Sha3 => 96,
            Op::Pay => 1200,
            Op::TokenDef => 6400,
            Op::WChannel | Op::PushB => return None,
            _ => 1,
        })
    }
}
