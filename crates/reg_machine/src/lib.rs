#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

//! A small register machine and the assembler that feeds it.
//!
//! Source text is turned into an executable image by [`assembler::Assembler`]
//! and the image is run by [`machine::Machine`]. The two halves share one
//! binary contract, the instruction encoding described here:
//!
//! ```text
//!     [opcode][mode byte][destination field][source field][trailing byte]
//! ```
//!
//! The mode byte holds the destination [`OperandMode`] in its low nibble and
//! the source mode in its high nibble. Register style fields are one byte,
//! every other field is one little endian [`Word`]. Only `div`, `idiv` and
//! `push` carry the trailing byte. Instructions without operands are a bare
//! opcode.
//!
//! All arithmetic is done on 16 bit words.

use core::mem::transmute;
use thiserror::Error;
use variant_count::VariantCount;

pub mod assembler;
pub mod diagnostics;
pub mod flags;
pub mod image;
pub mod machine;
pub mod memory;
pub mod registers;

#[cfg(test)]
mod assembler_test;

pub use assembler::{Assembler, AssemblerError, AssemblerErrorKind};
pub use diagnostics::{CollectedDiagnostics, Diagnostic, Diagnostics, TracingDiagnostics};
pub use flags::Flags;
pub use image::{Header, Image, ImageError};
pub use machine::{Machine, MachineConfig, RunReport};
pub use memory::{Allocator, ByteStore, Chunk, ChunkId, MemoryError, Module};
pub use registers::RegisterFile;

pub type Word = u16;

/// Marks the start of every executable image.
pub const EXE_MAGIC: u32 = 0xF00C_F00D;

/// First data address handed to global variables. The bytes below it are
/// left unused.
pub const VARIABLE_BASE: Word = 8;

#[repr(u8)] // Must match the opcode byte
#[derive(VariantCount, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ops {
    Mov,
    AddrOf,
    Add,
    Mul,
    Inc,
    Dec,
    Neg,
    Not,
    Xor,
    Or,
    And,
    Tst,
    Cmp,
    Je,
    IMul,
    Div,
    IDiv,
    Sub,
    Jmp,
    Jne,
    Jg,
    Jge,
    Jl,
    Jle,
    CMove,
    CMovne,
    CMovg,
    CMovge,
    CMovl,
    CMovle,
    Push,
    Pop,
    Nop,
}

impl From<Ops> for u8 {
    fn from(op: Ops) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Ops {
    type Error = MachineError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        // SAFTY: we require Ops to be in range of u8
        // with `repr` macro.
        if usize::from(value) >= Ops::VARIANT_COUNT {
            return Err(MachineError::InvalidOp(value));
        }

        // SAFTY: We just check that the value is in range.
        let op = unsafe { transmute::<u8, Self>(value) };
        Ok(op)
    }
}

/// Which operand fields an instruction carries, in source text order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Bare opcode, no mode byte.
    None,
    /// `op dst`
    Dst,
    /// `op src`, followed by a size byte in the image.
    SrcSized,
    /// `op src, dst`
    SrcDst,
    /// `op src, dst, regNN`, the register receives the remainder.
    SrcDstRemainder,
}

impl Shape {
    pub fn operand_count(self) -> usize {
        match self {
            Shape::None => 0,
            Shape::Dst | Shape::SrcSized => 1,
            Shape::SrcDst => 2,
            Shape::SrcDstRemainder => 3,
        }
    }

    pub fn has_dst(self) -> bool {
        matches!(self, Shape::Dst | Shape::SrcDst | Shape::SrcDstRemainder)
    }

    pub fn has_src(self) -> bool {
        matches!(
            self,
            Shape::SrcSized | Shape::SrcDst | Shape::SrcDstRemainder
        )
    }

    pub fn has_trailing_byte(self) -> bool {
        matches!(self, Shape::SrcSized | Shape::SrcDstRemainder)
    }
}

impl Ops {
    pub fn shape(self) -> Shape {
        match self {
            Ops::Mov
            | Ops::AddrOf
            | Ops::Add
            | Ops::Sub
            | Ops::Mul
            | Ops::IMul
            | Ops::Xor
            | Ops::Or
            | Ops::And
            | Ops::Tst
            | Ops::Cmp
            | Ops::CMove
            | Ops::CMovne
            | Ops::CMovg
            | Ops::CMovge
            | Ops::CMovl
            | Ops::CMovle => Shape::SrcDst,
            Ops::Div | Ops::IDiv => Shape::SrcDstRemainder,
            Ops::Inc
            | Ops::Dec
            | Ops::Neg
            | Ops::Not
            | Ops::Jmp
            | Ops::Je
            | Ops::Jne
            | Ops::Jg
            | Ops::Jge
            | Ops::Jl
            | Ops::Jle
            | Ops::Pop => Shape::Dst,
            Ops::Push => Shape::SrcSized,
            Ops::Nop => Shape::None,
        }
    }

    /// Looks up a lower case mnemonic, aliases included.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        let op = match mnemonic {
            "mov" => Ops::Mov,
            "addrof" => Ops::AddrOf,
            "add" => Ops::Add,
            "sub" => Ops::Sub,
            "mul" => Ops::Mul,
            "imul" => Ops::IMul,
            "div" => Ops::Div,
            "idiv" => Ops::IDiv,
            "inc" => Ops::Inc,
            "dec" => Ops::Dec,
            "neg" => Ops::Neg,
            "not" => Ops::Not,
            "xor" => Ops::Xor,
            "or" => Ops::Or,
            "and" => Ops::And,
            "tst" => Ops::Tst,
            "cmp" => Ops::Cmp,
            "jmp" => Ops::Jmp,
            "je" | "jz" => Ops::Je,
            "jne" | "jnz" => Ops::Jne,
            "jg" => Ops::Jg,
            "jge" => Ops::Jge,
            "jl" => Ops::Jl,
            "jle" => Ops::Jle,
            "cmove" | "cmovz" => Ops::CMove,
            "cmovne" | "cmovnz" => Ops::CMovne,
            "cmovg" => Ops::CMovg,
            "cmovge" => Ops::CMovge,
            "cmovl" => Ops::CMovl,
            "cmovle" => Ops::CMovle,
            "push" => Ops::Push,
            "pop" => Ops::Pop,
            "nop" => Ops::Nop,
            _ => return None,
        };
        Some(op)
    }
}

/// How an operand field maps to a value or an address.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandMode {
    None = 0,
    Register = 1,
    /// Absolute data address.
    Pointer = 2,
    /// Code offset. Writes land in the image itself.
    Label = 3,
    /// Immediate, never a destination.
    Number = 4,
    /// Data address held in a register.
    RegPointer = 5,
    /// Data address assigned to a global at assembly time.
    Variable = 6,
    /// Offset from the frame base of a `local` declaration.
    Local = 7,
}

impl OperandMode {
    /// Encoded width of the operand field in bytes.
    pub fn width(self) -> usize {
        match self {
            OperandMode::None => 0,
            OperandMode::Register | OperandMode::RegPointer => 1,
            OperandMode::Pointer
            | OperandMode::Label
            | OperandMode::Number
            | OperandMode::Variable
            | OperandMode::Local => 2,
        }
    }

    pub fn is_register_field(self) -> bool {
        self.width() == 1
    }
}

impl From<OperandMode> for u8 {
    fn from(mode: OperandMode) -> u8 {
        mode as u8
    }
}

impl TryFrom<u8> for OperandMode {
    type Error = MachineError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let mode = match value {
            0 => OperandMode::None,
            1 => OperandMode::Register,
            2 => OperandMode::Pointer,
            3 => OperandMode::Label,
            4 => OperandMode::Number,
            5 => OperandMode::RegPointer,
            6 => OperandMode::Variable,
            7 => OperandMode::Local,
            _ => return Err(MachineError::InvalidOperandMode(value)),
        };
        Ok(mode)
    }
}

/// Packs the two mode nibbles, destination low and source high.
pub fn pack_modes(dst: OperandMode, src: OperandMode) -> u8 {
    u8::from(src).wrapping_shl(4) | u8::from(dst)
}

/// Splits a mode byte into `(dst, src)`.
pub fn unpack_modes(byte: u8) -> Result<(OperandMode, OperandMode), MachineError> {
    let dst = OperandMode::try_from(byte & 0x0F)?;
    let src = OperandMode::try_from(byte.wrapping_shr(4))?;
    Ok((dst, src))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("bad executable, magic was {0:#010x}")]
    BadExecutableMagic(u32),
    #[error("the image is shorter than its header")]
    TruncatedHeader,
    #[error("could not allocate the data segment: {0}")]
    AllocationFailure(MemoryError),
    #[error("the value {0} is an invalid opcode")]
    InvalidOp(u8),
    #[error("the value {0} is an invalid operand mode")]
    InvalidOperandMode(u8),
    #[error("instruction at {0} runs past the end of the image")]
    TruncatedInstruction(usize),
    #[error("instruction at {0} is missing an operand")]
    MissingOperand(usize),
    #[error("operand mode {mode:?} can not be written at {at}")]
    InvalidDestination { mode: OperandMode, at: usize },
    #[error("division by zero at {0}")]
    DivideByZero(usize),
    #[error("attempted push would overflow the stack")]
    StackOverflow,
    #[error("attempted pop would underflow the stack")]
    StackUnderflow,
    #[error("the value {0} is an invalid push size")]
    InvalidSizeCode(u8),
    #[error("data access at {address} is out of bounds")]
    DataAccessOutOfBounds { address: usize },
    #[error("code write at {address} is out of bounds")]
    CodeWriteOutOfBounds { address: usize },
    #[error("the step budget of {0} instructions was exhausted")]
    StepBudgetExceeded(u64),
}
