use std::ops::{Deref, DerefMut};

use thiserror::Error;

use crate::memory::{ByteStore, MemoryError};
use crate::{EXE_MAGIC, MachineError, OperandMode, Ops, Shape, Word, pack_modes, unpack_modes};

/// `[u32 magic][u64 code_size][u64 data_size][u64 stack_size]`
pub const HEADER_LEN: usize = 28;

/// Label operands are one word, so nothing past this is addressable.
pub const MAX_IMAGE_LEN: usize = 0x1_0000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("image of {0} bytes exceeds the 65536 byte limit")]
    TooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    /// Length of the instruction stream following the header.
    pub code_size: u64,
    pub data_size: u64,
    pub stack_size: u64,
}

impl Header {
    pub fn read(store: &ByteStore) -> Result<Self, MachineError> {
        let bytes = store
            .as_bytes()
            .get(..HEADER_LEN)
            .ok_or(MachineError::TruncatedHeader)?;
        let mut header = ByteStore::from_bytes(bytes.to_vec());
        let truncated = |_: MemoryError| MachineError::TruncatedHeader;
        let magic = header.read_dword().map_err(truncated)?;
        if magic != EXE_MAGIC {
            return Err(MachineError::BadExecutableMagic(magic));
        }
        Ok(Self {
            magic,
            code_size: header.read_qword().map_err(truncated)?,
            data_size: header.read_qword().map_err(truncated)?,
            stack_size: header.read_qword().map_err(truncated)?,
        })
    }

    /// Writes the header at the start of `store`, the cursor ends up on
    /// the first instruction.
    pub fn write(&self, store: &mut ByteStore) -> Result<(), MemoryError> {
        store.seek(0)?;
        store.write_dword(self.magic)?;
        store.write_qword(self.code_size)?;
        store.write_qword(self.data_size)?;
        store.write_qword(self.stack_size)
    }

    /// Offset one past the last instruction.
    pub fn code_end(&self) -> usize {
        usize::try_from(self.code_size)
            .unwrap_or(usize::MAX)
            .saturating_add(HEADER_LEN)
    }
}

/// An executable image. The cursor is the machine's program counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    store: ByteStore,
}

impl Image {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            store: ByteStore::from_bytes(bytes),
        }
    }

    pub fn header(&self) -> Result<Header, MachineError> {
        Header::read(&self.store)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.store.into_bytes()
    }
}

impl Deref for Image {
    type Target = ByteStore;
    fn deref(&self) -> &ByteStore {
        &self.store
    }
}

impl DerefMut for Image {
    fn deref_mut(&mut self) -> &mut ByteStore {
        &mut self.store
    }
}

/// Appends instructions after a placeholder header, the header is filled
/// in by [`ImageWriter::finish`].
pub struct ImageWriter {
    bytes: Vec<u8>,
}

impl Default for ImageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageWriter {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; HEADER_LEN],
        }
    }

    /// Absolute image offset of the next emitted byte.
    pub fn offset(&self) -> Result<Word, ImageError> {
        Word::try_from(self.bytes.len()).map_err(|_| ImageError::TooLarge(self.bytes.len()))
    }

    pub fn emit_byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn emit_word(&mut self, word: Word) {
        self.bytes.extend_from_slice(&word.to_le_bytes());
    }

    pub fn emit_op(&mut self, op: Ops) {
        self.emit_byte(op.into());
    }

    pub fn emit_modes(&mut self, dst: OperandMode, src: OperandMode) {
        self.emit_byte(pack_modes(dst, src));
    }

    /// Emits one operand field at the width its mode requires.
    pub fn emit_field(&mut self, mode: OperandMode, value: Word) {
        match mode.width() {
            0 => {}
            1 => self.emit_byte(value as u8),
            _ => self.emit_word(value),
        }
    }

    pub fn finish(self, data_size: u64, stack_size: u64) -> Result<Image, ImageError> {
        let len = self.bytes.len();
        if len > MAX_IMAGE_LEN {
            return Err(ImageError::TooLarge(len));
        }
        let header = Header {
            magic: EXE_MAGIC,
            code_size: len.saturating_sub(HEADER_LEN) as u64,
            data_size,
            stack_size,
        };
        let mut store = ByteStore::from_bytes(self.bytes);
        header
            .write(&mut store)
            .map_err(|_| ImageError::TooLarge(len))?;
        Ok(Image { store })
    }
}

/// One decoded operand field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub mode: OperandMode,
    pub value: Word,
    /// Image offset of the encoded field.
    pub at: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Ops,
    /// Image offset of the opcode.
    pub at: usize,
    pub dst: Option<Operand>,
    pub src: Option<Operand>,
    /// Remainder register of `div`/`idiv`, size code of `push`.
    pub trailing: Option<u8>,
}

impl Instruction {
    /// Decodes the instruction under the cursor and leaves the cursor on
    /// the one after it.
    pub fn decode(store: &mut ByteStore) -> Result<Self, MachineError> {
        let at = store.position();
        let truncated = |_: MemoryError| MachineError::TruncatedInstruction(at);

        let op = Ops::try_from(store.read_byte().map_err(truncated)?)?;
        let shape = op.shape();
        let mut instruction = Self {
            op,
            at,
            dst: None,
            src: None,
            trailing: None,
        };
        if shape == Shape::None {
            return Ok(instruction);
        }

        let (dst_mode, src_mode) = unpack_modes(store.read_byte().map_err(truncated)?)?;
        if shape.has_dst() {
            instruction.dst = Some(read_operand(store, dst_mode, at)?);
        }
        if shape.has_src() {
            instruction.src = Some(read_operand(store, src_mode, at)?);
        }
        if shape.has_trailing_byte() {
            instruction.trailing = Some(store.read_byte().map_err(truncated)?);
        }
        Ok(instruction)
    }

    pub fn dst(&self) -> Result<Operand, MachineError> {
        self.dst.ok_or(MachineError::MissingOperand(self.at))
    }

    pub fn src(&self) -> Result<Operand, MachineError> {
        self.src.ok_or(MachineError::MissingOperand(self.at))
    }
}

fn read_operand(
    store: &mut ByteStore,
    mode: OperandMode,
    instruction_at: usize,
) -> Result<Operand, MachineError> {
    let at = store.position();
    let truncated = |_: MemoryError| MachineError::TruncatedInstruction(instruction_at);
    let value = match mode {
        OperandMode::None => return Err(MachineError::MissingOperand(instruction_at)),
        mode if mode.is_register_field() => Word::from(store.read_byte().map_err(truncated)?),
        _ => store.read_word().map_err(truncated)?,
    };
    Ok(Operand { mode, value, at })
}
