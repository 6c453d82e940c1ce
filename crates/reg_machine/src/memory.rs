use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::ops::{Deref, DerefMut};

use thiserror::Error;

use crate::Word;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("requested {requested} bytes but only {free} are free")]
    InsufficientCapacity { requested: usize, free: usize },
    #[error("every page id is in use")]
    PageIdsExhausted,
    #[error("no live chunk with id {0:?}")]
    UnknownChunk(ChunkId),
    #[error("access of {width} bytes at {at} is outside a store of {len} bytes")]
    OutOfBounds { at: usize, width: usize, len: usize },
}

/// Little endian byte buffer with a read/write cursor.
///
/// Cursor access advances the cursor, absolute access leaves it alone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteStore {
    bytes: Vec<u8>,
    cursor: usize,
}

impl ByteStore {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
            cursor: 0,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor. Seeking to `len()` is allowed, past it is not.
    pub fn seek(&mut self, position: usize) -> Result<(), MemoryError> {
        if position > self.bytes.len() {
            return Err(MemoryError::OutOfBounds {
                at: position,
                width: 0,
                len: self.bytes.len(),
            });
        }
        self.cursor = position;
        Ok(())
    }

    pub fn fill(&mut self, value: u8) {
        self.bytes.fill(value);
    }

    fn span(&self, at: usize, width: usize) -> Result<core::ops::Range<usize>, MemoryError> {
        let out_of_bounds = MemoryError::OutOfBounds {
            at,
            width,
            len: self.bytes.len(),
        };
        let Some(end) = at.checked_add(width) else {
            return Err(out_of_bounds);
        };
        if end > self.bytes.len() {
            return Err(out_of_bounds);
        }
        Ok(at..end)
    }

    fn read_array<const N: usize>(&self, at: usize) -> Result<[u8; N], MemoryError> {
        let span = self.span(at, N)?;
        let mut out = [0u8; N];
        if let Some(src) = self.bytes.get(span) {
            out.copy_from_slice(src);
        }
        Ok(out)
    }

    fn write_slice(&mut self, at: usize, value: &[u8]) -> Result<(), MemoryError> {
        let span = self.span(at, value.len())?;
        if let Some(dst) = self.bytes.get_mut(span) {
            dst.copy_from_slice(value);
        }
        Ok(())
    }

    fn advance(&mut self, width: usize) {
        self.cursor = self.cursor.saturating_add(width);
    }

    pub fn byte_at(&self, at: usize) -> Result<u8, MemoryError> {
        let [byte] = self.read_array::<1>(at)?;
        Ok(byte)
    }

    pub fn word_at(&self, at: usize) -> Result<Word, MemoryError> {
        Ok(Word::from_le_bytes(self.read_array(at)?))
    }

    pub fn set_byte_at(&mut self, at: usize, value: u8) -> Result<(), MemoryError> {
        self.write_slice(at, &[value])
    }

    pub fn set_word_at(&mut self, at: usize, value: Word) -> Result<(), MemoryError> {
        self.write_slice(at, &value.to_le_bytes())
    }

    pub fn read_byte(&mut self) -> Result<u8, MemoryError> {
        let value = self.byte_at(self.cursor)?;
        self.advance(1);
        Ok(value)
    }

    pub fn read_word(&mut self) -> Result<Word, MemoryError> {
        let value = self.word_at(self.cursor)?;
        self.advance(2);
        Ok(value)
    }

    pub fn read_dword(&mut self) -> Result<u32, MemoryError> {
        let value = u32::from_le_bytes(self.read_array(self.cursor)?);
        self.advance(4);
        Ok(value)
    }

    pub fn read_qword(&mut self) -> Result<u64, MemoryError> {
        let value = u64::from_le_bytes(self.read_array(self.cursor)?);
        self.advance(8);
        Ok(value)
    }

    pub fn write_byte(&mut self, value: u8) -> Result<(), MemoryError> {
        self.write_slice(self.cursor, &[value])?;
        self.advance(1);
        Ok(())
    }

    pub fn write_word(&mut self, value: Word) -> Result<(), MemoryError> {
        self.write_slice(self.cursor, &value.to_le_bytes())?;
        self.advance(2);
        Ok(())
    }

    pub fn write_dword(&mut self, value: u32) -> Result<(), MemoryError> {
        self.write_slice(self.cursor, &value.to_le_bytes())?;
        self.advance(4);
        Ok(())
    }

    pub fn write_qword(&mut self, value: u64) -> Result<(), MemoryError> {
        self.write_slice(self.cursor, &value.to_le_bytes())?;
        self.advance(8);
        Ok(())
    }
}

/// Opaque page id of a chunk. Ids are random, never rely on a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(u16);

impl ChunkId {
    pub fn to_raw(self) -> u16 {
        self.0
    }
}

/// Independently addressed allocation drawn from a [`Module`].
#[derive(Debug)]
pub struct Chunk {
    id: ChunkId,
    store: ByteStore,
}

impl Chunk {
    pub fn id(&self) -> ChunkId {
        self.id
    }
}

impl Deref for Chunk {
    type Target = ByteStore;
    fn deref(&self) -> &ByteStore {
        &self.store
    }
}

impl DerefMut for Chunk {
    fn deref_mut(&mut self) -> &mut ByteStore {
        &mut self.store
    }
}

/// Hands out chunks of memory to a running program.
pub trait Allocator {
    fn allocate(&mut self, size: usize) -> Result<ChunkId, MemoryError>;
    fn chunk_mut(&mut self, id: ChunkId) -> Result<&mut Chunk, MemoryError>;
}

// xorshift32, the high half of each state is a candidate page id.
#[derive(Debug)]
struct PageIds(u32);

impl PageIds {
    fn new(seed: u32) -> Self {
        // Zero is a fixed point of xorshift.
        Self(if seed == 0 { 0x9E37_79B9 } else { seed })
    }

    fn next(&mut self) -> u16 {
        let mut x = self.0;
        x ^= x.wrapping_shl(13);
        x ^= x.wrapping_shr(17);
        x ^= x.wrapping_shl(5);
        self.0 = x;
        x.wrapping_shr(16) as u16
    }
}

const PAGE_ID_COUNT: usize = 0x1_0000;

/// Fixed capacity backing store.
#[derive(Debug)]
pub struct Module {
    capacity: usize,
    volatile: bool,
    chunks: Vec<Chunk>,
    ids: PageIds,
}

impl Module {
    pub fn new(capacity: usize, volatile: bool) -> Self {
        let mut hasher = RandomState::new().build_hasher();
        hasher.write_usize(capacity);
        Self::with_seed(capacity, volatile, hasher.finish() as u32)
    }

    /// Same as [`Module::new`] with a fixed page id sequence.
    pub fn with_seed(capacity: usize, volatile: bool, seed: u32) -> Self {
        Self {
            capacity,
            volatile,
            chunks: Vec::new(),
            ids: PageIds::new(seed),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile
    }

    pub fn used(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.len()).sum()
    }

    pub fn free_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn allocate(&mut self, size: usize) -> Result<ChunkId, MemoryError> {
        let free = self.free_capacity();
        if size > free {
            return Err(MemoryError::InsufficientCapacity {
                requested: size,
                free,
            });
        }
        if self.chunks.len() >= PAGE_ID_COUNT {
            return Err(MemoryError::PageIdsExhausted);
        }
        let id = loop {
            let candidate = ChunkId(self.ids.next());
            if !self.chunks.iter().any(|chunk| chunk.id == candidate) {
                break candidate;
            }
        };
        tracing::trace!(size, id = id.0, "allocated chunk");
        self.chunks.push(Chunk {
            id,
            store: ByteStore::new(size),
        });
        Ok(id)
    }

    pub fn free(&mut self, id: ChunkId) -> Result<(), MemoryError> {
        let Some(index) = self.chunks.iter().position(|chunk| chunk.id == id) else {
            return Err(MemoryError::UnknownChunk(id));
        };
        self.chunks.swap_remove(index);
        Ok(())
    }

    pub fn chunk(&self, id: ChunkId) -> Result<&Chunk, MemoryError> {
        self.chunks
            .iter()
            .find(|chunk| chunk.id == id)
            .ok_or(MemoryError::UnknownChunk(id))
    }

    pub fn chunk_mut(&mut self, id: ChunkId) -> Result<&mut Chunk, MemoryError> {
        self.chunks
            .iter_mut()
            .find(|chunk| chunk.id == id)
            .ok_or(MemoryError::UnknownChunk(id))
    }

    /// Simulates losing power. Volatile modules forget their contents,
    /// chunks stay allocated.
    pub fn power_cycle(&mut self) {
        if !self.volatile {
            return;
        }
        for chunk in self.chunks.iter_mut() {
            chunk.fill(0);
            chunk.cursor = 0;
        }
    }
}

impl Allocator for Module {
    fn allocate(&mut self, size: usize) -> Result<ChunkId, MemoryError> {
        Module::allocate(self, size)
    }

    fn chunk_mut(&mut self, id: ChunkId) -> Result<&mut Chunk, MemoryError> {
        Module::chunk_mut(self, id)
    }
}
