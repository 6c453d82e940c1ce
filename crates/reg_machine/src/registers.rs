use heapless::Vec;

use crate::Word;

pub const MAX_REGISTERS16: usize = 12;
pub const MAX_REGISTERS32: usize = 24;
pub const MAX_REGISTERS64: usize = 32;

/// Three banks of general purpose registers.
///
/// Indices outside a bank read as all ones, writes to them are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    r16: Vec<Word, MAX_REGISTERS16>,
    r32: Vec<u32, MAX_REGISTERS32>,
    r64: Vec<u64, MAX_REGISTERS64>,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new(MAX_REGISTERS16, MAX_REGISTERS32, MAX_REGISTERS64)
    }
}

fn bank<T: Copy + Default, const N: usize>(count: usize) -> Vec<T, N> {
    let mut bank = Vec::new();
    // Cannot fail, the count is clamped to the capacity.
    let _ = bank.resize(count.min(N), T::default());
    bank
}

impl RegisterFile {
    /// Bank sizes larger than a bank's maximum are clamped.
    pub fn new(count16: usize, count32: usize, count64: usize) -> Self {
        Self {
            r16: bank(count16),
            r32: bank(count32),
            r64: bank(count64),
        }
    }

    pub fn len16(&self) -> usize {
        self.r16.len()
    }

    pub fn len32(&self) -> usize {
        self.r32.len()
    }

    pub fn len64(&self) -> usize {
        self.r64.len()
    }

    pub fn get16(&self, index: usize) -> Word {
        self.r16.get(index).copied().unwrap_or(Word::MAX)
    }

    pub fn get32(&self, index: usize) -> u32 {
        self.r32.get(index).copied().unwrap_or(u32::MAX)
    }

    pub fn get64(&self, index: usize) -> u64 {
        self.r64.get(index).copied().unwrap_or(u64::MAX)
    }

    pub fn set16(&mut self, index: usize, value: Word) {
        if let Some(register) = self.r16.get_mut(index) {
            *register = value;
        }
    }

    pub fn set32(&mut self, index: usize, value: u32) {
        if let Some(register) = self.r32.get_mut(index) {
            *register = value;
        }
    }

    pub fn set64(&mut self, index: usize, value: u64) {
        if let Some(register) = self.r64.get_mut(index) {
            *register = value;
        }
    }

    pub fn registers16(&self) -> &[Word] {
        &self.r16
    }

    pub fn clear(&mut self) {
        self.r16.iter_mut().for_each(|r| *r = 0);
        self.r32.iter_mut().for_each(|r| *r = 0);
        self.r64.iter_mut().for_each(|r| *r = 0);
    }
}

#[cfg(test)]
mod test;
