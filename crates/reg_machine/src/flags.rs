use crate::Word;

const SIGN_BIT: Word = 0x8000;
const MAX_POSITIVE: Word = 0x7FFF;

fn sign(value: Word) -> bool {
    value & SIGN_BIT != 0
}

/// Status flags of the last arithmetic or logic instruction.
///
/// Each operation recomputes every flag it owns and returns the 16 bit
/// result, so callers never touch individual flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub carry: bool,
    pub zero: bool,
    pub sign: bool,
    pub overflow: bool,
}

impl Flags {
    fn set_result(&mut self, result: Word) {
        self.zero = result == 0;
        self.sign = sign(result);
    }

    /// `dst + src`
    pub fn add(&mut self, dst: Word, src: Word) -> Word {
        let wide = u32::from(dst).wrapping_add(u32::from(src));
        let result = wide as Word;
        self.carry = wide & 0x1_0000 != 0;
        self.set_result(result);
        self.overflow = sign(dst) == sign(src) && sign(result) != sign(dst);
        result
    }

    /// `dst - src`. Carry is the borrow out of bit 15.
    ///
    /// Overflow is set when the operand signs differ and the result sign
    /// differs from the source sign.
    pub fn subtract(&mut self, dst: Word, src: Word) -> Word {
        let wide = u32::from(dst).wrapping_sub(u32::from(src));
        let result = wide as Word;
        self.carry = wide & 0x1_0000 != 0;
        self.set_result(result);
        self.overflow = sign(dst) != sign(src) && sign(result) != sign(src);
        result
    }

    /// Two's complement negate, flagged as `0 - value`.
    pub fn negate(&mut self, value: Word) -> Word {
        self.subtract(0, value)
    }

    /// Unsigned multiply. Carry and overflow mark a non zero high word.
    pub fn mul(&mut self, dst: Word, src: Word) -> Word {
        let wide = u32::from(dst).wrapping_mul(u32::from(src));
        let result = wide as Word;
        self.carry = wide.wrapping_shr(16) != 0;
        self.overflow = self.carry;
        self.zero = wide == 0;
        self.sign = sign(result);
        result
    }

    /// Signed multiply. Carry and overflow mark a product that does not
    /// fit in 16 signed bits.
    pub fn imul(&mut self, dst: Word, src: Word) -> Word {
        let wide = i32::from(dst as i16).wrapping_mul(i32::from(src as i16));
        let result = wide as Word;
        self.carry = wide != i32::from(result as i16);
        self.overflow = self.carry;
        self.zero = wide == 0;
        self.sign = sign(result);
        result
    }

    pub fn and(&mut self, dst: Word, src: Word) -> Word {
        self.logic(dst & src)
    }

    pub fn or(&mut self, dst: Word, src: Word) -> Word {
        self.logic(dst | src)
    }

    pub fn xor(&mut self, dst: Word, src: Word) -> Word {
        self.logic(dst ^ src)
    }

    pub fn not(&mut self, value: Word) -> Word {
        self.logic(!value)
    }

    fn logic(&mut self, result: Word) -> Word {
        self.carry = false;
        self.overflow = false;
        self.set_result(result);
        result
    }

    /// Leaves carry alone.
    pub fn inc(&mut self, value: Word) -> Word {
        let result = value.wrapping_add(1);
        self.set_result(result);
        self.overflow = result == SIGN_BIT;
        result
    }

    /// Leaves carry alone.
    pub fn dec(&mut self, value: Word) -> Word {
        let result = value.wrapping_sub(1);
        self.set_result(result);
        self.overflow = result == MAX_POSITIVE;
        result
    }

    pub fn equal(&self) -> bool {
        self.zero
    }

    pub fn greater(&self) -> bool {
        !self.zero && self.sign == self.overflow
    }

    pub fn greater_or_equal(&self) -> bool {
        self.sign == self.overflow
    }

    pub fn less(&self) -> bool {
        self.sign != self.overflow
    }

    pub fn less_or_equal(&self) -> bool {
        self.zero || self.sign != self.overflow
    }
}

#[cfg(test)]
mod test;
