use tracing::{debug, trace};

use crate::diagnostics::Diagnostics;
use crate::flags::Flags;
use crate::image::{HEADER_LEN, Image, Instruction, Operand};
use crate::memory::{Allocator, Chunk, ChunkId};
use crate::registers::{MAX_REGISTERS16, MAX_REGISTERS32, MAX_REGISTERS64, RegisterFile};
use crate::{MachineError, OperandMode, Ops, Word};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub registers16: usize,
    pub registers32: usize,
    pub registers64: usize,
    /// Instructions to execute before giving up, `None` runs until the
    /// code ends.
    pub max_steps: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            registers16: MAX_REGISTERS16,
            registers32: MAX_REGISTERS32,
            registers64: MAX_REGISTERS64,
            max_steps: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Chunk holding the data segment and stack.
    pub data: ChunkId,
    pub steps: u64,
}

pub struct Machine<D: Diagnostics> {
    config: MachineConfig,
    diagnostics: D,
    registers: RegisterFile,
    flags: Flags,
}

impl<D: Diagnostics> Machine<D> {
    pub fn new(config: MachineConfig, diagnostics: D) -> Self {
        Self {
            registers: RegisterFile::new(
                config.registers16,
                config.registers32,
                config.registers64,
            ),
            config,
            diagnostics,
            flags: Flags::default(),
        }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> D {
        self.diagnostics
    }

    /// Runs `image` from its first instruction until the cursor reaches the
    /// end of the code. Registers and flags start cleared and keep their
    /// final state afterwards, the data segment stays allocated in
    /// `allocator`.
    pub fn run<A: Allocator>(
        &mut self,
        image: &mut Image,
        allocator: &mut A,
    ) -> Result<RunReport, MachineError> {
        let result = self.execute(image, allocator);
        if let Err(err) = &result {
            self.diagnostics.report(&err.to_string(), None);
        }
        result
    }

    fn execute<A: Allocator>(
        &mut self,
        image: &mut Image,
        allocator: &mut A,
    ) -> Result<RunReport, MachineError> {
        let header = image.header()?;
        let frame_base = usize::try_from(header.data_size).unwrap_or(usize::MAX);
        let size = usize::try_from(header.data_size.saturating_add(header.stack_size))
            .unwrap_or(usize::MAX);
        let data = allocator
            .allocate(size)
            .map_err(MachineError::AllocationFailure)?;
        let chunk = allocator
            .chunk_mut(data)
            .map_err(MachineError::AllocationFailure)?;
        // The stack pointer is the chunk cursor.
        chunk
            .seek(frame_base)
            .map_err(|_| MachineError::StackOverflow)?;
        image
            .seek(HEADER_LEN)
            .map_err(|_| MachineError::TruncatedHeader)?;

        self.registers.clear();
        self.flags = Flags::default();
        debug!(
            code_size = header.code_size,
            data_size = header.data_size,
            stack_size = header.stack_size,
            "run start"
        );

        let mut core = Core {
            registers: &mut self.registers,
            flags: &mut self.flags,
            code: image,
            data: chunk,
            frame_base,
        };
        let code_end = header.code_end();
        let mut steps = 0u64;
        while core.code.position() < code_end {
            if let Some(max) = self.config.max_steps {
                if steps >= max {
                    return Err(MachineError::StepBudgetExceeded(max));
                }
            }
            let instruction = Instruction::decode(&mut *core.code)?;
            trace!(at = instruction.at, op = ?instruction.op, "step");
            core.step(&instruction)?;
            steps = steps.saturating_add(1);
        }

        debug!(steps, "run end");
        Ok(RunReport { data, steps })
    }
}

struct Core<'a> {
    registers: &'a mut RegisterFile,
    flags: &'a mut Flags,
    code: &'a mut Image,
    data: &'a mut Chunk,
    frame_base: usize,
}

impl Core<'_> {
    fn step(&mut self, instruction: &Instruction) -> Result<(), MachineError> {
        match instruction.op {
            Ops::Mov => {
                let value = self.read(instruction.src()?)?;
                self.write(instruction.dst()?, value)?;
            }
            Ops::AddrOf => {
                let src = instruction.src()?;
                if src.mode == OperandMode::Variable {
                    self.write(instruction.dst()?, src.value)?;
                }
            }
            Ops::Add => self.binary(instruction, Flags::add)?,
            Ops::Sub => self.binary(instruction, Flags::subtract)?,
            Ops::Mul => self.binary(instruction, Flags::mul)?,
            Ops::IMul => self.binary(instruction, Flags::imul)?,
            Ops::Xor => self.binary(instruction, Flags::xor)?,
            Ops::Or => self.binary(instruction, Flags::or)?,
            Ops::And => self.binary(instruction, Flags::and)?,
            Ops::Tst => {
                let (dst, src) = self.read_pair(instruction)?;
                self.flags.and(dst, src);
            }
            Ops::Cmp => {
                let (dst, src) = self.read_pair(instruction)?;
                self.flags.subtract(dst, src);
            }
            Ops::Div | Ops::IDiv => self.divide(instruction)?,
            Ops::Inc => self.unary(instruction, Flags::inc)?,
            Ops::Dec => self.unary(instruction, Flags::dec)?,
            Ops::Neg => self.unary(instruction, Flags::negate)?,
            Ops::Not => self.unary(instruction, Flags::not)?,
            Ops::Jmp => self.jump(instruction)?,
            Ops::Je => self.jump_if(instruction, self.flags.equal())?,
            Ops::Jne => self.jump_if(instruction, !self.flags.equal())?,
            Ops::Jg => self.jump_if(instruction, self.flags.greater())?,
            Ops::Jge => self.jump_if(instruction, self.flags.greater_or_equal())?,
            Ops::Jl => self.jump_if(instruction, self.flags.less())?,
            Ops::Jle => self.jump_if(instruction, self.flags.less_or_equal())?,
            Ops::CMove => self.move_if(instruction, self.flags.equal())?,
            Ops::CMovne => self.move_if(instruction, !self.flags.equal())?,
            Ops::CMovg => self.move_if(instruction, self.flags.greater())?,
            Ops::CMovge => self.move_if(instruction, self.flags.greater_or_equal())?,
            Ops::CMovl => self.move_if(instruction, self.flags.less())?,
            Ops::CMovle => self.move_if(instruction, self.flags.less_or_equal())?,
            Ops::Push => self.push(instruction)?,
            Ops::Pop => self.pop(instruction)?,
            Ops::Nop => {}
        }
        Ok(())
    }

    fn read_pair(&self, instruction: &Instruction) -> Result<(Word, Word), MachineError> {
        Ok((
            self.read(instruction.dst()?)?,
            self.read(instruction.src()?)?,
        ))
    }

    fn binary(
        &mut self,
        instruction: &Instruction,
        op: fn(&mut Flags, Word, Word) -> Word,
    ) -> Result<(), MachineError> {
        let (dst, src) = self.read_pair(instruction)?;
        let result = op(&mut *self.flags, dst, src);
        self.write(instruction.dst()?, result)
    }

    fn unary(
        &mut self,
        instruction: &Instruction,
        op: fn(&mut Flags, Word) -> Word,
    ) -> Result<(), MachineError> {
        let dst = instruction.dst()?;
        let value = self.read(dst)?;
        let result = op(&mut *self.flags, value);
        self.write(dst, result)
    }

    /// Quotient to the destination, remainder to the trailing register.
    /// Flags are left alone.
    fn divide(&mut self, instruction: &Instruction) -> Result<(), MachineError> {
        let (dividend, divisor) = self.read_pair(instruction)?;
        if divisor == 0 {
            return Err(MachineError::DivideByZero(instruction.at));
        }
        let (quotient, remainder) = if instruction.op == Ops::IDiv {
            let (dividend, divisor) = (dividend as i16, divisor as i16);
            (
                dividend.wrapping_div(divisor) as Word,
                dividend.wrapping_rem(divisor) as Word,
            )
        } else {
            (dividend.wrapping_div(divisor), dividend.wrapping_rem(divisor))
        };
        let register = instruction
            .trailing
            .ok_or(MachineError::MissingOperand(instruction.at))?;
        self.write(instruction.dst()?, quotient)?;
        self.registers.set16(usize::from(register), remainder);
        Ok(())
    }

    fn jump(&mut self, instruction: &Instruction) -> Result<(), MachineError> {
        let target = self.read(instruction.dst()?)?;
        self.code
            .seek(usize::from(target))
            .map_err(|_| MachineError::TruncatedInstruction(usize::from(target)))
    }

    fn jump_if(&mut self, instruction: &Instruction, taken: bool) -> Result<(), MachineError> {
        if taken {
            self.jump(instruction)?;
        }
        Ok(())
    }

    fn move_if(&mut self, instruction: &Instruction, taken: bool) -> Result<(), MachineError> {
        if taken {
            let value = self.read(instruction.src()?)?;
            self.write(instruction.dst()?, value)?;
        }
        Ok(())
    }

    fn push(&mut self, instruction: &Instruction) -> Result<(), MachineError> {
        let value = self.read(instruction.src()?)?;
        let size = instruction
            .trailing
            .ok_or(MachineError::MissingOperand(instruction.at))?;
        let width = match size {
            1 | 2 => usize::from(size),
            _ => return Err(MachineError::InvalidSizeCode(size)),
        };
        let fits = self
            .data
            .position()
            .checked_add(width)
            .is_some_and(|end| end <= self.data.len());
        if !fits {
            return Err(MachineError::StackOverflow);
        }
        let pushed = if width == 1 {
            self.data.write_byte(value as u8)
        } else {
            self.data.write_word(value)
        };
        pushed.map_err(|_| MachineError::StackOverflow)
    }

    fn pop(&mut self, instruction: &Instruction) -> Result<(), MachineError> {
        let top = self.data.position();
        let Some(slot) = top.checked_sub(2).filter(|slot| *slot >= self.frame_base) else {
            return Err(MachineError::StackUnderflow);
        };
        let value = self.load(slot)?;
        self.data
            .seek(slot)
            .map_err(|_| MachineError::StackUnderflow)?;
        self.write(instruction.dst()?, value)
    }

    fn load(&self, address: usize) -> Result<Word, MachineError> {
        self.data
            .word_at(address)
            .map_err(|_| MachineError::DataAccessOutOfBounds { address })
    }

    fn local_address(&self, offset: Word) -> usize {
        self.frame_base.saturating_add(usize::from(offset))
    }

    fn read(&self, operand: Operand) -> Result<Word, MachineError> {
        match operand.mode {
            OperandMode::Register => Ok(self.registers.get16(usize::from(operand.value))),
            OperandMode::Label | OperandMode::Number => Ok(operand.value),
            OperandMode::None => Err(MachineError::MissingOperand(operand.at)),
            OperandMode::Pointer
            | OperandMode::Variable
            | OperandMode::RegPointer
            | OperandMode::Local => self.load(self.address(operand)?),
        }
    }

    /// Data address of a memory operand.
    fn address(&self, operand: Operand) -> Result<usize, MachineError> {
        match operand.mode {
            OperandMode::Pointer | OperandMode::Variable => Ok(usize::from(operand.value)),
            OperandMode::RegPointer => {
                Ok(usize::from(self.registers.get16(usize::from(operand.value))))
            }
            OperandMode::Local => Ok(self.local_address(operand.value)),
            mode => Err(MachineError::InvalidDestination {
                mode,
                at: operand.at,
            }),
        }
    }

    fn write(&mut self, operand: Operand, value: Word) -> Result<(), MachineError> {
        match operand.mode {
            OperandMode::Register => {
                self.registers.set16(usize::from(operand.value), value);
                Ok(())
            }
            OperandMode::Label => self.write_code(usize::from(operand.value), value),
            _ => {
                let address = self.address(operand)?;
                self.data
                    .set_word_at(address, value)
                    .map_err(|_| MachineError::DataAccessOutOfBounds { address })
            }
        }
    }

    /// Self modifying write into the image. The fetch cursor is put back so
    /// the current instruction stream carries on undisturbed.
    fn write_code(&mut self, address: usize, value: Word) -> Result<(), MachineError> {
        let resume = self.code.position();
        let written = self
            .code
            .seek(address)
            .and_then(|_| self.code.write_word(value));
        self.code
            .seek(resume)
            .map_err(|_| MachineError::CodeWriteOutOfBounds { address })?;
        written.map_err(|_| MachineError::CodeWriteOutOfBounds { address })
    }
}
