// Three pass assembler. Pass one collects label and variable names, pass two
// encodes every line with labels standing in as their table index, pass
// three walks the finished image and swaps each index for its address.

use std::io::{BufRead, Cursor, Seek, SeekFrom};
use std::mem;

use thiserror::Error;
use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::image::{Image, ImageError, ImageWriter, Instruction};
use crate::{MachineError, OperandMode, Ops, Shape, VARIABLE_BASE, Word};

const MAX_TOKENS: usize = 16;
const NAME_CAP: usize = 32;

pub const DEFAULT_DATA_PAGE_SIZE: u64 = 4096;
pub const DEFAULT_STACK_SIZE: u64 = 256;

type Name = heapless::String<NAME_CAP>;
type Tokens<'a> = heapless::Vec<&'a str, MAX_TOKENS>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblerError {
    #[error("{0}")]
    Kind(AssemblerErrorKind),
    #[error("line {line}: {kind}")]
    WithLine { line: u32, kind: AssemblerErrorKind },
}

impl AssemblerError {
    fn with_line(self, line: u32) -> Self {
        match self {
            AssemblerError::WithLine { .. } => self,
            AssemblerError::Kind(kind) => AssemblerError::WithLine { line, kind },
        }
    }

    pub fn line_number(&self) -> Option<u32> {
        match self {
            Self::Kind(_) => None,
            Self::WithLine { line, .. } => Some(*line),
        }
    }

    pub fn error_kind(&self) -> &AssemblerErrorKind {
        match self {
            Self::Kind(kind) => kind,
            Self::WithLine { kind, .. } => kind,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblerErrorKind {
    #[error("syntax error")]
    SyntaxError,
    #[error("unknown token")]
    UnknownToken,
    #[error("unknown instruction")]
    UnknownInstruction,
    #[error("invalid register")]
    InvalidRegister,
    #[error("invalid numeric constant")]
    InvalidNumericConstant,
    #[error("invalid address")]
    InvalidAddress,
    #[error("unresolved label")]
    UnresolvedLabel,
    #[error("invalid variable type")]
    InvalidVariableType,
    #[error("label declared twice")]
    DuplicateLabel,
    #[error("variable declared twice")]
    DuplicateVariable,
    #[error("a number can not be a destination")]
    InvalidDestination,
    #[error("invalid pragma argument")]
    InvalidPragmaArgument,
    #[error("too many tokens on one line")]
    TooManyTokens,
    #[error("name is longer than 32 bytes")]
    NameTooLong,
    #[error("local declared after an explicit push or pop")]
    LocalAfterStackOp,
    #[error("{0}")]
    Image(ImageError),
    #[error("emitted code does not decode: {0}")]
    Decode(MachineError),
    #[error("read failed: {0}")]
    Io(std::io::ErrorKind),
}

impl From<AssemblerErrorKind> for AssemblerError {
    fn from(kind: AssemblerErrorKind) -> Self {
        AssemblerError::Kind(kind)
    }
}

impl From<ImageError> for AssemblerError {
    fn from(err: ImageError) -> Self {
        AssemblerError::Kind(AssemblerErrorKind::Image(err))
    }
}

impl From<std::io::Error> for AssemblerError {
    fn from(err: std::io::Error) -> Self {
        AssemblerError::Kind(AssemblerErrorKind::Io(err.kind()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Byte,
    Int16,
    Uint16,
}

impl VarType {
    pub fn from_keyword(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("byte") {
            Some(VarType::Byte)
        } else if token.eq_ignore_ascii_case("int16") {
            Some(VarType::Int16)
        } else if token.eq_ignore_ascii_case("uint16") {
            Some(VarType::Uint16)
        } else {
            None
        }
    }

    /// Width in bytes, also the size code of a `push`.
    pub fn size(self) -> Word {
        match self {
            VarType::Byte => 1,
            VarType::Int16 | VarType::Uint16 => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Label {
    name: Name,
    line: u32,
    address: Option<Word>,
}

impl Label {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Line of the declaration.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Image offset, known once the declaring line has been encoded.
    pub fn address(&self) -> Option<Word> {
        self.address
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    name: Name,
    address: Word,
    ty: VarType,
    declared: bool,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Word {
        self.address
    }

    pub fn ty(&self) -> VarType {
        self.ty
    }

    fn fits(&self, data_page_size: u64) -> bool {
        u64::from(self.address).saturating_add(u64::from(self.ty.size())) <= data_page_size
    }
}

#[derive(Debug, Clone)]
pub struct Local {
    name: Name,
    offset: Word,
    ty: VarType,
}

impl Local {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset from the frame base.
    pub fn offset(&self) -> Word {
        self.offset
    }

    pub fn ty(&self) -> VarType {
        self.ty
    }
}

#[derive(Debug, Clone, Copy)]
struct Arg {
    mode: OperandMode,
    value: Word,
}

impl Arg {
    fn new(mode: OperandMode, value: Word) -> Self {
        Self { mode, value }
    }
}

pub struct Assembler<D: Diagnostics> {
    diagnostics: D,
    labels: Vec<Label>,
    variables: Vec<Variable>,
    locals: Vec<Local>,
    writer: ImageWriter,
    /// Source line of every emitted instruction, in image order.
    instruction_lines: Vec<u32>,
    stack_offset: Word,
    /// Set once a `push` or `pop` is written by hand, local offsets are
    /// no longer known statically after that.
    stack_touched: bool,
    data_page_size: u64,
    stack_size: u64,
    line_number: u32,
}

impl<D: Diagnostics> Assembler<D> {
    pub fn new(diagnostics: D) -> Self {
        Self {
            diagnostics,
            labels: Vec::new(),
            variables: Vec::new(),
            locals: Vec::new(),
            writer: ImageWriter::new(),
            instruction_lines: Vec::new(),
            stack_offset: 0,
            stack_touched: false,
            data_page_size: DEFAULT_DATA_PAGE_SIZE,
            stack_size: DEFAULT_STACK_SIZE,
            line_number: 0,
        }
    }

    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> D {
        self.diagnostics
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn locals(&self) -> &[Local] {
        &self.locals
    }

    pub fn assemble(&mut self, source: &str) -> Result<Image, AssemblerError> {
        self.assemble_reader(&mut Cursor::new(source.as_bytes()))
    }

    /// Assembles everything from the reader's current position on. Any
    /// failure is reported to the diagnostics sink and returned.
    pub fn assemble_reader<R: BufRead + Seek>(
        &mut self,
        reader: &mut R,
    ) -> Result<Image, AssemblerError> {
        let result = self.run_passes(reader);
        if let Err(err) = &result {
            self.diagnostics
                .report(&err.to_string(), err.line_number());
        }
        result
    }

    /// Collects label and variable names. Never fails on bad source, bad
    /// names are left for the encoding pass to report. The reader is put
    /// back where it started.
    pub fn prescan<R: BufRead + Seek>(&mut self, reader: &mut R) -> Result<(), AssemblerError> {
        self.labels.clear();
        self.variables.clear();

        let start = reader.stream_position()?;
        let mut next_address = Some(VARIABLE_BASE);
        let mut line_number = 0u32;
        for line in (&mut *reader).lines() {
            let line = line?;
            line_number = line_number.saturating_add(1);
            let Ok(tokens) = tokenize(&line) else {
                continue;
            };
            let Some(first) = tokens.first() else {
                continue;
            };

            if let Some(name) = first.strip_suffix(':') {
                if !is_identifier(name) || self.find_label(name).is_some() {
                    continue;
                }
                if let Ok(name) = to_name(name) {
                    self.labels.push(Label {
                        name,
                        line: line_number,
                        address: None,
                    });
                }
            } else if let Some(ty) = VarType::from_keyword(first) {
                for token in tokens.iter().skip(1) {
                    if !is_identifier(token) || self.find_variable(token).is_some() {
                        continue;
                    }
                    let Ok(name) = to_name(token) else {
                        continue;
                    };
                    let Some(address) = next_address else {
                        break;
                    };
                    self.variables.push(Variable {
                        name,
                        address,
                        ty,
                        declared: false,
                    });
                    next_address = address.checked_add(ty.size());
                }
            }
        }

        reader.seek(SeekFrom::Start(start))?;
        Ok(())
    }

    fn run_passes<R: BufRead + Seek>(&mut self, reader: &mut R) -> Result<Image, AssemblerError> {
        self.prescan(reader)?;
        debug!(
            labels = self.labels.len(),
            variables = self.variables.len(),
            "prescan done"
        );

        self.writer = ImageWriter::new();
        self.instruction_lines.clear();
        self.locals.clear();
        self.stack_offset = 0;
        self.stack_touched = false;
        self.data_page_size = DEFAULT_DATA_PAGE_SIZE;
        self.stack_size = DEFAULT_STACK_SIZE;
        self.line_number = 0;
        for line in (&mut *reader).lines() {
            let line = line?;
            self.line_number = self.line_number.saturating_add(1);
            let line_number = self.line_number;
            self.add_line(&line)
                .map_err(|err| err.with_line(line_number))?;
        }
        debug!(
            instructions = self.instruction_lines.len(),
            "encoding done"
        );

        let writer = mem::take(&mut self.writer);
        let mut image = writer.finish(self.data_page_size, self.stack_size)?;
        self.resolve_labels(&mut image)?;
        debug!(len = image.len(), "labels resolved");
        Ok(image)
    }

    fn add_line(&mut self, line: &str) -> Result<(), AssemblerError> {
        let tokens = tokenize(line)?;
        let Some((first, rest)) = tokens.split_first() else {
            return Ok(());
        };

        if let Some(name) = first.strip_suffix(':') {
            self.add_label(name)?;
            if rest.is_empty() {
                return Ok(());
            }
            return self.handle_instruction(rest);
        }

        if first.eq_ignore_ascii_case("#pragma") {
            self.handle_pragma(rest)
        } else if first.eq_ignore_ascii_case("local") {
            self.declare_local(rest)
        } else if VarType::from_keyword(first).is_some() {
            self.declare_variables(rest)
        } else {
            self.handle_instruction(&tokens)
        }
    }

    fn add_label(&mut self, name: &str) -> Result<(), AssemblerError> {
        if !is_identifier(name) {
            return Err(AssemblerErrorKind::SyntaxError.into());
        }
        to_name(name)?;
        let offset = self.writer.offset()?;
        let Some(index) = self.find_label(name) else {
            return Err(AssemblerErrorKind::UnresolvedLabel.into());
        };
        let Some(label) = self.labels.get_mut(index) else {
            return Err(AssemblerErrorKind::UnresolvedLabel.into());
        };
        if label.address.is_some() {
            return Err(AssemblerErrorKind::DuplicateLabel.into());
        }
        label.address = Some(offset);
        Ok(())
    }

    fn handle_pragma(&mut self, tokens: &[&str]) -> Result<(), AssemblerError> {
        let Some((name, args)) = tokens.split_first() else {
            debug!(line = self.line_number, "ignoring empty pragma");
            return Ok(());
        };
        let target = if name.eq_ignore_ascii_case("datapagesize") {
            &mut self.data_page_size
        } else if name.eq_ignore_ascii_case("stacksize") {
            &mut self.stack_size
        } else {
            debug!(line = self.line_number, pragma = *name, "ignoring unknown pragma");
            return Ok(());
        };
        let [value] = args else {
            return Err(AssemblerErrorKind::InvalidPragmaArgument.into());
        };
        *target = parse_size(value).ok_or(AssemblerErrorKind::InvalidPragmaArgument)?;
        if self
            .variables
            .iter()
            .any(|variable| variable.declared && !variable.fits(self.data_page_size))
        {
            return Err(AssemblerErrorKind::InvalidAddress.into());
        }
        Ok(())
    }

    fn declare_variables(&mut self, names: &[&str]) -> Result<(), AssemblerError> {
        if names.is_empty() {
            return Err(AssemblerErrorKind::SyntaxError.into());
        }
        for name in names {
            if !is_identifier(name) {
                return Err(AssemblerErrorKind::SyntaxError.into());
            }
            to_name(name)?;
            let variable = self
                .find_variable(name)
                .and_then(|index| self.variables.get_mut(index))
                .ok_or(AssemblerErrorKind::InvalidAddress)?;
            if variable.declared {
                return Err(AssemblerErrorKind::DuplicateVariable.into());
            }
            // Globals end where the stack frame begins.
            if !variable.fits(self.data_page_size) {
                return Err(AssemblerErrorKind::InvalidAddress.into());
            }
            variable.declared = true;
        }
        Ok(())
    }

    /// `local <type> <name>` pushes a zeroed slot and names it.
    fn declare_local(&mut self, tokens: &[&str]) -> Result<(), AssemblerError> {
        let [ty, name] = tokens else {
            return Err(AssemblerErrorKind::SyntaxError.into());
        };
        let ty = VarType::from_keyword(ty).ok_or(AssemblerErrorKind::InvalidVariableType)?;
        if self.stack_touched {
            return Err(AssemblerErrorKind::LocalAfterStackOp.into());
        }
        if !is_identifier(name) {
            return Err(AssemblerErrorKind::SyntaxError.into());
        }
        let name = to_name(name)?;
        if self.locals.iter().any(|local| local.name == name) {
            return Err(AssemblerErrorKind::DuplicateVariable.into());
        }

        let offset = self.stack_offset;
        self.stack_offset = offset
            .checked_add(ty.size())
            .ok_or(AssemblerErrorKind::InvalidAddress)?;
        self.locals.push(Local { name, offset, ty });

        self.instruction_lines.push(self.line_number);
        self.writer.emit_op(Ops::Push);
        self.writer.emit_modes(OperandMode::None, OperandMode::Number);
        self.writer.emit_field(OperandMode::Number, 0);
        self.writer.emit_byte(ty.size() as u8);
        Ok(())
    }

    fn handle_instruction(&mut self, tokens: &[&str]) -> Result<(), AssemblerError> {
        let Some((mnemonic, operands)) = tokens.split_first() else {
            return Err(AssemblerErrorKind::SyntaxError.into());
        };
        let op = Ops::from_mnemonic(&mnemonic.to_ascii_lowercase())
            .ok_or(AssemblerErrorKind::UnknownInstruction)?;

        let none = Arg::new(OperandMode::None, 0);
        let (dst, src, trailing) = match (op.shape(), operands) {
            (Shape::None, []) => {
                self.instruction_lines.push(self.line_number);
                self.writer.emit_op(op);
                return Ok(());
            }
            (Shape::Dst, [dst]) => (self.parse_destination(dst)?, none, None),
            (Shape::SrcSized, [src]) => (none, self.parse_operand(src)?, Some(2)),
            (Shape::SrcDst, [src, dst]) => {
                (self.parse_destination(dst)?, self.parse_operand(src)?, None)
            }
            (Shape::SrcDstRemainder, [src, dst, remainder]) => (
                self.parse_destination(dst)?,
                self.parse_operand(src)?,
                Some(parse_remainder(remainder)?),
            ),
            _ => return Err(AssemblerErrorKind::SyntaxError.into()),
        };
        if matches!(op, Ops::Push | Ops::Pop) {
            self.stack_touched = true;
        }

        self.instruction_lines.push(self.line_number);
        self.writer.emit_op(op);
        self.writer.emit_modes(dst.mode, src.mode);
        self.writer.emit_field(dst.mode, dst.value);
        self.writer.emit_field(src.mode, src.value);
        if let Some(byte) = trailing {
            self.writer.emit_byte(byte);
        }
        Ok(())
    }

    fn parse_destination(&self, token: &str) -> Result<Arg, AssemblerError> {
        let arg = self.parse_operand(token)?;
        if arg.mode == OperandMode::Number {
            return Err(AssemblerErrorKind::InvalidDestination.into());
        }
        Ok(arg)
    }

    fn parse_operand(&self, token: &str) -> Result<Arg, AssemblerError> {
        if let Some(inner) = token.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or(AssemblerErrorKind::SyntaxError)?;
            if is_register(inner) {
                return Ok(Arg::new(OperandMode::RegPointer, parse_register(inner)?));
            }
            if inner.starts_with(|c: char| c.is_ascii_digit()) {
                let address =
                    parse_number(inner).map_err(|_| AssemblerErrorKind::InvalidAddress)?;
                return Ok(Arg::new(OperandMode::Pointer, address));
            }
            return Err(AssemblerErrorKind::SyntaxError.into());
        }

        if token.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            return Ok(Arg::new(OperandMode::Number, parse_number(token)?));
        }
        if is_register(token) {
            return Ok(Arg::new(OperandMode::Register, parse_register(token)?));
        }
        if let Some(index) = self.find_label(token) {
            // Provisional, replaced by the address once every label is placed.
            let index = Word::try_from(index).map_err(|_| AssemblerErrorKind::InvalidAddress)?;
            return Ok(Arg::new(OperandMode::Label, index));
        }
        if let Some(variable) = self
            .find_variable(token)
            .and_then(|index| self.variables.get(index))
        {
            return Ok(Arg::new(OperandMode::Variable, variable.address));
        }
        if let Some(local) = self.locals.iter().find(|local| local.name.as_str() == token) {
            return Ok(Arg::new(OperandMode::Local, local.offset));
        }
        if has_register_prefix(token) {
            return Err(AssemblerErrorKind::InvalidRegister.into());
        }
        Err(AssemblerErrorKind::UnknownToken.into())
    }

    fn resolve_labels(&self, image: &mut Image) -> Result<(), AssemblerError> {
        // `finish` leaves the cursor on the first instruction.
        let end = image.len();
        let mut lines = self.instruction_lines.iter().copied();
        while image.position() < end {
            let line = lines.next().unwrap_or(self.line_number);
            let instruction = Instruction::decode(image)
                .map_err(|err| AssemblerError::from(AssemblerErrorKind::Decode(err)).with_line(line))?;
            for operand in [instruction.dst, instruction.src].into_iter().flatten() {
                if operand.mode != OperandMode::Label {
                    continue;
                }
                let address = self
                    .labels
                    .get(usize::from(operand.value))
                    .and_then(Label::address)
                    .ok_or_else(|| {
                        AssemblerError::from(AssemblerErrorKind::UnresolvedLabel).with_line(line)
                    })?;
                image.set_word_at(operand.at, address).map_err(|_| {
                    AssemblerError::from(AssemblerErrorKind::Decode(
                        MachineError::TruncatedInstruction(instruction.at),
                    ))
                    .with_line(line)
                })?;
            }
        }
        Ok(())
    }

    fn find_label(&self, name: &str) -> Option<usize> {
        self.labels.iter().position(|label| label.name.as_str() == name)
    }

    fn find_variable(&self, name: &str) -> Option<usize> {
        self.variables
            .iter()
            .position(|variable| variable.name.as_str() == name)
    }
}

fn tokenize(line: &str) -> Result<Tokens<'_>, AssemblerError> {
    let mut tokens = Tokens::new();
    for token in strip_comment(line)
        .split([' ', '\t', ','])
        .filter(|token| !token.is_empty())
    {
        tokens
            .push(token)
            .map_err(|_| AssemblerErrorKind::TooManyTokens)?;
    }
    Ok(tokens)
}

fn strip_comment(line: &str) -> &str {
    match line.split("//").next() {
        Some(part) => part,
        None => line,
    }
}

/// Starts with a letter, then letters, digits or `_`. Type keywords and
/// register names are reserved.
fn is_identifier(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    first.is_ascii_alphabetic()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && VarType::from_keyword(name).is_none()
        && !is_register(name)
}

fn to_name(name: &str) -> Result<Name, AssemblerError> {
    let mut out = Name::new();
    out.push_str(name)
        .map_err(|_| AssemblerErrorKind::NameTooLong)?;
    Ok(out)
}

fn has_register_prefix(token: &str) -> bool {
    token
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("reg"))
}

/// `regNN`, the prefix followed by digits only.
fn is_register(token: &str) -> bool {
    has_register_prefix(token)
        && token
            .get(3..)
            .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_register(token: &str) -> Result<Word, AssemblerError> {
    let register = token
        .get(3..)
        .and_then(|digits| digits.parse::<u8>().ok())
        .ok_or(AssemblerErrorKind::InvalidRegister)?;
    Ok(Word::from(register))
}

fn parse_remainder(token: &str) -> Result<u8, AssemblerError> {
    if !is_register(token) {
        return Err(AssemblerErrorKind::InvalidRegister.into());
    }
    let register = parse_register(token)?;
    u8::try_from(register).map_err(|_| AssemblerErrorKind::InvalidRegister.into())
}

/// Decimal, `0x` hex, or `-` decimal stored as two's complement.
fn parse_number(token: &str) -> Result<Word, AssemblerError> {
    let invalid = || AssemblerError::from(AssemblerErrorKind::InvalidNumericConstant);
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        return Word::from_str_radix(hex, 16).map_err(|_| invalid());
    }
    if let Some(magnitude) = token.strip_prefix('-') {
        if !magnitude.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let magnitude = magnitude.parse::<u16>().map_err(|_| invalid())?;
        let value = i16::try_from(i32::from(magnitude).wrapping_neg()).map_err(|_| invalid())?;
        return Ok(value as Word);
    }
    token.parse::<Word>().map_err(|_| invalid())
}

fn parse_size(token: &str) -> Option<u64> {
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).ok();
    }
    token.parse::<u64>().ok()
}
