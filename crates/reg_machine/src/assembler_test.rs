use std::io::Cursor;

use indoc::indoc;

use crate::assembler::{Assembler, AssemblerError, AssemblerErrorKind, VarType};
use crate::diagnostics::CollectedDiagnostics;
use crate::image::{HEADER_LEN, Image};
use crate::{Ops, Word};

fn assembler() -> Assembler<CollectedDiagnostics> {
    Assembler::new(CollectedDiagnostics::new())
}

fn code(image: &Image) -> &[u8] {
    &image.as_bytes()[HEADER_LEN..]
}

fn error_of(source: &str) -> AssemblerError {
    assembler().assemble(source).unwrap_err()
}

#[test]
fn encodes_src_dst_pairs() -> Result<(), AssemblerError> {
    let image = assembler().assemble(indoc! {"
        mov 5, reg00
        add 3, reg00
    "})?;
    #[rustfmt::skip]
    let goal = [
        0, 0x41, 0, 5, 0, // mov 5, reg00
        2, 0x41, 0, 3, 0, // add 3, reg00
    ];
    assert_eq!(code(&image), &goal);
    let header = image.header().unwrap();
    assert_eq!(header.code_size, 10);
    assert_eq!(header.data_size, 4096);
    assert_eq!(header.stack_size, 256);
    Ok(())
}

#[test]
fn encodes_every_operand_shape() -> Result<(), AssemblerError> {
    let image = assembler().assemble(indoc! {"
        uint16 total
        nop
        inc [reg01]
        push 0x1234
        pop total
        div [8], reg02, reg03
        mov -1, [0x20]
    "})?;
    #[rustfmt::skip]
    let goal = [
        32,                         // nop
        4, 0x05, 1,                 // inc [reg01]
        30, 0x40, 0x34, 0x12, 2,    // push 0x1234, size 2
        31, 0x06, 8, 0,             // pop total
        15, 0x21, 2, 8, 0, 3,       // div [8], reg02, reg03
        0, 0x42, 0x20, 0, 0xFF, 0xFF, // mov -1, [0x20]
    ];
    assert_eq!(code(&image), &goal);
    Ok(())
}

#[test]
fn mnemonics_ignore_case() -> Result<(), AssemblerError> {
    let lower = assembler().assemble("mov 5, reg00\njz end\nend:")?;
    let upper = assembler().assemble("MOV 5, REG00\nJE end\nend:")?;
    assert_eq!(lower, upper);
    Ok(())
}

#[test]
fn label_names_are_case_sensitive() {
    let err = error_of("Top:\njmp top");
    assert_eq!(err.error_kind(), &AssemblerErrorKind::UnknownToken);
    assert_eq!(err.line_number(), Some(2));
}

#[test]
fn resolves_forward_labels_to_offsets() -> Result<(), AssemblerError> {
    let mut asm = assembler();
    let image = asm.assemble(indoc! {"
        jmp skip
        mov 1, reg00
        skip:
        mov 2, reg00
    "})?;
    assert_eq!(image.word_at(30).unwrap(), 37);
    let label = &asm.labels()[0];
    assert_eq!(label.name(), "skip");
    assert_eq!(label.address(), Some(37));
    assert_eq!(label.line(), 3);
    Ok(())
}

#[test]
fn label_may_share_a_line() -> Result<(), AssemblerError> {
    let mut asm = assembler();
    let image = asm.assemble(indoc! {"
        nop
        again: inc reg00 // count
        jmp again
    "})?;
    assert_eq!(asm.labels()[0].address(), Some(29));
    #[rustfmt::skip]
    let goal = [
        32,
        4, 0x01, 0,
        18, 0x03, 29, 0,
    ];
    assert_eq!(code(&image), &goal);
    Ok(())
}

#[test]
fn variables_get_increasing_addresses() -> Result<(), AssemblerError> {
    let mut asm = assembler();
    asm.assemble(indoc! {"
        byte a, b
        uint16 c
        int16 d
        mov c, reg00
    "})?;
    let vars: Vec<(&str, Word, VarType)> = asm
        .variables()
        .iter()
        .map(|v| (v.name(), v.address(), v.ty()))
        .collect();
    assert_eq!(
        vars,
        vec![
            ("a", 8, VarType::Byte),
            ("b", 9, VarType::Byte),
            ("c", 10, VarType::Uint16),
            ("d", 12, VarType::Int16),
        ]
    );
    Ok(())
}

#[test]
fn locals_push_their_size() -> Result<(), AssemblerError> {
    let mut asm = assembler();
    let image = asm.assemble(indoc! {"
        local byte flag
        local int16 count
        mov 1, count
    "})?;
    #[rustfmt::skip]
    let goal = [
        30, 0x40, 0, 0, 1,     // push 0, size 1
        30, 0x40, 0, 0, 2,     // push 0, size 2
        0, 0x47, 1, 0, 1, 0,   // mov 1, count
    ];
    assert_eq!(code(&image), &goal);
    assert_eq!(asm.locals()[1].offset(), 1);
    assert_eq!(asm.locals()[1].ty(), VarType::Int16);
    Ok(())
}

#[test]
fn pragmas_configure_header() -> Result<(), AssemblerError> {
    let image = assembler().assemble(indoc! {"
        #pragma datapagesize 0x100
        #PRAGMA StackSize 16
        #pragma optimize everything
        nop
    "})?;
    let header = image.header().unwrap();
    assert_eq!(header.data_size, 0x100);
    assert_eq!(header.stack_size, 16);
    Ok(())
}

#[test]
fn numbers() -> Result<(), AssemblerError> {
    let image = assembler().assemble("mov -32768, reg00\nmov 0xffff, reg01\nmov 65535, reg02")?;
    assert_eq!(image.word_at(HEADER_LEN + 3).unwrap(), 0x8000);
    assert_eq!(image.word_at(HEADER_LEN + 8).unwrap(), 0xFFFF);
    assert_eq!(image.word_at(HEADER_LEN + 13).unwrap(), 0xFFFF);
    Ok(())
}

#[test]
fn reports_line_numbers_on_error() {
    #[rustfmt::skip]
    let cases = [
        ("nop\n\nfrobnicate reg00", 3, AssemblerErrorKind::UnknownInstruction),
        ("mov 5, nowhere", 1, AssemblerErrorKind::UnknownToken),
        ("nop\nmov 5, reg999", 2, AssemblerErrorKind::InvalidRegister),
        ("mov 5, regx", 1, AssemblerErrorKind::InvalidRegister),
        ("div 5, reg00, 7", 1, AssemblerErrorKind::InvalidRegister),
        ("mov 70000, reg00", 1, AssemblerErrorKind::InvalidNumericConstant),
        ("mov -40000, reg00", 1, AssemblerErrorKind::InvalidNumericConstant),
        ("mov 0xZZ, reg00", 1, AssemblerErrorKind::InvalidNumericConstant),
        ("mov [0x1G], reg00", 1, AssemblerErrorKind::InvalidAddress),
        ("mov [x], reg00", 1, AssemblerErrorKind::SyntaxError),
        ("mov reg00, 5", 1, AssemblerErrorKind::InvalidDestination),
        ("inc 5", 1, AssemblerErrorKind::InvalidDestination),
        ("mov 5", 1, AssemblerErrorKind::SyntaxError),
        ("nop reg00", 1, AssemblerErrorKind::SyntaxError),
        ("1up:", 1, AssemblerErrorKind::SyntaxError),
        ("a:\nnop\na:", 3, AssemblerErrorKind::DuplicateLabel),
        ("uint16 x\nbyte x", 2, AssemblerErrorKind::DuplicateVariable),
        ("uint16 x, 9lives", 1, AssemblerErrorKind::SyntaxError),
        ("local float f", 1, AssemblerErrorKind::InvalidVariableType),
        ("local byte f\nlocal byte f", 2, AssemblerErrorKind::DuplicateVariable),
        ("#pragma stacksize lots", 1, AssemblerErrorKind::InvalidPragmaArgument),
        ("#pragma datapagesize", 1, AssemblerErrorKind::InvalidPragmaArgument),
        ("uint16 a b c d e f g h i j k l m n o p", 1, AssemblerErrorKind::TooManyTokens),
        ("reg01:", 1, AssemblerErrorKind::SyntaxError),
        ("byte reg7", 1, AssemblerErrorKind::SyntaxError),
        ("#pragma datapagesize 9\nuint16 x", 2, AssemblerErrorKind::InvalidAddress),
        ("uint16 x\n#pragma datapagesize 8", 2, AssemblerErrorKind::InvalidAddress),
        ("push 7\nlocal uint16 x", 2, AssemblerErrorKind::LocalAfterStackOp),
        ("local byte a\npop reg00\nlocal byte b", 3, AssemblerErrorKind::LocalAfterStackOp),
    ];
    for (source, line, kind) in cases {
        let err = error_of(source);
        assert_eq!(err.line_number(), Some(line), "{source}");
        assert_eq!(err.error_kind(), &kind, "{source}");
    }
}

#[test]
fn long_names_are_rejected() {
    let err = error_of("a_very_long_label_name_that_keeps_going:");
    assert_eq!(err.error_kind(), &AssemblerErrorKind::NameTooLong);
}

#[test]
fn errors_are_reported_once() {
    let mut asm = assembler();
    let err = asm.assemble("nop\nbogus").unwrap_err();
    assert_eq!(
        err,
        AssemblerError::WithLine {
            line: 2,
            kind: AssemblerErrorKind::UnknownInstruction
        }
    );
    let reports = &asm.diagnostics().reports;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].line, Some(2));
    assert_eq!(reports[0].message, "line 2: unknown instruction");
}

#[test]
fn prescan_is_idempotent_and_rewinds() -> Result<(), AssemblerError> {
    let source = indoc! {"
        // leading comment
        uint16 x, y
        top:
        mov x, y
        end:
    "};
    let mut reader = Cursor::new(source.as_bytes());
    reader.set_position(19);

    let mut asm = assembler();
    asm.prescan(&mut reader)?;
    assert_eq!(reader.position(), 19);
    let first: Vec<String> = asm.labels().iter().map(|l| l.name().into()).collect();
    let first_vars: Vec<(String, Word)> = asm
        .variables()
        .iter()
        .map(|v| (v.name().into(), v.address()))
        .collect();

    asm.prescan(&mut reader)?;
    assert_eq!(reader.position(), 19);
    let second: Vec<String> = asm.labels().iter().map(|l| l.name().into()).collect();
    let second_vars: Vec<(String, Word)> = asm
        .variables()
        .iter()
        .map(|v| (v.name().into(), v.address()))
        .collect();

    assert_eq!(first, vec!["top".to_string(), "end".to_string()]);
    assert_eq!(first, second);
    assert_eq!(first_vars, second_vars);
    assert_eq!(first_vars, vec![("x".to_string(), 8), ("y".to_string(), 10)]);
    Ok(())
}

#[test]
fn assembles_from_reader_position() -> Result<(), AssemblerError> {
    let mut reader = Cursor::new("bogus\nnop\n".as_bytes());
    reader.set_position(6);
    let image = assembler().assemble_reader(&mut reader)?;
    assert_eq!(code(&image), &[u8::from(Ops::Nop)]);
    Ok(())
}

#[test]
fn comments_and_blank_lines() -> Result<(), AssemblerError> {
    let image = assembler().assemble(indoc! {"
        // header comment

        \tnop // trailing
        // nop
    "})?;
    assert_eq!(code(&image), &[32]);
    Ok(())
}
