use tracing::trace;

use super::instruction::build_instruction;
use super::layout::{DataKind, Labels, Layout};
use super::CompilationError;
use crate::constants::{Address, Word};
use crate::parser::literal::{parse_float, parse_integer};
use crate::parser::{DataArgument, DataItem, LineContent, Program};
use crate::runtime::{Exception, Memory};

/// Resolve an integer data item, which can also be a label
fn integer_item(
    program: &Program<'_>,
    labels: &Labels<'_>,
    directive: &str,
    argument: &DataArgument<'_>,
    range: std::ops::RangeInclusive<i64>,
) -> Result<i64, CompilationError> {
    let invalid = || CompilationError::InvalidData {
        directive: directive.to_owned(),
        span: program.location(argument.text).into(),
    };

    let DataItem::Token(token) = argument.item else {
        return Err(invalid());
    };

    let value = match parse_integer(token) {
        Ok(("", value)) => value,
        _ => {
            let address = labels.get(token).ok_or_else(|| CompilationError::UnknownLabel {
                label: token.to_owned(),
                span: program.location(argument.text).into(),
            })?;
            i64::from(*address)
        }
    };

    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn float_item(
    program: &Program<'_>,
    directive: &str,
    argument: &DataArgument<'_>,
) -> Result<f64, CompilationError> {
    match argument.item {
        DataItem::Token(token) => parse_float(token),
        DataItem::String(_) => None,
    }
    .ok_or_else(|| CompilationError::InvalidData {
        directive: directive.to_owned(),
        span: program.location(argument.text).into(),
    })
}

/// Write the items of a data directive, starting at `address`
fn fill_data(
    program: &Program<'_>,
    labels: &Labels<'_>,
    memory: &mut Memory,
    directive: &str,
    arguments: &[DataArgument<'_>],
    mut address: Address,
) -> Result<(), CompilationError> {
    let Some(kind) = DataKind::from_directive(directive) else {
        return Ok(());
    };

    for argument in arguments {
        let store_error = |inner: Exception| CompilationError::Memory {
            inner,
            span: program.location(argument.text).into(),
        };

        match kind {
            // Reserved bytes are left untouched
            DataKind::Space | DataKind::Align => return Ok(()),

            DataKind::Word => {
                let value = integer_item(
                    program,
                    labels,
                    directive,
                    argument,
                    i64::from(Word::MIN)..=i64::from(u32::MAX),
                )?;
                memory.set_word(address, value as Word).map_err(store_error)?;
            }

            DataKind::Half => {
                let value = integer_item(program, labels, directive, argument, -0x8000..=0xFFFF)?;
                memory.set_half(address, value as Word).map_err(store_error)?;
            }

            DataKind::Byte => {
                let value = integer_item(program, labels, directive, argument, -0x80..=0xFF)?;
                memory.set_byte(address, value as Word).map_err(store_error)?;
            }

            DataKind::Float => {
                let value = float_item(program, directive, argument)?;
                memory.set_float(address, value as f32).map_err(store_error)?;
            }

            DataKind::Double => {
                let value = float_item(program, directive, argument)?;
                memory.set_double(address, value).map_err(store_error)?;
            }

            DataKind::Ascii | DataKind::Asciiz => {
                let DataItem::String(ref string) = argument.item else {
                    return Err(CompilationError::InvalidData {
                        directive: directive.to_owned(),
                        span: program.location(argument.text).into(),
                    });
                };

                let end = if kind == DataKind::Asciiz {
                    memory.add_asciiz(string.as_bytes(), address)
                } else {
                    memory.add_ascii(string.as_bytes(), address)
                }
                .map_err(store_error)?;

                address = end;
                continue;
            }
        }

        address += kind.item_size();
    }

    Ok(())
}

/// Store the instructions and the data of a laid out program
pub(crate) fn fill_memory(
    program: &Program<'_>,
    layout: &Layout<'_>,
    memory: &mut Memory,
) -> Result<(), CompilationError> {
    for placement in &layout.placements {
        match &placement.line.content {
            Some(LineContent::Instruction { opcode, arguments }) => {
                let instruction = build_instruction(program, &layout.labels, opcode, arguments)?;
                trace!(address = placement.address, %instruction, "Storing instruction");
                let address = memory.push_instruction(instruction, Some(placement.line.number));
                debug_assert_eq!(address, placement.address);
            }

            Some(LineContent::Directive {
                directive,
                arguments,
            }) => {
                fill_data(
                    program,
                    &layout.labels,
                    memory,
                    directive,
                    arguments,
                    placement.address,
                )?;
            }

            None => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Layout as MemoryLayout;
    use crate::constants::DATA_MIN;
    use crate::parser::parse;
    use crate::runtime::{Instruction, Reg};

    fn fill(source: &str) -> Result<Memory, CompilationError> {
        let program = parse(source).unwrap();
        let layout = crate::compiler::layout::layout_program(&program, &MemoryLayout::default())?;
        let mut memory = Memory::default();
        fill_memory(&program, &layout, &mut memory)?;
        Ok(memory)
    }

    #[test]
    fn fill_data_test() {
        let memory = fill(indoc! {r#"
                .data
            bytes: .byte -1, 0x7F, 'a'
            words: .word 0xFFFFFFFF, -2, bytes
            halves: .half 0xFFFF, 3
            text: .asciiz "ok", "!"
            single: .float 1.5
            double: .double -420.42
        "#})
        .unwrap();

        assert_eq!(memory.get_byte(DATA_MIN, true).unwrap(), -1);
        assert_eq!(memory.get_byte(DATA_MIN + 1, true).unwrap(), 0x7F);
        assert_eq!(memory.get_byte(DATA_MIN + 2, true).unwrap(), 97);
        assert_eq!(memory.get_word(DATA_MIN + 4).unwrap(), -1);
        assert_eq!(memory.get_word(DATA_MIN + 8).unwrap(), -2);
        assert_eq!(memory.get_word(DATA_MIN + 12).unwrap(), DATA_MIN as Word);
        assert_eq!(memory.get_half(DATA_MIN + 16, true).unwrap(), -1);
        assert_eq!(memory.get_half(DATA_MIN + 18, true).unwrap(), 3);
        assert_eq!(memory.get_string(DATA_MIN + 20).unwrap(), b"ok");
        assert_eq!(memory.get_string(DATA_MIN + 23).unwrap(), b"!");
        assert_eq!(memory.get_float(DATA_MIN + 28).unwrap(), 1.5);
        assert_eq!(memory.get_double(DATA_MIN + 32).unwrap(), -420.42);
    }

    #[test]
    fn fill_text_test() {
        let memory = fill("main: addi $t0, $zero, 1\n    syscall\n").unwrap();
        let text: Vec<_> = memory.text().map(|(_, i)| i.clone()).collect();
        assert_eq!(
            text,
            vec![
                Instruction::Addi(Reg::T0, Reg::Zero, 1),
                Instruction::Syscall
            ]
        );
    }

    #[test]
    fn invalid_data_test() {
        assert!(matches!(
            fill(".data\n.byte 256\n").unwrap_err(),
            CompilationError::InvalidData { .. }
        ));
        assert!(matches!(
            fill(".data\n.word 0x100000000\n").unwrap_err(),
            CompilationError::InvalidData { .. }
        ));
        assert!(matches!(
            fill(".data\n.float one\n").unwrap_err(),
            CompilationError::InvalidData { .. }
        ));
        assert!(matches!(
            fill(".data\n.word nowhere\n").unwrap_err(),
            CompilationError::UnknownLabel { ref label, .. } if label == "nowhere"
        ));
    }
}
