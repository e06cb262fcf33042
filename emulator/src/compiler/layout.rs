use std::collections::HashMap;

use tracing::trace;

use super::CompilationError;
use crate::config::Layout as MemoryLayout;
use crate::constants::{Address, INSTRUCTION_SIZE};
use crate::parser::literal::parse_integer;
use crate::parser::{DataArgument, DataItem, Line, LineContent, Program};

pub(crate) type Labels<'a> = HashMap<&'a str, Address>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Text,
    Data,
}

/// Data directives, with the size and alignment of their items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataKind {
    Word,
    Half,
    Byte,
    Float,
    Double,
    Ascii,
    Asciiz,
    Space,
    Align,
}

impl DataKind {
    pub(crate) fn from_directive(directive: &str) -> Option<Self> {
        let kind = match directive {
            "word" => Self::Word,
            "half" => Self::Half,
            "byte" => Self::Byte,
            "float" => Self::Float,
            "double" => Self::Double,
            "ascii" => Self::Ascii,
            "asciiz" => Self::Asciiz,
            "space" => Self::Space,
            "align" => Self::Align,
            _ => return None,
        };
        Some(kind)
    }

    /// Size of one numeric item, which is also its alignment
    pub(crate) fn item_size(self) -> Address {
        match self {
            Self::Word | Self::Float => 4,
            Self::Half => 2,
            Self::Double => 8,
            Self::Byte | Self::Ascii | Self::Asciiz | Self::Space | Self::Align => 1,
        }
    }
}

/// An instruction or a data directive with its address
#[derive(Debug)]
pub(crate) struct Placement<'a> {
    pub address: Address,
    pub line: &'a Line<'a>,
}

#[derive(Debug, Default)]
pub(crate) struct Layout<'a> {
    pub labels: Labels<'a>,
    pub placements: Vec<Placement<'a>>,
}

fn align(address: Address, alignment: Address) -> Option<Address> {
    address.checked_next_multiple_of(alignment)
}

/// Parse the single integer argument of `.space` and `.align`
fn single_integer(
    program: &Program<'_>,
    directive: &str,
    arguments: &[DataArgument<'_>],
) -> Result<i64, CompilationError> {
    let invalid = |text: &str| CompilationError::InvalidData {
        directive: directive.to_owned(),
        span: program.location(text).into(),
    };

    match arguments {
        [DataArgument {
            text,
            item: DataItem::Token(token),
        }] => match parse_integer(token) {
            Ok(("", value)) => Ok(value),
            _ => Err(invalid(text)),
        },
        [argument, ..] => Err(invalid(argument.text)),
        [] => Err(invalid(directive)),
    }
}

/// Number of bytes used by a data directive
fn data_size(
    program: &Program<'_>,
    kind: DataKind,
    directive: &str,
    arguments: &[DataArgument<'_>],
) -> Result<Address, CompilationError> {
    let invalid = |text: &str| CompilationError::InvalidData {
        directive: directive.to_owned(),
        span: program.location(text).into(),
    };

    let Some(first) = arguments.first() else {
        return Err(invalid(directive));
    };

    let size = match kind {
        DataKind::Align => 0,

        DataKind::Space => {
            let size = single_integer(program, directive, arguments)?;
            Address::try_from(size).map_err(|_| invalid(first.text))?
        }

        DataKind::Ascii | DataKind::Asciiz => {
            let terminator = usize::from(kind == DataKind::Asciiz);
            let mut size: usize = 0;
            for argument in arguments {
                let DataItem::String(ref string) = argument.item else {
                    return Err(invalid(argument.text));
                };
                size += string.len() + terminator;
            }
            Address::try_from(size).map_err(|_| invalid(first.text))?
        }

        DataKind::Word | DataKind::Half | DataKind::Byte | DataKind::Float | DataKind::Double => {
            Address::try_from(arguments.len())
                .ok()
                .and_then(|count| count.checked_mul(kind.item_size()))
                .ok_or_else(|| invalid(first.text))?
        }
    };

    Ok(size)
}

impl<'a> Layout<'a> {
    fn insert_labels(
        &mut self,
        program: &Program<'a>,
        labels: &mut Vec<&'a str>,
        address: Address,
    ) -> Result<(), CompilationError> {
        for label in labels.drain(..) {
            if self.labels.contains_key(label) {
                return Err(CompilationError::DuplicateLabel {
                    label: label.to_owned(),
                    span: program.location(label).into(),
                });
            }

            trace!(label, address, "Placing label");
            self.labels.insert(label, address);
        }
        Ok(())
    }
}

/// Give an address to every label, instruction and data directive
///
/// Instructions are placed one after the other from the start of the text
/// segment, and data from the start of the data segment, each item aligned on
/// its natural size. Labels point to the next item following them.
pub(crate) fn layout_program<'a>(
    program: &'a Program<'a>,
    memory: &MemoryLayout,
) -> Result<Layout<'a>, CompilationError> {
    let mut layout = Layout::default();
    let mut segment = Segment::Text;
    let mut text = memory.text_start;
    let mut data = memory.data_min;
    let mut pending: Vec<&str> = Vec::new();

    for line in &program.lines {
        pending.extend(line.symbols.iter().copied());

        let Some(content) = &line.content else {
            continue;
        };

        match content {
            LineContent::Instruction { opcode, .. } => {
                if segment != Segment::Text {
                    return Err(CompilationError::MisplacedInstruction {
                        span: program.location(opcode).into(),
                    });
                }

                layout.insert_labels(program, &mut pending, text)?;
                layout.placements.push(Placement {
                    address: text,
                    line,
                });
                text += INSTRUCTION_SIZE;
            }

            LineContent::Directive {
                directive,
                arguments,
            } => match *directive {
                "text" => segment = Segment::Text,
                "data" => segment = Segment::Data,

                // Symbol visibility means nothing in a single listing
                "globl" | "global" | "extern" => {}

                _ => {
                    let kind = DataKind::from_directive(directive).ok_or_else(|| {
                        CompilationError::UnknownDirective {
                            directive: (*directive).to_owned(),
                            span: program.location(directive).into(),
                        }
                    })?;

                    if segment != Segment::Data {
                        return Err(CompilationError::MisplacedData {
                            span: program.location(directive).into(),
                        });
                    }

                    let invalid = || CompilationError::InvalidData {
                        directive: (*directive).to_owned(),
                        span: program.location(directive).into(),
                    };

                    let alignment = if kind == DataKind::Align {
                        let power = single_integer(program, directive, arguments)?;
                        if !(0..=3).contains(&power) {
                            return Err(invalid());
                        }
                        1 << power
                    } else {
                        kind.item_size()
                    };

                    data = align(data, alignment).ok_or_else(invalid)?;
                    layout.insert_labels(program, &mut pending, data)?;
                    layout.placements.push(Placement {
                        address: data,
                        line,
                    });

                    let size = data_size(program, kind, directive, arguments)?;
                    data = data.checked_add(size).ok_or_else(invalid)?;
                }
            },
        }
    }

    // Trailing labels point right after the last item of their segment
    let end = match segment {
        Segment::Text => text,
        Segment::Data => data,
    };
    layout.insert_labels(program, &mut pending, end)?;

    Ok(layout)
}
