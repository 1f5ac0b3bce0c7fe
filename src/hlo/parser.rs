// This module parses the text form of a ComputationModule. The input is read line by line:
// instruction names are resolved to earlier instructions through a hash map, shapes and
// literals are parsed in place, and the instructions are fed to a ComputationBuilder so the
// text form and the builder enforce the same rules. Syntax errors carry the line number and
// builder errors are wrapped unchanged.

//! Parser for the textual module form.
//!
//! Line oriented: a `HloModule <name>` header, an `ENTRY <name> {` opener, one
//! instruction per line and a closing `}`. `;` starts a comment.

use super::{
    ComputationBuilder, ComputationModule, ElementType, InstructionId, Literal, ModuleConfig,
    ModuleError, Opcode, Shape,
};
use hashbrown::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: unknown instruction name `{name}`")]
    UnknownValue { line: usize, name: String },

    #[error("invalid module: {0}")]
    Module(#[from] ModuleError),
}

/// Parse a module in text form using the default [`ModuleConfig`].
pub fn parse_module(text: &str) -> Result<ComputationModule, ParseError> {
    parse_module_with_config(text, ModuleConfig::default())
}

pub fn parse_module_with_config(
    text: &str,
    config: ModuleConfig,
) -> Result<ComputationModule, ParseError> {
    Parser::new(text).parse(config)
}

struct Parser<'a> {
    lines: Vec<(usize, &'a str)>,
    pos: usize,
    values: HashMap<&'a str, InstructionId>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, strip_comment(line).trim()))
            .filter(|(_, line)| !line.is_empty())
            .collect();
        Self {
            lines,
            pos: 0,
            values: HashMap::new(),
        }
    }

    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        let line = self.lines.get(self.pos).copied();
        self.pos += 1;
        line
    }

    fn last_line_number(&self) -> usize {
        self.lines.last().map(|(n, _)| *n).unwrap_or(1)
    }

    fn parse(mut self, config: ModuleConfig) -> Result<ComputationModule, ParseError> {
        let (line, header) = self.next_line().ok_or_else(|| ParseError::Syntax {
            line: 1,
            message: "expected `HloModule <name>`".to_string(),
        })?;
        let module_name = header
            .strip_prefix("HloModule")
            .map(str::trim)
            .filter(|name| !name.is_empty() && !name.contains(char::is_whitespace))
            .ok_or_else(|| syntax(line, "expected `HloModule <name>`"))?;

        let (line, entry) = self
            .next_line()
            .ok_or_else(|| syntax(self.last_line_number(), "expected `ENTRY <name> {`"))?;
        let computation_name = entry
            .strip_prefix("ENTRY")
            .and_then(|rest| rest.trim().strip_suffix('{'))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| syntax(line, "expected `ENTRY <name> {`"))?;

        let mut builder = ComputationBuilder::new(computation_name);
        let mut closed = false;
        while let Some((line, text)) = self.next_line() {
            if text == "}" {
                closed = true;
                break;
            }
            self.parse_instruction(&mut builder, line, text)?;
        }
        if !closed {
            return Err(syntax(self.last_line_number(), "missing closing `}`"));
        }
        if let Some((line, _)) = self.next_line() {
            return Err(syntax(line, "unexpected text after computation"));
        }

        let computation = builder.build()?;
        Ok(ComputationModule::new(module_name, config, computation))
    }

    fn parse_instruction(
        &mut self,
        builder: &mut ComputationBuilder,
        line: usize,
        text: &'a str,
    ) -> Result<(), ParseError> {
        let (is_root, text) = match text.strip_prefix("ROOT ") {
            Some(rest) => (true, rest.trim_start()),
            None => (false, text),
        };

        let (name, rhs) = text
            .split_once('=')
            .ok_or_else(|| syntax(line, "expected `<name> = <shape> <op>(...)`"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(syntax(line, "missing instruction name"));
        }
        if self.values.contains_key(name) {
            return Err(syntax(line, &format!("instruction `{name}` defined twice")));
        }

        let rhs = rhs.trim();
        let (shape_text, call) = rhs
            .split_once(' ')
            .ok_or_else(|| syntax(line, "expected shape followed by operation"))?;
        let shape = parse_shape(shape_text).ok_or_else(|| {
            syntax(line, &format!("invalid shape `{shape_text}`"))
        })?;

        let call = call.trim();
        let open = call
            .find('(')
            .ok_or_else(|| syntax(line, "expected `(` after operation name"))?;
        let args = call[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| syntax(line, "expected `)` at end of line"))?
            .trim();
        let op_name = call[..open].trim();

        let id = match op_name {
            "parameter" => {
                let number = args
                    .parse::<u32>()
                    .map_err(|_| syntax(line, &format!("invalid parameter number `{args}`")))?;
                builder.add_instruction(name, Opcode::Parameter(number), shape, &[])
            }
            "constant" => {
                let literal = parse_literal(args, shape.element_type)
                    .ok_or_else(|| syntax(line, &format!("invalid constant `{args}`")))?;
                builder.add_instruction(name, Opcode::Constant(literal), shape, &[])
            }
            other => {
                let opcode = Opcode::from_name(other)
                    .ok_or_else(|| syntax(line, &format!("unknown operation `{other}`")))?;
                let mut operands = Vec::new();
                for operand in args.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let id = self.values.get(operand).copied().ok_or_else(|| {
                        ParseError::UnknownValue {
                            line,
                            name: operand.to_string(),
                        }
                    })?;
                    operands.push(id);
                }
                builder.add_instruction(name, opcode, shape, &operands)
            }
        };

        self.values.insert(name, id);
        if is_root {
            builder.set_root(id);
        }
        Ok(())
    }
}

fn syntax(line: usize, message: &str) -> ParseError {
    ParseError::Syntax {
        line,
        message: message.to_string(),
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_shape(text: &str) -> Option<Shape> {
    let open = text.find('[')?;
    let element_type = match &text[..open] {
        "s32" => ElementType::S32,
        "f32" => ElementType::F32,
        _ => return None,
    };
    let dims_text = text[open + 1..].strip_suffix(']')?;
    let mut dims = Vec::new();
    for dim in dims_text.split(',').map(str::trim).filter(|d| !d.is_empty()) {
        dims.push(dim.parse().ok()?);
    }
    Some(Shape::new(element_type, dims))
}

fn parse_literal(text: &str, element_type: ElementType) -> Option<Literal> {
    match element_type {
        ElementType::S32 => text.parse().ok().map(Literal::S32),
        ElementType::F32 => text.parse().ok().map(Literal::F32),
    }
}
