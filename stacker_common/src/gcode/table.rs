//! Static command table.
//!
//! Every command the engine accepts is listed here together with the axis
//! letters it takes as movement payload and the attribute letters (and
//! their permitted value types) it takes as parameters. Adding a command to
//! the language means adding one row.

use crate::consts::{ATTRIBUTE_LETTERS, AXIS_LETTERS, LINEAR_AXES, ROTATIONAL_AXES};
use std::sync::OnceLock;

/// Value type an attribute payload may be coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Float,
    Bool,
    Bytes,
}

/// Grammar rules for one command identifier.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Command identifier, e.g. `"M140"`.
    pub id: &'static str,
    /// Axis letters accepted as movement payload; `None` forbids axes.
    pub axes: Option<&'static [char]>,
    /// Attribute letter → permitted value types.
    pub attributes: &'static [(char, &'static [ValueType])],
}

impl CommandSpec {
    const fn bare(id: &'static str) -> Self {
        Self {
            id,
            axes: None,
            attributes: &[],
        }
    }

    const fn movement(id: &'static str, axes: &'static [char]) -> Self {
        Self {
            id,
            axes: Some(axes),
            attributes: &[],
        }
    }

    const fn machine(id: &'static str, attributes: &'static [(char, &'static [ValueType])]) -> Self {
        Self {
            id,
            axes: None,
            attributes,
        }
    }

    /// Permitted value types for `letter`, if the attribute is allowed.
    pub fn attribute_types(&self, letter: char) -> Option<&'static [ValueType]> {
        self.attributes
            .iter()
            .find(|(l, _)| *l == letter)
            .map(|(_, types)| *types)
    }

    /// Whether `axis` is accepted as movement payload.
    pub fn accepts_axis(&self, axis: char) -> bool {
        self.axes.is_some_and(|axes| axes.contains(&axis))
    }
}

const NUMERIC: &[ValueType] = &[ValueType::Int, ValueType::Float];
const INTEGER: &[ValueType] = &[ValueType::Int];
const BOOLEAN: &[ValueType] = &[ValueType::Bool];

const STANDARD_COMMANDS: &[CommandSpec] = &[
    CommandSpec::movement("G0", &LINEAR_AXES),
    CommandSpec::movement("G1", &ROTATIONAL_AXES),
    CommandSpec::bare("G28"),
    CommandSpec::bare("G90"),
    CommandSpec::bare("G91"),
    CommandSpec::bare("M0"),
    CommandSpec::movement("M92", &AXIS_LETTERS),
    CommandSpec::bare("M105"),
    CommandSpec::bare("M112"),
    CommandSpec::machine("M113", &[('S', NUMERIC)]),
    CommandSpec::bare("M114"),
    CommandSpec::machine("M140", &[('I', INTEGER), ('S', NUMERIC)]),
    CommandSpec::machine("M154", &[('S', NUMERIC)]),
    CommandSpec::machine("M155", &[('S', NUMERIC)]),
    CommandSpec::movement("M811", &AXIS_LETTERS),
    CommandSpec::movement("M812", &AXIS_LETTERS),
    CommandSpec::movement("M813", &AXIS_LETTERS),
    CommandSpec::machine("M999", &[('S', BOOLEAN)]),
];

/// Set of accepted commands and their grammar rules.
#[derive(Debug, Clone)]
pub struct CommandTable {
    commands: Vec<CommandSpec>,
}

impl CommandTable {
    /// The command set understood by the stacking backend.
    pub fn standard() -> &'static CommandTable {
        static TABLE: OnceLock<CommandTable> = OnceLock::new();
        TABLE.get_or_init(|| CommandTable::from_specs(STANDARD_COMMANDS.to_vec()))
    }

    /// Build a custom table.
    pub fn from_specs(commands: Vec<CommandSpec>) -> Self {
        Self { commands }
    }

    /// Rules for `id`, if it is a known command.
    pub fn spec(&self, id: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.spec(id).is_some()
    }

    /// Known command identifiers in table order.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.iter().map(|c| c.id)
    }
}

/// `true` if `c` introduces an attribute token.
pub fn is_attribute_letter(c: char) -> bool {
    ATTRIBUTE_LETTERS.contains(&c)
}

/// `true` if `c` introduces an axis token.
pub fn is_axis_letter(c: char) -> bool {
    AXIS_LETTERS.contains(&c)
}

pub fn is_linear_axis(c: char) -> bool {
    LINEAR_AXES.contains(&c)
}

pub fn is_rotational_axis(c: char) -> bool {
    ROTATIONAL_AXES.contains(&c)
}
