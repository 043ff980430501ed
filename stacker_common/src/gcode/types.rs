//! Command language value types.
//!
//! - `AttributeValue` - Typed payload of one attribute or axis token
//! - `AttributeMap` - Letter → value entries of one command
//! - `ParsedCommand` - Command identifier → `AttributeMap` for one line
//! - `CommandKind` - Dispatch class of a command identifier

use crate::consts::PRIORITY_COMMANDS;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Typed value attached to an attribute or axis letter.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    /// Numeric view of the value; `None` for booleans and byte strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::Bytes(_) => None,
        }
    }

    /// Integer view; floats are accepted only when they carry no fraction.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// JSON representation used inside result payloads.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(v) => Value::from(*v),
            Self::Float(v) => Value::from(*v),
            Self::Bool(v) => Value::from(*v),
            Self::Bytes(v) => Value::from(String::from_utf8_lossy(v).into_owned()),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(v)),
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Letter → value entries of a single command.
///
/// Movement commands hold axis letters, machine commands hold attribute
/// letters, bare commands hold nothing.
pub type AttributeMap = BTreeMap<char, AttributeValue>;

/// Dispatch class of a command identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `M112` / `M999`, executed alone.
    Priority,
    /// Identifiers beginning with `M`.
    Machine,
    /// Identifiers beginning with `G`.
    Movement,
    /// Anything else.
    Unknown,
}

impl CommandKind {
    /// Classify a command identifier.
    pub fn of(id: &str) -> Self {
        if PRIORITY_COMMANDS.contains(&id) {
            Self::Priority
        } else if id.starts_with('M') {
            Self::Machine
        } else if id.starts_with('G') {
            Self::Movement
        } else {
            Self::Unknown
        }
    }
}

/// One parsed command line: command identifier → attribute map.
///
/// Identifiers are unique. Entries keep first-seen order for logging but
/// equality ignores ordering.
#[derive(Debug, Clone, Default)]
pub struct ParsedCommand {
    entries: Vec<(String, AttributeMap)>,
}

impl ParsedCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by tests and callers that bypass the parser.
    pub fn with(mut self, id: &str, attributes: AttributeMap) -> Self {
        *self.entry_mut(id) = attributes;
        self
    }

    /// Attribute map of `id`, created empty if absent.
    pub fn entry_mut(&mut self, id: &str) -> &mut AttributeMap {
        let pos = match self.entries.iter().position(|(k, _)| k == id) {
            Some(pos) => pos,
            None => {
                self.entries.push((id.to_string(), AttributeMap::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[pos].1
    }

    pub fn get(&self, id: &str) -> Option<&AttributeMap> {
        self.entries.iter().find(|(k, _)| k == id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(identifier, attributes)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeMap)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Command identifiers in first-seen order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// First priority command on the line, if any.
    pub fn priority(&self) -> Option<&str> {
        self.ids().find(|id| CommandKind::of(id) == CommandKind::Priority)
    }

    /// Move every entry of `other` into `self`, later entries winning.
    pub fn merge(&mut self, other: ParsedCommand) {
        for (id, attributes) in other.entries {
            self.entry_mut(&id).extend(attributes);
        }
    }

    /// JSON object `{id: {letter: value}}`.
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        for (id, attributes) in self.iter() {
            root.insert(id.to_string(), attributes_to_json(attributes));
        }
        Value::Object(root)
    }
}

impl PartialEq for ParsedCommand {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(id, v)| other.get(id) == Some(v))
    }
}

impl fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// JSON object `{letter: value}` for one attribute map.
pub fn attributes_to_json(attributes: &AttributeMap) -> Value {
    let mut map = Map::new();
    for (letter, value) in attributes {
        map.insert(letter.to_string(), value.to_json());
    }
    Value::Object(map)
}
