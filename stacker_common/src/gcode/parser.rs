//! Command-line parser.
//!
//! A line is split on whitespace and every token is classified by its
//! first character:
//!
//! | Token | Meaning |
//! |-------|---------|
//! | attribute letter + value (`S65`) | parameter of the preceding command |
//! | axis letter + value (`X5`) | movement payload of the preceding command |
//! | full identifier (`M105`) | command |
//!
//! Within one command, attributes and axes never mix: an attribute after an
//! axis token, or an axis after an attribute token, is rejected.

use super::error::ParseError;
use super::table::{CommandSpec, CommandTable, ValueType, is_attribute_letter, is_axis_letter};
use super::types::{AttributeValue, ParsedCommand};

/// Parse one line against the standard command table.
pub fn parse(line: &str) -> Result<ParsedCommand, ParseError> {
    parse_with(CommandTable::standard(), line)
}

/// Parse one raw byte line; it must be valid UTF-8.
pub fn parse_bytes(line: &[u8]) -> Result<ParsedCommand, ParseError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| ParseError::Parse(format!("Line is not valid text: {e}")))?;
    parse(text)
}

/// Token classes recognised by the parser.
enum Token<'a> {
    Command(&'a str),
    Attribute(char, &'a str),
    Axis(char, &'a str),
}

/// Last entry seen while walking the line.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Last {
    Command,
    Attribute,
    Axis,
}

/// Parse one line against a custom command table.
pub fn parse_with(table: &CommandTable, line: &str) -> Result<ParsedCommand, ParseError> {
    let mut parsed = ParsedCommand::new();
    let mut current: Option<&CommandSpec> = None;
    let mut last = Last::Command;
    let mut seen_token = false;

    for raw in line.split_whitespace() {
        seen_token = true;
        match classify(table, raw)? {
            Token::Command(id) => {
                let spec = table
                    .spec(id)
                    .ok_or_else(|| ParseError::Parse(format!("Unknown command {id}")))?;
                parsed.entry_mut(id);
                current = Some(spec);
                last = Last::Command;
            }
            Token::Attribute(letter, data) => {
                let spec = current.ok_or_else(|| {
                    ParseError::Attribute(format!(
                        "Entry {raw} is an attribute but is the first entry in the command"
                    ))
                })?;
                if data.is_empty() {
                    return Err(ParseError::Parse(format!("Entry {raw} has no value")));
                }
                if last == Last::Axis {
                    return Err(ParseError::Attribute(format!(
                        "Movement commands ({}) are not allowed to have attributes: {raw}",
                        spec.id
                    )));
                }
                let types = spec.attribute_types(letter).ok_or_else(|| {
                    ParseError::Attribute(format!(
                        "The attribute {raw} is not allowed for command {}",
                        spec.id
                    ))
                })?;
                let value = coerce_attribute(raw, data, types)?;
                parsed.entry_mut(spec.id).insert(letter, value);
                last = Last::Attribute;
            }
            Token::Axis(axis, data) => {
                if data.is_empty() {
                    return Err(ParseError::Parse(format!("Entry {raw} has no value")));
                }
                let spec = current.ok_or_else(|| {
                    ParseError::Attribute(format!(
                        "Movement entry {raw} does not follow a command"
                    ))
                })?;
                if last == Last::Attribute {
                    return Err(ParseError::Attribute(format!(
                        "Command {} cannot mix attributes and movement entries: {raw}",
                        spec.id
                    )));
                }
                if spec.axes.is_none() {
                    return Err(ParseError::Attribute(format!(
                        "Command {} is not allowed to have movement entries",
                        spec.id
                    )));
                }
                if !spec.accepts_axis(axis) {
                    return Err(ParseError::Attribute(format!(
                        "Movement entry {raw} is not allowed for command {}",
                        spec.id
                    )));
                }
                let value = parse_movement(raw, data)?;
                let entry = parsed.entry_mut(spec.id);
                if entry.contains_key(&axis) {
                    return Err(ParseError::Attribute(format!(
                        "Movement entry {axis} already exists for command {}",
                        spec.id
                    )));
                }
                entry.insert(axis, value);
                last = Last::Axis;
            }
        }
    }

    if !seen_token {
        return Err(ParseError::Parse("Line is empty".to_string()));
    }
    Ok(parsed)
}

fn classify<'a>(table: &CommandTable, token: &'a str) -> Result<Token<'a>, ParseError> {
    let mut chars = token.chars();
    let Some(first) = chars.next() else {
        return Err(ParseError::Parse("Empty token".to_string()));
    };
    let rest = chars.as_str();

    if is_attribute_letter(first) {
        return Ok(Token::Attribute(first, rest));
    }
    if is_axis_letter(first) {
        return Ok(Token::Axis(first, rest));
    }

    if table.contains(token) {
        Ok(Token::Command(token))
    } else {
        Err(ParseError::Parse(format!(
            "Entry {token} is not a valid command or attribute"
        )))
    }
}

/// Movement payloads are integers unless a decimal point is present.
fn parse_movement(raw: &str, data: &str) -> Result<AttributeValue, ParseError> {
    let invalid = || ParseError::Parse(format!("Movement entry {raw} is not a valid value"));
    if data.contains('.') {
        let v: f64 = data.parse().map_err(|_| invalid())?;
        if !v.is_finite() {
            return Err(invalid());
        }
        Ok(AttributeValue::Float(v))
    } else {
        data.parse::<i64>()
            .map(AttributeValue::Int)
            .map_err(|_| invalid())
    }
}

fn coerce_attribute(
    raw: &str,
    data: &str,
    types: &[ValueType],
) -> Result<AttributeValue, ParseError> {
    let unsupported = || {
        ParseError::UnsupportedType(format!("Value of {raw} cannot be read as any of {types:?}"))
    };
    let allows = |t: ValueType| types.contains(&t);

    if allows(ValueType::Int) || allows(ValueType::Float) {
        if !data.contains('.') && allows(ValueType::Int) {
            if let Ok(v) = data.parse::<i64>() {
                return Ok(AttributeValue::Int(v));
            }
        }
        if allows(ValueType::Float) {
            if let Ok(v) = data.parse::<f64>() {
                if v.is_finite() {
                    return Ok(AttributeValue::Float(v));
                }
            }
        }
        return Err(unsupported());
    }

    if allows(ValueType::Bool) {
        return match data.to_ascii_lowercase().as_str() {
            "1" | "true" => Ok(AttributeValue::Bool(true)),
            "0" | "false" => Ok(AttributeValue::Bool(false)),
            _ => Err(unsupported()),
        };
    }

    if allows(ValueType::Bytes) {
        return Ok(AttributeValue::Bytes(data.as_bytes().to_vec()));
    }

    Err(unsupported())
}
