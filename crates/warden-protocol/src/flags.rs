// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mapping between messages and flat command-line flags.
//!
//! A message becomes a list of `key -> value` pairs where nested fields are
//! joined by a delimiter and repeated fields carry an index:
//!
//! ```text
//! --handle abc --bind_mounts[0].src_path /a --bind_mounts[0].mode RO
//! ```
//!
//! Messages are walked through their `serde_json::Value` form, guided by the
//! static [`MessageSchema`] of each message type.

use std::fmt;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::schema::{Described, FieldSchema, Kind, Label, MessageSchema};

/// Delimiter joining nested field names.
pub const DEFAULT_DELIMITER: &str = ".";

/// Errors raised while mapping between flags and messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlagError {
    #[error("field `{0}` is invalid")]
    FieldInvalid(String),

    #[error("flag `{0}` is malformed")]
    FlagMalformed(String),

    #[error("flag `{0}` is incomplete")]
    FlagIncomplete(String),

    #[error("field `{field}` is not indexed correctly (got {index:?}, {length} present)")]
    NotIndexedCorrectly {
        field: String,
        index: Option<usize>,
        length: usize,
    },

    #[error("value `{value}` of `{field}` is not a valid {expected}")]
    TypeConversion {
        field: String,
        value: String,
        expected: &'static str,
    },

    #[error("enum {enum_name} is ambiguous: {names:?} all map to {value}")]
    AmbiguousEnum {
        enum_name: &'static str,
        value: i32,
        names: Vec<&'static str>,
    },

    #[error("required field `{0}` is missing")]
    MissingRequired(String),

    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("message mapping failed: {0}")]
    Mapping(String),
}

/// Outcome of parsing flags: either a message or a request for help.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<M> {
    Message(M),
    Help(Help),
}

impl<M> Parsed<M> {
    pub fn map<N>(self, f: impl FnOnce(M) -> N) -> Parsed<N> {
        match self {
            Parsed::Message(m) => Parsed::Message(f(m)),
            Parsed::Help(h) => Parsed::Help(h),
        }
    }
}

// ========== Serialization ==========

/// Flatten a message into `(flag name, value)` pairs, in schema order.
pub fn serialize<M: Described>(
    message: &M,
    delimiter: &str,
) -> Result<Vec<(String, String)>, FlagError> {
    let value = serde_json::to_value(message).map_err(|e| FlagError::Mapping(e.to_string()))?;
    let mut out = Vec::new();
    if let Value::Object(map) = value {
        flatten(M::schema(), &map, "", delimiter, &mut out)?;
    }
    Ok(out)
}

fn flatten(
    schema: &'static MessageSchema,
    map: &Map<String, Value>,
    prefix: &str,
    delimiter: &str,
    out: &mut Vec<(String, String)>,
) -> Result<(), FlagError> {
    for field in schema.fields {
        let value = match map.get(field.name) {
            None | Some(Value::Null) => continue,
            Some(v) => v,
        };
        let key = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}{delimiter}{}", field.name)
        };

        if field.label == Label::Repeated {
            let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
            for (i, item) in items.iter().enumerate() {
                emit(field, item, &format!("{key}[{i}]"), delimiter, out)?;
            }
        } else {
            emit(field, value, &key, delimiter, out)?;
        }
    }
    Ok(())
}

fn emit(
    field: &'static FieldSchema,
    value: &Value,
    key: &str,
    delimiter: &str,
    out: &mut Vec<(String, String)>,
) -> Result<(), FlagError> {
    let text = match (field.kind, value) {
        (Kind::Message(schema), Value::Object(map)) => {
            return flatten(schema, map, key, delimiter, out);
        }
        (Kind::Enum(e), Value::Number(n)) => {
            let raw = n.as_i64().unwrap_or_default() as i32;
            match e.name_of(raw) {
                Ok(name) => name.to_string(),
                Err(names) if names.len() > 1 => {
                    return Err(FlagError::AmbiguousEnum {
                        enum_name: e.name,
                        value: raw,
                        names,
                    });
                }
                Err(_) => raw.to_string(),
            }
        }
        (Kind::Bytes, Value::Array(items)) => {
            let bytes: Vec<u8> = items
                .iter()
                .filter_map(|b| b.as_u64().map(|b| b as u8))
                .collect();
            String::from_utf8_lossy(&bytes).into_owned()
        }
        (_, Value::String(s)) => s.clone(),
        (_, Value::Bool(b)) => b.to_string(),
        (_, Value::Number(n)) => n.to_string(),
        (_, other) => {
            return Err(FlagError::Mapping(format!(
                "unexpected value {other} for `{key}`"
            )));
        }
    };
    out.push((key.to_string(), text));
    Ok(())
}

// ========== Deserialization ==========

fn is_help(token: &str) -> bool {
    token == "--help" || token == "help"
}

/// One step of a flag path, e.g. `bind_mounts[0]`.
#[derive(Debug)]
struct Segment<'a> {
    name: &'a str,
    index: Option<usize>,
}

fn parse_path<'a>(flag: &'a str, path: &'a str, delimiter: &str) -> Result<Vec<Segment<'a>>, FlagError> {
    let malformed = || FlagError::FlagMalformed(flag.to_string());
    let parts: Vec<&str> = if delimiter.is_empty() {
        vec![path]
    } else {
        path.split(delimiter).collect()
    };

    parts
        .into_iter()
        .map(|part| {
            let (name, index) = match part.find('[') {
                None => (part, None),
                Some(open) => {
                    let digits = part[open + 1..].strip_suffix(']').ok_or_else(malformed)?;
                    let index: usize = digits.parse().map_err(|_| malformed())?;
                    (&part[..open], Some(index))
                }
            };
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(malformed());
            }
            Ok(Segment { name, index })
        })
        .collect()
}

/// Resolve the array slot for a repeated field at `index`.
///
/// The index must either append (`index == len`) or address the last element
/// (`index == len - 1`).
fn repeated_slot<'v>(
    parent: &'v mut Map<String, Value>,
    field: &'static FieldSchema,
    index: Option<usize>,
    path: &str,
    fresh: impl FnOnce() -> Value,
) -> Result<&'v mut Value, FlagError> {
    let entry = parent
        .entry(field.name)
        .or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(items) = entry else {
        return Err(FlagError::Mapping(format!("`{path}` is not a list")));
    };
    let length = items.len();
    match index {
        Some(i) if i == length => {
            items.push(fresh());
            Ok(&mut items[i])
        }
        Some(i) if length > 0 && i == length - 1 => Ok(&mut items[i]),
        _ => Err(FlagError::NotIndexedCorrectly {
            field: path.to_string(),
            index,
            length,
        }),
    }
}

fn convert(field: &'static FieldSchema, path: &str, raw: &str) -> Result<Value, FlagError> {
    let type_error = |expected| FlagError::TypeConversion {
        field: path.to_string(),
        value: raw.to_string(),
        expected,
    };
    match field.kind {
        Kind::String => Ok(Value::String(raw.to_string())),
        Kind::Bytes => Ok(Value::Array(
            raw.bytes().map(|b| Value::Number(Number::from(b))).collect(),
        )),
        Kind::Bool => Ok(Value::Bool(true)),
        Kind::Uint32 => raw
            .parse::<u32>()
            .map(|v| Value::Number(Number::from(v)))
            .map_err(|_| type_error("uint32")),
        Kind::Uint64 => raw
            .parse::<u64>()
            .map(|v| Value::Number(Number::from(v)))
            .map_err(|_| type_error("uint64")),
        Kind::Enum(e) => e
            .value_of(raw)
            .map(|v| Value::Number(Number::from(v)))
            .ok_or_else(|| type_error(e.name)),
        Kind::Message(_) => Err(FlagError::FieldInvalid(path.to_string())),
    }
}

/// Parse flag tokens into a message of type `M`.
///
/// `--help` or `help` in any flag position yields [`Parsed::Help`] instead.
pub fn deserialize<M: Described>(
    tokens: &[String],
    delimiter: &str,
) -> Result<Parsed<M>, FlagError> {
    let schema = M::schema();
    let mut root = Map::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i].as_str();
        if is_help(token) {
            return Ok(Parsed::Help(generate_help(schema, delimiter)));
        }
        let path = match token.strip_prefix("--") {
            Some(p) if !p.is_empty() => p,
            _ => return Err(FlagError::FlagMalformed(token.to_string())),
        };
        let segments = parse_path(token, path, delimiter)?;

        let (field, slot) = resolve(schema, &mut root, &segments, path, delimiter)?;
        if matches!(field.kind, Kind::Bool) {
            *slot = Value::Bool(true);
            i += 1;
            continue;
        }
        let raw = tokens
            .get(i + 1)
            .ok_or_else(|| FlagError::FlagIncomplete(token.to_string()))?;
        *slot = convert(field, path, raw)?;
        i += 2;
    }

    check_required(schema, &root, "", delimiter)?;
    let message = serde_json::from_value(Value::Object(root))
        .map_err(|e| FlagError::Mapping(e.to_string()))?;
    Ok(Parsed::Message(message))
}

/// Walk `segments` from the root, instantiating intermediate messages, and
/// return the addressed leaf field with its value slot.
fn resolve<'v>(
    schema: &'static MessageSchema,
    root: &'v mut Map<String, Value>,
    segments: &[Segment<'_>],
    path: &str,
    delimiter: &str,
) -> Result<(&'static FieldSchema, &'v mut Value), FlagError> {
    let mut schema = schema;
    let mut current = root;
    let mut walked = String::new();

    for (n, segment) in segments.iter().enumerate() {
        if n > 0 {
            walked.push_str(delimiter);
        }
        walked.push_str(segment.name);

        let field = schema
            .field(segment.name)
            .ok_or_else(|| FlagError::FieldInvalid(walked.clone()))?;
        let last = n + 1 == segments.len();

        let slot = if field.label == Label::Repeated {
            let fresh: fn() -> Value = if last {
                || Value::Null
            } else {
                || Value::Object(Map::new())
            };
            repeated_slot(current, field, segment.index, &walked, fresh)?
        } else {
            if segment.index.is_some() {
                return Err(FlagError::NotIndexedCorrectly {
                    field: walked,
                    index: segment.index,
                    length: 0,
                });
            }
            let placeholder = if last {
                Value::Null
            } else {
                Value::Object(Map::new())
            };
            current.entry(segment.name).or_insert(placeholder)
        };

        if last {
            return Ok((field, slot));
        }

        let Kind::Message(nested) = field.kind else {
            return Err(FlagError::FieldInvalid(walked));
        };
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            return Err(FlagError::Mapping(format!("`{path}` is not a message")));
        };
        schema = nested;
        current = map;
    }

    Err(FlagError::FlagMalformed(path.to_string()))
}

fn check_required(
    schema: &'static MessageSchema,
    map: &Map<String, Value>,
    prefix: &str,
    delimiter: &str,
) -> Result<(), FlagError> {
    for field in schema.fields {
        let name = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}{delimiter}{}", field.name)
        };
        let value = map.get(field.name).filter(|v| !v.is_null());
        if field.label == Label::Required && value.is_none() {
            return Err(FlagError::MissingRequired(name));
        }
        let Kind::Message(nested) = field.kind else {
            continue;
        };
        match value {
            Some(Value::Object(inner)) => check_required(nested, inner, &name, delimiter)?,
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    if let Value::Object(inner) = item {
                        check_required(nested, inner, &format!("{name}[{i}]"), delimiter)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ========== Help ==========

/// Help for one message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Help {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: Vec<FieldHelp>,
}

/// Help for one field; nested messages carry their own [`Help`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldHelp {
    pub usage: String,
    pub description: &'static str,
    pub nested: Option<Help>,
}

/// Build help for a message type from its schema.
pub fn generate_help(schema: &'static MessageSchema, delimiter: &str) -> Help {
    help_with_prefix(schema, "--", delimiter)
}

fn help_with_prefix(schema: &'static MessageSchema, prefix: &str, delimiter: &str) -> Help {
    let fields = schema
        .fields
        .iter()
        .map(|field| {
            let mut usage = format!("{prefix}{}", field.name);
            if field.label == Label::Repeated {
                usage.push_str("[index]");
            }
            let nested = match field.kind {
                Kind::Message(inner) => Some(help_with_prefix(inner, delimiter, delimiter)),
                Kind::Bool => {
                    usage.push_str(" (bool)");
                    None
                }
                kind => {
                    usage.push_str(&format!(" <{}> ({})", field.name, kind.type_name()));
                    None
                }
            };
            if field.label != Label::Required {
                usage = format!("[{usage}]");
            }
            FieldHelp {
                usage,
                description: field.description,
                nested,
            }
        })
        .collect();

    Help {
        name: schema.name,
        description: schema.description,
        fields,
    }
}

impl Help {
    /// Render as indented text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.description);
        out.push('\n');
        self.render_fields(1, &mut out);
        out
    }

    fn render_fields(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        for field in &self.fields {
            out.push_str(&indent);
            out.push_str(&field.usage);
            if !field.description.is_empty() {
                out.push_str("  ");
                out.push_str(field.description);
            }
            out.push('\n');
            if let Some(nested) = &field.nested {
                nested.render_fields(depth + 1, out);
            }
        }
    }
}

impl fmt::Display for Help {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
