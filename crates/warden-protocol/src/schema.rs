// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Field metadata for protocol messages.
//!
//! `prost` has no runtime reflection, so every message carries a static
//! [`MessageSchema`] describing its fields. The flag mapper and the help
//! generator are driven entirely by these tables.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Field cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Required,
    Optional,
    Repeated,
}

/// Field value type.
#[derive(Debug, Clone, Copy)]
pub enum Kind {
    String,
    Bytes,
    Bool,
    Uint32,
    Uint64,
    Enum(&'static EnumSchema),
    Message(&'static MessageSchema),
}

impl Kind {
    /// Short type name used in help output.
    pub fn type_name(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Bytes => "bytes",
            Kind::Bool => "bool",
            Kind::Uint32 => "uint32",
            Kind::Uint64 => "uint64",
            Kind::Enum(e) => e.name,
            Kind::Message(m) => m.name,
        }
    }
}

/// Description of a single message field.
#[derive(Debug)]
pub struct FieldSchema {
    pub name: &'static str,
    pub label: Label,
    pub kind: Kind,
    pub description: &'static str,
}

impl FieldSchema {
    pub const fn required(name: &'static str, kind: Kind, description: &'static str) -> Self {
        Self {
            name,
            label: Label::Required,
            kind,
            description,
        }
    }

    pub const fn optional(name: &'static str, kind: Kind, description: &'static str) -> Self {
        Self {
            name,
            label: Label::Optional,
            kind,
            description,
        }
    }

    pub const fn repeated(name: &'static str, kind: Kind, description: &'static str) -> Self {
        Self {
            name,
            label: Label::Repeated,
            kind,
            description,
        }
    }
}

/// Description of a message type.
#[derive(Debug)]
pub struct MessageSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldSchema],
}

impl MessageSchema {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&'static FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Description of an enumeration: symbolic names and their wire values.
#[derive(Debug)]
pub struct EnumSchema {
    pub name: &'static str,
    pub values: &'static [(&'static str, i32)],
}

impl EnumSchema {
    /// Symbolic name for a value.
    ///
    /// Fails with the list of candidates when the value is unknown or when
    /// more than one constant maps to it.
    pub fn name_of(&self, value: i32) -> Result<&'static str, Vec<&'static str>> {
        let names: Vec<&'static str> = self
            .values
            .iter()
            .filter(|(_, v)| *v == value)
            .map(|(n, _)| *n)
            .collect();
        match names.as_slice() {
            [name] => Ok(name),
            _ => Err(names),
        }
    }

    /// Wire value for a symbolic name (case-insensitive).
    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

/// A protocol message with a static field description.
pub trait Described: prost::Message + Default + Serialize + DeserializeOwned {
    fn schema() -> &'static MessageSchema;
}
