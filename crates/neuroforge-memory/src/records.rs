//! Record shapes shared by every namespace.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Namespaces the memory is partitioned into. Records never move between
/// namespaces and are never updated in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Tools,
    Errors,
    Fixes,
    Docs,
    Patterns,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Tools => "tools",
            Namespace::Errors => "errors",
            Namespace::Fixes => "fixes",
            Namespace::Docs => "docs",
            Namespace::Patterns => "patterns",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tools" => Ok(Namespace::Tools),
            "errors" => Ok(Namespace::Errors),
            "fixes" => Ok(Namespace::Fixes),
            "docs" => Ok(Namespace::Docs),
            "patterns" => Ok(Namespace::Patterns),
            other => Err(format!("unknown namespace: {other}")),
        }
    }
}

/// Closed variant for metadata values. Anything outside this set is
/// stringified on the way in; nulls are dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    StrList(Vec<String>),
}

impl Primitive {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Numeric view: ints and floats read as f64, everything else is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Primitive::Int(value) => Some(*value as f64),
            Primitive::Float(value) => Some(*value),
            _ => None,
        }
    }
}

pub type Metadata = BTreeMap<String, Primitive>;

/// Converts loose JSON metadata into the closed variant: nulls are dropped,
/// string lists survive as lists, anything else becomes its JSON rendering.
pub fn sanitize_metadata(raw: serde_json::Map<String, serde_json::Value>) -> Metadata {
    let mut clean = Metadata::new();
    for (key, value) in raw {
        let primitive = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::Bool(b) => Primitive::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Primitive::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Primitive::Float(f)
                } else {
                    Primitive::Str(n.to_string())
                }
            }
            serde_json::Value::String(s) => Primitive::Str(s),
            serde_json::Value::Array(items)
                if items.iter().all(|item| item.is_string()) =>
            {
                Primitive::StrList(
                    items
                        .into_iter()
                        .filter_map(|item| match item {
                            serde_json::Value::String(s) => Some(s),
                            _ => None,
                        })
                        .collect(),
                )
            }
            other => Primitive::Str(other.to_string()),
        };
        clean.insert(key, primitive);
    }
    clean
}

/// One similarity hit, ordered by decreasing score.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}
