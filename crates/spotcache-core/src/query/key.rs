use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::truncate_string;

/// Longest rendering of a single key part in logs.
/// Session tokens are key parts; this keeps them out of log output.
const MAX_PART_DISPLAY_LEN: usize = 12;

/// One scalar component of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl KeyPart {
    /// Extract a key part from a JSON scalar. Objects, arrays, floats and null yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(KeyPart::Bool(*b)),
            Value::Number(n) => n.as_i64().map(KeyPart::Int),
            Value::String(s) => Some(KeyPart::Str(s.clone())),
            _ => None,
        }
    }

    /// Whether this value can parameterize a dependent query.
    /// Empty strings, zero and `false` are not usable identities.
    pub fn is_usable(&self) -> bool {
        match self {
            KeyPart::Bool(b) => *b,
            KeyPart::Int(i) => *i != 0,
            KeyPart::Str(s) => !s.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyPart::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<i64> for KeyPart {
    fn from(i: i64) -> Self {
        KeyPart::Int(i)
    }
}

impl From<i32> for KeyPart {
    fn from(i: i32) -> Self {
        KeyPart::Int(i64::from(i))
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        KeyPart::Bool(b)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Bool(b) => write!(f, "{}", b),
            KeyPart::Int(i) => write!(f, "{}", i),
            KeyPart::Str(s) => write!(f, "\"{}\"", truncate_string(s, MAX_PART_DISPLAY_LEN)),
        }
    }
}

/// Ordered tuple of scalars identifying one cache entry.
///
/// Keys compare structurally: two keys built from equal parts in the same
/// order address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
    pub fn new(root: impl Into<KeyPart>) -> Self {
        Self(vec![root.into()])
    }

    /// Append a part, e.g. `QueryKey::new("userProfile").with(token)`.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Whether this key starts with all parts of `prefix`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, "]")
    }
}
