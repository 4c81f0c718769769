use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dn::Dn;

/// Values of one attribute as they travel on the wire.
pub type RawValues = Vec<Vec<u8>>;

/// Attribute name to raw values, as sent in an add request.
pub type Attributes = BTreeMap<String, RawValues>;

/// Whether an entity is a user or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Group,
}

/// Directory schema flavour the entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
    /// RFC 2307 style `posixAccount` / `posixGroup` entries.
    Posix,
    /// Active Directory `user` / `group` entries.
    #[serde(alias = "activedirectory")]
    Ad,
}

/// Kind and variant together select the schema and the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityType {
    pub kind: EntityKind,
    pub variant: SchemaVariant,
}

impl EntityType {
    pub fn new(kind: EntityKind, variant: SchemaVariant) -> Self {
        Self { kind, variant }
    }

    pub fn user(variant: SchemaVariant) -> Self {
        Self::new(EntityKind::User, variant)
    }

    pub fn group(variant: SchemaVariant) -> Self {
        Self::new(EntityKind::Group, variant)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self.variant {
            SchemaVariant::Posix => "POSIX",
            SchemaVariant::Ad => "AD",
        };
        write!(f, "{:?}/{}", self.kind, variant)
    }
}

/// An attribute value held by an entity.
///
/// Directory attributes are multi-valued; `Scalar` is the common single value
/// case. Equality compares the wire form, so `Scalar("a") == List(["a"])`.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Scalar(String),
    List(Vec<String>),
    Binary(Vec<u8>),
}

impl AttrValue {
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        AttrValue::Binary(bytes.into())
    }

    /// Rebuild a value from raw wire values. Returns `None` for no values.
    pub fn from_raw(values: &[Vec<u8>]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let texts: Result<Vec<String>, _> = values
            .iter()
            .map(|v| String::from_utf8(v.clone()))
            .collect();
        match texts {
            Ok(mut texts) if texts.len() == 1 => texts.pop().map(AttrValue::Scalar),
            Ok(texts) => Some(AttrValue::List(texts)),
            Err(_) => Some(AttrValue::Binary(values[0].clone())),
        }
    }

    pub fn to_raw(&self) -> RawValues {
        match self {
            AttrValue::Scalar(s) => vec![s.as_bytes().to_vec()],
            AttrValue::List(items) => items.iter().map(|s| s.as_bytes().to_vec()).collect(),
            AttrValue::Binary(bytes) => vec![bytes.clone()],
        }
    }

    /// The value when it is a single text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Scalar(s) => Some(s),
            AttrValue::List(items) if items.len() == 1 => Some(&items[0]),
            _ => None,
        }
    }

    /// All text values. Binary values yield nothing.
    pub fn texts(&self) -> Vec<String> {
        match self {
            AttrValue::Scalar(s) => vec![s.clone()],
            AttrValue::List(items) => items.clone(),
            AttrValue::Binary(_) => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AttrValue::Scalar(_) | AttrValue::Binary(_) => false,
            AttrValue::List(items) => items.is_empty(),
        }
    }

    /// Printable form for logs; binary content is never printed.
    pub fn describe(&self) -> String {
        match self {
            AttrValue::Scalar(s) => s.clone(),
            AttrValue::List(items) => format!("[{}]", items.join(", ")),
            AttrValue::Binary(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        self.to_raw() == other.to_raw()
    }
}

impl Eq for AttrValue {}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Scalar(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Scalar(value)
    }
}

impl From<&String> for AttrValue {
    fn from(value: &String) -> Self {
        AttrValue::Scalar(value.clone())
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(values: Vec<String>) -> Self {
        AttrValue::List(values)
    }
}

impl From<Vec<&str>> for AttrValue {
    fn from(values: Vec<&str>) -> Self {
        AttrValue::List(values.into_iter().map(str::to_string).collect())
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        AttrValue::Scalar(value.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Scalar(value.to_string())
    }
}

/// One entry returned by a directory search: its path plus attribute values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: Dn,
    pub attrs: BTreeMap<String, RawValues>,
}

impl DirectoryEntry {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attrs: BTreeMap::new(),
        }
    }

    /// Builder used by tests and transports.
    pub fn with(mut self, attr: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(attr.to_string(), value.into().to_raw());
        self
    }

    /// Raw values for an attribute, resolving the name case-insensitively.
    pub fn raw(&self, attr: &str) -> Option<&RawValues> {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, values)| values)
    }

    pub fn get(&self, attr: &str) -> Option<AttrValue> {
        self.raw(attr).and_then(|values| AttrValue::from_raw(values))
    }

    /// First value of an attribute as text.
    pub fn get_str(&self, attr: &str) -> Option<String> {
        self.raw(attr)
            .and_then(|values| values.first())
            .and_then(|v| String::from_utf8(v.clone()).ok())
    }

    /// Every text value of an attribute.
    pub fn get_all(&self, attr: &str) -> Vec<String> {
        self.raw(attr)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| String::from_utf8(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_object_class(&self, class: &str) -> bool {
        self.get_all("objectClass")
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class))
    }
}
