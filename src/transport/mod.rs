//! The narrow directory interface the core consumes.
//!
//! Everything above this module speaks in [`Dn`], [`Filter`] and raw attribute
//! values; how they reach a server is the transport's business.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::dn::Dn;
use crate::error::TransportResult;
use crate::filter::Filter;
use crate::models::{Attributes, DirectoryEntry, RawValues};

#[cfg(feature = "ldap")]
pub mod ldap;
pub mod memory;

#[cfg(feature = "ldap")]
pub use ldap::Ldap3Transport;
pub use memory::{Fault, JournalEntry, MemoryDirectory, OpKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// The base entry only.
    Base,
    /// Immediate children of the base.
    OneLevel,
    /// The base and everything below it.
    Subtree,
}

/// Replace every value of one attribute; `None` removes the attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub attribute: String,
    pub values: Option<RawValues>,
}

impl Replacement {
    pub fn set(attribute: impl Into<String>, values: RawValues) -> Self {
        let values = if values.is_empty() { None } else { Some(values) };
        Self {
            attribute: attribute.into(),
            values,
        }
    }

    pub fn remove(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            values: None,
        }
    }
}

impl fmt::Display for Replacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.values {
            Some(values) => write!(f, "{}[{}]", self.attribute, values.len()),
            None => write!(f, "-{}", self.attribute),
        }
    }
}

/// Directory access used by the executor, the resolver and entity reads.
///
/// Implementations report failures as [`TransportError`](crate::error::TransportError)
/// carrying an LDAP result code. An empty `attributes` list in `search`
/// requests every user attribute.
#[async_trait]
pub trait DirectoryTransport: Send + Sync {
    async fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        attributes: &[String],
    ) -> TransportResult<Vec<DirectoryEntry>>;

    async fn add(&self, dn: &Dn, attributes: &Attributes) -> TransportResult<()>;

    async fn delete(&self, dn: &Dn) -> TransportResult<()>;

    async fn modify(&self, dn: &Dn, replacements: &[Replacement]) -> TransportResult<()>;

    /// Change an entry's position. The new leaf RDN value replaces the old one.
    async fn move_entry(&self, from: &Dn, to: &Dn) -> TransportResult<()>;
}
