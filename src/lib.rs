//! Object mapping for LDAP users and groups in POSIX and Active Directory
//! layouts.
//!
//! Entities track their changes in memory; writes are planned as ordered
//! lists of directory mutations and executed as a batch that rolls back on
//! failure.

pub mod config;
pub mod directory;
pub mod dn;
pub mod entity;
pub mod error;
pub mod executor;
pub mod filter;
pub mod logging;
pub mod models;
pub mod password;
pub mod planner;
pub mod relationship;
pub mod schema;
pub mod transport;

// Re-export commonly used types for easier access
pub use config::DirectoryConfig;
pub use directory::Directory;
pub use dn::Dn;
pub use entity::{Entity, Group, User};
pub use error::{AppError, AppResult, BatchFailure, TransportError};
pub use filter::Filter;
pub use models::{AttrValue, DirectoryEntry, EntityKind, EntityType, SchemaVariant};
pub use planner::{Action, Operation, Plan};
pub use transport::{DirectoryTransport, MemoryDirectory};
