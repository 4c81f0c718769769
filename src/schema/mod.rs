pub mod definitions;
pub mod registry;

// Re-export commonly used items
pub use definitions::{account_control, attr, definition_for, Mutability, AD_GLOBAL_SECURITY_GROUP};
pub use registry::{AttributeSpec, EntitySchema, SchemaRegistry, SchemaRegistryBuilder};
