use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use super::definitions::{definition_for, Mutability};
use crate::config::DirectoryConfig;
use crate::dn::Dn;
use crate::error::{AppError, AppResult};
use crate::filter::Filter;
use crate::models::{EntityKind, EntityType, SchemaVariant};

lazy_static! {
    /// RFC 4512 `descr`: a keystring.
    static ref ATTRIBUTE_NAME: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: String,
    pub multi_valued: bool,
    pub mutability: Mutability,
}

/// Resolved metadata of one entity type: attribute list, lookup keys, location.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    pub base: Dn,
    pub object_classes: Vec<String>,
    pub rdn_attribute: String,
    pub unique_attributes: Vec<String>,
    pub membership_attribute: Option<String>,
    attributes: Vec<AttributeSpec>,
}

impl EntitySchema {
    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Canonical spelling of a declared attribute, or a `Validation` error.
    pub fn resolve(&self, name: &str) -> AppResult<&str> {
        self.attribute(name).map(|a| a.name.as_str()).ok_or_else(|| {
            AppError::Validation(format!(
                "Unknown attribute '{}' for {}",
                name, self.entity_type
            ))
        })
    }

    pub fn is_read_only(&self, name: &str) -> bool {
        self.attribute(name)
            .is_some_and(|a| a.mutability == Mutability::ReadOnly)
    }

    pub fn is_write_only(&self, name: &str) -> bool {
        self.attribute(name)
            .is_some_and(|a| a.mutability == Mutability::WriteOnly)
    }

    pub fn is_unique(&self, name: &str) -> bool {
        self.unique_attributes
            .iter()
            .any(|u| u.eq_ignore_ascii_case(name))
    }

    /// Structural object class telling this entity type apart from its
    /// neighbours under a shared base.
    pub fn structural_class(&self) -> &'static str {
        match (self.entity_type.kind, self.entity_type.variant) {
            (EntityKind::User, SchemaVariant::Posix) => "posixAccount",
            (EntityKind::Group, SchemaVariant::Posix) => "posixGroup",
            (EntityKind::User, SchemaVariant::Ad) => "user",
            (EntityKind::Group, SchemaVariant::Ad) => "group",
        }
    }

    /// `(&(objectClass=<structural>)<filter>)`
    pub fn type_filter(&self, filter: Filter) -> Filter {
        Filter::and(vec![
            Filter::eq("objectClass", self.structural_class()),
            filter,
        ])
    }

    /// Attribute names worth requesting in a search (write-only ones never come back).
    pub fn readable_attributes(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .attributes
            .iter()
            .filter(|a| a.mutability != Mutability::WriteOnly)
            .map(|a| a.name.clone())
            .collect();
        names.push("objectClass".to_string());
        names
    }
}

/// Explicit registry of entity schemas, shared by every entity of a session.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    variant: SchemaVariant,
    schemas: HashMap<EntityType, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn builder(variant: SchemaVariant) -> SchemaRegistryBuilder {
        SchemaRegistryBuilder {
            variant,
            user_base: None,
            group_base: None,
            extra: HashMap::new(),
        }
    }

    /// Build the registry described by a loaded configuration.
    pub fn from_config(config: &DirectoryConfig) -> AppResult<Self> {
        let mut builder = Self::builder(config.variant)
            .user_base(&config.users.base)
            .group_base(&config.groups.base);
        for name in &config.users.extra_attributes {
            builder = builder.extra_attribute(EntityKind::User, name);
        }
        for name in &config.groups.extra_attributes {
            builder = builder.extra_attribute(EntityKind::Group, name);
        }
        builder.build()
    }

    pub fn variant(&self) -> SchemaVariant {
        self.variant
    }

    pub fn get(&self, kind: EntityKind) -> AppResult<Arc<EntitySchema>> {
        let entity_type = EntityType::new(kind, self.variant);
        self.schemas.get(&entity_type).cloned().ok_or_else(|| {
            AppError::Configuration(format!("No schema registered for {}", entity_type))
        })
    }

    pub fn users(&self) -> AppResult<Arc<EntitySchema>> {
        self.get(EntityKind::User)
    }

    pub fn groups(&self) -> AppResult<Arc<EntitySchema>> {
        self.get(EntityKind::Group)
    }
}

pub struct SchemaRegistryBuilder {
    variant: SchemaVariant,
    user_base: Option<String>,
    group_base: Option<String>,
    extra: HashMap<EntityKind, Vec<String>>,
}

impl SchemaRegistryBuilder {
    pub fn user_base(mut self, base: &str) -> Self {
        self.user_base = Some(base.to_string());
        self
    }

    pub fn group_base(mut self, base: &str) -> Self {
        self.group_base = Some(base.to_string());
        self
    }

    /// Declare a site specific attribute (e.g. `employeeNumber`).
    pub fn extra_attribute(mut self, kind: EntityKind, name: &str) -> Self {
        self.extra.entry(kind).or_default().push(name.to_string());
        self
    }

    pub fn build(self) -> AppResult<SchemaRegistry> {
        let mut schemas = HashMap::new();
        for kind in [EntityKind::User, EntityKind::Group] {
            let base = match kind {
                EntityKind::User => self.user_base.as_deref(),
                EntityKind::Group => self.group_base.as_deref(),
            };
            let extra = self.extra.get(&kind).cloned().unwrap_or_default();
            let schema = build_schema(EntityType::new(kind, self.variant), base, &extra)?;
            debug!(entity_type = %schema.entity_type, base = %schema.base, "Registered schema");
            schemas.insert(schema.entity_type, Arc::new(schema));
        }

        Ok(SchemaRegistry {
            variant: self.variant,
            schemas,
        })
    }
}

fn build_schema(entity_type: EntityType, base: Option<&str>, extra: &[String]) -> AppResult<EntitySchema> {
    let base = base.ok_or_else(|| {
        AppError::Configuration(format!("Missing base path for {}", entity_type))
    })?;
    let base = Dn::parse(base)
        .map_err(|e| AppError::Configuration(format!("Invalid base path for {}: {}", entity_type, e)))?;
    if base.is_root() {
        return Err(AppError::Configuration(format!(
            "Base path for {} cannot be empty",
            entity_type
        )));
    }

    let definition = definition_for(entity_type);
    let mut attributes: Vec<AttributeSpec> = definition
        .attributes
        .iter()
        .map(|a| AttributeSpec {
            name: a.name.to_string(),
            multi_valued: a.multi_valued,
            mutability: a.mutability,
        })
        .collect();

    for name in extra {
        if !ATTRIBUTE_NAME.is_match(name) {
            return Err(AppError::Configuration(format!(
                "Invalid attribute name '{}' for {}",
                name, entity_type
            )));
        }
        if attributes.iter().any(|a| a.name.eq_ignore_ascii_case(name)) {
            return Err(AppError::Configuration(format!(
                "Attribute '{}' is declared twice for {}",
                name, entity_type
            )));
        }
        attributes.push(AttributeSpec {
            name: name.clone(),
            multi_valued: true,
            mutability: Mutability::ReadWrite,
        });
    }

    let unique_attributes: Vec<String> = definition
        .unique_attributes
        .iter()
        .map(|s| s.to_string())
        .collect();
    if unique_attributes.is_empty() {
        return Err(AppError::Configuration(format!(
            "{} declares no unique attribute",
            entity_type
        )));
    }

    Ok(EntitySchema {
        entity_type,
        base,
        object_classes: definition.object_classes.iter().map(|s| s.to_string()).collect(),
        rdn_attribute: definition.rdn_attribute.to_string(),
        unique_attributes,
        membership_attribute: definition.membership_attribute.map(str::to_string),
        attributes,
    })
}
