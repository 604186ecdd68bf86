// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity value type.
//!
//! An [`Entity`] is one node of the inventory tree: its path plus the mutable
//! payload (display name and string properties). Tree position is fixed by
//! the path; only `name` and `properties` change after creation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::path::CanonicalPath;

/// String-to-string property map stored with each entity.
pub type Properties = BTreeMap<String, String>;

/// A node of the inventory tree.
///
/// # Example
///
/// ```
/// use inventory_tree::{CanonicalPath, Entity};
///
/// let path = CanonicalPath::parse("/t;acme/f;host-1").unwrap();
/// let feed = Entity::at(path)
///     .with_name("Host 1")
///     .with_property("os", "linux");
///
/// assert_eq!(feed.name.as_deref(), Some("Host 1"));
/// assert_eq!(feed.properties.get("os").map(String::as_str), Some("linux"));
/// assert!(!feed.is_root());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical path (identity and tree position)
    pub path: CanonicalPath,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Arbitrary properties
    #[serde(default)]
    pub properties: Properties,
}

impl Entity {
    /// Entity at `path` with no name and no properties.
    #[must_use]
    pub fn at(path: CanonicalPath) -> Self {
        Self {
            path,
            name: None,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Tenants have no parent and sit at the top of a tree.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.parent().is_none()
    }
}
