// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Desired subtree for [`sync`](crate::InventoryStorage::sync).
//!
//! An [`InventoryStructure`] is a root entity plus every entity that should
//! exist below it. It is assembled with a nesting builder that mirrors the
//! shape of the tree:
//!
//! ```
//! use inventory_tree::{CanonicalPath, Entity, InventoryStructure, StructureLevel};
//!
//! let fd = CanonicalPath::parse("/t;t/f;fd").unwrap();
//! let r1 = CanonicalPath::parse("/t;t/f;fd/r;r1").unwrap();
//! let m1 = CanonicalPath::parse("/t;t/f;fd/r;r1/m;m1").unwrap();
//!
//! let structure = InventoryStructure::of(Entity::at(fd.clone()))
//!     .start_child(Entity::at(r1.clone()))
//!         .add_child(Entity::at(m1.clone()))
//!     .end()
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(structure.entity_count(), 3);
//! assert_eq!(structure.children_of(&r1), &[m1]);
//! ```
//!
//! Chained calls never fail; the first problem (a child that is not a direct
//! child of the current level, or a duplicate path) is reported by `build()`.

use std::collections::HashMap;

use thiserror::Error;

use crate::entity::Entity;
use crate::path::{CanonicalPath, RelativePath};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("'{child}' is not a direct child of '{parent}'")]
    NotAChild { parent: String, child: String },
    #[error("Entity '{0}' appears more than once")]
    Duplicate(String),
}

/// A root entity and the full set of entities desired beneath it.
#[derive(Debug, Clone)]
pub struct InventoryStructure {
    root: Entity,
    entities: HashMap<CanonicalPath, Entity>,
    children: HashMap<CanonicalPath, Vec<CanonicalPath>>,
}

impl InventoryStructure {
    /// Start building a structure rooted at `root`.
    #[must_use]
    pub fn of(root: Entity) -> StructureBuilder {
        let mut entities = HashMap::new();
        entities.insert(root.path.clone(), root.clone());
        StructureBuilder {
            state: BuildState {
                root,
                entities,
                children: HashMap::new(),
                error: None,
            },
        }
    }

    #[must_use]
    pub fn root(&self) -> &Entity {
        &self.root
    }

    #[must_use]
    pub fn root_path(&self) -> &CanonicalPath {
        &self.root.path
    }

    /// Look up an entity by its path relative to the root.
    #[must_use]
    pub fn get(&self, relative: &RelativePath) -> Option<&Entity> {
        let path = self.root.path.join(relative).ok()?;
        self.entities.get(&path)
    }

    #[must_use]
    pub fn get_canonical(&self, path: &CanonicalPath) -> Option<&Entity> {
        self.entities.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &CanonicalPath) -> bool {
        self.entities.contains_key(path)
    }

    /// Direct children of `parent`, in insertion order.
    #[must_use]
    pub fn children_of(&self, parent: &CanonicalPath) -> &[CanonicalPath] {
        self.children.get(parent).map_or(&[], Vec::as_slice)
    }

    /// Every entity, root included.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of entities, root included.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

/// Accumulated state shared by every level of a builder chain.
#[derive(Debug)]
pub struct BuildState {
    root: Entity,
    entities: HashMap<CanonicalPath, Entity>,
    children: HashMap<CanonicalPath, Vec<CanonicalPath>>,
    error: Option<StructureError>,
}

impl BuildState {
    fn record(&mut self, parent: &CanonicalPath, child: Entity) {
        if self.error.is_some() {
            return;
        }
        if child.path.parent().as_ref() != Some(parent) {
            self.error = Some(StructureError::NotAChild {
                parent: parent.to_string(),
                child: child.path.to_string(),
            });
            return;
        }
        if self.entities.contains_key(&child.path) {
            self.error = Some(StructureError::Duplicate(child.path.to_string()));
            return;
        }
        self.children
            .entry(parent.clone())
            .or_default()
            .push(child.path.clone());
        self.entities.insert(child.path.clone(), child);
    }
}

/// One level of the builder chain: the root builder or a nested child.
pub trait StructureLevel: Sized {
    #[doc(hidden)]
    fn state_mut(&mut self) -> &mut BuildState;

    /// Path of the entity whose children this level adds.
    fn level_path(&self) -> &CanonicalPath;

    /// Add `child` and descend into it. Call [`ChildBuilder::end`] to come back.
    fn start_child(mut self, child: Entity) -> ChildBuilder<Self> {
        let parent = self.level_path().clone();
        let path = child.path.clone();
        self.state_mut().record(&parent, child);
        ChildBuilder { parent: self, path }
    }

    /// Add a leaf `child` and stay on this level.
    fn add_child(self, child: Entity) -> Self {
        self.start_child(child).end()
    }
}

/// Top of the builder chain.
#[derive(Debug)]
pub struct StructureBuilder {
    state: BuildState,
}

impl StructureBuilder {
    pub fn build(self) -> Result<InventoryStructure, StructureError> {
        let BuildState { root, entities, children, error } = self.state;
        match error {
            Some(err) => Err(err),
            None => Ok(InventoryStructure { root, entities, children }),
        }
    }
}

impl StructureLevel for StructureBuilder {
    fn state_mut(&mut self) -> &mut BuildState {
        &mut self.state
    }

    fn level_path(&self) -> &CanonicalPath {
        &self.state.root.path
    }
}

/// Nested level of the builder chain, returned by [`StructureLevel::start_child`].
#[derive(Debug)]
pub struct ChildBuilder<P> {
    parent: P,
    path: CanonicalPath,
}

impl<P: StructureLevel> ChildBuilder<P> {
    /// Return to the enclosing level.
    #[must_use]
    pub fn end(self) -> P {
        self.parent
    }
}

impl<P: StructureLevel> StructureLevel for ChildBuilder<P> {
    fn state_mut(&mut self) -> &mut BuildState {
        self.parent.state_mut()
    }

    fn level_path(&self) -> &CanonicalPath {
        &self.path
    }
}
