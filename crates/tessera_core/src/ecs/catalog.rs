//! # Archetype Catalog
//!
//! Interns one canonical [`Archetype`] per distinct component set.
//!
//! The catalog is a trie keyed by component id, walked in ascending id
//! order. Each node keeps a child table indexed directly by id (grown on
//! demand) and an optional leaf:
//!
//! ```text
//! root ─ #0 ─ #1 ─ #2   leaf {0,1,2}
//!         │    └─ #3    leaf {0,1,3}
//!         └ leaf {0}
//! ```
//!
//! Whatever attach/detach path produced a set, it lands on the same leaf.

use std::rc::Rc;

use super::archetype::Archetype;
use super::component::ComponentType;
use crate::error::{EcsError, EcsResult};

/// Index of an interned archetype. Also indexes the world's memories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// Position in interning order.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
struct TrieNode {
    children: Vec<Option<usize>>,
    leaf: Option<ArchetypeId>,
}

/// Trie of interned archetypes.
#[derive(Debug)]
pub struct ArchetypeCatalog {
    nodes: Vec<TrieNode>,
    archetypes: Vec<Rc<Archetype>>,
}

impl Default for ArchetypeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchetypeCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            archetypes: Vec::new(),
        }
    }

    /// Number of interned archetypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Checks if nothing is interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Canonical archetype for an id.
    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> Option<&Rc<Archetype>> {
        self.archetypes.get(id.index())
    }

    /// Interned archetypes in interning order.
    pub fn iter(&self) -> impl Iterator<Item = (ArchetypeId, &Rc<Archetype>)> {
        self.archetypes
            .iter()
            .enumerate()
            .map(|(i, archetype)| (ArchetypeId(i as u32), archetype))
    }

    /// Looks up a set given in ascending id order, without inserting.
    #[must_use]
    pub fn find(&self, types: &[ComponentType]) -> Option<ArchetypeId> {
        let mut node = 0;
        for ty in types {
            node = (*self.nodes[node].children.get(ty.id() as usize)?)?;
        }
        self.nodes[node].leaf
    }

    /// Walks the path for `types`, creating missing nodes.
    fn walk_or_insert(&mut self, types: &[ComponentType]) -> usize {
        let mut node = 0;
        for ty in types {
            let id = ty.id() as usize;
            if self.nodes[node].children.len() <= id {
                self.nodes[node].children.resize(id + 1, None);
            }
            node = if let Some(next) = self.nodes[node].children[id] {
                next
            } else {
                let next = self.nodes.len();
                self.nodes.push(TrieNode::default());
                self.nodes[node].children[id] = Some(next);
                next
            };
        }
        node
    }

    /// Interns `archetype`. Returns `(created, id)`; when an equal archetype
    /// already exists, `created` is false and its id is returned.
    pub fn try_add(&mut self, archetype: impl Into<Rc<Archetype>>) -> (bool, ArchetypeId) {
        let archetype = archetype.into();
        let node = self.walk_or_insert(archetype.types());
        if let Some(existing) = self.nodes[node].leaf {
            return (false, existing);
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        self.archetypes.push(archetype);
        self.nodes[node].leaf = Some(id);
        (true, id)
    }

    /// Interns the set of `types`, given in any order.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateComponentType`] if a type repeats.
    pub fn try_add_types(&mut self, types: &[ComponentType]) -> EcsResult<(bool, ArchetypeId)> {
        Ok(self.try_add(Archetype::new(types.iter().copied())?))
    }

    /// Interns `archetype`, failing if it is already present.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateArchetype`] on an existing entry.
    pub fn add(&mut self, archetype: Archetype) -> EcsResult<ArchetypeId> {
        let name = archetype.to_string();
        match self.try_add(archetype) {
            (true, id) => Ok(id),
            (false, _) => Err(EcsError::DuplicateArchetype(name)),
        }
    }

    fn derive(
        &mut self,
        id: ArchetypeId,
        derive: impl FnOnce(&Archetype) -> EcsResult<Archetype>,
    ) -> EcsResult<(bool, ArchetypeId)> {
        let source = self.get(id).ok_or(EcsError::IndexOutOfRange {
            index: id.index(),
            len: self.archetypes.len(),
        })?;
        let derived = derive(source)?;
        Ok(self.try_add(derived))
    }

    /// Interns the archetype of `id` with `ty` added.
    ///
    /// # Errors
    ///
    /// - [`EcsError::DuplicateComponentType`] if `ty` is already present.
    /// - [`EcsError::IndexOutOfRange`] for an unknown `id`.
    pub fn attach(&mut self, id: ArchetypeId, ty: ComponentType) -> EcsResult<(bool, ArchetypeId)> {
        self.derive(id, |archetype| archetype.attach(ty))
    }

    /// Interns the archetype of `id` with `ty` removed.
    ///
    /// # Errors
    ///
    /// - [`EcsError::ComponentNotFound`] if `ty` is absent.
    /// - [`EcsError::IndexOutOfRange`] for an unknown `id`.
    pub fn detach(&mut self, id: ArchetypeId, ty: ComponentType) -> EcsResult<(bool, ArchetypeId)> {
        self.derive(id, |archetype| archetype.detach(ty))
    }
}
