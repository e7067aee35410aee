//! # Entity Management
//!
//! Entities are lightweight handles consisting of:
//! - An index into the entity table
//! - A generation counter for detecting stale handles
//!
//! The table maps each live index to its archetype memory and slot. Slots
//! move on every swap-remove; the handle stays the same unless the
//! generation is bumped.

use std::collections::VecDeque;
use std::fmt;

use super::catalog::ArchetypeId;
use crate::error::{EcsError, EcsResult};

/// Handle to an entity.
///
/// The ID is split into two parts:
/// - Lower 32 bits: index into the entity table
/// - Upper 32 bits: generation of that table row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Entity(u64);

impl Entity {
    /// Creates a handle from index and generation.
    ///
    /// # Arguments
    ///
    /// * `index` - Row in the entity table
    /// * `generation` - Generation the row must have for the handle to be valid
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the handle.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the handle.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Packed representation.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Handle from its packed representation.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Null handle. Never valid.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this is the null handle.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("entity(null)")
        } else {
            write!(f, "entity({}v{})", self.index(), self.generation())
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct EntityRow {
    /// `None` while the row is free.
    memory: Option<ArchetypeId>,
    slot: usize,
    generation: u32,
    pending_destroy: bool,
}

/// Generation-checked map from entity index to storage location.
#[derive(Debug, Default)]
pub struct EntityTable {
    rows: Vec<EntityRow>,
    /// Free indices, reused oldest first.
    free: VecDeque<u32>,
}

impl EntityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len() - self.free.len()
    }

    /// Checks if no entity is alive.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows ever allocated, live or free.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    /// Checks range, generation and liveness.
    #[must_use]
    pub fn is_valid(&self, entity: Entity) -> bool {
        self.rows.get(entity.index() as usize).is_some_and(|row| {
            row.memory.is_some() && row.generation == entity.generation()
        })
    }

    /// Memory and slot of a valid handle.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidEntity`] for a stale or unknown handle.
    pub fn locate(&self, entity: Entity) -> EcsResult<(ArchetypeId, usize)> {
        self.rows
            .get(entity.index() as usize)
            .filter(|row| row.generation == entity.generation())
            .and_then(|row| Some((row.memory?, row.slot)))
            .ok_or(EcsError::InvalidEntity(entity))
    }

    /// Memory and slot of a live row, ignoring generations.
    #[must_use]
    pub fn locate_index(&self, index: u32) -> Option<(ArchetypeId, usize)> {
        let row = self.rows.get(index as usize)?;
        Some((row.memory?, row.slot))
    }

    /// Current handle of a live row.
    #[must_use]
    pub fn handle_at(&self, index: u32) -> Option<Entity> {
        let row = self.rows.get(index as usize)?;
        row.memory.map(|_| Entity::new(index, row.generation))
    }

    /// Takes a free index (or a new row) and places the entity with
    /// `place`, which receives the index and returns the location.
    ///
    /// On failure the index goes back to the pool untouched.
    pub(crate) fn create(
        &mut self,
        place: impl FnOnce(u32) -> EcsResult<(ArchetypeId, usize)>,
    ) -> EcsResult<Entity> {
        let (index, reused) = match self.free.pop_front() {
            Some(index) => (index, true),
            None => {
                self.rows.push(EntityRow::default());
                ((self.rows.len() - 1) as u32, false)
            }
        };
        match place(index) {
            Ok((memory, slot)) => {
                let row = &mut self.rows[index as usize];
                row.memory = Some(memory);
                row.slot = slot;
                row.generation = row.generation.wrapping_add(1);
                Ok(Entity::new(index, row.generation))
            }
            Err(err) => {
                if reused {
                    self.free.push_front(index);
                } else {
                    self.rows.pop();
                }
                Err(err)
            }
        }
    }

    /// Frees a row: clears its location, bumps its generation and queues
    /// the index for reuse.
    pub(crate) fn retire(&mut self, index: u32) {
        if let Some(row) = self.rows.get_mut(index as usize) {
            if row.memory.take().is_some() {
                row.generation = row.generation.wrapping_add(1);
                row.pending_destroy = false;
                self.free.push_back(index);
            }
        }
    }

    /// Points a row at a new location.
    pub(crate) fn relocate(&mut self, index: u32, memory: ArchetypeId, slot: usize) {
        if let Some(row) = self.rows.get_mut(index as usize) {
            row.memory = Some(memory);
            row.slot = slot;
        }
    }

    /// Patches the slot of an entity swapped into `slot`, optionally
    /// invalidating its outstanding handles.
    pub(crate) fn patch_displaced(&mut self, index: u32, slot: usize, bump_generation: bool) {
        if let Some(row) = self.rows.get_mut(index as usize) {
            row.slot = slot;
            if bump_generation {
                row.generation = row.generation.wrapping_add(1);
            }
        }
    }

    /// Flags a valid entity for deferred destruction. Returns false if the
    /// handle is invalid or already flagged.
    pub(crate) fn mark_destroy(&mut self, entity: Entity) -> bool {
        if !self.is_valid(entity) {
            return false;
        }
        let row = &mut self.rows[entity.index() as usize];
        !std::mem::replace(&mut row.pending_destroy, true)
    }

    /// Checks if a row is flagged for deferred destruction.
    #[must_use]
    pub fn is_marked(&self, index: u32) -> bool {
        self.rows
            .get(index as usize)
            .is_some_and(|row| row.pending_destroy)
    }

    /// Indices of flagged rows in ascending order.
    pub(crate) fn marked(&self) -> Vec<u32> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.pending_destroy)
            .map(|(index, _)| index as u32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(id: u32) -> ArchetypeId {
        ArchetypeId(id)
    }

    #[test]
    fn test_entity_roundtrip() {
        let entity = Entity::new(12345, 67890);
        assert_eq!(entity.index(), 12345);
        assert_eq!(entity.generation(), 67890);
        assert_eq!(Entity::from_bits(entity.to_bits()), entity);
    }

    #[test]
    fn test_null_entity() {
        assert!(Entity::NULL.is_null());
        assert!(!Entity::new(0, 0).is_null());
        assert_eq!(Entity::default(), Entity::NULL);
        assert_eq!(Entity::NULL.to_string(), "entity(null)");
        assert_eq!(Entity::new(3, 1).to_string(), "entity(3v1)");
    }

    #[test]
    fn test_create_and_retire() {
        let mut table = EntityTable::new();
        let m = memory(0);
        let a = table.create(|_| Ok((m, 0))).unwrap();
        let b = table.create(|_| Ok((m, 1))).unwrap();
        assert_eq!((a.index(), a.generation()), (0, 1));
        assert_eq!(b.index(), 1);
        assert_eq!(table.len(), 2);

        table.retire(a.index());
        assert!(!table.is_valid(a));
        assert_eq!(table.locate(a), Err(EcsError::InvalidEntity(a)));
        assert_eq!(table.len(), 1);

        // Freed index is reused with a newer generation.
        let c = table.create(|_| Ok((m, 0))).unwrap();
        assert_eq!(c.index(), 0);
        assert_eq!(c.generation(), 3);
        assert!(table.is_valid(c));
        assert!(!table.is_valid(a));
    }

    #[test]
    fn test_failed_create_returns_index() {
        let mut table = EntityTable::new();
        let m = memory(0);
        let err = table.create(|_| Err(EcsError::IndexOutOfRange { index: 0, len: 0 }));
        assert!(err.is_err());
        assert_eq!(table.capacity(), 0);

        let a = table.create(|_| Ok((m, 0))).unwrap();
        table.retire(a.index());
        assert!(table.create(|_| Err(EcsError::InvalidConfig(String::new()))).is_err());
        assert_eq!(table.create(|i| Ok((m, i as usize))).unwrap().index(), 0);
    }

    #[test]
    fn test_patch_displaced() {
        let mut table = EntityTable::new();
        let m = memory(0);
        let a = table.create(|_| Ok((m, 5))).unwrap();
        table.patch_displaced(a.index(), 2, false);
        assert_eq!(table.locate(a), Ok((m, 2)));
        table.patch_displaced(a.index(), 1, true);
        assert!(!table.is_valid(a));
        assert_eq!(table.locate_index(a.index()), Some((m, 1)));
        assert_eq!(
            table.handle_at(a.index()),
            Some(Entity::new(a.index(), a.generation() + 1))
        );
    }

    #[test]
    fn test_mark_destroy_deduplicates() {
        let mut table = EntityTable::new();
        let m = memory(0);
        let a = table.create(|_| Ok((m, 0))).unwrap();
        let b = table.create(|_| Ok((m, 1))).unwrap();
        assert!(table.mark_destroy(b));
        assert!(!table.mark_destroy(b));
        assert!(!table.mark_destroy(Entity::new(a.index(), 7)));
        assert!(table.is_marked(b.index()));
        assert_eq!(table.marked(), vec![b.index()]);
        table.retire(b.index());
        assert!(table.marked().is_empty());
    }
}
