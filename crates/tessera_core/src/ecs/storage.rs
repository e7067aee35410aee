//! # Archetype Memory
//!
//! All component data of the entities sharing one archetype.
//!
//! One [`ChunkedStore`] holds the trivial columns plus a hidden column with
//! the entity index of every slot. One list per managed type holds the rest.
//! Every tier is allocated and released in lock-step, so slot `i` means the
//! same entity everywhere.
//!
//! ## Scanning
//!
//! ```rust,ignore
//! let moves = memory.trivial_locator::<Move>(move_ty)?;
//! for at in memory.viewer() {
//!     if let Some(m) = moves.locate_mut(&mut memory, at) {
//!         m.velocity *= 0.5;
//!     }
//! }
//! ```
//!
//! A viewer is a snapshot of the slot count. Allocating or releasing while
//! a viewer is in use yields wrong or missing rows (never unsafe memory);
//! structural changes during a scan belong in the command buffer.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use bytemuck::Pod;

use super::archetype::Archetype;
use super::component::{Component, ComponentRegistry, ComponentType};
use crate::config::WorldConfig;
use crate::error::{EcsError, EcsResult};
use crate::memory::{ChunkedStore, ColumnSpec, ComponentColumn, ListStore};

/// Position of one slot, split into chunk and in-chunk row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotIndex {
    /// Dense slot in `0..len`.
    pub slot: usize,
    /// Chunk holding the slot.
    pub chunk: usize,
    /// Row inside the chunk.
    pub row: usize,
}

/// Restartable snapshot of the occupied slots of one memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewer {
    len: usize,
    rows_per_chunk: usize,
}

impl Viewer {
    /// Slots covered by this snapshot.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if there is nothing to scan.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates slots in ascending order.
    #[inline]
    #[must_use]
    pub fn iter(&self) -> ViewerIter {
        ViewerIter {
            next: SlotIndex {
                slot: 0,
                chunk: 0,
                row: 0,
            },
            len: self.len,
            rows_per_chunk: self.rows_per_chunk,
        }
    }
}

impl IntoIterator for Viewer {
    type Item = SlotIndex;
    type IntoIter = ViewerIter;

    fn into_iter(self) -> ViewerIter {
        self.iter()
    }
}

/// Iterator over the slots of a [`Viewer`].
#[derive(Clone, Debug)]
pub struct ViewerIter {
    next: SlotIndex,
    len: usize,
    rows_per_chunk: usize,
}

impl Iterator for ViewerIter {
    type Item = SlotIndex;

    #[inline]
    fn next(&mut self) -> Option<SlotIndex> {
        if self.next.slot >= self.len {
            return None;
        }
        let current = self.next;
        self.next.slot += 1;
        self.next.row += 1;
        if self.next.row == self.rows_per_chunk {
            self.next.row = 0;
            self.next.chunk += 1;
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len.saturating_sub(self.next.slot);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ViewerIter {}

/// O(1) access to one trivial column during a scan.
///
/// Holds only the column's offset, so the memory is passed on every call.
/// Every access returns `None` for a memory of another archetype than the
/// one the locator was built from.
#[derive(Debug, Clone, Copy)]
pub struct TrivialLocator<T> {
    column: usize,
    offset: usize,
    /// Hash of the owning archetype.
    archetype: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Pod> TrivialLocator<T> {
    #[inline]
    fn range(&self, memory: &ArchetypeMemory, at: SlotIndex) -> Option<(usize, usize)> {
        if !self.belongs_to(memory) || at.slot >= memory.len() {
            return None;
        }
        let size = std::mem::size_of::<T>();
        let start = self.offset + at.row * size;
        Some((start, start + size))
    }

    /// Column index inside the chunked store.
    #[must_use]
    pub fn column(&self) -> usize {
        self.column
    }

    /// Checks if `memory` has the archetype this locator was built from.
    #[inline]
    #[must_use]
    pub fn belongs_to(&self, memory: &ArchetypeMemory) -> bool {
        memory.archetype.hash_value() == self.archetype
    }

    /// Component at `at`.
    #[inline]
    #[must_use]
    pub fn locate<'m>(&self, memory: &'m ArchetypeMemory, at: SlotIndex) -> Option<&'m T> {
        let (start, end) = self.range(memory, at)?;
        let bytes = memory.trivial.chunk_bytes(at.chunk)?.get(start..end)?;
        bytemuck::try_from_bytes(bytes).ok()
    }

    /// Mutable component at `at`.
    #[inline]
    pub fn locate_mut<'m>(
        &self,
        memory: &'m mut ArchetypeMemory,
        at: SlotIndex,
    ) -> Option<&'m mut T> {
        let (start, end) = self.range(memory, at)?;
        let bytes = memory.trivial.chunk_bytes_mut(at.chunk)?.get_mut(start..end)?;
        bytemuck::try_from_bytes_mut(bytes).ok()
    }

    /// Occupied rows of this column in one chunk, as a slice.
    #[must_use]
    pub fn chunk_slice<'m>(&self, memory: &'m ArchetypeMemory, chunk: usize) -> Option<&'m [T]> {
        if !self.belongs_to(memory) {
            return None;
        }
        let rows = memory.rows_in_chunk(chunk);
        let start = self.offset;
        let end = start + rows * std::mem::size_of::<T>();
        let bytes = memory.trivial.chunk_bytes(chunk)?.get(start..end)?;
        bytemuck::try_cast_slice(bytes).ok()
    }

    /// Mutable occupied rows of this column in one chunk.
    pub fn chunk_slice_mut<'m>(
        &self,
        memory: &'m mut ArchetypeMemory,
        chunk: usize,
    ) -> Option<&'m mut [T]> {
        if !self.belongs_to(memory) {
            return None;
        }
        let rows = memory.rows_in_chunk(chunk);
        let start = self.offset;
        let end = start + rows * std::mem::size_of::<T>();
        let bytes = memory.trivial.chunk_bytes_mut(chunk)?.get_mut(start..end)?;
        bytemuck::try_cast_slice_mut(bytes).ok()
    }
}

/// O(1) access to one managed column during a scan.
///
/// Like [`TrivialLocator`], it only resolves against the memory it was
/// built from.
pub struct ManagedLocator<T> {
    column: usize,
    archetype: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ManagedLocator<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ManagedLocator<T> {}

impl<T> fmt::Debug for ManagedLocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedLocator")
            .field("column", &self.column)
            .field("archetype", &self.archetype)
            .finish()
    }
}

impl<T: Component> ManagedLocator<T> {
    /// Component at `at`.
    #[inline]
    #[must_use]
    pub fn locate<'m>(&self, memory: &'m ArchetypeMemory, at: SlotIndex) -> Option<&'m T> {
        if memory.archetype.hash_value() != self.archetype {
            return None;
        }
        memory.managed_list::<T>(self.column)?.get(at.slot)
    }

    /// Mutable component at `at`.
    #[inline]
    pub fn locate_mut<'m>(
        &self,
        memory: &'m mut ArchetypeMemory,
        at: SlotIndex,
    ) -> Option<&'m mut T> {
        if memory.archetype.hash_value() != self.archetype {
            return None;
        }
        memory.managed_list_mut::<T>(self.column)?.get_mut(at.slot)
    }
}

/// Resolves slots to the entity index stored in the hidden column.
pub type EntityLocator = TrivialLocator<u32>;

/// Storage for every entity of one archetype.
pub struct ArchetypeMemory {
    archetype: Rc<Archetype>,
    trivial: ChunkedStore,
    managed: Vec<Box<dyn ComponentColumn>>,
    /// Default byte image per trivial column.
    defaults: Vec<Box<[u8]>>,
    /// Column of the hidden entity index, after the trivial columns.
    entity_column: usize,
}

impl ArchetypeMemory {
    /// Creates the storage for `archetype`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::ChunkTooSmall`] if one row does not fit a chunk.
    /// - [`EcsError::ComponentNotFound`] if a managed type is unknown to
    ///   `registry`.
    pub fn new(
        archetype: Rc<Archetype>,
        registry: &ComponentRegistry,
        config: &WorldConfig,
    ) -> EcsResult<Self> {
        let trivial_types = archetype.trivial_types();
        let mut specs = Vec::with_capacity(trivial_types.len() + 1);
        let mut defaults = Vec::with_capacity(trivial_types.len());
        for &ty in trivial_types {
            let spec = ty.column_spec()?;
            let default: Box<[u8]> = registry
                .default_bytes(ty)
                .map_or_else(|| vec![0; spec.size].into_boxed_slice(), Into::into);
            specs.push(spec);
            defaults.push(default);
        }
        specs.push(ColumnSpec::of::<u32>());

        let managed = archetype
            .managed_types()
            .iter()
            .map(|&ty| registry.new_column(ty).ok_or(EcsError::ComponentNotFound(ty)))
            .collect::<EcsResult<Vec<_>>>()?;

        let trivial = ChunkedStore::new(&specs, config.chunk_size, config.max_cached_chunks)?;
        Ok(Self {
            entity_column: trivial_types.len(),
            archetype,
            trivial,
            managed,
            defaults,
        })
    }

    /// The archetype stored here.
    #[inline]
    #[must_use]
    pub fn archetype(&self) -> &Rc<Archetype> {
        &self.archetype
    }

    /// Number of entities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.trivial.len()
    }

    /// Checks if no entity is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trivial.is_empty()
    }

    /// Rows per chunk for this archetype.
    #[inline]
    #[must_use]
    pub fn rows_per_chunk(&self) -> usize {
        self.trivial.rows_per_chunk()
    }

    /// Chunks in use.
    #[inline]
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.trivial.chunk_count()
    }

    /// The chunked store of trivial columns.
    #[must_use]
    pub fn chunks(&self) -> &ChunkedStore {
        &self.trivial
    }

    /// Type-erased list of a managed type.
    #[must_use]
    pub fn managed_column(&self, ty: ComponentType) -> Option<&dyn ComponentColumn> {
        let column = self.archetype.index_in_managed(ty)?;
        self.managed.get(column).map(AsRef::as_ref)
    }

    fn rows_in_chunk(&self, chunk: usize) -> usize {
        let per = self.rows_per_chunk();
        self.len().saturating_sub(chunk * per).min(per)
    }

    fn check_lock_step(&self) {
        debug_assert!(
            self.managed.iter().all(|list| list.len() == self.trivial.len()),
            "storage tiers out of step"
        );
    }

    /// Appends a slot for entity `entity`, filled with default values.
    ///
    /// # Errors
    ///
    /// Propagates store errors; none occur for a consistent memory.
    pub(crate) fn allocate(&mut self, entity: u32) -> EcsResult<usize> {
        let slot = self.trivial.allocate();
        for (column, default) in self.defaults.iter().enumerate() {
            self.trivial
                .column_bytes_mut(slot, column)?
                .copy_from_slice(default);
        }
        self.trivial
            .column_bytes_mut(slot, self.entity_column)?
            .copy_from_slice(bytemuck::bytes_of(&entity));
        for list in &mut self.managed {
            let managed_slot = list.allocate();
            debug_assert_eq!(managed_slot, slot);
        }
        self.check_lock_step();
        Ok(slot)
    }

    /// Entity index stored at `slot`.
    #[must_use]
    pub fn entity_at(&self, slot: usize) -> Option<u32> {
        self.trivial.get::<u32>(slot, self.entity_column).copied()
    }

    /// Releases `slot`, moving the last slot into it.
    ///
    /// Returns the entity now occupying `slot`, or `None` when `slot` was
    /// the last one.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::IndexOutOfRange`] if `slot` is not occupied.
    pub(crate) fn release(&mut self, slot: usize) -> EcsResult<Option<u32>> {
        let len = self.len();
        if slot >= len {
            return Err(EcsError::IndexOutOfRange { index: slot, len });
        }
        let moved = if slot + 1 == len {
            None
        } else {
            self.entity_at(len - 1)
        };
        self.trivial.release(slot)?;
        for list in &mut self.managed {
            list.release(slot)?;
        }
        self.check_lock_step();
        Ok(moved)
    }

    /// Moves the entity at `slot` into `target`.
    ///
    /// Components shared by both archetypes keep their values, components
    /// missing from `target` are dropped and target-only components start
    /// at their defaults. Returns the new slot in `target` and the entity
    /// relocated into `slot` here, if any.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::IndexOutOfRange`] if `slot` is not occupied.
    pub(crate) fn move_to(
        &mut self,
        slot: usize,
        target: &mut ArchetypeMemory,
    ) -> EcsResult<(usize, Option<u32>)> {
        let entity = self.entity_at(slot).ok_or(EcsError::IndexOutOfRange {
            index: slot,
            len: self.len(),
        })?;
        let new_slot = target.allocate(entity)?;

        for (column, &ty) in self.archetype.trivial_types().iter().enumerate() {
            let Some(target_column) = target.archetype.index_in_trivial(ty) else {
                continue;
            };
            let source = self.trivial.column_bytes(slot, column)?;
            target
                .trivial
                .column_bytes_mut(new_slot, target_column)?
                .copy_from_slice(source);
        }
        for (column, &ty) in self.archetype.managed_types().iter().enumerate() {
            let Some(target_column) = target.archetype.index_in_managed(ty) else {
                continue;
            };
            self.managed[column].move_element_to(
                slot,
                target.managed[target_column].as_mut(),
                new_slot,
            )?;
        }

        let moved = self.release(slot)?;
        Ok((new_slot, moved))
    }

    /// Snapshot of the occupied slots.
    #[inline]
    #[must_use]
    pub fn viewer(&self) -> Viewer {
        Viewer {
            len: self.len(),
            rows_per_chunk: self.rows_per_chunk(),
        }
    }

    /// Locator for a trivial column.
    ///
    /// # Errors
    ///
    /// - [`EcsError::ComponentNotFound`] if `ty` is not a trivial type of
    ///   this archetype.
    /// - [`EcsError::ColumnTypeMismatch`] if `T` does not have the column's size.
    pub fn trivial_locator<T: Pod>(&self, ty: ComponentType) -> EcsResult<TrivialLocator<T>> {
        let column = self
            .archetype
            .index_in_trivial(ty)
            .ok_or(EcsError::ComponentNotFound(ty))?;
        self.locator_for(column)
    }

    /// Locator for the hidden entity column.
    #[must_use]
    pub fn entity_locator(&self) -> EntityLocator {
        TrivialLocator {
            column: self.entity_column,
            offset: self.trivial.column_offset(self.entity_column).unwrap_or(0),
            archetype: self.archetype.hash_value(),
            _marker: PhantomData,
        }
    }

    fn locator_for<T: Pod>(&self, column: usize) -> EcsResult<TrivialLocator<T>> {
        let mismatch = EcsError::ColumnTypeMismatch {
            expected: std::any::type_name::<T>(),
        };
        if self.trivial.column_size(column) != Some(std::mem::size_of::<T>()) {
            return Err(mismatch);
        }
        let offset = self.trivial.column_offset(column).ok_or(mismatch)?;
        Ok(TrivialLocator {
            column,
            offset,
            archetype: self.archetype.hash_value(),
            _marker: PhantomData,
        })
    }

    /// Locator for a managed column.
    ///
    /// # Errors
    ///
    /// - [`EcsError::ComponentNotFound`] if `ty` is not a managed type of
    ///   this archetype.
    /// - [`EcsError::ColumnTypeMismatch`] if the list does not hold `T`.
    pub fn managed_locator<T: Component>(&self, ty: ComponentType) -> EcsResult<ManagedLocator<T>> {
        let column = self
            .archetype
            .index_in_managed(ty)
            .ok_or(EcsError::ComponentNotFound(ty))?;
        self.managed_list::<T>(column)
            .ok_or(EcsError::ColumnTypeMismatch {
                expected: std::any::type_name::<T>(),
            })?;
        Ok(ManagedLocator {
            column,
            archetype: self.archetype.hash_value(),
            _marker: PhantomData,
        })
    }

    fn managed_list<T: Component>(&self, column: usize) -> Option<&ListStore<T>> {
        self.managed.get(column)?.as_any().downcast_ref()
    }

    fn managed_list_mut<T: Component>(&mut self, column: usize) -> Option<&mut ListStore<T>> {
        self.managed.get_mut(column)?.as_any_mut().downcast_mut()
    }

    fn trivial_column<T: Pod>(&self, ty: ComponentType) -> EcsResult<usize> {
        let column = self
            .archetype
            .index_in_trivial(ty)
            .ok_or(EcsError::ComponentNotFound(ty))?;
        if self.trivial.column_size(column) == Some(std::mem::size_of::<T>()) {
            Ok(column)
        } else {
            Err(EcsError::ColumnTypeMismatch {
                expected: std::any::type_name::<T>(),
            })
        }
    }

    /// Trivial component of the entity at `slot`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::ComponentNotFound`] if `ty` is not a trivial type here.
    /// - [`EcsError::IndexOutOfRange`] if `slot` is not occupied.
    /// - [`EcsError::ColumnTypeMismatch`] if `T` does not match the column.
    pub fn get_trivial<T: Pod>(&self, slot: usize, ty: ComponentType) -> EcsResult<&T> {
        let column = self.trivial_column::<T>(ty)?;
        let bytes = self.trivial.column_bytes(slot, column)?;
        bytemuck::try_from_bytes(bytes).map_err(|_| EcsError::ColumnTypeMismatch {
            expected: std::any::type_name::<T>(),
        })
    }

    /// Mutable trivial component of the entity at `slot`.
    ///
    /// # Errors
    ///
    /// Same as [`ArchetypeMemory::get_trivial`].
    pub fn get_trivial_mut<T: Pod>(&mut self, slot: usize, ty: ComponentType) -> EcsResult<&mut T> {
        let column = self.trivial_column::<T>(ty)?;
        let bytes = self.trivial.column_bytes_mut(slot, column)?;
        bytemuck::try_from_bytes_mut(bytes).map_err(|_| EcsError::ColumnTypeMismatch {
            expected: std::any::type_name::<T>(),
        })
    }

    /// Managed component of the entity at `slot`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::ComponentNotFound`] if `ty` is not a managed type here.
    /// - [`EcsError::ColumnTypeMismatch`] if the list does not hold `T`.
    /// - [`EcsError::IndexOutOfRange`] if `slot` is not occupied.
    pub fn get_managed<T: Component>(&self, slot: usize, ty: ComponentType) -> EcsResult<&T> {
        let column = self
            .archetype
            .index_in_managed(ty)
            .ok_or(EcsError::ComponentNotFound(ty))?;
        let list = self
            .managed_list::<T>(column)
            .ok_or(EcsError::ColumnTypeMismatch {
                expected: std::any::type_name::<T>(),
            })?;
        list.get(slot).ok_or(EcsError::IndexOutOfRange {
            index: slot,
            len: list.len(),
        })
    }

    /// Mutable managed component of the entity at `slot`.
    ///
    /// # Errors
    ///
    /// Same as [`ArchetypeMemory::get_managed`].
    pub fn get_managed_mut<T: Component>(
        &mut self,
        slot: usize,
        ty: ComponentType,
    ) -> EcsResult<&mut T> {
        let column = self
            .archetype
            .index_in_managed(ty)
            .ok_or(EcsError::ComponentNotFound(ty))?;
        let list = self
            .managed_list_mut::<T>(column)
            .ok_or(EcsError::ColumnTypeMismatch {
                expected: std::any::type_name::<T>(),
            })?;
        let len = list.len();
        list.get_mut(slot)
            .ok_or(EcsError::IndexOutOfRange { index: slot, len })
    }
}

impl fmt::Debug for ArchetypeMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeMemory")
            .field("archetype", &self.archetype.to_string())
            .field("len", &self.len())
            .field("chunks", &self.chunk_count())
            .finish_non_exhaustive()
    }
}
