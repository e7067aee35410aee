//! # List Storage
//!
//! Growable arrays for managed components (types that own heap data and so
//! cannot live in raw chunk bytes). Index `i` of every list belongs to the
//! same slot as row `i` of the archetype's chunked store.

use std::any::Any;

use crate::error::{EcsError, EcsResult};

/// One index-parallel array of a managed component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListStore<T> {
    items: Vec<T>,
}

impl<T> Default for ListStore<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Default> ListStore<T> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a default value and returns its slot.
    pub fn allocate(&mut self) -> usize {
        self.items.push(T::default());
        self.items.len() - 1
    }

    /// Releases a slot by swapping the last element into it.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::IndexOutOfRange`] if `slot` is not occupied.
    pub fn release(&mut self, slot: usize) -> EcsResult<T> {
        if slot >= self.items.len() {
            return Err(EcsError::IndexOutOfRange {
                index: slot,
                len: self.items.len(),
            });
        }
        Ok(self.items.swap_remove(slot))
    }

    /// Number of elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Checks if the list is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element at `slot`.
    #[inline]
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&T> {
        self.items.get(slot)
    }

    /// Mutable element at `slot`.
    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.items.get_mut(slot)
    }

    /// All elements in slot order.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

/// Type-erased view of a [`ListStore`], so one archetype memory can hold
/// lists of different element types.
pub trait ComponentColumn: Any {
    /// Number of elements.
    fn len(&self) -> usize;

    /// Checks if the column is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a default value.
    fn allocate(&mut self) -> usize;

    /// Swap-removes the element at `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::IndexOutOfRange`] if `slot` is not occupied.
    fn release(&mut self, slot: usize) -> EcsResult<()>;

    /// Moves the value at `from` into slot `to` of `target`, leaving a
    /// default value behind.
    ///
    /// # Errors
    ///
    /// - [`EcsError::ColumnTypeMismatch`] if `target` stores another type.
    /// - [`EcsError::IndexOutOfRange`] if either slot is not occupied.
    fn move_element_to(
        &mut self,
        from: usize,
        target: &mut dyn ComponentColumn,
        to: usize,
    ) -> EcsResult<()>;

    /// Element type name, for diagnostics.
    fn element_name(&self) -> &'static str;

    /// Casts to `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Casts to `&mut dyn Any` for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Default + 'static> ComponentColumn for ListStore<T> {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn allocate(&mut self) -> usize {
        ListStore::allocate(self)
    }

    fn release(&mut self, slot: usize) -> EcsResult<()> {
        ListStore::release(self, slot).map(drop)
    }

    fn move_element_to(
        &mut self,
        from: usize,
        target: &mut dyn ComponentColumn,
        to: usize,
    ) -> EcsResult<()> {
        let len = self.items.len();
        let value = self
            .items
            .get_mut(from)
            .ok_or(EcsError::IndexOutOfRange { index: from, len })?;
        let target = target
            .as_any_mut()
            .downcast_mut::<Self>()
            .ok_or(EcsError::ColumnTypeMismatch {
                expected: std::any::type_name::<T>(),
            })?;
        let target_len = target.items.len();
        let slot = target.items.get_mut(to).ok_or(EcsError::IndexOutOfRange {
            index: to,
            len: target_len,
        })?;
        *slot = std::mem::take(value);
        Ok(())
    }

    fn element_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
