//! # Archetypes
//!
//! An archetype is the schema of a group of entities: a sorted,
//! duplicate-free set of component types. Archetypes never change after
//! construction; `attach`/`detach` derive new ones.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::component::ComponentType;
use crate::error::{EcsError, EcsResult};

/// Immutable sorted set of component types.
///
/// The trivial and managed subsets are kept alongside the full set so the
/// storage layer can resolve column indices with one binary search.
#[derive(Clone, Debug)]
pub struct Archetype {
    types: Box<[ComponentType]>,
    trivial: Box<[ComponentType]>,
    managed: Box<[ComponentType]>,
    hash: u64,
}

impl Archetype {
    /// Builds an archetype from types in any order.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateComponentType`] if a type repeats.
    pub fn new(types: impl IntoIterator<Item = ComponentType>) -> EcsResult<Self> {
        let mut types: Vec<ComponentType> = types.into_iter().collect();
        types.sort_unstable();
        if let Some(pair) = types.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(EcsError::DuplicateComponentType(pair[0]));
        }
        Ok(Self::from_sorted(types))
    }

    /// The archetype with no components.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_sorted(Vec::new())
    }

    fn from_sorted(types: Vec<ComponentType>) -> Self {
        let mut hasher = DefaultHasher::new();
        types.len().hash(&mut hasher);
        for ty in &types {
            ty.id().hash(&mut hasher);
        }
        let (trivial, managed): (Vec<_>, Vec<_>) =
            types.iter().copied().partition(|ty| ty.is_trivial());
        Self {
            types: types.into_boxed_slice(),
            trivial: trivial.into_boxed_slice(),
            managed: managed.into_boxed_slice(),
            hash: hasher.finish(),
        }
    }

    /// Number of component types.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Checks if this is the empty archetype.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All types in ascending id order.
    #[inline]
    #[must_use]
    pub fn types(&self) -> &[ComponentType] {
        &self.types
    }

    /// Trivial types in ascending id order.
    #[inline]
    #[must_use]
    pub fn trivial_types(&self) -> &[ComponentType] {
        &self.trivial
    }

    /// Managed types in ascending id order.
    #[inline]
    #[must_use]
    pub fn managed_types(&self) -> &[ComponentType] {
        &self.managed
    }

    /// Precomputed hash of the id sequence.
    #[inline]
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Position of `ty` in [`Archetype::types`].
    #[inline]
    #[must_use]
    pub fn index_of(&self, ty: ComponentType) -> Option<usize> {
        self.types.binary_search(&ty).ok()
    }

    /// Position of `ty` among the trivial types (its chunk column).
    #[inline]
    #[must_use]
    pub fn index_in_trivial(&self, ty: ComponentType) -> Option<usize> {
        self.trivial.binary_search(&ty).ok()
    }

    /// Position of `ty` among the managed types (its list).
    #[inline]
    #[must_use]
    pub fn index_in_managed(&self, ty: ComponentType) -> Option<usize> {
        self.managed.binary_search(&ty).ok()
    }

    /// Checks if `ty` is part of this archetype.
    #[inline]
    #[must_use]
    pub fn contains(&self, ty: ComponentType) -> bool {
        self.index_of(ty).is_some()
    }

    /// Derives an archetype with `ty` added.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateComponentType`] if `ty` is present.
    pub fn attach(&self, ty: ComponentType) -> EcsResult<Self> {
        match self.types.binary_search(&ty) {
            Ok(_) => Err(EcsError::DuplicateComponentType(ty)),
            Err(pos) => {
                let mut types = self.types.to_vec();
                types.insert(pos, ty);
                Ok(Self::from_sorted(types))
            }
        }
    }

    /// Derives an archetype with every type of `extra` added.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateComponentType`] if any type is already
    /// present or repeats in `extra`.
    pub fn attach_many(&self, extra: &[ComponentType]) -> EcsResult<Self> {
        Self::new(self.types.iter().chain(extra).copied())
    }

    /// Derives an archetype with `ty` removed.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::ComponentNotFound`] if `ty` is absent.
    pub fn detach(&self, ty: ComponentType) -> EcsResult<Self> {
        let pos = self
            .types
            .binary_search(&ty)
            .map_err(|_| EcsError::ComponentNotFound(ty))?;
        let mut types = self.types.to_vec();
        types.remove(pos);
        Ok(Self::from_sorted(types))
    }

    /// Derives an archetype with every type of `removed` taken out.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::ComponentNotFound`] if any type is absent or
    /// repeats in `removed`.
    pub fn detach_many(&self, removed: &[ComponentType]) -> EcsResult<Self> {
        let mut types = self.types.to_vec();
        for &ty in removed {
            let pos = types
                .binary_search(&ty)
                .map_err(|_| EcsError::ComponentNotFound(ty))?;
            types.remove(pos);
        }
        Ok(Self::from_sorted(types))
    }

    /// Checks if every type of `self` is in `other`.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.types.iter().all(|&ty| other.contains(ty))
    }

    /// Checks if `self` is a subset of `other` with fewer types.
    #[must_use]
    pub fn is_proper_subset_of(&self, other: &Self) -> bool {
        self.len() < other.len() && self.is_subset_of(other)
    }
}

impl PartialEq for Archetype {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.types == other.types
    }
}

impl Eq for Archetype {}

impl Hash for Archetype {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, ty) in self.types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "#{}", ty.id())?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::super::component::test_types::{Health, Jump, Move, Name};
    use super::super::component::ComponentRegistry;
    use super::*;

    fn types() -> (ComponentType, ComponentType, ComponentType, ComponentType) {
        let mut registry = ComponentRegistry::new();
        (
            registry.register_trivial::<Move>().unwrap(),
            registry.register_managed::<Name>().unwrap(),
            registry.register_trivial::<Jump>().unwrap(),
            registry.register_trivial::<Health>().unwrap(),
        )
    }

    #[test]
    fn test_sorted_and_split() {
        let (mv, name, jump, health) = types();
        let archetype = Archetype::new([health, name, mv]).unwrap();
        assert_eq!(archetype.types(), &[mv, name, health]);
        assert_eq!(archetype.trivial_types(), &[mv, health]);
        assert_eq!(archetype.managed_types(), &[name]);
        assert_eq!(archetype.index_in_trivial(health), Some(1));
        assert_eq!(archetype.index_in_managed(name), Some(0));
        assert_eq!(archetype.index_of(jump), None);
    }

    #[test]
    fn test_duplicate_rejected() {
        let (mv, _, jump, _) = types();
        assert_eq!(
            Archetype::new([mv, jump, mv]),
            Err(EcsError::DuplicateComponentType(mv))
        );
    }

    #[test]
    fn test_order_independent_equality() {
        let (mv, name, jump, _) = types();
        let a = Archetype::new([mv, name, jump]).unwrap();
        let b = Archetype::new([jump, mv, name]).unwrap();
        let c = Archetype::new([name]).unwrap().attach(jump).unwrap().attach(mv).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.hash_value(), c.hash_value());
    }

    #[test]
    fn test_attach_detach_round_trip() {
        let (mv, name, jump, health) = types();
        let base = Archetype::new([mv, health]).unwrap();
        for ty in [name, jump] {
            let grown = base.attach(ty).unwrap();
            assert!(grown.contains(ty));
            assert_eq!(grown.detach(ty).unwrap(), base);
        }
        assert_eq!(base.attach(mv), Err(EcsError::DuplicateComponentType(mv)));
        assert_eq!(base.detach(jump), Err(EcsError::ComponentNotFound(jump)));
    }

    #[test]
    fn test_attach_many_detach_many() {
        let (mv, name, jump, health) = types();
        let base = Archetype::new([mv]).unwrap();
        let full = base.attach_many(&[health, name, jump]).unwrap();
        assert_eq!(full.len(), 4);
        assert_eq!(full.detach_many(&[jump, name, health]).unwrap(), base);
        assert!(full.detach_many(&[jump, jump]).is_err());
        assert!(base.attach_many(&[jump, jump]).is_err());
    }

    #[test]
    fn test_proper_subset() {
        let (mv, name, jump, _) = types();
        let small = Archetype::new([mv]).unwrap();
        let big = Archetype::new([mv, name, jump]).unwrap();
        assert!(small.is_proper_subset_of(&big));
        assert!(!big.is_proper_subset_of(&small));
        assert!(!big.is_proper_subset_of(&big));
        assert!(Archetype::empty().is_proper_subset_of(&small));
    }

    #[test]
    fn test_display() {
        let (mv, _, jump, _) = types();
        let archetype = Archetype::new([jump, mv]).unwrap();
        assert_eq!(archetype.to_string(), "{#0, #2}");
        assert_eq!(Archetype::empty().to_string(), "{}");
    }
}
