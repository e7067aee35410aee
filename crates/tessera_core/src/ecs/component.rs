//! # Component Types
//!
//! Components are per-entity data records. Each Rust type used as a
//! component is registered once and gets a dense id and a storage kind:
//!
//! - **Trivial**: plain data (`bytemuck::Pod`), stored as raw bytes in chunks
//! - **Managed**: anything else with a `Default`, stored in a [`ListStore`]
//!
//! [`ListStore`]: crate::memory::ListStore

use std::any::TypeId;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytemuck::Pod;

use crate::error::{EcsError, EcsResult};
use crate::memory::{ColumnSpec, ComponentColumn, ListStore, CHUNK_ALIGN};

/// Marker for types usable as managed components.
///
/// Implemented for every `Default + 'static` type. Trivial components
/// additionally need `bytemuck::Pod`.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Default, Pod, Zeroable)]
/// #[repr(C)]
/// struct Move {
///     velocity: f32,
/// }
///
/// let mut world = World::new();
/// let ty = world.register_trivial::<Move>()?;
/// ```
pub trait Component: Default + 'static {}

impl<T: Default + 'static> Component for T {}

/// How a component type is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Raw bytes in chunk columns.
    Trivial {
        /// Size in bytes.
        size: usize,
        /// Alignment in bytes.
        align: usize,
    },
    /// One growable list per archetype.
    Managed,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trivial { .. } => f.write_str("trivial"),
            Self::Managed => f.write_str("managed"),
        }
    }
}

/// A registered component type.
///
/// Equality, ordering and hashing use the id only; the storage kind is
/// fixed at registration.
#[derive(Clone, Copy, Debug)]
pub struct ComponentType {
    id: u32,
    storage: StorageKind,
}

impl ComponentType {
    /// Dense id, assigned in registration order from 0.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u32 {
        self.id
    }

    /// Storage kind.
    #[inline]
    #[must_use]
    pub const fn storage(self) -> StorageKind {
        self.storage
    }

    /// Checks if the type is plain data.
    #[inline]
    #[must_use]
    pub const fn is_trivial(self) -> bool {
        matches!(self.storage, StorageKind::Trivial { .. })
    }

    /// Byte size of a trivial type.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::ManagedComponent`] for managed types.
    pub fn size_of(self) -> EcsResult<usize> {
        match self.storage {
            StorageKind::Trivial { size, .. } => Ok(size),
            StorageKind::Managed => Err(EcsError::ManagedComponent(self)),
        }
    }

    /// Column layout of a trivial type.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::ManagedComponent`] for managed types.
    pub fn column_spec(self) -> EcsResult<ColumnSpec> {
        match self.storage {
            StorageKind::Trivial { size, align } => Ok(ColumnSpec { size, align }),
            StorageKind::Managed => Err(EcsError::ManagedComponent(self)),
        }
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl PartialOrd for ComponentType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.id, self.storage)
    }
}

/// Registration record of one component type.
pub struct ComponentInfo {
    ty: ComponentType,
    name: &'static str,
    /// Byte image of `T::default()` for trivial types.
    default_bytes: Option<Box<[u8]>>,
    /// List constructor for managed types.
    make_column: Option<fn() -> Box<dyn ComponentColumn>>,
}

impl ComponentInfo {
    /// The registered type.
    #[must_use]
    pub fn ty(&self) -> ComponentType {
        self.ty
    }

    /// Rust type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Default value bytes, for trivial types.
    #[must_use]
    pub fn default_bytes(&self) -> Option<&[u8]> {
        self.default_bytes.as_deref()
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("ty", &self.ty)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn new_list<T: Component>() -> Box<dyn ComponentColumn> {
    Box::new(ListStore::<T>::new())
}

/// Assigns ids to component types, keyed by [`TypeId`].
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, u32>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as a trivial component, or returns its existing type.
    ///
    /// # Errors
    ///
    /// - [`EcsError::StorageMismatch`] if `T` is already registered as managed.
    /// - [`EcsError::UnsupportedAlignment`] if `T` needs more than 8-byte
    ///   alignment.
    pub fn register_trivial<T: Pod + Default>(&mut self) -> EcsResult<ComponentType> {
        let requested = StorageKind::Trivial {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
        };
        if let Some(existing) = self.get::<T>() {
            return Self::check_kind::<T>(existing, requested);
        }
        if std::mem::align_of::<T>() > CHUNK_ALIGN {
            return Err(EcsError::UnsupportedAlignment {
                name: std::any::type_name::<T>(),
                align: std::mem::align_of::<T>(),
                max: CHUNK_ALIGN,
            });
        }
        let default = T::default();
        let bytes: Box<[u8]> = bytemuck::bytes_of(&default).into();
        Ok(self.push::<T>(requested, Some(bytes), None))
    }

    /// Registers `T` as a managed component, or returns its existing type.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::StorageMismatch`] if `T` is already trivial.
    pub fn register_managed<T: Component>(&mut self) -> EcsResult<ComponentType> {
        if let Some(existing) = self.get::<T>() {
            return Self::check_kind::<T>(existing, StorageKind::Managed);
        }
        Ok(self.push::<T>(StorageKind::Managed, None, Some(new_list::<T>)))
    }

    fn check_kind<T: 'static>(
        existing: ComponentType,
        requested: StorageKind,
    ) -> EcsResult<ComponentType> {
        let same = matches!(
            (existing.storage, requested),
            (StorageKind::Trivial { .. }, StorageKind::Trivial { .. })
                | (StorageKind::Managed, StorageKind::Managed)
        );
        if same {
            Ok(existing)
        } else {
            Err(EcsError::StorageMismatch {
                name: std::any::type_name::<T>(),
                registered: existing.storage,
                requested,
            })
        }
    }

    fn push<T: 'static>(
        &mut self,
        storage: StorageKind,
        default_bytes: Option<Box<[u8]>>,
        make_column: Option<fn() -> Box<dyn ComponentColumn>>,
    ) -> ComponentType {
        let ty = ComponentType {
            id: self.infos.len() as u32,
            storage,
        };
        self.infos.push(ComponentInfo {
            ty,
            name: std::any::type_name::<T>(),
            default_bytes,
            make_column,
        });
        self.by_type.insert(TypeId::of::<T>(), ty.id);
        ty
    }

    /// Type registered for `T`, if any.
    #[must_use]
    pub fn get<T: 'static>(&self) -> Option<ComponentType> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|&id| self.infos[id as usize].ty)
    }

    /// Type registered for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnregisteredComponent`] if `T` was never registered.
    pub fn lookup<T: 'static>(&self) -> EcsResult<ComponentType> {
        self.get::<T>()
            .ok_or(EcsError::UnregisteredComponent(std::any::type_name::<T>()))
    }

    /// Registration record of a type.
    #[must_use]
    pub fn info(&self, ty: ComponentType) -> Option<&ComponentInfo> {
        self.infos.get(ty.id as usize)
    }

    /// Registered type with the given id.
    #[must_use]
    pub fn by_id(&self, id: u32) -> Option<ComponentType> {
        self.infos.get(id as usize).map(|info| info.ty)
    }

    /// Rust type name of a registered type.
    #[must_use]
    pub fn name_of(&self, ty: ComponentType) -> &'static str {
        self.info(ty).map_or("<unregistered>", |info| info.name)
    }

    /// Default value bytes of a trivial type.
    #[must_use]
    pub fn default_bytes(&self, ty: ComponentType) -> Option<&[u8]> {
        self.info(ty).and_then(ComponentInfo::default_bytes)
    }

    /// Creates an empty list for a managed type.
    #[must_use]
    pub fn new_column(&self, ty: ComponentType) -> Option<Box<dyn ComponentColumn>> {
        self.info(ty).and_then(|info| info.make_column).map(|make| make())
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Checks if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}
