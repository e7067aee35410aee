//! # Storage Error Types
//!
//! All errors that can occur in the storage engine. None of them are
//! transient: they signal a programming or configuration mistake and are
//! never retried.

use thiserror::Error;

use crate::ecs::{ComponentType, Entity, StorageKind};

/// Errors that can occur in the storage engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// A component type appears twice in an archetype, or was attached to an
    /// archetype that already holds it.
    #[error("duplicate component type {0}")]
    DuplicateComponentType(ComponentType),

    /// A component type was detached from, or looked up in, an archetype that
    /// does not hold it.
    #[error("component type {0} not found")]
    ComponentNotFound(ComponentType),

    /// The handle is stale, null, or out of range.
    #[error("invalid entity {0}")]
    InvalidEntity(Entity),

    /// The configured chunk cannot hold a single row.
    #[error("chunk of {chunk_size} bytes cannot hold one row of {row_size} bytes")]
    ChunkTooSmall {
        /// Configured chunk size in bytes.
        chunk_size: usize,
        /// Bytes needed by one row of trivial components.
        row_size: usize,
    },

    /// A slot or column index is outside the store.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// The current length.
        len: usize,
    },

    /// Strict archetype registration found an existing entry.
    #[error("archetype {0} already registered")]
    DuplicateArchetype(String),

    /// Byte size was requested for a managed component.
    #[error("component type {0} is managed and has no fixed byte size")]
    ManagedComponent(ComponentType),

    /// Typed access to a Rust type that was never registered.
    #[error("component `{0}` is not registered")]
    UnregisteredComponent(&'static str),

    /// The same Rust type was registered under both storage kinds.
    #[error("component `{name}` is registered as {registered}, requested as {requested}")]
    StorageMismatch {
        /// Rust type name.
        name: &'static str,
        /// Kind recorded at first registration.
        registered: StorageKind,
        /// Kind of the conflicting request.
        requested: StorageKind,
    },

    /// A trivial component needs a stronger alignment than chunk words give.
    #[error("component `{name}` requires alignment {align}, chunks provide {max}")]
    UnsupportedAlignment {
        /// Rust type name.
        name: &'static str,
        /// Alignment of the type.
        align: usize,
        /// Maximum supported alignment.
        max: usize,
    },

    /// A type-erased column was paired with a column of another type.
    #[error("column type mismatch: expected `{expected}`")]
    ColumnTypeMismatch {
        /// Element type of the source column.
        expected: &'static str,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for storage operations.
pub type EcsResult<T> = Result<T, EcsError>;
