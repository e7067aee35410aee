//! # Tessera Core
//!
//! Archetype-based Entity Component System storage engine:
//! - Chunked, column-grouped storage for plain-old-data components
//! - Typed lists for components that own heap data
//! - Generation-checked entity handles
//! - Systems that scan matching archetypes and defer structural changes
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{Filter, World};
//!
//! let mut world = World::new();
//! let mv = world.register_trivial::<Move>()?;
//! for _ in 0..16 {
//!     world.spawn(&[mv])?;
//! }
//! world.add_system_fn(Filter::from_require([mv]), |ctx| {
//!     // read and write components, record structural changes
//! });
//! world.on_update();
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod memory;

pub use config::WorldConfig;
pub use ecs::{
    Archetype, ArchetypeCatalog, ArchetypeId, ArchetypeMemory, CmdBuffer, Command, Component,
    ComponentInfo, ComponentRegistry, ComponentType, Entity, EntityLocator, EntityTable, Filter,
    FilterBuilder, FilterId, FnSystem, ManagedLocator, ReplayReport, SkippedCommand, SlotIndex,
    StorageKind, System, SystemContext, TrivialLocator, Viewer, ViewerIter, World,
};
pub use error::{EcsError, EcsResult};
pub use memory::{ChunkedStore, ColumnSpec, ListStore};
