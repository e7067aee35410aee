//! # Entity Component System
//!
//! Archetype-based storage: every distinct component set gets one
//! archetype memory, entities live in exactly one of them, and adding or
//! removing a component moves the entity between memories.
//!
//! ## Layout
//!
//! - Trivial (plain-old-data) components are packed per row inside
//!   fixed-size chunks.
//! - Managed components live in one typed list per column.
//! - Entity handles carry a generation checked on every access.

mod archetype;
mod catalog;
mod command;
mod component;
mod entity;
mod storage;
mod system;
mod world;

pub use archetype::Archetype;
pub use catalog::{ArchetypeCatalog, ArchetypeId};
pub use command::{CmdBuffer, Command};
pub use component::{Component, ComponentInfo, ComponentRegistry, ComponentType, StorageKind};
pub use entity::{Entity, EntityTable};
pub use storage::{
    ArchetypeMemory, EntityLocator, ManagedLocator, SlotIndex, TrivialLocator, Viewer, ViewerIter,
};
pub use system::{Filter, FilterBuilder, FilterId, FnSystem, System, SystemContext};
pub use world::{ReplayReport, SkippedCommand, World};
