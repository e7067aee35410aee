//! # ECS World
//!
//! The central container: component registry, archetype catalog, one
//! archetype memory per interned archetype, the entity table, filters and
//! systems.
//!
//! ## Tick
//!
//! [`World::on_update`] runs in two phases:
//!
//! 1. **Scan**: every system runs once per matching memory and may only
//!    record structural changes in the command buffer.
//! 2. **Replay**: destroys first, then creates and component changes in
//!    recorded order.

use std::fmt;
use std::rc::Rc;

use bytemuck::Pod;

use super::archetype::Archetype;
use super::catalog::{ArchetypeCatalog, ArchetypeId};
use super::command::{CmdBuffer, Command};
use super::component::{Component, ComponentRegistry, ComponentType};
use super::entity::{Entity, EntityTable};
use super::storage::ArchetypeMemory;
use super::system::{Filter, FilterId, FnSystem, System, SystemContext};
use crate::config::WorldConfig;
use crate::error::{EcsError, EcsResult};
use crate::memory::pair_mut;

/// A buffered command that could not be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedCommand {
    /// The command as recorded.
    pub command: Command,
    /// Why it was skipped.
    pub reason: EcsError,
}

/// Outcome of one command-buffer replay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Commands applied.
    pub applied: usize,
    /// Commands skipped, in recorded order per phase.
    pub skipped: Vec<SkippedCommand>,
}

impl ReplayReport {
    /// Checks if every command was applied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    fn skip(&mut self, command: Command, reason: EcsError) {
        tracing::warn!(command = %command, reason = %reason, "skipping buffered command");
        self.skipped.push(SkippedCommand { command, reason });
    }
}

struct FilterMatch {
    filter: Filter,
    matched: Vec<ArchetypeId>,
}

struct SystemEntry {
    system: Box<dyn System>,
    filter: FilterId,
}

/// Entity/component storage with archetype interning and deferred
/// structural changes.
///
/// # Example
///
/// ```rust,ignore
/// let mut world = World::new();
/// let mv = world.register_trivial::<Move>()?;
/// let entity = world.spawn(&[mv])?;
/// world.get_trivial_mut::<Move>(entity)?.velocity = 12.41525;
/// world.add_component(entity, world.register_trivial::<Jump>()?)?;
/// ```
pub struct World {
    config: WorldConfig,
    registry: ComponentRegistry,
    catalog: ArchetypeCatalog,
    /// Indexed by [`ArchetypeId`]; one memory per interned archetype.
    memories: Vec<ArchetypeMemory>,
    entities: EntityTable,
    filters: Vec<FilterMatch>,
    systems: Vec<SystemEntry>,
    commands: CmdBuffer,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("components", &self.registry.len())
            .field("archetypes", &self.catalog.len())
            .field("entities", &self.entities.len())
            .field("systems", &self.systems.len())
            .finish_non_exhaustive()
    }
}

impl World {
    /// Creates a world with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(WorldConfig::default())
    }

    /// Creates a world with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if `config` does not validate.
    pub fn with_config(config: WorldConfig) -> EcsResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: WorldConfig) -> Self {
        Self {
            config,
            registry: ComponentRegistry::new(),
            catalog: ArchetypeCatalog::new(),
            memories: Vec::new(),
            entities: EntityTable::new(),
            filters: Vec::new(),
            systems: Vec::new(),
            commands: CmdBuffer::new(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    // =========================================================================
    // Components and archetypes
    // =========================================================================

    /// The component registry.
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Registers `T` as a trivial component. Idempotent.
    ///
    /// # Errors
    ///
    /// See [`ComponentRegistry::register_trivial`].
    pub fn register_trivial<T: Pod + Default>(&mut self) -> EcsResult<ComponentType> {
        self.registry.register_trivial::<T>()
    }

    /// Registers `T` as a managed component. Idempotent.
    ///
    /// # Errors
    ///
    /// See [`ComponentRegistry::register_managed`].
    pub fn register_managed<T: Component>(&mut self) -> EcsResult<ComponentType> {
        self.registry.register_managed::<T>()
    }

    /// Registered type of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnregisteredComponent`] if `T` was never registered.
    pub fn component_type<T: 'static>(&self) -> EcsResult<ComponentType> {
        self.registry.lookup::<T>()
    }

    /// The archetype catalog.
    #[must_use]
    pub fn catalog(&self) -> &ArchetypeCatalog {
        &self.catalog
    }

    /// Canonical archetype of `id`.
    #[must_use]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Rc<Archetype>> {
        self.catalog.get(id)
    }

    /// Interns `archetype` and creates its memory if it is new.
    fn intern(&mut self, archetype: Archetype) -> EcsResult<ArchetypeId> {
        if let Some(id) = self.catalog.find(archetype.types()) {
            return Ok(id);
        }
        let archetype = Rc::new(archetype);
        let memory = ArchetypeMemory::new(Rc::clone(&archetype), &self.registry, &self.config)?;
        let (_, id) = self.catalog.try_add(Rc::clone(&archetype));
        debug_assert_eq!(id.index(), self.memories.len());
        tracing::debug!(
            archetype = %archetype,
            rows_per_chunk = memory.rows_per_chunk(),
            "created archetype memory"
        );
        self.memories.push(memory);

        for entry in &mut self.filters {
            if entry.filter.is_match(&archetype) {
                entry.matched.push(id);
            }
        }
        Ok(id)
    }

    /// Interns the archetype of `types` (any order) with its memory.
    ///
    /// # Errors
    ///
    /// - [`EcsError::DuplicateComponentType`] if a type repeats.
    /// - [`EcsError::ChunkTooSmall`] if a row does not fit the chunk size.
    pub fn ensure_archetype(&mut self, types: &[ComponentType]) -> EcsResult<ArchetypeId> {
        self.intern(Archetype::new(types.iter().copied())?)
    }

    /// Registers a new archetype, failing if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateArchetype`] for a known component set,
    /// plus the errors of [`World::ensure_archetype`].
    pub fn add_archetype(&mut self, types: &[ComponentType]) -> EcsResult<ArchetypeId> {
        let archetype = Archetype::new(types.iter().copied())?;
        if self.catalog.find(archetype.types()).is_some() {
            return Err(EcsError::DuplicateArchetype(archetype.to_string()));
        }
        self.intern(archetype)
    }

    // =========================================================================
    // Memories
    // =========================================================================

    /// Memory of an archetype.
    #[must_use]
    pub fn memory(&self, id: ArchetypeId) -> Option<&ArchetypeMemory> {
        self.memories.get(id.index())
    }

    /// Mutable memory of an archetype.
    ///
    /// Allows component reads and writes only; slots are allocated and
    /// released by the world.
    pub fn memory_mut(&mut self, id: ArchetypeId) -> Option<&mut ArchetypeMemory> {
        self.memories.get_mut(id.index())
    }

    /// Memory of the archetype with exactly `types` (any order).
    #[must_use]
    pub fn find_memory(&self, types: &[ComponentType]) -> Option<&ArchetypeMemory> {
        let mut sorted = types.to_vec();
        sorted.sort_unstable();
        let id = self.catalog.find(&sorted)?;
        self.memory(id)
    }

    /// Memory currently holding `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidEntity`] for a stale handle.
    pub fn memory_of(&self, entity: Entity) -> EcsResult<&ArchetypeMemory> {
        let (id, _) = self.entities.locate(entity)?;
        self.memory_ref(id)
    }

    /// Every memory, in archetype interning order.
    pub fn memories(&self) -> impl Iterator<Item = (ArchetypeId, &ArchetypeMemory)> {
        self.memories
            .iter()
            .enumerate()
            .map(|(i, memory)| (ArchetypeId(i as u32), memory))
    }

    fn memory_ref(&self, id: ArchetypeId) -> EcsResult<&ArchetypeMemory> {
        self.memories.get(id.index()).ok_or(EcsError::IndexOutOfRange {
            index: id.index(),
            len: self.memories.len(),
        })
    }

    fn memory_ref_mut(&mut self, id: ArchetypeId) -> EcsResult<&mut ArchetypeMemory> {
        let len = self.memories.len();
        self.memories
            .get_mut(id.index())
            .ok_or(EcsError::IndexOutOfRange {
                index: id.index(),
                len,
            })
    }

    // =========================================================================
    // Entity lifecycle
    // =========================================================================

    /// The entity table.
    #[must_use]
    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Checks if `entity` refers to a live entity.
    #[inline]
    #[must_use]
    pub fn is_valid_entity(&self, entity: Entity) -> bool {
        self.entities.is_valid(entity)
    }

    /// Current handle of the live entity at table index `index`.
    #[must_use]
    pub fn entity_at(&self, index: u32) -> Option<Entity> {
        self.entities.handle_at(index)
    }

    /// Creates an entity with `archetype`, interning it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::ChunkTooSmall`] if a new memory cannot be built.
    pub fn create_entity(&mut self, archetype: Archetype) -> EcsResult<Entity> {
        let id = self.intern(archetype)?;
        self.create_in(id)
    }

    /// Creates an entity with the components `types` (any order).
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateComponentType`] if a type repeats, plus
    /// the errors of [`World::create_entity`].
    pub fn spawn(&mut self, types: &[ComponentType]) -> EcsResult<Entity> {
        self.create_entity(Archetype::new(types.iter().copied())?)
    }

    /// Creates an entity in an interned archetype.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::IndexOutOfRange`] for an unknown `id`.
    pub fn create_in(&mut self, id: ArchetypeId) -> EcsResult<Entity> {
        let len = self.memories.len();
        let memory = self
            .memories
            .get_mut(id.index())
            .ok_or(EcsError::IndexOutOfRange {
                index: id.index(),
                len,
            })?;
        self.entities
            .create(|index| Ok((id, memory.allocate(index)?)))
    }

    /// Destroys an entity.
    ///
    /// The entity moved into the freed slot keeps its data but its old
    /// handles become invalid; fetch the new one with [`World::entity_at`].
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidEntity`] for a stale handle.
    pub fn destroy_entity(&mut self, entity: Entity) -> EcsResult<()> {
        self.entities.locate(entity)?;
        self.destroy_row(entity)
    }

    /// Destroys the row of `entity` without checking its generation.
    fn destroy_row(&mut self, entity: Entity) -> EcsResult<()> {
        let index = entity.index();
        let (id, slot) = self
            .entities
            .locate_index(index)
            .ok_or(EcsError::InvalidEntity(entity))?;
        let moved = self.memory_ref_mut(id)?.release(slot)?;
        if let Some(moved) = moved.filter(|&moved| moved != index) {
            self.entities.patch_displaced(moved, slot, true);
        }
        self.entities.retire(index);
        Ok(())
    }

    /// Adds component type `ty` to an entity, moving it to the derived
    /// archetype. The new component starts at its default value.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidEntity`] for a stale handle.
    /// - [`EcsError::DuplicateComponentType`] if the entity already has `ty`.
    pub fn add_component(&mut self, entity: Entity, ty: ComponentType) -> EcsResult<()> {
        self.entities.locate(entity)?;
        self.reshape_row(entity, |archetype| archetype.attach(ty))
    }

    /// Removes component type `ty` from an entity.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidEntity`] for a stale handle.
    /// - [`EcsError::ComponentNotFound`] if the entity lacks `ty`.
    pub fn remove_component(&mut self, entity: Entity, ty: ComponentType) -> EcsResult<()> {
        self.entities.locate(entity)?;
        self.reshape_row(entity, |archetype| archetype.detach(ty))
    }

    /// Moves the row of `entity` to the archetype derived from its current
    /// one, without checking the generation. Neither the moved nor the
    /// displaced entity gets a new generation.
    fn reshape_row(
        &mut self,
        entity: Entity,
        derive: impl FnOnce(&Archetype) -> EcsResult<Archetype>,
    ) -> EcsResult<()> {
        let index = entity.index();
        let (source, slot) = self
            .entities
            .locate_index(index)
            .ok_or(EcsError::InvalidEntity(entity))?;
        let derived = {
            let current: &Archetype = self.catalog.get(source).ok_or(EcsError::IndexOutOfRange {
                index: source.index(),
                len: self.catalog.len(),
            })?;
            derive(current)?
        };
        let target = self.intern(derived)?;
        if target == source {
            return Ok(());
        }
        let len = self.memories.len();
        if source.index() >= len || target.index() >= len {
            return Err(EcsError::IndexOutOfRange {
                index: source.index().max(target.index()),
                len,
            });
        }

        let (from, to) = pair_mut(&mut self.memories, source.index(), target.index());
        let (new_slot, moved) = from.move_to(slot, to)?;
        self.entities.relocate(index, target, new_slot);
        if let Some(moved) = moved.filter(|&moved| moved != index) {
            self.entities.patch_displaced(moved, slot, false);
        }
        Ok(())
    }

    // =========================================================================
    // Typed component access
    // =========================================================================

    /// Checks if an entity has component type `ty`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidEntity`] for a stale handle.
    pub fn has_component(&self, entity: Entity, ty: ComponentType) -> EcsResult<bool> {
        Ok(self.memory_of(entity)?.archetype().contains(ty))
    }

    /// Checks if an entity has component `T`. Unregistered types are never
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidEntity`] for a stale handle.
    pub fn has<T: 'static>(&self, entity: Entity) -> EcsResult<bool> {
        let memory = self.memory_of(entity)?;
        Ok(self
            .registry
            .get::<T>()
            .is_some_and(|ty| memory.archetype().contains(ty)))
    }

    /// Trivial component `T` of an entity.
    ///
    /// The reference is valid until the next structural change.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidEntity`] for a stale handle.
    /// - [`EcsError::UnregisteredComponent`] if `T` was never registered.
    /// - [`EcsError::ComponentNotFound`] if the entity lacks `T`.
    pub fn get_trivial<T: Pod>(&self, entity: Entity) -> EcsResult<&T> {
        let (id, slot) = self.entities.locate(entity)?;
        let ty = self.registry.lookup::<T>()?;
        self.memory_ref(id)?.get_trivial(slot, ty)
    }

    /// Mutable trivial component `T` of an entity.
    ///
    /// # Errors
    ///
    /// Same as [`World::get_trivial`].
    pub fn get_trivial_mut<T: Pod>(&mut self, entity: Entity) -> EcsResult<&mut T> {
        let (id, slot) = self.entities.locate(entity)?;
        let ty = self.registry.lookup::<T>()?;
        self.memory_ref_mut(id)?.get_trivial_mut(slot, ty)
    }

    /// Managed component `T` of an entity.
    ///
    /// # Errors
    ///
    /// Same as [`World::get_trivial`].
    pub fn get_managed<T: Component>(&self, entity: Entity) -> EcsResult<&T> {
        let (id, slot) = self.entities.locate(entity)?;
        let ty = self.registry.lookup::<T>()?;
        self.memory_ref(id)?.get_managed(slot, ty)
    }

    /// Mutable managed component `T` of an entity.
    ///
    /// # Errors
    ///
    /// Same as [`World::get_trivial`].
    pub fn get_managed_mut<T: Component>(&mut self, entity: Entity) -> EcsResult<&mut T> {
        let (id, slot) = self.entities.locate(entity)?;
        let ty = self.registry.lookup::<T>()?;
        self.memory_ref_mut(id)?.get_managed_mut(slot, ty)
    }

    /// Sets trivial component `T`, registering and adding it if needed.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidEntity`] for a stale handle.
    /// - Registration errors of [`ComponentRegistry::register_trivial`].
    pub fn insert_trivial<T: Pod + Default>(&mut self, entity: Entity, value: T) -> EcsResult<()> {
        self.entities.locate(entity)?;
        let ty = self.registry.register_trivial::<T>()?;
        if !self.has_component(entity, ty)? {
            self.add_component(entity, ty)?;
        }
        *self.get_trivial_mut::<T>(entity)? = value;
        Ok(())
    }

    /// Sets managed component `T`, registering and adding it if needed.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidEntity`] for a stale handle.
    /// - Registration errors of [`ComponentRegistry::register_managed`].
    pub fn insert_managed<T: Component>(&mut self, entity: Entity, value: T) -> EcsResult<()> {
        self.entities.locate(entity)?;
        let ty = self.registry.register_managed::<T>()?;
        if !self.has_component(entity, ty)? {
            self.add_component(entity, ty)?;
        }
        *self.get_managed_mut::<T>(entity)? = value;
        Ok(())
    }

    // =========================================================================
    // Filters and systems
    // =========================================================================

    /// Registers a filter. Its match list is kept current as archetypes
    /// are created.
    pub fn add_filter(&mut self, filter: Filter) -> FilterId {
        let matched = self
            .catalog
            .iter()
            .filter(|(_, archetype)| filter.is_match(archetype))
            .map(|(id, _)| id)
            .collect();
        self.filters.push(FilterMatch { filter, matched });
        FilterId(self.filters.len() - 1)
    }

    /// Archetypes currently matching a registered filter.
    #[must_use]
    pub fn matched(&self, id: FilterId) -> &[ArchetypeId] {
        self.filters
            .get(id.0)
            .map(|entry| entry.matched.as_slice())
            .unwrap_or_default()
    }

    /// One-off match of `filter` against every known archetype.
    #[must_use]
    pub fn filter_entities(&self, filter: &Filter) -> Vec<ArchetypeId> {
        self.catalog
            .iter()
            .filter(|(_, archetype)| filter.is_match(archetype))
            .map(|(id, _)| id)
            .collect()
    }

    /// Adds a system; it runs on every [`World::on_update`] in insertion order.
    pub fn add_system(&mut self, system: impl System + 'static) -> FilterId {
        let filter = self.add_filter(system.filter());
        self.systems.push(SystemEntry {
            system: Box::new(system),
            filter,
        });
        filter
    }

    /// Adds a closure as a system.
    pub fn add_system_fn<F>(&mut self, filter: Filter, run: F) -> FilterId
    where
        F: FnMut(&mut SystemContext<'_>) + 'static,
    {
        self.add_system(FnSystem::new(filter, run))
    }

    /// The world's command buffer, replayed at the end of each tick.
    pub fn commands_mut(&mut self) -> &mut CmdBuffer {
        &mut self.commands
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Runs one tick: every system scans its matching memories, then the
    /// command buffer is replayed.
    pub fn on_update(&mut self) -> ReplayReport {
        for entry in &mut self.systems {
            let Some(filter) = self.filters.get(entry.filter.0) else {
                continue;
            };
            for id in &filter.matched {
                let Some(memory) = self.memories.get_mut(id.index()) else {
                    continue;
                };
                let mut ctx = SystemContext {
                    memory,
                    entities: &self.entities,
                    registry: &self.registry,
                    commands: &mut self.commands,
                };
                entry.system.update(&mut ctx);
            }
        }
        let commands = self.commands.take();
        self.replay(commands)
    }

    /// Replays and clears an external command buffer.
    pub fn apply_commands(&mut self, buffer: &mut CmdBuffer) -> ReplayReport {
        let commands = buffer.take();
        self.replay(commands)
    }

    /// Applies commands: destroys first, then the rest in recorded order.
    ///
    /// Handles are checked as of replay start. Component changes address
    /// their target by index afterwards, since destroys may have bumped the
    /// generation of a displaced target.
    fn replay(&mut self, commands: Vec<Command>) -> ReplayReport {
        let mut report = ReplayReport::default();
        let mut pending = vec![false; commands.len()];

        for (i, command) in commands.iter().enumerate() {
            match *command {
                Command::Destroy(entity) => {
                    if !self.entities.mark_destroy(entity) && !self.entities.is_valid(entity) {
                        report.skip(command.clone(), EcsError::InvalidEntity(entity));
                    }
                }
                Command::AddComponent(entity, _) | Command::RemoveComponent(entity, _) => {
                    if self.entities.is_valid(entity) {
                        pending[i] = true;
                    } else {
                        report.skip(command.clone(), EcsError::InvalidEntity(entity));
                    }
                }
                Command::Create(_) => pending[i] = true,
            }
        }

        // Marked rows were validated above, so these are the recorded handles.
        let destroyed: Vec<Entity> = self
            .entities
            .marked()
            .into_iter()
            .filter_map(|index| self.entities.handle_at(index))
            .collect();
        for &entity in &destroyed {
            match self.destroy_row(entity) {
                Ok(()) => report.applied += 1,
                Err(reason) => report.skip(Command::Destroy(entity), reason),
            }
        }

        for (command, pending) in commands.into_iter().zip(pending) {
            if !pending {
                continue;
            }
            let result = match &command {
                Command::Create(archetype) => self.create_entity(archetype.clone()).map(drop),
                Command::AddComponent(entity, ty) | Command::RemoveComponent(entity, ty) => {
                    let index = entity.index();
                    if destroyed
                        .binary_search_by_key(&index, |destroyed| destroyed.index())
                        .is_ok()
                    {
                        Err(EcsError::InvalidEntity(*entity))
                    } else if matches!(command, Command::AddComponent(..)) {
                        self.reshape_row(*entity, |archetype| archetype.attach(*ty))
                    } else {
                        self.reshape_row(*entity, |archetype| archetype.detach(*ty))
                    }
                }
                Command::Destroy(_) => Ok(()),
            };
            match result {
                Ok(()) => report.applied += 1,
                Err(reason) => report.skip(command, reason),
            }
        }

        tracing::debug!(
            applied = report.applied,
            skipped = report.skipped.len(),
            destroyed = destroyed.len(),
            "replayed command buffer"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::super::component::test_types::{Health, Jump, Move, Name};
    use super::*;

    fn world() -> (World, ComponentType, ComponentType, ComponentType) {
        let mut world = World::new();
        let mv = world.register_trivial::<Move>().unwrap();
        let jump = world.register_trivial::<Jump>().unwrap();
        let name = world.register_managed::<Name>().unwrap();
        (world, mv, jump, name)
    }

    #[test]
    fn test_create_and_destroy() {
        let (mut world, mv, jump, _) = world();
        let a = world.spawn(&[jump, mv]).unwrap();
        let b = world.spawn(&[mv, jump]).unwrap();
        assert_eq!(world.entity_count(), 2);
        assert_eq!(world.catalog().len(), 1);

        world.destroy_entity(a).unwrap();
        assert!(!world.is_valid_entity(a));
        assert_eq!(world.destroy_entity(a), Err(EcsError::InvalidEntity(a)));
        assert_eq!(world.entity_count(), 1);

        // `b` was swapped into slot 0 and its handle refreshed.
        assert!(!world.is_valid_entity(b));
        let b = world.entity_at(b.index()).unwrap();
        assert_eq!(world.memory_of(b).unwrap().entity_at(0), Some(b.index()));
    }

    #[test]
    fn test_stale_handle_everywhere() {
        let (mut world, mv, jump, _) = world();
        let e = world.spawn(&[mv]).unwrap();
        world.destroy_entity(e).unwrap();
        let stale = EcsError::InvalidEntity(e);
        assert_eq!(world.get_trivial::<Move>(e).err(), Some(stale.clone()));
        assert_eq!(world.has_component(e, mv).err(), Some(stale.clone()));
        assert_eq!(world.add_component(e, jump), Err(stale.clone()));
        assert_eq!(world.remove_component(e, mv), Err(stale));
    }

    #[test]
    fn test_add_and_remove_component() {
        let (mut world, mv, jump, name) = world();
        let e = world.spawn(&[mv, name]).unwrap();
        world.get_trivial_mut::<Move>(e).unwrap().velocity = 12.415_25;
        world.get_managed_mut::<Name>(e).unwrap().0 = "runner".into();

        world.add_component(e, jump).unwrap();
        assert!(world.is_valid_entity(e));
        assert!(world.has::<Jump>(e).unwrap());
        assert_eq!(world.get_trivial::<Move>(e).unwrap().velocity, 12.415_25);
        assert_eq!(*world.get_trivial::<Jump>(e).unwrap(), Jump::default());
        assert_eq!(world.get_managed::<Name>(e).unwrap().0, "runner");

        world.remove_component(e, name).unwrap();
        assert!(!world.has::<Name>(e).unwrap());
        assert_eq!(
            world.get_managed::<Name>(e).err(),
            Some(EcsError::ComponentNotFound(name))
        );
        assert_eq!(
            world.remove_component(e, name),
            Err(EcsError::ComponentNotFound(name))
        );
    }

    #[test]
    fn test_move_keeps_displaced_handle() {
        let (mut world, mv, jump, _) = world();
        let a = world.spawn(&[mv]).unwrap();
        let b = world.spawn(&[mv]).unwrap();
        world.get_trivial_mut::<Move>(b).unwrap().velocity = 3.0;

        world.add_component(a, jump).unwrap();
        assert!(world.is_valid_entity(a));
        assert!(world.is_valid_entity(b));
        assert_eq!(world.get_trivial::<Move>(b).unwrap().velocity, 3.0);
        assert_eq!(world.memory_of(b).unwrap().entity_at(0), Some(b.index()));
    }

    #[test]
    fn test_insert_registers_and_sets() {
        let (mut world, mv, _, _) = world();
        let e = world.spawn(&[mv]).unwrap();
        world.insert_trivial(e, Health(40)).unwrap();
        assert_eq!(*world.get_trivial::<Health>(e).unwrap(), Health(40));
        world.insert_trivial(e, Health(7)).unwrap();
        assert_eq!(*world.get_trivial::<Health>(e).unwrap(), Health(7));

        world.insert_managed(e, Name("tag".into())).unwrap();
        assert_eq!(world.get_managed::<Name>(e).unwrap().0, "tag");
    }

    #[test]
    fn test_unregistered_access() {
        let (mut world, mv, _, _) = world();
        let e = world.spawn(&[mv]).unwrap();
        assert!(matches!(
            world.get_trivial::<Health>(e),
            Err(EcsError::UnregisteredComponent(_))
        ));
        assert!(!world.has::<Health>(e).unwrap());
    }

    #[test]
    fn test_strict_archetype_registration() {
        let (mut world, mv, jump, _) = world();
        let id = world.add_archetype(&[mv, jump]).unwrap();
        assert!(matches!(
            world.add_archetype(&[jump, mv]),
            Err(EcsError::DuplicateArchetype(_))
        ));
        assert_eq!(world.ensure_archetype(&[jump, mv]).unwrap(), id);
        assert!(world.find_memory(&[jump, mv]).is_some());
        assert!(world.find_memory(&[jump]).is_none());
    }

    #[test]
    fn test_filters_follow_new_archetypes() {
        let (mut world, mv, jump, name) = world();
        world.ensure_archetype(&[mv]).unwrap();
        let movers = world.add_filter(Filter::builder().require(mv).exclude(name).build());
        assert_eq!(world.matched(movers).len(), 1);

        world.ensure_archetype(&[mv, jump]).unwrap();
        world.ensure_archetype(&[mv, name]).unwrap();
        world.ensure_archetype(&[jump]).unwrap();
        assert_eq!(world.matched(movers).len(), 2);
        assert_eq!(
            world.filter_entities(&Filter::from_require([jump])).len(),
            2
        );
    }

    #[test]
    fn test_system_scan_and_replay() {
        let (mut world, mv, jump, _) = world();
        for _ in 0..4 {
            world.spawn(&[mv]).unwrap();
        }
        world.add_system_fn(Filter::from_require([mv]), move |ctx| {
            let Ok(moves) = ctx.trivial_locator::<Move>() else {
                return;
            };
            for at in ctx.viewer() {
                if let Some(m) = moves.locate_mut(ctx.memory_mut(), at) {
                    m.velocity += 1.0;
                }
                if at.slot == 0 {
                    if let Some(entity) = ctx.entity_at(at) {
                        ctx.commands().add_component(entity, jump);
                    }
                }
            }
        });

        let report = world.on_update();
        assert!(report.is_clean());
        assert_eq!(report.applied, 1);
        assert_eq!(world.find_memory(&[mv]).unwrap().len(), 3);
        assert_eq!(world.find_memory(&[mv, jump]).unwrap().len(), 1);

        // The second tick scans both archetypes and moves another entity.
        world.on_update();
        assert_eq!(world.find_memory(&[mv, jump]).unwrap().len(), 2);
    }

    #[test]
    fn test_replay_reports_invalid_targets() {
        let (mut world, mv, jump, _) = world();
        let a = world.spawn(&[mv]).unwrap();
        let b = world.spawn(&[mv]).unwrap();
        world.destroy_entity(a).unwrap();
        let b = world.entity_at(b.index()).unwrap();

        let mut buffer = CmdBuffer::new();
        buffer.destroy_entity(a);
        buffer.add_component(b, jump);
        buffer.add_component(b, jump);
        buffer.destroy_entity(b);
        buffer.create_entity(Archetype::new([mv]).unwrap());

        let report = world.apply_commands(&mut buffer);
        assert!(buffer.is_empty());
        // destroy(b) and the create apply; both adds target a destroyed row.
        assert_eq!(report.applied, 2);
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(report.skipped[0].command, Command::Destroy(a));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn test_scan_writes_stay_in_step_with_entity_table() {
        use std::cell::Cell;

        let (mut world, mv, _, _) = world();
        let entities: Vec<Entity> = (0..4).map(|_| world.spawn(&[mv]).unwrap()).collect();
        let seen = Rc::new(Cell::new((0usize, 0usize)));
        let observed = Rc::clone(&seen);

        world.add_system_fn(Filter::from_require([mv]), move |ctx| {
            let Ok(moves) = ctx.trivial_locator::<Move>() else {
                return;
            };
            for at in ctx.viewer() {
                if let Some(m) = moves.locate_mut(ctx.memory_mut(), at) {
                    m.velocity = at.slot as f32 + 10.0;
                }
                if at.slot == 0 {
                    if let Some(entity) = ctx.entity_at(at) {
                        ctx.commands().destroy_entity(entity);
                    }
                }
            }
            // Nothing structural happens until the scan is over.
            observed.set((ctx.memory().len(), ctx.entities().len()));
        });

        let report = world.on_update();
        assert!(report.is_clean());
        assert_eq!(seen.get(), (4, 4));
        assert_eq!(world.entity_count(), 3);
        assert_eq!(world.find_memory(&[mv]).unwrap().len(), 3);

        for (i, &entity) in entities.iter().enumerate().skip(1) {
            let entity = world.entity_at(entity.index()).unwrap();
            let memory = world.memory_of(entity).unwrap();
            let (_, slot) = world.entities().locate(entity).unwrap();
            assert_eq!(memory.entity_at(slot), Some(entity.index()));
            assert_eq!(world.get_trivial::<Move>(entity).unwrap().velocity, i as f32 + 10.0);
        }
    }

    #[test]
    fn test_replay_reports_recorded_handles() {
        let (mut world, mv, jump, _) = world();
        let a = world.spawn(&[mv]).unwrap();
        let b = world.spawn(&[mv]).unwrap();
        let c = world.spawn(&[mv]).unwrap();

        let mut buffer = CmdBuffer::new();
        buffer.destroy_entity(a);
        buffer.add_component(a, jump);
        // `c` is displaced into slot 0 by the destroy, then still moved.
        buffer.add_component(c, jump);
        let report = world.apply_commands(&mut buffer);

        assert_eq!(report.applied, 2);
        assert_eq!(
            report.skipped,
            vec![SkippedCommand {
                command: Command::AddComponent(a, jump),
                reason: EcsError::InvalidEntity(a),
            }]
        );
        let c = world.entity_at(c.index()).unwrap();
        assert!(world.has_component(c, jump).unwrap());
        assert!(!world.has_component(b, jump).unwrap());

        assert_eq!(world.destroy_entity(a), Err(EcsError::InvalidEntity(a)));
    }

    #[test]
    fn test_replay_continues_after_error() {
        let (mut world, mv, jump, _) = world();
        let e = world.spawn(&[mv]).unwrap();
        let mut buffer = CmdBuffer::new();
        buffer.add_component(e, jump);
        buffer.add_component(e, jump);
        buffer.remove_component(e, mv);

        let report = world.apply_commands(&mut buffer);
        assert_eq!(report.applied, 2);
        assert_eq!(
            report.skipped[0].reason,
            EcsError::DuplicateComponentType(jump)
        );
        assert!(world.has_component(e, jump).unwrap());
        assert!(!world.has_component(e, mv).unwrap());
    }

    #[test]
    fn test_with_config_validates() {
        let config = WorldConfig {
            chunk_size: 0,
            ..WorldConfig::default()
        };
        assert!(matches!(
            World::with_config(config),
            Err(EcsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_small_chunks_rejected_on_intern() {
        let mut world = World::with_config(WorldConfig {
            chunk_size: 8,
            max_cached_chunks: 0,
        })
        .unwrap();
        let jump = world.register_trivial::<Jump>().unwrap();
        assert!(matches!(
            world.spawn(&[jump]),
            Err(EcsError::ChunkTooSmall { .. })
        ));
        assert_eq!(world.catalog().len(), 0);
        assert_eq!(world.entity_count(), 0);
    }
}
