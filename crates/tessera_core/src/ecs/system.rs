//! # Systems and Filters
//!
//! A system is a [`Filter`] plus a callback run once per matching archetype
//! memory per tick. Systems only get a [`SystemContext`]: the matched memory,
//! read access to the entity table and registry, and the command buffer.

use bytemuck::Pod;

use super::archetype::Archetype;
use super::command::CmdBuffer;
use super::component::{Component, ComponentRegistry, ComponentType};
use super::entity::{Entity, EntityTable};
use super::storage::{ArchetypeMemory, ManagedLocator, SlotIndex, TrivialLocator, Viewer};
use crate::error::EcsResult;

/// Component-set predicate over archetypes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    require: Vec<ComponentType>,
    exclude: Vec<ComponentType>,
}

fn sorted(types: impl IntoIterator<Item = ComponentType>) -> Vec<ComponentType> {
    let mut types: Vec<_> = types.into_iter().collect();
    types.sort_unstable();
    types.dedup();
    types
}

impl Filter {
    /// Creates a filter from required and excluded types.
    #[must_use]
    pub fn new(
        require: impl IntoIterator<Item = ComponentType>,
        exclude: impl IntoIterator<Item = ComponentType>,
    ) -> Self {
        Self {
            require: sorted(require),
            exclude: sorted(exclude),
        }
    }

    /// Filter with required types only.
    #[must_use]
    pub fn from_require(require: impl IntoIterator<Item = ComponentType>) -> Self {
        Self::new(require, [])
    }

    /// Starts an empty builder.
    #[must_use]
    pub fn builder() -> FilterBuilder {
        FilterBuilder::default()
    }

    /// Required types, ascending.
    #[must_use]
    pub fn require(&self) -> &[ComponentType] {
        &self.require
    }

    /// Excluded types, ascending.
    #[must_use]
    pub fn exclude(&self) -> &[ComponentType] {
        &self.exclude
    }

    /// Checks if `archetype` has every required type and no excluded one.
    #[must_use]
    pub fn is_match(&self, archetype: &Archetype) -> bool {
        self.require.iter().all(|&ty| archetype.contains(ty))
            && !self.exclude.iter().any(|&ty| archetype.contains(ty))
    }
}

/// Builder for [`Filter`].
#[derive(Clone, Debug, Default)]
pub struct FilterBuilder {
    require: Vec<ComponentType>,
    exclude: Vec<ComponentType>,
}

impl FilterBuilder {
    /// Adds a required type.
    #[must_use]
    pub fn require(mut self, ty: ComponentType) -> Self {
        self.require.push(ty);
        self
    }

    /// Adds an excluded type.
    #[must_use]
    pub fn exclude(mut self, ty: ComponentType) -> Self {
        self.exclude.push(ty);
        self
    }

    /// Finishes the filter.
    #[must_use]
    pub fn build(self) -> Filter {
        Filter::new(self.require, self.exclude)
    }
}

/// Handle to a filter registered with a world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FilterId(pub(crate) usize);

/// What a system sees while scanning one archetype memory.
///
/// Component values are written through locators; slots can only change
/// through the command buffer:
///
/// ```compile_fail
/// use tessera_core::SystemContext;
///
/// fn shrink(ctx: &mut SystemContext<'_>) {
///     let _ = ctx.memory_mut().release(0);
/// }
/// ```
pub struct SystemContext<'w> {
    pub(crate) memory: &'w mut ArchetypeMemory,
    pub(crate) entities: &'w EntityTable,
    pub(crate) registry: &'w ComponentRegistry,
    pub(crate) commands: &'w mut CmdBuffer,
}

impl SystemContext<'_> {
    /// The memory being scanned.
    #[must_use]
    pub fn memory(&self) -> &ArchetypeMemory {
        self.memory
    }

    /// Mutable access to the memory being scanned, for locator writes.
    pub fn memory_mut(&mut self) -> &mut ArchetypeMemory {
        self.memory
    }

    /// Snapshot of the memory's slots.
    #[must_use]
    pub fn viewer(&self) -> Viewer {
        self.memory.viewer()
    }

    /// The component registry.
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        self.registry
    }

    /// The entity table, read-only.
    #[must_use]
    pub fn entities(&self) -> &EntityTable {
        self.entities
    }

    /// Buffer for structural changes, applied after the scan.
    pub fn commands(&mut self) -> &mut CmdBuffer {
        self.commands
    }

    /// Registered type of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnregisteredComponent`](crate::EcsError::UnregisteredComponent)
    /// if `T` was never registered.
    pub fn component_type<T: 'static>(&self) -> EcsResult<ComponentType> {
        self.registry.lookup::<T>()
    }

    /// Locator for trivial component `T` in this memory.
    ///
    /// # Errors
    ///
    /// Fails if `T` is unregistered or not part of the archetype.
    pub fn trivial_locator<T: Pod>(&self) -> EcsResult<TrivialLocator<T>> {
        let ty = self.registry.lookup::<T>()?;
        self.memory.trivial_locator(ty)
    }

    /// Locator for managed component `T` in this memory.
    ///
    /// # Errors
    ///
    /// Fails if `T` is unregistered or not part of the archetype.
    pub fn managed_locator<T: Component>(&self) -> EcsResult<ManagedLocator<T>> {
        let ty = self.registry.lookup::<T>()?;
        self.memory.managed_locator(ty)
    }

    /// Current handle of the entity at `at`.
    #[must_use]
    pub fn entity_at(&self, at: SlotIndex) -> Option<Entity> {
        let index = *self.memory.entity_locator().locate(self.memory, at)?;
        self.entities.handle_at(index)
    }
}

/// A per-tick scan over every archetype memory matching its filter.
pub trait System {
    /// Archetypes this system scans. Read once, when the system is added.
    fn filter(&self) -> Filter;

    /// Scans one matching memory.
    fn update(&mut self, ctx: &mut SystemContext<'_>);
}

/// A closure adapted into a [`System`].
pub struct FnSystem<F> {
    filter: Filter,
    run: F,
}

impl<F> FnSystem<F>
where
    F: FnMut(&mut SystemContext<'_>),
{
    /// Wraps `run` with `filter`.
    pub fn new(filter: Filter, run: F) -> Self {
        Self { filter, run }
    }
}

impl<F> System for FnSystem<F>
where
    F: FnMut(&mut SystemContext<'_>),
{
    fn filter(&self) -> Filter {
        self.filter.clone()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        (self.run)(ctx);
    }
}
