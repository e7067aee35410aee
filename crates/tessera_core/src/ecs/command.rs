//! # Command Buffer
//!
//! Structural changes requested while systems scan. Systems only see one
//! archetype memory at a time and cannot reach the world, so creating,
//! destroying and re-shaping entities is recorded here and replayed by the
//! world once every system has run.

use std::fmt;

use super::archetype::Archetype;
use super::component::ComponentType;
use super::entity::Entity;

/// One recorded structural change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create an entity with the given archetype.
    Create(Archetype),
    /// Destroy an entity.
    Destroy(Entity),
    /// Add a component type to an entity.
    AddComponent(Entity, ComponentType),
    /// Remove a component type from an entity.
    RemoveComponent(Entity, ComponentType),
}

impl Command {
    /// Entity targeted by the command, if any.
    #[must_use]
    pub fn target(&self) -> Option<Entity> {
        match self {
            Self::Create(_) => None,
            Self::Destroy(entity)
            | Self::AddComponent(entity, _)
            | Self::RemoveComponent(entity, _) => Some(*entity),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(archetype) => write!(f, "create {archetype}"),
            Self::Destroy(entity) => write!(f, "destroy {entity}"),
            Self::AddComponent(entity, ty) => write!(f, "add {ty} to {entity}"),
            Self::RemoveComponent(entity, ty) => write!(f, "remove {ty} from {entity}"),
        }
    }
}

/// Append-only log of structural changes.
#[derive(Clone, Debug, Default)]
pub struct CmdBuffer {
    commands: Vec<Command>,
}

impl CmdBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the creation of an entity.
    pub fn create_entity(&mut self, archetype: Archetype) {
        self.commands.push(Command::Create(archetype));
    }

    /// Records the destruction of an entity.
    pub fn destroy_entity(&mut self, entity: Entity) {
        self.commands.push(Command::Destroy(entity));
    }

    /// Records adding a component type.
    pub fn add_component(&mut self, entity: Entity, ty: ComponentType) {
        self.commands.push(Command::AddComponent(entity, ty));
    }

    /// Records removing a component type.
    pub fn remove_component(&mut self, entity: Entity, ty: ComponentType) {
        self.commands.push(Command::RemoveComponent(entity, ty));
    }

    /// Number of recorded commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Checks if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Recorded commands in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    /// Removes every command.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Takes the recorded commands, leaving the buffer empty.
    pub(crate) fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }
}

impl<'a> IntoIterator for &'a CmdBuffer {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
