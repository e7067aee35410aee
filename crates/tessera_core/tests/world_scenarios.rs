//! End-to-end world scenarios: destroy compaction, component moves and
//! deferred structural changes during a scan.

use bytemuck::{Pod, Zeroable};
use tessera_core::{Archetype, CmdBuffer, ComponentType, EcsError, Entity, Filter, World};

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Move {
    velocity: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Jump {
    height: f32,
    count: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct Armor(u32);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Tag(String);

fn setup() -> (World, ComponentType, ComponentType) {
    let mut world = World::new();
    let mv = world.register_trivial::<Move>().unwrap();
    let jump = world.register_trivial::<Jump>().unwrap();
    (world, mv, jump)
}

#[test]
fn test_destroy_compacts_last_slot_into_hole() {
    let (mut world, mv, jump) = setup();
    let entities: Vec<Entity> = (0..16).map(|_| world.spawn(&[mv, jump]).unwrap()).collect();

    let before: Vec<_> = {
        let memory = world.find_memory(&[mv, jump]).unwrap();
        (0..16).map(|slot| memory.entity_at(slot).unwrap()).collect()
    };
    world.destroy_entity(entities[7]).unwrap();

    assert_eq!(world.entity_count(), 15);
    let memory = world.find_memory(&[mv, jump]).unwrap();
    assert_eq!(memory.len(), 15);
    assert_eq!(memory.entity_at(7), Some(before[15]));
    for slot in (0..15).filter(|&slot| slot != 7) {
        assert_eq!(memory.entity_at(slot), Some(before[slot]));
    }
    assert_eq!(memory.viewer().iter().count(), 15);
}

#[test]
fn test_add_component_keeps_values() {
    let (mut world, mv, jump) = setup();
    let entity = world.spawn(&[mv]).unwrap();
    world.get_trivial_mut::<Move>(entity).unwrap().velocity = 12.415_25;

    world.add_component(entity, jump).unwrap();
    assert!(world.has_component(entity, mv).unwrap());
    assert!(world.has_component(entity, jump).unwrap());
    assert_eq!(world.get_trivial::<Move>(entity).unwrap().velocity, 12.415_25);
    let jumped = world.get_trivial::<Jump>(entity).unwrap();
    assert_eq!((jumped.height, jumped.count), (0.0, 0));

    assert_eq!(
        world.add_component(entity, jump),
        Err(EcsError::DuplicateComponentType(jump))
    );
}

#[test]
fn test_commands_recorded_during_scan() {
    let (mut world, mv, _) = setup();
    let armor = world.register_trivial::<Armor>().unwrap();
    let entities: Vec<Entity> = (0..10)
        .map(|i| {
            let entity = world.spawn(&[mv]).unwrap();
            world.get_trivial_mut::<Move>(entity).unwrap().velocity = i as f32;
            entity
        })
        .collect();

    world.add_system_fn(Filter::from_require([mv]), move |ctx| {
        for at in ctx.viewer() {
            let Some(entity) = ctx.entity_at(at) else {
                continue;
            };
            match at.slot {
                2 => ctx.commands().destroy_entity(entity),
                4 => ctx.commands().add_component(entity, armor),
                _ => {}
            }
        }
    });

    let report = world.on_update();
    assert!(report.is_clean());
    assert_eq!(report.applied, 2);
    assert_eq!(world.entity_count(), 9);
    assert!(!world.is_valid_entity(entities[2]));
    assert!(world.has::<Armor>(entities[4]).unwrap());
    assert_eq!(world.get_trivial::<Armor>(entities[4]).unwrap().0, 0);

    for (i, &entity) in entities.iter().enumerate() {
        if i == 2 {
            continue;
        }
        let entity = world.entity_at(entity.index()).unwrap();
        assert_eq!(world.get_trivial::<Move>(entity).unwrap().velocity, i as f32);
    }
}

#[test]
fn test_filtered_destroys_and_adds() {
    let (mut world, mv, jump) = setup();
    let mut buffer = CmdBuffer::new();
    for i in 0..16 {
        let entity = world.spawn(&[mv]).unwrap();
        if i % 3 == 0 {
            buffer.destroy_entity(entity);
        } else {
            buffer.add_component(entity, jump);
        }
    }

    let report = world.apply_commands(&mut buffer);
    assert!(report.is_clean());
    assert_eq!(world.entity_count(), 10);
    assert_eq!(world.find_memory(&[mv, jump]).unwrap().len(), 10);
    assert!(world.find_memory(&[mv]).unwrap().is_empty());
}

#[test]
fn test_stale_handle_rejected() {
    let (mut world, mv, jump) = setup();
    let entity = world.spawn(&[mv]).unwrap();
    world.destroy_entity(entity).unwrap();

    assert!(!world.is_valid_entity(entity));
    let stale = EcsError::InvalidEntity(entity);
    assert_eq!(world.get_trivial::<Move>(entity).err(), Some(stale.clone()));
    assert_eq!(world.has_component(entity, mv), Err(stale.clone()));
    assert_eq!(world.add_component(entity, jump), Err(stale.clone()));
    assert_eq!(world.remove_component(entity, mv), Err(stale));

    // The row comes back with a newer generation.
    let fresh = world.spawn(&[mv]).unwrap();
    assert_eq!(fresh.index(), entity.index());
    assert!(fresh.generation() > entity.generation());
}

#[test]
fn test_registration_and_interning() {
    let (mut world, mv, jump) = setup();
    assert_eq!(world.register_trivial::<Move>().unwrap(), mv);
    let tag = world.register_managed::<Tag>().unwrap();
    assert_eq!(world.register_managed::<Tag>().unwrap(), tag);
    assert!(matches!(
        world.register_managed::<Move>(),
        Err(EcsError::StorageMismatch { .. })
    ));

    let base = Archetype::new([mv, tag]).unwrap();
    assert_eq!(base.attach(jump).unwrap().detach(jump).unwrap(), base);
    assert_eq!(
        Archetype::new([tag, jump, mv]).unwrap(),
        Archetype::new([mv, jump, tag]).unwrap()
    );

    let a = world.spawn(&[tag, mv, jump]).unwrap();
    let b = world.spawn(&[jump, tag, mv]).unwrap();
    assert_eq!(world.catalog().len(), 1);
    assert!(std::ptr::eq(
        world.memory_of(a).unwrap(),
        world.memory_of(b).unwrap()
    ));
}

#[test]
fn test_managed_values_follow_moves() {
    let (mut world, mv, jump) = setup();
    let tag = world.register_managed::<Tag>().unwrap();
    let entities: Vec<Entity> = (0..5)
        .map(|i| {
            let entity = world.spawn(&[mv, tag]).unwrap();
            world.get_managed_mut::<Tag>(entity).unwrap().0 = format!("e{i}");
            entity
        })
        .collect();

    world.add_component(entities[1], jump).unwrap();
    world.remove_component(entities[3], tag).unwrap();

    assert_eq!(world.get_managed::<Tag>(entities[1]).unwrap().0, "e1");
    assert!(!world.has::<Tag>(entities[3]).unwrap());
    for i in [0, 2, 4] {
        assert_eq!(world.get_managed::<Tag>(entities[i]).unwrap().0, format!("e{i}"));
    }

    for (_, memory) in world.memories() {
        let lists_match = memory
            .archetype()
            .managed_types()
            .iter()
            .all(|&ty| memory.managed_column(ty).map(|column| column.len()) == Some(memory.len()));
        assert!(lists_match);
    }
}
