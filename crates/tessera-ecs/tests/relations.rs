//! Relation scenarios across the public API: re-parenting, removed targets
//! and archetype reuse, and the events each step sends.

use std::sync::{Arc, Mutex};

use tessera_ecs::prelude::*;

#[derive(Debug, Clone, Default, PartialEq)]
struct Pos(f32, f32);
impl Component for Pos {}

#[derive(Debug, Clone, Default)]
struct ChildOf;
impl Component for ChildOf {
    const IS_RELATION: bool = true;
}

#[derive(Debug, Clone, Default)]
struct Likes;
impl Component for Likes {
    const IS_RELATION: bool = true;
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn setup() -> (World, ComponentId, ComponentId, ComponentId) {
    init_tracing();
    let mut world = World::new();
    let pos = world.component_id::<Pos>().unwrap();
    let child_of = world.component_id::<ChildOf>().unwrap();
    let likes = world.component_id::<Likes>().unwrap();
    (world, pos, child_of, likes)
}

fn children_of(world: &World, child_of: ComponentId, parent: Entity) -> Vec<Entity> {
    let mut query = world.query(RelationFilter::new(Mask::new(&[child_of]), parent)).unwrap();
    let mut out = Vec::new();
    while query.next() {
        assert_eq!(query.relation(child_of).unwrap(), parent);
        out.push(query.entity());
    }
    out.sort();
    out
}

/// Records `(entity, kinds, old_target)` for every event.
#[derive(Default)]
struct Recorder {
    log: Arc<Mutex<Vec<(Entity, Subscription, Entity)>>>,
}

impl Listener for Recorder {
    fn notify(&mut self, _world: &World, event: &EntityEvent<'_>) {
        self.log
            .lock()
            .unwrap()
            .push((event.entity, event.event_types, event.old_target));
    }

    fn subscriptions(&self) -> Subscription {
        Subscription::all()
    }

    fn components(&self) -> Option<&Mask> {
        None
    }
}

#[test]
fn reparenting_moves_children_between_archetypes() {
    let (mut world, pos, child_of, _) = setup();
    let a = world.new_entity(&[]).unwrap();
    let b = world.new_entity(&[]).unwrap();

    let builder = Builder::new(&[pos, child_of]).with_relation(child_of);
    let mut query = builder.new_batch_query(&mut world, 5, Some(a)).unwrap();
    let mut kids = Vec::new();
    while query.next() {
        kids.push(query.entity());
    }
    drop(query);
    kids.sort();
    assert_eq!(children_of(&world, child_of, a), kids);

    // Move two children one at a time, the rest as a batch.
    world.relations().set(kids[0], child_of, b).unwrap();
    world.relations().set(kids[1], child_of, b).unwrap();
    assert_eq!(children_of(&world, child_of, a).len(), 3);
    assert_eq!(children_of(&world, child_of, b), vec![kids[0], kids[1]]);

    let of_a = RelationFilter::new(Mask::new(&[child_of]), a);
    assert_eq!(world.relations().set_batch(of_a, child_of, b).unwrap(), 3);
    assert!(children_of(&world, child_of, a).is_empty());
    assert_eq!(children_of(&world, child_of, b), kids);

    // Component data travels with the entity.
    world.set(kids[4], pos, Pos(1.0, 2.0)).unwrap();
    world.relations().set(kids[4], child_of, a).unwrap();
    assert_eq!(world.get::<Pos>(kids[4], pos).unwrap(), &Pos(1.0, 2.0));
    assert!(world.archetypes().all(|arch| arch.is_coherent()));
}

#[test]
fn removed_parent_leaves_children_pointing_at_it() {
    let (mut world, _, child_of, _) = setup();
    let parent = world.new_entity(&[]).unwrap();
    let builder = Builder::new(&[child_of]).with_relation(child_of);
    builder.new_batch(&mut world, 3, Some(parent)).unwrap();

    world.remove_entity(parent).unwrap();
    assert!(!world.alive(parent));

    // Children are still found under the removed parent.
    let orphans = children_of(&world, child_of, parent);
    assert_eq!(orphans.len(), 3);
    for child in &orphans {
        assert_eq!(world.relation_target(*child, child_of).unwrap(), parent);
    }

    // Setting the same removed target again changes nothing.
    world.relations().set(orphans[0], child_of, parent).unwrap();

    // A removed entity can no longer become a new target.
    let other = world.new_entity(&[]).unwrap();
    world.remove_entity(other).unwrap();
    assert!(matches!(
        world.relations().set(orphans[0], child_of, other),
        Err(EcsError::DeadEntity { .. })
    ));
}

#[test]
fn archetypes_of_removed_targets_are_reused() {
    let (mut world, _, child_of, _) = setup();
    let builder = Builder::new(&[child_of]).with_relation(child_of);
    let old_parent = world.new_entity(&[]).unwrap();
    let child = builder.new_entity_with_target(&mut world, old_parent).unwrap();
    let parked = world.location(child).unwrap().archetype;

    world.remove_entity(old_parent).unwrap();
    let new_parent = world.new_entity(&[]).unwrap();
    world.relations().set(child, child_of, new_parent).unwrap();
    assert!(!world.archetype(parked).unwrap().is_active());

    let next_parent = world.new_entity(&[]).unwrap();
    let sibling = builder.new_entity_with_target(&mut world, next_parent).unwrap();
    let reused = world.location(sibling).unwrap().archetype;
    assert_eq!(reused, parked);
    let arch = world.archetype(reused).unwrap();
    assert!(arch.is_active());
    assert_eq!(arch.target(), next_parent);
    assert_eq!(arch.len(), 1);
}

#[test]
fn relation_changes_send_matching_events() {
    let (mut world, pos, child_of, likes) = setup();
    let recorder = Recorder::default();
    let log = Arc::clone(&recorder.log);

    let a = world.new_entity(&[]).unwrap();
    let b = world.new_entity(&[]).unwrap();
    let e = world.new_entity(&[pos]).unwrap();
    world.set_listener(Box::new(recorder));

    world.add(e, &[child_of]).unwrap();
    world.relations().set(e, child_of, a).unwrap();
    world.relations().set(e, child_of, a).unwrap();
    world.relations().set(e, child_of, b).unwrap();
    world.relations().exchange(e, &[likes], &[child_of], likes, a).unwrap();
    world.remove(e, &[likes]).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(
        *log,
        vec![
            (
                e,
                Subscription::COMPONENT_ADDED | Subscription::RELATIONS,
                Entity::ZERO
            ),
            (e, Subscription::TARGET_CHANGED, Entity::ZERO),
            (e, Subscription::TARGET_CHANGED, a),
            (
                e,
                Subscription::COMPONENTS | Subscription::RELATIONS,
                b
            ),
            (e, Subscription::COMPONENT_REMOVED | Subscription::RELATIONS, a),
        ]
    );
}

#[test]
fn relation_reads_check_the_component() {
    let (mut world, pos, child_of, likes) = setup();
    let e = world.new_entity(&[pos, child_of]).unwrap();
    assert_eq!(world.relation_target(e, child_of).unwrap(), Entity::ZERO);
    assert!(matches!(
        world.relation_target(e, likes),
        Err(EcsError::MissingComponent { .. }) | Err(EcsError::NotARelation { .. })
    ));
    assert!(matches!(
        world.relations().get(e, pos),
        Err(EcsError::NotARelation { .. }) | Err(EcsError::MissingComponent { .. })
    ));
    assert!(matches!(
        world.new_entity(&[child_of, likes]),
        Err(EcsError::MultipleRelations { .. })
    ));
}
