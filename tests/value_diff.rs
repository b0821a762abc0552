use std::sync::{Arc, Mutex};

use reactive_ecs::engine::error::{ECSError, ReactiveError};
use reactive_ecs::prelude::*;
use reactive_ecs::Query;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    x: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Velocity(pub f32);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Heading(pub f32);

/// Shadow that ignores sub-degree jitter.
#[derive(Clone, Copy, Debug, PartialEq)]
struct WholeDegrees(i32);

impl Shadow<Heading> for WholeDegrees {
    fn capture(value: &Heading) -> Self {
        WholeDegrees(value.0.floor() as i32)
    }

    fn matches(&self, value: &Heading) -> bool {
        self.0 == value.0.floor() as i32
    }
}

impl Shadow<Velocity> for WholeDegrees {
    fn capture(value: &Velocity) -> Self {
        WholeDegrees(value.0.floor() as i32)
    }

    fn matches(&self, value: &Velocity) -> bool {
        self.0 == value.0.floor() as i32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct HeadingChanged;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Accelerated;

type Moved = Changed<Position>;

fn sequential() -> ReactiveEngine {
    ReactiveEngine::with_config(ReactiveConfig::default().with_parallel(false))
}

/// Registers a consumer recording the entities carrying `tag` during every
/// consumer phase.
fn observe_tag(engine: &mut ReactiveEngine, tag: Query) -> Arc<Mutex<Vec<Vec<Entity>>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    engine.add_system(FnSystem::new(7, "observe_tag", AccessSets::default(), move |world, _| {
        sink.lock().unwrap().push(world.entities(&tag).into_vec());
        Ok(())
    }));
    log
}

fn set_x(ecs: &mut ECSManager, entity: Entity, x: f32) {
    ecs.get_mut::<Position>(entity).unwrap().x = x;
}

#[test]
fn position_scenario_over_four_ticks() {
    let mut ecs = ECSManager::new();
    let mut engine = sequential();
    let group = engine.register_group(ecs.world(), &ReactiveGroupDesc::new().target::<Position>()).unwrap();
    let marker = engine.marker(group).unwrap();
    engine.register_value_reactive::<Position, Previous<Position>, Moved>(ecs.world()).unwrap();
    let moved = engine.changed_query::<Moved>(ecs.world()).unwrap();
    let seen = observe_tag(&mut engine, moved);

    let e = ecs.setup().spawn(Bundle::new().with(Position { x: 0.0 })).unwrap();

    // Tick 1: joins the group, shadow captured without a tag.
    let report = engine.tick(&mut ecs).unwrap();
    assert_eq!(report.membership.added, 1);
    assert_eq!(report.values.attached, 1);
    assert_eq!(report.values.changed, 0);
    assert!(ecs.world().has_component(e, marker));
    assert_eq!(ecs.world().get::<Previous<Position>>(e), Some(&Previous(Position { x: 0.0 })));

    // Tick 2: unchanged.
    let report = engine.tick(&mut ecs).unwrap();
    assert_eq!(report.values.compared, 1);
    assert_eq!(report.values.changed, 0);

    // Tick 3: moved.
    set_x(&mut ecs, e, 5.0);
    let report = engine.tick(&mut ecs).unwrap();
    assert_eq!(report.values.changed, 1);
    assert_eq!(report.cleaned, 1, "tag removed after the consumer phase");
    assert_eq!(ecs.world().get::<Previous<Position>>(e), Some(&Previous(Position { x: 5.0 })));
    assert!(!ecs.world().has::<Moved>(e));

    // Tick 4: quiet again.
    let report = engine.tick(&mut ecs).unwrap();
    assert_eq!(report.values.changed, 0);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert!(seen[0].is_empty(), "attaching a shadow never raises a tag");
    assert!(seen[1].is_empty());
    assert_eq!(seen[2], vec![e], "tag visible during tick 3's consumer phase");
    assert!(seen[3].is_empty(), "tag gone by tick 4");
}

#[test]
fn tag_is_raised_only_for_changed_values() {
    let mut ecs = ECSManager::new();
    let mut engine = ReactiveEngine::with_config(ReactiveConfig::default().with_batch_size(3));
    engine.register_value_reactive::<Position, Previous<Position>, Moved>(ecs.world()).unwrap();
    let moved = engine.changed_query::<Moved>(ecs.world()).unwrap();
    let seen = observe_tag(&mut engine, moved);

    let entities: Vec<Entity> =
        (0..40).map(|i| ecs.setup().spawn(Bundle::new().with(Position { x: i as f32 })).unwrap()).collect();
    engine.tick(&mut ecs).unwrap();

    let mut expected = Vec::new();
    for (i, &entity) in entities.iter().enumerate() {
        match i % 4 {
            0 => {
                set_x(&mut ecs, entity, -1.0);
                expected.push(entity);
            }
            1 => set_x(&mut ecs, entity, i as f32),
            2 => {
                set_x(&mut ecs, entity, 1000.0);
                set_x(&mut ecs, entity, i as f32);
            }
            _ => {}
        }
    }
    let report = engine.tick(&mut ecs).unwrap();

    assert_eq!(report.values.compared, 40);
    assert_eq!(report.values.changed, expected.len());
    let mut tagged = seen.lock().unwrap()[1].clone();
    tagged.sort();
    expected.sort();
    assert_eq!(tagged, expected, "a round trip back to the shadowed value is not a change");
}

#[test]
fn consumer_writes_are_detected_next_tick() {
    let mut ecs = ECSManager::new();
    let mut engine = sequential();
    engine.register_value_reactive::<Position, Previous<Position>, Moved>(ecs.world()).unwrap();
    let moved = engine.changed_query::<Moved>(ecs.world()).unwrap();

    let e = ecs.setup().spawn(Bundle::new().with(Position { x: 0.0 }).with(Velocity(2.0))).unwrap();
    let movers = ecs.world().query().with::<Position>().with::<Velocity>().build().unwrap();
    engine.add_system(FnSystem::new(1, "integrate", AccessSets::default(), move |world, commands| {
        for &entity in &world.entities(&movers) {
            let (Some(position), Some(velocity)) = (world.get::<Position>(entity), world.get::<Velocity>(entity))
            else {
                continue;
            };
            commands.set(entity, Position { x: position.x + velocity.0 });
        }
        Ok(())
    }));
    let seen = observe_tag(&mut engine, moved);

    engine.tick(&mut ecs).unwrap();
    engine.tick(&mut ecs).unwrap();
    engine.tick(&mut ecs).unwrap();

    assert_eq!(ecs.world().get::<Position>(e), Some(&Position { x: 6.0 }));
    let seen = seen.lock().unwrap();
    assert!(seen[0].is_empty(), "the shadow captured the value before the first write");
    assert_eq!(seen[1], vec![e]);
    assert_eq!(seen[2], vec![e]);
}

#[test]
fn custom_shadow_defines_equality() {
    let mut ecs = ECSManager::new();
    let mut engine = sequential();
    engine.register_value_reactive::<Heading, WholeDegrees, HeadingChanged>(ecs.world()).unwrap();
    let turned = engine.changed_query::<HeadingChanged>(ecs.world()).unwrap();
    let seen = observe_tag(&mut engine, turned);

    let e = ecs.setup().spawn(Bundle::new().with(Heading(10.2))).unwrap();
    engine.tick(&mut ecs).unwrap();

    ecs.get_mut::<Heading>(e).unwrap().0 = 10.9;
    engine.tick(&mut ecs).unwrap();

    ecs.get_mut::<Heading>(e).unwrap().0 = 11.1;
    engine.tick(&mut ecs).unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen[1].is_empty(), "jitter below the shadow's resolution");
    assert_eq!(seen[2], vec![e]);
    assert_eq!(ecs.world().get::<WholeDegrees>(e), Some(&WholeDegrees(11)));
}

#[test]
fn lone_shadows_are_detached() {
    let mut ecs = ECSManager::new();
    let mut engine = sequential();
    engine.register_value_reactive::<Position, Previous<Position>, Moved>(ecs.world()).unwrap();

    let e = ecs.setup().spawn(Bundle::new().with(Position { x: 1.0 }).with(Velocity(0.0))).unwrap();
    engine.tick(&mut ecs).unwrap();
    assert!(ecs.world().has::<Previous<Position>>(e));

    let mut writer = ecs.commands().writer();
    writer.remove::<Position>(e);
    writer.submit();
    ecs.apply_deferred_commands().unwrap();

    let report = engine.tick(&mut ecs).unwrap();
    assert_eq!(report.values.detached, 1);
    assert!(!ecs.world().has::<Previous<Position>>(e));
    assert!(ecs.world().has::<Velocity>(e));
}

#[test]
fn payload_without_shadow_is_not_an_error() {
    let mut ecs = ECSManager::new();
    let mut engine = sequential();
    engine.register_value_reactive::<Position, Previous<Position>, Moved>(ecs.world()).unwrap();

    let e = ecs.setup().spawn(Bundle::new().with(Position { x: 3.0 })).unwrap();
    set_x(&mut ecs, e, 4.0);
    let report = engine.tick(&mut ecs).unwrap();

    assert_eq!(report.values.compared, 0, "no shadow yet, so nothing to compare");
    assert_eq!(report.values.attached, 1);
    assert!(!ecs.world().has::<Moved>(e));
}

#[test]
fn parallel_and_sequential_detection_agree() {
    fn run(parallel: bool) -> Vec<Entity> {
        let mut ecs = ECSManager::new();
        let mut engine =
            ReactiveEngine::with_config(ReactiveConfig::default().with_parallel(parallel).with_batch_size(16));
        engine.register_value_reactive::<Position, Previous<Position>, Moved>(ecs.world()).unwrap();
        let moved = engine.changed_query::<Moved>(ecs.world()).unwrap();
        let seen = observe_tag(&mut engine, moved);

        let entities: Vec<Entity> = (0..2500)
            .map(|i| {
                let bundle = Bundle::new().with(Position { x: i as f32 });
                ecs.setup().spawn(if i % 3 == 0 { bundle.with(Velocity(1.0)) } else { bundle }).unwrap()
            })
            .collect();
        engine.tick(&mut ecs).unwrap();
        for &entity in entities.iter().step_by(7) {
            set_x(&mut ecs, entity, -5.0);
        }
        engine.tick(&mut ecs).unwrap();

        let tagged = seen.lock().unwrap()[1].clone();
        tagged
    }

    let parallel = run(true);
    assert_eq!(parallel.len(), 2500usize.div_ceil(7));
    assert_eq!(parallel, run(false), "store order is independent of thread timing");
}

#[test]
fn value_reactive_misconfiguration_is_rejected() {
    let ecs = ECSManager::new();
    let mut engine = ReactiveEngine::new();
    engine.register_value_reactive::<Position, Previous<Position>, Moved>(ecs.world()).unwrap();

    let duplicate = engine.register_value_reactive::<Position, Previous<Position>, HeadingChanged>(ecs.world());
    assert!(matches!(duplicate, Err(ECSError::Reactive(ReactiveError::DuplicateValueReactive { .. }))));

    let aliased = engine.register_value_reactive::<Heading, Previous<Heading>, Heading>(ecs.world());
    assert!(matches!(aliased, Err(ECSError::Reactive(ReactiveError::AliasedTypes { .. }))));

    engine.register_value_reactive::<Heading, WholeDegrees, HeadingChanged>(ecs.world()).unwrap();
    let shared = engine.register_value_reactive::<Velocity, WholeDegrees, Accelerated>(ecs.world());
    assert!(matches!(shared, Err(ECSError::Reactive(ReactiveError::SharedShadow { .. }))));

    assert_eq!(engine.value_reactives().len(), 2);
}

#[test]
fn standalone_tag_cleanup_removes_tags_each_tick() {
    let mut ecs = ECSManager::new();
    let mut engine = sequential();
    let tag = engine.register_tag_cleanup::<HeadingChanged>(ecs.world()).unwrap();
    assert_eq!(engine.register_tag_cleanup::<HeadingChanged>(ecs.world()).unwrap(), tag);

    let e = ecs.setup().spawn(Bundle::new().with(HeadingChanged).with(Velocity(1.0))).unwrap();
    let report = engine.tick(&mut ecs).unwrap();
    assert_eq!(report.cleaned, 1);
    assert!(!ecs.world().has_component(e, tag));
    assert!(ecs.world().has::<Velocity>(e));
}
