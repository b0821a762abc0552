use std::sync::{Arc, Mutex};
use std::thread;

use reactive_ecs::engine::error::{ECSError, ExecutionError, RegistryError};
use reactive_ecs::prelude::*;
use reactive_ecs::{Command, ComponentKey, ReplayReport, Scheduler};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Counter(pub u32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Label(pub &'static str);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Frozen;

#[test]
fn writers_replay_in_ticket_order_regardless_of_submission_order() {
    let mut ecs = ECSManager::new();
    let e = ecs.setup().spawn(Bundle::new().with(Counter(0))).unwrap();

    let mut first = ecs.commands().writer();
    let mut second = ecs.commands().writer();
    second.set(e, Counter(2));
    second.submit();
    first.set(e, Counter(1));
    first.add(e, Label("first"));
    first.submit();

    let report = ecs.apply_deferred_commands().unwrap();
    assert_eq!(report.applied, 3);
    assert_eq!(ecs.world().get::<Counter>(e), Some(&Counter(2)), "later ticket wins");
    assert_eq!(ecs.world().get::<Label>(e), Some(&Label("first")));
}

#[test]
fn forked_writers_replay_after_their_parent_in_index_order() {
    let mut ecs = ECSManager::new();
    let e = ecs.setup().spawn(Bundle::new().with(Counter(0))).unwrap();

    let mut parent = ecs.commands().writer();
    let mut sibling = ecs.commands().writer();
    parent.set(e, Counter(1));
    let mut children = parent.fork(3);
    for (index, child) in children.iter_mut().enumerate().rev() {
        child.set(e, Counter(10 + index as u32));
    }
    drop(children);
    parent.submit();
    sibling.add(e, Label("sibling"));
    sibling.set(e, Counter(99));
    sibling.submit();

    ecs.apply_deferred_commands().unwrap();
    assert_eq!(ecs.world().get::<Counter>(e), Some(&Counter(99)));

    let mut parent = ecs.commands().writer();
    let children = parent.fork(2);
    for (index, mut child) in children.into_iter().enumerate() {
        child.set(e, Counter(20 + index as u32));
    }
    parent.submit();
    ecs.apply_deferred_commands().unwrap();
    assert_eq!(ecs.world().get::<Counter>(e), Some(&Counter(21)), "last child applies last");
}

#[test]
fn concurrent_writers_replay_deterministically() {
    fn run() -> Vec<(u32, &'static str)> {
        let mut ecs = ECSManager::new();
        {
            let buffer = ecs.commands();
            let writers: Vec<_> = (0..8).map(|_| buffer.writer()).collect();
            thread::scope(|scope| {
                for (index, mut writer) in writers.into_iter().enumerate() {
                    scope.spawn(move || {
                        for n in 0..50 {
                            writer.spawn(Bundle::new().with(Counter(index as u32 * 1000 + n)));
                        }
                        writer.push(Command::Spawn { bundle: Bundle::new().with(Label("tail")) });
                    });
                }
            });
        }
        let report = ecs.apply_deferred_commands().unwrap();
        assert_eq!(report.spawned.len(), 8 * 51);

        report
            .spawned
            .iter()
            .map(|&entity| {
                let world = ecs.world();
                match (world.get::<Counter>(entity), world.get::<Label>(entity)) {
                    (Some(counter), _) => (counter.0, ""),
                    (None, Some(label)) => (u32::MAX, label.0),
                    (None, None) => (0, "missing"),
                }
            })
            .collect()
    }

    let first = run();
    assert_eq!(first[0], (0, ""));
    assert_eq!(first[50], (u32::MAX, "tail"));
    assert_eq!(first[51], (1000, ""));
    assert_eq!(first, run());
}

#[test]
fn commands_on_dead_entities_are_skipped() {
    let mut ecs = ECSManager::new();
    let e = ecs.setup().spawn(Bundle::new().with(Counter(1))).unwrap();
    let f = ecs.setup().spawn(Bundle::new().with(Counter(2))).unwrap();

    let mut writer = ecs.commands().writer();
    writer.despawn(e);
    writer.add(e, Label("late"));
    writer.set(e, Counter(5));
    writer.remove::<Counter>(e);
    writer.despawn(e);
    writer.set(f, Label("not present"));
    writer.remove::<Label>(f);
    writer.submit();

    let report = ecs.apply_deferred_commands().unwrap();
    assert_eq!(report, ReplayReport { applied: 2, skipped: 5, spawned: Vec::new() });
    assert_eq!(report.total(), 7);
    assert!(!ecs.world().is_alive(e));
    assert_eq!(ecs.world().get::<Counter>(f), Some(&Counter(2)));

    let recycled = ecs.setup().spawn(Bundle::new().with(Counter(3))).unwrap();
    assert_eq!(recycled.index(), e.index());
    let mut writer = ecs.commands().writer();
    writer.set(e, Counter(100));
    writer.submit();
    assert_eq!(ecs.apply_deferred_commands().unwrap().skipped, 1, "stale handle does not reach the new slot");
    assert_eq!(ecs.world().get::<Counter>(recycled), Some(&Counter(3)));
}

#[test]
fn replay_with_open_writer_is_refused() {
    let mut ecs = ECSManager::new();
    let e = ecs.setup().spawn(Bundle::new().with(Counter(0))).unwrap();

    let mut done = ecs.commands().writer();
    done.set(e, Counter(1));
    done.submit();
    let open = ecs.commands().writer();
    std::mem::forget(open);

    let result = ecs.apply_deferred_commands();
    assert_eq!(result, Err(ECSError::Execution(ExecutionError::PendingWriters { open: 1 })));
    assert_eq!(ecs.commands().pending(), 1, "nothing was applied");
    assert_eq!(ecs.world().get::<Counter>(e), Some(&Counter(0)));
}

#[test]
fn entity_lists_go_stale_across_structural_barriers() {
    let mut ecs = ECSManager::new();
    let e = ecs.setup().spawn(Bundle::new().with(Counter(0))).unwrap();
    let counters = ecs.world().query().with::<Counter>().build().unwrap();

    let list = ecs.world().entities(&counters);
    assert_eq!(list.ensure_fresh(ecs.world().epoch()), Ok(()));

    let mut writer = ecs.commands().writer();
    writer.set(e, Counter(4));
    writer.submit();
    ecs.apply_deferred_commands().unwrap();
    assert_eq!(list.ensure_fresh(ecs.world().epoch()), Ok(()), "value writes keep lists fresh");

    let mut writer = ecs.commands().writer();
    writer.add(e, Frozen);
    writer.submit();
    ecs.apply_deferred_commands().unwrap();
    assert_eq!(
        list.ensure_fresh(ecs.world().epoch()),
        Err(ExecutionError::StaleQuery { computed_at: list.epoch(), current: ecs.world().epoch() })
    );
    assert_eq!(ecs.world().entities(&counters).ensure_fresh(ecs.world().epoch()), Ok(()));
}

#[test]
fn failed_replay_still_invalidates_earlier_lists() {
    let mut ecs = ECSManager::new();
    let counter = ecs.register::<Counter>().unwrap();
    let e = ecs.setup().spawn(Bundle::new().with(Counter(0))).unwrap();
    let counters = ecs.world().query().with::<Counter>().build().unwrap();
    let list = ecs.world().entities(&counters);
    let before = ecs.world().epoch();

    let mut writer = ecs.commands().writer();
    writer.add(e, Frozen);
    writer.add_by_id(e, counter, 42u32);
    writer.remove::<Frozen>(e);
    writer.submit();

    let result = ecs.apply_deferred_commands();
    assert!(matches!(result, Err(ECSError::Registry(RegistryError::ValueTypeMismatch { .. }))));
    assert!(ecs.world().has::<Frozen>(e), "commands before the failure stay applied");
    assert_eq!(ecs.world().get::<Counter>(e), Some(&Counter(0)), "the failing command has no effect");
    assert_eq!(ecs.commands().pending(), 0, "the remainder is dropped");
    assert_eq!(ecs.world().epoch(), before + 1);
    assert_eq!(
        list.ensure_fresh(ecs.world().epoch()),
        Err(ExecutionError::StaleQuery { computed_at: before, current: before + 1 })
    );
}

#[test]
fn failed_value_only_replay_keeps_the_epoch() {
    let mut ecs = ECSManager::new();
    let counter = ecs.register::<Counter>().unwrap();
    let e = ecs.setup().spawn(Bundle::new().with(Counter(0))).unwrap();
    let before = ecs.world().epoch();

    let mut writer = ecs.commands().writer();
    writer.set(e, Counter(3));
    writer.set_by_id(e, counter, Label("wrong"));
    writer.submit();

    assert!(ecs.apply_deferred_commands().is_err());
    assert_eq!(ecs.world().get::<Counter>(e), Some(&Counter(3)));
    assert_eq!(ecs.world().epoch(), before);
}

#[test]
fn store_order_is_archetype_then_row() {
    let mut ecs = ECSManager::new();
    let a = ecs.setup().spawn(Bundle::new().with(Counter(0))).unwrap();
    let b = ecs.setup().spawn(Bundle::new().with(Counter(1)).with(Frozen)).unwrap();
    let c = ecs.setup().spawn(Bundle::new().with(Counter(2))).unwrap();

    let counters = ecs.world().query().with::<Counter>().build().unwrap();
    assert_eq!(ecs.world().entities(&counters).as_slice(), &[a, c, b]);

    let unfrozen = ecs.world().query().with::<Counter>().without::<Frozen>().build().unwrap();
    assert_eq!(ecs.world().count(&unfrozen), 2);
}

#[test]
fn registry_freeze_rejects_new_types() {
    let mut ecs = ECSManager::new();
    let mut engine = ReactiveEngine::with_config(ReactiveConfig::default().with_freeze_registry_on_first_tick(true));
    let e = ecs.setup().spawn(Bundle::new().with(Counter(0))).unwrap();
    engine.tick(&mut ecs).unwrap();
    assert!(ecs.world().registry().is_frozen());

    assert!(matches!(ecs.register::<Frozen>(), Err(RegistryError::Frozen { .. })));
    assert!(ecs.register::<Counter>().is_ok(), "known types still resolve");

    let mut writer = ecs.commands().writer();
    writer.add(e, Frozen);
    writer.submit();
    assert!(matches!(ecs.apply_deferred_commands(), Err(ECSError::Registry(RegistryError::Frozen { .. }))));
}

#[test]
fn typed_and_id_keyed_commands_agree() {
    let mut ecs = ECSManager::new();
    let counter = ecs.register::<Counter>().unwrap();
    let e = ecs.setup().spawn(Bundle::new()).unwrap();

    let mut writer = ecs.commands().writer();
    writer.push(Command::Add { entity: e, component: ComponentKey::Id(counter), value: Box::new(Counter(7)) });
    writer.submit();
    ecs.apply_deferred_commands().unwrap();
    assert_eq!(ecs.world().get_by_id::<Counter>(e, counter), Some(&Counter(7)));

    let mut writer = ecs.commands().writer();
    writer.push(Command::Set { entity: e, component: ComponentKey::Id(counter), value: Box::new(Label("wrong")) });
    writer.submit();
    assert!(matches!(
        ecs.apply_deferred_commands(),
        Err(ECSError::Registry(RegistryError::ValueTypeMismatch { .. }))
    ));
}

#[test]
fn scheduler_separates_conflicting_systems_with_barriers() {
    let mut ecs = ECSManager::new();
    let counter = ecs.register::<Counter>().unwrap();
    let e = ecs.setup().spawn(Bundle::new().with(Counter(1))).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let writes = AccessSets { read: build_signature(&[counter]), write: build_signature(&[counter]) };
    let reads = AccessSets { read: build_signature(&[counter]), write: Default::default() };

    let mut scheduler = Scheduler::new();
    let log = Arc::clone(&order);
    scheduler.add_system(Box::new(FnSystem::new(1, "double", writes.clone(), move |world, commands| {
        let value = world.get::<Counter>(e).map_or(0, |c| c.0);
        log.lock().unwrap().push(("double", value));
        commands.set(e, Counter(value * 2));
        Ok(())
    })));
    let log = Arc::clone(&order);
    scheduler.add_system(Box::new(FnSystem::new(2, "read", reads.clone(), move |world, _| {
        log.lock().unwrap().push(("read", world.get::<Counter>(e).map_or(0, |c| c.0)));
        Ok(())
    })));
    let log = Arc::clone(&order);
    scheduler.add_system(Box::new(FnSystem::new(3, "read_again", reads, move |world, _| {
        log.lock().unwrap().push(("read_again", world.get::<Counter>(e).map_or(0, |c| c.0)));
        Ok(())
    })));

    assert_eq!(scheduler.stages().len(), 2);
    assert_eq!(scheduler.stages()[1].systems.len(), 2, "readers share a stage");

    let report = scheduler.run(&mut ecs, true).unwrap();
    assert_eq!(report.applied, 1);

    let mut seen = order.lock().unwrap().clone();
    assert_eq!(seen[0], ("double", 1));
    seen[1..].sort();
    assert_eq!(&seen[1..], &[("read", 2), ("read_again", 2)], "second stage sees the first stage's writes");
}

#[test]
fn failing_system_still_flushes_its_stage() {
    let mut ecs = ECSManager::new();
    let e = ecs.setup().spawn(Bundle::new().with(Counter(1))).unwrap();

    let mut scheduler = Scheduler::new();
    scheduler.add_system(Box::new(FnSystem::new(1, "writer", AccessSets::default(), move |_, commands| {
        commands.set(e, Counter(5));
        Ok(())
    })));
    scheduler.add_system(Box::new(FnSystem::new(2, "broken", AccessSets::default(), |_, _| {
        Err(ECSError::Internal("broken system".into()))
    })));

    let result = scheduler.run(&mut ecs, false);
    assert_eq!(result, Err(ECSError::Internal("broken system".into())));
    assert_eq!(ecs.world().get::<Counter>(e), Some(&Counter(5)));
    assert_eq!(ecs.commands().pending(), 0);
}
