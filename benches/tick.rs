#![allow(dead_code)]

use criterion::*;
use std::hint::black_box;

use reactive_ecs::prelude::*;

const AGENTS_SMALL: usize = 10_000;
const AGENTS_MED: usize = 100_000;

#[derive(Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, PartialEq)]
struct Wealth {
    value: f32,
}

#[derive(Clone, Copy)]
struct Bankrupt;

fn populate(ecs: &mut ECSManager, agents: usize) -> ECSResult<Vec<Entity>> {
    (0..agents)
        .map(|i| {
            let bundle = Bundle::new()
                .with(Position { x: i as f32, y: 0.0 })
                .with(Wealth { value: (i % 100) as f32 });
            ecs.setup().spawn(if i % 10 == 0 { bundle.with(Bankrupt) } else { bundle })
        })
        .collect()
}

/// World with one value reactive and one membership group, warmed up by one
/// tick so every shadow and marker is in place.
fn make_world(agents: usize, config: ReactiveConfig) -> (ECSManager, ReactiveEngine, Vec<Entity>) {
    let mut ecs = ECSManager::new();
    let mut engine = ReactiveEngine::with_config(config);
    engine
        .register_value_reactive::<Position, Previous<Position>, Changed<Position>>(ecs.world())
        .unwrap();
    engine
        .register_group(ecs.world(), &ReactiveGroupDesc::new().target::<Wealth>().condition::<Bankrupt>())
        .unwrap();
    let entities = populate(&mut ecs, agents).unwrap();
    engine.tick(&mut ecs).unwrap();
    (ecs, engine, entities)
}

fn tick_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("reactive_tick");

    for (name, agents) in [("10k", AGENTS_SMALL), ("100k", AGENTS_MED)] {
        group.bench_function(format!("quiet_{name}"), |b| {
            b.iter_batched(
                || make_world(agents, ReactiveConfig::default()),
                |(mut ecs, mut engine, _)| {
                    black_box(engine.tick(&mut ecs).unwrap());
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_function(format!("moved_1_in_8_{name}"), |b| {
            b.iter_batched(
                || {
                    let (mut ecs, engine, entities) = make_world(agents, ReactiveConfig::default());
                    for &entity in entities.iter().step_by(8) {
                        if let Some(position) = ecs.get_mut::<Position>(entity) {
                            position.y += 1.0;
                        }
                    }
                    (ecs, engine)
                },
                |(mut ecs, mut engine)| {
                    black_box(engine.tick(&mut ecs).unwrap());
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_function(format!("moved_1_in_8_sequential_{name}"), |b| {
            b.iter_batched(
                || {
                    let (mut ecs, engine, entities) =
                        make_world(agents, ReactiveConfig::default().with_parallel(false));
                    for &entity in entities.iter().step_by(8) {
                        if let Some(position) = ecs.get_mut::<Position>(entity) {
                            position.y += 1.0;
                        }
                    }
                    (ecs, engine)
                },
                |(mut ecs, mut engine)| {
                    black_box(engine.tick(&mut ecs).unwrap());
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, tick_benchmark);
criterion_main!(benches);
