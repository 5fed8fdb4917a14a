use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use sandworm_core::{Material, World, WorldConfig};
use std::time::Duration;

fn populated_world(worms: usize) -> World {
    let mut world = World::new(WorldConfig {
        width: 256,
        height: 128,
        rng_seed: Some(0xBEEF),
        ..WorldConfig::default()
    })
    .expect("world");
    for x in 0..256 {
        world.cells_mut().set(x, 127, Material::Dirt);
        world.cells_mut().set(x, 126, Material::Dirt);
    }
    world.place_material(48, 16, Material::Sand, 10);
    world.place_material(128, 16, Material::Water, 10);
    world.place_material(208, 16, Material::Lava, 6);
    world.place_material(90, 100, Material::Acid, 4);
    world.place_material(160, 110, Material::Tree, 6);
    for i in 0..worms {
        let x = 16 + (i as i32 * 224) / worms.max(1) as i32;
        world.place_material(x, 124, Material::WormTail, 1);
    }
    world
}

fn bench_world_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_tick");
    group.sample_size(30);
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(8));
    for &worms in &[0usize, 8, 32] {
        group.bench_function(format!("ticks64_worms{worms}"), |b| {
            b.iter_batched(
                || populated_world(worms),
                |mut world| {
                    for _ in 0..64 {
                        world.advance(16.0);
                    }
                    world
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_world_ticks);
criterion_main!(benches);
