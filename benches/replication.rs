//! Replication benchmarks
//!
//! Measures the interest sweep and snapshot batch encoding at various
//! session and entity counts.
//!
//! Run with: cargo bench --bench replication

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use emberhold_server::game::entity::{Archetype, EntityId, Pose};
use emberhold_server::game::world::World;
use emberhold_server::net::codec::{SnapshotCodec, SnapshotRecord};
use emberhold_server::net::interest::{InterestConfig, InterestManager};
use emberhold_server::net::session::SessionManager;
use emberhold_server::net::transport::LoopbackTransport;
use emberhold_server::util::vec3::Vec3;
use rand::Rng;
use uuid::Uuid;

/// World with entities scattered uniformly over a square region
fn create_world(entities: usize, extent: f32) -> World {
    let mut world = World::new();
    let mut rng = rand::thread_rng();
    for _ in 0..entities {
        let pose = Pose::new(
            Vec3::new(
                rng.gen_range(-extent..extent),
                0.0,
                rng.gen_range(-extent..extent),
            ),
            rng.gen_range(0.0..360.0),
        );
        world.create(Archetype::Husk, pose).unwrap();
    }
    world
}

fn create_sessions(
    count: usize,
    extent: f32,
    world: &World,
    interest: &mut InterestManager,
    transport: &mut LoopbackTransport,
) -> SessionManager {
    let mut sessions = SessionManager::new(count);
    let mut rng = rand::thread_rng();
    for i in 0..count {
        let id = Uuid::new_v4();
        sessions.connect(id, format!("session{}", i)).unwrap();
        sessions.set_anchor(
            id,
            Vec3::new(
                rng.gen_range(-extent..extent),
                0.0,
                rng.gen_range(-extent..extent),
            ),
        );
        transport.register(id);
        let session = sessions.get(id).unwrap().clone();
        interest.on_session_connect(&session, world, transport);
    }
    sessions
}

/// Benchmark a full interest evaluation pass at various session counts
fn bench_interest_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("interest_sweep");
    group.sample_size(50);

    let extent = 500.0;
    let entities = 1000;

    for count in [10, 50, 100, 250] {
        let world = create_world(entities, extent);
        let mut transport = LoopbackTransport::new();
        let mut interest = InterestManager::new(InterestConfig {
            radius: 70.0,
            hysteresis: 5.0,
            eval_interval_ticks: 1,
            max_sessions_per_frame: 0,
        });
        let sessions = create_sessions(count, extent, &world, &mut interest, &mut transport);
        let mut tick = 0u64;

        group.throughput(Throughput::Elements((count * entities) as u64));
        group.bench_with_input(BenchmarkId::new("sessions", count), &count, |b, _| {
            b.iter(|| {
                tick += 1;
                black_box(interest.evaluate(tick, &world, &sessions, &mut transport));
            })
        });
    }
    group.finish();
}

/// Benchmark snapshot batch encoding at various visible-entity counts
fn bench_batch_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_encode");
    group.sample_size(100);

    let codec = SnapshotCodec::default();
    let mut rng = rand::thread_rng();

    for count in [50, 200, 500, 1000] {
        let records: Vec<SnapshotRecord> = (0..count)
            .map(|i| {
                codec.encode(
                    EntityId(i as u16),
                    Vec3::new(
                        rng.gen_range(-500.0..500.0),
                        0.0,
                        rng.gen_range(-500.0..500.0),
                    ),
                    rng.gen_range(0.0..360.0),
                )
            })
            .collect();
        let mut buf = Vec::new();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("records", count), &count, |b, _| {
            b.iter(|| {
                codec.encode_batch(black_box(&records), &mut buf);
                black_box(buf.len());
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_interest_sweep, bench_batch_encode);
criterion_main!(benches);
