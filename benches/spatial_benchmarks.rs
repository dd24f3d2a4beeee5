use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use geoquery::compute::spatial::{IndexEntry, RTree};
use geoquery::{
    Attributes, BoundingBox, DistanceMetric, Engine, FeatureId, Geometry, NodeCapacity,
};
use geo::Point;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstar::AABB;

fn random_points(n: usize, seed: u64) -> Vec<(f64, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (rng.gen_range(-180.0..180.0), rng.gen_range(-90.0..90.0)))
        .collect()
}

fn entries(points: &[(f64, f64)]) -> Vec<IndexEntry> {
    points
        .iter()
        .enumerate()
        .map(|(i, &(lon, lat))| IndexEntry::new(FeatureId::new(i as u64 + 1), BoundingBox::from_point(lon, lat)))
        .collect()
}

fn loaded_engine(points: &[(f64, f64)]) -> Engine {
    let engine = Engine::new();
    let items = points
        .iter()
        .map(|&(lon, lat)| (Geometry::point(lon, lat).unwrap(), Attributes::new()))
        .collect();
    engine.store.bulk_load(items).unwrap();
    engine
}

fn benchmark_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");

    for size in [1_000, 10_000, 50_000] {
        let points = random_points(size, 1);

        group.bench_with_input(BenchmarkId::new("incremental", size), &points, |b, points| {
            b.iter(|| {
                let mut tree = RTree::default();
                for entry in entries(points) {
                    tree.insert(entry.id, entry.bbox);
                }
                black_box(tree.height())
            })
        });

        group.bench_with_input(BenchmarkId::new("bulk_load", size), &points, |b, points| {
            b.iter(|| black_box(RTree::bulk_load(NodeCapacity::default(), entries(points)).height()))
        });

        group.bench_with_input(BenchmarkId::new("rstar_bulk_load", size), &points, |b, points| {
            b.iter(|| {
                let raw: Vec<[f64; 2]> = points.iter().map(|&(x, y)| [x, y]).collect();
                black_box(rstar::RTree::bulk_load(raw).size())
            })
        });
    }

    group.finish();
}

fn benchmark_bbox_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("bbox_queries");
    let points = random_points(50_000, 2);
    let engine = loaded_engine(&points);
    let tree = RTree::bulk_load(NodeCapacity::default(), entries(&points));
    let reference = rstar::RTree::bulk_load(points.iter().map(|&(x, y)| [x, y]).collect::<Vec<_>>());

    for span in [1.0, 10.0, 45.0] {
        let query = BoundingBox::new(-span, -span, span, span);

        group.bench_with_input(BenchmarkId::new("engine", span), &query, |b, q| {
            b.iter(|| {
                engine
                    .query
                    .query_bbox(q.min_lon(), q.min_lat(), q.max_lon(), q.max_lat())
                    .unwrap()
                    .len()
            })
        });

        group.bench_with_input(BenchmarkId::new("index_only", span), &query, |b, q| {
            b.iter(|| black_box(tree.query_bbox(q).len()))
        });

        group.bench_with_input(BenchmarkId::new("rstar", span), &query, |b, q| {
            let envelope = AABB::from_corners([q.min_lon(), q.min_lat()], [q.max_lon(), q.max_lat()]);
            b.iter(|| black_box(reference.locate_in_envelope_intersecting(&envelope).count()))
        });
    }

    group.finish();
}

fn benchmark_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("nearest");
    let points = random_points(50_000, 3);
    let engine = loaded_engine(&points);
    let reference = rstar::RTree::bulk_load(points.iter().map(|&(x, y)| [x, y]).collect::<Vec<_>>());
    let probe = Point::new(12.5, 41.9);

    for k in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("engine", k), &k, |b, &k| {
            b.iter(|| black_box(engine.query.query_nearest(probe.x(), probe.y(), k).unwrap().len()))
        });

        group.bench_with_input(BenchmarkId::new("rstar", k), &k, |b, &k| {
            b.iter(|| {
                black_box(
                    reference
                        .nearest_neighbor_iter(&[probe.x(), probe.y()])
                        .take(k)
                        .count(),
                )
            })
        });
    }

    let haversine = Engine::from_store(
        geoquery::SharedStore::new(
            geoquery::Config::default().with_distance_metric(DistanceMetric::Haversine),
        )
        .unwrap(),
    );
    haversine
        .store
        .bulk_load(
            points
                .iter()
                .map(|&(lon, lat)| (Geometry::point(lon, lat).unwrap(), Attributes::new()))
                .collect(),
        )
        .unwrap();
    group.bench_function("engine_haversine_10", |b| {
        b.iter(|| black_box(haversine.query.query_nearest(probe.x(), probe.y(), 10).unwrap().len()))
    });

    group.finish();
}

fn benchmark_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("writes");
    let points = random_points(10_000, 4);

    group.bench_function("insert_delete_cycle", |b| {
        let engine = loaded_engine(&points);
        let mut counter = 0usize;
        b.iter(|| {
            let (lon, lat) = points[counter % points.len()];
            counter += 1;
            let id = engine
                .store
                .insert(Geometry::point(lon * 0.5, lat * 0.5).unwrap(), Attributes::new())
                .unwrap();
            engine.store.delete(black_box(id)).unwrap();
        })
    });

    group.bench_function("extent_after_boundary_delete", |b| {
        b.iter_batched(
            || loaded_engine(&points[..1_000]),
            |engine| {
                let ids: Vec<FeatureId> = engine.store.features().iter().map(|f| f.id()).collect();
                engine.store.delete(ids[0]).unwrap();
                black_box(engine.store.extent().unwrap())
            },
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn benchmark_geojson(c: &mut Criterion) {
    let mut group = c.benchmark_group("geojson");
    let engine = loaded_engine(&random_points(5_000, 5));
    let document = engine.loader.export().unwrap();

    group.bench_function("export_5000", |b| b.iter(|| black_box(engine.loader.export().unwrap().len())));
    group.bench_function("load_5000", |b| {
        let target = Engine::new();
        b.iter(|| black_box(target.loader.load(&document).unwrap()))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_index_build,
    benchmark_bbox_queries,
    benchmark_nearest,
    benchmark_writes,
    benchmark_geojson
);
criterion_main!(benches);
