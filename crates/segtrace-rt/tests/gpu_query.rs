//! End-to-end queries on real ray tracing hardware.
//!
//! Each test logs and returns early when no ray tracing device is present or no shader
//! binaries are available (build with `--features embedded` or set
//! `SEGTRACE_SHADER_DIR` to a directory of compiled stages).

use std::sync::Arc;

use approx::assert_abs_diff_eq;

use segtrace_core::reference::brute_force;
use segtrace_core::{EngineConfig, HitRecord, Point2, Scene, SegmentSet};
use segtrace_gpu::GpuContextBuilder;
use segtrace_rt::{EngineError, SegmentIntersector};
use segtrace_shaders::ShaderSet;

#[cfg(feature = "embedded")]
fn shaders(_config: &EngineConfig) -> Option<ShaderSet> {
    ShaderSet::embedded().ok()
}

#[cfg(not(feature = "embedded"))]
fn shaders(config: &EngineConfig) -> Option<ShaderSet> {
    let dir = std::env::var_os("SEGTRACE_SHADER_DIR")?;
    match ShaderSet::load_dir(dir, &config.shaders.entry_points) {
        Ok(set) => Some(set),
        Err(e) => {
            eprintln!("Skipping: {e}");
            None
        }
    }
}

fn engine(capacity: u32) -> Option<SegmentIntersector> {
    let config = EngineConfig::default()
        .with_validation(false)
        .with_result_capacity(capacity);

    let Some(shaders) = shaders(&config) else {
        eprintln!("Skipping: no shader binaries");
        return None;
    };

    let context = match GpuContextBuilder::new().validation(false).build() {
        Ok(context) => Arc::new(context),
        Err(e) => {
            eprintln!("Skipping: {e}");
            return None;
        }
    };

    Some(SegmentIntersector::new(context, &shaders, config).expect("Failed to create engine"))
}

fn pairs(hits: &[HitRecord]) -> Vec<(u32, u32)> {
    let mut pairs: Vec<_> = hits.iter().map(HitRecord::pair).collect();
    pairs.sort_unstable();
    pairs
}

/// Distance of the near misses, three times the default AABB half-thickness.
const NEAR_MISS: f32 = 3e-5;

/// Xorshift generator; scenes must be reproducible from their seed.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Coordinate in [-4, 4] on a 1/16 grid, so segment arithmetic stays exact.
    fn grid(&mut self) -> f32 {
        f32::from((self.next() % 129) as u8) / 16.0 - 4.0
    }

    fn point(&mut self) -> Point2 {
        Point2::new(self.grid(), self.grid())
    }
}

fn midpoint((a, b): (Point2, Point2)) -> Point2 {
    Point2::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// A generated scene and the pairs its construction guarantees to hit or miss.
struct GeneratedScene {
    query: SegmentSet,
    base: SegmentSet,
    must_hit: Vec<(u32, u32)>,
    must_miss: Vec<(u32, u32)>,
}

#[derive(Default)]
struct Endpoints(Vec<(Point2, Point2)>);

impl Endpoints {
    fn push(&mut self, a: Point2, b: Point2) -> u32 {
        self.0.push((a, b));
        (self.0.len() - 1) as u32
    }

    fn get(&self, index: u32) -> (Point2, Point2) {
        self.0[index as usize]
    }
}

/// A few hundred segments per set: random crossings, axis-aligned lines, collinear
/// overlaps, endpoint contacts, point segments on both sides, and near misses.
fn generated_scene(seed: u64) -> GeneratedScene {
    let p = Point2::new;
    let mut rng = XorShift(seed);
    let mut base = Endpoints::default();
    let mut query = Endpoints::default();
    let mut must_hit = Vec::new();
    let mut must_miss = Vec::new();

    let mut random_bases = Vec::new();
    for _ in 0..200 {
        random_bases.push(base.push(rng.point(), rng.point()));
        query.push(rng.point(), rng.point());
    }

    for _ in 0..40 {
        let (a, b, c) = (rng.grid(), rng.grid(), rng.grid());
        base.push(p(a, b), p(c, b));
        query.push(p(b, a), p(b, c));
    }

    // Collinear along y = 6: overlap, end-to-end contact, and a gap.
    let overlapped = base.push(p(5.0, 6.0), p(6.0, 6.0));
    let touched = base.push(p(7.0, 6.0), p(7.5, 6.0));
    let along = query.push(p(5.5, 6.0), p(7.0, 6.0));
    let beyond = query.push(p(7.75, 6.0), p(8.0, 6.0));
    must_hit.extend([(along, overlapped), (along, touched)]);
    must_miss.extend([(beyond, touched), (beyond, overlapped)]);

    // Collinear along x = -6, traversed in the opposite direction.
    let vertical = base.push(p(-6.0, 5.0), p(-6.0, 7.0));
    let reversed = query.push(p(-6.0, 7.5), p(-6.0, 6.0));
    must_hit.push((reversed, vertical));

    // Queries leaving from base endpoints.
    for &b in &random_bases[..30] {
        let start = base.get(b).0;
        must_hit.push((query.push(start, rng.point()), b));
    }

    // Point queries on base midpoints and endpoints, plus stray ones.
    for &b in &random_bases[30..50] {
        let mid = midpoint(base.get(b));
        must_hit.push((query.push(mid, mid), b));
    }
    for &b in &random_bases[50..60] {
        let end = base.get(b).1;
        must_hit.push((query.push(end, end), b));
    }
    for _ in 0..10 {
        let point = rng.point();
        query.push(point, point);
    }

    // Point bases on query midpoints, plus stray ones.
    for q in 0..20 {
        let mid = midpoint(query.get(q));
        must_hit.push((q, base.push(mid, mid)));
    }
    for _ in 0..10 {
        let point = rng.point();
        base.push(point, point);
    }

    // Near misses around a horizontal base, and one true contact.
    let ledge = base.push(p(-7.0, -7.0), p(-5.0, -7.0));
    let above = query.push(p(-7.0, -7.0 + NEAR_MISS), p(-5.0, -7.0 + NEAR_MISS));
    let short = query.push(p(-6.0, -6.0), p(-6.0, -7.0 + NEAR_MISS));
    let past_end = query.push(p(-5.0 + NEAR_MISS, -8.0), p(-5.0 + NEAR_MISS, -6.0));
    let landing = query.push(p(-6.5, -6.0), p(-6.5, -7.0));
    must_miss.extend([(above, ledge), (short, ledge), (past_end, ledge)]);
    must_hit.push((landing, ledge));

    GeneratedScene {
        query: SegmentSet::from_endpoints(query.0).unwrap(),
        base: SegmentSet::from_endpoints(base.0).unwrap(),
        must_hit,
        must_miss,
    }
}

const SEEDS: [u64; 3] = [0x5eed_0001, 0x0bad_cafe, 0x1234_5678_9abc];

#[test]
fn generated_scene_covers_edge_cases() {
    for seed in SEEDS {
        let scene = generated_scene(seed);
        assert!(scene.query.len() >= 300, "seed {seed:#x}");
        assert!(scene.base.len() >= 250, "seed {seed:#x}");

        let expected = pairs(&brute_force(&scene.query, &scene.base).unwrap());
        for pair in &scene.must_hit {
            assert!(expected.binary_search(pair).is_ok(), "seed {seed:#x}: {pair:?} missing");
        }
        for pair in &scene.must_miss {
            assert!(expected.binary_search(pair).is_err(), "seed {seed:#x}: {pair:?} found");
        }
    }
}

#[test]
fn generated_scenes_match_reference() {
    let capacity = 1 << 16;
    let Some(mut engine) = engine(capacity) else {
        return;
    };

    for seed in SEEDS {
        let scene = generated_scene(seed);
        let expected = brute_force(&scene.query, &scene.base).unwrap();
        assert!(expected.len() < capacity as usize);

        let outcome = engine.query(&scene.query, &scene.base).unwrap();
        assert!(!outcome.overflowed(), "seed {seed:#x}");
        assert_eq!(outcome.reported_count as usize, expected.len(), "seed {seed:#x}");

        let found = pairs(&outcome.hits);
        let mut unique = found.clone();
        unique.dedup();
        assert_eq!(unique.len(), found.len(), "seed {seed:#x}: duplicate pairs");

        assert_eq!(found, pairs(&expected), "seed {seed:#x}");
        for pair in &scene.must_hit {
            assert!(found.binary_search(pair).is_ok(), "seed {seed:#x}: {pair:?} missing");
        }
    }
}

#[test]
fn demo_scene_matches_reference() {
    let Some(mut engine) = engine(1024) else {
        return;
    };
    let scene = Scene::demo();

    let mut outcome = engine.query(&scene.query, &scene.base).unwrap();
    outcome.sort_by_pair();

    let expected = brute_force(&scene.query, &scene.base).unwrap();
    assert_eq!(outcome.reported_count, 6);
    assert!(!outcome.overflowed());
    assert_eq!(pairs(&outcome.hits), pairs(&expected));

    for (hit, reference) in outcome.hits.iter().zip(&expected) {
        assert_abs_diff_eq!(hit.hit_x, reference.hit_x, epsilon = 1e-4);
        assert_abs_diff_eq!(hit.hit_y, reference.hit_y, epsilon = 1e-4);
    }
}

#[test]
fn overflow_keeps_true_count() {
    let Some(mut engine) = engine(2) else {
        return;
    };
    let scene = Scene::demo();

    let outcome = engine.query(&scene.query, &scene.base).unwrap();
    assert_eq!(outcome.reported_count, 6);
    assert_eq!(outcome.hits.len(), 2);
    assert_eq!(outcome.dropped(), 4);

    let expected = pairs(&brute_force(&scene.query, &scene.base).unwrap());
    for pair in pairs(&outcome.hits) {
        assert!(expected.contains(&pair), "unexpected pair {pair:?}");
    }
}

#[test]
fn zero_capacity_counts_without_records() {
    let Some(mut engine) = engine(0) else {
        return;
    };
    let scene = Scene::demo();

    let outcome = engine.query(&scene.query, &scene.base).unwrap();
    assert!(outcome.hits.is_empty());
    assert_eq!(outcome.reported_count, 6);
}

#[test]
fn empty_inputs_report_nothing() {
    let Some(mut engine) = engine(16) else {
        return;
    };
    let scene = Scene::demo();

    let outcome = engine.query(&SegmentSet::default(), &scene.base).unwrap();
    assert_eq!(outcome.reported_count, 0);
    assert!(outcome.hits.is_empty());

    let outcome = engine.query(&scene.query, &SegmentSet::default()).unwrap();
    assert_eq!(outcome.reported_count, 0);
}

#[test]
fn isolated_query_has_no_hits() {
    let Some(mut engine) = engine(16) else {
        return;
    };
    let scene = Scene::demo();
    let far_away = SegmentSet::from_endpoints([
        (Point2::new(5.0, 5.0), Point2::new(6.0, 5.0)),
        (Point2::new(-1.0, 0.0), Point2::new(1.0, 0.0)),
    ])
    .unwrap();

    let outcome = engine.query(&far_away, &scene.base).unwrap();
    assert!(outcome.hits.iter().all(|hit| hit.query_index == 1));
    assert_eq!(outcome.reported_count, 3);
}

#[test]
fn rejects_out_of_range_indices() {
    let Some(mut engine) = engine(16) else {
        return;
    };
    let scene = Scene::demo();
    let mut broken = scene.query.clone();
    broken.segments[0].b = 99;

    assert!(matches!(
        engine.query(&broken, &scene.base),
        Err(EngineError::InvalidInput(_))
    ));
}
