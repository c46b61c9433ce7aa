//! Exact segment-segment intersection on the CPU.
//!
//! Mirrors the test performed by the intersection stage, so the device output can be
//! checked pair-for-pair. Endpoint contact counts as an intersection.

use glam::Vec2;
use rayon::prelude::*;

use crate::error::Result;
use crate::types::{HitRecord, SegmentSet};

/// Whether `num / denom` lies in `[0, 1]`, decided without dividing.
#[inline]
fn unit_ratio(num: f32, denom: f32) -> bool {
    if denom > 0.0 {
        (0.0..=denom).contains(&num)
    } else {
        (denom..=0.0).contains(&num)
    }
}

/// Intersect query segment `p1`-`p2` with base segment `q1`-`q2`.
///
/// Returns the parameter `t` along the query segment and the intersection point.
/// Collinear overlaps report the first overlapping point along the query.
pub fn intersect_segments(p1: Vec2, p2: Vec2, q1: Vec2, q2: Vec2) -> Option<(f32, Vec2)> {
    let r = p2 - p1;
    let s = q2 - q1;
    let qp = q1 - p1;

    let rr = r.dot(r);
    let ss = s.dot(s);

    // Point-like segments
    if rr == 0.0 && ss == 0.0 {
        return (p1 == q1).then_some((0.0, p1));
    }
    if rr == 0.0 {
        let d = p1 - q1;
        return (d.perp_dot(s) == 0.0 && unit_ratio(d.dot(s), ss)).then_some((0.0, p1));
    }
    if ss == 0.0 {
        let t = qp.dot(r);
        return (qp.perp_dot(r) == 0.0 && unit_ratio(t, rr)).then(|| (t / rr, q1));
    }

    let denom = r.perp_dot(s);
    if denom != 0.0 {
        let t = qp.perp_dot(s);
        let u = qp.perp_dot(r);
        if unit_ratio(t, denom) && unit_ratio(u, denom) {
            let t = t / denom;
            return Some((t, p1 + r * t));
        }
        return None;
    }

    // Parallel
    if qp.perp_dot(r) != 0.0 {
        return None;
    }

    // Collinear: project the base segment onto the query, in units of `rr`
    let t0 = qp.dot(r);
    let t1 = t0 + s.dot(r);
    let lo = t0.min(t1).max(0.0);
    let hi = t0.max(t1).min(rr);
    (lo <= hi).then(|| {
        let t = lo / rr;
        (t, p1 + r * t)
    })
}

/// All intersecting `(query, base)` pairs by exhaustive testing, sorted by pair.
pub fn brute_force(query: &SegmentSet, base: &SegmentSet) -> Result<Vec<HitRecord>> {
    query.validate()?;
    base.validate()?;

    let base_endpoints: Vec<(Vec2, Vec2)> = (0..base.len())
        .map(|i| base.endpoints(i).map(|(p, q)| (p.into(), q.into())))
        .collect::<Result<_>>()?;

    let query_endpoints: Vec<(Vec2, Vec2)> = (0..query.len())
        .map(|i| query.endpoints(i).map(|(p, q)| (p.into(), q.into())))
        .collect::<Result<_>>()?;

    let mut hits: Vec<HitRecord> = query_endpoints
        .par_iter()
        .enumerate()
        .flat_map_iter(|(qi, &(p1, p2))| {
            base_endpoints
                .iter()
                .enumerate()
                .filter_map(move |(bi, &(q1, q2))| {
                    intersect_segments(p1, p2, q1, q2).map(|(_, point)| HitRecord {
                        query_index: qi as u32,
                        base_index: bi as u32,
                        hit_x: point.x,
                        hit_y: point.y,
                    })
                })
        })
        .collect();

    hits.sort_by_key(HitRecord::pair);
    tracing::debug!(
        "reference: {} queries x {} bases -> {} hits",
        query.len(),
        base.len(),
        hits.len()
    );
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Scene;
    use crate::types::Point2;
    use approx::assert_relative_eq;

    fn v(x: f32, y: f32) -> Vec2 {
        Vec2::new(x, y)
    }

    #[test]
    fn crossing_segments() {
        let (t, p) = intersect_segments(v(-1.0, 0.0), v(1.0, 0.0), v(0.0, -1.0), v(0.0, 1.0)).unwrap();
        assert_relative_eq!(t, 0.5);
        assert_relative_eq!(p.x, 0.0);
        assert_relative_eq!(p.y, 0.0);
    }

    #[test]
    fn disjoint_segments() {
        assert!(intersect_segments(v(0.0, 0.0), v(1.0, 0.0), v(2.0, -1.0), v(2.0, 1.0)).is_none());
        assert!(intersect_segments(v(0.0, 0.0), v(1.0, 1.0), v(0.0, 1.0), v(0.4, 0.6)).is_none());
    }

    #[test]
    fn endpoint_contact_counts() {
        let (t, p) = intersect_segments(v(0.0, 0.0), v(1.0, 0.0), v(1.0, 0.0), v(1.0, 1.0)).unwrap();
        assert_relative_eq!(t, 1.0);
        assert_relative_eq!(p.x, 1.0);
    }

    #[test]
    fn unit_ratio_bounds() {
        assert!(unit_ratio(0.0, 2.0));
        assert!(unit_ratio(2.0, 2.0));
        assert!(unit_ratio(-2.0, -2.0));
        assert!(unit_ratio(0.0, -3.0));
        assert!(!unit_ratio(1.0, -3.0));
        assert!(!unit_ratio(-0.5, 2.0));
        assert!(!unit_ratio(1.0 + f32::EPSILON, 1.0));
    }

    #[test]
    fn parallel_segments_miss() {
        assert!(intersect_segments(v(0.0, 0.0), v(1.0, 0.0), v(0.0, 1.0), v(1.0, 1.0)).is_none());
    }

    #[test]
    fn collinear_overlap_reports_first_point() {
        let (t, p) = intersect_segments(v(0.0, 0.0), v(4.0, 0.0), v(3.0, 0.0), v(1.0, 0.0)).unwrap();
        assert_relative_eq!(t, 0.25);
        assert_relative_eq!(p.x, 1.0);

        assert!(intersect_segments(v(0.0, 0.0), v(1.0, 0.0), v(2.0, 0.0), v(3.0, 0.0)).is_none());
    }

    #[test]
    fn point_segments() {
        assert!(intersect_segments(v(0.5, 0.0), v(0.5, 0.0), v(0.0, 0.0), v(1.0, 0.0)).is_some());
        assert!(intersect_segments(v(0.5, 0.1), v(0.5, 0.1), v(0.0, 0.0), v(1.0, 0.0)).is_none());

        let (t, _) = intersect_segments(v(0.0, 0.0), v(2.0, 0.0), v(1.5, 0.0), v(1.5, 0.0)).unwrap();
        assert_relative_eq!(t, 0.75);

        assert!(intersect_segments(v(1.0, 1.0), v(1.0, 1.0), v(1.0, 1.0), v(1.0, 1.0)).is_some());
    }

    #[test]
    fn demo_scene_hits() {
        let scene = Scene::demo();
        let hits = brute_force(&scene.query, &scene.base).unwrap();
        let pairs: Vec<(u32, u32)> = hits.iter().map(HitRecord::pair).collect();

        // y = 0 crosses every base segment; y = 0.2 crosses bases 1 and 2 and
        // touches the upper endpoint of base 0.
        assert_eq!(pairs, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);

        assert_relative_eq!(hits[0].hit_x, -0.5, epsilon = 1e-6);
        assert_relative_eq!(hits[1].hit_x, 0.15, epsilon = 1e-6);
        assert_relative_eq!(hits[2].hit_x, 0.5, epsilon = 1e-6);
        assert_relative_eq!(hits[3].hit_x, -0.2, epsilon = 1e-6);
        assert_relative_eq!(hits[4].hit_x, 0.316_666_7, epsilon = 1e-5);
        assert_relative_eq!(hits[5].hit_x, 0.65, epsilon = 1e-5);
        for hit in &hits[..3] {
            assert_relative_eq!(hit.hit_y, 0.0, epsilon = 1e-6);
        }
        for hit in &hits[3..] {
            assert_relative_eq!(hit.hit_y, 0.2, epsilon = 1e-6);
        }
    }

    #[test]
    fn query_without_hits_yields_nothing() {
        let query = SegmentSet::from_endpoints([
            (Point2::new(-1.0, 0.0), Point2::new(1.0, 0.0)),
            (Point2::new(-1.0, 5.0), Point2::new(1.0, 5.0)),
        ])
        .unwrap();
        let base = SegmentSet::from_endpoints([(Point2::new(0.0, -1.0), Point2::new(0.0, 1.0))]).unwrap();
        let hits = brute_force(&query, &base).unwrap();

        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|h| h.query_index != 1));
    }

    #[test]
    fn empty_sets() {
        let scene = Scene::demo();
        assert!(brute_force(&SegmentSet::default(), &scene.base).unwrap().is_empty());
        assert!(brute_force(&scene.query, &SegmentSet::default()).unwrap().is_empty());
    }
}
