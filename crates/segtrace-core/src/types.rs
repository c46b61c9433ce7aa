//! Geometry sets and the record layouts shared with the ray tracing stages.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Single-precision 2D point (8 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    /// Create a point.
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<Vec2> for Point2 {
    fn from(v: Vec2) -> Self {
        Self::new(v.x, v.y)
    }
}

impl From<Point2> for Vec2 {
    fn from(p: Point2) -> Self {
        Self::new(p.x, p.y)
    }
}

impl From<[f32; 2]> for Point2 {
    fn from([x, y]: [f32; 2]) -> Self {
        Self::new(x, y)
    }
}

/// Segment given as an ordered pair of indices into a points array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub a: u32,
    pub b: u32,
}

impl Segment {
    /// Create a segment from two point indices.
    #[inline]
    pub const fn new(a: u32, b: u32) -> Self {
        Self { a, b }
    }
}

/// Segment record as stored in device buffers (16-byte stride).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuSegment {
    pub a: u32,
    pub b: u32,
    pub _padding: [u32; 2],
}

impl From<Segment> for GpuSegment {
    fn from(s: Segment) -> Self {
        Self {
            a: s.a,
            b: s.b,
            _padding: [0; 2],
        }
    }
}

/// One intersection between a query segment and a base segment (16 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct HitRecord {
    /// Index into the query segment array.
    pub query_index: u32,
    /// Index into the base segment array.
    pub base_index: u32,
    /// Intersection point, X.
    pub hit_x: f32,
    /// Intersection point, Y.
    pub hit_y: f32,
}

impl HitRecord {
    /// The `(query, base)` pair this record reports.
    #[inline]
    pub const fn pair(&self) -> (u32, u32) {
        (self.query_index, self.base_index)
    }

    /// The intersection point.
    #[inline]
    pub const fn point(&self) -> Point2 {
        Point2::new(self.hit_x, self.hit_y)
    }
}

/// Push constants for one dispatch (16 bytes).
///
/// Visible to the ray generation, intersection, and any-hit stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct QueryPushConstants {
    /// Number of query segments (launch width).
    pub query_segment_count: u32,
    /// Number of records the results buffer can hold.
    pub result_capacity: u32,
    /// Padding for alignment.
    pub _padding: [u32; 2],
}

impl QueryPushConstants {
    /// Size of push constants in bytes.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    /// Create the push constant block for a dispatch.
    pub const fn new(query_segment_count: u32, result_capacity: u32) -> Self {
        Self {
            query_segment_count,
            result_capacity,
            _padding: [0; 2],
        }
    }
}

/// A points array and the segments indexing into it.
///
/// Query and base geometry are two independent sets; indices never cross between them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentSet {
    pub points: Vec<Point2>,
    pub segments: Vec<Segment>,
}

impl SegmentSet {
    /// Create a set from points and segments.
    pub fn new(points: Vec<Point2>, segments: Vec<Segment>) -> Self {
        Self { points, segments }
    }

    /// Build a set from explicit endpoint pairs, two fresh points per segment.
    ///
    /// Fails once the points no longer fit u32 indices.
    pub fn from_endpoints<I>(endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Point2, Point2)>,
    {
        let mut set = Self::default();
        for (p, q) in endpoints {
            let a = endpoint_pair_index(set.points.len())?;
            set.points.push(p);
            set.points.push(q);
            set.segments.push(Segment::new(a, a + 1));
        }
        Ok(set)
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if there are no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Endpoints of segment `index`.
    pub fn endpoints(&self, index: usize) -> Result<(Point2, Point2)> {
        let segment = self
            .segments
            .get(index)
            .ok_or_else(|| Error::OutOfBounds(format!("segment {index} of {}", self.len())))?;
        let point = |i: u32| {
            self.points.get(i as usize).copied().ok_or_else(|| {
                Error::OutOfBounds(format!(
                    "segment {index} references point {i} of {}",
                    self.points.len()
                ))
            })
        };
        Ok((point(segment.a)?, point(segment.b)?))
    }

    /// Check that every segment references existing points and the set fits u32 indexing.
    pub fn validate(&self) -> Result<()> {
        if u32::try_from(self.segments.len()).is_err() || u32::try_from(self.points.len()).is_err()
        {
            return Err(Error::InvalidData(
                "segment set exceeds u32 indexing".to_string(),
            ));
        }

        let count = self.points.len();
        if let Some((i, s)) = self
            .segments
            .iter()
            .enumerate()
            .find(|(_, s)| s.a as usize >= count || s.b as usize >= count)
        {
            return Err(Error::OutOfBounds(format!(
                "segment {i} ({}, {}) with {count} points",
                s.a, s.b
            )));
        }

        if let Some(i) = self
            .points
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(Error::InvalidData(format!("point {i} is not finite")));
        }

        Ok(())
    }

    /// Segment records in device layout.
    pub fn gpu_segments(&self) -> Vec<GpuSegment> {
        self.segments.iter().copied().map(GpuSegment::from).collect()
    }
}

/// Index of the first of two points appended after `len` existing ones.
fn endpoint_pair_index(len: usize) -> Result<u32> {
    u32::try_from(len)
        .ok()
        .filter(|&a| a < u32::MAX)
        .ok_or_else(|| Error::InvalidData(format!("{len} points exceed u32 indexing")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes() {
        assert_eq!(std::mem::size_of::<Point2>(), 8);
        assert_eq!(std::mem::size_of::<GpuSegment>(), 16);
        assert_eq!(std::mem::size_of::<HitRecord>(), 16);
        assert_eq!(QueryPushConstants::SIZE, 16);
    }

    #[test]
    fn push_constants_layout() {
        let pc = QueryPushConstants::new(7, 1024);
        let bytes = bytemuck::bytes_of(&pc);

        assert_eq!(&bytes[0..4], &7u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &1024u32.to_ne_bytes());
        assert_eq!(&bytes[8..16], &[0u8; 8]);
    }

    #[test]
    fn hit_record_layout() {
        let hit = HitRecord {
            query_index: 3,
            base_index: 9,
            hit_x: 0.5,
            hit_y: -0.25,
        };
        let bytes = bytemuck::bytes_of(&hit);

        assert_eq!(&bytes[0..4], &3u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &9u32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &0.5f32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &(-0.25f32).to_ne_bytes());
        assert_eq!(hit.pair(), (3, 9));
    }

    #[test]
    fn from_endpoints_assigns_fresh_points() {
        let set = SegmentSet::from_endpoints([
            (Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)),
            (Point2::new(2.0, 2.0), Point2::new(3.0, 3.0)),
        ])
        .unwrap();

        assert_eq!(set.points.len(), 4);
        assert_eq!(set.segments, vec![Segment::new(0, 1), Segment::new(2, 3)]);
        assert_eq!(
            set.endpoints(1).unwrap(),
            (Point2::new(2.0, 2.0), Point2::new(3.0, 3.0))
        );
        assert!(set.validate().is_ok());
    }

    #[test]
    fn endpoint_indices_stop_at_u32() {
        assert_eq!(endpoint_pair_index(0).unwrap(), 0);
        assert_eq!(endpoint_pair_index(u32::MAX as usize - 1).unwrap(), u32::MAX - 1);
        assert!(matches!(
            endpoint_pair_index(u32::MAX as usize),
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(
            endpoint_pair_index(usize::MAX),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn validate_rejects_dangling_index() {
        let set = SegmentSet::new(
            vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)],
            vec![Segment::new(0, 1), Segment::new(1, 2)],
        );

        assert!(matches!(set.validate(), Err(Error::OutOfBounds(_))));
        assert!(set.endpoints(1).is_err());
    }

    #[test]
    fn validate_rejects_nan() {
        let set = SegmentSet::from_endpoints([(Point2::new(f32::NAN, 0.0), Point2::new(1.0, 0.0))])
            .unwrap();
        assert!(matches!(set.validate(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn gpu_segments_are_padded() {
        let set = SegmentSet::new(vec![Point2::default(); 6], vec![Segment::new(4, 5)]);
        let gpu = set.gpu_segments();
        assert_eq!(
            gpu,
            vec![GpuSegment {
                a: 4,
                b: 5,
                _padding: [0, 0]
            }]
        );
    }
}
