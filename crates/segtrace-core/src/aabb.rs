//! Bounding boxes for procedural base-segment geometry.
//!
//! The acceleration structure primitive format is 3D, so each planar segment gets a
//! thin slab of half-thickness `epsilon` around z = 0.

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};
use crate::types::{Point2, SegmentSet};

/// AABB positions for procedural geometry (24 bytes, `VkAabbPositionsKHR` layout).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AabbPositions {
    pub min_x: f32,
    pub min_y: f32,
    pub min_z: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub max_z: f32,
}

impl AabbPositions {
    /// Box around the segment `p`-`q`, grown by `epsilon` on every axis.
    pub fn from_segment(p: Point2, q: Point2, epsilon: f32) -> Self {
        Self {
            min_x: p.x.min(q.x) - epsilon,
            min_y: p.y.min(q.y) - epsilon,
            min_z: -epsilon,
            max_x: p.x.max(q.x) + epsilon,
            max_y: p.y.max(q.y) + epsilon,
            max_z: epsilon,
        }
    }

    /// Returns true if the point (at z = 0) lies inside the box, boundary included.
    pub fn contains(&self, p: Point2) -> bool {
        (self.min_x..=self.max_x).contains(&p.x)
            && (self.min_y..=self.max_y).contains(&p.y)
            && (self.min_z..=self.max_z).contains(&0.0)
    }

    /// Returns true if the two boxes share any point, boundary included.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
            && self.min_z <= other.max_z
            && other.min_z <= self.max_z
    }

    /// Returns true if every extent is strictly positive.
    pub fn has_volume(&self) -> bool {
        self.max_x > self.min_x && self.max_y > self.min_y && self.max_z > self.min_z
    }
}

/// One box per base segment, in segment order.
///
/// `AABB[i]` bounds segment `i`; the intersection stage recovers the segment from the
/// primitive index, so the order must not change.
pub fn segment_aabbs(base: &SegmentSet, epsilon: f32) -> Result<Vec<AabbPositions>> {
    if !(epsilon.is_finite() && epsilon > 0.0) {
        return Err(Error::Config(format!(
            "AABB epsilon must be positive and finite, got {epsilon}"
        )));
    }

    (0..base.len())
        .map(|i| {
            let (p, q) = base.endpoints(i)?;
            Ok(AabbPositions::from_segment(p, q, epsilon))
        })
        .collect()
}
