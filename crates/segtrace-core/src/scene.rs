//! Query/base scene files.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Point2, Segment, SegmentSet};

/// Both inputs of one batch query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Segments dispatched as rays.
    pub query: SegmentSet,
    /// Segments built into the acceleration structure.
    pub base: SegmentSet,
}

impl Scene {
    /// Parse a scene from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let scene: Self = serde_json::from_str(json)?;
        scene.query.validate()?;
        scene.base.validate()?;
        Ok(scene)
    }

    /// Load a scene from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Serialize the scene to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Three slanted base segments crossed by two horizontal query lines.
    pub fn demo() -> Self {
        let base = SegmentSet::new(
            vec![
                Point2::new(-0.8, -0.2),
                Point2::new(-0.2, 0.2),
                Point2::new(-0.1, -0.3),
                Point2::new(0.4, 0.3),
                Point2::new(0.2, -0.4),
                Point2::new(0.8, 0.4),
            ],
            vec![Segment::new(0, 1), Segment::new(2, 3), Segment::new(4, 5)],
        );
        let query = SegmentSet::new(
            vec![
                Point2::new(-1.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(-1.0, 0.2),
                Point2::new(1.0, 0.2),
            ],
            vec![Segment::new(0, 1), Segment::new(2, 3)],
        );
        Self { query, base }
    }
}
