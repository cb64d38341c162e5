use cgmath::Point3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of one simulated space, e.g. `overworld`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionKey(String);

impl DimensionKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DimensionKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Integer block coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            z: self.z.saturating_add(dz),
        }
    }

    /// Step `amount` blocks along the horizontal `axis`.
    pub fn along(self, axis: FrameAxis, amount: i32) -> Self {
        match axis {
            FrameAxis::X => self.offset(amount, 0, 0),
            FrameAxis::Z => self.offset(0, 0, amount),
        }
    }

    pub fn up(self, amount: i32) -> Self {
        self.offset(0, amount, 0)
    }

    pub fn distance_squared(self, other: BlockPos) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        let dz = i64::from(self.z) - i64::from(other.z);
        dx.saturating_mul(dx)
            .saturating_add(dy.saturating_mul(dy))
            .saturating_add(dz.saturating_mul(dz))
    }

    /// Multiply the horizontal coordinates by `scale`, flooring; y is kept.
    pub fn scaled_horizontal(self, scale: f64) -> Self {
        let scale_axis = |value: i32| {
            let scaled = (f64::from(value) * scale).floor();
            scaled.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
        };
        Self {
            x: scale_axis(self.x),
            y: self.y,
            z: scale_axis(self.z),
        }
    }

    /// Centre of the block's bottom face in continuous world space.
    pub fn to_standing_point(self) -> Point3<f64> {
        Point3::new(
            f64::from(self.x) + 0.5,
            f64::from(self.y),
            f64::from(self.z) + 0.5,
        )
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Horizontal axis the frame's width runs along. Height is always `y`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameAxis {
    #[default]
    X,
    Z,
}

impl FrameAxis {
    pub const ALL: [FrameAxis; 2] = [FrameAxis::X, FrameAxis::Z];
}
