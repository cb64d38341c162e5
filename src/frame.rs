use crate::geometry::{BlockPos, FrameAxis};
use cgmath::Point3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_FRAME_WIDTH: u32 = 4;
pub const MIN_FRAME_HEIGHT: u32 = 5;
pub const MAX_FRAME_EXTENT: u32 = 23;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("frame {width}x{height} is below the 4x5 minimum")]
    TooSmall { width: u32, height: u32 },
    #[error("frame {width}x{height} exceeds the 23x23 maximum")]
    TooLarge { width: u32, height: u32 },
    #[error("frame outline is missing frame material at {missing}")]
    IncompleteFrame { missing: BlockPos },
    #[error("frame interior is obstructed at {at}")]
    Obstructed { at: BlockPos },
    #[error("no frame encloses {from}")]
    NoFrameFound { from: BlockPos },
}

/// Outer width and height of a frame, walls included.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameBounds {
    pub width: u32,
    pub height: u32,
}

impl FrameBounds {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width and height are checked independently against their own limits.
    pub fn check(self) -> Result<Self, ValidationError> {
        let Self { width, height } = self;
        if width < MIN_FRAME_WIDTH || height < MIN_FRAME_HEIGHT {
            return Err(ValidationError::TooSmall { width, height });
        }
        if width > MAX_FRAME_EXTENT || height > MAX_FRAME_EXTENT {
            return Err(ValidationError::TooLarge { width, height });
        }
        Ok(self)
    }
}

/// A candidate closed rectangular outline standing upright on `axis`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRegion {
    pub origin: BlockPos,
    pub axis: FrameAxis,
    pub bounds: FrameBounds,
}

impl FrameRegion {
    pub fn new(origin: BlockPos, axis: FrameAxis, bounds: FrameBounds) -> Self {
        Self {
            origin,
            axis,
            bounds,
        }
    }

    fn cell(&self, u: i32, v: i32) -> BlockPos {
        self.origin.along(self.axis, u).up(v)
    }

    /// Frame-local `(u, v)` of `pos`, if it lies in the frame's plane and rectangle.
    fn local_coords(&self, pos: BlockPos) -> Option<(i32, i32)> {
        plane_coords(self.origin, self.axis, self.bounds.width, self.bounds.height, pos)
    }

    /// Outline cells in scan order: bottom row, top row, left column, right column.
    pub fn outline_cells(&self) -> Vec<BlockPos> {
        let w = self.bounds.width as i32;
        let h = self.bounds.height as i32;
        if w <= 0 || h <= 0 {
            return Vec::new();
        }
        let mut cells = Vec::with_capacity((2 * w + 2 * h.saturating_sub(2).max(0)) as usize);
        for u in 0..w {
            cells.push(self.cell(u, 0));
        }
        if h > 1 {
            for u in 0..w {
                cells.push(self.cell(u, h - 1));
            }
        }
        for v in 1..h - 1 {
            cells.push(self.cell(0, v));
        }
        if w > 1 {
            for v in 1..h - 1 {
                cells.push(self.cell(w - 1, v));
            }
        }
        cells
    }

    pub fn contains_outline(&self, pos: BlockPos) -> bool {
        let Some((u, v)) = self.local_coords(pos) else {
            return false;
        };
        u == 0 || v == 0 || u == self.bounds.width as i32 - 1 || v == self.bounds.height as i32 - 1
    }

    pub fn interior(&self) -> ActivationArea {
        ActivationArea {
            min: self.cell(1, 1),
            axis: self.axis,
            width: self.bounds.width.saturating_sub(2),
            height: self.bounds.height.saturating_sub(2),
        }
    }
}

/// `(u, v)` of `pos` relative to `corner` in the plane of `axis`, if it falls inside the
/// `width` x `height` rectangle. Offsets are taken in `i64` so cells at opposite ends of
/// the coordinate range compare without overflow.
fn plane_coords(
    corner: BlockPos,
    axis: FrameAxis,
    width: u32,
    height: u32,
    pos: BlockPos,
) -> Option<(i32, i32)> {
    let delta = |a: i32, b: i32| i64::from(a) - i64::from(b);
    let (u, depth) = match axis {
        FrameAxis::X => (delta(pos.x, corner.x), delta(pos.z, corner.z)),
        FrameAxis::Z => (delta(pos.z, corner.z), delta(pos.x, corner.x)),
    };
    let v = delta(pos.y, corner.y);
    let in_rect = depth == 0
        && (0..i64::from(width)).contains(&u)
        && (0..i64::from(height)).contains(&v);
    if !in_rect {
        return None;
    }
    Some((i32::try_from(u).ok()?, i32::try_from(v).ok()?))
}

/// Interior of a validated frame: the cells a traveler stands in to use the portal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivationArea {
    pub min: BlockPos,
    pub axis: FrameAxis,
    pub width: u32,
    pub height: u32,
}

impl ActivationArea {
    pub fn contains(&self, pos: BlockPos) -> bool {
        plane_coords(self.min, self.axis, self.width, self.height, pos).is_some()
    }

    pub fn cells(&self) -> impl Iterator<Item = BlockPos> + '_ {
        (0..self.height as i32).flat_map(move |v| {
            (0..self.width as i32).map(move |u| self.min.along(self.axis, u).up(v))
        })
    }

    /// Where an arriving traveler is placed: middle of the bottom interior row.
    pub fn arrival_point(&self) -> Point3<f64> {
        let half = (self.width / 2) as i32;
        let mut point = self.min.along(self.axis, half).to_standing_point();
        if self.width % 2 == 0 {
            match self.axis {
                FrameAxis::X => point.x -= 0.5,
                FrameAxis::Z => point.z -= 0.5,
            }
        }
        point
    }

    pub fn is_clear<P>(&self, is_passable: P) -> Result<(), ValidationError>
    where
        P: Fn(BlockPos) -> bool,
    {
        match self.cells().find(|&pos| !is_passable(pos)) {
            Some(at) => Err(ValidationError::Obstructed { at }),
            None => Ok(()),
        }
    }
}

/// Checks that `region` is a complete frame of legal size and returns its interior.
pub fn validate<M>(
    region: &FrameRegion,
    is_frame_material: M,
) -> Result<ActivationArea, ValidationError>
where
    M: Fn(BlockPos) -> bool,
{
    region.bounds.check()?;
    if let Some(missing) = region
        .outline_cells()
        .into_iter()
        .find(|&pos| !is_frame_material(pos))
    {
        return Err(ValidationError::IncompleteFrame { missing });
    }
    Ok(region.interior())
}

fn scan_until_frame<M>(
    start: BlockPos,
    step: impl Fn(BlockPos) -> BlockPos,
    is_frame_material: &M,
) -> Option<(BlockPos, u32)>
where
    M: Fn(BlockPos) -> bool,
{
    let mut pos = start;
    for distance in 0..=MAX_FRAME_EXTENT {
        if is_frame_material(pos) {
            return Some((pos, distance));
        }
        pos = step(pos);
    }
    None
}

fn detect_on_axis<M>(
    start: BlockPos,
    axis: FrameAxis,
    is_frame_material: &M,
) -> Result<FrameRegion, ValidationError>
where
    M: Fn(BlockPos) -> bool,
{
    let not_found = ValidationError::NoFrameFound { from: start };
    let (bottom, _) =
        scan_until_frame(start, |p| p.up(-1), is_frame_material).ok_or(not_found.clone())?;
    let floor = bottom.up(1);
    let (left, _) =
        scan_until_frame(floor, |p| p.along(axis, -1), is_frame_material).ok_or(not_found.clone())?;
    let (_, right_distance) =
        scan_until_frame(floor, |p| p.along(axis, 1), is_frame_material).ok_or(not_found.clone())?;
    let (_, up_distance) =
        scan_until_frame(floor, |p| p.up(1), is_frame_material).ok_or(not_found)?;

    let (left_distance, origin) = match axis {
        FrameAxis::X => ((floor.x - left.x) as u32, BlockPos::new(left.x, bottom.y, floor.z)),
        FrameAxis::Z => ((floor.z - left.z) as u32, BlockPos::new(floor.x, bottom.y, left.z)),
    };
    let width = left_distance + right_distance + 1;
    let height = up_distance + 2;
    Ok(FrameRegion::new(origin, axis, FrameBounds::new(width, height)))
}

/// Locates and validates the frame enclosing the interior cell `start`.
///
/// Each axis is tried in turn; the first one that yields a complete, clear frame wins.
/// When none does, the error from the axis that got furthest is returned.
pub fn detect_frame<M, P>(
    start: BlockPos,
    is_frame_material: M,
    is_passable: P,
) -> Result<(FrameRegion, ActivationArea), ValidationError>
where
    M: Fn(BlockPos) -> bool,
    P: Fn(BlockPos) -> bool,
{
    let mut best_error = ValidationError::NoFrameFound { from: start };
    if is_frame_material(start) {
        return Err(best_error);
    }
    for axis in FrameAxis::ALL {
        let attempt = detect_on_axis(start, axis, &is_frame_material).and_then(|region| {
            let area = validate(&region, &is_frame_material)?;
            area.is_clear(&is_passable)?;
            Ok((region, area))
        });
        match attempt {
            Ok(found) => return Ok(found),
            Err(ValidationError::NoFrameFound { .. }) => {}
            Err(error) => {
                if matches!(best_error, ValidationError::NoFrameFound { .. }) {
                    best_error = error;
                }
            }
        }
    }
    Err(best_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn outline_set(region: &FrameRegion) -> HashSet<BlockPos> {
        region.outline_cells().into_iter().collect()
    }

    fn region(width: u32, height: u32) -> FrameRegion {
        FrameRegion::new(BlockPos::new(10, 64, -3), FrameAxis::X, FrameBounds::new(width, height))
    }

    #[test]
    fn every_legal_size_with_full_outline_validates() {
        for width in MIN_FRAME_WIDTH..=MAX_FRAME_EXTENT {
            for height in MIN_FRAME_HEIGHT..=MAX_FRAME_EXTENT {
                let region = region(width, height);
                let frame = outline_set(&region);
                let area = validate(&region, |pos| frame.contains(&pos))
                    .unwrap_or_else(|error| panic!("{width}x{height} rejected: {error}"));
                assert_eq!(area.width, width - 2);
                assert_eq!(area.height, height - 2);
            }
        }
    }

    #[test]
    fn one_below_either_minimum_is_too_small() {
        for (width, height) in [(3, 5), (4, 4), (3, 23), (23, 4)] {
            let region = region(width, height);
            let frame = outline_set(&region);
            assert_eq!(
                validate(&region, |pos| frame.contains(&pos)),
                Err(ValidationError::TooSmall { width, height })
            );
        }
    }

    #[test]
    fn one_above_maximum_is_too_large() {
        for (width, height) in [(24, 5), (4, 24)] {
            let region = region(width, height);
            assert_eq!(
                validate(&region, |_| true),
                Err(ValidationError::TooLarge { width, height })
            );
        }
    }

    #[test]
    fn missing_corner_reports_incomplete_frame() {
        let region = region(4, 5);
        let mut frame = outline_set(&region);
        let corner = BlockPos::new(13, 68, -3);
        assert!(frame.remove(&corner));
        assert_eq!(
            validate(&region, |pos| frame.contains(&pos)),
            Err(ValidationError::IncompleteFrame { missing: corner })
        );
    }

    #[test]
    fn outline_and_interior_partition_the_rectangle() {
        let region = FrameRegion::new(BlockPos::new(0, 0, 0), FrameAxis::Z, FrameBounds::new(5, 6));
        assert_eq!(region.outline_cells().len(), 2 * 5 + 2 * 4);
        let area = region.interior();
        assert_eq!(area.cells().count(), 3 * 4);
        for cell in area.cells() {
            assert!(!region.contains_outline(cell));
            assert!(area.contains(cell));
        }
        for cell in region.outline_cells() {
            assert!(region.contains_outline(cell));
            assert!(!area.contains(cell));
        }
        assert!(!region.contains_outline(BlockPos::new(1, 0, 0)));
    }

    #[test]
    fn arrival_point_centres_on_even_interior() {
        let area = region(4, 5).interior();
        assert_eq!(area.arrival_point(), Point3::new(12.0, 65.0, -2.5));
        let odd = region(5, 5).interior();
        assert_eq!(odd.arrival_point(), Point3::new(12.5, 65.0, -2.5));
    }

    #[test]
    fn detect_frame_finds_z_axis_frame_from_any_interior_cell() {
        let expected =
            FrameRegion::new(BlockPos::new(4, 70, 8), FrameAxis::Z, FrameBounds::new(6, 7));
        let frame = outline_set(&expected);
        for start in expected.interior().cells() {
            let (found, area) = detect_frame(start, |pos| frame.contains(&pos), |_| true)
                .expect("frame detected");
            assert_eq!(found, expected);
            assert_eq!(area, expected.interior());
        }
    }

    #[test]
    fn detect_frame_reports_obstruction() {
        let expected = region(4, 5);
        let frame = outline_set(&expected);
        let blocker = BlockPos::new(12, 67, -3);
        let result = detect_frame(
            BlockPos::new(11, 65, -3),
            |pos| frame.contains(&pos),
            |pos| pos != blocker,
        );
        assert_eq!(result, Err(ValidationError::Obstructed { at: blocker }));
    }

    #[test]
    fn detect_frame_without_any_frame_blocks_finds_nothing() {
        let start = BlockPos::new(0, 0, 0);
        assert_eq!(
            detect_frame(start, |_| false, |_| true),
            Err(ValidationError::NoFrameFound { from: start })
        );
    }

    #[test]
    fn detect_frame_surfaces_incomplete_outline() {
        let expected = region(4, 5);
        let mut frame = outline_set(&expected);
        let gap = BlockPos::new(13, 66, -3);
        frame.remove(&gap);
        let result = detect_frame(BlockPos::new(11, 65, -3), |pos| frame.contains(&pos), |_| true);
        assert!(matches!(
            result,
            Err(ValidationError::IncompleteFrame { .. }) | Err(ValidationError::TooLarge { .. })
        ));
    }
}
