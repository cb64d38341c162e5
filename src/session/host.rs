use crate::geometry::{BlockPos, DimensionKey};
use crate::teleport::{EntityRef, RelocationError};
use cgmath::Point3;

/// Read-only view of the host's blocks, used for frame detection.
pub trait BlockView {
    fn is_frame_material(&self, dimension: &DimensionKey, pos: BlockPos) -> bool;
    fn is_passable(&self, dimension: &DimensionKey, pos: BlockPos) -> bool;
}

/// Calls made back into the host. Only invoked from
/// [`WorldSession::on_tick_end`](super::WorldSession::on_tick_end).
pub trait HostBridge {
    fn relocate_entity(
        &mut self,
        entity: EntityRef,
        dimension: &DimensionKey,
        position: Point3<f64>,
    ) -> Result<(), RelocationError>;

    /// Cosmetic transition for a relocated participant. Returns whether the host showed it.
    fn request_fade_effect(&mut self, participant: EntityRef) -> bool;
}
