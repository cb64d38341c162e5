//! Portal lifecycle registry and deferred teleportation for a persistent two-dimension world.
//!
//! A host embeds one [`WorldSession`] per world, forwards block interactions and entity
//! contact to it, and calls [`WorldSession::on_tick_end`] once per tick to carry out the
//! teleports those interactions queued.

pub mod frame;
pub mod geometry;
pub mod persistence;
pub mod portal;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state_machine;
pub mod teleport;

pub use frame::{
    detect_frame, validate, ActivationArea, FrameBounds, FrameRegion, ValidationError,
};
pub use geometry::{BlockPos, DimensionKey, FrameAxis};
pub use persistence::{
    CallbackSaveHook, CompoundSaveHook, DirectorySaveHook, LoadReport, PersistenceError, SaveHook,
    SaveSummary,
};
pub use portal::{PortalId, PortalRecord, PortalState};
pub use registry::{DuplicateOrigin, PortalRegistry, Transition};
pub use routes::{DimensionRoute, DimensionRoutes};
pub use session::{BlockView, HostBridge, InteractionOutcome, SessionConfig, WorldSession};
pub use state_machine::{PortalEvent, TransitionError};
pub use teleport::{
    AppliedTeleport, EntityRef, RelocationError, TeleportOutcome, TeleportQueue, TeleportRequest,
};
