//! The per-world entry point hosts talk to.
//!
//! Interaction callbacks may fire from inside the host's own entity or block iteration, so
//! they only decide and enqueue. Entities are moved in [`WorldSession::on_tick_end`], after
//! the host has finished iterating.

mod config;
mod host;

pub use config::{
    load_config, save_config, PersistedSessionConfig, SessionConfig, DEFAULT_STORE_KEY,
    LOG_TRANSITIONS_ENV,
};
pub use host::{BlockView, HostBridge};

use crate::frame::{detect_frame, validate, ValidationError};
use crate::geometry::{BlockPos, DimensionKey, FrameAxis};
use crate::persistence::{self, LoadReport, PersistenceError, SaveHook, SaveSummary};
use crate::portal::{PortalId, PortalRecord};
use crate::registry::{PortalRegistry, Transition};
use crate::state_machine::{PortalEvent, TransitionError};
use crate::teleport::{
    AppliedTeleport, EntityRef, TeleportOutcome, TeleportQueue, TeleportRequest,
};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub enum InteractionOutcome {
    Ignited(Transition),
    Stabilized(Transition),
    TeleportQueued { source: PortalId, destination: PortalId },
    /// The held item has no effect on portals.
    NotATrigger,
    NoPortal,
    CoolingDown { until_tick: u64 },
    InvalidFrame(ValidationError),
    Rejected(TransitionError),
}

pub struct WorldSession {
    config: SessionConfig,
    registry: PortalRegistry,
    queue: TeleportQueue,
    recent_travel: Mutex<HashMap<EntityRef, u64>>,
}

impl WorldSession {
    pub fn new(config: SessionConfig) -> Self {
        let registry = PortalRegistry::new(config.routes.clone());
        Self {
            config,
            registry,
            queue: TeleportQueue::new(),
            recent_travel: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SessionConfig::with_defaults())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &PortalRegistry {
        &self.registry
    }

    pub fn pending_teleports(&self) -> usize {
        self.queue.pending_len()
    }

    /// A participant used `trigger_item` on the block at `pos`.
    pub fn on_frame_interaction(
        &self,
        dimension: &DimensionKey,
        pos: BlockPos,
        trigger_item: &str,
        view: &dyn BlockView,
    ) -> InteractionOutcome {
        if self.config.is_stabilization_item(trigger_item) {
            return match self.resolve_target(dimension, pos) {
                Some(portal) => self.on_stabilization_triggered(portal.id()),
                None => InteractionOutcome::NoPortal,
            };
        }
        if !self.config.is_ignition_item(trigger_item) {
            return InteractionOutcome::NotATrigger;
        }

        let known = self
            .registry
            .find_by_frame_cell(dimension, pos)
            .or_else(|| self.registry.find_by_activation_cell(dimension, pos));
        let portal = match known {
            Some(portal) => {
                let still_valid =
                    validate(&portal.region(), |cell| view.is_frame_material(dimension, cell));
                if let Err(error) = still_valid {
                    log::warn!(
                        "[waygate-session] portal {} lost its frame ({error}); removing",
                        portal.id()
                    );
                    self.registry.remove(portal.id());
                    return InteractionOutcome::InvalidFrame(error);
                }
                portal
            }
            None => match self.discover(dimension, pos, view) {
                Ok(portal) => portal,
                Err(error) => {
                    log::debug!(
                        "[waygate-session] ignition at {pos} in {dimension} rejected: {error}"
                    );
                    return InteractionOutcome::InvalidFrame(error);
                }
            },
        };

        match self.run(portal.id(), PortalEvent::Ignite) {
            Ok(transition) => InteractionOutcome::Ignited(transition),
            Err(error) => InteractionOutcome::Rejected(error),
        }
    }

    pub fn on_stabilization_triggered(&self, portal: PortalId) -> InteractionOutcome {
        match self.run(portal, PortalEvent::Stabilize) {
            Ok(transition) => InteractionOutcome::Stabilized(transition),
            Err(error) => InteractionOutcome::Rejected(error),
        }
    }

    /// A traveler moved into the cell `pos`. Enqueues a teleport when that cell is inside a
    /// traversable portal.
    pub fn on_traveler_entered(
        &self,
        dimension: &DimensionKey,
        pos: BlockPos,
        traveler: EntityRef,
    ) -> InteractionOutcome {
        let Some(portal) = self.registry.find_by_activation_cell(dimension, pos) else {
            return InteractionOutcome::NoPortal;
        };
        let tick = self.registry.current_tick();
        if let Some(until_tick) = self.cooldown_until(traveler) {
            if tick < until_tick {
                return InteractionOutcome::CoolingDown { until_tick };
            }
        }

        let transition = match self.run(portal.id(), PortalEvent::Enter) {
            Ok(transition) => transition,
            Err(error) => return InteractionOutcome::Rejected(error),
        };
        let Some(destination) = transition.teleport_to else {
            return InteractionOutcome::Rejected(TransitionError::MissingLink);
        };
        self.queue.enqueue(TeleportRequest {
            traveler,
            source: portal.id(),
            destination: destination.id(),
            raised_tick: tick,
        });
        self.recent_travel.lock().insert(traveler, tick);
        InteractionOutcome::TeleportQueued {
            source: portal.id(),
            destination: destination.id(),
        }
    }

    /// A block at `pos` was destroyed. Removes the portal whose frame it belonged to.
    pub fn on_structure_broken(
        &self,
        dimension: &DimensionKey,
        pos: BlockPos,
    ) -> Option<PortalRecord> {
        let portal = self.registry.find_by_frame_cell(dimension, pos)?;
        let removed = self.registry.remove(portal.id())?;
        log::info!(
            "[waygate-session] frame of portal {} broken at {} in {}",
            removed.id(),
            pos,
            dimension
        );
        Some(removed)
    }

    pub fn on_world_save(&self, hook: &mut dyn SaveHook) -> Result<SaveSummary, PersistenceError> {
        persistence::save_registry(&self.registry, hook, &self.config.store_key).map_err(|error| {
            log::error!("[waygate-session] world save failed: {error}");
            error
        })
    }

    pub fn on_world_load(&self, hook: &mut dyn SaveHook) -> LoadReport {
        self.forget_transient_state();
        persistence::load_registry(&self.registry, hook, &self.config.store_key)
    }

    pub fn load_blob(&self, bytes: &[u8]) -> LoadReport {
        self.forget_transient_state();
        persistence::load_blob(&self.registry, bytes)
    }

    /// Applies every teleport raised during `tick`. Call once, after the host's entity pass.
    pub fn on_tick_end(&self, tick: u64, bridge: &mut dyn HostBridge) -> Vec<AppliedTeleport> {
        if self.queue.is_flushing() {
            log::warn!("[waygate-session] on_tick_end({tick}) called during a flush; ignoring");
            return Vec::new();
        }
        self.registry.advance_tick(tick);
        let registry = &self.registry;
        let applied = self.queue.flush(tick, |request| {
            let Some(destination) = registry.get(request.destination) else {
                return TeleportOutcome::DestinationMissing;
            };
            let position = destination.activation_area().arrival_point();
            match bridge.relocate_entity(request.traveler, destination.dimension(), position) {
                Ok(()) => {
                    if !bridge.request_fade_effect(request.traveler) {
                        log::debug!(
                            "[waygate-session] no fade effect for traveler={:?}",
                            request.traveler
                        );
                    }
                    TeleportOutcome::Relocated {
                        dimension: destination.dimension().clone(),
                        position,
                    }
                }
                Err(error) => TeleportOutcome::RelocationFailed(error),
            }
        });

        let cooldown = self.config.arrival_cooldown_ticks;
        {
            let mut recent = self.recent_travel.lock();
            for entry in applied.iter().filter(|entry| entry.relocated()) {
                recent.insert(entry.request.traveler, tick);
            }
            recent.retain(|_, last| last.saturating_add(cooldown) > tick);
        }
        self.registry.advance_tick(tick.saturating_add(1));
        applied
    }

    fn cooldown_until(&self, traveler: EntityRef) -> Option<u64> {
        let cooldown = self.config.arrival_cooldown_ticks;
        if cooldown == 0 {
            return None;
        }
        self.recent_travel
            .lock()
            .get(&traveler)
            .map(|last| last.saturating_add(cooldown))
    }

    fn forget_transient_state(&self) {
        self.queue.clear();
        self.recent_travel.lock().clear();
    }

    /// Finds the portal a participant is aiming at: the frame or interior cell itself, or
    /// failing that the nearest portal within the proximity radius.
    fn resolve_target(&self, dimension: &DimensionKey, pos: BlockPos) -> Option<PortalRecord> {
        self.registry
            .find_by_frame_cell(dimension, pos)
            .or_else(|| self.registry.find_by_activation_cell(dimension, pos))
            .or_else(|| {
                self.registry
                    .find_near(dimension, pos, self.config.proximity_radius)
                    .into_iter()
                    .next()
            })
    }

    fn discover(
        &self,
        dimension: &DimensionKey,
        pos: BlockPos,
        view: &dyn BlockView,
    ) -> Result<PortalRecord, ValidationError> {
        let is_frame = |cell: BlockPos| view.is_frame_material(dimension, cell);
        // A clicked frame block may sit on any side of the interior.
        let starts: Vec<BlockPos> = if is_frame(pos) {
            [
                pos.up(1),
                pos.up(-1),
                pos.along(FrameAxis::X, 1),
                pos.along(FrameAxis::X, -1),
                pos.along(FrameAxis::Z, 1),
                pos.along(FrameAxis::Z, -1),
            ]
            .into_iter()
            .filter(|&cell| !is_frame(cell))
            .collect()
        } else {
            vec![pos]
        };

        let mut best_error = ValidationError::NoFrameFound { from: pos };
        let mut found = None;
        for start in starts {
            match detect_frame(start, is_frame, |cell| view.is_passable(dimension, cell)) {
                Ok((region, _)) => {
                    found = Some(region);
                    break;
                }
                Err(error) => {
                    if matches!(best_error, ValidationError::NoFrameFound { .. }) {
                        best_error = error;
                    }
                }
            }
        }
        let Some(region) = found else {
            return Err(best_error);
        };

        if let Some(existing) = self.registry.find_at_origin(dimension, region.origin) {
            return Ok(existing);
        }
        let record =
            PortalRecord::from_region(dimension.clone(), &region, self.registry.current_tick())?;
        let id = match self.registry.register(record) {
            Ok(id) => id,
            Err(duplicate) => duplicate.existing,
        };
        self.registry
            .get(id)
            .ok_or(ValidationError::NoFrameFound { from: pos })
    }

    /// Applies `event`, retrying once on a stale read and once after relinking a portal
    /// whose destination is gone.
    fn run(&self, id: PortalId, event: PortalEvent) -> Result<Transition, TransitionError> {
        let mut refreshed = false;
        let mut relinked = false;
        loop {
            let observed = self
                .registry
                .get(id)
                .ok_or(TransitionError::UnknownPortal(id))?
                .last_modified_tick();
            match self.registry.apply_transition(id, observed, event) {
                Ok(transition) => {
                    self.log_transition(&transition);
                    return Ok(transition);
                }
                Err(TransitionError::StaleState { expected, actual }) if !refreshed => {
                    log::debug!(
                        "[waygate-session] {event} on {id} stale ({expected} vs {actual}); retrying"
                    );
                    refreshed = true;
                }
                Err(TransitionError::MissingLink) if !relinked => {
                    self.registry.ensure_destination(id)?;
                    relinked = true;
                }
                Err(error) => {
                    log::debug!("[waygate-session] {event} on {id} rejected: {error}");
                    return Err(error);
                }
            }
        }
    }

    fn log_transition(&self, transition: &Transition) {
        let record = &transition.record;
        if self.config.log_transitions {
            log::info!(
                "[waygate-session] {} {} -> {} (tick {}, partner {:?}, created {})",
                transition.event,
                record.id(),
                record.state(),
                record.last_modified_tick(),
                transition.partner.as_ref().map(PortalRecord::id),
                transition.created_destination
            );
        } else {
            log::debug!(
                "[waygate-session] {} {} -> {}",
                transition.event,
                record.id(),
                record.state()
            );
        }
    }
}
