use crate::geometry::{BlockPos, DimensionKey};
use crate::portal::{PortalId, PortalRecord, PortalState};
use crate::routes::DimensionRoutes;
use crate::state_machine::{self, Effect, PortalEvent, TransitionError};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

const DESTINATION_PLACEMENT_ATTEMPTS: i32 = 8;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("portal {existing} already occupies {origin} in {dimension}")]
pub struct DuplicateOrigin {
    pub dimension: DimensionKey,
    pub origin: BlockPos,
    pub existing: PortalId,
}

/// Result of a committed transition. All records are copies taken after the commit.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub event: PortalEvent,
    /// The portal after the transition, or its last state if it was removed.
    pub record: PortalRecord,
    pub removed: bool,
    /// The linked portal if this transition created or modified it.
    pub partner: Option<PortalRecord>,
    pub created_destination: bool,
    /// Where a traveler should be sent, when the transition calls for a teleport.
    pub teleport_to: Option<PortalRecord>,
}

/// Repairs made while installing a loaded record set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadRepairs {
    pub dropped_duplicates: Vec<PortalId>,
    pub cleared_links: usize,
    pub demoted: usize,
}

impl LoadRepairs {
    pub fn is_empty(&self) -> bool {
        self.dropped_duplicates.is_empty() && self.cleared_links == 0 && self.demoted == 0
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    records: HashMap<PortalId, PortalRecord>,
    origins: HashMap<(DimensionKey, BlockPos), PortalId>,
    current_tick: u64,
    dirty: bool,
}

impl RegistryInner {
    fn stamp_after(&self, previous: u64) -> u64 {
        self.current_tick.max(previous.saturating_add(1))
    }

    fn origin_owner(&self, dimension: &DimensionKey, origin: BlockPos) -> Option<PortalId> {
        self.origins.get(&(dimension.clone(), origin)).copied()
    }

    fn insert(&mut self, record: PortalRecord) {
        self.origins
            .insert((record.dimension.clone(), record.origin), record.id);
        self.records.insert(record.id, record);
    }

    fn remove(&mut self, id: PortalId) -> Option<PortalRecord> {
        let record = self.records.remove(&id)?;
        let key = (record.dimension.clone(), record.origin);
        if self.origins.get(&key) == Some(&id) {
            self.origins.remove(&key);
        }
        Some(record)
    }

    /// Builds (but does not insert) the destination-side portal for `origin_record`.
    fn plan_destination(
        &self,
        origin_record: &PortalRecord,
        routes: &DimensionRoutes,
        stamp: u64,
    ) -> Result<PortalRecord, TransitionError> {
        let no_destination = || TransitionError::NoDestination {
            dimension: origin_record.dimension.clone(),
        };
        let (dimension, scale) = routes
            .resolve(&origin_record.dimension)
            .ok_or_else(no_destination)?;
        let step = origin_record.frame.height as i32 + 1;
        let mut origin = origin_record.origin.scaled_horizontal(scale);
        for _ in 0..DESTINATION_PLACEMENT_ATTEMPTS {
            if self.origin_owner(&dimension, origin).is_none() {
                let mut destination = PortalRecord::new(
                    dimension,
                    origin,
                    origin_record.axis,
                    origin_record.frame,
                    stamp,
                )
                .map_err(|_| no_destination())?;
                destination.state = PortalState::Deactivated;
                destination.linked_portal_id = Some(origin_record.id);
                return Ok(destination);
            }
            origin = origin.up(step);
        }
        Err(no_destination())
    }
}

/// Authoritative set of portals for one world session.
///
/// All mutation goes through [`PortalRegistry::apply_transition`] (or the removal and load
/// paths built on the same locking), and every read returns a copy.
#[derive(Debug)]
pub struct PortalRegistry {
    inner: RwLock<RegistryInner>,
    routes: DimensionRoutes,
}

impl PortalRegistry {
    pub fn new(routes: DimensionRoutes) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            routes,
        }
    }

    pub fn routes(&self) -> &DimensionRoutes {
        &self.routes
    }

    /// Host tick used as the floor for new modification stamps.
    pub fn advance_tick(&self, tick: u64) {
        let mut inner = self.inner.write();
        inner.current_tick = inner.current_tick.max(tick);
    }

    pub fn current_tick(&self) -> u64 {
        self.inner.read().current_tick
    }

    pub fn register(&self, mut record: PortalRecord) -> Result<PortalId, DuplicateOrigin> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.origin_owner(&record.dimension, record.origin) {
            return Err(DuplicateOrigin {
                dimension: record.dimension.clone(),
                origin: record.origin,
                existing,
            });
        }
        record.last_modified_tick = record.last_modified_tick.max(inner.current_tick);
        let id = record.id;
        log::info!(
            "[portal-registry] registered {} in {} at {} ({}x{})",
            id,
            record.dimension,
            record.origin,
            record.frame.width,
            record.frame.height
        );
        inner.insert(record);
        inner.dirty = true;
        Ok(id)
    }

    pub fn get(&self, id: PortalId) -> Option<PortalRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    pub fn find_at_origin(
        &self,
        dimension: &DimensionKey,
        origin: BlockPos,
    ) -> Option<PortalRecord> {
        let inner = self.inner.read();
        let id = inner.origin_owner(dimension, origin)?;
        inner.records.get(&id).cloned()
    }

    /// Portals whose origin lies within `radius` blocks of `pos`, nearest first.
    ///
    /// Linear in the number of portals; a world holds tens of them, not millions.
    pub fn find_near(
        &self,
        dimension: &DimensionKey,
        pos: BlockPos,
        radius: u32,
    ) -> Vec<PortalRecord> {
        let radius_sq = i64::from(radius).saturating_mul(i64::from(radius));
        let inner = self.inner.read();
        let mut found: Vec<(i64, PortalRecord)> = inner
            .records
            .values()
            .filter(|record| &record.dimension == dimension)
            .filter_map(|record| {
                let distance_sq = record.origin.distance_squared(pos);
                (distance_sq <= radius_sq).then(|| (distance_sq, record.clone()))
            })
            .collect();
        found.sort_unstable_by(|(a_dist, a), (b_dist, b)| a_dist.cmp(b_dist).then(a.id.cmp(&b.id)));
        found.into_iter().map(|(_, record)| record).collect()
    }

    /// The portal whose frame outline contains `pos`.
    pub fn find_by_frame_cell(
        &self,
        dimension: &DimensionKey,
        pos: BlockPos,
    ) -> Option<PortalRecord> {
        let inner = self.inner.read();
        let mut matches: Vec<&PortalRecord> = inner
            .records
            .values()
            .filter(|record| {
                &record.dimension == dimension && record.region().contains_outline(pos)
            })
            .collect();
        matches.sort_unstable_by_key(|record| record.id);
        matches.first().map(|record| (*record).clone())
    }

    /// The portal whose interior contains `pos`.
    pub fn find_by_activation_cell(
        &self,
        dimension: &DimensionKey,
        pos: BlockPos,
    ) -> Option<PortalRecord> {
        let inner = self.inner.read();
        let mut matches: Vec<&PortalRecord> = inner
            .records
            .values()
            .filter(|record| {
                &record.dimension == dimension && record.activation_area().contains(pos)
            })
            .collect();
        matches.sort_unstable_by_key(|record| record.id);
        matches.first().map(|record| (*record).clone())
    }

    /// Runs `event` against the portal and commits the result atomically.
    ///
    /// `observed_tick` must equal the record's current `last_modified_tick`; otherwise the
    /// caller is working from a stale copy and gets [`TransitionError::StaleState`].
    pub fn apply_transition(
        &self,
        id: PortalId,
        observed_tick: u64,
        event: PortalEvent,
    ) -> Result<Transition, TransitionError> {
        let mut inner = self.inner.write();
        let current = inner
            .records
            .get(&id)
            .cloned()
            .ok_or(TransitionError::UnknownPortal(id))?;
        if current.last_modified_tick != observed_tick {
            return Err(TransitionError::StaleState {
                expected: observed_tick,
                actual: current.last_modified_tick,
            });
        }

        let stamp = inner.stamp_after(current.last_modified_tick);
        let step = state_machine::transition(&current, event, stamp)?;
        let mut next = step.next;
        let mut staged: Vec<PortalRecord> = Vec::new();
        let mut partner = None;
        let mut teleport_to = None;
        let mut created_destination = false;

        for effect in step.effects {
            match effect {
                Effect::EnsureDestination => {
                    let destination = inner.plan_destination(&current, &self.routes, stamp)?;
                    if let Some(next) = next.as_mut() {
                        next.linked_portal_id = Some(destination.id);
                    }
                    partner = Some(destination.clone());
                    staged.push(destination);
                    created_destination = true;
                }
                Effect::Teleport { destination } => {
                    let target = inner
                        .records
                        .get(&destination)
                        .cloned()
                        .ok_or(TransitionError::MissingLink)?;
                    teleport_to = Some(target);
                }
                Effect::StabilizePartner { partner: partner_id } => {
                    let existing = inner
                        .records
                        .get(&partner_id)
                        .ok_or(TransitionError::MissingLink)?;
                    let partner_stamp = inner.stamp_after(existing.last_modified_tick);
                    let updated = state_machine::stabilize_partner(existing, id, partner_stamp)?;
                    partner = Some(updated.clone());
                    staged.push(updated);
                }
                Effect::DetachPartner { partner: partner_id } => {
                    let linked_back = inner
                        .records
                        .get(&partner_id)
                        .filter(|existing| existing.linked_portal_id == Some(id));
                    if let Some(existing) = linked_back {
                        let partner_stamp = inner.stamp_after(existing.last_modified_tick);
                        let updated = state_machine::detach_partner(existing, partner_stamp);
                        partner = Some(updated.clone());
                        staged.push(updated);
                    }
                }
            }
        }

        let removed = next.is_none();
        let changed = removed || !staged.is_empty() || next.as_ref() != Some(&current);
        let record = match next {
            Some(record) => {
                inner.insert(record.clone());
                record
            }
            None => {
                inner.remove(id);
                current.clone()
            }
        };
        for staged_record in staged {
            inner.insert(staged_record);
        }
        if changed {
            inner.dirty = true;
        }

        if removed {
            log::info!(
                "[portal-registry] removed {} from {} at {}",
                id,
                record.dimension,
                record.origin
            );
        } else if record.state != current.state {
            log::debug!(
                "[portal-registry] {} {} --{}--> {} (tick {})",
                id,
                current.state,
                event,
                record.state,
                record.last_modified_tick
            );
        }
        if created_destination {
            if let Some(destination) = partner.as_ref() {
                log::info!(
                    "[portal-registry] created destination {} in {} at {} for {}",
                    destination.id,
                    destination.dimension,
                    destination.origin,
                    id
                );
            }
        }

        Ok(Transition {
            event,
            record,
            removed,
            partner,
            created_destination,
            teleport_to,
        })
    }

    /// Creates and links a destination for a portal that has lost (or never had) one.
    ///
    /// Does not change the portal's state. Returns the linked destination; an existing
    /// link is returned as-is when it still resolves.
    pub fn ensure_destination(&self, id: PortalId) -> Result<PortalRecord, TransitionError> {
        let mut inner = self.inner.write();
        let current = inner
            .records
            .get(&id)
            .cloned()
            .ok_or(TransitionError::UnknownPortal(id))?;
        if let Some(existing) = current
            .linked_portal_id
            .and_then(|link| inner.records.get(&link).cloned())
        {
            return Ok(existing);
        }
        let stamp = inner.stamp_after(current.last_modified_tick);
        let destination = inner.plan_destination(&current, &self.routes, stamp)?;
        let mut relinked = current;
        relinked.linked_portal_id = Some(destination.id);
        relinked.last_modified_tick = stamp;
        log::info!(
            "[portal-registry] relinked {} to new destination {} in {} at {}",
            id,
            destination.id,
            destination.dimension,
            destination.origin
        );
        inner.insert(relinked);
        inner.insert(destination.clone());
        inner.dirty = true;
        Ok(destination)
    }

    /// Structural destruction or administrative removal of a single portal.
    pub fn remove(&self, id: PortalId) -> Option<PortalRecord> {
        let observed = self.get(id)?.last_modified_tick;
        match self.apply_transition(id, observed, PortalEvent::StructureBroken) {
            Ok(transition) => Some(transition.record),
            Err(TransitionError::StaleState { .. }) => {
                // Raced with another writer; removal does not depend on the observed state.
                let observed = self.get(id)?.last_modified_tick;
                self.apply_transition(id, observed, PortalEvent::StructureBroken)
                    .ok()
                    .map(|transition| transition.record)
            }
            Err(_) => None,
        }
    }

    /// Drops every portal. Returns how many were removed.
    pub fn reset(&self) -> usize {
        let mut inner = self.inner.write();
        let count = inner.records.len();
        inner.records.clear();
        inner.origins.clear();
        if count > 0 {
            inner.dirty = true;
        }
        log::warn!("[portal-registry] administrative reset dropped {count} portals");
        count
    }

    /// All records, ordered by id.
    pub fn snapshot(&self) -> Vec<PortalRecord> {
        let inner = self.inner.read();
        let mut records: Vec<PortalRecord> = inner.records.values().cloned().collect();
        records.sort_unstable_by_key(|record| record.id);
        records
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.read().dirty
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn take_dirty(&self) -> bool {
        std::mem::take(&mut self.inner.write().dirty)
    }

    /// Replaces the whole record set, typically with freshly decoded save data.
    ///
    /// Duplicate origins keep the most recently modified record. Links to missing portals,
    /// or to portals that do not link back, are cleared. Stabilized records without a
    /// symmetric stabilized partner are then demoted, so the stabilized-pair invariant
    /// holds on return.
    pub fn replace_all(&self, records: Vec<PortalRecord>) -> LoadRepairs {
        let mut repairs = LoadRepairs::default();
        let mut ordered = records;
        ordered.sort_by(|a, b| {
            b.last_modified_tick
                .cmp(&a.last_modified_tick)
                .then(a.id.cmp(&b.id))
        });

        let mut fresh = RegistryInner::default();
        let mut seen_ids = HashSet::new();
        for record in ordered {
            let duplicate = !seen_ids.insert(record.id)
                || fresh.origin_owner(&record.dimension, record.origin).is_some();
            if duplicate {
                log::warn!(
                    "[portal-registry] dropping duplicate portal {} in {} at {}",
                    record.id,
                    record.dimension,
                    record.origin
                );
                repairs.dropped_duplicates.push(record.id);
                continue;
            }
            fresh.insert(record);
        }

        let mut ids: Vec<PortalId> = fresh.records.keys().copied().collect();
        ids.sort_unstable();
        let one_sided: Vec<PortalId> = ids
            .iter()
            .copied()
            .filter(|id| {
                fresh.records[id].linked_portal_id.is_some_and(|link| {
                    fresh
                        .records
                        .get(&link)
                        .map_or(true, |partner| partner.linked_portal_id != Some(*id))
                })
            })
            .collect();
        for id in one_sided {
            if let Some(record) = fresh.records.get_mut(&id) {
                log::warn!(
                    "[portal-registry] clearing one-sided link {:?} on portal {}",
                    record.linked_portal_id,
                    id
                );
                record.linked_portal_id = None;
                repairs.cleared_links += 1;
            }
        }
        loop {
            let asymmetric: Vec<PortalId> = ids
                .iter()
                .copied()
                .filter(|id| {
                    let record = &fresh.records[id];
                    if record.state != PortalState::Stabilized {
                        return false;
                    }
                    let partner = record
                        .linked_portal_id
                        .and_then(|link| fresh.records.get(&link));
                    !matches!(
                        partner,
                        Some(partner)
                            if partner.state == PortalState::Stabilized
                                && partner.linked_portal_id == Some(*id)
                    )
                })
                .collect();
            if asymmetric.is_empty() {
                break;
            }
            for id in asymmetric {
                if let Some(record) = fresh.records.get_mut(&id) {
                    record.state = PortalState::Deactivated;
                    repairs.demoted += 1;
                }
            }
        }

        let mut inner = self.inner.write();
        fresh.current_tick = fresh
            .records
            .values()
            .map(|record| record.last_modified_tick)
            .max()
            .unwrap_or(0)
            .max(inner.current_tick);
        fresh.dirty = !repairs.is_empty();
        *inner = fresh;
        repairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBounds;
    use crate::geometry::FrameAxis;

    fn registry() -> PortalRegistry {
        PortalRegistry::new(DimensionRoutes::single(
            DimensionKey::from("overworld"),
            DimensionKey::from("aether"),
            1.0,
        ))
    }

    fn portal(dimension: &str, origin: BlockPos) -> PortalRecord {
        PortalRecord::new(
            DimensionKey::from(dimension),
            origin,
            FrameAxis::X,
            FrameBounds::new(4, 5),
            0,
        )
        .expect("legal frame")
    }

    fn apply(
        registry: &PortalRegistry,
        id: PortalId,
        event: PortalEvent,
    ) -> Result<Transition, TransitionError> {
        let observed = registry.get(id).expect("portal present").last_modified_tick();
        registry.apply_transition(id, observed, event)
    }

    fn assert_stabilized_pairs_symmetric(registry: &PortalRegistry) {
        for record in registry.snapshot() {
            if record.state() != PortalState::Stabilized {
                continue;
            }
            let link = record.linked_portal_id().expect("stabilized portal is linked");
            let partner = registry.get(link).expect("partner exists");
            assert_eq!(partner.linked_portal_id(), Some(record.id()));
            assert_eq!(partner.state(), PortalState::Stabilized);
        }
    }

    #[test]
    fn register_rejects_duplicate_origin() {
        let registry = registry();
        let origin = BlockPos::new(5, 70, 5);
        let first = registry.register(portal("overworld", origin)).expect("first");
        let error = registry
            .register(portal("overworld", origin))
            .expect_err("duplicate");
        assert_eq!(error.existing, first);
        registry
            .register(portal("aether", origin))
            .expect("same origin in another dimension is distinct");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn get_returns_a_detached_copy() {
        let registry = registry();
        let id = registry.register(portal("overworld", BlockPos::new(0, 64, 0))).expect("register");
        let mut copy = registry.get(id).expect("present");
        copy.state = PortalState::Stabilized;
        assert_eq!(registry.get(id).expect("present").state(), PortalState::Inactive);
    }

    #[test]
    fn find_near_orders_by_distance_and_respects_dimension() {
        let registry = registry();
        let far = registry.register(portal("overworld", BlockPos::new(30, 64, 0))).expect("far");
        let near = registry.register(portal("overworld", BlockPos::new(3, 64, 4))).expect("near");
        registry.register(portal("aether", BlockPos::new(1, 64, 0))).expect("other dimension");
        let found: Vec<PortalId> = registry
            .find_near(&DimensionKey::from("overworld"), BlockPos::new(0, 64, 0), 32)
            .iter()
            .map(PortalRecord::id)
            .collect();
        assert_eq!(found, vec![near, far]);
        assert_eq!(
            registry
                .find_near(&DimensionKey::from("overworld"), BlockPos::new(0, 64, 0), 5)
                .len(),
            1
        );
    }

    #[test]
    fn ignite_creates_linked_destination_in_paired_dimension() {
        let registry = registry();
        let id = registry
            .register(portal("overworld", BlockPos::new(8, 64, -8)))
            .expect("register");
        let transition = apply(&registry, id, PortalEvent::Ignite).expect("ignite");
        assert!(transition.created_destination);
        assert_eq!(transition.record.state(), PortalState::Activated);
        let destination = transition.partner.expect("destination");
        assert_eq!(destination.dimension(), &DimensionKey::from("aether"));
        assert_eq!(destination.origin(), BlockPos::new(8, 64, -8));
        assert_eq!(destination.state(), PortalState::Deactivated);
        assert_eq!(destination.linked_portal_id(), Some(id));
        assert_eq!(transition.record.linked_portal_id(), Some(destination.id()));
        assert_eq!(registry.len(), 2);
        assert!(registry.is_dirty());
    }

    #[test]
    fn destination_placement_steps_over_occupied_origin() {
        let registry = registry();
        let blocker = registry
            .register(portal("aether", BlockPos::new(0, 64, 0)))
            .expect("blocker");
        let id = registry.register(portal("overworld", BlockPos::new(0, 64, 0))).expect("origin");
        let destination = apply(&registry, id, PortalEvent::Ignite)
            .expect("ignite")
            .partner
            .expect("destination");
        assert_ne!(destination.id(), blocker);
        assert_eq!(destination.origin(), BlockPos::new(0, 70, 0));
    }

    #[test]
    fn ignite_without_route_fails_without_committing() {
        let registry = registry();
        let id = registry.register(portal("the_end", BlockPos::new(0, 64, 0))).expect("register");
        assert_eq!(
            apply(&registry, id, PortalEvent::Ignite),
            Err(TransitionError::NoDestination {
                dimension: DimensionKey::from("the_end")
            })
        );
        assert_eq!(registry.get(id).expect("present").state(), PortalState::Inactive);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_observed_tick_is_rejected() {
        let registry = registry();
        let id = registry.register(portal("overworld", BlockPos::new(0, 64, 0))).expect("register");
        let observed = registry.get(id).expect("present").last_modified_tick();
        registry
            .apply_transition(id, observed, PortalEvent::Ignite)
            .expect("first writer wins");
        let error = registry
            .apply_transition(id, observed, PortalEvent::Enter)
            .expect_err("second writer is stale");
        assert!(matches!(
            error,
            TransitionError::StaleState { expected, .. } if expected == observed
        ));
    }

    #[test]
    fn same_tick_mutations_get_distinct_stamps() {
        let registry = registry();
        registry.advance_tick(50);
        let id = registry.register(portal("overworld", BlockPos::new(0, 64, 0))).expect("register");
        let lit = apply(&registry, id, PortalEvent::Ignite).expect("ignite").record;
        let used = apply(&registry, id, PortalEvent::Enter).expect("enter").record;
        assert!(lit.last_modified_tick() >= 50);
        assert!(used.last_modified_tick() > lit.last_modified_tick());
    }

    #[test]
    fn stabilization_pairs_both_sides() {
        let registry = registry();
        let id = registry.register(portal("overworld", BlockPos::new(0, 64, 0))).expect("register");
        apply(&registry, id, PortalEvent::Ignite).expect("ignite");
        let entered = apply(&registry, id, PortalEvent::Enter).expect("enter");
        let destination = entered.teleport_to.expect("teleport target");
        let stabilized = apply(&registry, id, PortalEvent::Stabilize).expect("stabilize");
        assert_eq!(stabilized.record.state(), PortalState::Stabilized);
        assert_eq!(
            stabilized.partner.expect("partner").state(),
            PortalState::Stabilized
        );
        assert_eq!(
            registry.get(destination.id()).expect("dest").state(),
            PortalState::Stabilized
        );
        assert_stabilized_pairs_symmetric(&registry);
    }

    #[test]
    fn stabilizing_while_partner_lit_is_rejected_atomically() {
        let registry = registry();
        let id = registry.register(portal("overworld", BlockPos::new(0, 64, 0))).expect("register");
        let destination = apply(&registry, id, PortalEvent::Ignite)
            .expect("ignite")
            .partner
            .expect("destination");
        let error = apply(&registry, destination.id(), PortalEvent::Stabilize)
            .expect_err("origin still lit");
        assert_eq!(
            error,
            TransitionError::PartnerNotReady {
                partner: id,
                state: PortalState::Activated
            }
        );
        assert_eq!(
            registry.get(destination.id()).expect("dest").state(),
            PortalState::Deactivated
        );
    }

    #[test]
    fn remove_demotes_stabilized_partner() {
        let registry = registry();
        let id = registry.register(portal("overworld", BlockPos::new(0, 64, 0))).expect("register");
        apply(&registry, id, PortalEvent::Ignite).expect("ignite");
        let destination = apply(&registry, id, PortalEvent::Enter)
            .expect("enter")
            .teleport_to
            .expect("target");
        apply(&registry, id, PortalEvent::Stabilize).expect("stabilize");

        let removed = registry.remove(id).expect("removed");
        assert_eq!(removed.id(), id);
        assert!(registry.get(id).is_none());
        let partner = registry.get(destination.id()).expect("partner kept");
        assert_eq!(partner.state(), PortalState::Deactivated);
        assert_eq!(partner.linked_portal_id(), None);
        assert!(registry
            .find_at_origin(&DimensionKey::from("overworld"), BlockPos::new(0, 64, 0))
            .is_none());
        assert_stabilized_pairs_symmetric(&registry);
    }

    #[test]
    fn ensure_destination_relinks_orphaned_portal() {
        let registry = registry();
        let id = registry.register(portal("overworld", BlockPos::new(0, 64, 0))).expect("register");
        apply(&registry, id, PortalEvent::Ignite).expect("ignite");
        let first = apply(&registry, id, PortalEvent::Enter)
            .expect("enter")
            .teleport_to
            .expect("target");
        registry.remove(first.id()).expect("destination destroyed");
        assert_eq!(
            apply(&registry, id, PortalEvent::Stabilize),
            Err(TransitionError::MissingLink)
        );

        let replacement = registry.ensure_destination(id).expect("new destination");
        assert_ne!(replacement.id(), first.id());
        assert_eq!(registry.get(id).expect("origin").state(), PortalState::Deactivated);
        apply(&registry, id, PortalEvent::Stabilize).expect("stabilize after relink");
        assert_stabilized_pairs_symmetric(&registry);
    }

    #[test]
    fn find_by_cells_resolves_frame_and_interior() {
        let registry = registry();
        let id = registry.register(portal("overworld", BlockPos::new(0, 64, 0))).expect("register");
        let overworld = DimensionKey::from("overworld");
        assert_eq!(
            registry
                .find_by_frame_cell(&overworld, BlockPos::new(3, 66, 0))
                .map(|record| record.id()),
            Some(id)
        );
        assert!(registry.find_by_frame_cell(&overworld, BlockPos::new(1, 66, 0)).is_none());
        assert_eq!(
            registry
                .find_by_activation_cell(&overworld, BlockPos::new(1, 66, 0))
                .map(|record| record.id()),
            Some(id)
        );
    }

    #[test]
    fn lookups_far_across_the_coordinate_range_find_nothing() {
        let registry = registry();
        let overworld = DimensionKey::from("overworld");
        registry
            .register(portal("overworld", BlockPos::new(2_000_000_000, 64, 0)))
            .expect("register");
        let opposite = BlockPos::new(-2_000_000_000, 66, 0);
        assert!(registry.find_by_activation_cell(&overworld, opposite).is_none());
        assert!(registry.find_by_frame_cell(&overworld, opposite).is_none());
        assert!(registry.find_near(&overworld, opposite, 1_000_000).is_empty());
        assert!(registry
            .find_by_activation_cell(&overworld, BlockPos::new(2_000_000_001, 66, 0))
            .is_some());
    }

    #[test]
    fn replace_all_repairs_links_and_duplicates() {
        let registry = registry();
        let mut a = portal("overworld", BlockPos::new(0, 64, 0));
        let mut b = portal("aether", BlockPos::new(0, 64, 0));
        let mut c = portal("overworld", BlockPos::new(40, 64, 0));
        let mut stale_twin = portal("overworld", BlockPos::new(0, 64, 0));
        a.state = PortalState::Stabilized;
        a.linked_portal_id = Some(b.id);
        a.last_modified_tick = 9;
        b.state = PortalState::Stabilized;
        b.linked_portal_id = Some(a.id);
        c.state = PortalState::Stabilized;
        c.linked_portal_id = Some(PortalId::new_v4());
        stale_twin.last_modified_tick = 2;

        let repairs =
            registry.replace_all(vec![a.clone(), b.clone(), c.clone(), stale_twin.clone()]);
        assert_eq!(repairs.dropped_duplicates, vec![stale_twin.id]);
        assert_eq!(repairs.cleared_links, 1);
        assert_eq!(repairs.demoted, 1);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(c.id).expect("c").state(), PortalState::Deactivated);
        assert_eq!(registry.get(a.id).expect("a").state(), PortalState::Stabilized);
        assert!(registry.current_tick() >= 9);
        assert_stabilized_pairs_symmetric(&registry);
    }

    fn pair_with_stray_link() -> (PortalRecord, PortalRecord, PortalRecord) {
        let mut stray = portal("overworld", BlockPos::new(80, 64, 0));
        let mut b = portal("aether", BlockPos::new(0, 64, 0));
        let mut c = portal("overworld", BlockPos::new(0, 64, 0));
        b.state = PortalState::Stabilized;
        b.linked_portal_id = Some(c.id);
        c.state = PortalState::Stabilized;
        c.linked_portal_id = Some(b.id);
        stray.state = PortalState::Deactivated;
        stray.linked_portal_id = Some(b.id);
        (stray, b, c)
    }

    #[test]
    fn removing_a_portal_leaves_a_partner_paired_elsewhere_alone() {
        let registry = registry();
        let (stray, b, c) = pair_with_stray_link();
        for record in [b.clone(), c.clone(), stray.clone()] {
            registry.register(record).expect("register");
        }

        registry.remove(stray.id).expect("removed");
        let b_now = registry.get(b.id).expect("b");
        let c_now = registry.get(c.id).expect("c");
        assert_eq!(b_now.state(), PortalState::Stabilized);
        assert_eq!(b_now.linked_portal_id(), Some(c.id));
        assert_eq!(c_now.state(), PortalState::Stabilized);
        assert_eq!(c_now.linked_portal_id(), Some(b.id));
        assert_stabilized_pairs_symmetric(&registry);
    }

    #[test]
    fn replace_all_clears_links_that_are_not_returned() {
        let registry = registry();
        let (stray, b, c) = pair_with_stray_link();

        let repairs = registry.replace_all(vec![stray.clone(), b.clone(), c.clone()]);
        assert_eq!(repairs.cleared_links, 1);
        assert_eq!(repairs.demoted, 0);
        assert_eq!(registry.get(stray.id).expect("stray").linked_portal_id(), None);
        assert_eq!(registry.get(b.id).expect("b").linked_portal_id(), Some(c.id));

        registry.remove(stray.id).expect("removed");
        assert_eq!(registry.get(b.id).expect("b").state(), PortalState::Stabilized);
        assert_stabilized_pairs_symmetric(&registry);
    }

    #[test]
    fn dirty_flag_tracks_mutations_only() {
        let registry = registry();
        assert!(!registry.take_dirty());
        let id = registry.register(portal("overworld", BlockPos::new(0, 64, 0))).expect("register");
        assert!(registry.take_dirty());
        apply(&registry, id, PortalEvent::Ignite).expect("ignite");
        apply(&registry, id, PortalEvent::Enter).expect("enter");
        apply(&registry, id, PortalEvent::Stabilize).expect("stabilize");
        assert!(registry.take_dirty());
        apply(&registry, id, PortalEvent::Enter).expect("stabilized entry");
        assert!(!registry.is_dirty());
    }
}
