//! Pure lifecycle transitions for a single portal.
//!
//! ```text
//! Inactive --ignite--> Activated --enter--> Deactivated --stabilize--> Stabilized
//!                          ^                     |                      |   ^
//!                          +-------ignite--------+                      +---+ enter
//! ```
//!
//! Nothing here touches the registry. Partner updates and destination creation are
//! returned as [`Effect`]s and committed by the registry under its write lock.

use crate::geometry::DimensionKey;
use crate::portal::{PortalId, PortalRecord, PortalState};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortalEvent {
    Ignite,
    Enter,
    Stabilize,
    StructureBroken,
}

impl fmt::Display for PortalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortalEvent::Ignite => "ignite",
            PortalEvent::Enter => "enter",
            PortalEvent::Stabilize => "stabilize",
            PortalEvent::StructureBroken => "structure-broken",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("portal changed since it was read (expected tick {expected}, found {actual})")]
    StaleState { expected: u64, actual: u64 },
    #[error("portal is already stabilized")]
    AlreadyTerminal,
    #[error("portal has no linked destination")]
    MissingLink,
    #[error("{event} is not permitted while {state}")]
    NotPermitted { state: PortalState, event: PortalEvent },
    #[error("linked portal {partner} is {state} and cannot be stabilized")]
    PartnerNotReady { partner: PortalId, state: PortalState },
    #[error("unknown portal {0}")]
    UnknownPortal(PortalId),
    #[error("no destination portal can be placed for {dimension}")]
    NoDestination { dimension: DimensionKey },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Create the destination-side portal if none is linked yet.
    EnsureDestination,
    /// A traveler should be moved to `destination` at the next flush.
    Teleport { destination: PortalId },
    /// Move the partner into the stabilized pair.
    StabilizePartner { partner: PortalId },
    /// Unlink the partner, demoting it if it was stabilized.
    DetachPartner { partner: PortalId },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    /// `None` when the portal is removed.
    pub next: Option<PortalRecord>,
    pub effects: Vec<Effect>,
}

impl Step {
    fn keep(record: &PortalRecord, effects: Vec<Effect>) -> Self {
        Self {
            next: Some(record.clone()),
            effects,
        }
    }

    fn moved(record: &PortalRecord, state: PortalState, stamp: u64, effects: Vec<Effect>) -> Self {
        let mut next = record.clone();
        next.state = state;
        next.last_modified_tick = stamp;
        Self {
            next: Some(next),
            effects,
        }
    }
}

/// Runs `event` against `record`. `stamp` becomes the new `last_modified_tick` on change.
pub fn transition(
    record: &PortalRecord,
    event: PortalEvent,
    stamp: u64,
) -> Result<Step, TransitionError> {
    use PortalEvent as E;
    use PortalState as S;

    let not_permitted = || TransitionError::NotPermitted {
        state: record.state,
        event,
    };

    match (record.state, event) {
        (_, E::StructureBroken) => Ok(Step {
            next: None,
            effects: record
                .linked_portal_id
                .map(|partner| Effect::DetachPartner { partner })
                .into_iter()
                .collect(),
        }),
        (S::Inactive | S::Deactivated, E::Ignite) => {
            let effects = if record.linked_portal_id.is_none() {
                vec![Effect::EnsureDestination]
            } else {
                Vec::new()
            };
            Ok(Step::moved(record, S::Activated, stamp, effects))
        }
        (S::Activated, E::Ignite) => Err(not_permitted()),
        (S::Stabilized, E::Ignite | E::Stabilize) => Err(TransitionError::AlreadyTerminal),
        (S::Activated, E::Enter) => {
            let destination = record.linked_portal_id.ok_or(TransitionError::MissingLink)?;
            Ok(Step::moved(
                record,
                S::Deactivated,
                stamp,
                vec![Effect::Teleport { destination }],
            ))
        }
        (S::Stabilized, E::Enter) => {
            let destination = record.linked_portal_id.ok_or(TransitionError::MissingLink)?;
            Ok(Step::keep(record, vec![Effect::Teleport { destination }]))
        }
        (S::Inactive | S::Deactivated, E::Enter) => Err(not_permitted()),
        (S::Deactivated, E::Stabilize) => {
            let partner = record.linked_portal_id.ok_or(TransitionError::MissingLink)?;
            Ok(Step::moved(
                record,
                S::Stabilized,
                stamp,
                vec![Effect::StabilizePartner { partner }],
            ))
        }
        (S::Inactive | S::Activated, E::Stabilize) => Err(not_permitted()),
    }
}

/// Partner half of a stabilization initiated by `initiator`.
pub(crate) fn stabilize_partner(
    partner: &PortalRecord,
    initiator: PortalId,
    stamp: u64,
) -> Result<PortalRecord, TransitionError> {
    let linked_to_initiator = partner.linked_portal_id.map_or(true, |link| link == initiator);
    match partner.state {
        PortalState::Deactivated if linked_to_initiator => {
            let mut next = partner.clone();
            next.state = PortalState::Stabilized;
            next.linked_portal_id = Some(initiator);
            next.last_modified_tick = stamp;
            Ok(next)
        }
        PortalState::Stabilized if partner.linked_portal_id == Some(initiator) => {
            Ok(partner.clone())
        }
        state => Err(TransitionError::PartnerNotReady {
            partner: partner.id,
            state,
        }),
    }
}

/// Partner half of a removal: break the link and fall back out of the stabilized pair.
pub(crate) fn detach_partner(partner: &PortalRecord, stamp: u64) -> PortalRecord {
    let mut next = partner.clone();
    next.linked_portal_id = None;
    if next.state == PortalState::Stabilized {
        next.state = PortalState::Deactivated;
    }
    next.last_modified_tick = stamp;
    next
}
