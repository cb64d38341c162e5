use crate::frame::{ActivationArea, FrameBounds, FrameRegion, ValidationError};
use crate::geometry::{BlockPos, DimensionKey, FrameAxis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortalId(Uuid);

impl PortalId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PortalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortalState {
    Inactive,
    Activated,
    Deactivated,
    Stabilized,
}

impl PortalState {
    pub const ALL: [PortalState; 4] = [
        PortalState::Inactive,
        PortalState::Activated,
        PortalState::Deactivated,
        PortalState::Stabilized,
    ];

    /// Persisted ordinal. Never renumber.
    pub fn ordinal(self) -> u32 {
        match self {
            PortalState::Inactive => 0,
            PortalState::Activated => 1,
            PortalState::Deactivated => 2,
            PortalState::Stabilized => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PortalState::Inactive => "INACTIVE",
            PortalState::Activated => "ACTIVATED",
            PortalState::Deactivated => "DEACTIVATED",
            PortalState::Stabilized => "STABILIZED",
        }
    }

    pub fn from_ordinal(ordinal: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.ordinal() == ordinal)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn is_traversable(self) -> bool {
        matches!(self, PortalState::Activated | PortalState::Stabilized)
    }
}

impl fmt::Display for PortalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Persisted fields this build does not understand, re-emitted verbatim on save.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnknownFields(BTreeMap<String, serde_json::Value>);

impl UnknownFields {
    pub fn new(fields: BTreeMap<String, serde_json::Value>) -> Self {
        Self(fields)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.0
    }
}

/// One portal instance. Callers only ever hold copies; the registry owns the live record.
#[derive(Clone, Debug, PartialEq)]
pub struct PortalRecord {
    pub(crate) id: PortalId,
    pub(crate) dimension: DimensionKey,
    pub(crate) origin: BlockPos,
    pub(crate) axis: FrameAxis,
    pub(crate) frame: FrameBounds,
    pub(crate) state: PortalState,
    pub(crate) linked_portal_id: Option<PortalId>,
    pub(crate) last_modified_tick: u64,
    pub(crate) unknown_fields: UnknownFields,
}

impl PortalRecord {
    /// A fresh, unlit portal for a frame whose bounds have been validated.
    pub fn new(
        dimension: DimensionKey,
        origin: BlockPos,
        axis: FrameAxis,
        frame: FrameBounds,
        tick: u64,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id: PortalId::new_v4(),
            dimension,
            origin,
            axis,
            frame: frame.check()?,
            state: PortalState::Inactive,
            linked_portal_id: None,
            last_modified_tick: tick,
            unknown_fields: UnknownFields::default(),
        })
    }

    pub fn from_region(
        dimension: DimensionKey,
        region: &FrameRegion,
        tick: u64,
    ) -> Result<Self, ValidationError> {
        Self::new(dimension, region.origin, region.axis, region.bounds, tick)
    }

    pub fn id(&self) -> PortalId {
        self.id
    }

    pub fn dimension(&self) -> &DimensionKey {
        &self.dimension
    }

    pub fn origin(&self) -> BlockPos {
        self.origin
    }

    pub fn axis(&self) -> FrameAxis {
        self.axis
    }

    pub fn frame(&self) -> FrameBounds {
        self.frame
    }

    pub fn state(&self) -> PortalState {
        self.state
    }

    pub fn linked_portal_id(&self) -> Option<PortalId> {
        self.linked_portal_id
    }

    pub fn last_modified_tick(&self) -> u64 {
        self.last_modified_tick
    }

    pub fn unknown_fields(&self) -> &UnknownFields {
        &self.unknown_fields
    }

    pub fn region(&self) -> FrameRegion {
        FrameRegion::new(self.origin, self.axis, self.frame)
    }

    pub fn activation_area(&self) -> ActivationArea {
        self.region().interior()
    }
}
