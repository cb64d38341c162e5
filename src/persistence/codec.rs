use super::PersistenceError;
use crate::frame::FrameBounds;
use crate::geometry::{BlockPos, DimensionKey, FrameAxis};
use crate::portal::{PortalId, PortalRecord, PortalState, UnknownFields};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const STORE_MAGIC: &[u8; 4] = b"WGPS";
const HEADER_LEN: usize = 16;

pub const STORE_FORMAT_VERSION: u32 = 1;
pub const PORTAL_SCHEMA_VERSION: u32 = 3;

/// State as persisted: ordinal and name together, so either survives a renumbering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum PersistedState {
    Tagged { ordinal: u32, name: String },
    Name(String),
    Ordinal(u32),
}

impl PersistedState {
    fn from_runtime(state: PortalState) -> Self {
        Self::Tagged {
            ordinal: state.ordinal(),
            name: state.name().to_string(),
        }
    }

    fn to_runtime(&self) -> Option<PortalState> {
        match self {
            PersistedState::Tagged { ordinal, name } => {
                PortalState::from_name(name).or_else(|| PortalState::from_ordinal(*ordinal))
            }
            PersistedState::Name(name) => PortalState::from_name(name),
            PersistedState::Ordinal(ordinal) => PortalState::from_ordinal(*ordinal),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PersistedPortal {
    id: PortalId,
    dimension: DimensionKey,
    origin: BlockPos,
    #[serde(default)]
    axis: FrameAxis,
    width: u32,
    height: u32,
    state: PersistedState,
    #[serde(default)]
    linked_portal_id: Option<PortalId>,
    #[serde(default)]
    last_modified_tick: u64,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_json::Value>,
}

impl PersistedPortal {
    fn from_runtime(record: &PortalRecord) -> Self {
        Self {
            id: record.id,
            dimension: record.dimension.clone(),
            origin: record.origin,
            axis: record.axis,
            width: record.frame.width,
            height: record.frame.height,
            state: PersistedState::from_runtime(record.state),
            linked_portal_id: record.linked_portal_id,
            last_modified_tick: record.last_modified_tick,
            unknown: record.unknown_fields.as_map().clone(),
        }
    }

    fn to_runtime(self) -> Result<PortalRecord, String> {
        if self.dimension.as_str().trim().is_empty() {
            return Err("empty dimension".to_string());
        }
        let frame = FrameBounds::new(self.width, self.height)
            .check()
            .map_err(|error| error.to_string())?;
        let state = self
            .state
            .to_runtime()
            .ok_or_else(|| format!("unrecognised state {:?}", self.state))?;
        Ok(PortalRecord {
            id: self.id,
            dimension: self.dimension,
            origin: self.origin,
            axis: self.axis,
            frame,
            state,
            linked_portal_id: self.linked_portal_id,
            last_modified_tick: self.last_modified_tick,
            unknown_fields: UnknownFields::new(self.unknown),
        })
    }
}

#[derive(Serialize)]
struct StoreBodyOut<'a> {
    schema: u32,
    portals: &'a [PersistedPortal],
}

#[derive(Deserialize)]
struct StoreBodyIn {
    #[serde(default)]
    schema: u32,
    #[serde(default)]
    portals: Vec<serde_json::Value>,
}

/// A record that could not be decoded and was left out of the load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedStore {
    pub schema: u32,
    pub records: Vec<PortalRecord>,
    pub skipped: Vec<SkippedRecord>,
}

impl DecodedStore {
    pub fn partial_load(&self) -> Option<PersistenceError> {
        (!self.skipped.is_empty()).then(|| PersistenceError::PartialLoad {
            loaded: self.records.len(),
            skipped: self.skipped.len(),
        })
    }
}

/// Serialises `records` into a framed, checksummed blob.
///
/// Output is a pure function of the record set: ordering is by id and unknown fields are
/// emitted in key order.
pub fn encode(records: &[PortalRecord]) -> Result<Vec<u8>, PersistenceError> {
    let mut persisted: Vec<PersistedPortal> =
        records.iter().map(PersistedPortal::from_runtime).collect();
    persisted.sort_unstable_by_key(|portal| portal.id);
    let body = StoreBodyOut {
        schema: PORTAL_SCHEMA_VERSION,
        portals: &persisted,
    };
    let payload = serde_json::to_vec(&body)
        .map_err(|error| PersistenceError::EncodeFailure(error.to_string()))?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        PersistenceError::EncodeFailure(format!("payload of {} bytes is too large", payload.len()))
    })?;

    let mut blob = Vec::with_capacity(HEADER_LEN + payload.len());
    blob.extend_from_slice(STORE_MAGIC);
    blob.extend_from_slice(&STORE_FORMAT_VERSION.to_le_bytes());
    blob.extend_from_slice(&payload_len.to_le_bytes());
    blob.extend_from_slice(&crc32(&payload).to_le_bytes());
    blob.extend_from_slice(&payload);
    Ok(blob)
}

/// Decodes a blob produced by [`encode`] or an older unframed JSON store.
///
/// Only envelope damage is an error. Individual records that fail to decode are listed in
/// [`DecodedStore::skipped`] and the rest are returned.
pub fn decode(bytes: &[u8]) -> Result<DecodedStore, PersistenceError> {
    if bytes.is_empty() {
        return Ok(DecodedStore {
            schema: PORTAL_SCHEMA_VERSION,
            ..DecodedStore::default()
        });
    }
    if bytes.starts_with(STORE_MAGIC) {
        let payload = unframe(bytes)?;
        return decode_body(payload);
    }
    match bytes.iter().find(|byte| !byte.is_ascii_whitespace()) {
        Some(b'{') => decode_body(bytes),
        Some(b'[') => {
            let portals: Vec<serde_json::Value> = serde_json::from_slice(bytes)
                .map_err(|error| PersistenceError::Corrupt(error.to_string()))?;
            Ok(decode_records(1, portals))
        }
        _ => Err(PersistenceError::Corrupt("portal store magic mismatch".to_string())),
    }
}

fn unframe(bytes: &[u8]) -> Result<&[u8], PersistenceError> {
    if bytes.len() < HEADER_LEN {
        return Err(PersistenceError::Corrupt(format!(
            "portal store header truncated at {} bytes",
            bytes.len()
        )));
    }
    let word = |at: usize| {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    };
    let version = word(4);
    if version == 0 || version > STORE_FORMAT_VERSION {
        return Err(PersistenceError::Corrupt(format!(
            "unsupported portal store version {version}"
        )));
    }
    let payload_len = word(8) as usize;
    let checksum = word(12);
    let payload = bytes
        .get(HEADER_LEN..HEADER_LEN.saturating_add(payload_len))
        .ok_or_else(|| {
            PersistenceError::Corrupt(format!(
                "portal store payload truncated: header={} available={}",
                payload_len,
                bytes.len() - HEADER_LEN
            ))
        })?;
    if crc32(payload) != checksum {
        return Err(PersistenceError::Corrupt(
            "portal store payload checksum mismatch".to_string(),
        ));
    }
    Ok(payload)
}

fn decode_body(payload: &[u8]) -> Result<DecodedStore, PersistenceError> {
    let body: StoreBodyIn = serde_json::from_slice(payload)
        .map_err(|error| PersistenceError::Corrupt(error.to_string()))?;
    Ok(decode_records(body.schema, body.portals))
}

fn decode_records(schema: u32, portals: Vec<serde_json::Value>) -> DecodedStore {
    let mut decoded = DecodedStore {
        schema,
        records: Vec::with_capacity(portals.len()),
        skipped: Vec::new(),
    };
    for (index, value) in portals.into_iter().enumerate() {
        let result = serde_json::from_value::<PersistedPortal>(value)
            .map_err(|error| error.to_string())
            .and_then(PersistedPortal::to_runtime);
        match result {
            Ok(record) => decoded.records.push(record),
            Err(reason) => {
                log::warn!("[portal-persist] skipping portal record #{index}: {reason}");
                decoded.skipped.push(SkippedRecord { index, reason });
            }
        }
    }
    decoded
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
