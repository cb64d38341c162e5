//! Portal store encoding and the glue that moves it between a registry and a host save.

mod codec;
mod hooks;

pub use codec::{
    decode, encode, DecodedStore, SkippedRecord, PORTAL_SCHEMA_VERSION, STORE_FORMAT_VERSION,
};
pub use hooks::{CallbackSaveHook, CompoundSaveHook, DirectorySaveHook, SaveHook};

use crate::registry::{LoadRepairs, PortalRegistry};
use std::io;
use thiserror::Error;
use web_time::Instant;

const SLOW_STORE_LOG_MS: f64 = 50.0;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("loaded {loaded} portals, skipped {skipped} unreadable records")]
    PartialLoad { loaded: usize, skipped: usize },
    #[error("failed to encode portal store: {0}")]
    EncodeFailure(String),
    #[error("portal store is corrupt: {0}")]
    Corrupt(String),
    #[error("portal store i/o failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveSummary {
    pub portals: usize,
    pub bytes: usize,
    /// Whether the registry had unsaved changes when the save started.
    pub was_dirty: bool,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub schema: u32,
    pub skipped: Vec<SkippedRecord>,
    pub repairs: LoadRepairs,
    /// Set when the store was unreadable as a whole and the registry was left empty.
    pub error: Option<PersistenceError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.repairs.is_empty() && self.error.is_none()
    }
}

/// Encodes the registry and writes it through `hook`. The dirty flag is only cleared
/// once the write succeeds.
pub fn save_registry(
    registry: &PortalRegistry,
    hook: &mut dyn SaveHook,
    key: &str,
) -> Result<SaveSummary, PersistenceError> {
    let started = Instant::now();
    let records = registry.snapshot();
    let was_dirty = registry.is_dirty();
    let blob = encode(&records)?;
    hook.write_store(key, &blob)?;
    registry.take_dirty();

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    if elapsed_ms >= SLOW_STORE_LOG_MS {
        log::warn!(
            "[portal-persist] slow save key={} portals={} bytes={} took {:.2}ms",
            key,
            records.len(),
            blob.len(),
            elapsed_ms
        );
    } else {
        log::debug!(
            "[portal-persist] saved key={} portals={} bytes={} in {:.2}ms",
            key,
            records.len(),
            blob.len(),
            elapsed_ms
        );
    }
    Ok(SaveSummary {
        portals: records.len(),
        bytes: blob.len(),
        was_dirty,
    })
}

/// Replaces the registry's contents with whatever `hook` holds under `key`.
///
/// Never fails as a whole: unreadable stores leave an empty registry and are reported in
/// [`LoadReport::error`].
pub fn load_registry(registry: &PortalRegistry, hook: &mut dyn SaveHook, key: &str) -> LoadReport {
    match hook.read_store(key) {
        Ok(Some(bytes)) => load_blob(registry, &bytes),
        Ok(None) => {
            log::info!("[portal-persist] no portal store under key={key}; starting empty");
            registry.replace_all(Vec::new());
            LoadReport {
                schema: PORTAL_SCHEMA_VERSION,
                ..LoadReport::default()
            }
        }
        Err(error) => {
            log::error!("[portal-persist] failed to read portal store key={key}: {error}");
            registry.replace_all(Vec::new());
            LoadReport {
                error: Some(PersistenceError::Io(error)),
                ..LoadReport::default()
            }
        }
    }
}

pub fn load_blob(registry: &PortalRegistry, bytes: &[u8]) -> LoadReport {
    let started = Instant::now();
    let decoded = match decode(bytes) {
        Ok(decoded) => decoded,
        Err(error) => {
            log::error!("[portal-persist] discarding unreadable portal store: {error}");
            registry.replace_all(Vec::new());
            return LoadReport {
                error: Some(error),
                ..LoadReport::default()
            };
        }
    };
    if let Some(partial) = decoded.partial_load() {
        log::warn!("[portal-persist] {partial}");
    }
    let DecodedStore {
        schema,
        records,
        skipped,
    } = decoded;
    let repairs = registry.replace_all(records);
    let loaded = registry.len();
    log::info!(
        "[portal-persist] loaded {} portals (schema {}) in {:.2}ms",
        loaded,
        schema,
        started.elapsed().as_secs_f64() * 1000.0
    );
    LoadReport {
        loaded,
        schema,
        skipped,
        repairs,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBounds;
    use crate::geometry::{BlockPos, DimensionKey, FrameAxis};
    use crate::portal::{PortalRecord, PortalState};
    use crate::routes::DimensionRoutes;
    use crate::state_machine::PortalEvent;
    use std::collections::BTreeMap;

    fn registry() -> PortalRegistry {
        PortalRegistry::new(DimensionRoutes::single("overworld", "aether", 1.0))
    }

    fn ignited(registry: &PortalRegistry, x: i32) {
        let record = PortalRecord::new(
            DimensionKey::from("overworld"),
            BlockPos::new(x, 64, 0),
            FrameAxis::X,
            FrameBounds::new(4, 5),
            registry.current_tick(),
        )
        .expect("legal frame");
        let id = registry.register(record).expect("register");
        let observed = registry.get(id).expect("registered").last_modified_tick();
        registry
            .apply_transition(id, observed, PortalEvent::Ignite)
            .expect("ignite");
    }

    #[test]
    fn save_then_load_restores_registry_and_clears_dirty() {
        let source = registry();
        ignited(&source, 0);
        ignited(&source, 40);
        let mut compound = BTreeMap::new();
        let summary = save_registry(&source, &mut CompoundSaveHook::new(&mut compound), "waygate")
            .expect("save");
        assert_eq!(summary.portals, 4);
        assert!(summary.was_dirty);
        assert!(!source.is_dirty());

        let target = registry();
        let report = load_registry(&target, &mut CompoundSaveHook::new(&mut compound), "waygate");
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.loaded, 4);
        assert_eq!(target.snapshot(), source.snapshot());
        assert!(!target.is_dirty());
    }

    #[test]
    fn saving_twice_without_changes_is_byte_identical() {
        let source = registry();
        ignited(&source, 0);
        let mut compound = BTreeMap::new();
        save_registry(&source, &mut CompoundSaveHook::new(&mut compound), "waygate")
            .expect("first save");
        let first = compound["waygate"].clone();

        let reloaded = registry();
        load_blob(&reloaded, &first);
        save_registry(&reloaded, &mut CompoundSaveHook::new(&mut compound), "waygate")
            .expect("second save");
        assert_eq!(compound["waygate"], first);
    }

    #[test]
    fn unreadable_store_leaves_registry_empty() {
        let target = registry();
        ignited(&target, 0);
        let report = load_blob(&target, b"WGPS\x01\x00\x00\x00garbage");
        assert!(matches!(report.error, Some(PersistenceError::Corrupt(_))));
        assert!(target.is_empty());
    }

    #[test]
    fn missing_store_is_a_fresh_world() {
        let target = registry();
        let mut compound = BTreeMap::new();
        let report = load_registry(&target, &mut CompoundSaveHook::new(&mut compound), "waygate");
        assert!(report.is_clean());
        assert!(target.is_empty());
    }

    #[test]
    fn load_repairs_asymmetric_pairs() {
        let source = registry();
        ignited(&source, 0);
        let mut records = source.snapshot();
        for record in &mut records {
            record.state = PortalState::Stabilized;
        }
        // Orphan the pair by dropping one side.
        records.truncate(1);
        let blob = encode(&records).expect("encode");

        let target = registry();
        let report = load_blob(&target, &blob);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.repairs.cleared_links, 1);
        assert_eq!(report.repairs.demoted, 1);
        let survivor = &target.snapshot()[0];
        assert_eq!(survivor.state(), PortalState::Deactivated);
        assert_eq!(survivor.linked_portal_id(), None);
    }

    #[test]
    fn failing_writer_keeps_registry_dirty() {
        let source = registry();
        ignited(&source, 0);
        let mut hook = CallbackSaveHook::new(None, |_: &str, _: &[u8]| {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        });
        let error = save_registry(&source, &mut hook, "waygate").expect_err("write fails");
        assert!(matches!(error, PersistenceError::Io(_)));
        assert!(source.is_dirty());
    }
}
