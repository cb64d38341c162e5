use crate::geometry::DimensionKey;
use crate::routes::{DimensionRoute, DimensionRoutes};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_STORE_KEY: &str = "waygate_portals";
const DEFAULT_IGNITION_ITEMS: [&str; 2] = ["flint_and_steel", "fire_charge"];
const DEFAULT_STABILIZATION_ITEM: &str = "stabilizing_shard";
const DEFAULT_HOME_DIMENSION: &str = "overworld";
const DEFAULT_AWAY_DIMENSION: &str = "aether";
const DEFAULT_PROXIMITY_RADIUS: u32 = 4;
const MAX_PROXIMITY_RADIUS: u32 = 64;
const DEFAULT_ARRIVAL_COOLDOWN_TICKS: u64 = 60;
const MAX_ARRIVAL_COOLDOWN_TICKS: u64 = 20 * 60;

pub const LOG_TRANSITIONS_ENV: &str = "WAYGATE_LOG_TRANSITIONS";

/// Runtime settings for one [`WorldSession`](super::WorldSession).
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub ignition_items: Vec<String>,
    pub stabilization_item: String,
    pub routes: DimensionRoutes,
    /// How far from a clicked block to look for the portal a stabilization item targets.
    pub proximity_radius: u32,
    /// Ticks after an arrival during which the same traveler cannot re-enter a portal.
    pub arrival_cooldown_ticks: u64,
    pub store_key: String,
    pub log_transitions: bool,
}

impl SessionConfig {
    pub fn with_defaults() -> Self {
        Self::from_persisted(PersistedSessionConfig::default())
    }

    pub fn from_persisted(persisted: PersistedSessionConfig) -> Self {
        let persisted = persisted.sanitized();
        Self {
            ignition_items: persisted.ignition_items,
            stabilization_item: persisted.stabilization_item,
            routes: DimensionRoutes::new(persisted.routes),
            proximity_radius: persisted.proximity_radius,
            arrival_cooldown_ticks: persisted.arrival_cooldown_ticks,
            store_key: persisted.store_key,
            log_transitions: env_flag_enabled(LOG_TRANSITIONS_ENV),
        }
    }

    pub fn is_ignition_item(&self, item: &str) -> bool {
        self.ignition_items.iter().any(|known| known == item)
    }

    pub fn is_stabilization_item(&self, item: &str) -> bool {
        self.stabilization_item == item
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistedSessionConfig {
    pub schema_version: u32,
    pub ignition_items: Vec<String>,
    pub stabilization_item: String,
    pub routes: Vec<DimensionRoute>,
    pub proximity_radius: u32,
    pub arrival_cooldown_ticks: u64,
    pub store_key: String,
}

impl Default for PersistedSessionConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            ignition_items: DEFAULT_IGNITION_ITEMS.iter().map(|item| item.to_string()).collect(),
            stabilization_item: DEFAULT_STABILIZATION_ITEM.to_string(),
            routes: vec![DimensionRoute {
                from: DimensionKey::from(DEFAULT_HOME_DIMENSION),
                to: DimensionKey::from(DEFAULT_AWAY_DIMENSION),
                scale: 1.0,
            }],
            proximity_radius: DEFAULT_PROXIMITY_RADIUS,
            arrival_cooldown_ticks: DEFAULT_ARRIVAL_COOLDOWN_TICKS,
            store_key: DEFAULT_STORE_KEY.to_string(),
        }
    }
}

impl PersistedSessionConfig {
    pub fn sanitized(mut self) -> Self {
        self.schema_version = CONFIG_SCHEMA_VERSION;
        self.ignition_items = self
            .ignition_items
            .iter()
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
        if self.ignition_items.is_empty() {
            self.ignition_items = DEFAULT_IGNITION_ITEMS
                .iter()
                .map(|item| item.to_string())
                .collect();
        }
        let stabilization = self.stabilization_item.trim();
        self.stabilization_item = if stabilization.is_empty() {
            DEFAULT_STABILIZATION_ITEM.to_string()
        } else {
            stabilization.to_string()
        };
        self.proximity_radius = self.proximity_radius.clamp(1, MAX_PROXIMITY_RADIUS);
        self.arrival_cooldown_ticks = self.arrival_cooldown_ticks.min(MAX_ARRIVAL_COOLDOWN_TICKS);
        let key = self.store_key.trim();
        let key_usable = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'));
        self.store_key = if key_usable {
            key.to_string()
        } else {
            DEFAULT_STORE_KEY.to_string()
        };
        self
    }
}

pub fn load_config(path: &Path) -> Option<PersistedSessionConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            if error.kind() != io::ErrorKind::NotFound {
                log::warn!("[waygate-config] failed to read {}: {}", path.display(), error);
            }
            return None;
        }
    };

    match serde_json::from_str::<PersistedSessionConfig>(&raw) {
        Ok(config) => Some(config.sanitized()),
        Err(error) => {
            log::warn!(
                "[waygate-config] failed to parse {}: {} (ignoring file)",
                path.display(),
                error
            );
            None
        }
    }
}

pub fn save_config(path: &Path, config: &PersistedSessionConfig) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(config)
        .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;
    std::fs::write(path, bytes)
}

pub(crate) fn env_flag_enabled(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(false)
}
