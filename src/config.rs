use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::{ReminderError, Result};

/// Persisted "reminders enabled" toggle. Absent means enabled.
pub const ENABLED_KEY: &str = "reminders-enabled";
/// Persisted override for verbose reminder logging.
pub const DEBUG_KEY: &str = "reminder-debug";

pub const DEBUG_ENV_VAR: &str = "MEETING_REMINDERS_DEBUG";
pub const CURRENT_CONFIG_VERSION: u32 = 1;

const APP_DIR_NAME: &str = "meeting-reminders";
const CONFIG_FILE_NAME: &str = "settings.json";

/// Durable client-side key-value storage.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Reads a boolean flag. Anything other than `true`/`false` counts as unset.
pub async fn read_flag(store: &dyn PreferenceStore, key: &str) -> Result<Option<bool>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    let parsed = parse_flag(&raw);
    if parsed.is_none() {
        warn!("config: ignoring invalid value '{}' for '{}'", raw, key);
    }
    Ok(parsed)
}

pub async fn write_flag(store: &dyn PreferenceStore, key: &str, value: bool) -> Result<()> {
    store.set(key, if value { "true" } else { "false" }).await
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        v if v.eq_ignore_ascii_case("true") || v == "1" => Some(true),
        v if v.eq_ignore_ascii_case("false") || v == "0" => Some(false),
        _ => None,
    }
}

/// Check if debug mode is enabled via environment variable
pub fn debug_from_env() -> bool {
    std::env::var(DEBUG_ENV_VAR)
        .map(|v| parse_flag(&v).unwrap_or(false))
        .unwrap_or(false)
}

/// In-process store for tests and hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert(key.to_string(), value.to_string());
        Self {
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SettingsFile {
    config_version: u32,
    values: BTreeMap<String, String>,
}

/// Bring an older settings file up to the current layout.
///
/// Version 0 is a flat object as exported from browser local storage, with
/// values that may be JSON booleans rather than strings.
fn migrate(raw_json: &str) -> Result<SettingsFile> {
    if let Ok(file) = serde_json::from_str::<SettingsFile>(raw_json) {
        if file.config_version >= CURRENT_CONFIG_VERSION {
            return Ok(file);
        }
    }

    let flat: BTreeMap<String, Value> = serde_json::from_str(raw_json)?;
    info!("migrating settings v0 → v{CURRENT_CONFIG_VERSION} (flat key-value export)");
    let values = flat
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, s)),
            Value::Bool(b) => Some((key, b.to_string())),
            Value::Number(n) => Some((key, n.to_string())),
            other => {
                warn!("config: dropping non-scalar value for '{}': {}", key, other);
                None
            }
        })
        .collect();

    Ok(SettingsFile {
        config_version: CURRENT_CONFIG_VERSION,
        values,
    })
}

/// Drop known flags that do not parse so the rest of the app can trust them.
fn validate(mut file: SettingsFile) -> SettingsFile {
    for key in [ENABLED_KEY, DEBUG_KEY] {
        if let Some(raw) = file.values.get(key) {
            if parse_flag(raw).is_none() {
                warn!("config: invalid value '{}' for '{}', resetting to default", raw, key);
                file.values.remove(key);
            }
        }
    }
    file.config_version = CURRENT_CONFIG_VERSION;
    file
}

/// JSON settings file, read once at open and rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn default_path() -> Result<PathBuf> {
        let mut base = dirs::config_dir()
            .ok_or_else(|| ReminderError::Store("failed to resolve config dir".to_string()))?;
        base.push(APP_DIR_NAME);
        base.push(CONFIG_FILE_NAME);
        Ok(base)
    }

    pub async fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?).await
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            info!("no settings file at {}, using defaults", path.display());
            return Ok(Self {
                path,
                values: RwLock::new(BTreeMap::new()),
            });
        }

        debug!("loading settings from {}", path.display());
        let content = fs::read_to_string(&path).await?;
        let validated = validate(migrate(&content)?);
        let store = Self {
            path,
            values: RwLock::new(validated.values),
        };
        // Persist after load so the file reflects the latest schema.
        let snapshot = store.values.read().await.clone();
        if let Err(err) = store.persist(&snapshot).await {
            warn!("failed to rewrite settings file: {}", err);
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = SettingsFile {
            config_version: CURRENT_CONFIG_VERSION,
            values: values.clone(),
        };
        let serialized = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, serialized).await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().await;
        values.insert(key.to_string(), value.to_string());
        info!("saving settings to {}", self.path.display());
        self.persist(&values).await
    }
}
