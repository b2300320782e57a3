//! Persistent key/value store for enrollment and device state.
//!
//! Everything lives in one JSON object file. Read failures degrade to
//! "absent" and write failures to "no-op"; both are logged and never abort
//! the calling flow.

use crate::{config::PathConfig, models::Enrollment};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rand_core::{OsRng, TryRngCore};
use std::{collections::BTreeMap, fmt, io::ErrorKind, path::PathBuf, sync::Arc};
use tokio::{fs, sync::Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKey {
    DeviceEnrollment,
    DeviceId,
    LastEmployeeCode,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::DeviceEnrollment => "deviceEnrollment",
            StoreKey::DeviceId => "deviceId",
            StoreKey::LastEmployeeCode => "lastEmployeeCode",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Entries = BTreeMap<String, String>;

#[derive(Clone, Debug)]
pub struct LocalStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(paths: &PathConfig) -> Self {
        Self::new(paths.store_file.clone())
    }

    pub async fn get(&self, key: StoreKey) -> Option<String> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("failed to read {key} from local store: {e:#}");
                None
            }
        }
    }

    /// Returns whether the value was persisted.
    pub async fn set(&self, key: StoreKey, value: &str) -> bool {
        match self.try_set(key, value).await {
            Ok(()) => {
                debug!("stored {key}");
                true
            }
            Err(e) => {
                error!("failed to write {key} to local store: {e:#}");
                false
            }
        }
    }

    pub async fn enrollment(&self) -> Option<Enrollment> {
        let raw = self.get(StoreKey::DeviceEnrollment).await?;

        serde_json::from_str(&raw)
            .inspect_err(|e| warn!("failed to parse stored enrollment: {e}"))
            .ok()
    }

    pub async fn save_enrollment(&self, enrollment: &Enrollment) -> bool {
        match serde_json::to_string(enrollment) {
            Ok(json) => self.set(StoreKey::DeviceEnrollment, &json).await,
            Err(e) => {
                error!("failed to serialize enrollment: {e}");
                false
            }
        }
    }

    /// The installation's device id, generated and persisted on first use.
    pub async fn device_id_or_create(&self) -> String {
        if let Some(device_id) = self.get(StoreKey::DeviceId).await {
            return device_id;
        }

        let device_id = generate_device_id(Utc::now());
        info!("generated device id {device_id}");

        if !self.set(StoreKey::DeviceId, &device_id).await {
            warn!("device id {device_id} is not persisted and will change on restart");
        }

        device_id
    }

    pub async fn last_employee_code(&self) -> Option<String> {
        self.get(StoreKey::LastEmployeeCode)
            .await
            .filter(|code| !code.is_empty())
    }

    pub async fn set_last_employee_code(&self, employee_code: &str) -> bool {
        self.set(StoreKey::LastEmployeeCode, employee_code).await
    }

    async fn try_get(&self, key: StoreKey) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        Ok(entries.remove(key.as_str()))
    }

    async fn try_set(&self, key: StoreKey, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.insert(key.as_str().to_string(), value.to_string());
        self.write_entries(&entries).await
    }

    async fn read_entries(&self) -> Result<Entries> {
        match fs::read(self.path.as_ref()).await {
            Ok(bytes) => serde_json::from_slice(&bytes).context("failed to parse local store file"),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e).context("failed to read local store file"),
        }
    }

    async fn write_entries(&self, entries: &Entries) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries).context("failed to serialize local store")?;
        let tmp_path = self.path.with_extension("tmp");

        fs::write(&tmp_path, json)
            .await
            .context("failed to write temporary local store file")?;

        fs::rename(&tmp_path, self.path.as_ref())
            .await
            .context("failed to replace local store file")
    }
}

/// `DEV-<unix millis>-<0..999>`
pub fn generate_device_id(now: DateTime<Utc>) -> String {
    let suffix = OsRng
        .try_next_u32()
        .map(|n| n % 1000)
        .unwrap_or_else(|e| {
            warn!("failed to get random device id suffix: {e}");
            now.timestamp_subsec_millis() % 1000
        });

    format!("DEV-{}-{suffix}", now.timestamp_millis())
}
