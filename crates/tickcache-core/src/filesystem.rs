//! Disk snapshot tier in front of an `ApiService`.
//!
//! On load the snapshot is consulted first; the network is only hit when it
//! is missing, unreadable, expired or bypassed. Each cache owns one
//! directory:
//!
//! ```text
//! <base>/<directory_name>/data.json         indented JSON array of records
//! <base>/<directory_name>/last_updated.txt  yyyy-MM-ddTHH:mm:ss (UTC)
//! ```
//!
//! The marker is written only after the data file, so an interrupted save
//! leaves a missing or stale marker rather than a fresh marker over
//! truncated data.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::api::{ApiService, Provider, Record};
use crate::cancel::CancelToken;
use crate::clock::{age_display, Clock, Tick};
use crate::config::Interval;
use crate::error::SnapshotError;
use crate::lifecycle::Lifecycle;

pub const DATA_FILE: &str = "data.json";
pub const MARKER_FILE: &str = "last_updated.txt";
pub const MARKER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct FilesystemApiService<T: Record, P: Provider> {
    api: Arc<ApiService<T, P>>,
    directory: PathBuf,
    force_refresh: AtomicBool,
    max_age: Option<Interval>,
}

impl<T, P> FilesystemApiService<T, P>
where
    T: Record + Serialize + DeserializeOwned,
    P: Provider,
{
    /// Snapshot files go under `base_dir/directory_name`.
    pub fn new(api: ApiService<T, P>, base_dir: impl AsRef<Path>, directory_name: &str) -> Self {
        let force_refresh = api.config().force_refresh;
        let max_age = api.config().max_snapshot_age;
        Self {
            api: Arc::new(api),
            directory: base_dir.as_ref().join(directory_name),
            force_refresh: AtomicBool::new(force_refresh),
            max_age,
        }
    }

    pub fn api(&self) -> &Arc<ApiService<T, P>> {
        &self.api
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn data_path(&self) -> PathBuf {
        self.directory.join(DATA_FILE)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.directory.join(MARKER_FILE)
    }

    /// Skip the disk snapshot on the next loads.
    pub fn set_force_refresh(&self, force: bool) {
        self.force_refresh.store(force, Ordering::SeqCst);
    }

    /// Timestamp stored in the marker file.
    pub fn read_marker(&self) -> Result<DateTime<Utc>, SnapshotError> {
        read_marker(&self.marker_path())
    }

    async fn restore(&self) -> Result<(Vec<T>, DateTime<Utc>), SnapshotError> {
        let data_path = self.data_path();
        let marker_path = self.marker_path();
        let (items, updated_at) =
            tokio::task::spawn_blocking(move || read_snapshot::<T>(&data_path, &marker_path)).await??;

        if let Some(max_age) = self.max_age.and_then(|interval| interval.period()) {
            let age = self.api.clock().now() - updated_at;
            let too_old = chrono::Duration::from_std(max_age).map_or(false, |max| age > max);
            if too_old {
                return Err(SnapshotError::Expired(updated_at.format(MARKER_FORMAT).to_string()));
            }
        }
        Ok((items, updated_at))
    }

    /// Write the current collection to disk.
    ///
    /// Returns false without touching the disk if nothing is loaded, which
    /// includes a collection cleared for a reload.
    pub async fn save_snapshot(&self) -> Result<bool, SnapshotError> {
        let Some((items, updated_at)) = self.api.snapshot().await else {
            debug!(service = self.api.name(), "Nothing loaded, not saving");
            return Ok(false);
        };
        let count = items.len();
        let directory = self.directory.clone();

        tokio::task::spawn_blocking(move || write_snapshot(&directory, &items, updated_at)).await??;
        debug!(service = self.api.name(), count, path = %self.directory.display(), "Snapshot saved");
        Ok(true)
    }

    /// Disk path of `load`. Returns true if the collection was restored.
    async fn load_from_disk(&self) -> bool {
        if self.force_refresh.load(Ordering::SeqCst) {
            info!(service = self.api.name(), "Forced refresh, bypassing disk cache");
            return false;
        }

        let (mut items, updated_at) = match self.restore().await {
            Ok(snapshot) => snapshot,
            Err(SnapshotError::Missing(path)) => {
                debug!(service = self.api.name(), %path, "No snapshot on disk");
                return false;
            }
            Err(e) => {
                warn!(service = self.api.name(), error = %e, "Snapshot unusable, falling back to API");
                return false;
            }
        };

        if let Err(e) = self.api.fetcher().after_restore(&mut items).await {
            warn!(service = self.api.name(), error = format!("{:#}", e), "Post-restore hook failed, falling back to API");
            return false;
        }

        let outcome = self.api.hydrate(items, updated_at).await;
        info!(
            service = self.api.name(),
            ?outcome,
            age = %age_display(updated_at, self.api.clock().now()),
            "Loaded from disk cache"
        );
        true
    }
}

fn read_marker(path: &Path) -> Result<DateTime<Utc>, SnapshotError> {
    if !path.exists() {
        return Err(SnapshotError::Missing(path.display().to_string()));
    }
    let raw = fs::read_to_string(path)?;
    let value = raw.trim();
    NaiveDateTime::parse_from_str(value, MARKER_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| SnapshotError::Marker {
            value: value.to_string(),
            source,
        })
}

fn read_snapshot<T: DeserializeOwned>(data: &Path, marker: &Path) -> Result<(Vec<T>, DateTime<Utc>), SnapshotError> {
    let updated_at = read_marker(marker)?;
    if !data.exists() {
        return Err(SnapshotError::Missing(data.display().to_string()));
    }
    let reader = BufReader::new(File::open(data)?);
    let items = serde_json::from_reader(reader)?;
    Ok((items, updated_at))
}

fn write_snapshot<T: Serialize>(directory: &Path, items: &[T], updated_at: DateTime<Utc>) -> Result<(), SnapshotError> {
    // Recreate from scratch so files from an older layout never linger
    if directory.exists() {
        fs::remove_dir_all(directory)?;
    }
    fs::create_dir_all(directory)?;

    let mut writer = BufWriter::new(File::create(directory.join(DATA_FILE))?);
    serde_json::to_writer_pretty(&mut writer, items)?;
    writer.flush()?;
    drop(writer);

    fs::write(directory.join(MARKER_FILE), updated_at.format(MARKER_FORMAT).to_string())?;
    Ok(())
}

#[async_trait]
impl<T, P> Lifecycle for FilesystemApiService<T, P>
where
    T: Record + Serialize + DeserializeOwned,
    P: Provider,
{
    fn name(&self) -> &str {
        self.api.name()
    }

    async fn initialize(&self) -> Result<()> {
        self.api.initialize().await
    }

    async fn load(&self, cancel: CancelToken) -> Result<()> {
        if self.load_from_disk().await {
            return Ok(());
        }

        let outcome = self.api.refresh_exclusive(&cancel).await;
        info!(service = self.api.name(), ?outcome, "Loaded from API");
        if outcome.is_updated() {
            if let Err(e) = self.save_snapshot().await {
                warn!(service = self.api.name(), error = %e, "Failed to persist snapshot");
            }
        }
        Ok(())
    }

    fn on_tick(self: Arc<Self>, tick: &Tick, cancel: &CancelToken) {
        self.api.clone().on_tick(tick, cancel);
    }

    async fn save(&self) -> Result<()> {
        self.save_snapshot()
            .await
            .with_context(|| format!("Failed to save {} snapshot", self.api.name()))?;
        Ok(())
    }

    async fn clear(&self) {
        self.api.clear().await;
    }

    async fn unload(&self) {
        self.api.unload().await;
    }
}
