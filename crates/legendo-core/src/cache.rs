//! The cache facade: the only type the rest of the process talks to.
//!
//! Callers hand in a payload and get back an opaque id, or hand in an id and
//! get the payload back. Anything that goes wrong below this layer (unknown
//! id, swept entry, a tag that does not verify) comes out as
//! [`CacheError::NotFound`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{CipherKey, CryptoUnit};
use crate::error::{CacheError, Result};
use crate::store::{Entry, EntryId, EntryStore, MemoryStore};
use crate::sweeper::{spawn_sweeper, sweep_expired, SweepReport, SweeperHandle};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepStats {
    pub cycles: u64,
    pub removed_total: u64,
    pub failed_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sweep_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<SweepReport>,
}

impl SweepStats {
    fn record(&mut self, report: SweepReport) {
        self.cycles += 1;
        self.removed_total += report.removed as u64;
        self.failed_total += report.failed as u64;
        self.last_sweep_at = Some(Utc::now());
        self.last_report = Some(report);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub entry_count: usize,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
    pub sweeping: bool,
    pub sweep: SweepStats,
}

pub struct SecureCache {
    crypto: CryptoUnit,
    store: Arc<dyn EntryStore>,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    stats: Arc<Mutex<SweepStats>>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl SecureCache {
    pub fn new(key: &CipherKey) -> Self {
        Self::with_store(key, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(key: &CipherKey, store: Arc<dyn EntryStore>) -> Self {
        Self {
            crypto: CryptoUnit::new(key),
            store,
            started_at: Instant::now(),
            started_wall: Utc::now(),
            stats: Arc::new(Mutex::new(SweepStats::default())),
            sweeper: Mutex::new(None),
        }
    }

    /// Serialize `payload` as JSON, seal it, and return its new id.
    pub fn store<T: Serialize + ?Sized>(&self, payload: &T) -> Result<EntryId> {
        let bytes = Zeroizing::new(serde_json::to_vec(payload)?);
        self.store_bytes(&bytes)
    }

    pub fn store_bytes(&self, bytes: &[u8]) -> Result<EntryId> {
        let id = Uuid::new_v4();
        // the id is bound as associated data so a sealed value cannot be
        // replayed under a different id
        let sealed = self.crypto.encrypt(bytes, id.as_bytes())?;
        self.store.put(Entry::new(id, sealed))?;
        debug!(%id, len = bytes.len(), "entry stored");
        Ok(id)
    }

    pub fn retrieve<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        let bytes = self.retrieve_bytes(id)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn retrieve_bytes(&self, id: &str) -> Result<Zeroizing<Vec<u8>>> {
        let id = Uuid::parse_str(id).map_err(|_| CacheError::NotFound)?;
        let entry = self.store.get(&id).ok_or(CacheError::NotFound)?;
        match self.crypto.decrypt(&entry.sealed, id.as_bytes()) {
            Ok(plain) => Ok(plain),
            Err(CacheError::AuthenticationFailure) => {
                debug!(%id, "entry failed authentication");
                Err(CacheError::NotFound)
            }
            Err(other) => Err(other),
        }
    }

    /// Start the periodic sweeper. A sweeper that is already running is
    /// stopped and replaced. Must be called from within a tokio runtime.
    pub fn start_sweeping(&self, interval: Duration, max_age: Duration) -> Result<()> {
        if interval.is_zero() || max_age.is_zero() {
            return Err(CacheError::Config(
                "sweep interval and max age must be non-zero".into(),
            ));
        }
        let stats = self.stats.clone();
        let handle = spawn_sweeper(self.store.clone(), interval, max_age, move |report| {
            stats.lock().record(report)
        });
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.signal_stop();
        }
        info!(
            interval_secs = interval.as_secs(),
            max_age_secs = max_age.as_secs(),
            "sweeping enabled"
        );
        Ok(())
    }

    /// Stop and join the sweeper. No-op when none is running.
    pub async fn stop_sweeping(&self) {
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
            info!("sweeping stopped");
        }
    }

    /// Run a single sweep cycle on the calling thread.
    pub fn sweep_now(&self, max_age: Duration) -> SweepReport {
        let report = sweep_expired(self.store.as_ref(), max_age, Instant::now());
        self.stats.lock().record(report);
        report
    }

    pub fn status(&self) -> CacheStatus {
        let sweeping = self
            .sweeper
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false);
        CacheStatus {
            entry_count: self.store.len(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            started_at: self.started_wall,
            sweeping,
            sweep: self.stats.lock().clone(),
        }
    }
}
