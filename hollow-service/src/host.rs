//! Service host facade.
//!
//! Owns everything the request handlers share: the setting manager (backed
//! by the XML settings file), the depot connection cache, the identity
//! context, and the observational timestamps reported by `ServiceStatus`.
//! Tunables are re-read from the settings on every use, so a `SetSetting`
//! takes effect on the next request without a restart.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hollow_core::depot::DepotFactory;
use hollow_core::settings::{names, SettingManager, SettingNode};
use hollow_core::types::{DepotSyncOptions, Identity};
use hollow_proto::ServiceStatus;
use hollow_sync::{
    ConnectionCache, IdentityContext, RenameTunables, SyncOrchestrator, SyncTunables,
};

use crate::error::ServiceError;
use crate::paths::{hollow_root, settings_path};

pub struct ServiceHost {
    home: PathBuf,
    cache: Arc<ConnectionCache>,
    identities: Arc<IdentityContext>,
    settings: Mutex<SettingManager>,
    started_at_unix: u64,
    last_request_unix: AtomicU64,
    last_modified_unix: AtomicU64,
}

impl ServiceHost {
    pub fn new(home: &Path, factory: Arc<dyn DepotFactory>) -> Result<Self, ServiceError> {
        let settings = SettingManager::load_from_file(&settings_path(home))?;
        Ok(Self {
            home: home.to_path_buf(),
            cache: Arc::new(ConnectionCache::new(factory)),
            identities: Arc::new(IdentityContext::new(Identity::from("service"))),
            settings: Mutex::new(settings),
            started_at_unix: unix_seconds_now(),
            last_request_unix: AtomicU64::new(0),
            last_modified_unix: AtomicU64::new(0),
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    // -- settings -----------------------------------------------------------

    pub fn get_setting(&self, name: &str) -> Option<SettingNode> {
        self.lock_settings().get(name)
    }

    /// Validate and apply one setting; accepted values are persisted to the
    /// XML settings file immediately.
    pub fn set_setting(&self, name: &str, value: SettingNode) -> Result<bool, ServiceError> {
        let mut settings = self.lock_settings();
        if !settings.set(name, value) {
            return Ok(false);
        }
        settings.save_to_file(&settings_path(&self.home))?;
        drop(settings);
        self.touch_modified();
        Ok(true)
    }

    pub fn all_settings(&self) -> Vec<(String, SettingNode)> {
        self.lock_settings().all()
    }

    /// Orchestrator for one request, with tunables read fresh from settings.
    pub fn orchestrator(&self) -> SyncOrchestrator {
        let settings = self.lock_settings();
        let tunables = SyncTunables {
            max_connections: settings.int(names::MAX_SYNC_CONNECTIONS, 4).max(1) as usize,
            rename: RenameTunables {
                max_attempts: settings.int(names::RENAME_MAX_ATTEMPTS, 5).max(1) as u32,
                wait: Duration::from_millis(settings.int(names::RENAME_WAIT_MILLIS, 100).max(0) as u64),
            },
        };
        drop(settings);
        SyncOrchestrator::new(self.cache.clone(), self.identities.clone(), tunables)
    }

    /// Fill request fields the caller left to service policy: an absent
    /// `always_resident` pattern falls back to the `AlwaysResident` setting.
    pub fn apply_setting_defaults(&self, options: &mut DepotSyncOptions) {
        if options.always_resident.is_none() {
            let pattern = self.lock_settings().text(names::ALWAYS_RESIDENT, "");
            if !pattern.is_empty() {
                options.always_resident = Some(pattern);
            }
        }
    }

    pub fn remote_logging(&self) -> bool {
        self.lock_settings().bool(names::REMOTE_LOGGING, true)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_settings().int(names::IDLE_CONNECTION_SECONDS, 300).max(0) as u64)
    }

    pub fn gc_period(&self) -> Duration {
        Duration::from_secs(self.lock_settings().int(names::GC_PERIOD_SECONDS, 60).max(1) as u64)
    }

    pub fn port(&self) -> u16 {
        self.lock_settings()
            .int(names::SERVICE_PORT, crate::paths::DEFAULT_PORT as i32)
            .clamp(0, u16::MAX as i32) as u16
    }

    // -- observational state ------------------------------------------------

    /// The user-mode stand-in for a kernel driver session: connected once the
    /// service metadata root exists.
    pub fn is_driver_connected(&self) -> bool {
        hollow_root(&self.home).exists()
    }

    pub fn touch_request(&self) {
        self.last_request_unix
            .store(unix_seconds_now(), Ordering::Relaxed);
    }

    pub fn touch_modified(&self) {
        self.last_modified_unix
            .store(unix_seconds_now(), Ordering::Relaxed);
    }

    /// Synchronous idle-connection sweep; returns how many were closed.
    pub fn garbage_collect(&self, idle_timeout: Duration) -> usize {
        self.cache.garbage_collect(idle_timeout)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            running: true,
            driver_connected: self.is_driver_connected(),
            started_at_unix: self.started_at_unix,
            last_request_unix: self.last_request_unix.load(Ordering::Relaxed),
            last_modified_unix: self.last_modified_unix.load(Ordering::Relaxed),
            idle_connections: self.cache.idle_count(),
        }
    }

    fn lock_settings(&self) -> std::sync::MutexGuard<'_, SettingManager> {
        self.settings.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub(crate) fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
