use crate::analytics::AccessAnalytics;
use crate::cache::{CacheStats, CacheStore};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::error::ConfigError;
use crate::preload::PredictivePreloader;
use crate::remote::RemoteBackend;
use crate::store::KeyValueStore;
use crate::sync::{BackgroundSync, SyncPriority};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Background tasks of one signed-in user
struct Session {
    owner_id: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns every component and their background tasks.
///
/// ```no_run
/// # use motocache::{CacheManager, Config, MemoryStore};
/// # async fn run<R: motocache::RemoteBackend>(backend: R) -> Result<(), Box<dyn std::error::Error>> {
/// let manager = CacheManager::new(MemoryStore::new(), backend, Config::default())?;
/// manager.start("u1").await;
///
/// let motors: Option<Vec<String>> = manager.get("motors_u1").await;
/// # let _ = motors;
/// manager.logout().await;
/// # Ok(())
/// # }
/// ```
pub struct CacheManager<S: KeyValueStore, R: RemoteBackend> {
    config: Config,
    clock: SharedClock,
    analytics: Arc<AccessAnalytics>,
    cache: Arc<CacheStore<S>>,
    preloader: Arc<PredictivePreloader<S, R>>,
    sync: Arc<BackgroundSync<S, R>>,
    session: Mutex<Option<Session>>,
}

impl<S: KeyValueStore, R: RemoteBackend> CacheManager<S, R> {
    pub fn new(store: S, backend: R, config: Config) -> Result<Self, ConfigError> {
        Self::with_clock(Arc::new(store), Arc::new(backend), config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        backend: Arc<R>,
        config: Config,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let analytics = Arc::new(AccessAnalytics::new(config.analytics.clone(), clock.clone())?);
        let cache = Arc::new(
            CacheStore::new(Arc::clone(&store), config.cache.clone(), clock.clone())?
                .with_analytics(Arc::clone(&analytics)),
        );
        let preloader = Arc::new(PredictivePreloader::new(
            Arc::clone(&cache),
            Arc::clone(&analytics),
            Arc::clone(&backend),
            config.preload.clone(),
            clock.clone(),
        )?);
        let sync = Arc::new(BackgroundSync::new(
            store,
            backend,
            config.sync.clone(),
            clock.clone(),
        )?);

        Ok(Self {
            config,
            clock,
            analytics,
            cache,
            preloader,
            sync,
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn cache(&self) -> &Arc<CacheStore<S>> {
        &self.cache
    }

    pub fn analytics(&self) -> &Arc<AccessAnalytics> {
        &self.analytics
    }

    pub fn preloader(&self) -> &Arc<PredictivePreloader<S, R>> {
        &self.preloader
    }

    pub fn sync(&self) -> &Arc<BackgroundSync<S, R>> {
        &self.sync
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.get(key).await
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, data: &T, owner_id: Option<&str>) {
        self.cache.set(key, data, owner_id).await
    }

    /// Cache a local mutation and queue it for upload
    pub async fn write_through<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        owner_id: &str,
        priority: SyncPriority,
    ) {
        self.cache.set(key, data, Some(owner_id)).await;
        match serde_json::to_value(data) {
            Ok(payload) => {
                self.sync
                    .add_to_sync_queue(key, payload, owner_id, priority)
                    .await
            }
            Err(e) => tracing::warn!("Failed to queue {} for sync: {}", key, e),
        }
    }

    /// Restore the sync queue and arm every background timer for `owner_id`.
    ///
    /// Restarts the tasks if a session is already running.
    pub async fn start(&self, owner_id: &str) {
        self.shutdown().await;

        if let Err(e) = self.sync.restore().await {
            tracing::warn!("Failed to restore sync queue: {:?}", e);
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        tasks.extend(self.sync.start(cancel.child_token()));
        tasks.extend(
            self.preloader
                .start(owner_id.to_string(), cancel.child_token()),
        );
        tasks.push(self.spawn_maintenance(cancel.child_token()));

        tracing::info!("Cache manager started for owner {} ({} tasks)", owner_id, tasks.len());
        *self.session.lock().await = Some(Session {
            owner_id: owner_id.to_string(),
            cancel,
            tasks,
        });
    }

    fn spawn_maintenance(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let every = self.config.cache.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.cleanup_expired().await;
                        cache.enforce_size_limit().await;
                    }
                }
            }
        })
    }

    /// Owner of the running session
    pub async fn active_owner(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.owner_id.clone())
    }

    /// Cancel in-flight requests and stop every background task
    pub async fn shutdown(&self) -> Option<String> {
        let session = self.session.lock().await.take()?;
        session.cancel.cancel();
        for task in session.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Background task ended abnormally: {:?}", e);
            }
        }
        tracing::info!("Cache manager stopped for owner {}", session.owner_id);
        Some(session.owner_id)
    }

    /// Stop the session and drop the user's cached entries.
    ///
    /// Pending sync items stay persisted and go out at the next login.
    pub async fn logout(&self) -> usize {
        match self.shutdown().await {
            Some(owner_id) => self.cache.clear_owner_scope(&owner_id).await,
            None => 0,
        }
    }

    /// Cleanup after the app returns to the foreground
    pub async fn on_resume(&self) -> CacheStats {
        self.cache.cleanup_expired().await;
        self.cache.stats().await
    }
}
