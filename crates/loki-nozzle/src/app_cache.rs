// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory app metadata cache with a warm-start store.
//!
//! One `RwLock` guards the app map, the negative cache of unresolvable GUIDs
//! and the org and space name maps. Remote calls always run with the lock
//! released and their results are merged under the write lock, so two
//! concurrent misses on the same GUID may each reach the directory.
//!
//! Up to three background loops keep the maps fresh:
//!
//! - every `app_cache_ttl` the app map is replaced by a full remote listing
//! - every `missing_app_cache_ttl` the negative cache is emptied
//! - every `org_space_cache_ttl` the org and space maps are emptied

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app_store::AppStore;
use crate::constants::{APPS_PER_PAGE, OPT_OUT_ENV_KEY, OPT_OUT_ENV_VALUE, STORE_OPEN_TIMEOUT};
use crate::directory::{AppDirectory, AppQuery, AppRecord};
use crate::errors::{CacheError, DirectoryError, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub guid: String,
    pub name: String,
    pub space_guid: String,
    pub space_name: String,
    pub org_guid: String,
    pub org_name: String,
    /// The app opted out of log forwarding
    pub ignored_app: bool,
}

impl App {
    fn from_record(record: AppRecord) -> Self {
        App {
            ignored_app: is_opt_out(&record.environment),
            guid: record.guid,
            name: record.name,
            space_guid: record.space_guid,
            ..Default::default()
        }
    }
}

fn is_opt_out(environment: &HashMap<String, serde_json::Value>) -> bool {
    environment
        .get(OPT_OUT_ENV_KEY)
        .and_then(serde_json::Value::as_str)
        == Some(OPT_OUT_ENV_VALUE)
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Location of the warm-start store
    pub path: PathBuf,
    /// Remember GUIDs that failed to resolve and stop asking for them
    pub ignore_missing_apps: bool,
    pub missing_app_cache_ttl: Duration,
    pub app_cache_ttl: Duration,
    pub org_space_cache_ttl: Duration,
    /// Only keep the N most recently updated apps on bulk fetches (0 = all)
    pub app_limits: usize,
}

#[derive(Debug, Clone)]
struct OrgEntry {
    name: String,
    last_updated: Instant,
}

#[derive(Debug, Clone)]
struct SpaceEntry {
    name: String,
    org_guid: String,
    last_updated: Instant,
}

fn is_fresh(last_updated: Instant, ttl: Duration) -> bool {
    !ttl.is_zero() && last_updated.elapsed() <= ttl
}

#[derive(Debug, Default)]
struct CacheState {
    apps: HashMap<String, App>,
    missing_apps: HashSet<String>,
    orgs: HashMap<String, OrgEntry>,
    spaces: HashMap<String, SpaceEntry>,
}

struct Inner {
    config: CacheConfig,
    directory: Arc<dyn AppDirectory>,
    state: RwLock<CacheState>,
    store: Mutex<Option<AppStore>>,
}

impl Inner {
    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves the space and org names of `app`, refetching entries that
    /// are absent or older than the org/space TTL.
    async fn fill_org_and_space(&self, app: &mut App) -> Result<(), DirectoryError> {
        let ttl = self.config.org_space_cache_ttl;

        let cached_space = {
            let state = self.read_state();
            state
                .spaces
                .get(&app.space_guid)
                .filter(|space| is_fresh(space.last_updated, ttl))
                .cloned()
        };
        let space = match cached_space {
            Some(space) => space,
            None => {
                let record = self.directory.get_space(&app.space_guid).await?;
                let entry = SpaceEntry {
                    name: record.name,
                    org_guid: record.org_guid,
                    last_updated: Instant::now(),
                };
                self.write_state()
                    .spaces
                    .insert(app.space_guid.clone(), entry.clone());
                entry
            }
        };
        app.space_name = space.name;
        app.org_guid = space.org_guid;

        let cached_org = {
            let state = self.read_state();
            state
                .orgs
                .get(&app.org_guid)
                .filter(|org| is_fresh(org.last_updated, ttl))
                .cloned()
        };
        let org = match cached_org {
            Some(org) => org,
            None => {
                let record = self.directory.get_org(&app.org_guid).await?;
                let entry = OrgEntry {
                    name: record.name,
                    last_updated: Instant::now(),
                };
                self.write_state()
                    .orgs
                    .insert(app.org_guid.clone(), entry.clone());
                entry
            }
        };
        app.org_name = org.name;

        Ok(())
    }

    async fn app_from_record(&self, record: AppRecord) -> App {
        let mut app = App::from_record(record);
        if let Err(e) = self.fill_org_and_space(&mut app).await {
            warn!("Unable to resolve space and org of app {}: {e}", app.guid);
        }
        app
    }

    async fn fetch_app(&self, guid: &str) -> Result<App, DirectoryError> {
        let record = self.directory.get_app(guid).await?;
        let app = self.app_from_record(record).await;
        self.persist(vec![app.clone()]).await;
        Ok(app)
    }

    async fn fetch_all_apps(&self) -> Result<HashMap<String, App>, DirectoryError> {
        info!("Retrieving apps from remote");

        let app_limits = self.config.app_limits;
        let (query, page_cap) = if app_limits > 0 {
            let query = AppQuery {
                order_descending: true,
                results_per_page: Some(APPS_PER_PAGE),
            };
            (query, app_limits / APPS_PER_PAGE + 1)
        } else {
            (AppQuery::default(), 0)
        };

        let mut records = self.directory.list_apps(&query, page_cap).await?;
        if app_limits > 0 {
            records.truncate(app_limits);
        }

        let mut apps = HashMap::with_capacity(records.len());
        for record in records {
            let app = self.app_from_record(record).await;
            apps.insert(app.guid.clone(), app);
        }
        self.persist(apps.values().cloned().collect()).await;

        info!("Found {} apps", apps.len());
        Ok(apps)
    }

    fn replace_apps(&self, apps: HashMap<String, App>) {
        let mut state = self.write_state();
        state.missing_apps.retain(|guid| !apps.contains_key(guid));
        state.apps = apps;
    }

    async fn refresh_apps(&self) {
        match self.fetch_all_apps().await {
            Ok(apps) => self.replace_apps(apps),
            Err(e) => error!("Unable to fetch copy of cache from remote: {e}"),
        }
    }

    fn clear_org_and_space(&self) {
        let mut state = self.write_state();
        state.orgs.clear();
        state.spaces.clear();
    }

    /// Writes `apps` through to the store on a blocking thread.
    async fn persist(&self, apps: Vec<App>) {
        let store = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(store) = store else {
            return;
        };
        match tokio::task::spawn_blocking(move || store.put_apps(&apps)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to write apps to the app store: {e}"),
            Err(e) => error!("App store write task failed: {e}"),
        }
    }
}

/// Resolves app GUIDs to app, space and org names.
pub struct MetadataCache {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MetadataCache {
    /// Opens the warm-start store and fills the app map from it, falling
    /// back to a full remote listing when the store is empty, then starts
    /// the background loops whose TTL is non-zero.
    ///
    /// Only a store that cannot be opened or read is fatal. A failing
    /// remote listing leaves the cache empty.
    pub async fn open(
        config: CacheConfig,
        directory: Arc<dyn AppDirectory>,
    ) -> Result<Self, CacheError> {
        let path = config.path.clone();
        let (store, persisted) = tokio::task::spawn_blocking(move || {
            let store = AppStore::open(&path, STORE_OPEN_TIMEOUT)?;
            let persisted = store.load_apps()?;
            Ok::<_, StoreError>((store, persisted))
        })
        .await
        .map_err(CacheError::StoreTask)?
        .map_err(CacheError::StoreOpen)?;

        let inner = Arc::new(Inner {
            config,
            directory,
            state: RwLock::new(CacheState::default()),
            store: Mutex::new(Some(store)),
        });

        if persisted.is_empty() {
            match inner.fetch_all_apps().await {
                Ok(apps) => inner.replace_apps(apps),
                Err(e) => warn!("Unable to populate the app cache from remote: {e}"),
            }
        } else {
            info!("Loaded {} apps from the app store", persisted.len());
            let apps = persisted
                .into_iter()
                .map(|app| (app.guid.clone(), app))
                .collect();
            inner.replace_apps(apps);
        }

        let cache = MetadataCache {
            inner,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        };
        cache.start_background_loops();
        Ok(cache)
    }

    fn start_background_loops(&self) {
        let config = &self.inner.config;
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        if !config.app_cache_ttl.is_zero() {
            let inner = Arc::clone(&self.inner);
            tasks.push(self.spawn_loop("app cache refresh", config.app_cache_ttl, move || {
                let inner = Arc::clone(&inner);
                async move { inner.refresh_apps().await }
            }));
        }

        if !config.missing_app_cache_ttl.is_zero() {
            let inner = Arc::clone(&self.inner);
            tasks.push(self.spawn_loop(
                "missing app cache clear",
                config.missing_app_cache_ttl,
                move || {
                    let inner = Arc::clone(&inner);
                    async move { inner.write_state().missing_apps.clear() }
                },
            ));
        }

        if !config.org_space_cache_ttl.is_zero() {
            let inner = Arc::clone(&self.inner);
            tasks.push(self.spawn_loop(
                "org and space cache clear",
                config.org_space_cache_ttl,
                move || {
                    let inner = Arc::clone(&inner);
                    async move { inner.clear_org_and_space() }
                },
            ));
        }
    }

    fn spawn_loop<F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        mut on_tick: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // discard first tick, which is instantaneous

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => on_tick().await,
                }
            }
            debug!("{name} loop stopped");
        })
    }

    /// Returns the metadata of `guid`.
    ///
    /// Cached apps are served without an app lookup, though their space and
    /// org names are refreshed once those entries expire. GUIDs that already
    /// failed are rejected with [`CacheError::MissingAndIgnored`] while
    /// `ignore_missing_apps` is set.
    pub async fn get_app(&self, guid: &str) -> Result<App, CacheError> {
        let (cached, missing) = {
            let state = self.inner.read_state();
            (
                state.apps.get(guid).cloned(),
                state.missing_apps.contains(guid),
            )
        };

        if let Some(mut app) = cached {
            if let Err(e) = self.inner.fill_org_and_space(&mut app).await {
                warn!("Unable to refresh space and org of app {guid}: {e}");
            }
            return Ok(app);
        }

        if missing && self.inner.config.ignore_missing_apps {
            return Err(CacheError::MissingAndIgnored);
        }

        match self.inner.fetch_app(guid).await {
            Ok(app) => {
                let mut state = self.inner.write_state();
                state.missing_apps.remove(guid);
                state.apps.insert(app.guid.clone(), app.clone());
                Ok(app)
            }
            Err(e) => {
                if self.inner.config.ignore_missing_apps {
                    self.inner.write_state().missing_apps.insert(guid.to_string());
                }
                Err(e.into())
            }
        }
    }

    /// Snapshot of every cached app.
    pub fn get_all_apps(&self) -> HashMap<String, App> {
        self.inner.read_state().apps.clone()
    }

    /// Drops the org and space maps and replaces the app map with a fresh
    /// remote listing. On failure the current app map is kept.
    pub async fn manually_invalidate_caches(&self) -> Result<(), CacheError> {
        self.inner.clear_org_and_space();
        let apps = self.inner.fetch_all_apps().await?;
        self.inner.replace_apps(apps);
        Ok(())
    }

    /// Stops the background loops, waits for them and releases the store.
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        self.cancel.cancel();

        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                error!("App cache background loop failed: {e}");
            }
        }

        let store = self
            .inner
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if store.is_some() {
            debug!("App store closed");
        }
    }
}

impl Drop for MetadataCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
