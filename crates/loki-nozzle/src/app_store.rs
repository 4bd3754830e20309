// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Warm-start store for app metadata, backed by redb.
//!
//! The store only exists so a restarted nozzle can skip the full remote
//! listing. Reads at runtime go through the in-memory maps of the cache.

use redb::{Database, DatabaseError, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::app_cache::App;
use crate::constants::APP_BUCKET;
use crate::errors::StoreError;

const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new(APP_BUCKET);

const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(50);

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to the store. Clones share one database; all calls block on
/// file I/O and belong on a blocking thread when used from async code.
#[derive(Clone)]
pub struct AppStore {
    db: Arc<Database>,
}

impl AppStore {
    /// Opens or creates the database at `path` and makes sure the app table
    /// exists. While another handle holds the file, opening is retried until
    /// `timeout` elapses.
    pub fn open(path: impl AsRef<Path>, timeout: Duration) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let deadline = Instant::now() + timeout;
        let db = loop {
            match Database::create(path) {
                Ok(db) => break db,
                Err(DatabaseError::DatabaseAlreadyOpen) if Instant::now() < deadline => {
                    std::thread::sleep(OPEN_RETRY_INTERVAL);
                }
                Err(DatabaseError::DatabaseAlreadyOpen) => {
                    return Err(StoreError::Timeout(timeout));
                }
                Err(e) => return Err(e.into()),
            }
        };

        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(APPS)?;
        }
        write_txn.commit()?;

        debug!("Opened app store at {}", path.display());
        Ok(Self { db: Arc::new(db) })
    }

    /// Loads every persisted app. Records that fail to decode are skipped.
    pub fn load_apps(&self) -> StoreResult<Vec<App>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(APPS)?;
        let mut apps = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            match serde_json::from_slice::<App>(entry.1.value()) {
                Ok(app) => apps.push(app),
                Err(e) => error!("Failed to decode app '{}': {}", entry.0.value(), e),
            }
        }
        Ok(apps)
    }

    /// Writes all `apps` in one transaction, keyed by GUID.
    pub fn put_apps<'a>(&self, apps: impl IntoIterator<Item = &'a App>) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(APPS)?;
            for app in apps {
                let serialized = serde_json::to_vec(app)?;
                table.insert(app.guid.as_str(), serialized.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(guid: &str, name: &str) -> App {
        App {
            guid: guid.to_string(),
            name: name.to_string(),
            space_guid: "sp-1".to_string(),
            space_name: "prod".to_string(),
            org_guid: "org-1".to_string(),
            org_name: "acme".to_string(),
            ignored_app: false,
        }
    }

    #[test]
    fn test_put_and_load_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let store = AppStore::open(&path, Duration::from_secs(1)).unwrap();
            assert!(store.load_apps().unwrap().is_empty());
            store
                .put_apps([&app("app-1", "billing"), &app("app-2", "payments")])
                .unwrap();
            // same key overwrites
            store.put_apps([&app("app-1", "billing-v2")]).unwrap();
        }

        let store = AppStore::open(&path, Duration::from_secs(1)).unwrap();
        let mut apps = store.load_apps().unwrap();
        apps.sort_by(|a, b| a.guid.cmp(&b.guid));
        assert_eq!(apps, vec![app("app-1", "billing-v2"), app("app-2", "payments")]);
    }

    #[test]
    fn test_open_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let _held = AppStore::open(&path, Duration::from_secs(1)).unwrap();
        let started = Instant::now();
        let result = AppStore::open(&path, Duration::from_millis(120));

        assert!(matches!(result, Err(StoreError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(120));
    }
}
