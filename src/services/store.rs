//! Durable state backends.
//!
//! Every backend replaces the whole state on `save`. A failed save leaves the
//! previously saved state loadable.

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{AppError, Result};
use crate::types::{SignalHistory, TrackRecord};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Load/save a whole state value.
pub trait Store<T>: Send + Sync {
    /// Load the last saved state, `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<T>>;

    /// Replace the saved state.
    fn save(&self, state: &T) -> Result<()>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

/// Run `save` on the blocking pool.
pub async fn save_blocking<T>(store: Arc<dyn Store<T>>, snapshot: T) -> Result<()>
where
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || store.save(&snapshot))
        .await
        .map_err(|e| AppError::Storage(format!("save task failed: {}", e)))?
}

/// Run `load` on the blocking pool.
pub async fn load_blocking<T>(store: Arc<dyn Store<T>>) -> Result<Option<T>>
where
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || store.load())
        .await
        .map_err(|e| AppError::Storage(format!("load task failed: {}", e)))?
}

/// Backends for the two persisted structures.
pub struct StateStores {
    pub track_record: Arc<dyn Store<TrackRecord>>,
    pub history: Arc<dyn Store<SignalHistory>>,
}

/// Open the configured backend under `data_dir`.
pub fn open_state_stores(config: &StorageConfig) -> Result<StateStores> {
    let dir = &config.data_dir;
    let stores = match config.backend {
        StorageBackend::Json => StateStores {
            track_record: Arc::new(JsonFileStore::new(dir.join("track_record.json"))),
            history: Arc::new(JsonFileStore::new(dir.join("signal_history.json"))),
        },
        StorageBackend::Sqlite => {
            let path = dir.join("sigwatch.db");
            StateStores {
                track_record: Arc::new(SqliteStore::open(&path, "track_record")?),
                history: Arc::new(SqliteStore::open(&path, "signal_history")?),
            }
        }
    };
    debug!(
        "State stores: {}, {}",
        stores.track_record.describe(),
        stores.history.describe()
    );
    Ok(stores)
}

// ============================================================================
// Persistent state
// ============================================================================

/// In-memory state that is authoritative, with saves written behind it.
///
/// Every change bumps a version and schedules a save of the snapshot taken
/// under the lock. Saves are serialized and a save older than the last
/// written version is skipped, so the newest state always wins.
pub struct PersistentState<T> {
    name: &'static str,
    state: Mutex<(T, u64)>,
    written: tokio::sync::Mutex<u64>,
    store: Arc<dyn Store<T>>,
}

impl<T> PersistentState<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, store: Arc<dyn Store<T>>, initial: T) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new((initial, 0)),
            written: tokio::sync::Mutex::new(0),
            store,
        })
    }

    /// Load the saved state, falling back to `T::default()` when nothing is saved
    /// or the load fails.
    pub async fn load(name: &'static str, store: Arc<dyn Store<T>>) -> Arc<Self>
    where
        T: Default,
    {
        let initial = match load_blocking(Arc::clone(&store)).await {
            Ok(Some(state)) => {
                debug!("Loaded {} from {}", name, store.describe());
                state
            }
            Ok(None) => T::default(),
            Err(e) => {
                warn!(
                    "Failed to load {} from {}: {}; starting empty",
                    name,
                    store.describe(),
                    e
                );
                T::default()
            }
        };
        Self::new(name, store, initial)
    }

    /// Read the current state.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&guard.0)
    }

    /// Apply a change. `f` returns `None` when it left the state untouched, in
    /// which case nothing is saved.
    pub fn update<R>(self: &Arc<Self>, f: impl FnOnce(&mut T) -> Option<R>) -> Option<R> {
        let (result, snapshot, version) = {
            let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let result = f(&mut guard.0)?;
            guard.1 += 1;
            (result, guard.0.clone(), guard.1)
        };
        self.schedule_save(snapshot, version);
        Some(result)
    }

    /// Write the current state now, unless it is already saved.
    pub async fn flush(&self) -> Result<()> {
        let (snapshot, version) = {
            let guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
            (guard.0.clone(), guard.1)
        };
        self.write_version(snapshot, version).await
    }

    fn schedule_save(self: &Arc<Self>, snapshot: T, version: u64) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = Arc::clone(self);
                handle.spawn(async move {
                    if let Err(e) = this.write_version(snapshot, version).await {
                        warn!(
                            "Failed to persist {} to {}: {}",
                            this.name,
                            this.store.describe(),
                            e
                        );
                    }
                });
            }
            Err(_) => {
                if let Err(e) = self.store.save(&snapshot) {
                    warn!("Failed to persist {}: {}", self.name, e);
                }
            }
        }
    }

    async fn write_version(&self, snapshot: T, version: u64) -> Result<()> {
        let mut written = self.written.lock().await;
        if *written >= version && version > 0 {
            return Ok(());
        }
        save_blocking(Arc::clone(&self.store), snapshot).await?;
        *written = version;
        Ok(())
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// JSON file written via temp file + fsync + rename.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl<T> Store<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    fn save(&self, state: &T) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let content = serde_json::to_vec_pretty(state)?;
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!("Saved {} bytes to {}", content.len(), self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// One row per state key in an SQLite table, replaced inside a transaction.
pub struct SqliteStore<T> {
    conn: Mutex<Connection>,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SqliteStore<T> {
    /// Open (or create) the database at `path` and use `key` as this state's row.
    pub fn open<P: AsRef<Path>>(path: P, key: &str) -> Result<Self> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Self::with_connection(Connection::open(path)?, key)
    }

    /// In-memory database (for testing).
    pub fn open_in_memory(key: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, key)
    }

    fn with_connection(conn: Connection, key: &str) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            key: key.to_string(),
            _marker: PhantomData,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Storage("sqlite connection poisoned".to_string()))
    }
}

impl<T> Store<T> for SqliteStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM state WHERE key = ?1",
                params![self.key],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &T) -> Result<()> {
        let json = serde_json::to_string(state)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO state (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![self.key, json, chrono::Utc::now().timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.key)
    }
}

// ============================================================================
// Memory
// ============================================================================

/// In-process store. Can be told to fail writes.
pub struct MemoryStore<T> {
    state: Mutex<Option<T>>,
    saves: AtomicUsize,
    fail_writes: AtomicBool,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            saves: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Store<T> for MemoryStore<T>
where
    T: Clone + Send,
{
    fn load(&self) -> Result<Option<T>> {
        let guard = self
            .state
            .lock()
            .map_err(|_| AppError::Storage("memory store poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn save(&self, state: &T) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Storage("simulated write failure".to_string()));
        }
        let mut guard = self
            .state
            .lock()
            .map_err(|_| AppError::Storage("memory store poisoned".to_string()))?;
        *guard = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
