use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use crate::types::Status;

const CONFIG_FILE: &str = "config.json";
const TEMPERATURE_LOG_FILE: &str = "temperature.jsonl";
const STATUS_LOG_FILE: &str = "status.jsonl";

type DefaultResolver = Box<dyn FnMut(&str) -> String + Send>;

#[derive(Debug, Serialize)]
struct TemperatureSample {
    temp: f32,
    ts: i64,
}

#[derive(Debug, Serialize)]
struct StatusRecord {
    status: Status,
    fan: bool,
    ts: i64,
}

/// Durable key/value store with an in-memory cache, a default-value
/// resolver, and two append-only audit logs.
///
/// Reads fall through cache, then the durable store, then the resolver;
/// once a key lands in the cache it is authoritative for the process
/// lifetime. Writes hit cache and the durable store synchronously, except
/// inside a [`Transaction`], which stages them for one atomic flush.
///
/// When no durable backend is available (none configured, or the data
/// directory cannot be used) the store keeps working in memory only. That
/// is a supported mode, not an error: reads and writes behave identically,
/// nothing survives a restart.
pub struct SettingsStore {
    cache: HashMap<String, String>,
    backend: Option<FileBackend>,
    default_resolver: Option<DefaultResolver>,
    tx_active: bool,
    tx_dirty: bool,
}

impl SettingsStore {
    /// Cache-only store; nothing persists.
    pub fn in_memory() -> Self {
        Self {
            cache: HashMap::new(),
            backend: None,
            default_resolver: None,
            tx_active: false,
            tx_dirty: false,
        }
    }

    /// Opens (or creates) the durable store under `dir`. Falls back to
    /// in-memory operation if the directory is unusable.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let backend = match FileBackend::open(dir.clone()) {
            Ok(backend) => Some(backend),
            Err(err) => {
                warn!(
                    "settings store at {} unavailable, continuing in memory only: {err}",
                    dir.display()
                );
                None
            }
        };

        Self {
            backend,
            ..Self::in_memory()
        }
    }

    pub fn is_durable(&self) -> bool {
        self.backend.is_some()
    }

    /// Registers the fallback used when a key is found neither in cache
    /// nor in the durable store. Invoked at most once per key; its result
    /// is cached.
    pub fn set_default_resolver(&mut self, resolver: impl FnMut(&str) -> String + Send + 'static) {
        self.default_resolver = Some(Box::new(resolver));
    }

    pub fn get(&mut self, key: &str) -> String {
        if let Some(value) = self.cache.get(key) {
            return value.clone();
        }

        if let Some(value) = self.backend.as_ref().and_then(|b| b.lookup(key)) {
            self.cache.insert(key.to_string(), value.clone());
            return value;
        }

        if let Some(resolver) = self.default_resolver.as_mut() {
            let value = resolver(key);
            self.cache.insert(key.to_string(), value.clone());
            return value;
        }

        String::new()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.cache.insert(key.to_string(), value.clone());

        if let Some(backend) = self.backend.as_mut() {
            backend.store(key, value);
            if self.tx_active {
                self.tx_dirty = true;
            } else if let Err(err) = backend.flush_config() {
                warn!("failed to persist settings key {key:?}: {err}");
            }
        }
    }

    /// Appends a temperature sample to the audit log. Never read back.
    pub fn log_temperature_sample(&mut self, temp_c: f32, timestamp_ms: i64) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let record = TemperatureSample {
            temp: temp_c,
            ts: timestamp_ms,
        };
        if let Err(err) = backend.append_log(TEMPERATURE_LOG_FILE, &record) {
            warn!("failed to append temperature sample: {err}");
        }
    }

    /// Appends a status transition to the audit log. Never read back.
    pub fn log_status_change(&mut self, status: Status, fan_running: bool, timestamp_ms: i64) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let record = StatusRecord {
            status,
            fan: fan_running,
            ts: timestamp_ms,
        };
        if let Err(err) = backend.append_log(STATUS_LOG_FILE, &record) {
            warn!("failed to append status change: {err}");
        }
    }

    /// Opens a transaction scope. All `set` calls made until the returned
    /// guard drops are flushed to the durable store as one atomic write.
    /// The cache is updated immediately regardless.
    ///
    /// Transactions do not nest; opening a second one while the first is
    /// live is a programming error.
    pub fn transaction(&mut self) -> Transaction<'_> {
        debug_assert!(
            !self.tx_active,
            "settings transactions do not support nesting"
        );
        self.tx_active = true;
        Transaction { store: self }
    }

    /// Runs `f` inside a transaction scope; the commit happens when `f`
    /// returns, on every exit path.
    pub fn with_transaction<R>(&mut self, f: impl FnOnce(&mut SettingsStore) -> R) -> R {
        let mut tx = self.transaction();
        f(&mut tx)
    }

    fn commit_tx(&mut self) {
        self.tx_active = false;
        if !self.tx_dirty {
            return;
        }
        self.tx_dirty = false;
        if let Some(backend) = self.backend.as_mut() {
            if let Err(err) = backend.flush_config() {
                warn!("failed to commit settings transaction: {err}");
            }
        }
    }
}

/// Scope guard for a settings transaction. Commits exactly once, when
/// dropped, so the commit fires on early return and unwinding alike.
pub struct Transaction<'a> {
    store: &'a mut SettingsStore,
}

impl Deref for Transaction<'_> {
    type Target = SettingsStore;

    fn deref(&self) -> &Self::Target {
        self.store
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.store
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.store.commit_tx();
    }
}

struct FileBackend {
    dir: PathBuf,
    // Mirror of config.json; staged transaction writes live here until
    // the next flush.
    durable: HashMap<String, String>,
}

impl FileBackend {
    fn open(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;

        let durable = match fs::read(dir.join(CONFIG_FILE)) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(io::Error::other)?,
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err),
        };

        Ok(Self { dir, durable })
    }

    fn lookup(&self, key: &str) -> Option<String> {
        self.durable.get(key).cloned()
    }

    fn store(&mut self, key: &str, value: String) {
        self.durable.insert(key.to_string(), value);
    }

    // Whole-document rewrite through a temp file; the rename makes a
    // flush all-or-nothing.
    fn flush_config(&self) -> io::Result<()> {
        let payload = serde_json::to_vec_pretty(&self.durable).map_err(io::Error::other)?;
        let tmp = self.dir.join(format!("{CONFIG_FILE}.tmp"));
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, self.dir.join(CONFIG_FILE))?;
        Ok(())
    }

    fn append_log(&self, file: &str, record: &impl Serialize) -> io::Result<()> {
        let line = serde_json::to_string(record).map_err(io::Error::other)?;
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        writeln!(log, "{line}")
    }
}
