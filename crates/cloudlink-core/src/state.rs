//! State management for reconciled resources
//!
//! Manages the `.cloudlink/state.json` file which holds, per resource
//! address, the persisted identity plus the last applied spec and observed
//! fields.

use crate::error::{ReconcileError, Result};
use crate::retry::deadline_after;
use crate::source::SpecSource;
use crate::spec::{Observed, Reconciled, ResourceSpec};
use crate::tags::TagSet;
use crate::value::FieldMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, warn};

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".cloudlink";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_STAGED: &str = "state.json.tmp";
const LOCK_FILE: &str = "lock.json";
const LOCK_STALE_HOURS: i64 = 1;
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);

/// All persisted resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by address
    pub resources: BTreeMap<String, ResourceRecord>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a record
    pub fn set_record(&mut self, address: String, record: ResourceRecord) {
        self.resources.insert(address, record);
        self.updated_at = Utc::now();
    }

    /// Remove a record
    pub fn remove_record(&mut self, address: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(address);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    pub fn get_record(&self, address: &str) -> Option<&ResourceRecord> {
        self.resources.get(address)
    }
}

/// Persisted state of a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource kind name
    pub kind: String,

    /// Encoded composite identity
    pub identity: String,

    /// Last applied desired spec
    pub spec: ResourceSpec,

    /// Fields last reported by the remote side
    #[serde(default)]
    pub computed: FieldMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagSet>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Created remotely but never converged; replaced on the next pass
    #[serde(default)]
    pub tainted: bool,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn from_reconciled(reconciled: &Reconciled) -> Self {
        let now = Utc::now();
        Self {
            kind: reconciled.spec.kind.clone(),
            identity: reconciled.identity.encode(),
            spec: reconciled.spec.clone(),
            computed: reconciled.computed.clone(),
            tags: reconciled.tags.clone(),
            status: reconciled.status.clone(),
            tainted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record for a resource that exists remotely but failed to converge
    pub fn tainted(identity: impl Into<String>, spec: &ResourceSpec) -> Self {
        let now = Utc::now();
        Self {
            kind: spec.kind.clone(),
            identity: identity.into(),
            spec: spec.clone(),
            computed: FieldMap::new(),
            tags: None,
            status: None,
            tainted: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Keep the original creation time
    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Take in a fresh remote view
    pub fn refresh(&mut self, observed: Observed) {
        self.computed = observed.fields;
        self.tags = observed.tags;
        self.updated_at = Utc::now();
    }
}

/// Reads and writes `.cloudlink/state.json` under a project root
///
/// Writers serialize through `lock.json`, created exclusively; a lock older
/// than an hour is considered abandoned and taken over.
pub struct StateManager {
    dir: PathBuf,
    lock_wait: Duration,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            dir: project_root.as_ref().join(STATE_DIR),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// How long [`StateManager::lock`] waits for another holder
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.dir
    }

    pub async fn load(&self) -> Result<GlobalState> {
        let content = match fs::read_to_string(self.dir.join(STATE_FILE)).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %self.dir.display(), "No state file yet");
                return Ok(GlobalState::new());
            }
            Err(e) => return Err(e.into()),
        };

        let state: GlobalState = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(ReconcileError::State(format!(
                "state file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        debug!(resources = state.resources.len(), "Loaded state");
        Ok(state)
    }

    /// Stage the new state next to the old one and rename it into place,
    /// copying the previous file to `state.json.backup` first
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(STATE_FILE);
        let staged = self.dir.join(STATE_STAGED);

        fs::write(&staged, serde_json::to_vec_pretty(state)?).await?;
        match fs::copy(&path, self.dir.join(STATE_BACKUP)).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::rename(&staged, &path).await?;

        debug!(resources = state.resources.len(), "Saved state");
        Ok(())
    }

    /// Take the lock without waiting
    pub async fn try_lock(&self) -> Result<StateLock> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(LOCK_FILE);
        let holder = serde_json::to_vec_pretty(&LockHolder::current())?;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    // guard first, so a failed write does not leave the lock behind
                    let lock = StateLock { path, held: true };
                    file.write_all(&holder).await?;
                    file.flush().await?;
                    debug!("Acquired state lock");
                    return Ok(lock);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let existing = match fs::read_to_string(&path).await {
                Ok(content) => serde_json::from_str::<LockHolder>(&content).ok(),
                // released in between
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            match existing {
                Some(existing) if existing.is_stale() => {
                    warn!(holder = %existing, "Taking over stale state lock");
                    remove_if_present(&path).await?;
                }
                Some(existing) => {
                    return Err(ReconcileError::Lock(format!("state is locked by {}", existing)));
                }
                None => {
                    return Err(ReconcileError::Lock(
                        "state lock is being acquired by another writer".to_string(),
                    ));
                }
            }
        }
    }

    /// Take the lock, retrying while another writer holds it
    pub async fn lock(&self) -> Result<StateLock> {
        let deadline = deadline_after(Instant::now(), self.lock_wait);
        loop {
            match self.try_lock().await {
                Err(ReconcileError::Lock(reason)) if Instant::now() < deadline => {
                    debug!(reason = %reason, "Waiting for state lock");
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                other => return other,
            }
        }
    }

    /// Load, change and save under the lock; `change` reports whether it
    /// modified anything worth saving
    pub async fn modify<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut GlobalState) -> bool,
    {
        let lock = self.lock().await?;
        let mut state = self.load().await?;
        let changed = change(&mut state);
        if changed {
            self.save(&state).await?;
        }
        lock.release().await?;
        Ok(changed)
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Contents of `lock.json`
#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    host: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            host: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    fn is_stale(&self) -> bool {
        Utc::now().signed_duration_since(self.acquired_at) > chrono::Duration::hours(LOCK_STALE_HOURS)
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {}) since {}", self.host, self.pid, self.acquired_at)
    }
}

/// Held state lock; dropping it removes `lock.json`
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    held: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        self.held = false;
        remove_if_present(&self.path).await?;
        debug!("Released state lock");
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if self.held {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// [`SpecSource`] backed by the state file, for one resource address
pub struct StateSource {
    manager: Arc<StateManager>,
    address: String,
    desired: Option<ResourceSpec>,
}

impl StateSource {
    pub fn new(
        manager: Arc<StateManager>,
        address: impl Into<String>,
        desired: Option<ResourceSpec>,
    ) -> Self {
        Self {
            manager,
            address: address.into(),
            desired,
        }
    }
}

#[async_trait]
impl SpecSource for StateSource {
    fn address(&self) -> &str {
        &self.address
    }

    async fn desired(&self) -> Result<Option<ResourceSpec>> {
        Ok(self.desired.clone())
    }

    async fn stored(&self) -> Result<Option<ResourceRecord>> {
        let state = self.manager.load().await?;
        Ok(state.get_record(&self.address).cloned())
    }

    async fn record(&mut self, record: ResourceRecord) -> Result<()> {
        let address = self.address.clone();
        self.manager
            .modify(move |state| {
                state.set_record(address, record);
                true
            })
            .await?;
        Ok(())
    }

    async fn forget(&mut self) -> Result<()> {
        let address = &self.address;
        self.manager
            .modify(|state| state.remove_record(address).is_some())
            .await?;
        Ok(())
    }
}
