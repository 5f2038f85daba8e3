//! Per-wallet entitlement state: receipts, re-download sessions, owned and
//! created assets.
//!
//! Everything is keyed by the canonical wallet address first, so state for one
//! wallet can never be read back under another. Receipts and ownership survive
//! restarts through an optional JSON file; sessions are short-lived and stay in
//! memory only.

use crate::error::Result;
use crate::wallet::address_key;
use alloy_primitives::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsString;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A short-lived session obtained by signing a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedownloadSession {
    /// Opaque token sent as `X-REDOWNLOAD-SESSION`.
    pub token: String,
    /// Expiry, milliseconds since the epoch.
    pub expires_at_ms: i64,
}

impl RedownloadSession {
    /// Whether the session can still be used at `now_ms`.
    #[must_use]
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }
}

/// The durable part of the store.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entitlements {
    /// wallet -> asset -> receipt token.
    #[serde(default)]
    receipts: BTreeMap<String, BTreeMap<String, String>>,
    /// wallet -> assets bought.
    #[serde(default)]
    owned: BTreeMap<String, BTreeSet<String>>,
    /// wallet -> assets the wallet created.
    #[serde(default)]
    created: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default)]
struct StoreState {
    entitlements: Entitlements,
    sessions: HashMap<String, RedownloadSession>,
}

/// Shared entitlement store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct EntitlementStore {
    state: Arc<RwLock<StoreState>>,
    persist_path: Option<PathBuf>,
}

impl EntitlementStore {
    /// An empty, memory-only store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store backed by `path`: existing contents are loaded, and every durable
    /// change is written back.
    ///
    /// A file that cannot be read or parsed is never overwritten. It is moved aside
    /// to `<name>.corrupt-<millis>` and the store starts empty; if it cannot be
    /// moved, the store runs memory-only.
    #[must_use]
    pub fn with_persistence(path: &Path) -> Self {
        let (entitlements, persist_path) = match Self::read_file(path) {
            Ok(Some(loaded)) => {
                info!(
                    "Loaded entitlements for {} wallet(s) from {}",
                    loaded.receipts.len().max(loaded.owned.len()),
                    path.display()
                );
                (loaded, Some(path.to_path_buf()))
            }
            Ok(None) => (Entitlements::default(), Some(path.to_path_buf())),
            Err(e) => match Self::set_aside(path) {
                Ok(moved) => {
                    warn!(
                        "Unreadable entitlement store {} ({}), moved to {}",
                        path.display(),
                        e,
                        moved.display()
                    );
                    (Entitlements::default(), Some(path.to_path_buf()))
                }
                Err(move_err) => {
                    warn!(
                        "Unreadable entitlement store {} ({}) could not be moved aside ({}); persistence disabled",
                        path.display(),
                        e,
                        move_err
                    );
                    (Entitlements::default(), None)
                }
            },
        };
        Self {
            state: Arc::new(RwLock::new(StoreState {
                entitlements,
                sessions: HashMap::new(),
            })),
            persist_path,
        }
    }

    /// Load a store from `path` without attaching persistence.
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let entitlements = Self::read_file(path)?.unwrap_or_default();
        Ok(Self {
            state: Arc::new(RwLock::new(StoreState {
                entitlements,
                sessions: HashMap::new(),
            })),
            persist_path: None,
        })
    }

    /// Write receipts and ownership to `path`. Sessions are not written.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file written.
    /// The previous file stays intact until the new contents are complete.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = {
            let state = self.state.read();
            serde_json::to_vec_pretty(&state.entitlements)?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // Atomic write: temp file + rename
        let temp_path = sibling(path, ".tmp");
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn set_aside(path: &Path) -> Result<PathBuf> {
        let target = sibling(
            path,
            &format!(".corrupt-{}", chrono::Utc::now().timestamp_millis()),
        );
        std::fs::rename(path, &target)?;
        Ok(target)
    }

    fn read_file(path: &Path) -> Result<Option<Entitlements>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self) {
        if let Some(path) = &self.persist_path {
            if let Err(e) = self.save(path) {
                warn!("Failed to persist entitlements: {}", e);
            }
        }
    }

    /// Stored receipt for `(wallet, asset_id)`.
    #[must_use]
    pub fn receipt(&self, wallet: &Address, asset_id: &str) -> Option<String> {
        self.state
            .read()
            .entitlements
            .receipts
            .get(&address_key(wallet))
            .and_then(|assets| assets.get(asset_id))
            .cloned()
    }

    /// Store or replace the receipt for `(wallet, asset_id)`.
    pub fn store_receipt(&self, wallet: &Address, asset_id: &str, receipt: &str) {
        let changed = {
            let mut state = self.state.write();
            let assets = state
                .entitlements
                .receipts
                .entry(address_key(wallet))
                .or_default();
            assets.insert(asset_id.to_string(), receipt.to_string()).as_deref() != Some(receipt)
        };
        if changed {
            debug!("Stored receipt for {} / {}", address_key(wallet), asset_id);
            self.persist();
        }
    }

    /// Assets `wallet` holds a receipt for.
    #[must_use]
    pub fn receipt_assets(&self, wallet: &Address) -> Vec<String> {
        self.state
            .read()
            .entitlements
            .receipts
            .get(&address_key(wallet))
            .map(|assets| assets.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The cached session for `wallet`, if it is still valid at `now_ms`.
    /// An expired session is discarded.
    #[must_use]
    pub fn session(&self, wallet: &Address, now_ms: i64) -> Option<RedownloadSession> {
        let key = address_key(wallet);
        {
            let state = self.state.read();
            match state.sessions.get(&key) {
                None => return None,
                Some(session) if session.is_valid_at(now_ms) => return Some(session.clone()),
                Some(_) => {}
            }
        }
        debug!("Session for {} expired", key);
        let mut state = self.state.write();
        // Re-check under the write lock; a fresh session may have landed meanwhile.
        if state
            .sessions
            .get(&key)
            .is_some_and(|s| !s.is_valid_at(now_ms))
        {
            state.sessions.remove(&key);
        }
        state
            .sessions
            .get(&key)
            .filter(|s| s.is_valid_at(now_ms))
            .cloned()
    }

    /// Cache `session` for `wallet`, superseding any previous one.
    pub fn store_session(&self, wallet: &Address, session: RedownloadSession) {
        self.state.write().sessions.insert(address_key(wallet), session);
    }

    /// Drop the cached session for `wallet`.
    pub fn clear_session(&self, wallet: &Address) {
        self.state.write().sessions.remove(&address_key(wallet));
    }

    /// Record that `wallet` bought `asset_id`.
    pub fn mark_owned(&self, wallet: &Address, asset_id: &str) {
        let inserted = self
            .state
            .write()
            .entitlements
            .owned
            .entry(address_key(wallet))
            .or_default()
            .insert(asset_id.to_string());
        if inserted {
            self.persist();
        }
    }

    /// Whether `wallet` bought `asset_id`.
    #[must_use]
    pub fn is_owned(&self, wallet: &Address, asset_id: &str) -> bool {
        self.state
            .read()
            .entitlements
            .owned
            .get(&address_key(wallet))
            .is_some_and(|assets| assets.contains(asset_id))
    }

    /// Assets `wallet` bought, sorted.
    #[must_use]
    pub fn owned_assets(&self, wallet: &Address) -> Vec<String> {
        self.state
            .read()
            .entitlements
            .owned
            .get(&address_key(wallet))
            .map(|assets| assets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record that `wallet` created `asset_id`.
    pub fn mark_created(&self, wallet: &Address, asset_id: &str) {
        let inserted = self
            .state
            .write()
            .entitlements
            .created
            .entry(address_key(wallet))
            .or_default()
            .insert(asset_id.to_string());
        if inserted {
            self.persist();
        }
    }

    /// Whether `wallet` created `asset_id`.
    #[must_use]
    pub fn is_creator(&self, wallet: &Address, asset_id: &str) -> bool {
        self.state
            .read()
            .entitlements
            .created
            .get(&address_key(wallet))
            .is_some_and(|assets| assets.contains(asset_id))
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
