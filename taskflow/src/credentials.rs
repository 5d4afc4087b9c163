//! Session credential holding and persistence.
//!
//! [`CredentialVault`] keeps the bearer token and cached user record in
//! memory and mirrors them into a [`CredentialStore`]. Two stores exist:
//! [`MemoryCredentialStore`], scoped to the process (the default), and
//! [`FileCredentialStore`], a JSON file used by the command-line front end.
//!
//! The vault publishes a signed-in flag over a `watch` channel so the
//! session can tear the realtime channel down the moment the credential
//! disappears, whether by sign-out or by an HTTP 401.

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use zeroize::Zeroize;

use taskflow_proto::user::User;

/// Errors from the credential persistence slot.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Reading or writing the backing file failed.
    #[error("credential file {path}: {source}")]
    Io {
        /// File that was accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The backing file does not contain a valid session.
    #[error("credential file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Opaque bearer token.
///
/// The token text is wiped from memory when the value is dropped and is
/// never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps a token issued by the auth endpoints.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for use in a request header or frame.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// What the persistence slot holds for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Bearer token.
    pub token: Credential,
    /// Cached account record.
    #[serde(default)]
    pub user: Option<User>,
}

/// Client-local key-value slot for the session credential.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the slot exists but cannot be read.
    fn load(&self) -> Result<Option<StoredSession>, CredentialError>;

    /// Replaces the stored session.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the slot cannot be written.
    fn save(&self, session: &StoredSession) -> Result<(), CredentialError>;

    /// Removes the stored session. Clearing an empty slot is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the slot exists but cannot be removed.
    fn clear(&self) -> Result<(), CredentialError>;
}

/// Anything that can answer "which credential is current?".
///
/// The channel's liveness check polls this; it stops once it returns `None`.
pub trait CredentialSource: Send + Sync {
    /// Returns the current credential, if any.
    fn credential(&self) -> Option<Credential>;
}

/// Process-scoped store; nothing survives the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<StoredSession>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<StoredSession>, CredentialError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, session: &StoredSession) -> Result<(), CredentialError> {
        *self.slot.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        self.slot.lock().take();
        Ok(())
    }
}

/// JSON file store. The file is created owner-readable only on Unix.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Uses `path` as the backing file; parent directories are created on
    /// first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CredentialError {
        CredentialError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<StoredSession>, CredentialError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, session: &StoredSession) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let contents = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, contents).map_err(|e| self.io_error(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// In-memory credential slot mirrored into a [`CredentialStore`].
pub struct CredentialVault {
    store: Box<dyn CredentialStore>,
    current: RwLock<Option<StoredSession>>,
    signed_in: watch::Sender<bool>,
}

impl CredentialVault {
    /// Creates a vault over `store`, picking up any session it already holds.
    ///
    /// A store that fails to load is treated as empty.
    pub fn new(store: impl CredentialStore + 'static) -> Self {
        let initial = store.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not load stored session, starting signed out");
            None
        });
        let (signed_in, _) = watch::channel(initial.is_some());
        Self {
            store: Box::new(store),
            current: RwLock::new(initial),
            signed_in,
        }
    }

    /// Creates a vault backed by a [`MemoryCredentialStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryCredentialStore::new())
    }

    /// Returns the current credential, if signed in.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.current.read().as_ref().map(|s| s.token.clone())
    }

    /// Returns the cached user record, if any.
    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.current.read().as_ref().and_then(|s| s.user.clone())
    }

    /// Returns `true` while a credential is held.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.current.read().is_some()
    }

    /// Holds a new credential and mirrors it to the store.
    ///
    /// The in-memory slot is updated even when persisting fails.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the store could not be written.
    pub fn hold(&self, token: Credential, user: Option<User>) -> Result<(), CredentialError> {
        let session = StoredSession { token, user };
        let persisted = self.store.save(&session);
        *self.current.write() = Some(session);
        self.signed_in.send_replace(true);
        persisted
    }

    /// Replaces the cached user record, keeping the credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the store could not be written.
    pub fn set_user(&self, user: User) -> Result<(), CredentialError> {
        let snapshot = {
            let mut current = self.current.write();
            let Some(session) = current.as_mut() else {
                return Ok(());
            };
            session.user = Some(user);
            session.clone()
        };
        self.store.save(&snapshot)
    }

    /// Destroys the credential in memory and in the store.
    ///
    /// Returns `true` if a credential was held.
    pub fn clear(&self) -> bool {
        let had = self.current.write().take().is_some();
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "failed to clear stored session");
        }
        if had {
            self.signed_in.send_replace(false);
        }
        had
    }

    /// Subscribes to signed-in / signed-out transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signed_in.subscribe()
    }
}

impl CredentialSource for CredentialVault {
    fn credential(&self) -> Option<Credential> {
        Self::credential(self)
    }
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("signed_in", &self.is_signed_in())
            .finish_non_exhaustive()
    }
}
