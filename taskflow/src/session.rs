//! Signed-in session: credential, REST client, realtime channel and store.
//!
//! A [`Session`] wires the pieces together:
//!
//! ```text
//! sign_in ──→ CredentialVault ──→ ConnectionManager::open
//!                   │                     │
//!            signed-in flag          EventRouter ──→ Reconciler ──→ Store
//!                   │
//!     cleared (sign-out / 401) ──→ ConnectionManager::close
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use taskflow_proto::user::User;

use crate::api::{ApiClient, ApiError};
use crate::channel::{ConnectionManager, OpenOutcome};
use crate::config::ClientConfig;
use crate::credentials::{
    Credential, CredentialError, CredentialSource, CredentialStore, CredentialVault,
};
use crate::router::EventRouter;
use crate::store::{AppState, Reconciler, Store};

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A REST call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The credential slot could not be read or written.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The backend answered but refused to issue a credential.
    #[error("sign-in refused by the backend")]
    Refused,

    /// The operation needs a credential and none is held.
    #[error("not signed in")]
    NotSignedIn,
}

/// One user's connection to the task backend.
pub struct Session {
    vault: Arc<CredentialVault>,
    reconciler: Reconciler,
    router: Arc<EventRouter>,
    manager: ConnectionManager,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Builds a session whose credential lives in `store`.
    ///
    /// A credential already in `store` is picked up but not used until
    /// [`restore`](Self::restore) is called.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Api`] if the REST client cannot be built.
    pub fn new(
        config: &ClientConfig,
        store: impl CredentialStore + 'static,
    ) -> Result<Self, SessionError> {
        Self::with_vault(config, Arc::new(CredentialVault::new(store)))
    }

    /// Builds a session with a process-scoped credential.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Api`] if the REST client cannot be built.
    pub fn in_memory(config: &ClientConfig) -> Result<Self, SessionError> {
        Self::with_vault(config, Arc::new(CredentialVault::in_memory()))
    }

    /// Builds a session over an existing vault.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Api`] if the REST client cannot be built.
    pub fn with_vault(
        config: &ClientConfig,
        vault: Arc<CredentialVault>,
    ) -> Result<Self, SessionError> {
        let api = ApiClient::new(&config.api_url, config.request_timeout, Arc::clone(&vault))?;
        let router = Arc::new(EventRouter::new());
        let manager = ConnectionManager::new(config.channel.clone(), Arc::clone(&router));
        Ok(Self {
            vault,
            reconciler: Reconciler::new(Store::new(), api),
            router,
            manager,
            watcher: Mutex::new(None),
        })
    }

    /// The credential vault.
    #[must_use]
    pub const fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    /// The reconciler running user actions.
    #[must_use]
    pub const fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// The client state.
    #[must_use]
    pub const fn store(&self) -> &Store {
        self.reconciler.store()
    }

    /// The REST client.
    #[must_use]
    pub const fn api(&self) -> &ApiClient {
        self.reconciler.api()
    }

    /// The realtime channel.
    #[must_use]
    pub const fn channel(&self) -> &ConnectionManager {
        &self.manager
    }

    /// The push event router.
    #[must_use]
    pub const fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Routes pushed notifications and task updates into the store.
    ///
    /// Safe to call repeatedly: each call replaces the previous handlers.
    pub fn install_handlers(&self) {
        let reconciler = self.reconciler.clone();
        self.router.on_notification(move |n| {
            reconciler.apply_notification(n);
        });
        let reconciler = self.reconciler.clone();
        self.router.on_task_update(move |t| {
            reconciler.apply_task_update(t);
        });
    }

    /// Signs in and opens the realtime channel.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Api`] for a failed login and
    /// [`SessionError::Refused`] if the backend declines without an error
    /// status.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let auth = self.api().login(email, password).await?;
        if !auth.success {
            return Err(SessionError::Refused);
        }
        self.start(Credential::new(auth.token), auth.user)
    }

    /// Registers a new account, signs in and opens the realtime channel.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Api`] for a failed registration and
    /// [`SessionError::Refused`] if the backend declines without an error
    /// status.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, SessionError> {
        let auth = self.api().register(username, email, password).await?;
        if !auth.success {
            return Err(SessionError::Refused);
        }
        self.start(Credential::new(auth.token), auth.user)
    }

    /// Resumes a stored session: checks the credential with the backend and
    /// opens the channel.
    ///
    /// Returns `None` when there is no credential or the backend no longer
    /// accepts it (the credential is then cleared).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Api`] if the backend cannot be reached.
    pub async fn restore(&self) -> Result<Option<User>, SessionError> {
        if !self.vault.is_signed_in() {
            return Ok(None);
        }
        match self.api().me().await {
            Ok(user) => {
                if let Err(e) = self.vault.set_user(user.clone()) {
                    tracing::warn!(error = %e, "could not persist user record");
                }
                self.connect()?;
                Ok(Some(user))
            }
            Err(ApiError::Unauthorized(_)) => {
                tracing::info!("stored credential no longer accepted");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Signs out: tells the backend, destroys the credential, closes the
    /// channel and clears the cached state.
    ///
    /// Never fails; a failed logout request is logged.
    pub async fn sign_out(&self) {
        if self.vault.is_signed_in()
            && let Err(e) = self.api().logout().await
        {
            tracing::warn!(error = %e, "logout request failed, clearing credential anyway");
        }
        self.vault.clear();
        self.manager.close();
        self.stop_watcher();
        self.store().update(|s| {
            let changed = *s != AppState::default();
            *s = AppState::default();
            changed
        });
        tracing::info!("signed out");
    }

    /// Opens the channel with the held credential and starts the liveness
    /// check.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotSignedIn`] without a credential.
    pub fn connect(&self) -> Result<OpenOutcome, SessionError> {
        let credential = self.vault.credential().ok_or(SessionError::NotSignedIn)?;
        self.install_handlers();
        let outcome = self.manager.open(credential);
        let source: Arc<dyn CredentialSource> = Arc::clone(&self.vault) as Arc<dyn CredentialSource>;
        self.manager.start_liveness(source);
        self.start_watcher();
        Ok(outcome)
    }

    fn start(&self, credential: Credential, user: User) -> Result<User, SessionError> {
        tracing::info!(user_id = %user.id, username = %user.username, "signed in");
        if let Err(e) = self.vault.hold(credential, Some(user.clone())) {
            tracing::warn!(error = %e, "could not persist credential, keeping it in memory");
        }
        self.connect()?;
        Ok(user)
    }

    /// Closes the channel as soon as the credential disappears, whoever
    /// cleared it.
    fn start_watcher(&self) {
        let mut slot = self.watcher.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let mut signed_in = self.vault.subscribe();
        let manager = self.manager.clone();
        *slot = Some(tokio::spawn(async move {
            loop {
                if !*signed_in.borrow_and_update() {
                    tracing::info!("credential cleared, closing channel");
                    manager.close();
                    break;
                }
                if signed_in.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_watcher(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_watcher();
        self.manager.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("signed_in", &self.vault.is_signed_in())
            .field("channel", &self.manager)
            .finish_non_exhaustive()
    }
}
