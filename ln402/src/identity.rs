//! Bearer-token persistence and session identity.
//!
//! The only state this client persists across restarts is the bearer token,
//! stored under the single well-known [`AUTH_TOKEN_KEY`] key. It is read once
//! at startup, written on signup, and removed on logout.

use crate::error::ClientError;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// The well-known key the bearer token is persisted under.
pub const AUTH_TOKEN_KEY: &str = "authToken";

/// Scoped key/value persistence for the bearer token.
///
/// Implementations only ever see the one [`AUTH_TOKEN_KEY`] entry; the trait
/// exists so the flow can be tested without touching a filesystem.
pub trait TokenStore: Send + Sync {
    /// Reads the persisted token, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the backing store is unreadable.
    fn load(&self) -> Result<Option<String>, ClientError>;

    /// Persists the token, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the write fails.
    fn save(&self, token: &str) -> Result<(), ClientError>;

    /// Removes the persisted token. Removing an absent token is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the removal fails.
    fn clear(&self) -> Result<(), ClientError>;
}

/// In-memory token store, for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryTokenStore(Mutex<Option<String>>);

impl MemoryTokenStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>, ClientError> {
        Ok(self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone())
    }

    fn save(&self, token: &str) -> Result<(), ClientError> {
        *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            Some(token.to_owned());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Token store backed by a small JSON file.
///
/// The file holds a flat string map so the format stays forward-compatible
/// if more keys are ever needed; today it only carries [`AUTH_TOKEN_KEY`].
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Creates a store writing to the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, ClientError> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ClientError::protocol(format!("corrupt token store: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(ClientError::Storage(e)),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(map)
            .map_err(|e| ClientError::protocol(format!("token store encode: {e}")))?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>, ClientError> {
        Ok(self.read_map()?.get(AUTH_TOKEN_KEY).cloned())
    }

    fn save(&self, token: &str) -> Result<(), ClientError> {
        let mut map = self.read_map()?;
        map.insert(AUTH_TOKEN_KEY.to_owned(), token.to_owned());
        self.write_map(&map)
    }

    fn clear(&self) -> Result<(), ClientError> {
        let mut map = self.read_map()?;
        if map.remove(AUTH_TOKEN_KEY).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

/// The session identity: a single optional bearer token plus its store.
///
/// Reads the store once at construction and keeps the token cached; the
/// store is only touched again on signup and logout.
#[derive(Debug)]
pub struct Identity<S> {
    store: S,
    token: Option<String>,
}

impl<S: TokenStore> Identity<S> {
    /// Loads the identity from the store.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the store is unreadable.
    pub fn load(store: S) -> Result<Self, ClientError> {
        let token = store.load()?;
        Ok(Self { store, token })
    }

    /// The current bearer token, if signed in.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether a bearer token is present.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Adopts a freshly issued token and persists it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if persisting fails; the in-memory
    /// token is still updated so the session works for its lifetime.
    pub fn sign_in(&mut self, token: String) -> Result<(), ClientError> {
        let persisted = self.store.save(&token);
        self.token = Some(token);
        persisted
    }

    /// Drops the token and removes it from the store.
    pub fn sign_out(&mut self) {
        self.token = None;
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "failed to clear persisted token");
        }
    }
}
