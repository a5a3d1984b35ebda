//! Bearer credential storage.
//!
//! Both the API client and the stream client read the credential through
//! [`CredentialStore`] so callers decide where it lives.

use std::sync::RwLock;

use secrecy::{ExposeSecret, SecretString};

/// Storage for the bearer credential attached to every request.
pub trait CredentialStore: Send + Sync {
    /// Returns the current credential, if any.
    fn get(&self) -> Option<SecretString>;

    /// Replaces the stored credential.
    fn set(&self, credential: SecretString);

    /// Removes the stored credential.
    fn remove(&self);

    /// Returns whether a non-empty credential is stored.
    fn has(&self) -> bool {
        self.get()
            .is_some_and(|credential| !credential.expose_secret().is_empty())
    }
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: RwLock<Option<SecretString>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: SecretString) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<SecretString> {
        self.credential
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .filter(|credential| !credential.expose_secret().is_empty())
    }

    fn set(&self, credential: SecretString) {
        if let Ok(mut guard) = self.credential.write() {
            *guard = Some(credential);
        }
    }

    fn remove(&self) {
        if let Ok(mut guard) = self.credential.write() {
            *guard = None;
        }
    }
}
