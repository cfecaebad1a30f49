//! Storage for the single encryption passphrase.
//!
//! The registry never persists the passphrase itself; it asks a
//! [`SecretStore`] whenever an encrypted database is opened or rotated.
//! Platform keychains plug in behind the trait.

use std::sync::RwLock;

use crate::error::{Error, Result};

/// Holder of the encryption passphrase.
pub trait SecretStore: Send + Sync {
    /// Current passphrase, if one is stored.
    ///
    /// # Errors
    ///
    /// Returns `Secret` if the backing store cannot be read.
    fn passphrase(&self) -> Result<Option<String>>;

    /// Store `passphrase`, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns `Secret` if the backing store cannot be written.
    fn set(&self, passphrase: &str) -> Result<()>;

    /// Whether a non-empty passphrase is stored.
    ///
    /// # Errors
    ///
    /// Returns `Secret` if the backing store cannot be read.
    fn has(&self) -> Result<bool> {
        Ok(self.passphrase()?.is_some_and(|p| !p.is_empty()))
    }

    /// Replace `old` with `new` after checking `old` matches.
    ///
    /// # Errors
    ///
    /// Returns `Secret` if `old` does not match the stored passphrase.
    fn change(&self, old: &str, new: &str) -> Result<()> {
        match self.passphrase()? {
            Some(current) if current == old => self.set(new),
            _ => Err(Error::Secret("the given old passphrase is wrong".to_string())),
        }
    }
}

/// Process-local secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    passphrase: RwLock<Option<String>>,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: RwLock::new(Some(passphrase.into())),
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn passphrase(&self) -> Result<Option<String>> {
        self.passphrase
            .read()
            .map(|p| p.clone())
            .map_err(|_| Error::Secret("secret store lock poisoned".to_string()))
    }

    fn set(&self, passphrase: &str) -> Result<()> {
        let mut guard = self
            .passphrase
            .write()
            .map_err(|_| Error::Secret("secret store lock poisoned".to_string()))?;
        *guard = Some(passphrase.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store() {
        let store = MemorySecretStore::new();
        assert!(!store.has().unwrap());
        assert_eq!(store.passphrase().unwrap(), None);
    }

    #[test]
    fn test_change_requires_matching_old() {
        let store = MemorySecretStore::with_passphrase("first");
        assert!(matches!(store.change("nope", "second"), Err(Error::Secret(_))));
        store.change("first", "second").unwrap();
        assert_eq!(store.passphrase().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_empty_passphrase_counts_as_absent() {
        let store = MemorySecretStore::with_passphrase("");
        assert!(!store.has().unwrap());
    }
}
