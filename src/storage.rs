use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// Durable key/value store for session artifacts.
///
/// Backed by the OS keyring so an account reference survives restarts, the
/// same way browser local storage survives a page reload. The in-memory
/// backend is for tests and for hosts that keep their own storage.
#[derive(Clone)]
pub struct DurableStore {
    service_name: String,
    backend: StoreBackend,
}

#[derive(Clone)]
enum StoreBackend {
    Keyring,
    Memory(Arc<Mutex<HashMap<String, SecretString>>>),
}

impl DurableStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            backend: StoreBackend::Keyring,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            service_name: "in-memory".to_string(),
            backend: StoreBackend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    pub fn read(&self, key: &str) -> AppResult<Option<SecretString>> {
        match &self.backend {
            StoreBackend::Keyring => {
                let entry = keyring::Entry::new(&self.service_name, key)?;
                match entry.get_password() {
                    Ok(value) => Ok(Some(SecretString::new(value.into()))),
                    Err(keyring::Error::NoEntry) => Ok(None),
                    Err(err) => Err(AppError::from(err)),
                }
            }
            StoreBackend::Memory(store) => Ok(store.lock().get(key).cloned()),
        }
    }

    /// Reads a plain (non-secret) value such as the account reference.
    pub fn read_string(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self
            .read(key)?
            .map(|value| value.expose_secret().to_string())
            .filter(|value| !value.is_empty()))
    }

    pub fn write(&self, key: &str, value: &SecretString) -> AppResult<()> {
        match &self.backend {
            StoreBackend::Keyring => {
                let entry = keyring::Entry::new(&self.service_name, key)?;
                entry.set_password(value.expose_secret())?;
            }
            StoreBackend::Memory(store) => {
                store.lock().insert(key.to_string(), value.clone());
            }
        }
        debug!(
            target: "storage",
            service = %self.service_name,
            key,
            "stored value"
        );
        Ok(())
    }

    pub fn write_string(&self, key: &str, value: &str) -> AppResult<()> {
        self.write(key, &SecretString::new(value.into()))
    }

    pub fn delete(&self, key: &str) -> AppResult<()> {
        match &self.backend {
            StoreBackend::Keyring => {
                let entry = keyring::Entry::new(&self.service_name, key)?;
                match entry.delete_password() {
                    Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                    Err(err) => Err(AppError::from(err)),
                }
            }
            StoreBackend::Memory(store) => {
                store.lock().remove(key);
                Ok(())
            }
        }
    }

    pub fn has(&self, key: &str) -> AppResult<bool> {
        self.read_string(key).map(|value| value.is_some())
    }
}
