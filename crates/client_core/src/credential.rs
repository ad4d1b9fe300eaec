use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::error::CredentialError;

/// Process-wide storage for the single bearer credential.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, CredentialError>;
    fn save(&self, credential: &str) -> Result<(), CredentialError>;
    fn clear(&self) -> Result<(), CredentialError>;
}

pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<String>, CredentialError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let credential = raw.trim();
                Ok((!credential.is_empty()).then(|| credential.to_string()))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, credential: &str) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, credential)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn with_credential(credential: impl Into<String>) -> Self {
        Self {
            credential: Mutex::new(Some(credential.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.credential
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.slot().clone())
    }

    fn save(&self, credential: &str) -> Result<(), CredentialError> {
        *self.slot() = Some(credential.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        self.slot().take();
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/credential_tests.rs"]
mod tests;
