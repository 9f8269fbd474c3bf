//! Key files - one JSON file per key in LOCK_HOME

use std::fs;
use std::path::{Path, PathBuf};

use lock_proto::{KeyCredentials, KeyData};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("no home directory, set LOCK_HOME")]
    NoHome,
    #[error("{0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("{0}: {1}")]
    Json(PathBuf, #[source] serde_json::Error),
    #[error("{0}: bad secret: {1}")]
    Hex(PathBuf, #[source] data_encoding::DecodeError),
    #[error("{0}: {1}")]
    Secret(PathBuf, #[source] lock_proto::Error),
}

/// LOCK_HOME, or ~/.lock, created if needed
pub fn lock_home() -> Result<PathBuf, KeyFileError> {
    let home = match std::env::var("LOCK_HOME") {
        Ok(home) => PathBuf::from(home),
        Err(_) => dirs::home_dir().ok_or(KeyFileError::NoHome)?.join(".lock"),
    };

    if !home.exists() {
        fs::create_dir_all(&home).map_err(|e| KeyFileError::Io(home.clone(), e))?;
    }
    Ok(home)
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    lock: Uuid,
    key: Uuid,
    /// Lowercase hex
    secret: String,
}

/// Credentials for one lock, as stored on disk
#[derive(Debug, Clone)]
pub struct StoredKey {
    pub lock: Uuid,
    pub credentials: KeyCredentials,
}

impl StoredKey {
    pub fn new(lock: Uuid, credentials: KeyCredentials) -> Self {
        Self { lock, credentials }
    }

    pub fn load(path: &Path) -> Result<Self, KeyFileError> {
        let data = fs::read_to_string(path).map_err(|e| KeyFileError::Io(path.into(), e))?;
        let file: KeyFile =
            serde_json::from_str(&data).map_err(|e| KeyFileError::Json(path.into(), e))?;
        let secret = data_encoding::HEXLOWER
            .decode(file.secret.trim().as_bytes())
            .map_err(|e| KeyFileError::Hex(path.into(), e))?;
        let secret =
            KeyData::from_slice(&secret).map_err(|e| KeyFileError::Secret(path.into(), e))?;

        Ok(Self {
            lock: file.lock,
            credentials: KeyCredentials::new(file.key, secret),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), KeyFileError> {
        let file = KeyFile {
            lock: self.lock,
            key: self.credentials.id,
            secret: data_encoding::HEXLOWER.encode(self.credentials.secret.as_bytes()),
        };
        let data =
            serde_json::to_string_pretty(&file).map_err(|e| KeyFileError::Json(path.into(), e))?;
        fs::write(path, data).map_err(|e| KeyFileError::Io(path.into(), e))
    }

    /// Save as `<key id>.json` in LOCK_HOME
    pub fn save_in_home(&self) -> Result<PathBuf, KeyFileError> {
        let path = lock_home()?.join(format!("{}.json", self.credentials.id));
        self.save(&path)?;
        Ok(path)
    }
}
