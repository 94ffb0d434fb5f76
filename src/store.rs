use crate::models::{Game, Key, Platform};
use crate::outcome::Outcome;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    SerdeJsonError(serde_json::Error),
    NotFound(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerdeJsonError(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "key store IO error: {}", e),
            StoreError::SerdeJsonError(e) => write!(f, "key store is corrupt: {}", e),
            StoreError::NotFound(code) => write!(f, "no stored record for code {}", code),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::SerdeJsonError(e) => Some(e),
            StoreError::NotFound(_) => None,
        }
    }
}

/// Which platforms to redeem for, per game.
pub type GamePlatformMap = BTreeMap<Game, Vec<Platform>>;

/// Persistent collection of code records.
pub trait KeyStore {
    fn get(&self, code: &str, game: Game, platform: Platform) -> Option<Key>;
    /// Inserts `key` unless a record for the same (code, game, platform) exists.
    fn create(&mut self, key: Key) -> Result<bool, StoreError>;
    /// Writes back the flags of an existing record.
    fn save(&mut self, key: &Key) -> Result<(), StoreError>;
    fn mark_redeemed(&mut self, key: &Key) -> Result<(), StoreError>;
    /// Flags every record with `code` as expired; returns how many changed.
    fn mark_expired_by_code(&mut self, code: &str) -> Result<usize, StoreError>;
    /// Unredeemed, unexpired records for the selected games and platforms.
    fn redeemable(&self, targets: &GamePlatformMap) -> Vec<Key>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    keys: Vec<Key>,
}

/// Key store kept in a single JSON document, rewritten after every change.
pub struct JsonKeyStore {
    path: PathBuf,
    keys: Vec<Key>,
}

impl JsonKeyStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let keys = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str::<StoreFile>(&content)?.keys
            }
        } else {
            Vec::new()
        };
        debug!("Opened key store {} with {} records", path.display(), keys.len());
        Ok(Self { path, keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = StoreFile {
            keys: self.keys.clone(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    fn position(&self, key: &Key) -> Option<usize> {
        self.keys.iter().position(|k| k.same_slot(key))
    }
}

impl KeyStore for JsonKeyStore {
    fn get(&self, code: &str, game: Game, platform: Platform) -> Option<Key> {
        self.keys
            .iter()
            .find(|k| k.code == code && k.game == game && k.platform == platform)
            .cloned()
    }

    fn create(&mut self, key: Key) -> Result<bool, StoreError> {
        if self.position(&key).is_some() {
            return Ok(false);
        }
        self.keys.push(key);
        self.flush()?;
        Ok(true)
    }

    fn save(&mut self, key: &Key) -> Result<(), StoreError> {
        let idx = self
            .position(key)
            .ok_or_else(|| StoreError::NotFound(key.code.clone()))?;
        self.keys[idx] = key.clone();
        self.flush()
    }

    fn mark_redeemed(&mut self, key: &Key) -> Result<(), StoreError> {
        let idx = self
            .position(key)
            .ok_or_else(|| StoreError::NotFound(key.code.clone()))?;
        self.keys[idx].redeemed = true;
        self.flush()
    }

    fn mark_expired_by_code(&mut self, code: &str) -> Result<usize, StoreError> {
        let mut changed = 0;
        for key in self.keys.iter_mut().filter(|k| k.code == code && !k.expired) {
            key.expired = true;
            changed += 1;
        }
        if changed > 0 {
            self.flush()?;
        }
        Ok(changed)
    }

    fn redeemable(&self, targets: &GamePlatformMap) -> Vec<Key> {
        let keys: Vec<Key> = self
            .keys
            .iter()
            .filter(|k| !k.redeemed && !k.expired)
            .filter(|k| {
                targets
                    .get(&k.game)
                    .is_some_and(|platforms| platforms.contains(&k.platform))
            })
            .cloned()
            .collect();
        debug!("Found {} redeemable keys", keys.len());
        keys
    }
}

/// Writes the flags implied by `outcome` back to the store.
///
/// Success and AlreadyRedeemed mark the record redeemed. Expired and Invalid mark it
/// expired together with every other record sharing the code.
pub fn persist_outcome<S: KeyStore + ?Sized>(
    store: &mut S,
    key: &mut Key,
    outcome: &Outcome,
) -> Result<(), StoreError> {
    key.redeemed = outcome.marks_redeemed();
    key.expired = outcome.marks_expired();
    store.save(key)?;
    if key.expired {
        let n = store.mark_expired_by_code(&key.code)?;
        debug!("Marked {} more records with code {} as expired", n, key.code);
    }
    Ok(())
}
