//! JSON-file persistence for connections and saved queries

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{AionError, Result};

/// An entity that can be saved, addressed by a stable key
pub trait StoredEntity: Serialize + DeserializeOwned + Clone + Send + Sync {
    fn store_key(&self) -> String;

    /// Copy written to disk; runtime-only state is stripped here
    fn for_storage(&self) -> Self {
        self.clone()
    }
}

/// Persistence collaborator
pub trait EntityStore<T>: Send + Sync {
    fn load_saved(&self) -> Result<Vec<T>>;

    /// Insert or replace the entry with the same key
    fn save(&self, entity: &T) -> Result<()>;

    fn delete(&self, entity: &T) -> Result<()>;
}

/// Stores entities as a JSON array in a single file
pub struct JsonFileStore<T> {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: StoredEntity> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()), _entity: PhantomData }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| AionError::config_error(format!("Could not read {}: {e}", self.path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| AionError::config_error(format!("Invalid store file {}: {e}", self.path.display())))
    }

    fn write(&self, entities: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AionError::config_error(format!("Could not create data directory: {e}")))?;
        }
        let contents = serde_json::to_string_pretty(entities)
            .map_err(|e| AionError::config_error(format!("Could not serialize store: {e}")))?;
        fs::write(&self.path, contents)
            .map_err(|e| AionError::config_error(format!("Could not write {}: {e}", self.path.display())))
    }
}

impl<T: StoredEntity> EntityStore<T> for JsonFileStore<T> {
    fn load_saved(&self) -> Result<Vec<T>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read()
    }

    fn save(&self, entity: &T) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = entity.store_key();
        let mut entities = self.read()?;
        let stored = entity.for_storage();
        match entities.iter().position(|e| e.store_key() == key) {
            Some(index) => entities[index] = stored,
            None => entities.push(stored),
        }
        self.write(&entities)
    }

    fn delete(&self, entity: &T) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = entity.store_key();
        let mut entities = self.read()?;
        let before = entities.len();
        entities.retain(|e| e.store_key() != key);
        if entities.len() == before {
            return Ok(());
        }
        self.write(&entities)
    }
}
