//! Connections and the shared connection arena
//!
//! [`ConnectionSet`] is the single owner of every live [`Connection`]. The
//! orchestrator and the health monitor hold the same `Arc<ConnectionSet>`
//! and only ever work on snapshots or closures applied under its lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::config::StoredEntity;
use crate::engine::{ColumnInfo, DatabaseType};
use crate::health::HealthStatus;

mod manager;

pub use manager::ConnectionManager;

/// Lifecycle of a connection: `Unknown -> Connecting -> {Active, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Connecting,
    Active,
    Failed,
}

/// A database on a connection, with lazily loaded catalog data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseEntry {
    pub name: String,
    pub tables: Vec<String>,
    pub tables_loaded: bool,
    /// table name -> columns in ordinal order
    pub columns: HashMap<String, Vec<ColumnInfo>>,
}

impl DatabaseEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub name: String,
    pub database_type: DatabaseType,
    pub connection_string: String,

    /// Only connections with this flag are written to the store
    #[serde(default)]
    pub save_credentials: bool,

    #[serde(skip)]
    pub state: ConnectionState,

    #[serde(skip)]
    pub health: HealthStatus,

    #[serde(skip)]
    pub last_activity: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub last_health_check: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub databases: Vec<DatabaseEntry>,
}

impl Connection {
    pub fn new(
        name: impl Into<String>,
        database_type: DatabaseType,
        connection_string: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            database_type,
            connection_string: connection_string.into(),
            save_credentials: false,
            state: ConnectionState::Unknown,
            health: HealthStatus::Unknown,
            last_activity: None,
            last_health_check: None,
            databases: Vec::new(),
        }
    }

    #[must_use]
    pub fn saved(mut self) -> Self {
        self.save_credentials = true;
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    #[must_use]
    pub fn database(&self, name: &str) -> Option<&DatabaseEntry> {
        self.databases.iter().find(|d| d.name == name)
    }

    /// Entry for `name`, created on first access
    pub fn database_mut(&mut self, name: &str) -> &mut DatabaseEntry {
        let index = match self.databases.iter().position(|d| d.name == name) {
            Some(index) => index,
            None => {
                self.databases.push(DatabaseEntry::new(name));
                self.databases.len() - 1
            }
        };
        &mut self.databases[index]
    }

    /// Replace the database list, keeping catalog data for names still present
    pub fn set_databases(&mut self, names: Vec<String>) {
        let mut previous: HashMap<String, DatabaseEntry> =
            self.databases.drain(..).map(|d| (d.name.clone(), d)).collect();
        self.databases = names
            .into_iter()
            .map(|name| previous.remove(&name).unwrap_or_else(|| DatabaseEntry::new(name)))
            .collect();
    }
}

impl StoredEntity for Connection {
    fn store_key(&self) -> String {
        self.id.to_string()
    }
}

/// Arena of connections keyed by id
#[derive(Debug, Default)]
pub struct ConnectionSet {
    connections: RwLock<HashMap<Uuid, Connection>>,
}

impl ConnectionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Connection>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Connection>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, connection: Connection) -> Option<Connection> {
        self.write().insert(connection.id, connection)
    }

    pub fn remove(&self, id: Uuid) -> Option<Connection> {
        self.write().remove(&id)
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Connection> {
        self.read().get(&id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.read().contains_key(&id)
    }

    /// Snapshot of every connection, ordered by name
    #[must_use]
    pub fn list(&self) -> Vec<Connection> {
        let mut connections: Vec<Connection> = self.read().values().cloned().collect();
        connections.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        connections
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Apply `f` to one connection under the write lock
    pub fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        self.write().get_mut(&id).map(f)
    }

    /// Stamp the last-activity time; `false` for unknown ids
    pub fn record_activity(&self, id: Uuid) -> bool {
        self.update(id, |c| c.last_activity = Some(Utc::now())).is_some()
    }

    /// Mark a connection `Checking` unless a probe is already in flight
    ///
    /// Returns a snapshot and the status it had before.
    pub fn begin_health_check(&self, id: Uuid) -> Option<(Connection, HealthStatus)> {
        let mut connections = self.write();
        let connection = connections.get_mut(&id)?;
        if connection.health == HealthStatus::Checking {
            return None;
        }
        let previous = connection.health;
        connection.health = HealthStatus::Checking;
        Some((connection.clone(), previous))
    }
}
