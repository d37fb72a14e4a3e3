//! Publish/subscribe boundary
//!
//! The core publishes state changes here and never waits on listeners.
//! Delivery is asynchronous; a slow subscriber that falls behind the
//! channel capacity observes a lag instead of blocking publishers.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::connection::ConnectionState;
use crate::engine::TransactionInfo;
use crate::health::{HealthMonitor, HealthStatus};
use crate::query::Query;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A query finished (success, backend error or cancellation)
    QueryExecuted(Box<Query>),

    ConnectionStateChanged {
        connection_id: Uuid,
        state: ConnectionState,
    },

    ConnectionHealthChanged {
        connection_id: Uuid,
        new_status: HealthStatus,
        old_status: HealthStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },

    TransactionStarted {
        connection_id: Uuid,
        query_id: Uuid,
        transaction: TransactionInfo,
    },

    TransactionFinished {
        connection_id: Uuid,
        query_id: Uuid,
        transaction: TransactionInfo,
        committed: bool,
    },

    ChangesApplied {
        query_id: Uuid,
        statement_count: usize,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishing with no subscribers is not an error
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Record connection activity for every executed query
pub fn spawn_activity_tracker(bus: &EventBus, monitor: Arc<HealthMonitor>) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(Event::QueryExecuted(query)) => {
                    monitor.record_activity(query.connection_id);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Activity tracker lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
