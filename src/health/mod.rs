//! Connection Health Monitor
//!
//! A background task that periodically probes connections by listing their
//! databases. Probes for different connections run concurrently; a
//! connection already being checked is skipped until its probe finishes.
//!
//! # Lifecycle
//! [`HealthMonitor::start`] spawns the loop with a fresh cancellation token.
//! [`HealthMonitor::stop`] cancels it and waits for the current round of
//! probes to finish before returning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionSet, ConnectionState};
use crate::engine::ProviderRegistry;
use crate::error::{AionError, Result};
use crate::events::{Event, EventBus};

const MSG_NO_DATABASES: &str = "Failed to retrieve databases";
const MSG_TIMED_OUT: &str = "Connection timed out";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Checking,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub poll_interval_secs: u64,
    /// Connections idle for longer than this are not probed
    pub activity_threshold_secs: u64,
    pub connection_timeout_secs: u64,
    pub enabled: bool,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self { poll_interval_secs: 60, activity_threshold_secs: 1800, connection_timeout_secs: 5, enabled: true }
    }
}

impl HealthSettings {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    #[must_use]
    pub fn activity_threshold(&self) -> Duration {
        Duration::from_secs(self.activity_threshold_secs)
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub connection_id: Uuid,
    pub is_healthy: bool,
    pub check_time: DateTime<Utc>,
    /// Probe duration in milliseconds
    pub response_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Whether a connection is due for a probe
///
/// Unknown connections are always probed. Otherwise a connection is probed
/// when it was used within the activity window, or when it is active and
/// has never recorded any activity.
#[must_use]
pub fn should_check(connection: &Connection, now: DateTime<Utc>, settings: &HealthSettings) -> bool {
    match connection.health {
        HealthStatus::Unknown => true,
        HealthStatus::Checking => false,
        HealthStatus::Healthy | HealthStatus::Unhealthy => match connection.last_activity {
            Some(at) => (now - at).to_std().map_or(true, |idle| idle <= settings.activity_threshold()),
            None => connection.is_active(),
        },
    }
}

type RunningTask = (CancellationToken, JoinHandle<()>);

pub struct HealthMonitor {
    connections: Arc<ConnectionSet>,
    providers: Arc<ProviderRegistry>,
    events: EventBus,
    settings: HealthSettings,
    task: Mutex<Option<RunningTask>>,
}

impl HealthMonitor {
    pub fn new(
        connections: Arc<ConnectionSet>,
        providers: Arc<ProviderRegistry>,
        events: EventBus,
        settings: HealthSettings,
    ) -> Self {
        Self { connections, providers, events, settings, task: Mutex::new(None) }
    }

    #[must_use]
    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Spawn the polling loop; `false` when disabled or already running
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.settings.enabled {
            info!("Health monitor is disabled");
            return false;
        }
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let monitor = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { monitor.run(loop_token).await });
        *task = Some((token, handle));

        info!(interval_secs = self.settings.poll_interval_secs, "Health monitor started");
        true
    }

    /// Cancel the loop and wait for in-flight probes
    pub async fn stop(&self) {
        let running = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some((token, handle)) = running else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "Health monitor task ended abnormally");
        }
        info!("Health monitor stopped");
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let period = self.settings.poll_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let results = self.check_connections_once().await;
                    debug!(checked = results.len(), "Health check round finished");
                }
            }
        }
    }

    /// Probe every due connection concurrently
    pub async fn check_connections_once(self: &Arc<Self>) -> Vec<HealthCheckResult> {
        let now = Utc::now();
        let candidates: Vec<Uuid> = self
            .connections
            .list()
            .into_iter()
            .filter(|c| should_check(c, now, &self.settings))
            .map(|c| c.id)
            .collect();

        let probes = candidates.into_iter().map(|id| {
            let monitor = Arc::clone(self);
            let handle = tokio::spawn(async move { monitor.probe(id).await });
            (id, handle)
        });
        let (ids, handles): (Vec<Uuid>, Vec<_>) = probes.unzip();

        let mut results = Vec::with_capacity(ids.len());
        for (id, outcome) in ids.into_iter().zip(futures::future::join_all(handles).await) {
            match outcome {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Health probe task failed");
                    let result = HealthCheckResult {
                        connection_id: id,
                        is_healthy: false,
                        check_time: Utc::now(),
                        response_time: 0,
                        error_message: Some(format!("Health check failed: {e}")),
                    };
                    self.finish(HealthStatus::Checking, &result);
                    results.push(result);
                }
            }
        }
        results
    }

    /// Probe one connection now, outside the polling schedule
    pub async fn check_now(&self, connection_id: Uuid) -> Result<HealthCheckResult> {
        if !self.connections.contains(connection_id) {
            return Err(AionError::invalid_input(format!("Unknown connection {connection_id}")));
        }
        self.probe(connection_id)
            .await
            .ok_or_else(|| AionError::invalid_input("A health check is already running for this connection"))
    }

    pub fn record_activity(&self, connection_id: Uuid) {
        self.connections.record_activity(connection_id);
    }

    /// `None` when the connection is gone or already being checked
    async fn probe(&self, connection_id: Uuid) -> Option<HealthCheckResult> {
        let (connection, previous) = self.connections.begin_health_check(connection_id)?;
        self.events.publish(Event::ConnectionHealthChanged {
            connection_id,
            new_status: HealthStatus::Checking,
            old_status: previous,
            error_message: None,
        });

        let started = Instant::now();
        let outcome = match self.providers.get(connection.database_type) {
            Ok(provider) => {
                let probe = provider.list_databases(&connection.connection_string);
                match tokio::time::timeout(self.settings.connection_timeout(), probe).await {
                    Ok(Ok(Some(_))) => Ok(()),
                    Ok(Ok(None)) => Err(MSG_NO_DATABASES.to_string()),
                    Ok(Err(e)) => Err(e.message()),
                    Err(_) => Err(MSG_TIMED_OUT.to_string()),
                }
            }
            Err(e) => Err(e.message()),
        };

        let result = HealthCheckResult {
            connection_id,
            is_healthy: outcome.is_ok(),
            check_time: Utc::now(),
            response_time: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            error_message: outcome.err(),
        };
        debug!(
            connection_id = %connection_id,
            healthy = result.is_healthy,
            response_ms = result.response_time,
            "Health probe finished"
        );
        self.finish(previous, &result);
        Some(result)
    }

    /// Store a probe outcome and publish it
    ///
    /// Changes are always published, and so is every unhealthy result.
    fn finish(&self, previous: HealthStatus, result: &HealthCheckResult) {
        let status = if result.is_healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy };
        let target = if result.is_healthy { ConnectionState::Active } else { ConnectionState::Failed };

        let state_change = self.connections.update(result.connection_id, |c| {
            c.health = status;
            c.last_health_check = Some(result.check_time);
            let changed = c.state != target;
            c.state = target;
            changed
        });

        if status != previous || !result.is_healthy {
            self.events.publish(Event::ConnectionHealthChanged {
                connection_id: result.connection_id,
                new_status: status,
                old_status: previous,
                error_message: result.error_message.clone(),
            });
        }
        if state_change == Some(true) {
            self.events.publish(Event::ConnectionStateChanged {
                connection_id: result.connection_id,
                state: target,
            });
        }
    }
}
