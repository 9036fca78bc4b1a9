//! # Token Refresh Service
//!
//! Background task that periodically scans live connections and refreshes tokens
//! nearing expiry, so consumers rarely have to refresh on the request path. Each tick also
//! purges abandoned OAuth flows (expired pending requests and their reserved connections).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::TokenRefreshConfig;
use crate::connection_manager::ConnectionManager;
use crate::error::CoreError;
use crate::models::domain_event::EventSource;

/// Background token refresh service
#[derive(Clone)]
pub struct TokenRefreshService {
    config: TokenRefreshConfig,
    manager: ConnectionManager,
    /// Connections with a refresh still running from an earlier tick
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub connections_polled: u64,
    pub refreshes_attempted: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
    pub skipped_in_flight: u64,
}

impl TokenRefreshService {
    pub fn new(config: TokenRefreshConfig, manager: ConnectionManager) -> Self {
        Self {
            config,
            manager,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run the token refresh loop until the provided shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting token refresh service");
        let tick_interval = TokioDuration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Token refresh service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Token refresh tick failed");
                    }
                    histogram!("token_refresh_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Token refresh service stopped");
    }

    /// Execute one tick of the token refresh service
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<RefreshStats, CoreError> {
        let now = Utc::now();
        let mut stats = RefreshStats::default();

        if let Err(err) = self.manager.purge_expired(now).await {
            warn!(error = %err, "Failed to purge expired OAuth requests");
        }

        let due_connections = self.manager.due_for_refresh(now).await?;
        stats.connections_polled = due_connections.len() as u64;

        debug!(
            found_connections = due_connections.len(),
            lead_time_seconds = self.config.lead_time_seconds,
            "Found connections due for token refresh"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1) as usize));
        let mut handles = Vec::new();

        for connection in due_connections {
            if !self.in_flight.lock().await.insert(connection.id) {
                stats.skipped_in_flight += 1;
                continue;
            }
            stats.refreshes_attempted += 1;

            let semaphore = semaphore.clone();
            let service = self.clone();
            let connection_id = connection.id;

            handles.push(tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => service.refresh_with_jitter(connection_id).await,
                    Err(_) => Err(CoreError::Configuration(
                        "refresh semaphore closed".to_string(),
                    )),
                };
                service.in_flight.lock().await.remove(&connection_id);
                result
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(true)) => stats.refreshes_succeeded += 1,
                Ok(Ok(false)) => stats.refreshes_failed += 1,
                Ok(Err(e)) => {
                    stats.refreshes_failed += 1;
                    error!(error = %e, kind = e.kind(), "Connection refresh failed");
                }
                Err(e) => {
                    stats.refreshes_failed += 1;
                    error!(error = ?e, "Refresh task panicked or was cancelled");
                }
            }
        }

        gauge!("token_refresh_connections_polled_gauge").set(stats.connections_polled as f64);
        counter!("token_refresh_tick_failures_total").increment(stats.refreshes_failed);

        debug!(
            connections_polled = stats.connections_polled,
            refreshes_attempted = stats.refreshes_attempted,
            refreshes_succeeded = stats.refreshes_succeeded,
            refreshes_failed = stats.refreshes_failed,
            skipped_in_flight = stats.skipped_in_flight,
            "Token refresh tick completed"
        );

        Ok(stats)
    }

    async fn refresh_with_jitter(&self, connection_id: Uuid) -> Result<bool, CoreError> {
        // Spread refreshes to avoid a thundering herd against the provider
        let jitter_seconds = self.compute_jitter();
        if jitter_seconds > 0 {
            debug!(
                connection_id = %connection_id,
                jitter_seconds = jitter_seconds,
                "Applying jitter before token refresh"
            );
            sleep(TokioDuration::from_secs(jitter_seconds)).await;
        }

        self.manager
            .refresh_connection(connection_id, EventSource::System)
            .await
    }

    /// Compute jitter delay based on configuration
    fn compute_jitter(&self) -> u64 {
        if self.config.jitter_factor <= 0.0 {
            return 0;
        }

        let max_delay_seconds =
            (self.config.lead_time_seconds as f64 * self.config.jitter_factor) as u64;

        rand::thread_rng().gen_range(0..=max_delay_seconds)
    }
}
