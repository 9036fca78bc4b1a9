//! # Analysis worker
//!
//! Background executor that claims due analysis jobs, calls the external analysis
//! service and applies the verdict through [`AssetService::finish_analysis`], the same
//! transition path every other asset change takes.
//!
//! Failed attempts are retried with linear backoff (`attempts × retry_backoff_seconds`).
//! A job that exhausts `max_attempts` is dead-lettered and its asset is moved to
//! `BLOCKED` with an `ANALYSIS_FAILED` issue so it can be re-analyzed.
//!
//! A claim stamps `claimed_at`. A job still `RUNNING` once `lease_seconds` have passed
//! belongs to an attempt that died with its process; the next tick counts it as a
//! failed attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::asset_state::{AnalysisResult, AnalysisVerdict, AssetService};
use crate::config::AnalysisConfig;
use crate::error::CoreError;
use crate::models::Platform;
use crate::models::analysis_job::{self, AnalysisJobStatus};
use crate::models::asset::{self, AssetIssue, AssetKind, AssetState};
use crate::models::domain_event::EventSource;
use crate::repositories::AnalysisJobRepository;

pub const ANALYSIS_FAILED_ISSUE: &str = "ANALYSIS_FAILED";

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("analysis service request failed: {0}")]
    Transport(String),
    #[error("analysis service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("analysis service returned an unreadable verdict: {0}")]
    InvalidResponse(String),
}

/// External asset vetting
#[async_trait]
pub trait AssetAnalyzer: Send + Sync {
    async fn analyze(&self, asset: &asset::Model) -> Result<AnalysisResult, AnalyzerError>;
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    asset_id: Uuid,
    project_id: Uuid,
    kind: AssetKind,
    name: &'a str,
    content_ref: &'a str,
    compatibility: &'a [Platform],
}

/// HTTP client for the analysis service: `POST {base}/v1/analyze`
pub struct RemoteAnalyzer {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteAnalyzer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("launchgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/analyze", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl AssetAnalyzer for RemoteAnalyzer {
    async fn analyze(&self, asset: &asset::Model) -> Result<AnalysisResult, AnalyzerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&AnalyzeRequest {
                asset_id: asset.id,
                project_id: asset.project_id,
                kind: asset.kind,
                name: &asset.name,
                content_ref: &asset.content_ref,
                compatibility: &asset.compatibility.0,
            })
            .send()
            .await
            .map_err(|e| AnalyzerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        response
            .json::<AnalysisResult>()
            .await
            .map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTickStats {
    pub claimed: u64,
    /// Running jobs taken back after their lease expired
    pub recovered: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub cancelled: u64,
    /// Jobs whose bookkeeping failed; they are picked up again on a later tick
    pub errored: u64,
}

impl AnalysisTickStats {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Succeeded => self.succeeded += 1,
            JobOutcome::Retried => self.retried += 1,
            JobOutcome::DeadLettered => self.dead_lettered += 1,
            JobOutcome::Cancelled => self.cancelled += 1,
            JobOutcome::Skipped => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Succeeded,
    Retried,
    DeadLettered,
    Cancelled,
    Skipped,
}

const LEASE_EXPIRED: &str = "analysis attempt did not finish within its lease";

/// Background analysis executor
#[derive(Clone)]
pub struct AnalysisWorker {
    db: Arc<DatabaseConnection>,
    assets: AssetService,
    analyzer: Arc<dyn AssetAnalyzer>,
    config: AnalysisConfig,
}

impl AnalysisWorker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        assets: AssetService,
        analyzer: Arc<dyn AssetAnalyzer>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            db,
            assets,
            analyzer,
            config,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting analysis worker");
        let tick_interval = Duration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Analysis worker shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Analysis tick failed");
                    }
                }
            }
        }

        info!("Analysis worker stopped");
    }

    /// Reclaims abandoned attempts, then claims and runs every due job, up to the batch size.
    ///
    /// Only listing the jobs can fail the tick; a job that errors is counted and logged.
    pub async fn tick(&self) -> Result<AnalysisTickStats, CoreError> {
        let jobs = AnalysisJobRepository::new(self.db.as_ref());
        let mut stats = AnalysisTickStats::default();

        let expired = jobs
            .list_expired_leases(Utc::now() - self.config.lease(), self.config.batch_size)
            .await?;
        for job in expired {
            warn!(
                job_id = %job.id,
                asset_id = %job.asset_id,
                attempts = job.attempts,
                "Analysis lease expired, reclaiming job"
            );
            counter!("analysis_jobs_total", "outcome" => "lease_expired").increment(1);
            let job_id = job.id;
            match self.handle_failure(job, LEASE_EXPIRED.to_string()).await {
                Ok(outcome) => {
                    stats.recovered += 1;
                    stats.record(outcome);
                }
                Err(err) => {
                    stats.errored += 1;
                    error!(job_id = %job_id, error = %err, "Failed to reclaim analysis job");
                }
            }
        }

        let due = jobs.list_due(Utc::now(), self.config.batch_size).await?;
        for job in due {
            let job_id = job.id;
            match self.run_job(job).await {
                Ok(JobOutcome::Skipped) => {}
                Ok(outcome) => {
                    stats.claimed += 1;
                    stats.record(outcome);
                }
                Err(err) => {
                    stats.errored += 1;
                    counter!("analysis_jobs_total", "outcome" => "errored").increment(1);
                    error!(job_id = %job_id, error = %err, "Analysis job failed");
                }
            }
        }

        if stats.claimed > 0 || stats.recovered > 0 || stats.errored > 0 {
            debug!(
                claimed = stats.claimed,
                recovered = stats.recovered,
                succeeded = stats.succeeded,
                retried = stats.retried,
                dead_lettered = stats.dead_lettered,
                errored = stats.errored,
                "Analysis tick completed"
            );
        }
        Ok(stats)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, asset_id = %job.asset_id))]
    async fn run_job(&self, job: analysis_job::Model) -> Result<JobOutcome, CoreError> {
        let mut running = job.clone();
        running.status = AnalysisJobStatus::Running;
        running.attempts = job.attempts + 1;
        running.claimed_at = Some(Utc::now());
        let Some(claimed) = AnalysisJobRepository::new(self.db.as_ref())
            .transition(&job, running)
            .await?
        else {
            debug!("Job claimed elsewhere, skipping");
            return Ok(JobOutcome::Skipped);
        };

        match self.attempt(&claimed).await {
            Ok(outcome) => Ok(outcome),
            Err(failure) => self.handle_failure(claimed, failure).await,
        }
    }

    /// One attempt at a claimed job; `Err` carries the failure to retry or dead-letter
    async fn attempt(&self, claimed: &analysis_job::Model) -> Result<JobOutcome, String> {
        let asset = self
            .assets
            .get(claimed.asset_id)
            .await
            .map_err(|e| e.to_string())?;
        if asset.state != AssetState::Analyzing {
            // Resolved by the result callback or superseded
            return self.cancel(claimed).await.map_err(|e| e.to_string());
        }

        let started = std::time::Instant::now();
        let verdict = self.analyzer.analyze(&asset).await;
        histogram!("analysis_latency_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        let result = verdict.map_err(|e| e.to_string())?;
        match self
            .assets
            .finish_analysis(asset.id, result, AnalysisJobStatus::Succeeded, EventSource::Ai)
            .await
        {
            Ok(_) => {
                counter!("analysis_jobs_total", "outcome" => "succeeded").increment(1);
                Ok(JobOutcome::Succeeded)
            }
            // Asset left ANALYZING while the service was thinking
            Err(CoreError::InvalidTransition { .. }) => {
                self.cancel(claimed).await.map_err(|e| e.to_string())
            }
            Err(error) => Err(error.to_string()),
        }
    }

    async fn cancel(&self, claimed: &analysis_job::Model) -> Result<JobOutcome, CoreError> {
        let mut cancelled = claimed.clone();
        cancelled.status = AnalysisJobStatus::Cancelled;
        cancelled.claimed_at = None;
        AnalysisJobRepository::new(self.db.as_ref())
            .transition(claimed, cancelled)
            .await?;
        counter!("analysis_jobs_total", "outcome" => "cancelled").increment(1);
        Ok(JobOutcome::Cancelled)
    }

    async fn handle_failure(
        &self,
        claimed: analysis_job::Model,
        message: String,
    ) -> Result<JobOutcome, CoreError> {
        if claimed.attempts >= self.config.max_attempts as i32 {
            warn!(
                job_id = %claimed.id,
                attempts = claimed.attempts,
                error = %message,
                "Analysis attempts exhausted, dead-lettering job"
            );
            let result = AnalysisResult {
                verdict: AnalysisVerdict::Blocked,
                risk_score: None,
                quality_score: None,
                issues: vec![AssetIssue {
                    code: ANALYSIS_FAILED_ISSUE.to_string(),
                    message: format!(
                        "analysis failed after {} attempts: {}",
                        claimed.attempts, message
                    ),
                }],
            };
            return match self
                .assets
                .finish_analysis(
                    claimed.asset_id,
                    result,
                    AnalysisJobStatus::DeadLettered,
                    EventSource::System,
                )
                .await
            {
                Ok(_) => {
                    counter!("analysis_jobs_total", "outcome" => "dead_lettered").increment(1);
                    Ok(JobOutcome::DeadLettered)
                }
                Err(CoreError::InvalidTransition { .. }) => self.cancel(&claimed).await,
                Err(error) => Err(error),
            };
        }

        let backoff = retry_backoff(self.config.retry_backoff_seconds, claimed.attempts);
        let mut requeued = claimed.clone();
        requeued.status = AnalysisJobStatus::Queued;
        requeued.next_attempt_at = Utc::now() + backoff;
        requeued.last_error = Some(message.clone());
        requeued.claimed_at = None;

        if AnalysisJobRepository::new(self.db.as_ref())
            .transition(&claimed, requeued)
            .await?
            .is_none()
        {
            debug!(job_id = %claimed.id, "Job closed or removed meanwhile, not retrying");
            return Ok(JobOutcome::Skipped);
        }

        counter!("analysis_jobs_total", "outcome" => "retried").increment(1);
        info!(
            job_id = %claimed.id,
            attempts = claimed.attempts,
            retry_in_seconds = backoff.num_seconds(),
            error = %message,
            "Analysis attempt failed, retrying"
        );
        Ok(JobOutcome::Retried)
    }
}

/// Linear backoff: the n-th failed attempt waits `n × base`
pub fn retry_backoff(base_seconds: u64, attempts: i32) -> chrono::Duration {
    chrono::Duration::seconds(base_seconds as i64 * i64::from(attempts.max(1)))
}
