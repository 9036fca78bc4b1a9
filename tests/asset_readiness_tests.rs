//! Asset readiness: analysis, launch guards and the analysis worker.

mod test_utils;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use launchgate::analysis_worker::{
    ANALYSIS_FAILED_ISSUE, AnalysisTickStats, AnalysisWorker, AnalyzerError, AssetAnalyzer,
    RemoteAnalyzer,
};
use launchgate::asset_state::{AnalysisResult, AnalysisVerdict, NewAsset};
use launchgate::config::AnalysisConfig;
use launchgate::error::CoreError;
use launchgate::models::Platform;
use launchgate::models::analysis_job::{self, AnalysisJobStatus};
use launchgate::models::asset::{self, AssetIssue, AssetKind, AssetState};
use launchgate::models::domain_event::EventSource;
use launchgate::models::project::ProjectStage;
use launchgate::repositories::{AnalysisJobRepository, ProjectRepository};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde_json::json;
use test_utils::{TestHarness, approve};
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

#[tokio::test]
async fn create_validates_and_starts_uploaded() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();

    let err = harness
        .state
        .assets
        .create(
            project.id,
            NewAsset {
                kind: AssetKind::Image,
                name: "   ".to_string(),
                content_ref: "s3://x".to_string(),
                compatibility: Vec::new(),
            },
            EventSource::Ui,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let created = harness
        .asset(project.id, vec![Platform::Tiktok, Platform::Google, Platform::Tiktok])
        .await
        .unwrap();
    assert_eq!(created.state, AssetState::Uploaded);
    assert_eq!(created.compatibility.0, vec![Platform::Google, Platform::Tiktok]);

    let stage = ProjectRepository::new(harness.db())
        .find_by_id(project.id)
        .await
        .unwrap()
        .unwrap()
        .stage;
    assert_eq!(stage, ProjectStage::AssetsReady);
}

#[tokio::test]
async fn analysis_verdicts_drive_the_state_machine() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let assets = &harness.state.assets;
    let created = harness.asset(project.id, Vec::new()).await.unwrap();

    let analyzing = assets.analyze(created.id, EventSource::Ui).await.unwrap();
    assert_eq!(analyzing.state, AssetState::Analyzing);
    let job = AnalysisJobRepository::new(harness.db())
        .find_open_for_asset(created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, AnalysisJobStatus::Queued);

    // Nothing may be done while analysis runs
    let busy = assets.analyze(created.id, EventSource::Ui).await.unwrap_err();
    assert!(matches!(busy, CoreError::InvalidTransition { .. }));

    let blocked = assets
        .complete_analysis(
            created.id,
            AnalysisResult {
                verdict: AnalysisVerdict::Blocked,
                risk_score: Some(91.0),
                quality_score: None,
                issues: vec![AssetIssue {
                    code: "TRADEMARK".to_string(),
                    message: "logo of a third party".to_string(),
                }],
            },
            EventSource::Ai,
        )
        .await
        .unwrap();
    assert_eq!(blocked.state, AssetState::Blocked);
    assert_eq!(blocked.issues.0.len(), 1);

    let job = AnalysisJobRepository::new(harness.db())
        .find_by_id(job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, AnalysisJobStatus::Succeeded);

    let events = harness.events_for(created.id).await.unwrap();
    assert_eq!(events[0].event_type, "asset.blocked");
    assert_eq!(events[0].source, EventSource::Ai);
    assert_eq!(events[0].reason.as_deref(), Some("logo of a third party"));

    // Re-analysis clears previous findings
    let again = assets.analyze(created.id, EventSource::Ui).await.unwrap();
    assert!(again.issues.0.is_empty());
    assert!(again.risk_score.is_none());
    let approved = assets
        .complete_analysis(created.id, approve(10.0), EventSource::Ai)
        .await
        .unwrap();
    assert_eq!(approved.state, AssetState::Approved);
}

#[tokio::test]
async fn scores_outside_range_are_rejected() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let created = harness.asset(project.id, Vec::new()).await.unwrap();
    harness
        .state
        .assets
        .analyze(created.id, EventSource::Ui)
        .await
        .unwrap();

    let err = harness
        .state
        .assets
        .complete_analysis(created.id, approve(140.0), EventSource::Ai)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let unchanged = harness.state.assets.get(created.id).await.unwrap();
    assert_eq!(unchanged.state, AssetState::Analyzing);
}

#[tokio::test]
async fn verdict_for_asset_not_analyzing_is_rejected_and_recorded() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let created = harness.asset(project.id, Vec::new()).await.unwrap();

    let err = harness
        .state
        .assets
        .complete_analysis(created.id, approve(5.0), EventSource::Ai)
        .await
        .unwrap_err();
    match err {
        CoreError::InvalidTransition {
            current_state,
            attempted_action,
            allowed_actions,
            ..
        } => {
            assert_eq!(current_state, "UPLOADED");
            assert_eq!(attempted_action, "analysis_approved");
            assert_eq!(allowed_actions, vec!["analyze".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let events = harness.events_for(created.id).await.unwrap();
    assert!(events[0].blocked);
    assert_eq!(events[0].source, EventSource::Ai);
}

#[tokio::test]
async fn risk_guard_blocks_mark_ready() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let risky = harness.approved_asset(project.id, 75.0).await.unwrap();

    let err = harness
        .state
        .assets
        .mark_ready(risky.id, None, EventSource::Ui)
        .await
        .unwrap_err();
    match err {
        CoreError::GuardBlocked {
            guard_name,
            current_state,
            ..
        } => {
            assert_eq!(guard_name, "risk_threshold");
            assert_eq!(current_state, "APPROVED");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let events = harness.events_for(risky.id).await.unwrap();
    assert_eq!(events[0].event_type, "asset.guard_blocked");
    assert!(events[0].reason.as_deref().unwrap().contains("exceeds threshold 50"));

    let still = harness.state.assets.get(risky.id).await.unwrap();
    assert_eq!(still.state, AssetState::Approved);
}

#[tokio::test]
async fn platform_guard_applies_only_to_declared_compatibility() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let assets = &harness.state.assets;

    let created = harness.asset(project.id, vec![Platform::Google]).await.unwrap();
    assets.analyze(created.id, EventSource::Ui).await.unwrap();
    assets
        .complete_analysis(created.id, approve(20.0), EventSource::Ai)
        .await
        .unwrap();

    let report = assets
        .readiness(created.id, Some(Platform::Snapchat))
        .await
        .unwrap();
    assert!(!report.ready);
    let failed: Vec<&str> = report
        .guards
        .iter()
        .filter(|check| !check.passed)
        .map(|check| check.guard_name)
        .collect();
    assert_eq!(failed, vec!["platform_compatibility"]);

    let err = assets
        .mark_ready(created.id, Some(Platform::Snapchat), EventSource::Ui)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::GuardBlocked { .. }));

    let ready = assets
        .mark_ready(created.id, Some(Platform::Google), EventSource::Ui)
        .await
        .unwrap();
    assert_eq!(ready.state, AssetState::ReadyForLaunch);

    // Undeclared compatibility passes for every platform
    let open = harness.approved_asset(project.id, 0.0).await.unwrap();
    let report = assets.readiness(open.id, Some(Platform::Tiktok)).await.unwrap();
    assert!(report.ready);
}

#[tokio::test]
async fn unmark_returns_to_approved() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let approved = harness.approved_asset(project.id, 30.0).await.unwrap();
    let assets = &harness.state.assets;

    let unmark_early = assets.unmark(approved.id, EventSource::Ui).await.unwrap_err();
    assert!(matches!(unmark_early, CoreError::InvalidTransition { .. }));

    assets
        .mark_ready(approved.id, None, EventSource::Automation)
        .await
        .unwrap();
    let back = assets.unmark(approved.id, EventSource::Ui).await.unwrap();
    assert_eq!(back.state, AssetState::Approved);

    let stage = ProjectRepository::new(harness.db())
        .find_by_id(project.id)
        .await
        .unwrap()
        .unwrap()
        .stage;
    assert_eq!(stage, ProjectStage::AnalysisPassed);
}

/// Analyzer that replays queued answers
struct QueuedAnalyzer {
    answers: Mutex<VecDeque<Result<AnalysisResult, AnalyzerError>>>,
}

impl QueuedAnalyzer {
    fn new(answers: Vec<Result<AnalysisResult, AnalyzerError>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
        })
    }
}

#[async_trait]
impl AssetAnalyzer for QueuedAnalyzer {
    async fn analyze(&self, _asset: &asset::Model) -> Result<AnalysisResult, AnalyzerError> {
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AnalyzerError::Transport("no answer queued".to_string())))
    }
}

fn worker(harness: &TestHarness, analyzer: Arc<dyn AssetAnalyzer>) -> AnalysisWorker {
    AnalysisWorker::new(
        harness.state.db.clone(),
        harness.state.assets.clone(),
        analyzer,
        AnalysisConfig {
            max_attempts: 2,
            retry_backoff_seconds: 0,
            ..harness.state.config.analysis.clone()
        },
    )
}

#[tokio::test]
async fn worker_applies_verdict_after_transient_failure() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let created = harness.asset(project.id, Vec::new()).await.unwrap();
    harness
        .state
        .assets
        .analyze(created.id, EventSource::Ui)
        .await
        .unwrap();

    let worker = worker(
        &harness,
        QueuedAnalyzer::new(vec![
            Err(AnalyzerError::Status {
                status: 503,
                body: "busy".to_string(),
            }),
            Ok(approve(12.0)),
        ]),
    );

    let first = worker.tick().await.unwrap();
    assert_eq!(first.retried, 1);
    let second = worker.tick().await.unwrap();
    assert_eq!(second.succeeded, 1);

    let approved = harness.state.assets.get(created.id).await.unwrap();
    assert_eq!(approved.state, AssetState::Approved);
    assert_eq!(approved.risk_score, Some(12.0));

    let events = harness.events_for(created.id).await.unwrap();
    assert_eq!(events[0].source, EventSource::Ai);
}

#[tokio::test]
async fn worker_dead_letters_after_max_attempts() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let created = harness.asset(project.id, Vec::new()).await.unwrap();
    harness
        .state
        .assets
        .analyze(created.id, EventSource::Ui)
        .await
        .unwrap();

    let worker = worker(&harness, QueuedAnalyzer::new(Vec::new()));
    assert_eq!(worker.tick().await.unwrap().retried, 1);
    assert_eq!(worker.tick().await.unwrap().dead_lettered, 1);
    assert_eq!(worker.tick().await.unwrap().claimed, 0);

    let blocked = harness.state.assets.get(created.id).await.unwrap();
    assert_eq!(blocked.state, AssetState::Blocked);
    assert_eq!(blocked.issues.0[0].code, ANALYSIS_FAILED_ISSUE);

    let events = harness.events_for(created.id).await.unwrap();
    assert_eq!(events[0].source, EventSource::System);

    // Blocked by a failed analysis can be analyzed again
    let retry = harness
        .state
        .assets
        .analyze(created.id, EventSource::Ui)
        .await
        .unwrap();
    assert_eq!(retry.state, AssetState::Analyzing);
}

#[tokio::test]
async fn worker_cancels_job_resolved_by_callback() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let created = harness.asset(project.id, Vec::new()).await.unwrap();
    harness
        .state
        .assets
        .analyze(created.id, EventSource::Ui)
        .await
        .unwrap();
    let job = AnalysisJobRepository::new(harness.db())
        .find_open_for_asset(created.id)
        .await
        .unwrap()
        .unwrap();

    // The callback closes the open job itself
    harness
        .state
        .assets
        .complete_analysis(created.id, approve(3.0), EventSource::Ai)
        .await
        .unwrap();
    let worker = worker(&harness, QueuedAnalyzer::new(vec![Ok(approve(99.0))]));
    assert_eq!(worker.tick().await.unwrap().claimed, 0);

    let closed = AnalysisJobRepository::new(harness.db())
        .find_by_id(job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed.status, AnalysisJobStatus::Succeeded);
    let asset = harness.state.assets.get(created.id).await.unwrap();
    assert_eq!(asset.risk_score, Some(3.0));
}

/// Puts an asset in ANALYZING and returns its queued job
async fn analyzing_job(
    harness: &TestHarness,
    project_id: Uuid,
) -> (asset::Model, analysis_job::Model) {
    let created = harness.asset(project_id, Vec::new()).await.unwrap();
    harness
        .state
        .assets
        .analyze(created.id, EventSource::Ui)
        .await
        .unwrap();
    let job = AnalysisJobRepository::new(harness.db())
        .find_open_for_asset(created.id)
        .await
        .unwrap()
        .unwrap();
    (created, job)
}

/// Leaves a job RUNNING as a worker that died mid-attempt would
async fn abandon(
    harness: &TestHarness,
    job: &analysis_job::Model,
    attempts: i32,
    claimed_ago: ChronoDuration,
) {
    let mut running = job.clone();
    running.status = AnalysisJobStatus::Running;
    running.attempts = attempts;
    running.claimed_at = Some(Utc::now() - claimed_ago);
    AnalysisJobRepository::new(harness.db())
        .transition(job, running)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn abandoned_attempt_is_reclaimed_after_its_lease() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let (created, job) = analyzing_job(&harness, project.id).await;
    let worker = worker(&harness, QueuedAnalyzer::new(vec![Ok(approve(12.0))]));

    // Still within the lease: left alone
    abandon(&harness, &job, 1, ChronoDuration::seconds(1)).await;
    let stats = worker.tick().await.unwrap();
    assert_eq!(stats.recovered, 0);
    assert_eq!(stats.claimed, 0);

    let jobs = AnalysisJobRepository::new(harness.db());
    let held = jobs.find_by_id(job.id).await.unwrap().unwrap();
    let mut stale = held.clone();
    stale.claimed_at = Some(Utc::now() - ChronoDuration::minutes(10));
    jobs.transition(&held, stale).await.unwrap().unwrap();

    let stats = worker.tick().await.unwrap();
    assert_eq!(stats.recovered, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.succeeded, 1);

    let finished = jobs.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(finished.status, AnalysisJobStatus::Succeeded);
    assert_eq!(finished.attempts, 2);
    assert!(finished.last_error.unwrap().contains("lease"));
    let approved = harness.state.assets.get(created.id).await.unwrap();
    assert_eq!(approved.state, AssetState::Approved);
    assert_eq!(approved.risk_score, Some(12.0));
}

#[tokio::test]
async fn abandoned_final_attempt_is_dead_lettered() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let (created, job) = analyzing_job(&harness, project.id).await;
    abandon(&harness, &job, 2, ChronoDuration::hours(1)).await;

    let worker = worker(&harness, QueuedAnalyzer::new(Vec::new()));
    let stats = worker.tick().await.unwrap();
    assert_eq!(stats.recovered, 1);
    assert_eq!(stats.dead_lettered, 1);

    let closed = AnalysisJobRepository::new(harness.db())
        .find_by_id(job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed.status, AnalysisJobStatus::DeadLettered);
    let blocked = harness.state.assets.get(created.id).await.unwrap();
    assert_eq!(blocked.state, AssetState::Blocked);
    assert_eq!(blocked.issues.0[0].code, ANALYSIS_FAILED_ISSUE);

    // No longer stuck: a new analysis can start
    let retry = harness
        .state
        .assets
        .analyze(created.id, EventSource::Ui)
        .await
        .unwrap();
    assert_eq!(retry.state, AssetState::Analyzing);
}

/// Approves every asset, but first deletes one as a concurrent teardown would
struct VanishingAnalyzer {
    db: Arc<DatabaseConnection>,
    doomed: Mutex<Option<Uuid>>,
}

#[async_trait]
impl AssetAnalyzer for VanishingAnalyzer {
    async fn analyze(&self, target: &asset::Model) -> Result<AnalysisResult, AnalyzerError> {
        let doomed = {
            let mut doomed = self.doomed.lock().unwrap();
            if *doomed == Some(target.id) {
                doomed.take()
            } else {
                None
            }
        };
        if let Some(id) = doomed {
            asset::Entity::delete_by_id(id)
                .exec(self.db.as_ref())
                .await
                .unwrap();
        }
        Ok(approve(20.0))
    }
}

#[tokio::test]
async fn failing_job_does_not_stop_the_rest_of_the_tick() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let (doomed, doomed_job) = analyzing_job(&harness, project.id).await;
    let (calm, calm_job) = analyzing_job(&harness, project.id).await;

    let worker = worker(
        &harness,
        Arc::new(VanishingAnalyzer {
            db: harness.state.db.clone(),
            doomed: Mutex::new(Some(doomed.id)),
        }),
    );

    // The vanished asset fails its attempt; the next job still runs
    let stats = worker.tick().await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.errored, 0);

    let calm = harness.state.assets.get(calm.id).await.unwrap();
    assert_eq!(calm.state, AssetState::Approved);
    let jobs = AnalysisJobRepository::new(harness.db());
    let closed = jobs.find_by_id(calm_job.id).await.unwrap().unwrap();
    assert_eq!(closed.status, AnalysisJobStatus::Succeeded);
    assert!(jobs.find_by_id(doomed_job.id).await.unwrap().is_none());

    assert_eq!(worker.tick().await.unwrap(), AnalysisTickStats::default());
}

#[tokio::test]
async fn due_jobs_come_oldest_first_and_respect_the_limit() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let jobs = AnalysisJobRepository::new(harness.db());
    let now = Utc::now();

    let mut ids = Vec::new();
    for offset in [
        ChronoDuration::minutes(-1),
        ChronoDuration::minutes(-5),
        ChronoDuration::hours(1),
    ] {
        let (_, job) = analyzing_job(&harness, project.id).await;
        let mut scheduled = job.clone();
        scheduled.next_attempt_at = now + offset;
        jobs.transition(&job, scheduled).await.unwrap().unwrap();
        ids.push(job.id);
    }

    let due: Vec<Uuid> = jobs
        .list_due(now, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(due, vec![ids[1], ids[0]]);

    let first = jobs.list_due(now, 1).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, ids[1]);
}

#[tokio::test]
async fn remote_analyzer_posts_asset_and_reads_verdict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/analyze"))
        .and(body_partial_json(json!({ "kind": "video", "name": "Hero cut" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "verdict": "APPROVED",
            "risk_score": 14.5,
            "quality_score": 88.0,
            "issues": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let created = harness.asset(project.id, Vec::new()).await.unwrap();

    let analyzer = RemoteAnalyzer::new(&format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
    let result = analyzer.analyze(&created).await.unwrap();
    assert_eq!(result.verdict, AnalysisVerdict::Approved);
    assert_eq!(result.risk_score, Some(14.5));
}

#[tokio::test]
async fn remote_analyzer_maps_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/analyze"))
        .respond_with(ResponseTemplate::new(502).set_body_string("gateway down"))
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();
    let created = harness.asset(project.id, Vec::new()).await.unwrap();

    let analyzer = RemoteAnalyzer::new(&server.uri(), Duration::from_secs(5)).unwrap();
    match analyzer.analyze(&created).await {
        Err(AnalyzerError::Status { status, body }) => {
            assert_eq!(status, 502);
            assert_eq!(body, "gateway down");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
