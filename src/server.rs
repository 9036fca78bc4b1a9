//! # Server Configuration
//!
//! Router assembly, shared state and process startup for the launchgate API.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::adapters::Registry;
use crate::analysis_worker::{AnalysisWorker, AssetAnalyzer, RemoteAnalyzer};
use crate::asset_state::AssetService;
use crate::auth::auth_middleware;
use crate::automation::{AutomationService, CooldownResumer};
use crate::config::AppConfig;
use crate::connection_manager::ConnectionManager;
use crate::crypto::TokenVault;
use crate::handlers;
use crate::projects::ProjectService;
use crate::telemetry::{init_tracing, trace_middleware};
use crate::token_refresh::TokenRefreshService;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub connections: ConnectionManager,
    pub assets: AssetService,
    pub rules: AutomationService,
    pub projects: ProjectService,
}

impl AppState {
    /// Wires every service over one pool
    pub fn new(
        config: AppConfig,
        db: DatabaseConnection,
        vault: TokenVault,
        registry: Registry,
    ) -> Self {
        let config = Arc::new(config);
        let db = Arc::new(db);
        let connections =
            ConnectionManager::new(db.clone(), vault, registry, config.clone());
        let assets = AssetService::new(db.clone(), config.readiness.risk_threshold);
        let rules = AutomationService::new(db.clone());
        let projects = ProjectService::new(db.clone(), assets.clone(), connections.clone());

        Self {
            config,
            db,
            connections,
            assets,
            rules,
            projects,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/connect/{platform}", post(handlers::connect::start_oauth))
        .route(
            "/connections",
            get(handlers::connections::list_connections),
        )
        .route(
            "/connections/{id}",
            axum::routing::delete(handlers::connections::revoke_connection),
        )
        .route(
            "/connections/{id}/refresh",
            post(handlers::connections::refresh_connection),
        )
        .route(
            "/platforms/{platform}/revocations",
            post(handlers::connections::provider_revocation),
        )
        .route("/projects", post(handlers::projects::create_project))
        .route(
            "/projects/{id}",
            get(handlers::projects::get_project).delete(handlers::projects::delete_project),
        )
        .route(
            "/projects/{id}/assets",
            get(handlers::assets::list_assets).post(handlers::assets::create_asset),
        )
        .route(
            "/projects/{id}/campaigns",
            get(handlers::projects::list_campaigns).post(handlers::projects::create_campaign),
        )
        .route(
            "/projects/{id}/rules",
            get(handlers::rules::list_rules).post(handlers::rules::create_rule),
        )
        .route("/assets/{id}", get(handlers::assets::get_asset))
        .route("/assets/{id}/analyze", post(handlers::assets::analyze_asset))
        .route("/assets/{id}/mark-ready", post(handlers::assets::mark_ready))
        .route("/assets/{id}/unmark", post(handlers::assets::unmark))
        .route("/assets/{id}/readiness", get(handlers::assets::readiness))
        .route(
            "/assets/{id}/analysis-result",
            post(handlers::assets::analysis_result),
        )
        .route(
            "/rules/{id}",
            get(handlers::rules::get_rule).delete(handlers::rules::delete_rule),
        )
        .route("/rules/{id}/enable", post(handlers::rules::enable_rule))
        .route("/rules/{id}/disable", post(handlers::rules::disable_rule))
        .route("/rules/{id}/trigger", post(handlers::rules::trigger_rule))
        .route("/rules/{id}/fail", post(handlers::rules::fail_rule))
        .route("/rules/{id}/reset", post(handlers::rules::reset_rule))
        .route("/events", get(handlers::events::list_events))
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(
            "/connect/{platform}/callback",
            get(handlers::connect::oauth_callback),
        )
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_middleware))
        .layer(CorsLayer::permissive())
}

/// Starts the server and its background loops with the given configuration
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    init_tracing(&config)?;

    let addr = config.bind_addr()?;
    let db = crate::db::init_pool(&config).await?;
    crate::db::run_migrations(&db).await?;

    let vault = TokenVault::from_secret(config.vault_secret.as_deref())?;
    let registry = Registry::from_config(&config)?;
    info!(platforms = ?registry.platforms(), "Platform adapters registered");

    let state = AppState::new(config, db, vault, registry);
    let shutdown = CancellationToken::new();
    let mut background = Vec::new();

    let refresher = TokenRefreshService::new(
        state.config.token_refresh.clone(),
        state.connections.clone(),
    );
    let token = shutdown.clone();
    background.push(tokio::spawn(async move { refresher.run(token).await }));

    if let Some(service_url) = state.config.analysis.service_url.as_deref() {
        let analyzer: Arc<dyn AssetAnalyzer> = Arc::new(RemoteAnalyzer::new(
            service_url,
            state.config.oauth.provider_timeout(),
        )?);
        let worker = AnalysisWorker::new(
            state.db.clone(),
            state.assets.clone(),
            analyzer,
            state.config.analysis.clone(),
        );
        let token = shutdown.clone();
        background.push(tokio::spawn(async move { worker.run(token).await }));
    } else {
        warn!("ANALYSIS_SERVICE_URL not set; analysis verdicts arrive only through the callback");
    }

    let resumer = CooldownResumer::new(state.rules.clone(), state.config.automation.tick_seconds);
    let token = shutdown.clone();
    background.push(tokio::spawn(async move { resumer.run(token).await }));

    let profile = state.config.profile.clone();
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %profile, "Server listening");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    for handle in background {
        if tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .is_err()
        {
            warn!("Background task did not stop within 10s");
        }
    }
    info!("Server stopped");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::connect::start_oauth,
        crate::handlers::connect::oauth_callback,
        crate::handlers::connections::list_connections,
        crate::handlers::connections::refresh_connection,
        crate::handlers::connections::revoke_connection,
        crate::handlers::connections::provider_revocation,
        crate::handlers::projects::create_project,
        crate::handlers::projects::get_project,
        crate::handlers::projects::delete_project,
        crate::handlers::projects::list_campaigns,
        crate::handlers::projects::create_campaign,
        crate::handlers::assets::list_assets,
        crate::handlers::assets::create_asset,
        crate::handlers::assets::get_asset,
        crate::handlers::assets::analyze_asset,
        crate::handlers::assets::mark_ready,
        crate::handlers::assets::unmark,
        crate::handlers::assets::readiness,
        crate::handlers::assets::analysis_result,
        crate::handlers::rules::list_rules,
        crate::handlers::rules::create_rule,
        crate::handlers::rules::get_rule,
        crate::handlers::rules::delete_rule,
        crate::handlers::rules::enable_rule,
        crate::handlers::rules::disable_rule,
        crate::handlers::rules::trigger_rule,
        crate::handlers::rules::reset_rule,
        crate::handlers::rules::fail_rule,
        crate::handlers::events::list_events,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::Platform,
            crate::models::connection::ConnectionStatus,
            crate::models::connection::Permission,
            crate::models::asset::AssetState,
            crate::models::asset::AssetKind,
            crate::models::asset::AssetIssue,
            crate::models::automation_rule::RuleState,
            crate::models::automation_rule::RuleScope,
            crate::models::automation_rule::RuleCondition,
            crate::models::automation_rule::RuleAction,
            crate::models::project::ProjectStage,
            crate::models::domain_event::EventSource,
            crate::models::domain_event::EntityKind,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::connect::ConnectRequest,
            crate::handlers::connect::CallbackResponse,
            crate::handlers::connections::ConnectionsResponse,
            crate::handlers::connections::RefreshResponse,
            crate::handlers::connections::ProviderRevocation,
            crate::handlers::connections::ProviderRevocationResponse,
            crate::handlers::projects::CreateProjectRequest,
            crate::handlers::rules::RuleFailure,
            crate::handlers::types::ProjectResponse,
            crate::handlers::types::AssetResponse,
            crate::handlers::types::RuleResponse,
            crate::handlers::types::CampaignResponse,
            crate::connection_manager::InitiatedOAuth,
            crate::connection_manager::ConnectionSummary,
            crate::asset_state::NewAsset,
            crate::asset_state::AnalysisResult,
            crate::asset_state::ReadinessReport,
            crate::asset_state::GuardCheck,
            crate::automation::NewRule,
            crate::projects::NewCampaign,
            crate::events::DomainEventResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service info and health"),
        (name = "connections", description = "Ad account OAuth connections"),
        (name = "projects", description = "Projects and campaigns"),
        (name = "assets", description = "Creative asset readiness"),
        (name = "rules", description = "Automation rules"),
        (name = "events", description = "Domain event log"),
    ),
    info(
        title = "Launchgate API",
        description = "Ad platform connections, creative readiness and launch automation",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
