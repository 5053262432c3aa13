pub mod handlers;

use std::sync::Arc;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    catalog::{CatalogApi, HttpCatalogClient, StaticCatalog},
    config::{BackendConfig, InstanceRegistry, ServerConfig},
    elastic::{DefaultElasticInfoProvider, ElasticClient, ElasticInfoProvider},
    identity::{IdentityApi, StaticTokenIdentity},
    BackendError, Result,
};

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn ElasticInfoProvider>,
    pub catalog: Arc<dyn CatalogApi>,
    pub identity: Arc<dyn IdentityApi>,
    pub allow_guests: bool,
}

impl AppState {
    /// Wires the default provider, catalog and identity from configuration.
    pub fn from_config(server: &ServerConfig, backend: BackendConfig) -> Result<Self> {
        let registry = Arc::new(InstanceRegistry::new(backend.elastic));
        let allow_guests = registry.is_guest_access_allowed();
        let client = ElasticClient::new(server.request_timeout_ms)?;

        let catalog: Arc<dyn CatalogApi> = match backend.catalog.base_url {
            Some(base_url) => {
                info!("Using catalog at {}", base_url);
                Arc::new(HttpCatalogClient::new(base_url, server.request_timeout_ms)?)
            }
            None => {
                info!(
                    "No catalog URL configured, serving {} static entities",
                    backend.catalog.entities.len()
                );
                Arc::new(StaticCatalog::new(backend.catalog.entities))
            }
        };

        info!(
            "Loaded {} Elastic instance(s), guest access {}",
            registry.instances().len(),
            if allow_guests { "allowed" } else { "disabled" }
        );

        Ok(Self {
            provider: Arc::new(DefaultElasticInfoProvider::new(registry, client)),
            catalog,
            identity: Arc::new(StaticTokenIdentity::new(&backend.auth.tokens)),
            allow_guests,
        })
    }
}

/// `/slos` and `/apm` behind the identity check when guests are not allowed;
/// `/metrics` and `/healthz` are always open.
pub fn router(state: AppState) -> Router {
    let mut api = Router::new()
        .route("/slos", get(handlers::get_slos))
        .route("/apm", get(handlers::get_apm));
    if !state.allow_guests {
        api = api.layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::require_identity,
        ));
    }

    Router::new()
        .merge(api)
        .route("/metrics", get(handlers::get_metrics))
        .route("/healthz", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin: HeaderValue = origin
        .parse()
        .map_err(|_| BackendError::Config(format!("Invalid CORS_ORIGIN '{}'", origin)))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]))
}

pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let mut app = router(state);
    if let Some(origin) = &config.cors_origin {
        app = app.layer(cors_layer(origin)?);
    }

    let addr = config.bind_address();
    info!("Starting elastic backend on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| BackendError::Internal(format!("Failed to bind to address: {}", e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| BackendError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
