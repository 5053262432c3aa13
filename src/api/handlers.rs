use axum::{
    extract::{rejection::QueryRejection, Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{debug, warn};

use super::AppState;
use crate::{
    annotations::{self, AnnotationError},
    catalog::Entity,
    elastic::{ApmMultiStatsRequest, ApmStatsRequest, SloRequest, SlosRequest},
    identity::bearer_token,
    metrics::{self, RequestTimer},
    BackendError, Result,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SloParams {
    pub slo_type: Option<String>,
    pub string_entity_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApmParams {
    pub apm_type: Option<String>,
    pub string_entity_ref: Option<String>,
}

/// Malformed query strings get the same JSON error body as every other 400.
fn query_params<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| BackendError::InvalidInput(rejection.body_text()))
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn authorization_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    bearer_token(header).map(str::to_owned)
}

fn invalid_annotation(key: &str, err: AnnotationError) -> BackendError {
    BackendError::InvalidInput(format!("Invalid {} annotation: {}", key, err))
}

/// Entity plus the annotations every endpoint needs.
struct EntityContext {
    entity: Entity,
    instance_name: String,
    space: String,
}

async fn resolve_entity(
    state: &AppState,
    headers: &HeaderMap,
    entity_ref: &str,
) -> Result<EntityContext> {
    let token = authorization_token(headers);
    let entity = state
        .catalog
        .get_entity_by_ref(entity_ref, token.as_deref())
        .await?
        .ok_or_else(|| BackendError::InvalidInput(format!("Entity ref missing, {}", entity_ref)))?;

    let space = annotations::space(&entity).to_string();
    let instance_name = annotations::instance_name(&entity)
        .ok_or_else(|| {
            BackendError::InvalidInput("instanceName is missing from annotations.".to_string())
        })?
        .to_string();

    Ok(EntityContext {
        entity,
        instance_name,
        space,
    })
}

pub async fn get_slos(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: std::result::Result<Query<SloParams>, QueryRejection>,
) -> Result<Response> {
    let _timer = RequestTimer::new("slos");
    let params = query_params(query)?;

    let (Some(slo_type), Some(entity_ref)) =
        (present(params.slo_type), present(params.string_entity_ref))
    else {
        return Err(BackendError::InvalidInput(
            "sloType and stringEntityRef must be provided as a query parameter.".to_string(),
        ));
    };

    let ctx = resolve_entity(&state, &headers, &entity_ref).await?;

    match slo_type.as_str() {
        "multi" => {
            let slo_query = annotations::slo_query(&ctx.entity)
                .ok_or_else(|| {
                    BackendError::InvalidInput("sloQuery missing from annotations.".to_string())
                })?
                .to_string();
            debug!(
                "Retrieving SLO for Query: {} on Kibana instance name {}.",
                slo_query, ctx.instance_name
            );

            let res = state
                .provider
                .get_slos(SlosRequest {
                    slo_query,
                    instance_name: ctx.instance_name,
                    space: ctx.space,
                })
                .await?;
            Ok(Json(res).into_response())
        }
        "single" => {
            let slo = annotations::slo_id(&ctx.entity)
                .map_err(|e| invalid_annotation(annotations::KIBANA_SLO_ID_ANNOTATION, e))?
                .ok_or_else(|| {
                    BackendError::InvalidInput("sloId is missing from annotations.".to_string())
                })?;
            match &slo.secondary {
                Some(slo_instance_id) => debug!(
                    "Retrieving SLO for ID: {} and instance ID: {} on Kibana instance name {}.",
                    slo.primary, slo_instance_id, ctx.instance_name
                ),
                None => debug!(
                    "Retrieving SLO for ID: {} on Kibana instance name {}.",
                    slo.primary, ctx.instance_name
                ),
            }

            let res = state
                .provider
                .get_slo(SloRequest {
                    slo_id: slo.primary,
                    instance_name: ctx.instance_name,
                    space: ctx.space,
                    slo_instance_id: slo.secondary,
                })
                .await?;
            Ok(Json(res).into_response())
        }
        _ => Err(BackendError::InvalidInput(
            "Unsupported or missing SLO Type in /slos endpoint.".to_string(),
        )),
    }
}

pub async fn get_apm(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: std::result::Result<Query<ApmParams>, QueryRejection>,
) -> Result<Response> {
    let _timer = RequestTimer::new("apm");
    let params = query_params(query)?;

    let (Some(apm_type), Some(entity_ref)) =
        (present(params.apm_type), present(params.string_entity_ref))
    else {
        return Err(BackendError::InvalidInput(
            "apmType and stringEntityRef must be provided as a query parameter.".to_string(),
        ));
    };

    let ctx = resolve_entity(&state, &headers, &entity_ref).await?;

    match apm_type.as_str() {
        "multi" => {
            let query = annotations::apm_query(&ctx.entity)
                .map_err(|e| {
                    invalid_annotation(annotations::ELASTICSEARCH_APM_QUERY_ANNOTATION, e)
                })?
                .ok_or_else(|| {
                    BackendError::InvalidInput("groupBy is missing from entity.".to_string())
                })?;
            match &query.secondary {
                Some(dsl_query) => debug!(
                    "Retrieving APM data grouped by: {} and query: {} on Elasticsearch instance name {}.",
                    query.primary, dsl_query, ctx.instance_name
                ),
                None => debug!(
                    "Retrieving APM data grouped by: {} on Elasticsearch instance name {}.",
                    query.primary, ctx.instance_name
                ),
            }

            let res = state
                .provider
                .get_apm_multi_stats(ApmMultiStatsRequest {
                    group_by: query.primary,
                    instance_name: ctx.instance_name,
                    space: ctx.space,
                    dsl_query: query.secondary,
                })
                .await?;
            Ok(Json(res).into_response())
        }
        "single" => {
            let name = annotations::apm_name(&ctx.entity)
                .map_err(|e| {
                    invalid_annotation(annotations::ELASTICSEARCH_APM_SERVICE_NAME_ANNOTATION, e)
                })?
                .ok_or_else(|| {
                    BackendError::InvalidInput("serviceName is missing from entity.".to_string())
                })?;
            match &name.secondary {
                Some(dsl_query) => debug!(
                    "Retrieving APM data for service name: {} and query: {} on Elasticsearch instance name {}.",
                    name.primary, dsl_query, ctx.instance_name
                ),
                None => debug!(
                    "Retrieving APM data for service name: {} on Elasticsearch instance name {}.",
                    name.primary, ctx.instance_name
                ),
            }

            let res = state
                .provider
                .get_apm_stats(ApmStatsRequest {
                    service_name: name.primary,
                    instance_name: ctx.instance_name,
                    space: ctx.space,
                    dsl_query: name.secondary,
                })
                .await?;
            Ok(Json(res).into_response())
        }
        _ => Err(BackendError::InvalidInput(
            "Unsupported or missing APM Type in /apm endpoint.".to_string(),
        )),
    }
}

pub async fn get_metrics() -> Result<String> {
    metrics::render()
}

pub async fn health() -> &'static str {
    "ok"
}

/// Rejects requests without a known bearer token. Only installed when guest
/// access is disabled.
pub async fn require_identity(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let token = authorization_token(request.headers());
    if state.identity.get_identity(token.as_deref()).await.is_none() {
        warn!(path = %request.uri().path(), "Rejected request without a valid token");
        return Err(BackendError::Authentication(
            "Invalid or missing bearer token".to_string(),
        ));
    }
    Ok(next.run(request).await)
}
