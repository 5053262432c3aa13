//! Entity annotations understood by the backend.
//!
//! Composite annotations pack a required value and an optional second value
//! into one string separated by `/`, e.g. `checkout/{"term":{"labels.env":"prod"}}`.
//! Because `/` is the separator, the second value must not contain one.

use thiserror::Error;

use crate::catalog::Entity;

/// Name of the configured Elastic instance to query.
pub const ELASTIC_INSTANCE_ANNOTATION: &str = "elastic/instance";
/// `sloId[/sloInstanceId]`
pub const KIBANA_SLO_ID_ANNOTATION: &str = "elastic/slo-id";
pub const KIBANA_SPACE_ANNOTATION: &str = "elastic/space";
/// KQL query selecting several SLOs.
pub const KIBANA_SLO_QUERY_ANNOTATION: &str = "elastic/slo-query";
/// `serviceName[/rawFilter]`
pub const ELASTICSEARCH_APM_SERVICE_NAME_ANNOTATION: &str = "elastic/apm-name";
/// `groupByField[/rawFilter]`
pub const ELASTICSEARCH_APM_QUERY_ANNOTATION: &str = "elastic/apm-query";

pub const DEFAULT_KIBANA_SPACE_NAME: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnnotationError {
    #[error("annotation value has an empty primary segment")]
    EmptyPrimary,

    #[error("annotation value has {0} '/'-separated segments, at most 2 are allowed")]
    TooManySegments(usize),
}

/// A `/`-separated annotation value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeAnnotation {
    pub primary: String,
    pub secondary: Option<String>,
}

pub fn parse_composite(value: &str) -> Result<CompositeAnnotation, AnnotationError> {
    let segments: Vec<&str> = value.split('/').collect();
    if segments.len() > 2 {
        return Err(AnnotationError::TooManySegments(segments.len()));
    }

    let primary = segments[0].trim();
    if primary.is_empty() {
        return Err(AnnotationError::EmptyPrimary);
    }

    let secondary = segments
        .get(1)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(CompositeAnnotation {
        primary: primary.to_string(),
        secondary,
    })
}

fn non_empty<'a>(entity: &'a Entity, key: &str) -> Option<&'a str> {
    entity.annotation(key).filter(|v| !v.trim().is_empty())
}

fn composite(entity: &Entity, key: &str) -> Result<Option<CompositeAnnotation>, AnnotationError> {
    non_empty(entity, key).map(parse_composite).transpose()
}

pub fn instance_name(entity: &Entity) -> Option<&str> {
    non_empty(entity, ELASTIC_INSTANCE_ANNOTATION)
}

/// Kibana space, `default` when the entity does not name one.
pub fn space(entity: &Entity) -> &str {
    non_empty(entity, KIBANA_SPACE_ANNOTATION).unwrap_or(DEFAULT_KIBANA_SPACE_NAME)
}

/// SLO id and optional SLO instance id.
pub fn slo_id(entity: &Entity) -> Result<Option<CompositeAnnotation>, AnnotationError> {
    composite(entity, KIBANA_SLO_ID_ANNOTATION)
}

pub fn slo_query(entity: &Entity) -> Option<&str> {
    non_empty(entity, KIBANA_SLO_QUERY_ANNOTATION)
}

/// APM service name and optional raw filter clause.
pub fn apm_name(entity: &Entity) -> Result<Option<CompositeAnnotation>, AnnotationError> {
    composite(entity, ELASTICSEARCH_APM_SERVICE_NAME_ANNOTATION)
}

/// APM group-by field and optional raw filter clause.
pub fn apm_query(entity: &Entity) -> Result<Option<CompositeAnnotation>, AnnotationError> {
    composite(entity, ELASTICSEARCH_APM_QUERY_ANNOTATION)
}
