//! Elasticsearch request bodies for APM service metrics.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;

use crate::{BackendError, Result};

pub const LATENCY_AGG: &str = "latency";
pub const FAILURE_RATE_AGG: &str = "failure_rate";
pub const TIMESERIES_AGG: &str = "timeseries";
pub const THROUGHPUT_AGG: &str = "throughput";
pub const GROUP_BY_AGG: &str = "group_by_service_name";

const LOOKBACK: &str = "now-1h";
const BUCKET_INTERVAL: &str = "60s";

/// One entry of `query.bool.filter`.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    Term { field: String, value: String },
    Range { field: String, gte: String, lt: String },
    /// Caller-supplied DSL, sent as is.
    Raw(Value),
}

impl FilterClause {
    pub fn term(field: &str, value: &str) -> Self {
        FilterClause::Term {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    /// Parses a raw DSL clause. Malformed JSON is an error, never dropped.
    pub fn raw(clause: &str) -> Result<Self> {
        serde_json::from_str(clause)
            .map(FilterClause::Raw)
            .map_err(BackendError::InvalidFilter)
    }
}

impl Serialize for FilterClause {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FilterClause::Term { field, value } => {
                let mut inner = BTreeMap::new();
                inner.insert(field.as_str(), value.as_str());
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("term", &inner)?;
                map.end()
            }
            FilterClause::Range { field, gte, lt } => {
                let mut bounds = BTreeMap::new();
                bounds.insert("gte", gte.as_str());
                bounds.insert("lt", lt.as_str());
                let mut inner = BTreeMap::new();
                inner.insert(field.as_str(), bounds);
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("range", &inner)?;
                map.end()
            }
            FilterClause::Raw(value) => value.serialize(serializer),
        }
    }
}

pub type Aggregations = BTreeMap<String, Aggregation>;

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Avg {
        field: String,
    },
    DateHistogram {
        field: String,
        fixed_interval: String,
        aggs: Aggregations,
    },
    Rate {
        unit: String,
    },
    Terms {
        field: String,
        aggs: Aggregations,
    },
}

#[derive(Serialize)]
struct FieldBody<'a> {
    field: &'a str,
}

#[derive(Serialize)]
struct HistogramBody<'a> {
    field: &'a str,
    fixed_interval: &'a str,
}

#[derive(Serialize)]
struct RateBody<'a> {
    unit: &'a str,
}

impl Serialize for Aggregation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            Aggregation::Avg { field } => {
                map.serialize_entry("avg", &FieldBody { field })?;
            }
            Aggregation::DateHistogram {
                field,
                fixed_interval,
                aggs,
            } => {
                map.serialize_entry(
                    "date_histogram",
                    &HistogramBody {
                        field,
                        fixed_interval,
                    },
                )?;
                map.serialize_entry("aggs", aggs)?;
            }
            Aggregation::Rate { unit } => {
                map.serialize_entry("rate", &RateBody { unit })?;
            }
            Aggregation::Terms { field, aggs } => {
                map.serialize_entry("terms", &FieldBody { field })?;
                map.serialize_entry("aggs", aggs)?;
            }
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoolFilter {
    pub filter: Vec<FilterClause>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub bool: BoolFilter,
}

/// `_search` body for APM service transaction metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApmRequest {
    pub track_total_hits: bool,
    pub size: u32,
    pub query: Query,
    pub aggs: Aggregations,
}

impl ApmRequest {
    pub fn filters(&self) -> &[FilterClause] {
        &self.query.bool.filter
    }
}

fn metric_aggregations() -> Aggregations {
    let mut throughput = Aggregations::new();
    throughput.insert(
        THROUGHPUT_AGG.to_string(),
        Aggregation::Rate {
            unit: "minute".to_string(),
        },
    );

    let mut aggs = Aggregations::new();
    aggs.insert(
        LATENCY_AGG.to_string(),
        Aggregation::Avg {
            field: "transaction.duration.summary".to_string(),
        },
    );
    aggs.insert(
        FAILURE_RATE_AGG.to_string(),
        Aggregation::Avg {
            field: "event.success_count".to_string(),
        },
    );
    aggs.insert(
        TIMESERIES_AGG.to_string(),
        Aggregation::DateHistogram {
            field: "@timestamp".to_string(),
            fixed_interval: BUCKET_INTERVAL.to_string(),
            aggs: throughput,
        },
    );
    aggs
}

/// Builds the latency / failure rate / throughput query over the last hour.
///
/// With `group_by` the metric aggregations are nested under a single `terms`
/// aggregation named [`GROUP_BY_AGG`]; without it they sit at the top level.
/// `raw_filter` is appended after the service name filter.
pub fn build_apm_query(
    service_name: Option<&str>,
    raw_filter: Option<&str>,
    group_by: Option<&str>,
) -> Result<ApmRequest> {
    let mut filter = vec![
        FilterClause::term("processor.event", "metric"),
        FilterClause::term("metricset.name", "service_transaction"),
        FilterClause::Range {
            field: "@timestamp".to_string(),
            gte: LOOKBACK.to_string(),
            lt: "now".to_string(),
        },
    ];

    if let Some(service_name) = service_name {
        filter.push(FilterClause::term("service.name", service_name));
    }
    if let Some(raw_filter) = raw_filter {
        filter.push(FilterClause::raw(raw_filter)?);
    }

    let aggs = match group_by {
        Some(field) => {
            let mut grouped = Aggregations::new();
            grouped.insert(
                GROUP_BY_AGG.to_string(),
                Aggregation::Terms {
                    field: field.to_string(),
                    aggs: metric_aggregations(),
                },
            );
            grouped
        }
        None => metric_aggregations(),
    };

    Ok(ApmRequest {
        track_total_hits: false,
        size: 0,
        query: Query {
            bool: BoolFilter { filter },
        },
        aggs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn keys(aggs: &Aggregations) -> Vec<&str> {
        aggs.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_single_service_shape() {
        let request = build_apm_query(Some("svc"), None, None).unwrap();

        assert_eq!(keys(&request.aggs), vec!["failure_rate", "latency", "timeseries"]);
        assert_eq!(request.filters().len(), 4);
        assert_eq!(
            request.filters().last(),
            Some(&FilterClause::term("service.name", "svc"))
        );
    }

    #[test]
    fn test_grouped_shape() {
        let request = build_apm_query(None, None, Some("service.name")).unwrap();

        assert_eq!(keys(&request.aggs), vec![GROUP_BY_AGG]);
        match &request.aggs[GROUP_BY_AGG] {
            Aggregation::Terms { field, aggs } => {
                assert_eq!(field, "service.name");
                assert_eq!(keys(aggs), vec!["failure_rate", "latency", "timeseries"]);
            }
            other => panic!("expected terms aggregation, got {:?}", other),
        }
        // Base filters only, no service name term.
        assert_eq!(request.filters().len(), 3);
    }

    #[test]
    fn test_raw_filter_follows_service_name() {
        let raw = r#"{"term": {"labels.env": "prod"}}"#;
        let request = build_apm_query(Some("svc"), Some(raw), None).unwrap();

        let filters = request.filters();
        assert_eq!(filters.len(), 5);
        assert_eq!(filters[3], FilterClause::term("service.name", "svc"));
        assert_eq!(
            filters[4],
            FilterClause::Raw(json!({"term": {"labels.env": "prod"}}))
        );
    }

    #[test]
    fn test_malformed_raw_filter_is_an_error() {
        let err = build_apm_query(Some("svc"), Some("{\"term\": "), None).unwrap_err();
        assert!(matches!(err, BackendError::InvalidFilter(_)));
    }

    #[test]
    fn test_serialized_body() {
        let request = build_apm_query(Some("svc"), None, None).unwrap();
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(
            body,
            json!({
                "track_total_hits": false,
                "size": 0,
                "query": {
                    "bool": {
                        "filter": [
                            { "term": { "processor.event": "metric" } },
                            { "term": { "metricset.name": "service_transaction" } },
                            { "range": { "@timestamp": { "gte": "now-1h", "lt": "now" } } },
                            { "term": { "service.name": "svc" } }
                        ]
                    }
                },
                "aggs": {
                    "latency": { "avg": { "field": "transaction.duration.summary" } },
                    "failure_rate": { "avg": { "field": "event.success_count" } },
                    "timeseries": {
                        "date_histogram": { "field": "@timestamp", "fixed_interval": "60s" },
                        "aggs": { "throughput": { "rate": { "unit": "minute" } } }
                    }
                }
            })
        );
    }

    #[test]
    fn test_serialized_grouped_body() {
        let request =
            build_apm_query(None, Some(r#"{"term":{"service.environment":"prod"}}"#), Some("service.name"))
                .unwrap();
        let body = serde_json::to_value(&request).unwrap();

        let group = &body["aggs"][GROUP_BY_AGG];
        assert_eq!(group["terms"], json!({ "field": "service.name" }));
        assert_eq!(
            group["aggs"]["timeseries"]["aggs"]["throughput"],
            json!({ "rate": { "unit": "minute" } })
        );
        assert!(body["aggs"].get("latency").is_none());
        assert_eq!(
            body["query"]["bool"]["filter"][3],
            json!({"term": {"service.environment": "prod"}})
        );
    }
}
