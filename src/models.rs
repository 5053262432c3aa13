use serde::{Deserialize, Deserializer, Serialize};

/// Envelope returned by every lookup: the Kibana URL callers can link to plus
/// the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElasticResponse<T> {
    pub base_url: String,
    pub res: T,
}

pub type SloResponse = ElasticResponse<SloProps>;
pub type SlosResponse = ElasticResponse<SlosProps>;
pub type ApmStatsResponse = ElasticResponse<ApmStats>;
pub type ApmMultiStatsResponse = ElasticResponse<GroupedApmStats>;

// SLOs, as returned by the Kibana observability API. Fields this crate does
// not model are kept in `extra` and forwarded unchanged.

/// Catch-all for fields not declared on a Kibana type.
pub type ExtraFields = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SloProps {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub indicator: Indicator,
    pub budgeting_method: String,
    pub time_window: TimeWindow,
    pub objective: Objective,
    #[serde(default)]
    pub tags: Vec<String>,
    // Everything below varies between Kibana versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// A single field name or a list of them, depending on the Kibana version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    #[serde(rename = "type")]
    pub kind: String,
    /// Shape depends on the indicator type, so it is passed through untouched.
    pub params: serde_json::Value,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub duration: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Objective {
    pub target: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeslice_target: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeslice_window: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_delay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub sli_value: f64,
    pub error_budget: ErrorBudget,
    pub status: String,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBudget {
    pub initial: f64,
    pub consumed: f64,
    pub remaining: f64,
    pub is_estimated: bool,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlosProps {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub results: Vec<SloProps>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

// APM aggregation results, as returned by Elasticsearch.

/// Single-value metric aggregation result. `value` is null when no document
/// matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateBucket {
    #[serde(default)]
    pub key_as_string: Option<String>,
    #[serde(default)]
    pub key: i64,
    #[serde(default)]
    pub doc_count: u64,
    pub throughput: MetricValue,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Timeseries {
    #[serde(default)]
    pub buckets: Vec<RateBucket>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApmStatsRoot {
    pub aggregations: RawApmStats,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawApmStats {
    #[serde(default)]
    pub failure_rate: MetricValue,
    #[serde(default)]
    pub latency: MetricValue,
    #[serde(default)]
    pub timeseries: Option<Timeseries>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApmMultiStatsRoot {
    pub aggregations: RawGroupedApmStats,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawGroupedApmStats {
    pub group_by_service_name: RawGroupBy,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawGroupBy {
    #[serde(default)]
    pub doc_count_error_upper_bound: u64,
    #[serde(default)]
    pub sum_other_doc_count: u64,
    #[serde(default)]
    pub buckets: Vec<RawServiceBucket>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawServiceBucket {
    #[serde(deserialize_with = "bucket_key")]
    pub key: String,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(default)]
    pub failure_rate: MetricValue,
    #[serde(default)]
    pub latency: MetricValue,
    #[serde(default)]
    pub timeseries: Option<Timeseries>,
}

/// Terms buckets on numeric or boolean fields have non-string keys.
fn bucket_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(key) => Ok(key),
        other => Ok(other.to_string()),
    }
}

// Summarized APM stats handed to callers. These carry no time series.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApmStats {
    pub failure_rate: MetricValue,
    pub throughput: f64,
    pub latency: MetricValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApmServiceBucket {
    pub key: String,
    pub doc_count: u64,
    pub failure_rate: MetricValue,
    pub throughput: f64,
    pub latency: MetricValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApmGroupBy {
    pub doc_count_error_upper_bound: u64,
    pub sum_other_doc_count: u64,
    pub buckets: Vec<ApmServiceBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedApmStats {
    pub group_by_service_name: ApmGroupBy,
}
