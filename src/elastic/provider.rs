//! SLO and APM lookups against a configured Elastic instance.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::client::ElasticClient;
use super::query::build_apm_query;
use super::summary::{summarize_grouped, summarize_single};
use crate::config::{InstanceConfig, InstanceRegistry};
use crate::models::{
    ApmMultiStatsResponse, ApmMultiStatsRoot, ApmStatsResponse, ApmStatsRoot, ElasticResponse,
    SloProps, SloResponse, SlosProps, SlosResponse,
};
use crate::Result;

/// Search endpoint over the index pattern holding APM service metrics.
pub const APM_SEARCH_PATH: &[&str] = &["metrics-apm*", "_search"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SloRequest {
    pub slo_id: String,
    pub instance_name: String,
    pub space: String,
    /// Value of the SLO's partition field, for SLOs grouped by a field.
    pub slo_instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlosRequest {
    /// KQL query selecting the SLOs.
    pub slo_query: String,
    pub instance_name: String,
    pub space: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApmStatsRequest {
    pub service_name: String,
    pub instance_name: String,
    pub space: String,
    /// Extra filter clause in Elasticsearch DSL.
    pub dsl_query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApmMultiStatsRequest {
    /// Field the stats are pivoted on, e.g. `service.name`.
    pub group_by: String,
    pub instance_name: String,
    pub space: String,
    pub dsl_query: Option<String>,
}

/// Retrieves observability data from an Elastic instance.
///
/// Every lookup returns `Ok(None)` when the instance lacks the needed
/// Kibana/Elasticsearch section or the upstream answered with anything other
/// than 200. An unknown instance name is an error.
#[async_trait]
pub trait ElasticInfoProvider: Send + Sync {
    async fn get_slo(&self, request: SloRequest) -> Result<Option<SloResponse>>;

    async fn get_slos(&self, request: SlosRequest) -> Result<Option<SlosResponse>>;

    /// Average latency, throughput and failure rate of one APM service.
    async fn get_apm_stats(&self, request: ApmStatsRequest) -> Result<Option<ApmStatsResponse>>;

    /// The same stats, one bucket per value of `group_by`.
    async fn get_apm_multi_stats(
        &self,
        request: ApmMultiStatsRequest,
    ) -> Result<Option<ApmMultiStatsResponse>>;
}

pub struct DefaultElasticInfoProvider {
    registry: Arc<InstanceRegistry>,
    client: ElasticClient,
}

impl DefaultElasticInfoProvider {
    pub fn new(registry: Arc<InstanceRegistry>, client: ElasticClient) -> Self {
        Self { registry, client }
    }

    /// Kibana APM app link for the instance, empty without Kibana.
    fn apm_app_url(instance: &InstanceConfig, space: &str) -> String {
        instance
            .kibana
            .as_ref()
            .map(|kibana| {
                format!(
                    "{}/s/{}/app/services/",
                    kibana.base_url.trim_end_matches('/'),
                    space
                )
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ElasticInfoProvider for DefaultElasticInfoProvider {
    async fn get_slo(&self, request: SloRequest) -> Result<Option<SloResponse>> {
        let instance = self.registry.resolve(&request.instance_name)?;
        let Some(kibana) = instance.kibana.as_ref() else {
            debug!(instance = %instance.name, "No Kibana configured for instance");
            return Ok(None);
        };

        let path = [
            "s",
            request.space.as_str(),
            "api",
            "observability",
            "slos",
            request.slo_id.as_str(),
        ];
        let query = request
            .slo_instance_id
            .as_deref()
            .map(|id| [("instanceId", id)]);

        let res = self
            .client
            .call_kibana::<SloProps>(
                &kibana.base_url,
                &path,
                &kibana.api_key,
                query.as_ref().map(|q| &q[..]),
            )
            .await?
            .into_option();

        Ok(res.map(|res| ElasticResponse {
            base_url: kibana.base_url.clone(),
            res,
        }))
    }

    async fn get_slos(&self, request: SlosRequest) -> Result<Option<SlosResponse>> {
        let instance = self.registry.resolve(&request.instance_name)?;
        let Some(kibana) = instance.kibana.as_ref() else {
            debug!(instance = %instance.name, "No Kibana configured for instance");
            return Ok(None);
        };

        let path = ["s", request.space.as_str(), "api", "observability", "slos"];
        let res = self
            .client
            .call_kibana::<SlosProps>(
                &kibana.base_url,
                &path,
                &kibana.api_key,
                Some(&[("kqlQuery", request.slo_query.as_str())][..]),
            )
            .await?
            .into_option();

        Ok(res.map(|res| ElasticResponse {
            base_url: kibana.base_url.clone(),
            res,
        }))
    }

    async fn get_apm_stats(&self, request: ApmStatsRequest) -> Result<Option<ApmStatsResponse>> {
        let instance = self.registry.resolve(&request.instance_name)?;
        let Some(elasticsearch) = instance.elasticsearch.as_ref() else {
            debug!(instance = %instance.name, "No Elasticsearch configured for instance");
            return Ok(None);
        };

        let body = build_apm_query(
            Some(&request.service_name),
            request.dsl_query.as_deref(),
            None,
        )?;
        let root = self
            .client
            .call_elasticsearch::<ApmStatsRoot, _>(
                &elasticsearch.base_url,
                APM_SEARCH_PATH,
                &elasticsearch.api_key,
                &body,
            )
            .await?
            .into_option();

        Ok(root.map(|root| ElasticResponse {
            base_url: Self::apm_app_url(instance, &request.space),
            res: summarize_single(root.aggregations),
        }))
    }

    async fn get_apm_multi_stats(
        &self,
        request: ApmMultiStatsRequest,
    ) -> Result<Option<ApmMultiStatsResponse>> {
        let instance = self.registry.resolve(&request.instance_name)?;
        let Some(elasticsearch) = instance.elasticsearch.as_ref() else {
            debug!(instance = %instance.name, "No Elasticsearch configured for instance");
            return Ok(None);
        };

        let body = build_apm_query(
            None,
            request.dsl_query.as_deref(),
            Some(&request.group_by),
        )?;
        let root = self
            .client
            .call_elasticsearch::<ApmMultiStatsRoot, _>(
                &elasticsearch.base_url,
                APM_SEARCH_PATH,
                &elasticsearch.api_key,
                &body,
            )
            .await?
            .into_option();

        Ok(root.map(|root| ElasticResponse {
            base_url: Self::apm_app_url(instance, &request.space),
            res: summarize_grouped(root.aggregations),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ElasticConfig, InstanceCredentials};
    use crate::BackendError;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> DefaultElasticInfoProvider {
        let registry = InstanceRegistry::new(ElasticConfig {
            allow_guests: None,
            instances: vec![
                InstanceConfig {
                    name: "default".into(),
                    kibana: Some(InstanceCredentials::new(server.uri(), "kibana-key")),
                    elasticsearch: Some(InstanceCredentials::new(server.uri(), "es-key")),
                },
                InstanceConfig {
                    name: "es-only".into(),
                    kibana: None,
                    elasticsearch: Some(InstanceCredentials::new(server.uri(), "es-key")),
                },
            ],
        });
        DefaultElasticInfoProvider::new(Arc::new(registry), ElasticClient::new(5_000).unwrap())
    }

    fn apm_request(instance: &str) -> ApmStatsRequest {
        ApmStatsRequest {
            service_name: "testservice".into(),
            instance_name: instance.into(),
            space: "default".into(),
            dsl_query: None,
        }
    }

    fn search_response(aggregations: serde_json::Value) -> serde_json::Value {
        json!({
            "took": 12,
            "timed_out": false,
            "terminated_early": false,
            "_shards": { "total": 1, "successful": 1, "skipped": 0, "failed": 0 },
            "hits": { "max_score": null, "hits": [] },
            "aggregations": aggregations
        })
    }

    fn slo_body(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": "checkout availability",
            "description": "",
            "indicator": { "type": "sli.apm.transactionErrorRate", "params": { "service": "checkout" } },
            "budgetingMethod": "occurrences",
            "timeWindow": { "duration": "30d", "type": "rolling" },
            "objective": { "target": 0.995 },
            "tags": [],
            "settings": { "syncDelay": "1m", "frequency": "1m" },
            "revision": 2,
            "enabled": true,
            "createdAt": "2023-09-26T14:52:57.861Z",
            "updatedAt": "2023-09-27T14:52:57.861Z",
            "summary": {
                "sliValue": 0.999,
                "errorBudget": { "initial": 0.005, "consumed": 0.2, "remaining": 0.8, "isEstimated": false },
                "status": "HEALTHY"
            }
        })
    }

    #[tokio::test]
    async fn test_apm_stats_are_summarized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/metrics-apm*/_search"))
            .and(body_partial_json(json!({ "size": 0, "track_total_hits": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_response(json!({
                "failure_rate": { "value": 0.97 },
                "latency": { "value": 1532.4 },
                "timeseries": { "buckets": [
                    { "key_as_string": "2023-10-05T10:00:00.000Z", "key": 1696500000000i64, "doc_count": 4, "throughput": { "value": 167.0 } },
                    { "key_as_string": "2023-10-05T10:01:00.000Z", "key": 1696500060000i64, "doc_count": 4, "throughput": { "value": 169.0 } }
                ]}
            }))))
            .mount(&server)
            .await;

        let response = provider(&server)
            .get_apm_stats(apm_request("default"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.res.throughput, 168.0);
        assert_eq!(response.res.latency.value, Some(1532.4));
        assert_eq!(
            response.base_url,
            format!("{}/s/default/app/services/", server.uri())
        );
    }

    #[tokio::test]
    async fn test_apm_link_is_empty_without_kibana() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_response(json!({
                "failure_rate": { "value": null },
                "latency": { "value": null },
                "timeseries": { "buckets": [] }
            }))))
            .mount(&server)
            .await;

        let response = provider(&server)
            .get_apm_stats(apm_request("es-only"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.base_url, "");
        assert_eq!(response.res.throughput, 0.0);
    }

    #[tokio::test]
    async fn test_apm_multi_stats_are_grouped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/metrics-apm*/_search"))
            .and(body_partial_json(json!({
                "aggs": { "group_by_service_name": { "terms": { "field": "service.name" } } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_response(json!({
                "group_by_service_name": {
                    "doc_count_error_upper_bound": 0,
                    "sum_other_doc_count": 0,
                    "buckets": [
                        {
                            "key": "frontend-node",
                            "doc_count": 12,
                            "failure_rate": { "value": 1.0 },
                            "latency": { "value": 2500.0 },
                            "timeseries": { "buckets": [
                                { "key": 1, "doc_count": 1, "throughput": { "value": 170.0 } },
                                { "key": 2, "doc_count": 1, "throughput": { "value": 180.0 } }
                            ]}
                        }
                    ]
                }
            }))))
            .mount(&server)
            .await;

        let response = provider(&server)
            .get_apm_multi_stats(ApmMultiStatsRequest {
                group_by: "service.name".into(),
                instance_name: "default".into(),
                space: "ops".into(),
                dsl_query: Some(r#"{"term": {"service.environment": "prod"}}"#.into()),
            })
            .await
            .unwrap()
            .unwrap();

        let buckets = &response.res.group_by_service_name.buckets;
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].key, "frontend-node");
        assert_eq!(buckets[0].throughput, 175.0);
        assert!(response.base_url.ends_with("/s/ops/app/services/"));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let response = provider(&server)
            .get_apm_stats(apm_request("default"))
            .await
            .unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_unknown_instance_is_an_error() {
        let server = MockServer::start().await;
        let err = provider(&server)
            .get_apm_stats(apm_request("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InstanceNotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_slo_without_kibana_is_absent() {
        let server = MockServer::start().await;
        let response = provider(&server)
            .get_slo(SloRequest {
                slo_id: "abc".into(),
                instance_name: "es-only".into(),
                space: "default".into(),
                slo_instance_id: None,
            })
            .await
            .unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_get_slo_with_instance_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/s/ops/api/observability/slos/sloidtest"))
            .and(query_param("instanceId", "host-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(slo_body("sloidtest")))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server)
            .get_slo(SloRequest {
                slo_id: "sloidtest".into(),
                instance_name: "default".into(),
                space: "ops".into(),
                slo_instance_id: Some("host-1".into()),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.base_url, server.uri());
        assert_eq!(response.res.id, "sloidtest");
        assert_eq!(
            response.res.summary.map(|summary| summary.status),
            Some("HEALTHY".to_string())
        );
    }

    #[tokio::test]
    async fn test_annotation_values_stay_inside_their_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/s/..%2F..%2Fapi%2Fsecurity/api/observability/slos/abc%3Fx=1%23frag",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(slo_body("abc?x=1#frag")))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server)
            .get_slo(SloRequest {
                slo_id: "abc?x=1#frag".into(),
                instance_name: "default".into(),
                space: "../../api/security".into(),
                slo_instance_id: None,
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.res.id, "abc?x=1#frag");
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.query(), None);
    }

    #[tokio::test]
    async fn test_dot_segment_space_is_rejected() {
        let server = MockServer::start().await;
        let err = provider(&server)
            .get_slos(SlosRequest {
                slo_query: "slo.name:checkout*".into(),
                instance_name: "default".into(),
                space: "..".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::InvalidInput(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_slos_by_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/s/default/api/observability/slos"))
            .and(query_param("kqlQuery", "slo.name:checkout*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 1,
                "perPage": 25,
                "total": 2,
                "results": [slo_body("a"), slo_body("b")]
            })))
            .mount(&server)
            .await;

        let response = provider(&server)
            .get_slos(SlosRequest {
                slo_query: "slo.name:checkout*".into(),
                instance_name: "default".into(),
                space: "default".into(),
            })
            .await
            .unwrap()
            .unwrap();

        let ids: Vec<&str> = response.res.results.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(response.res.per_page, 25);
    }
}
