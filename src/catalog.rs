//! Catalog entity lookup.
//!
//! The backend only needs one thing from the catalog: the annotations of the
//! entity a request refers to. [`CatalogApi`] is the seam; the HTTP client
//! talks to a running catalog service, the static catalog serves entities
//! listed in the configuration file.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::elastic::client::endpoint_url;
use crate::{BackendError, Result};

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub metadata: EntityMetadata,
}

impl Entity {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            api_version: "backstage.io/v1alpha1".to_string(),
            kind: kind.to_string(),
            metadata: EntityMetadata {
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
                annotations: BTreeMap::new(),
            },
        }
    }

    pub fn with_annotations(mut self, annotations: &[(&str, &str)]) -> Self {
        for (key, value) in annotations {
            self.metadata
                .annotations
                .insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            kind: self.kind.clone(),
            namespace: self
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            name: self.metadata.name.clone(),
        }
    }
}

/// Parsed `kind:namespace/name` reference. The namespace may be omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl EntityRef {
    /// Refs compare case-insensitively.
    pub fn matches(&self, other: &EntityRef) -> bool {
        self.kind.eq_ignore_ascii_case(&other.kind)
            && self.namespace.eq_ignore_ascii_case(&other.namespace)
            && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl FromStr for EntityRef {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BackendError::InvalidInput(format!("Invalid entity ref, {}", s));

        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (namespace, name) = match rest.split_once('/') {
            Some((namespace, name)) => (namespace, name),
            None => (DEFAULT_NAMESPACE, rest),
        };

        if kind.is_empty() || namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }

        Ok(Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.kind.to_ascii_lowercase(),
            self.namespace.to_ascii_lowercase(),
            self.name
        )
    }
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Looks up an entity, forwarding the caller's token when there is one.
    async fn get_entity_by_ref(&self, entity_ref: &str, token: Option<&str>)
        -> Result<Option<Entity>>;
}

/// Client for the catalog REST API.
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| BackendError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogClient {
    async fn get_entity_by_ref(
        &self,
        entity_ref: &str,
        token: Option<&str>,
    ) -> Result<Option<Entity>> {
        let parsed: EntityRef = entity_ref.parse()?;
        let url = endpoint_url(
            &self.base_url,
            &[
                "entities",
                "by-name",
                parsed.kind.as_str(),
                parsed.namespace.as_str(),
                parsed.name.as_str(),
            ],
        )?;
        debug!(url = %url, "Fetching catalog entity");

        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(BackendError::Upstream(format!(
                "Catalog returned {} for {}",
                status, entity_ref
            ))),
        }
    }
}

/// Fixed set of entities, used when the backend runs without a catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entities: Vec<Entity>,
}

impl StaticCatalog {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl CatalogApi for StaticCatalog {
    async fn get_entity_by_ref(
        &self,
        entity_ref: &str,
        _token: Option<&str>,
    ) -> Result<Option<Entity>> {
        let wanted: EntityRef = entity_ref.parse()?;
        Ok(self
            .entities
            .iter()
            .find(|entity| entity.entity_ref().matches(&wanted))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_full_ref() {
        let parsed: EntityRef = "component:team-a/checkout".parse().unwrap();
        assert_eq!(parsed.kind, "component");
        assert_eq!(parsed.namespace, "team-a");
        assert_eq!(parsed.name, "checkout");
    }

    #[test]
    fn test_parse_ref_without_namespace() {
        let parsed: EntityRef = "system:backstage".parse().unwrap();
        assert_eq!(parsed.namespace, "default");
        assert_eq!(parsed.to_string(), "system:default/backstage");
    }

    #[test]
    fn test_parse_invalid_refs() {
        assert!("backstage".parse::<EntityRef>().is_err());
        assert!(":default/backstage".parse::<EntityRef>().is_err());
        assert!("system:default/".parse::<EntityRef>().is_err());
    }

    #[test]
    fn test_entity_ref_display_lowercases_kind() {
        let entity = Entity::new("System", "default", "backstage");
        assert_eq!(entity.entity_ref().to_string(), "system:default/backstage");
    }

    #[tokio::test]
    async fn test_static_catalog_lookup() {
        let catalog = StaticCatalog::new(vec![Entity::new("System", "default", "backstage")]);

        let found = catalog
            .get_entity_by_ref("system:default/backstage", None)
            .await
            .unwrap();
        assert!(found.is_some());

        let missing = catalog
            .get_entity_by_ref("system:default/other", None)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_http_catalog_forwards_token() {
        let server = MockServer::start().await;
        let entity = Entity::new("Component", "default", "checkout")
            .with_annotations(&[("elastic/instance", "default")]);

        Mock::given(method("GET"))
            .and(path("/api/catalog/entities/by-name/component/default/checkout"))
            .and(header("Authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&entity))
            .mount(&server)
            .await;

        let client =
            HttpCatalogClient::new(format!("{}/api/catalog/", server.uri()), 5_000).unwrap();
        let found = client
            .get_entity_by_ref("component:default/checkout", Some("user-token"))
            .await
            .unwrap();

        assert_eq!(found, Some(entity));
    }

    #[tokio::test]
    async fn test_http_catalog_escapes_ref_parts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entities/by-name/component/default/checkout%3Fadmin=1%23x"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpCatalogClient::new(server.uri(), 5_000).unwrap();
        let found = client
            .get_entity_by_ref("component:default/checkout?admin=1#x", None)
            .await
            .unwrap();

        assert!(found.is_none());
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].url.query(), None);
    }

    #[tokio::test]
    async fn test_http_catalog_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpCatalogClient::new(server.uri(), 5_000).unwrap();
        let found = client
            .get_entity_by_ref("component:default/ghost", None)
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
