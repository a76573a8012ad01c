//! Prometheus HTTP API client

use crate::{AdapterError, AdapterResult, HealthStatus};
use async_trait::async_trait;
use promctx_core::{MonitoringStore, PrometheusConfig, Result as CoreResult, Series};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};
use url::Url;

const SERVICE: &str = "prometheus";

/// Envelope of every Prometheus API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataEntry {
    #[serde(default)]
    help: String,
}

#[derive(Debug, Deserialize)]
struct VectorData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    metric: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: Client,
    base_url: Url,
    auth: Option<(String, String)>,
}

impl PrometheusClient {
    pub fn new(config: &PrometheusConfig) -> AdapterResult<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| AdapterError::InvalidEndpoint(format!("{}: {}", config.url, e)))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AdapterError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            auth: config
                .basic_auth()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> AdapterResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}{}", base, path))
            .map_err(|e| AdapterError::InvalidEndpoint(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> AdapterResult<T> {
        let url = self.url(path)?;
        debug!("Sending GET request to {}", url);

        let mut request = self.client.get(url).query(query);
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::RequestFailed(e.to_string()))?;

        // Prometheus reports query errors with a JSON body and a 4xx/5xx status
        let envelope: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(AdapterError::HttpStatus {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(e) => return Err(AdapterError::SerializationError(e.to_string())),
        };

        if envelope.status != "success" {
            return Err(AdapterError::Api(format!(
                "status {}: {}",
                envelope.status,
                envelope.error.unwrap_or_default()
            )));
        }
        envelope
            .data
            .ok_or_else(|| AdapterError::InvalidResponse("response has no data".to_string()))
    }

    pub async fn health_check(&self) -> HealthStatus {
        let url = match self.url("/-/healthy") {
            Ok(url) => url,
            Err(e) => return HealthStatus::unhealthy(e.to_string()),
        };
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                HealthStatus::healthy("Prometheus is operational")
            }
            Ok(response) => HealthStatus::unhealthy(format!("Status: {}", response.status())),
            Err(e) => HealthStatus::unhealthy(format!("Unreachable: {}", e)),
        }
    }
}

#[async_trait]
impl MonitoringStore for PrometheusClient {
    #[instrument(skip(self))]
    async fn list_metric_names(&self) -> CoreResult<Vec<String>> {
        self.get("/api/v1/label/__name__/values", &[])
            .await
            .map_err(|e| e.into_core(SERVICE))
    }

    #[instrument(skip(self))]
    async fn list_label_names(&self) -> CoreResult<Vec<String>> {
        self.get("/api/v1/labels", &[])
            .await
            .map_err(|e| e.into_core(SERVICE))
    }

    #[instrument(skip(self))]
    async fn metric_descriptions(&self) -> CoreResult<BTreeMap<String, String>> {
        let metadata: BTreeMap<String, Vec<MetadataEntry>> = self
            .get("/api/v1/metadata", &[])
            .await
            .map_err(|e| e.into_core(SERVICE))?;

        Ok(metadata
            .into_iter()
            .filter_map(|(metric, entries)| {
                entries.into_iter().next().map(|entry| (metric, entry.help))
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn query_label_combinations(&self, selector: &str) -> CoreResult<Vec<Series>> {
        let data: VectorData = self
            .get("/api/v1/query", &[("query", selector)])
            .await
            .map_err(|e| e.into_core(SERVICE))?;

        Ok(data
            .result
            .into_iter()
            .map(|sample| Series::new(sample.metric))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> PrometheusClient {
        PrometheusClient::new(&PrometheusConfig::new(server.url())).unwrap()
    }

    #[tokio::test]
    async fn test_list_metric_names() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/label/__name__/values")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"success","data":["up","node_load1"]}"#)
            .create_async()
            .await;

        let names = client(&server).list_metric_names().await.unwrap();

        assert_eq!(names, vec!["up", "node_load1"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_basic_auth_is_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/labels")
            .match_header("authorization", "Basic YWRtaW46c2VjcmV0")
            .with_status(200)
            .with_body(r#"{"status":"success","data":["job"]}"#)
            .create_async()
            .await;

        let config = PrometheusConfig::new(server.url()).with_basic_auth("admin", "secret");
        let labels = PrometheusClient::new(&config)
            .unwrap()
            .list_label_names()
            .await
            .unwrap();

        assert_eq!(labels, vec!["job"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_metadata_takes_first_help_text() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/metadata")
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{
                    "up":[{"type":"gauge","help":"Target is up","unit":""},{"type":"gauge","help":"other","unit":""}],
                    "empty":[]
                }}"#,
            )
            .create_async()
            .await;

        let descriptions = client(&server).metric_descriptions().await.unwrap();

        assert_eq!(descriptions.len(), 1);
        assert_eq!(descriptions["up"], "Target is up");
    }

    #[tokio::test]
    async fn test_query_label_combinations() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                r#"{__name__=~"up"}"#.into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[
                    {"metric":{"__name__":"up","job":"node"},"value":[1700000000,"1"]}
                ]}}"#,
            )
            .create_async()
            .await;

        let series = client(&server)
            .query_label_combinations(r#"{__name__=~"up"}"#)
            .await
            .unwrap();

        assert_eq!(series.len(), 1);
        assert_eq!(series[0].metric_name(), Some("up"));
        assert_eq!(series[0].labels["job"], "node");
    }

    #[tokio::test]
    async fn test_error_status_is_external_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .query_label_combinations("{")
            .await
            .unwrap_err();

        assert!(err.is_external());
        assert!(err.to_string().contains("parse error"));
    }
}
