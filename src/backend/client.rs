use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::types::{ModuleRequest, ModuleResponse, Route};
use super::AnalysisBackend;
use crate::config::{BackendConfig, RequestConfig};
use crate::error::{BackendError, BackendResult};

/// Client for the external module analysis service
#[derive(Clone)]
pub struct AnalysisClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl AnalysisClient {
    /// Create a new analysis client
    pub fn new(config: &BackendConfig, request_config: RequestConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(BackendError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, route: &Route) -> String {
        let base = route
            .base_url
            .as_deref()
            .map(|b| b.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        format!("{}/v1/modules/{}/analyze", base, route.endpoint)
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        request: &ModuleRequest,
    ) -> BackendResult<ModuleResponse> {
        debug!(module = %request.module, url = %url, "Calling analysis module");

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    BackendError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let module_response: ModuleResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        if !module_response.success {
            return Err(BackendError::InvalidResponse {
                message: module_response
                    .error
                    .unwrap_or_else(|| "module reported failure".to_string()),
            });
        }

        Ok(module_response)
    }
}

#[async_trait]
impl AnalysisBackend for AnalysisClient {
    async fn analyze(&self, route: &Route, request: &ModuleRequest) -> BackendResult<ModuleResponse> {
        let url = self.url_for(route);
        let start = Instant::now();

        match self.execute_request(&url, request).await {
            Ok(response) => {
                info!(
                    module = %request.module,
                    latency_ms = start.elapsed().as_millis(),
                    "Analysis module call succeeded"
                );
                Ok(response)
            }
            Err(e) => {
                error!(
                    module = %request.module,
                    error = %e,
                    latency_ms = start.elapsed().as_millis(),
                    "Analysis module call failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AnalysisClient {
        let config = BackendConfig {
            api_key: "test_key".to_string(),
            base_url: "https://analysis.example.com/".to_string(),
            alternate_urls: Vec::new(),
        };
        AnalysisClient::new(&config, RequestConfig::default()).unwrap()
    }

    #[test]
    fn test_client_creation_trims_base_url() {
        assert_eq!(client().base_url(), "https://analysis.example.com");
    }

    #[test]
    fn test_url_for_routes() {
        let client = client();
        assert_eq!(
            client.url_for(&Route::primary("emotion-v1")),
            "https://analysis.example.com/v1/modules/emotion-v1/analyze"
        );
        assert_eq!(
            client.url_for(&Route::alternate("emotion-v1", "http://backup:9000/")),
            "http://backup:9000/v1/modules/emotion-v1/analyze"
        );
    }
}
