use async_trait::async_trait;
use reqwest::{
    cookie::{CookieStore, Jar},
    Client,
};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::request::{ApiRequest, ApiResponse, REFRESH_PATH};
use crate::config::ClientConfig;
use crate::error::ClientError;

/// Sends one request and returns the raw answer. Never interprets the status.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError>;
}

/// [`Transport`] over reqwest.
///
/// With credentials enabled the client keeps a cookie jar, so the access and
/// refresh cookies set by the backend ride along on every later call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    jar: Option<Arc<Jar>>,
}

impl HttpTransport {
    /// Build a transport from config, seeding the jar with previously saved cookies.
    pub fn new(config: &ClientConfig, cookies: &[(String, String)]) -> Result<Self, ClientError> {
        let base_url = config.api_url.trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("Invalid API URL {}: {}", base_url, e)))?;

        let mut builder = Client::builder().timeout(config.request_timeout());
        let jar = if config.credentials {
            let jar = Arc::new(Jar::default());
            for (name, value) in cookies {
                jar.add_cookie_str(&format!("{}={}; Path=/", name, value), &parsed);
            }
            builder = builder.cookie_provider(jar.clone());
            Some(jar)
        } else {
            None
        };

        let client = builder.build().map_err(|e| ClientError::Transport {
            call: "client setup".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url,
            jar,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        let separator = if path.starts_with('/') { "" } else { "/" };
        let raw = format!("{}{}{}", self.base_url, separator, path);
        Url::parse(&raw)
            .map_err(|e| ClientError::InvalidRequest(format!("Failed to build URL for path {}: {}", path, e)))
    }

    /// Cookies currently held for the backend, sorted by name.
    ///
    /// The refresh endpoint is queried separately because its cookie is
    /// usually scoped to that path and would not show up for the base URL.
    pub fn cookies(&self) -> Vec<(String, String)> {
        let Some(jar) = &self.jar else {
            return vec![];
        };

        let mut cookies: Vec<(String, String)> = Vec::new();
        for path in ["/", REFRESH_PATH] {
            let Ok(url) = self.endpoint(path) else {
                continue;
            };
            let Some(header) = jar.cookies(&url) else {
                continue;
            };
            let Ok(header) = header.to_str() else {
                continue;
            };

            for segment in header.split(';') {
                let mut parts = segment.trim().splitn(2, '=');
                let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() || cookies.iter().any(|(existing, _)| existing == name) {
                    continue;
                }
                cookies.push((name.to_string(), value.trim().to_string()));
            }
        }

        cookies.sort_by(|a, b| a.0.cmp(&b.0));
        cookies
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let call = request.label();
        let mut builder = self
            .client
            .request(request.method.clone(), self.endpoint(&request.path)?);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| ClientError::Transport {
            call: call.clone(),
            message: e.to_string(),
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| ClientError::Transport {
            call: call.clone(),
            message: e.to_string(),
        })?;

        debug!(call = %call, status = status.as_u16(), "Backend responded");
        Ok(ApiResponse { status, body })
    }
}
