//! Signed HTTP transport for the AWS Query and JSON protocols
//!
//! One request per call: no retries, no backoff. A stuck request is bounded
//! only by the HTTP client's own timeouts.

use crate::aws::error::ApiError;
use crate::aws::profile::{AwsProfile, Credentials};
use crate::aws::signing::{self, Signer};
use chrono::Utc;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("vpc-vpn-pivot/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct AwsClient {
    http: Client,
    credentials: Credentials,
    region: String,
    endpoint_url: Option<String>,
}

impl AwsClient {
    /// `endpoint_url` replaces every service endpoint (e.g. LocalStack).
    pub fn new(profile: &AwsProfile, endpoint_url: Option<String>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ApiError::transport("CreateHttpClient", e))?;

        Ok(Self {
            http,
            credentials: profile.credentials.clone(),
            region: profile.region.clone(),
            endpoint_url,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn endpoint(&self, service: &str) -> String {
        if let Some(url) = &self.endpoint_url {
            return url.clone();
        }
        service_endpoint(service, &self.region)
    }

    /// Query protocol call (EC2, STS): form-encoded POST, XML response body.
    pub async fn query(
        &self,
        service: &str,
        action: &str,
        version: &str,
        mut params: BTreeMap<String, String>,
    ) -> Result<String, ApiError> {
        params.insert("Action".to_string(), action.to_string());
        params.insert("Version".to_string(), version.to_string());
        let body = signing::form_encode(&params);

        self.send(
            service,
            action,
            "application/x-www-form-urlencoded; charset=utf-8",
            None,
            body,
        )
        .await
    }

    /// JSON 1.1 protocol call (ACM): `target` is e.g. `CertificateManager.ImportCertificate`.
    pub async fn json(
        &self,
        service: &str,
        target: &str,
        payload: &serde_json::Value,
    ) -> Result<String, ApiError> {
        let action = target.rsplit('.').next().unwrap_or(target);
        self.send(
            service,
            action,
            "application/x-amz-json-1.1",
            Some(target),
            payload.to_string(),
        )
        .await
    }

    async fn send(
        &self,
        service: &str,
        action: &str,
        content_type: &str,
        target: Option<&str>,
        body: String,
    ) -> Result<String, ApiError> {
        let endpoint = self.endpoint(service);
        let url = url::Url::parse(&endpoint).map_err(|e| ApiError::transport(action, e))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(ApiError::transport(action, "endpoint has no host")),
        };

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host);
        headers.insert("content-type".to_string(), content_type.to_string());
        if let Some(target) = target {
            headers.insert("x-amz-target".to_string(), target.to_string());
        }

        Signer::new(&self.credentials, &self.region, service).sign(
            "POST",
            &url,
            &mut headers,
            &body,
            Utc::now(),
        );

        debug!("{} {} -> {}", service, action, url);

        let mut request = self.http.post(url);
        for (name, value) in &headers {
            // reqwest derives Host from the URL
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| ApiError::transport(action, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::transport(action, e))?;

        if status.is_success() {
            Ok(text)
        } else {
            let err = ApiError::from_response(action, status.as_u16(), &text);
            debug!("{} returned {}: {}", action, status, err.code);
            Err(err)
        }
    }
}

fn service_endpoint(service: &str, region: &str) -> String {
    let suffix = if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    format!("https://{}.{}.{}/", service, region, suffix)
}
