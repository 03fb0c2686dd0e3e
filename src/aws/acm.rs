//! ACM certificate import and deletion (JSON 1.1 protocol)

use crate::aws::CertificateBundle;
use crate::aws::client::AwsClient;
use crate::aws::error::ApiError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;

const SERVICE: &str = "acm";
const TARGET_PREFIX: &str = "CertificateManager";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImportCertificateResponse {
    certificate_arn: String,
}

#[derive(Debug, Clone)]
pub struct AcmClient {
    client: AwsClient,
}

impl AcmClient {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    /// Import a PEM certificate/key pair; returns the certificate ARN.
    pub async fn import_certificate(&self, bundle: &CertificateBundle) -> Result<String, ApiError> {
        let body = self
            .client
            .json(
                SERVICE,
                &format!("{}.ImportCertificate", TARGET_PREFIX),
                &import_payload(bundle),
            )
            .await?;

        let response: ImportCertificateResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::malformed_response("ImportCertificate", e))?;
        Ok(response.certificate_arn)
    }

    pub async fn delete_certificate(&self, arn: &str) -> Result<(), ApiError> {
        self.client
            .json(
                SERVICE,
                &format!("{}.DeleteCertificate", TARGET_PREFIX),
                &json!({ "CertificateArn": arn }),
            )
            .await
            .map(|_| ())
    }
}

// Blob members travel base64-encoded in the JSON protocol
fn import_payload(bundle: &CertificateBundle) -> serde_json::Value {
    let mut payload = json!({
        "Certificate": STANDARD.encode(&bundle.certificate),
        "PrivateKey": STANDARD.encode(&bundle.private_key),
        "Tags": [{ "Key": "Name", "Value": "vpc-vpn-pivot" }],
    });
    if let Some(chain) = &bundle.chain {
        payload["CertificateChain"] = json!(STANDARD.encode(chain));
    }
    payload
}
