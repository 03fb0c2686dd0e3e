//! STS identity lookup

use crate::aws::CallerIdentity;
use crate::aws::client::AwsClient;
use crate::aws::error::ApiError;
use serde::Deserialize;
use std::collections::BTreeMap;

const API_VERSION: &str = "2011-06-15";
const SERVICE: &str = "sts";

#[derive(Debug, Deserialize)]
struct GetCallerIdentityResponse {
    #[serde(rename = "GetCallerIdentityResult")]
    result: GetCallerIdentityResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetCallerIdentityResult {
    arn: String,
    user_id: String,
    account: String,
}

#[derive(Debug, Clone)]
pub struct StsClient {
    client: AwsClient,
}

impl StsClient {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    /// The account and principal behind the configured credentials.
    pub async fn get_caller_identity(&self) -> Result<CallerIdentity, ApiError> {
        let body = self
            .client
            .query(SERVICE, "GetCallerIdentity", API_VERSION, BTreeMap::new())
            .await?;
        parse_caller_identity(&body)
    }
}

fn parse_caller_identity(body: &str) -> Result<CallerIdentity, ApiError> {
    let response: GetCallerIdentityResponse = quick_xml::de::from_str(body)
        .map_err(|e| ApiError::malformed_response("GetCallerIdentity", e))?;

    Ok(CallerIdentity {
        account: response.result.account,
        arn: response.result.arn,
        user_id: response.result.user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_caller_identity() {
        let body = r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>arn:aws:iam::123456789012:user/Alice</Arn>
    <UserId>AIDACKCEVSQ6C2EXAMPLE</UserId>
    <Account>123456789012</Account>
  </GetCallerIdentityResult>
  <ResponseMetadata>
    <RequestId>01234567-89ab-cdef-0123-456789abcdef</RequestId>
  </ResponseMetadata>
</GetCallerIdentityResponse>"#;

        let identity = parse_caller_identity(body).unwrap();
        assert_eq!(identity.account, "123456789012");
        assert_eq!(identity.arn, "arn:aws:iam::123456789012:user/Alice");
        assert_eq!(identity.user_id, "AIDACKCEVSQ6C2EXAMPLE");
    }

    #[test]
    fn test_parse_caller_identity_missing_result() {
        let err = parse_caller_identity("<GetCallerIdentityResponse/>").unwrap_err();
        assert_eq!(err.action, "GetCallerIdentity");
        assert_eq!(err.code, "MalformedResponse");
    }
}
