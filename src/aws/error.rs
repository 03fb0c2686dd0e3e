//! Errors returned by the AWS APIs

use serde::Deserialize;
use thiserror::Error;

/// A failed AWS call: the provider's error code plus its message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{action} failed [{code}]: {message}")]
pub struct ApiError {
    pub action: String,
    pub code: String,
    pub message: String,
    /// HTTP status, 0 when the request never got a response
    pub status: u16,
}

impl ApiError {
    pub fn new(action: &str, code: &str, message: &str, status: u16) -> Self {
        Self {
            action: action.to_string(),
            code: code.to_string(),
            message: message.to_string(),
            status,
        }
    }

    pub fn transport(action: &str, err: impl std::fmt::Display) -> Self {
        Self::new(action, "TransportError", &err.to_string(), 0)
    }

    pub fn malformed_response(action: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(
            action,
            "MalformedResponse",
            &format!("Unexpected response body: {}", detail),
            200,
        )
    }

    /// The resource named in the request does not exist (any service).
    pub fn is_not_found(&self) -> bool {
        self.code.ends_with("NotFound") || self.code == "ResourceNotFoundException"
    }

    /// The credentials were rejected outright.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.code.as_str(),
            "InvalidClientTokenId"
                | "SignatureDoesNotMatch"
                | "ExpiredToken"
                | "AuthFailure"
                | "UnrecognizedClientException"
                | "AccessDenied"
        )
    }

    /// Build an error from a non-2xx response body (XML or JSON).
    pub fn from_response(action: &str, status: u16, body: &str) -> Self {
        let trimmed = body.trim_start();
        let parsed = if trimmed.starts_with('<') {
            parse_xml_error(trimmed)
        } else {
            parse_json_error(trimmed)
        };

        match parsed {
            Some((code, message)) => Self::new(action, &code, &message, status),
            None => Self::new(
                action,
                &format!("HTTP{}", status),
                &body.chars().take(200).collect::<String>(),
                status,
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

// EC2: <Response><Errors><Error>...</Error></Errors></Response>
#[derive(Debug, Deserialize)]
struct Ec2ErrorXml {
    #[serde(rename = "Errors")]
    errors: Ec2Errors,
}

#[derive(Debug, Deserialize)]
struct Ec2Errors {
    #[serde(rename = "Error", default)]
    error: Vec<ErrorDetail>,
}

// STS: <ErrorResponse><Error>...</Error></ErrorResponse>
#[derive(Debug, Deserialize)]
struct QueryErrorXml {
    #[serde(rename = "Error")]
    error: ErrorDetail,
}

fn parse_xml_error(body: &str) -> Option<(String, String)> {
    if let Ok(parsed) = quick_xml::de::from_str::<Ec2ErrorXml>(body) {
        if let Some(first) = parsed.errors.error.into_iter().next() {
            return Some((first.code, first.message));
        }
    }
    quick_xml::de::from_str::<QueryErrorXml>(body)
        .ok()
        .map(|parsed| (parsed.error.code, parsed.error.message))
}

// ACM: {"__type": "com.amazonaws...#ResourceNotFoundException", "message": "..."}
fn parse_json_error(body: &str) -> Option<(String, String)> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let raw_type = value
        .get("__type")
        .or_else(|| value.get("code"))
        .and_then(|v| v.as_str())?;
    let code = raw_type.rsplit('#').next().unwrap_or(raw_type).to_string();
    let message = value
        .get("message")
        .or_else(|| value.get("Message"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}
