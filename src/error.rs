use thiserror::Error;

const GENERIC_FAILURE: &str = "failed to fetch";

/// Failures surfaced by the token cache, the upstream gateway and the proxy
/// client. Cloneable so a pagination state can keep the last one around.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("auth: {0}")]
    Auth(String),
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("{0}")]
    NotFound(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Validation(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

impl GatewayError {
    /// HTTP status the proxy answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 400,
            GatewayError::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// The most specific message available for display.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Upstream { status, body } if body.trim().is_empty() => {
                format!("upstream error {}", status)
            }
            GatewayError::Transport(msg) if msg.trim().is_empty() => GENERIC_FAILURE.to_string(),
            other => {
                let text = other.to_string();
                if text.trim().is_empty() {
                    GENERIC_FAILURE.to_string()
                } else {
                    text
                }
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            GatewayError::Upstream {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::Validation(format!("invalid url: {}", err))
    }
}
