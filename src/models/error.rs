use thiserror::Error;

/// Classifies an error as worth retrying or not. Non-retryable errors fail
/// immediately without consuming retry budget.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Failure taxonomy for delivery-channel sends. Network-level connection
/// failures, rate limits, and overloaded-provider responses are retryable;
/// bad input (recipient, payload, credentials) is not.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("network error ({code}): {message}")]
    Network { code: String, message: String },

    #[error("provider returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("provider rate limit ({code})")]
    RateLimited { code: String },

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

const RETRYABLE_NETWORK_CODES: &[&str] = &[
    "ECONNREFUSED",
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
];

const RETRYABLE_HTTP_STATUSES: &[u16] = &[429, 503, 504];

impl DeliveryError {
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        DeliveryError::Network {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        DeliveryError::Http {
            status,
            message: message.into(),
        }
    }
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Network { code, .. } => {
                RETRYABLE_NETWORK_CODES.contains(&code.as_str())
            }
            DeliveryError::Http { status, .. } => RETRYABLE_HTTP_STATUSES.contains(status),
            DeliveryError::RateLimited { .. } => true,
            DeliveryError::InvalidRecipient(_)
            | DeliveryError::MalformedPayload(_)
            | DeliveryError::Auth(_)
            | DeliveryError::Other(_) => false,
        }
    }
}
