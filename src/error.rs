use thiserror::Error;

/// User input that could not be understood. Always recoverable: the dialogue
/// replies with a clarification prompt and stays in its current state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("unrecognized command")]
    Unrecognized,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("unrecognized send format")]
    MalformedSend,
}

/// Well-formed input that fails a business rule (limits, bad email, ...).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("amount below minimum of {0} BTC")]
    AmountBelowMinimum(String),
    #[error("amount above maximum of {0} BTC")]
    AmountAboveMaximum(String),
    #[error("invalid email address")]
    InvalidEmail,
    #[error("please provide your first and last name")]
    InvalidName,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OtpError {
    #[error("no active code found")]
    NotFound,
    #[error("code has expired")]
    Expired,
    #[error("incorrect code, {remaining} attempts remaining")]
    Mismatch { remaining: u32 },
    #[error("no attempts remaining")]
    Exhausted,
    #[error("too many codes requested, try again later")]
    RateLimitExceeded,
}

/// External call failure. `code` carries the upstream error code when the
/// gateway returned a structured business error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway error {code}: {message}")]
    Api { code: String, message: String },
    #[error("gateway returned an unreadable response: {0}")]
    BadResponse(String),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Request(e) if e.is_timeout())
    }
}

/// Incoming webhook payload failed signature verification. The payload is
/// rejected outright: no state mutation, no reply.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("webhook signature verification failed")]
pub struct SignatureVerificationError;
