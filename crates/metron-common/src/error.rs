/// Errors raised while building, validating or transporting metric records.
///
/// # Examples
///
/// ```rust
/// use metron_common::error::WireError;
///
/// let err = WireError::UnknownType("histogram".to_string());
/// assert!(err.to_string().contains("histogram"));
/// assert!(err.is_bad_input());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("metric id is required")]
    MissingId,

    #[error("metric type is required")]
    MissingType,

    #[error("unknown metric type: {0}")]
    UnknownType(String),

    #[error("gauge {0} carries no value")]
    MissingValue(String),

    #[error("counter {0} carries no delta")]
    MissingDelta(String),

    #[error("counter {0} must not carry a value")]
    UnexpectedValue(String),

    #[error("gauge {0} must not carry a delta")]
    UnexpectedDelta(String),

    /// The source could not be coerced into an `f64` gauge sample.
    #[error("bad gauge value: {0}")]
    BadGaugeValue(String),

    /// The source could not be coerced into an `i64` counter delta.
    #[error("bad counter value: {0}")]
    BadCounterValue(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// RSA encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] rsa::Error),

    /// A key file could not be parsed as PEM.
    #[error("bad key: {0}")]
    BadKey(String),
}

impl WireError {
    /// Returns true for errors caused by a malformed record rather than by
    /// the transport or key material.
    pub fn is_bad_input(&self) -> bool {
        !matches!(
            self,
            WireError::Io(_) | WireError::Crypto(_) | WireError::BadKey(_)
        )
    }
}

/// Convenience `Result` alias for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
