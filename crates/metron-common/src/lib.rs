//! Shared wire model for the metron agent and server.
//!
//! A [`types::Metric`] is the single record exchanged over HTTP. Everything
//! that has to agree byte-for-byte between both processes lives here: the
//! JSON shape, the HMAC signature discipline, gzip framing, RSA-OAEP block
//! encryption and the retry schedule used against unreliable peers.

pub mod compress;
pub mod crypto;
pub mod error;
pub mod retry;
pub mod signature;
pub mod types;

/// Request/response header carrying the hex HMAC-SHA256 of the body.
pub const HASH_HEADER: &str = "HashSHA256";

/// Header carrying the agent's outbound IP, checked against the trusted subnet.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// Content type used for every JSON request and response.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
