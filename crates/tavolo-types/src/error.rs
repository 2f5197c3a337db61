//! Error types shared across the Tavolo push service crates.

/// Errors that can occur in the push dispatch pipeline.
///
/// Variants map to the failure taxonomy at the service boundary:
/// `Input` surfaces as HTTP 400, `Config` and `Store` as HTTP 500.
/// `Crypto` and `Delivery` failures are per-subscriber and are normally
/// folded into dispatch counters instead of propagating to the caller.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Input(String),

    #[error("subscription store error: {0}")]
    Store(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("delivery error: {0}")]
    Delivery(String),
}
