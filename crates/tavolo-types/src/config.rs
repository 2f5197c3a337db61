//! Process configuration loaded from environment variables.
//!
//! All configuration is read once at startup. VAPID key material is
//! immutable for the process lifetime and shared read-only across every
//! dispatch.

use std::env;

use crate::PushError;

/// Default listen address for the HTTP service.
const DEFAULT_LISTEN: &str = "127.0.0.1:8787";

/// Default SQLite database path.
const DEFAULT_DB_PATH: &str = "tavolo.db";

/// Default per-request timeout for outbound push deliveries, in seconds.
const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 10;

/// VAPID key material identifying this sender to push services.
#[derive(Debug, Clone)]
pub struct VapidConfig {
    /// JWT `sub` claim (`mailto:` or `https:` URI).
    pub subject: String,
    /// Base64url-encoded uncompressed P-256 public key, sent verbatim in
    /// the `k=` parameter of the `Authorization` header.
    pub public_key: String,
    /// JSON-serialized EC JWK private key.
    ///
    /// **Security**: Never log this value.
    pub private_key_jwk: String,
}

impl VapidConfig {
    /// Load the VAPID key material from `VAPID_PRIVATE_KEY`,
    /// `VAPID_PUBLIC_KEY` and `VAPID_SUBJECT`.
    ///
    /// All three must be present; a partial configuration is treated the
    /// same as a missing one.
    pub fn from_env() -> Result<Self, PushError> {
        let private_key_jwk = env::var("VAPID_PRIVATE_KEY").ok();
        let public_key = env::var("VAPID_PUBLIC_KEY").ok();
        let subject = env::var("VAPID_SUBJECT").ok();

        match (private_key_jwk, public_key, subject) {
            (Some(private_key_jwk), Some(public_key), Some(subject)) => Ok(Self {
                subject,
                public_key,
                private_key_jwk,
            }),
            _ => Err(PushError::Config("VAPID keys not configured".into())),
        }
    }
}

/// Full configuration for the push service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP service binds to (`TAVOLO_LISTEN`).
    pub listen_addr: String,
    /// SQLite database path for the subscription store (`TAVOLO_DB_PATH`).
    pub db_path: String,
    /// Outbound push request timeout in seconds (`TAVOLO_PUSH_TIMEOUT_SECS`).
    pub push_timeout_secs: u64,
    /// VAPID key material.
    pub vapid: VapidConfig,
}

impl ServiceConfig {
    /// Load the full service configuration from the environment.
    pub fn from_env() -> Result<Self, PushError> {
        let listen_addr =
            env::var("TAVOLO_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN.to_string());
        let db_path =
            env::var("TAVOLO_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let push_timeout_secs = match env::var("TAVOLO_PUSH_TIMEOUT_SECS") {
            Ok(raw) => raw.parse().map_err(|_| {
                PushError::Config(format!(
                    "TAVOLO_PUSH_TIMEOUT_SECS must be an integer, got {raw:?}"
                ))
            })?,
            Err(_) => DEFAULT_PUSH_TIMEOUT_SECS,
        };

        Ok(Self {
            listen_addr,
            db_path,
            push_timeout_secs,
            vapid: VapidConfig::from_env()?,
        })
    }
}
