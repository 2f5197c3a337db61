//! Web Push delivery engine for the Tavolo storefront.
//!
//! Implements RFC 8030 delivery with per-subscriber message encryption
//! (RFC 8291, `aes128gcm` content encoding) and VAPID authentication
//! (RFC 8292), built from cryptographic primitives:
//!
//! - [`vapid`]: ES256 JWT signing and the `Authorization` header
//! - [`crypto`]: ephemeral ECDH key agreement and HKDF key derivation
//! - [`encrypt`]: AES-128-GCM sealing and RFC 8188 body framing
//! - [`message`]: notification payloads and the status message table
//! - [`store`]: subscription persistence (trait + SQLite implementation)
//! - [`dispatcher`]: per-order fan-out, response handling, and cleanup

pub mod crypto;
pub mod dispatcher;
pub mod encrypt;
pub mod message;
pub mod store;
pub mod vapid;

pub use dispatcher::{DispatchOutcome, DispatchRequest, PushDispatcher};
pub use store::{PushSubscription, SqliteSubscriptionStore, SubscriptionStore};
pub use vapid::VapidSigner;
