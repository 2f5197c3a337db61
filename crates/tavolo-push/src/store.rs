//! Subscription persistence.
//!
//! The dispatcher only consumes the narrow [`SubscriptionStore`] surface
//! (read active subscriptions for an order, batch-delete invalidated
//! ones). The SQLite implementation additionally owns inserts for the
//! subscribe flow and the expiry sweep, with endpoint/key validation on
//! the way in.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tavolo_types::PushError;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::crypto::decode_b64;

/// A Web Push subscription following one order.
#[derive(Debug, Clone)]
pub struct PushSubscription {
    /// Unique subscription identifier.
    pub id: Uuid,
    /// The order this subscriber follows.
    pub order_id: String,
    /// Push service endpoint URL (HTTPS, known push origin).
    pub endpoint: String,
    /// Subscriber public key (base64url, 65-byte uncompressed P-256 point).
    pub p256dh: String,
    /// Subscriber auth secret (base64url, 16 bytes).
    pub auth: String,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// Subscriptions at or past this instant are excluded from delivery.
    pub expires_at: DateTime<Utc>,
}

/// The store surface the dispatcher consumes.
pub trait SubscriptionStore: Send + Sync {
    /// All subscriptions for `order_id` whose `expires_at` is in the
    /// future.
    fn find_active_by_order(&self, order_id: &str) -> Result<Vec<PushSubscription>, PushError>;

    /// Delete the given subscriptions in one statement. Called with the
    /// ids the push service reported gone (404/410).
    fn delete_by_ids(&self, ids: &[Uuid]) -> Result<(), PushError>;
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Known push service endpoint origins. Endpoints that match none of
/// these are rejected to prevent SSRF against internal services.
const KNOWN_PUSH_ORIGINS: &[&str] = &[
    "fcm.googleapis.com",
    "push.services.mozilla.com",
    "updates.push.services.mozilla.com",
    "wns.windows.com",
    "notify.windows.com",
    "web.push.apple.com",
    "push.apple.com",
];

/// Validate a push subscription endpoint URL.
///
/// Checks: valid HTTPS URL, no private/loopback/link-local target, and
/// a known push service origin.
pub fn validate_endpoint(endpoint: &str) -> Result<(), PushError> {
    let url = Url::parse(endpoint)
        .map_err(|e| PushError::Input(format!("invalid endpoint URL: {e}")))?;

    if url.scheme() != "https" {
        return Err(PushError::Input("push endpoint must use HTTPS".into()));
    }

    let host = url
        .host_str()
        .ok_or_else(|| PushError::Input("push endpoint must have a host".into()))?;

    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        if ip.is_loopback() || is_private_ip(ip) || is_link_local(ip) {
            return Err(PushError::Input(
                "push endpoint must not target private or loopback addresses".into(),
            ));
        }
    }

    let host_lower = host.to_lowercase();
    if host_lower == "localhost" || host_lower.ends_with(".local") {
        return Err(PushError::Input("push endpoint must not target localhost".into()));
    }

    let is_known = KNOWN_PUSH_ORIGINS
        .iter()
        .any(|origin| host_lower == *origin || host_lower.ends_with(&format!(".{origin}")));
    if !is_known {
        return Err(PushError::Input(format!(
            "push endpoint host {host_lower} is not a recognized push service"
        )));
    }

    Ok(())
}

/// RFC 1918 / RFC 4193 private ranges, plus v4 link-local.
fn is_private_ip(ip: std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
                || (octets[0] == 169 && octets[1] == 254)
        }
        std::net::IpAddr::V6(v6) => {
            let segments = v6.segments();
            (segments[0] & 0xfe00) == 0xfc00 || v6.is_loopback()
        }
    }
}

fn is_link_local(ip: std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 169 && octets[1] == 254
        }
        std::net::IpAddr::V6(v6) => {
            let segments = v6.segments();
            (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Validate a subscriber public key: 65-byte uncompressed P-256 point.
pub fn validate_p256dh(key: &str) -> Result<(), PushError> {
    let bytes = decode_b64(key)
        .map_err(|_| PushError::Input("p256dh is not valid base64".into()))?;

    if bytes.len() != 65 {
        return Err(PushError::Input(format!(
            "p256dh must be 65 bytes (uncompressed P-256), got {}",
            bytes.len()
        )));
    }
    if bytes[0] != 0x04 {
        return Err(PushError::Input(
            "p256dh must start with 0x04 (uncompressed point)".into(),
        ));
    }
    Ok(())
}

/// Validate a subscriber auth secret: exactly 16 bytes.
pub fn validate_auth_key(key: &str) -> Result<(), PushError> {
    let bytes = decode_b64(key)
        .map_err(|_| PushError::Input("auth key is not valid base64".into()))?;

    if bytes.len() != 16 {
        return Err(PushError::Input(format!(
            "auth key must be 16 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SQLite-backed store
// ---------------------------------------------------------------------------

/// SQL to create the push_subscriptions table.
const CREATE_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS push_subscriptions (
        id         TEXT PRIMARY KEY,
        order_id   TEXT NOT NULL,
        endpoint   TEXT NOT NULL,
        p256dh     TEXT NOT NULL,
        auth       TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_push_subscriptions_order
        ON push_subscriptions(order_id);
";

/// Manages push subscriptions in a SQLite database.
pub struct SqliteSubscriptionStore {
    conn: Mutex<Connection>,
}

impl SqliteSubscriptionStore {
    /// Open (or create) the subscription store at the given path,
    /// creating the `push_subscriptions` table if missing.
    pub fn open(db_path: &str) -> Result<Self, PushError> {
        let conn = Connection::open(db_path)
            .map_err(|e| PushError::Store(format!("failed to open subscription DB: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| PushError::Store(format!("failed to create push_subscriptions: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self, PushError> {
        Self::open(":memory:")
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PushError> {
        self.conn
            .lock()
            .map_err(|_| PushError::Store("subscription store lock poisoned".into()))
    }

    /// Add a new subscription after validating all fields.
    ///
    /// Used by the subscribe flow; the dispatcher never inserts. Returns
    /// the newly assigned subscription id.
    pub fn add_subscription(
        &self,
        order_id: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Uuid, PushError> {
        validate_endpoint(endpoint)?;
        validate_p256dh(p256dh)?;
        validate_auth_key(auth)?;

        let id = Uuid::new_v4();
        let now = Utc::now();

        self.lock()?
            .execute(
                "INSERT INTO push_subscriptions (id, order_id, endpoint, p256dh, auth, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.to_string(),
                    order_id,
                    endpoint,
                    p256dh,
                    auth,
                    now.to_rfc3339(),
                    expires_at.to_rfc3339(),
                ],
            )
            .map_err(|e| PushError::Store(format!("failed to insert subscription: {e}")))?;

        info!(%id, order_id, "push subscription added");
        Ok(id)
    }

    /// Remove all subscriptions whose `expires_at` is in the past.
    ///
    /// Hook for the periodic expiry sweep; returns the number removed.
    pub fn cleanup_expired(&self) -> Result<usize, PushError> {
        let now = Utc::now().to_rfc3339();
        let deleted = self
            .lock()?
            .execute(
                "DELETE FROM push_subscriptions WHERE expires_at < ?1",
                rusqlite::params![now],
            )
            .map_err(|e| PushError::Store(format!("failed to cleanup expired: {e}")))?;

        if deleted > 0 {
            info!(deleted, "cleaned up expired push subscriptions");
        }
        Ok(deleted)
    }
}

fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<PushSubscription> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(5)?;
    let expires_at: String = row.get(6)?;

    Ok(PushSubscription {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        order_id: row.get(1)?,
        endpoint: row.get(2)?,
        p256dh: row.get(3)?,
        auth: row.get(4)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default(),
        expires_at: DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}

impl SubscriptionStore for SqliteSubscriptionStore {
    fn find_active_by_order(&self, order_id: &str) -> Result<Vec<PushSubscription>, PushError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, order_id, endpoint, p256dh, auth, created_at, expires_at
                 FROM push_subscriptions
                 WHERE order_id = ?1 AND expires_at > ?2
                 ORDER BY created_at",
            )
            .map_err(|e| PushError::Store(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(rusqlite::params![order_id, now], row_to_subscription)
            .map_err(|e| PushError::Store(format!("failed to query subscriptions: {e}")))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(|e| PushError::Store(format!("failed to read row: {e}")))?);
        }
        Ok(result)
    }

    fn delete_by_ids(&self, ids: &[Uuid]) -> Result<(), PushError> {
        if ids.is_empty() {
            return Ok(());
        }

        let placeholders = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("DELETE FROM push_subscriptions WHERE id IN ({placeholders})");

        let deleted = self
            .lock()?
            .execute(
                &sql,
                rusqlite::params_from_iter(ids.iter().map(|id| id.to_string())),
            )
            .map_err(|e| PushError::Store(format!("failed to delete subscriptions: {e}")))?;

        info!(deleted, "removed invalidated push subscriptions");
        Ok(())
    }
}
