//! Notification payload construction and the status message table.

use serde::Serialize;

/// The JSON document encrypted into the push body.
///
/// The storefront service worker reads `title`/`body` for display and
/// `orderId`/`url` for click-through routing. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub order_id: String,
    pub url: String,
}

/// Fixed `(status, title, body)` triples for known order statuses.
const STATUS_MESSAGES: &[(&str, &str, &str)] = &[
    ("preparing", "Order confirmed", "The kitchen has started preparing your order."),
    ("ready", "Order ready", "Your order is ready for pickup."),
    ("out_for_delivery", "Out for delivery", "Your order is on its way."),
    ("delivered", "Order delivered", "Your order has arrived. Enjoy!"),
    ("cancelled", "Order cancelled", "Your order has been cancelled."),
];

/// Fallback pair for unrecognized statuses.
const DEFAULT_MESSAGE: (&str, &str) = ("Order update", "Your order status has changed.");

/// Look up the fixed title/body pair for an order status.
pub fn message_for_status(status: &str) -> (&'static str, &'static str) {
    STATUS_MESSAGES
        .iter()
        .find(|(s, _, _)| *s == status)
        .map(|(_, title, body)| (*title, *body))
        .unwrap_or(DEFAULT_MESSAGE)
}

/// Build the payload for a dispatch.
///
/// Caller-supplied title/body override the status table; the deep link
/// always points at the order's tracking page.
pub fn build_payload(
    order_id: &str,
    status: Option<&str>,
    custom_title: Option<&str>,
    custom_body: Option<&str>,
) -> NotificationPayload {
    let (title, body) = message_for_status(status.unwrap_or_default());
    NotificationPayload {
        title: custom_title.unwrap_or(title).to_string(),
        body: custom_body.unwrap_or(body).to_string(),
        order_id: order_id.to_string(),
        url: format!("/orders/{order_id}"),
    }
}
