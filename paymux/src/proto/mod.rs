//! Wire types for the paywall endpoints and the x402 (v1) headers.
//!
//! All types serialize with camelCase field names, matching the JSON the
//! paywall server emits and expects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod encoding;

pub use encoding::Base64Bytes;

/// x402 protocol version spoken by this crate.
pub const X402_VERSION: u8 = 1;

/// Body of a `402 Payment Required` quote response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version.
    pub x402_version: u8,
    /// Server-provided explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Acceptable ways to pay, in server preference order.
    #[serde(default)]
    pub accepts: Vec<PaymentRequirements>,
}

/// One acceptable way to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Scheme name, e.g. `exact`.
    pub scheme: String,
    /// Network name, e.g. `solana` or `solana-devnet`.
    pub network: String,
    /// Amount in the asset's smallest unit, as a decimal string.
    pub max_amount_required: String,
    /// Resource being paid for.
    #[serde(default)]
    pub resource: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// MIME type of the resource.
    #[serde(default)]
    pub mime_type: String,
    /// Payee address.
    pub pay_to: String,
    /// Validity of a signed payment, in seconds.
    #[serde(default)]
    pub max_timeout_seconds: u64,
    /// Asset (token mint) address.
    pub asset: String,
    /// Scheme-specific extras (e.g. `feePayer`, `decimals`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PaymentRequirements {
    /// Parses [`Self::max_amount_required`].
    #[must_use]
    pub fn amount(&self) -> Option<u64> {
        self.max_amount_required.trim().parse().ok()
    }

    /// Returns a string field of [`Self::extra`].
    #[must_use]
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.as_ref()?.get(key)?.as_str()
    }

    /// Returns an unsigned integer field of [`Self::extra`].
    #[must_use]
    pub fn extra_u64(&self, key: &str) -> Option<u64> {
        self.extra.as_ref()?.get(key)?.as_u64()
    }
}

/// The payload carried in the `X-PAYMENT` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Protocol version.
    pub x402_version: u8,
    /// Scheme of the accepted requirement.
    pub scheme: String,
    /// Network of the accepted requirement.
    pub network: String,
    /// Scheme payload.
    pub payload: ExactPayload,
}

/// Payload of the `exact` scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    /// Base64 serialized signed transaction.
    pub transaction: String,
    /// Application metadata forwarded to the server (coupon code, order refs).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// The settlement carried in the `X-PAYMENT-RESPONSE` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    /// Whether the payment settled.
    pub success: bool,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// On-chain transaction id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Network the transaction landed on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    /// Server metadata (order id, download links, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// One cart line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Resource (product) id.
    pub resource: String,
    /// Quantity, at least 1.
    pub quantity: u32,
    /// Product variant, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
}

impl CartItem {
    /// A single unit of `resource`.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            quantity: 1,
            variant_id: None,
        }
    }

    /// Sets the quantity.
    #[must_use]
    pub const fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }
}

/// Body of `POST /paywall/v1/cart/quote`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartQuoteRequest {
    /// Line items.
    pub items: Vec<CartItem>,
    /// Coupon code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    /// Application metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Response of `POST /paywall/v1/cart/quote`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartQuote {
    /// Server-side cart id used by the cart quote and verify endpoints.
    pub cart_id: String,
    /// Quote expiry (RFC 3339), if the server sets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Response of `GET /paywall/v1/subscription/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    /// Server's verdict.
    pub active: bool,
    /// Raw status (`active`, `trialing`, `past_due`, `canceled`, ...).
    pub status: String,
    /// End of the current period (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Billing interval (`month`, `year`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

impl SubscriptionStatus {
    /// Whether the subscriber has access: `active`, or a status of
    /// `active` / `trialing`.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.active || matches!(self.status.as_str(), "active" | "trialing")
    }
}

/// Body of the card session endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSessionRequest {
    /// Resource being bought; empty for cart sessions.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    /// Cart lines; empty for single-resource sessions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<CartItem>,
    /// Prefilled customer email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    /// Coupon code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    /// Redirect after success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_url: Option<String>,
    /// Redirect after cancel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_url: Option<String>,
    /// Application metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// A hosted card checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSession {
    /// Stripe checkout session id.
    pub session_id: String,
    /// Redirect URL.
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quote_response() {
        let json = serde_json::json!({
            "x402Version": 1,
            "error": "Payment required",
            "accepts": [{
                "scheme": "exact",
                "network": "solana-devnet",
                "maxAmountRequired": "1500000",
                "resource": "article-1",
                "description": "Premium article",
                "mimeType": "text/html",
                "payTo": "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin",
                "maxTimeoutSeconds": 300,
                "asset": "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU",
                "extra": { "feePayer": "FeePayer1111111111111111111111111111111111", "decimals": 6 }
            }]
        });
        let required: PaymentRequired = serde_json::from_value(json).unwrap();
        let req = &required.accepts[0];
        assert_eq!(req.amount(), Some(1_500_000));
        assert_eq!(req.extra_u64("decimals"), Some(6));
        assert_eq!(
            req.extra_str("feePayer"),
            Some("FeePayer1111111111111111111111111111111111")
        );
        assert_eq!(req.extra_str("missing"), None);
    }

    #[test]
    fn payload_omits_empty_metadata() {
        let payload = PaymentPayload {
            x402_version: X402_VERSION,
            scheme: "exact".to_owned(),
            network: "solana".to_owned(),
            payload: ExactPayload {
                transaction: "AQID".to_owned(),
                metadata: BTreeMap::new(),
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["payload"]["transaction"], "AQID");
        assert!(json["payload"].get("metadata").is_none());
    }

    #[test]
    fn trialing_counts_as_subscribed() {
        let status: SubscriptionStatus =
            serde_json::from_str(r#"{"active":false,"status":"trialing","interval":"month"}"#)
                .unwrap();
        assert!(status.is_subscribed());
        let lapsed: SubscriptionStatus =
            serde_json::from_str(r#"{"active":false,"status":"past_due"}"#).unwrap();
        assert!(!lapsed.is_subscribed());
    }

    #[test]
    fn settlement_defaults_optional_fields() {
        let settlement: SettlementResponse = serde_json::from_str(r#"{"success":false}"#).unwrap();
        assert!(!settlement.success);
        assert!(settlement.tx_hash.is_none());
        assert!(settlement.metadata.is_none());
    }
}
