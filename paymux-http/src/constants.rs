//! Header names and paths of the paywall HTTP API.

/// Request header carrying the base64 JSON payment payload.
pub const X_PAYMENT_HEADER: &str = "X-PAYMENT";

/// Response header carrying the base64 JSON settlement.
pub const X_PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// HTTP 402 Payment Required status code.
pub const HTTP_STATUS_PAYMENT_REQUIRED: u16 = 402;

/// Path every paywall endpoint lives under, relative to the server URL.
pub const PAYWALL_PATH: &str = "paywall/v1";

/// Query parameter carrying a coupon code on quote requests.
pub const COUPON_QUERY_PARAM: &str = "coupon";
